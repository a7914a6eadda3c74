//! Error types.

use thiserror::Error;

/// Errors reported by a [`crate::Coordinator`] implementation.
///
/// The lock never retries these; they reach the caller through
/// [`LockError::Coordination`] unchanged, except `SessionExpired` during a
/// wait, which becomes [`LockError::SessionExpired`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordError {
    /// The node (or the parent of a node being created) does not exist.
    #[error("no node: {path}")]
    NoNode {
        /// Path that was missing.
        path: String,
    },

    /// The session's identities lack the permission the call needs.
    #[error("not authorized: {path}")]
    NoAuth {
        /// Path whose ACL denied the call.
        path: String,
    },

    /// Connection to the ensemble dropped; the session may still be alive.
    #[error("connection lost")]
    ConnectionLoss,

    /// The session is gone and all its ephemeral nodes with it.
    #[error("session expired")]
    SessionExpired,

    /// Any other failure reported by the client library.
    #[error("coordination backend error: {reason}")]
    Backend {
        /// Description of the failure.
        reason: String,
    },
}

impl CoordError {
    /// Returns true if a fresh attempt on the same session could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConnectionLoss => true,
            Self::NoNode { .. } | Self::NoAuth { .. } | Self::SessionExpired | Self::Backend { .. } => {
                false
            },
        }
    }
}

/// Errors from [`crate::ZkRwLock`] operations.
#[derive(Debug, Error)]
pub enum LockError {
    /// `lock`/`rlock` called on an instance that was already used.
    #[error("shared lock instance can lock only once")]
    AlreadyUsed,

    /// `unlock`/`runlock` called without a matching held lock.
    #[error("not locked")]
    NotLocked,

    /// Our own candidate node disappeared while we were waiting.
    #[error("candidate node vanished: {path}")]
    CandidateLost {
        /// Full path of the lost candidate.
        path: String,
    },

    /// The session ended while waiting for a predecessor.
    #[error("session expired while waiting for lock")]
    SessionExpired,

    /// The coordination service reported an error.
    #[error(transparent)]
    Coordination(#[from] CoordError),
}

impl LockError {
    /// Returns true for programmer-contract violations.
    ///
    /// Misuse is detected locally, before any coordination call.
    pub fn is_misuse(&self) -> bool {
        matches!(self, Self::AlreadyUsed | Self::NotLocked)
    }
}
