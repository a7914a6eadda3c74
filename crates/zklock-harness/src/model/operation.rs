//! Operations for model-based testing.
//!
//! Operations represent all possible client actions against one lock path.
//! They are generated randomly by proptest and applied to both the model and
//! the real lock running over the in-memory ensemble.

use arbitrary::Arbitrary;

/// Client identifier (0-indexed).
///
/// Each client is one process with its own session.
pub type ClientId = u8;

/// Operations that can be applied to the system.
///
/// A client has at most one outstanding request at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Arbitrary)]
pub enum Operation {
    /// Client requests shared access.
    Read {
        /// Client performing the operation.
        client_id: ClientId,
    },

    /// Client requests exclusive access.
    Write {
        /// Client performing the operation.
        client_id: ClientId,
    },

    /// Client releases the lock it holds.
    Release {
        /// Client releasing.
        client_id: ClientId,
    },

    /// Client process dies; its session expires.
    ///
    /// Drops its request whether held or still waiting.
    Crash {
        /// Client crashing.
        client_id: ClientId,
    },
}

impl Operation {
    /// Client targeted by this operation.
    pub fn client_id(&self) -> ClientId {
        match *self {
            Self::Read { client_id }
            | Self::Write { client_id }
            | Self::Release { client_id }
            | Self::Crash { client_id } => client_id,
        }
    }

    /// Same operation aimed at `client_id`.
    #[must_use]
    pub fn with_client(self, client_id: ClientId) -> Self {
        match self {
            Self::Read { .. } => Self::Read { client_id },
            Self::Write { .. } => Self::Write { client_id },
            Self::Release { .. } => Self::Release { client_id },
            Self::Crash { .. } => Self::Crash { client_id },
        }
    }
}

/// Result of applying an operation.
///
/// Used to compare model and real system behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult {
    /// Operation succeeded.
    Ok,

    /// Operation failed with expected error.
    Error(OperationError),
}

/// Expected errors that can occur during operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    /// Client already has a held or waiting request.
    Busy,

    /// Release without holding the lock (idle or still waiting).
    NotHolding,

    /// Invalid client ID.
    InvalidClient,
}

impl OperationResult {
    /// Check if operation succeeded.
    pub fn is_ok(&self) -> bool {
        matches!(self, OperationResult::Ok)
    }
}
