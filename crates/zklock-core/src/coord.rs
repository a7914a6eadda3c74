//! Coordination-service abstraction.
//!
//! The `Coordinator` trait is the only way the lock touches the outside
//! world. It is the four primitives of a ZooKeeper-style ensemble, nothing
//! more: session handling, reconnects and the wire protocol belong to the
//! implementation.
//!
//! # Invariants
//!
//! - Sequence: sequential children of one parent receive strictly increasing
//!   numbers, never reused while a sibling holds them
//! - Ephemerality: nodes created by a session disappear when it ends
//! - One-shot watches: a [`Watch`] fires at most once

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::{acl::Acl, error::CoordError};

/// Why a watch fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEvent {
    /// The watched node was deleted (explicitly or by session expiry).
    NodeDeleted,
    /// The connection dropped; the watch will not be honored but the session
    /// may still be alive.
    Disconnected,
    /// The watching session ended.
    SessionExpired,
}

/// Pending one-shot deletion watch.
#[derive(Debug)]
pub struct Watch {
    rx: oneshot::Receiver<WatchEvent>,
}

impl Watch {
    /// Wrap the receiving half of a notification channel.
    pub fn new(rx: oneshot::Receiver<WatchEvent>) -> Self {
        Self { rx }
    }

    /// Paired sender and watch.
    pub fn channel() -> (oneshot::Sender<WatchEvent>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self::new(rx))
    }

    /// Suspend until the watch fires.
    ///
    /// A notifier dropped without firing means the session that owned the
    /// watch is gone, so it reads as [`WatchEvent::SessionExpired`].
    pub async fn wait(self) -> WatchEvent {
        self.rx.await.unwrap_or(WatchEvent::SessionExpired)
    }
}

/// Primitive operations of the coordination service.
///
/// Every method blocks (asynchronously) until the service answers.
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Create an ephemeral sequential node.
    ///
    /// `prefix` is the full path up to the sequence number, e.g.
    /// `/locks/db/write-`. Returns the full path of the created node.
    async fn create_sequential_ephemeral(
        &self,
        prefix: &str,
        data: &[u8],
        acl: &[Acl],
    ) -> Result<String, CoordError>;

    /// Names (not paths) of the current children of `path`, in any order.
    async fn children(&self, path: &str) -> Result<Vec<String>, CoordError>;

    /// Register a one-shot deletion watch on `path`.
    ///
    /// Returns `None` if the node does not exist when the watch is set.
    async fn watch_delete(&self, path: &str) -> Result<Option<Watch>, CoordError>;

    /// Delete the node at `path`.
    async fn delete(&self, path: &str) -> Result<(), CoordError>;
}
