//! Single-use distributed read/write lock.
//!
//! A `ZkRwLock` is bound to one connection, one lock path and one ACL. It can
//! be locked once, in either mode, and released once.
//!
//! # State machine
//!
//! ```text
//! Unused ──{r}lock──▶ Acquiring ──eligible──▶ HeldRead | HeldWrite ──{r}unlock──▶ Released
//!    ▲                    │
//!    └── create failed    └── wait/list failed ──────────────────────────────────▶ Released
//! ```
//!
//! Misuse (`AlreadyUsed`, `NotLocked`) is a guard on the current state and
//! never reaches the coordination service.

use std::sync::Arc;

use crate::{
    acl::{Acl, Perms},
    coord::{Coordinator, WatchEvent},
    eligibility::{Verdict, evaluate},
    error::{CoordError, LockError},
    node::{CandidateNode, NodeKind, sibling_set},
};

/// Lifecycle of a lock instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// Never locked.
    Unused,
    /// Candidate created, waiting to become eligible.
    Acquiring,
    /// Holding shared access.
    HeldRead,
    /// Holding exclusive access.
    HeldWrite,
    /// Released, or acquisition failed after the candidate was created.
    Released,
}

/// Lock configuration.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Parent node under which candidates are created. Must exist.
    pub path: String,
    /// ACL applied to created candidates.
    pub acl: Vec<Acl>,
    /// Payload stored in each candidate node.
    pub data: Vec<u8>,
}

impl LockConfig {
    /// Configuration for `path` with a world-readable/writable ACL and no
    /// payload.
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into(), acl: Acl::world(Perms::ALL), data: Vec::new() }
    }

    /// Replace the ACL.
    #[must_use]
    pub fn with_acl(mut self, acl: Vec<Acl>) -> Self {
        self.acl = acl;
        self
    }

    /// Replace the candidate payload.
    #[must_use]
    pub fn with_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = data.into();
        self
    }
}

/// Fair read/write lock over a [`Coordinator`].
///
/// # Type Parameters
///
/// - `C`: coordination-service connection, possibly `dyn Coordinator`
pub struct ZkRwLock<C: Coordinator + ?Sized> {
    /// Shared connection.
    conn: Arc<C>,
    /// Lock path, ACL, payload.
    config: LockConfig,
    /// Current lifecycle state. Only `transition` writes it.
    state: LockState,
    /// Full path of our candidate, from creation onwards.
    candidate: Option<String>,
}

impl<C: Coordinator + ?Sized> ZkRwLock<C> {
    /// Create an unused lock on `path` with the given ACL.
    pub fn new(conn: Arc<C>, path: impl Into<String>, acl: Vec<Acl>) -> Self {
        Self::with_config(conn, LockConfig::new(path).with_acl(acl))
    }

    /// Create an unused lock from a full configuration.
    pub fn with_config(conn: Arc<C>, config: LockConfig) -> Self {
        Self { conn, config, state: LockState::Unused, candidate: None }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LockState {
        self.state
    }

    /// Lock path.
    pub fn path(&self) -> &str {
        &self.config.path
    }

    /// Full path of our candidate node, once created.
    ///
    /// A caller that gives up on an acquisition (drops the `lock` future) can
    /// delete this node itself to leave the queue.
    pub fn candidate(&self) -> Option<&str> {
        self.candidate.as_deref()
    }

    /// Acquire exclusive access.
    ///
    /// Suspends until every earlier candidate, read or write, is gone.
    ///
    /// # Errors
    ///
    /// - `AlreadyUsed` if this instance was locked before
    /// - `SessionExpired` if the session dies while waiting, whether a watch
    ///   or a list/watch call notices it
    /// - `CandidateLost` if our candidate disappears while waiting
    /// - `Coordination` for any error of the underlying primitives
    pub async fn lock(&mut self) -> Result<(), LockError> {
        self.acquire(NodeKind::Write).await
    }

    /// Acquire shared access.
    ///
    /// Suspends until every earlier write candidate is gone.
    ///
    /// # Errors
    ///
    /// See [`Self::lock`].
    pub async fn rlock(&mut self) -> Result<(), LockError> {
        self.acquire(NodeKind::Read).await
    }

    /// Release exclusive access.
    ///
    /// # Errors
    ///
    /// - `NotLocked` unless the instance holds the write lock
    /// - `Coordination` if the delete fails (the lock stays held)
    pub async fn unlock(&mut self) -> Result<(), LockError> {
        self.release(LockState::HeldWrite).await
    }

    /// Release shared access.
    ///
    /// # Errors
    ///
    /// See [`Self::unlock`].
    pub async fn runlock(&mut self) -> Result<(), LockError> {
        self.release(LockState::HeldRead).await
    }

    async fn acquire(&mut self, kind: NodeKind) -> Result<(), LockError> {
        if self.state != LockState::Unused {
            return Err(LockError::AlreadyUsed);
        }

        let prefix = self.child_path(kind.prefix());
        let path =
            self.conn.create_sequential_ephemeral(&prefix, &self.config.data, &self.config.acl).await?;
        let Some(node) = CandidateNode::from_path(&path) else {
            // Service returned a name we cannot order; leave nothing behind.
            if let Err(err) = self.conn.delete(&path).await {
                tracing::warn!(candidate = %path, error = %err, "failed to remove unparseable candidate");
            }
            return Err(CoordError::Backend { reason: format!("unexpected node name: {path}") }.into());
        };

        tracing::debug!(lock = %self.config.path, candidate = %node.name, "candidate created");
        self.candidate = Some(path);
        self.transition(LockState::Acquiring);

        match self.wait_until_eligible(&node).await {
            Ok(()) => {
                self.transition(match kind {
                    NodeKind::Read => LockState::HeldRead,
                    NodeKind::Write => LockState::HeldWrite,
                });
                Ok(())
            },
            Err(err) => {
                self.abandon().await;
                Err(err)
            },
        }
    }

    async fn wait_until_eligible(&self, own: &CandidateNode) -> Result<(), LockError> {
        loop {
            let children = self.conn.children(&self.config.path).await.map_err(waiting_error)?;
            let siblings = sibling_set(&children);

            let predecessor = match evaluate(own, &siblings) {
                Verdict::Eligible => return Ok(()),
                Verdict::Missing => {
                    return Err(LockError::CandidateLost { path: self.child_path(&own.name) });
                },
                Verdict::Blocked { predecessor } => predecessor,
            };

            tracing::trace!(
                candidate = %own.name,
                predecessor = %predecessor.name,
                siblings = siblings.len(),
                "blocked"
            );

            let watched = self.child_path(&predecessor.name);
            let Some(watch) = self.conn.watch_delete(&watched).await.map_err(waiting_error)? else {
                tracing::trace!(predecessor = %predecessor.name, "predecessor already gone");
                continue;
            };

            match watch.wait().await {
                WatchEvent::NodeDeleted | WatchEvent::Disconnected => {},
                WatchEvent::SessionExpired => return Err(LockError::SessionExpired),
            }
        }
    }

    /// Full path of child `name` under the lock path.
    fn child_path(&self, name: &str) -> String {
        let parent = self.config.path.trim_end_matches('/');
        format!("{parent}/{name}")
    }

    /// Best-effort removal of our candidate after a failed acquisition.
    async fn abandon(&mut self) {
        if let Some(candidate) = &self.candidate {
            if let Err(err) = self.conn.delete(candidate).await {
                if !matches!(err, CoordError::NoNode { .. } | CoordError::SessionExpired) {
                    tracing::warn!(%candidate, error = %err, "failed to remove candidate");
                }
            }
        }
        self.transition(LockState::Released);
    }

    async fn release(&mut self, held: LockState) -> Result<(), LockError> {
        if self.state != held {
            return Err(LockError::NotLocked);
        }
        let Some(candidate) = &self.candidate else {
            return Err(LockError::NotLocked);
        };

        match self.conn.delete(candidate).await {
            Ok(()) => {},
            Err(CoordError::NoNode { .. }) => {
                tracing::debug!(%candidate, "candidate already removed");
            },
            Err(err) => return Err(err.into()),
        }

        self.transition(LockState::Released);
        Ok(())
    }

    fn transition(&mut self, next: LockState) {
        tracing::debug!(lock = %self.config.path, from = ?self.state, to = ?next, "lock state");
        self.state = next;
    }
}

/// Session loss while waiting is reported the same way whether a watch or a
/// call noticed it.
fn waiting_error(err: CoordError) -> LockError {
    match err {
        CoordError::SessionExpired => LockError::SessionExpired,
        other => other.into(),
    }
}

impl<C: Coordinator + ?Sized> std::fmt::Debug for ZkRwLock<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZkRwLock")
            .field("path", &self.config.path)
            .field("state", &self.state)
            .field("candidate", &self.candidate())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, sync::Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::coord::Watch;

    /// One scripted answer per primitive call.
    #[derive(Debug)]
    enum Reply {
        Created(Result<String, CoordError>),
        Children(Result<Vec<String>, CoordError>),
        Watch(Option<WatchEvent>),
        Deleted(Result<(), CoordError>),
    }

    /// Coordinator that replays a fixed script and records every call.
    #[derive(Default)]
    struct Scripted {
        replies: Mutex<VecDeque<Reply>>,
        calls: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self { replies: Mutex::new(replies.into()), calls: Mutex::default() })
        }

        fn next(&self, call: String) -> Reply {
            self.calls.lock().unwrap().push(call);
            self.replies.lock().unwrap().pop_front().expect("script exhausted")
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Coordinator for Scripted {
        async fn create_sequential_ephemeral(
            &self,
            prefix: &str,
            _data: &[u8],
            _acl: &[Acl],
        ) -> Result<String, CoordError> {
            match self.next(format!("create {prefix}")) {
                Reply::Created(r) => r,
                other => panic!("unexpected create, script had {other:?}"),
            }
        }

        async fn children(&self, path: &str) -> Result<Vec<String>, CoordError> {
            match self.next(format!("children {path}")) {
                Reply::Children(r) => r,
                other => panic!("unexpected children, script had {other:?}"),
            }
        }

        async fn watch_delete(&self, path: &str) -> Result<Option<Watch>, CoordError> {
            match self.next(format!("watch {path}")) {
                Reply::Watch(None) => Ok(None),
                Reply::Watch(Some(event)) => {
                    let (tx, watch) = Watch::channel();
                    let _ = tx.send(event);
                    Ok(Some(watch))
                },
                other => panic!("unexpected watch, script had {other:?}"),
            }
        }

        async fn delete(&self, path: &str) -> Result<(), CoordError> {
            match self.next(format!("delete {path}")) {
                Reply::Deleted(r) => r,
                other => panic!("unexpected delete, script had {other:?}"),
            }
        }
    }

    fn children(names: &[&str]) -> Reply {
        Reply::Children(Ok(names.iter().map(|s| (*s).to_string()).collect()))
    }

    fn lock_on(conn: &Arc<Scripted>) -> ZkRwLock<Scripted> {
        ZkRwLock::new(Arc::clone(conn), "/lock", Acl::world(Perms::ALL))
    }

    #[tokio::test]
    async fn unlock_without_lock_makes_no_calls() {
        let conn = Scripted::new(vec![]);
        let mut lock = lock_on(&conn);

        assert!(matches!(lock.runlock().await, Err(LockError::NotLocked)));
        assert!(matches!(lock.unlock().await, Err(LockError::NotLocked)));
        assert!(conn.calls().is_empty());
    }

    #[tokio::test]
    async fn second_lock_is_rejected_without_calls() {
        let conn = Scripted::new(vec![
            Reply::Created(Ok("/lock/read-0000000000".into())),
            children(&["read-0000000000"]),
        ]);
        let mut lock = lock_on(&conn);

        lock.rlock().await.unwrap();
        let calls = conn.calls().len();

        assert!(matches!(lock.rlock().await, Err(LockError::AlreadyUsed)));
        assert!(matches!(lock.lock().await, Err(LockError::AlreadyUsed)));
        assert_eq!(conn.calls().len(), calls);
        assert_eq!(lock.state(), LockState::HeldRead);
    }

    #[tokio::test]
    async fn failed_create_leaves_instance_unused() {
        let conn = Scripted::new(vec![Reply::Created(Err(CoordError::NoNode { path: "/lock".into() }))]);
        let mut lock = lock_on(&conn);

        let err = lock.lock().await.unwrap_err();
        assert!(matches!(err, LockError::Coordination(CoordError::NoNode { .. })));
        assert_eq!(lock.state(), LockState::Unused);
        assert!(lock.candidate().is_none());
    }

    #[tokio::test]
    async fn vanished_predecessor_triggers_reevaluation() {
        let conn = Scripted::new(vec![
            Reply::Created(Ok("/lock/write-0000000002".into())),
            children(&["read-0000000001", "write-0000000002"]),
            Reply::Watch(None),
            children(&["write-0000000002"]),
        ]);
        let mut lock = lock_on(&conn);

        lock.lock().await.unwrap();
        assert_eq!(lock.state(), LockState::HeldWrite);
        assert_eq!(conn.calls()[2], "watch /lock/read-0000000001");
    }

    #[tokio::test]
    async fn disconnect_wakeup_reevaluates() {
        let conn = Scripted::new(vec![
            Reply::Created(Ok("/lock/read-0000000005".into())),
            children(&["write-0000000004", "read-0000000005"]),
            Reply::Watch(Some(WatchEvent::Disconnected)),
            children(&["write-0000000004", "read-0000000005"]),
            Reply::Watch(Some(WatchEvent::NodeDeleted)),
            children(&["read-0000000005"]),
        ]);
        let mut lock = lock_on(&conn);

        lock.rlock().await.unwrap();
        assert_eq!(lock.state(), LockState::HeldRead);
    }

    #[tokio::test]
    async fn session_expiry_during_wait_is_fatal() {
        let conn = Scripted::new(vec![
            Reply::Created(Ok("/lock/write-0000000001".into())),
            children(&["write-0000000000", "write-0000000001"]),
            Reply::Watch(Some(WatchEvent::SessionExpired)),
            Reply::Deleted(Err(CoordError::SessionExpired)),
        ]);
        let mut lock = lock_on(&conn);

        assert!(matches!(lock.lock().await, Err(LockError::SessionExpired)));
        assert_eq!(lock.state(), LockState::Released);
        assert!(matches!(lock.unlock().await, Err(LockError::NotLocked)));
    }

    #[tokio::test]
    async fn session_expiry_seen_by_list_is_fatal() {
        let conn = Scripted::new(vec![
            Reply::Created(Ok("/lock/read-0000000002".into())),
            children(&["write-0000000001", "read-0000000002"]),
            Reply::Watch(Some(WatchEvent::NodeDeleted)),
            Reply::Children(Err(CoordError::SessionExpired)),
            Reply::Deleted(Err(CoordError::SessionExpired)),
        ]);
        let mut lock = lock_on(&conn);

        assert!(matches!(lock.rlock().await, Err(LockError::SessionExpired)));
        assert_eq!(lock.state(), LockState::Released);
    }

    #[tokio::test]
    async fn unparseable_candidate_is_removed() {
        let conn = Scripted::new(vec![
            Reply::Created(Ok("/lock/write-xyz".into())),
            Reply::Deleted(Err(CoordError::ConnectionLoss)),
        ]);
        let mut lock = lock_on(&conn);

        let err = lock.lock().await.unwrap_err();
        assert!(matches!(err, LockError::Coordination(CoordError::Backend { .. })));
        assert_eq!(conn.calls(), ["create /lock/write-", "delete /lock/write-xyz"]);
        assert_eq!(lock.state(), LockState::Unused);
        assert!(lock.candidate().is_none());
    }

    #[tokio::test]
    async fn root_lock_path_is_not_doubled() {
        let conn = Scripted::new(vec![
            Reply::Created(Ok("/write-0000000001".into())),
            children(&["read-0000000000", "write-0000000001"]),
            Reply::Watch(Some(WatchEvent::NodeDeleted)),
            children(&["write-0000000001"]),
        ]);
        let mut lock = ZkRwLock::new(Arc::clone(&conn), "/", Acl::world(Perms::ALL));

        lock.lock().await.unwrap();
        assert_eq!(conn.calls()[0], "create /write-");
        assert_eq!(conn.calls()[2], "watch /read-0000000000");
    }

    #[tokio::test]
    async fn list_failure_removes_candidate() {
        let conn = Scripted::new(vec![
            Reply::Created(Ok("/lock/read-0000000000".into())),
            Reply::Children(Err(CoordError::ConnectionLoss)),
            Reply::Deleted(Ok(())),
        ]);
        let mut lock = lock_on(&conn);

        let err = lock.rlock().await.unwrap_err();
        assert!(matches!(err, LockError::Coordination(CoordError::ConnectionLoss)));
        assert_eq!(conn.calls().last().unwrap(), "delete /lock/read-0000000000");
        assert_eq!(lock.state(), LockState::Released);
    }

    #[tokio::test]
    async fn lost_candidate_is_reported() {
        let conn = Scripted::new(vec![
            Reply::Created(Ok("/lock/write-0000000003".into())),
            children(&["write-0000000001"]),
            Reply::Deleted(Err(CoordError::NoNode { path: "/lock/write-0000000003".into() })),
        ]);
        let mut lock = lock_on(&conn);

        let err = lock.lock().await.unwrap_err();
        assert!(matches!(err, LockError::CandidateLost { ref path } if path == "/lock/write-0000000003"));
    }

    #[tokio::test]
    async fn unlock_mode_must_match() {
        let conn = Scripted::new(vec![
            Reply::Created(Ok("/lock/write-0000000000".into())),
            children(&["write-0000000000"]),
            Reply::Deleted(Ok(())),
        ]);
        let mut lock = lock_on(&conn);

        lock.lock().await.unwrap();
        assert!(matches!(lock.runlock().await, Err(LockError::NotLocked)));
        lock.unlock().await.unwrap();
        assert_eq!(lock.state(), LockState::Released);
        assert!(matches!(lock.unlock().await, Err(LockError::NotLocked)));
    }

    #[tokio::test]
    async fn externally_deleted_candidate_still_unlocks() {
        let conn = Scripted::new(vec![
            Reply::Created(Ok("/lock/read-0000000000".into())),
            children(&["read-0000000000"]),
            Reply::Deleted(Err(CoordError::NoNode { path: "/lock/read-0000000000".into() })),
        ]);
        let mut lock = lock_on(&conn);

        lock.rlock().await.unwrap();
        lock.runlock().await.unwrap();
        assert_eq!(lock.state(), LockState::Released);
    }

    #[tokio::test]
    async fn failed_delete_keeps_lock_held() {
        let conn = Scripted::new(vec![
            Reply::Created(Ok("/lock/write-0000000000".into())),
            children(&["write-0000000000"]),
            Reply::Deleted(Err(CoordError::ConnectionLoss)),
            Reply::Deleted(Ok(())),
        ]);
        let mut lock = lock_on(&conn);

        lock.lock().await.unwrap();
        assert!(lock.unlock().await.is_err());
        assert_eq!(lock.state(), LockState::HeldWrite);
        lock.unlock().await.unwrap();
        assert_eq!(lock.state(), LockState::Released);
    }

    #[tokio::test]
    async fn candidates_use_configured_prefixes() {
        let conn = Scripted::new(vec![
            Reply::Created(Ok("/lock/write-0000000000".into())),
            children(&["write-0000000000"]),
        ]);
        let mut lock = lock_on(&conn);

        lock.lock().await.unwrap();
        assert_eq!(conn.calls()[0], "create /lock/write-");
        assert_eq!(lock.candidate(), Some("/lock/write-0000000000"));
    }
}
