//! In-memory coordination ensemble.
//!
//! A single shared znode tree with sessions, ephemeral sequential nodes,
//! one-shot deletion watches and parent-ACL checks. Enough of ZooKeeper to
//! run the lock protocol end to end inside one process.
//!
//! # Fault injection
//!
//! - [`MemorySession::expire`]: session death; ephemerals vanish, the
//!   session's own watches fire `SessionExpired`
//! - [`MemorySession::disconnect`]: connection blip; the session's watches
//!   fire `Disconnected`, the session survives
//! - [`MemorySession::fail_next`]: queue a one-shot error for the next call
//!   of one primitive

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use tokio::sync::oneshot;
use zklock_core::{Acl, CoordError, Coordinator, Perms, Watch, WatchEvent};

/// Session identifier, unique per ensemble.
pub type SessionId = u64;

/// Coordination primitive, used to target injected faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// `create_sequential_ephemeral`
    Create,
    /// `children`
    Children,
    /// `watch_delete`
    Watch,
    /// `delete`
    Delete,
}

#[derive(Debug)]
struct Znode {
    data: Vec<u8>,
    acl: Vec<Acl>,
    ephemeral_owner: Option<SessionId>,
    next_seq: u64,
}

impl Znode {
    fn new(data: Vec<u8>, acl: Vec<Acl>, ephemeral_owner: Option<SessionId>) -> Self {
        Self { data, acl, ephemeral_owner, next_seq: 0 }
    }

    fn permits(&self, identities: &[(String, String)], perm: Perms) -> bool {
        self.acl.iter().any(|entry| {
            entry.perms.contains(perm) && identities.iter().any(|(s, id)| entry.matches(s, id))
        })
    }
}

#[derive(Debug)]
struct Watcher {
    session: SessionId,
    tx: oneshot::Sender<WatchEvent>,
}

#[derive(Debug)]
struct SessionState {
    identities: Vec<(String, String)>,
    expired: bool,
    faults: HashMap<Op, VecDeque<CoordError>>,
    ops: u64,
}

impl SessionState {
    fn new() -> Self {
        Self {
            identities: vec![("world".to_string(), "anyone".to_string())],
            expired: false,
            faults: HashMap::new(),
            ops: 0,
        }
    }
}

#[derive(Debug)]
struct Tree {
    nodes: BTreeMap<String, Znode>,
    watches: HashMap<String, Vec<Watcher>>,
    sessions: HashMap<SessionId, SessionState>,
    next_session: SessionId,
    watches_fired: u64,
}

impl Tree {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Znode::new(Vec::new(), Acl::world(Perms::ALL), None));
        Self {
            nodes,
            watches: HashMap::new(),
            sessions: HashMap::new(),
            next_session: 1,
            watches_fired: 0,
        }
    }

    /// Account for one call and apply expiry and injected faults.
    fn begin(&mut self, session: SessionId, op: Op) -> Result<&SessionState, CoordError> {
        let state = self.sessions.get_mut(&session).ok_or(CoordError::SessionExpired)?;
        state.ops += 1;
        if state.expired {
            return Err(CoordError::SessionExpired);
        }
        if let Some(err) = state.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            tracing::debug!(session, ?op, %err, "injected fault");
            return Err(err);
        }
        Ok(state)
    }

    fn child_names(&self, path: &str) -> Vec<String> {
        let base = if path == "/" { String::from("/") } else { format!("{path}/") };
        self.nodes
            .range(base.clone()..)
            .take_while(|(key, _)| key.starts_with(&base))
            .filter_map(|(key, _)| {
                let rest = &key[base.len()..];
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
            })
            .collect()
    }

    fn fire(&mut self, path: &str, event: WatchEvent) {
        for watcher in self.watches.remove(path).unwrap_or_default() {
            if watcher.tx.send(event).is_ok() {
                self.watches_fired += 1;
            }
        }
    }

    /// Fire and drop every watch registered by `session`.
    fn fire_session(&mut self, session: SessionId, event: WatchEvent) {
        let mut fired = 0;
        for watchers in self.watches.values_mut() {
            let (own, others): (Vec<_>, Vec<_>) =
                watchers.drain(..).partition(|watcher| watcher.session == session);
            *watchers = others;
            for watcher in own {
                if watcher.tx.send(event).is_ok() {
                    fired += 1;
                }
            }
        }
        self.watches.retain(|_, watchers| !watchers.is_empty());
        self.watches_fired += fired;
    }

    fn remove_node(&mut self, path: &str) {
        if self.nodes.remove(path).is_some() {
            self.fire(path, WatchEvent::NodeDeleted);
        }
    }
}

fn parent_of(path: &str) -> Option<&str> {
    match path.rsplit_once('/') {
        Some(("", _)) if path != "/" => Some("/"),
        Some((parent, _)) if !parent.is_empty() => Some(parent),
        _ => None,
    }
}

fn exists_error(path: &str) -> CoordError {
    CoordError::Backend { reason: format!("node exists: {path}") }
}

/// Shared in-memory znode tree.
///
/// Cloning yields another handle to the same tree.
#[derive(Debug, Clone)]
pub struct MemoryEnsemble {
    inner: Arc<Mutex<Tree>>,
}

impl Default for MemoryEnsemble {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEnsemble {
    /// Empty tree containing only `/`.
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(Tree::new())) }
    }

    fn tree(&self) -> MutexGuard<'_, Tree> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a new session.
    pub fn connect(&self) -> Arc<MemorySession> {
        let mut tree = self.tree();
        let id = tree.next_session;
        tree.next_session += 1;
        tree.sessions.insert(id, SessionState::new());
        tracing::debug!(session = id, "session opened");
        Arc::new(MemorySession { id, ensemble: self.clone() })
    }

    /// Create a persistent node. The parent must exist.
    pub fn create_persistent(&self, path: &str, data: &[u8], acl: Vec<Acl>) -> Result<(), CoordError> {
        let mut tree = self.tree();
        let parent = parent_of(path).ok_or_else(|| exists_error(path))?;
        if !tree.nodes.contains_key(parent) {
            return Err(CoordError::NoNode { path: parent.to_string() });
        }
        if tree.nodes.contains_key(path) {
            return Err(exists_error(path));
        }
        tree.nodes.insert(path.to_string(), Znode::new(data.to_vec(), acl, None));
        Ok(())
    }

    /// Create `path` and any missing ancestors as world-accessible
    /// persistent nodes. Existing nodes are left alone.
    pub fn ensure_path(&self, path: &str) -> Result<(), CoordError> {
        if !path.starts_with('/') {
            return Err(CoordError::Backend { reason: format!("relative path: {path}") });
        }
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            match self.create_persistent(&current, &[], Acl::world(Perms::ALL)) {
                Ok(()) => {},
                Err(CoordError::Backend { .. }) if self.exists(&current) => {},
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// True if a node exists at `path`.
    pub fn exists(&self, path: &str) -> bool {
        self.tree().nodes.contains_key(path)
    }

    /// Payload of the node at `path`.
    pub fn data(&self, path: &str) -> Option<Vec<u8>> {
        self.tree().nodes.get(path).map(|node| node.data.clone())
    }

    /// Session owning the ephemeral node at `path`.
    pub fn ephemeral_owner(&self, path: &str) -> Option<SessionId> {
        self.tree().nodes.get(path).and_then(|node| node.ephemeral_owner)
    }

    /// Sorted child names of `path`, bypassing ACLs. Empty if missing.
    pub fn children(&self, path: &str) -> Vec<String> {
        self.tree().child_names(path)
    }

    /// Number of children of `path`.
    pub fn child_count(&self, path: &str) -> usize {
        self.children(path).len()
    }

    /// Watches currently registered on `path`.
    pub fn pending_watches(&self, path: &str) -> usize {
        self.tree().watches.get(path).map_or(0, Vec::len)
    }

    /// Watch notifications delivered since the ensemble was created.
    pub fn watches_fired(&self) -> u64 {
        self.tree().watches_fired
    }
}

/// Session on a [`MemoryEnsemble`]; implements [`Coordinator`].
#[derive(Debug)]
pub struct MemorySession {
    id: SessionId,
    ensemble: MemoryEnsemble,
}

impl MemorySession {
    /// Session identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Add an authenticated identity, e.g. `("digest", "alice:hash")`.
    pub fn add_auth(&self, scheme: &str, id: &str) {
        if let Some(state) = self.ensemble.tree().sessions.get_mut(&self.id) {
            state.identities.push((scheme.to_string(), id.to_string()));
        }
    }

    /// Queue `err` as the answer to the next `op` call.
    pub fn fail_next(&self, op: Op, err: CoordError) {
        if let Some(state) = self.ensemble.tree().sessions.get_mut(&self.id) {
            state.faults.entry(op).or_default().push_back(err);
        }
    }

    /// Primitive calls issued so far, including rejected ones.
    pub fn op_count(&self) -> u64 {
        self.ensemble.tree().sessions.get(&self.id).map_or(0, |state| state.ops)
    }

    /// True once the session expired.
    pub fn is_expired(&self) -> bool {
        self.ensemble.tree().sessions.get(&self.id).is_none_or(|state| state.expired)
    }

    /// Expire the session.
    ///
    /// The session's watches fire `SessionExpired`, its ephemeral nodes are
    /// deleted (firing `NodeDeleted` for their watchers), and every later
    /// call fails with `SessionExpired`.
    pub fn expire(&self) {
        let mut tree = self.ensemble.tree();
        match tree.sessions.get_mut(&self.id) {
            Some(state) if !state.expired => state.expired = true,
            _ => return,
        }

        tree.fire_session(self.id, WatchEvent::SessionExpired);

        let owned: Vec<String> = tree
            .nodes
            .iter()
            .filter(|(_, node)| node.ephemeral_owner == Some(self.id))
            .map(|(path, _)| path.clone())
            .collect();
        for path in &owned {
            tree.remove_node(path);
        }
        tracing::debug!(session = self.id, ephemerals = owned.len(), "session expired");
    }

    /// Simulate a connection blip: the session's watches fire
    /// `Disconnected` and are dropped; the session stays valid.
    pub fn disconnect(&self) {
        self.ensemble.tree().fire_session(self.id, WatchEvent::Disconnected);
    }
}

#[async_trait]
impl Coordinator for MemorySession {
    async fn create_sequential_ephemeral(
        &self,
        prefix: &str,
        data: &[u8],
        acl: &[Acl],
    ) -> Result<String, CoordError> {
        let mut tree = self.ensemble.tree();
        let identities = tree.begin(self.id, Op::Create)?.identities.clone();

        let parent = parent_of(prefix).ok_or_else(|| CoordError::Backend {
            reason: format!("invalid path: {prefix}"),
        })?;
        let Some(parent_node) = tree.nodes.get_mut(parent) else {
            return Err(CoordError::NoNode { path: parent.to_string() });
        };
        if parent_node.ephemeral_owner.is_some() {
            return Err(CoordError::Backend { reason: format!("ephemerals cannot have children: {parent}") });
        }
        if !parent_node.permits(&identities, Perms::CREATE) {
            return Err(CoordError::NoAuth { path: parent.to_string() });
        }

        let seq = parent_node.next_seq;
        parent_node.next_seq += 1;
        let path = format!("{prefix}{seq:010}");
        tree.nodes.insert(path.clone(), Znode::new(data.to_vec(), acl.to_vec(), Some(self.id)));
        Ok(path)
    }

    async fn children(&self, path: &str) -> Result<Vec<String>, CoordError> {
        let mut tree = self.ensemble.tree();
        let identities = tree.begin(self.id, Op::Children)?.identities.clone();

        let node = tree.nodes.get(path).ok_or_else(|| CoordError::NoNode { path: path.to_string() })?;
        if !node.permits(&identities, Perms::READ) {
            return Err(CoordError::NoAuth { path: path.to_string() });
        }
        Ok(tree.child_names(path))
    }

    async fn watch_delete(&self, path: &str) -> Result<Option<Watch>, CoordError> {
        let mut tree = self.ensemble.tree();
        tree.begin(self.id, Op::Watch)?;

        if !tree.nodes.contains_key(path) {
            return Ok(None);
        }
        let (tx, watch) = Watch::channel();
        tree.watches.entry(path.to_string()).or_default().push(Watcher { session: self.id, tx });
        Ok(Some(watch))
    }

    async fn delete(&self, path: &str) -> Result<(), CoordError> {
        let mut tree = self.ensemble.tree();
        let identities = tree.begin(self.id, Op::Delete)?.identities.clone();

        if !tree.nodes.contains_key(path) {
            return Err(CoordError::NoNode { path: path.to_string() });
        }
        if !tree.child_names(path).is_empty() {
            return Err(CoordError::Backend { reason: format!("node not empty: {path}") });
        }
        let parent = parent_of(path).ok_or_else(|| CoordError::Backend {
            reason: format!("cannot delete root: {path}"),
        })?;
        if let Some(parent_node) = tree.nodes.get(parent) {
            if !parent_node.permits(&identities, Perms::DELETE) {
                return Err(CoordError::NoAuth { path: parent.to_string() });
            }
        }

        tree.remove_node(path);
        Ok(())
    }
}
