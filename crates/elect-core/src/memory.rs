//! In-memory coordination service for testing and simulation.
//!
//! Models the parts of a ZooKeeper-like ensemble the strategies rely on:
//! - Persistent and ephemeral-sequential nodes
//! - Per-parent, zero-padded, strictly increasing sequence numbers
//! - One-shot existence watches, delivered at most once
//! - Sessions whose end removes their ephemeral nodes
//!
//! `InMemoryCoordinator` is the shared service; each `InMemorySession`
//! is one client session implementing `CoordinationClient`.

use crate::client::{
    ClientError, CoordinationClient, CreateMode, EventKind, NodeStat, Result, Watch, WatchedEvent,
};
use crate::ordering::format_member;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionStatus {
    Connected,
    Disconnected,
    Closed,
}

#[derive(Debug)]
struct Node {
    data: Vec<u8>,
    ephemeral_owner: Option<u64>,
    created_order: u64,
    version: u32,
    /// Next sequence number handed to a sequential child
    child_sequence: u64,
}

#[derive(Debug)]
struct ArmedWatch {
    session: u64,
    watch: Watch,
}

#[derive(Debug)]
struct ServiceState {
    nodes: BTreeMap<String, Node>,
    watches: HashMap<String, Vec<ArmedWatch>>,
    sessions: HashMap<u64, SessionStatus>,
    next_session: u64,
    next_order: u64,
}

impl ServiceState {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_string(),
            Node {
                data: Vec::new(),
                ephemeral_owner: None,
                created_order: 0,
                version: 0,
                child_sequence: 0,
            },
        );
        Self {
            nodes,
            watches: HashMap::new(),
            sessions: HashMap::new(),
            next_session: 1,
            next_order: 1,
        }
    }

    fn status(&self, session: u64) -> SessionStatus {
        self.sessions
            .get(&session)
            .copied()
            .unwrap_or(SessionStatus::Closed)
    }

    fn ensure_connected(&self, session: u64) -> Result<()> {
        match self.status(session) {
            SessionStatus::Connected => Ok(()),
            SessionStatus::Disconnected => Err(ClientError::ConnectionLoss),
            SessionStatus::Closed => Err(ClientError::SessionExpired),
        }
    }

    fn children(&self, path: &str) -> Vec<String> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{path}/")
        };
        self.nodes
            .keys()
            .filter_map(|key| key.strip_prefix(&prefix))
            .filter(|rest| !rest.is_empty() && !rest.contains('/'))
            .map(str::to_string)
            .collect()
    }

    fn stat(&self, path: &str) -> Option<NodeStat> {
        self.nodes.get(path).map(|node| NodeStat {
            created_order: node.created_order,
            version: node.version,
            ephemeral_owner: node.ephemeral_owner,
            data_length: node.data.len(),
            num_children: self.children(path).len(),
        })
    }

    /// Forget watches whose receiver is gone, on every path.
    ///
    /// A watch on a missing node stays armed until the node is created, so
    /// without this a failed arm would linger after its strategy is dropped.
    fn prune_closed_watches(&mut self) {
        self.watches.retain(|_, armed| {
            armed.retain(|w| !w.watch.is_closed());
            !armed.is_empty()
        });
    }

    /// Fire and disarm every watch on `path`. Returns how many were delivered.
    fn fire(&mut self, path: &str, kind: EventKind) -> usize {
        self.prune_closed_watches();
        let Some(armed) = self.watches.remove(path) else {
            return 0;
        };
        let mut delivered = 0;
        for ArmedWatch { session, watch } in armed {
            if self.status(session) == SessionStatus::Closed {
                continue;
            }
            if watch.deliver(WatchedEvent::new(kind, path)) {
                delivered += 1;
            }
        }
        debug!("Fired {:?} on {} to {} watcher(s)", kind, path, delivered);
        delivered
    }

    fn remove_node(&mut self, path: &str) -> Result<()> {
        if !self.nodes.contains_key(path) {
            return Err(ClientError::NoNode(path.to_string()));
        }
        if !self.children(path).is_empty() {
            return Err(ClientError::Other(format!("Node not empty: {path}")));
        }
        self.nodes.remove(path);
        self.fire(path, EventKind::NodeDeleted);
        Ok(())
    }

    fn end_session(&mut self, session: u64) {
        if self.status(session) == SessionStatus::Closed {
            return;
        }
        self.sessions.insert(session, SessionStatus::Closed);

        // The session's own pending watches get a final expiry notice.
        let mut expired = Vec::new();
        for (path, armed) in self.watches.iter_mut() {
            let (mine, others): (Vec<_>, Vec<_>) =
                armed.drain(..).partition(|w| w.session == session);
            *armed = others;
            expired.extend(mine.into_iter().map(|w| (path.clone(), w.watch)));
        }
        self.watches.retain(|_, armed| !armed.is_empty());
        for (path, watch) in expired {
            watch.deliver(WatchedEvent::new(EventKind::SessionExpired, path));
        }

        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.ephemeral_owner == Some(session))
            .map(|(path, _)| path.clone())
            .collect();
        for path in owned {
            // Ephemeral nodes never have children, so removal cannot fail.
            let _ = self.remove_node(&path);
        }
        debug!("Session {} closed", session);
    }
}

fn parent_path(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) if trimmed.len() > 1 => Some("/"),
        Some(0) | None => None,
        Some(pos) => Some(&trimmed[..pos]),
    }
}

/// Shared in-memory coordination service.
///
/// Cloning yields another handle to the same service.
#[derive(Clone)]
pub struct InMemoryCoordinator {
    state: Arc<Mutex<ServiceState>>,
}

impl InMemoryCoordinator {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ServiceState::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open a new connected session.
    pub fn connect(&self) -> Arc<InMemorySession> {
        let mut state = self.lock();
        let id = state.next_session;
        state.next_session += 1;
        state.sessions.insert(id, SessionStatus::Connected);
        debug!("Session {} connected", id);
        Arc::new(InMemorySession {
            id,
            state: Arc::clone(&self.state),
        })
    }

    /// Names of the direct children of `path` (empty if it does not exist).
    pub fn children(&self, path: &str) -> Vec<String> {
        self.lock().children(path)
    }

    /// Payload of `path`, if it exists.
    pub fn data(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().nodes.get(path).map(|node| node.data.clone())
    }

    pub fn node_exists(&self, path: &str) -> bool {
        self.lock().nodes.contains_key(path)
    }

    /// Number of armed, not yet fired watches on `path`.
    pub fn pending_watches(&self, path: &str) -> usize {
        self.lock().watches.get(path).map_or(0, Vec::len)
    }

    /// Deliver a synthetic event to every watcher of `path`, disarming them.
    pub fn fire(&self, path: &str, kind: EventKind) -> usize {
        self.lock().fire(path, kind)
    }
}

impl Default for InMemoryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// One client session against an `InMemoryCoordinator`.
///
/// Dropping the session ends it, like a client whose session times out.
pub struct InMemorySession {
    id: u64,
    state: Arc<Mutex<ServiceState>>,
}

impl InMemorySession {
    fn lock(&self) -> MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn session_id(&self) -> u64 {
        self.id
    }

    /// End the session, as on explicit close or session timeout.
    ///
    /// The session's own pending watches receive `SessionExpired`; its
    /// ephemeral nodes are removed and their watchers notified.
    pub fn close(&self) {
        self.lock().end_session(self.id);
    }

    /// Simulate losing the connection without losing the session.
    /// Ephemeral nodes survive; calls fail with `ConnectionLoss`.
    pub fn disconnect(&self) {
        let mut state = self.lock();
        if state.status(self.id) == SessionStatus::Connected {
            state.sessions.insert(self.id, SessionStatus::Disconnected);
        }
    }

    /// Restore a disconnected session. Returns false if it has ended.
    pub fn reconnect(&self) -> bool {
        let mut state = self.lock();
        match state.status(self.id) {
            SessionStatus::Closed => false,
            _ => {
                state.sessions.insert(self.id, SessionStatus::Connected);
                true
            }
        }
    }

    /// Delete a childless node, notifying its watchers.
    pub fn delete(&self, path: &str) -> Result<()> {
        let mut state = self.lock();
        state.ensure_connected(self.id)?;
        state.remove_node(path)
    }

    /// Replace a node's payload, notifying its watchers.
    pub fn set_data(&self, path: &str, data: &[u8]) -> Result<NodeStat> {
        let mut state = self.lock();
        state.ensure_connected(self.id)?;
        let node = state
            .nodes
            .get_mut(path)
            .ok_or_else(|| ClientError::NoNode(path.to_string()))?;
        node.data = data.to_vec();
        node.version += 1;
        state.fire(path, EventKind::NodeDataChanged);
        state
            .stat(path)
            .ok_or_else(|| ClientError::NoNode(path.to_string()))
    }
}

impl Drop for InMemorySession {
    fn drop(&mut self) {
        self.lock().end_session(self.id);
    }
}

#[async_trait]
impl CoordinationClient for InMemorySession {
    fn is_connected(&self) -> bool {
        self.lock().status(self.id) == SessionStatus::Connected
    }

    async fn exists(&self, path: &str, watch: Option<Watch>) -> Result<Option<NodeStat>> {
        let mut state = self.lock();
        state.ensure_connected(self.id)?;
        if let Some(watch) = watch {
            state.prune_closed_watches();
            state.watches.entry(path.to_string()).or_default().push(ArmedWatch {
                session: self.id,
                watch,
            });
        }
        Ok(state.stat(path))
    }

    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<String> {
        let mut state = self.lock();
        state.ensure_connected(self.id)?;

        let parent = parent_path(path).ok_or_else(|| ClientError::NodeExists(path.to_string()))?;
        let order = state.next_order;
        let parent_node = state
            .nodes
            .get_mut(parent)
            .ok_or_else(|| ClientError::NoNode(parent.to_string()))?;
        if parent_node.ephemeral_owner.is_some() {
            return Err(ClientError::NoChildrenForEphemerals(parent.to_string()));
        }

        let (actual, owner) = match mode {
            CreateMode::Persistent => (path.to_string(), None),
            CreateMode::EphemeralSequential => {
                let sequence = parent_node.child_sequence;
                parent_node.child_sequence += 1;
                (format_member(path, sequence), Some(self.id))
            }
        };
        if state.nodes.contains_key(&actual) {
            return Err(ClientError::NodeExists(actual));
        }

        state.next_order += 1;
        state.nodes.insert(
            actual.clone(),
            Node {
                data: data.to_vec(),
                ephemeral_owner: owner,
                created_order: order,
                version: 0,
                child_sequence: 0,
            },
        );
        state.fire(&actual, EventKind::NodeCreated);
        Ok(actual)
    }

    async fn get_children(&self, path: &str) -> Result<Vec<String>> {
        let state = self.lock();
        state.ensure_connected(self.id)?;
        if !state.nodes.contains_key(path) {
            return Err(ClientError::NoNode(path.to_string()));
        }
        Ok(state.children(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use futures::StreamExt;

    fn watch() -> (Watch, mpsc::UnboundedReceiver<WatchedEvent>) {
        let (tx, rx) = mpsc::unbounded();
        (Watch::new(tx), rx)
    }

    #[test]
    fn test_parent_path() {
        assert_eq!(parent_path("/elect"), Some("/"));
        assert_eq!(parent_path("/elect/naive_"), Some("/elect"));
        assert_eq!(parent_path("/"), None);
        assert_eq!(parent_path("elect"), None);
    }

    // ==================== Node CRUD ====================

    #[tokio::test]
    async fn test_create_persistent_and_children() {
        let service = InMemoryCoordinator::new();
        let session = service.connect();

        let path = session
            .create("/elect", &[], CreateMode::Persistent)
            .await
            .unwrap();
        assert_eq!(path, "/elect");
        assert!(session.exists("/elect", None).await.unwrap().is_some());
        assert!(session.get_children("/elect").await.unwrap().is_empty());
        assert_eq!(service.children("/"), vec!["elect".to_string()]);
    }

    #[tokio::test]
    async fn test_create_existing_fails() {
        let service = InMemoryCoordinator::new();
        let session = service.connect();
        session.create("/elect", &[], CreateMode::Persistent).await.unwrap();

        let err = session
            .create("/elect", &[], CreateMode::Persistent)
            .await
            .unwrap_err();
        assert_eq!(err, ClientError::NodeExists("/elect".into()));
    }

    #[tokio::test]
    async fn test_create_without_parent_fails() {
        let service = InMemoryCoordinator::new();
        let session = service.connect();

        let err = session
            .create("/elect/naive_", &[], CreateMode::EphemeralSequential)
            .await
            .unwrap_err();
        assert_eq!(err, ClientError::NoNode("/elect".into()));
    }

    #[tokio::test]
    async fn test_sequential_names_are_padded_and_increasing() {
        let service = InMemoryCoordinator::new();
        let session = service.connect();
        session.create("/elect", &[], CreateMode::Persistent).await.unwrap();

        let first = session
            .create("/elect/naive_", b"a", CreateMode::EphemeralSequential)
            .await
            .unwrap();
        let second = session
            .create("/elect/ctf_", b"b", CreateMode::EphemeralSequential)
            .await
            .unwrap();

        assert_eq!(first, "/elect/naive_0000000000");
        // The counter belongs to the parent, shared across prefixes.
        assert_eq!(second, "/elect/ctf_0000000001");
        assert_eq!(service.data(&first), Some(b"a".to_vec()));

        let stat = session.exists(&first, None).await.unwrap().unwrap();
        assert_eq!(stat.ephemeral_owner, Some(session.session_id()));
        assert_eq!(stat.data_length, 1);
    }

    #[tokio::test]
    async fn test_ephemeral_nodes_cannot_have_children() {
        let service = InMemoryCoordinator::new();
        let session = service.connect();
        session.create("/elect", &[], CreateMode::Persistent).await.unwrap();
        let member = session
            .create("/elect/naive_", &[], CreateMode::EphemeralSequential)
            .await
            .unwrap();

        let err = session
            .create(&format!("{member}/child"), &[], CreateMode::Persistent)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NoChildrenForEphemerals(_)));
    }

    // ==================== Watches ====================

    #[tokio::test]
    async fn test_watch_fires_once_on_delete() {
        let service = InMemoryCoordinator::new();
        let owner = service.connect();
        let watcher = service.connect();
        owner.create("/elect", &[], CreateMode::Persistent).await.unwrap();
        let member = owner
            .create("/elect/naive_", &[], CreateMode::EphemeralSequential)
            .await
            .unwrap();

        let (w, mut rx) = watch();
        assert!(watcher.exists(&member, Some(w)).await.unwrap().is_some());
        assert_eq!(service.pending_watches(&member), 1);

        owner.delete(&member).unwrap();
        let event = rx.next().await.unwrap();
        assert_eq!(event, WatchedEvent::new(EventKind::NodeDeleted, member.clone()));
        assert_eq!(service.pending_watches(&member), 0);
        assert!(rx.next().await.is_none());
    }

    #[tokio::test]
    async fn test_watch_fires_on_data_change() {
        let service = InMemoryCoordinator::new();
        let session = service.connect();
        session.create("/elect", &[], CreateMode::Persistent).await.unwrap();

        let (w, mut rx) = watch();
        session.exists("/elect", Some(w)).await.unwrap();
        let stat = session.set_data("/elect", b"x").unwrap();
        assert_eq!(stat.version, 1);

        let event = rx.next().await.unwrap();
        assert_eq!(event.kind, EventKind::NodeDataChanged);
    }

    #[tokio::test]
    async fn test_watch_on_missing_node_fires_on_create() {
        let service = InMemoryCoordinator::new();
        let session = service.connect();

        let (w, mut rx) = watch();
        assert!(session.exists("/elect", Some(w)).await.unwrap().is_none());
        session.create("/elect", &[], CreateMode::Persistent).await.unwrap();

        assert_eq!(rx.next().await.unwrap().kind, EventKind::NodeCreated);
    }

    #[tokio::test]
    async fn test_abandoned_watches_pruned_on_any_path() {
        let service = InMemoryCoordinator::new();
        let session = service.connect();
        let (abandoned, rx) = watch();
        let (kept, _kept_rx) = watch();
        session.exists("/ghost", Some(abandoned)).await.unwrap();
        session.exists("/phantom", Some(kept)).await.unwrap();
        drop(rx);
        assert_eq!(service.pending_watches("/ghost"), 1);

        // Arming elsewhere sweeps the dead registration.
        let (other, _other_rx) = watch();
        session.exists("/elsewhere", Some(other)).await.unwrap();
        assert_eq!(service.pending_watches("/ghost"), 0);
        assert_eq!(service.pending_watches("/phantom"), 1);

        // So does firing an unrelated path.
        let (late, late_rx) = watch();
        session.exists("/ghost", Some(late)).await.unwrap();
        drop(late_rx);
        session.create("/unrelated", &[], CreateMode::Persistent).await.unwrap();
        assert_eq!(service.pending_watches("/ghost"), 0);
        assert_eq!(service.pending_watches("/phantom"), 1);
    }

    // ==================== Sessions ====================

    #[tokio::test]
    async fn test_close_removes_ephemerals_and_notifies() {
        let service = InMemoryCoordinator::new();
        let owner = service.connect();
        let watcher = service.connect();
        owner.create("/elect", &[], CreateMode::Persistent).await.unwrap();
        let member = owner
            .create("/elect/naive_", &[], CreateMode::EphemeralSequential)
            .await
            .unwrap();

        let (w, mut rx) = watch();
        watcher.exists(&member, Some(w)).await.unwrap();

        owner.close();
        assert!(!owner.is_connected());
        assert!(!service.node_exists(&member));
        assert!(service.node_exists("/elect"));
        assert_eq!(rx.next().await.unwrap().kind, EventKind::NodeDeleted);

        let err = owner.get_children("/elect").await.unwrap_err();
        assert_eq!(err, ClientError::SessionExpired);
    }

    #[tokio::test]
    async fn test_drop_ends_session() {
        let service = InMemoryCoordinator::new();
        let setup = service.connect();
        setup.create("/elect", &[], CreateMode::Persistent).await.unwrap();

        let session = service.connect();
        let member = session
            .create("/elect/naive_", &[], CreateMode::EphemeralSequential)
            .await
            .unwrap();
        drop(session);

        assert!(!service.node_exists(&member));
    }

    #[tokio::test]
    async fn test_disconnect_keeps_ephemerals() {
        let service = InMemoryCoordinator::new();
        let session = service.connect();
        session.create("/elect", &[], CreateMode::Persistent).await.unwrap();
        let member = session
            .create("/elect/naive_", &[], CreateMode::EphemeralSequential)
            .await
            .unwrap();

        session.disconnect();
        assert!(!session.is_connected());
        assert!(service.node_exists(&member));
        assert_eq!(
            session.exists("/elect", None).await.unwrap_err(),
            ClientError::ConnectionLoss
        );

        assert!(session.reconnect());
        assert!(session.is_connected());
        assert_eq!(session.get_children("/elect").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_closed_session_cannot_reconnect() {
        let service = InMemoryCoordinator::new();
        let session = service.connect();
        session.close();
        assert!(!session.reconnect());
    }

    #[tokio::test]
    async fn test_close_notifies_own_watches() {
        let service = InMemoryCoordinator::new();
        let session = service.connect();
        session.create("/elect", &[], CreateMode::Persistent).await.unwrap();

        let (w, mut rx) = watch();
        session.exists("/elect", Some(w)).await.unwrap();
        session.close();

        assert_eq!(rx.next().await.unwrap().kind, EventKind::SessionExpired);
        assert!(!session.is_connected());
        assert_eq!(service.pending_watches("/elect"), 0);
    }

    #[tokio::test]
    async fn test_synthetic_fire() {
        let service = InMemoryCoordinator::new();
        let session = service.connect();

        let (w, mut rx) = watch();
        session.exists("/elect/x_1", Some(w)).await.unwrap();
        assert_eq!(service.fire("/elect/x_1", EventKind::NodeDeleted), 1);
        assert_eq!(rx.next().await.unwrap().path, "/elect/x_1");
        assert_eq!(service.fire("/elect/x_1", EventKind::NodeDeleted), 0);
    }
}
