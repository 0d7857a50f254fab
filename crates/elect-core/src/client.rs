//! CoordinationClient trait for the watch-capable coordination service.
//!
//! The election strategies consume only a small slice of the service:
//! node creation, existence checks with an optional one-shot watch,
//! children listings, and a connectivity predicate.
//!
//! Implementations:
//! - `InMemorySession` - For testing and simulation
//! - A ZooKeeper-style network client supplied by the caller

use async_trait::async_trait;
use futures::channel::mpsc::UnboundedSender;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("Connection lost")]
    ConnectionLoss,

    #[error("Session expired")]
    SessionExpired,

    #[error("Node not found: {0}")]
    NoNode(String),

    #[error("Node already exists: {0}")]
    NodeExists(String),

    #[error("Ephemeral nodes cannot have children: {0}")]
    NoChildrenForEphemerals(String),

    #[error("Coordination error: {0}")]
    Other(String),
}

impl ClientError {
    /// True when the session is unreachable or gone.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, ClientError::ConnectionLoss | ClientError::SessionExpired)
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// How a node is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// Survives the creating session.
    Persistent,
    /// Removed when the creating session ends; the service appends a
    /// zero-padded, strictly increasing sequence number to the name.
    EphemeralSequential,
}

/// Node metadata returned by `exists`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStat {
    /// Service-wide creation order of the node
    pub created_order: u64,
    /// Number of times the node's data changed
    pub version: u32,
    /// Owning session for ephemeral nodes, `None` for persistent ones
    pub ephemeral_owner: Option<u64>,
    /// Payload size in bytes
    pub data_length: usize,
    /// Number of direct children
    pub num_children: usize,
}

/// Kind of change reported by a fired watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    NodeCreated,
    NodeDeleted,
    NodeDataChanged,
    NodeChildrenChanged,
    /// The session that armed the watch expired before the watch fired.
    SessionExpired,
}

/// Notification delivered when an armed watch fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedEvent {
    pub kind: EventKind,
    /// Path the watch was armed on
    pub path: String,
}

impl WatchedEvent {
    pub fn new(kind: EventKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

/// A one-shot watch registration.
///
/// Delivering consumes the watch, so a watch fires at most once. The
/// receiving end is the single-consumer event queue of the strategy
/// instance that armed it.
#[derive(Debug)]
pub struct Watch {
    sender: UnboundedSender<WatchedEvent>,
}

impl Watch {
    pub fn new(sender: UnboundedSender<WatchedEvent>) -> Self {
        Self { sender }
    }

    /// Deliver the event. Returns false if the receiving queue is gone.
    pub fn deliver(self, event: WatchedEvent) -> bool {
        self.sender.unbounded_send(event).is_ok()
    }

    /// True if the receiving queue has been dropped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Client session to the coordination service.
///
/// Every method re-checks connectivity; callers must not cache
/// `is_connected`.
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// Whether the session is currently connected.
    fn is_connected(&self) -> bool;

    /// Check whether `path` exists, optionally arming a one-shot watch that
    /// fires on the node's creation, data change, or deletion.
    async fn exists(&self, path: &str, watch: Option<Watch>) -> Result<Option<NodeStat>>;

    /// Create a node. For `EphemeralSequential`, the returned path carries
    /// the sequence suffix the service appended.
    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<String>;

    /// Names (not full paths) of the direct children of `path`.
    async fn get_children(&self, path: &str) -> Result<Vec<String>>;
}
