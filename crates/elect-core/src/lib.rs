//! elect-core: Leader election recipes over a ZooKeeper-like coordination service.
//!
//! This crate provides:
//! - The election state vocabulary and an atomic state cell
//! - Sequential member naming and ordering
//! - The `CoordinationClient` trait and an in-memory service
//! - Naive (watch the leader) and contention-free (watch the predecessor) strategies
//! - Election events for monitoring

pub mod candidate_id;
pub mod client;
pub mod config;
pub mod contention_free;
pub mod error;
pub mod events;
pub mod memory;
pub mod naive;
pub mod ordering;
pub mod state;
pub mod strategy;

pub use candidate_id::{CandidateId, CandidateIdError};
pub use client::{
    ClientError, CoordinationClient, CreateMode, EventKind, NodeStat, Watch, WatchedEvent,
};
pub use config::ElectionConfig;
pub use contention_free::ContentionFreeElection;
pub use error::{ElectionError, Result};
pub use events::{ElectionEvent, EventBus, Subscription};
pub use memory::{InMemoryCoordinator, InMemorySession};
pub use naive::NaiveElection;
pub use state::{ElectState, StateCell};
pub use strategy::{ElectionStrategy, fetch_candidates, fetch_election_state};
