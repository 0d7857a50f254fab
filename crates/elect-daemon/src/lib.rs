//! elect-daemon library: Supervision around the election strategies.
//!
//! Exposes the retry policy, settings, and candidate supervisor so the
//! binary and integration tests share them.

pub mod backoff;
pub mod candidate;
pub mod settings;

pub use backoff::{RetryConfig, calculate_backoff};
pub use candidate::{
    Candidate, CandidateError, Connector, Leadership, StrategyFactory, strategy_factory,
};
pub use settings::{DaemonSettings, RetrySettings, SettingsOverrides, StrategyKind};
