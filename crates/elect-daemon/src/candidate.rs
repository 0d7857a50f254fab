//! Supervised election candidate.
//!
//! A `Candidate` keeps participating until it leads. Each attempt uses a
//! fresh strategy instance, since participation is one-off per instance.
//! Losing the election or the connection starts a fresh session after a
//! backoff, which also releases any member node left by the previous
//! attempt.

use crate::backoff::{RetryConfig, calculate_backoff};
use crate::settings::StrategyKind;
use async_trait::async_trait;
use elect_core::{
    CandidateId, ClientError, ContentionFreeElection, CoordinationClient, ElectState,
    ElectionConfig, ElectionError, ElectionStrategy, EventBus, InMemoryCoordinator,
    NaiveElection,
};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum CandidateError {
    #[error("Election failed: {0}")]
    Election(#[from] ElectionError),

    #[error("Failed to connect: {0}")]
    Connect(ClientError),

    #[error("Gave up after {0} attempts")]
    ExhaustedAttempts(u32),
}

pub type Result<T> = std::result::Result<T, CandidateError>;

/// Source of fresh coordination sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> std::result::Result<Arc<dyn CoordinationClient>, ClientError>;
}

#[async_trait]
impl Connector for InMemoryCoordinator {
    async fn connect(&self) -> std::result::Result<Arc<dyn CoordinationClient>, ClientError> {
        let session: Arc<dyn CoordinationClient> = InMemoryCoordinator::connect(self);
        Ok(session)
    }
}

/// Builds a new strategy instance for each attempt.
pub type StrategyFactory = Box<dyn Fn() -> Box<dyn ElectionStrategy> + Send + Sync>;

/// Factory for the strategy named by `kind`, publishing to `events` if given.
pub fn strategy_factory(
    kind: StrategyKind,
    config: ElectionConfig,
    events: Option<Arc<EventBus>>,
) -> StrategyFactory {
    Box::new(move || -> Box<dyn ElectionStrategy> {
        match kind {
            StrategyKind::Naive => {
                let election = NaiveElection::with_config(config.clone());
                match &events {
                    Some(bus) => Box::new(election.with_event_bus(Arc::clone(bus))),
                    None => Box::new(election),
                }
            }
            StrategyKind::ContentionFree => {
                let election = ContentionFreeElection::with_config(config.clone());
                match &events {
                    Some(bus) => Box::new(election.with_event_bus(Arc::clone(bus))),
                    None => Box::new(election),
                }
            }
        }
    })
}

/// A won election.
///
/// Holds the only strong handle to the winning session. Dropping it (or
/// calling `resign`) ends the session, which removes the member node and
/// lets the next candidate take over.
pub struct Leadership {
    client: Arc<dyn CoordinationClient>,
    strategy: Box<dyn ElectionStrategy>,
    attempts: u32,
}

impl Leadership {
    pub fn member_path(&self) -> Option<String> {
        self.strategy.member_path()
    }

    pub fn candidate_id(&self) -> CandidateId {
        self.strategy.candidate_id()
    }

    /// Attempts it took to win, including the winning one.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn strategy(&self) -> &dyn ElectionStrategy {
        self.strategy.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// Step down by ending the session.
    pub fn resign(self) {
        info!("Resigning leadership of {:?}", self.member_path());
    }
}

impl fmt::Debug for Leadership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Leadership")
            .field("member", &self.member_path())
            .field("candidate", &self.candidate_id())
            .field("attempts", &self.attempts)
            .finish()
    }
}

/// Participates in an election until it wins.
pub struct Candidate<C> {
    name: String,
    connector: C,
    factory: StrategyFactory,
    start_election: bool,
    retry: RetryConfig,
}

impl<C: Connector> Candidate<C> {
    pub fn new(name: impl Into<String>, connector: C, factory: StrategyFactory) -> Self {
        Self {
            name: name.into(),
            connector,
            factory,
            start_election: true,
            retry: RetryConfig::default(),
        }
    }

    /// Whether to create the election namespace when it is missing.
    pub fn with_start_election(mut self, start: bool) -> Self {
        self.start_election = start;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Participate, follow, and retry until this candidate leads.
    pub async fn run(&self) -> Result<Leadership> {
        let mut session: Option<Arc<dyn CoordinationClient>> = None;
        let mut attempts = 0;

        loop {
            if self.retry.exceeded(attempts) {
                return Err(CandidateError::ExhaustedAttempts(attempts));
            }
            attempts += 1;

            let client = match session.take() {
                Some(client) if client.is_connected() => client,
                _ => match self.connector.connect().await {
                    Ok(client) => client,
                    Err(e) if e.is_connection_loss() => {
                        warn!("[{}] Connect failed: {}", self.name, e);
                        self.back_off(attempts).await;
                        continue;
                    }
                    Err(e) => return Err(CandidateError::Connect(e)),
                },
            };

            let strategy = (self.factory)();
            let mut state = strategy.participate(&client, self.start_election).await?;
            debug!("[{}] participate -> {:?}", self.name, state);
            if state == ElectState::Leaded {
                state = strategy.follow().await?;
            }

            match state {
                ElectState::Leading => {
                    info!(
                        "[{}] Leading as {:?} after {} attempt(s)",
                        self.name,
                        strategy.member_path(),
                        attempts
                    );
                    return Ok(Leadership {
                        client,
                        strategy,
                        attempts,
                    });
                }
                ElectState::NoElection => {
                    info!("[{}] No election at {}", self.name, strategy.config().root);
                    session = Some(client);
                }
                state if state.needs_participation() => {
                    warn!("[{}] {:?}, re-participating on a fresh session", self.name, state);
                }
                other => {
                    warn!("[{}] Unexpected state {:?}", self.name, other);
                }
            }
            self.back_off(attempts).await;
        }
    }

    async fn back_off(&self, attempts: u32) {
        let delay = calculate_backoff(attempts, &self.retry);
        debug!("[{}] Retrying in {:?}", self.name, delay);
        tokio::time::sleep(delay).await;
    }
}
