//! Naive leader election: every follower watches the leader.
//!
//! When the leader's member node goes away, every follower wakes at once,
//! re-reads the membership, and re-arms on the new head. With N candidates
//! a single leader failure produces N-1 notifications and N-1 membership
//! reads (the herd effect). That cost buys a strategy with a single watch
//! target shared by everyone. Use [`ContentionFreeElection`] when the
//! candidate pool is large.
//!
//! [`ContentionFreeElection`]: crate::ContentionFreeElection

use crate::candidate_id::CandidateId;
use crate::client::{CoordinationClient, WatchedEvent};
use crate::config::ElectionConfig;
use crate::error::Result;
use crate::events::EventBus;
use crate::ordering;
use crate::state::ElectState;
use crate::strategy::{ElectionStrategy, Joined, StrategyCore};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Leader election where followers watch the head of the membership.
pub struct NaiveElection {
    core: StrategyCore,
}

impl NaiveElection {
    pub fn new() -> Self {
        Self::with_config(ElectionConfig::naive())
    }

    pub fn with_config(config: ElectionConfig) -> Self {
        Self {
            core: StrategyCore::new(config),
        }
    }

    /// Publish state changes and watch activity to `bus`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.core.set_event_bus(bus);
        self
    }

    /// Number of states published so far.
    pub fn updates(&self) -> u64 {
        self.core.updates()
    }
}

impl Default for NaiveElection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ElectionStrategy for NaiveElection {
    fn config(&self) -> &ElectionConfig {
        self.core.config()
    }

    fn candidate_id(&self) -> CandidateId {
        self.core.id()
    }

    fn state(&self) -> Option<ElectState> {
        self.core.state()
    }

    fn member_path(&self) -> Option<String> {
        self.core.member_path()
    }

    async fn participate(
        &self,
        client: &Arc<dyn CoordinationClient>,
        start_election: bool,
    ) -> Result<ElectState> {
        let state = match self.core.join(client, start_election).await? {
            Joined::Decided(state) => state,
            Joined::Following {
                client,
                member,
                candidates,
            } => {
                let leader = ordering::head(&candidates).unwrap_or_default();
                match self.core.arm(client.as_ref(), &member, leader).await {
                    Ok(true) => ElectState::Leaded,
                    Ok(false) => ElectState::LostElection,
                    Err(e) if e.is_connection_loss() => ElectState::LostConnection,
                    Err(e) => return Err(e),
                }
            }
        };
        if state == ElectState::Leading {
            info!("{} is leading", self.core.id());
        }
        Ok(self.core.publish(state))
    }

    fn update(&self, state: ElectState) -> ElectState {
        self.core.publish(state)
    }

    async fn handle_watch_event(&self, event: WatchedEvent) -> Result<ElectState> {
        debug!("Leader watch fired: {:?} on {}", event.kind, event.path);
        let state = match self.core.reevaluate(&event).await? {
            Joined::Decided(state) => state,
            Joined::Following {
                client,
                member,
                candidates,
            } => {
                let leader = ordering::head(&candidates).unwrap_or_default();
                match self.core.arm(client.as_ref(), &member, leader).await {
                    Ok(true) => ElectState::Leaded,
                    _ => ElectState::LostConnection,
                }
            }
        };
        if state == ElectState::Leading {
            info!("{} took over leadership", self.core.id());
        }
        Ok(self.update(state))
    }

    async fn next_transition(&self) -> Result<ElectState> {
        let event = self.core.next_event().await;
        self.handle_watch_event(event).await
    }

    async fn drain_pending(&self) -> Result<Vec<ElectState>> {
        let mut states = Vec::new();
        while let Some(event) = self.core.try_next_event().await {
            states.push(self.handle_watch_event(event).await?);
        }
        Ok(states)
    }
}
