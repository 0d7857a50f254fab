//! Contention-free leader election: each candidate watches its predecessor.
//!
//! Candidates form a chain ordered by sequence number. A follower watches
//! only the member immediately before it, so a failure wakes exactly one
//! candidate: the one behind the failed member. That candidate re-reads the
//! membership and either takes over as leader or re-arms on whoever now
//! precedes it (a failed predecessor in the middle of the chain).

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

/// Leader election where each follower watches its immediate predecessor.
pub struct ContentionFreeElection {
    core: StrategyCore,
}

impl ContentionFreeElection {
    pub fn new() -> Self {
        Self::with_config(ElectionConfig::contention_free())
    }

    pub fn with_config(config: ElectionConfig) -> Self {
        Self {
            core: StrategyCore::new(config),
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.core.set_event_bus(bus);
        self
    }

    pub fn updates(&self) -> u64 {
        self.core.updates()
    }

    async fn watch_predecessor(
        &self,
        client: &dyn CoordinationClient,
        member: &str,
        candidates: &[String],
    ) -> Result<bool> {
        let predecessor = ordering::predecessor_of(candidates, member).unwrap_or_default();
        self.core.arm(client, member, predecessor).await
    }
}

impl Default for ContentionFreeElection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ElectionStrategy for ContentionFreeElection {
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
            } => match self
                .watch_predecessor(client.as_ref(), &member, &candidates)
                .await
            {
                Ok(true) => ElectState::Leaded,
                Ok(false) => ElectState::LostElection,
                Err(e) if e.is_connection_loss() => ElectState::LostConnection,
                Err(e) => return Err(e),
            },
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
        debug!("Predecessor watch fired: {:?} on {}", event.kind, event.path);
        let state = match self.core.reevaluate(&event).await? {
            Joined::Decided(state) => state,
            Joined::Following {
                client,
                member,
                candidates,
            } => match self
                .watch_predecessor(client.as_ref(), &member, &candidates)
                .await
            {
                Ok(true) => ElectState::Leaded,
                _ => ElectState::LostConnection,
            },
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryCoordinator, InMemorySession};

    async fn chain(
        service: &InMemoryCoordinator,
        n: usize,
    ) -> Vec<(Arc<InMemorySession>, ContentionFreeElection)> {
        let mut members = Vec::new();
        for _ in 0..n {
            let session = service.connect();
            let client: Arc<dyn CoordinationClient> = session.clone();
            let election = ContentionFreeElection::new();
            election.participate(&client, true).await.unwrap();
            members.push((session, election));
        }
        members
    }

    #[tokio::test]
    async fn test_each_follower_watches_predecessor() {
        let service = InMemoryCoordinator::new();
        let members = chain(&service, 3).await;

        assert_eq!(members[0].1.state(), Some(ElectState::Leading));
        assert_eq!(members[1].1.state(), Some(ElectState::Leaded));
        assert_eq!(members[2].1.state(), Some(ElectState::Leaded));
        assert_eq!(service.pending_watches("/elect/ctf_0000000000"), 1);
        assert_eq!(service.pending_watches("/elect/ctf_0000000001"), 1);
        assert_eq!(service.pending_watches("/elect/ctf_0000000002"), 0);
    }

    #[tokio::test]
    async fn test_middle_failure_rearms_on_new_predecessor() {
        let service = InMemoryCoordinator::new();
        let members = chain(&service, 3).await;

        members[1].0.close();
        let state = members[2].1.next_transition().await.unwrap();
        assert_eq!(state, ElectState::Leaded);
        // The closed session's own watch on the leader was dropped.
        assert_eq!(service.pending_watches("/elect/ctf_0000000000"), 1);
    }

    #[tokio::test]
    async fn test_successor_takes_over() {
        let service = InMemoryCoordinator::new();
        let members = chain(&service, 2).await;

        members[0].0.close();
        assert_eq!(
            members[1].1.next_transition().await.unwrap(),
            ElectState::Leading
        );
    }

    #[tokio::test]
    async fn test_follow_runs_until_leading() {
        let service = InMemoryCoordinator::new();
        let members = chain(&service, 3).await;

        members[1].0.close();
        members[0].0.close();
        assert_eq!(members[2].1.follow().await.unwrap(), ElectState::Leading);
    }
}
