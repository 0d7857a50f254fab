//! The election strategy contract.
//!
//! A candidate calls `participate` once per strategy instance. That call
//! registers an ephemeral-sequential member, reads the ordered membership,
//! and decides `Leading`, `Leaded`, or `LostElection` on the spot. A
//! follower arms exactly one watch. When it fires, the event lands in the
//! instance's own queue; draining the queue runs `handle_watch_event`,
//! which re-reads membership, re-arms if still following, and publishes
//! the new state through `update`.
//!
//! Strategies differ only in which member they watch. The shared steps
//! live in `StrategyCore`, which each strategy owns by composition.

use crate::candidate_id::CandidateId;
use crate::client::{
    ClientError, CoordinationClient, CreateMode, EventKind, Watch, WatchedEvent,
};
use crate::config::ElectionConfig;
use crate::error::{ElectionError, Result};
use crate::events::{ElectionEvent, EventBus};
use crate::ordering;
use crate::state::{ElectState, StateCell};
use async_trait::async_trait;
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures::{FutureExt, StreamExt};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, warn};

/// A leader-election strategy.
///
/// `participate` is one-off per instance: calling it again registers a
/// second member and is a caller error. Create a fresh instance to
/// re-participate after `LostElection` or `LostConnection`.
#[async_trait]
pub trait ElectionStrategy: Send + Sync {
    fn config(&self) -> &ElectionConfig;

    fn candidate_id(&self) -> CandidateId;

    /// Latest published state, `None` before `participate`.
    fn state(&self) -> Option<ElectState>;

    /// Full path of this candidate's member node, once registered.
    fn member_path(&self) -> Option<String>;

    /// Join the election.
    ///
    /// Returns `LostConnection` if the client is disconnected, `NoElection`
    /// if the namespace is missing and `start_election` is false, otherwise
    /// `Leading`, `Leaded`, or `LostElection`.
    async fn participate(
        &self,
        client: &Arc<dyn CoordinationClient>,
        start_election: bool,
    ) -> Result<ElectState>;

    /// Publish a state from the watch handler. Overwrites, never merges.
    fn update(&self, state: ElectState) -> ElectState;

    /// Re-evaluate membership after a watch fired and re-arm if still
    /// following.
    async fn handle_watch_event(&self, event: WatchedEvent) -> Result<ElectState>;

    /// Wait for the next watch event and handle it.
    async fn next_transition(&self) -> Result<ElectState>;

    /// Handle every watch event already queued, without waiting.
    async fn drain_pending(&self) -> Result<Vec<ElectState>>;

    /// Handle watch events until this candidate stops following.
    ///
    /// Returns `Leading`, `LostElection`, or `LostConnection`.
    async fn follow(&self) -> Result<ElectState> {
        loop {
            match self.state() {
                Some(ElectState::Leaded) => {
                    self.next_transition().await?;
                }
                Some(state) => return Ok(state),
                None => return Err(ElectionError::NotParticipating),
            }
        }
    }

    /// Current members of this strategy's family, ordered by sequence.
    async fn fetch_candidates(&self, client: &dyn CoordinationClient) -> Result<Vec<String>> {
        fetch_candidates(self.config(), client).await
    }

    /// Observe the election without changing it.
    async fn fetch_election_state(&self, client: &dyn CoordinationClient) -> Result<ElectState> {
        fetch_election_state(self.config(), client).await
    }
}

/// Ordered member names of the family described by `config`.
///
/// Fails with `ConnectionLoss` when disconnected and `DataInconsistency`
/// when the election namespace does not exist.
pub async fn fetch_candidates(
    config: &ElectionConfig,
    client: &dyn CoordinationClient,
) -> Result<Vec<String>> {
    if !client.is_connected() {
        return Err(ElectionError::ConnectionLoss);
    }
    let root = &config.root;
    if client.exists(root, None).await?.is_none() {
        return Err(ElectionError::DataInconsistency(root.clone()));
    }
    let children = client.get_children(root).await.map_err(|e| match e {
        ClientError::NoNode(_) => ElectionError::DataInconsistency(root.clone()),
        other => other.into(),
    })?;
    ordering::order(children.into_iter().filter(|name| config.is_member(name)))
}

/// Remote view of the election: `LostConnection`, `NoElection`, `Voting`,
/// or `Voted`.
pub async fn fetch_election_state(
    config: &ElectionConfig,
    client: &dyn CoordinationClient,
) -> Result<ElectState> {
    if !client.is_connected() {
        return Ok(ElectState::LostConnection);
    }
    let root = &config.root;
    let children = match client.exists(root, None).await {
        Ok(None) => return Ok(ElectState::NoElection),
        Ok(Some(_)) => client.get_children(root).await,
        Err(e) => Err(e),
    };
    match children {
        Ok(children) if children.iter().any(|name| config.is_member(name)) => {
            Ok(ElectState::Voted)
        }
        Ok(_) => Ok(ElectState::Voting),
        Err(ClientError::NoNode(_)) => Ok(ElectState::NoElection),
        Err(e) if e.is_connection_loss() => Ok(ElectState::LostConnection),
        Err(e) => Err(e.into()),
    }
}

/// This candidate's registration: its member and a non-owning client handle.
#[derive(Clone)]
struct Participation {
    member: String,
    client: Weak<dyn CoordinationClient>,
}

/// Single-consumer queue receiving this instance's fired watches.
struct WatchQueue {
    sender: UnboundedSender<WatchedEvent>,
    receiver: futures::lock::Mutex<UnboundedReceiver<WatchedEvent>>,
}

impl WatchQueue {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded();
        Self {
            sender,
            receiver: futures::lock::Mutex::new(receiver),
        }
    }

    fn watch(&self) -> Watch {
        Watch::new(self.sender.clone())
    }

    async fn next(&self) -> WatchedEvent {
        match self.receiver.lock().await.next().await {
            Some(event) => event,
            // The queue owns a sender, so the stream never ends.
            None => std::future::pending().await,
        }
    }

    async fn try_next(&self) -> Option<WatchedEvent> {
        self.receiver.lock().await.next().now_or_never().flatten()
    }
}

/// Outcome of the registration steps shared by every strategy.
pub(crate) enum Joined {
    /// Decided without needing a watch.
    Decided(ElectState),
    /// Registered and not the leader; the strategy picks a watch target.
    Following {
        client: Arc<dyn CoordinationClient>,
        member: String,
        candidates: Vec<String>,
    },
}

/// State and plumbing shared by the strategies.
pub(crate) struct StrategyCore {
    config: ElectionConfig,
    id: CandidateId,
    state: StateCell,
    participation: Mutex<Option<Participation>>,
    queue: WatchQueue,
    events: Option<Arc<EventBus>>,
}

impl StrategyCore {
    pub(crate) fn new(config: ElectionConfig) -> Self {
        Self {
            config,
            id: CandidateId::generate(),
            state: StateCell::new(),
            participation: Mutex::new(None),
            queue: WatchQueue::new(),
            events: None,
        }
    }

    pub(crate) fn set_event_bus(&mut self, bus: Arc<EventBus>) {
        self.events = Some(bus);
    }

    pub(crate) fn config(&self) -> &ElectionConfig {
        &self.config
    }

    pub(crate) fn id(&self) -> CandidateId {
        self.id
    }

    pub(crate) fn state(&self) -> Option<ElectState> {
        self.state.load()
    }

    pub(crate) fn updates(&self) -> u64 {
        self.state.updates()
    }

    fn participation(&self) -> Option<Participation> {
        self.participation
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn member_path(&self) -> Option<String> {
        self.participation().map(|p| p.member)
    }

    fn emit(&self, event: impl FnOnce() -> ElectionEvent) {
        if let Some(bus) = &self.events {
            bus.emit(event());
        }
    }

    /// Store and announce a state.
    pub(crate) fn publish(&self, state: ElectState) -> ElectState {
        self.state.store(state);
        self.emit(|| ElectionEvent::state_changed(self.member_path(), state));
        state
    }

    /// Register a member and decide whatever can be decided without a watch.
    ///
    /// Connection loss at any step yields `Decided(LostConnection)`.
    pub(crate) async fn join(
        &self,
        client: &Arc<dyn CoordinationClient>,
        start_election: bool,
    ) -> Result<Joined> {
        match self.register(client, start_election).await {
            Err(e) if e.is_connection_loss() => {
                warn!("Lost connection while participating: {}", e);
                Ok(Joined::Decided(ElectState::LostConnection))
            }
            other => other,
        }
    }

    async fn register(
        &self,
        client: &Arc<dyn CoordinationClient>,
        start_election: bool,
    ) -> Result<Joined> {
        self.config.validate()?;
        if !client.is_connected() {
            return Ok(Joined::Decided(ElectState::LostConnection));
        }

        let root = &self.config.root;
        if client.exists(root, None).await?.is_none() {
            if !start_election {
                return Ok(Joined::Decided(ElectState::NoElection));
            }
            match client.create(root, &[], CreateMode::Persistent).await {
                Ok(_) => debug!("Started election at {}", root),
                // A concurrent starter got there first.
                Err(ClientError::NodeExists(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let member = client
            .create(
                &self.config.member_path_prefix(),
                &self.id.to_payload(),
                CreateMode::EphemeralSequential,
            )
            .await?;
        debug!("Candidate {} registered as {}", self.id, member);
        *self.participation.lock().unwrap_or_else(|e| e.into_inner()) = Some(Participation {
            member: member.clone(),
            client: Arc::downgrade(client),
        });

        let candidates = fetch_candidates(&self.config, client.as_ref()).await?;
        Ok(self.classify(Arc::clone(client), member, candidates))
    }

    fn classify(
        &self,
        client: Arc<dyn CoordinationClient>,
        member: String,
        candidates: Vec<String>,
    ) -> Joined {
        if candidates.is_empty() || !ordering::contains(&candidates, &member) {
            debug!("{} missing from membership {:?}", member, candidates);
            return Joined::Decided(ElectState::LostElection);
        }
        if ordering::is_head(&candidates, &member) {
            return Joined::Decided(ElectState::Leading);
        }
        Joined::Following {
            client,
            member,
            candidates,
        }
    }

    /// Re-read membership after a watch fired.
    ///
    /// Malformed member names propagate; any other failure to read is
    /// reported as `LostConnection`.
    pub(crate) async fn reevaluate(&self, event: &WatchedEvent) -> Result<Joined> {
        let participation = self
            .participation()
            .ok_or(ElectionError::NotParticipating)?;
        self.emit(|| {
            ElectionEvent::watch_fired(
                Some(participation.member.clone()),
                event.path.clone(),
                event.kind,
            )
        });

        let Some(client) = participation.client.upgrade() else {
            warn!("Client for {} is gone", participation.member);
            return Ok(Joined::Decided(ElectState::LostConnection));
        };

        let candidates = match fetch_candidates(&self.config, client.as_ref()).await {
            Ok(candidates) => candidates,
            Err(e @ ElectionError::MalformedMemberName(_)) => return Err(e),
            Err(e) => {
                warn!("Lost connection when fetching candidates: {}", e);
                return Ok(Joined::Decided(ElectState::LostConnection));
            }
        };
        debug!("candidates: {:?}", candidates);

        if candidates.is_empty() {
            return Ok(Joined::Decided(ElectState::LostElection));
        }
        if event.kind != EventKind::NodeDeleted {
            debug!("Unexpected {:?} on {}, re-participating", event.kind, event.path);
            return Ok(Joined::Decided(ElectState::LostElection));
        }
        Ok(self.classify(client, participation.member, candidates))
    }

    /// Arm a watch on the member named `target`. Returns whether it existed.
    pub(crate) async fn arm(
        &self,
        client: &dyn CoordinationClient,
        member: &str,
        target: &str,
    ) -> Result<bool> {
        let target_path = self.config.member_path(ordering::member_name(target));
        let stat = client.exists(&target_path, Some(self.queue.watch())).await?;
        debug!("{} watching {} -> {:?}", member, target_path, stat);
        if stat.is_some() {
            self.emit(|| ElectionEvent::watch_armed(member, target_path.clone()));
        }
        Ok(stat.is_some())
    }

    pub(crate) async fn next_event(&self) -> WatchedEvent {
        self.queue.next().await
    }

    pub(crate) async fn try_next_event(&self) -> Option<WatchedEvent> {
        self.queue.try_next().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryCoordinator;

    fn config() -> ElectionConfig {
        ElectionConfig::naive()
    }

    #[tokio::test]
    async fn test_fetch_election_state_lifecycle() {
        let service = InMemoryCoordinator::new();
        let session = service.connect();
        let client: Arc<dyn CoordinationClient> = session.clone();

        assert_eq!(
            fetch_election_state(&config(), client.as_ref()).await.unwrap(),
            ElectState::NoElection
        );

        client.create("/elect", &[], CreateMode::Persistent).await.unwrap();
        assert_eq!(
            fetch_election_state(&config(), client.as_ref()).await.unwrap(),
            ElectState::Voting
        );

        client
            .create("/elect/naive_", &[], CreateMode::EphemeralSequential)
            .await
            .unwrap();
        assert_eq!(
            fetch_election_state(&config(), client.as_ref()).await.unwrap(),
            ElectState::Voted
        );

        session.close();
        assert_eq!(
            fetch_election_state(&config(), client.as_ref()).await.unwrap(),
            ElectState::LostConnection
        );
    }

    #[tokio::test]
    async fn test_fetch_election_state_ignores_other_families() {
        let service = InMemoryCoordinator::new();
        let client: Arc<dyn CoordinationClient> = service.connect();
        client.create("/elect", &[], CreateMode::Persistent).await.unwrap();
        client
            .create("/elect/ctf_", &[], CreateMode::EphemeralSequential)
            .await
            .unwrap();

        assert_eq!(
            fetch_election_state(&config(), client.as_ref()).await.unwrap(),
            ElectState::Voting
        );
        assert_eq!(
            fetch_election_state(&ElectionConfig::contention_free(), client.as_ref())
                .await
                .unwrap(),
            ElectState::Voted
        );
    }

    #[tokio::test]
    async fn test_fetch_candidates_without_namespace() {
        let service = InMemoryCoordinator::new();
        let client: Arc<dyn CoordinationClient> = service.connect();

        let err = fetch_candidates(&config(), client.as_ref()).await.unwrap_err();
        assert!(matches!(err, ElectionError::DataInconsistency(root) if root == "/elect"));
    }

    #[tokio::test]
    async fn test_fetch_candidates_disconnected() {
        let service = InMemoryCoordinator::new();
        let session = service.connect();
        session.disconnect();

        let err = fetch_candidates(&config(), session.as_ref()).await.unwrap_err();
        assert!(matches!(err, ElectionError::ConnectionLoss));
    }

    #[tokio::test]
    async fn test_fetch_candidates_ordered() {
        let service = InMemoryCoordinator::new();
        let client: Arc<dyn CoordinationClient> = service.connect();
        client.create("/elect", &[], CreateMode::Persistent).await.unwrap();
        for _ in 0..3 {
            client
                .create("/elect/naive_", &[], CreateMode::EphemeralSequential)
                .await
                .unwrap();
        }

        let candidates = fetch_candidates(&config(), client.as_ref()).await.unwrap();
        assert_eq!(
            candidates,
            vec!["naive_0000000000", "naive_0000000001", "naive_0000000002"]
        );
    }

    #[tokio::test]
    async fn test_fetch_candidates_skips_foreign_names() {
        let service = InMemoryCoordinator::new();
        let client: Arc<dyn CoordinationClient> = service.connect();
        client.create("/elect", &[], CreateMode::Persistent).await.unwrap();
        for name in ["/elect/naive_oops", "/elect/naive_b_0000000000", "/elect/naive_"] {
            client.create(name, &[], CreateMode::Persistent).await.unwrap();
        }
        client
            .create("/elect/naive_", &[], CreateMode::EphemeralSequential)
            .await
            .unwrap();

        let candidates = fetch_candidates(&config(), client.as_ref()).await.unwrap();
        assert_eq!(candidates, vec!["naive_0000000000"]);
    }

    #[tokio::test]
    async fn test_fetch_candidates_malformed_member() {
        let service = InMemoryCoordinator::new();
        let client: Arc<dyn CoordinationClient> = service.connect();
        client.create("/elect", &[], CreateMode::Persistent).await.unwrap();
        // All digits, but past u64.
        client
            .create("/elect/naive_99999999999999999999", &[], CreateMode::Persistent)
            .await
            .unwrap();

        let err = fetch_candidates(&config(), client.as_ref()).await.unwrap_err();
        assert!(matches!(err, ElectionError::MalformedMemberName(_)));
    }
}
