//! Election state vocabulary.
//!
//! Two families of states share one enum:
//! - Remote states describe what the coordination service shows
//!   (`NoElection`, `Voting`, `Voted`, `LostConnection`)
//! - Local states describe this candidate's standing
//!   (`Leading`, `Leaded`, `LostElection`)
//!
//! Each state carries a stable numeric code so that logs from different
//! processes can be compared.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicI8, AtomicU64, Ordering};

/// Outcome of an election attempt or observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ElectState {
    /// The election namespace does not exist.
    NoElection,
    /// The namespace exists but holds no members.
    Voting,
    /// The namespace exists and holds members.
    Voted,
    /// Membership was empty or this candidate's member vanished; re-participate.
    LostElection,
    /// The coordination client is unreachable; reconnect, then re-participate.
    LostConnection,
    /// This candidate's member is first in order.
    Leading,
    /// This candidate is not first and is watching.
    Leaded,
}

impl ElectState {
    pub const ALL: [ElectState; 7] = [
        ElectState::NoElection,
        ElectState::Voting,
        ElectState::Voted,
        ElectState::LostElection,
        ElectState::LostConnection,
        ElectState::Leading,
        ElectState::Leaded,
    ];

    /// Stable numeric code of this state.
    pub fn code(self) -> i8 {
        match self {
            ElectState::NoElection => 0,
            ElectState::Voting => 1,
            ElectState::Voted => 2,
            ElectState::LostElection => -1,
            ElectState::LostConnection => -2,
            ElectState::Leading => 3,
            ElectState::Leaded => 4,
        }
    }

    /// Look up a state by its numeric code.
    pub fn from_code(code: i8) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.code() == code)
    }

    /// True for states observed on the coordination service.
    pub fn is_remote(self) -> bool {
        matches!(
            self,
            ElectState::NoElection
                | ElectState::Voting
                | ElectState::Voted
                | ElectState::LostConnection
        )
    }

    /// True for states describing this candidate's own standing.
    pub fn is_local(self) -> bool {
        !self.is_remote()
    }

    /// True when the caller has to participate again to regain a position.
    pub fn needs_participation(self) -> bool {
        matches!(self, ElectState::LostElection | ElectState::LostConnection)
    }
}

impl Display for ElectState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Sentinel code for "nothing published yet".
const EMPTY: i8 = i8::MIN;

/// Atomic cell holding the latest published state of a strategy instance.
///
/// One writer at a time (the watch handler or `participate`), any number of
/// readers. A reader always sees a whole `ElectState`, never a torn value.
#[derive(Debug)]
pub struct StateCell {
    code: AtomicI8,
    updates: AtomicU64,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            code: AtomicI8::new(EMPTY),
            updates: AtomicU64::new(0),
        }
    }

    /// Latest published state, or `None` before the first publication.
    pub fn load(&self) -> Option<ElectState> {
        match self.code.load(Ordering::Acquire) {
            EMPTY => None,
            code => ElectState::from_code(code),
        }
    }

    /// Publish a new state, overwriting the previous one.
    pub fn store(&self, state: ElectState) {
        self.code.store(state.code(), Ordering::Release);
        self.updates.fetch_add(1, Ordering::AcqRel);
    }

    /// Number of publications so far.
    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::Acquire)
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
