//! Error types for election strategies.

use crate::client::ClientError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ElectionError {
    /// A member name whose sequence suffix is missing or not numeric.
    /// Indicates a corrupt namespace or an incompatible writer; never retried.
    #[error("Malformed member name: {0}")]
    MalformedMemberName(String),

    /// The coordination client reported itself disconnected.
    #[error("Connection to the coordination service lost")]
    ConnectionLoss,

    /// The election namespace is missing where it is expected to exist.
    #[error("Election namespace missing: {0}")]
    DataInconsistency(String),

    /// The election namespace cannot hold orderable members.
    #[error("Invalid election config: {0}")]
    InvalidConfig(String),

    /// Watch handling was requested before `participate` registered a member.
    #[error("Strategy has not participated in an election")]
    NotParticipating,

    #[error("Coordination client error: {0}")]
    Client(#[from] ClientError),
}

impl ElectionError {
    /// True when the failure means the session is gone or unreachable.
    pub fn is_connection_loss(&self) -> bool {
        match self {
            ElectionError::ConnectionLoss => true,
            ElectionError::Client(err) => err.is_connection_loss(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ElectionError>;
