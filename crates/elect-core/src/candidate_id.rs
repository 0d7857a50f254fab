//! CandidateId: process-local identity of an election participant.
//!
//! Stored as the payload of the candidate's member node. It plays no part
//! in deciding leadership; it exists so operators can tell members apart.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CandidateIdError {
    #[error("Invalid candidate ID format: expected 16 hex chars")]
    InvalidFormat,
    #[error("Invalid hex: {0}")]
    InvalidHex(#[from] std::num::ParseIntError),
    #[error("Invalid payload length: expected 8 bytes, got {0}")]
    InvalidPayload(usize),
}

/// Identity of one candidate, displayed as a 16-character hex string.
///
/// # Examples
/// ```
/// use elect_core::CandidateId;
///
/// let id = CandidateId::generate();
/// let parsed: CandidateId = id.to_string().parse().unwrap();
/// assert_eq!(id, parsed);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CandidateId(u64);

impl CandidateId {
    /// Generate a new random, non-zero candidate ID.
    pub fn generate() -> Self {
        use rand::Rng;
        loop {
            let id: u64 = rand::rng().random();
            if id != 0 {
                return Self(id);
            }
        }
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Member node payload: the ID as 8 big-endian bytes.
    pub fn to_payload(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Decode a member node payload.
    pub fn from_payload(payload: &[u8]) -> Result<Self, CandidateIdError> {
        let bytes: [u8; 8] = payload
            .try_into()
            .map_err(|_| CandidateIdError::InvalidPayload(payload.len()))?;
        Ok(Self(u64::from_be_bytes(bytes)))
    }
}

impl Display for CandidateId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for CandidateId {
    type Err = CandidateIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 16 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CandidateIdError::InvalidFormat);
        }
        let id = u64::from_str_radix(&s.to_ascii_lowercase(), 16)?;
        Ok(Self(id))
    }
}

impl From<u64> for CandidateId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

// Serialize as hex string for consistency in logs and events
impl serde::Serialize for CandidateId {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for CandidateId {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = <String as serde::Deserialize>::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
