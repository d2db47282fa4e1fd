//! Type-safe identifier newtypes for Sentinel cluster coordination.
//!
//! These types keep replica identities from being mixed up with the other
//! free-form strings (domains, tokens, resolver names) that flow through the
//! ACME coordination code.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;

/// Stable identity of one proxy replica.
///
/// The identity is what a replica writes into the shared leadership record,
/// so two replicas must never resolve to the same value. By default it is the
/// machine hostname, which is unique per pod/host in typical deployments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplicaId(String);

impl ReplicaId {
    /// Create from an explicit identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Resolve the identity from the local hostname
    ///
    /// # Errors
    ///
    /// Returns an error if the hostname cannot be read or is not valid UTF-8.
    pub fn from_hostname() -> io::Result<Self> {
        let name = hostname::get()?;
        let name = name.into_string().map_err(|raw| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("hostname is not valid UTF-8: {:?}", raw),
            )
        })?;

        if name.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "hostname is empty",
            ));
        }

        Ok(Self(name))
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the identity as raw bytes, as stored in the backend
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ReplicaId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ReplicaId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
