use std::fmt;

use serde::{Deserialize, Serialize};

/// A server/community served by the bot. All state is partitioned by tenant.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

/// The user credited with a bump.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ActorId(String);

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("invalid tenant id: {0:?} (must be non-empty, no whitespace)")]
    Tenant(String),
    #[error("invalid actor id: {0:?} (must be non-empty, no whitespace)")]
    Actor(String),
}

fn valid_id(s: &str) -> bool {
    !s.is_empty() && !s.chars().any(char::is_whitespace)
}

impl TenantId {
    pub fn parse(s: &str) -> Result<Self, IdError> {
        let s = s.trim();
        if !valid_id(s) {
            return Err(IdError::Tenant(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ActorId {
    pub fn parse(s: &str) -> Result<Self, IdError> {
        let s = s.trim();
        if !valid_id(s) {
            return Err(IdError::Actor(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TenantId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

impl TryFrom<String> for ActorId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ActorId> for String {
    fn from(id: ActorId) -> Self {
        id.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One run of a polling detector over a tenant's channel history.
/// Observations sharing a pass describe the same scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PassId(pub u64);

impl fmt::Display for PassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pass-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_trims_and_rejects_blank() {
        assert_eq!(TenantId::parse(" 42 ").unwrap().as_str(), "42");
        assert_eq!(TenantId::parse("  "), Err(IdError::Tenant(String::new())));
        assert!(ActorId::parse("").is_err());
        assert!(ActorId::parse("a b").is_err());
    }

    #[test]
    fn deserialize_validates() {
        let ok: ActorId = serde_json::from_str("\"1001\"").unwrap();
        assert_eq!(ok.as_str(), "1001");
        assert!(serde_json::from_str::<ActorId>("\"\"").is_err());
    }
}
