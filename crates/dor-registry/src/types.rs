//! Registry records and claim states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What the registry stores for a registered identifier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryRecord {
    pub token: String,
    pub registered_at: DateTime<Utc>,
}

impl RegistryRecord {
    /// A record stamped with the current time.
    pub fn now(token: &str) -> Self {
        Self {
            token: token.to_string(),
            registered_at: Utc::now(),
        }
    }
}

/// Lifecycle of an identifier during an ingest.
///
/// ```text
/// Unclaimed --lock + check--> Claiming --insert + write--> Registered
///                                 |
///                                 +--insert or write fails--> Failed
/// ```
///
/// A purge moves a registered identifier back to `Unclaimed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimState {
    Unclaimed,
    Claiming,
    Registered,
    Failed,
}

impl std::fmt::Display for ClaimState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unclaimed => write!(f, "unclaimed"),
            Self::Claiming => write!(f, "claiming"),
            Self::Registered => write!(f, "registered"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_serializes_token_and_timestamp() {
        let record = RegistryRecord::now("demo:1");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["token"], "demo:1");
        assert!(json["registered_at"].is_string());
    }

    #[test]
    fn state_display() {
        assert_eq!(ClaimState::Claiming.to_string(), "claiming");
        assert_eq!(ClaimState::Registered.to_string(), "registered");
    }
}
