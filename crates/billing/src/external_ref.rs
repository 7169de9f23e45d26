//! External-reference round-tripping
//!
//! The gateway lets callers attach an opaque string to resources; we use it
//! to recover local context (owner, subscription type tag, plan) from webhook
//! events. The encoding is versioned JSON; decoding is tolerant because the
//! field may carry values written by other systems.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const EXTERNAL_REF_VERSION: u8 = 1;

/// Structured local context carried through the gateway's externalReference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalRef {
    #[serde(rename = "v")]
    pub version: u8,
    /// Subscription type tag; lets one owner hold multiple named subscriptions.
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub owner: Option<Uuid>,
}

impl ExternalRef {
    pub fn for_owner(owner: Uuid) -> Self {
        Self {
            version: EXTERNAL_REF_VERSION,
            tag: None,
            plan: None,
            owner: Some(owner),
        }
    }

    pub fn for_subscription(owner: Uuid, tag: impl Into<String>, plan: impl Into<String>) -> Self {
        Self {
            version: EXTERNAL_REF_VERSION,
            tag: Some(tag.into()),
            plan: Some(plan.into()),
            owner: Some(owner),
        }
    }

    /// Compact JSON encoding sent to the gateway.
    pub fn encode(&self) -> String {
        // A struct of plain fields cannot fail to serialize.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Tolerant decode: versioned JSON, or a bare owner UUID written by older
    /// integrations. Anything else is treated as absent, never as an error.
    pub fn decode(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        if let Ok(parsed) = serde_json::from_str::<ExternalRef>(trimmed) {
            return Some(parsed);
        }
        if let Ok(owner) = Uuid::parse_str(trimmed) {
            return Some(Self::for_owner(owner));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let owner = Uuid::new_v4();
        let reference = ExternalRef::for_subscription(owner, "default", "pro");
        let decoded = ExternalRef::decode(&reference.encode()).unwrap();
        assert_eq!(decoded, reference);
        assert_eq!(decoded.owner, Some(owner));
    }

    #[test]
    fn bare_uuid_decodes_as_owner_only() {
        let owner = Uuid::new_v4();
        let decoded = ExternalRef::decode(&owner.to_string()).unwrap();
        assert_eq!(decoded.owner, Some(owner));
        assert_eq!(decoded.tag, None);
    }

    #[test]
    fn garbage_decodes_to_none() {
        assert_eq!(ExternalRef::decode("order-1234"), None);
        assert_eq!(ExternalRef::decode(""), None);
        assert_eq!(ExternalRef::decode("{не json"), None);
    }
}
