//! Account model for stored credentials

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stored account
///
/// Session tokens are not part of this record; they live in the encrypted
/// credential file keyed by [`Account::credential_key`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Unique identifier
    pub id: Uuid,
    /// Decentralized identifier (did:plc:... or did:web:...)
    pub did: String,
    /// Handle (e.g. user.bsky.social)
    pub handle: String,
    /// Display name (for UI)
    pub display_name: String,
    /// Avatar URL (cached)
    pub avatar_url: Option<String>,
    /// PDS host this account's repo lives on
    pub pds_host: String,
    /// When the account was added
    pub created_at: DateTime<Utc>,
    /// Last used timestamp
    pub last_used_at: Option<DateTime<Utc>>,
}

impl Account {
    /// Create a new account record
    pub fn new(did: &str, handle: &str, display_name: &str, pds_host: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            did: did.to_string(),
            handle: handle.to_string(),
            display_name: display_name.to_string(),
            avatar_url: None,
            pds_host: pds_host.trim_end_matches('/').to_string(),
            created_at: Utc::now(),
            last_used_at: None,
        }
    }

    /// Handle prefixed with @, for display
    pub fn full_handle(&self) -> String {
        format!("@{}", self.handle)
    }

    /// Key under which this account's tokens are stored
    pub fn credential_key(&self) -> String {
        format!("rookery:bluesky:{}", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pds_host_trailing_slash_stripped() {
        let account = Account::new("did:plc:abc", "alice.bsky.social", "Alice", "https://bsky.social/");
        assert_eq!(account.pds_host, "https://bsky.social");
    }

    #[test]
    fn test_credential_key_unique_per_account() {
        let a = Account::new("did:plc:abc", "alice.bsky.social", "Alice", "https://bsky.social");
        let b = Account::new("did:plc:abc", "alice.bsky.social", "Alice", "https://bsky.social");
        assert_ne!(a.credential_key(), b.credential_key());
    }
}
