//! Principal (user) record and credential envelopes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which provider a stored credential belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialKind {
    Openrouter,
    Supabase,
    Firecrawl,
}

impl CredentialKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialKind::Openrouter => "openrouter",
            CredentialKind::Supabase => "supabase",
            CredentialKind::Firecrawl => "firecrawl",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "openrouter" => Some(CredentialKind::Openrouter),
            "supabase" => Some(CredentialKind::Supabase),
            "firecrawl" => Some(CredentialKind::Firecrawl),
            _ => None,
        }
    }

    pub const ALL: [CredentialKind; 3] = [
        CredentialKind::Openrouter,
        CredentialKind::Supabase,
        CredentialKind::Firecrawl,
    ];
}

/// One stored provider credential: the AES-GCM envelope plus validation
/// bookkeeping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCredential {
    /// `nonce:tag:ciphertext` envelope, or legacy plaintext.
    pub encrypted: Option<String>,
    pub is_valid: Option<bool>,
    pub last_validated_at: Option<DateTime<Utc>>,
}

/// The principal record.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub pin_hash: Option<String>,
    pub openrouter: StoredCredential,
    pub supabase: StoredCredential,
    pub firecrawl: StoredCredential,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn credential(&self, kind: CredentialKind) -> &StoredCredential {
        match kind {
            CredentialKind::Openrouter => &self.openrouter,
            CredentialKind::Supabase => &self.supabase,
            CredentialKind::Firecrawl => &self.firecrawl,
        }
    }

    pub fn has_pin(&self) -> bool {
        self.pin_hash.is_some()
    }
}

/// Brute-force bookkeeping for PIN verification, keyed by (IP, principal).
#[derive(Debug, Clone)]
pub struct PinAttempt {
    pub ip: String,
    pub user_id: Uuid,
    pub attempts: i32,
    pub blocked: bool,
    pub last_attempt_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_kind_labels_roundtrip() {
        for kind in CredentialKind::ALL {
            assert_eq!(CredentialKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(CredentialKind::parse("github"), None);
    }
}
