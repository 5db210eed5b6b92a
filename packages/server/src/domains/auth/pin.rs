//! PIN verification with per-(IP, principal) brute-force lockout.

use anyhow::Result;
use std::sync::Arc;
use uuid::Uuid;

use super::store::{PinAttemptStore, MAX_PIN_ATTEMPTS};
use crate::kernel::vault;

/// Outcome of one PIN verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinOutcome {
    /// PIN matched; the attempt counter was reset.
    Verified,
    /// PIN mismatched; `attempts_remaining` before lockout.
    Invalid { attempts_remaining: u32 },
    /// The (IP, principal) pair is locked out; correctness is not checked.
    Blocked,
}

/// Stateless verification service over the attempt store.
#[derive(Clone)]
pub struct PinGuard {
    attempts: Arc<dyn PinAttemptStore>,
}

impl PinGuard {
    pub fn new(attempts: Arc<dyn PinAttemptStore>) -> Self {
        Self { attempts }
    }

    /// Verify a PIN against its stored hash, enforcing the lockout policy.
    pub async fn verify(
        &self,
        ip: &str,
        user_id: Uuid,
        pin: &str,
        pin_hash: &str,
    ) -> Result<PinOutcome> {
        if let Some(existing) = self.attempts.get(ip, user_id).await? {
            if existing.blocked {
                return Ok(PinOutcome::Blocked);
            }
        }

        if vault::verify_secret(pin, pin_hash) {
            self.attempts.reset(ip, user_id).await?;
            return Ok(PinOutcome::Verified);
        }

        let attempt = self.attempts.record_failure(ip, user_id).await?;
        if attempt.blocked {
            return Ok(PinOutcome::Blocked);
        }

        Ok(PinOutcome::Invalid {
            attempts_remaining: (MAX_PIN_ATTEMPTS - attempt.attempts).max(0) as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::auth::store::MemoryPinAttemptStore;

    fn guard() -> PinGuard {
        PinGuard::new(Arc::new(MemoryPinAttemptStore::new()))
    }

    #[tokio::test]
    async fn correct_pin_verifies_and_resets() {
        let guard = guard();
        let user_id = Uuid::new_v4();
        let hash = vault::hash_secret("4821").unwrap();

        // Two failures, then success, then the counter starts fresh.
        for _ in 0..2 {
            let outcome = guard.verify("9.9.9.9", user_id, "0000", &hash).await.unwrap();
            assert!(matches!(outcome, PinOutcome::Invalid { .. }));
        }

        let outcome = guard.verify("9.9.9.9", user_id, "4821", &hash).await.unwrap();
        assert_eq!(outcome, PinOutcome::Verified);

        let outcome = guard.verify("9.9.9.9", user_id, "0000", &hash).await.unwrap();
        assert_eq!(
            outcome,
            PinOutcome::Invalid {
                attempts_remaining: (MAX_PIN_ATTEMPTS - 1) as u32
            }
        );
    }

    #[tokio::test]
    async fn fifth_failure_blocks_even_for_correct_pin() {
        let guard = guard();
        let user_id = Uuid::new_v4();
        let hash = vault::hash_secret("4821").unwrap();

        for _ in 0..MAX_PIN_ATTEMPTS {
            let _ = guard.verify("8.8.8.8", user_id, "0000", &hash).await.unwrap();
        }

        // Correct PIN no longer matters from this IP.
        let outcome = guard.verify("8.8.8.8", user_id, "4821", &hash).await.unwrap();
        assert_eq!(outcome, PinOutcome::Blocked);

        // A different IP is unaffected and success there does not unblock
        // the first IP.
        let outcome = guard.verify("7.7.7.7", user_id, "4821", &hash).await.unwrap();
        assert_eq!(outcome, PinOutcome::Verified);

        let outcome = guard.verify("8.8.8.8", user_id, "4821", &hash).await.unwrap();
        assert_eq!(outcome, PinOutcome::Blocked);
    }
}
