//! Auth domain: principals, tokens, PIN policy.

pub mod jwt;
pub mod models;
pub mod pin;
pub mod store;

pub use jwt::{Claims, TokenService};
pub use models::{CredentialKind, PinAttempt, StoredCredential, User};
pub use pin::{PinGuard, PinOutcome};
pub use store::{
    MemoryPinAttemptStore, MemoryUserStore, PinAttemptStore, PostgresPinAttemptStore,
    PostgresUserStore, UserStore, MAX_PIN_ATTEMPTS,
};
