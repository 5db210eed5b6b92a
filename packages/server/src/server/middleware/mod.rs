//! HTTP middleware.

pub mod auth;
pub mod client_ip;
pub mod telemetry;

pub use auth::{extract_auth_user, require_auth, AuthUser};
pub use client_ip::{normalize_ip, resolve_client_ip, ClientIp};
pub use telemetry::track_requests;
