//! Uniform JSON response envelope.
//!
//! Every API response is `{success, data?, error?, message?, ...}` so
//! clients can branch on a single shape.

use serde::Serialize;
use serde_json::Value;

/// Response envelope shared by all endpoints.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Set by PIN verification when the (IP, user) pair is locked out.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_blocked: Option<bool>,

    /// Remaining PIN attempts before lockout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts_remaining: Option<u32>,
}

impl Envelope {
    /// Successful response with a data payload.
    pub fn ok(data: impl Serialize) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            message: None,
            is_blocked: None,
            attempts_remaining: None,
        }
    }

    /// Successful response with a human-readable message only.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: None,
            error: None,
            message: Some(message.into()),
            is_blocked: None,
            attempts_remaining: None,
        }
    }

    /// Failed response.
    pub fn error(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            message: None,
            is_blocked: None,
            attempts_remaining: None,
        }
    }

    /// Attach the PIN lockout flag.
    pub fn blocked(mut self, blocked: bool) -> Self {
        self.is_blocked = Some(blocked);
        self
    }

    /// Attach the remaining-attempts counter.
    pub fn attempts_remaining(mut self, remaining: u32) -> Self {
        self.attempts_remaining = Some(remaining);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_envelope_has_no_error_fields() {
        let body = serde_json::to_value(Envelope::ok(serde_json::json!({"id": 1}))).unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["id"], 1);
        assert!(body.get("error").is_none());
        assert!(body.get("isBlocked").is_none());
    }

    #[test]
    fn error_envelope_camel_cases_pin_fields() {
        let body = serde_json::to_value(
            Envelope::error("Invalid PIN")
                .blocked(true)
                .attempts_remaining(0),
        )
        .unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["isBlocked"], true);
        assert_eq!(body["attemptsRemaining"], 0);
    }
}
