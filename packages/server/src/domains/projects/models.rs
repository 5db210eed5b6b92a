//! Project record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name/description limits enforced at creation and update.
pub const NAME_MAX_CHARS: usize = 100;
pub const DESCRIPTION_MAX_CHARS: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(user_id: Uuid, name: String, description: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            name,
            description,
            created_at: now,
            updated_at: now,
        }
    }

    /// Validate the length limits; returns a human-readable problem.
    pub fn validate(name: &str, description: Option<&str>) -> Result<(), String> {
        if name.trim().is_empty() {
            return Err("Project name is required".to_string());
        }
        if name.chars().count() > NAME_MAX_CHARS {
            return Err(format!("Project name exceeds {NAME_MAX_CHARS} characters"));
        }
        if let Some(description) = description {
            if description.chars().count() > DESCRIPTION_MAX_CHARS {
                return Err(format!(
                    "Project description exceeds {DESCRIPTION_MAX_CHARS} characters"
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_limits() {
        assert!(Project::validate("My project", None).is_ok());
        assert!(Project::validate("", None).is_err());
        assert!(Project::validate(&"x".repeat(101), None).is_err());
        assert!(Project::validate("ok", Some(&"y".repeat(501))).is_err());
        assert!(Project::validate("ok", Some(&"y".repeat(500))).is_ok());
    }
}
