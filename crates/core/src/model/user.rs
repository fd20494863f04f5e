//! Accounts that follow podcasts on a shared deployment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user who follows podcasts. Podcasts are processed once and shared by
/// every follower.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: Option<i64>,
    /// Unique, compared case-insensitively.
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            id: None,
            email: email.into().trim().to_lowercase(),
            display_name: None,
            created_at: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_is_normalized() {
        let user = User::new("  Someone@Example.COM ").with_display_name("Someone");
        assert_eq!(user.email, "someone@example.com");
        assert_eq!(user.display_name.as_deref(), Some("Someone"));
    }
}
