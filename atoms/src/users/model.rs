use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Mentor,
    Intern,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct User {
    pub user_id: String,
    pub full_name: String,
    /// Learning track, e.g. "backend" or "design".
    pub domain: String,
    /// `None` means this user is a mentor.
    pub mentor_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn role(&self) -> UserRole {
        if self.mentor_id.is_some() {
            UserRole::Intern
        } else {
            UserRole::Mentor
        }
    }

    pub fn is_intern_of(&self, mentor_id: &str) -> bool {
        self.mentor_id.as_deref() == Some(mentor_id)
    }
}
