use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UserProfile;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub task_count: u32,
    // Older serializers name the owner "author"
    #[serde(alias = "author")]
    pub owner: UserProfile,
    #[serde(default)]
    pub members: Vec<UserProfile>,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn display_task_count(&self) -> String {
        match self.task_count {
            1 => "1 task".to_string(),
            n => format!("{} tasks", n),
        }
    }

    pub fn is_owned_by(&self, user: &UserProfile) -> bool {
        self.owner.id == user.id
    }
}

/// Project summary embedded in invitations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectBasic {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub owner: UserProfile,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectDraft {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}
