use serde::{Deserialize, Serialize};

/// Profile of a Taskmaster account, as returned by `auth/me` and embedded
/// in tasks, projects and invitations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

impl UserProfile {
    /// Name shown in listings: the username, with the email when known
    pub fn display_name(&self) -> String {
        if self.email.is_empty() {
            self.username.clone()
        } else {
            format!("{} <{}>", self.username, self.email)
        }
    }
}
