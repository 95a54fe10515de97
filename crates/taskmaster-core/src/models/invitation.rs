use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ProjectBasic, UserProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvitationStatus {
    #[serde(rename = "P")]
    Pending,
    #[serde(rename = "A")]
    Accepted,
    #[serde(rename = "D")]
    Declined,
}

impl std::fmt::Display for InvitationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvitationStatus::Pending => write!(f, "Pending"),
            InvitationStatus::Accepted => write!(f, "Accepted"),
            InvitationStatus::Declined => write!(f, "Declined"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invitation {
    pub id: i64,
    #[serde(default)]
    pub email: Option<String>,
    pub project: ProjectBasic,
    pub invited_by: UserProfile,
    pub status: InvitationStatus,
    /// Opaque token the invitee presents to accept or decline
    pub token: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}
