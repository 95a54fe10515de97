use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Project, UserProfile};

/// Board column a task lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Todo,
    Backlog,
    InProgress,
    Done,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Todo,
        TaskStatus::Backlog,
        TaskStatus::InProgress,
        TaskStatus::Done,
    ];

    /// Wire value used in query strings (`?status=IN_PROGRESS`)
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "TODO",
            TaskStatus::Backlog => "BACKLOG",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Done => "DONE",
        }
    }

    /// Parse a status from user input, accepting the wire value or a loose spelling
    pub fn parse(s: &str) -> Option<Self> {
        let normalized = s.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "TODO" | "TO_DO" => Some(TaskStatus::Todo),
            "BACKLOG" => Some(TaskStatus::Backlog),
            "IN_PROGRESS" | "DOING" => Some(TaskStatus::InProgress),
            "DONE" => Some(TaskStatus::Done),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskPriority {
    #[serde(rename = "L")]
    Low,
    #[serde(rename = "M")]
    Medium,
    #[serde(rename = "H")]
    High,
}

impl TaskPriority {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "l" | "low" => Some(TaskPriority::Low),
            "m" | "medium" => Some(TaskPriority::Medium),
            "h" | "high" => Some(TaskPriority::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub project_details: Option<Project>,
    #[serde(default)]
    pub assignee_details: Option<UserProfile>,
    pub author: UserProfile,
    pub created_at: DateTime<Utc>,
}

/// Body for creating or replacing a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDraft {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    /// Project id; `None` leaves the task unassigned
    pub project: Option<i64>,
}

impl TaskDraft {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            status: TaskStatus::Todo,
            priority: None,
            deadline: None,
            project: None,
        }
    }

    /// Draft carrying over every editable field of an existing task
    pub fn from_task(task: &Task) -> Self {
        Self {
            title: task.title.clone(),
            description: task.description.clone(),
            status: task.status,
            priority: task.priority,
            deadline: task.deadline,
            project: task.project_details.as_ref().map(|p| p.id),
        }
    }
}

/// One page of `GET tasks/`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPage {
    pub count: u64,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<Task>,
}

impl TaskPage {
    pub fn has_more(&self) -> bool {
        self.next.is_some()
    }
}

/// Query filters for listing tasks
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub project: Option<i64>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl TaskFilter {
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if let Some(status) = self.status {
            pairs.push(("status".to_string(), status.as_str().to_string()));
        }
        if let Some(project) = self.project {
            pairs.push(("project".to_string(), project.to_string()));
        }
        if let Some(page) = self.page {
            pairs.push(("page".to_string(), page.to_string()));
        }
        if let Some(page_size) = self.page_size {
            pairs.push(("page_size".to_string(), page_size.to_string()));
        }
        pairs
    }
}
