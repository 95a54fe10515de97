use chrono::{DateTime, Utc};

use crate::models::{TaskPriority, TaskStatus};

/// Column heading for a task status
pub fn status_label(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Todo => "To Do",
        TaskStatus::Backlog => "Backlog",
        TaskStatus::InProgress => "In Progress",
        TaskStatus::Done => "Done",
    }
}

pub fn priority_label(priority: Option<TaskPriority>) -> &'static str {
    match priority {
        Some(TaskPriority::Low) => "Low",
        Some(TaskPriority::Medium) => "Medium",
        Some(TaskPriority::High) => "High",
        None => "-",
    }
}

/// A deadline is overdue once its calendar day has passed
pub fn is_overdue(deadline: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    deadline.date_naive() < now.date_naive()
}

/// Describe a deadline relative to `now`, by calendar day
pub fn format_deadline(deadline: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let days = (deadline.date_naive() - now.date_naive()).num_days();
    match days {
        d if d < -1 => format!("{} days overdue", -d),
        -1 => "1 day overdue".to_string(),
        0 => "Due today".to_string(),
        1 => "Due tomorrow".to_string(),
        2..=7 => format!("Due in {} days", days),
        _ => deadline.format("%b %d, %Y").to_string(),
    }
}

/// Truncate a string to a maximum length, adding ellipsis if needed
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    }
}

/// Format a date string to a more readable format
pub fn format_date(date: &str) -> String {
    if let Ok(dt) = DateTime::parse_from_rfc3339(date) {
        dt.format("%b %d, %Y").to_string()
    } else if date.len() >= 10 {
        // Keep the YYYY-MM-DD prefix
        date.chars().take(10).collect()
    } else {
        date.to_string()
    }
}
