//! Utility functions for display formatting.

pub mod format;

pub use format::{format_date, format_deadline, is_overdue, truncate_string};
