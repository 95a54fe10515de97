//! Data models for Taskmaster entities.
//!
//! This module contains the data structures exchanged with the Taskmaster
//! REST API:
//!
//! - `UserProfile`: The authenticated user and task/project authors
//! - `Task`, `TaskDraft`, `TaskPage`: Board items and their paginated listing
//! - `Project`, `ProjectBasic`, `ProjectDraft`: Task groupings with members
//! - `Invitation`: Pending project invitations addressed to the user

pub mod invitation;
pub mod project;
pub mod task;
pub mod user;

pub use invitation::{Invitation, InvitationStatus};
pub use project::{Project, ProjectBasic, ProjectDraft};
pub use task::{Task, TaskDraft, TaskFilter, TaskPage, TaskPriority, TaskStatus};
pub use user::UserProfile;
