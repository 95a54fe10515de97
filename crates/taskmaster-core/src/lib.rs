//! Taskmaster client core.
//!
//! Session management (token storage, single-flight refresh, request
//! interception, navigation guard), the typed REST client, and the data
//! models shared by Taskmaster front ends.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod storage;
pub mod utils;

pub use api::{ApiError, TaskmasterApi};
pub use auth::{Navigation, SessionEvent, SessionManager};
pub use config::Config;
