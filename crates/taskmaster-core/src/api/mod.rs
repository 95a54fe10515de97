//! REST API access for the Taskmaster server.
//!
//! This module provides:
//! - `HttpTransport`: the request execution seam, with `ReqwestTransport`
//!   as the production implementation
//! - `AuthenticatedTransport`: attaches bearer tokens and transparently
//!   refreshes and retries on 401
//! - `TaskmasterApi`: typed calls for tasks, projects and invitations
//!
//! The API uses JWT bearer authentication with short-lived access tokens
//! and longer-lived refresh tokens.

pub mod client;
pub mod error;
pub mod interceptor;
pub mod transport;

pub use client::{authenticate, LoginResponse, TaskmasterApi};
pub use error::ApiError;
pub use interceptor::AuthenticatedTransport;
pub use transport::{ApiRequest, ApiResponse, HttpTransport, ReqwestTransport, TransportError};
