//! jira rest api client
//!
//! Every call is a single authenticated request without retries. Callers
//! decide whether a failed call aborts their workflow.

mod client;
mod error;
mod model;

pub use client::TrackerClient;
pub use error::TrackerError;
pub use model::{RemoteLink, TrackerIssueRef, Transition};

/// user agent of every outgoing request
pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
