//! Issue-tracker API contract.
//!
//! Mirrors the forge layer: the engine depends on the [`TrackerApi`] trait,
//! the `reqwest` client lives in [`client`], and tests use an in-memory fake.
//! Transport errors share the forge error taxonomy.

pub mod client;

pub use client::TrackerClient;

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::forge::ApiError;
use crate::types::{IssueKey, IssueSnapshot};

/// A comment on a tracker issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerComment {
    pub author: String,
    pub body: String,
}

/// Operations the engine needs from the issue tracker.
pub trait TrackerApi: Send + Sync {
    fn get_issue(
        &self,
        key: &IssueKey,
    ) -> impl Future<Output = Result<IssueSnapshot, ApiError>> + Send;

    /// Moves the issue to the named workflow status.
    ///
    /// Fails with a permanent error when the workflow has no transition to
    /// that status from the issue's current one; the caller decides on a
    /// fallback.
    fn transition_issue(
        &self,
        key: &IssueKey,
        to_status: &str,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    fn post_comment(
        &self,
        key: &IssueKey,
        body: &str,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    fn list_comments(
        &self,
        key: &IssueKey,
    ) -> impl Future<Output = Result<Vec<TrackerComment>, ApiError>> + Send;
}
