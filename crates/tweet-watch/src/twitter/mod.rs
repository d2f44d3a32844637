//! Timeline API access.
//!
//! Provides the user lookup and recent-posts calls against the v2 API.

mod client;
mod types;

pub use client::{TimelineApi, TwitterClient, DEFAULT_BASE_URL, DEFAULT_TIMEOUT, MAX_RESULTS, MIN_RESULTS};
pub use types::{Item, User};
