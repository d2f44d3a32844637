//! Timeline data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A post fetched from the watched timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Unique post id.
    pub id: String,
    /// Post text.
    pub text: String,
    /// When the post was created.
    pub created_at: DateTime<Utc>,
}

impl Item {
    /// Public link to this post on `handle`'s timeline.
    #[must_use]
    pub fn permalink(&self, handle: &str) -> String {
        format!("https://twitter.com/{handle}/status/{}", self.id)
    }
}

/// A resolved account.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct User {
    /// Numeric account id.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Handle without the `@`.
    #[serde(default)]
    pub username: String,
}

// =============================================================================
// API response envelopes
// =============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct UserEnvelope {
    pub data: Option<User>,
    #[serde(default)]
    pub errors: Vec<ApiError>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TimelineEnvelope {
    pub data: Option<Vec<Item>>,
    #[serde(default)]
    pub errors: Vec<ApiError>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiError {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.title, &self.detail) {
            (Some(title), Some(detail)) => write!(f, "{title}: {detail}"),
            (Some(text), None) | (None, Some(text)) => f.write_str(text),
            (None, None) => f.write_str("unknown error"),
        }
    }
}

pub(crate) fn join_errors(errors: &[ApiError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
