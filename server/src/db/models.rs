//! Row types and the projections handed to clients.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

/// User record in the users table. Never serialized: it carries the hash.
#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub username: String,
    pub password_hash: String,
    pub profile_pic: Option<String>,
    pub status: Option<String>,
    pub created_at: String,
}

/// What the rest of the system sees of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_pic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            profile_pic: user.profile_pic,
            status: user.status,
        }
    }
}

/// Message row joined with both usernames.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedMessage {
    pub id: String,
    pub from: String,
    pub to: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Timestamps are stored as fixed-width RFC 3339 so text order is time order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .unwrap_or_default()
}
