//! Sessions and messages: the persisted conversation model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Title given to a session before the first question arrives.
pub const DEFAULT_SESSION_TITLE: &str = "New Chat";

/// Message author role.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
    derive_more::Display,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human asking questions
    #[display("user")]
    User,
    /// The gateway's reply
    #[display("assistant")]
    Assistant,
}

/// A conversational thread scoped to a workspace.
///
/// `updated_at` is bumped by the pipeline on every assistant write, so
/// session listings ordered by it surface the most recent conversation
/// first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Session id
    pub id: Uuid,
    /// Owning workspace
    pub workspace_id: Uuid,
    /// Creating user, absent for anonymous sessions
    pub user_id: Option<Uuid>,
    /// Display title; starts as `"New Chat"`
    pub title: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last activity; invariant: `updated_at >= created_at`
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Creates a fresh session with the default title.
    pub fn new(workspace_id: Uuid, user_id: Option<Uuid>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            workspace_id,
            user_id,
            title: DEFAULT_SESSION_TITLE.to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A single turn in a session.
///
/// `user_id` is present exactly when `role` is [`Role::User`]; `sql`,
/// `result`, and `metadata` are populated only on assistant messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Message id
    pub id: Uuid,
    /// Owning workspace
    pub workspace_id: Uuid,
    /// Owning session
    pub session_id: Uuid,
    /// Author, for user messages only
    pub user_id: Option<Uuid>,
    /// Author role
    pub role: Role,
    /// Message text; never empty on write
    pub content: String,
    /// Generated SQL (assistant only, may be empty)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    /// Execution result as an opaque JSON blob (assistant only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    /// Request metadata as an opaque JSON blob
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonValue>,
    /// Write time; the only ordering guarantee within a session
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Creates a user-role message carrying the verbatim question.
    pub fn user(
        workspace_id: Uuid,
        session_id: Uuid,
        user_id: Uuid,
        content: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workspace_id,
            session_id,
            user_id: Some(user_id),
            role: Role::User,
            content: content.into(),
            sql: None,
            result: None,
            metadata: None,
            created_at: now,
        }
    }

    /// Creates an assistant-role message.
    pub fn assistant(
        workspace_id: Uuid,
        session_id: Uuid,
        content: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workspace_id,
            session_id,
            user_id: None,
            role: Role::Assistant,
            content: content.into(),
            sql: None,
            result: None,
            metadata: None,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_starts_with_default_title() {
        let session = Session::new(Uuid::new_v4(), None, Utc::now());
        assert_eq!(session.title, DEFAULT_SESSION_TITLE);
        assert!(session.updated_at >= session.created_at);
    }

    #[test]
    fn user_message_carries_user_id() {
        let msg = Message::user(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), "hi", Utc::now());
        assert_eq!(msg.role, Role::User);
        assert!(msg.user_id.is_some());

        let reply = Message::assistant(msg.workspace_id, msg.session_id, "hello", Utc::now());
        assert_eq!(reply.role, Role::Assistant);
        assert!(reply.user_id.is_none());
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
    }
}
