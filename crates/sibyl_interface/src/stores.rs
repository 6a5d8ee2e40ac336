//! External collaborators the pipeline consumes but does not own.

use crate::CredentialMap;
use async_trait::async_trait;
use sibyl_core::{Connection, Message, Session};
use sibyl_error::SibylResult;
use uuid::Uuid;

/// Answers workspace membership questions.
///
/// Every request is admitted through this check; a `false` answer turns
/// into an access-denied failure with no side effects.
#[async_trait]
pub trait WorkspaceAuthority: Send + Sync {
    /// Whether `user` belongs to `workspace`.
    async fn is_member(&self, workspace: Uuid, user: Uuid) -> SibylResult<bool>;
}

/// Decrypts connection credentials held encrypted at rest.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Plaintext password for the connection.
    async fn password_for(&self, connection: &Connection) -> SibylResult<String>;
}

/// Per-user LLM credential overrides.
#[async_trait]
pub trait UserPreferences: Send + Sync {
    /// Credential fields this user configured for the provider, if any.
    async fn provider_overrides(
        &self,
        user: Uuid,
        provider: &str,
    ) -> SibylResult<Option<CredentialMap>>;
}

/// Read access to registered connections.
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// Fetch a connection row by id, `None` if absent.
    async fn get(&self, id: Uuid) -> SibylResult<Option<Connection>>;
}

/// Durable session persistence.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a new session.
    async fn create(&self, session: &Session) -> SibylResult<()>;

    /// Fetch a session by id, `None` if absent.
    async fn get(&self, id: Uuid) -> SibylResult<Option<Session>>;

    /// Overwrite a session row.
    async fn update(&self, session: &Session) -> SibylResult<()>;

    /// Delete a session and its messages.
    async fn delete(&self, id: Uuid) -> SibylResult<()>;

    /// Sessions in a workspace, ordered by `updated_at` descending.
    async fn list_by_workspace(
        &self,
        workspace: Uuid,
        limit: usize,
        offset: usize,
    ) -> SibylResult<Vec<Session>>;
}

/// Durable message persistence.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert a message.
    async fn create(&self, message: &Message) -> SibylResult<()>;

    /// The trailing `limit` messages of a session, ascending by
    /// `created_at`.
    async fn list_by_session(&self, session: Uuid, limit: usize) -> SibylResult<Vec<Message>>;

    /// The most frequent user-question contents in a workspace by exact
    /// equality, descending count, at most `limit` entries.
    async fn most_frequent_questions(
        &self,
        workspace: Uuid,
        limit: usize,
    ) -> SibylResult<Vec<String>>;
}
