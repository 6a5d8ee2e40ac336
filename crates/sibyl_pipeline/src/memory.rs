//! In-memory implementations of the collaborator traits.
//!
//! HashMap-backed stores behind `tokio::sync::RwLock`, for tests and
//! single-process deployments. All data is lost when the store is dropped.

use async_trait::async_trait;
use sibyl_core::{Connection, Message, Role, Session};
use sibyl_error::{SibylResult, StoreError};
use sibyl_interface::{
    ConnectionStore, CredentialMap, CredentialStore, MessageStore, SessionStore, UserPreferences,
    WorkspaceAuthority,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Workspace authority backed by an explicit membership set.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWorkspaceAuthority {
    members: Arc<RwLock<Vec<(Uuid, Uuid)>>>,
}

impl InMemoryWorkspaceAuthority {
    /// Creates an authority with no members.
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants `user` membership in `workspace`.
    pub async fn add_member(&self, workspace: Uuid, user: Uuid) {
        self.members.write().await.push((workspace, user));
    }
}

#[async_trait]
impl WorkspaceAuthority for InMemoryWorkspaceAuthority {
    async fn is_member(&self, workspace: Uuid, user: Uuid) -> SibylResult<bool> {
        Ok(self.members.read().await.contains(&(workspace, user)))
    }
}

/// Credential store that decodes the encrypted blob as UTF-8.
///
/// Stands in for the real decrypting store; the pipeline only sees the
/// trait.
#[derive(Debug, Clone, Default)]
pub struct PlainCredentialStore;

#[async_trait]
impl CredentialStore for PlainCredentialStore {
    async fn password_for(&self, connection: &Connection) -> SibylResult<String> {
        Ok(String::from_utf8_lossy(&connection.credentials_encrypted).into_owned())
    }
}

/// Per-user provider overrides held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryUserPreferences {
    overrides: Arc<RwLock<HashMap<(Uuid, String), CredentialMap>>>,
}

impl InMemoryUserPreferences {
    /// Creates an empty preferences store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records credential overrides for one user and provider.
    pub async fn set_overrides(&self, user: Uuid, provider: &str, creds: CredentialMap) {
        self.overrides
            .write()
            .await
            .insert((user, provider.to_string()), creds);
    }
}

#[async_trait]
impl UserPreferences for InMemoryUserPreferences {
    async fn provider_overrides(
        &self,
        user: Uuid,
        provider: &str,
    ) -> SibylResult<Option<CredentialMap>> {
        Ok(self
            .overrides
            .read()
            .await
            .get(&(user, provider.to_string()))
            .cloned())
    }
}

/// Connection rows held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryConnectionStore {
    connections: Arc<RwLock<HashMap<Uuid, Connection>>>,
}

impl InMemoryConnectionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection row.
    pub async fn insert(&self, connection: Connection) {
        self.connections.write().await.insert(connection.id, connection);
    }

    /// Removes a connection row.
    pub async fn remove(&self, id: Uuid) {
        self.connections.write().await.remove(&id);
    }
}

#[async_trait]
impl ConnectionStore for InMemoryConnectionStore {
    async fn get(&self, id: Uuid) -> SibylResult<Option<Connection>> {
        Ok(self.connections.read().await.get(&id).cloned())
    }
}

/// Sessions held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, Session>>>,
}

impl InMemorySessionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, session: &Session) -> SibylResult<()> {
        self.sessions.write().await.insert(session.id, session.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> SibylResult<Option<Session>> {
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn update(&self, session: &Session) -> SibylResult<()> {
        let mut sessions = self.sessions.write().await;
        if !sessions.contains_key(&session.id) {
            return Err(StoreError::not_found("session").into());
        }
        sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> SibylResult<()> {
        self.sessions.write().await.remove(&id);
        Ok(())
    }

    async fn list_by_workspace(
        &self,
        workspace: Uuid,
        limit: usize,
        offset: usize,
    ) -> SibylResult<Vec<Session>> {
        let sessions = self.sessions.read().await;
        let mut rows: Vec<Session> = sessions
            .values()
            .filter(|s| s.workspace_id == workspace)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }
}

/// Messages held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMessageStore {
    messages: Arc<RwLock<Vec<Message>>>,
}

impl InMemoryMessageStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored messages, for assertions.
    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn create(&self, message: &Message) -> SibylResult<()> {
        self.messages.write().await.push(message.clone());
        Ok(())
    }

    async fn list_by_session(&self, session: Uuid, limit: usize) -> SibylResult<Vec<Message>> {
        let messages = self.messages.read().await;
        let mut rows: Vec<Message> = messages
            .iter()
            .filter(|m| m.session_id == session)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        // Trailing window, still ascending.
        if rows.len() > limit {
            rows = rows.split_off(rows.len() - limit);
        }
        Ok(rows)
    }

    async fn most_frequent_questions(
        &self,
        workspace: Uuid,
        limit: usize,
    ) -> SibylResult<Vec<String>> {
        let messages = self.messages.read().await;
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for message in messages
            .iter()
            .filter(|m| m.workspace_id == workspace && m.role == Role::User)
        {
            *counts.entry(message.content.as_str()).or_default() += 1;
        }

        let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        Ok(ranked
            .into_iter()
            .take(limit)
            .map(|(question, _)| question.to_string())
            .collect())
    }
}
