//! The per-request orchestration from question to response.

use chrono::Utc;
use sibyl_adapters::AdapterRouter;
use sibyl_core::{
    ChatTurn, Connection, ExecOptions, Message, QueryMetadata, QueryRequest, QueryResponse,
    SchemaSnapshot, Session, SqlGenRequest, DEFAULT_SESSION_TITLE, MAX_QUESTION_CHARS,
};
use sibyl_error::{
    GatewayError, GatewayErrorKind, SibylError, SibylErrorKind, SibylResult,
};
use sibyl_interface::{
    ConnectionStore, CredentialStore, DatabaseAdapter, LlmProvider, MessageStore, SchemaCache,
    SessionStore, UserPreferences, WorkspaceAuthority,
};
use sibyl_llm::LlmRouter;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// How many trailing messages feed the prompt's conversation window.
const HISTORY_WINDOW: usize = 10;
/// How many messages a session history read returns.
const SESSION_HISTORY_LIMIT: usize = 50;
/// How many suggestions the frequency listing returns.
const SUGGESTION_LIMIT: usize = 5;
/// Deadline for the detached title-refinement task.
const TITLE_DEADLINE: Duration = Duration::from_secs(10);
/// Provisional titles truncate the question to this many characters.
const PROVISIONAL_TITLE_CHARS: usize = 30;

/// The external collaborators the pipeline consumes.
#[derive(Clone)]
pub struct PipelineStores {
    /// Workspace membership checks
    pub authority: Arc<dyn WorkspaceAuthority>,
    /// Credential decryption
    pub credentials: Arc<dyn CredentialStore>,
    /// Per-user LLM credential overrides
    pub preferences: Arc<dyn UserPreferences>,
    /// Registered connections
    pub connections: Arc<dyn ConnectionStore>,
    /// Durable sessions
    pub sessions: Arc<dyn SessionStore>,
    /// Durable messages
    pub messages: Arc<dyn MessageStore>,
}

/// The end-to-end query orchestrator.
pub struct QueryPipeline {
    stores: PipelineStores,
    adapters: Arc<AdapterRouter>,
    llm: Arc<LlmRouter>,
    schema_cache: Arc<dyn SchemaCache>,
}

impl QueryPipeline {
    /// Wires a pipeline from its collaborators.
    pub fn new(
        stores: PipelineStores,
        adapters: Arc<AdapterRouter>,
        llm: Arc<LlmRouter>,
        schema_cache: Arc<dyn SchemaCache>,
    ) -> Self {
        Self { stores, adapters, llm, schema_cache }
    }

    /// The adapter router, for shutdown handling.
    pub fn adapters(&self) -> &Arc<AdapterRouter> {
        &self.adapters
    }

    /// The LLM router, for provider listings.
    pub fn llm(&self) -> &Arc<LlmRouter> {
        &self.llm
    }

    /// Run the full pipeline for one query request.
    #[instrument(skip(self, request), fields(workspace = %workspace, user = %user))]
    pub async fn execute(
        &self,
        user: Uuid,
        workspace: Uuid,
        request: QueryRequest,
    ) -> SibylResult<QueryResponse> {
        let started = Instant::now();
        let request_id = Uuid::new_v4();

        // Admission: no side effects before the membership check passes.
        self.require_member(workspace, user).await?;
        validate_request(&request)?;

        // Session resolution; a fresh session triggers title refinement
        // at the end.
        let (session_id, is_new_session) = match request.session_id {
            Some(id) => (id, false),
            None => {
                let session = Session::new(workspace, Some(user), Utc::now());
                self.stores.sessions.create(&session).await?;
                (session.id, true)
            }
        };

        // The user's words are persisted before the model sees them; a
        // storage failure here is logged, not fatal.
        let user_msg = Message::user(workspace, session_id, user, &request.question, Utc::now());
        if let Err(e) = self.stores.messages.create(&user_msg).await {
            error!(error = %e, "failed to persist user message");
        }

        let history = match self
            .stores
            .messages
            .list_by_session(session_id, HISTORY_WINDOW)
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                warn!(error = %e, "failed to fetch history, continuing without");
                Vec::new()
            }
        };

        let connection = self.resolve_connection(workspace, request.connection_id).await?;
        let password = self.stores.credentials.password_for(&connection).await?;
        let config = connection.to_config(password);

        let adapter = self
            .adapters
            .get_adapter(connection.id, connection.kind, &config)
            .await?;

        let schema = self.schema_for(connection.id, adapter.as_ref()).await?;

        // Provider resolution: request tag, falling back to the process
        // default; per-user credentials switch to the factory path.
        let provider_tag = request.llm_provider.clone().unwrap_or_default();
        let provider_tag = if provider_tag.is_empty() {
            self.llm.default_provider().to_string()
        } else {
            provider_tag
        };
        let overrides = self
            .stores
            .preferences
            .provider_overrides(user, &provider_tag)
            .await?;
        let provider = self.llm.get(&provider_tag, overrides.as_ref())?;
        let model = match request.llm_model.as_deref() {
            Some(m) if !m.is_empty() => m.to_string(),
            _ => provider.default_model(),
        };

        let gen_request = SqlGenRequest::builder()
            .question(&request.question)
            .schema_ddl(&schema.ddl)
            .dialect_hints(adapter.dialect_hints())
            .database_kind(connection.kind)
            .history(history.iter().map(chat_turn).collect())
            .build();

        debug!(schema_ddl_len = schema.ddl.len(), provider = %provider_tag, model = %model, "dispatching SQL generation");
        let generated = provider.generate_sql(&gen_request, &model).await?;

        let mut response = QueryResponse {
            request_id,
            session_id,
            question: request.question.clone(),
            sql: generated.sql.clone(),
            explanation: generated.explanation.clone(),
            result: None,
            error: None,
            metadata: QueryMetadata {
                connection_id: connection.id,
                database_kind: connection.kind,
                llm_provider: provider_tag.clone(),
                llm_model: model.clone(),
                execution_time_ms: 0,
                llm_latency_ms: generated.latency_ms,
                tokens_used: generated.tokens_used,
            },
        };

        // Validate and execute; failures populate the error field and
        // never abort, so the exchange still reaches the history.
        if request.execute && !generated.sql.is_empty() {
            let opts = effective_options(&connection, &request);
            match adapter.validate_query(&generated.sql) {
                Ok(()) => match adapter.execute_query(&generated.sql, opts).await {
                    Ok(result) => response.result = Some(result),
                    Err(e) => response.error = Some(surface_error(&e)),
                },
                Err(e) => response.error = Some(surface_error(&e)),
            }
        }

        response.metadata.execution_time_ms = started.elapsed().as_millis() as i64;

        self.persist_assistant_reply(workspace, session_id, &request.question, &response)
            .await;

        if is_new_session {
            self.spawn_title_refinement(session_id, user, request.question.clone(), provider_tag, model);
        }

        Ok(response)
    }

    /// Return the cached or freshly introspected schema for a connection.
    #[instrument(skip(self), fields(workspace = %workspace))]
    pub async fn get_schema(
        &self,
        user: Uuid,
        workspace: Uuid,
        connection_id: Uuid,
    ) -> SibylResult<SchemaSnapshot> {
        self.require_member(workspace, user).await?;
        if let Some(snapshot) = self.schema_cache.get(connection_id).await? {
            return Ok(snapshot);
        }
        self.introspect(workspace, connection_id).await
    }

    /// Invalidate the cache entry and re-introspect.
    #[instrument(skip(self), fields(workspace = %workspace))]
    pub async fn refresh_schema(
        &self,
        user: Uuid,
        workspace: Uuid,
        connection_id: Uuid,
    ) -> SibylResult<SchemaSnapshot> {
        self.require_member(workspace, user).await?;
        self.schema_cache.invalidate(connection_id).await?;
        self.introspect(workspace, connection_id).await
    }

    /// Drop every cached schema snapshot. Returns how many were removed.
    pub async fn flush_schema_cache(&self) -> SibylResult<u64> {
        self.schema_cache.flush_all().await
    }

    /// Create a session with an explicit or default title.
    pub async fn create_session(
        &self,
        user: Uuid,
        workspace: Uuid,
        title: Option<String>,
    ) -> SibylResult<Session> {
        self.require_member(workspace, user).await?;
        let mut session = Session::new(workspace, Some(user), Utc::now());
        if let Some(title) = title.filter(|t| !t.is_empty()) {
            session.title = title;
        }
        self.stores.sessions.create(&session).await?;
        Ok(session)
    }

    /// Sessions in a workspace ordered by recency.
    pub async fn list_sessions(
        &self,
        user: Uuid,
        workspace: Uuid,
        limit: usize,
        offset: usize,
    ) -> SibylResult<Vec<Session>> {
        self.require_member(workspace, user).await?;
        self.stores.sessions.list_by_workspace(workspace, limit, offset).await
    }

    /// One session, confined to its workspace.
    pub async fn get_session(
        &self,
        user: Uuid,
        workspace: Uuid,
        session_id: Uuid,
    ) -> SibylResult<Session> {
        self.require_member(workspace, user).await?;
        let session = self
            .stores
            .sessions
            .get(session_id)
            .await?
            .ok_or_else(|| GatewayError::not_found("session"))?;
        if session.workspace_id != workspace {
            return Err(GatewayError::new(GatewayErrorKind::AccessDenied).into());
        }
        Ok(session)
    }

    /// Delete a session and its messages.
    pub async fn delete_session(
        &self,
        user: Uuid,
        workspace: Uuid,
        session_id: Uuid,
    ) -> SibylResult<()> {
        // The workspace check also rejects foreign-workspace ids.
        self.get_session(user, workspace, session_id).await?;
        self.stores.sessions.delete(session_id).await
    }

    /// Message history of one session, ascending.
    pub async fn session_history(
        &self,
        user: Uuid,
        workspace: Uuid,
        session_id: Uuid,
    ) -> SibylResult<Vec<Message>> {
        self.get_session(user, workspace, session_id).await?;
        self.stores
            .messages
            .list_by_session(session_id, SESSION_HISTORY_LIMIT)
            .await
    }

    /// The five most frequent prior questions in a workspace.
    pub async fn suggested_questions(
        &self,
        user: Uuid,
        workspace: Uuid,
    ) -> SibylResult<Vec<String>> {
        self.require_member(workspace, user).await?;
        self.stores
            .messages
            .most_frequent_questions(workspace, SUGGESTION_LIMIT)
            .await
    }

    async fn require_member(&self, workspace: Uuid, user: Uuid) -> SibylResult<()> {
        if self.stores.authority.is_member(workspace, user).await? {
            Ok(())
        } else {
            Err(GatewayError::new(GatewayErrorKind::AccessDenied).into())
        }
    }

    async fn resolve_connection(
        &self,
        workspace: Uuid,
        connection_id: Uuid,
    ) -> SibylResult<Connection> {
        let connection = self
            .stores
            .connections
            .get(connection_id)
            .await?
            .ok_or_else(|| GatewayError::not_found("connection"))?;
        if connection.workspace_id != workspace {
            return Err(GatewayError::new(GatewayErrorKind::AccessDenied).into());
        }
        Ok(connection)
    }

    async fn introspect(&self, workspace: Uuid, connection_id: Uuid) -> SibylResult<SchemaSnapshot> {
        let connection = self.resolve_connection(workspace, connection_id).await?;
        let password = self.stores.credentials.password_for(&connection).await?;
        let config = connection.to_config(password);
        let adapter = self
            .adapters
            .get_adapter(connection.id, connection.kind, &config)
            .await?;
        self.schema_for_uncached(connection.id, adapter.as_ref()).await
    }

    async fn schema_for(
        &self,
        connection_id: Uuid,
        adapter: &dyn DatabaseAdapter,
    ) -> SibylResult<SchemaSnapshot> {
        if let Some(snapshot) = self.schema_cache.get(connection_id).await? {
            return Ok(snapshot);
        }
        self.schema_for_uncached(connection_id, adapter).await
    }

    async fn schema_for_uncached(
        &self,
        connection_id: Uuid,
        adapter: &dyn DatabaseAdapter,
    ) -> SibylResult<SchemaSnapshot> {
        let tables = adapter.list_tables().await?;
        let mut infos = Vec::with_capacity(tables.len());
        for table in &tables {
            match adapter.describe_table(table).await {
                Ok(info) => infos.push(info),
                Err(e) => {
                    // Tables that refuse to describe are skipped, not fatal.
                    warn!(table = %table, error = %e, "skipping undescribable table");
                }
            }
        }
        let ddl = adapter.schema_ddl().await?;

        let snapshot = SchemaSnapshot {
            kind: adapter.database_kind(),
            tables: infos,
            ddl,
            cached_at: Utc::now(),
        };
        self.schema_cache.set(connection_id, &snapshot).await?;
        Ok(snapshot)
    }

    /// Stage 10: record the assistant's side and touch the session.
    async fn persist_assistant_reply(
        &self,
        workspace: Uuid,
        session_id: Uuid,
        question: &str,
        response: &QueryResponse,
    ) {
        let content = if !response.explanation.is_empty() {
            response.explanation.clone()
        } else if let Some(error) = &response.error {
            format!("I encountered an error: {error}")
        } else {
            "Here is the result of your query:".to_string()
        };

        let mut message = Message::assistant(workspace, session_id, content, Utc::now());
        message.sql = Some(response.sql.clone());
        message.result = response
            .result
            .as_ref()
            .and_then(|r| serde_json::to_value(r).ok());
        message.metadata = serde_json::to_value(&response.metadata).ok();

        if let Err(e) = self.stores.messages.create(&message).await {
            error!(error = %e, "failed to persist assistant message");
        }

        match self.stores.sessions.get(session_id).await {
            Ok(Some(mut session)) => {
                session.updated_at = Utc::now();
                if session.title == DEFAULT_SESSION_TITLE {
                    session.title = provisional_title(question);
                }
                if let Err(e) = self.stores.sessions.update(&session).await {
                    error!(error = %e, "failed to touch session");
                }
            }
            Ok(None) => warn!(session = %session_id, "session disappeared before touch"),
            Err(e) => error!(error = %e, "failed to load session for touch"),
        }
    }

    /// Stage 11: fire-and-forget title refinement with its own deadline.
    /// Runs detached from the caller and is never cancelled by it.
    fn spawn_title_refinement(
        &self,
        session_id: Uuid,
        user: Uuid,
        question: String,
        provider_tag: String,
        model: String,
    ) {
        let llm = self.llm.clone();
        let preferences = self.stores.preferences.clone();
        let sessions = self.stores.sessions.clone();

        tokio::spawn(async move {
            let overrides = match preferences.provider_overrides(user, &provider_tag).await {
                Ok(overrides) => overrides,
                Err(e) => {
                    warn!(error = %e, "title task: preference lookup failed");
                    None
                }
            };

            let provider: Arc<dyn LlmProvider> = match llm.get(&provider_tag, overrides.as_ref()) {
                Ok(provider) => provider,
                Err(e) => {
                    warn!(error = %e, provider = %provider_tag, "title task: provider unavailable");
                    return;
                }
            };

            let title =
                match tokio::time::timeout(TITLE_DEADLINE, provider.generate_title(&question, &model))
                    .await
                {
                    Ok(Ok(title)) => title,
                    Ok(Err(e)) => {
                        warn!(error = %e, "title task: generation failed");
                        return;
                    }
                    Err(_) => {
                        warn!("title task: deadline expired");
                        return;
                    }
                };

            match sessions.get(session_id).await {
                Ok(Some(mut session)) => {
                    session.title = title.clone();
                    session.updated_at = Utc::now();
                    if let Err(e) = sessions.update(&session).await {
                        warn!(error = %e, "title task: session update failed");
                    } else {
                        info!(session = %session_id, title = %title, "session title refined");
                    }
                }
                Ok(None) => warn!(session = %session_id, "title task: session gone"),
                Err(e) => warn!(error = %e, "title task: session fetch failed"),
            }
        });
    }
}

fn validate_request(request: &QueryRequest) -> SibylResult<()> {
    if request.question.trim().is_empty() {
        return Err(GatewayError::invalid("question must not be empty").into());
    }
    if request.question.chars().count() > MAX_QUESTION_CHARS {
        return Err(GatewayError::invalid(format!(
            "question exceeds {MAX_QUESTION_CHARS} characters"
        ))
        .into());
    }
    if let Some(options) = &request.options {
        if let Some(max_rows) = options.max_rows
            && !(1..=10_000).contains(&max_rows)
        {
            return Err(GatewayError::invalid("max_rows must be within 1..=10000").into());
        }
        if let Some(timeout) = options.timeout_seconds
            && !(1..=300).contains(&timeout)
        {
            return Err(GatewayError::invalid("timeout_seconds must be within 1..=300").into());
        }
    }
    Ok(())
}

/// Per-request overrides clamp to the connection-level ceilings.
fn effective_options(connection: &Connection, request: &QueryRequest) -> ExecOptions {
    let mut max_rows = connection.max_rows;
    let mut timeout_seconds = connection.timeout_seconds;
    if let Some(options) = &request.options {
        if let Some(rows) = options.max_rows {
            max_rows = max_rows.min(rows);
        }
        if let Some(timeout) = options.timeout_seconds {
            timeout_seconds = timeout_seconds.min(timeout);
        }
    }
    ExecOptions {
        max_rows,
        timeout: Duration::from_secs(timeout_seconds),
    }
}

fn chat_turn(message: &Message) -> ChatTurn {
    ChatTurn {
        role: message.role,
        content: message.content.clone(),
        sql: message.sql.clone().filter(|s| !s.is_empty()),
    }
}

fn provisional_title(question: &str) -> String {
    if question.chars().count() > PROVISIONAL_TITLE_CHARS {
        let truncated: String = question.chars().take(PROVISIONAL_TITLE_CHARS).collect();
        format!("{truncated}...")
    } else {
        question.to_string()
    }
}

/// The clean reason carried into the response `error` field, stripped of
/// source-location noise.
fn surface_error(error: &SibylError) -> String {
    match error.kind() {
        SibylErrorKind::Guard(guard) => guard.reason(),
        SibylErrorKind::Adapter(adapter) => adapter.reason(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sibyl_core::{DatabaseKind, QueryOptions, SslMode};

    fn connection() -> Connection {
        Connection {
            id: Uuid::new_v4(),
            workspace_id: Uuid::new_v4(),
            name: "test".into(),
            kind: DatabaseKind::Postgres,
            host: "localhost".into(),
            port: 5432,
            database: "db".into(),
            username: "u".into(),
            credentials_encrypted: b"pw".to_vec(),
            ssl_mode: SslMode::Disable,
            read_only: true,
            max_rows: 1000,
            timeout_seconds: 30,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn request(options: Option<QueryOptions>) -> QueryRequest {
        QueryRequest {
            connection_id: Uuid::new_v4(),
            question: "count users".into(),
            session_id: None,
            llm_provider: None,
            llm_model: None,
            execute: true,
            options,
        }
    }

    #[test]
    fn options_clamp_to_connection_limits() {
        let conn = connection();

        let opts = effective_options(&conn, &request(None));
        assert_eq!(opts.max_rows, 1000);
        assert_eq!(opts.timeout, Duration::from_secs(30));

        let opts = effective_options(
            &conn,
            &request(Some(QueryOptions { max_rows: Some(50), timeout_seconds: Some(5) })),
        );
        assert_eq!(opts.max_rows, 50);
        assert_eq!(opts.timeout, Duration::from_secs(5));

        // Overrides above the connection ceiling clamp down.
        let opts = effective_options(
            &conn,
            &request(Some(QueryOptions { max_rows: Some(9999), timeout_seconds: Some(300) })),
        );
        assert_eq!(opts.max_rows, 1000);
        assert_eq!(opts.timeout, Duration::from_secs(30));
    }

    #[test]
    fn provisional_title_truncates_long_questions() {
        assert_eq!(provisional_title("short"), "short");
        let long = "a".repeat(45);
        let title = provisional_title(&long);
        assert_eq!(title.chars().count(), PROVISIONAL_TITLE_CHARS + 3);
        assert!(title.ends_with("..."));
    }

    #[test]
    fn request_validation_bounds() {
        assert!(validate_request(&request(None)).is_ok());

        let mut bad = request(None);
        bad.question = "  ".into();
        assert!(validate_request(&bad).is_err());

        let mut bad = request(None);
        bad.question = "q".repeat(MAX_QUESTION_CHARS + 1);
        assert!(validate_request(&bad).is_err());

        let bad = request(Some(QueryOptions { max_rows: Some(0), timeout_seconds: None }));
        assert!(validate_request(&bad).is_err());

        let bad = request(Some(QueryOptions { max_rows: None, timeout_seconds: Some(301) }));
        assert!(validate_request(&bad).is_err());
    }
}
