//! End-to-end pipeline scenarios against a mock adapter and a scripted
//! LLM provider.

use async_trait::async_trait;
use chrono::Utc;
use sibyl_adapters::{guard, AdapterRouter};
use sibyl_core::{
    ChatTurn, Connection, ConnectionConfig, DatabaseKind, ExecOptions, QueryRequest, QueryResult,
    Role, SqlGenRequest, SqlGenResponse, SslMode, TableInfo, DEFAULT_SESSION_TITLE,
};
use sibyl_error::SibylResult;
use sibyl_interface::{CredentialMap, DatabaseAdapter, LlmProvider, MessageStore, SessionStore};
use sibyl_llm::LlmRouter;
use sibyl_pipeline::{
    InMemoryConnectionStore, InMemoryMessageStore, InMemorySchemaCache, InMemorySessionStore,
    InMemoryUserPreferences, InMemoryWorkspaceAuthority, PipelineStores, PlainCredentialStore,
    QueryPipeline,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Adapter over a pretend `users(id int pk, email text)` table with a
/// configurable number of seeded rows.
#[derive(Debug)]
struct MockAdapter {
    seeded_rows: usize,
    introspections: Arc<AtomicUsize>,
    executed: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl DatabaseAdapter for MockAdapter {
    fn database_kind(&self) -> DatabaseKind {
        DatabaseKind::Postgres
    }

    fn dialect_hints(&self) -> &'static str {
        "PostgreSQL SQL dialect"
    }

    async fn connect(&self, _config: &ConnectionConfig) -> SibylResult<()> {
        Ok(())
    }

    async fn close(&self) -> SibylResult<()> {
        Ok(())
    }

    async fn health_check(&self) -> SibylResult<()> {
        Ok(())
    }

    async fn list_tables(&self) -> SibylResult<Vec<String>> {
        self.introspections.fetch_add(1, Ordering::SeqCst);
        Ok(vec!["users".into()])
    }

    async fn describe_table(&self, table: &str) -> SibylResult<TableInfo> {
        Ok(TableInfo {
            name: table.to_string(),
            schema_name: "public".into(),
            columns: vec![],
            row_count: Some(self.seeded_rows as i64),
        })
    }

    async fn schema_ddl(&self) -> SibylResult<String> {
        Ok("CREATE TABLE users (\n  id integer NOT NULL PRIMARY KEY,\n  email text\n);".into())
    }

    fn validate_query(&self, sql: &str) -> SibylResult<()> {
        guard::validate_sql(sql, Some(&guard::POSTGRES_BLOCKED))
    }

    async fn execute_query(&self, sql: &str, opts: ExecOptions) -> SibylResult<QueryResult> {
        self.validate_query(sql)?;
        self.executed.lock().unwrap().push(sql.to_string());

        if sql.to_uppercase().contains("COUNT") {
            return Ok(QueryResult {
                columns: vec!["count".into()],
                rows: vec![vec![serde_json::json!(self.seeded_rows)]],
                row_count: 1,
                truncated: false,
            });
        }

        let max = opts.max_rows as usize;
        let produced = self.seeded_rows.min(max);
        Ok(QueryResult {
            columns: vec!["id".into(), "email".into()],
            rows: (0..produced)
                .map(|i| vec![serde_json::json!(i), serde_json::json!(format!("u{i}@x.io"))])
                .collect(),
            row_count: produced,
            truncated: self.seeded_rows > max,
        })
    }
}

/// Provider that replies with a preset SQL string and records every
/// history window it is handed.
struct ScriptedProvider {
    tag: &'static str,
    configured: bool,
    sql: Mutex<String>,
    explanation: String,
    title: String,
    histories: Mutex<Vec<Vec<ChatTurn>>>,
}

impl ScriptedProvider {
    fn new(tag: &'static str, sql: &str) -> Self {
        Self {
            tag,
            configured: true,
            sql: Mutex::new(sql.to_string()),
            explanation: String::new(),
            title: "Counting Users".into(),
            histories: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn provider_tag(&self) -> &'static str {
        self.tag
    }

    fn available_models(&self) -> Vec<String> {
        vec!["scripted-1".into()]
    }

    fn default_model(&self) -> String {
        "scripted-1".into()
    }

    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn generate_sql(
        &self,
        request: &SqlGenRequest,
        model: &str,
    ) -> SibylResult<SqlGenResponse> {
        self.histories.lock().unwrap().push(request.history().clone());
        Ok(SqlGenResponse {
            sql: self.sql.lock().unwrap().clone(),
            explanation: self.explanation.clone(),
            model: model.to_string(),
            tokens_used: 42,
            latency_ms: 7,
        })
    }

    async fn generate_title(&self, _question: &str, _model: &str) -> SibylResult<String> {
        Ok(self.title.clone())
    }
}

struct Harness {
    pipeline: QueryPipeline,
    workspace: Uuid,
    user: Uuid,
    connection_id: Uuid,
    provider: Arc<ScriptedProvider>,
    authority: Arc<InMemoryWorkspaceAuthority>,
    introspections: Arc<AtomicUsize>,
    executed: Arc<Mutex<Vec<String>>>,
    messages: Arc<InMemoryMessageStore>,
    sessions: Arc<InMemorySessionStore>,
    preferences: Arc<InMemoryUserPreferences>,
}

async fn harness(seeded_rows: usize, max_rows: u32, sql: &str) -> Harness {
    let workspace = Uuid::new_v4();
    let user = Uuid::new_v4();

    let authority = Arc::new(InMemoryWorkspaceAuthority::new());
    authority.add_member(workspace, user).await;

    let connections = Arc::new(InMemoryConnectionStore::new());
    let connection = Connection {
        id: Uuid::new_v4(),
        workspace_id: workspace,
        name: "analytics".into(),
        kind: DatabaseKind::Postgres,
        host: "localhost".into(),
        port: 5432,
        database: "app".into(),
        username: "reader".into(),
        credentials_encrypted: b"secret".to_vec(),
        ssl_mode: SslMode::Disable,
        read_only: true,
        max_rows,
        timeout_seconds: 30,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    let connection_id = connection.id;
    connections.insert(connection).await;

    let introspections = Arc::new(AtomicUsize::new(0));
    let executed = Arc::new(Mutex::new(Vec::new()));
    let adapters = Arc::new(AdapterRouter::new());
    {
        let introspections = introspections.clone();
        let executed = executed.clone();
        adapters.register_factory(
            DatabaseKind::Postgres,
            Arc::new(move || {
                Arc::new(MockAdapter {
                    seeded_rows,
                    introspections: introspections.clone(),
                    executed: executed.clone(),
                }) as Arc<dyn DatabaseAdapter>
            }),
        );
    }

    let provider = Arc::new(ScriptedProvider::new("ollama", sql));
    let llm = Arc::new(LlmRouter::new("ollama"));
    llm.register_provider(provider.clone());

    let messages = Arc::new(InMemoryMessageStore::new());
    let sessions = Arc::new(InMemorySessionStore::new());
    let preferences = Arc::new(InMemoryUserPreferences::new());

    let stores = PipelineStores {
        authority: authority.clone(),
        credentials: Arc::new(PlainCredentialStore),
        preferences: preferences.clone(),
        connections,
        sessions: sessions.clone(),
        messages: messages.clone(),
    };

    let pipeline = QueryPipeline::new(
        stores,
        adapters,
        llm,
        Arc::new(InMemorySchemaCache::new()),
    );

    Harness {
        pipeline,
        workspace,
        user,
        connection_id,
        provider,
        authority,
        introspections,
        executed,
        messages,
        sessions,
        preferences,
    }
}

fn query(h: &Harness, execute: bool) -> QueryRequest {
    QueryRequest {
        connection_id: h.connection_id,
        question: "count users".into(),
        session_id: None,
        llm_provider: None,
        llm_model: None,
        execute,
        options: None,
    }
}

#[tokio::test]
async fn happy_path_counts_users() {
    let h = harness(3, 1000, "SELECT COUNT(*) FROM users LIMIT 1000").await;

    let response = h.pipeline.execute(h.user, h.workspace, query(&h, true)).await.unwrap();

    assert_eq!(response.sql, "SELECT COUNT(*) FROM users LIMIT 1000");
    let result = response.result.unwrap();
    assert_eq!(result.row_count, 1);
    assert_eq!(result.rows[0][0], serde_json::json!(3));
    assert!(!result.truncated);
    assert!(response.error.is_none());
    assert_eq!(response.metadata.llm_provider, "ollama");
    assert_eq!(response.metadata.tokens_used, 42);

    // Both sides of the exchange reached the history.
    let history = h
        .messages
        .list_by_session(response.session_id, 50)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[0].content, "count users");
    assert_eq!(history[1].role, Role::Assistant);
    assert_eq!(history[1].sql.as_deref(), Some("SELECT COUNT(*) FROM users LIMIT 1000"));
}

#[tokio::test]
async fn destructive_sql_is_blocked_not_executed() {
    let h = harness(3, 1000, "DROP TABLE users").await;

    let response = h.pipeline.execute(h.user, h.workspace, query(&h, true)).await.unwrap();

    assert_eq!(response.sql, "DROP TABLE users");
    assert!(response.result.is_none());
    assert!(response.error.unwrap().contains("blocked"));
    assert!(h.executed.lock().unwrap().is_empty(), "nothing must reach the database");
}

#[tokio::test]
async fn truncation_flags_row_cap() {
    let h = harness(500, 100, "SELECT * FROM users").await;

    let response = h.pipeline.execute(h.user, h.workspace, query(&h, true)).await.unwrap();

    let result = response.result.unwrap();
    assert_eq!(result.row_count, 100);
    assert!(result.truncated);
}

#[tokio::test]
async fn session_reuse_feeds_history_window() {
    let h = harness(3, 1000, "SELECT COUNT(*) FROM users").await;

    let first = h.pipeline.execute(h.user, h.workspace, query(&h, true)).await.unwrap();

    let mut second = query(&h, true);
    second.session_id = Some(first.session_id);
    second.question = "and with an email?".into();
    let second = h.pipeline.execute(h.user, h.workspace, second).await.unwrap();
    assert_eq!(second.session_id, first.session_id);

    let histories = h.provider.histories.lock().unwrap();
    assert_eq!(histories.len(), 2);
    // The second call's window holds both turns of the first exchange,
    // oldest first, plus the just-persisted second question.
    let window = &histories[1];
    assert!(window.len() >= 3);
    assert_eq!(window[0].role, Role::User);
    assert_eq!(window[0].content, "count users");
    assert_eq!(window[1].role, Role::Assistant);
    assert_eq!(window[1].sql.as_deref(), Some("SELECT COUNT(*) FROM users"));
}

#[tokio::test]
async fn per_user_credential_overrides_select_factory_instances() {
    let h = harness(3, 1000, "SELECT COUNT(*) FROM users").await;

    // "openai" exists as an unconfigured singleton plus a factory.
    let unconfigured = Arc::new(ScriptedProvider {
        configured: false,
        ..ScriptedProvider::new("openai", "SELECT 1")
    });
    h.pipeline.llm().register_provider(unconfigured);
    h.pipeline.llm().register_factory(
        "openai",
        Arc::new(|creds: &CredentialMap| {
            let marker = creds.get("api_key").cloned().unwrap_or_default();
            Arc::new(ScriptedProvider::new("openai", &format!("SELECT '{marker}'")))
                as Arc<dyn LlmProvider>
        }),
    );

    let mut request = query(&h, false);
    request.llm_provider = Some("openai".into());

    // User A carries no override and hits the unconfigured singleton.
    let err = h
        .pipeline
        .execute(h.user, h.workspace, request.clone())
        .await
        .unwrap_err();
    assert!(format!("{err}").contains("not configured"));

    // User B registered a key, so the factory path succeeds.
    let user_b = Uuid::new_v4();
    let authority_request = request.clone();
    h.preferences
        .set_overrides(user_b, "openai", {
            let mut m = CredentialMap::new();
            m.insert("api_key".into(), "sk-user-b".into());
            m
        })
        .await;
    h.authority.add_member(h.workspace, user_b).await;

    let response = h
        .pipeline
        .execute(user_b, h.workspace, authority_request)
        .await
        .unwrap();
    assert_eq!(response.sql, "SELECT 'sk-user-b'");

    // User A is still refused afterwards; the override is per user.
    let err = h.pipeline.execute(h.user, h.workspace, request).await.unwrap_err();
    assert!(format!("{err}").contains("not configured"));
}

#[tokio::test]
async fn schema_cache_spares_repeat_introspection() {
    let h = harness(3, 1000, "SELECT COUNT(*) FROM users").await;

    h.pipeline.get_schema(h.user, h.workspace, h.connection_id).await.unwrap();
    h.pipeline.get_schema(h.user, h.workspace, h.connection_id).await.unwrap();
    assert_eq!(h.introspections.load(Ordering::SeqCst), 1);

    h.pipeline.refresh_schema(h.user, h.workspace, h.connection_id).await.unwrap();
    assert_eq!(h.introspections.load(Ordering::SeqCst), 2);

    // A query right after uses the refreshed snapshot.
    h.pipeline.execute(h.user, h.workspace, query(&h, true)).await.unwrap();
    assert_eq!(h.introspections.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn generate_and_query_agree_on_sql() {
    let h = harness(3, 1000, "SELECT COUNT(*) FROM users").await;

    let executed = h.pipeline.execute(h.user, h.workspace, query(&h, true)).await.unwrap();
    let generated = h.pipeline.execute(h.user, h.workspace, query(&h, false)).await.unwrap();

    assert_eq!(executed.sql, generated.sql);
    assert!(executed.result.is_some());
    assert!(generated.result.is_none());
}

#[tokio::test]
async fn non_member_is_refused_without_side_effects() {
    let h = harness(3, 1000, "SELECT COUNT(*) FROM users").await;

    let outsider = Uuid::new_v4();
    let err = h.pipeline.execute(outsider, h.workspace, query(&h, true)).await.unwrap_err();
    assert!(format!("{err}").contains("access denied"));
    assert!(h.messages.is_empty().await);
}

#[tokio::test]
async fn new_session_title_reaches_refinement() {
    let h = harness(3, 1000, "SELECT COUNT(*) FROM users").await;

    let response = h.pipeline.execute(h.user, h.workspace, query(&h, true)).await.unwrap();

    // The provisional title lands synchronously; the refinement task
    // overwrites it shortly after.
    let mut refined = false;
    for _ in 0..50 {
        let session = h.sessions.get(response.session_id).await.unwrap().unwrap();
        assert_ne!(session.title, DEFAULT_SESSION_TITLE);
        if session.title == "Counting Users" {
            refined = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(refined, "title task never landed");
}

#[tokio::test]
async fn suggestions_rank_by_frequency() {
    let h = harness(3, 1000, "SELECT COUNT(*) FROM users").await;

    assert!(h
        .pipeline
        .suggested_questions(h.user, h.workspace)
        .await
        .unwrap()
        .is_empty());

    for question in ["top orders", "count users", "count users", "revenue", "count users", "revenue"] {
        let mut request = query(&h, false);
        request.question = question.into();
        h.pipeline.execute(h.user, h.workspace, request).await.unwrap();
    }

    let suggestions = h.pipeline.suggested_questions(h.user, h.workspace).await.unwrap();
    assert_eq!(suggestions[0], "count users");
    assert_eq!(suggestions[1], "revenue");
    assert!(suggestions.contains(&"top orders".to_string()));
}

#[tokio::test]
async fn session_lifecycle_round_trip() {
    let h = harness(3, 1000, "SELECT COUNT(*) FROM users").await;

    let session = h
        .pipeline
        .create_session(h.user, h.workspace, Some("Quarterly".into()))
        .await
        .unwrap();
    assert_eq!(session.title, "Quarterly");

    let default = h.pipeline.create_session(h.user, h.workspace, None).await.unwrap();
    assert_eq!(default.title, DEFAULT_SESSION_TITLE);

    let listed = h.pipeline.list_sessions(h.user, h.workspace, 10, 0).await.unwrap();
    assert_eq!(listed.len(), 2);

    h.pipeline.delete_session(h.user, h.workspace, session.id).await.unwrap();
    let listed = h.pipeline.list_sessions(h.user, h.workspace, 10, 0).await.unwrap();
    assert_eq!(listed.len(), 1);

    // Foreign-workspace access is refused.
    let err = h
        .pipeline
        .get_session(h.user, Uuid::new_v4(), default.id)
        .await
        .unwrap_err();
    assert!(format!("{err}").contains("access denied"));
}
