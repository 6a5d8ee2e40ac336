//! MongoDB adapter: queries are extended-JSON command documents.

use async_trait::async_trait;
use bson::{Bson, Document};
use mongodb::options::ClientOptions;
use mongodb::{Client, Database};
use serde_json::Value as JsonValue;
use sibyl_core::{
    ColumnInfo, ConnectionConfig, DatabaseKind, ExecOptions, QueryResult, TableInfo,
};
use sibyl_error::{
    AdapterError, AdapterErrorKind, GuardError, GuardErrorKind, SibylResult,
};
use sibyl_interface::DatabaseAdapter;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

/// Read-only commands the validator accepts as the document's first key.
const ALLOWED_COMMANDS: [&str; 9] = [
    "find",
    "aggregate",
    "count",
    "distinct",
    "listCollections",
    "buildInfo",
    "collStats",
    "dbStats",
    "ping",
];

static DIALECT_HINTS: &str = r#"MongoDB command documents:
- Queries are extended-JSON runCommand documents, not SQL
- The first key names the command: {"find": "users", "filter": {...}}
- Read commands only: find, aggregate, count, distinct, listCollections
- Aggregations may not write: no $out or $merge stages
- Cursor results come back one JSON document per row"#;

/// MongoDB back-end.
#[derive(Debug)]
pub struct MongoAdapter {
    state: Mutex<Option<MongoState>>,
}

#[derive(Clone, Debug)]
struct MongoState {
    client: Client,
    db: Database,
}

impl MongoAdapter {
    /// Creates a disconnected adapter.
    pub fn new() -> Self {
        Self { state: Mutex::new(None) }
    }

    async fn state(&self) -> SibylResult<MongoState> {
        self.state
            .lock()
            .await
            .clone()
            .ok_or_else(|| AdapterError::new(AdapterErrorKind::NotConnected).into())
    }
}

impl Default for MongoAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse and validate an extended-JSON command document.
///
/// The first key must be an allowlisted read-only command; `aggregate`
/// pipelines are walked rejecting `$out` and `$merge` stages. Only
/// top-level stages are checked; pipelines nested inside `$lookup` or
/// `$facet` are not traversed.
pub fn validate_command(raw: &str) -> SibylResult<Document> {
    let value: JsonValue = serde_json::from_str(raw.trim())
        .map_err(|e| GuardError::new(GuardErrorKind::InvalidCommand(e.to_string())))?;
    let map = match value {
        JsonValue::Object(map) => map,
        _ => {
            return Err(GuardError::new(GuardErrorKind::InvalidCommand(
                "expected a JSON object".into(),
            ))
            .into())
        }
    };

    let doc = Document::try_from(map)
        .map_err(|e| GuardError::new(GuardErrorKind::InvalidCommand(e.to_string())))?;

    let command = doc
        .keys()
        .next()
        .ok_or_else(|| GuardError::new(GuardErrorKind::InvalidCommand("empty command".into())))?
        .clone();

    if !ALLOWED_COMMANDS.contains(&command.as_str()) {
        return Err(GuardError::new(GuardErrorKind::CommandNotAllowed(command)).into());
    }

    if command == "aggregate"
        && let Ok(pipeline) = doc.get_array("pipeline")
    {
        for stage in pipeline {
            if let Bson::Document(stage) = stage {
                for key in stage.keys() {
                    if key == "$out" || key == "$merge" {
                        return Err(
                            GuardError::new(GuardErrorKind::StageNotAllowed(key.clone())).into()
                        );
                    }
                }
            }
        }
    }

    Ok(doc)
}

fn bson_to_json_string(value: &Bson) -> String {
    serde_json::to_string(&value.clone().into_relaxed_extjson()).unwrap_or_default()
}

#[async_trait]
impl DatabaseAdapter for MongoAdapter {
    fn database_kind(&self) -> DatabaseKind {
        DatabaseKind::MongoDb
    }

    fn dialect_hints(&self) -> &'static str {
        DIALECT_HINTS
    }

    #[instrument(skip_all, fields(host = %config.host(), database = %config.database()))]
    async fn connect(&self, config: &ConnectionConfig) -> SibylResult<()> {
        let uri = if config.username().is_empty() {
            format!("mongodb://{}:{}", config.host(), config.port())
        } else {
            format!(
                "mongodb://{}:{}@{}:{}",
                config.username(),
                config.password(),
                config.host(),
                config.port()
            )
        };

        let mut options = ClientOptions::parse(&uri)
            .await
            .map_err(|e| AdapterError::new(AdapterErrorKind::Connect(e.to_string())))?;
        options.connect_timeout = Some(std::time::Duration::from_secs(*config.timeout_seconds()));

        let client = Client::with_options(options)
            .map_err(|e| AdapterError::new(AdapterErrorKind::Connect(e.to_string())))?;
        let db = client.database(config.database());

        db.run_command(bson::doc! { "ping": 1 })
            .await
            .map_err(|e| AdapterError::new(AdapterErrorKind::Connect(e.to_string())))?;

        *self.state.lock().await = Some(MongoState { client, db });
        debug!("mongodb client established");
        Ok(())
    }

    async fn close(&self) -> SibylResult<()> {
        if let Some(state) = self.state.lock().await.take() {
            state.client.shutdown().await;
        }
        Ok(())
    }

    async fn health_check(&self) -> SibylResult<()> {
        let state = self.state().await?;
        state
            .db
            .run_command(bson::doc! { "ping": 1 })
            .await
            .map(|_| ())
            .map_err(|e| AdapterError::new(AdapterErrorKind::Query(e.to_string())).into())
    }

    async fn list_tables(&self) -> SibylResult<Vec<String>> {
        let state = self.state().await?;
        let mut names = state
            .db
            .list_collection_names()
            .await
            .map_err(|e| AdapterError::new(AdapterErrorKind::Introspection(e.to_string())))?;
        names.sort();
        Ok(names)
    }

    async fn describe_table(&self, table: &str) -> SibylResult<TableInfo> {
        // Collections carry no rigid schema; report the id plus a generic
        // document column.
        Ok(TableInfo {
            name: table.to_string(),
            schema_name: String::new(),
            columns: vec![
                ColumnInfo {
                    name: "_id".into(),
                    data_type: "ObjectId".into(),
                    nullable: false,
                    primary_key: true,
                    description: String::new(),
                },
                ColumnInfo {
                    name: "document".into(),
                    data_type: "JSON".into(),
                    nullable: false,
                    primary_key: false,
                    description: "Full document content".into(),
                },
            ],
            row_count: None,
        })
    }

    async fn schema_ddl(&self) -> SibylResult<String> {
        let collections = self.list_tables().await?;
        let state = self.state().await?;

        let schema = serde_json::json!({
            "database": state.db.name(),
            "collections": collections,
            "note": "NoSQL database - schema is flexible",
        });
        serde_json::to_string_pretty(&schema)
            .map_err(|e| AdapterError::new(AdapterErrorKind::Introspection(e.to_string())).into())
    }

    fn validate_query(&self, sql: &str) -> SibylResult<()> {
        validate_command(sql).map(|_| ())
    }

    #[instrument(skip(self, sql), fields(max_rows = opts.max_rows))]
    async fn execute_query(&self, sql: &str, opts: ExecOptions) -> SibylResult<QueryResult> {
        let command = validate_command(sql)?;
        let state = self.state().await?;

        let raw = match tokio::time::timeout(opts.timeout, state.db.run_command(command)).await {
            Ok(result) => {
                result.map_err(|e| AdapterError::new(AdapterErrorKind::Query(e.to_string())))?
            }
            Err(_) => {
                return Err(
                    AdapterError::new(AdapterErrorKind::Timeout(opts.timeout.as_secs())).into()
                )
            }
        };

        let max = opts.max_rows as usize;
        let mut rows: Vec<Vec<JsonValue>> = Vec::new();
        let mut truncated = false;
        let columns;

        // Cursor responses (find/aggregate) become one stringified JSON
        // document per row; anything else is a single-row wrapper.
        if let Ok(cursor) = raw.get_document("cursor") {
            columns = vec!["json_document".to_string()];
            if let Ok(batch) = cursor.get_array("firstBatch") {
                for doc in batch {
                    if rows.len() >= max {
                        truncated = true;
                        break;
                    }
                    rows.push(vec![JsonValue::String(bson_to_json_string(doc))]);
                }
            }
        } else {
            columns = vec!["result".to_string()];
            rows.push(vec![JsonValue::String(bson_to_json_string(&Bson::Document(
                raw,
            )))]);
        }

        Ok(QueryResult {
            row_count: rows.len(),
            columns,
            rows,
            truncated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_read_commands() {
        for raw in [
            r#"{"find": "users", "filter": {"active": true}}"#,
            r#"{"aggregate": "orders", "pipeline": [{"$match": {"total": {"$gt": 10}}}], "cursor": {}}"#,
            r#"{"count": "users"}"#,
            r#"{"distinct": "users", "key": "country"}"#,
            r#"{"listCollections": 1}"#,
            r#"{"ping": 1}"#,
        ] {
            assert!(validate_command(raw).is_ok(), "{raw}");
        }
    }

    #[test]
    fn rejects_write_commands() {
        for raw in [
            r#"{"insert": "users", "documents": []}"#,
            r#"{"update": "users", "updates": []}"#,
            r#"{"delete": "users", "deletes": []}"#,
            r#"{"drop": "users"}"#,
            r#"{"createIndexes": "users"}"#,
        ] {
            assert!(validate_command(raw).is_err(), "{raw}");
        }
    }

    #[test]
    fn rejects_out_and_merge_stages() {
        let out = r#"{"aggregate": "orders", "pipeline": [{"$match": {}}, {"$out": "evil"}]}"#;
        let merge = r#"{"aggregate": "orders", "pipeline": [{"$merge": {"into": "evil"}}]}"#;
        assert!(validate_command(out).is_err());
        assert!(validate_command(merge).is_err());
    }

    #[test]
    fn first_key_is_the_command() {
        // "filter" first means the command is "filter", which is not allowed.
        let raw = r#"{"filter": {}, "find": "users"}"#;
        assert!(validate_command(raw).is_err());
    }

    #[test]
    fn rejects_non_objects() {
        assert!(validate_command("SELECT 1").is_err());
        assert!(validate_command("[1, 2]").is_err());
        assert!(validate_command("{}").is_err());
    }
}
