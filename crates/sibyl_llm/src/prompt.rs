//! Prompt assembly and SQL extraction, shared by every provider.

use sibyl_core::{Role, SqlGenRequest};
use std::fmt::Write as _;

/// Build the single prompt string handed to the model.
///
/// Layout: dialect header, the adapter's hints block verbatim, the rule
/// list, optional few-shot examples, the trailing conversation window as
/// `User:` / `Assistant:` lines, and the current question.
pub fn build_prompt(req: &SqlGenRequest) -> String {
    let mut prompt = format!(
        "You are an expert SQL query generator for {} databases.\n\n{}\n\n",
        req.database_kind(),
        req.dialect_hints(),
    );

    prompt.push_str(
        "Rules:\n\
         1. Generate a single SELECT statement only (no INSERT, UPDATE, DELETE, DROP, etc.)\n\
         2. Always include an appropriate LIMIT clause for safety\n\
         3. Use only tables and columns from the provided schema\n\
         4. Prefer explicit column names over SELECT *\n\
         5. Handle NULL values appropriately\n\
         6. Use proper date/time functions for the database dialect\n\
         7. If the question is conversational rather than a data request, reply in plain prose instead of SQL\n\
         8. When producing SQL, wrap it in a fenced code block tagged sql\n\n",
    );

    let _ = write!(prompt, "Database Schema:\n{}\n", req.schema_ddl());

    if !req.examples().is_empty() {
        prompt.push_str("\nExamples:\n");
        for ex in req.examples() {
            let _ = write!(prompt, "Question: {}\nSQL: {}\n\n", ex.question, ex.sql);
        }
    }

    if !req.history().is_empty() {
        prompt.push_str("\nConversation so far:\n");
        for turn in req.history() {
            match turn.role {
                Role::User => {
                    let _ = writeln!(prompt, "User: {}", turn.content);
                }
                Role::Assistant => {
                    let _ = writeln!(prompt, "Assistant: {}", turn.content);
                    if let Some(sql) = turn.sql.as_deref()
                        && !sql.is_empty()
                    {
                        let _ = writeln!(prompt, "```sql\n{sql}\n```");
                    }
                }
            }
        }
    }

    let _ = write!(prompt, "\nQuestion: {}\n\nSQL:", req.question());
    prompt
}

/// Extract SQL from raw model output.
///
/// Applied in order, first non-empty wins: strip `<think>` spans, a fenced
/// block tagged `sql`, any fenced block, the first `SELECT` up to the next
/// blank line, or the trimmed text when it already starts with a query
/// keyword. Trailing semicolons are stripped.
pub fn extract_sql(content: &str) -> String {
    let content = strip_think_tags(content);

    if let Some(sql) = extract_code_block(&content, "```sql") {
        return trim_sql(&sql);
    }
    if let Some(sql) = extract_code_block(&content, "```") {
        return trim_sql(&sql);
    }
    if let Some(sql) = extract_select_statement(&content) {
        return trim_sql(&sql);
    }

    let trimmed = content.trim();
    let upper = trimmed.to_uppercase();
    const LEADING_KEYWORDS: [&str; 6] = ["SELECT", "WITH", "VALUES", "SHOW", "DESCRIBE", "EXPLAIN"];
    if LEADING_KEYWORDS.iter().any(|kw| upper.starts_with(kw)) {
        return trim_sql(trimmed);
    }

    String::new()
}

/// Remove `<think>...</think>` spans emitted by some models as internal
/// reasoning. An unterminated `<think>` truncates the rest. Idempotent.
pub fn strip_think_tags(content: &str) -> String {
    const OPEN: &str = "<think>";
    const CLOSE: &str = "</think>";

    let mut content = content.to_string();
    while let Some(start) = content.find(OPEN) {
        match content.find(CLOSE) {
            Some(end) => {
                content = format!("{}{}", &content[..start], &content[end + CLOSE.len()..]);
            }
            None => {
                content.truncate(start);
                break;
            }
        }
    }
    content.trim().to_string()
}

fn extract_code_block(content: &str, open_marker: &str) -> Option<String> {
    let start = content.find(open_marker)?;
    let mut body_start = start + open_marker.len();
    if content[body_start..].starts_with('\n') {
        body_start += 1;
    }
    let end = content[body_start..].find("```")?;
    Some(content[body_start..body_start + end].to_string())
}

fn extract_select_statement(content: &str) -> Option<String> {
    let upper = content.to_uppercase();
    let start = upper.find("SELECT")?;
    let sql = &content[start..];
    let sql = match sql.find("\n\n") {
        Some(end) => &sql[..end],
        None => sql,
    };
    Some(sql.to_string())
}

fn trim_sql(sql: &str) -> String {
    sql.trim().trim_end_matches(';').trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sibyl_core::{ChatTurn, DatabaseKind, PromptExample, Role, SqlGenRequest};

    fn request() -> SqlGenRequest {
        SqlGenRequest::builder()
            .question("Show me all active users")
            .schema_ddl("CREATE TABLE users (id INT, name VARCHAR, active BOOLEAN);")
            .dialect_hints("PostgreSQL SQL dialect with ILIKE, LIMIT/OFFSET")
            .database_kind(DatabaseKind::Postgres)
            .build()
    }

    #[test]
    fn prompt_contains_key_elements() {
        let prompt = build_prompt(&request());
        for expected in [
            "postgres",
            "Show me all active users",
            "CREATE TABLE users",
            "SELECT statement",
            "LIMIT",
        ] {
            assert!(prompt.contains(expected), "prompt should contain {expected:?}");
        }
    }

    #[test]
    fn prompt_includes_examples() {
        let req = SqlGenRequest::builder()
            .question("Count users by status")
            .schema_ddl("CREATE TABLE users (id INT, status VARCHAR);")
            .database_kind(DatabaseKind::Postgres)
            .examples(vec![
                PromptExample {
                    question: "Get all users".into(),
                    sql: "SELECT * FROM users".into(),
                },
                PromptExample {
                    question: "Count total users".into(),
                    sql: "SELECT COUNT(*) FROM users".into(),
                },
            ])
            .build();

        let prompt = build_prompt(&req);
        for expected in [
            "Get all users",
            "SELECT * FROM users",
            "Count total users",
            "SELECT COUNT(*) FROM users",
        ] {
            assert!(prompt.contains(expected), "prompt should contain {expected:?}");
        }
    }

    #[test]
    fn prompt_renders_history_with_fenced_sql() {
        let req = SqlGenRequest::builder()
            .question("And yesterday?")
            .schema_ddl("CREATE TABLE visits (day DATE);")
            .database_kind(DatabaseKind::Postgres)
            .history(vec![
                ChatTurn {
                    role: Role::User,
                    content: "How many visits today?".into(),
                    sql: None,
                },
                ChatTurn {
                    role: Role::Assistant,
                    content: "Here is the result of your query:".into(),
                    sql: Some("SELECT COUNT(*) FROM visits WHERE day = CURRENT_DATE".into()),
                },
            ])
            .build();

        let prompt = build_prompt(&req);
        assert!(prompt.contains("User: How many visits today?"));
        assert!(prompt.contains("Assistant: Here is the result"));
        assert!(prompt.contains("```sql\nSELECT COUNT(*) FROM visits"));
    }

    #[test]
    fn extract_sql_cases() {
        let cases = [
            ("plain sql", "SELECT * FROM users", "SELECT * FROM users"),
            ("trailing semicolon", "SELECT * FROM users;", "SELECT * FROM users"),
            (
                "sql code block",
                "```sql\nSELECT * FROM users\n```",
                "SELECT * FROM users",
            ),
            (
                "generic code block",
                "```\nSELECT * FROM users\n```",
                "SELECT * FROM users",
            ),
            (
                "explanation before block",
                "Here is the query:\n```sql\nSELECT * FROM users\n```",
                "SELECT * FROM users",
            ),
            ("surrounding whitespace", "  SELECT * FROM users  ", "SELECT * FROM users"),
            (
                "select buried in prose",
                "Sure thing.\n\nSELECT id FROM users WHERE active\n\nLet me know!",
                "SELECT id FROM users WHERE active",
            ),
            ("show statement", "SHOW TABLES", "SHOW TABLES"),
            ("conversational reply", "Hello! How can I help you today?", ""),
        ];

        for (name, content, expected) in cases {
            assert_eq!(extract_sql(content), expected, "{name}");
        }
    }

    #[test]
    fn extract_sql_complex_block_preserved() {
        let content = "```sql\nSELECT u.id, COUNT(o.id) as order_count\nFROM users u\n\
                       LEFT JOIN orders o ON u.id = o.user_id\nGROUP BY u.id\n\
                       ORDER BY order_count DESC\nLIMIT 10\n```";
        let sql = extract_sql(content);
        assert!(sql.starts_with("SELECT u.id"));
        assert!(sql.ends_with("LIMIT 10"));
    }

    #[test]
    fn think_tags_are_stripped_and_idempotent() {
        let content = "<think>I should count the rows.</think>\n```sql\nSELECT COUNT(*) FROM t\n```";
        let once = strip_think_tags(content);
        assert!(!once.contains("<think>"));
        assert_eq!(strip_think_tags(&once), once);
        assert_eq!(extract_sql(content), "SELECT COUNT(*) FROM t");
    }

    #[test]
    fn unterminated_think_truncates_remainder() {
        let content = "SELECT 1\n<think>this never closes";
        assert_eq!(strip_think_tags(content), "SELECT 1");
    }

    #[test]
    fn verbatim_select_preserved_modulo_semicolon() {
        let raw = "SELECT name FROM users ORDER BY name;";
        assert_eq!(extract_sql(raw), "SELECT name FROM users ORDER BY name");
    }
}
