//! SQL safety rules: the sole gate between LLM output and a database.
//!
//! Matching is syntactic and intentionally over-rejects; a harmless
//! column named `drop_date` inside a string literal may be refused. The
//! pipeline degrades gracefully by reporting the rejection, and the
//! caller can rephrase.

use regex::Regex;
use sibyl_error::{GuardError, GuardErrorKind, SibylResult};
use std::sync::LazyLock;

static BLOCKED_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?i)\bINSERT\b",
        r"(?i)\bUPDATE\b",
        r"(?i)\bDELETE\b",
        r"(?i)\bDROP\b",
        r"(?i)\bTRUNCATE\b",
        r"(?i)\bALTER\b",
        r"(?i)\bCREATE\b",
        r"(?i)\bGRANT\b",
        r"(?i)\bREVOKE\b",
        r"(?i)\bEXEC\b",
        r"(?i)\bEXECUTE\b",
        r"(?i)\bINTO\s+OUTFILE\b",
        r"(?i)\bINTO\s+DUMPFILE\b",
        r"(?i)\bLOAD_FILE\b",
        r"(?i)\bLOAD\s+DATA\b",
    ])
});

/// PostgreSQL-specific blocked patterns.
pub static POSTGRES_BLOCKED: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?i)pg_read_file",
        r"(?i)pg_write_file",
        r"(?i)pg_ls_dir",
        r"(?i)lo_import",
        r"(?i)lo_export",
        r"(?i)\bCOPY\b",
        r"(?i)dblink",
    ])
});

/// ClickHouse-specific blocked patterns (table functions reaching outside
/// the database).
pub static CLICKHOUSE_BLOCKED: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?i)\bfile\s*\(",
        r"(?i)\burl\s*\(",
        r"(?i)\bremote\s*\(",
        r"(?i)\bmysql\s*\(",
        r"(?i)\bpostgresql\s*\(",
    ])
});

/// MySQL-specific blocked patterns.
pub static MYSQL_BLOCKED: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[r"(?i)LOAD_FILE", r"(?i)INTO\s+OUTFILE", r"(?i)INTO\s+DUMPFILE"])
});

/// SQLite-specific blocked patterns.
pub static SQLITE_BLOCKED: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[r"(?i)\bATTACH\b", r"(?i)\bDETACH\b", r"(?i)load_extension"])
});

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("static pattern compiles"))
        .collect()
}

/// Validate that a SQL string is safe to execute.
///
/// Rules applied in order, first failure wins: non-empty, single
/// statement, starts with SELECT or WITH, no generic blocked construct,
/// no dialect-specific blocked pattern.
pub fn validate_sql(sql: &str, extra_patterns: Option<&[Regex]>) -> SibylResult<()> {
    let sql = sql.trim();
    if sql.is_empty() {
        return Err(GuardError::new(GuardErrorKind::Empty).into());
    }

    if sql.matches(';').count() > 1 {
        return Err(GuardError::new(GuardErrorKind::MultipleStatements).into());
    }

    let normalized = sql.to_uppercase();
    if !normalized.starts_with("SELECT") && !normalized.starts_with("WITH") {
        return Err(GuardError::new(GuardErrorKind::NotReadOnly).into());
    }

    for pattern in BLOCKED_PATTERNS.iter() {
        if pattern.is_match(sql) {
            return Err(
                GuardError::new(GuardErrorKind::BlockedPattern(pattern.to_string())).into(),
            );
        }
    }

    if let Some(patterns) = extra_patterns {
        for pattern in patterns {
            if pattern.is_match(sql) {
                return Err(
                    GuardError::new(GuardErrorKind::BlockedPattern(pattern.to_string())).into(),
                );
            }
        }
    }

    Ok(())
}

/// Ensure the query carries a LIMIT clause.
///
/// An existing LIMIT is honored as-is (the adapter still truncates during
/// row collection). Otherwise the trailing semicolon is stripped and
/// ` LIMIT <max_rows>` appended. Applying this twice yields the same
/// string as applying it once.
pub fn enforce_limit(sql: &str, max_rows: u32, keyword: &str) -> String {
    if sql.to_uppercase().contains("LIMIT") {
        return sql.to_string();
    }

    let sql = sql.trim().trim_end_matches(';');
    format!("{sql} {keyword} {max_rows}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_generic_rules() {
        let cases: &[(&str, &str, bool)] = &[
            // valid SELECT queries
            ("simple select", "SELECT * FROM users", false),
            ("select with where", "SELECT id FROM users WHERE active = true", false),
            (
                "select with join",
                "SELECT u.id FROM users u JOIN orders o ON u.id = o.user_id",
                false,
            ),
            ("cte", "WITH cte AS (SELECT * FROM users) SELECT * FROM cte", false),
            (
                "subquery",
                "SELECT * FROM users WHERE id IN (SELECT user_id FROM orders)",
                false,
            ),
            ("single trailing semicolon", "SELECT 1;", false),
            // invalid: empty
            ("empty", "", true),
            ("whitespace", "   ", true),
            // invalid: not SELECT
            ("insert", "INSERT INTO users VALUES (1)", true),
            ("update", "UPDATE users SET name = 'x'", true),
            ("delete", "DELETE FROM users", true),
            ("drop", "DROP TABLE users", true),
            ("truncate", "TRUNCATE users", true),
            ("alter", "ALTER TABLE users ADD col INT", true),
            ("create", "CREATE TABLE t (id INT)", true),
            ("grant", "GRANT SELECT ON users TO x", true),
            ("revoke", "REVOKE SELECT ON users FROM x", true),
            ("exec", "EXEC procedure", true),
            ("execute", "EXECUTE procedure", true),
            // invalid: blocked keyword buried in a SELECT
            ("nested drop", "SELECT 1; DROP TABLE users;", true),
            ("select then delete", "SELECT (DELETE FROM users)", true),
            // invalid: multiple statements
            ("multi statement", "SELECT 1; SELECT 2;", true),
            // invalid: file operations
            ("into outfile", "SELECT * INTO OUTFILE '/tmp/x'", true),
            ("into dumpfile", "SELECT * INTO DUMPFILE '/tmp/x'", true),
            ("load_file", "SELECT LOAD_FILE('/etc/passwd')", true),
            ("load data", "LOAD DATA INFILE '/tmp/x' INTO TABLE t", true),
            // word boundaries: these contain blocked keywords as substrings only
            ("dropped as identifier", "SELECT dropped_at FROM audit", false),
            ("created substring", "SELECT created_at FROM users", false),
        ];

        for (name, sql, want_err) in cases {
            let got = validate_sql(sql, None);
            assert_eq!(got.is_err(), *want_err, "{name}: {got:?}");
        }
    }

    #[test]
    fn validate_postgres_patterns() {
        let cases = [
            "SELECT pg_read_file('/etc/passwd')",
            "SELECT pg_ls_dir('/tmp')",
            "SELECT lo_import('/tmp/x')",
            "SELECT lo_export(1234, '/tmp/x')",
            "SELECT * FROM dblink('host=x', 'SELECT 1')",
        ];
        for sql in cases {
            assert!(validate_sql(sql, Some(&POSTGRES_BLOCKED)).is_err(), "{sql}");
        }
        assert!(validate_sql("SELECT copy_count FROM stats", Some(&POSTGRES_BLOCKED)).is_ok());
    }

    #[test]
    fn validate_clickhouse_patterns() {
        let cases = [
            "SELECT * FROM file('/tmp/x.csv')",
            "SELECT * FROM url('http://x.com/data')",
            "SELECT * FROM remote('host', 'db', 'table')",
            "SELECT * FROM mysql('host', 'db', 'table', 'user', 'pass')",
            "SELECT * FROM postgresql('host', 'db', 'table', 'user', 'pass')",
        ];
        for sql in cases {
            assert!(validate_sql(sql, Some(&CLICKHOUSE_BLOCKED)).is_err(), "{sql}");
        }
        assert!(validate_sql("SELECT profile FROM events", Some(&CLICKHOUSE_BLOCKED)).is_ok());
    }

    #[test]
    fn validate_sqlite_patterns() {
        for sql in [
            "SELECT 1 WHERE x IN (SELECT load_extension('evil'))",
        ] {
            assert!(validate_sql(sql, Some(&SQLITE_BLOCKED)).is_err(), "{sql}");
        }
        assert!(validate_sql("SELECT attached FROM files", Some(&SQLITE_BLOCKED)).is_ok());
    }

    #[test]
    fn enforce_limit_cases() {
        let cases = [
            ("add limit", "SELECT * FROM users", 100, "SELECT * FROM users LIMIT 100"),
            (
                "already has limit",
                "SELECT * FROM users LIMIT 10",
                100,
                "SELECT * FROM users LIMIT 10",
            ),
            (
                "semicolon removed",
                "SELECT * FROM users;",
                50,
                "SELECT * FROM users LIMIT 50",
            ),
            (
                "complex query",
                "SELECT * FROM users WHERE active ORDER BY name",
                25,
                "SELECT * FROM users WHERE active ORDER BY name LIMIT 25",
            ),
        ];

        for (name, sql, max_rows, expected) in cases {
            assert_eq!(enforce_limit(sql, max_rows, "LIMIT"), expected, "{name}");
        }
    }

    #[test]
    fn enforce_limit_is_idempotent() {
        let once = enforce_limit("SELECT * FROM t", 100, "LIMIT");
        let twice = enforce_limit(&once, 100, "LIMIT");
        assert_eq!(once, twice);
    }

    #[test]
    fn validated_queries_stay_valid_after_limit() {
        for sql in ["SELECT * FROM users", "WITH c AS (SELECT 1) SELECT * FROM c"] {
            validate_sql(sql, None).unwrap();
            let bounded = enforce_limit(sql, 1000, "LIMIT");
            validate_sql(&bounded, None).unwrap();
        }
    }
}
