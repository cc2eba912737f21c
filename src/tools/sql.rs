//! SQL executor tool (C5, §4.5): `SQL.QueryReadonly`, `SQL.GetSchema`,
//! `SQL.GetSampleQueries`.

use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use regex::Regex;
use rusqlite::types::ValueRef;
use serde_json::{json, Value};

use crate::config::SqlConfig;
use crate::error::{ErrorKind, FactError};

use super::pool::SqlPool;
use super::{FieldConstraint, ParamType, Tool, ToolResult, ToolSchema};

const MAX_STATEMENT_LENGTH: usize = 1000;
const MAX_JOIN_COUNT: usize = 16;

static SELECT_PREFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^select\s.+").unwrap());
static UNION_SELECT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"union\s+select").unwrap());
static TAUTOLOGY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bor\s+1\s*=\s*1\b").unwrap());
static COMMENT_TERMINATOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r";\s*--").unwrap());
static BLOCK_COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").unwrap());
static STACKED_STATEMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r";\s*\S").unwrap());
static JOIN_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bjoin\b").unwrap());
static PRAGMA_TABLE_INFO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^pragma\s+table_info\(\s*([A-Za-z_][A-Za-z0-9_]*)\s*\)\s*;?$").unwrap());
static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Keywords forbidden as whole words anywhere in a normalized statement,
/// except the `pragma table_info(<whitelisted>)` exception handled
/// separately in `validate_statement`.
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "drop", "alter", "create", "truncate", "grant", "revoke",
    "exec", "execute", "attach", "detach", "pragma", "vacuum", "replace",
];

fn normalize(statement: &str) -> String {
    statement.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

fn contains_whole_word(haystack: &str, word: &str) -> bool {
    haystack
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .any(|tok| tok == word)
}

/// The §4.5 security validation pipeline. Returns the validated (normalized)
/// statement on success, or the offending reason on rejection. Nothing here
/// executes the statement — this function is pure.
pub fn validate_statement(statement: &str, known_tables: &[String]) -> Result<String, String> {
    if statement.len() > MAX_STATEMENT_LENGTH {
        return Err(format!("statement exceeds {MAX_STATEMENT_LENGTH} characters"));
    }

    let normalized = normalize(statement);

    // Pragma exception: PRAGMA table_info(<whitelisted identifier>) bypasses
    // the SELECT-only rule but nothing else.
    if let Some(caps) = PRAGMA_TABLE_INFO.captures(&normalized) {
        let table = &caps[1];
        if !IDENTIFIER.is_match(table) {
            return Err(format!("'{table}' is not a valid identifier"));
        }
        if !known_tables.iter().any(|t| t.eq_ignore_ascii_case(table)) {
            return Err(format!("'{table}' is not a known table"));
        }
        return Ok(normalized);
    }

    if !SELECT_PREFIX.is_match(&normalized) {
        return Err("statement must begin with SELECT".to_string());
    }

    for keyword in FORBIDDEN_KEYWORDS {
        if contains_whole_word(&normalized, keyword) {
            return Err(format!("statement contains forbidden keyword '{keyword}'"));
        }
    }

    if UNION_SELECT.is_match(&normalized) {
        return Err("statement contains a UNION SELECT".to_string());
    }
    if TAUTOLOGY.is_match(&normalized) {
        return Err("statement contains a tautology pattern".to_string());
    }
    if COMMENT_TERMINATOR.is_match(&normalized) {
        return Err("statement contains a comment-terminated clause".to_string());
    }
    if BLOCK_COMMENT.is_match(&normalized) {
        return Err("statement contains a block comment".to_string());
    }
    if normalized.contains("--") {
        return Err("statement contains an inline comment marker".to_string());
    }
    if STACKED_STATEMENT.is_match(&normalized) {
        return Err("statement contains a stacked statement".to_string());
    }

    let join_count = JOIN_TOKEN.find_iter(&normalized).count();
    if join_count > MAX_JOIN_COUNT {
        return Err(format!("statement joins more than {MAX_JOIN_COUNT} tables"));
    }

    Ok(normalized)
}

fn value_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => json!(i),
        ValueRef::Real(f) => json!(f),
        ValueRef::Text(t) => json!(String::from_utf8_lossy(t).to_string()),
        ValueRef::Blob(b) => json!(base64_encode(b)),
    }
}

fn base64_encode(bytes: &[u8]) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::with_capacity((bytes.len() + 2) / 3 * 4);
    for chunk in bytes.chunks(3) {
        let b0 = chunk[0];
        let b1 = *chunk.get(1).unwrap_or(&0);
        let b2 = *chunk.get(2).unwrap_or(&0);
        out.push(ALPHABET[(b0 >> 2) as usize] as char);
        out.push(ALPHABET[(((b0 & 0x03) << 4) | (b1 >> 4)) as usize] as char);
        out.push(if chunk.len() > 1 {
            ALPHABET[(((b1 & 0x0f) << 2) | (b2 >> 6)) as usize] as char
        } else {
            '='
        });
        out.push(if chunk.len() > 2 {
            ALPHABET[(b2 & 0x3f) as usize] as char
        } else {
            '='
        });
    }
    out
}

/// `SQL.QueryReadonly`: the only tool permitted to touch the database with a
/// caller-supplied statement, subject to the full validation pipeline.
pub struct SqlQueryReadonlyTool {
    schema: ToolSchema,
    pool: Arc<SqlPool>,
    config: SqlConfig,
    known_tables: Vec<String>,
}

impl SqlQueryReadonlyTool {
    pub fn new(pool: Arc<SqlPool>, config: SqlConfig, known_tables: Vec<String>) -> Self {
        let schema = ToolSchema {
            name: "SQL.QueryReadonly".to_string(),
            description: "Execute a read-only SELECT statement against the analytics database."
                .to_string(),
            fields: vec![(
                "statement".to_string(),
                FieldConstraint {
                    param_type: Some(ParamType::String),
                    required: true,
                    max_length: Some(MAX_STATEMENT_LENGTH),
                    ..Default::default()
                },
            )],
        };
        Self {
            schema,
            pool,
            config,
            known_tables,
        }
    }
}

#[async_trait::async_trait]
impl Tool for SqlQueryReadonlyTool {
    fn name(&self) -> &str {
        "SQL.QueryReadonly"
    }

    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    fn timeout_override(&self) -> Option<std::time::Duration> {
        Some(std::time::Duration::from_secs(self.config.query_timeout_seconds))
    }

    async fn invoke(&self, args: Value, _user_id: &str) -> ToolResult {
        let statement = args
            .get("statement")
            .and_then(Value::as_str)
            .ok_or_else(|| FactError::new(ErrorKind::InvalidArguments, "missing 'statement'"))?;

        // `validate_statement` checks the lowercased, whitespace-collapsed
        // form so keyword/pattern matching is case-insensitive, but execution
        // must use the caller's original text verbatim: lowercasing string
        // literals (e.g. `quarter='Q1'`) would silently corrupt the query.
        validate_statement(statement, &self.known_tables).map_err(|reason| {
            tracing::warn!(reason = %reason, "SQL.QueryReadonly rejected a statement at validation");
            FactError::security_violation(reason)
        })?;

        let pool = Arc::clone(&self.pool);
        let max_rows = self.config.max_rows;
        let statement = statement.trim().to_string();
        let timeout = Duration::from_secs(self.config.query_timeout_seconds);

        let (handle_tx, handle_rx) = tokio::sync::oneshot::channel();
        let query_task =
            tokio::task::spawn_blocking(move || execute_readonly(&pool, &statement, max_rows, handle_tx));

        tokio::select! {
            result = query_task => {
                result.map_err(|e| FactError::new(ErrorKind::ToolHandlerError, format!("query task panicked: {e}")))?
            }
            _ = tokio::time::sleep(timeout) => {
                // The query is still running on its blocking thread past the
                // deadline; interrupt it via SQLite's cancellation mechanism
                // so it doesn't keep consuming a pooled connection forever.
                if let Ok(handle) = handle_rx.await {
                    handle.interrupt();
                }
                Err(FactError::new(
                    ErrorKind::QueryTimeout,
                    format!("query did not complete within {timeout:?} and was cancelled"),
                ))
            }
        }
    }
}

fn execute_readonly(
    pool: &SqlPool,
    statement: &str,
    max_rows: usize,
    handle_tx: tokio::sync::oneshot::Sender<rusqlite::InterruptHandle>,
) -> ToolResult {
    let started = Instant::now();
    let conn = pool.acquire()?;
    let _ = handle_tx.send(conn.get_interrupt_handle());

    let mut stmt = conn
        .prepare(statement)
        .map_err(|e| map_sqlite_err(e, "failed to prepare statement"))?;

    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let column_count = columns.len();

    let mut rows_out = Vec::new();
    let mut truncated = false;

    let mut rows = stmt.query([]).map_err(|e| map_sqlite_err(e, "query failed"))?;

    while let Some(row) = rows.next().map_err(|e| map_sqlite_err(e, "row fetch failed"))? {
        if rows_out.len() >= max_rows {
            truncated = true;
            break;
        }
        let mut values = Vec::with_capacity(column_count);
        for i in 0..column_count {
            let value = row
                .get_ref(i)
                .map_err(|e| map_sqlite_err(e, "column read failed"))?;
            values.push(value_to_json(value));
        }
        rows_out.push(Value::Array(values));
    }

    let execution_ms = started.elapsed().as_secs_f64() * 1000.0;

    Ok(json!({
        "columns": columns,
        "rows": rows_out,
        "row_count": rows_out.len(),
        "truncated": truncated,
        "execution_ms": execution_ms,
    }))
}

/// An interrupted statement surfaces as `QueryTimeout`; every other SQLite
/// failure stays a generic handler error so only cancellation gets the
/// caller-visible timeout kind.
fn map_sqlite_err(e: rusqlite::Error, context: &str) -> FactError {
    if is_interrupted(&e) {
        FactError::new(
            ErrorKind::QueryTimeout,
            format!("{context}: query was interrupted after exceeding its timeout"),
        )
    } else {
        FactError::new(ErrorKind::ToolHandlerError, format!("{context}: {e}"))
    }
}

fn is_interrupted(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(ffi_err, _) if ffi_err.code == rusqlite::ErrorCode::OperationInterrupted
    )
}

/// `SQL.GetSchema`: table/column metadata introspection via `PRAGMA
/// table_info`, scoped to the known-tables whitelist.
pub struct SqlGetSchemaTool {
    schema: ToolSchema,
    pool: Arc<SqlPool>,
    known_tables: Vec<String>,
}

impl SqlGetSchemaTool {
    pub fn new(pool: Arc<SqlPool>, known_tables: Vec<String>) -> Self {
        let schema = ToolSchema {
            name: "SQL.GetSchema".to_string(),
            description: "Return table and column metadata for the analytics database."
                .to_string(),
            fields: vec![],
        };
        Self {
            schema,
            pool,
            known_tables,
        }
    }
}

#[async_trait::async_trait]
impl Tool for SqlGetSchemaTool {
    fn name(&self) -> &str {
        "SQL.GetSchema"
    }

    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn invoke(&self, _args: Value, _user_id: &str) -> ToolResult {
        let pool = Arc::clone(&self.pool);
        let tables = self.known_tables.clone();

        tokio::task::spawn_blocking(move || {
            let conn = pool.acquire()?;
            let mut out = serde_json::Map::new();
            for table in &tables {
                if !IDENTIFIER.is_match(table) {
                    continue;
                }
                let mut stmt = conn
                    .prepare(&format!("PRAGMA table_info({table})"))
                    .map_err(|e| FactError::new(ErrorKind::ToolHandlerError, e.to_string()))?;
                let columns: Vec<Value> = stmt
                    .query_map([], |row| {
                        let name: String = row.get(1)?;
                        let col_type: String = row.get(2)?;
                        Ok(json!({"name": name, "type": col_type}))
                    })
                    .map_err(|e| FactError::new(ErrorKind::ToolHandlerError, e.to_string()))?
                    .filter_map(Result::ok)
                    .collect();
                out.insert(table.clone(), Value::Array(columns));
            }
            Ok(Value::Object(out))
        })
        .await
        .map_err(|e| FactError::new(ErrorKind::ToolHandlerError, format!("schema task panicked: {e}")))?
    }
}

/// `SQL.GetSampleQueries`: a static, curated list — never touches the pool.
pub struct SqlGetSampleQueriesTool {
    schema: ToolSchema,
    samples: Vec<String>,
}

impl SqlGetSampleQueriesTool {
    pub fn new(samples: Vec<String>) -> Self {
        let schema = ToolSchema {
            name: "SQL.GetSampleQueries".to_string(),
            description: "Return a curated list of example read-only queries.".to_string(),
            fields: vec![],
        };
        Self { schema, samples }
    }
}

#[async_trait::async_trait]
impl Tool for SqlGetSampleQueriesTool {
    fn name(&self) -> &str {
        "SQL.GetSampleQueries"
    }

    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn invoke(&self, _args: Value, _user_id: &str) -> ToolResult {
        Ok(json!({ "queries": self.samples }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables() -> Vec<String> {
        vec!["financial_records".to_string()]
    }

    #[test]
    fn accepts_plain_select() {
        let result = validate_statement(
            "SELECT revenue FROM financial_records WHERE quarter='Q1' AND year=2025",
            &tables(),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn rejects_non_select() {
        let result = validate_statement("DELETE FROM financial_records", &tables());
        assert!(result.is_err());
    }

    #[test]
    fn rejects_stacked_drop_table() {
        let result = validate_statement(
            "SELECT * FROM financial_records; DROP TABLE financial_records; --",
            &tables(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn rejects_union_select_injection() {
        let result = validate_statement(
            "SELECT name FROM financial_records UNION SELECT password FROM users",
            &tables(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn rejects_tautology_injection() {
        let result = validate_statement(
            "SELECT * FROM financial_records WHERE id=1 OR 1=1",
            &tables(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn allows_whitelisted_pragma_table_info() {
        let result = validate_statement("PRAGMA table_info(financial_records)", &tables());
        assert!(result.is_ok());
    }

    #[test]
    fn rejects_pragma_for_unknown_table() {
        let result = validate_statement("PRAGMA table_info(users)", &tables());
        assert!(result.is_err());
    }

    #[test]
    fn rejects_statement_over_max_length() {
        let long = format!("SELECT {}", "a".repeat(2000));
        assert!(validate_statement(&long, &tables()).is_err());
    }

    #[test]
    fn rejects_excessive_joins() {
        let mut stmt = "SELECT * FROM t0".to_string();
        for i in 1..20 {
            stmt.push_str(&format!(" JOIN t{i} ON t0.id = t{i}.id"));
        }
        assert!(validate_statement(&stmt, &tables()).is_err());
    }

    /// Regression test: execution must use the caller's original-case
    /// statement, not the lowercased form used for security validation.
    /// SQLite string comparison is case-sensitive by default, so a naively
    /// lowercased `WHERE quarter='Q1'` would silently match zero rows.
    #[tokio::test]
    async fn invoke_preserves_statement_case_for_string_literals() {
        let db_path =
            std::env::temp_dir().join(format!("fact_sql_case_test_{}_{}.db", std::process::id(), line!()));
        {
            let conn = rusqlite::Connection::open(&db_path).expect("open temp db");
            conn.execute(
                "CREATE TABLE financial_records (quarter TEXT, year INTEGER, revenue REAL)",
                [],
            )
            .expect("create table");
            conn.execute(
                "INSERT INTO financial_records VALUES ('Q1', 2025, 1234567.89)",
                [],
            )
            .expect("insert row");
        }

        let pool = Arc::new(SqlPool::open_path(&db_path, 1, 5).expect("open pool"));
        let tool = SqlQueryReadonlyTool::new(
            Arc::clone(&pool),
            SqlConfig::default(),
            vec!["financial_records".to_string()],
        );

        let result = tool
            .invoke(
                json!({"statement": "SELECT revenue FROM financial_records WHERE quarter='Q1' AND year=2025"}),
                "u1",
            )
            .await
            .expect("query should succeed");

        assert_eq!(result["row_count"], json!(1));
        assert_eq!(result["rows"][0][0], json!(1234567.89));

        drop(pool);
        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn interrupted_sqlite_error_maps_to_query_timeout() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ErrorCode::OperationInterrupted,
                extended_code: 9,
            },
            None,
        );
        let mapped = map_sqlite_err(err, "row fetch failed");
        assert_eq!(mapped.kind, ErrorKind::QueryTimeout);
    }

    #[test]
    fn other_sqlite_errors_stay_tool_handler_errors() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ErrorCode::ConstraintViolation,
                extended_code: 19,
            },
            None,
        );
        let mapped = map_sqlite_err(err, "row fetch failed");
        assert_eq!(mapped.kind, ErrorKind::ToolHandlerError);
    }

    /// Exercises the real cancellation path end to end: a query that sleeps
    /// inside a custom scalar function runs long enough for the tool's own
    /// timeout to fire and call `interrupt()` on it.
    #[tokio::test]
    async fn invoke_times_out_and_cancels_a_slow_query() {
        let db_path = std::env::temp_dir()
            .join(format!("fact_sql_timeout_test_{}_{}.db", std::process::id(), line!()));
        {
            let conn = rusqlite::Connection::open(&db_path).expect("open temp db");
            conn.execute(
                "CREATE TABLE financial_records (quarter TEXT, year INTEGER, revenue REAL)",
                [],
            )
            .expect("create table");
            for i in 0..25 {
                conn.execute(
                    "INSERT INTO financial_records VALUES ('Q1', 2025, ?1)",
                    [i as f64],
                )
                .expect("insert row");
            }
        }

        let pool = Arc::new(SqlPool::open_path(&db_path, 1, 5).expect("open pool"));
        // Register a scalar function that sleeps briefly per call so a
        // self-join over this small table still takes far longer than the
        // configured query timeout (25 rows -> up to 625 predicate calls).
        {
            let conn = pool.acquire().expect("acquire connection");
            conn.create_scalar_function(
                "slow_eq",
                2,
                rusqlite::functions::FunctionFlags::SQLITE_UTF8,
                |ctx| {
                    std::thread::sleep(std::time::Duration::from_millis(5));
                    let a: i64 = ctx.get(0)?;
                    let b: i64 = ctx.get(1)?;
                    Ok(a == b)
                },
            )
            .expect("register slow_eq");
        }

        let config = SqlConfig {
            query_timeout_seconds: 1,
            ..SqlConfig::default()
        };
        let tool = SqlQueryReadonlyTool::new(
            Arc::clone(&pool),
            config,
            vec!["financial_records".to_string()],
        );

        let result = tool
            .invoke(
                json!({
                    "statement": "SELECT COUNT(*) FROM financial_records a \
                                  JOIN financial_records b ON slow_eq(a.rowid, b.rowid)"
                }),
                "u1",
            )
            .await;

        assert_eq!(result.unwrap_err().kind, ErrorKind::QueryTimeout);

        drop(pool);
        let _ = std::fs::remove_file(&db_path);
    }
}
