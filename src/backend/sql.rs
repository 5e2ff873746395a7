//! Tabular backends. The SQL and Spanner variants share this adapter and differ
//! only in the client they wrap. Rows are keyed by `doc_id`, derived from the
//! record's DN, and every operation requires a `table_name` option.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::entry::{Attrs, Entry, EntryOptions, ModifyOutcome};

pub const KEY_COLUMN: &str = "doc_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Mysql,
    Pgsql,
    Spanner,
}

impl SqlDialect {
    /// MySQL stores multi-valued columns as a JSON object wrapping the list in `v`.
    pub fn wraps_lists(&self) -> bool { matches!(self, SqlDialect::Mysql) }
}

/// Wire client for one relational store.
#[async_trait]
pub trait SqlClient: Send + Sync {
    fn dialect(&self) -> SqlDialect;
    /// Fetch one row by key; `None` when no row matches.
    async fn get(&self, table: &str, key: &str, columns: Option<&[String]>) -> Result<Option<Attrs>>;
    /// Update columns of one row; `true` when a row was updated.
    async fn update(&self, table: &str, key: &str, attrs: &Attrs) -> Result<bool>;
    /// Fetch every row of the table. Rows must carry the key column.
    async fn search(&self, table: &str, columns: Option<&[String]>) -> Result<Vec<Attrs>>;
}

pub struct SqlBackend {
    client: Box<dyn SqlClient>,
}

fn require_table(opts: &EntryOptions) -> Result<&str> {
    opts.table_name.as_deref().ok_or_else(|| anyhow!("table_name option is required for tabular backends"))
}

impl SqlBackend {
    pub fn new(client: Box<dyn SqlClient>) -> Self { Self { client } }

    pub fn dialect(&self) -> SqlDialect { self.client.dialect() }

    pub async fn get_entry(&self, key: &str, opts: &EntryOptions) -> Result<Option<Entry>> {
        let table = require_table(opts)?;
        let row = self.client.get(table, key, opts.attrs.as_deref()).await
            .with_context(|| format!("read of {}.{} failed", table, key))?;
        Ok(row.map(|attrs| Entry::new(key, attrs)))
    }

    pub async fn modify_entry(&self, key: &str, attrs: Attrs, opts: &EntryOptions) -> Result<ModifyOutcome> {
        let table = require_table(opts)?;
        let updated = self.client.update(table, key, &attrs).await
            .with_context(|| format!("update of {}.{} failed", table, key))?;
        Ok(ModifyOutcome { success: updated, message: String::new() })
    }

    pub async fn search_entries(&self, opts: &EntryOptions) -> Result<Vec<Entry>> {
        let table = require_table(opts)?;
        let rows = self.client.search(table, opts.attrs.as_deref()).await
            .with_context(|| format!("search of {} failed", table))?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(id) = row.get(KEY_COLUMN).and_then(|v| v.as_str()).map(str::to_string) else {
                debug!(target: "auth_upgrade", "skipping {} row without {}", table, KEY_COLUMN);
                continue;
            };
            out.push(Entry::new(id, row));
        }
        Ok(out)
    }
}

// --- PostgreSQL client over tokio-postgres ---

/// Quote an identifier for PostgreSQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal for PostgreSQL.
pub fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Render a JSON attribute value as a PostgreSQL literal. Lists and objects are
/// stored in jsonb columns.
pub fn pg_literal(v: &Value) -> String {
    match v {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "TRUE".into() } else { "FALSE".into() },
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote_literal(s),
        Value::Array(_) | Value::Object(_) => format!("{}::jsonb", quote_literal(&v.to_string())),
    }
}

fn select_list(columns: Option<&[String]>) -> String {
    match columns {
        Some(cols) if !cols.is_empty() => {
            let mut names: Vec<String> = cols.iter().map(|c| quote_ident(c)).collect();
            if !cols.iter().any(|c| c == KEY_COLUMN) { names.insert(0, quote_ident(KEY_COLUMN)); }
            names.join(", ")
        }
        _ => "*".to_string(),
    }
}

pub fn pg_select_statement(table: &str, key: Option<&str>, columns: Option<&[String]>) -> String {
    let mut inner = format!("SELECT {} FROM {}", select_list(columns), quote_ident(table));
    if let Some(k) = key {
        inner.push_str(&format!(" WHERE {} = {}", quote_ident(KEY_COLUMN), quote_literal(k)));
    }
    format!("SELECT row_to_json(t)::text FROM ({}) t", inner)
}

pub fn pg_update_statement(table: &str, key: &str, attrs: &Attrs) -> Option<String> {
    let sets: Vec<String> = attrs
        .iter()
        .filter(|(k, _)| k.as_str() != KEY_COLUMN)
        .map(|(k, v)| format!("{} = {}", quote_ident(k), pg_literal(v)))
        .collect();
    if sets.is_empty() { return None; }
    Some(format!(
        "UPDATE {} SET {} WHERE {} = {}",
        quote_ident(table), sets.join(", "), quote_ident(KEY_COLUMN), quote_literal(key)
    ))
}

pub struct PgSqlClient {
    url: String,
}

impl PgSqlClient {
    pub fn new(url: impl Into<String>) -> Self { Self { url: url.into() } }

    async fn connect_client(&self) -> Result<tokio_postgres::Client> {
        use tokio_postgres::{Config, NoTls};
        let cfg: Config = self.url.parse().context("invalid postgres url")?;
        let (client, conn) = cfg.connect(NoTls).await.context("postgres connect failed")?;
        // drive the connection in background
        tokio::spawn(async move { let _ = conn.await; });
        Ok(client)
    }

    async fn json_rows(&self, sql: &str) -> Result<Vec<Attrs>> {
        use tokio_postgres::SimpleQueryMessage;
        let client = self.connect_client().await?;
        debug!(target: "auth_upgrade", "pgsql: {}", sql);
        let msgs = client.simple_query(sql).await?;
        let mut rows = Vec::new();
        for m in msgs {
            if let SimpleQueryMessage::Row(r) = m {
                let Some(text) = r.get(0) else { continue };
                match serde_json::from_str::<Value>(text)? {
                    Value::Object(map) => rows.push(map),
                    other => return Err(anyhow!("unexpected row shape: {}", other)),
                }
            }
        }
        Ok(rows)
    }
}

#[async_trait]
impl SqlClient for PgSqlClient {
    fn dialect(&self) -> SqlDialect { SqlDialect::Pgsql }

    async fn get(&self, table: &str, key: &str, columns: Option<&[String]>) -> Result<Option<Attrs>> {
        let rows = self.json_rows(&pg_select_statement(table, Some(key), columns)).await?;
        Ok(rows.into_iter().next())
    }

    async fn update(&self, table: &str, key: &str, attrs: &Attrs) -> Result<bool> {
        use tokio_postgres::SimpleQueryMessage;
        let Some(sql) = pg_update_statement(table, key, attrs) else { return Ok(false) };
        let client = self.connect_client().await?;
        debug!(target: "auth_upgrade", "pgsql: {}", sql);
        let msgs = client.simple_query(&sql).await?;
        let affected: u64 = msgs
            .iter()
            .map(|m| match m { SimpleQueryMessage::CommandComplete(n) => *n, _ => 0 })
            .sum();
        Ok(affected > 0)
    }

    async fn search(&self, table: &str, columns: Option<&[String]>) -> Result<Vec<Attrs>> {
        self.json_rows(&pg_select_statement(table, None, columns)).await
    }
}
