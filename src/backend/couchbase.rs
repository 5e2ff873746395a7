//! Document/query backend. Every operation is a N1QL statement interpolating
//! the bucket and the document key. Writes only count as successful when the
//! query service answers OK *and* reports `status: "success"` in its body.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;
use tracing::debug;

use crate::entry::{Attrs, Entry, EntryOptions, ModifyOutcome};

/// Raw response of the query service.
#[derive(Debug, Clone)]
pub struct QueryResponse {
    pub ok: bool,
    pub reason: String,
    pub text: String,
}

impl QueryResponse {
    pub fn json(&self) -> Result<Value> {
        serde_json::from_str(&self.text).context("query service returned invalid json")
    }

    /// Text to surface for a failed request: body if any, else the status reason.
    pub fn failure_message(&self) -> String {
        if self.text.is_empty() { self.reason.clone() } else { self.text.clone() }
    }
}

/// Wire client for the query service.
#[async_trait]
pub trait QueryClient: Send + Sync {
    async fn exec_query(&self, statement: &str) -> Result<QueryResponse>;
}

fn quote_key(key: &str) -> String {
    format!("'{}'", key.replace('\'', "''"))
}

fn quote_bucket(bucket: &str) -> String {
    format!("`{}`", bucket.replace('`', "``"))
}

pub fn select_statement(bucket: &str, key: &str) -> String {
    let b = quote_bucket(bucket);
    format!("SELECT META().id, {b}.* FROM {b} USE KEYS {}", quote_key(key))
}

pub fn search_statement(bucket: &str, filter: Option<&str>) -> String {
    let b = quote_bucket(bucket);
    match filter.map(str::trim).filter(|f| !f.is_empty()) {
        Some(f) => format!("SELECT META().id, {b}.* FROM {b} {f}"),
        None => format!("SELECT META().id, {b}.* FROM {b}"),
    }
}

pub fn update_statement(bucket: &str, key: &str, attrs: &Attrs, delete_attr: bool) -> String {
    let clause = if delete_attr {
        let names: Vec<&str> = attrs.keys().map(String::as_str).collect();
        format!("UNSET {}", names.join(","))
    } else {
        let kv: Vec<String> = attrs.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        format!("SET {}", kv.join(","))
    };
    format!("UPDATE {} USE KEYS {} {}", quote_bucket(bucket), quote_key(key), clause)
}

/// Split `META().id` from a result row.
fn row_to_entry(item: Value) -> Option<Entry> {
    let Value::Object(mut attrs) = item else { return None };
    let id = match attrs.remove("id")? {
        Value::String(s) => s,
        other => other.to_string(),
    };
    Some(Entry::new(id, attrs))
}

fn require_bucket(opts: &EntryOptions) -> Result<&str> {
    opts.bucket.as_deref().ok_or_else(|| anyhow!("bucket option is required for the couchbase backend"))
}

pub struct CouchbaseBackend {
    client: Box<dyn QueryClient>,
}

impl CouchbaseBackend {
    pub fn new(client: Box<dyn QueryClient>) -> Self { Self { client } }

    pub async fn get_entry(&self, key: &str, opts: &EntryOptions) -> Result<Option<Entry>> {
        let bucket = require_bucket(opts)?;
        let resp = self.client.exec_query(&select_statement(bucket, key)).await?;
        if !resp.ok {
            debug!(target: "auth_upgrade", "couchbase read of '{}' not ok: {}", key, resp.failure_message());
            return Ok(None);
        }
        let body = resp.json()?;
        let first = body.get("results").and_then(|r| r.as_array()).and_then(|r| r.first()).cloned();
        Ok(first.and_then(row_to_entry))
    }

    pub async fn modify_entry(&self, key: &str, attrs: Attrs, opts: &EntryOptions) -> Result<ModifyOutcome> {
        let bucket = require_bucket(opts)?;
        let resp = self.client.exec_query(&update_statement(bucket, key, &attrs, opts.delete_attr)).await?;
        if !resp.ok {
            return Ok(ModifyOutcome::failed(resp.failure_message()));
        }
        let body = resp.json()?;
        let status = body.get("status").and_then(|s| s.as_str()).unwrap_or("").to_string();
        Ok(ModifyOutcome { success: status == "success", message: status })
    }

    pub async fn search_entries(&self, opts: &EntryOptions) -> Result<Vec<Entry>> {
        let bucket = require_bucket(opts)?;
        let resp = self.client.exec_query(&search_statement(bucket, opts.filter.as_deref())).await?;
        if !resp.ok {
            debug!(target: "auth_upgrade", "couchbase search not ok: {}", resp.failure_message());
            return Ok(Vec::new());
        }
        let body = resp.json()?;
        let rows = match body.get("results") {
            Some(Value::Array(rows)) => rows.clone(),
            _ => Vec::new(),
        };
        Ok(rows.into_iter().filter_map(row_to_entry).collect())
    }
}

// --- HTTP client for the query service ---

pub struct N1qlClient {
    endpoint: Url,
    user: String,
    password: String,
    client: reqwest::Client,
}

impl N1qlClient {
    pub fn new(base: &str, user: impl Into<String>, password: impl Into<String>) -> Result<Self> {
        let base_url = Url::parse(base).context("invalid couchbase URL")?;
        let endpoint = base_url.join("/query/service")?;
        let client = reqwest::Client::builder().build()?;
        Ok(Self { endpoint, user: user.into(), password: password.into(), client })
    }
}

#[async_trait]
impl QueryClient for N1qlClient {
    async fn exec_query(&self, statement: &str) -> Result<QueryResponse> {
        debug!(target: "auth_upgrade", "n1ql: {}", statement);
        let resp = self.client
            .post(self.endpoint.clone())
            .basic_auth(&self.user, Some(&self.password))
            .form(&[("statement", statement)])
            .send()
            .await
            .context("couchbase query request failed")?;
        let status = resp.status();
        let reason = status.canonical_reason().unwrap_or("").to_string();
        let text = resp.text().await.context("couchbase response body unreadable")?;
        Ok(QueryResponse { ok: status.is_success(), reason, text })
    }
}
