//! In-memory stand-ins for the four backend wire clients. Each fake keeps its
//! records behind a shared handle so tests can inspect what was written after
//! the `Backend` took ownership of the boxed client.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use auth_upgrade::backend::{
    Backend, BackendClients, BackendKind, DirectoryClient, DirectoryEntry, Modification, ModifyOp, QueryClient,
    QueryResponse, SqlClient, SqlDialect,
};
use auth_upgrade::config::{StaticConfigProvider, UpgradeSettings};
use auth_upgrade::entry::Attrs;
use auth_upgrade::Upgrade;

pub const HOSTNAME: &str = "demo.jans.io";
pub const CLIENT_ID: &str = "1800.lock";

pub fn legacy_conf() -> Value {
    json!({
        "baseEndpoint": "https://demo.jans.io/jans-lock/v1",
        "opaConfiguration": {"baseUrl": "http://opa:8181/v1"},
        "policiesJsonUrisAccessToken": "tok123",
        "tokenChannels": ["id_token"],
        "messageConsumerType": "OPA"
    })
}

pub fn lock_swagger(ids: &[&str]) -> Value {
    let scopes: serde_json::Map<String, Value> = ids.iter().map(|i| (i.to_string(), json!("scope"))).collect();
    json!({"components": {"securitySchemes": {"oauth2": {"flows": {"clientCredentials": {"scopes": scopes}}}}}})
}

pub fn provider() -> StaticConfigProvider {
    StaticConfigProvider::default()
        .with_config("hostname", HOSTNAME)
        .with_config("lock_client_id", CLIENT_ID)
        .with_secret("lock_client_encoded_pw", "c2VjcmV0")
}

pub fn enabled() -> UpgradeSettings {
    UpgradeSettings { lock_enabled: true, ..Default::default() }
}

pub fn upgrade_for(kind: BackendKind, clients: BackendClients, settings: UpgradeSettings) -> Upgrade {
    let backend = Backend::select(kind, clients).expect("select backend");
    Upgrade::new(backend, settings, &provider()).with_swagger(lock_swagger(&["b", "c"]))
}

/// Decode a written config document regardless of how the backend stores it.
pub fn as_document(v: &Value) -> Value {
    match v {
        Value::String(s) => serde_json::from_str(s).expect("written document is JSON"),
        other => other.clone(),
    }
}

// --- directory ---

#[derive(Default)]
pub struct DirectoryState {
    pub entries: BTreeMap<String, DirectoryEntry>,
    pub reads: usize,
    pub writes: Vec<(String, Vec<Modification>)>,
}

#[derive(Clone, Default)]
pub struct FakeDirectory {
    pub state: Arc<Mutex<DirectoryState>>,
}

impl FakeDirectory {
    pub fn insert(&self, dn: &str, attrs: &[(&str, Vec<Value>)]) {
        let entry = DirectoryEntry {
            dn: dn.to_string(),
            attrs: attrs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        };
        self.state.lock().entries.insert(dn.to_string(), entry);
    }
}

#[async_trait]
impl DirectoryClient for FakeDirectory {
    async fn get(&self, dn: &str, _filter: &str, _attrs: Option<&[String]>) -> Result<Option<DirectoryEntry>> {
        let mut st = self.state.lock();
        st.reads += 1;
        Ok(st.entries.get(dn).cloned())
    }

    async fn search(&self, base: &str, filter: &str, _attrs: Option<&[String]>) -> Result<Vec<DirectoryEntry>> {
        let st = self.state.lock();
        let class = filter.trim_start_matches("(objectClass=").trim_end_matches(')');
        Ok(st
            .entries
            .values()
            .filter(|e| e.dn.ends_with(base))
            .filter(|e| class == "*" || e.attrs.get("objectClass").map(|v| v.contains(&json!(class))).unwrap_or(false))
            .cloned()
            .collect())
    }

    async fn modify(&self, dn: &str, changes: Vec<Modification>) -> Result<(bool, String)> {
        let mut st = self.state.lock();
        let Some(entry) = st.entries.get_mut(dn) else { return Ok((false, "noSuchObject".into())) };
        for m in &changes {
            match m.op {
                ModifyOp::Replace => { entry.attrs.insert(m.attr.clone(), m.values.clone()); }
                ModifyOp::Delete => { entry.attrs.remove(&m.attr); }
            }
        }
        st.writes.push((dn.to_string(), changes));
        Ok((true, "success".into()))
    }
}

// --- tabular ---

#[derive(Default)]
pub struct SqlState {
    pub tables: BTreeMap<String, BTreeMap<String, Attrs>>,
    pub reads: usize,
    pub writes: Vec<(String, String, Attrs)>,
}

#[derive(Clone)]
pub struct FakeSql {
    pub dialect: SqlDialect,
    pub state: Arc<Mutex<SqlState>>,
}

impl FakeSql {
    pub fn new(dialect: SqlDialect) -> Self { Self { dialect, state: Arc::default() } }

    pub fn insert(&self, table: &str, key: &str, row: Value) {
        let Value::Object(mut attrs) = row else { panic!("row must be an object") };
        attrs.insert("doc_id".into(), json!(key));
        self.state.lock().tables.entry(table.to_string()).or_default().insert(key.to_string(), attrs);
    }
}

#[async_trait]
impl SqlClient for FakeSql {
    fn dialect(&self) -> SqlDialect { self.dialect }

    async fn get(&self, table: &str, key: &str, _columns: Option<&[String]>) -> Result<Option<Attrs>> {
        let mut st = self.state.lock();
        st.reads += 1;
        Ok(st.tables.get(table).and_then(|t| t.get(key)).cloned())
    }

    async fn update(&self, table: &str, key: &str, attrs: &Attrs) -> Result<bool> {
        let mut st = self.state.lock();
        let Some(row) = st.tables.get_mut(table).and_then(|t| t.get_mut(key)) else { return Ok(false) };
        for (k, v) in attrs {
            row.insert(k.clone(), v.clone());
        }
        st.writes.push((table.to_string(), key.to_string(), attrs.clone()));
        Ok(true)
    }

    async fn search(&self, table: &str, _columns: Option<&[String]>) -> Result<Vec<Attrs>> {
        let st = self.state.lock();
        Ok(st.tables.get(table).map(|t| t.values().cloned().collect()).unwrap_or_default())
    }
}

// --- query service ---

pub struct QueryState {
    pub docs: BTreeMap<String, Value>,
    pub statements: Vec<String>,
    pub writes: Vec<(String, Attrs)>,
    /// Body status reported for updates.
    pub update_status: String,
    /// When set, every request fails at the HTTP level with this reason.
    pub http_failure: Option<String>,
}

impl Default for QueryState {
    fn default() -> Self {
        Self {
            docs: BTreeMap::new(),
            statements: Vec::new(),
            writes: Vec::new(),
            update_status: "success".into(),
            http_failure: None,
        }
    }
}

#[derive(Clone, Default)]
pub struct FakeQuery {
    pub state: Arc<Mutex<QueryState>>,
}

impl FakeQuery {
    pub fn insert(&self, id: &str, doc: Value) {
        self.state.lock().docs.insert(id.to_string(), doc);
    }
}

fn use_keys(statement: &str) -> Option<String> {
    let rest = statement.split("USE KEYS '").nth(1)?;
    Some(rest.split('\'').next()?.to_string())
}

/// Parse `SET a=<json>,b=<json>` written by the adapter.
fn parse_set_clause(clause: &str) -> Result<Attrs> {
    let mut out = Attrs::new();
    let mut rest = clause;
    while !rest.is_empty() {
        let (name, tail) = rest.split_once('=').ok_or_else(|| anyhow!("malformed SET clause"))?;
        let mut stream = serde_json::Deserializer::from_str(tail).into_iter::<Value>();
        let value = stream.next().ok_or_else(|| anyhow!("missing value"))??;
        let consumed = stream.byte_offset();
        out.insert(name.to_string(), value);
        rest = tail[consumed..].trim_start_matches(',');
    }
    Ok(out)
}

fn ok(body: Value) -> QueryResponse {
    QueryResponse { ok: true, reason: "OK".into(), text: body.to_string() }
}

#[async_trait]
impl QueryClient for FakeQuery {
    async fn exec_query(&self, statement: &str) -> Result<QueryResponse> {
        let mut st = self.state.lock();
        st.statements.push(statement.to_string());
        if let Some(reason) = st.http_failure.clone() {
            return Ok(QueryResponse { ok: false, reason, text: String::new() });
        }
        if statement.starts_with("UPDATE") {
            let key = use_keys(statement).ok_or_else(|| anyhow!("update without key"))?;
            let clause = statement.split(" SET ").nth(1).ok_or_else(|| anyhow!("only SET supported"))?;
            let attrs = parse_set_clause(clause)?;
            if let Some(Value::Object(doc)) = st.docs.get_mut(&key) {
                for (k, v) in &attrs {
                    doc.insert(k.clone(), v.clone());
                }
            }
            st.writes.push((key, attrs));
            let status = st.update_status.clone();
            return Ok(ok(json!({"status": status})));
        }
        let results: Vec<Value> = match use_keys(statement) {
            Some(key) => st.docs.get(&key).map(|d| {
                let mut row = d.clone();
                row["id"] = json!(key);
                vec![row]
            }).unwrap_or_default(),
            None => {
                let class = statement.split("objectClass = '").nth(1).and_then(|r| r.split('\'').next());
                st.docs
                    .iter()
                    .filter(|(_, d)| class.map(|c| d.get("objectClass") == Some(&json!(c))).unwrap_or(true))
                    .map(|(id, d)| {
                        let mut row = d.clone();
                        row["id"] = json!(id);
                        row
                    })
                    .collect()
            }
        };
        Ok(ok(json!({"status": "success", "results": results})))
    }
}

/// One seeded fake per backend kind, holding the same logical records.
pub struct Seeded {
    pub kind: BackendKind,
    pub directory: FakeDirectory,
    pub sql: FakeSql,
    pub query: FakeQuery,
}

impl Seeded {
    pub fn clients(&self) -> BackendClients {
        match self.kind {
            BackendKind::Ldap => BackendClients { directory: Some(Box::new(self.directory.clone())), ..Default::default() },
            BackendKind::Sql => BackendClients { sql: Some(Box::new(self.sql.clone())), ..Default::default() },
            BackendKind::Spanner => BackendClients { spanner: Some(Box::new(self.sql.clone())), ..Default::default() },
            BackendKind::Couchbase => BackendClients { query: Some(Box::new(self.query.clone())), ..Default::default() },
        }
    }

    /// Config attribute as currently stored, decoded.
    pub fn stored_conf(&self) -> Value {
        match self.kind {
            BackendKind::Ldap => {
                let st = self.directory.state.lock();
                as_document(&st.entries["ou=jans-lock,ou=configuration,o=jans"].attrs["jansConfDyn"][0])
            }
            BackendKind::Sql | BackendKind::Spanner => {
                let st = self.sql.state.lock();
                as_document(&st.tables["jansAppConf"]["jans-lock"]["jansConfDyn"])
            }
            BackendKind::Couchbase => {
                let st = self.query.state.lock();
                as_document(&st.docs["configuration_jans-lock"]["jansConfDyn"])
            }
        }
    }

    pub fn stored_revision(&self) -> i64 {
        let v = match self.kind {
            BackendKind::Ldap => self.directory.state.lock().entries["ou=jans-lock,ou=configuration,o=jans"].attrs["jansRevision"][0].clone(),
            BackendKind::Sql | BackendKind::Spanner => self.sql.state.lock().tables["jansAppConf"]["jans-lock"]["jansRevision"].clone(),
            BackendKind::Couchbase => self.query.state.lock().docs["configuration_jans-lock"]["jansRevision"].clone(),
        };
        v.as_i64().expect("numeric revision")
    }

    pub fn write_count(&self) -> usize {
        match self.kind {
            BackendKind::Ldap => self.directory.state.lock().writes.len(),
            BackendKind::Sql | BackendKind::Spanner => self.sql.state.lock().writes.len(),
            BackendKind::Couchbase => self.query.state.lock().writes.len(),
        }
    }

    pub fn stored_client_scopes(&self) -> Value {
        match self.kind {
            BackendKind::Ldap => {
                let st = self.directory.state.lock();
                Value::Array(st.entries[&format!("inum={},ou=clients,o=jans", CLIENT_ID)].attrs["jansScope"].clone())
            }
            BackendKind::Sql | BackendKind::Spanner => self.sql.state.lock().tables["jansClnt"][CLIENT_ID]["jansScope"].clone(),
            BackendKind::Couchbase => self.query.state.lock().docs[&format!("clients_{}", CLIENT_ID)]["jansScope"].clone(),
        }
    }
}

const SCOPES: [(&str, &str, &str); 3] = [
    ("a", "A", "inum=A,ou=scopes,o=jans"),
    ("b", "B", "inum=B,ou=scopes,o=jans"),
    ("c", "C", "inum=C,ou=scopes,o=jans"),
];

/// Seed `kind` with the lock config (revision 1, `conf` as stored document), the
/// three scopes and the lock client holding scope `a`.
pub fn seed(kind: BackendKind, dialect: SqlDialect, conf: Option<Value>) -> Seeded {
    let directory = FakeDirectory::default();
    let sql = FakeSql::new(dialect);
    let query = FakeQuery::default();
    let client_dn = format!("inum={},ou=clients,o=jans", CLIENT_ID);
    let conf_text = conf.as_ref().map(|c| c.to_string());

    match kind {
        BackendKind::Ldap => {
            if let Some(text) = &conf_text {
                directory.insert("ou=jans-lock,ou=configuration,o=jans", &[
                    ("jansConfDyn", vec![json!(text)]),
                    ("jansRevision", vec![json!(1)]),
                ]);
            }
            for (id, _, dn) in SCOPES {
                directory.insert(dn, &[("jansId", vec![json!(id)]), ("objectClass", vec![json!("top"), json!("jansScope")])]);
            }
            directory.insert(&client_dn, &[("jansScope", vec![json!("inum=A,ou=scopes,o=jans")])]);
        }
        BackendKind::Sql | BackendKind::Spanner => {
            if let Some(text) = &conf_text {
                sql.insert("jansAppConf", "jans-lock", json!({"jansConfDyn": text, "jansRevision": 1}));
            }
            for (id, inum, dn) in SCOPES {
                sql.insert("jansScope", inum, json!({"jansId": id, "dn": dn}));
            }
            let scopes = if dialect == SqlDialect::Mysql {
                json!({"v": ["inum=A,ou=scopes,o=jans"]})
            } else {
                json!(["inum=A,ou=scopes,o=jans"])
            };
            sql.insert("jansClnt", CLIENT_ID, json!({"jansScope": scopes, "dn": client_dn}));
        }
        BackendKind::Couchbase => {
            if let Some(c) = &conf {
                query.insert("configuration_jans-lock", json!({"jansConfDyn": c, "jansRevision": 1}));
            }
            for (id, inum, dn) in SCOPES {
                query.insert(&format!("scopes_{}", inum), json!({"jansId": id, "dn": dn, "objectClass": "jansScope"}));
            }
            query.insert(&format!("clients_{}", CLIENT_ID), json!({"jansScope": ["inum=A,ou=scopes,o=jans"], "objectClass": "jansClnt"}));
        }
    }
    Seeded { kind, directory, sql, query }
}

pub const ALL_KINDS: [BackendKind; 4] = [BackendKind::Ldap, BackendKind::Sql, BackendKind::Spanner, BackendKind::Couchbase];
