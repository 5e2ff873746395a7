//!
//! deployment configuration
//! ------------------------
//! Everything the upgrade reads from its environment, consumed once at startup:
//! feature flags, the persistence mapping that selects the backend, deployment
//! values (hostname, lock client credentials), client endpoints, and the lock
//! API swagger document.
//!
//! Each loader has a `from_lookup` form taking a key -> value function so tests
//! do not need to touch the process environment.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;

use crate::backend::BackendKind;
use crate::error::{UpgradeError, UpgradeResult};

pub const DEFAULT_OPA_URL: &str = "http://localhost:8181/v1";
pub const DEFAULT_BUCKET_PREFIX: &str = "jans";
pub const DEFAULT_LOCK_SWAGGER: &str = "/app/static/jans-lock-api.yaml";
pub const DEFAULT_PERSISTENCE_TYPE: &str = "sql";

fn env_lookup(key: &str) -> Option<String> { std::env::var(key).ok() }

pub fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Read-only deployment values and secrets.
pub trait ConfigProvider: Send + Sync {
    fn config(&self, key: &str) -> Option<String>;
    fn secret(&self, key: &str) -> Option<String>;
}

/// Provider backed by `CN_<KEY>` environment variables (`hostname` -> `CN_HOSTNAME`).
#[derive(Debug, Clone, Default)]
pub struct EnvConfigProvider;

fn env_name(key: &str) -> String { format!("CN_{}", key.to_ascii_uppercase()) }

impl ConfigProvider for EnvConfigProvider {
    fn config(&self, key: &str) -> Option<String> { env_lookup(&env_name(key)).filter(|v| !v.is_empty()) }
    fn secret(&self, key: &str) -> Option<String> { env_lookup(&env_name(key)).filter(|v| !v.is_empty()) }
}

/// In-memory provider, handy for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigProvider {
    pub config: BTreeMap<String, String>,
    pub secrets: BTreeMap<String, String>,
}

impl StaticConfigProvider {
    pub fn with_config(mut self, key: &str, value: &str) -> Self {
        self.config.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_secret(mut self, key: &str, value: &str) -> Self {
        self.secrets.insert(key.to_string(), value.to_string());
        self
    }
}

impl ConfigProvider for StaticConfigProvider {
    fn config(&self, key: &str) -> Option<String> { self.config.get(key).cloned() }
    fn secret(&self, key: &str) -> Option<String> { self.secrets.get(key).cloned() }
}

/// Persistence mapping of the deployment. A `hybrid` deployment spreads data
/// across stores; the upgrade only ever touches the `default` one.
#[derive(Debug, Clone)]
pub struct PersistenceMapping {
    pub persistence_type: String,
    pub mapping: BTreeMap<String, String>,
}

impl PersistenceMapping {
    pub fn from_env() -> UpgradeResult<Self> { Self::from_lookup(env_lookup) }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(get: F) -> UpgradeResult<Self> {
        let persistence_type = get("CN_PERSISTENCE_TYPE").unwrap_or_else(|| DEFAULT_PERSISTENCE_TYPE.to_string());
        let mut mapping = BTreeMap::new();
        if persistence_type == "hybrid" {
            let raw = get("CN_HYBRID_MAPPING").unwrap_or_else(|| "{}".to_string());
            let parsed: BTreeMap<String, String> = serde_json::from_str(&raw).map_err(|e| {
                UpgradeError::config("bad_hybrid_mapping".to_string(), format!("CN_HYBRID_MAPPING is not a JSON object of strings: {}", e))
            })?;
            mapping.extend(parsed);
        } else {
            mapping.insert("default".to_string(), persistence_type.clone());
        }
        Ok(Self { persistence_type, mapping })
    }

    /// Backend kind holding the default data group.
    pub fn default_kind(&self) -> UpgradeResult<BackendKind> {
        let name = self.mapping.get("default").ok_or_else(|| {
            UpgradeError::config("missing_default_mapping", "persistence mapping has no 'default' entry")
        })?;
        name.parse()
    }
}

/// Flags and paths steering the run.
#[derive(Debug, Clone)]
pub struct UpgradeSettings {
    pub lock_enabled: bool,
    pub opa_url: String,
    pub bucket_prefix: String,
    pub lock_swagger_path: String,
}

impl Default for UpgradeSettings {
    fn default() -> Self {
        Self {
            lock_enabled: false,
            opa_url: DEFAULT_OPA_URL.to_string(),
            bucket_prefix: DEFAULT_BUCKET_PREFIX.to_string(),
            lock_swagger_path: DEFAULT_LOCK_SWAGGER.to_string(),
        }
    }
}

impl UpgradeSettings {
    pub fn from_env() -> Self { Self::from_lookup(env_lookup) }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(get: F) -> Self {
        let d = Self::default();
        Self {
            lock_enabled: get("CN_LOCK_ENABLED").and_then(|v| parse_bool(&v)).unwrap_or(d.lock_enabled),
            opa_url: get("CN_OPA_URL").unwrap_or(d.opa_url),
            bucket_prefix: get("CN_COUCHBASE_BUCKET_PREFIX").unwrap_or(d.bucket_prefix),
            lock_swagger_path: get("CN_LOCK_SWAGGER_FILE").unwrap_or(d.lock_swagger_path),
        }
    }
}

/// Endpoints of the concrete wire clients.
#[derive(Debug, Clone, Default)]
pub struct ClientSettings {
    pub sql_url: Option<String>,
    pub sql_dialect: String,
    pub couchbase_url: Option<String>,
    pub couchbase_user: String,
    pub couchbase_password: String,
}

impl ClientSettings {
    pub fn from_env() -> Self { Self::from_lookup(env_lookup) }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(get: F) -> Self {
        Self {
            sql_url: get("CN_SQL_URL"),
            sql_dialect: get("CN_SQL_DB_DIALECT").unwrap_or_else(|| "pgsql".to_string()),
            couchbase_url: get("CN_COUCHBASE_URL"),
            couchbase_user: get("CN_COUCHBASE_USER").unwrap_or_else(|| "admin".to_string()),
            couchbase_password: get("CN_COUCHBASE_PASSWORD").unwrap_or_default(),
        }
    }
}

/// Load the lock API swagger. YAML is a superset of JSON so both parse.
pub fn load_swagger(path: impl AsRef<Path>) -> UpgradeResult<Value> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| UpgradeError::io("swagger_unreadable".to_string(), format!("{}: {}", path.display(), e)))?;
    serde_yaml::from_str::<Value>(&text)
        .map_err(|e| UpgradeError::config("swagger_invalid".to_string(), format!("{}: {}", path.display(), e)))
}
