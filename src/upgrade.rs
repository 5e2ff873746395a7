//!
//! upgrade orchestrator
//! --------------------
//! Sequences the migration against the active backend:
//!
//! `start -> lock flag check -> dynamic config -> client scopes -> done`
//!
//! The whole sequence is skipped when the lock feature is disabled. Each step
//! fetches one record, computes a new attribute set in memory and writes back
//! only when something changed. A missing record is a no-op; backend failures
//! abort the run without retries.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::backend::{Backend, BackendKind};
use crate::config::{load_swagger, ConfigProvider, UpgradeSettings};
use crate::entry::{Attrs, Entry, EntryOptions};
use crate::error::{UpgradeError, UpgradeResult};
use crate::scopes::{build_scope_catalog, lock_scope_ids, reconcile_scopes, ScopeCatalog, ScopeValue};
use crate::transform::{transform_lock_dynamic_config, TransformContext};

pub const LOCK_CONFIG_DN: &str = "ou=jans-lock,ou=configuration,o=jans";
pub const SCOPES_BASE_DN: &str = "ou=scopes,o=jans";
pub const APP_CONF_TABLE: &str = "jansAppConf";
pub const CLIENT_TABLE: &str = "jansClnt";
pub const SCOPE_TABLE: &str = "jansScope";
pub const CONF_ATTR: &str = "jansConfDyn";
pub const REVISION_ATTR: &str = "jansRevision";
pub const SCOPE_ATTR: &str = "jansScope";

pub fn client_dn(client_id: &str) -> String { format!("inum={},ou=clients,o=jans", client_id) }

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("document attribute is missing")]
    Missing,
    #[error("document is neither a JSON string nor an object")]
    Shape,
    #[error("document is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decode a stored document. Query backends hand back objects; the others store
/// a JSON string.
pub fn decode_document(raw: Option<&Value>) -> Result<Value, DecodeError> {
    match raw {
        None | Some(Value::Null) => Err(DecodeError::Missing),
        Some(Value::String(s)) => Ok(serde_json::from_str(s)?),
        Some(v @ Value::Object(_)) => Ok(v.clone()),
        Some(_) => Err(DecodeError::Shape),
    }
}

/// Encode a document back into the shape it was stored in.
pub fn encode_document(doc: Value, as_string: bool) -> Value {
    if as_string { Value::String(doc.to_string()) } else { doc }
}

/// Next revision, keeping the stored representation (directory servers may
/// return numbers as strings). A missing revision starts at 1; anything that is
/// not an integer, or would overflow, is rejected rather than reset.
pub fn bump_revision(current: Option<&Value>) -> UpgradeResult<Value> {
    let bad = |raw: &Value| UpgradeError::query("bad_revision".to_string(), format!("{} is not an integer revision: {}", REVISION_ATTR, raw));
    match current {
        None | Some(Value::Null) => Ok(Value::from(1)),
        Some(raw @ Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                i.checked_add(1).map(Value::from).ok_or_else(|| bad(raw))
            } else if let Some(u) = n.as_u64() {
                u.checked_add(1).map(Value::from).ok_or_else(|| bad(raw))
            } else {
                Err(bad(raw))
            }
        }
        Some(raw @ Value::String(s)) => s.trim().parse::<i64>().ok()
            .and_then(|i| i.checked_add(1))
            .map(|i| Value::String(i.to_string()))
            .ok_or_else(|| bad(raw)),
        Some(raw) => Err(bad(raw)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    /// Record not found; nothing to migrate.
    Absent,
    Unchanged,
    /// Stored document could not be decoded and was left alone.
    Undecodable,
    Updated,
}

impl StepOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepOutcome::Absent => "absent",
            StepOutcome::Unchanged => "unchanged",
            StepOutcome::Undecodable => "undecodable",
            StepOutcome::Updated => "updated",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UpgradeReport {
    pub skipped: bool,
    pub dynamic_config: Option<StepOutcome>,
    pub client_scopes: Option<StepOutcome>,
}

pub struct Upgrade {
    backend: Backend,
    settings: UpgradeSettings,
    hostname: Option<String>,
    client_id: Option<String>,
    client_password: Option<String>,
    swagger: Option<Value>,
}

impl Upgrade {
    pub fn new(backend: Backend, settings: UpgradeSettings, provider: &dyn ConfigProvider) -> Self {
        Self {
            backend,
            settings,
            hostname: provider.config("hostname"),
            client_id: provider.config("lock_client_id"),
            client_password: provider.secret("lock_client_encoded_pw"),
            swagger: None,
        }
    }

    /// Use an already loaded lock API swagger instead of reading the configured file.
    pub fn with_swagger(mut self, swagger: Value) -> Self {
        self.swagger = Some(swagger);
        self
    }

    pub fn backend(&self) -> &Backend { &self.backend }

    pub async fn invoke(&self) -> UpgradeResult<UpgradeReport> {
        info!(target: "auth_upgrade", "Running upgrade process (if required) backend={}", self.backend.kind());
        if !self.settings.lock_enabled {
            info!(target: "auth_upgrade", "lock feature disabled; skipping migration");
            return Ok(UpgradeReport { skipped: true, ..Default::default() });
        }
        let dynamic_config = self.update_lock_dynamic_config().await?;
        log_outcome("lock_dynamic_config", dynamic_config);
        let client_scopes = self.update_lock_client_scopes().await?;
        log_outcome("lock_client_scopes", client_scopes);
        Ok(UpgradeReport { skipped: false, dynamic_config: Some(dynamic_config), client_scopes: Some(client_scopes) })
    }

    fn locate(&self, dn: &str, table: &str) -> (String, EntryOptions) {
        self.backend.locate(dn, table, &self.settings.bucket_prefix)
    }

    fn transform_context(&self) -> UpgradeResult<TransformContext> {
        let hostname = self.hostname.clone()
            .ok_or_else(|| UpgradeError::config("missing_hostname", "deployment config has no hostname"))?;
        Ok(TransformContext {
            hostname,
            opa_url: self.settings.opa_url.clone(),
            client_id: self.client_id.clone(),
            client_password: self.client_password.clone(),
        })
    }

    async fn write(&self, entry: &Entry, attrs: Attrs, opts: &EntryOptions) -> UpgradeResult<()> {
        let outcome = self.backend.modify_entry(&entry.id, attrs, opts).await?;
        if !outcome.success {
            return Err(UpgradeError::write(
                "write_failed".to_string(),
                format!("{} backend rejected update of '{}': {}", self.backend.kind(), entry.id, outcome.message),
            ));
        }
        Ok(())
    }

    pub async fn update_lock_dynamic_config(&self) -> UpgradeResult<StepOutcome> {
        let (key, opts) = self.locate(LOCK_CONFIG_DN, APP_CONF_TABLE);
        let Some(entry) = self.backend.get_entry(&key, &opts).await? else {
            return Ok(StepOutcome::Absent);
        };

        let raw = entry.get(CONF_ATTR);
        let stored_as_string = matches!(raw, Some(Value::String(_)));
        let doc = match decode_document(raw) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(target: "auth_upgrade", "leaving {} of '{}' untouched: {}", CONF_ATTR, entry.id, e);
                return Ok(StepOutcome::Undecodable);
            }
        };

        let (conf, changed) = transform_lock_dynamic_config(doc, &self.transform_context()?);
        if !changed {
            return Ok(StepOutcome::Unchanged);
        }

        let mut attrs = Attrs::new();
        attrs.insert(CONF_ATTR.to_string(), encode_document(conf, stored_as_string));
        attrs.insert(REVISION_ATTR.to_string(), bump_revision(entry.get(REVISION_ATTR))?);
        self.write(&entry, attrs, &opts).await?;
        Ok(StepOutcome::Updated)
    }

    /// Scope id -> storage key for every scope record in the backend.
    pub async fn get_all_scopes(&self) -> UpgradeResult<ScopeCatalog> {
        let entries = match self.backend.kind() {
            BackendKind::Sql | BackendKind::Spanner => {
                self.backend.search_entries("", &EntryOptions::table(SCOPE_TABLE)).await?
            }
            BackendKind::Couchbase => {
                let opts = EntryOptions::bucket(self.settings.bucket_prefix.clone())
                    .with_filter("WHERE objectClass = 'jansScope'");
                self.backend.search_entries("", &opts).await?
            }
            BackendKind::Ldap => {
                let opts = EntryOptions::default().with_filter("(objectClass=jansScope)");
                self.backend.search_entries(SCOPES_BASE_DN, &opts).await?
            }
        };
        Ok(build_scope_catalog(&entries))
    }

    fn lock_scope_ids(&self) -> UpgradeResult<Vec<String>> {
        let loaded;
        let swagger = match &self.swagger {
            Some(s) => s,
            None => {
                loaded = load_swagger(&self.settings.lock_swagger_path)?;
                &loaded
            }
        };
        lock_scope_ids(swagger).map_err(|e| UpgradeError::config("swagger_invalid".to_string(), e.to_string()))
    }

    pub async fn update_lock_client_scopes(&self) -> UpgradeResult<StepOutcome> {
        let Some(client_id) = self.client_id.as_deref() else {
            warn!(target: "auth_upgrade", "no lock client id configured; skipping client scopes");
            return Ok(StepOutcome::Absent);
        };
        let (key, opts) = self.locate(&client_dn(client_id), CLIENT_TABLE);
        let Some(entry) = self.backend.get_entry(&key, &opts).await? else {
            return Ok(StepOutcome::Absent);
        };

        let current = ScopeValue::from_attr(entry.get(SCOPE_ATTR), self.backend.sql_dialect());
        let catalog = self.get_all_scopes().await?;
        let ids = self.lock_scope_ids()?;

        let (scopes, changed) = reconcile_scopes(&ids, &catalog, current.scopes());
        if !changed {
            return Ok(StepOutcome::Unchanged);
        }

        let mut attrs = Attrs::new();
        attrs.insert(SCOPE_ATTR.to_string(), current.with_scopes(scopes).into_attr());
        self.write(&entry, attrs, &opts).await?;
        Ok(StepOutcome::Updated)
    }
}

fn log_outcome(step: &str, outcome: StepOutcome) {
    info!(target: "auth_upgrade", step = step, outcome = outcome.as_str(), "upgrade step finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_handles_strings_objects_and_garbage() {
        assert_eq!(decode_document(Some(&json!("{\"a\":1}"))).unwrap(), json!({"a": 1}));
        assert_eq!(decode_document(Some(&json!({"a": 1}))).unwrap(), json!({"a": 1}));
        assert!(matches!(decode_document(Some(&json!("{not json"))), Err(DecodeError::Json(_))));
        assert!(matches!(decode_document(None), Err(DecodeError::Missing)));
        assert!(matches!(decode_document(Some(&json!(5))), Err(DecodeError::Shape)));
    }

    #[test]
    fn encode_mirrors_stored_shape() {
        assert_eq!(encode_document(json!({"a": 1}), true), json!("{\"a\":1}"));
        assert_eq!(encode_document(json!({"a": 1}), false), json!({"a": 1}));
    }

    #[test]
    fn revision_bumps_by_one_in_place() {
        assert_eq!(bump_revision(Some(&json!(7))).unwrap(), json!(8));
        assert_eq!(bump_revision(Some(&json!("7"))).unwrap(), json!("8"));
        assert_eq!(bump_revision(None).unwrap(), json!(1));
        assert_eq!(bump_revision(Some(&json!(u64::MAX - 1))).unwrap(), json!(u64::MAX));
    }

    #[test]
    fn revision_that_cannot_grow_is_rejected() {
        for raw in [json!(2.5), json!(u64::MAX), json!("abc"), json!(i64::MAX.to_string()), json!([1])] {
            let err = bump_revision(Some(&raw)).unwrap_err();
            assert_eq!(err.code_str(), "bad_revision", "{raw}");
        }
    }

    #[test]
    fn client_dn_format() {
        assert_eq!(client_dn("abc"), "inum=abc,ou=clients,o=jans");
    }
}
