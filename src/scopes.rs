//! Client scope reconciliation.
//!
//! The lock API swagger enumerates the scopes its client-credentials flow may
//! request. Those ids are resolved to storage keys through the scope catalog and
//! any key the client does not already hold is appended. Existing scopes are
//! never removed or reordered.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use anyhow::{anyhow, Result};
use serde_json::{Map, Value};

use crate::backend::SqlDialect;
use crate::entry::Entry;

/// Scope id (`jansId`) to storage key (DN or row reference).
pub type ScopeCatalog = BTreeMap<String, String>;

/// Client scope attribute as stored. The MySQL dialect wraps the list in `{"v": [...]}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeValue {
    Plain(Vec<String>),
    Tagged { v: Vec<String> },
}

fn string_list(v: Option<&Value>) -> Vec<String> {
    match v {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|i| match i {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        Some(other) => vec![other.to_string()],
    }
}

impl ScopeValue {
    /// Normalize the stored attribute: scalars become one-item lists, absent or
    /// null becomes empty.
    pub fn from_attr(value: Option<&Value>, dialect: Option<SqlDialect>) -> Self {
        if dialect.map(|d| d.wraps_lists()).unwrap_or(false) {
            let inner = match value {
                Some(Value::Object(obj)) => obj.get("v"),
                // some rows hold the wrapper as a JSON string
                Some(Value::String(s)) => {
                    return match serde_json::from_str::<Value>(s) {
                        Ok(Value::Object(obj)) => ScopeValue::Tagged { v: string_list(obj.get("v")) },
                        _ => ScopeValue::Tagged { v: vec![s.clone()] },
                    };
                }
                other => other,
            };
            return ScopeValue::Tagged { v: string_list(inner) };
        }
        ScopeValue::Plain(string_list(value))
    }

    pub fn scopes(&self) -> &[String] {
        match self {
            ScopeValue::Plain(v) | ScopeValue::Tagged { v } => v,
        }
    }

    pub fn with_scopes(&self, scopes: Vec<String>) -> Self {
        match self {
            ScopeValue::Plain(_) => ScopeValue::Plain(scopes),
            ScopeValue::Tagged { .. } => ScopeValue::Tagged { v: scopes },
        }
    }

    pub fn into_attr(self) -> Value {
        match self {
            ScopeValue::Plain(v) => Value::Array(v.into_iter().map(Value::String).collect()),
            ScopeValue::Tagged { v } => {
                let mut obj = Map::new();
                obj.insert("v".to_string(), Value::Array(v.into_iter().map(Value::String).collect()));
                Value::Object(obj)
            }
        }
    }
}

/// Scope ids listed under the client-credentials flow of the lock API swagger.
pub fn lock_scope_ids(swagger: &Value) -> Result<Vec<String>> {
    let scopes = swagger
        .pointer("/components/securitySchemes/oauth2/flows/clientCredentials/scopes")
        .ok_or_else(|| anyhow!("swagger has no components.securitySchemes.oauth2.flows.clientCredentials.scopes"))?;
    let obj = scopes.as_object().ok_or_else(|| anyhow!("clientCredentials.scopes is not a mapping"))?;
    Ok(obj.keys().cloned().collect())
}

/// Index scope records by `jansId`. The record's `dn` attribute wins over its
/// backend id so tabular rows resolve to the same keys as directory entries.
pub fn build_scope_catalog(entries: &[Entry]) -> ScopeCatalog {
    let mut catalog = ScopeCatalog::new();
    for entry in entries {
        let Some(jans_id) = entry.get_str("jansId") else { continue };
        let key = entry.get_str("dn").filter(|d| !d.is_empty()).unwrap_or(entry.id.as_str());
        catalog.insert(jans_id.to_string(), key.to_string());
    }
    catalog
}

/// Append to `current` every catalog key whose scope id is in `schema_ids` and
/// which the client does not hold yet. Returns the new list and whether it grew.
pub fn reconcile_scopes(schema_ids: &[String], catalog: &ScopeCatalog, current: &[String]) -> (Vec<String>, bool) {
    let wanted: HashSet<&str> = schema_ids.iter().map(String::as_str).collect();
    let held: HashSet<&str> = current.iter().map(String::as_str).collect();
    let missing: BTreeSet<&str> = catalog
        .iter()
        .filter(|(id, _)| wanted.contains(id.as_str()))
        .map(|(_, key)| key.as_str())
        .filter(|key| !held.contains(key))
        .collect();
    if missing.is_empty() {
        return (current.to_vec(), false);
    }
    let mut out = current.to_vec();
    out.extend(missing.into_iter().map(str::to_string));
    (out, true)
}
