//! Directory backend. Keys are distinguished names and filters are LDAP search
//! expressions. Multi-valued attributes with a single value collapse to the
//! scalar so callers see the same shapes as on the other backends.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::entry::{Attrs, Entry, EntryOptions, ModifyOutcome};

pub const DEFAULT_FILTER: &str = "(objectClass=*)";

/// Raw entry as returned by a directory server: every attribute is a list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attrs: BTreeMap<String, Vec<Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifyOp {
    Replace,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Modification {
    pub op: ModifyOp,
    pub attr: String,
    pub values: Vec<Value>,
}

/// Wire client for a directory server.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Base-scope read of one entry; `None` when the DN does not exist.
    async fn get(&self, dn: &str, filter: &str, attrs: Option<&[String]>) -> Result<Option<DirectoryEntry>>;
    /// Subtree search below `base`.
    async fn search(&self, base: &str, filter: &str, attrs: Option<&[String]>) -> Result<Vec<DirectoryEntry>>;
    /// Apply modifications; returns the server's success flag and diagnostic message.
    async fn modify(&self, dn: &str, changes: Vec<Modification>) -> Result<(bool, String)>;
}

pub struct LdapBackend {
    client: Box<dyn DirectoryClient>,
}

impl LdapBackend {
    pub fn new(client: Box<dyn DirectoryClient>) -> Self { Self { client } }

    pub async fn get_entry(&self, key: &str, opts: &EntryOptions) -> Result<Option<Entry>> {
        let filter = opts.filter.as_deref().unwrap_or(DEFAULT_FILTER);
        let raw = self.client.get(key, filter, opts.attrs.as_deref()).await
            .with_context(|| format!("ldap read of '{}' failed", key))?;
        Ok(raw.map(|e| Entry::new(e.dn, format_attrs(e.attrs))))
    }

    pub async fn modify_entry(&self, key: &str, attrs: Attrs, opts: &EntryOptions) -> Result<ModifyOutcome> {
        let op = if opts.delete_attr { ModifyOp::Delete } else { ModifyOp::Replace };
        let changes: Vec<Modification> = attrs
            .into_iter()
            .map(|(attr, v)| {
                let values = match v {
                    Value::Array(items) => items,
                    other => vec![other],
                };
                Modification { op, attr, values }
            })
            .collect();
        let (success, message) = self.client.modify(key, changes).await
            .with_context(|| format!("ldap modify of '{}' failed", key))?;
        Ok(ModifyOutcome { success, message })
    }

    pub async fn search_entries(&self, base: &str, opts: &EntryOptions) -> Result<Vec<Entry>> {
        let filter = opts.filter.as_deref().unwrap_or(DEFAULT_FILTER);
        let raw = self.client.search(base, filter, opts.attrs.as_deref()).await
            .with_context(|| format!("ldap search under '{}' failed", base))?;
        Ok(raw.into_iter().map(|e| Entry::new(e.dn, format_attrs(e.attrs))).collect())
    }
}

/// Collapse single-valued attribute lists to their scalar.
pub fn format_attrs(raw: BTreeMap<String, Vec<Value>>) -> Attrs {
    let mut out = Attrs::new();
    for (k, mut values) in raw {
        let v = match values.len() {
            0 => Value::Null,
            1 => values.remove(0),
            _ => Value::Array(values),
        };
        out.insert(k, v);
    }
    out
}
