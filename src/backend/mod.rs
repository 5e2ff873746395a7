//!
//! persistence backends
//! --------------------
//! The upgrade runs unmodified against four structurally different stores. Each
//! store gets one adapter exposing the same three operations, and `Backend`
//! closes over the four so callers dispatch with an exhaustive match.
//!
//! Contract shared by every variant:
//! - `get_entry` returns `Ok(None)` for a missing record; not-found is never an error.
//! - `modify_entry` replaces attributes in place (or deletes them when
//!   `EntryOptions::delete_attr` is set) and reports `(success, message)`.
//! - `search_entries` returns the fully materialized result set.
//!
//! Connectivity and malformed-query failures propagate as `anyhow::Error`.

use std::fmt;
use std::str::FromStr;

use anyhow::Result;

use crate::config::ClientSettings;
use crate::entry::{Attrs, Entry, EntryOptions, ModifyOutcome};
use crate::error::{UpgradeError, UpgradeResult};
use crate::ident::{doc_id_from_dn, id_from_dn};

pub mod couchbase;
pub mod ldap;
pub mod sql;

pub use couchbase::{CouchbaseBackend, N1qlClient, QueryClient, QueryResponse};
pub use ldap::{DirectoryClient, DirectoryEntry, LdapBackend, Modification, ModifyOp};
pub use sql::{PgSqlClient, SqlBackend, SqlClient, SqlDialect};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Ldap,
    Sql,
    Spanner,
    Couchbase,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Ldap => "ldap",
            BackendKind::Sql => "sql",
            BackendKind::Spanner => "spanner",
            BackendKind::Couchbase => "couchbase",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for BackendKind {
    type Err = UpgradeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ldap" => Ok(BackendKind::Ldap),
            "sql" => Ok(BackendKind::Sql),
            "spanner" => Ok(BackendKind::Spanner),
            "couchbase" => Ok(BackendKind::Couchbase),
            other => Err(UpgradeError::config(
                "unknown_backend".to_string(),
                format!("unsupported persistence backend '{}'", other),
            )),
        }
    }
}

/// Wire clients available to the selector. Only the one matching the active
/// kind is consumed; the rest may stay `None`.
#[derive(Default)]
pub struct BackendClients {
    pub directory: Option<Box<dyn DirectoryClient>>,
    pub sql: Option<Box<dyn SqlClient>>,
    pub spanner: Option<Box<dyn SqlClient>>,
    pub query: Option<Box<dyn QueryClient>>,
}

impl BackendClients {
    /// Build the concrete client for `kind` from its configured endpoint.
    /// Directory and Spanner clients are supplied by the embedding process.
    pub fn from_settings(kind: BackendKind, settings: &ClientSettings) -> UpgradeResult<Self> {
        let mut clients = BackendClients::default();
        match kind {
            BackendKind::Sql => {
                if settings.sql_dialect != "pgsql" {
                    return Err(UpgradeError::config(
                        "unsupported_dialect".to_string(),
                        format!("no built-in client for sql dialect '{}'", settings.sql_dialect),
                    ));
                }
                let url = settings.sql_url.clone().ok_or_else(|| missing_client(kind))?;
                clients.sql = Some(Box::new(PgSqlClient::new(url)));
            }
            BackendKind::Couchbase => {
                let url = settings.couchbase_url.as_deref().ok_or_else(|| missing_client(kind))?;
                let client = N1qlClient::new(url, settings.couchbase_user.clone(), settings.couchbase_password.clone())
                    .map_err(|e| UpgradeError::config("bad_couchbase_url".to_string(), format!("{:#}", e)))?;
                clients.query = Some(Box::new(client));
            }
            BackendKind::Ldap | BackendKind::Spanner => {}
        }
        Ok(clients)
    }
}

fn missing_client(kind: BackendKind) -> UpgradeError {
    UpgradeError::config(
        "missing_client".to_string(),
        format!("no client configured for persistence backend '{}'", kind),
    )
}

pub enum Backend {
    Ldap(LdapBackend),
    Sql(SqlBackend),
    Spanner(SqlBackend),
    Couchbase(CouchbaseBackend),
}

impl Backend {
    /// Instantiate the single adapter for `kind`.
    pub fn select(kind: BackendKind, clients: BackendClients) -> UpgradeResult<Self> {
        let backend = match kind {
            BackendKind::Ldap => Backend::Ldap(LdapBackend::new(clients.directory.ok_or_else(|| missing_client(kind))?)),
            BackendKind::Sql => Backend::Sql(SqlBackend::new(clients.sql.ok_or_else(|| missing_client(kind))?)),
            BackendKind::Spanner => Backend::Spanner(SqlBackend::new(clients.spanner.ok_or_else(|| missing_client(kind))?)),
            BackendKind::Couchbase => Backend::Couchbase(CouchbaseBackend::new(clients.query.ok_or_else(|| missing_client(kind))?)),
        };
        Ok(backend)
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Ldap(_) => BackendKind::Ldap,
            Backend::Sql(_) => BackendKind::Sql,
            Backend::Spanner(_) => BackendKind::Spanner,
            Backend::Couchbase(_) => BackendKind::Couchbase,
        }
    }

    /// Dialect of the relational client, for the tabular variants only.
    pub fn sql_dialect(&self) -> Option<SqlDialect> {
        match self {
            Backend::Sql(b) | Backend::Spanner(b) => Some(b.dialect()),
            Backend::Ldap(_) | Backend::Couchbase(_) => None,
        }
    }

    /// Translate a DN into this backend's key plus the options it needs to reach
    /// the record.
    pub fn locate(&self, dn: &str, table: &str, bucket: &str) -> (String, EntryOptions) {
        match self {
            Backend::Ldap(_) => (dn.to_string(), EntryOptions::default()),
            Backend::Sql(_) | Backend::Spanner(_) => (doc_id_from_dn(dn), EntryOptions::table(table)),
            Backend::Couchbase(_) => (id_from_dn(dn), EntryOptions::bucket(bucket)),
        }
    }

    pub async fn get_entry(&self, key: &str, opts: &EntryOptions) -> Result<Option<Entry>> {
        match self {
            Backend::Ldap(b) => b.get_entry(key, opts).await,
            Backend::Sql(b) | Backend::Spanner(b) => b.get_entry(key, opts).await,
            Backend::Couchbase(b) => b.get_entry(key, opts).await,
        }
    }

    pub async fn modify_entry(&self, key: &str, attrs: Attrs, opts: &EntryOptions) -> Result<ModifyOutcome> {
        match self {
            Backend::Ldap(b) => b.modify_entry(key, attrs, opts).await,
            Backend::Sql(b) | Backend::Spanner(b) => b.modify_entry(key, attrs, opts).await,
            Backend::Couchbase(b) => b.modify_entry(key, attrs, opts).await,
        }
    }

    /// `base` is the search root on the directory backend and ignored elsewhere.
    pub async fn search_entries(&self, base: &str, opts: &EntryOptions) -> Result<Vec<Entry>> {
        match self {
            Backend::Ldap(b) => b.search_entries(base, opts).await,
            Backend::Sql(b) | Backend::Spanner(b) => b.search_entries(opts).await,
            Backend::Couchbase(b) => b.search_entries(opts).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parses_known_names_and_rejects_others() {
        assert_eq!("ldap".parse::<BackendKind>().unwrap(), BackendKind::Ldap);
        assert_eq!(" SQL ".parse::<BackendKind>().unwrap(), BackendKind::Sql);
        assert_eq!("spanner".parse::<BackendKind>().unwrap(), BackendKind::Spanner);
        assert_eq!("couchbase".parse::<BackendKind>().unwrap(), BackendKind::Couchbase);
        let err = "mongodb".parse::<BackendKind>().unwrap_err();
        assert_eq!(err.code_str(), "unknown_backend");
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn select_without_matching_client_is_a_config_error() {
        let err = match Backend::select(BackendKind::Couchbase, BackendClients::default()) {
            Err(e) => e,
            Ok(_) => panic!("selection must fail without a query client"),
        };
        assert_eq!(err.code_str(), "missing_client");
    }

    #[test]
    fn built_in_clients_follow_settings() {
        let pg = ClientSettings { sql_url: Some("postgres://jans@localhost/jans".into()), sql_dialect: "pgsql".into(), ..Default::default() };
        let clients = BackendClients::from_settings(BackendKind::Sql, &pg).unwrap();
        let backend = Backend::select(BackendKind::Sql, clients).unwrap();
        assert_eq!(backend.sql_dialect(), Some(SqlDialect::Pgsql));

        let mysql = ClientSettings { sql_dialect: "mysql".into(), ..pg };
        let err = BackendClients::from_settings(BackendKind::Sql, &mysql).err().unwrap();
        assert_eq!(err.code_str(), "unsupported_dialect");

        let clients = BackendClients::from_settings(BackendKind::Ldap, &ClientSettings::default()).unwrap();
        assert!(Backend::select(BackendKind::Ldap, clients).is_err());
    }
}
