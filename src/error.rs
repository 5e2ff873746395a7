//! Unified upgrade error model.
//! One error enum shared by the selector, adapters and orchestrator, with helpers
//! to map failures onto log fields and process exit codes.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpgradeError {
    Config { code: String, message: String },
    Backend { code: String, message: String },
    Query { code: String, message: String },
    Write { code: String, message: String },
    Lock { code: String, message: String },
    Io { code: String, message: String },
    Internal { code: String, message: String },
}

impl UpgradeError {
    pub fn code_str(&self) -> &str {
        match self {
            UpgradeError::Config { code, .. }
            | UpgradeError::Backend { code, .. }
            | UpgradeError::Query { code, .. }
            | UpgradeError::Write { code, .. }
            | UpgradeError::Lock { code, .. }
            | UpgradeError::Io { code, .. }
            | UpgradeError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            UpgradeError::Config { message, .. }
            | UpgradeError::Backend { message, .. }
            | UpgradeError::Query { message, .. }
            | UpgradeError::Write { message, .. }
            | UpgradeError::Lock { message, .. }
            | UpgradeError::Io { message, .. }
            | UpgradeError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn config<S: Into<String>>(code: S, msg: S) -> Self { UpgradeError::Config { code: code.into(), message: msg.into() } }
    pub fn backend<S: Into<String>>(code: S, msg: S) -> Self { UpgradeError::Backend { code: code.into(), message: msg.into() } }
    pub fn query<S: Into<String>>(code: S, msg: S) -> Self { UpgradeError::Query { code: code.into(), message: msg.into() } }
    pub fn write<S: Into<String>>(code: S, msg: S) -> Self { UpgradeError::Write { code: code.into(), message: msg.into() } }
    pub fn lock<S: Into<String>>(code: S, msg: S) -> Self { UpgradeError::Lock { code: code.into(), message: msg.into() } }
    pub fn io<S: Into<String>>(code: S, msg: S) -> Self { UpgradeError::Io { code: code.into(), message: msg.into() } }
    pub fn internal<S: Into<String>>(code: S, msg: S) -> Self { UpgradeError::Internal { code: code.into(), message: msg.into() } }

    /// Map to a process exit code. Configuration problems are distinguished from
    /// runtime failures so deployment tooling can tell them apart.
    pub fn exit_code(&self) -> i32 {
        match self {
            UpgradeError::Config { .. } => 2,
            UpgradeError::Backend { .. } | UpgradeError::Query { .. } => 3,
            UpgradeError::Write { .. } => 4,
            UpgradeError::Lock { .. } => 5,
            UpgradeError::Io { .. } => 6,
            UpgradeError::Internal { .. } => 1,
        }
    }
}

impl Display for UpgradeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for UpgradeError {}

pub type UpgradeResult<T> = Result<T, UpgradeError>;

impl From<anyhow::Error> for UpgradeError {
    fn from(err: anyhow::Error) -> Self {
        // Adapters report connectivity and query failures through anyhow
        UpgradeError::Backend { code: "backend_error".into(), message: format!("{:#}", err) }
    }
}

impl From<std::io::Error> for UpgradeError {
    fn from(err: std::io::Error) -> Self {
        UpgradeError::Io { code: "io_error".into(), message: err.to_string() }
    }
}
