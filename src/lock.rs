//! Named advisory lock around the upgrade.
//!
//! Several instances of the job may start during a rolling deployment; only one
//! may run the migration. `with_lock` acquires the named lock, runs the body and
//! releases on every exit path (the guard also releases on unwind).

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{UpgradeError, UpgradeResult};

pub const UPGRADE_LOCK_NAME: &str = "auth-upgrade";

/// Proof of ownership handed out by `acquire`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockToken {
    pub name: String,
    pub owner: String,
    pub acquired_at: DateTime<Utc>,
}

#[async_trait]
pub trait NamedLock: Send + Sync {
    async fn acquire(&self, name: &str) -> UpgradeResult<LockToken>;
    fn release(&self, token: &LockToken) -> UpgradeResult<()>;
}

struct LockGuard<'a, L: NamedLock + ?Sized> {
    lock: &'a L,
    token: Option<LockToken>,
}

impl<'a, L: NamedLock + ?Sized> LockGuard<'a, L> {
    fn release(mut self) -> UpgradeResult<()> {
        match self.token.take() {
            Some(t) => self.lock.release(&t),
            None => Ok(()),
        }
    }
}

impl<'a, L: NamedLock + ?Sized> Drop for LockGuard<'a, L> {
    fn drop(&mut self) {
        if let Some(t) = self.token.take() {
            if let Err(e) = self.lock.release(&t) {
                warn!(target: "auth_upgrade", "failed to release lock '{}': {}", t.name, e);
            }
        }
    }
}

/// Run `body` while holding the named lock.
pub async fn with_lock<L, F, Fut, T>(lock: &L, name: &str, body: F) -> UpgradeResult<T>
where
    L: NamedLock + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = UpgradeResult<T>>,
{
    let token = lock.acquire(name).await?;
    info!(target: "auth_upgrade", "acquired lock '{}'", name);
    let guard = LockGuard { lock, token: Some(token) };
    let result = body().await;
    let released = guard.release();
    match (result, released) {
        (Ok(v), Ok(())) => Ok(v),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(rel)) => {
            warn!(target: "auth_upgrade", "failed to release lock '{}': {}", name, rel);
            Err(e)
        }
    }
}

/// Lock file per name under a shared directory. Creation is exclusive, so only
/// one process can hold a given name. Files older than `stale_after` are taken
/// over to recover from crashed holders.
#[derive(Debug, Clone)]
pub struct FileLock {
    pub dir: PathBuf,
    pub retry_delay: Duration,
    pub max_wait: Duration,
    pub stale_after: Duration,
}

impl FileLock {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            retry_delay: Duration::from_secs(1),
            max_wait: Duration::from_secs(300),
            stale_after: Duration::from_secs(3600),
        }
    }

    fn path_for(&self, name: &str) -> PathBuf { self.dir.join(format!("{}.lock", name)) }

    fn read_token(&self, name: &str) -> Option<LockToken> {
        let text = std::fs::read_to_string(self.path_for(name)).ok()?;
        serde_json::from_str(&text).ok()
    }

    fn is_stale(&self, token: &LockToken) -> bool {
        let age = Utc::now().signed_duration_since(token.acquired_at);
        age.to_std().map(|a| a > self.stale_after).unwrap_or(false)
    }

    fn try_create(&self, token: &LockToken) -> std::io::Result<bool> {
        use std::io::Write;
        let path = self.path_for(&token.name);
        match std::fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut f) => {
                let body = serde_json::to_vec(token).map_err(std::io::Error::other)?;
                f.write_all(&body)?;
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Atomically move the lock file aside if it still belongs to `expected`.
    /// Returns false when the file is gone or another holder owns it now; in
    /// that case the file is put back untouched.
    fn detach_if_owned(&self, name: &str, expected: &LockToken) -> std::io::Result<bool> {
        let path = self.path_for(name);
        let tomb = self.dir.join(format!("{}.{}.detached", name, uuid::Uuid::new_v4()));
        match std::fs::rename(&path, &tomb) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        }
        let moved: Option<LockToken> = std::fs::read_to_string(&tomb).ok().and_then(|t| serde_json::from_str(&t).ok());
        if moved.as_ref().map(|t| t.owner == expected.owner).unwrap_or(false) {
            std::fs::remove_file(&tomb)?;
            return Ok(true);
        }
        // hard_link fails if a new holder already recreated the file
        match std::fs::hard_link(&tomb, &path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                warn!(target: "auth_upgrade", "lock '{}' was recreated while restoring a detached holder", name);
            }
            Err(e) => return Err(e),
        }
        std::fs::remove_file(&tomb)?;
        Ok(false)
    }
}

#[async_trait]
impl NamedLock for FileLock {
    async fn acquire(&self, name: &str) -> UpgradeResult<LockToken> {
        std::fs::create_dir_all(&self.dir)?;
        let started = std::time::Instant::now();
        loop {
            let token = LockToken { name: name.to_string(), owner: uuid::Uuid::new_v4().to_string(), acquired_at: Utc::now() };
            if self.try_create(&token)? {
                return Ok(token);
            }
            if let Some(held) = self.read_token(name) {
                if self.is_stale(&held) && self.detach_if_owned(name, &held)? {
                    warn!(target: "auth_upgrade", "took over stale lock '{}' held by {}", name, held.owner);
                    continue;
                }
            }
            if started.elapsed() >= self.max_wait {
                return Err(UpgradeError::lock("lock_busy".to_string(), format!("lock '{}' still held after {:?}", name, self.max_wait)));
            }
            tokio::time::sleep(self.retry_delay).await;
        }
    }

    fn release(&self, token: &LockToken) -> UpgradeResult<()> {
        if self.detach_if_owned(&token.name, token)? {
            return Ok(());
        }
        match self.read_token(&token.name) {
            Some(held) => Err(UpgradeError::lock(
                "lock_not_owned".to_string(),
                format!("lock '{}' is now held by {}", token.name, held.owner),
            )),
            None => Ok(()),
        }
    }
}
