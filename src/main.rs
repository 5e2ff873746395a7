use tracing_subscriber::{EnvFilter, fmt};
use tracing::{error, info, warn};

use auth_upgrade::backend::{Backend, BackendClients};
use auth_upgrade::config::{ClientSettings, EnvConfigProvider, PersistenceMapping, UpgradeSettings};
use auth_upgrade::lock::{with_lock, FileLock, UPGRADE_LOCK_NAME};
use auth_upgrade::{Upgrade, UpgradeResult};

async fn run() -> UpgradeResult<()> {
    // Unknown kinds fail even when the feature is off; clients are only built once enabled
    let kind = PersistenceMapping::from_env()?.default_kind()?;
    let settings = UpgradeSettings::from_env();
    if !settings.lock_enabled {
        info!(target: "auth_upgrade", "lock feature disabled; skipping migration");
        return Ok(());
    }

    let clients = BackendClients::from_settings(kind, &ClientSettings::from_env())?;
    let backend = Backend::select(kind, clients)?;

    let lock_dir = match std::env::var("CN_UPGRADE_LOCK_DIR") {
        Ok(dir) => dir,
        Err(_) => {
            let dir = std::env::temp_dir().display().to_string();
            warn!(
                target: "auth_upgrade",
                "CN_UPGRADE_LOCK_DIR not set; locking in local '{}', other instances will not see this lock",
                dir
            );
            dir
        }
    };
    let lock = FileLock::new(lock_dir);

    let upgrade = Upgrade::new(backend, settings, &EnvConfigProvider);
    let report = with_lock(&lock, UPGRADE_LOCK_NAME, || upgrade.invoke()).await?;
    info!(
        target: "auth_upgrade",
        "upgrade finished: skipped={}, dynamic_config={:?}, client_scopes={:?}",
        report.skipped, report.dynamic_config, report.client_scopes
    );
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let persistence = std::env::var("CN_PERSISTENCE_TYPE").unwrap_or_else(|_| "<unset>".to_string());
    info!(target: "auth_upgrade", "auth upgrade starting: persistence='{}'", persistence);

    if let Err(e) = run().await {
        error!(target: "auth_upgrade", "upgrade failed: {}", e);
        std::process::exit(e.exit_code());
    }
}
