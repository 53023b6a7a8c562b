use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::engine::{EngineSnapshot, SharedEngine};
use crate::error::PersistError;

/// Copies engine state under the lock, then serialises and writes it with
/// the lock released. Writes go to a temp file that is renamed into place.
pub async fn save(engine: &SharedEngine, path: &Path) -> Result<usize, PersistError> {
    let snapshot = engine.lock().snapshot();
    let json = tokio::task::spawn_blocking(move || serde_json::to_vec(&snapshot))
        .await
        .map_err(std::io::Error::other)??;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = tmp_path(path);
    tokio::fs::write(&tmp, &json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(json.len())
}

/// `Ok(None)` when there is no snapshot at `path` yet.
pub async fn load(path: &Path) -> Result<Option<EngineSnapshot>, PersistError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Restores `engine` from `path` if a compatible snapshot exists.
pub async fn restore(engine: &SharedEngine, path: &Path) -> bool {
    match load(path).await {
        Ok(Some(snapshot)) => {
            let result = engine.lock().restore(snapshot);
            match result {
                Ok(()) => true,
                Err(e) => {
                    warn!("not restoring {}: {e}", path.display());
                    false
                }
            }
        }
        Ok(None) => {
            info!("no snapshot at {}, starting fresh", path.display());
            false
        }
        Err(e) => {
            warn!("failed to read snapshot {}: {e}", path.display());
            false
        }
    }
}

/// Periodic dumps until shutdown, then one last best-effort flush.
pub async fn run(
    engine: SharedEngine,
    path: PathBuf,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                save_logged(&engine, &path).await;
            }
            _ = shutdown.changed() => {
                info!("flushing snapshot before shutdown");
                save_logged(&engine, &path).await;
                break;
            }
        }
    }
}

async fn save_logged(engine: &SharedEngine, path: &Path) {
    match save(engine, path).await {
        Ok(bytes) => info!("snapshot saved to {} ({} bytes)", path.display(), bytes),
        Err(e) => warn!("snapshot to {} failed: {e}", path.display()),
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
