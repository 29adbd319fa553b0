//! Canvas snapshot persistence.

use asyncplace_core::pixel::Pixel;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::state::AppState;

/// Persistence errors.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Snapshot format error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Load a canvas snapshot. A missing file is an empty canvas.
pub fn load_snapshot(path: &Path) -> Result<Vec<Pixel>, PersistError> {
    let json = match std::fs::read_to_string(path) {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_str(&json)?)
}

/// Write a canvas snapshot, replacing the previous file only once fully written.
pub fn save_snapshot(path: &Path, pixels: &[Pixel]) -> Result<(), PersistError> {
    let json = serde_json::to_string(pixels)?;
    let tmp = tmp_path(path);
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Save the canvas if it changed since the last save.
pub fn save_if_dirty(state: &AppState, path: &Path) -> Result<bool, PersistError> {
    if !state.take_dirty() {
        return Ok(false);
    }
    let pixels = state.canvas_snapshot();
    save_snapshot(path, &pixels)?;
    debug!("Saved {} pixels to {}", pixels.len(), path.display());
    Ok(true)
}

/// Periodically persist the canvas until the task is dropped.
pub async fn run_autosave(state: Arc<AppState>, path: PathBuf, period: Duration) {
    info!("Autosaving canvas to {} every {:?}", path.display(), period);
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if let Err(e) = save_if_dirty(&state, &path) {
            error!("Autosave failed: {}", e);
        }
    }
}
