//! persistence.rs — High scores and stored ghosts on disk
//!
//! One pretty-printed JSON file. Loading never fails: a missing or unreadable
//! file starts the simulator with empty tables.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use course_types::GhostTrace;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};

use crate::highscores::HighScoreBook;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub high_scores: HighScoreBook,
    /// Reference ghost per course key
    #[serde(default)]
    pub ghosts: BTreeMap<String, GhostTrace>,
}

/// Load persisted state from disk. Returns default if file missing or corrupt.
pub async fn load_state(path: &Path) -> PersistedState {
    if !path.exists() {
        info!("No state file at {}, starting fresh", path.display());
        return PersistedState::default();
    }

    match fs::read_to_string(path).await {
        Ok(data) => match serde_json::from_str::<PersistedState>(&data) {
            Ok(mut state) => {
                // Drop ghosts that cannot be replayed
                state.ghosts.retain(|key, g| {
                    let keep = !g.is_empty();
                    if !keep {
                        warn!("Discarding stored ghost for '{key}' with no frames");
                    }
                    keep
                });
                for ghost in state.ghosts.values_mut() {
                    crate::ghost::sort_frames(&mut ghost.frames);
                }
                info!(
                    "Loaded state from {} ({} score tables, {} ghosts)",
                    path.display(),
                    state.high_scores.tables.len(),
                    state.ghosts.len()
                );
                state
            }
            Err(e) => {
                warn!("Failed to parse {}: {e}, starting fresh", path.display());
                PersistedState::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {}: {e}, starting fresh", path.display());
            PersistedState::default()
        }
    }
}

pub async fn save_state(path: &Path, state: &PersistedState) -> Result<()> {
    let json = serde_json::to_string_pretty(state).context("serializing state")?;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;
    }
    fs::write(path, json)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
