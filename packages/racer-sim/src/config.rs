//! config.rs — Simulator configuration and course catalog loading
//!
//! Both files fall back to the copies embedded at build time when the path
//! given on the command line cannot be read. A file that reads but does not
//! parse is an error.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use course_types::CourseCatalog;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::apex::ApexConfig;
use crate::commentary::CommentaryConfig;
use crate::course;
use crate::lap_timing::LapTimingConfig;
use crate::motion::{PhysicsConfig, WorldSize};
use crate::session::SessionConfig;

pub const EMBEDDED_CONFIG: &str = include_str!("../config.toml");
pub const EMBEDDED_COURSES: &str = include_str!("../courses.toml");

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FullConfig {
    pub simulation: SimulationConfig,
    pub physics: PhysicsConfig,
    pub timing: LapTimingConfig,
    pub apex: ApexConfig,
    pub commentary: CommentaryConfig,
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub world_width: f64,
    pub world_height: f64,
    pub frame_rate_hz: f64,
    pub default_course: Option<String>,
    pub telemetry_every: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            world_width: 1280.0,
            world_height: 720.0,
            frame_rate_hz: 60.0,
            default_course: None,
            telemetry_every: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub state_file: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self { state_file: PathBuf::from("racer-state.json") }
    }
}

impl FullConfig {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            world: WorldSize {
                width: self.simulation.world_width,
                height: self.simulation.world_height,
            },
            physics: self.physics.clone(),
            timing: self.timing.clone(),
            apex: self.apex.clone(),
        }
    }
}

fn read_or_embedded(path: &Path, embedded: &'static str) -> String {
    match std::fs::read_to_string(path) {
        Ok(s) => {
            info!("Read {}", path.display());
            s
        }
        Err(e) => {
            info!("{} not readable ({e}), using built-in copy", path.display());
            embedded.to_string()
        }
    }
}

pub fn load_config(path: &Path) -> Result<FullConfig> {
    let raw = read_or_embedded(path, EMBEDDED_CONFIG);
    let cfg: FullConfig = toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    let hz = cfg.simulation.frame_rate_hz;
    if hz.is_nan() || hz <= 0.0 {
        anyhow::bail!("simulation.frame_rate_hz must be positive");
    }
    Ok(cfg)
}

/// Load the course catalog. Courses that fail validation are kept (they load
/// untimed) but logged.
pub fn load_courses(path: &Path) -> Result<CourseCatalog> {
    let raw = read_or_embedded(path, EMBEDDED_COURSES);
    let catalog: CourseCatalog = toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    for c in &catalog.courses {
        if let Err(e) = course::validate(c) {
            warn!("Course '{}' is invalid and will run untimed: {e}", c.key);
        }
    }
    if catalog.courses.is_empty() {
        anyhow::bail!("no courses defined in {}", path.display());
    }
    Ok(catalog)
}
