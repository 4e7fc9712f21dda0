//! highscores.rs — Per-course high-score tables
//!
//! Tables keep the 15 fastest laps, ascending by time. An entry may carry a
//! downsampled copy of its ghost so it can be challenged later. Tables that
//! grow past the storage limit keep ghosts only for the podium.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use course_types::{GhostFrame, GhostTrace};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::ghost::sort_frames;

pub const MAX_ENTRIES: usize = 15;
pub const MAX_GHOST_FRAMES: usize = 200;
/// Serialized table size above which ghosts are pruned, bytes
pub const STORAGE_LIMIT_BYTES: usize = 2_000_000;
pub const GHOST_KEEP_TOP: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub nickname: String,
    pub time_s: f64,
    #[serde(default)]
    pub distance_m: f64,
    pub date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ghost: Option<Vec<GhostFrame>>,
}

impl ScoreEntry {
    pub fn new(nickname: &str, time_s: f64, distance_m: f64, ghost: Option<&[GhostFrame]>) -> Self {
        Self {
            nickname: nickname.trim().to_string(),
            time_s,
            distance_m,
            date: Utc::now(),
            ghost: ghost.map(downsample_ghost),
        }
    }

    /// The stored ghost as a replayable trace, if the entry kept one.
    pub fn challenge_trace(&self, course_key: &str) -> Option<GhostTrace> {
        let mut frames = self.ghost.clone().filter(|f| !f.is_empty())?;
        sort_frames(&mut frames);
        let avg_speed_kmh = if self.time_s > 0.0 { self.distance_m / self.time_s * 3.6 } else { 0.0 };
        Some(GhostTrace {
            course_key: course_key.to_string(),
            distance_m: self.distance_m,
            time_s: self.time_s,
            avg_speed_kmh,
            frames,
        })
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn rounded(f: &GhostFrame) -> GhostFrame {
    GhostFrame {
        time_s: round2(f.time_s),
        x: round2(f.x),
        y: round2(f.y),
        heading: round2(f.heading),
        speed_kmh: round2(f.speed_kmh),
        avg_speed_kmh: round2(f.avg_speed_kmh),
    }
}

/// At most [`MAX_GHOST_FRAMES`] evenly strided frames plus the final frame,
/// rounded to two decimals.
pub fn downsample_ghost(frames: &[GhostFrame]) -> Vec<GhostFrame> {
    let Some(last) = frames.last() else {
        return Vec::new();
    };
    let stride = (frames.len() / MAX_GHOST_FRAMES).max(1);
    let mut sampled: Vec<GhostFrame> = frames
        .iter()
        .step_by(stride)
        .take(MAX_GHOST_FRAMES)
        .map(rounded)
        .collect();
    sampled.push(rounded(last));
    sampled
}

// ── Tables ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HighScoreTable {
    #[serde(default)]
    pub entries: Vec<ScoreEntry>,
}

impl HighScoreTable {
    /// Would a lap of `time_s` make the table?
    pub fn qualifies(&self, time_s: f64) -> bool {
        if self.entries.len() < MAX_ENTRIES {
            return true;
        }
        self.entries.last().map_or(true, |slowest| time_s < slowest.time_s)
    }

    /// Insert an entry in time order. Returns its rank (0 = fastest), or
    /// `None` when it fell off the bottom of the table.
    pub fn submit(&mut self, entry: ScoreEntry) -> Option<usize> {
        let rank = self.entries.partition_point(|e| e.time_s <= entry.time_s);
        self.entries.insert(rank, entry);
        self.entries.truncate(MAX_ENTRIES);
        self.enforce_storage_limit();
        (rank < MAX_ENTRIES).then_some(rank)
    }

    pub fn serialized_len(&self) -> usize {
        serde_json::to_string(self).map(|s| s.len()).unwrap_or(0)
    }

    fn enforce_storage_limit(&mut self) {
        let size = self.serialized_len();
        if size <= STORAGE_LIMIT_BYTES {
            return;
        }
        warn!("High-score table is {size} bytes, dropping ghosts below rank {GHOST_KEEP_TOP}");
        for entry in self.entries.iter_mut().skip(GHOST_KEEP_TOP) {
            entry.ghost = None;
        }
    }
}

/// High-score tables for every course, keyed by course key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HighScoreBook {
    #[serde(default)]
    pub tables: BTreeMap<String, HighScoreTable>,
}

impl HighScoreBook {
    pub fn table(&self, course_key: &str) -> Option<&HighScoreTable> {
        self.tables.get(course_key)
    }

    pub fn qualifies(&self, course_key: &str, time_s: f64) -> bool {
        self.table(course_key).map_or(true, |t| t.qualifies(time_s))
    }

    pub fn submit(&mut self, course_key: &str, entry: ScoreEntry) -> Option<usize> {
        let nickname = entry.nickname.clone();
        let time_s = entry.time_s;
        let rank = self.tables.entry(course_key.to_string()).or_default().submit(entry);
        match rank {
            Some(r) => info!("High score on '{course_key}': #{} {nickname} {time_s:.2}s", r + 1),
            None => info!("{nickname} {time_s:.2}s on '{course_key}' did not make the table"),
        }
        rank
    }

    /// Challenge trace for the entry at `rank` on a course.
    pub fn challenge(&self, course_key: &str, rank: usize) -> Option<GhostTrace> {
        self.table(course_key)?.entries.get(rank)?.challenge_trace(course_key)
    }
}
