//! ghost.rs — Ghost lap recording and replay
//!
//! The recorder appends one [`GhostFrame`] per tick of an active lap, in track
//! meters. Replay is a pure function of lap time over a time-sorted frame
//! slice: no cursor, so queries may come in any order and repeat freely.
//!
//! Heading is interpolated as a plain number. A trace that crosses the ±π seam
//! sweeps the long way round between the two bracketing frames.

use course_types::{GhostFrame, GhostTrace};
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

// ── Recording ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct GhostRecorder {
    frames: Vec<GhostFrame>,
}

impl GhostRecorder {
    pub fn new() -> Self { Self::default() }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn record(&mut self, frame: GhostFrame) {
        self.frames.push(frame);
    }

    pub fn len(&self) -> usize { self.frames.len() }

    pub fn is_empty(&self) -> bool { self.frames.is_empty() }

    /// Hand the recorded frames over as a finished trace. The recorder is left
    /// empty.
    pub fn finish(&mut self, course_key: &str, distance_m: f64, time_s: f64, avg_speed_kmh: f64) -> GhostTrace {
        GhostTrace {
            course_key: course_key.to_string(),
            distance_m,
            time_s,
            avg_speed_kmh,
            frames: std::mem::take(&mut self.frames),
        }
    }
}

// ── Replay ────────────────────────────────────────────────────────────────────

/// Ghost pose at lap time `t`.
///
/// At or before the first frame, and at or after the last, the boundary frame
/// is returned verbatim. In between, position and heading are interpolated
/// between the bracketing frames; speeds are carried from the earlier one.
pub fn ghost_pose_at(frames: &[GhostFrame], t: f64) -> Option<GhostFrame> {
    let first = frames.first()?;
    let last = frames.last()?;

    if t.is_nan() || t <= first.time_s {
        return Some(*first);
    }
    if t >= last.time_s {
        return Some(*last);
    }

    // first frame strictly after t; 1 <= idx < len given the checks above
    let idx = frames.partition_point(|f| f.time_s <= t);
    let (Some(prev), Some(next)) = (frames.get(idx.wrapping_sub(1)), frames.get(idx)) else {
        return Some(*last);
    };

    let span = next.time_s - prev.time_s;
    if span <= 0.0 {
        return Some(*prev);
    }
    let ratio = (t - prev.time_s) / span;

    Some(GhostFrame {
        time_s: t,
        x: prev.x + ratio * (next.x - prev.x),
        y: prev.y + ratio * (next.y - prev.y),
        heading: prev.heading + ratio * (next.heading - prev.heading),
        speed_kmh: prev.speed_kmh,
        avg_speed_kmh: prev.avg_speed_kmh,
    })
}

/// Sort frames ascending by time. Imported and stored traces go through this
/// before replay.
pub fn sort_frames(frames: &mut [GhostFrame]) {
    frames.sort_by(|a, b| a.time_s.total_cmp(&b.time_s));
}

// ── Export / import ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum GhostImportError {
    #[error("ghost data is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("ghost data contains no usable traces")]
    NoTraces,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GhostPayload {
    Many(Vec<GhostTrace>),
    One(GhostTrace),
}

/// Parse exported ghost data: a JSON array of traces or a single trace.
/// Traces without frames are skipped; frames are sorted by time.
pub fn parse_ghosts(json: &str) -> Result<Vec<GhostTrace>, GhostImportError> {
    let traces = match serde_json::from_str::<GhostPayload>(json) {
        Ok(GhostPayload::Many(traces)) => traces,
        Ok(GhostPayload::One(trace)) => vec![trace],
        // Re-parse as a list for a useful error message
        Err(_) => serde_json::from_str::<Vec<GhostTrace>>(json)?,
    };

    let usable: Vec<GhostTrace> = traces
        .into_iter()
        .filter_map(|mut trace| {
            if trace.is_empty() {
                warn!("Skipping ghost for '{}' with no frames", trace.course_key);
                return None;
            }
            sort_frames(&mut trace.frames);
            Some(trace)
        })
        .collect();

    if usable.is_empty() {
        return Err(GhostImportError::NoTraces);
    }
    Ok(usable)
}

pub fn export_ghosts<'a>(traces: impl IntoIterator<Item = &'a GhostTrace>) -> serde_json::Result<String> {
    let list: Vec<&GhostTrace> = traces.into_iter().collect();
    serde_json::to_string(&list)
}
