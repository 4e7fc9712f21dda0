//! # course-types
//!
//! Shared data structures for the buoy racer simulation.
//!
//! These types are used by:
//! - `racer-sim` library: motion model, lap timing, apex analysis, ghost replay
//! - `racer-sim` binary: config loading, control WebSocket payloads, persistence
//! - rendering / audio clients: telemetry and event JSON consumed over the socket
//!
//! ## Coordinate Conventions
//!
//! - **World frame**: pixels, origin top-left, +x right, +y down (screen space)
//! - **Track frame**: meters, origin at the course data origin, +y up
//! - **Heading**: radians in the world frame, 0 = +x, -π/2 = screen up
//!
//! Course data is declarative: every course is plain data, timing behaviour is
//! selected by the [`TimingConfig`] variant rather than by embedded callbacks.

use serde::{Deserialize, Serialize};

// ── Points, segments and poses ───────────────────────────────────────────────

/// 2D point. Units depend on the frame it is used in (pixels or meters).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self { Self { x, y } }

    pub fn dist(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Undirected line segment. Gates and timing lines are segments in the world frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl Segment {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self { Self { x1, y1, x2, y2 } }

    pub fn from_points(a: Point, b: Point) -> Self {
        Self::new(a.x, a.y, b.x, b.y)
    }

    /// Build from the `[x1, y1, x2, y2]` array form used in course files.
    pub fn from_array(v: [f64; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }

    pub fn start(&self) -> Point { Point::new(self.x1, self.y1) }
    pub fn end(&self) -> Point { Point::new(self.x2, self.y2) }

    pub fn midpoint(&self) -> Point {
        Point::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn length(&self) -> f64 {
        self.start().dist(&self.end())
    }

    /// Zero-length segments can never be crossed.
    pub fn is_degenerate(&self) -> bool {
        self.length() <= f64::EPSILON
    }
}

/// Craft pose in the world frame. Overwritten every tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    /// Radians, world frame
    pub heading: f64,
}

impl Pose {
    pub fn position(&self) -> Point { Point::new(self.x, self.y) }
}

/// Held-key intents sampled once per frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputIntent {
    #[serde(default)]
    pub up: bool,
    #[serde(default)]
    pub down: bool,
    #[serde(default)]
    pub left: bool,
    #[serde(default)]
    pub right: bool,
}

impl InputIntent {
    /// Turn direction in the world frame: -1 left, +1 right, 0 none.
    /// Right wins when both are held.
    pub fn turn_sign(&self) -> f64 {
        if self.right {
            1.0
        } else if self.left {
            -1.0
        } else {
            0.0
        }
    }
}

// ── Course configuration ─────────────────────────────────────────────────────

fn default_apex_radius() -> f64 { 20.0 }

/// One buoy in track meters. `turn_index == None` marks a non-turn (timing) buoy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuoyConfig {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_index: Option<u32>,
    #[serde(default = "default_apex_radius")]
    pub apex_radius: f64,
    /// Optimal apex speed, km/h
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimal_speed: Option<f64>,
}

/// Which buoy anchors a legacy timing line (the other end is the canvas
/// center-bottom).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingAnchor {
    /// The first buoy in the course list
    FirstBuoy,
    /// The buoy drawn lowest on screen (largest world y)
    LowestBuoy,
}

/// Direction rules applied to gate crossings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Directionality {
    /// Any crossing counts
    #[default]
    None,
    /// A single left-to-right gate with a start/finish latch
    SingleGate,
    /// Only the finish gate must be crossed left-to-right
    FinishOnly,
}

/// Gate segments in track meters, `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GateLayout {
    #[serde(default)]
    pub same_start_finish: bool,
    #[serde(default)]
    pub directionality: Directionality,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<[f64; 4]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish: Option<[f64; 4]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_start: Option<[f64; 4]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_finish: Option<[f64; 4]>,
}

/// How a course times laps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimingConfig {
    /// Legacy single timing line: first crossing starts, next one finishes.
    TimingLine { anchor: TimingAnchor },
    /// Named start / finish gates, optionally duplicated on a parallel track.
    Gates(GateLayout),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseConfig {
    /// Stable identifier used to key ghosts, lap history and high scores
    pub key: String,
    pub name: String,
    /// Meters → pixels
    pub scale: f64,
    #[serde(default)]
    pub parallel_track: bool,
    /// Vertical offset of the parallel track, meters
    #[serde(default)]
    pub track_separation: f64,
    pub buoys: Vec<BuoyConfig>,
    pub timing: TimingConfig,
}

/// All courses known to the simulator, in cycling order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CourseCatalog {
    #[serde(rename = "course", default)]
    pub courses: Vec<CourseConfig>,
}

impl CourseCatalog {
    pub fn get(&self, key: &str) -> Option<&CourseConfig> {
        self.courses.iter().find(|c| c.key == key)
    }

    pub fn keys(&self) -> Vec<&str> {
        self.courses.iter().map(|c| c.key.as_str()).collect()
    }

    /// Key of the course after `key`, wrapping around.
    pub fn next_key(&self, key: &str) -> Option<&str> {
        let idx = self.courses.iter().position(|c| c.key == key)?;
        self.courses
            .get((idx + 1) % self.courses.len())
            .map(|c| c.key.as_str())
    }
}

// ── Lap results ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LapState {
    #[default]
    Inactive,
    Active,
}

/// One completed lap. Immutable once appended to the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LapRecord {
    /// Elapsed lap time plus any penalty, seconds
    pub final_time_s: f64,
    pub distance_m: f64,
    pub top_speed_kmh: f64,
    pub min_speed_kmh: f64,
    pub avg_speed_kmh: f64,
    pub collided: bool,
    pub penalty_s: f64,
}

/// One ghost sample in track meters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GhostFrame {
    /// Lap time at which the sample was taken, seconds
    pub time_s: f64,
    pub x: f64,
    pub y: f64,
    pub heading: f64,
    #[serde(default)]
    pub speed_kmh: f64,
    #[serde(default)]
    pub avg_speed_kmh: f64,
}

/// A recorded clean lap, replayed for comparison. Frames are sorted by time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GhostTrace {
    pub course_key: String,
    pub distance_m: f64,
    pub time_s: f64,
    pub avg_speed_kmh: f64,
    pub frames: Vec<GhostFrame>,
}

impl GhostTrace {
    pub fn is_empty(&self) -> bool { self.frames.is_empty() }
}

// ── Commentary events ────────────────────────────────────────────────────────

/// Opaque event keys forwarded to the commentary collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentaryKey {
    StartOver50,
    #[serde(rename = "start_30_50")]
    Start30To50,
    StartUnder30,
    #[serde(rename = "turn_optimalspeed_tightline_good")]
    TurnOptimalTightGood,
    #[serde(rename = "turn_optimalspeed_tightline_late")]
    TurnOptimalTightLate,
    #[serde(rename = "turn_optimalspeed_wideline_good")]
    TurnOptimalWideGood,
    #[serde(rename = "turn_optimalspeed_wideline_late")]
    TurnOptimalWideLate,
    TurnGeneric,
}

impl CommentaryKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StartOver50 => "start_over50",
            Self::Start30To50 => "start_30_50",
            Self::StartUnder30 => "start_under30",
            Self::TurnOptimalTightGood => "turn_optimalspeed_tightline_good",
            Self::TurnOptimalTightLate => "turn_optimalspeed_tightline_late",
            Self::TurnOptimalWideGood => "turn_optimalspeed_wideline_good",
            Self::TurnOptimalWideLate => "turn_optimalspeed_wideline_late",
            Self::TurnGeneric => "turn_generic",
        }
    }

    /// Start commentary bracket for the speed at the start crossing.
    pub fn for_start_speed(speed_kmh: f64) -> Self {
        if speed_kmh > 50.0 {
            Self::StartOver50
        } else if speed_kmh > 30.0 {
            Self::Start30To50
        } else {
            Self::StartUnder30
        }
    }
}
