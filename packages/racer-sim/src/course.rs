//! course.rs — Course geometry adapter
//!
//! Converts declarative course data (track meters) into the world frame the
//! simulation runs in: buoy pixel positions, the centering offset, and the
//! start/finish segments the lap timer tests against.
//!
//! A broken course never crashes the simulation. Validation failures are
//! logged and the course loads with an empty gate set, so no crossing is ever
//! detected on it.

use course_types::{
    BuoyConfig, CourseConfig, Directionality, GateLayout, Point, Segment, TimingAnchor,
    TimingConfig,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::geometry::segments_intersect;
use crate::motion::WorldSize;

// ── Validation ────────────────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq)]
pub enum CourseError {
    #[error("course '{0}' has no buoys")]
    NoBuoys(String),
    #[error("course '{key}' has invalid scale {scale}")]
    InvalidScale { key: String, scale: f64 },
    #[error("course '{key}' gate '{gate}' has zero length")]
    DegenerateGate { key: String, gate: &'static str },
    #[error("course '{0}' uses gates but defines no start gate")]
    MissingStartGate(String),
    #[error("course '{key}' has a parallel track with invalid separation {separation}")]
    InvalidSeparation { key: String, separation: f64 },
}

pub fn validate(course: &CourseConfig) -> Result<(), CourseError> {
    if course.buoys.is_empty() {
        return Err(CourseError::NoBuoys(course.key.clone()));
    }
    if !(course.scale.is_finite() && course.scale > 0.0) {
        return Err(CourseError::InvalidScale { key: course.key.clone(), scale: course.scale });
    }
    if course.parallel_track && !(course.track_separation > 0.0) {
        return Err(CourseError::InvalidSeparation {
            key: course.key.clone(),
            separation: course.track_separation,
        });
    }

    if let TimingConfig::Gates(layout) = &course.timing {
        if layout.start.is_none() {
            return Err(CourseError::MissingStartGate(course.key.clone()));
        }
        let named = [
            ("start", layout.start),
            ("finish", layout.finish),
            ("parallel_start", layout.parallel_start),
            ("parallel_finish", layout.parallel_finish),
        ];
        for (gate, coords) in named {
            if let Some(c) = coords {
                if Segment::from_array(c).is_degenerate() {
                    return Err(CourseError::DegenerateGate { key: course.key.clone(), gate });
                }
            }
        }
    }
    Ok(())
}

// ── Derived course data ───────────────────────────────────────────────────────

/// A buoy in the world frame. Sent to clients with the course so the renderer
/// can draw apex zones.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Buoy {
    pub pos: Point,
    pub turn_index: Option<u32>,
    pub apex_radius: f64,
    pub optimal_speed: Option<f64>,
}

/// Up to four gate segments in the world frame. `None` = no such gate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GateSet {
    pub start: Option<Segment>,
    pub finish: Option<Segment>,
    pub parallel_start: Option<Segment>,
    pub parallel_finish: Option<Segment>,
}

impl GateSet {
    pub fn is_empty(&self) -> bool {
        self.start.is_none()
            && self.finish.is_none()
            && self.parallel_start.is_none()
            && self.parallel_finish.is_none()
    }
}

/// How crossings of the gate set are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingMode {
    /// One line: a crossing starts when idle, finishes when active
    TimingLine,
    Gates { same_start_finish: bool, directionality: Directionality },
}

#[derive(Debug, Clone)]
pub struct CourseGeometry {
    pub key: String,
    pub name: String,
    /// Meters → pixels
    pub scale: f64,
    /// Added to raw pixel positions to center the course on the canvas
    pub offset: Point,
    pub world: WorldSize,
    pub buoys: Vec<Buoy>,
    pub gates: GateSet,
    pub mode: TimingMode,
    /// Parallel track separation in meters, when the course has one
    pub parallel_separation: Option<f64>,
}

impl CourseGeometry {
    /// Build the world-frame geometry for a course. Never fails: invalid
    /// courses come back with an empty gate set.
    pub fn build(course: &CourseConfig, world: WorldSize) -> Self {
        let valid = match validate(course) {
            Ok(()) => true,
            Err(e) => {
                warn!("Course rejected, timing disabled: {e}");
                false
            }
        };
        let scale = if course.scale.is_finite() && course.scale > 0.0 { course.scale } else { 1.0 };
        let parallel_separation = (course.parallel_track && course.track_separation > 0.0)
            .then_some(course.track_separation);

        let mut geometry = Self {
            key: course.key.clone(),
            name: course.name.clone(),
            scale,
            offset: Point::default(),
            world,
            buoys: Vec::new(),
            gates: GateSet::default(),
            mode: match &course.timing {
                TimingConfig::TimingLine { .. } => TimingMode::TimingLine,
                TimingConfig::Gates(layout) => TimingMode::Gates {
                    same_start_finish: layout.same_start_finish,
                    directionality: layout.directionality,
                },
            },
            parallel_separation,
        };

        geometry.offset = geometry.centering_offset(&course.buoys);
        geometry.buoys = course
            .buoys
            .iter()
            .map(|b| Buoy {
                pos: geometry.meters_to_pixel(b.x, b.y),
                turn_index: b.turn_index,
                apex_radius: b.apex_radius,
                optimal_speed: b.optimal_speed,
            })
            .collect();

        if valid {
            geometry.gates = match &course.timing {
                TimingConfig::TimingLine { anchor } => geometry.timing_line(*anchor),
                TimingConfig::Gates(layout) => geometry.gate_set(layout),
            };
            geometry.warn_on_crossed_gates();
        }

        info!(
            "Course '{}' loaded: {} buoys, scale {}, offset ({:.1}, {:.1}), timing {:?}",
            geometry.key,
            geometry.buoys.len(),
            geometry.scale,
            geometry.offset.x,
            geometry.offset.y,
            geometry.mode
        );
        geometry
    }

    /// Raw pixel position before centering (vertical axis flipped).
    fn raw_pixel(&self, mx: f64, my: f64) -> Point {
        Point::new(mx * self.scale, self.world.height - my * self.scale)
    }

    /// Offset that puts the centroid of all buoys (both tracks when there is a
    /// parallel one) at the canvas center.
    fn centering_offset(&self, buoys: &[BuoyConfig]) -> Point {
        let mut points: Vec<Point> = buoys.iter().map(|b| self.raw_pixel(b.x, b.y)).collect();
        if let Some(sep) = self.parallel_separation {
            let shifted: Vec<Point> = points
                .iter()
                .map(|p| Point::new(p.x, p.y - sep * self.scale))
                .collect();
            points.extend(shifted);
        }
        if points.is_empty() {
            return Point::default();
        }

        let n = points.len() as f64;
        let cx = points.iter().map(|p| p.x).sum::<f64>() / n;
        let cy = points.iter().map(|p| p.y).sum::<f64>() / n;
        Point::new(self.world.width / 2.0 - cx, self.world.height / 2.0 - cy)
    }

    pub fn meters_to_pixel(&self, mx: f64, my: f64) -> Point {
        let raw = self.raw_pixel(mx, my);
        Point::new(raw.x + self.offset.x, raw.y + self.offset.y)
    }

    pub fn pixel_to_meters(&self, px: f64, py: f64) -> Point {
        let local_x = px - self.offset.x;
        let local_y = py - self.offset.y;
        Point::new(local_x / self.scale, (self.world.height - local_y) / self.scale)
    }

    fn segment_to_pixel(&self, m: [f64; 4]) -> Segment {
        Segment::from_points(self.meters_to_pixel(m[0], m[1]), self.meters_to_pixel(m[2], m[3]))
    }

    fn shifted(&self, m: [f64; 4], dy: f64) -> Segment {
        self.segment_to_pixel([m[0], m[1] + dy, m[2], m[3] + dy])
    }

    /// Single timing line from the anchor buoy to the canvas center-bottom.
    fn timing_line(&self, anchor: TimingAnchor) -> GateSet {
        let anchor_buoy = match anchor {
            TimingAnchor::FirstBuoy => self.buoys.first(),
            TimingAnchor::LowestBuoy => self
                .buoys
                .iter()
                .fold(None, |best: Option<&Buoy>, b| match best {
                    Some(cur) if cur.pos.y >= b.pos.y => Some(cur),
                    _ => Some(b),
                }),
        };
        let Some(buoy) = anchor_buoy else {
            return GateSet::default();
        };
        let line = Segment::from_points(
            buoy.pos,
            Point::new(self.world.width / 2.0, self.world.height),
        );
        GateSet { start: Some(line), finish: Some(line), ..Default::default() }
    }

    fn gate_set(&self, layout: &GateLayout) -> GateSet {
        let Some(start_m) = layout.start else {
            return GateSet::default();
        };
        let start = self.segment_to_pixel(start_m);
        let finish = if layout.same_start_finish {
            Some(start)
        } else {
            layout.finish.map(|f| self.segment_to_pixel(f))
        };

        let parallel_start = match (layout.parallel_start, self.parallel_separation) {
            (Some(p), _) => Some(self.segment_to_pixel(p)),
            (None, Some(sep)) => Some(self.shifted(start_m, sep)),
            (None, None) => None,
        };
        let parallel_finish = if layout.same_start_finish {
            parallel_start
        } else {
            match (layout.parallel_finish, layout.finish, self.parallel_separation) {
                (Some(p), _, _) => Some(self.segment_to_pixel(p)),
                (None, Some(f), Some(sep)) => Some(self.shifted(f, sep)),
                _ => None,
            }
        };

        GateSet { start: Some(start), finish, parallel_start, parallel_finish }
    }

    fn warn_on_crossed_gates(&self) {
        if let TimingMode::Gates { same_start_finish: false, .. } = self.mode {
            if let (Some(s), Some(f)) = (self.gates.start, self.gates.finish) {
                if segments_intersect(s.start(), s.end(), f.start(), f.end()) {
                    warn!("Course '{}': start and finish gates cross each other", self.key);
                }
            }
        }
    }

    pub fn is_timed(&self) -> bool {
        !self.gates.is_empty()
    }
}
