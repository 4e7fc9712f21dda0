//! session.rs — Simulation context and tick driver
//!
//! [`Session`] owns every piece of mutable simulation state. The driver feeds
//! it one timestamp and one input sample per frame and gets back the discrete
//! events that happened on that tick; collaborators (rendering, audio, score
//! keeping) consume events and [`Telemetry`] snapshots and never reach inside.
//!
//! Two clocks:
//!   - the session clock advances by the raw frame interval while not paused,
//!     and times laps and the crossing debounce
//!   - the physics step is the same interval clamped to `max_dt_s`

use std::collections::{BTreeMap, VecDeque};
use std::f64::consts::FRAC_PI_2;

use course_types::{
    CommentaryKey, CourseCatalog, GhostFrame, GhostTrace, InputIntent, LapRecord, LapState, Point,
    Pose,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::apex::{ApexAnalyzer, ApexConfig, ApexOutcome};
use crate::course::CourseGeometry;
use crate::ghost::{self, GhostImportError, GhostRecorder};
use crate::lap_timing::{LapTimer, LapTimingConfig, LapTransition};
use crate::motion::{MotionModel, MotionState, PhysicsConfig, WorldSize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub world: WorldSize,
    pub physics: PhysicsConfig,
    pub timing: LapTimingConfig,
    pub apex: ApexConfig,
}

#[derive(Debug, Error, PartialEq)]
pub enum SessionError {
    #[error("no courses configured")]
    NoCourses,
    #[error("unknown course '{0}'")]
    UnknownCourse(String),
}

// ── Events and telemetry ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SimEvent {
    LapStarted {
        commentary: CommentaryKey,
        speed_kmh: f64,
    },
    LapCompleted {
        course_key: String,
        record: LapRecord,
        /// Present when the lap was clean and long enough to keep
        ghost: Option<GhostTrace>,
    },
    LapAborted,
    ApexReached {
        turn_index: u32,
        outcome: ApexOutcome,
    },
    Collision {
        penalty_seconds: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Telemetry {
    pub course_key: String,
    pub pose: Pose,
    pub speed_kmh: f64,
    pub bank_angle_deg: f64,
    pub lap_state: LapState,
    pub lap_time_s: f64,
    pub distance_m: f64,
    pub top_speed_kmh: f64,
    pub min_speed_kmh: f64,
    pub avg_speed_kmh: f64,
    pub collided: bool,
    pub penalty_s: f64,
    pub paused: bool,
    /// Reference ghost pose in world pixels, while a lap runs
    pub ghost: Option<Pose>,
    /// Most recent first
    pub laps: Vec<LapRecord>,
}

// ── Per-lap accumulators ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct LapStats {
    distance_m: f64,
    top_speed_kmh: f64,
    min_speed_kmh: f64,
    speed_sum: f64,
    frames: u64,
    collided: bool,
    penalty_s: f64,
    last_pos: Point,
}

impl LapStats {
    fn new(pos: Point) -> Self {
        Self {
            distance_m: 0.0,
            top_speed_kmh: 0.0,
            min_speed_kmh: f64::INFINITY,
            speed_sum: 0.0,
            frames: 0,
            collided: false,
            penalty_s: 0.0,
            last_pos: pos,
        }
    }

    fn avg_speed_kmh(&self) -> f64 {
        if self.frames > 0 { self.speed_sum / self.frames as f64 } else { 0.0 }
    }

    fn min_speed_kmh(&self) -> f64 {
        if self.min_speed_kmh.is_finite() { self.min_speed_kmh } else { 0.0 }
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Session {
    cfg: SessionConfig,
    courses: CourseCatalog,
    geometry: CourseGeometry,
    model: MotionModel,
    pose: Pose,
    motion: MotionState,
    timer: LapTimer,
    apex: ApexAnalyzer,
    recorder: GhostRecorder,
    stats: LapStats,
    history: BTreeMap<String, VecDeque<LapRecord>>,
    /// Stored ghost per course key
    ghosts: BTreeMap<String, GhostTrace>,
    /// Ghost replayed against the running lap
    reference: Option<GhostTrace>,
    keep_current_ghost: bool,
    paused: bool,
    last_timestamp_s: Option<f64>,
    clock_s: f64,
}

impl Session {
    /// New session on the first course of the catalog.
    pub fn new(cfg: SessionConfig, courses: CourseCatalog) -> Result<Self, SessionError> {
        let first = courses.courses.first().ok_or(SessionError::NoCourses)?;
        let geometry = CourseGeometry::build(first, cfg.world);
        let pose = spawn_pose(&cfg.world);

        let mut session = Self {
            model: MotionModel::new(cfg.physics.clone()),
            timer: LapTimer::new(cfg.timing.clone()),
            apex: ApexAnalyzer::new(cfg.apex.clone()),
            recorder: GhostRecorder::new(),
            stats: LapStats::new(pose.position()),
            motion: MotionState::default(),
            history: BTreeMap::new(),
            ghosts: BTreeMap::new(),
            reference: None,
            keep_current_ghost: false,
            paused: false,
            last_timestamp_s: None,
            clock_s: 0.0,
            cfg,
            courses,
            geometry,
            pose,
        };
        session.reset_course_state();
        Ok(session)
    }

    pub fn course_key(&self) -> &str { &self.geometry.key }

    pub fn geometry(&self) -> &CourseGeometry { &self.geometry }

    pub fn courses(&self) -> &CourseCatalog { &self.courses }

    pub fn pose(&self) -> Pose { self.pose }

    pub fn motion(&self) -> MotionState { self.motion }

    pub fn lap_state(&self) -> LapState { self.timer.state() }

    pub fn is_paused(&self) -> bool { self.paused }

    /// Session clock, seconds of unpaused time since the first frame.
    pub fn clock(&self) -> f64 { self.clock_s }

    pub fn lap_time(&self) -> f64 { self.timer.elapsed(self.clock_s) }

    /// Switch course: rebuild geometry, respawn, reset lap and turn state.
    pub fn load_course(&mut self, key: &str) -> Result<(), SessionError> {
        let course = self
            .courses
            .get(key)
            .ok_or_else(|| SessionError::UnknownCourse(key.to_string()))?;
        self.geometry = CourseGeometry::build(course, self.cfg.world);
        self.reset_course_state();
        Ok(())
    }

    fn reset_course_state(&mut self) {
        self.pose = spawn_pose(&self.cfg.world);
        self.motion = MotionState::default();
        self.timer.reset();
        self.apex.reset(&self.geometry.buoys);
        self.recorder.clear();
        self.stats = LapStats::new(self.pose.position());
        self.reference = self.ghosts.get(&self.geometry.key).cloned();
        info!(
            "Course '{}' ready{}",
            self.geometry.key,
            if self.reference.is_some() { " with ghost" } else { "" }
        );
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Resume at `timestamp_s`; the next frame interval is measured from here.
    pub fn resume(&mut self, timestamp_s: f64) {
        self.paused = false;
        self.last_timestamp_s = Some(timestamp_s);
    }

    // ── Tick ──────────────────────────────────────────────────────────────────

    /// Advance one frame. Does nothing while paused.
    pub fn tick(&mut self, timestamp_s: f64, input: &InputIntent) -> Vec<SimEvent> {
        if self.paused {
            return Vec::new();
        }

        let raw_dt = self
            .last_timestamp_s
            .map_or(0.0, |prev| (timestamp_s - prev).max(0.0));
        self.last_timestamp_s = Some(timestamp_s);
        self.clock_s += raw_dt;
        let dt = raw_dt.min(self.cfg.timing.max_dt_s);

        let from = self.pose.position();
        let wrapped = self
            .model
            .step(&mut self.pose, &mut self.motion, input, dt, &self.cfg.world);
        let to = self.pose.position();

        let mut events = Vec::new();
        match self.timer.update(&self.geometry, from, to, wrapped, self.clock_s) {
            Some(LapTransition::Started) => self.begin_lap(&mut events),
            Some(LapTransition::Finished { elapsed_s }) => self.complete_lap(elapsed_s, &mut events),
            Some(LapTransition::Aborted) => {
                info!("Lap aborted on '{}'", self.geometry.key);
                self.recorder.clear();
                events.push(SimEvent::LapAborted);
            }
            None => {}
        }

        if self.timer.is_active() {
            self.track_active_lap(input, dt, wrapped, &mut events);
        }
        events
    }

    fn begin_lap(&mut self, events: &mut Vec<SimEvent>) {
        self.stats = LapStats::new(self.pose.position());
        self.apex.reset(&self.geometry.buoys);
        self.recorder.clear();
        if !self.keep_current_ghost || self.reference.is_none() {
            if let Some(stored) = self.ghosts.get(&self.geometry.key) {
                self.reference = Some(stored.clone());
            }
        }

        let speed_kmh = self.model.speed_kmh(&self.motion);
        let commentary = CommentaryKey::for_start_speed(speed_kmh);
        info!("Lap started on '{}' at {speed_kmh:.1} km/h", self.geometry.key);
        events.push(SimEvent::LapStarted { commentary, speed_kmh });
    }

    fn track_active_lap(&mut self, input: &InputIntent, dt: f64, wrapped: bool, events: &mut Vec<SimEvent>) {
        let speed_kmh = self.model.speed_kmh(&self.motion);
        let pos = self.pose.position();

        let s = &mut self.stats;
        s.top_speed_kmh = s.top_speed_kmh.max(speed_kmh);
        s.min_speed_kmh = s.min_speed_kmh.min(speed_kmh);
        s.speed_sum += speed_kmh;
        s.frames += 1;
        // a wrap is a teleport, not distance travelled
        if !wrapped {
            s.distance_m += pos.dist(&s.last_pos) / self.geometry.scale;
        }
        s.last_pos = pos;

        if !s.collided {
            let radius = self.cfg.timing.collision_radius_px;
            if self.geometry.buoys.iter().any(|b| pos.dist(&b.pos) < radius) {
                s.collided = true;
                s.penalty_s += self.cfg.timing.collision_penalty_s;
                info!("Buoy collision, +{}s", self.cfg.timing.collision_penalty_s);
                events.push(SimEvent::Collision { penalty_seconds: self.cfg.timing.collision_penalty_s });
            }
        }

        let apexes = self.apex.update(&self.geometry.buoys, pos, speed_kmh, input.up, dt);
        events.extend(
            apexes
                .into_iter()
                .map(|(turn_index, outcome)| SimEvent::ApexReached { turn_index, outcome }),
        );

        let meters = self.geometry.pixel_to_meters(pos.x, pos.y);
        self.recorder.record(GhostFrame {
            time_s: self.timer.elapsed(self.clock_s),
            x: meters.x,
            y: meters.y,
            heading: self.pose.heading,
            speed_kmh,
            avg_speed_kmh: self.stats.avg_speed_kmh(),
        });
    }

    fn complete_lap(&mut self, elapsed_s: f64, events: &mut Vec<SimEvent>) {
        let s = &self.stats;
        let final_time_s = elapsed_s + if s.collided { s.penalty_s } else { 0.0 };
        let record = LapRecord {
            final_time_s,
            distance_m: s.distance_m,
            top_speed_kmh: s.top_speed_kmh,
            min_speed_kmh: s.min_speed_kmh(),
            avg_speed_kmh: s.avg_speed_kmh(),
            collided: s.collided,
            penalty_s: s.penalty_s,
        };
        let key = self.geometry.key.clone();

        let history = self.history.entry(key.clone()).or_default();
        history.push_front(record.clone());
        history.truncate(self.cfg.timing.lap_history_len);

        let timing = &self.cfg.timing;
        let keep_ghost = !record.collided
            && final_time_s > timing.ghost_min_time_s
            && record.distance_m > timing.ghost_min_distance_m;
        let ghost = if keep_ghost {
            let trace = self.recorder.finish(&key, record.distance_m, final_time_s, record.avg_speed_kmh);
            if self.keep_current_ghost {
                debug!("Current ghost pinned, new ghost not adopted");
            } else {
                self.reference = Some(trace.clone());
                self.ghosts.insert(key.clone(), trace.clone());
                info!("New reference ghost on '{key}': {final_time_s:.2}s");
            }
            Some(trace)
        } else {
            self.recorder.clear();
            None
        };

        info!(
            "Lap completed on '{key}': {final_time_s:.3}s, {:.0} m{}",
            record.distance_m,
            if record.collided { " (penalty)" } else { "" }
        );
        events.push(SimEvent::LapCompleted { course_key: key, record, ghost });
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    /// Reference ghost pose at lap time `t`, in world pixels. On parallel-track
    /// courses the ghost runs on the parallel track.
    pub fn ghost_pose(&self, t: f64) -> Option<Pose> {
        let frame = ghost::ghost_pose_at(&self.reference.as_ref()?.frames, t)?;
        let y_m = frame.y + self.geometry.parallel_separation.unwrap_or(0.0);
        let px = self.geometry.meters_to_pixel(frame.x, y_m);
        Some(Pose { x: px.x, y: px.y, heading: frame.heading })
    }

    pub fn lap_history(&self, course_key: &str) -> Vec<LapRecord> {
        self.history
            .get(course_key)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> Telemetry {
        let active = self.timer.is_active();
        let lap_time_s = self.lap_time();
        Telemetry {
            course_key: self.geometry.key.clone(),
            pose: self.pose,
            speed_kmh: self.model.speed_kmh(&self.motion),
            bank_angle_deg: self.motion.bank_angle_deg,
            lap_state: self.timer.state(),
            lap_time_s,
            distance_m: self.stats.distance_m,
            top_speed_kmh: self.stats.top_speed_kmh,
            min_speed_kmh: self.stats.min_speed_kmh(),
            avg_speed_kmh: self.stats.avg_speed_kmh(),
            collided: self.stats.collided,
            penalty_s: self.stats.penalty_s,
            paused: self.paused,
            ghost: if active { self.ghost_pose(lap_time_s) } else { None },
            laps: self.lap_history(&self.geometry.key),
        }
    }

    // ── Ghost management ──────────────────────────────────────────────────────

    pub fn reference_ghost(&self) -> Option<&GhostTrace> { self.reference.as_ref() }

    pub fn stored_ghosts(&self) -> &BTreeMap<String, GhostTrace> { &self.ghosts }

    pub fn keep_current_ghost(&self) -> bool { self.keep_current_ghost }

    pub fn set_keep_current_ghost(&mut self, keep: bool) {
        self.keep_current_ghost = keep;
        info!("Keep current ghost: {keep}");
    }

    /// Race against a specific trace (e.g. a high-score ghost). Pins it.
    pub fn set_reference_ghost(&mut self, mut trace: GhostTrace) {
        ghost::sort_frames(&mut trace.frames);
        let key = trace.course_key.clone();
        self.ghosts.insert(key.clone(), trace.clone());
        if key == self.geometry.key {
            self.reference = Some(trace);
            self.keep_current_ghost = true;
            info!("Challenging ghost on '{key}'");
        } else {
            debug!("Stored ghost for '{key}', not the current course");
        }
    }

    /// Seed stored ghosts, e.g. from persisted state.
    pub fn restore_ghosts(&mut self, ghosts: BTreeMap<String, GhostTrace>) {
        self.ghosts = ghosts;
        if self.reference.is_none() || !self.keep_current_ghost {
            self.reference = self.ghosts.get(&self.geometry.key).cloned();
        }
    }

    pub fn clear_ghosts(&mut self) {
        self.ghosts.clear();
        self.reference = None;
        info!("All ghosts cleared");
    }

    pub fn export_ghosts(&self) -> serde_json::Result<String> {
        ghost::export_ghosts(self.ghosts.values())
    }

    /// Import exported ghost data. On error nothing changes.
    pub fn import_ghosts(&mut self, json: &str) -> Result<usize, GhostImportError> {
        let traces = ghost::parse_ghosts(json)?;
        let count = traces.len();
        for trace in traces {
            self.ghosts.insert(trace.course_key.clone(), trace);
        }
        if !self.keep_current_ghost || self.reference.is_none() {
            if let Some(g) = self.ghosts.get(&self.geometry.key) {
                self.reference = Some(g.clone());
            }
        }
        info!("Imported {count} ghost(s)");
        Ok(count)
    }
}

fn spawn_pose(world: &WorldSize) -> Pose {
    Pose { x: world.width / 2.0 - 4.0, y: world.height - 150.0, heading: -FRAC_PI_2 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::course::Buoy;
    use approx::assert_relative_eq;
    use course_types::{BuoyConfig, CourseConfig, Directionality, GateLayout, TimingConfig};

    const FRAME: f64 = 1.0 / 60.0;

    fn buoy(x: f64, y: f64) -> BuoyConfig {
        BuoyConfig { x, y, turn_index: None, apex_radius: 20.0, optimal_speed: None }
    }

    /// With buoys at (0,0) and (100,0) m, scale 4 on a 1280x720 world, a
    /// meter point maps to pixels as (4x + 440, 360 - 4y). The shared gate at
    /// y = -50 m sits at pixel y 560, 10 px above the spawn point.
    fn loop_course(key: &str, parallel: Option<f64>) -> CourseConfig {
        CourseConfig {
            key: key.into(),
            name: key.into(),
            scale: 4.0,
            parallel_track: parallel.is_some(),
            track_separation: parallel.unwrap_or(0.0),
            buoys: vec![buoy(0.0, 0.0), buoy(100.0, 0.0)],
            timing: TimingConfig::Gates(GateLayout {
                same_start_finish: true,
                directionality: Directionality::None,
                start: Some([40.0, -50.0, 60.0, -50.0]),
                ..Default::default()
            }),
        }
    }

    fn session() -> Session {
        let catalog = CourseCatalog { courses: vec![loop_course("loop", None), loop_course("twin", Some(30.0))] };
        Session::new(SessionConfig::default(), catalog).expect("session")
    }

    fn throttle() -> InputIntent { InputIntent { up: true, ..Default::default() } }

    /// Drive straight up with full throttle until a lap completes. The world
    /// wraps vertically so the craft comes back round to the gate.
    fn run_lap(s: &mut Session, t0: f64) -> (Vec<SimEvent>, f64, f64, f64) {
        let mut all = Vec::new();
        let mut start_ts = None;
        let mut t = t0;
        for _ in 0..(60 * 40) {
            t += FRAME;
            let events = s.tick(t, &throttle());
            for e in &events {
                match e {
                    SimEvent::LapStarted { .. } => start_ts = Some(t),
                    SimEvent::LapCompleted { .. } => {
                        all.extend(events.clone());
                        return (all, start_ts.unwrap_or(t0), t, s.clock());
                    }
                    _ => {}
                }
            }
            all.extend(events);
        }
        panic!("lap never completed");
    }

    fn completed(events: &[SimEvent]) -> (LapRecord, Option<GhostTrace>) {
        events
            .iter()
            .find_map(|e| match e {
                SimEvent::LapCompleted { record, ghost, .. } => Some((record.clone(), ghost.clone())),
                _ => None,
            })
            .expect("lap completed")
    }

    #[test]
    fn spawns_centered_and_heading_up() {
        let s = session();
        assert_eq!(s.pose(), Pose { x: 636.0, y: 570.0, heading: -FRAC_PI_2 });
        assert_eq!(s.lap_state(), LapState::Inactive);
        let gate = s.geometry().gates.start.expect("gate");
        assert_relative_eq!(gate.y1, 560.0, epsilon = 1e-9);
    }

    #[test]
    fn lap_round_trip_yields_one_record_and_one_ghost() {
        let mut s = session();
        s.tick(0.0, &InputIntent::default());
        let (events, start_ts, finish_ts, _) = run_lap(&mut s, 0.0);

        let starts = events.iter().filter(|e| matches!(e, SimEvent::LapStarted { .. })).count();
        assert_eq!(starts, 1);
        let (record, ghost) = completed(&events);
        assert_relative_eq!(record.final_time_s, finish_ts - start_ts, epsilon = 1e-6);
        assert!(record.final_time_s > 10.0);
        assert!(record.distance_m > 100.0);
        assert!(!record.collided);

        let ghost = ghost.expect("clean lap keeps a ghost");
        assert_eq!(ghost.course_key, "loop");
        assert!(!ghost.frames.is_empty());
        assert!(ghost.frames.windows(2).all(|w| w[0].time_s <= w[1].time_s));
        assert_eq!(s.reference_ghost(), Some(&ghost));
        assert_eq!(s.lap_history("loop"), vec![record]);
        assert_eq!(s.lap_state(), LapState::Inactive);
    }

    #[test]
    fn start_commentary_follows_speed_bracket() {
        let mut s = session();
        s.tick(0.0, &InputIntent::default());
        let (events, ..) = run_lap(&mut s, 0.0);
        match &events[0] {
            SimEvent::LapStarted { commentary, speed_kmh } => {
                assert!(*speed_kmh < 30.0);
                assert_eq!(*commentary, CommentaryKey::StartUnder30);
            }
            other => panic!("expected lap start first, got {other:?}"),
        }
    }

    #[test]
    fn collision_penalizes_once_and_blocks_ghost() {
        let mut s = session();
        // two buoys on the straight above the gate
        s.geometry.buoys.push(Buoy { pos: Point::new(636.0, 400.0), turn_index: None, apex_radius: 20.0, optimal_speed: None });
        s.geometry.buoys.push(Buoy { pos: Point::new(640.0, 380.0), turn_index: None, apex_radius: 20.0, optimal_speed: None });

        s.tick(0.0, &InputIntent::default());
        let (events, start_ts, finish_ts, _) = run_lap(&mut s, 0.0);
        let collisions = events.iter().filter(|e| matches!(e, SimEvent::Collision { .. })).count();
        assert_eq!(collisions, 1);

        let (record, ghost) = completed(&events);
        assert!(record.collided);
        assert_eq!(record.penalty_s, 10.0);
        assert_relative_eq!(record.final_time_s, finish_ts - start_ts + 10.0, epsilon = 1e-6);
        assert!(ghost.is_none());
        assert!(s.reference_ghost().is_none());
    }

    #[test]
    fn pinned_ghost_survives_a_new_lap() {
        let mut s = session();
        s.tick(0.0, &InputIntent::default());
        let (_, _, t1, _) = run_lap(&mut s, 0.0);
        let first = s.reference_ghost().cloned().expect("first ghost");

        s.set_keep_current_ghost(true);
        s.load_course("loop").expect("reload");
        s.tick(t1 + FRAME, &InputIntent::default());
        let (events, ..) = run_lap(&mut s, t1 + FRAME);
        let (_, ghost) = completed(&events);
        assert!(ghost.is_some(), "the lap still produces a ghost");
        assert_eq!(s.reference_ghost(), Some(&first));
    }

    #[test]
    fn lap_history_is_capped_per_course() {
        let mut s = session();
        s.tick(0.0, &InputIntent::default());
        let mut t = 0.0;
        for _ in 0..5 {
            s.load_course("loop").expect("reload");
            t += FRAME;
            s.tick(t, &InputIntent::default());
            let (_, _, finish, _) = run_lap(&mut s, t);
            t = finish;
        }
        let history = s.lap_history("loop");
        assert_eq!(history.len(), 4);
        assert!(s.lap_history("twin").is_empty());
    }

    #[test]
    fn paused_session_does_not_advance() {
        let mut s = session();
        s.tick(0.0, &throttle());
        s.tick(1.0, &throttle());
        let pose = s.pose();
        let clock = s.clock();

        s.pause();
        assert!(s.tick(50.0, &throttle()).is_empty());
        assert_eq!(s.pose(), pose);
        assert_eq!(s.clock(), clock);

        s.resume(100.0);
        s.tick(100.0 + FRAME, &throttle());
        assert_relative_eq!(s.clock(), clock + FRAME, epsilon = 1e-9);
        assert!(s.pose().y < pose.y);
    }

    #[test]
    fn physics_step_is_clamped_but_clock_is_not() {
        let mut s = session();
        s.tick(0.0, &throttle());
        s.tick(2.0, &throttle());
        assert_relative_eq!(s.clock(), 2.0);
        // one clamped step of 0.1 s
        assert_relative_eq!(s.motion().speed, s.cfg.physics.accel_rate() * 0.1, epsilon = 1e-9);
    }

    #[test]
    fn unknown_course_leaves_session_untouched() {
        let mut s = session();
        assert_eq!(s.load_course("nowhere"), Err(SessionError::UnknownCourse("nowhere".into())));
        assert_eq!(s.course_key(), "loop");
        assert_eq!(
            Session::new(SessionConfig::default(), CourseCatalog::default()).err(),
            Some(SessionError::NoCourses)
        );
    }

    #[test]
    fn ghost_runs_on_parallel_track() {
        let mut s = session();
        s.load_course("twin").expect("twin");
        let frame = GhostFrame { time_s: 0.0, x: 10.0, y: 5.0, heading: 1.0, speed_kmh: 0.0, avg_speed_kmh: 0.0 };
        s.set_reference_ghost(GhostTrace {
            course_key: "twin".into(),
            distance_m: 0.0,
            time_s: 1.0,
            avg_speed_kmh: 0.0,
            frames: vec![frame],
        });
        assert!(s.keep_current_ghost());

        let pose = s.ghost_pose(3.0).expect("ghost pose");
        let expected = s.geometry().meters_to_pixel(10.0, 35.0);
        assert_relative_eq!(pose.x, expected.x);
        assert_relative_eq!(pose.y, expected.y);
        assert_eq!(pose.heading, 1.0);
    }

    #[test]
    fn export_clear_import_restores_ghosts() {
        let mut s = session();
        s.tick(0.0, &InputIntent::default());
        run_lap(&mut s, 0.0);
        let exported = s.export_ghosts().expect("export");

        s.clear_ghosts();
        assert!(s.reference_ghost().is_none());
        assert!(s.stored_ghosts().is_empty());

        assert!(s.import_ghosts("{\"bad\": true}").is_err());
        assert!(s.stored_ghosts().is_empty());

        assert_eq!(s.import_ghosts(&exported).expect("import"), 1);
        assert!(s.stored_ghosts().contains_key("loop"));
        assert!(s.reference_ghost().is_some());
    }

    #[test]
    fn snapshot_reports_lap_progress() {
        let mut s = session();
        s.tick(0.0, &InputIntent::default());
        let mut t = 0.0;
        while s.lap_state() == LapState::Inactive {
            t += FRAME;
            s.tick(t, &throttle());
        }
        for _ in 0..60 {
            t += FRAME;
            s.tick(t, &throttle());
        }
        let snap = s.snapshot();
        assert_eq!(snap.lap_state, LapState::Active);
        assert_relative_eq!(snap.lap_time_s, 1.0, epsilon = 1e-6);
        assert!(snap.distance_m > 0.0);
        assert!(snap.top_speed_kmh >= snap.avg_speed_kmh);
        assert!(snap.min_speed_kmh <= snap.avg_speed_kmh);
        assert!(snap.ghost.is_none());
        assert!(!snap.paused);
    }
}
