//! lap_timing.rs — Lap lifecycle state machine
//!
//! `Inactive → Active` on a valid start crossing, `Active → Inactive` on a valid
//! finish crossing (or an abort on directional courses). All timestamps are on
//! the session clock, which stops while the simulation is paused.
//!
//! Crossing rules per timing mode:
//!   - timing line: a crossing while idle starts, while active finishes
//!   - gates: start gates only start, finish gates only finish; a shared gate
//!     starts when idle and finishes when active. `FinishOnly` ignores finish
//!     crossings that do not move left-to-right
//!   - single directional gate: left-to-right crossings toggle a latch (first
//!     starts, second finishes). Crossing the other way, or jumping more than
//!     `latch_reset_distance_px` away from the gate in one tick, clears the
//!     latch and aborts the running lap
//!
//! Every detected crossing that survives the debounce re-arms it, even one that
//! is then ignored by the rules above.

use course_types::{Directionality, LapState, Point, Segment};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::course::{CourseGeometry, TimingMode};
use crate::geometry::crosses;

// ── Configuration ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LapTimingConfig {
    /// Minimum spacing between two honored crossings, seconds
    pub debounce_s: f64,
    pub latch_reset_distance_px: f64,
    pub collision_radius_px: f64,
    pub collision_penalty_s: f64,
    /// A clean lap must beat both thresholds to be kept as a ghost
    pub ghost_min_time_s: f64,
    pub ghost_min_distance_m: f64,
    pub lap_history_len: usize,
    /// Physics step clamp, seconds
    pub max_dt_s: f64,
}

impl Default for LapTimingConfig {
    fn default() -> Self {
        Self {
            debounce_s: 0.5,
            latch_reset_distance_px: 50.0,
            collision_radius_px: 12.0,
            collision_penalty_s: 10.0,
            ghost_min_time_s: 10.0,
            ghost_min_distance_m: 100.0,
            lap_history_len: 4,
            max_dt_s: 0.1,
        }
    }
}

// ── Transitions ───────────────────────────────────────────────────────────────

/// Which kind of gate a tick's motion crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateHit {
    Start,
    Finish,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LapTransition {
    Started,
    Finished { elapsed_s: f64 },
    Aborted,
}

#[derive(Debug, Clone)]
pub struct LapTimer {
    cfg: LapTimingConfig,
    state: LapState,
    started_at_s: f64,
    last_crossing_s: Option<f64>,
    /// Directional single-gate latch: set by the starting crossing
    latch: bool,
}

impl LapTimer {
    pub fn new(cfg: LapTimingConfig) -> Self {
        Self { cfg, state: LapState::Inactive, started_at_s: 0.0, last_crossing_s: None, latch: false }
    }

    /// Back to idle, debounce and latch cleared. Called on course (re)load.
    pub fn reset(&mut self) {
        self.state = LapState::Inactive;
        self.started_at_s = 0.0;
        self.last_crossing_s = None;
        self.latch = false;
    }

    pub fn state(&self) -> LapState { self.state }

    pub fn is_active(&self) -> bool { self.state == LapState::Active }

    /// Elapsed lap time at `now_s`, 0 when idle.
    pub fn elapsed(&self, now_s: f64) -> f64 {
        match self.state {
            LapState::Active => (now_s - self.started_at_s).max(0.0),
            LapState::Inactive => 0.0,
        }
    }

    /// Evaluate one tick of motion `from → to` at session time `now_s`.
    /// A wrapped tick is a teleport, not course motion: it never crosses a
    /// gate and leaves the latch and the running lap alone.
    pub fn update(
        &mut self,
        geo: &CourseGeometry,
        from: Point,
        to: Point,
        wrapped: bool,
        now_s: f64,
    ) -> Option<LapTransition> {
        if wrapped {
            return None;
        }

        let Some(hit) = detect(geo, from, to) else {
            return self.check_latch_distance(geo, from, to);
        };

        if let Some(last) = self.last_crossing_s {
            if now_s - last < self.cfg.debounce_s {
                debug!("Crossing at {now_s:.3}s debounced ({:.3}s since last)", now_s - last);
                return None;
            }
        }
        self.last_crossing_s = Some(now_s);

        let dx = to.x - from.x;
        match geo.mode {
            TimingMode::TimingLine => self.toggle(now_s),
            TimingMode::Gates { directionality: Directionality::SingleGate, .. } => {
                if dx <= 0.0 {
                    debug!("Right-to-left crossing, latch cleared");
                    self.latch = false;
                    return self.abort();
                }
                if self.latch {
                    self.latch = false;
                    self.finish(now_s)
                } else {
                    self.latch = true;
                    self.start(now_s)
                }
            }
            TimingMode::Gates { same_start_finish: true, .. } => self.toggle(now_s),
            TimingMode::Gates { same_start_finish: false, directionality } => match hit {
                GateHit::Start => self.start(now_s),
                GateHit::Finish => {
                    if directionality == Directionality::FinishOnly && dx <= 0.0 {
                        debug!("Finish crossed the wrong way, ignored");
                        return None;
                    }
                    self.finish(now_s)
                }
            },
        }
    }

    fn check_latch_distance(&mut self, geo: &CourseGeometry, from: Point, to: Point) -> Option<LapTransition> {
        let directional = matches!(
            geo.mode,
            TimingMode::Gates { directionality: Directionality::SingleGate, .. }
        );
        if !(directional && self.latch) {
            return None;
        }
        let mid = geo.gates.start?.midpoint();
        if to.dist(&mid) > from.dist(&mid) + self.cfg.latch_reset_distance_px {
            debug!("Moved away from the gate, latch cleared");
            self.latch = false;
            return self.abort();
        }
        None
    }

    fn toggle(&mut self, now_s: f64) -> Option<LapTransition> {
        match self.state {
            LapState::Inactive => self.start(now_s),
            LapState::Active => self.finish(now_s),
        }
    }

    fn start(&mut self, now_s: f64) -> Option<LapTransition> {
        if self.is_active() {
            debug!("Start crossing during an active lap ignored");
            return None;
        }
        self.state = LapState::Active;
        self.started_at_s = now_s;
        Some(LapTransition::Started)
    }

    fn finish(&mut self, now_s: f64) -> Option<LapTransition> {
        if !self.is_active() {
            debug!("Finish crossing with no active lap ignored");
            return None;
        }
        let elapsed_s = self.elapsed(now_s);
        self.state = LapState::Inactive;
        Some(LapTransition::Finished { elapsed_s })
    }

    fn abort(&mut self) -> Option<LapTransition> {
        if !self.is_active() {
            return None;
        }
        self.state = LapState::Inactive;
        Some(LapTransition::Aborted)
    }
}

/// First gate crossed by `from → to`. Start gates win over finish gates. The
/// single directional gate only ever uses the start segments.
fn detect(geo: &CourseGeometry, from: Point, to: Point) -> Option<GateHit> {
    let hit = |gate: Option<Segment>| gate.is_some_and(|g| crosses(from, to, &g));
    let gates = &geo.gates;

    if hit(gates.start) || hit(gates.parallel_start) {
        return Some(GateHit::Start);
    }
    let start_only = match geo.mode {
        TimingMode::TimingLine => true,
        TimingMode::Gates { same_start_finish, directionality } => {
            same_start_finish || directionality == Directionality::SingleGate
        }
    };
    if !start_only && (hit(gates.finish) || hit(gates.parallel_finish)) {
        return Some(GateHit::Finish);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::course::GateSet;
    use crate::motion::WorldSize;
    use approx::assert_relative_eq;

    // Vertical gate at x = 100 (y 0..100), second vertical gate at x = 300.
    fn start_gate() -> Segment { Segment::new(100.0, 0.0, 100.0, 100.0) }
    fn finish_gate() -> Segment { Segment::new(300.0, 0.0, 300.0, 100.0) }

    fn geometry(mode: TimingMode, gates: GateSet) -> CourseGeometry {
        CourseGeometry {
            key: "test".into(),
            name: "Test".into(),
            scale: 1.0,
            offset: Point::default(),
            world: WorldSize::default(),
            buoys: Vec::new(),
            gates,
            mode,
            parallel_separation: None,
        }
    }

    fn shared(directionality: Directionality) -> CourseGeometry {
        geometry(
            TimingMode::Gates { same_start_finish: true, directionality },
            GateSet { start: Some(start_gate()), finish: Some(start_gate()), ..Default::default() },
        )
    }

    fn split(directionality: Directionality) -> CourseGeometry {
        geometry(
            TimingMode::Gates { same_start_finish: false, directionality },
            GateSet { start: Some(start_gate()), finish: Some(finish_gate()), ..Default::default() },
        )
    }

    fn p(x: f64, y: f64) -> Point { Point::new(x, y) }

    // Crossing helpers for the gate at x = 100 / x = 300
    const RIGHT: (Point, Point) = (Point { x: 99.0, y: 50.0 }, Point { x: 101.0, y: 50.0 });
    const LEFT: (Point, Point) = (Point { x: 101.0, y: 50.0 }, Point { x: 99.0, y: 50.0 });
    const FINISH_RIGHT: (Point, Point) = (Point { x: 299.0, y: 50.0 }, Point { x: 301.0, y: 50.0 });
    const FINISH_LEFT: (Point, Point) = (Point { x: 301.0, y: 50.0 }, Point { x: 299.0, y: 50.0 });

    fn cross(timer: &mut LapTimer, geo: &CourseGeometry, m: (Point, Point), t: f64) -> Option<LapTransition> {
        timer.update(geo, m.0, m.1, false, t)
    }

    #[test]
    fn timing_line_starts_then_finishes() {
        let geo = geometry(
            TimingMode::TimingLine,
            GateSet { start: Some(start_gate()), finish: Some(start_gate()), ..Default::default() },
        );
        let mut timer = LapTimer::new(LapTimingConfig::default());
        assert_eq!(cross(&mut timer, &geo, RIGHT, 1.0), Some(LapTransition::Started));
        assert!(timer.is_active());
        assert_relative_eq!(timer.elapsed(21.0), 20.0);

        match cross(&mut timer, &geo, LEFT, 31.0) {
            Some(LapTransition::Finished { elapsed_s }) => assert_relative_eq!(elapsed_s, 30.0),
            other => panic!("expected finish, got {other:?}"),
        }
        assert_eq!(timer.state(), LapState::Inactive);
    }

    #[test]
    fn crossings_inside_debounce_window_count_once() {
        let geo = shared(Directionality::None);
        let mut timer = LapTimer::new(LapTimingConfig::default());
        assert_eq!(cross(&mut timer, &geo, RIGHT, 10.0), Some(LapTransition::Started));
        assert_eq!(cross(&mut timer, &geo, LEFT, 10.2), None);
        assert_eq!(cross(&mut timer, &geo, RIGHT, 10.49), None);
        assert!(timer.is_active());

        // debounce re-armed by the start only
        assert!(matches!(cross(&mut timer, &geo, LEFT, 10.5), Some(LapTransition::Finished { .. })));
    }

    #[test]
    fn split_gates_ignore_misuse() {
        let geo = split(Directionality::None);
        let mut timer = LapTimer::new(LapTimingConfig::default());

        // finish while idle
        assert_eq!(cross(&mut timer, &geo, FINISH_RIGHT, 1.0), None);
        assert_eq!(cross(&mut timer, &geo, RIGHT, 2.0), Some(LapTransition::Started));
        // start while active
        assert_eq!(cross(&mut timer, &geo, LEFT, 3.0), None);
        assert!(timer.is_active());
        assert!(matches!(
            cross(&mut timer, &geo, FINISH_LEFT, 4.0),
            Some(LapTransition::Finished { .. })
        ));
    }

    #[test]
    fn finish_only_requires_left_to_right_finish() {
        let geo = split(Directionality::FinishOnly);
        let mut timer = LapTimer::new(LapTimingConfig::default());

        // start gate itself is not directional
        assert_eq!(cross(&mut timer, &geo, LEFT, 1.0), Some(LapTransition::Started));
        assert_eq!(cross(&mut timer, &geo, FINISH_LEFT, 5.0), None);
        assert!(timer.is_active());
        assert!(matches!(
            cross(&mut timer, &geo, FINISH_RIGHT, 6.0),
            Some(LapTransition::Finished { .. })
        ));
    }

    #[test]
    fn directional_gate_reverse_crossing_does_not_complete() {
        let geo = shared(Directionality::SingleGate);
        let mut timer = LapTimer::new(LapTimingConfig::default());

        assert_eq!(cross(&mut timer, &geo, RIGHT, 1.0), Some(LapTransition::Started));
        assert_eq!(cross(&mut timer, &geo, LEFT, 2.0), Some(LapTransition::Aborted));
        assert!(!timer.is_active());

        // next left-to-right crossing starts a fresh lap rather than finishing
        assert_eq!(cross(&mut timer, &geo, RIGHT, 3.0), Some(LapTransition::Started));
        assert!(matches!(cross(&mut timer, &geo, RIGHT, 40.0), Some(LapTransition::Finished { .. })));
    }

    #[test]
    fn directional_gate_ignores_leftward_start() {
        let geo = shared(Directionality::SingleGate);
        let mut timer = LapTimer::new(LapTimingConfig::default());
        assert_eq!(cross(&mut timer, &geo, LEFT, 1.0), None);
        assert!(!timer.is_active());
    }

    #[test]
    fn jumping_away_from_the_gate_clears_the_latch() {
        let geo = shared(Directionality::SingleGate);
        let mut timer = LapTimer::new(LapTimingConfig::default());
        assert_eq!(cross(&mut timer, &geo, RIGHT, 1.0), Some(LapTransition::Started));

        // small motion away is fine
        assert_eq!(timer.update(&geo, p(120.0, 50.0), p(122.0, 50.0), false, 2.0), None);
        assert!(timer.is_active());

        // a single unwrapped tick moving more than 50 px further away
        assert_eq!(
            timer.update(&geo, p(120.0, 50.0), p(200.0, 50.0), false, 3.0),
            Some(LapTransition::Aborted)
        );
        assert_eq!(cross(&mut timer, &geo, RIGHT, 4.0), Some(LapTransition::Started));
    }

    #[test]
    fn world_wrap_keeps_the_directional_lap_running() {
        let geo = shared(Directionality::SingleGate);
        let mut timer = LapTimer::new(LapTimingConfig::default());
        assert_eq!(cross(&mut timer, &geo, RIGHT, 1.0), Some(LapTransition::Started));

        // top edge to bottom edge, far from the gate midpoint
        assert_eq!(timer.update(&geo, p(130.0, 0.5), p(130.0, 720.0), true, 5.0), None);
        assert_eq!(timer.state(), LapState::Active);

        // the latch survived, so the next left-to-right crossing finishes
        match cross(&mut timer, &geo, RIGHT, 20.0) {
            Some(LapTransition::Finished { elapsed_s }) => assert_relative_eq!(elapsed_s, 19.0),
            other => panic!("expected finish, got {other:?}"),
        }
    }

    #[test]
    fn wrapped_tick_never_crosses() {
        let geo = shared(Directionality::None);
        let mut timer = LapTimer::new(LapTimingConfig::default());
        assert_eq!(timer.update(&geo, RIGHT.0, RIGHT.1, true, 1.0), None);
        assert!(!timer.is_active());
    }

    #[test]
    fn parallel_gates_count_as_their_main_gate() {
        let parallel_start = Segment::new(100.0, 200.0, 100.0, 300.0);
        let parallel_finish = Segment::new(300.0, 200.0, 300.0, 300.0);
        let geo = geometry(
            TimingMode::Gates { same_start_finish: false, directionality: Directionality::FinishOnly },
            GateSet {
                start: Some(start_gate()),
                finish: Some(finish_gate()),
                parallel_start: Some(parallel_start),
                parallel_finish: Some(parallel_finish),
            },
        );
        let mut timer = LapTimer::new(LapTimingConfig::default());
        assert_eq!(
            timer.update(&geo, p(99.0, 250.0), p(101.0, 250.0), false, 1.0),
            Some(LapTransition::Started)
        );
        assert!(matches!(
            timer.update(&geo, p(299.0, 250.0), p(301.0, 250.0), false, 2.0),
            Some(LapTransition::Finished { .. })
        ));
    }

    #[test]
    fn empty_gate_set_never_starts() {
        let geo = geometry(TimingMode::TimingLine, GateSet::default());
        let mut timer = LapTimer::new(LapTimingConfig::default());
        assert_eq!(cross(&mut timer, &geo, RIGHT, 1.0), None);
    }

    #[test]
    fn reset_clears_debounce_and_state() {
        let geo = shared(Directionality::None);
        let mut timer = LapTimer::new(LapTimingConfig::default());
        assert_eq!(cross(&mut timer, &geo, RIGHT, 1.0), Some(LapTransition::Started));
        timer.reset();
        assert!(!timer.is_active());
        assert_eq!(timer.elapsed(5.0), 0.0);
        assert_eq!(cross(&mut timer, &geo, RIGHT, 1.1), Some(LapTransition::Started));
    }
}
