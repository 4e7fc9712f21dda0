//! apex.rs — Turn apex and throttle timing analysis
//!
//! One [`TurnApexState`] per turn buoy. Each tick of an active lap records the
//! distance to the buoy and a throttle sample. The first tick whose distance
//! grows again marks the apex (closest approach has passed); the state is then
//! terminal until the next lap.
//!
//! At the apex three judgments combine into one commentary key:
//!   - speed: within `near_optimal_kmh` of the buoy's optimal speed
//!   - line: minimum distance under `tight_line_px`
//!   - throttle: held for more than `good_throttle_fraction` of the trailing
//!     `throttle_window_s`

use std::collections::{BTreeMap, VecDeque};

use course_types::{CommentaryKey, Point};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::course::Buoy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApexConfig {
    pub throttle_window_s: f64,
    pub good_throttle_fraction: f64,
    pub near_optimal_kmh: f64,
    pub tight_line_px: f64,
}

impl Default for ApexConfig {
    fn default() -> Self {
        Self {
            throttle_window_s: 0.5,
            good_throttle_fraction: 0.6,
            near_optimal_kmh: 25.0,
            tight_line_px: 15.0,
        }
    }
}

// ── Throttle window ───────────────────────────────────────────────────────────

/// Time-windowed deque of `(pressed, dt)` samples. Running totals keep the
/// held fraction O(1); eviction pops from the front.
#[derive(Debug, Clone)]
pub struct ThrottleWindow {
    samples: VecDeque<(bool, f64)>,
    window_s: f64,
    total_s: f64,
    pressed_s: f64,
}

impl ThrottleWindow {
    pub fn new(window_s: f64) -> Self {
        Self { samples: VecDeque::new(), window_s, total_s: 0.0, pressed_s: 0.0 }
    }

    pub fn push(&mut self, pressed: bool, dt: f64) {
        self.samples.push_back((pressed, dt));
        self.total_s += dt;
        if pressed {
            self.pressed_s += dt;
        }

        while self.total_s > self.window_s {
            let Some((was_pressed, old_dt)) = self.samples.pop_front() else { break };
            self.total_s -= old_dt;
            if was_pressed {
                self.pressed_s -= old_dt;
            }
        }
        if self.samples.is_empty() {
            self.total_s = 0.0;
            self.pressed_s = 0.0;
        }
    }

    /// Fraction of the windowed time the throttle was held. 0 when empty.
    pub fn held_fraction(&self) -> f64 {
        if self.total_s > 0.0 {
            (self.pressed_s / self.total_s).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    pub fn len(&self) -> usize { self.samples.len() }

    pub fn is_empty(&self) -> bool { self.samples.is_empty() }
}

// ── Per-buoy state ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TurnApexState {
    pub apex_reached: bool,
    pub previous_distance: Option<f64>,
    pub min_distance: f64,
    pub apex_speed_kmh: f64,
    pub throttle: ThrottleWindow,
}

impl TurnApexState {
    pub fn new(window_s: f64) -> Self {
        Self {
            apex_reached: false,
            previous_distance: None,
            min_distance: f64::INFINITY,
            apex_speed_kmh: 0.0,
            throttle: ThrottleWindow::new(window_s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApexOutcome {
    pub key: CommentaryKey,
    pub apex_speed_kmh: f64,
    pub min_distance_px: f64,
    pub throttle_fraction: f64,
}

/// Pick the commentary key for an apex.
pub fn classify(
    cfg: &ApexConfig,
    optimal_speed: Option<f64>,
    apex_speed_kmh: f64,
    min_distance_px: f64,
    throttle_fraction: f64,
) -> CommentaryKey {
    let near_optimal = optimal_speed
        .is_some_and(|opt| (apex_speed_kmh - opt).abs() <= cfg.near_optimal_kmh);
    let tight = min_distance_px < cfg.tight_line_px;
    let good = throttle_fraction > cfg.good_throttle_fraction;

    match (near_optimal, tight, good) {
        (true, true, true) => CommentaryKey::TurnOptimalTightGood,
        (true, true, false) => CommentaryKey::TurnOptimalTightLate,
        (true, false, true) => CommentaryKey::TurnOptimalWideGood,
        (true, false, false) => CommentaryKey::TurnOptimalWideLate,
        (false, _, _) => CommentaryKey::TurnGeneric,
    }
}

// ── Analyzer ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct ApexAnalyzer {
    cfg: ApexConfig,
    states: BTreeMap<u32, TurnApexState>,
}

impl ApexAnalyzer {
    pub fn new(cfg: ApexConfig) -> Self {
        Self { cfg, states: BTreeMap::new() }
    }

    /// Fresh state for every turn buoy. Buoys sharing a turn index share a state.
    pub fn reset(&mut self, buoys: &[Buoy]) {
        self.states = buoys
            .iter()
            .filter_map(|b| b.turn_index)
            .map(|idx| (idx, TurnApexState::new(self.cfg.throttle_window_s)))
            .collect();
    }

    pub fn state(&self, turn_index: u32) -> Option<&TurnApexState> {
        self.states.get(&turn_index)
    }

    /// Advance every unfinished turn by one tick. Returns the apexes reached
    /// on this tick.
    pub fn update(
        &mut self,
        buoys: &[Buoy],
        pos: Point,
        speed_kmh: f64,
        throttle: bool,
        dt: f64,
    ) -> Vec<(u32, ApexOutcome)> {
        let mut reached = Vec::new();

        for buoy in buoys {
            let Some(idx) = buoy.turn_index else { continue };
            let Some(st) = self.states.get_mut(&idx) else { continue };
            if st.apex_reached {
                continue;
            }

            let dist = pos.dist(&buoy.pos);
            st.min_distance = st.min_distance.min(dist);
            st.throttle.push(throttle, dt);

            match st.previous_distance {
                Some(prev) if dist > prev => {
                    st.apex_reached = true;
                    st.apex_speed_kmh = speed_kmh;
                    let throttle_fraction = st.throttle.held_fraction();
                    let key = classify(
                        &self.cfg,
                        buoy.optimal_speed,
                        speed_kmh,
                        st.min_distance,
                        throttle_fraction,
                    );
                    debug!(
                        "Apex {idx}: {:.1} km/h, {:.1} px, throttle {:.0}% → {}",
                        speed_kmh,
                        st.min_distance,
                        throttle_fraction * 100.0,
                        key.as_str()
                    );
                    reached.push((
                        idx,
                        ApexOutcome {
                            key,
                            apex_speed_kmh: speed_kmh,
                            min_distance_px: st.min_distance,
                            throttle_fraction,
                        },
                    ));
                }
                _ => st.previous_distance = Some(dist),
            }
        }
        reached
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const DT: f64 = 0.05;

    fn turn_buoy(idx: u32, x: f64, y: f64, optimal: Option<f64>) -> Buoy {
        Buoy { pos: Point::new(x, y), turn_index: Some(idx), apex_radius: 20.0, optimal_speed: optimal }
    }

    #[test]
    fn near_optimal_tight_good_throttle() {
        let key = classify(&ApexConfig::default(), Some(30.0), 28.0, 10.0, 0.7);
        assert_eq!(key, CommentaryKey::TurnOptimalTightGood);
    }

    #[test]
    fn classification_grid() {
        let cfg = ApexConfig::default();
        assert_eq!(classify(&cfg, Some(30.0), 28.0, 10.0, 0.6), CommentaryKey::TurnOptimalTightLate);
        assert_eq!(classify(&cfg, Some(30.0), 55.0, 20.0, 0.9), CommentaryKey::TurnOptimalWideGood);
        assert_eq!(classify(&cfg, Some(30.0), 5.0, 15.0, 0.0), CommentaryKey::TurnOptimalWideLate);
        assert_eq!(classify(&cfg, Some(30.0), 56.0, 1.0, 1.0), CommentaryKey::TurnGeneric);
        // no optimal speed is never near-optimal
        assert_eq!(classify(&cfg, None, 30.0, 1.0, 1.0), CommentaryKey::TurnGeneric);
    }

    #[test]
    fn throttle_window_evicts_old_samples() {
        let mut w = ThrottleWindow::new(0.5);
        for _ in 0..8 {
            w.push(false, 0.125);
        }
        assert_eq!(w.held_fraction(), 0.0);
        assert_eq!(w.len(), 4);

        for _ in 0..4 {
            w.push(true, 0.125);
        }
        assert_eq!(w.len(), 4);
        assert_eq!(w.held_fraction(), 1.0);
    }

    #[test]
    fn throttle_window_fraction_of_mixed_samples() {
        let mut w = ThrottleWindow::new(0.5);
        assert!(w.is_empty());
        assert_eq!(w.held_fraction(), 0.0);
        for pressed in [true, false, true, true] {
            w.push(pressed, 0.125);
        }
        assert_relative_eq!(w.held_fraction(), 0.75);
    }

    #[test]
    fn apex_fires_once_when_distance_starts_growing() {
        let buoys = vec![turn_buoy(1, 100.0, 0.0, Some(30.0))];
        let mut analyzer = ApexAnalyzer::new(ApexConfig::default());
        analyzer.reset(&buoys);

        // pass the buoy at 10 px while holding throttle 70% of the time
        let mut events = Vec::new();
        for i in 0..=20 {
            let x = 80.0 + 2.0 * i as f64;
            let throttle = i % 10 < 7;
            events.extend(analyzer.update(&buoys, Point::new(x, 10.0), 28.0, throttle, DT));
        }

        assert_eq!(events.len(), 1);
        let (idx, outcome) = &events[0];
        assert_eq!(*idx, 1);
        assert_relative_eq!(outcome.min_distance_px, 10.0, epsilon = 1e-9);
        assert_eq!(outcome.apex_speed_kmh, 28.0);
        assert!(analyzer.state(1).is_some_and(|s| s.apex_reached));

        // terminal for the lap
        let more = analyzer.update(&buoys, Point::new(200.0, 10.0), 28.0, true, DT);
        assert!(more.is_empty());
    }

    #[test]
    fn apex_outcome_uses_window_and_line() {
        let buoys = vec![turn_buoy(3, 0.0, 0.0, Some(30.0))];
        let mut analyzer = ApexAnalyzer::new(ApexConfig::default());
        analyzer.reset(&buoys);

        // approach with throttle held throughout, closest at 10 px
        let mut last = Vec::new();
        for d in [50.0, 40.0, 30.0, 20.0, 10.0, 12.0] {
            last = analyzer.update(&buoys, Point::new(d, 0.0), 28.0, true, DT);
        }
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].1.key, CommentaryKey::TurnOptimalTightGood);
    }

    #[test]
    fn reset_only_tracks_turn_buoys() {
        let mut timing = turn_buoy(0, 5.0, 5.0, None);
        timing.turn_index = None;
        let buoys = vec![timing, turn_buoy(2, 0.0, 0.0, None)];
        let mut analyzer = ApexAnalyzer::new(ApexConfig::default());
        analyzer.reset(&buoys);
        assert!(analyzer.state(2).is_some());
        assert!(analyzer.state(0).is_none());
    }
}
