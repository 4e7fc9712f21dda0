//! motion.rs — Arcade craft motion model
//!
//! Per tick, in order:
//! 1. Speed ramps up/down with the throttle intents, clamped to `[0, max_speed]`
//! 2. Bank angle ramps toward the held direction (fast below 30°, slow above),
//!    or decays toward level at a 60 fps-normalized rate when released
//! 3. Effective radius from the turn-radius tables
//! 4. Heading integrates the turn rate
//! 5. Position integrates along the heading
//! 6. Leaving the world wraps to the opposite edge; the caller must not treat
//!    a wrapped step as real course motion
//!
//! Speeds are kept in internal units; `speed_conversion` maps them to km/h and
//! `speed_scale` to pixels per second.

use course_types::{InputIntent, Pose};
use serde::{Deserialize, Serialize};

use crate::turn_radius::effective_radius;

// ── Configuration ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    pub max_speed: f64,
    pub time_to_max_speed_s: f64,
    pub decel_rate: f64,
    /// Internal speed units → km/h
    pub speed_conversion: f64,
    /// Internal speed units → px/s
    pub speed_scale: f64,
    pub bank_angle_max_deg: f64,
    pub bank_rate_0_to_30: f64,
    pub bank_rate_30_to_55: f64,
    /// Per-frame decay factor at 60 fps
    pub bank_decay: f64,
    /// Released bank below this snaps to level before decaying
    pub bank_release_snap_deg: f64,
    /// Decayed bank below this snaps to level
    pub bank_decay_snap_deg: f64,
    pub turn_gain: f64,
    /// Curvature floor so a banked craft always turns
    pub low_factor: f64,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            max_speed: 100.0,
            time_to_max_speed_s: 18.0,
            decel_rate: 12.333,
            speed_conversion: 0.6,
            speed_scale: 0.837,
            bank_angle_max_deg: 55.0,
            bank_rate_0_to_30: 40.0,
            bank_rate_30_to_55: 10.0,
            bank_decay: 0.9,
            bank_release_snap_deg: 0.5,
            bank_decay_snap_deg: 0.05,
            turn_gain: 15.0,
            low_factor: 0.02084,
        }
    }
}

impl PhysicsConfig {
    pub fn accel_rate(&self) -> f64 {
        self.max_speed / self.time_to_max_speed_s
    }
}

/// World bounds in pixels. Positions wrap at the edges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldSize {
    pub width: f64,
    pub height: f64,
}

impl Default for WorldSize {
    fn default() -> Self {
        Self { width: 1280.0, height: 720.0 }
    }
}

// ── State ─────────────────────────────────────────────────────────────────────

/// Scalar motion state. `0 ≤ speed ≤ max_speed`, `|bank| ≤ bank_angle_max`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MotionState {
    pub speed: f64,
    pub bank_angle_deg: f64,
}

/// `signum` that maps 0 to 0.
fn sign(v: f64) -> f64 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}

// ── Integrator ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct MotionModel {
    pub cfg: PhysicsConfig,
}

impl MotionModel {
    pub fn new(cfg: PhysicsConfig) -> Self { Self { cfg } }

    pub fn speed_kmh(&self, state: &MotionState) -> f64 {
        state.speed * self.cfg.speed_conversion
    }

    pub fn update_speed(&self, state: &mut MotionState, input: &InputIntent, dt: f64) {
        if input.up {
            state.speed += self.cfg.accel_rate() * dt;
        }
        if input.down {
            state.speed -= self.cfg.decel_rate * dt;
        }
        state.speed = state.speed.clamp(0.0, self.cfg.max_speed);
    }

    pub fn update_bank_angle(&self, state: &mut MotionState, input: &InputIntent, dt: f64) {
        let target_sign = input.turn_sign();

        if target_sign != 0.0 {
            let mut magnitude = state.bank_angle_deg.abs();
            let mut current_sign = sign(state.bank_angle_deg);
            if current_sign == 0.0 {
                current_sign = target_sign;
            }
            // Reversing the held direction levels the craft instantly
            if current_sign != target_sign {
                magnitude = 0.0;
                current_sign = target_sign;
            }
            let rate = if magnitude < 30.0 {
                self.cfg.bank_rate_0_to_30
            } else {
                self.cfg.bank_rate_30_to_55
            };
            magnitude = (magnitude + rate * dt).min(self.cfg.bank_angle_max_deg);
            state.bank_angle_deg = current_sign * magnitude;
        } else if state.bank_angle_deg.abs() < self.cfg.bank_release_snap_deg {
            state.bank_angle_deg = 0.0;
        } else {
            state.bank_angle_deg *= self.cfg.bank_decay.powf(60.0 * dt);
            if state.bank_angle_deg.abs() < self.cfg.bank_decay_snap_deg {
                state.bank_angle_deg = 0.0;
            }
        }
    }

    /// Heading rate in rad/s for the current speed and bank.
    pub fn turn_rate(&self, state: &MotionState) -> f64 {
        let radius = effective_radius(self.speed_kmh(state), state.bank_angle_deg.abs());
        let angle_rad = state.bank_angle_deg.to_radians();
        sign(state.bank_angle_deg)
            * (angle_rad.abs() * self.cfg.turn_gain)
            * (1.0 / radius + self.cfg.low_factor)
    }

    /// Advance one tick. Returns `true` when the position wrapped at a world edge.
    pub fn step(
        &self,
        pose: &mut Pose,
        state: &mut MotionState,
        input: &InputIntent,
        dt: f64,
        world: &WorldSize,
    ) -> bool {
        self.update_speed(state, input, dt);
        self.update_bank_angle(state, input, dt);

        pose.heading += self.turn_rate(state) * dt;

        let travel = state.speed * self.cfg.speed_scale * dt;
        pose.x += travel * pose.heading.cos();
        pose.y += travel * pose.heading.sin();

        wrap_to_world(pose, world)
    }
}

/// Wrap a pose that left the world to the opposite edge.
pub fn wrap_to_world(pose: &mut Pose, world: &WorldSize) -> bool {
    let mut wrapped = false;
    if pose.x > world.width {
        pose.x = 0.0;
        wrapped = true;
    } else if pose.x < 0.0 {
        pose.x = world.width;
        wrapped = true;
    }
    if pose.y > world.height {
        pose.y = 0.0;
        wrapped = true;
    } else if pose.y < 0.0 {
        pose.y = world.height;
        wrapped = true;
    }
    wrapped
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const DT: f64 = 1.0 / 60.0;

    fn up() -> InputIntent { InputIntent { up: true, ..Default::default() } }
    fn right() -> InputIntent { InputIntent { right: true, ..Default::default() } }
    fn left() -> InputIntent { InputIntent { left: true, ..Default::default() } }

    #[test]
    fn full_throttle_reaches_max_speed_on_a_straight_ray() {
        let model = MotionModel::default();
        let world = WorldSize { width: 4000.0, height: 4000.0 };
        let mut pose = Pose { x: 100.0, y: 500.0, heading: 0.0 };
        let mut state = MotionState::default();

        let ticks = (model.cfg.time_to_max_speed_s / DT).round() as usize;
        for _ in 0..ticks {
            assert!(!model.step(&mut pose, &mut state, &up(), DT, &world));
        }

        assert_relative_eq!(state.speed, model.cfg.max_speed, epsilon = 1e-6);
        assert_eq!(pose.heading, 0.0);
        assert_eq!(pose.y, 500.0);
        assert!(pose.x > 100.0);
    }

    #[test]
    fn speed_stays_in_range() {
        let model = MotionModel::default();
        let mut state = MotionState { speed: 1.0, bank_angle_deg: 0.0 };
        model.update_speed(&mut state, &InputIntent { down: true, ..Default::default() }, 1.0);
        assert_eq!(state.speed, 0.0);

        state.speed = 99.9;
        model.update_speed(&mut state, &up(), 1.0);
        assert_eq!(state.speed, model.cfg.max_speed);
    }

    #[test]
    fn bank_ramps_fast_then_slow_and_caps() {
        let model = MotionModel::default();
        let mut state = MotionState::default();

        model.update_bank_angle(&mut state, &right(), 0.5);
        assert_relative_eq!(state.bank_angle_deg, 20.0);

        model.update_bank_angle(&mut state, &right(), 0.5);
        assert_relative_eq!(state.bank_angle_deg, 40.0);

        // above 30° the slow rate applies
        model.update_bank_angle(&mut state, &right(), 0.5);
        assert_relative_eq!(state.bank_angle_deg, 45.0);

        model.update_bank_angle(&mut state, &right(), 10.0);
        assert_eq!(state.bank_angle_deg, model.cfg.bank_angle_max_deg);
    }

    #[test]
    fn reversing_direction_levels_before_ramping() {
        let model = MotionModel::default();
        let mut state = MotionState { speed: 50.0, bank_angle_deg: 45.0 };
        model.update_bank_angle(&mut state, &left(), 0.1);
        assert_relative_eq!(state.bank_angle_deg, -4.0);
    }

    #[test]
    fn released_bank_decays_and_snaps_to_level() {
        let model = MotionModel::default();
        let mut state = MotionState { speed: 50.0, bank_angle_deg: 40.0 };
        model.update_bank_angle(&mut state, &InputIntent::default(), DT);
        assert_relative_eq!(state.bank_angle_deg, 36.0, epsilon = 1e-9);

        state.bank_angle_deg = -0.4;
        model.update_bank_angle(&mut state, &InputIntent::default(), DT);
        assert_eq!(state.bank_angle_deg, 0.0);

        state.bank_angle_deg = 40.0;
        for _ in 0..120 {
            model.update_bank_angle(&mut state, &InputIntent::default(), DT);
        }
        assert_eq!(state.bank_angle_deg, 0.0);
    }

    #[test]
    fn turn_rate_sign_follows_bank() {
        let model = MotionModel::default();
        let right = MotionState { speed: 50.0, bank_angle_deg: 40.0 };
        let left = MotionState { speed: 50.0, bank_angle_deg: -40.0 };
        let level = MotionState { speed: 50.0, bank_angle_deg: 0.0 };
        assert!(model.turn_rate(&right) > 0.0);
        assert_relative_eq!(model.turn_rate(&left), -model.turn_rate(&right));
        assert_eq!(model.turn_rate(&level), 0.0);
    }

    #[test]
    fn low_factor_keeps_a_minimum_turn_rate() {
        let model = MotionModel::default();
        // tiny bank: radius ≈ 5000, rate dominated by low_factor
        let state = MotionState { speed: 50.0, bank_angle_deg: 1.0 };
        let expected_floor = 1.0_f64.to_radians() * model.cfg.turn_gain * model.cfg.low_factor;
        assert!(model.turn_rate(&state) > expected_floor);
    }

    #[test]
    fn wrapping_moves_to_opposite_edge() {
        let world = WorldSize { width: 100.0, height: 50.0 };
        let mut pose = Pose { x: 101.0, y: -1.0, heading: 0.0 };
        assert!(wrap_to_world(&mut pose, &world));
        assert_eq!((pose.x, pose.y), (0.0, 50.0));

        let mut inside = Pose { x: 50.0, y: 25.0, heading: 0.0 };
        assert!(!wrap_to_world(&mut inside, &world));
    }
}
