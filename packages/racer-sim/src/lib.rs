//! # racer-sim
//!
//! Core of the arcade buoy-racing simulator. The [`session::Session`] drives
//! one craft around one course per tick; everything it needs is in the modules
//! below. Rendering and audio stay with the clients, which consume telemetry
//! snapshots and events over the control socket run by the `racer-sim` binary.

pub mod apex;
pub mod commentary;
pub mod config;
pub mod course;
pub mod geometry;
pub mod ghost;
pub mod highscores;
pub mod lap_timing;
pub mod motion;
pub mod persistence;
pub mod session;
pub mod turn_radius;
