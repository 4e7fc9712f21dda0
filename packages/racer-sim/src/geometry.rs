//! geometry.rs — Segment intersection predicates
//!
//! Two predicates with different edge-case contracts:
//!   - [`segments_intersect`]: strict orientation test. Touching endpoints and
//!     collinear overlap are NOT intersections.
//!   - [`line_intersection_parametric`]: solves for the intersection parameters
//!     `t, u` and accepts the closed range `[0, 1]`, so touching endpoints DO
//!     count. Parallel (and collinear) segments never intersect.
//!
//! Crossing detection uses the parametric test: a tick that ends exactly on a
//! gate still registers, and the lap timer's debounce absorbs the duplicate hit
//! on the following tick. The strict test is used for course validation, where
//! gates that merely touch are fine.

use course_types::{Point, Segment};

/// Signed area of the triplet. Sign encodes turn direction, 0 = collinear.
pub fn orientation(p: Point, q: Point, r: Point) -> f64 {
    (q.y - p.y) * (r.x - q.x) - (q.x - p.x) * (r.y - q.y)
}

fn opposite_signs(a: f64, b: f64) -> bool {
    (a > 0.0 && b < 0.0) || (a < 0.0 && b > 0.0)
}

/// Strict segment intersection from four orientation tests.
pub fn segments_intersect(a1: Point, a2: Point, b1: Point, b2: Point) -> bool {
    let o1 = orientation(a1, a2, b1);
    let o2 = orientation(a1, a2, b2);
    let o3 = orientation(b1, b2, a1);
    let o4 = orientation(b1, b2, a2);
    opposite_signs(o1, o2) && opposite_signs(o3, o4)
}

/// Parametric segment intersection, inclusive of endpoints.
pub fn line_intersection_parametric(a1: Point, a2: Point, b1: Point, b2: Point) -> bool {
    let den = (a1.x - a2.x) * (b1.y - b2.y) - (a1.y - a2.y) * (b1.x - b2.x);
    if den == 0.0 {
        return false;
    }

    let t = ((a1.x - b1.x) * (b1.y - b2.y) - (a1.y - b1.y) * (b1.x - b2.x)) / den;
    let u = -((a1.x - a2.x) * (a1.y - b1.y) - (a1.y - a2.y) * (a1.x - b1.x)) / den;

    (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u)
}

/// Does the motion `from → to` cross `gate`? Degenerate gates never match.
pub fn crosses(from: Point, to: Point, gate: &Segment) -> bool {
    if gate.is_degenerate() {
        return false;
    }
    line_intersection_parametric(from, to, gate.start(), gate.end())
}
