//! turn_radius.rs — Speed/bank → effective turn radius
//!
//! Two piecewise-linear tables keyed by speed (km/h, clamped to the table
//! range). Small bank angles barely turn; the radius tightens progressively
//! with bank down to a speed-dependent floor reached at 50°.

/// Radius (m) reached at a 30° bank, by speed (km/h).
pub const BASELINE_30: [(f64, f64); 5] = [
    (10.0, 10.0),
    (15.0, 15.0),
    (30.0, 30.0),
    (40.0, 65.0),
    (60.0, 80.0),
];

/// Multiplicative radius reduction at full bank, by speed (km/h).
pub const REDUCE_FACTOR: [(f64, f64); 5] = [
    (10.0, 0.85),
    (15.0, 0.82),
    (30.0, 0.83),
    (40.0, 0.85),
    (60.0, 0.90),
];

/// Radius used for a craft that is effectively not banked.
pub const NEAR_STRAIGHT_RADIUS: f64 = 5000.0;

pub const MAX_BANK_FOR_RADIUS: f64 = 55.0;

/// Linear interpolation over `(key, value)` knots sorted by key. Outside the
/// knot range the first/last value is returned.
pub fn interp_piecewise(table: &[(f64, f64)], key: f64) -> f64 {
    let (first, last) = match (table.first(), table.last()) {
        (Some(f), Some(l)) => (*f, *l),
        _ => return 0.0,
    };
    if key <= first.0 {
        return first.1;
    }
    if key >= last.0 {
        return last.1;
    }

    for pair in table.windows(2) {
        let (k0, v0) = pair[0];
        let (k1, v1) = pair[1];
        if key >= k0 && key <= k1 {
            let span = k1 - k0;
            if span <= 0.0 {
                return v0;
            }
            return v0 + (v1 - v0) * (key - k0) / span;
        }
    }
    last.1
}

pub fn baseline30(speed_kmh: f64) -> f64 {
    interp_piecewise(&BASELINE_30, speed_kmh)
}

pub fn reduce_factor(speed_kmh: f64) -> f64 {
    interp_piecewise(&REDUCE_FACTOR, speed_kmh)
}

/// Effective turn radius for a speed (km/h) and bank angle magnitude (degrees).
pub fn effective_radius(speed_kmh: f64, bank_angle_deg: f64) -> f64 {
    let angle = bank_angle_deg.clamp(0.0, MAX_BANK_FOR_RADIUS);
    let base30 = baseline30(speed_kmh);
    let radius_at_50 = base30 * reduce_factor(speed_kmh);

    if angle < 30.0 {
        let frac = angle / 30.0;
        NEAR_STRAIGHT_RADIUS + frac * (base30 - NEAR_STRAIGHT_RADIUS)
    } else if angle <= 50.0 {
        let frac = (angle - 30.0) / 20.0;
        base30 + frac * (radius_at_50 - base30)
    } else {
        radius_at_50
    }
}
