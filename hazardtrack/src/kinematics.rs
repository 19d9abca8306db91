//! Distance and braking kinematics derived from bounding boxes
//!
//! Distances assume a fixed-focal-length camera mounted roughly level with the
//! travel surface, so apparent box height is inversely proportional to range.

use crate::bbox::Bbox;

/// Lower bound on speed used for time-to-collision (m/s)
pub const MIN_CLOSING_SPEED_MPS: f32 = 0.1;

/// Convert km/h to m/s
#[inline]
pub fn kmph_to_mps(speed_kmph: f32) -> f32 {
    speed_kmph / 3.6
}

/// Estimate range to an object from its box height.
///
/// `meters = clip(calib_const / max(1, height), min_cap, max_cap)`
pub fn estimate_distance(bbox: &Bbox<f32>, calib_const: f32, min_cap: f32, max_cap: f32) -> f32 {
    let height = bbox.height().max(1.0);
    (calib_const / height).max(min_cap).min(max_cap)
}

/// Reaction distance plus braking distance in meters
pub fn stopping_distance(speed_kmph: f32, reaction_time_s: f32, decel_mps2: f32) -> f32 {
    let v = kmph_to_mps(speed_kmph);
    v * reaction_time_s + (v * v) / (2.0 * decel_mps2)
}

/// Seconds until an object at `distance_m` is reached at the current speed
pub fn time_to_collision(distance_m: f32, speed_kmph: f32) -> f32 {
    distance_m / kmph_to_mps(speed_kmph).max(MIN_CLOSING_SPEED_MPS)
}
