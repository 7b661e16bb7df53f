//! Distance/step/time conversions shared by the motion code.

use std::time::Duration;

/// Quantize a distance to whole steps, rounding to nearest.
///
/// Negative or non-finite inputs map to 0; results saturate at `u32::MAX`.
#[inline]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn mm_to_steps(distance_mm: f32, steps_per_mm: f32) -> u32 {
    let steps = f64::from(distance_mm) * f64::from(steps_per_mm);
    if !steps.is_finite() || steps <= 0.0 {
        return 0;
    }
    let rounded = steps.round();
    if rounded >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        rounded as u32
    }
}

/// Convert a signed step count back to millimetres.
#[inline]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub fn steps_to_mm(steps: i64, steps_per_mm: f32) -> f32 {
    if steps_per_mm <= 0.0 || !steps_per_mm.is_finite() {
        return 0.0;
    }
    (steps as f64 / f64::from(steps_per_mm)) as f32
}

/// Time between two step pulses at `speed_mm_s`.
///
/// Non-positive speeds yield `Duration::ZERO`.
#[inline]
pub fn step_interval(speed_mm_s: f32, steps_per_mm: f32) -> Duration {
    let rate = f64::from(speed_mm_s) * f64::from(steps_per_mm);
    if !rate.is_finite() || rate <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(1.0 / rate)
}
