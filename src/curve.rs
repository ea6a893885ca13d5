// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Fan curve definitions and interpolation.
//!
//! A curve maps a temperature reading to a fractional duty cycle (0.0-1.0)
//! using four thresholds plus a ceiling. In stepped mode each threshold
//! bumps the duty a quarter; in linear mode the duty is interpolated
//! between control points.

use serde::{Deserialize, Serialize};

/// Duty cycle assigned to each control point in linear mode, in threshold order.
const LINEAR_DUTIES: [f64; 5] = [0.01, 0.25, 0.50, 0.75, 1.0];

/// Duty cycle assigned to each band in stepped mode.
const STEP_DUTIES: [f64; 4] = [0.25, 0.50, 0.75, 1.0];

/// Default minimum nonzero duty cycle; below this most fans stall.
pub const DEFAULT_MIN_DUTY: f64 = 0.07;

/// How temperatures between thresholds are mapped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CurveMode {
    /// Discrete 25% steps at each threshold.
    #[default]
    Stepped,
    /// Piecewise-linear between thresholds, reaching 100% at the ceiling.
    Linear,
}

impl CurveMode {
    /// Map the config's `linear = true/false` switch to a mode.
    pub fn from_linear(linear: bool) -> Self {
        if linear { Self::Linear } else { Self::Stepped }
    }
}

/// Temperature thresholds for one fan channel, in degrees Celsius.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Breakpoints {
    pub lv0: f64,
    pub lv1: f64,
    pub lv2: f64,
    pub lv3: f64,
    /// Temperature at which the linear curve reaches full speed.
    pub max: f64,
}

impl Breakpoints {
    fn levels(&self) -> [f64; 5] {
        [self.lv0, self.lv1, self.lv2, self.lv3, self.max]
    }

    /// Check that thresholds are non-decreasing.
    ///
    /// The curve itself never relies on this; out-of-order thresholds just
    /// produce an odd curve, so callers treat a failure as a warning.
    pub fn validate(&self) -> Result<(), String> {
        let levels = self.levels();
        for (i, pair) in levels.windows(2).enumerate() {
            if pair[1] < pair[0] {
                return Err(format!(
                    "Thresholds must be non-decreasing (level {} = {} is below {})",
                    i + 1,
                    pair[1],
                    pair[0]
                ));
            }
        }
        Ok(())
    }
}

/// Compute the duty cycle for `temp_c`.
///
/// - Below `lv0`: 0.0 in both modes
/// - Stepped: 0.25 / 0.50 / 0.75 / 1.0 for the bands starting at `lv0..lv3`
/// - Linear: interpolated between `(lv0, 0.01)`, `(lv1, 0.25)`, `(lv2, 0.50)`,
///   `(lv3, 0.75)` and `(max, 1.0)`; 1.0 at or above `max`
pub fn duty_cycle(temp_c: f64, points: &Breakpoints, mode: CurveMode) -> f64 {
    if temp_c < points.lv0 {
        return 0.0;
    }

    match mode {
        CurveMode::Stepped => {
            let uppers = [points.lv1, points.lv2, points.lv3];
            uppers
                .iter()
                .position(|&upper| temp_c < upper)
                .map(|band| STEP_DUTIES[band])
                .unwrap_or(STEP_DUTIES[3])
        }
        CurveMode::Linear => interpolate(temp_c, &points.levels()),
    }
}

fn interpolate(temp_c: f64, levels: &[f64; 5]) -> f64 {
    // First bracket [lo, hi) wins; a zero-width bracket can never match.
    for i in 0..levels.len() - 1 {
        let (lo, hi) = (levels[i], levels[i + 1]);
        if temp_c >= lo && temp_c < hi {
            let frac = (temp_c - lo) / (hi - lo);
            return LINEAR_DUTIES[i] + frac * (LINEAR_DUTIES[i + 1] - LINEAR_DUTIES[i]);
        }
    }
    1.0
}

/// Raise any nonzero duty below `floor` up to `floor`.
pub fn apply_floor(duty: f64, floor: f64) -> f64 {
    if duty > 0.0 && duty < floor { floor } else { duty }
}
