//! Ordinary least squares over `(x, y)` history pairs.

use serde::{Deserialize, Serialize};

/// Fit used when there are fewer than two points.
pub const DEFAULT_MODEL: LinearModel = LinearModel {
    slope: 2.5,
    intercept: 0.5,
};

/// Slopes are never reported below this.
pub const MIN_SLOPE: f64 = 0.1;

/// `y = slope · x + intercept`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub slope: f64,
    pub intercept: f64,
}

impl LinearModel {
    pub fn predict(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

impl Default for LinearModel {
    fn default() -> Self {
        DEFAULT_MODEL
    }
}

/// Least-squares fit of `points`.
///
/// * fewer than 2 points → [`DEFAULT_MODEL`]
/// * `n·Σx² − (Σx)² = 0` (all x equal) → slope `Σy / Σx`, intercept 0
/// * the slope is then floored at [`MIN_SLOPE`]; the intercept is kept as fitted
pub fn calculate_regression(points: &[(f64, f64)]) -> LinearModel {
    if points.len() < 2 {
        return DEFAULT_MODEL;
    }

    let n = points.len() as f64;
    let (mut sx, mut sy, mut sxx, mut sxy) = (0.0, 0.0, 0.0, 0.0);
    for &(x, y) in points {
        sx += x;
        sy += y;
        sxx += x * x;
        sxy += x * y;
    }

    let denom = n * sxx - sx * sx;
    let (slope, intercept) = if denom.abs() < f64::EPSILON * sxx.max(1.0) {
        let ratio = if sx != 0.0 { sy / sx } else { DEFAULT_MODEL.slope };
        (ratio, 0.0)
    } else {
        let slope = (n * sxy - sx * sy) / denom;
        (slope, (sy - slope * sx) / n)
    };

    LinearModel {
        slope: if slope.is_finite() { slope.max(MIN_SLOPE) } else { DEFAULT_MODEL.slope },
        intercept: if intercept.is_finite() { intercept } else { 0.0 },
    }
}
