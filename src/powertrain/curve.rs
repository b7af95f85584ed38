// ==============================================================================
// curve.rs — CLUTCH ENGAGEMENT CURVE
// ------------------------------------------------------------------------------
// Maps raw clutch actuation (0 = open, 1 = closed) to the engagement fraction
// the solver couples with. Piecewise linear over sorted keys; both axes are
// clamped to [0, 1] so a badly authored curve can never push engagement out of
// range.
// ==============================================================================

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<[f32; 2]>", into = "Vec<[f32; 2]>")]
pub struct EngagementCurve {
    keys: Vec<[f32; 2]>, // (input, engagement), sorted by input
}

impl Default for EngagementCurve {
    fn default() -> Self {
        Self { keys: vec![[0.0, 0.0], [1.0, 1.0]] }
    }
}

impl From<Vec<[f32; 2]>> for EngagementCurve {
    fn from(keys: Vec<[f32; 2]>) -> Self {
        Self::new(keys)
    }
}

impl From<EngagementCurve> for Vec<[f32; 2]> {
    fn from(curve: EngagementCurve) -> Self {
        curve.keys
    }
}

impl EngagementCurve {
    pub fn new(keys: Vec<[f32; 2]>) -> Self {
        let mut keys: Vec<[f32; 2]> = keys
            .into_iter()
            .filter(|k| k[0].is_finite() && k[1].is_finite())
            .map(|[x, y]| [x.clamp(0.0, 1.0), y.clamp(0.0, 1.0)])
            .collect();
        keys.sort_by(|a, b| a[0].total_cmp(&b[0]));

        if keys.is_empty() {
            return Self::default();
        }
        Self { keys }
    }

    pub fn keys(&self) -> &[[f32; 2]] {
        &self.keys
    }

    /// True when engagement never decreases as actuation increases.
    pub fn is_monotonic(&self) -> bool {
        self.keys.windows(2).all(|w| w[1][1] >= w[0][1])
    }

    pub fn evaluate(&self, x: f32) -> f32 {
        let x = if x.is_finite() { x.clamp(0.0, 1.0) } else { 0.0 };

        let Some(first) = self.keys.first() else { return x };
        if x <= first[0] {
            return first[1];
        }

        for w in self.keys.windows(2) {
            let [x0, y0] = w[0];
            let [x1, y1] = w[1];
            if x <= x1 {
                let span = x1 - x0;
                if span <= f32::EPSILON {
                    return y1;
                }
                return (y0 + (y1 - y0) * (x - x0) / span).clamp(0.0, 1.0);
            }
        }

        self.keys.last().map(|k| k[1]).unwrap_or(x)
    }
}
