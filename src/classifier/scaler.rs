use serde::{Deserialize, Serialize};

use super::features::{Features, FEATURE_COUNT};

/// Per-feature standardization fitted on the training set: each feature has
/// its mean subtracted and is divided by its standard deviation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureScaler {
    pub mean: Vec<f32>,
    pub scale: Vec<f32>,
}

impl FeatureScaler {
    /// Fits the scaler. A feature that never varies gets unit scale so it
    /// passes through centred instead of dividing by zero.
    pub fn fit(samples: &[Features]) -> Self {
        let n = samples.len().max(1) as f64;
        let mut mean = vec![0f32; FEATURE_COUNT];
        let mut scale = vec![1f32; FEATURE_COUNT];
        for i in 0..FEATURE_COUNT {
            let m = samples.iter().map(|s| s[i] as f64).sum::<f64>() / n;
            let variance = samples.iter().map(|s| (s[i] as f64 - m).powi(2)).sum::<f64>() / n;
            let std = variance.sqrt();
            mean[i] = m as f32;
            if std > f64::EPSILON {
                scale[i] = std as f32;
            }
        }
        Self { mean, scale }
    }

    pub fn transform(&self, features: &Features) -> Features {
        let mut out = *features;
        for (i, value) in out.iter_mut().enumerate() {
            *value = (*value - self.mean[i]) / self.scale[i];
        }
        out
    }

    pub fn is_well_formed(&self) -> bool {
        self.mean.len() == FEATURE_COUNT
            && self.scale.len() == FEATURE_COUNT
            && self.scale.iter().all(|s| s.is_finite() && *s > 0.0)
            && self.mean.iter().all(|m| m.is_finite())
    }
}
