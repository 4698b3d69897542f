use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unable to read config {0}: {1}")]
    Io(String, #[source] std::io::Error),
    #[error("unable to parse config {0}: {1}")]
    Json(String, #[source] serde_json::Error),
}

/// Tunables for the detection pipeline and the fill classifier's training.
///
/// Every field has a default, so a config file only needs to name the knobs
/// it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScannerConfig {
    /// Gaussian sigma used to suppress scan noise before thresholding.
    pub blur_sigma: f32,
    /// Radius of the square neighbourhood whose mean is each pixel's
    /// threshold.
    pub threshold_block_radius: u32,
    /// Amount subtracted from the neighbourhood mean.
    pub threshold_offset: i32,

    /// Smallest grid rectangle, as a fraction of the whole image area.
    pub grid_min_area_ratio: f64,
    /// Polygon approximation tolerance, as a fraction of contour perimeter.
    pub polygon_epsilon_ratio: f64,

    pub bubble_min_aspect_ratio: f32,
    pub bubble_max_aspect_ratio: f32,
    pub bubble_min_area: f32,
    /// Largest bubble area, as a fraction of the grid region area.
    pub bubble_max_area_ratio: f32,

    pub max_rows: usize,
    /// Merge row clusters that sit closer together than half a bubble.
    /// Off by default, so over-segmented rows show up in the output.
    pub merge_close_rows: bool,

    /// Learned predictions below this confidence are ignored.
    pub min_confidence: f32,
    /// Fraction of the key a graded sheet must match to be trained on.
    pub training_score_ratio: f32,
    pub min_samples_per_class: usize,
    pub min_training_samples: usize,
    pub validation_fraction: f32,
    pub training_seed: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            blur_sigma: 1.1,
            threshold_block_radius: 5,
            threshold_offset: 2,
            grid_min_area_ratio: 0.01,
            polygon_epsilon_ratio: 0.02,
            bubble_min_aspect_ratio: 0.8,
            bubble_max_aspect_ratio: 1.2,
            bubble_min_area: 30.0,
            bubble_max_area_ratio: 1.0 / 1000.0,
            max_rows: 20,
            merge_close_rows: false,
            min_confidence: 0.5,
            training_score_ratio: 0.7,
            min_samples_per_class: 5,
            min_training_samples: 10,
            validation_fraction: 0.2,
            training_seed: 42,
        }
    }
}

impl ScannerConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.display().to_string(), e))?;
        Self::from_json(&json).map_err(|e| ConfigError::Json(path.display().to_string(), e))
    }
}
