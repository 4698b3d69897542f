use image::GrayImage;
use log::{debug, info};
use logging_timer::time;
use serde::Serialize;

use crate::bubbles::find_bubble_candidates;
use crate::classifier::{candidate_features, ClassifierError, ClassifierStore, Features};
use crate::config::ScannerConfig;
use crate::rows::cluster_rows;
use crate::types::{Answer, GridRegion, Row};

/// Why a training request left the classifier unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "reason", rename_all = "camelCase")]
pub enum SkipReason {
    #[error("{count} filled sample(s), need at least {required}")]
    TooFewPositives { count: usize, required: usize },
    #[error("{count} empty sample(s), need at least {required}")]
    TooFewNegatives { count: usize, required: usize },
    #[error("{count} sample(s) in total, need at least {required}")]
    TooFewSamples { count: usize, required: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum TrainingOutcome {
    /// The classifier was replaced. `accuracy` is measured on held-out
    /// samples and is informational only.
    Trained { accuracy: f32, samples: usize },
    Skipped(SkipReason),
}

/// Filled and empty bubble features harvested from one sheet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingSet {
    pub positives: Vec<Features>,
    pub negatives: Vec<Features>,
}

impl TrainingSet {
    pub fn len(&self) -> usize {
        self.positives.len() + self.negatives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flattens into parallel sample and label vectors, filled first.
    pub fn into_labeled(self) -> (Vec<Features>, Vec<bool>) {
        let labels = std::iter::repeat(true)
            .take(self.positives.len())
            .chain(std::iter::repeat(false).take(self.negatives.len()))
            .collect();
        let mut samples = self.positives;
        samples.extend(self.negatives);
        (samples, labels)
    }
}

/// Labels every bubble on a sheet whose answers are trusted: the chosen
/// choice in each row is filled, the rest of that row empty. Rows past the
/// end of `answers`, and rows whose answer is not a choice label within
/// the row, contribute nothing.
pub fn collect_samples(img: &GrayImage, rows: &[Row], answers: &[Answer]) -> TrainingSet {
    let mut set = TrainingSet::default();
    for (row_index, (row, answer)) in rows.iter().zip(answers).enumerate() {
        let Some(chosen) = answer.choice_index().filter(|&c| c < row.len()) else {
            debug!("row {} answer {} does not name a bubble; skipping", row_index, answer);
            continue;
        };
        for (choice, bubble) in row.bubbles.iter().enumerate() {
            let Some(features) = candidate_features(img, bubble) else {
                continue;
            };
            if choice == chosen {
                set.positives.push(features);
            } else {
                set.negatives.push(features);
            }
        }
    }
    set
}

/// A sheet is only worth training on with enough examples of both classes.
pub fn check_class_balance(set: &TrainingSet, required: usize) -> Option<SkipReason> {
    if set.positives.len() < required {
        Some(SkipReason::TooFewPositives {
            count: set.positives.len(),
            required,
        })
    } else if set.negatives.len() < required {
        Some(SkipReason::TooFewNegatives {
            count: set.negatives.len(),
            required,
        })
    } else {
        None
    }
}

/// Trains the fill classifier on one sheet whose answers are trusted.
///
/// `normalized` must be the sheet as returned by
/// [`normalize`](crate::image_utils::normalize), with ink as foreground.
/// A raw grayscale scan yields no bubbles here. Bubbles are re-extracted
/// inside `grid` and clustered into rows exactly as detection does, then
/// labeled with `answers`. Nothing
/// is trained, and no stored state changes, unless the sheet yields at
/// least `min_samples_per_class` filled and as many empty samples.
#[time]
pub fn train_from_sheet(
    normalized: &GrayImage,
    grid: &GridRegion,
    answers: &[Answer],
    store: &ClassifierStore,
    config: &ScannerConfig,
) -> Result<TrainingOutcome, ClassifierError> {
    let candidates = find_bubble_candidates(normalized, grid, config);
    let rows = cluster_rows(&candidates, config);
    let set = collect_samples(normalized, &rows, answers);

    if let Some(reason) = check_class_balance(&set, config.min_samples_per_class) {
        info!("training skipped: {}", reason);
        return Ok(TrainingOutcome::Skipped(reason));
    }

    let (samples, labels) = set.into_labeled();
    store.train(&samples, &labels, config)
}
