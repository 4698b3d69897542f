//! Decides which bubble in a row, if any, has been marked.
//!
//! Two strategies exist. The heuristic picks the bubble with the largest
//! detected area and always produces an answer for a non-empty row. The
//! learned strategy scores every bubble's pixels with a trained model and
//! picks the most confident "filled" prediction; when the model is absent
//! or finds nothing filled, the heuristic decides instead.

pub mod features;
pub mod model;
pub mod scaler;
pub mod store;

use image::GrayImage;
use log::debug;
use logging_timer::time;

use crate::types::{BubbleCandidate, Row};

pub use features::{candidate_features, extract_features, Features, FEATURE_COUNT};
pub use model::{FillPrediction, LogisticModel};
pub use scaler::FeatureScaler;
pub use store::{ClassifierError, ClassifierSnapshot, ClassifierStore, ModelStorage, TrainedClassifier};

#[derive(Debug, Clone, Copy)]
pub enum FillStrategy<'a> {
    Heuristic,
    Learned {
        classifier: &'a TrainedClassifier,
        min_confidence: f32,
    },
}

impl<'a> FillStrategy<'a> {
    /// The strategy a snapshot supports: learned when it holds a trained
    /// classifier, heuristic otherwise.
    pub fn for_snapshot(snapshot: &'a ClassifierSnapshot, min_confidence: f32) -> Self {
        match &snapshot.trained {
            Some(classifier) => FillStrategy::Learned {
                classifier,
                min_confidence,
            },
            None => FillStrategy::Heuristic,
        }
    }

    /// Index within the row of the marked bubble, or `None` to abstain.
    pub fn select(&self, img: &GrayImage, row: &Row) -> Option<usize> {
        match self {
            FillStrategy::Heuristic => select_by_area(&row.bubbles),
            FillStrategy::Learned {
                classifier,
                min_confidence,
            } => select_by_model(img, &row.bubbles, classifier, *min_confidence).or_else(|| {
                debug!("no confident filled prediction; falling back to area heuristic");
                select_by_area(&row.bubbles)
            }),
        }
    }
}

/// Picks the bubble with the strictly largest area; on a tie the leftmost
/// one wins.
pub fn select_by_area(bubbles: &[BubbleCandidate]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, bubble) in bubbles.iter().enumerate() {
        match best {
            Some((_, area)) if bubble.area <= area => {}
            _ => best = Some((i, bubble.area)),
        }
    }
    best.map(|(i, _)| i)
}

/// Picks the bubble predicted filled with the highest confidence, ignoring
/// predictions below `min_confidence`. Ties go to the leftmost bubble.
pub fn select_by_model(
    img: &GrayImage,
    bubbles: &[BubbleCandidate],
    classifier: &TrainedClassifier,
    min_confidence: f32,
) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, bubble) in bubbles.iter().enumerate() {
        let Some(features) = candidate_features(img, bubble) else {
            continue;
        };
        let prediction = classifier.predict(&features);
        if !prediction.filled || prediction.confidence < min_confidence {
            continue;
        }
        match best {
            Some((_, confidence)) if prediction.confidence <= confidence => {}
            _ => best = Some((i, prediction.confidence)),
        }
    }
    best.map(|(i, _)| i)
}

/// Resolves every row to its marked choice, in row order.
#[time]
pub fn classify_rows(img: &GrayImage, rows: &[Row], strategy: &FillStrategy) -> Vec<Option<usize>> {
    rows.iter().map(|row| strategy.select(img, row)).collect()
}
