//! Reads marked answers off photographed or scanned multiple-choice sheets
//! and scores them against an answer key.
//!
//! The pipeline runs leaf to root: [`image_utils::normalize`] binarizes the
//! sheet, [`grid::find_grid`] locates the answer area,
//! [`bubbles::find_bubble_candidates`] finds bubble-shaped marks inside it,
//! [`rows::cluster_rows`] groups them into questions, and
//! [`classifier::classify_rows`] picks the marked choice of each. The
//! resulting answers feed [`scoring::score`], and sheets whose answers can
//! be trusted feed [`training::train_from_sheet`].

pub mod bubbles;
pub mod classifier;
pub mod config;
pub mod debug;
pub mod geometry;
pub mod grid;
pub mod image_utils;
pub mod interpret;
pub mod rows;
pub mod scoring;
pub mod training;
pub mod types;

pub use config::ScannerConfig;
pub use interpret::{
    detect, grade_sheet, interpret_sheet, register_answer_key, AnswerKey, DetectionError,
    GradedSheet, InterpretOptions, InterpretedSheet, SheetError,
};
pub use scoring::{score, QuestionResult, ScoreResult};
pub use training::{train_from_sheet, SkipReason, TrainingOutcome};
pub use types::{Answer, AnswerSequence, ChoiceKey, GridRegion};
