use serde::{Deserialize, Serialize};

use crate::types::Answer;

/// How one question of a submission compared against the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionResult {
    /// 1-based question number.
    pub question_index: usize,
    pub correct_answer: Answer,
    pub given_answer: Answer,
    pub is_correct: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub score: usize,
    pub total: usize,
    pub details: Vec<QuestionResult>,
}

impl ScoreResult {
    /// Score as a percentage of the key length; 0 for an empty key.
    pub fn percentage(&self) -> f32 {
        if self.total == 0 {
            0.0
        } else {
            self.score as f32 * 100.0 / self.total as f32
        }
    }

    /// Fraction of the key answered correctly; 0 for an empty key.
    pub fn ratio(&self) -> f32 {
        self.percentage() / 100.0
    }
}

/// Compares a submission against the reference answers position by
/// position. Every reference question gets a detail entry; questions past
/// the end of the submission are recorded as unanswered and incorrect.
/// Submitted answers beyond the reference length are ignored.
pub fn score(reference: &[Answer], submitted: &[Answer]) -> ScoreResult {
    let details = reference
        .iter()
        .enumerate()
        .map(|(i, correct)| {
            let given = submitted.get(i).cloned().unwrap_or_else(Answer::no_answer);
            let is_correct = i < submitted.len() && given == *correct;
            QuestionResult {
                question_index: i + 1,
                correct_answer: correct.clone(),
                given_answer: given,
                is_correct,
            }
        })
        .collect::<Vec<_>>();

    ScoreResult {
        score: details.iter().filter(|d| d.is_correct).count(),
        total: reference.len(),
        details,
    }
}
