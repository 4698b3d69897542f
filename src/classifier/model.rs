use serde::{Deserialize, Serialize};

use super::features::{Features, FEATURE_COUNT};

const LEARNING_RATE: f32 = 0.1;
const EPOCHS: usize = 500;
const L2_PENALTY: f32 = 1e-3;

/// A filled/empty decision with the probability of the decided class.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillPrediction {
    pub filled: bool,
    pub confidence: f32,
}

/// Binary logistic regression over scaled bubble features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    pub weights: Vec<f32>,
    pub bias: f32,
}

impl LogisticModel {
    /// Full-batch gradient descent from zero weights. Deterministic for a
    /// given sample order.
    pub fn fit(samples: &[Features], labels: &[bool]) -> Self {
        let mut model = Self {
            weights: vec![0.0; FEATURE_COUNT],
            bias: 0.0,
        };
        let n = samples.len().min(labels.len());
        if n == 0 {
            return model;
        }

        for _ in 0..EPOCHS {
            let mut grad_w = [0f32; FEATURE_COUNT];
            let mut grad_b = 0f32;
            for (x, &y) in samples.iter().zip(labels) {
                let error = model.probability(x) - if y { 1.0 } else { 0.0 };
                for (g, xi) in grad_w.iter_mut().zip(x) {
                    *g += error * xi;
                }
                grad_b += error;
            }
            for (w, g) in model.weights.iter_mut().zip(grad_w) {
                *w -= LEARNING_RATE * (g / n as f32 + L2_PENALTY * *w);
            }
            model.bias -= LEARNING_RATE * grad_b / n as f32;
        }
        model
    }

    /// Probability that the bubble is filled.
    pub fn probability(&self, x: &Features) -> f32 {
        let z = self.bias
            + self
                .weights
                .iter()
                .zip(x)
                .map(|(w, xi)| w * xi)
                .sum::<f32>();
        1.0 / (1.0 + (-z).exp())
    }

    pub fn predict(&self, x: &Features) -> FillPrediction {
        let p = self.probability(x);
        if p >= 0.5 {
            FillPrediction {
                filled: true,
                confidence: p,
            }
        } else {
            FillPrediction {
                filled: false,
                confidence: 1.0 - p,
            }
        }
    }

    pub fn is_well_formed(&self) -> bool {
        self.weights.len() == FEATURE_COUNT
            && self.weights.iter().all(|w| w.is_finite())
            && self.bias.is_finite()
    }
}

/// Fraction of samples whose prediction matches the label.
pub fn accuracy(model: &LogisticModel, samples: &[Features], labels: &[bool]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let correct = samples
        .iter()
        .zip(labels)
        .filter(|(x, y)| model.predict(x).filled == **y)
        .count();
    correct as f32 / samples.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(v: f32) -> Features {
        let mut f = [0f32; FEATURE_COUNT];
        f[0] = v;
        f[1] = -v / 2.0;
        f
    }

    #[test]
    fn separable_data_is_learned() {
        let samples = [-2.0, -1.5, -1.0, 1.0, 1.5, 2.0].map(sample);
        let labels = [false, false, false, true, true, true];
        let model = LogisticModel::fit(&samples, &labels);

        assert_eq!(accuracy(&model, &samples, &labels), 1.0);
        let p = model.predict(&sample(3.0));
        assert!(p.filled);
        assert!(p.confidence > 0.9);
        assert!(!model.predict(&sample(-3.0)).filled);
    }

    #[test]
    fn confidence_is_the_decided_class_probability() {
        let model = LogisticModel {
            weights: vec![0.0; FEATURE_COUNT],
            bias: -2.0,
        };
        let p = model.predict(&sample(0.0));
        assert!(!p.filled);
        assert!((p.confidence - (1.0 - 1.0 / (1.0 + 2f32.exp()))).abs() < 1e-6);
        assert!(p.confidence >= 0.5);
    }

    #[test]
    fn untrained_fit_on_nothing_is_neutral() {
        let model = LogisticModel::fit(&[], &[]);
        assert_eq!(model.probability(&sample(1.0)), 0.5);
        assert!(model.is_well_formed());
    }
}
