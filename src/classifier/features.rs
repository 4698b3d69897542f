use image::GrayImage;

use crate::image_utils::crop_to_rect;
use crate::types::BubbleCandidate;

pub const FEATURE_COUNT: usize = 11;
const HISTOGRAM_BINS: usize = 5;

/// Mean, standard deviation, minimum, maximum, a normalized 5-bin intensity
/// histogram, then mean absolute horizontal and vertical gradient.
pub type Features = [f32; FEATURE_COUNT];

/// Computes the feature vector of the pixels under a candidate's bounding
/// box. Returns `None` if the box falls outside the image.
pub fn candidate_features(img: &GrayImage, candidate: &BubbleCandidate) -> Option<Features> {
    crop_to_rect(img, &candidate.bounds()).map(|patch| extract_features(&patch))
}

pub fn extract_features(patch: &GrayImage) -> Features {
    let mut features = [0f32; FEATURE_COUNT];
    let count = patch.width() as usize * patch.height() as usize;
    if count == 0 {
        return features;
    }

    let values = patch.as_raw();
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / count as f64;
    let variance = values
        .iter()
        .map(|&v| (v as f64 - mean).powi(2))
        .sum::<f64>()
        / count as f64;
    let min = values.iter().copied().min().unwrap_or(0);
    let max = values.iter().copied().max().unwrap_or(0);

    let mut histogram = [0usize; HISTOGRAM_BINS];
    for &v in values {
        histogram[v as usize * HISTOGRAM_BINS / 256] += 1;
    }

    features[0] = mean as f32;
    features[1] = variance.sqrt() as f32;
    features[2] = min as f32;
    features[3] = max as f32;
    for (slot, bin) in features[4..4 + HISTOGRAM_BINS].iter_mut().zip(histogram) {
        *slot = bin as f32 / count as f32;
    }
    let (horizontal, vertical) = mean_abs_gradients(patch);
    features[9] = horizontal;
    features[10] = vertical;
    features
}

/// Mean absolute gradient along x and along y. Interior pixels use central
/// differences, edge pixels one-sided ones; an axis one pixel long has no
/// gradient.
fn mean_abs_gradients(patch: &GrayImage) -> (f32, f32) {
    let (width, height) = patch.dimensions();
    let at = |x: u32, y: u32| patch.get_pixel(x, y).0[0] as f32;
    let derivative = |len: u32, i: u32, sample: &dyn Fn(u32) -> f32| -> f32 {
        if len < 2 {
            0.0
        } else if i == 0 {
            sample(1) - sample(0)
        } else if i == len - 1 {
            sample(i) - sample(i - 1)
        } else {
            (sample(i + 1) - sample(i - 1)) / 2.0
        }
    };

    let mut horizontal = 0f64;
    let mut vertical = 0f64;
    for y in 0..height {
        for x in 0..width {
            horizontal += derivative(width, x, &|i| at(i, y)).abs() as f64;
            vertical += derivative(height, y, &|i| at(x, i)).abs() as f64;
        }
    }
    let count = (width * height) as f64;
    ((horizontal / count) as f32, (vertical / count) as f32)
}
