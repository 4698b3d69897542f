use log::debug;
use logging_timer::time;

use crate::config::ScannerConfig;
use crate::types::{BubbleCandidate, ChoiceKey, Row};

const MAX_ITERATIONS: usize = 300;

/// Groups bubble candidates into answer rows.
///
/// Rows come back top to bottom by mean vertical position, and each row's
/// bubbles left to right, so a bubble's position in the output is its
/// [`ChoiceKey`]. The row count is estimated as `min(count / 2, max_rows)`;
/// rows are not checked for equal choice counts or even spacing, so a badly
/// skewed sheet can produce misaligned rows. One physical row split over
/// several clusters is left split unless `merge_close_rows` is set.
#[time]
pub fn cluster_rows(candidates: &[BubbleCandidate], config: &ScannerConfig) -> Vec<Row> {
    if candidates.len() < 2 {
        debug!("{} candidate(s) is too few to form rows", candidates.len());
        return vec![];
    }

    let k = (candidates.len() / 2).min(config.max_rows).max(1);
    let ys = candidates.iter().map(|c| c.center_y).collect::<Vec<f32>>();
    let labels = kmeans_1d(&ys, k);

    let mut rows = vec![Row { bubbles: vec![] }; k];
    for (candidate, label) in candidates.iter().zip(labels) {
        rows[label].bubbles.push(*candidate);
    }
    rows.retain(|row| !row.is_empty());
    rows.sort_by(|a, b| a.mean_y().total_cmp(&b.mean_y()));

    if config.merge_close_rows {
        let tolerance = median_height(candidates) / 2.0;
        rows = merge_close_rows(rows, tolerance);
    }

    for row in &mut rows {
        row.bubbles.sort_by(|a, b| a.center_x.total_cmp(&b.center_x));
    }

    debug!(
        "clustered {} candidate(s) into {} row(s) (k = {})",
        candidates.len(),
        rows.len(),
        k
    );
    rows
}

/// Iterates every bubble together with its (row, choice) key.
pub fn keyed_bubbles(rows: &[Row]) -> impl Iterator<Item = (ChoiceKey, &BubbleCandidate)> {
    rows.iter().enumerate().flat_map(|(row_index, row)| {
        row.bubbles
            .iter()
            .enumerate()
            .map(move |(choice, bubble)| (ChoiceKey::new(row_index, choice), bubble))
    })
}

/// Lloyd's algorithm on scalar values, returning each value's cluster label.
///
/// Centroids start at evenly spaced quantiles of the sorted values, so the
/// result depends only on the input. Assignment ties go to the lower label.
/// Labels may be left unused when values coincide.
pub fn kmeans_1d(values: &[f32], k: usize) -> Vec<usize> {
    let n = values.len();
    if n == 0 || k == 0 {
        return vec![0; n];
    }
    let k = k.min(n);

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mut centroids = (0..k)
        .map(|i| sorted[((2 * i + 1) * n) / (2 * k)])
        .collect::<Vec<f32>>();

    let mut labels = vec![usize::MAX; n];
    for _ in 0..MAX_ITERATIONS {
        let mut changed = false;
        for (label, value) in labels.iter_mut().zip(values) {
            let nearest = nearest_centroid(&centroids, *value);
            if *label != nearest {
                *label = nearest;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let mut sums = vec![0f64; k];
        let mut counts = vec![0usize; k];
        for (label, value) in labels.iter().zip(values) {
            sums[*label] += *value as f64;
            counts[*label] += 1;
        }
        for ((centroid, sum), count) in centroids.iter_mut().zip(sums).zip(counts) {
            if count > 0 {
                *centroid = (sum / count as f64) as f32;
            }
        }
    }
    labels
}

fn nearest_centroid(centroids: &[f32], value: f32) -> usize {
    let mut best = 0;
    let mut best_distance = f32::INFINITY;
    for (i, centroid) in centroids.iter().enumerate() {
        let distance = (value - centroid).abs();
        if distance < best_distance {
            best = i;
            best_distance = distance;
        }
    }
    best
}

fn median_height(candidates: &[BubbleCandidate]) -> f32 {
    let mut heights = candidates.iter().map(|c| c.height as f32).collect::<Vec<_>>();
    if heights.is_empty() {
        return 0.0;
    }
    heights.sort_by(|a, b| a.total_cmp(b));
    heights[heights.len() / 2]
}

/// Folds each row into its predecessor when their mean vertical positions
/// are closer than `tolerance`. Expects rows sorted top to bottom.
fn merge_close_rows(rows: Vec<Row>, tolerance: f32) -> Vec<Row> {
    let mut merged: Vec<Row> = Vec::with_capacity(rows.len());
    for row in rows {
        match merged.last_mut() {
            Some(previous) if row.mean_y() - previous.mean_y() < tolerance => {
                debug!(
                    "merging row at y={:.1} into row at y={:.1}",
                    row.mean_y(),
                    previous.mean_y()
                );
                previous.bubbles.extend(row.bubbles);
            }
            _ => merged.push(row),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn bubble(x: f32, y: f32) -> BubbleCandidate {
        BubbleCandidate {
            center_x: x,
            center_y: y,
            area: 100.0,
            width: 12,
            height: 12,
        }
    }

    /// A sheet of `rows` questions with `choices` bubbles each, 40px apart.
    fn sheet(rows: usize, choices: usize) -> Vec<BubbleCandidate> {
        let mut bubbles = vec![];
        for r in 0..rows {
            for c in 0..choices {
                bubbles.push(bubble(100.0 + 40.0 * c as f32, 80.0 + 40.0 * r as f32));
            }
        }
        bubbles
    }

    #[test]
    fn single_candidate_yields_no_rows() {
        assert!(cluster_rows(&[bubble(10.0, 10.0)], &ScannerConfig::default()).is_empty());
        assert!(cluster_rows(&[], &ScannerConfig::default()).is_empty());
    }

    #[test]
    fn aligned_sheet_clusters_into_its_rows() {
        let mut bubbles = sheet(5, 4);
        bubbles.reverse();
        let rows = cluster_rows(&bubbles, &ScannerConfig::default());

        assert_eq!(rows.len(), 5);
        for (r, row) in rows.iter().enumerate() {
            assert_eq!(row.mean_y(), 80.0 + 40.0 * r as f32);
            let xs = row.bubbles.iter().map(|b| b.center_x).collect::<Vec<_>>();
            assert_eq!(xs, vec![100.0, 140.0, 180.0, 220.0]);
        }
    }

    #[test]
    fn jittered_rows_are_merged_back_together() {
        let mut bubbles = sheet(3, 4);
        for (i, b) in bubbles.iter_mut().enumerate() {
            b.center_y += if i % 2 == 0 { -1.0 } else { 1.0 };
        }
        let config = ScannerConfig {
            merge_close_rows: true,
            ..ScannerConfig::default()
        };
        let rows = cluster_rows(&bubbles, &config);
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|row| row.len() == 4));
    }

    #[test]
    fn jittered_rows_are_split_by_default() {
        let mut bubbles = sheet(3, 4);
        for (i, b) in bubbles.iter_mut().enumerate() {
            b.center_y += if i % 2 == 0 { -1.0 } else { 1.0 };
        }
        // Six clusters for three physical rows: the estimate over-counts and
        // nothing corrects it.
        let rows = cluster_rows(&bubbles, &ScannerConfig::default());
        assert_eq!(rows.len(), 6);
        assert!(rows.iter().all(|row| row.len() == 2));
    }

    #[test]
    fn row_count_is_capped() {
        let bubbles = sheet(30, 2);
        let rows = cluster_rows(&bubbles, &ScannerConfig::default());
        assert!(rows.len() <= 20);
        assert_eq!(rows.iter().map(Row::len).sum::<usize>(), 60);
    }

    #[test]
    fn keyed_bubbles_follow_row_and_choice_order() {
        let rows = cluster_rows(&sheet(2, 3), &ScannerConfig::default());
        let keys = keyed_bubbles(&rows).map(|(key, _)| key).collect::<Vec<_>>();
        assert_eq!(
            keys,
            vec![
                ChoiceKey::new(0, 0),
                ChoiceKey::new(0, 1),
                ChoiceKey::new(0, 2),
                ChoiceKey::new(1, 0),
                ChoiceKey::new(1, 1),
                ChoiceKey::new(1, 2),
            ]
        );
    }

    #[test]
    fn kmeans_separates_obvious_groups() {
        let labels = kmeans_1d(&[1.0, 50.0, 2.0, 51.0, 3.0], 2);
        assert_eq!(labels[0], labels[2]);
        assert_eq!(labels[0], labels[4]);
        assert_eq!(labels[1], labels[3]);
        assert_ne!(labels[0], labels[1]);
    }

    proptest! {
        #[test]
        fn rows_come_out_top_to_bottom(
            order in Just((0..24).collect::<Vec<usize>>()).prop_shuffle(),
            spacing in 25f32..80.0,
        ) {
            // Eight rows of three bubbles, created in arbitrary order.
            let bubbles = order
                .iter()
                .map(|i| bubble(60.0 + 30.0 * (i % 3) as f32, 50.0 + spacing * (i / 3) as f32))
                .collect::<Vec<_>>();
            let rows = cluster_rows(&bubbles, &ScannerConfig::default());
            prop_assert!(!rows.is_empty());
            for pair in rows.windows(2) {
                prop_assert!(pair[0].mean_y() < pair[1].mean_y());
            }
            for row in &rows {
                for pair in row.bubbles.windows(2) {
                    prop_assert!(pair[0].center_x <= pair[1].center_x);
                }
            }
        }
    }
}
