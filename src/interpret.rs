use std::path::Path;
use std::sync::Arc;

use image::GrayImage;
use log::{info, warn};
use logging_timer::time;
use serde::Serialize;

use crate::bubbles::find_bubble_candidates;
use crate::classifier::{classify_rows, ClassifierError, ClassifierStore, FillStrategy};
use crate::config::ScannerConfig;
use crate::debug::{
    draw_candidates_debug_image_mut, draw_grid_debug_image_mut, draw_rows_debug_image_mut,
    ImageDebugWriter,
};
use crate::grid::find_grid;
use crate::image_utils::{decode_grayscale, normalize};
use crate::rows::cluster_rows;
use crate::scoring::{score, ScoreResult};
use crate::training::{train_from_sheet, TrainingOutcome};
use crate::types::{Answer, AnswerSequence, ChoiceKey, GridRegion, Row};

#[derive(Debug, Clone)]
pub struct InterpretOptions {
    pub debug: bool,
    pub config: ScannerConfig,
    pub classifier: Arc<ClassifierStore>,
}

#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    #[error("unable to read image: {0}")]
    ImageRead(String),
    #[error("no answer grid found")]
    GridNotFound,
    #[error("no bubbles found inside the answer grid")]
    NoBubblesFound,
}

/// Failures of the operations that both detect and train.
#[derive(Debug, thiserror::Error)]
pub enum SheetError {
    #[error(transparent)]
    Detection(#[from] DetectionError),
    #[error("unable to update classifier: {0}")]
    Classifier(#[from] ClassifierError),
}

/// Everything detection learned about one sheet.
#[derive(Debug, Clone)]
pub struct InterpretedSheet {
    /// The binarized image the rows were found in.
    pub normalized: GrayImage,
    pub grid: GridRegion,
    pub rows: Vec<Row>,
    /// The marked bubble of each row that has one.
    pub selections: Vec<ChoiceKey>,
    /// One answer per row, in row order.
    pub answers: AnswerSequence,
}

/// A reference sheet: its grid, reused for every sheet graded against it,
/// and its answers.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerKey {
    pub grid: GridRegion,
    pub answers: AnswerSequence,
    pub training: TrainingOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct GradedSheet {
    pub answers: AnswerSequence,
    pub result: ScoreResult,
    /// Present when the sheet scored well enough to be trained on.
    pub training: Option<TrainingOutcome>,
}

pub fn load_sheet_bytes(bytes: &[u8]) -> Result<GrayImage, DetectionError> {
    decode_grayscale(bytes).map_err(|e| DetectionError::ImageRead(e.to_string()))
}

#[time]
pub fn load_sheet_image(image_path: &Path) -> Result<GrayImage, DetectionError> {
    match image::open(image_path) {
        Ok(img) => Ok(img.into_luma8()),
        Err(e) => Err(DetectionError::ImageRead(format!(
            "{}: {}",
            image_path.display(),
            e
        ))),
    }
}

/// A debug writer for the sheet at `image_path`, enabled when the options
/// ask for debug output.
pub fn debug_writer(image_path: &Path, img: &GrayImage, options: &InterpretOptions) -> ImageDebugWriter {
    if options.debug {
        ImageDebugWriter::new(image_path.to_path_buf(), img.clone())
    } else {
        ImageDebugWriter::disabled()
    }
}

/// Runs the detection pipeline over a grayscale sheet.
///
/// With `grid_hint` the grid is taken as given, as when a sheet is graded
/// against a key whose grid is already known; otherwise it is located.
/// Rows whose bubbles are all rejected by the classifier are reported as
/// [`Answer::no_answer`] so answers stay aligned with rows.
#[time]
pub fn interpret_sheet(
    img: &GrayImage,
    grid_hint: Option<GridRegion>,
    options: &InterpretOptions,
    debug: &ImageDebugWriter,
) -> Result<InterpretedSheet, DetectionError> {
    let config = &options.config;
    let normalized = normalize(img, config);

    let grid = match grid_hint {
        Some(grid) => grid,
        None => find_grid(&normalized, config).ok_or(DetectionError::GridNotFound)?,
    };
    debug.write("grid", |canvas| draw_grid_debug_image_mut(canvas, &grid));

    let candidates = find_bubble_candidates(&normalized, &grid, config);
    debug.write("candidates", |canvas| {
        draw_candidates_debug_image_mut(canvas, &candidates)
    });

    let rows = cluster_rows(&candidates, config);
    if rows.is_empty() {
        warn!(
            "{} bubble candidate(s) inside {:?}; nothing to read",
            candidates.len(),
            grid
        );
        return Err(DetectionError::NoBubblesFound);
    }

    let snapshot = options.classifier.snapshot();
    let strategy = FillStrategy::for_snapshot(&snapshot, config.min_confidence);
    let choices = classify_rows(&normalized, &rows, &strategy);

    let selections = choices
        .iter()
        .enumerate()
        .filter_map(|(row, choice)| choice.map(|choice| ChoiceKey::new(row, choice)))
        .collect::<Vec<_>>();
    let answers = choices
        .iter()
        .map(|choice| choice.map_or_else(Answer::no_answer, Answer::from_choice_index))
        .collect::<AnswerSequence>();

    debug.write("rows", |canvas| {
        draw_rows_debug_image_mut(canvas, &rows, &selections)
    });

    Ok(InterpretedSheet {
        normalized,
        grid,
        rows,
        selections,
        answers,
    })
}

/// Reads the answers marked on an encoded sheet image.
pub fn detect(image_bytes: &[u8], options: &InterpretOptions) -> Result<AnswerSequence, DetectionError> {
    let img = load_sheet_bytes(image_bytes)?;
    Ok(interpret_sheet(&img, None, options, &ImageDebugWriter::disabled())?.answers)
}

/// Reads the answers marked on the sheet image at `image_path`, writing
/// debug images beside it when enabled.
pub fn detect_file(image_path: &Path, options: &InterpretOptions) -> Result<AnswerSequence, DetectionError> {
    let img = load_sheet_image(image_path)?;
    let debug = debug_writer(image_path, &img, options);
    Ok(interpret_sheet(&img, None, options, &debug)?.answers)
}

/// Detects the answers on a reference sheet and always trains the fill
/// classifier on it.
#[time]
pub fn register_answer_key(
    img: &GrayImage,
    options: &InterpretOptions,
    debug: &ImageDebugWriter,
) -> Result<AnswerKey, SheetError> {
    let sheet = interpret_sheet(img, None, options, debug)?;
    let training = train_from_sheet(
        &sheet.normalized,
        &sheet.grid,
        &sheet.answers,
        &options.classifier,
        &options.config,
    )?;
    info!(
        "registered answer key with {} question(s) in {:?}",
        sheet.answers.len(),
        sheet.grid
    );

    Ok(AnswerKey {
        grid: sheet.grid,
        answers: sheet.answers,
        training,
    })
}

/// Detects the answers on a submitted sheet inside the key's grid and scores
/// them. A sheet matching at least `training_score_ratio` of the key is
/// trusted and trained on.
#[time]
pub fn grade_sheet(
    key: &AnswerKey,
    img: &GrayImage,
    options: &InterpretOptions,
    debug: &ImageDebugWriter,
) -> Result<GradedSheet, SheetError> {
    let sheet = interpret_sheet(img, Some(key.grid), options, debug)?;
    let result = score(&key.answers, &sheet.answers);

    let training = if !key.answers.is_empty()
        && result.ratio() >= options.config.training_score_ratio
    {
        Some(train_from_sheet(
            &sheet.normalized,
            &sheet.grid,
            &sheet.answers,
            &options.classifier,
            &options.config,
        )?)
    } else {
        None
    };

    Ok(GradedSheet {
        answers: sheet.answers,
        result,
        training,
    })
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{DynamicImage, ImageOutputFormat, Luma};
    use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
    use imageproc::rect::Rect;

    use super::*;
    use crate::training::SkipReason;

    const PAPER: Luma<u8> = Luma([235]);
    const INK: Luma<u8> = Luma([30]);

    fn options() -> InterpretOptions {
        InterpretOptions {
            debug: false,
            config: ScannerConfig::default(),
            classifier: Arc::new(ClassifierStore::in_memory()),
        }
    }

    /// Options under which no sheet ever has enough samples to train on, so
    /// the heuristic decides every row.
    fn heuristic_options() -> InterpretOptions {
        let mut options = options();
        options.config.min_samples_per_class = 1000;
        options
    }

    fn blank_sheet() -> GrayImage {
        GrayImage::from_pixel(640, 480, PAPER)
    }

    fn draw_grid_box(img: &mut GrayImage) {
        for inset in 0..3 {
            draw_hollow_rect_mut(
                img,
                Rect::at(60 + inset, 40 + inset).of_size(520 - 2 * inset as u32, 400 - 2 * inset as u32),
                INK,
            );
        }
    }

    /// Draws one bubble as a solid ink square centred on `center`. Marked
    /// bubbles are drawn larger, so each normalizes to a single contour
    /// whose area beats every unmarked one in its row.
    fn draw_bubble(img: &mut GrayImage, (x, y): (i32, i32), marked: bool) {
        let side = if marked { 12 } else { 8 };
        draw_filled_rect_mut(img, Rect::at(x - side / 2, y - side / 2).of_size(side as u32, side as u32), INK);
    }

    /// A boxed grid of questions with four choices each, one row per entry
    /// of `marks` giving the filled choice of that question.
    fn sheet(marks: &[usize]) -> GrayImage {
        let mut img = blank_sheet();
        draw_grid_box(&mut img);
        for (row, &mark) in marks.iter().enumerate() {
            for choice in 0..4 {
                let center = (160 + 80 * choice as i32, 100 + 70 * row as i32);
                draw_bubble(&mut img, center, choice == mark);
            }
        }
        img
    }

    fn answers(labels: &[&str]) -> AnswerSequence {
        labels.iter().map(|&label| Answer::from(label)).collect()
    }

    fn png_bytes(img: &GrayImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageLuma8(img.clone())
            .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn undecodable_bytes_are_an_image_read_error() {
        let result = detect(b"definitely not an image", &options());
        assert!(matches!(result, Err(DetectionError::ImageRead(_))), "{:?}", result);
    }

    #[test]
    fn missing_file_is_an_image_read_error() {
        let result = detect_file(Path::new("/nonexistent/sheet.png"), &options());
        assert!(matches!(result, Err(DetectionError::ImageRead(_))), "{:?}", result);
    }

    #[test]
    fn blank_sheet_has_no_grid() {
        let result = detect(&png_bytes(&blank_sheet()), &options());
        assert!(matches!(result, Err(DetectionError::GridNotFound)), "{:?}", result);
    }

    #[test]
    fn empty_grid_has_no_bubbles() {
        let mut img = blank_sheet();
        draw_grid_box(&mut img);
        let result = detect(&png_bytes(&img), &options());
        assert!(matches!(result, Err(DetectionError::NoBubblesFound)), "{:?}", result);
    }

    #[test]
    fn detection_finds_the_grid_and_one_answer_per_row() {
        let img = sheet(&[0, 1, 2, 3, 0]);
        let sheet = interpret_sheet(&img, None, &options(), &ImageDebugWriter::disabled()).unwrap();

        assert!((sheet.grid.x as i32 - 60).abs() <= 3, "{:?}", sheet.grid);
        assert!((sheet.grid.y as i32 - 40).abs() <= 3, "{:?}", sheet.grid);
        assert_eq!(sheet.rows.len(), 5);
        assert!(sheet.rows.iter().all(|row| row.len() == 4), "{:?}", sheet.rows);
        assert_eq!(sheet.answers, answers(&["A", "B", "C", "D", "A"]));
        for pair in sheet.rows.windows(2) {
            assert!(pair[0].mean_y() < pair[1].mean_y());
        }
        for key in &sheet.selections {
            assert_eq!(sheet.answers[key.row], key.answer());
        }
    }

    #[test]
    fn detection_is_idempotent() {
        let bytes = png_bytes(&sheet(&[1, 1, 3, 0, 2]));
        let options = options();
        let first = detect(&bytes, &options).unwrap();
        let second = detect(&bytes, &options).unwrap();
        assert_eq!(first, answers(&["B", "B", "D", "A", "C"]));
        assert_eq!(first, second);
    }

    #[test]
    fn key_graded_against_itself_scores_full_marks() {
        let options = heuristic_options();
        let img = sheet(&[2, 0, 3, 1, 1]);

        let key = register_answer_key(&img, &options, &ImageDebugWriter::disabled()).unwrap();
        assert_eq!(key.answers, answers(&["C", "A", "D", "B", "B"]));
        assert!(matches!(
            key.training,
            TrainingOutcome::Skipped(SkipReason::TooFewPositives { .. })
        ));

        let graded = grade_sheet(&key, &img, &options, &ImageDebugWriter::disabled()).unwrap();
        assert_eq!(graded.answers, key.answers);
        assert_eq!(graded.result.score, 5);
        assert_eq!(graded.result.total, 5);
        // A perfect sheet is trusted, though here it is too small to train on.
        assert!(graded.training.is_some());
        assert!(!options.classifier.is_trained());
    }

    #[test]
    fn poorly_scoring_sheet_is_not_trained_on() {
        let options = heuristic_options();
        let img = sheet(&[2, 0, 3, 1, 1]);
        let detected = interpret_sheet(&img, None, &options, &ImageDebugWriter::disabled()).unwrap();

        let key = AnswerKey {
            grid: detected.grid,
            answers: vec![Answer::no_answer(); detected.answers.len()],
            training: TrainingOutcome::Skipped(SkipReason::TooFewSamples {
                count: 0,
                required: 10,
            }),
        };
        let graded = grade_sheet(&key, &img, &options, &ImageDebugWriter::disabled()).unwrap();
        assert_eq!(graded.result.score, 0);
        assert_eq!(graded.result.details.len(), detected.answers.len());
        assert!(graded.training.is_none());
    }

    #[test]
    fn grid_hint_skips_grid_location() {
        // No box is drawn, so only the hint can provide a grid.
        let mut img = blank_sheet();
        for choice in 0..4 {
            draw_bubble(&mut img, (160 + 80 * choice, 200), choice == 2);
        }
        let options = options();
        assert!(matches!(
            interpret_sheet(&img, None, &options, &ImageDebugWriter::disabled()),
            Err(DetectionError::GridNotFound)
        ));

        let hint = GridRegion { x: 60, y: 40, width: 520, height: 400 };
        let sheet = interpret_sheet(&img, Some(hint), &options, &ImageDebugWriter::disabled()).unwrap();
        assert_eq!(sheet.grid, hint);
        assert_eq!(sheet.answers, answers(&["C"]));
    }

    #[test]
    fn debug_images_are_written_beside_the_sheet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.png");
        let img = sheet(&[0, 1, 2, 3, 0]);
        img.save(&path).unwrap();

        let mut options = options();
        options.debug = true;
        detect_file(&path, &options).unwrap();

        for label in ["grid", "candidates", "rows"] {
            assert!(dir.path().join(format!("scan_debug_{}.png", label)).exists(), "{}", label);
        }
    }
}
