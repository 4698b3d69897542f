use std::path::{Path, PathBuf};

use image::{DynamicImage, GrayImage, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_hollow_circle_mut, draw_hollow_rect_mut,
};
use imageproc::rect::Rect;
use log::{debug, warn};

use crate::image_utils::{DARK_GREEN, GREEN, PINK, RAINBOW};
use crate::rows::keyed_bubbles;
use crate::types::{BubbleCandidate, ChoiceKey, GridRegion, Row};

/// Creates a path for a debug image.
pub fn debug_image_path(base: &Path, label: &str) -> PathBuf {
    let mut result = PathBuf::from(base);
    result.set_file_name(format!(
        "{}_debug_{}.png",
        base.file_stem().unwrap_or_default().to_string_lossy(),
        label
    ));
    result
}

/// Writes annotated copies of a sheet next to its source file. A disabled
/// writer never calls its drawing callbacks.
#[derive(Debug)]
pub struct ImageDebugWriter {
    target: Option<(PathBuf, GrayImage)>,
}

impl ImageDebugWriter {
    pub fn new(base: PathBuf, image: GrayImage) -> Self {
        Self {
            target: Some((base, image)),
        }
    }

    pub fn disabled() -> Self {
        Self { target: None }
    }

    /// Draws on a colour copy of the sheet and saves it as
    /// `<stem>_debug_<label>.png`. Failing to save is logged, not returned.
    pub fn write(&self, label: &str, draw: impl FnOnce(&mut RgbImage)) -> Option<PathBuf> {
        let (base, image) = self.target.as_ref()?;
        let mut canvas = DynamicImage::ImageLuma8(image.clone()).into_rgb8();
        draw(&mut canvas);

        let path = debug_image_path(base, label);
        match canvas.save(&path) {
            Ok(()) => {
                debug!("wrote debug image {}", path.display());
                Some(path)
            }
            Err(e) => {
                warn!("unable to write debug image {}: {}", path.display(), e);
                None
            }
        }
    }
}

/// Outlines the answer grid.
pub fn draw_grid_debug_image_mut(canvas: &mut RgbImage, grid: &GridRegion) {
    let rect = grid.to_rect();
    draw_hollow_rect_mut(canvas, rect, GREEN);
    if rect.width() > 2 && rect.height() > 2 {
        draw_hollow_rect_mut(
            canvas,
            Rect::at(rect.left() + 1, rect.top() + 1).of_size(rect.width() - 2, rect.height() - 2),
            GREEN,
        );
    }
}

/// Draws the bounding box of every bubble candidate.
pub fn draw_candidates_debug_image_mut(canvas: &mut RgbImage, candidates: &[BubbleCandidate]) {
    for (i, candidate) in candidates.iter().enumerate() {
        draw_hollow_rect_mut(canvas, candidate.bounds(), RAINBOW[i % RAINBOW.len()]);
    }
}

/// Circles each row's bubbles in a per-row colour and fills in the selected
/// ones.
pub fn draw_rows_debug_image_mut(canvas: &mut RgbImage, rows: &[Row], selections: &[ChoiceKey]) {
    for (key, bubble) in keyed_bubbles(rows) {
        let radius = (bubble.width.max(bubble.height) as i32 + 1) / 2 + 2;
        draw_hollow_circle_mut(canvas, center(bubble), radius, RAINBOW[key.row % RAINBOW.len()]);
    }

    for key in selections {
        let Some(bubble) = rows.get(key.row).and_then(|row| row.bubbles.get(key.choice)) else {
            continue;
        };
        let radius = (bubble.width.min(bubble.height) as i32 / 3).max(2);
        draw_filled_circle_mut(canvas, center(bubble), radius, PINK);
        draw_hollow_circle_mut(canvas, center(bubble), radius + 1, DARK_GREEN);
    }
}

fn center(bubble: &BubbleCandidate) -> (i32, i32) {
    (bubble.center_x.round() as i32, bubble.center_y.round() as i32)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::image_utils::WHITE;

    #[test]
    fn debug_path_sits_next_to_the_source() {
        assert_eq!(
            debug_image_path(Path::new("/scans/sheet-01.jpeg"), "grid"),
            PathBuf::from("/scans/sheet-01_debug_grid.png")
        );
    }

    #[test]
    fn disabled_writer_never_draws() {
        let called = Cell::new(false);
        let written = ImageDebugWriter::disabled().write("grid", |_| called.set(true));
        assert_eq!(written, None);
        assert!(!called.get());
    }

    #[test]
    fn enabled_writer_saves_a_png() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("sheet.png");
        let writer = ImageDebugWriter::new(base, GrayImage::from_pixel(60, 40, WHITE));

        let grid = GridRegion { x: 5, y: 5, width: 50, height: 30 };
        let path = writer
            .write("grid", |canvas| draw_grid_debug_image_mut(canvas, &grid))
            .expect("debug image is written");

        assert_eq!(path, dir.path().join("sheet_debug_grid.png"));
        let saved = image::open(&path).unwrap().into_rgb8();
        assert_eq!(saved.dimensions(), (60, 40));
        assert_eq!(*saved.get_pixel(5, 5), GREEN);
    }

    #[test]
    fn selections_outside_the_rows_are_skipped() {
        let mut canvas = RgbImage::new(50, 50);
        let rows = vec![Row {
            bubbles: vec![BubbleCandidate {
                center_x: 20.0,
                center_y: 20.0,
                area: 100.0,
                width: 10,
                height: 10,
            }],
        }];
        draw_rows_debug_image_mut(&mut canvas, &rows, &[ChoiceKey::new(0, 0), ChoiceKey::new(3, 1)]);
        assert_eq!(*canvas.get_pixel(20, 20), PINK);
    }
}
