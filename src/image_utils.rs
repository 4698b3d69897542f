use image::{GrayImage, ImageResult, Luma, Rgb};
use imageproc::filter::{box_filter, gaussian_blur_f32};
use imageproc::rect::Rect;
use log::debug;
use logging_timer::time;

use crate::config::ScannerConfig;

pub const WHITE: Luma<u8> = Luma([u8::MAX]);
pub const BLACK: Luma<u8> = Luma([u8::MIN]);

pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
pub const PINK: Rgb<u8> = Rgb([255, 0, 255]);
pub const DARK_GREEN: Rgb<u8> = Rgb([0, 127, 0]);

pub const RAINBOW: [Rgb<u8>; 6] = [
    Rgb([255, 0, 0]),
    Rgb([255, 127, 0]),
    Rgb([200, 200, 0]),
    Rgb([0, 255, 0]),
    Rgb([0, 0, 255]),
    Rgb([139, 0, 255]),
];

/// Decodes an encoded image (PNG, JPEG, ...) into a single intensity
/// channel.
#[time]
pub fn decode_grayscale(bytes: &[u8]) -> ImageResult<GrayImage> {
    Ok(image::load_from_memory(bytes)?.into_luma8())
}

/// Smooths the image and binarizes it against a local-mean threshold.
///
/// A pixel becomes foreground (`WHITE`) when it is no brighter than the mean
/// of its `(2r + 1)²` neighbourhood minus `threshold_offset`; everything else
/// becomes background (`BLACK`). Ink and grid lines therefore come out
/// white regardless of how unevenly the sheet was lit.
///
/// ```text
///      GRAYSCALE               BINARY
/// ┌────────────────┐   ┌────────────────┐
/// │░░░░░░▒▒▒▒▒▒▓▓▓▓│   │                │
/// │░░( )░▒(●)▒▒▓▓▓▓│   │  ( )   (█)     │
/// │░░░░░░▒▒▒▒▒▒▓▓▓▓│   │                │
/// └────────────────┘   └────────────────┘
/// ```
#[time]
pub fn normalize(img: &GrayImage, config: &ScannerConfig) -> GrayImage {
    let blurred = if config.blur_sigma > 0.0 {
        gaussian_blur_f32(img, config.blur_sigma)
    } else {
        img.clone()
    };
    let radius = config.threshold_block_radius;
    let local_mean = box_filter(&blurred, radius, radius);

    let mut out = GrayImage::new(img.width(), img.height());
    for (x, y, pixel) in blurred.enumerate_pixels() {
        let threshold = local_mean.get_pixel(x, y).0[0] as i32 - config.threshold_offset;
        let value = if (pixel.0[0] as i32) <= threshold {
            WHITE
        } else {
            BLACK
        };
        out.put_pixel(x, y, value);
    }
    debug!(
        "{} of {} pixel(s) are foreground",
        count_pixels(&out, &WHITE),
        out.width() * out.height()
    );
    out
}

/// Copies the part of `img` covered by `rect`, clipped to the image bounds.
/// Returns `None` if the rect lies entirely outside the image.
pub fn crop_to_rect(img: &GrayImage, rect: &Rect) -> Option<GrayImage> {
    let left = rect.left().max(0);
    let top = rect.top().max(0);
    let right = rect.right().min(img.width() as i32 - 1);
    let bottom = rect.bottom().min(img.height() as i32 - 1);
    if left > right || top > bottom {
        return None;
    }
    Some(
        image::imageops::crop_imm(
            img,
            left as u32,
            top as u32,
            (right - left + 1) as u32,
            (bottom - top + 1) as u32,
        )
        .to_image(),
    )
}

/// Determines the number of pixels in an image that match the given luma.
pub fn count_pixels(img: &GrayImage, luma: &Luma<u8>) -> u32 {
    img.pixels().filter(|p| *p == luma).count() as u32
}
