use image::GrayImage;
use imageproc::contours::find_contours;
use log::{debug, warn};
use logging_timer::time;

use crate::config::ScannerConfig;
use crate::geometry::{get_contour_bounding_rect, polygon_area};
use crate::image_utils::crop_to_rect;
use crate::types::{BubbleCandidate, GridRegion};

/// Determines whether a shape could be a bubble based on its proportions and
/// size. The area bounds are exclusive, the aspect bounds inclusive.
pub fn could_be_bubble(
    config: &ScannerConfig,
    width: u32,
    height: u32,
    area: f32,
    region_area: f32,
) -> bool {
    if height == 0 {
        return false;
    }
    let aspect_ratio = width as f32 / height as f32;
    let max_area = region_area * config.bubble_max_area_ratio;
    aspect_ratio >= config.bubble_min_aspect_ratio
        && aspect_ratio <= config.bubble_max_aspect_ratio
        && area > config.bubble_min_area
        && area < max_area
}

/// Finds bubble-shaped regions inside the grid region of a binarized image.
///
/// Every contour is considered, nested ones included: the interior of an
/// unmarked bubble is a hole inside its ink ring. Candidate coordinates are
/// reported in full-image pixels. An empty result means nothing on the
/// sheet looked like a bubble; it is not an error.
#[time]
pub fn find_bubble_candidates(
    img: &GrayImage,
    grid: &GridRegion,
    config: &ScannerConfig,
) -> Vec<BubbleCandidate> {
    let Some(grid) = grid.clamp_to(img.dimensions()) else {
        warn!("grid region {:?} lies outside the image", grid);
        return vec![];
    };
    let Some(region) = crop_to_rect(img, &grid.to_rect()) else {
        return vec![];
    };
    let region_area = grid.area() as f32;

    let candidates = find_contours::<i32>(&region)
        .iter()
        .filter_map(|contour| {
            let bounds = get_contour_bounding_rect(contour);
            let area = polygon_area(&contour.points);
            if !could_be_bubble(config, bounds.width(), bounds.height(), area, region_area) {
                return None;
            }
            Some(BubbleCandidate {
                center_x: grid.x as f32 + bounds.left() as f32 + (bounds.width() / 2) as f32,
                center_y: grid.y as f32 + bounds.top() as f32 + (bounds.height() / 2) as f32,
                area,
                width: bounds.width(),
                height: bounds.height(),
            })
        })
        .collect::<Vec<_>>();

    debug!("found {} bubble candidate(s) in {:?}", candidates.len(), grid);
    candidates
}
