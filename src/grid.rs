use image::GrayImage;
use imageproc::contours::{find_contours, BorderType};
use log::{debug, warn};
use logging_timer::time;

use crate::config::ScannerConfig;
use crate::geometry::{approximate_quadrilateral, get_points_bounding_rect};
use crate::types::GridRegion;

/// Finds the rectangles formed by the outermost foreground borders of a
/// binarized image, keeping those large enough to be an answer grid.
/// Rectangles are returned in contour discovery order.
#[time]
pub fn find_grid_candidates(img: &GrayImage, config: &ScannerConfig) -> Vec<GridRegion> {
    let image_area = img.width() as f64 * img.height() as f64;
    let min_area = image_area * config.grid_min_area_ratio;

    find_contours::<i32>(img)
        .iter()
        .filter(|contour| contour.border_type == BorderType::Outer && contour.parent.is_none())
        .filter_map(|contour| {
            let corners = approximate_quadrilateral(contour, config.polygon_epsilon_ratio)?;
            let bounds = get_points_bounding_rect(&corners);
            let area = bounds.width() as f64 * bounds.height() as f64;
            if area < min_area {
                return None;
            }
            Some(GridRegion {
                x: bounds.left().max(0) as u32,
                y: bounds.top().max(0) as u32,
                width: bounds.width(),
                height: bounds.height(),
            })
        })
        .collect()
}

/// Locates the answer grid: the largest qualifying rectangle. When two share
/// the largest area the first one found wins; which one that is carries no
/// meaning.
#[time]
pub fn find_grid(img: &GrayImage, config: &ScannerConfig) -> Option<GridRegion> {
    let candidates = find_grid_candidates(img, config);
    debug!("found {} grid candidate(s)", candidates.len());

    let grid = largest_region(&candidates);
    if grid.is_none() {
        warn!("no rectangle covering at least {:.1}% of the image", config.grid_min_area_ratio * 100.0);
    }
    grid
}

pub fn largest_region(regions: &[GridRegion]) -> Option<GridRegion> {
    let mut best: Option<GridRegion> = None;
    for region in regions {
        match best {
            Some(current) if region.area() <= current.area() => {}
            _ => best = Some(*region),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut};
    use imageproc::rect::Rect;

    use super::*;
    use crate::image_utils::{normalize, BLACK, WHITE};

    fn draw_box(img: &mut GrayImage, left: i32, top: i32, width: u32, height: u32) {
        for inset in 0..3 {
            draw_hollow_rect_mut(
                img,
                Rect::at(left + inset, top + inset).of_size(width - 2 * inset as u32, height - 2 * inset as u32),
                BLACK,
            );
        }
    }

    #[test]
    fn picks_the_largest_rectangle() {
        let mut img = GrayImage::from_pixel(400, 300, WHITE);
        draw_box(&mut img, 20, 20, 120, 80);
        draw_box(&mut img, 160, 40, 220, 240);
        let binary = normalize(&img, &ScannerConfig::default());

        let grid = find_grid(&binary, &ScannerConfig::default()).expect("grid is found");
        assert!((grid.x as i32 - 160).abs() <= 2, "{:?}", grid);
        assert!((grid.y as i32 - 40).abs() <= 2, "{:?}", grid);
        assert!((grid.width as i32 - 220).abs() <= 4, "{:?}", grid);
        assert!((grid.height as i32 - 240).abs() <= 4, "{:?}", grid);
    }

    #[test]
    fn rectangles_below_the_area_floor_are_ignored() {
        let mut img = GrayImage::from_pixel(400, 300, WHITE);
        // 15x15 = 225 px², well under 1% of 120000 px².
        draw_box(&mut img, 50, 50, 15, 15);
        let binary = normalize(&img, &ScannerConfig::default());
        assert_eq!(find_grid(&binary, &ScannerConfig::default()), None);
    }

    #[test]
    fn blobs_that_are_not_rectangles_are_ignored() {
        let mut img = GrayImage::from_pixel(300, 300, WHITE);
        draw_filled_circle_mut(&mut img, (150, 150), 80, BLACK);
        let binary = normalize(&img, &ScannerConfig::default());
        assert_eq!(find_grid(&binary, &ScannerConfig::default()), None);
    }

    #[test]
    fn blank_image_has_no_grid() {
        let img = GrayImage::from_pixel(100, 100, BLACK);
        assert_eq!(find_grid(&img, &ScannerConfig::default()), None);
    }

    #[test]
    fn equal_areas_keep_the_first() {
        let a = GridRegion { x: 0, y: 0, width: 10, height: 10 };
        let b = GridRegion { x: 50, y: 50, width: 10, height: 10 };
        let c = GridRegion { x: 5, y: 5, width: 2, height: 2 };
        assert_eq!(largest_region(&[c, a, b]), Some(a));
        assert_eq!(largest_region(&[]), None);
    }
}
