use imageproc::contours::Contour;
use imageproc::geometry::{approximate_polygon_dp, arc_length};
use imageproc::point::Point;
use imageproc::rect::Rect;

/// Gets the smallest rect containing every point of the contour. Both edges
/// are inclusive, so a single-pixel contour yields a 1x1 rect.
pub fn get_contour_bounding_rect(contour: &Contour<i32>) -> Rect {
    get_points_bounding_rect(&contour.points)
}

pub fn get_points_bounding_rect(points: &[Point<i32>]) -> Rect {
    let Some(first) = points.first() else {
        return Rect::at(0, 0).of_size(1, 1);
    };
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in points {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    Rect::at(min_x, min_y).of_size((max_x - min_x + 1) as u32, (max_y - min_y + 1) as u32)
}

/// Area enclosed by a closed polygon, using the shoelace formula. The
/// contour's pixel chain is treated as the polygon outline.
pub fn polygon_area(points: &[Point<i32>]) -> f32 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice_area: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64)
        .sum();
    (twice_area.abs() as f32) / 2.0
}

/// Approximates the contour with a polygon whose tolerance is
/// `epsilon_ratio` of the contour perimeter, returning the vertices only if
/// exactly four remain.
pub fn approximate_quadrilateral(
    contour: &Contour<i32>,
    epsilon_ratio: f64,
) -> Option<Vec<Point<i32>>> {
    if contour.points.len() < 4 {
        return None;
    }
    let perimeter = arc_length(&contour.points, true);
    let approx = approximate_polygon_dp(&contour.points, epsilon_ratio * perimeter, true);
    if approx.len() == 4 {
        Some(approx)
    } else {
        None
    }
}
