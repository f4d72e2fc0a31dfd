use crate::config::AreaConfig;
use crate::error::RoomError;

pub type Point = [f64; 3];

/// Spatial extent of an area: a reference point used for triangulation and
/// an inclusive axis-aligned box used for containment.
#[derive(Debug, Clone, PartialEq)]
pub struct AreaGeometry {
    point: Point,
    min: Point,
    max: Point,
}

impl AreaGeometry {
    /// Corners may be given in any order.
    pub fn new(point: Point, a: Point, b: Point) -> Self {
        let mut min = [0.0; 3];
        let mut max = [0.0; 3];
        for i in 0..3 {
            min[i] = a[i].min(b[i]);
            max[i] = a[i].max(b[i]);
        }
        AreaGeometry { point, min, max }
    }

    pub fn from_config(area: &AreaConfig) -> Result<Option<Self>, RoomError> {
        let point = area
            .point
            .as_deref()
            .map(|p| triple(&area.id, "point", p))
            .transpose()?;

        let bounds = match area.bounds.as_deref() {
            Some([a, b]) => Some((triple(&area.id, "bounds", a)?, triple(&area.id, "bounds", b)?)),
            Some(other) => {
                return Err(RoomError::Configuration(format!(
                    "area {}: bounds needs exactly two corners, got {}",
                    area.id,
                    other.len()
                )));
            }
            None => None,
        };

        Ok(match (point, bounds) {
            (Some(p), Some((a, b))) => Some(AreaGeometry::new(p, a, b)),
            (None, Some((a, b))) => Some(AreaGeometry::new(centre(a, b), a, b)),
            (Some(p), None) => Some(AreaGeometry::new(p, p, p)),
            (None, None) => None,
        })
    }

    pub fn point(&self) -> Point {
        self.point
    }

    pub fn contains(&self, p: Point) -> bool {
        (0..3).all(|i| self.min[i] <= p[i] && p[i] <= self.max[i])
    }
}

/// Point on the segment from `a` to `b` at fraction `ratio` of its length.
pub fn lerp(a: Point, b: Point, ratio: f64) -> Point {
    [
        a[0] + (b[0] - a[0]) * ratio,
        a[1] + (b[1] - a[1]) * ratio,
        a[2] + (b[2] - a[2]) * ratio,
    ]
}

fn centre(a: Point, b: Point) -> Point {
    lerp(a, b, 0.5)
}

fn triple(area_id: &str, field: &str, values: &[f64]) -> Result<Point, RoomError> {
    match values {
        [x, y, z] if x.is_finite() && y.is_finite() && z.is_finite() => Ok([*x, *y, *z]),
        _ => Err(RoomError::Configuration(format!(
            "area {area_id}: {field} must be three finite numbers, got {values:?}"
        ))),
    }
}
