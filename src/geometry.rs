//! # Sample points, grid cells and the regular grid partitioner
//!
//! The area of interest (AOI) is split into rectangular [`Cell`]s, each processed by one
//! independent cell task. Cells are immutable once produced; their `index` is the key of the
//! cell's checkpoint.
//!
//! Shapes are `geo-types` values in EPSG:4326 (`x` is longitude, `y` latitude). On the wire
//! they keep the flat `{min_lon, min_lat, max_lon, max_lat}` and `{point_id, lon, lat}`
//! layouts.
//!
//! ## Ownership rule
//!
//! [`Cell::contains`] uses half-open intervals `[min, max)` on both axes, so on a regular grid
//! every point falls in exactly one cell. The result aggregator relies on this: a `point_id`
//! reported by two cells is a data-integrity error.
//!
//! ## Partitioning
//!
//! [`RegularGrid`] lays `floor(extent / size) + 1` columns and rows from the AOI's lower-left
//! corner, enumerates them column by column, and keeps the cells intersecting the AOI. The
//! output is fully determined by `(aoi, cell_width, cell_height)`, so cell indices are stable
//! across runs with the same grid size.
use geo::BoundingRect;
use geo_types::{coord, Point, Polygon, Rect};
use serde::{Deserialize, Serialize};

use crate::constants::{CellIndex, Degree, PointId};
use crate::landwatch_errors::LandwatchError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct BoundsWire {
    min_lon: Degree,
    min_lat: Degree,
    max_lon: Degree,
    max_lat: Degree,
}

/// Non-degenerate lon/lat rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BoundsWire", into = "BoundsWire")]
pub struct BoundingBox(Rect<Degree>);

impl BoundingBox {
    pub fn new(
        min_lon: Degree,
        min_lat: Degree,
        max_lon: Degree,
        max_lat: Degree,
    ) -> Result<Self, LandwatchError> {
        let finite = [min_lon, min_lat, max_lon, max_lat]
            .iter()
            .all(|v| v.is_finite());
        if !finite || min_lon >= max_lon || min_lat >= max_lat {
            return Err(LandwatchError::InvalidConfig(format!(
                "degenerate bounding box [{min_lon}, {min_lat}, {max_lon}, {max_lat}]"
            )));
        }
        Ok(BoundingBox(Rect::new(
            coord! { x: min_lon, y: min_lat },
            coord! { x: max_lon, y: max_lat },
        )))
    }

    /// Bounding rectangle of an AOI polygon.
    pub fn from_polygon(aoi: &Polygon<Degree>) -> Result<Self, LandwatchError> {
        let rect = aoi
            .bounding_rect()
            .ok_or_else(|| LandwatchError::InvalidConfig("empty AOI polygon".into()))?;
        Self::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
    }

    pub fn rect(&self) -> &Rect<Degree> {
        &self.0
    }

    pub fn min_lon(&self) -> Degree {
        self.0.min().x
    }

    pub fn min_lat(&self) -> Degree {
        self.0.min().y
    }

    pub fn max_lon(&self) -> Degree {
        self.0.max().x
    }

    pub fn max_lat(&self) -> Degree {
        self.0.max().y
    }

    pub fn width(&self) -> Degree {
        self.0.width()
    }

    pub fn height(&self) -> Degree {
        self.0.height()
    }

    /// Strict overlap (touching edges do not count).
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        let (a, b) = (&self.0, &other.0);
        a.min().x < b.max().x
            && b.min().x < a.max().x
            && a.min().y < b.max().y
            && b.min().y < a.max().y
    }

    pub fn to_polygon(&self) -> Polygon<Degree> {
        self.0.to_polygon()
    }
}

impl TryFrom<BoundsWire> for BoundingBox {
    type Error = LandwatchError;

    fn try_from(w: BoundsWire) -> Result<Self, Self::Error> {
        BoundingBox::new(w.min_lon, w.min_lat, w.max_lon, w.max_lat)
    }
}

impl From<BoundingBox> for BoundsWire {
    fn from(b: BoundingBox) -> Self {
        BoundsWire {
            min_lon: b.min_lon(),
            min_lat: b.min_lat(),
            max_lon: b.max_lon(),
            max_lat: b.max_lat(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct PointWire {
    point_id: PointId,
    lon: Degree,
    lat: Degree,
}

/// A sample point of the monitoring design.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "PointWire", into = "PointWire")]
pub struct SamplePoint {
    pub point_id: PointId,
    pub location: Point<Degree>,
}

impl SamplePoint {
    pub fn new(point_id: PointId, lon: Degree, lat: Degree) -> Self {
        SamplePoint {
            point_id,
            location: Point::new(lon, lat),
        }
    }

    pub fn lon(&self) -> Degree {
        self.location.x()
    }

    pub fn lat(&self) -> Degree {
        self.location.y()
    }
}

impl From<PointWire> for SamplePoint {
    fn from(w: PointWire) -> Self {
        SamplePoint::new(w.point_id, w.lon, w.lat)
    }
}

impl From<SamplePoint> for PointWire {
    fn from(p: SamplePoint) -> Self {
        PointWire {
            point_id: p.point_id,
            lon: p.lon(),
            lat: p.lat(),
        }
    }
}

/// One rectangular partition of the AOI processing grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub index: CellIndex,
    pub bounds: BoundingBox,
}

impl Cell {
    /// Half-open ownership test, `[min, max)` on both axes.
    pub fn contains(&self, point: &SamplePoint) -> bool {
        let (min, max) = (self.bounds.rect().min(), self.bounds.rect().max());
        let (x, y) = point.location.x_y();
        x >= min.x && x < max.x && y >= min.y && y < max.y
    }
}

/// Produces the ordered list of processing cells for an AOI.
pub trait GridPartitioner {
    fn partition(
        &self,
        aoi: &BoundingBox,
        cell_width: Degree,
        cell_height: Degree,
    ) -> Result<Vec<Cell>, LandwatchError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RegularGrid;

impl GridPartitioner for RegularGrid {
    fn partition(
        &self,
        aoi: &BoundingBox,
        cell_width: Degree,
        cell_height: Degree,
    ) -> Result<Vec<Cell>, LandwatchError> {
        if !(cell_width > 0.0 && cell_height > 0.0) {
            return Err(LandwatchError::InvalidConfig(
                "cell width and height must be > 0".into(),
            ));
        }

        let columns = (aoi.width() / cell_width).floor() as usize;
        let rows = (aoi.height() / cell_height).floor() as usize;

        let mut cells = Vec::with_capacity((columns + 1) * (rows + 1));
        for column in 0..=columns {
            let x = aoi.min_lon() + column as f64 * cell_width;
            for row in 0..=rows {
                let y = aoi.min_lat() + row as f64 * cell_height;
                let bounds = BoundingBox::new(x, y, x + cell_width, y + cell_height)?;
                if bounds.intersects(aoi) {
                    cells.push(Cell {
                        index: cells.len(),
                        bounds,
                    });
                }
            }
        }
        Ok(cells)
    }
}
