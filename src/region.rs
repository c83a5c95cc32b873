//! Polygon set algebra over lon/lat regions.
//!
//! A [`Region`] is a possibly multi-part polygon in WGS-84 lon/lat,
//! restricted to the map rectangle (-179.9..179.9, -60..85). Set operations
//! delegate to the `geo` crate's `BooleanOps`; every result is re-validated
//! and repaired, since seam surgery in disk construction can hand us rings
//! that touch themselves.

use geo::{coord, Area, BooleanOps, Contains, Intersects, MultiPolygon, Point, Rect, Validation};

/// Western edge of the map rectangle (degrees).
pub const MAP_WEST: f64 = -179.9;
/// Eastern edge of the map rectangle (degrees).
pub const MAP_EAST: f64 = 179.9;
/// Southern edge of the map rectangle (degrees).
pub const MAP_SOUTH: f64 = -60.0;
/// Northern edge of the map rectangle (degrees).
pub const MAP_NORTH: f64 = 85.0;

/// Two regions are "almost equal" when corresponding vertices agree to
/// 0.01 degrees (about a kilometer at the equator).
pub const ALMOST_EQUAL_TOL_DEG: f64 = 0.01;

/// A closed region on the map: empty, or a finite-area union of polygons.
#[derive(Clone, Debug)]
pub struct Region {
    shape: MultiPolygon<f64>,
}

impl Region {
    /// The empty region.
    pub fn empty() -> Self {
        Region {
            shape: MultiPolygon::new(Vec::new()),
        }
    }

    /// Wrap a raw multi-polygon, repairing it if it is not valid.
    pub fn new(shape: MultiPolygon<f64>) -> Self {
        Region {
            shape: validated(shape),
        }
    }

    /// The whole map rectangle.
    pub fn map_rect() -> Self {
        let rect = Rect::new(
            coord! { x: MAP_WEST, y: MAP_SOUTH },
            coord! { x: MAP_EAST, y: MAP_NORTH },
        );
        Region {
            shape: MultiPolygon::new(vec![rect.to_polygon()]),
        }
    }

    pub fn shape(&self) -> &MultiPolygon<f64> {
        &self.shape
    }

    pub fn into_shape(self) -> MultiPolygon<f64> {
        self.shape
    }

    pub fn is_empty(&self) -> bool {
        self.shape.0.is_empty() || self.area() == 0.0
    }

    /// Planar area in square degrees. Only meaningful for tie-breaking, so
    /// no equal-area projection is applied.
    pub fn area(&self) -> f64 {
        self.shape.unsigned_area()
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        self.shape.contains(&Point::new(lon, lat))
    }

    pub fn intersects(&self, other: &Region) -> bool {
        self.shape.intersects(&other.shape)
    }

    pub fn intersection(&self, other: &Region) -> Region {
        Region {
            shape: validated(self.shape.intersection(&other.shape)),
        }
    }

    pub fn difference(&self, other: &Region) -> Region {
        Region {
            shape: validated(self.shape.difference(&other.shape)),
        }
    }

    pub fn union(&self, other: &Region) -> Region {
        Region {
            shape: validated(self.shape.union(&other.shape)),
        }
    }

    /// Rebuild the region's topology, fixing self-intersections and
    /// degenerate rings.
    pub fn repair(self) -> Region {
        Region {
            shape: repair_shape(self.shape),
        }
    }

    /// Vertex-wise comparison to [`ALMOST_EQUAL_TOL_DEG`]. An almost-equal
    /// pair of constraint disks contributes no additional constraint.
    pub fn almost_equal(&self, other: &Region) -> bool {
        let a = &self.shape.0;
        let b = &other.shape.0;
        if a.len() != b.len() {
            return false;
        }
        a.iter().zip(b.iter()).all(|(pa, pb)| {
            let ra = std::iter::once(pa.exterior()).chain(pa.interiors().iter());
            let rb = std::iter::once(pb.exterior()).chain(pb.interiors().iter());
            pa.interiors().len() == pb.interiors().len()
                && ra.zip(rb).all(|(la, lb)| {
                    la.0.len() == lb.0.len()
                        && la.0.iter().zip(lb.0.iter()).all(|(ca, cb)| {
                            (ca.x - cb.x).abs() <= ALMOST_EQUAL_TOL_DEG
                                && (ca.y - cb.y).abs() <= ALMOST_EQUAL_TOL_DEG
                        })
                })
        })
    }
}

/// Union with the empty set rebuilds topology and drops degeneracies.
fn repair_shape(shape: MultiPolygon<f64>) -> MultiPolygon<f64> {
    shape.union(&MultiPolygon::new(Vec::new()))
}

fn validated(shape: MultiPolygon<f64>) -> MultiPolygon<f64> {
    if shape.is_valid() {
        shape
    } else {
        repair_shape(shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geo::{LineString, Polygon};

    fn rect(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Region {
        let r = Rect::new(
            coord! { x: min_lon, y: min_lat },
            coord! { x: max_lon, y: max_lat },
        );
        Region::new(MultiPolygon::new(vec![r.to_polygon()]))
    }

    #[test]
    fn test_empty_region() {
        let e = Region::empty();
        assert!(e.is_empty());
        assert_relative_eq!(e.area(), 0.0);
        assert!(!e.contains(0.0, 0.0));
    }

    #[test]
    fn test_map_rect_area_and_bounds() {
        let m = Region::map_rect();
        assert!(!m.is_empty());
        assert_relative_eq!(
            m.area(),
            (MAP_EAST - MAP_WEST) * (MAP_NORTH - MAP_SOUTH),
            epsilon = 1e-9
        );
        assert!(m.contains(0.0, 0.0));
        assert!(!m.contains(0.0, 89.0));
    }

    #[test]
    fn test_intersection_of_overlapping_rects() {
        let a = rect(0.0, 0.0, 10.0, 10.0);
        let b = rect(5.0, 5.0, 15.0, 15.0);
        let i = a.intersection(&b);
        assert!(!i.is_empty());
        assert_relative_eq!(i.area(), 25.0, epsilon = 1e-9);
        assert!(i.contains(7.0, 7.0));
        assert!(!i.contains(2.0, 2.0));
    }

    #[test]
    fn test_intersection_of_disjoint_rects_is_empty() {
        let a = rect(0.0, 0.0, 1.0, 1.0);
        let b = rect(5.0, 5.0, 6.0, 6.0);
        assert!(a.intersection(&b).is_empty());
        assert!(!a.intersects(&b));
    }

    #[test]
    fn test_difference() {
        let a = rect(0.0, 0.0, 10.0, 10.0);
        let b = rect(0.0, 0.0, 10.0, 5.0);
        let d = a.difference(&b);
        assert_relative_eq!(d.area(), 50.0, epsilon = 1e-9);
        assert!(d.contains(5.0, 7.5));
        assert!(!d.contains(5.0, 2.5));
    }

    #[test]
    fn test_repair_self_touching_ring() {
        // A bowtie: two triangles joined at a point, drawn as one ring.
        let bowtie = Polygon::new(
            LineString::from(vec![
                (0.0, 0.0),
                (2.0, 2.0),
                (2.0, 0.0),
                (0.0, 2.0),
                (0.0, 0.0),
            ]),
            vec![],
        );
        let repaired = Region::new(MultiPolygon::new(vec![bowtie])).repair();
        assert!(repaired.shape().is_valid());
        assert!(repaired.area() > 0.0);
    }

    #[test]
    fn test_almost_equal_tolerance() {
        let a = rect(0.0, 0.0, 10.0, 10.0);
        let b = rect(0.005, 0.0, 10.005, 10.0);
        let c = rect(0.5, 0.0, 10.5, 10.0);
        assert!(a.almost_equal(&b));
        assert!(!a.almost_equal(&c));
        assert!(!a.almost_equal(&Region::empty()));
    }
}
