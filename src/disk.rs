//! Constraint-disk construction.
//!
//! A disk is "all points within `radius_m` of a reference point", sampled as
//! a 60-vertex ring through the azimuthal-equidistant projection and then
//! stitched into map-rectangle polygons. The ring is well-behaved in metric
//! space but lon/lat is singular at the antimeridian and the poles, so the
//! ring is inspected for ±180° seam crossings:
//!
//! - 0 crossings: the ring is already a simple polygon.
//! - 1 crossing: the disk encloses a pole; divert the ring along the seam to
//!   ±85° so the polygon covers the full breadth of the map.
//! - 2 crossings: the disk straddles the seam; split into one polygon per
//!   side, each closed against its ±180° edge.
//! - 3 or more: not a disk we can represent.

use geo::{Coord, LineString, MultiPolygon, Polygon};

use crate::error::{LocateError, Result};
use crate::geodesic::{wrap_lon, AzimuthalEquidistant};
use crate::region::Region;

/// Radii above roughly half the Earth's circumference constrain nothing.
pub const FULL_MAP_RADIUS_M: f64 = 19_975_000.0;

/// Circles below 10 km diameter collapse under projection; clamp them.
pub const MIN_RADIUS_M: f64 = 5_000.0;

const RING_SAMPLES: usize = 60;

/// A constraint disk: reference point, radius, and the materialized region.
#[derive(Clone, Debug)]
pub struct Disk {
    pub lon: f64,
    pub lat: f64,
    pub radius_m: f64,
    pub region: Region,
}

/// Build the disk of radius `radius_m` meters around `(ref_lon, ref_lat)`.
pub fn build(ref_lon: f64, ref_lat: f64, radius_m: f64) -> Result<Disk> {
    if radius_m.is_nan() {
        return Err(LocateError::NumericDomain(
            "disk radius is not a number".to_string(),
        ));
    }
    let ref_lon = wrap_lon(ref_lon);
    let map = Region::map_rect();

    if radius_m > FULL_MAP_RADIUS_M {
        return Ok(Disk {
            lon: ref_lon,
            lat: ref_lat,
            radius_m,
            region: map,
        });
    }
    let radius = radius_m.max(MIN_RADIUS_M);

    let proj = AzimuthalEquidistant::new(ref_lon, ref_lat)?;
    let mut ring = Vec::with_capacity(RING_SAMPLES);
    for i in 0..RING_SAMPLES {
        let az = (i as f64) * 360.0 / (RING_SAMPLES as f64);
        let az_rad = az.to_radians();
        let (lon, lat) = proj.inverse(radius * az_rad.sin(), radius * az_rad.cos())?;
        ring.push(Coord { x: lon, y: lat });
    }

    let crossings: Vec<usize> = (0..RING_SAMPLES)
        .filter(|&i| (ring[(i + 1) % RING_SAMPLES].x - ring[i].x).abs() > 180.0)
        .collect();

    let polygons = match crossings.len() {
        0 => vec![Polygon::new(LineString::from(ring), vec![])],
        1 => vec![enclose_pole(ring, crossings[0], ref_lat)],
        2 => split_at_seam(&ring, crossings[0], crossings[1]),
        n => {
            return Err(LocateError::NumericDomain(format!(
                "disk ring at ({}, {}) r={} crosses the antimeridian {} times",
                ref_lon, ref_lat, radius, n
            )))
        }
    };

    let mut region = Region::new(MultiPolygon::new(polygons))
        .repair()
        .intersection(&map);

    // The ring orientation is not guaranteed after seam surgery; a disk must
    // contain its own reference point, else we built its complement.
    if map.contains(ref_lon, ref_lat) && !region.contains(ref_lon, ref_lat) {
        region = map.difference(&region);
    }

    Ok(Disk {
        lon: ref_lon,
        lat: ref_lat,
        radius_m: radius,
        region,
    })
}

/// One seam crossing: the ring winds around a pole. Rotate the ring so the
/// seam sits between its endpoints, then divert along the seam to the
/// nearer pole's map edge.
fn enclose_pole(mut ring: Vec<Coord<f64>>, crossing: usize, ref_lat: f64) -> Polygon<f64> {
    ring.rotate_left(crossing + 1);
    let first = ring[0];
    let last = ring[ring.len() - 1];
    let pole_lat = if ref_lat >= 0.0 { 85.0 } else { -85.0 };
    let edge_last = 180.0_f64.copysign(last.x);
    let edge_first = 180.0_f64.copysign(first.x);
    ring.push(Coord {
        x: edge_last,
        y: last.y,
    });
    ring.push(Coord {
        x: edge_last,
        y: pole_lat,
    });
    ring.push(Coord {
        x: edge_first,
        y: pole_lat,
    });
    ring.push(Coord {
        x: edge_first,
        y: first.y,
    });
    Polygon::new(LineString::from(ring), vec![])
}

/// Two seam crossings: the disk straddles the antimeridian without
/// enclosing a pole. Cut the cyclic ring at both crossings and close each
/// arc against its own ±180° edge.
fn split_at_seam(ring: &[Coord<f64>], a: usize, b: usize) -> Vec<Polygon<f64>> {
    let mut east_arc: Vec<Coord<f64>> = ring[a + 1..=b].to_vec();
    let mut west_arc: Vec<Coord<f64>> = ring[b + 1..].to_vec();
    west_arc.extend_from_slice(&ring[..=a]);

    [&mut east_arc, &mut west_arc]
        .into_iter()
        .map(|arc| {
            let first = arc[0];
            let last = arc[arc.len() - 1];
            let edge = 180.0_f64.copysign(first.x);
            arc.push(Coord {
                x: edge,
                y: last.y,
            });
            arc.push(Coord {
                x: edge,
                y: first.y,
            });
            Polygon::new(LineString::from(std::mem::take(arc)), vec![])
        })
        .collect()
}
