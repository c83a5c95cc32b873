//! Base-map loading.
//!
//! The base map is the union of all land polygons (minus major lakes and
//! glaciated areas, which the source dataset already excludes), clipped to
//! the map rectangle. It is loaded once by the coordinator and shared
//! read-only with every worker. Two on-disk formats are supported, chosen by
//! extension: a GeoPackage (`.gpkg`) read through a read-only SQLite pool,
//! or a GeoJSON file.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use geo::{unary_union, Coord, Geometry, LineString, MultiPolygon, Polygon};
use geojson::GeoJson;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use sqlx::Row;

use crate::error::{LocateError, Result};
use crate::logger;
use crate::region::Region;

/// Load the land base map from `path` and clip it to the map rectangle.
pub async fn load(path: &Path) -> Result<Region> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    let polygons = match ext.as_str() {
        "gpkg" => load_gpkg(path).await?,
        "json" | "geojson" => load_geojson(path)?,
        other => {
            return Err(LocateError::Config(format!(
                "unsupported base map format '{}' (expected .gpkg, .json or .geojson)",
                other
            )))
        }
    };
    if polygons.is_empty() {
        return Err(LocateError::Data(format!(
            "{}: no polygon features found",
            path.display()
        )));
    }
    logger::debug(&format!(
        "base map: {} polygons from {}",
        polygons.len(),
        path.display()
    ));

    let land = Region::new(unary_union(polygons.iter()));
    let clipped = land.intersection(&Region::map_rect());
    if clipped.is_empty() {
        return Err(LocateError::Data(format!(
            "{}: base map does not overlap the map rectangle",
            path.display()
        )));
    }
    Ok(clipped)
}

/// Read every polygon feature of every vector layer in a GeoPackage.
async fn load_gpkg(path: &Path) -> Result<Vec<MultiPolygon<f64>>> {
    if !path.exists() {
        return Err(LocateError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        ));
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
        .map_err(LocateError::Db)?
        .read_only(true);
    let pool = SqlitePool::connect_with(options).await?;

    let layers = sqlx::query(
        r#"
        SELECT c.table_name, g.column_name
        FROM gpkg_contents c
        JOIN gpkg_geometry_columns g ON c.table_name = g.table_name
        WHERE c.data_type = 'features'
        AND (g.geometry_type_name LIKE '%POLYGON%' OR g.geometry_type_name LIKE '%polygon%')
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let mut polygons = Vec::new();
    for layer in &layers {
        let table: String = layer.get("table_name");
        let column: String = layer.get("column_name");
        let query = format!("SELECT {} FROM \"{}\"", column, table);
        let rows = sqlx::query(&query).fetch_all(&pool).await?;
        for row in rows {
            let blob: Vec<u8> = row.get(0);
            match parse_gpkg_wkb(&blob) {
                Some(Geometry::Polygon(p)) => polygons.push(MultiPolygon::new(vec![p])),
                Some(Geometry::MultiPolygon(mp)) => polygons.push(mp),
                Some(_) | None => {}
            }
        }
    }
    pool.close().await;
    Ok(polygons)
}

/// Parse GeoPackage WKB (with header) to a geo Geometry.
///
/// GeoPackage prefixes ISO WKB with: magic "GP" (2 bytes), version (1),
/// flags (1), SRS id (4), then an optional envelope whose size the flags
/// encode.
fn parse_gpkg_wkb(data: &[u8]) -> Option<Geometry<f64>> {
    if data.len() < 8 {
        return None;
    }
    if data[0] != 0x47 || data[1] != 0x50 {
        // Not a GP header; try plain WKB.
        return wkb::wkb_to_geom(&mut std::io::Cursor::new(data)).ok();
    }

    let flags = data[3];
    let envelope_indicator = (flags >> 1) & 0x07;
    let envelope_size = match envelope_indicator {
        0 => 0,
        1 => 32,
        2 | 3 => 48,
        4 => 64,
        _ => return None,
    };

    let wkb_start = 8 + envelope_size;
    if data.len() <= wkb_start {
        return None;
    }
    wkb::wkb_to_geom(&mut std::io::Cursor::new(&data[wkb_start..])).ok()
}

/// Read every polygon feature from a GeoJSON file (assumed WGS-84).
fn load_geojson(path: &Path) -> Result<Vec<MultiPolygon<f64>>> {
    let content = fs::read_to_string(path).map_err(|e| LocateError::io(path, e))?;
    let geojson: GeoJson = content
        .parse()
        .map_err(|e| LocateError::Geojson(format!("{}: {}", path.display(), e)))?;

    let mut polygons = Vec::new();
    match &geojson {
        GeoJson::Geometry(g) => collect_polygons(g, &mut polygons),
        GeoJson::Feature(f) => {
            if let Some(g) = &f.geometry {
                collect_polygons(g, &mut polygons);
            }
        }
        GeoJson::FeatureCollection(fc) => {
            for feature in &fc.features {
                if let Some(g) = &feature.geometry {
                    collect_polygons(g, &mut polygons);
                }
            }
        }
    }
    Ok(polygons)
}

fn collect_polygons(geometry: &geojson::Geometry, out: &mut Vec<MultiPolygon<f64>>) {
    match &geometry.value {
        geojson::Value::Polygon(rings) => {
            if let Some(p) = polygon_from_rings(rings) {
                out.push(MultiPolygon::new(vec![p]));
            }
        }
        geojson::Value::MultiPolygon(parts) => {
            let polygons: Vec<Polygon<f64>> =
                parts.iter().filter_map(|rings| polygon_from_rings(rings)).collect();
            if !polygons.is_empty() {
                out.push(MultiPolygon::new(polygons));
            }
        }
        _ => {}
    }
}

fn polygon_from_rings(rings: &[Vec<Vec<f64>>]) -> Option<Polygon<f64>> {
    let mut iter = rings.iter().map(|ring| {
        LineString::from(
            ring.iter()
                .filter(|pos| pos.len() >= 2)
                .map(|pos| Coord {
                    x: pos[0],
                    y: pos[1],
                })
                .collect::<Vec<_>>(),
        )
    });
    let exterior = iter.next()?;
    if exterior.0.len() < 4 {
        return None;
    }
    Some(Polygon::new(exterior, iter.collect()))
}
