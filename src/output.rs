//! Region output files.
//!
//! One GeoJSON Feature per (batch, variant): the region as a MultiPolygon
//! (possibly with zero parts, for empty regions) and the full batch
//! annotations as properties. Files are named `<tag>-<batch_id>.geojson`,
//! where the tag is the variant identifier or an error tag.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use geo::{MultiPolygon, Polygon};
use geojson::{Feature, GeoJson, Geometry, JsonObject};

use crate::error::{LocateError, Result};
use crate::region::Region;

/// Write one region file; returns the path written.
pub fn write_region(
    dir: &Path,
    tag: &str,
    batch_id: i64,
    region: &Region,
    annotations: &BTreeMap<String, serde_json::Value>,
) -> Result<PathBuf> {
    let path = dir.join(format!("{}-{}.geojson", tag, batch_id));

    let mut properties = JsonObject::new();
    for (key, value) in annotations {
        properties.insert(key.clone(), value.clone());
    }

    let feature = Feature {
        bbox: None,
        geometry: Some(Geometry::new(multipolygon_value(region.shape()))),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    };

    let file = File::create(&path).map_err(|e| LocateError::io(&path, e))?;
    serde_json::to_writer(BufWriter::new(file), &GeoJson::Feature(feature))
        .map_err(|e| LocateError::Geojson(format!("{}: {}", path.display(), e)))?;
    Ok(path)
}

fn multipolygon_value(shape: &MultiPolygon<f64>) -> geojson::Value {
    geojson::Value::MultiPolygon(shape.0.iter().map(polygon_rings).collect())
}

fn polygon_rings(polygon: &Polygon<f64>) -> Vec<Vec<Vec<f64>>> {
    std::iter::once(polygon.exterior())
        .chain(polygon.interiors().iter())
        .map(|ring| ring.0.iter().map(|c| vec![c.x, c.y]).collect())
        .collect()
}
