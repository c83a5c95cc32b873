//! Calibration models and their store.
//!
//! A calibration turns a landmark's RTT series into a distance range in
//! meters. Each model kind is one variant of the [`Model`] sum type; a
//! calibration artifact maps a variant tag (e.g. `cbg-m-1`) to either one
//! pooled model or a per-landmark table. Artifacts are gzip-compressed JSON,
//! produced by the external fitting tool and loaded here in one call.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::db::LandmarkPosition;
use crate::error::{LocateError, Result};

/// Propagation speed assumed for the physical limit: two-thirds of the
/// speed of light in vacuum, in m/s.
pub const FIBER_SPEED_M_PER_S: f64 = 299_792_458.0 * 2.0 / 3.0;

/// z-score of the 95th percentile of a unit Gaussian.
const Z_95: f64 = 1.644_853_626_951_472_2;

/// Distance bounds in meters. `r_min` may be 0; `r_max` may be infinite.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DistanceRange {
    pub r_min: f64,
    pub r_max: f64,
}

/// A fitted RTT-to-distance model.
///
/// `m` is in m/ms, `b` in meters, `sigma` in meters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum Model {
    Cbg { m: f64, b: f64 },
    Octant { m: f64, b: f64 },
    SpotterUniform { m: f64, b: f64 },
    SpotterGaussian { m: f64, b: f64, sigma: f64 },
}

impl Model {
    /// Distance range claimed by this model for an RTT series.
    ///
    /// MinMax models bound distance by `m * min(rtts) + b` from above and 0
    /// from below. The Gaussian model returns the 5th and 95th percentiles
    /// of a normal distribution centered on the same linear estimate.
    pub fn range(&self, rtts: &[f32]) -> DistanceRange {
        let minrtt = min_rtt(rtts);
        match *self {
            Model::Cbg { m, b } | Model::Octant { m, b } | Model::SpotterUniform { m, b } => {
                DistanceRange {
                    r_min: 0.0,
                    r_max: m * minrtt + b,
                }
            }
            Model::SpotterGaussian { m, b, sigma } => {
                let center = m * minrtt + b;
                DistanceRange {
                    r_min: (center - Z_95 * sigma).max(0.0),
                    r_max: center + Z_95 * sigma,
                }
            }
        }
    }
}

/// The speed-of-light bound: a host cannot be farther than the distance
/// light in fiber covers in half the round trip.
pub fn physical_limit(minrtt_ms: f64) -> DistanceRange {
    DistanceRange {
        r_min: 0.0,
        r_max: FIBER_SPEED_M_PER_S * (minrtt_ms / 1000.0) / 2.0,
    }
}

fn min_rtt(rtts: &[f32]) -> f64 {
    rtts.iter().copied().fold(f32::INFINITY, f32::min) as f64
}

/// Calibration data for one variant tag.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantCalibration {
    /// One model shared by every landmark.
    Pooled { global: Model },
    /// Models keyed by IPv4 address, label, or numeric sub-label.
    PerLandmark { landmarks: BTreeMap<String, Model> },
}

/// Immutable variant-tag-to-calibration mapping, shared read-only across
/// workers.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CalibrationStore {
    variants: BTreeMap<String, VariantCalibration>,
}

impl CalibrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tag: impl Into<String>, calibration: VariantCalibration) {
        self.variants.insert(tag.into(), calibration);
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    /// Variant tags in deterministic order. This is the configured variant
    /// set of a run.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.variants.keys().map(String::as_str)
    }

    /// The model for `landmark` under variant `tag`, trying the IPv4
    /// address, the label, then the numeric sub-label. `None` means the
    /// landmark is skipped for this variant.
    pub fn lookup(&self, tag: &str, landmark: &LandmarkPosition) -> Option<&Model> {
        match self.variants.get(tag)? {
            VariantCalibration::Pooled { global } => Some(global),
            VariantCalibration::PerLandmark { landmarks } => landmarks
                .get(&landmark.addr.to_string())
                .or_else(|| landmarks.get(&landmark.label))
                .or_else(|| landmarks.get(&landmark.ilabel.to_string())),
        }
    }

    /// Load a gzip-compressed JSON calibration artifact.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| LocateError::io(path, e))?;
        let reader = GzDecoder::new(BufReader::new(file));
        serde_json::from_reader(reader).map_err(|e| {
            LocateError::Calibration(format!("{}: {}", path.display(), e))
        })
    }

    /// Write the store back out in the artifact format. Exists so the store
    /// round-trips artifacts produced by the fitting tool.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| LocateError::io(path, e))?;
        let mut writer = GzEncoder::new(BufWriter::new(file), Compression::default());
        serde_json::to_writer(&mut writer, self)
            .map_err(|e| LocateError::Calibration(format!("{}: {}", path.display(), e)))?;
        writer.finish().map_err(|e| LocateError::io(path, e))?;
        Ok(())
    }
}
