//! Constraint-disk construction per landmark.
//!
//! For every landmark that has both a position and a calibration under the
//! requested variant, build the empirical disk (what the calibration
//! claims) and the physical-limit disk (what the speed of light allows)
//! around the landmark. The two lists stay index-aligned.

use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;

use crate::calibration::{physical_limit, CalibrationStore};
use crate::db::LandmarkPosition;
use crate::disk::{self, Disk};
use crate::logger;

/// Index-aligned empirical and physical constraint disks for one
/// (batch, variant) pair.
#[derive(Debug, Default)]
pub struct ConstraintSet {
    pub landmarks: Vec<Ipv4Addr>,
    pub empirical: Vec<Disk>,
    pub physical: Vec<Disk>,
    /// Landmarks with measurements but no calibration under this variant.
    pub skipped_no_calibration: usize,
}

pub fn build_constraints(
    variant: &str,
    store: &CalibrationStore,
    positions: &HashMap<Ipv4Addr, LandmarkPosition>,
    measurements: &BTreeMap<Ipv4Addr, Vec<f32>>,
) -> ConstraintSet {
    let mut set = ConstraintSet::default();
    for (addr, series) in measurements {
        if series.is_empty() {
            continue;
        }
        let Some(landmark) = positions.get(addr) else {
            continue;
        };
        let Some(model) = store.lookup(variant, landmark) else {
            set.skipped_no_calibration += 1;
            continue;
        };

        let minrtt = series[0] as f64;
        let empirical_r = model.range(series).r_max;
        let physical_r = physical_limit(minrtt).r_max;

        let built = disk::build(landmark.lon, landmark.lat, empirical_r)
            .and_then(|e| disk::build(landmark.lon, landmark.lat, physical_r).map(|p| (e, p)));
        match built {
            Ok((empirical, physical)) => {
                set.landmarks.push(*addr);
                set.empirical.push(empirical);
                set.physical.push(physical);
            }
            Err(e) => {
                logger::warn(&format!(
                    "{}: landmark {} skipped: {}",
                    variant, addr, e
                ));
            }
        }
    }
    set
}
