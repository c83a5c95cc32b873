//! Batch orchestration.
//!
//! The coordinator loads everything shared (calibrations, base map,
//! landmark positions) before any worker exists, then spawns one task per
//! batch into a `JoinSet`, bounded by a semaphore of `workers` permits. A
//! task preprocesses its batch once and runs every configured variant to
//! completion, writing one region file per variant. Results surface in
//! completion order; the first fatal error aborts the remaining tasks and
//! leaves already-written files in place.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::basemap;
use crate::calibration::CalibrationStore;
use crate::cli::Config;
use crate::constraint::build_constraints;
use crate::db::{BatchRow, Database, LandmarkPosition, MeasurementRow};
use crate::error::{LocateError, Result};
use crate::logger;
use crate::output;
use crate::preprocess::preprocess;
use crate::region::Region;
use crate::solver::solve;

/// Read-only state shared by every worker.
pub struct SharedState {
    pub positions: std::collections::HashMap<std::net::Ipv4Addr, LandmarkPosition>,
    pub calibrations: CalibrationStore,
    pub basemap: Region,
}

/// One region file waiting to be written.
#[derive(Clone, Debug)]
pub struct VariantOutcome {
    /// Filename tag: the variant identifier, or an error tag.
    pub file_tag: String,
    pub region: Region,
    pub annotations: BTreeMap<String, serde_json::Value>,
}

/// Run the full pipeline for one batch: preprocess once, then locate under
/// every configured variant. Pure over its inputs.
pub fn locate_batch(
    shared: &SharedState,
    batch: &BatchRow,
    rows: &[MeasurementRow],
) -> Vec<VariantOutcome> {
    let (metadata, series) = preprocess(batch, rows, &shared.positions);
    let base = Region::map_rect();

    let mut outcomes = Vec::new();
    for tag in shared.calibrations.tags() {
        let set = build_constraints(tag, &shared.calibrations, &shared.positions, &series);

        let mut annotations = metadata.annotations.clone();
        annotations.insert("algorithm".to_string(), json!(tag));
        annotations.insert("landmarks_used".to_string(), json!(set.landmarks.len()));
        annotations.insert(
            "landmarks_skipped_no_calibration".to_string(),
            json!(set.skipped_no_calibration),
        );

        if set.empirical.is_empty() {
            logger::debug(&format!("batch {} {}: no observations", batch.id, tag));
            annotations.insert("on_land".to_string(), json!(false));
            outcomes.push(VariantOutcome {
                file_tag: "no-observations".to_string(),
                region: Region::empty(),
                annotations,
            });
            continue;
        }

        let solution = solve(&set.physical, &set.empirical, &base);
        if solution.physical_excluded > 0 || solution.region.is_empty() {
            logger::debug(&format!(
                "batch {} {}: empty intersection ({} physical disks excluded)",
                batch.id, tag, solution.physical_excluded
            ));
            annotations.insert(
                "physical_disks_excluded".to_string(),
                json!(solution.physical_excluded),
            );
            annotations.insert("on_land".to_string(), json!(false));
            outcomes.push(VariantOutcome {
                file_tag: "empty-intersection".to_string(),
                region: Region::empty(),
                annotations,
            });
            continue;
        }

        let selected: Vec<String> = solution
            .included
            .iter()
            .map(|&i| set.landmarks[i].to_string())
            .collect();
        annotations.insert("selected_landmarks".to_string(), json!(selected));
        if set.empirical.len() <= 63 {
            let mask: u64 = solution.included.iter().map(|&i| 1u64 << i).sum();
            annotations.insert("selected_landmarks_mask".to_string(), json!(mask));
        }

        let land = solution.region.intersection(&shared.basemap);
        if land.is_empty() {
            annotations.insert("on_land".to_string(), json!(false));
            outcomes.push(VariantOutcome {
                file_tag: "at-sea".to_string(),
                region: solution.region,
                annotations,
            });
        } else {
            annotations.insert("on_land".to_string(), json!(true));
            outcomes.push(VariantOutcome {
                file_tag: tag.to_string(),
                region: land,
                annotations,
            });
        }
    }
    outcomes
}

/// Load shared state, fan batches out over the worker pool, and report.
pub async fn run(config: Config) -> Result<()> {
    let start = Instant::now();

    let calibrations = CalibrationStore::load(&config.calibration_file)?;
    if calibrations.is_empty() {
        return Err(LocateError::Calibration(format!(
            "{}: no calibration variants",
            config.calibration_file.display()
        )));
    }
    let basemap = basemap::load(&config.basemap_file).await?;
    std::fs::create_dir_all(&config.output_dir)
        .map_err(|e| LocateError::io(&config.output_dir, e))?;

    let db = Database::connect(&config.dsn, config.workers as u32 + 1).await?;
    let positions = db.positions().await?;
    logger::info(&format!("{} landmark positions loaded", positions.len()));
    let batches = db.batches(&config.selector).await?;
    logger::info(&format!(
        "{} batches selected, {} workers",
        batches.len(),
        config.workers
    ));

    let shared = Arc::new(SharedState {
        positions,
        calibrations,
        basemap,
    });

    let show_progress = !logger::is_quiet() && atty::is(atty::Stream::Stderr);
    let progress = if show_progress {
        let pb = ProgressBar::new(batches.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb
    } else {
        ProgressBar::hidden()
    };

    let semaphore = Arc::new(Semaphore::new(config.workers));
    let mut tasks: JoinSet<Result<usize>> = JoinSet::new();
    for batch in batches {
        let shared = shared.clone();
        let db = db.clone();
        let semaphore = semaphore.clone();
        let output_dir = config.output_dir.clone();
        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| LocateError::Config("worker pool closed".to_string()))?;

            let rows = match db.measurements_with_retry(batch.id).await {
                Ok(rows) => rows,
                Err(e) => {
                    logger::error(&format!("batch {}: skipped after retry: {}", batch.id, e));
                    return Ok(0);
                }
            };

            let mut written = 0;
            for outcome in locate_batch(&shared, &batch, &rows) {
                let path = output::write_region(
                    &output_dir,
                    &outcome.file_tag,
                    batch.id,
                    &outcome.region,
                    &outcome.annotations,
                )?;
                logger::output(&path.display().to_string());
                written += 1;
            }
            Ok(written)
        });
    }

    let mut batches_done = 0usize;
    let mut files_written = 0usize;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(written)) => {
                batches_done += 1;
                files_written += written;
                progress.inc(1);
            }
            Ok(Err(e)) => {
                tasks.abort_all();
                progress.finish_and_clear();
                return Err(e);
            }
            Err(join_error) => {
                tasks.abort_all();
                progress.finish_and_clear();
                return Err(LocateError::Config(format!(
                    "worker task failed: {}",
                    join_error
                )));
            }
        }
    }
    progress.finish_and_clear();

    logger::info(&format!(
        "{} batches processed, {} region files written in {:.2?}",
        batches_done,
        files_written,
        start.elapsed()
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{Model, VariantCalibration};
    use std::collections::HashMap;
    use std::net::Ipv4Addr;

    fn shared_with(
        landmarks: &[(&str, f64, f64)],
        m: f64,
        basemap: Region,
    ) -> SharedState {
        let mut positions = HashMap::new();
        let mut table = BTreeMap::new();
        for (addr, lon, lat) in landmarks {
            let a: Ipv4Addr = addr.parse().unwrap();
            positions.insert(a, LandmarkPosition::new(a, format!("lm-{}", a), *lon, *lat));
            table.insert(addr.to_string(), Model::Cbg { m, b: 0.0 });
        }
        let mut calibrations = CalibrationStore::new();
        calibrations.insert("cbg-m-1", VariantCalibration::PerLandmark { landmarks: table });
        SharedState {
            positions,
            calibrations,
            basemap,
        }
    }

    fn batch_row(id: i64) -> BatchRow {
        BatchRow {
            id,
            client_lat: 0.0,
            client_lon: 0.0,
            client_addr: None,
            proxied: false,
            proxy_lat: None,
            proxy_lon: None,
            proxy_addr: None,
            annot: BTreeMap::new(),
        }
    }

    fn row(dst: &str, rtt: f32) -> MeasurementRow {
        MeasurementRow {
            dst: dst.parse().unwrap(),
            rtt_ms: rtt,
            status: 0,
        }
    }

    #[test]
    fn test_no_observations_outcome() {
        let shared = shared_with(&[], 60_000.0, Region::map_rect());
        let outcomes = locate_batch(&shared, &batch_row(1), &[row("203.0.113.1", 10.0)]);
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].file_tag, "no-observations");
        assert!(outcomes[0].region.is_empty());
        assert_eq!(outcomes[0].annotations["on_land"], json!(false));
    }

    #[test]
    fn test_at_sea_outcome() {
        // One landmark, small disk in the Atlantic; land is elsewhere.
        let shared = shared_with(
            &[("203.0.113.1", -30.0, 30.0)],
            60_000.0,
            crate::disk::build(100.0, 30.0, 500_000.0).unwrap().region,
        );
        let outcomes = locate_batch(&shared, &batch_row(2), &[row("203.0.113.1", 5.0)]);
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].file_tag, "at-sea");
        assert!(!outcomes[0].region.is_empty());
        assert_eq!(outcomes[0].annotations["on_land"], json!(false));
    }

    #[test]
    fn test_on_land_outcome_clipped_to_land() {
        let land = crate::disk::build(-122.0, 37.0, 2_000_000.0).unwrap().region;
        let shared = shared_with(&[("203.0.113.1", -122.1, 37.4)], 60_000.0, land.clone());
        let outcomes = locate_batch(&shared, &batch_row(3), &[row("203.0.113.1", 10.0)]);
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].file_tag, "cbg-m-1");
        assert_eq!(outcomes[0].annotations["on_land"], json!(true));
        let outside = outcomes[0].region.difference(&land);
        assert!(outside.is_empty() || outside.area() < 1e-9);
    }
}
