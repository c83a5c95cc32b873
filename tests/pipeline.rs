//! End-to-end pipeline scenarios driven through the library API, with an
//! in-memory calibration store, synthetic measurement rows, and a synthetic
//! base map. No database required.

use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;

use locate_from_db::calibration::{physical_limit, CalibrationStore, Model, VariantCalibration};
use locate_from_db::db::{BatchRow, LandmarkPosition, MeasurementRow};
use locate_from_db::disk;
use locate_from_db::output::write_region;
use locate_from_db::region::Region;
use locate_from_db::runner::{locate_batch, SharedState};

fn landmark(addr: &str, label: &str, lon: f64, lat: f64) -> (Ipv4Addr, LandmarkPosition) {
    let a: Ipv4Addr = addr.parse().unwrap();
    (a, LandmarkPosition::new(a, label, lon, lat))
}

fn cbg_store(entries: &[(&str, f64, f64)]) -> CalibrationStore {
    let mut landmarks = BTreeMap::new();
    for (key, m, b) in entries {
        landmarks.insert(key.to_string(), Model::Cbg { m: *m, b: *b });
    }
    let mut store = CalibrationStore::new();
    store.insert("cbg-m-1", VariantCalibration::PerLandmark { landmarks });
    store
}

fn batch(id: i64, client_lon: f64, client_lat: f64) -> BatchRow {
    BatchRow {
        id,
        client_lat,
        client_lon,
        client_addr: None,
        proxied: false,
        proxy_lat: None,
        proxy_lon: None,
        proxy_addr: None,
        annot: BTreeMap::new(),
    }
}

fn measurement(dst: &str, rtt_ms: f32) -> MeasurementRow {
    MeasurementRow {
        dst: dst.parse().unwrap(),
        rtt_ms,
        status: 0,
    }
}

#[test]
fn single_landmark_direct_connection() {
    // One landmark near Palo Alto, CBG at 80 000 m/ms, one RTT of 10 ms:
    // an 800 km empirical disk, well inside the physical limit.
    let (addr, lm) = landmark("192.0.2.1", "sfo-1", -122.1, 37.4);
    let mut positions = HashMap::new();
    positions.insert(addr, lm);

    let basemap = disk::build(-120.0, 38.0, 1_500_000.0).unwrap().region;
    let shared = SharedState {
        positions,
        calibrations: cbg_store(&[("192.0.2.1", 80_000.0, 0.0)]),
        basemap: basemap.clone(),
    };

    let outcomes = locate_batch(&shared, &batch(1, -122.0, 37.0), &[measurement("192.0.2.1", 10.0)]);
    assert_eq!(outcomes.len(), 1);
    let outcome = &outcomes[0];
    assert_eq!(outcome.file_tag, "cbg-m-1");
    assert!(!outcome.region.is_empty());
    assert_eq!(outcome.annotations["on_land"], serde_json::json!(true));
    assert_eq!(
        outcome.annotations["selected_landmarks"],
        serde_json::json!(["192.0.2.1"])
    );

    // The region is the empirical disk clipped by physics and land.
    let empirical = disk::build(-122.1, 37.4, 800_000.0).unwrap().region;
    let physical = disk::build(-122.1, 37.4, physical_limit(10.0).r_max)
        .unwrap()
        .region;
    for bound in [&empirical, &physical, &basemap] {
        let outside = outcome.region.difference(bound);
        assert!(outside.is_empty() || outside.area() < 1e-9);
    }
}

#[test]
fn antipodal_claims_yield_empty_intersection() {
    // Two landmarks at antipodal points, each asserting a ~100 km radius.
    let mut positions = HashMap::new();
    for (addr, lm) in [
        landmark("192.0.2.1", "lm-a", 10.0, 0.0),
        landmark("192.0.2.2", "lm-b", -170.0, 0.0),
    ] {
        positions.insert(addr, lm);
    }
    let shared = SharedState {
        positions,
        calibrations: cbg_store(&[
            ("192.0.2.1", 100_000.0, 0.0),
            ("192.0.2.2", 100_000.0, 0.0),
        ]),
        basemap: Region::map_rect(),
    };

    let rows = [measurement("192.0.2.1", 1.0), measurement("192.0.2.2", 1.0)];
    let outcomes = locate_batch(&shared, &batch(2, 0.0, 0.0), &rows);
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].file_tag, "empty-intersection");
    assert!(outcomes[0].region.is_empty());
}

#[test]
fn mid_ocean_target_reported_at_sea() {
    // The landmark pins the target in the Atlantic; land is elsewhere, so
    // the region is kept unclipped and tagged at-sea.
    let (addr, lm) = landmark("192.0.2.1", "lm-sea", -30.0, 30.0);
    let mut positions = HashMap::new();
    positions.insert(addr, lm);

    let shared = SharedState {
        positions,
        calibrations: cbg_store(&[("192.0.2.1", 60_000.0, 0.0)]),
        basemap: disk::build(10.0, 50.0, 800_000.0).unwrap().region,
    };

    let outcomes = locate_batch(&shared, &batch(3, -30.0, 30.0), &[measurement("192.0.2.1", 4.0)]);
    assert_eq!(outcomes.len(), 1);
    let outcome = &outcomes[0];
    assert_eq!(outcome.file_tag, "at-sea");
    assert_eq!(outcome.annotations["on_land"], serde_json::json!(false));
    assert!(!outcome.region.is_empty());
    assert!(outcome.region.contains(-30.0, 30.0));
}

#[test]
fn landmark_without_calibration_yields_no_observations() {
    let (addr, lm) = landmark("192.0.2.9", "lm-x", 5.0, 45.0);
    let mut positions = HashMap::new();
    positions.insert(addr, lm);

    let shared = SharedState {
        positions,
        calibrations: cbg_store(&[("203.0.113.250", 60_000.0, 0.0)]),
        basemap: Region::map_rect(),
    };

    let outcomes = locate_batch(&shared, &batch(4, 5.0, 45.0), &[measurement("192.0.2.9", 10.0)]);
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].file_tag, "no-observations");
    assert_eq!(
        outcomes[0].annotations["landmarks_skipped_no_calibration"],
        serde_json::json!(1)
    );
}

#[test]
fn outlier_landmark_excluded_but_region_found() {
    // Three landmarks: two consistent around central Europe, one claiming
    // the target is in Japan. The solver drops the outlier.
    let mut positions = HashMap::new();
    for (addr, lm) in [
        landmark("192.0.2.1", "ber-1", 13.4, 52.5),
        landmark("192.0.2.2", "par-1", 2.35, 48.85),
        landmark("192.0.2.3", "tyo-1", 139.7, 35.7),
    ] {
        positions.insert(addr, lm);
    }
    let shared = SharedState {
        positions,
        calibrations: cbg_store(&[
            ("192.0.2.1", 60_000.0, 0.0),
            ("192.0.2.2", 60_000.0, 0.0),
            ("192.0.2.3", 60_000.0, 0.0),
        ]),
        basemap: Region::map_rect(),
    };

    // 120 ms to Tokyo is physically consistent with a European target, but
    // the calibrated claim (7 200 km) still cannot reach Europe.
    let rows = [
        measurement("192.0.2.1", 12.0),
        measurement("192.0.2.2", 12.0),
        measurement("192.0.2.3", 120.0),
    ];
    let outcomes = locate_batch(&shared, &batch(5, 8.0, 50.0), &rows);
    assert_eq!(outcomes.len(), 1);
    let outcome = &outcomes[0];
    assert_eq!(outcome.file_tag, "cbg-m-1");
    assert_eq!(
        outcome.annotations["selected_landmarks"],
        serde_json::json!(["192.0.2.1", "192.0.2.2"])
    );
}

#[test]
fn pipeline_output_is_deterministic() {
    let (addr, lm) = landmark("192.0.2.1", "ber-1", 13.4, 52.5);
    let mut positions = HashMap::new();
    positions.insert(addr, lm);
    let shared = SharedState {
        positions,
        calibrations: cbg_store(&[("192.0.2.1", 60_000.0, 0.0)]),
        basemap: Region::map_rect(),
    };
    let rows = [measurement("192.0.2.1", 9.0)];

    let dir = tempfile::tempdir().unwrap();
    let mut contents = Vec::new();
    for run in 0..2 {
        let outcomes = locate_batch(&shared, &batch(6, 13.0, 52.0), &rows);
        assert_eq!(outcomes.len(), 1);
        let subdir = dir.path().join(format!("run-{}", run));
        std::fs::create_dir(&subdir).unwrap();
        let path = write_region(
            &subdir,
            &outcomes[0].file_tag,
            6,
            &outcomes[0].region,
            &outcomes[0].annotations,
        )
        .unwrap();
        contents.push(std::fs::read(path).unwrap());
    }
    assert_eq!(contents[0], contents[1]);
}

#[test]
fn region_files_carry_tags_and_ids() {
    let (addr, lm) = landmark("192.0.2.1", "lm-sea", -30.0, 30.0);
    let mut positions = HashMap::new();
    positions.insert(addr, lm);
    let shared = SharedState {
        positions,
        calibrations: cbg_store(&[("192.0.2.1", 60_000.0, 0.0)]),
        basemap: disk::build(10.0, 50.0, 800_000.0).unwrap().region,
    };

    let outcomes = locate_batch(&shared, &batch(77, -30.0, 30.0), &[measurement("192.0.2.1", 4.0)]);
    let dir = tempfile::tempdir().unwrap();
    let path = write_region(
        dir.path(),
        &outcomes[0].file_tag,
        77,
        &outcomes[0].region,
        &outcomes[0].annotations,
    )
    .unwrap();
    assert!(path.ends_with("at-sea-77.geojson"));

    let content = std::fs::read_to_string(&path).unwrap();
    let parsed: geojson::GeoJson = content.parse().unwrap();
    let geojson::GeoJson::Feature(feature) = parsed else {
        panic!("expected a Feature");
    };
    let props = feature.properties.unwrap();
    assert_eq!(props["batch"], serde_json::json!(77));
    assert_eq!(props["on_land"], serde_json::json!(false));
    assert_eq!(props["algorithm"], serde_json::json!("cbg-m-1"));
}
