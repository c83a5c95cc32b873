//! Per-batch measurement preprocessing.
//!
//! Filters raw probe results down to usable RTT series, estimates and
//! subtracts the proxy overhead when the batch went through a proxy, and
//! annotates the batch metadata with the estimation diagnostics. The
//! function is pure over row structs so it can be driven without a
//! database.

use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;

use serde_json::json;

use crate::db::{BatchRow, HostAnnotation, LandmarkPosition, MeasurementRow};
use crate::logger;

/// RTTs never go below this after overhead subtraction (milliseconds).
pub const RTT_FLOOR_MS: f32 = 0.1;

/// RTTs at or above this are measurement garbage (milliseconds).
pub const RTT_MAX_MS: f32 = 5000.0;

/// Slack subtracted from a reference RTT when estimating proxy overhead:
/// the estimate must stay below every real measurement by at least this.
const PROXY_SLACK_MS: f64 = 5.0;

/// Colocation threshold for the there-and-back method (degrees).
const COLOCATED_DEG: f64 = 0.01;

/// Batch identity plus everything the output file needs to say about it.
///
/// The client annotation and, for proxied batches, the proxy
/// lat/lon/address/annotation are structured fields resolved against the
/// landmark position table; the free-form `annotations` map carries them
/// too (as `client_*`/`proxy_*` keys) so they reach the output files.
#[derive(Clone, Debug)]
pub struct BatchMetadata {
    pub id: i64,
    pub client_lon: f64,
    pub client_lat: f64,
    pub client_addr: Option<Ipv4Addr>,
    pub client: HostAnnotation,
    pub proxied: bool,
    pub proxy_lon: Option<f64>,
    pub proxy_lat: Option<f64>,
    pub proxy_addr: Option<Ipv4Addr>,
    pub proxy: Option<HostAnnotation>,
    pub annotations: BTreeMap<String, serde_json::Value>,
}

/// Preprocess one batch: filter, estimate proxy overhead, subtract, sort.
///
/// Returns the annotated metadata and a map from landmark address to its
/// ascending-sorted RTT series in milliseconds.
pub fn preprocess(
    batch: &BatchRow,
    rows: &[MeasurementRow],
    positions: &HashMap<Ipv4Addr, LandmarkPosition>,
) -> (BatchMetadata, BTreeMap<Ipv4Addr, Vec<f32>>) {
    let mut series: BTreeMap<Ipv4Addr, Vec<f32>> = BTreeMap::new();
    for row in rows {
        if row.status != 0 && row.status != 111 {
            continue;
        }
        if row.rtt_ms == 0.0 {
            continue;
        }
        if row.dst == Ipv4Addr::LOCALHOST
            || Some(row.dst) == batch.client_addr
            || Some(row.dst) == batch.proxy_addr
        {
            continue;
        }
        if !row.rtt_ms.is_finite() || row.rtt_ms < 0.0 || row.rtt_ms >= RTT_MAX_MS {
            logger::warn(&format!(
                "batch {}: dropping RTT {} ms to {} (outside [0, {}))",
                batch.id, row.rtt_ms, row.dst, RTT_MAX_MS
            ));
            continue;
        }
        series.entry(row.dst).or_default().push(row.rtt_ms);
    }

    let mut annotations = batch.annot.clone();
    annotations.insert("batch".to_string(), json!(batch.id));
    annotations.insert("client_lat".to_string(), json!(batch.client_lat));
    annotations.insert("client_lon".to_string(), json!(batch.client_lon));
    annotations.insert("proxied".to_string(), json!(batch.proxied));
    if let Some(addr) = batch.client_addr {
        annotations.insert("client_addr".to_string(), json!(addr.to_string()));
    }

    let client = host_annotation(batch.client_addr, positions);
    record_annotation(&mut annotations, "client", &client);

    let mut proxy = None;
    if batch.proxied {
        if let Some(addr) = batch.proxy_addr {
            annotations.insert("proxy_addr".to_string(), json!(addr.to_string()));
        }
        if let (Some(lat), Some(lon)) = (batch.proxy_lat, batch.proxy_lon) {
            annotations.insert("proxy_lat".to_string(), json!(lat));
            annotations.insert("proxy_lon".to_string(), json!(lon));
        }
        let annotation = host_annotation(batch.proxy_addr, positions);
        record_annotation(&mut annotations, "proxy", &annotation);
        proxy = Some(annotation);
    }

    let mut adjustment = 0.0;
    if batch.proxied && !series.is_empty() {
        adjustment = estimate_proxy_overhead(batch, positions, &series, &mut annotations);
    }

    for rtts in series.values_mut() {
        for rtt in rtts.iter_mut() {
            *rtt = ((*rtt as f64 - adjustment) as f32).max(RTT_FLOOR_MS);
        }
        rtts.sort_by(|a, b| a.partial_cmp(b).expect("RTTs are finite"));
    }

    let metadata = BatchMetadata {
        id: batch.id,
        client_lon: batch.client_lon,
        client_lat: batch.client_lat,
        client_addr: batch.client_addr,
        client,
        proxied: batch.proxied,
        proxy_lon: batch.proxy_lon,
        proxy_lat: batch.proxy_lat,
        proxy_addr: batch.proxy_addr,
        proxy,
        annotations,
    };
    (metadata, series)
}

/// The structured annotation of `addr`, resolved against the landmark
/// position table. Hosts the table does not know stay unannotated.
fn host_annotation(
    addr: Option<Ipv4Addr>,
    positions: &HashMap<Ipv4Addr, LandmarkPosition>,
) -> HostAnnotation {
    addr.and_then(|a| positions.get(&a))
        .map(LandmarkPosition::annotation)
        .unwrap_or_default()
}

fn record_annotation(
    annotations: &mut BTreeMap<String, serde_json::Value>,
    prefix: &str,
    annotation: &HostAnnotation,
) {
    if let Some(label) = &annotation.label {
        annotations.insert(format!("{}_label", prefix), json!(label));
    }
    if let Some(country) = &annotation.country {
        annotations.insert(format!("{}_country", prefix), json!(country));
    }
    if let Some(asn) = annotation.asn {
        annotations.insert(format!("{}_asn", prefix), json!(asn));
    }
}

/// Estimate the RTT overhead introduced by the proxy hop, in decreasing
/// order of accuracy:
///
/// 1. Router method: a measurement to the `.1` host of the proxy's /24 is
///    almost entirely proxy overhead.
/// 2. There-and-back method: the fastest landmark colocated with the client
///    measures the client->proxy->client path twice over.
/// 3. Clamp: the estimate can never exceed the smallest measurement minus
///    the slack, and never goes negative.
fn estimate_proxy_overhead(
    batch: &BatchRow,
    positions: &HashMap<Ipv4Addr, LandmarkPosition>,
    series: &BTreeMap<Ipv4Addr, Vec<f32>>,
    annotations: &mut BTreeMap<String, serde_json::Value>,
) -> f64 {
    let mut adjustment = 0.0;
    let mut method: Option<String> = None;
    let mut source: Option<Ipv4Addr> = None;

    if let Some(proxy) = batch.proxy_addr {
        let o = proxy.octets();
        let router = Ipv4Addr::new(o[0], o[1], o[2], 1);
        if let Some(rtts) = series.get(&router) {
            adjustment = min_of(rtts) - PROXY_SLACK_MS;
            method = Some("router".to_string());
            source = Some(router);
        }
    }

    if method.is_none() {
        let mut best: Option<(f64, Ipv4Addr)> = None;
        for (addr, rtts) in series {
            let Some(lm) = positions.get(addr) else {
                continue;
            };
            if (lm.lat - batch.client_lat).abs() < COLOCATED_DEG
                && (lm.lon - batch.client_lon).abs() < COLOCATED_DEG
            {
                let minrtt = min_of(rtts);
                if best.map_or(true, |(b, _)| minrtt < b) {
                    best = Some((minrtt, *addr));
                }
            }
        }
        if let Some((minrtt, addr)) = best {
            adjustment = minrtt / 2.0 - PROXY_SLACK_MS;
            method = Some("there_and_back".to_string());
            source = Some(addr);
        }
    }

    let clamp = series.values().map(|rtts| min_of(rtts)).fold(f64::INFINITY, f64::min)
        - PROXY_SLACK_MS;
    if adjustment > clamp {
        annotations.insert("proxy_rtt_estimation_unclamped".to_string(), json!(adjustment));
        adjustment = clamp;
        method = Some(match method {
            Some(prior) => format!("{}_clamped", prior),
            None => "clamp".to_string(),
        });
    }
    adjustment = adjustment.max(0.0);

    annotations.insert("estimated_proxy_rtt".to_string(), json!(adjustment));
    if let Some(method) = method {
        annotations.insert("proxy_rtt_estimation_method".to_string(), json!(method));
    }
    if let Some(source) = source {
        annotations.insert(
            "proxy_rtt_estimation_source".to_string(),
            json!(source.to_string()),
        );
    }
    adjustment
}

fn min_of(rtts: &[f32]) -> f64 {
    rtts.iter().copied().fold(f32::INFINITY, f32::min) as f64
}
