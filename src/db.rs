//! Measurement-store access.
//!
//! Runtime `sqlx` queries against the PostgreSQL store holding batches,
//! landmark positions, and raw measurements. Columns are cast to fixed
//! widths in SQL so decoding does not depend on the exact column types the
//! collection tooling created. Malformed rows are warned about and skipped;
//! only connection and query failures surface as errors.

use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::error::Result;
use crate::logger;

/// A landmark with a known position.
#[derive(Clone, Debug)]
pub struct LandmarkPosition {
    pub addr: Ipv4Addr,
    pub label: String,
    /// Numeric sub-label derived from the trailing digits of `label`, or -1.
    pub ilabel: i64,
    pub lon: f64,
    pub lat: f64,
    pub country: Option<String>,
    pub asn: Option<i64>,
}

/// Network annotation of a host: human label, country code, origin ASN.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HostAnnotation {
    pub label: Option<String>,
    pub country: Option<String>,
    pub asn: Option<i64>,
}

impl LandmarkPosition {
    pub fn new(addr: Ipv4Addr, label: impl Into<String>, lon: f64, lat: f64) -> Self {
        let label = label.into();
        let ilabel = ilabel_of(&label);
        LandmarkPosition {
            addr,
            label,
            ilabel,
            lon,
            lat,
            country: None,
            asn: None,
        }
    }

    pub fn with_annotation(mut self, country: Option<String>, asn: Option<i64>) -> Self {
        self.country = country;
        self.asn = asn;
        self
    }

    /// The structured annotation of this host.
    pub fn annotation(&self) -> HostAnnotation {
        HostAnnotation {
            label: (!self.label.is_empty()).then(|| self.label.clone()),
            country: self.country.clone(),
            asn: self.asn,
        }
    }
}

/// The trailing decimal digits of a landmark label, or -1 when there are
/// none (or they do not fit an i64).
pub fn ilabel_of(label: &str) -> i64 {
    let prefix_len = label.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    let digits = &label[prefix_len..];
    if digits.is_empty() {
        -1
    } else {
        digits.parse().unwrap_or(-1)
    }
}

/// One row of the `batches` table.
#[derive(Clone, Debug)]
pub struct BatchRow {
    pub id: i64,
    pub client_lat: f64,
    pub client_lon: f64,
    pub client_addr: Option<Ipv4Addr>,
    pub proxied: bool,
    pub proxy_lat: Option<f64>,
    pub proxy_lon: Option<f64>,
    pub proxy_addr: Option<Ipv4Addr>,
    pub annot: BTreeMap<String, serde_json::Value>,
}

/// One row of the `measurements` table.
#[derive(Clone, Copy, Debug)]
pub struct MeasurementRow {
    pub dst: Ipv4Addr,
    pub rtt_ms: f32,
    /// errno of the probe: 0 = success, 111 = ECONNREFUSED.
    pub status: i32,
}

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to the measurement store. `max_connections` should cover the
    /// coordinator plus one connection per worker.
    pub async fn connect(dsn: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(dsn)
            .await?;
        Ok(Database { pool })
    }

    /// All batches matching the selector predicate, in id order. The
    /// selector words are appended verbatim as the WHERE clause.
    pub async fn batches(&self, selector: &[String]) -> Result<Vec<BatchRow>> {
        let mut sql = String::from(
            "SELECT id::int8, client_lat::float8, client_lon::float8, client_addr::text, \
             proxied::bool, proxy_lat::float8, proxy_lon::float8, proxy_addr::text, \
             annot::text FROM batches",
        );
        if !selector.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&selector.join(" "));
        }
        sql.push_str(" ORDER BY id");

        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        let mut batches = Vec::with_capacity(rows.len());
        for row in rows {
            match decode_batch_row(&row) {
                Ok(batch) => batches.push(batch),
                Err(msg) => logger::warn(&format!("skipping batch row: {}", msg)),
            }
        }
        Ok(batches)
    }

    /// The landmark position table, keyed by address.
    pub async fn positions(&self) -> Result<HashMap<Ipv4Addr, LandmarkPosition>> {
        let rows = sqlx::query(
            "SELECT ipv4::text, label::text, longitude::float8, latitude::float8, \
             country::text, asn::int8 FROM hosts",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut positions = HashMap::with_capacity(rows.len());
        for row in rows {
            match decode_host_row(&row) {
                Ok(lm) => {
                    positions.insert(lm.addr, lm);
                }
                Err(msg) => logger::warn(&format!("skipping host row: {}", msg)),
            }
        }
        Ok(positions)
    }

    /// Raw measurements of one batch.
    pub async fn measurements(&self, batch_id: i64) -> Result<Vec<MeasurementRow>> {
        let rows = sqlx::query(
            "SELECT dst::text, rtt_ms::float8, status::int4 FROM measurements WHERE batch = $1",
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        let mut measurements = Vec::with_capacity(rows.len());
        for row in rows {
            match decode_measurement_row(&row) {
                Ok(m) => measurements.push(m),
                Err(msg) => logger::warn(&format!("batch {}: skipping measurement: {}", batch_id, msg)),
            }
        }
        Ok(measurements)
    }

    /// [`Self::measurements`] with one retry, per the per-batch failure
    /// policy.
    pub async fn measurements_with_retry(&self, batch_id: i64) -> Result<Vec<MeasurementRow>> {
        match self.measurements(batch_id).await {
            Ok(rows) => Ok(rows),
            Err(first) => {
                logger::warn(&format!(
                    "batch {}: query failed ({}), retrying once",
                    batch_id, first
                ));
                self.measurements(batch_id).await
            }
        }
    }
}

fn get_f64(row: &sqlx::postgres::PgRow, col: &str) -> std::result::Result<f64, String> {
    let v: Option<f64> = row
        .try_get(col)
        .map_err(|e| format!("{}: {}", col, e))?;
    v.ok_or_else(|| format!("{} is null", col))
}

fn parse_addr(text: Option<String>, col: &str) -> std::result::Result<Option<Ipv4Addr>, String> {
    match text {
        None => Ok(None),
        Some(s) => s
            .parse::<Ipv4Addr>()
            .map(Some)
            .map_err(|_| format!("{} '{}' is not an IPv4 address", col, s)),
    }
}

fn decode_batch_row(row: &sqlx::postgres::PgRow) -> std::result::Result<BatchRow, String> {
    let id: i64 = row.try_get("id").map_err(|e| format!("id: {}", e))?;
    let client_lat = get_f64(row, "client_lat")?;
    let client_lon = get_f64(row, "client_lon")?;
    if client_lat.abs() > 90.0 {
        return Err(format!("batch {}: client_lat {} outside [-90, 90]", id, client_lat));
    }
    let client_addr = parse_addr(row.try_get("client_addr").unwrap_or(None), "client_addr")?;
    let proxied: bool = row.try_get("proxied").map_err(|e| format!("proxied: {}", e))?;
    let proxy_lat: Option<f64> = row.try_get("proxy_lat").unwrap_or(None);
    let proxy_lon: Option<f64> = row.try_get("proxy_lon").unwrap_or(None);
    let proxy_addr = parse_addr(row.try_get("proxy_addr").unwrap_or(None), "proxy_addr")?;
    let annot_text: Option<String> = row.try_get("annot").unwrap_or(None);
    let annot = match annot_text {
        None => BTreeMap::new(),
        Some(text) => serde_json::from_str(&text)
            .map_err(|e| format!("batch {}: annot is not a JSON object: {}", id, e))?,
    };
    Ok(BatchRow {
        id,
        client_lat,
        client_lon,
        client_addr,
        proxied,
        proxy_lat,
        proxy_lon,
        proxy_addr,
        annot,
    })
}

fn decode_host_row(row: &sqlx::postgres::PgRow) -> std::result::Result<LandmarkPosition, String> {
    let addr_text: Option<String> = row.try_get("ipv4").map_err(|e| format!("ipv4: {}", e))?;
    let addr = parse_addr(addr_text, "ipv4")?.ok_or("ipv4 is null")?;
    let label: Option<String> = row.try_get("label").unwrap_or(None);
    let lon = get_f64(row, "longitude")?;
    let lat = get_f64(row, "latitude")?;
    if lat.abs() > 90.0 {
        return Err(format!("host {}: latitude {} outside [-90, 90]", addr, lat));
    }
    let country: Option<String> = row.try_get("country").unwrap_or(None);
    let asn: Option<i64> = row.try_get("asn").unwrap_or(None);
    Ok(LandmarkPosition::new(addr, label.unwrap_or_default(), lon, lat).with_annotation(country, asn))
}

fn decode_measurement_row(row: &sqlx::postgres::PgRow) -> std::result::Result<MeasurementRow, String> {
    let dst_text: Option<String> = row.try_get("dst").map_err(|e| format!("dst: {}", e))?;
    let dst = parse_addr(dst_text, "dst")?.ok_or("dst is null")?;
    let rtt_ms = get_f64(row, "rtt_ms")? as f32;
    let status: i32 = row.try_get("status").map_err(|e| format!("status: {}", e))?;
    Ok(MeasurementRow {
        dst,
        rtt_ms,
        status,
    })
}
