use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LocateError {
    #[error("Cannot access {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("Malformed row: {0}")]
    Data(String),

    #[error("Value out of range: {0}")]
    OutOfRange(String),

    #[error("Numeric domain error: {0}")]
    NumericDomain(String),

    #[error("GeoJSON error: {0}")]
    Geojson(String),

    #[error("Calibration error: {0}")]
    Calibration(String),

    #[error("{0}")]
    Config(String),
}

impl LocateError {
    /// Attach a path to a bare io error, for fatal file-level failures.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LocateError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, LocateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_display() {
        let err = LocateError::io(
            "/tmp/calibration.json.gz",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.to_string().contains("/tmp/calibration.json.gz"));
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn test_data_error_display() {
        let err = LocateError::Data("hosts.ipv4 is not an IPv4 address".to_string());
        assert_eq!(
            err.to_string(),
            "Malformed row: hosts.ipv4 is not an IPv4 address"
        );
    }

    #[test]
    fn test_numeric_domain_display() {
        let err = LocateError::NumericDomain("non-finite latitude".to_string());
        assert!(err.to_string().starts_with("Numeric domain error"));
    }
}
