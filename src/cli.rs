//! CLI argument parsing and validation.

use std::path::PathBuf;

use clap::Parser;

use crate::error::{LocateError, Result};
use crate::logger::VerbosityLevel;

/// Command line arguments for locate-from-db.
#[derive(Parser, Debug)]
#[command(name = "locate-from-db")]
#[command(version, about = "Offline RTT-based geolocation over a measurement database", long_about = None)]
pub struct Args {
    /// Directory for region output files (created if missing).
    pub output_dir: PathBuf,

    /// Gzip-compressed calibration artifact.
    pub calibration_file: PathBuf,

    /// Land base map (.gpkg, .json or .geojson).
    pub basemap_file: PathBuf,

    /// Database DSN; DATABASE_URL is used when omitted.
    pub database_dsn: Option<String>,

    /// Extra SQL appended to the batch-selection query, e.g. "proxied".
    #[arg(trailing_var_arg = true)]
    pub selector: Vec<String>,

    /// Worker pool size; NUM_WORKERS or one per logical core when omitted.
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Only errors and file paths.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Debug output.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Fully validated configuration object.
#[derive(Debug, Clone)]
pub struct Config {
    pub output_dir: PathBuf,
    pub calibration_file: PathBuf,
    pub basemap_file: PathBuf,
    pub dsn: String,
    pub selector: Vec<String>,
    pub workers: usize,
    pub verbosity: VerbosityLevel,
}

impl Args {
    /// Validates arguments and converts them to a structured `Config`.
    pub fn validate(self) -> Result<Config> {
        if !self.calibration_file.exists() {
            return Err(LocateError::Config(format!(
                "calibration file not found: {}",
                self.calibration_file.display()
            )));
        }
        if !self.basemap_file.exists() {
            return Err(LocateError::Config(format!(
                "base map file not found: {}",
                self.basemap_file.display()
            )));
        }

        let dsn = match self.database_dsn {
            Some(dsn) => dsn,
            None => std::env::var("DATABASE_URL").map_err(|_| {
                LocateError::Config(
                    "no database DSN given and DATABASE_URL is not set".to_string(),
                )
            })?,
        };

        let workers = match self.workers {
            Some(n) => n,
            None => match std::env::var("NUM_WORKERS") {
                Ok(value) => value.parse().map_err(|_| {
                    LocateError::Config(format!("NUM_WORKERS '{}' is not a number", value))
                })?,
                Err(_) => std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1),
            },
        };
        if workers == 0 {
            return Err(LocateError::Config(
                "worker pool size must be at least 1".to_string(),
            ));
        }

        let verbosity = if self.quiet {
            VerbosityLevel::Quiet
        } else if self.verbose {
            VerbosityLevel::Verbose
        } else {
            VerbosityLevel::Normal
        };

        Ok(Config {
            output_dir: self.output_dir,
            calibration_file: self.calibration_file,
            basemap_file: self.basemap_file,
            dsn,
            selector: self.selector,
            workers,
            verbosity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    fn args_with_files(dir: &std::path::Path) -> Args {
        let calibration = dir.join("calibration.json.gz");
        let basemap = dir.join("land.geojson");
        File::create(&calibration).unwrap();
        File::create(&basemap).unwrap();
        Args {
            output_dir: dir.join("out"),
            calibration_file: calibration,
            basemap_file: basemap,
            database_dsn: Some("postgres://localhost/geoloc".to_string()),
            selector: vec![],
            workers: Some(4),
            quiet: false,
            verbose: false,
        }
    }

    #[test]
    fn test_validate_happy_path() {
        let dir = tempfile::tempdir().unwrap();
        let config = args_with_files(dir.path()).validate().unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.dsn, "postgres://localhost/geoloc");
        assert_eq!(config.verbosity, VerbosityLevel::Normal);
    }

    #[test]
    fn test_validate_missing_calibration() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = args_with_files(dir.path());
        args.calibration_file = dir.path().join("missing.json.gz");
        let err = args.validate().unwrap_err();
        assert!(err.to_string().contains("calibration file not found"));
    }

    #[test]
    fn test_validate_zero_workers_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = args_with_files(dir.path());
        args.workers = Some(0);
        let err = args.validate().unwrap_err();
        assert!(err.to_string().contains("at least 1"));
    }

    #[test]
    fn test_validate_selector_passthrough() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = args_with_files(dir.path());
        args.selector = vec!["proxied".to_string(), "AND".to_string(), "id < 100".to_string()];
        let config = args.validate().unwrap();
        assert_eq!(config.selector.join(" "), "proxied AND id < 100");
    }

    #[test]
    fn test_quiet_and_verbose_levels() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = args_with_files(dir.path());
        args.quiet = true;
        assert_eq!(args.validate().unwrap().verbosity, VerbosityLevel::Quiet);

        let mut args = args_with_files(dir.path());
        args.verbose = true;
        assert_eq!(args.validate().unwrap().verbosity, VerbosityLevel::Verbose);
    }
}
