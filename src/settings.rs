//! # Settings Module
//!
//! ## Purpose
//! Holds everything a processing session needs to know that is not data:
//! where the source tables live, which compound is the reference, and the
//! empirical constants of the response-factor and calibration models.
//! Nothing here is process-wide state: a `PipelineConfig` is loaded once and
//! passed explicitly to the components that need a part of it.
//!
//! ## Configuration Format
//! ```json
//! {
//!   "database_file": "database.csv",
//!   "experiments_file": "experimental_matrix.csv",
//!   "blob_directory": "blobs",
//!   "blob_file_suffix": ".cdf_img01_Blob_Table.csv",
//!   "output_directory": "results",
//!   "reference_compound": "fluoranthene",
//!   "calibration_file": null,
//!   "is_concentration": 0.03,
//!   "extra_columns": ["group"],
//!   "grouping": "group"
//! }
//! ```
//! Omitted fields take their defaults, so the constant blocks only need to
//! appear in the file when they are being tuned.

use crate::Utils::load_from_file::{read_json, write_json};
use crate::errors::PyroResult;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Empirical constants of the mass-response-factor model.
///
/// combustion = c0 + cC·C + cH·H + cO·O + cN·N
/// mrf = m0 + m1·combustion + m_benz·n_benz
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseFactorModel {
    pub combustion_intercept: f64,
    pub combustion_c: f64,
    pub combustion_h: f64,
    pub combustion_o: f64,
    pub combustion_n: f64,
    pub mrf_intercept: f64,
    pub mrf_slope: f64,
    pub mrf_per_aromatic_ring: f64,
}

impl Default for ResponseFactorModel {
    fn default() -> Self {
        Self {
            combustion_intercept: 11.6,
            combustion_c: 103.57,
            combustion_h: 21.85,
            combustion_o: -48.18,
            combustion_n: 7.46,
            mrf_intercept: -0.071,
            mrf_slope: 0.000857,
            mrf_per_aromatic_ring: 0.127,
        }
    }
}

impl ResponseFactorModel {
    pub fn combustion(&self, c: u32, h: u32, o: u32, n: u32) -> f64 {
        self.combustion_intercept
            + self.combustion_c * c as f64
            + self.combustion_h * h as f64
            + self.combustion_o * o as f64
            + self.combustion_n * n as f64
    }

    /// `n_benz` is counted as zero when unknown
    pub fn mrf(&self, combustion: f64, n_benz: Option<u32>) -> f64 {
        self.mrf_intercept
            + self.mrf_slope * combustion
            + n_benz.unwrap_or(0) as f64 * self.mrf_per_aromatic_ring
    }
}

/// Outlier rejection and confidence settings of the calibration builder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    /// corrected p-value below which a point is an outlier
    pub outlier_threshold: f64,
    pub confidence_level: f64,
    /// hard cap on refits; `None` means the dataset size
    pub max_iterations: Option<usize>,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            outlier_threshold: 0.5,
            confidence_level: 0.95,
            max_iterations: None,
        }
    }
}

/// Element symbol (lower case) -> atomic weight, g/mol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AtomicWeights(pub BTreeMap<String, f64>);

impl Default for AtomicWeights {
    fn default() -> Self {
        Self(BTreeMap::from([
            ("c".to_string(), 12.011),
            ("h".to_string(), 1.008),
            ("o".to_string(), 15.999),
            ("n".to_string(), 14.007),
        ]))
    }
}

impl AtomicWeights {
    pub fn get(&self, element: &str) -> Option<f64> {
        self.0.get(&element.to_lowercase()).copied()
    }

    pub fn elements(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.0.iter()
    }
}

/// Column names of the instrument blob table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakTableSchema {
    pub name_column: String,
    pub volume_column: String,
    pub inclusion_column: String,
}

impl Default for PeakTableSchema {
    fn default() -> Self {
        Self {
            name_column: "compound name".to_string(),
            volume_column: "volume".to_string(),
            inclusion_column: "inclusion".to_string(),
        }
    }
}

/// Everything needed to run a batch of experiments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub database_file: String,
    pub experiments_file: String,
    pub blob_directory: String,
    pub blob_file_suffix: String,
    pub output_directory: String,
    pub reference_compound: String,
    /// when set, yields are computed against this external calibration
    pub calibration_file: Option<String>,
    pub is_concentration: Option<f64>,
    pub extra_columns: Vec<String>,
    pub exclude: Vec<String>,
    pub grouping: Option<String>,
    pub mw_ranges: Vec<f64>,
    pub log_level: String,
    pub response_factors: ResponseFactorModel,
    pub calibration: CalibrationSettings,
    pub atomic_weights: AtomicWeights,
    pub peak_table: PeakTableSchema,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database_file: "database.csv".to_string(),
            experiments_file: "experimental_matrix.csv".to_string(),
            blob_directory: ".".to_string(),
            blob_file_suffix: ".cdf_img01_Blob_Table.csv".to_string(),
            output_directory: "results".to_string(),
            reference_compound: "fluoranthene".to_string(),
            calibration_file: None,
            is_concentration: None,
            extra_columns: vec!["c".into(), "h".into(), "o".into(), "n".into()],
            exclude: Vec::new(),
            grouping: None,
            mw_ranges: Vec::new(),
            log_level: "info".to_string(),
            response_factors: ResponseFactorModel::default(),
            calibration: CalibrationSettings::default(),
            atomic_weights: AtomicWeights::default(),
            peak_table: PeakTableSchema::default(),
        }
    }
}

impl PipelineConfig {
    /// Reads the configuration; a missing file yields the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> PyroResult<Self> {
        let path = path.as_ref();
        if path.exists() {
            let config: PipelineConfig = read_json(path)?;
            info!("configuration loaded from {}", path.display());
            Ok(config)
        } else {
            info!("{} not found, using default configuration", path.display());
            Ok(PipelineConfig::default())
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> PyroResult<()> {
        write_json(self, path)
    }

    /// columns copied from the database onto every matched peak
    pub fn matched_columns(&self) -> Vec<String> {
        let mut columns = self.extra_columns.clone();
        if let Some(grouping) = &self.grouping {
            if !columns.contains(grouping) {
                columns.push(grouping.clone());
            }
        }
        columns
    }

    pub fn log_level(&self) -> log::LevelFilter {
        self.log_level
            .parse::<log::LevelFilter>()
            .unwrap_or(log::LevelFilter::Info)
    }
}
