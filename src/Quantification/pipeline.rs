//! # Batch processing
//!
//! ## Aim
//! Runs the whole chain for every experiment of the experimental matrix:
//! peak table -> database match -> yields -> summary -> files on disk.
//!
//! ## Logic
//! A [`QuantificationSession`] owns the reference database, the experiment
//! table and (optionally) an external calibration, all loaded once from the
//! [`PipelineConfig`]. Each experiment is then independent: its peak file
//! `<id><blob_file_suffix>` is looked up in the blob directory ignoring case,
//! and a failure for one experiment (missing file, reference compound not
//! found, ...) is logged and recorded in its [`ExperimentOutcome`] without
//! stopping the batch.
//!
//! ## Output
//! For experiment `id` the output directory receives `id.results.csv` (one row
//! per quantified compound) and `id.totals.json` (see the summary module).
//!
//! ## Usage
//! ```rust, ignore
//! let config = PipelineConfig::load("pyroquant.json")?;
//! let session = QuantificationSession::from_config(config)?;
//! let report = session.run()?;
//! report.pretty_print();
//! ```
use super::calibration::CalibrationModel;
use super::experiments::{CharYield, ExperimentRecord, ExperimentTable};
use super::peak_table::PeakTable;
use super::summary::{
    MwRangeYield, YieldComparison, YieldSummary, compare_yields, summarize, yields_by_mw_range,
};
use super::yields::{YieldTable, compute_yields, compute_yields_calibration};
use crate::Compounds::reference_db::ReferenceDatabase;
use crate::Utils::load_from_file::{
    find_file_case_insensitive, load_database_csv, read_csv_table, write_csv_table,
};
use crate::Utils::table::normalize_key;
use crate::errors::{PyroError, PyroResult};
use crate::settings::PipelineConfig;
use log::{debug, error, info};
use prettytable::{Cell, Row, Table};
use std::fs;
use std::path::{Path, PathBuf};

/// Everything produced for one experiment.
#[derive(Debug)]
pub struct ProcessedExperiment {
    pub yields: YieldTable,
    pub summary: YieldSummary,
    pub char_yield: Option<CharYield>,
    pub mw_ranges: Vec<MwRangeYield>,
    pub results_file: Option<PathBuf>,
    pub totals_file: Option<PathBuf>,
}

#[derive(Debug)]
pub struct ExperimentOutcome {
    pub experiment: String,
    pub result: PyroResult<ProcessedExperiment>,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<ExperimentOutcome>,
}

impl BatchReport {
    pub fn processed(&self) -> impl Iterator<Item = &ProcessedExperiment> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = (&str, &PyroError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.experiment.as_str(), e)))
    }

    /// yields of `compounds` in every processed experiment
    pub fn comparison(&self, compounds: &[&str]) -> YieldComparison {
        let tables: Vec<&YieldTable> = self.processed().map(|p| &p.yields).collect();
        compare_yields(&tables, compounds)
    }

    pub fn pretty_print(&self) {
        let mut table = Table::new();
        table.add_row(Row::new(vec![
            Cell::new("experiment"),
            Cell::new("compounds"),
            Cell::new("total FID, %"),
            Cell::new("char, %"),
            Cell::new("status"),
        ]));
        for outcome in &self.outcomes {
            let row = match &outcome.result {
                Ok(p) => vec![
                    Cell::new(&outcome.experiment),
                    Cell::new(&p.yields.rows.len().to_string()),
                    Cell::new(&format!("{:.3}", p.summary.total_fid)),
                    Cell::new(
                        &p.char_yield
                            .map(|c| format!("{:.3}", c.percent))
                            .unwrap_or_default(),
                    ),
                    Cell::new("ok"),
                ],
                Err(e) => vec![
                    Cell::new(&outcome.experiment),
                    Cell::new(""),
                    Cell::new(""),
                    Cell::new(""),
                    Cell::new(&e.to_string()),
                ],
            };
            table.add_row(Row::new(row));
        }
        table.printstd();
    }
}

pub struct QuantificationSession {
    pub config: PipelineConfig,
    pub database: ReferenceDatabase,
    pub experiments: ExperimentTable,
    pub calibration: Option<CalibrationModel>,
}

impl QuantificationSession {
    pub fn new(
        config: PipelineConfig,
        database: ReferenceDatabase,
        mut experiments: ExperimentTable,
        calibration: Option<CalibrationModel>,
    ) -> Self {
        if let Some(concentration) = config.is_concentration {
            experiments.compute_is_amount(concentration);
        }
        Self {
            config,
            database,
            experiments,
            calibration,
        }
    }

    /// Loads the database, the experimental matrix and the calibration named
    /// in the configuration.
    pub fn from_config(config: PipelineConfig) -> PyroResult<Self> {
        let database = load_database_csv(&config.database_file, &config.response_factors)?;
        let calibration = match &config.calibration_file {
            Some(file) => {
                let model = CalibrationModel::load(file)?;
                info!("external calibration {}: slope {}", file, model.slope);
                Some(model)
            }
            None => None,
        };
        let experiments = ExperimentTable::from_table(
            &read_csv_table(&config.experiments_file)?,
            calibration.is_none(),
        )?;
        Ok(Self::new(config, database, experiments, calibration))
    }

    pub fn peak_file_name(&self, experiment: &str) -> String {
        format!("{}{}", experiment, self.config.blob_file_suffix)
    }

    pub fn load_peaks(&self, experiment: &str) -> PyroResult<PeakTable> {
        let file_name = self.peak_file_name(experiment);
        let path = find_file_case_insensitive(&self.config.blob_directory, &file_name)?
            .ok_or_else(|| PyroError::PeakFileNotFound {
                experiment: experiment.to_string(),
                file_name,
            })?;
        debug!("peak table of {}: {}", experiment, path.display());
        PeakTable::from_table(&read_csv_table(&path)?, &self.config.peak_table)
    }

    /// Match, quantify and summarise one experiment in memory.
    pub fn process_experiment(
        &self,
        experiment: &ExperimentRecord,
        mut peaks: PeakTable,
    ) -> PyroResult<ProcessedExperiment> {
        peaks.match_database(&self.database, &self.config.matched_columns());
        let reference = self.config.reference_compound.as_str();
        let yields = match &self.calibration {
            Some(model) => compute_yields_calibration(
                experiment,
                &peaks,
                reference,
                model,
                &self.config.exclude,
            )?,
            None => {
                let mut exclude = vec![reference.to_string()];
                for name in &self.config.exclude {
                    // the standard may be listed in `exclude` too
                    if !exclude.iter().any(|e| normalize_key(e) == normalize_key(name)) {
                        exclude.push(name.clone());
                    }
                }
                compute_yields(experiment, &peaks, reference, None, &exclude)?
            }
        };
        let char_yield = match experiment.char_yield(self.experiments.used_is) {
            Ok(c) => Some(c),
            Err(e) => {
                debug!("no char yield for {}: {}", experiment.id, e);
                None
            }
        };
        let mut summary = summarize(
            &yields,
            self.config.grouping.as_deref(),
            &self.config.atomic_weights,
        );
        if let Some(c) = char_yield {
            summary = summary.with_char_yield(c.percent);
        }
        let mw_ranges = yields_by_mw_range(&yields, &self.config.mw_ranges);
        Ok(ProcessedExperiment {
            yields,
            summary,
            char_yield,
            mw_ranges,
            results_file: None,
            totals_file: None,
        })
    }

    fn process_and_save(
        &self,
        experiment: &ExperimentRecord,
        output_directory: &Path,
    ) -> PyroResult<ProcessedExperiment> {
        let peaks = self.load_peaks(&experiment.id)?;
        let mut processed = self.process_experiment(experiment, peaks)?;
        let results_file = output_directory.join(format!("{}.results.csv", experiment.id));
        write_csv_table(&processed.yields.to_table(), &results_file)?;
        let totals_file = output_directory.join(format!("{}.totals.json", experiment.id));
        processed.summary.save(&totals_file)?;
        processed.results_file = Some(results_file);
        processed.totals_file = Some(totals_file);
        Ok(processed)
    }

    /// Processes every experiment; only a failure to create the output
    /// directory stops the batch.
    pub fn run(&self) -> PyroResult<BatchReport> {
        let output_directory = PathBuf::from(&self.config.output_directory);
        fs::create_dir_all(&output_directory)?;
        let mut report = BatchReport::default();
        for experiment in &self.experiments.records {
            info!("processing {}", experiment.id);
            let result = self.process_and_save(experiment, &output_directory);
            if let Err(e) = &result {
                error!("{} skipped: {}", experiment.id, e);
            }
            report.outcomes.push(ExperimentOutcome {
                experiment: experiment.id.clone(),
                result,
            });
        }
        info!(
            "batch done: {} processed, {} failed",
            report.processed().count(),
            report.failed().count()
        );
        Ok(report)
    }
}
