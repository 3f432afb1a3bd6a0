//! # External calibration
//!
//! ## Aim
//! Fits `volume = slope · mass` (least squares through the origin) to a set of
//! calibration runs, dropping outliers until none are left, and persists the
//! slope with its confidence interval so later runs can turn a measured
//! reference volume back into a mass.
//!
//! ## Logic
//! The builder is a two-state machine: every [`CalibrationBuilder::step`]
//! either reports `Fitting` with a larger exclusion set or `Converged` with
//! the final fit. [`CalibrationBuilder::fit`] drives the steps; exclusions
//! accumulate, so the number of steps is bounded by the dataset size.
//!
//! Outliers are found with externally studentized residuals, two-sided
//! Student t p-values with `n - 2` degrees of freedom and a Bonferroni
//! correction; a point whose corrected p-value is below the threshold (0.5 by
//! default) is an outlier. Points are identified by their mass, so repeated
//! masses are excluded together.
//!
//! ## Persistence
//! ```json
//! {
//!   "conf_interval": [2.998, 3.002],
//!   "slope": 3.0002
//! }
//! ```
use crate::Utils::load_from_file::{read_json, write_json};
use crate::Utils::table::{RawTable, normalize_key};
use crate::errors::{Diagnostic, Diagnostics, PyroError, PyroResult};
use crate::settings::CalibrationSettings;
use log::{debug, info, warn};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};
use std::path::Path;

const SOURCE: &str = "calibration table";

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationPoint {
    pub label: String,
    /// mg
    pub mass: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationDataset {
    pub points: Vec<CalibrationPoint>,
    pub diagnostics: Diagnostics,
}

impl CalibrationDataset {
    pub fn from_pairs(pairs: &[(f64, f64)]) -> Self {
        let points = pairs
            .iter()
            .enumerate()
            .map(|(i, &(mass, volume))| CalibrationPoint {
                label: format!("#{}", i + 1),
                mass,
                volume,
            })
            .collect();
        Self {
            points,
            diagnostics: Diagnostics::new(),
        }
    }

    /// Reads labelled runs (first column) with `sample` and `volume` columns.
    /// Runs without a volume are removed and reported.
    pub fn from_table(table: &RawTable) -> PyroResult<Self> {
        let mut table = table.clone();
        for header in table.headers.iter_mut() {
            *header = normalize_key(&header.to_lowercase().replace("(mg)", ""));
        }
        let mass_col = table
            .column_index("sample")
            .ok_or_else(|| PyroError::malformed(SOURCE, "sample"))?;
        let volume_col = table
            .column_index("volume")
            .ok_or_else(|| PyroError::malformed(SOURCE, "volume"))?;

        let mut dataset = CalibrationDataset::default();
        for row in 0..table.len() {
            let label = table
                .cell(row, 0)
                .map(normalize_key)
                .unwrap_or_else(|| format!("#{}", row + 1));
            match (table.cell_f64(row, mass_col), table.cell_f64(row, volume_col)) {
                (Some(mass), Some(volume)) => dataset.points.push(CalibrationPoint {
                    label,
                    mass,
                    volume,
                }),
                _ => dataset
                    .diagnostics
                    .push(Diagnostic::IncompleteCalibrationPoint(label)),
            }
        }
        info!(
            "calibration dataset: {} points, {} incomplete removed",
            dataset.points.len(),
            dataset.diagnostics.len()
        );
        Ok(dataset)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Persisted result of a calibration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationModel {
    pub conf_interval: [f64; 2],
    pub slope: f64,
}

impl CalibrationModel {
    pub fn new(slope: f64, conf_interval: [f64; 2]) -> Self {
        Self {
            conf_interval,
            slope,
        }
    }

    /// mass (mg) producing `volume`; `None` when the slope cannot be inverted
    pub fn mass_from_volume(&self, volume: f64) -> Option<f64> {
        if self.slope.is_finite() && self.slope != 0.0 {
            Some(volume / self.slope)
        } else {
            None
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> PyroResult<()> {
        write_json(self, path.as_ref())?;
        info!("calibration saved to {}", path.as_ref().display());
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> PyroResult<Self> {
        read_json(path)
    }
}

/// State of one refit.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationIteration {
    pub excluded: Vec<f64>,
    pub n_points: usize,
    pub slope: f64,
    pub r_squared: f64,
    pub outliers: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationFit {
    pub model: CalibrationModel,
    pub standard_error: f64,
    /// uncentered, as for a model without intercept
    pub r_squared: f64,
    pub n_points: usize,
    /// masses removed, user exclusions included
    pub excluded: Vec<f64>,
    pub iterations: Vec<CalibrationIteration>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationState {
    Fitting { excluded: Vec<f64> },
    Converged(CalibrationFit),
}

/// least squares through the origin over the given points
struct OriginFit {
    slope: f64,
    residuals: DVector<f64>,
    sxx: f64,
    sse: f64,
    syy: f64,
    masses: Vec<f64>,
}

impl OriginFit {
    fn new(points: &[&CalibrationPoint]) -> Self {
        let x = DVector::from_iterator(points.len(), points.iter().map(|p| p.mass));
        let y = DVector::from_iterator(points.len(), points.iter().map(|p| p.volume));
        let sxx = x.dot(&x);
        let slope = x.dot(&y) / sxx;
        let residuals = &y - &x * slope;
        Self {
            slope,
            sse: residuals.dot(&residuals),
            syy: y.dot(&y),
            residuals,
            sxx,
            masses: x.iter().copied().collect(),
        }
    }

    fn n(&self) -> usize {
        self.masses.len()
    }

    fn df_resid(&self) -> usize {
        self.n() - 1
    }

    fn r_squared(&self) -> f64 {
        1.0 - self.sse / self.syy
    }

    fn perfect(&self) -> bool {
        self.sse <= 1e-24 * self.syy
    }

    /// Bonferroni-corrected p-values of the externally studentized residuals;
    /// `None` when there are too few points to test.
    fn outlier_p_values(&self) -> PyroResult<Option<Vec<f64>>> {
        let n = self.n();
        if n < 3 || self.perfect() {
            return Ok(None);
        }
        let dof = (self.df_resid() - 1) as f64;
        let t_dist =
            StudentsT::new(0.0, 1.0, dof).map_err(|e| PyroError::Statistics(e.to_string()))?;
        let mut p_values = Vec::with_capacity(n);
        for (i, &mass) in self.masses.iter().enumerate() {
            let e = self.residuals[i];
            let leverage = mass * mass / self.sxx;
            let p = if 1.0 - leverage <= f64::EPSILON {
                1.0
            } else {
                let s2 = (self.sse - e * e / (1.0 - leverage)) / dof;
                if s2 <= 0.0 {
                    // every other point sits on the line
                    if e.abs() > 0.0 { 0.0 } else { 1.0 }
                } else {
                    let t = e / (s2 * (1.0 - leverage)).sqrt();
                    2.0 * t_dist.sf(t.abs())
                }
            };
            p_values.push((p * n as f64).min(1.0));
        }
        Ok(Some(p_values))
    }

    fn standard_error(&self) -> f64 {
        (self.sse / self.df_resid() as f64 / self.sxx).sqrt()
    }

    fn confidence_interval(&self, level: f64) -> PyroResult<[f64; 2]> {
        let t_dist = StudentsT::new(0.0, 1.0, self.df_resid() as f64)
            .map_err(|e| PyroError::Statistics(e.to_string()))?;
        let half_width = t_dist.inverse_cdf(1.0 - (1.0 - level) / 2.0) * self.standard_error();
        Ok([self.slope - half_width, self.slope + half_width])
    }
}

#[derive(Debug, Clone, Default)]
pub struct CalibrationBuilder {
    pub settings: CalibrationSettings,
}

impl CalibrationBuilder {
    pub fn new(settings: CalibrationSettings) -> Self {
        Self { settings }
    }

    /// One refit with the current exclusions.
    pub fn step(
        &self,
        dataset: &CalibrationDataset,
        excluded: &[f64],
    ) -> PyroResult<(CalibrationState, CalibrationIteration)> {
        let points: Vec<&CalibrationPoint> = dataset
            .points
            .iter()
            .filter(|p| !excluded.contains(&p.mass))
            .collect();
        if points.len() < 2 || points.iter().all(|p| p.mass == 0.0) {
            return Err(PyroError::InsufficientCalibrationData {
                remaining: points.len(),
            });
        }
        let fit = OriginFit::new(&points);
        let outliers: Vec<f64> = match fit.outlier_p_values()? {
            Some(p_values) => fit
                .masses
                .iter()
                .zip(p_values)
                .filter(|(_, p)| *p < self.settings.outlier_threshold)
                .map(|(mass, _)| *mass)
                .collect(),
            None => Vec::new(),
        };
        let iteration = CalibrationIteration {
            excluded: excluded.to_vec(),
            n_points: fit.n(),
            slope: fit.slope,
            r_squared: fit.r_squared(),
            outliers: outliers.clone(),
        };
        debug!(
            "calibration step: {} points, slope {}, R2 {}, outliers at x = {:?}",
            iteration.n_points, iteration.slope, iteration.r_squared, outliers
        );
        if outliers.is_empty() {
            let model = CalibrationModel::new(
                fit.slope,
                fit.confidence_interval(self.settings.confidence_level)?,
            );
            let converged = CalibrationFit {
                model,
                standard_error: fit.standard_error(),
                r_squared: fit.r_squared(),
                n_points: fit.n(),
                excluded: excluded.to_vec(),
                iterations: Vec::new(),
            };
            Ok((CalibrationState::Converged(converged), iteration))
        } else {
            let mut next = excluded.to_vec();
            next.extend(outliers);
            Ok((CalibrationState::Fitting { excluded: next }, iteration))
        }
    }

    /// Refits until no outlier is left. `excluded_masses` are removed up front.
    pub fn fit(
        &self,
        dataset: &CalibrationDataset,
        excluded_masses: &[f64],
    ) -> PyroResult<CalibrationFit> {
        let max_iterations = self
            .settings
            .max_iterations
            .unwrap_or(dataset.len() + 1)
            .max(1);
        let mut excluded = excluded_masses.to_vec();
        let mut iterations = Vec::new();
        loop {
            let (state, iteration) = self.step(dataset, &excluded)?;
            iterations.push(iteration);
            match state {
                CalibrationState::Converged(mut fit) => {
                    fit.iterations = iterations;
                    info!(
                        "calibration converged: slope {:.5}, CI [{:.5}, {:.5}], R2 {:.6}, \
                         excluded x = {:?}",
                        fit.model.slope,
                        fit.model.conf_interval[0],
                        fit.model.conf_interval[1],
                        fit.r_squared,
                        fit.excluded
                    );
                    return Ok(fit);
                }
                CalibrationState::Fitting { excluded: next } => {
                    excluded = next;
                    if iterations.len() >= max_iterations {
                        warn!(
                            "calibration stopped after {} refits with outliers left",
                            iterations.len()
                        );
                        return self.fit_without_rejection(dataset, &excluded, iterations);
                    }
                }
            }
        }
    }

    fn fit_without_rejection(
        &self,
        dataset: &CalibrationDataset,
        excluded: &[f64],
        mut iterations: Vec<CalibrationIteration>,
    ) -> PyroResult<CalibrationFit> {
        let points: Vec<&CalibrationPoint> = dataset
            .points
            .iter()
            .filter(|p| !excluded.contains(&p.mass))
            .collect();
        if points.len() < 2 {
            return Err(PyroError::InsufficientCalibrationData {
                remaining: points.len(),
            });
        }
        let fit = OriginFit::new(&points);
        iterations.push(CalibrationIteration {
            excluded: excluded.to_vec(),
            n_points: fit.n(),
            slope: fit.slope,
            r_squared: fit.r_squared(),
            outliers: Vec::new(),
        });
        Ok(CalibrationFit {
            model: CalibrationModel::new(
                fit.slope,
                fit.confidence_interval(self.settings.confidence_level)?,
            ),
            standard_error: fit.standard_error(),
            r_squared: fit.r_squared(),
            n_points: fit.n(),
            excluded: excluded.to_vec(),
            iterations,
        })
    }

    /// Fits and writes the model; nothing is written when the fit fails.
    pub fn fit_and_save<P: AsRef<Path>>(
        &self,
        dataset: &CalibrationDataset,
        excluded_masses: &[f64],
        to_file: P,
    ) -> PyroResult<CalibrationFit> {
        let fit = self.fit(dataset, excluded_masses)?;
        fit.model.save(to_file)?;
        Ok(fit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::fs;

    fn noisy_with_outlier() -> CalibrationDataset {
        let noise = [0.02, -0.01, 0.015, -0.02, 0.01, -0.015, 0.02, -0.01, 0.005, -0.005];
        let mut pairs: Vec<(f64, f64)> = noise
            .iter()
            .enumerate()
            .map(|(i, e)| {
                let mass = (i + 1) as f64;
                (mass, 3.0 * mass + e)
            })
            .collect();
        pairs[5] = (6.0, 22.0);
        CalibrationDataset::from_pairs(&pairs)
    }

    #[test]
    fn test_outlier_is_removed_and_slope_recovered() {
        let builder = CalibrationBuilder::default();
        let fit = builder.fit(&noisy_with_outlier(), &[]).unwrap();
        assert_eq!(fit.excluded, vec![6.0]);
        assert_eq!(fit.n_points, 9);
        assert_eq!(fit.iterations.len(), 2);
        assert_eq!(fit.iterations[0].outliers, vec![6.0]);
        assert!(fit.iterations[1].outliers.is_empty());
        assert_relative_eq!(fit.model.slope, 3.0, epsilon = 1e-2);
        let [low, high] = fit.model.conf_interval;
        assert!(low < fit.model.slope && fit.model.slope < high);
        assert!(low < 3.0 && 3.0 < high);
        assert_relative_eq!(low, 2.99837, epsilon = 1e-4);
        assert_relative_eq!(high, 3.00203, epsilon = 1e-4);
        assert!(fit.r_squared > 0.9999);
    }

    #[test]
    fn test_first_step_reports_fitting() {
        let builder = CalibrationBuilder::default();
        let (state, iteration) = builder.step(&noisy_with_outlier(), &[]).unwrap();
        assert_eq!(iteration.n_points, 10);
        assert_eq!(state, CalibrationState::Fitting { excluded: vec![6.0] });
    }

    #[test]
    fn test_exact_line_converges_immediately() {
        let dataset = CalibrationDataset::from_pairs(&[(1.0, 2.5), (2.0, 5.0), (4.0, 10.0)]);
        let fit = CalibrationBuilder::default().fit(&dataset, &[]).unwrap();
        assert_relative_eq!(fit.model.slope, 2.5, epsilon = 1e-12);
        assert!(fit.excluded.is_empty());
        assert_eq!(fit.iterations.len(), 1);
    }

    #[test]
    fn test_user_exclusions() {
        let dataset = noisy_with_outlier();
        let fit = CalibrationBuilder::default().fit(&dataset, &[6.0]).unwrap();
        assert_eq!(fit.iterations.len(), 1);
        assert_eq!(fit.excluded, vec![6.0]);
    }

    #[test]
    fn test_insufficient_data() {
        let builder = CalibrationBuilder::default();
        let one = CalibrationDataset::from_pairs(&[(1.0, 3.0)]);
        assert!(matches!(
            builder.fit(&one, &[]),
            Err(PyroError::InsufficientCalibrationData { remaining: 1 })
        ));
        let two = CalibrationDataset::from_pairs(&[(1.0, 3.0), (2.0, 6.1)]);
        assert!(matches!(
            builder.fit(&two, &[2.0]),
            Err(PyroError::InsufficientCalibrationData { remaining: 1 })
        ));
    }

    #[test]
    fn test_two_points_fit_without_outlier_test() {
        let dataset = CalibrationDataset::from_pairs(&[(1.0, 3.1), (2.0, 5.9)]);
        let fit = CalibrationBuilder::default().fit(&dataset, &[]).unwrap();
        assert_relative_eq!(fit.model.slope, (3.1 + 2.0 * 5.9) / 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_from_table_drops_incomplete() {
        let table = RawTable::from_rows(
            &["Filename", "Sample (mg)", "Volume"],
            &[&["cal_1", "1.0", "3.0"], &["cal_2", "2.0", ""], &["cal_3", "3.0", "9.1"]],
        );
        let dataset = CalibrationDataset::from_table(&table).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(
            dataset.diagnostics.entries,
            vec![Diagnostic::IncompleteCalibrationPoint("cal_2".to_string())]
        );
    }

    #[test]
    fn test_model_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        let fit = CalibrationBuilder::default()
            .fit_and_save(&noisy_with_outlier(), &[], &path)
            .unwrap();
        let loaded = CalibrationModel::load(&path).unwrap();
        assert_eq!(loaded, fit.model);
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(json["slope"].is_number());
        assert_eq!(json["conf_interval"].as_array().map(|a| a.len()), Some(2));
    }

    #[test]
    fn test_nothing_saved_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        let dataset = CalibrationDataset::from_pairs(&[(1.0, 3.0)]);
        assert!(CalibrationBuilder::default().fit_and_save(&dataset, &[], &path).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_mass_from_volume() {
        let model = CalibrationModel::new(4.0, [3.9, 4.1]);
        assert_eq!(model.mass_from_volume(10.0), Some(2.5));
        assert_eq!(CalibrationModel::new(0.0, [0.0, 0.0]).mass_from_volume(1.0), None);
    }
}
