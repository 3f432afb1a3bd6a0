//! # Yield computation
//!
//! ## Aim
//! Converts the volumes of a matched peak table into moles, mass and mass
//! yield (percent of the sample) relative to a reference compound whose
//! amount is known.
//!
//! ## Logic
//! 1. split peaks of one compound are merged (volumes summed)
//! 2. the reference mass comes from the experiment record (internal standard)
//!    or from its volume through an external calibration, `mass = volume / slope`;
//!    reference moles = `(mass_mg / 1000) / mw`
//! 3. excluded compounds are removed; a name that is not there is only reported
//! 4. for every remaining compound
//!    - moles ECN = `V · n_ref / V_ref · ECN_ref / ECN`
//!    - moles MRF = `V · n_ref / V_ref · MRF_ref / MRF`
//!    - mass MRF (mg) = `moles MRF · MW · 1000`
//!    - yield MRF (%) = `mass MRF / sample · 100`
//!
//! A compound without usable ECN, MRF or MW is not silently turned into NaN:
//! it ends up in [`YieldTable::failures`] and the caller chooses between
//! [`YieldTable::strict`] and reporting the failures. Problems with the
//! reference compound itself are fatal for the whole experiment.
use super::calibration::CalibrationModel;
use super::experiments::ExperimentRecord;
use super::peak_table::{PeakRecord, PeakTable};
use crate::Compounds::reference_db::AttributeValue;
use crate::Utils::table::{RawTable, normalize_key};
use crate::errors::{Diagnostic, Diagnostics, PyroError, PyroResult};
use log::{debug, info, warn};
use prettytable::{Cell, Row, Table};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Amount of the reference compound in the analysed sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceQuantity {
    pub compound: String,
    /// mg
    pub mass: f64,
    pub moles: f64,
    pub volume: f64,
    pub mw: f64,
    pub ecn: f64,
    pub mrf: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YieldRow {
    pub compound: String,
    pub volume: f64,
    pub mw: f64,
    pub ecn: f64,
    pub mrf: f64,
    pub extra: BTreeMap<String, AttributeValue>,
    pub moles_ecn: f64,
    pub moles_mrf: f64,
    /// mg
    pub mass_mrf: f64,
    /// percent of the sample mass
    pub yield_mrf: f64,
}

/// A compound that could not be quantified.
#[derive(Debug)]
pub struct RowFailure {
    pub compound: String,
    pub error: PyroError,
}

#[derive(Debug)]
pub struct YieldTable {
    pub experiment: String,
    pub sample_mass: f64,
    pub reference: ReferenceQuantity,
    pub rows: Vec<YieldRow>,
    pub failures: Vec<RowFailure>,
    pub diagnostics: Diagnostics,
}

fn positive(value: Option<f64>, compound: &str, what: &str) -> PyroResult<f64> {
    match value {
        Some(v) if v.is_finite() && v > 0.0 => Ok(v),
        Some(v) => Err(PyroError::quantification(
            compound,
            format!("{} is {}, expected a positive number", what, v),
        )),
        None => Err(PyroError::quantification(
            compound,
            format!("{} is undefined (compound not matched?)", what),
        )),
    }
}

/// Response factors only have to be usable as divisors: the empirical MRF
/// model gives small oxygenates (CO, formic acid) a negative value.
fn nonzero(value: Option<f64>, compound: &str, what: &str) -> PyroResult<f64> {
    match value {
        Some(v) if v.is_finite() && v != 0.0 => Ok(v),
        Some(v) => Err(PyroError::quantification(
            compound,
            format!("{} is {}, cannot divide by it", what, v),
        )),
        None => Err(PyroError::quantification(
            compound,
            format!("{} is undefined (compound not matched?)", what),
        )),
    }
}

fn resolve_reference(
    experiment: &ExperimentRecord,
    peaks: &PeakTable,
    reference_name: &str,
    calibration: Option<&CalibrationModel>,
) -> PyroResult<ReferenceQuantity> {
    let reference = peaks
        .get(reference_name)
        .ok_or_else(|| PyroError::ReferenceCompoundNotFound(normalize_key(reference_name)))?;
    let compound = reference.compound.as_str();
    let volume = positive(Some(reference.volume), compound, "reference volume")?;
    let mw = positive(reference.mw, compound, "molecular weight")?;
    let ecn = nonzero(reference.ecn, compound, "ECN")?;
    let mrf = nonzero(reference.mrf, compound, "MRF")?;
    let mass = match calibration {
        Some(model) => model.mass_from_volume(volume).ok_or_else(|| {
            PyroError::quantification(
                compound,
                format!("calibration slope {} unusable", model.slope),
            )
        })?,
        None => experiment.internal_standard_amount()?,
    };
    let moles = (mass / 1000.0) / mw;
    debug!("reference {}: {} mg, {} mol", compound, mass, moles);
    Ok(ReferenceQuantity {
        compound: compound.to_string(),
        mass,
        moles,
        volume,
        mw,
        ecn,
        mrf,
    })
}

fn quantify_row(
    row: &PeakRecord,
    reference: &ReferenceQuantity,
    sample_mass: f64,
) -> PyroResult<YieldRow> {
    let compound = row.compound.as_str();
    let ecn = nonzero(row.ecn, compound, "ECN")?;
    let mrf = nonzero(row.mrf, compound, "MRF")?;
    let mw = positive(row.mw, compound, "molecular weight")?;
    let relative = row.volume * reference.moles / reference.volume;
    let moles_ecn = relative * reference.ecn / ecn;
    let moles_mrf = relative * reference.mrf / mrf;
    let mass_mrf = moles_mrf * mw * 1000.0;
    Ok(YieldRow {
        compound: compound.to_string(),
        volume: row.volume,
        mw,
        ecn,
        mrf,
        extra: row.extra.clone(),
        moles_ecn,
        moles_mrf,
        mass_mrf,
        yield_mrf: mass_mrf / sample_mass * 100.0,
    })
}

/// Generic yield routine behind the internal-standard and calibration entry points.
pub fn compute_yields(
    experiment: &ExperimentRecord,
    peaks: &PeakTable,
    reference_name: &str,
    calibration: Option<&CalibrationModel>,
    compounds_to_exclude: &[String],
) -> PyroResult<YieldTable> {
    if !(experiment.sample_mass.is_finite() && experiment.sample_mass > 0.0) {
        return Err(PyroError::MissingField {
            record: format!("experiment '{}'", experiment.id),
            field: "sample".to_string(),
        });
    }
    // duplicates first, so split reference peaks add up as well
    let mut working = peaks.aggregate_duplicates();
    let reference = resolve_reference(experiment, &working, reference_name, calibration)?;

    // unmatched compounds and dropped peak rows travel with the results
    let mut diagnostics = working.diagnostics.clone();
    for name in compounds_to_exclude {
        if !working.remove(name) {
            diagnostics.push(Diagnostic::ExclusionAbsent(normalize_key(name)));
        }
    }

    let mut rows = Vec::with_capacity(working.len());
    let mut failures = Vec::new();
    for record in &working.records {
        match quantify_row(record, &reference, experiment.sample_mass) {
            Ok(row) => rows.push(row),
            Err(error) => {
                warn!("{}", error);
                failures.push(RowFailure {
                    compound: record.compound.clone(),
                    error,
                });
            }
        }
    }
    let table = YieldTable {
        experiment: experiment.id.clone(),
        sample_mass: experiment.sample_mass,
        reference,
        rows,
        failures,
        diagnostics,
    };
    info!(
        "{}: {} compounds quantified, {} failed, total yield {:.3} %",
        table.experiment,
        table.rows.len(),
        table.failures.len(),
        table.total_yield()
    );
    Ok(table)
}

/// Quantification against an internal standard weighed into the sample.
/// The standard itself is removed from the results.
pub fn compute_yields_is(
    experiment: &ExperimentRecord,
    peaks: &PeakTable,
    internal_standard_name: &str,
) -> PyroResult<YieldTable> {
    compute_yields(
        experiment,
        peaks,
        internal_standard_name,
        None,
        &[internal_standard_name.to_string()],
    )
}

/// Quantification against an external calibration of the reference compound.
/// Only `compounds_to_exclude` are removed from the results.
pub fn compute_yields_calibration(
    experiment: &ExperimentRecord,
    peaks: &PeakTable,
    reference_name: &str,
    calibration: &CalibrationModel,
    compounds_to_exclude: &[String],
) -> PyroResult<YieldTable> {
    compute_yields(
        experiment,
        peaks,
        reference_name,
        Some(calibration),
        compounds_to_exclude,
    )
}

impl YieldTable {
    pub fn get(&self, compound: &str) -> Option<&YieldRow> {
        let compound = normalize_key(compound);
        self.rows.iter().find(|r| r.compound == compound)
    }

    pub fn total_yield(&self) -> f64 {
        self.rows.iter().map(|r| r.yield_mrf).sum()
    }

    /// turns the first row failure into an error
    pub fn strict(mut self) -> PyroResult<Self> {
        if self.failures.is_empty() {
            Ok(self)
        } else {
            Err(self.failures.remove(0).error)
        }
    }

    /// Result table, one row per compound, ready to be written out.
    pub fn to_table(&self) -> RawTable {
        let extra_columns: BTreeSet<&String> =
            self.rows.iter().flat_map(|r| r.extra.keys()).collect();
        let mut headers: Vec<String> = ["compound", "volume", "mw", "ecn", "mrf"]
            .iter()
            .map(|h| h.to_string())
            .collect();
        headers.extend(extra_columns.iter().map(|c| c.to_string()));
        headers.extend(
            ["moles ecn", "moles mrf", "mass mrf", "yield mrf"]
                .iter()
                .map(|h| h.to_string()),
        );
        let mut table = RawTable::new(headers);
        for r in &self.rows {
            let mut row = vec![
                r.compound.clone(),
                r.volume.to_string(),
                r.mw.to_string(),
                r.ecn.to_string(),
                r.mrf.to_string(),
            ];
            for column in &extra_columns {
                row.push(r.extra.get(*column).map(|v| v.to_string()).unwrap_or_default());
            }
            row.extend([
                r.moles_ecn.to_string(),
                r.moles_mrf.to_string(),
                r.mass_mrf.to_string(),
                r.yield_mrf.to_string(),
            ]);
            table.push_row(row);
        }
        table
    }

    pub fn pretty_print(&self) {
        let mut table = Table::new();
        table.add_row(Row::new(
            ["compound", "volume", "MW", "moles ECN", "moles MRF", "mass MRF, mg", "yield MRF, %"]
                .iter()
                .map(|h| Cell::new(h))
                .collect(),
        ));
        for r in &self.rows {
            table.add_row(Row::new(vec![
                Cell::new(&r.compound),
                Cell::new(&format!("{:.2}", r.volume)),
                Cell::new(&format!("{:.2}", r.mw)),
                Cell::new(&format!("{:.4e}", r.moles_ecn)),
                Cell::new(&format!("{:.4e}", r.moles_mrf)),
                Cell::new(&format!("{:.5}", r.mass_mrf)),
                Cell::new(&format!("{:.3}", r.yield_mrf)),
            ]));
        }
        println!(
            "experiment {} (sample {} mg, reference {} = {} mg)",
            self.experiment, self.sample_mass, self.reference.compound, self.reference.mass
        );
        table.printstd();
        for failure in &self.failures {
            println!("not quantified: {}", failure.error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn peaks() -> PeakTable {
        PeakTable::new(vec![
            PeakRecord::with_parameters("fluoranthene", 60.0, 202.25, 16.0, 1.5),
            PeakRecord::with_parameters("phenol", 30.0, 94.11, 6.0, 0.6),
            PeakRecord::with_parameters("fluoranthene", 40.0, 1.0, 1.0, 1.0),
            PeakRecord::new("unknown 3", 5.0),
        ])
    }

    #[test]
    fn test_internal_standard_entry_point() {
        let experiment = ExperimentRecord::new("run", 0.5).with_is_amount(0.01);
        let table = compute_yields_is(&experiment, &peaks(), "Fluoranthene").unwrap();

        // split reference peaks merged: 60 + 40
        assert_relative_eq!(table.reference.volume, 100.0);
        assert_relative_eq!(table.reference.mw, 202.25);
        assert!(table.get("fluoranthene").is_none());

        let n_ref = 0.01 / 1000.0 / 202.25;
        let phenol = table.get("phenol").unwrap();
        assert_relative_eq!(phenol.moles_ecn, 30.0 * n_ref / 100.0 * 16.0 / 6.0, epsilon = 1e-18);
        assert_relative_eq!(phenol.moles_mrf, 30.0 * n_ref / 100.0 * 1.5 / 0.6, epsilon = 1e-18);
        assert_relative_eq!(phenol.mass_mrf, phenol.moles_mrf * 94.11 * 1000.0, epsilon = 1e-15);
        assert_relative_eq!(phenol.yield_mrf, phenol.mass_mrf / 0.5 * 100.0, epsilon = 1e-12);

        assert_eq!(table.failures.len(), 1);
        assert_eq!(table.failures[0].compound, "unknown 3");
        assert!(matches!(table.strict(), Err(PyroError::Quantification { .. })));
    }

    #[test]
    fn test_reference_not_found_is_fatal() {
        let experiment = ExperimentRecord::new("run", 0.5).with_is_amount(0.01);
        let result = compute_yields_is(&experiment, &peaks(), "pyrene");
        assert!(matches!(
            result,
            Err(PyroError::ReferenceCompoundNotFound(name)) if name == "pyrene"
        ));
    }

    #[test]
    fn test_missing_internal_standard_amount() {
        let experiment = ExperimentRecord::new("run", 0.5);
        let result = compute_yields_is(&experiment, &peaks(), "fluoranthene");
        assert!(matches!(result, Err(PyroError::MissingField { .. })));
    }

    #[test]
    fn test_absent_exclusion_is_reported() {
        let experiment = ExperimentRecord::new("run", 0.5).with_is_amount(0.01);
        let exclude = vec!["fluoranthene".to_string(), "toluene".to_string()];
        let table = compute_yields(&experiment, &peaks(), "fluoranthene", None, &exclude).unwrap();
        assert_eq!(
            table.diagnostics.entries,
            vec![Diagnostic::ExclusionAbsent("toluene".to_string())]
        );
    }

    #[test]
    fn test_zero_response_factor_is_an_error() {
        let peaks = PeakTable::new(vec![
            PeakRecord::with_parameters("fluoranthene", 100.0, 202.25, 16.0, 1.5),
            PeakRecord::with_parameters("broken", 10.0, 50.0, 0.0, 0.5),
        ]);
        let experiment = ExperimentRecord::new("run", 0.5).with_is_amount(0.01);
        let table = compute_yields_is(&experiment, &peaks, "fluoranthene").unwrap();
        assert!(table.rows.is_empty());
        assert!(matches!(
            &table.failures[0].error,
            PyroError::Quantification { compound, .. } if compound == "broken"
        ));
    }

    #[test]
    fn test_negative_response_factor_is_quantified() {
        // carbon monoxide: the MRF correlation goes slightly below zero
        let peaks = PeakTable::new(vec![
            PeakRecord::with_parameters("fluoranthene", 100.0, 202.25, 16.0, 1.5),
            PeakRecord::with_parameters("carbon monoxide", 20.0, 28.01, 1.0, -0.0136),
        ]);
        let experiment = ExperimentRecord::new("run", 0.5).with_is_amount(0.01);
        let table = compute_yields_is(&experiment, &peaks, "fluoranthene").unwrap();
        assert!(table.failures.is_empty());
        let co = table.get("carbon monoxide").unwrap();
        let n_ref = 0.01 / 1000.0 / 202.25;
        assert_relative_eq!(co.mrf, -0.0136);
        assert_relative_eq!(
            co.moles_mrf,
            20.0 * n_ref / 100.0 * 1.5 / -0.0136,
            epsilon = 1e-18
        );
        assert!(co.yield_mrf < 0.0);
    }

    #[test]
    fn test_peak_table_diagnostics_are_carried() {
        let mut peaks = peaks();
        peaks
            .diagnostics
            .push(Diagnostic::UnmatchedCompound("unknown 3".to_string()));
        let experiment = ExperimentRecord::new("run", 0.5).with_is_amount(0.01);
        let table = compute_yields_is(&experiment, &peaks, "fluoranthene").unwrap();
        assert_eq!(table.diagnostics.unmatched(), vec!["unknown 3"]);
    }

    #[test]
    fn test_to_table_columns() {
        let experiment = ExperimentRecord::new("run", 0.5).with_is_amount(0.01);
        let mut peaks = peaks();
        peaks.records[1]
            .extra
            .insert("group".to_string(), AttributeValue::Text("phenolics".to_string()));
        let table = compute_yields_is(&experiment, &peaks, "fluoranthene").unwrap();
        let raw = table.to_table();
        assert_eq!(raw.headers[0], "compound");
        assert_eq!(raw.headers.last().map(|s| s.as_str()), Some("yield mrf"));
        let group_col = raw.column_index("group").unwrap();
        assert_eq!(raw.cell(0, group_col), Some("phenolics"));
        assert_eq!(raw.len(), 1);
    }
}
