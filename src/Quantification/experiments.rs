//! Experimental matrix: one metadata record per analysed sample.
//!
//! All masses are in mg. The first column of the source table identifies the
//! experiment (usually the instrument file name). `(mg)` unit suffixes are
//! stripped from headers, `t (c)` is exposed as the temperature, and any other
//! column is carried unchanged for later grouping.
use crate::Utils::table::{RawTable, normalize_key};
use crate::errors::{Diagnostic, Diagnostics, PyroError, PyroResult};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const SOURCE: &str = "experiment table";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRecord {
    pub id: String,
    /// sample mass, mg
    pub sample_mass: f64,
    /// weighed internal standard (or standard mixture), mg
    pub internal_standard: Option<f64>,
    /// pure internal standard, mg
    pub is_amount: Option<f64>,
    pub temperature: Option<f64>,
    pub aux: BTreeMap<String, String>,
}

/// Char left in the cup after pyrolysis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CharYield {
    /// mg
    pub mass: f64,
    /// percent of the sample mass
    pub percent: f64,
}

impl ExperimentRecord {
    pub fn new(id: &str, sample_mass: f64) -> Self {
        Self {
            id: normalize_key(id),
            sample_mass,
            internal_standard: None,
            is_amount: None,
            temperature: None,
            aux: BTreeMap::new(),
        }
    }

    pub fn with_is_amount(mut self, is_amount: f64) -> Self {
        self.is_amount = Some(is_amount);
        self
    }

    /// amount of pure internal standard; the weighed amount when no concentration was applied
    pub fn internal_standard_amount(&self) -> PyroResult<f64> {
        self.is_amount
            .or(self.internal_standard)
            .ok_or_else(|| PyroError::MissingField {
                record: format!("experiment '{}'", self.id),
                field: "is".to_string(),
            })
    }

    pub fn aux_f64(&self, field: &str) -> Option<f64> {
        self.aux
            .get(&normalize_key(field))
            .and_then(|v| v.parse::<f64>().ok())
    }

    /// Char mass and yield from the cup weighings:
    /// char = sample + is_amount + total_after - (cup + sample + wool + hook + is)
    pub fn char_yield(&self, used_is: bool) -> PyroResult<CharYield> {
        let required = |field: &str| {
            self.aux_f64(field).ok_or_else(|| PyroError::MissingField {
                record: format!("experiment '{}'", self.id),
                field: field.to_string(),
            })
        };
        let cup = required("cup")?;
        let hook = required("hook")?;
        let total_after = required("total after w/o holder")?;
        let wool = self.aux_f64("wool").unwrap_or(0.0);
        let (is_weighed, is_amount) = if used_is {
            (
                self.internal_standard.unwrap_or(0.0),
                self.internal_standard_amount()?,
            )
        } else {
            (0.0, 0.0)
        };
        let total_before = cup + self.sample_mass + wool + hook + is_weighed;
        let mass = self.sample_mass + is_amount + total_after - total_before;
        Ok(CharYield {
            mass,
            percent: mass / self.sample_mass * 100.0,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExperimentTable {
    pub records: Vec<ExperimentRecord>,
    pub used_is: bool,
    pub diagnostics: Diagnostics,
}

fn clean_header(header: &str) -> String {
    normalize_key(&header.to_lowercase().replace("(mg)", ""))
}

impl ExperimentTable {
    pub fn new(records: Vec<ExperimentRecord>, used_is: bool) -> Self {
        Self {
            records,
            used_is,
            diagnostics: Diagnostics::new(),
        }
    }

    /// Reads the experimental matrix; a `sample` column is required.
    pub fn from_table(table: &RawTable, used_is: bool) -> PyroResult<Self> {
        let mut table = table.clone();
        for header in table.headers.iter_mut() {
            *header = clean_header(header);
        }
        if table.headers.is_empty() {
            return Err(PyroError::malformed(SOURCE, "filename"));
        }
        let sample_col = table
            .column_index("sample")
            .ok_or_else(|| PyroError::malformed(SOURCE, "sample"))?;
        let is_col = table.column_index("is");
        let temperature_col = table
            .column_index("t (c)")
            .or_else(|| table.column_index("temperature"));

        let mut experiments = ExperimentTable::new(Vec::new(), used_is);
        for row in 0..table.len() {
            let Some(id) = table.cell(row, 0) else {
                continue;
            };
            let sample_mass = match table.cell_f64(row, sample_col) {
                Some(mass) if mass > 0.0 => mass,
                _ => {
                    experiments.diagnostics.push(Diagnostic::DroppedRow {
                        source_name: SOURCE.to_string(),
                        row: normalize_key(id),
                        reason: "sample mass missing or not positive".to_string(),
                    });
                    continue;
                }
            };
            let mut record = ExperimentRecord::new(id, sample_mass);
            record.internal_standard = is_col.and_then(|c| table.cell_f64(row, c));
            record.temperature = temperature_col.and_then(|c| table.cell_f64(row, c));
            for (col, header) in table.headers.iter().enumerate().skip(1) {
                if col == sample_col || Some(col) == is_col {
                    continue;
                }
                if let Some(value) = table.cell(row, col) {
                    record.aux.insert(header.clone(), value.to_string());
                }
            }
            experiments.records.push(record);
        }
        info!("{} experiments read", experiments.records.len());
        Ok(experiments)
    }

    pub fn get(&self, id: &str) -> Option<&ExperimentRecord> {
        let id = normalize_key(id);
        self.records.iter().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The internal standard is often weighed as a dilute mixture
    /// (e.g. with Al2O3); `is_amount = is * concentration`.
    pub fn compute_is_amount(&mut self, concentration: f64) {
        if !self.used_is {
            warn!("internal standard declared as not used, computing its amount anyway");
        }
        for record in self.records.iter_mut() {
            record.is_amount = record.internal_standard.map(|is| is * concentration);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn matrix() -> RawTable {
        RawTable::from_rows(
            &[
                "Filename",
                "Sample (mg)",
                "IS (mg)",
                "T (C)",
                "Cup (mg)",
                "Hook (mg)",
                "Wool (mg)",
                "Total after w/o holder (mg)",
                "Reactor",
            ],
            &[
                &["Py_600C", "0.100", "0.300", "600", "50.0", "10.0", "0.5", "60.8", "R1"],
                &["Py_500C", "0.120", "0.250", "500", "50.0", "10.0", "", "60.2", "R2"],
                &["broken", "", "0.250", "500", "", "", "", "", ""],
            ],
        )
    }

    #[test]
    fn test_from_table() {
        let experiments = ExperimentTable::from_table(&matrix(), true).unwrap();
        assert_eq!(experiments.len(), 2);
        assert_eq!(experiments.diagnostics.len(), 1);
        let record = experiments.get("PY_600C").unwrap();
        assert_relative_eq!(record.sample_mass, 0.1);
        assert_eq!(record.internal_standard, Some(0.3));
        assert_eq!(record.temperature, Some(600.0));
        assert_eq!(record.aux.get("reactor").map(|s| s.as_str()), Some("R1"));
        assert_eq!(record.aux_f64("cup"), Some(50.0));
    }

    #[test]
    fn test_missing_sample_column() {
        let table = RawTable::from_rows(&["filename", "is"], &[&["a", "1"]]);
        assert!(matches!(
            ExperimentTable::from_table(&table, true),
            Err(PyroError::MalformedRow { column, .. }) if column == "sample"
        ));
    }

    #[test]
    fn test_compute_is_amount() {
        let mut experiments = ExperimentTable::from_table(&matrix(), true).unwrap();
        experiments.compute_is_amount(0.03);
        let record = experiments.get("py_600c").unwrap();
        assert_relative_eq!(record.internal_standard_amount().unwrap(), 0.009, epsilon = 1e-12);
    }

    #[test]
    fn test_missing_internal_standard() {
        let record = ExperimentRecord::new("x", 1.0);
        assert!(matches!(
            record.internal_standard_amount(),
            Err(PyroError::MissingField { field, .. }) if field == "is"
        ));
    }

    #[test]
    fn test_char_yield() {
        let mut experiments = ExperimentTable::from_table(&matrix(), true).unwrap();
        experiments.compute_is_amount(0.03);
        let record = experiments.get("py_600c").unwrap();
        let char_yield = record.char_yield(true).unwrap();
        // before = 50 + 0.1 + 0.5 + 10 + 0.3 = 60.9
        let expected = 0.1 + 0.009 + 60.8 - 60.9;
        assert_relative_eq!(char_yield.mass, expected, epsilon = 1e-9);
        assert_relative_eq!(char_yield.percent, expected / 0.1 * 100.0, epsilon = 1e-9);

        // no wool column value, no internal standard
        let record = experiments.get("py_500c").unwrap();
        let char_yield = record.char_yield(false).unwrap();
        assert_relative_eq!(char_yield.mass, 0.12 + 60.2 - 60.12, epsilon = 1e-9);
    }
}
