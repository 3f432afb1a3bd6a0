//! Post-processing of yield tables: totals per group and per element, yields
//! by molecular-weight range, the largest yields of a run, and one compound
//! followed across several runs.
//!
//! The per-experiment totals record is written as
//! ```json
//! {
//!   "group": { "aromatics": 1.2, "phenolics": 0.4 },
//!   "total_FID": 1.6,
//!   "atoms_FID": { "c": 1.3, "h": 0.1, "o": 0.2 }
//! }
//! ```
//! where the first key is the name of the grouping column (absent when no
//! grouping was requested).
use super::yields::{YieldRow, YieldTable};
use crate::Utils::load_from_file::write_json;
use crate::Utils::table::{RawTable, normalize_key};
use crate::errors::{Diagnostic, Diagnostics, PyroResult};
use crate::settings::AtomicWeights;
use log::{debug, info};
use prettytable::{Cell, Row, Table};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct YieldSummary {
    pub experiment: String,
    /// (column name, yield per tag value)
    pub grouping: Option<(String, BTreeMap<String, f64>)>,
    pub total_fid: f64,
    /// mass yield carried by each element, percent of the sample
    pub atoms_fid: BTreeMap<String, f64>,
    pub char_yield: Option<f64>,
    pub diagnostics: Diagnostics,
}

/// Sums the yields of a run: per tag of `grouping` (when given), in total,
/// and per element as `yield · count · atomic weight / MW`.
/// Compounds without a tag or an element count are left out of that sum and
/// reported.
pub fn summarize(
    table: &YieldTable,
    grouping: Option<&str>,
    atomic_weights: &AtomicWeights,
) -> YieldSummary {
    let mut diagnostics = Diagnostics::new();

    let grouping = grouping.map(|column| {
        let column = normalize_key(column);
        let mut sums: BTreeMap<String, f64> = BTreeMap::new();
        for row in &table.rows {
            match row.extra.get(&column) {
                Some(tag) => *sums.entry(tag.to_string()).or_insert(0.0) += row.yield_mrf,
                None => diagnostics.push(Diagnostic::MissingGroupTag {
                    compound: row.compound.clone(),
                    group: column.clone(),
                }),
            }
        }
        (column, sums)
    });

    let mut atoms_fid = BTreeMap::new();
    for (element, weight) in atomic_weights.elements() {
        let mut element_yield = 0.0;
        for row in &table.rows {
            match row.extra.get(element).and_then(|v| v.as_f64()) {
                Some(count) => element_yield += row.yield_mrf * count * weight / row.mw,
                None => diagnostics.push(Diagnostic::MissingElement {
                    compound: row.compound.clone(),
                    element: element.clone(),
                }),
            }
        }
        atoms_fid.insert(element.clone(), element_yield);
    }

    let summary = YieldSummary {
        experiment: table.experiment.clone(),
        grouping,
        total_fid: table.total_yield(),
        atoms_fid,
        char_yield: None,
        diagnostics,
    };
    info!(
        "{}: total FID yield {:.3} %",
        summary.experiment, summary.total_fid
    );
    summary
}

impl YieldSummary {
    pub fn with_char_yield(mut self, char_yield: f64) -> Self {
        self.char_yield = Some(char_yield);
        self
    }

    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        if let Some((column, sums)) = &self.grouping {
            map.insert(column.clone(), json!(sums));
        }
        map.insert("total_FID".to_string(), json!(self.total_fid));
        map.insert("atoms_FID".to_string(), json!(self.atoms_fid));
        if let Some(char_yield) = self.char_yield {
            map.insert("char_yield".to_string(), json!(char_yield));
        }
        Value::Object(map)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> PyroResult<()> {
        write_json(&self.to_json(), path.as_ref())?;
        debug!("totals written to {}", path.as_ref().display());
        Ok(())
    }

    pub fn pretty_print(&self) {
        let mut table = Table::new();
        table.add_row(Row::new(vec![Cell::new("quantity"), Cell::new("yield, %")]));
        if let Some((column, sums)) = &self.grouping {
            for (tag, value) in sums {
                table.add_row(Row::new(vec![
                    Cell::new(&format!("{}: {}", column, tag)),
                    Cell::new(&format!("{:.3}", value)),
                ]));
            }
        }
        for (element, value) in &self.atoms_fid {
            table.add_row(Row::new(vec![
                Cell::new(&element.to_uppercase()),
                Cell::new(&format!("{:.3}", value)),
            ]));
        }
        table.add_row(Row::new(vec![
            Cell::new("total FID"),
            Cell::new(&format!("{:.3}", self.total_fid)),
        ]));
        if let Some(char_yield) = self.char_yield {
            table.add_row(Row::new(vec![
                Cell::new("char"),
                Cell::new(&format!("{:.3}", char_yield)),
            ]));
        }
        println!("summary of {}", self.experiment);
        table.printstd();
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MwRangeYield {
    pub lower: f64,
    pub upper: f64,
    pub yield_mrf: f64,
}

/// `upper_bounds` are the upper limits of consecutive ranges starting at 0;
/// a compound counts for a range when `lower < mw < upper`.
pub fn yields_by_mw_range(table: &YieldTable, upper_bounds: &[f64]) -> Vec<MwRangeYield> {
    let mut lower = 0.0;
    let mut ranges = Vec::with_capacity(upper_bounds.len());
    for &upper in upper_bounds {
        let yield_mrf = table
            .rows
            .iter()
            .filter(|r| r.mw > lower && r.mw < upper)
            .map(|r| r.yield_mrf)
            .sum();
        ranges.push(MwRangeYield {
            lower,
            upper,
            yield_mrf,
        });
        lower = upper;
    }
    ranges
}

/// the `n` compounds with the largest yield, largest first
pub fn top_yields(table: &YieldTable, n: usize) -> Vec<&YieldRow> {
    let mut rows: Vec<&YieldRow> = table.rows.iter().collect();
    rows.sort_by(|a, b| b.yield_mrf.total_cmp(&a.yield_mrf));
    rows.truncate(n);
    rows
}

/// Yields of selected compounds across runs.
#[derive(Debug, Clone, PartialEq)]
pub struct YieldComparison {
    pub compounds: Vec<String>,
    pub experiments: Vec<String>,
    /// `values[compound][experiment]`
    pub values: Vec<Vec<Option<f64>>>,
    pub diagnostics: Diagnostics,
}

pub fn compare_yields(tables: &[&YieldTable], compounds: &[&str]) -> YieldComparison {
    let mut diagnostics = Diagnostics::new();
    let compounds: Vec<String> = compounds.iter().map(|c| normalize_key(c)).collect();
    let values = compounds
        .iter()
        .map(|compound| {
            tables
                .iter()
                .map(|table| {
                    let value = table.get(compound).map(|r| r.yield_mrf);
                    if value.is_none() {
                        diagnostics.push(Diagnostic::MissingYield {
                            experiment: table.experiment.clone(),
                            compound: compound.clone(),
                        });
                    }
                    value
                })
                .collect()
        })
        .collect();
    YieldComparison {
        compounds,
        experiments: tables.iter().map(|t| t.experiment.clone()).collect(),
        values,
        diagnostics,
    }
}

impl YieldComparison {
    pub fn get(&self, compound: &str, experiment: &str) -> Option<f64> {
        let i = self.compounds.iter().position(|c| *c == normalize_key(compound))?;
        let j = self.experiments.iter().position(|e| *e == normalize_key(experiment))?;
        self.values[i][j]
    }

    /// compounds in rows, experiments in columns
    pub fn to_table(&self) -> RawTable {
        let mut headers = vec!["compound".to_string()];
        headers.extend(self.experiments.iter().cloned());
        let mut table = RawTable::new(headers);
        for (compound, values) in self.compounds.iter().zip(&self.values) {
            let mut row = vec![compound.clone()];
            row.extend(values.iter().map(|v| v.map(|v| v.to_string()).unwrap_or_default()));
            table.push_row(row);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Compounds::reference_db::AttributeValue;
    use crate::Quantification::experiments::ExperimentRecord;
    use crate::Quantification::peak_table::{PeakRecord, PeakTable};
    use crate::Quantification::yields::compute_yields_is;
    use approx::assert_relative_eq;
    use std::fs;

    fn peak(
        name: &str,
        volume: f64,
        mw: f64,
        group: Option<&str>,
        atoms: &[(&str, f64)],
    ) -> PeakRecord {
        let mut record = PeakRecord::with_parameters(name, volume, mw, 5.0, 0.5);
        if let Some(group) = group {
            record
                .extra
                .insert("group".to_string(), AttributeValue::Text(group.to_string()));
        }
        for (element, count) in atoms {
            record
                .extra
                .insert(element.to_string(), AttributeValue::Number(*count));
        }
        record
    }

    fn run(id: &str, phenol_volume: f64) -> YieldTable {
        let peaks = PeakTable::new(vec![
            PeakRecord::with_parameters("fluoranthene", 100.0, 200.0, 10.0, 1.0),
            peak(
                "phenol",
                phenol_volume,
                94.0,
                Some("phenolics"),
                &[("c", 6.0), ("h", 6.0), ("o", 1.0), ("n", 0.0)],
            ),
            peak(
                "benzene",
                20.0,
                78.0,
                Some("aromatics"),
                &[("c", 6.0), ("h", 6.0), ("o", 0.0), ("n", 0.0)],
            ),
            peak("mystery", 10.0, 150.0, None, &[("c", 10.0)]),
        ]);
        let experiment = ExperimentRecord::new(id, 50.0).with_is_amount(10.0);
        compute_yields_is(&experiment, &peaks, "fluoranthene").unwrap()
    }

    #[test]
    fn test_summarize_groups_and_elements() {
        let table = run("run_a", 50.0);
        let summary = summarize(&table, Some("Group"), &AtomicWeights::default());

        assert_relative_eq!(summary.total_fid, table.total_yield());
        let (column, sums) = summary.grouping.as_ref().unwrap();
        assert_eq!(column, "group");
        assert_eq!(sums.len(), 2);
        let phenol = table.get("phenol").unwrap();
        assert_relative_eq!(sums["phenolics"], phenol.yield_mrf);

        let benzene = table.get("benzene").unwrap();
        let expected_o = phenol.yield_mrf * 15.999 / 94.0;
        assert_relative_eq!(summary.atoms_fid["o"], expected_o, epsilon = 1e-12);
        let mystery = table.get("mystery").unwrap();
        let expected_c = (phenol.yield_mrf / 94.0 + benzene.yield_mrf / 78.0) * 6.0 * 12.011
            + mystery.yield_mrf * 10.0 * 12.011 / 150.0;
        assert_relative_eq!(summary.atoms_fid["c"], expected_c, epsilon = 1e-12);

        // mystery: no group tag and no h, o, n counts
        assert_eq!(summary.diagnostics.len(), 4);
        assert!(summary.diagnostics.iter().any(|d| matches!(
            d,
            Diagnostic::MissingGroupTag { compound, .. } if compound == "mystery"
        )));
    }

    #[test]
    fn test_summary_json_shape() {
        let table = run("run_a", 50.0);
        let summary =
            summarize(&table, Some("group"), &AtomicWeights::default()).with_char_yield(12.5);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_a.totals.json");
        summary.save(&path).unwrap();
        let value: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(value["group"]["aromatics"].is_number());
        assert!(value["total_FID"].is_number());
        assert!(value["atoms_FID"]["c"].is_number());
        assert_eq!(value["char_yield"], json!(12.5));

        let ungrouped = summarize(&table, None, &AtomicWeights::default()).to_json();
        assert_eq!(ungrouped.as_object().map(|m| m.len()), Some(2));
    }

    #[test]
    fn test_yields_by_mw_range() {
        let table = run("run_a", 50.0);
        let ranges = yields_by_mw_range(&table, &[80.0, 100.0, 150.0, 300.0]);
        assert_eq!(ranges.len(), 4);
        assert_relative_eq!(ranges[0].yield_mrf, table.get("benzene").unwrap().yield_mrf);
        assert_relative_eq!(ranges[1].yield_mrf, table.get("phenol").unwrap().yield_mrf);
        // strict bounds: mw 150 belongs to neither neighbour
        assert_eq!(ranges[2].yield_mrf, 0.0);
        assert_eq!(ranges[3].yield_mrf, 0.0);
        assert_eq!((ranges[1].lower, ranges[1].upper), (80.0, 100.0));
    }

    #[test]
    fn test_top_yields() {
        let table = run("run_a", 50.0);
        let top = top_yields(&table, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].compound, "phenol");
        assert!(top[0].yield_mrf >= top[1].yield_mrf);
        assert_eq!(top_yields(&table, 10).len(), 3);
    }

    #[test]
    fn test_compare_yields() {
        let a = run("run_a", 50.0);
        let b = run("run_b", 100.0);
        let comparison = compare_yields(&[&a, &b], &["Phenol", "toluene"]);
        let phenol_a = comparison.get("phenol", "run_a").unwrap();
        let phenol_b = comparison.get("phenol", "run_b").unwrap();
        assert_relative_eq!(phenol_b, 2.0 * phenol_a, epsilon = 1e-12);
        assert_eq!(comparison.get("toluene", "run_a"), None);
        assert_eq!(comparison.diagnostics.len(), 2);

        let raw = comparison.to_table();
        assert_eq!(raw.headers, vec!["compound", "run_a", "run_b"]);
        assert_eq!(raw.cell(1, 1), None);
    }
}
