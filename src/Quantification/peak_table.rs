//! Detected peaks ("blobs") of one experiment and their join against the
//! reference database.
//!
//! Ingestion keeps only the compound name and the volume of every included
//! peak. Matching copies MW, ECN, MRF and any requested extra attributes from
//! the database; a compound the database does not know keeps empty fields and
//! is reported, the caller decides whether that matters. Split peaks of one
//! compound are merged by [`PeakTable::aggregate_duplicates`] before yields
//! are computed.
use crate::Compounds::reference_db::{AttributeValue, ReferenceDatabase};
use crate::Utils::table::{RawTable, normalize_key, parse_bool};
use crate::errors::{Diagnostic, Diagnostics, PyroError, PyroResult};
use crate::settings::PeakTableSchema;
use log::{debug, info};
use std::collections::{BTreeMap, HashMap, HashSet};

const SOURCE: &str = "peak table";

#[derive(Debug, Clone, PartialEq)]
pub struct PeakRecord {
    pub compound: String,
    pub volume: f64,
    pub mw: Option<f64>,
    pub ecn: Option<f64>,
    pub mrf: Option<f64>,
    pub extra: BTreeMap<String, AttributeValue>,
}

impl PeakRecord {
    pub fn new(compound: &str, volume: f64) -> Self {
        Self {
            compound: normalize_key(compound),
            volume,
            mw: None,
            ecn: None,
            mrf: None,
            extra: BTreeMap::new(),
        }
    }

    /// peak already carrying reference parameters
    pub fn with_parameters(compound: &str, volume: f64, mw: f64, ecn: f64, mrf: f64) -> Self {
        Self {
            mw: Some(mw),
            ecn: Some(ecn),
            mrf: Some(mrf),
            ..Self::new(compound, volume)
        }
    }

    pub fn is_matched(&self) -> bool {
        self.mw.is_some() && self.ecn.is_some() && self.mrf.is_some()
    }

    pub fn extra_f64(&self, column: &str) -> Option<f64> {
        self.extra.get(&normalize_key(column)).and_then(|v| v.as_f64())
    }

    pub fn extra_text(&self, column: &str) -> Option<String> {
        self.extra.get(&normalize_key(column)).map(|v| v.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeakTable {
    pub records: Vec<PeakRecord>,
    pub diagnostics: Diagnostics,
}

impl PeakTable {
    pub fn new(records: Vec<PeakRecord>) -> Self {
        Self {
            records,
            diagnostics: Diagnostics::new(),
        }
    }

    /// Reads the instrument blob table. Rows whose inclusion flag is false are
    /// skipped, rows without a name or a valid volume are dropped and reported.
    pub fn from_table(table: &RawTable, schema: &PeakTableSchema) -> PyroResult<Self> {
        let name_col = table
            .column_index(&schema.name_column)
            .ok_or_else(|| PyroError::malformed(SOURCE, &schema.name_column))?;
        let volume_col = table
            .column_index(&schema.volume_column)
            .ok_or_else(|| PyroError::malformed(SOURCE, &schema.volume_column))?;
        let inclusion_col = table.column_index(&schema.inclusion_column);

        let mut peaks = PeakTable::default();
        for row in 0..table.len() {
            if let Some(col) = inclusion_col {
                if table.cell(row, col).and_then(parse_bool) == Some(false) {
                    continue;
                }
            }
            let Some(name) = table.cell(row, name_col) else {
                peaks.drop_row(format!("#{}", row + 1), "missing compound name");
                continue;
            };
            match table.cell_f64(row, volume_col) {
                Some(volume) if volume >= 0.0 => peaks.records.push(PeakRecord::new(name, volume)),
                _ => peaks.drop_row(normalize_key(name), "missing or negative volume"),
            }
        }
        debug!("{} peaks read", peaks.records.len());
        Ok(peaks)
    }

    fn drop_row(&mut self, row: String, reason: &str) {
        self.diagnostics.push(Diagnostic::DroppedRow {
            source_name: SOURCE.to_string(),
            row,
            reason: reason.to_string(),
        });
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// first record of a compound
    pub fn get(&self, compound: &str) -> Option<&PeakRecord> {
        let compound = normalize_key(compound);
        self.records.iter().find(|r| r.compound == compound)
    }

    /// distinct compound names in order of first appearance
    pub fn compounds(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.records
            .iter()
            .map(|r| r.compound.as_str())
            .filter(|name| seen.insert(*name))
            .collect()
    }

    /// Attaches MW, ECN, MRF and the `extra_columns` attributes of every
    /// compound found in the database. Returns the unmatched compounds as
    /// diagnostics, one per distinct name.
    pub fn match_database(
        &mut self,
        database: &ReferenceDatabase,
        extra_columns: &[String],
    ) -> Diagnostics {
        let mut diagnostics = Diagnostics::new();
        let mut reported = HashSet::new();
        let mut matched = 0;
        for record in self.records.iter_mut() {
            record.mw = None;
            record.ecn = None;
            record.mrf = None;
            record.extra.clear();
            match database.get(&record.compound) {
                Some(compound) => {
                    record.mw = Some(compound.mw);
                    record.ecn = Some(compound.ecn as f64);
                    record.mrf = Some(compound.mrf);
                    for column in extra_columns {
                        if let Some(value) = compound.attribute(column) {
                            record.extra.insert(normalize_key(column), value);
                        }
                    }
                    matched += 1;
                }
                None => {
                    if reported.insert(record.compound.clone()) {
                        diagnostics.push(Diagnostic::UnmatchedCompound(record.compound.clone()));
                    }
                }
            }
        }
        info!(
            "{} of {} peaks matched, {} compounds not in database",
            matched,
            self.records.len(),
            reported.len()
        );
        self.diagnostics.extend(diagnostics.clone());
        diagnostics
    }

    /// One row per compound: volumes summed, every other field taken from the
    /// first occurrence. Compound order follows first appearance.
    pub fn aggregate_duplicates(&self) -> PeakTable {
        let mut position: HashMap<String, usize> = HashMap::new();
        let mut records: Vec<PeakRecord> = Vec::new();
        for record in &self.records {
            match position.get(&record.compound) {
                Some(&i) => {
                    debug!("merging split peak of {}", record.compound);
                    records[i].volume += record.volume;
                }
                None => {
                    position.insert(record.compound.clone(), records.len());
                    records.push(record.clone());
                }
            }
        }
        PeakTable {
            records,
            diagnostics: self.diagnostics.clone(),
        }
    }

    /// removes a compound, returning whether it was present
    pub fn remove(&mut self, compound: &str) -> bool {
        let compound = normalize_key(compound);
        let before = self.records.len();
        self.records.retain(|r| r.compound != compound);
        self.records.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::ResponseFactorModel;

    fn database() -> ReferenceDatabase {
        let table = RawTable::from_rows(
            &["compound", "mw", "formula", "n_benz", "group"],
            &[
                &["benzene", "78.11", "C6H6", "1", "aromatics"],
                &["phenol", "94.11", "C6H6O", "1", "phenolics"],
                &["fluoranthene", "202.25", "C16H10", "3", "pah"],
                &["acetic acid", "60.05", "C2H4O2", "0", "acids"],
            ],
        );
        ReferenceDatabase::build(&table, &ResponseFactorModel::default()).unwrap()
    }

    fn blob_table() -> RawTable {
        RawTable::from_rows(
            &["BlobID", "Compound Name", "Group Name", "Inclusion", "Volume"],
            &[
                &["1", "Benzene ", "", "TRUE", "120.5"],
                &["2", "Phenol", "", "TRUE", "80"],
                &["3", "unknown 17", "", "TRUE", "12"],
                &["4", "Fluoranthene", "", "TRUE", "200"],
                &["5", "phenol", "", "TRUE", "20"],
                &["6", "toluene", "", "FALSE", "33"],
                &["7", "unknown 17", "", "TRUE", "3"],
                &["8", "", "", "TRUE", "1"],
            ],
        )
    }

    #[test]
    fn test_from_table_filters_and_normalizes() {
        let peaks = PeakTable::from_table(&blob_table(), &PeakTableSchema::default()).unwrap();
        assert_eq!(peaks.len(), 6);
        assert_eq!(peaks.records[0].compound, "benzene");
        assert!(peaks.get("toluene").is_none());
        assert_eq!(peaks.diagnostics.len(), 1);
        assert_eq!(
            peaks.compounds(),
            vec!["benzene", "phenol", "unknown 17", "fluoranthene"]
        );
    }

    #[test]
    fn test_missing_volume_column_is_fatal() {
        let table = RawTable::from_rows(&["compound name", "area"], &[&["benzene", "1"]]);
        let result = PeakTable::from_table(&table, &PeakTableSchema::default());
        assert!(matches!(
            result,
            Err(PyroError::MalformedRow { column, .. }) if column == "volume"
        ));
    }

    #[test]
    fn test_match_database() {
        let db = database();
        let mut peaks = PeakTable::from_table(&blob_table(), &PeakTableSchema::default()).unwrap();
        let diagnostics = peaks.match_database(&db, &["group".to_string(), "c".to_string()]);

        assert_eq!(diagnostics.unmatched(), vec!["unknown 17"]);
        for record in &peaks.records {
            if db.contains(&record.compound) {
                assert!(record.is_matched());
            } else {
                assert!(!record.is_matched());
                assert!(record.extra.is_empty());
            }
        }
        let phenol = peaks.get("phenol").unwrap();
        assert_eq!(phenol.ecn, Some(6.0));
        assert_eq!(phenol.extra_text("group").as_deref(), Some("phenolics"));
        assert_eq!(phenol.extra_f64("c"), Some(6.0));
    }

    #[test]
    fn test_unused_reference_compounds_are_irrelevant() {
        let db = database();
        let mut peaks = PeakTable::new(vec![PeakRecord::new("benzene", 1.0)]);
        let diagnostics = peaks.match_database(&db, &[]);
        assert!(diagnostics.is_empty());
        assert!(peaks.get("acetic acid").is_none());
    }

    #[test]
    fn test_aggregate_duplicates() {
        let mut first = PeakRecord::with_parameters("phenol", 80.0, 94.11, 6.0, 0.6);
        first
            .extra
            .insert("group".to_string(), AttributeValue::Text("first".to_string()));
        let mut second = PeakRecord::with_parameters("phenol", 20.0, 1.0, 1.0, 1.0);
        second
            .extra
            .insert("group".to_string(), AttributeValue::Text("second".to_string()));
        let peaks = PeakTable::new(vec![
            first.clone(),
            PeakRecord::with_parameters("benzene", 5.0, 78.11, 6.0, 0.5),
            second,
        ]);

        let merged = peaks.aggregate_duplicates();
        assert_eq!(merged.len(), 2);
        let phenol = merged.get("phenol").unwrap();
        assert_eq!(phenol.volume, 100.0);
        assert_eq!(phenol.mw, first.mw);
        assert_eq!(phenol.mrf, first.mrf);
        assert_eq!(phenol.extra, first.extra);
        assert_eq!(merged.compounds(), vec!["phenol", "benzene"]);
    }

    #[test]
    fn test_remove() {
        let mut peaks = PeakTable::new(vec![
            PeakRecord::new("a", 1.0),
            PeakRecord::new("b", 1.0),
        ]);
        assert!(peaks.remove("A "));
        assert!(!peaks.remove("c"));
        assert_eq!(peaks.compounds(), vec!["b"]);
    }
}
