//! # Reference Database
//!
//! ## Aim
//! Maps a compound name to everything the quantification needs about it:
//! molecular weight, formula, C/H/O/N counts, aromatic ring count, effective
//! carbon number (ECN), mass response factor (MRF) and free-text group tags.
//!
//! ## Main Data Structures and Logic
//! - `CompoundRecord`: one compound, all derived columns filled at construction
//! - `ReferenceDatabase`: records in source order plus a name index
//! - `AttributeValue`: a single attribute copied onto peaks by the matcher
//!
//! Construction takes a `RawTable` whose first column is the compound name and
//! which has a `formula` column. Names, headers and formulas are lower-cased
//! and trimmed. Rows without a name or a usable formula are dropped and
//! reported; only a missing name/formula column is fatal.
//!
//! ## Usage
//! ```rust, ignore
//! let table = read_csv_table("database.csv")?;
//! let db = ReferenceDatabase::build(&table, &ResponseFactorModel::default())?;
//! let phenol = db.lookup("Phenol")?;
//! println!("ECN {} MRF {}", phenol.ecn, phenol.mrf);
//! ```
use super::molmass::{calculate_molar_mass, count_atom, is_parseable_formula};
use crate::Utils::table::{RawTable, normalize_key};
use crate::errors::{Diagnostic, Diagnostics, PyroError, PyroResult};
use crate::settings::ResponseFactorModel;
use log::info;
use prettytable::{Cell, Row, Table};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// atoms tracked for ECN/MRF and elemental yields
pub const TRACKED_ATOMS: [&str; 4] = ["c", "h", "o", "n"];

const SOURCE: &str = "reference database";

/// Value of one database attribute as copied onto a peak.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Number(f64),
    Text(String),
}

impl AttributeValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Number(v) => Some(*v),
            AttributeValue::Text(s) => s.trim().parse::<f64>().ok(),
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AttributeValue::Number(v) => write!(f, "{}", v),
            AttributeValue::Text(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompoundRecord {
    pub name: String,
    pub formula: String,
    pub mw: f64,
    pub c: u32,
    pub h: u32,
    pub o: u32,
    pub n: u32,
    /// aromatic rings, `None` when unknown
    pub n_benz: Option<u32>,
    pub ecn: u32,
    pub combustion: f64,
    pub mrf: f64,
    pub groups: BTreeMap<String, String>,
}

impl CompoundRecord {
    fn new(
        name: String,
        formula: String,
        mw: f64,
        n_benz: Option<u32>,
        groups: BTreeMap<String, String>,
        model: &ResponseFactorModel,
    ) -> Self {
        let c = count_atom(&formula, "c");
        let h = count_atom(&formula, "h");
        let o = count_atom(&formula, "o");
        let n = count_atom(&formula, "n");
        let combustion = model.combustion(c, h, o, n);
        let mrf = model.mrf(combustion, n_benz);
        Self {
            name,
            formula,
            mw,
            c,
            h,
            o,
            n,
            n_benz,
            ecn: c,
            combustion,
            mrf,
            groups,
        }
    }

    pub fn atom_count(&self, atom: &str) -> Option<u32> {
        match normalize_key(atom).as_str() {
            "c" => Some(self.c),
            "h" => Some(self.h),
            "o" => Some(self.o),
            "n" => Some(self.n),
            _ => None,
        }
    }

    /// attribute by its column name, `None` when the record has no such value
    pub fn attribute(&self, column: &str) -> Option<AttributeValue> {
        let column = normalize_key(column);
        match column.as_str() {
            "mw" => Some(AttributeValue::Number(self.mw)),
            "formula" => Some(AttributeValue::Text(self.formula.clone())),
            "ecn" => Some(AttributeValue::Number(self.ecn as f64)),
            "mrf" => Some(AttributeValue::Number(self.mrf)),
            "combustion" => Some(AttributeValue::Number(self.combustion)),
            "n_benz" => self.n_benz.map(|v| AttributeValue::Number(v as f64)),
            other => match self.atom_count(other) {
                Some(count) => Some(AttributeValue::Number(count as f64)),
                None => self
                    .groups
                    .get(other)
                    .map(|tag| AttributeValue::Text(tag.clone())),
            },
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReferenceDatabase {
    records: Vec<CompoundRecord>,
    index: HashMap<String, usize>,
    /// rows dropped during construction
    pub diagnostics: Diagnostics,
}

impl ReferenceDatabase {
    /// Builds the database from a table: first column = compound name,
    /// `formula` required, `mw`, `n_benz` and `group*` columns optional.
    pub fn build(table: &RawTable, model: &ResponseFactorModel) -> PyroResult<Self> {
        let mut table = table.clone();
        table.normalize_headers();
        if table.headers.is_empty() {
            return Err(PyroError::malformed(SOURCE, "compound"));
        }
        let formula_col = table
            .column_index("formula")
            .ok_or_else(|| PyroError::malformed(SOURCE, "formula"))?;
        let mw_col = table.column_index("mw");
        let n_benz_col = table.column_index("n_benz");
        let group_cols: Vec<(usize, String)> = table
            .headers
            .iter()
            .enumerate()
            .filter(|(_, h)| h.starts_with("group"))
            .map(|(i, h)| (i, h.clone()))
            .collect();

        let mut db = ReferenceDatabase::default();
        for row in 0..table.len() {
            let Some(name) = table.cell(row, 0).map(normalize_key) else {
                db.drop_row(format!("#{}", row + 1), "missing compound name");
                continue;
            };
            let Some(raw_formula) = table.cell(row, formula_col) else {
                db.drop_row(name, "missing formula");
                continue;
            };
            if !is_parseable_formula(raw_formula) {
                db.drop_row(name, &format!("unparseable formula '{}'", raw_formula));
                continue;
            }
            if db.index.contains_key(&name) {
                db.drop_row(name, "duplicate compound name");
                continue;
            }
            // molar mass from the formula needs the original capitalisation
            let mw = match mw_col.and_then(|c| table.cell_f64(row, c)).filter(|mw| *mw > 0.0) {
                Some(mw) => mw,
                None => match calculate_molar_mass(raw_formula) {
                    Some((mw, _)) => mw,
                    None => {
                        db.drop_row(name, "no molecular weight");
                        continue;
                    }
                },
            };
            // the generator writes -1 when ring counting failed
            let n_benz = n_benz_col
                .and_then(|c| table.cell_f64(row, c))
                .filter(|v| *v >= 0.0)
                .map(|v| v.round() as u32);
            let groups = group_cols
                .iter()
                .filter_map(|(c, h)| table.cell(row, *c).map(|tag| (h.clone(), tag.to_string())))
                .collect();

            let record =
                CompoundRecord::new(name, normalize_key(raw_formula), mw, n_benz, groups, model);
            db.index.insert(record.name.clone(), db.records.len());
            db.records.push(record);
        }
        info!(
            "reference database built: {} compounds, {} rows dropped",
            db.records.len(),
            db.diagnostics.len()
        );
        Ok(db)
    }

    fn drop_row(&mut self, row: String, reason: &str) {
        self.diagnostics.push(Diagnostic::DroppedRow {
            source_name: SOURCE.to_string(),
            row,
            reason: reason.to_string(),
        });
    }

    /// case-insensitive, trimmed exact match
    pub fn get(&self, name: &str) -> Option<&CompoundRecord> {
        self.index
            .get(&normalize_key(name))
            .map(|&i| &self.records[i])
    }

    pub fn lookup(&self, name: &str) -> PyroResult<&CompoundRecord> {
        self.get(name)
            .ok_or_else(|| PyroError::NotFound(normalize_key(name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(&normalize_key(name))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompoundRecord> {
        self.records.iter()
    }

    /// every `group*` tag column present in at least one record
    pub fn group_columns(&self) -> Vec<String> {
        let set: BTreeSet<&String> = self.records.iter().flat_map(|r| r.groups.keys()).collect();
        set.into_iter().cloned().collect()
    }

    /// Flat export; the name column is always written explicitly as `compound`.
    pub fn to_table(&self) -> RawTable {
        let groups = self.group_columns();
        let mut headers: Vec<String> = [
            "compound",
            "formula",
            "mw",
            "n_benz",
            "c",
            "h",
            "o",
            "n",
            "ecn",
            "combustion",
            "mrf",
        ]
        .iter()
        .map(|h| h.to_string())
        .collect();
        headers.extend(groups.iter().cloned());

        let mut table = RawTable::new(headers);
        for r in &self.records {
            let mut row = vec![
                r.name.clone(),
                r.formula.clone(),
                r.mw.to_string(),
                r.n_benz.map(|v| v.to_string()).unwrap_or_default(),
                r.c.to_string(),
                r.h.to_string(),
                r.o.to_string(),
                r.n.to_string(),
                r.ecn.to_string(),
                r.combustion.to_string(),
                r.mrf.to_string(),
            ];
            for g in &groups {
                row.push(r.groups.get(g).cloned().unwrap_or_default());
            }
            table.push_row(row);
        }
        table
    }

    pub fn pretty_print(&self) {
        let mut table = Table::new();
        table.add_row(Row::new(
            ["compound", "formula", "MW", "C", "H", "O", "N", "n_benz", "ECN", "MRF"]
                .iter()
                .map(|h| Cell::new(h))
                .collect(),
        ));
        for r in &self.records {
            table.add_row(Row::new(vec![
                Cell::new(&r.name),
                Cell::new(&r.formula),
                Cell::new(&format!("{:.3}", r.mw)),
                Cell::new(&r.c.to_string()),
                Cell::new(&r.h.to_string()),
                Cell::new(&r.o.to_string()),
                Cell::new(&r.n.to_string()),
                Cell::new(&r.n_benz.map(|v| v.to_string()).unwrap_or("-".to_string())),
                Cell::new(&r.ecn.to_string()),
                Cell::new(&format!("{:.4}", r.mrf)),
            ]));
        }
        table.printstd();
    }
}
