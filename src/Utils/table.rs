//! In-memory table handed to the quantification core.
//!
//! Readers (CSV today) produce a `RawTable`; every typed record is built from
//! one of these after its schema has been checked. Cells are kept as trimmed
//! strings, an empty cell is a missing value.
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    /// builds a table from string slices, handy for tests and small fixtures
    pub fn from_rows(headers: &[&str], rows: &[&[&str]]) -> Self {
        let mut table = Self::new(headers.iter().map(|h| h.to_string()).collect());
        for row in rows {
            table.push_row(row.iter().map(|c| c.to_string()).collect());
        }
        table
    }

    /// appends a row, padding or truncating it to the header width
    pub fn push_row(&mut self, mut row: Vec<String>) {
        row.resize(self.headers.len(), String::new());
        for cell in row.iter_mut() {
            *cell = cell.trim().to_string();
        }
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// lower-cases and trims every header
    pub fn normalize_headers(&mut self) {
        for header in self.headers.iter_mut() {
            *header = normalize_key(header);
        }
    }

    /// position of a column, compared case-insensitively
    pub fn column_index(&self, name: &str) -> Option<usize> {
        let name = normalize_key(name);
        self.headers.iter().position(|h| normalize_key(h) == name)
    }

    /// map from normalized header to column position
    pub fn header_map(&self) -> HashMap<String, usize> {
        self.headers
            .iter()
            .enumerate()
            .map(|(i, h)| (normalize_key(h), i))
            .collect()
    }

    /// cell value, `None` when empty
    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .map(|c| c.as_str())
            .filter(|c| !c.is_empty() && !is_nan_marker(c))
    }

    pub fn cell_f64(&self, row: usize, column: usize) -> Option<f64> {
        self.cell(row, column)
            .and_then(|c| c.parse::<f64>().ok())
            .filter(|v| v.is_finite())
    }
}

/// key normalisation shared by compound names, column names and formulas
pub fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

fn is_nan_marker(cell: &str) -> bool {
    matches!(cell.to_lowercase().as_str(), "nan" | "na" | "n/a" | "null")
}

/// spreadsheet-style boolean cell
pub fn parse_bool(cell: &str) -> Option<bool> {
    match cell.trim().to_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cells_and_columns() {
        let table = RawTable::from_rows(
            &["Compound", " Formula ", "MW"],
            &[&["Benzene ", "C6H6", "78.11"], &["toluene", "", "nan"]],
        );
        assert_eq!(table.column_index("formula"), Some(1));
        assert_eq!(table.column_index("FORMULA"), Some(1));
        assert_eq!(table.column_index("n_benz"), None);
        assert_eq!(table.cell(0, 0), Some("Benzene"));
        assert_eq!(table.cell(1, 1), None);
        assert_eq!(table.cell_f64(0, 2), Some(78.11));
        assert_eq!(table.cell_f64(1, 2), None);
    }

    #[test]
    fn test_short_rows_are_padded() {
        let mut table = RawTable::new(vec!["a".to_string(), "b".to_string()]);
        table.push_row(vec!["1".to_string()]);
        assert_eq!(table.rows[0].len(), 2);
        assert_eq!(table.cell(0, 1), None);
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" false"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
