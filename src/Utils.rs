/// CSV and JSON input/output, case-insensitive lookup of instrument files
pub mod load_from_file;
/// in-memory table of string cells, the common input of all parsers
pub mod table;
