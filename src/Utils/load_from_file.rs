//! Reading and writing the tables and JSON records a processing session works
//! with. Everything on disk is CSV (comma separated, first row = headers) or
//! pretty-printed JSON; the core modules only ever see [`RawTable`].
use crate::Compounds::reference_db::ReferenceDatabase;
use crate::Utils::table::RawTable;
use crate::errors::PyroResult;
use crate::settings::ResponseFactorModel;
use log::{debug, info, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Parses CSV text. Ragged rows are padded to the header width.
pub fn read_csv_from<R: BufRead>(reader: R) -> PyroResult<RawTable> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);
    let headers: Vec<String> = csv_reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    let mut table = RawTable::new(headers);
    for record in csv_reader.records() {
        let record = record?;
        if record.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        table.push_row(record.iter().map(|cell| cell.to_string()).collect());
    }
    Ok(table)
}

pub fn read_csv_table<P: AsRef<Path>>(path: P) -> PyroResult<RawTable> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let table = read_csv_from(BufReader::new(file))?;
    debug!("{}: {} rows", path.display(), table.len());
    Ok(table)
}

pub fn write_csv_to<W: Write>(table: &RawTable, writer: W) -> PyroResult<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(&table.headers)?;
    for row in &table.rows {
        csv_writer.write_record(row)?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn write_csv_table<P: AsRef<Path>>(table: &RawTable, path: P) -> PyroResult<()> {
    let file = File::create(path.as_ref())?;
    write_csv_to(table, file)?;
    debug!("{} rows written to {}", table.len(), path.as_ref().display());
    Ok(())
}

/// Builds the reference database from its CSV source.
pub fn load_database_csv<P: AsRef<Path>>(
    path: P,
    model: &ResponseFactorModel,
) -> PyroResult<ReferenceDatabase> {
    let table = read_csv_table(path.as_ref())?;
    let database = ReferenceDatabase::build(&table, model)?;
    info!(
        "reference database {}: {} compounds",
        path.as_ref().display(),
        database.len()
    );
    Ok(database)
}

/// Exports the database with its derived columns. With `backup` an existing
/// file is first copied to `<path>.bak`.
pub fn save_database_csv<P: AsRef<Path>>(
    database: &ReferenceDatabase,
    path: P,
    backup: bool,
) -> PyroResult<()> {
    let path = path.as_ref();
    if backup && path.exists() {
        let mut backup_name = path.as_os_str().to_owned();
        backup_name.push(".bak");
        fs::copy(path, &backup_name)?;
        info!("previous database kept as {}", PathBuf::from(backup_name).display());
    }
    write_csv_table(&database.to_table(), path)
}

/// Looks up `file_name` in `dir` ignoring case, as instrument exports do not
/// keep the case of the experiment names. `None` when absent.
pub fn find_file_case_insensitive<P: AsRef<Path>>(
    dir: P,
    file_name: &str,
) -> PyroResult<Option<PathBuf>> {
    let dir = dir.as_ref();
    let exact = dir.join(file_name);
    if exact.is_file() {
        return Ok(Some(exact));
    }
    let wanted = file_name.to_lowercase();
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().to_lowercase() == wanted && entry.path().is_file() {
            found.push(entry.path());
        }
    }
    found.sort();
    if found.len() > 1 {
        warn!(
            "{} files match {} ignoring case, using {}",
            found.len(),
            file_name,
            found[0].display()
        );
    }
    Ok(found.into_iter().next())
}

pub fn read_json<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> PyroResult<T> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

pub fn write_json<T: Serialize + ?Sized, P: AsRef<Path>>(value: &T, path: P) -> PyroResult<()> {
    let content = serde_json::to_string_pretty(value)?;
    fs::write(path, content)?;
    Ok(())
}
