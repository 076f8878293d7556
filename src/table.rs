use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::GzDecoder;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;
use zip::ZipArchive;

use crate::error::FactError;

#[derive(Debug, Clone, Default)]
pub struct Datapackage {
    pub origin: Utf8PathBuf,
    tables: BTreeMap<String, String>,
}

impl Datapackage {
    pub fn from_tables(origin: impl Into<Utf8PathBuf>, tables: BTreeMap<String, String>) -> Self {
        Self {
            origin: origin.into(),
            tables,
        }
    }

    pub fn open(path: &Utf8Path) -> Result<Self, FactError> {
        let std_path = path.as_std_path();
        if std_path.is_dir() {
            Self::open_dir(path)
        } else if path.extension() == Some("zip") {
            Self::open_zip(path)
        } else {
            Err(FactError::Filesystem(format!(
                "datapackage must be a directory or .zip archive: {path}"
            )))
        }
    }

    fn open_dir(path: &Utf8Path) -> Result<Self, FactError> {
        let mut tables = BTreeMap::new();
        let entries = fs::read_dir(path.as_std_path())
            .map_err(|err| FactError::Filesystem(format!("read {path}: {err}")))?;
        for entry in entries {
            let entry = entry.map_err(|err| FactError::Filesystem(err.to_string()))?;
            let entry_path = entry.path();
            if !entry_path.is_file() {
                continue;
            }
            let Some(file_name) = entry_path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let Some((name, gzipped)) = table_name(file_name) else {
                debug!(file = file_name, "skipping non-table file");
                continue;
            };
            let bytes = fs::read(&entry_path)
                .map_err(|err| FactError::Filesystem(format!("read {file_name}: {err}")))?;
            tables.insert(name, decode(&bytes, gzipped, &entry_path)?);
        }
        Ok(Self::from_tables(path.to_owned(), tables))
    }

    fn open_zip(path: &Utf8Path) -> Result<Self, FactError> {
        let file = fs::File::open(path.as_std_path())
            .map_err(|err| FactError::Filesystem(format!("open zip {path}: {err}")))?;
        let mut archive =
            ZipArchive::new(file).map_err(|err| FactError::Filesystem(err.to_string()))?;

        let mut tables = BTreeMap::new();
        for i in 0..archive.len() {
            let mut entry = archive
                .by_index(i)
                .map_err(|err| FactError::Filesystem(err.to_string()))?;
            if entry.is_dir() {
                continue;
            }
            let Some(enclosed) = entry.enclosed_name() else {
                return Err(FactError::Filesystem(
                    "zip entry path traversal detected".to_string(),
                ));
            };
            let Some(file_name) = enclosed.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let Some((name, gzipped)) = table_name(file_name) else {
                continue;
            };
            let mut bytes = Vec::new();
            entry
                .read_to_end(&mut bytes)
                .map_err(|err| FactError::Filesystem(err.to_string()))?;
            tables.insert(name, decode(&bytes, gzipped, &enclosed)?);
        }
        Ok(Self::from_tables(path.to_owned(), tables))
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn rows<T: DeserializeOwned>(&self, name: &str) -> Result<Vec<T>, FactError> {
        match self.tables.get(name) {
            Some(content) => parse_rows(name, content),
            None => Ok(Vec::new()),
        }
    }
}

fn table_name(file_name: &str) -> Option<(String, bool)> {
    if let Some(stem) = file_name.strip_suffix(".tsv.gz") {
        return Some((stem.to_string(), true));
    }
    file_name
        .strip_suffix(".tsv")
        .map(|stem| (stem.to_string(), false))
}

fn decode(bytes: &[u8], gzipped: bool, path: &Path) -> Result<String, FactError> {
    let raw = if gzipped {
        let mut out = Vec::new();
        GzDecoder::new(bytes)
            .read_to_end(&mut out)
            .map_err(|err| FactError::Filesystem(format!("gunzip {}: {err}", path.display())))?;
        out
    } else {
        bytes.to_vec()
    };
    String::from_utf8(raw)
        .map_err(|err| FactError::Filesystem(format!("{} is not UTF-8: {err}", path.display())))
}

/// Parses TSV text with a header row into `T`. Empty cells become JSON `null`.
pub fn parse_rows<T: DeserializeOwned>(table: &str, content: &str) -> Result<Vec<T>, FactError> {
    let mut lines = content
        .lines()
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .enumerate();
    let Some((_, header_line)) = lines.next() else {
        return Ok(Vec::new());
    };
    let header: Vec<String> = header_line
        .trim_start_matches('\u{feff}')
        .split('\t')
        .map(|column| column.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for (index, line) in lines {
        if line.trim().is_empty() {
            continue;
        }
        let cells: Vec<&str> = line.split('\t').collect();
        if cells.len() > header.len() {
            return Err(FactError::TableParse {
                table: table.to_string(),
                line: index + 1,
                message: format!("expected {} columns, found {}", header.len(), cells.len()),
            });
        }
        let mut record = Map::with_capacity(header.len());
        for (position, column) in header.iter().enumerate() {
            let value = match cells.get(position).map(|cell| cell.trim()) {
                Some(cell) if !cell.is_empty() => Value::String(cell.to_string()),
                _ => Value::Null,
            };
            record.insert(column.clone(), value);
        }
        let row = serde_json::from_value(Value::Object(record)).map_err(|err| {
            FactError::TableParse {
                table: table.to_string(),
                line: index + 1,
                message: err.to_string(),
            }
        })?;
        rows.push(row);
    }
    Ok(rows)
}
