//! Tabular Snapshots and Corpus Providers
//!
//! Delimited files exported from the metrics dashboard. The first line is a
//! title row and is ignored; the next line holds the column headers. Column
//! interpretation is explicit and testable:
//!
//! - the time column is the first header containing "time" (any case);
//!   tables without one are skipped by callers
//! - cells are coerced to numbers after stripping a trailing `%`

use crate::error::TableError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Lines ignored before the header row by default
pub const DEFAULT_SKIP_LINES: usize = 1;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// A named table of raw string cells
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    /// Source identifier (file name for on-disk tables)
    pub name: String,
    pub headers: Vec<String>,
    /// Rows may be shorter than `headers`; missing cells are absent
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(name: impl Into<String>, headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self {
            name: name.into(),
            headers,
            rows,
        }
    }

    /// Parse delimited text, ignoring `skip_lines` leading lines
    pub fn from_reader<R: Read>(
        name: impl Into<String>,
        reader: R,
        skip_lines: usize,
    ) -> Result<Self, TableError> {
        let name = name.into();
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut records = csv_reader.records().skip(skip_lines);
        let headers: Vec<String> = match records.next() {
            Some(record) => record
                .map_err(|source| TableError::Csv {
                    name: name.clone(),
                    source,
                })?
                .iter()
                .map(|h| h.trim().to_string())
                .collect(),
            None => return Err(TableError::MissingHeader(name)),
        };

        let mut rows = Vec::new();
        for record in records {
            let record = record.map_err(|source| TableError::Csv {
                name: name.clone(),
                source,
            })?;
            rows.push(record.iter().map(str::to_string).collect());
        }

        Ok(Self {
            name,
            headers,
            rows,
        })
    }

    pub fn from_path(path: impl AsRef<Path>, skip_lines: usize) -> Result<Self, TableError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|source| TableError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::from_reader(name, std::io::BufReader::new(file), skip_lines)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Cell at (row, column); `None` for ragged rows
    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        self.rows.get(row)?.get(column).map(String::as_str)
    }

    pub fn time_column(&self) -> Option<usize> {
        find_time_column(&self.headers)
    }
}

/// Index of the first header that contains "time", case-insensitive
pub fn find_time_column<S: AsRef<str>>(headers: &[S]) -> Option<usize> {
    headers
        .iter()
        .position(|h| h.as_ref().to_lowercase().contains("time"))
}

/// Parse a time cell. Naive values are taken as UTC; bare integers are
/// epoch seconds, or milliseconds when too large for seconds.
pub fn parse_timestamp(cell: &str) -> Option<DateTime<Utc>> {
    let cell = cell.trim();
    if cell.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(cell) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(cell, format) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(cell, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    if let Ok(epoch) = cell.parse::<i64>() {
        return if epoch.abs() >= 100_000_000_000 {
            DateTime::from_timestamp_millis(epoch)
        } else {
            DateTime::from_timestamp(epoch, 0)
        };
    }
    None
}

/// Coerce a cell to a number: strip a trailing `%` (no rescaling) and parse.
/// Empty, unparseable and non-finite cells are absent.
pub fn coerce_numeric(cell: &str) -> Option<f64> {
    let cell = cell.trim();
    let cell = cell.strip_suffix('%').unwrap_or(cell).trim();
    if cell.is_empty() {
        return None;
    }
    cell.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Source of training tables, decoupled from any storage layout
pub trait CorpusProvider {
    fn list_tables(&self) -> Result<Vec<RawTable>, TableError>;
}

/// Every `*.csv` file in one directory, in file-name order
#[derive(Debug, Clone)]
pub struct DirectoryCorpus {
    dir: PathBuf,
    skip_lines: usize,
}

impl DirectoryCorpus {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            skip_lines: DEFAULT_SKIP_LINES,
        }
    }

    pub fn with_skip_lines(mut self, skip_lines: usize) -> Self {
        self.skip_lines = skip_lines;
        self
    }

    /// Paths of the csv files this corpus would read
    pub fn csv_paths(&self) -> Result<Vec<PathBuf>, TableError> {
        let io_err = |source| TableError::Io {
            path: self.dir.clone(),
            source,
        };
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&self.dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            let is_csv = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
            if is_csv && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }
}

impl CorpusProvider for DirectoryCorpus {
    fn list_tables(&self) -> Result<Vec<RawTable>, TableError> {
        let mut tables = Vec::new();
        for path in self.csv_paths()? {
            match RawTable::from_path(&path, self.skip_lines) {
                Ok(table) => {
                    debug!(table = %table.name, columns = ?table.headers, "loaded table");
                    tables.push(table);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable table"),
            }
        }
        Ok(tables)
    }
}

/// Tables already in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryCorpus {
    tables: Vec<RawTable>,
}

impl InMemoryCorpus {
    pub fn new(tables: Vec<RawTable>) -> Self {
        Self { tables }
    }
}

impl CorpusProvider for InMemoryCorpus {
    fn list_tables(&self) -> Result<Vec<RawTable>, TableError> {
        Ok(self.tables.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;

    const SNAPSHOT: &str = "Lag export\n\
        Time,shard_id,max_lag_minutes\n\
        2024-05-01 00:00:00,s1,10\n\
        2024-05-01 01:00:00,s2\n";

    #[test]
    fn test_reader_skips_title_line() {
        let table = RawTable::from_reader("snap.csv", SNAPSHOT.as_bytes(), 1).unwrap();
        assert_eq!(table.headers, vec!["Time", "shard_id", "max_lag_minutes"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.cell(0, 2), Some("10"));
        assert_eq!(table.cell(1, 2), None);
        assert_eq!(table.time_column(), Some(0));
    }

    #[test]
    fn test_empty_input_has_no_header() {
        assert!(matches!(
            RawTable::from_reader("empty.csv", "title only\n".as_bytes(), 1),
            Err(TableError::MissingHeader(_))
        ));
    }

    #[test]
    fn test_find_time_column() {
        assert_eq!(find_time_column(&["value", "Timestamp"]), Some(1));
        assert_eq!(find_time_column(&["TIME", "x"]), Some(0));
        assert_eq!(find_time_column(&["value", "shard"]), None);
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-05-01 13:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-05-01T13:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-05-01T15:00:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-05-01 13:00"), Some(expected));
        assert_eq!(parse_timestamp("1714568400"), Some(expected));
        assert_eq!(parse_timestamp("1714568400000"), Some(expected));
        assert_eq!(
            parse_timestamp("2024-05-01"),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn test_coerce_numeric() {
        assert_eq!(coerce_numeric("12.5%"), Some(12.5));
        assert_eq!(coerce_numeric(" 3 "), Some(3.0));
        assert_eq!(coerce_numeric("%"), None);
        assert_eq!(coerce_numeric(""), None);
        assert_eq!(coerce_numeric("n/a"), None);
        assert_eq!(coerce_numeric("nan"), None);
    }

    #[test]
    fn test_directory_corpus_reads_csv_only() {
        let dir = tempfile::tempdir().unwrap();
        for (name, body) in [
            ("b.csv", SNAPSHOT),
            ("a.csv", SNAPSHOT),
            ("notes.txt", "ignored"),
        ] {
            let mut file = std::fs::File::create(dir.path().join(name)).unwrap();
            file.write_all(body.as_bytes()).unwrap();
        }

        let tables = DirectoryCorpus::new(dir.path()).list_tables().unwrap();
        let names: Vec<_> = tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a.csv", "b.csv"]);
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        assert!(
            DirectoryCorpus::new("/nonexistent/lagsentry")
                .list_tables()
                .is_err()
        );
    }
}
