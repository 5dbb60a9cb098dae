//! In-memory record store and filter engine.
//!
//! The dataset is loaded once before the listener starts and is shared by
//! every connection as an `Arc<Dataset>`. Nothing writes to it afterwards,
//! so readers need no locking.

use crate::csv;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Filter term that selects every record.
pub const WILDCARD: &str = "*";

/// One row of the dataset. Every field is opaque text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Record {
    /// Positive case count
    pub positive: String,
    /// Test count
    pub tests: String,
    /// Date token as written in the source file
    pub date: String,
    pub discharged: String,
    pub expired: String,
    pub admitted: String,
    /// Region name
    pub region: String,
}

/// Immutable, ordered set of records.
#[derive(Debug, Default)]
pub struct Dataset {
    records: Vec<Record>,
}

impl Dataset {
    /// Build a dataset from already loaded records.
    pub fn new(records: Vec<Record>) -> Arc<Self> {
        Arc::new(Self { records })
    }

    /// Load a dataset from a CSV file.
    pub fn load(path: impl AsRef<Path>) -> Result<Arc<Self>, DatasetError> {
        let path = path.as_ref();
        let records = csv::load(path)?;
        info!(path = %path.display(), records = records.len(), "Dataset loaded");
        Ok(Self::new(records))
    }

    /// All records in file order.
    #[cfg(test)]
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Return every record whose region or date matches `filter`.
    ///
    /// An empty filter or `*` returns the whole dataset. Otherwise the filter
    /// is uppercased and a record matches when its region or date equals it,
    /// or when the uppercased region or date contains it. Matches keep file
    /// order and each record appears at most once.
    pub fn find(&self, filter: &str) -> Vec<Record> {
        if filter.is_empty() || filter == WILDCARD {
            return self.records.clone();
        }

        let filter = filter.to_uppercase();
        self.records
            .iter()
            .filter(|record| record.matches(&filter))
            .cloned()
            .collect()
    }
}

impl Record {
    /// `filter` must already be uppercased.
    fn matches(&self, filter: &str) -> bool {
        self.region == filter
            || self.date == filter
            || self.region.to_uppercase().contains(filter)
            || self.date.to_uppercase().contains(filter)
    }
}

/// Dataset loading errors. All of them abort startup.
#[derive(Debug)]
pub enum DatasetError {
    /// The file could not be opened or read.
    Io(PathBuf, std::io::Error),
    /// A quoted field was still open at end of input.
    UnterminatedQuote { line: usize },
    /// A row had fewer columns than a record needs.
    TooFewFields { line: usize, found: usize },
    /// A row's column count differs from the first row.
    FieldCount {
        line: usize,
        expected: usize,
        found: usize,
    },
}

impl fmt::Display for DatasetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetError::Io(path, e) => {
                write!(f, "Failed to read dataset '{}': {}", path.display(), e)
            }
            DatasetError::UnterminatedQuote { line } => {
                write!(f, "line {line}: unterminated quoted field")
            }
            DatasetError::TooFewFields { line, found } => write!(
                f,
                "line {line}: expected at least {} fields, found {found}",
                csv::RECORD_FIELDS
            ),
            DatasetError::FieldCount {
                line,
                expected,
                found,
            } => write!(
                f,
                "line {line}: wrong number of fields (expected {expected}, found {found})"
            ),
        }
    }
}

impl std::error::Error for DatasetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DatasetError::Io(_, e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
pub(crate) fn record(region: &str, date: &str) -> Record {
    Record {
        positive: "10".to_string(),
        tests: "100".to_string(),
        date: date.to_string(),
        discharged: "1".to_string(),
        expired: "0".to_string(),
        admitted: "3".to_string(),
        region: region.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Arc<Dataset> {
        Dataset::new(vec![
            record("Sindh", "4/4/2020"),
            record("Punjab", "4/4/2020"),
            record("Sindh", "5/4/2020"),
            record("KPK", "6/4/2020"),
        ])
    }

    #[test]
    fn test_wildcard_returns_everything() {
        let dataset = sample();
        assert_eq!(dataset.find("*"), dataset.records());
        assert_eq!(dataset.find(""), dataset.records());
    }

    #[test]
    fn test_find_by_region_is_case_insensitive() {
        let dataset = sample();
        let result = dataset.find("sindh");
        assert_eq!(result.len(), 2);
        assert!(result.iter().all(|r| r.region == "Sindh"));
        assert_eq!(result[0].date, "4/4/2020");
        assert_eq!(result[1].date, "5/4/2020");
    }

    #[test]
    fn test_find_by_date_exact() {
        let dataset = sample();
        let result = dataset.find("4/4/2020");
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].region, "Sindh");
        assert_eq!(result[1].region, "Punjab");
    }

    #[test]
    fn test_find_by_substring() {
        let dataset = sample();
        let result = dataset.find("/4/2020");
        assert_eq!(result.len(), 4);

        let result = dataset.find("unj");
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].region, "Punjab");
    }

    #[test]
    fn test_find_no_duplicates() {
        // "KPK" matches both exactly and by containment
        let dataset = sample();
        let result = dataset.find("KPK");
        assert_eq!(result, vec![record("KPK", "6/4/2020")]);
    }

    #[test]
    fn test_find_nothing() {
        let dataset = sample();
        assert!(dataset.find("Balochistan").is_empty());
    }

    #[test]
    fn test_find_matches_exactly_the_predicate() {
        let dataset = sample();
        for term in ["s", "4", "2020", "pun", "x", "6/4"] {
            let upper = term.to_uppercase();
            let result = dataset.find(term);
            let expected: Vec<Record> = dataset
                .records()
                .iter()
                .filter(|r| {
                    r.region.to_uppercase().contains(&upper) || r.date.to_uppercase().contains(&upper)
                })
                .cloned()
                .collect();
            assert_eq!(result, expected, "term {term:?}");
        }
    }

    #[test]
    fn test_record_serializes_with_source_keys() {
        let json = serde_json::to_string(&record("Sindh", "4/4/2020")).unwrap();
        assert_eq!(
            json,
            r#"{"Positive":"10","Tests":"100","Date":"4/4/2020","Discharged":"1","Expired":"0","Admitted":"3","Region":"Sindh"}"#
        );
    }
}
