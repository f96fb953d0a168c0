use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result, bail};
use csv::{ReaderBuilder, Trim};

use crate::config::SYSTEM_ID_COLUMN;
use crate::error::StratifyError;

use super::columnar::ParquetTable;

pub const SPLIT_COLUMN: &str = "split";

/// Train and test membership read once from a split table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitRegistry {
    train: BTreeSet<String>,
    test: BTreeSet<String>,
}

impl SplitRegistry {
    /// `.csv` files are read as CSV; anything else is read as Parquet.
    pub fn load(path: &Path, train_label: &str, test_label: &str) -> Result<Self> {
        let is_csv = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(".csv"));
        let loaded = if is_csv {
            let file =
                File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
            Self::from_reader(file, train_label, test_label)
        } else {
            Self::from_parquet(path, train_label, test_label)
        };
        loaded.with_context(|| format!("failed to load split table {}", path.display()))
    }

    pub fn from_parquet(path: &Path, train_label: &str, test_label: &str) -> Result<Self> {
        let table = ParquetTable::read(path)?;
        split_column_indices(&table.column_names())?;

        let system_ids = table.strings(SYSTEM_ID_COLUMN)?;
        let labels = table.strings(SPLIT_COLUMN)?;
        let mut assignments = Assignments::new(train_label, test_label);
        for (row, (system_id, label)) in system_ids.into_iter().zip(labels).enumerate() {
            assignments.record(
                row + 1,
                system_id.as_deref().unwrap_or_default(),
                label.as_deref().unwrap_or_default(),
            )?;
        }
        Ok(assignments.finish())
    }

    /// Rows labelled with anything other than the two labels are dropped.
    pub fn from_reader<R: Read>(reader: R, train_label: &str, test_label: &str) -> Result<Self> {
        let mut reader = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
        let headers = reader.headers().context("failed to read split table header")?.clone();
        let columns = headers.iter().collect::<Vec<&str>>();
        let (system_idx, split_idx) = split_column_indices(&columns)?;

        let mut assignments = Assignments::new(train_label, test_label);
        for (line, record) in reader.records().enumerate() {
            let record = record.with_context(|| format!("failed to read split row {}", line + 1))?;
            assignments.record(
                line + 1,
                record.get(system_idx).unwrap_or_default(),
                record.get(split_idx).unwrap_or_default(),
            )?;
        }
        Ok(assignments.finish())
    }

    pub fn train(&self) -> &BTreeSet<String> {
        &self.train
    }

    pub fn test(&self) -> &BTreeSet<String> {
        &self.test
    }
}

fn split_column_indices(columns: &[&str]) -> Result<(usize, usize)> {
    let position = |wanted: &str| columns.iter().position(|name| *name == wanted);
    if let (Some(system_idx), Some(split_idx)) = (position(SYSTEM_ID_COLUMN), position(SPLIT_COLUMN))
    {
        return Ok((system_idx, split_idx));
    }

    let missing = [SYSTEM_ID_COLUMN, SPLIT_COLUMN]
        .into_iter()
        .filter(|column| position(*column).is_none())
        .collect::<Vec<&str>>();
    Err(StratifyError::configuration(format!(
        "split table is missing required column(s): {}",
        missing.join(", ")
    ))
    .into())
}

struct Assignments<'a> {
    train_label: &'a str,
    test_label: &'a str,
    assigned: BTreeMap<String, bool>,
}

impl<'a> Assignments<'a> {
    fn new(train_label: &'a str, test_label: &'a str) -> Self {
        Self {
            train_label,
            test_label,
            assigned: BTreeMap::new(),
        }
    }

    fn record(&mut self, row: usize, system_id: &str, label: &str) -> Result<()> {
        let is_train = if label == self.train_label {
            true
        } else if label == self.test_label {
            false
        } else {
            return Ok(());
        };

        if system_id.is_empty() {
            bail!("split row {row} has an empty {SYSTEM_ID_COLUMN}");
        }

        match self.assigned.get(system_id) {
            Some(previous) if *previous != is_train => Err(StratifyError::configuration(format!(
                "system {system_id} is labelled both {} and {}",
                self.train_label, self.test_label
            ))
            .into()),
            Some(_) => Ok(()),
            None => {
                self.assigned.insert(system_id.to_string(), is_train);
                Ok(())
            }
        }
    }

    fn finish(self) -> SplitRegistry {
        let mut train = BTreeSet::new();
        let mut test = BTreeSet::new();
        for (system_id, is_train) in self.assigned {
            if is_train {
                train.insert(system_id);
            } else {
                test.insert(system_id);
            }
        }
        SplitRegistry { train, test }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_reader_drops_other_partitions() {
        let raw = "system_id,split,cluster\nA,train,c1\nB,train,c2\nX,test,c1\nV,val,c3\nY,test,c4\n";
        let registry =
            SplitRegistry::from_reader(raw.as_bytes(), "train", "test").expect("split should load");

        assert_eq!(
            registry.train().iter().cloned().collect::<Vec<_>>(),
            vec!["A", "B"]
        );
        assert_eq!(
            registry.test().iter().cloned().collect::<Vec<_>>(),
            vec!["X", "Y"]
        );
    }

    #[test]
    fn from_reader_honours_custom_labels() {
        let raw = "split,system_id\nremoved,A\nposebusters,X\ntrain,B\n";
        let registry = SplitRegistry::from_reader(raw.as_bytes(), "removed", "posebusters")
            .expect("split should load");

        assert!(registry.train().contains("A"));
        assert!(!registry.train().contains("B"));
        assert!(registry.test().contains("X"));
    }

    #[test]
    fn from_reader_reports_missing_columns() {
        let raw = "system,split\nA,train\n";
        let err = SplitRegistry::from_reader(raw.as_bytes(), "train", "test")
            .expect_err("missing column should fail");

        match err.downcast_ref::<StratifyError>() {
            Some(StratifyError::Configuration(message)) => {
                assert!(message.contains("system_id"), "unexpected message: {message}");
            }
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn from_reader_rejects_system_in_both_partitions() {
        let raw = "system_id,split\nA,train\nA,test\n";
        let err = SplitRegistry::from_reader(raw.as_bytes(), "train", "test")
            .expect_err("conflicting labels should fail");
        assert!(matches!(
            err.downcast_ref::<StratifyError>(),
            Some(StratifyError::Configuration(_))
        ));
    }

    #[test]
    fn from_reader_tolerates_repeated_rows() {
        let raw = "system_id,split\nX,test\nX,test\n";
        let registry =
            SplitRegistry::from_reader(raw.as_bytes(), "train", "test").expect("split should load");
        assert_eq!(registry.test().len(), 1);
        assert!(registry.train().is_empty());
    }

    fn write_split_parquet(path: &Path, rows: &[(Option<&str>, Option<&str>)]) {
        use std::sync::Arc;

        use arrow::array::{ArrayRef, StringArray};

        use super::super::columnar::encode_parquet;
        use crate::util::write_atomically;

        let system_ids: ArrayRef =
            Arc::new(rows.iter().map(|(id, _)| *id).collect::<StringArray>());
        let labels: ArrayRef =
            Arc::new(rows.iter().map(|(_, label)| *label).collect::<StringArray>());
        let data = encode_parquet(vec![(SYSTEM_ID_COLUMN, system_ids), (SPLIT_COLUMN, labels)])
            .expect("encode should succeed");
        write_atomically(path, &data).expect("write should succeed");
    }

    #[test]
    fn load_reads_parquet_split_tables() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let path = dir.path().join("split.parquet");
        write_split_parquet(
            &path,
            &[
                (Some("A"), Some("train")),
                (Some("X"), Some("test")),
                (Some("V"), Some("val")),
                (Some("Z"), None),
                (None, Some("removed")),
            ],
        );

        let registry = SplitRegistry::load(&path, "train", "test").expect("split should load");
        assert_eq!(registry.train().iter().cloned().collect::<Vec<_>>(), vec!["A"]);
        assert_eq!(registry.test().iter().cloned().collect::<Vec<_>>(), vec!["X"]);
    }

    #[test]
    fn load_dispatches_csv_by_extension() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let path = dir.path().join("split.csv");
        std::fs::write(&path, "system_id,split\nA,train\nX,test\n")
            .expect("fixture should write");

        let registry = SplitRegistry::load(&path, "train", "test").expect("split should load");
        assert!(registry.train().contains("A"));
        assert!(registry.test().contains("X"));
    }

    #[test]
    fn parquet_split_checks_columns_and_conflicts() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let conflicting = dir.path().join("conflict.parquet");
        write_split_parquet(
            &conflicting,
            &[(Some("A"), Some("train")), (Some("A"), Some("test"))],
        );
        let err = SplitRegistry::load(&conflicting, "train", "test")
            .expect_err("conflicting labels should fail");
        assert!(matches!(
            err.downcast_ref::<StratifyError>(),
            Some(StratifyError::Configuration(_))
        ));

        let missing_id = dir.path().join("missing_id.parquet");
        write_split_parquet(&missing_id, &[(None, Some("test"))]);
        assert!(SplitRegistry::load(&missing_id, "train", "test").is_err());
    }
}
