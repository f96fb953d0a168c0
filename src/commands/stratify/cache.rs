use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use crate::config::{SYSTEM_ID_COLUMN, ensure_file_safe_name, ensure_split_label};
use crate::model::SimilarityRecord;
use crate::util::write_atomically;

use super::columnar::{
    PARQUET_EXTENSION, ParquetTable, encode_parquet, float_array, string_array,
};

pub const TRAIN_SYSTEM_ID_COLUMN: &str = "train_system_id";
const CACHE_PREFIX: &str = "max_similarities";
const CACHE_EXTENSION: &str = PARQUET_EXTENSION;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey {
    pub test_label: String,
    pub train_label: String,
    pub metric: String,
}

impl CacheKey {
    pub fn file_name(&self) -> String {
        format!(
            "{CACHE_PREFIX}__{}_vs_{}__{}.{CACHE_EXTENSION}",
            self.test_label, self.train_label, self.metric
        )
    }
}

/// Whether a metric relation came from disk or was just computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheOutcome {
    pub path: PathBuf,
    pub reused: bool,
}

/// Per-metric relation files for one test/train label pair.
///
/// The key → file map is built by scanning the directory once, so lookups
/// do not depend on which metrics were resolved earlier in the run.
#[derive(Debug, Clone)]
pub struct MetricCache {
    root: PathBuf,
    test_label: String,
    train_label: String,
    entries: BTreeMap<CacheKey, PathBuf>,
}

impl MetricCache {
    pub fn open(root: &Path, test_label: &str, train_label: &str) -> Result<Self> {
        ensure_split_label("test label", test_label)?;
        ensure_split_label("train label", train_label)?;
        let mut cache = Self {
            root: root.to_path_buf(),
            test_label: test_label.to_string(),
            train_label: train_label.to_string(),
            entries: BTreeMap::new(),
        };

        if !root.exists() {
            return Ok(cache);
        }

        let prefix = format!("{CACHE_PREFIX}__{test_label}_vs_{train_label}__");
        let suffix = format!(".{CACHE_EXTENSION}");
        let entries =
            fs::read_dir(root).with_context(|| format!("failed to read {}", root.display()))?;
        for entry in entries {
            let entry =
                entry.with_context(|| format!("failed to read entry in {}", root.display()))?;
            let path = entry.path();
            if !entry
                .file_type()
                .with_context(|| format!("failed to inspect file type: {}", path.display()))?
                .is_file()
            {
                continue;
            }

            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let Some(metric) = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(&suffix))
            else {
                continue;
            };
            if ensure_file_safe_name("metric", metric).is_err() {
                continue;
            }

            let key = cache.key(metric);
            debug!(metric = %metric, path = %path.display(), "found cached max similarities");
            cache.entries.insert(key, path);
        }

        Ok(cache)
    }

    pub fn key(&self, metric: &str) -> CacheKey {
        CacheKey {
            test_label: self.test_label.clone(),
            train_label: self.train_label.clone(),
            metric: metric.to_string(),
        }
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn path(&self, key: &CacheKey) -> Option<&Path> {
        self.entries.get(key).map(PathBuf::as_path)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&CacheKey, &PathBuf)> {
        self.entries.iter()
    }

    /// Writes the relation for `key`, replacing any previous entry.
    pub fn insert(&mut self, key: CacheKey, records: &[SimilarityRecord]) -> Result<PathBuf> {
        let path = self.root.join(key.file_name());
        let data = encode_relation(&key.metric, records)?;
        write_atomically(&path, &data)?;
        self.entries.insert(key, path.clone());
        Ok(path)
    }

    pub fn load(&self, key: &CacheKey) -> Result<Vec<SimilarityRecord>> {
        let Some(path) = self.path(key) else {
            bail!("no cached max similarities for metric {}", key.metric);
        };
        decode_relation(&key.metric, path)
            .with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Reuses the cached relation unless `overwrite` is set or none exists.
    pub fn resolve<F>(&mut self, metric: &str, overwrite: bool, compute: F) -> Result<CacheOutcome>
    where
        F: FnOnce() -> Result<Vec<SimilarityRecord>>,
    {
        let key = self.key(metric);
        if !overwrite && self.contains(&key) {
            let path = self.root.join(key.file_name());
            info!(metric = %metric, path = %path.display(), "reusing cached max similarities");
            return Ok(CacheOutcome { path, reused: true });
        }

        let records = compute()?;
        let path = self.insert(key, &records)?;
        info!(
            metric = %metric,
            path = %path.display(),
            records = records.len(),
            "wrote max similarities"
        );
        Ok(CacheOutcome {
            path,
            reused: false,
        })
    }
}

fn encode_relation(metric: &str, records: &[SimilarityRecord]) -> Result<Vec<u8>> {
    let mut sorted = records.iter().collect::<Vec<_>>();
    sorted.sort_by(|a, b| {
        a.system_id
            .cmp(&b.system_id)
            .then(a.train_system_id.cmp(&b.train_system_id))
    });

    encode_parquet(vec![
        (
            SYSTEM_ID_COLUMN,
            string_array(sorted.iter().map(|record| record.system_id.as_str())),
        ),
        (
            TRAIN_SYSTEM_ID_COLUMN,
            string_array(sorted.iter().map(|record| record.train_system_id.as_str())),
        ),
        (
            metric,
            float_array(sorted.iter().map(|record| record.similarity)),
        ),
    ])
    .with_context(|| format!("failed to encode relation for {metric}"))
}

/// Null similarities are skipped; a missing train column is allowed.
fn decode_relation(metric: &str, path: &Path) -> Result<Vec<SimilarityRecord>> {
    let table = ParquetTable::read(path)?;
    let system_ids = table.strings(SYSTEM_ID_COLUMN)?;
    let similarities = table.floats(metric)?;
    let train_ids = if table.has_column(TRAIN_SYSTEM_ID_COLUMN) {
        table.strings(TRAIN_SYSTEM_ID_COLUMN)?
    } else {
        vec![None; system_ids.len()]
    };

    let mut out = Vec::with_capacity(system_ids.len());
    for (row, ((system_id, train_system_id), similarity)) in system_ids
        .into_iter()
        .zip(train_ids)
        .zip(similarities)
        .enumerate()
    {
        let Some(similarity) = similarity else {
            continue;
        };
        let Some(system_id) = system_id else {
            bail!("row {} has no {SYSTEM_ID_COLUMN}", row + 1);
        };
        out.push(SimilarityRecord::new(
            system_id,
            train_system_id.unwrap_or_default(),
            similarity,
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_file_name_follows_label_pair_and_metric() {
        let key = CacheKey {
            test_label: "test".to_string(),
            train_label: "train".to_string(),
            metric: "pocket_qcov".to_string(),
        };
        assert_eq!(
            key.file_name(),
            "max_similarities__test_vs_train__pocket_qcov.parquet"
        );
    }

    #[test]
    fn open_indexes_only_matching_label_pair() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        for name in [
            "max_similarities__test_vs_train__pocket_qcov.parquet",
            "max_similarities__test_vs_train__pli_unique_qcov.parquet",
            "max_similarities__val_vs_train__pocket_qcov.parquet",
            "max_similarities__test_vs_train__pocket_qcov.parquet.partial",
            "max_similarities__test_vs_train__pocket_lddt.csv",
            "test_set.parquet",
        ] {
            fs::write(dir.path().join(name), "system_id\n").expect("fixture should write");
        }

        let cache = MetricCache::open(dir.path(), "test", "train").expect("cache should open");
        let metrics: Vec<&str> = cache.entries().map(|(key, _)| key.metric.as_str()).collect();
        assert_eq!(metrics, vec!["pli_unique_qcov", "pocket_qcov"]);
    }

    #[test]
    fn open_on_missing_directory_is_empty() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let cache = MetricCache::open(&dir.path().join("absent"), "test", "train")
            .expect("cache should open");
        assert_eq!(cache.entries().count(), 0);
    }

    #[test]
    fn resolve_reuses_existing_entry_unless_overwriting() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let mut cache = MetricCache::open(dir.path(), "test", "train").expect("cache should open");

        let first = cache
            .resolve("pocket_qcov", false, || {
                Ok(vec![SimilarityRecord::new("X", "A", 70.0)])
            })
            .expect("first resolve should compute");
        assert!(!first.reused);

        let second = cache
            .resolve("pocket_qcov", false, || {
                anyhow::bail!("cached metric must not be recomputed")
            })
            .expect("second resolve should reuse");
        assert!(second.reused);
        assert_eq!(second.path, first.path);

        let third = cache
            .resolve("pocket_qcov", true, || {
                Ok(vec![SimilarityRecord::new("X", "B", 20.0)])
            })
            .expect("overwrite should recompute");
        assert!(!third.reused);

        let key = cache.key("pocket_qcov");
        assert_eq!(
            cache.load(&key).expect("cache should load"),
            vec![SimilarityRecord::new("X", "B", 20.0)]
        );
    }

    #[test]
    fn reopened_cache_sees_previous_run() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let mut cache = MetricCache::open(dir.path(), "test", "train").expect("cache should open");
        let key = cache.key("pocket_lddt");
        cache
            .insert(key.clone(), &[SimilarityRecord::new("Y", "A", 12.5)])
            .expect("insert should succeed");

        let reopened = MetricCache::open(dir.path(), "test", "train").expect("cache should open");
        assert!(reopened.contains(&key));
        assert!(!reopened.contains(&reopened.key("pocket_qcov")));
    }

    #[test]
    fn encoded_relation_is_sorted_and_stable() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let records = vec![
            SimilarityRecord::new("Y", "A", 1.5),
            SimilarityRecord::new("X", "B", 30.0),
            SimilarityRecord::new("X", "A", 70.0),
        ];
        let mut reversed = records.clone();
        reversed.reverse();

        let encoded = encode_relation("m", &records).expect("encode should succeed");
        assert_eq!(
            encoded,
            encode_relation("m", &reversed).expect("encode should succeed")
        );

        let path = dir.path().join("relation.parquet");
        write_atomically(&path, &encoded).expect("write should succeed");
        let table = ParquetTable::read(&path).expect("relation should read");
        assert_eq!(
            table.column_names(),
            vec![SYSTEM_ID_COLUMN, TRAIN_SYSTEM_ID_COLUMN, "m"]
        );
        assert_eq!(
            decode_relation("m", &path).expect("decode should succeed"),
            vec![
                SimilarityRecord::new("X", "A", 70.0),
                SimilarityRecord::new("X", "B", 30.0),
                SimilarityRecord::new("Y", "A", 1.5),
            ]
        );
    }

    #[test]
    fn decode_relation_skips_null_values_and_tolerates_missing_train_column() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let path = dir.path().join("external.parquet");
        let values: arrow::array::ArrayRef =
            std::sync::Arc::new(arrow::array::Float64Array::from(vec![Some(70.0), None]));
        let data = encode_parquet(vec![("system_id", string_array(["X", "Y"])), ("m", values)])
            .expect("encode should succeed");
        write_atomically(&path, &data).expect("write should succeed");

        let records = decode_relation("m", &path).expect("decode should succeed");
        assert_eq!(records, vec![SimilarityRecord::new("X", "", 70.0)]);

        assert!(decode_relation("other", &path).is_err());
    }

    #[test]
    fn label_pairs_cannot_share_a_cache_file() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let mut cache = MetricCache::open(dir.path(), "a", "c").expect("cache should open");
        let key = cache.key("m");
        cache
            .insert(key, &[SimilarityRecord::new("X", "A", 10.0)])
            .expect("insert should succeed");

        let ambiguous = [("a_vs_b", "c"), ("a", "b_vs_c"), ("a_vs", "vs_c"), ("a", "r__x")];
        for (test_label, train_label) in ambiguous {
            let err = MetricCache::open(dir.path(), test_label, train_label)
                .expect_err("ambiguous label pair should be rejected");
            assert!(matches!(
                err.downcast_ref::<crate::error::StratifyError>(),
                Some(crate::error::StratifyError::Configuration(_))
            ));
        }

        fs::write(dir.path().join("max_similarities__a_vs_c__x__m.parquet"), "")
            .expect("fixture should write");
        let reopened = MetricCache::open(dir.path(), "a", "c").expect("cache should open");
        let metrics: Vec<&str> = reopened.entries().map(|(key, _)| key.metric.as_str()).collect();
        assert_eq!(metrics, vec!["m"]);
    }
}
