use serde::{Deserialize, Serialize};

use crate::config::StratificationConfig;
use crate::report::ReportEvent;

/// One similarity measurement from a test system to a train system.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityRecord {
    pub system_id: String,
    pub train_system_id: String,
    pub similarity: f64,
}

impl SimilarityRecord {
    pub fn new(
        system_id: impl Into<String>,
        train_system_id: impl Into<String>,
        similarity: f64,
    ) -> Self {
        Self {
            system_id: system_id.into(),
            train_system_id: train_system_id.into(),
            similarity,
        }
    }
}

/// Per test system: max similarity per metric, quality and novelty labels.
///
/// `similarities` is aligned with `MaxSimilarityTable::metrics`, `categories`
/// with `MaxSimilarityTable::categories`.
#[derive(Debug, Clone, PartialEq)]
pub struct MaxSimilarityRow {
    pub system_id: String,
    pub similarities: Vec<f64>,
    pub passes_quality: bool,
    pub categories: Vec<bool>,
    pub not_novel: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MaxSimilarityTable {
    pub metrics: Vec<String>,
    pub categories: Vec<String>,
    pub rows: Vec<MaxSimilarityRow>,
}

impl MaxSimilarityTable {
    pub fn metric_index(&self, metric: &str) -> Option<usize> {
        self.metrics.iter().position(|m| m == metric)
    }

    #[cfg(test)]
    pub fn category_index(&self, category: &str) -> Option<usize> {
        self.categories.iter().position(|c| c == category)
    }

    #[cfg(test)]
    pub fn row(&self, system_id: &str) -> Option<&MaxSimilarityRow> {
        self.rows.iter().find(|row| row.system_id == system_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricCacheEntry {
    pub metric: String,
    pub path: String,
    pub reused: bool,
    pub record_count: usize,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StratifyPaths {
    pub split_file: String,
    pub data_dir: String,
    pub output_dir: String,
    pub similarity_db: String,
    pub annotation_db: String,
    pub fingerprint_db: String,
    pub output_table: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StratifyCounts {
    pub train_systems: usize,
    pub test_systems: usize,
    pub output_systems: usize,
    pub passing_quality: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StratifyRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub status: String,
    pub started_at: String,
    pub updated_at: String,
    pub command: String,
    pub train_label: String,
    pub test_label: String,
    pub overwrite: bool,
    pub paths: StratifyPaths,
    pub counts: StratifyCounts,
    pub metrics: Vec<MetricCacheEntry>,
    pub output_sha256: String,
    pub config: StratificationConfig,
    pub events: Vec<ReportEvent>,
}

/// The subset of the run manifest `status` reads back.
#[derive(Debug, Clone, Deserialize)]
pub struct StratifyRunSummary {
    pub run_id: Option<String>,
    pub status: Option<String>,
    pub updated_at: Option<String>,
    pub output_sha256: Option<String>,
    pub counts: Option<StratifyCounts>,
    pub paths: Option<StratifyPaths>,
}
