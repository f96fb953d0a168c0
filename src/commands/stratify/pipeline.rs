use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::info;

use crate::config::{StratificationConfig, ensure_split_label};
use crate::error::StratifyError;
use crate::model::{MaxSimilarityTable, MetricCacheEntry};
use crate::report::{ReportLevel, Reporter};
use crate::util::{ensure_directory, sha256_file};

use super::aggregate::{MetricRelation, aggregate_max_similarities};
use super::cache::MetricCache;
use super::output::{stratified_table_path, write_stratified_table};
use super::providers::MetricProvider;
use super::quality::{QualityIndex, annotate_quality};
use super::split_registry::SplitRegistry;
use super::stratifier::stratify_test_set;

/// The external sources one run draws on.
pub struct Collaborators<'a> {
    pub cross_similarity: &'a dyn MetricProvider,
    pub ligand_similarity: &'a dyn MetricProvider,
    pub quality_index: &'a dyn QualityIndex,
}

pub struct StratifyRequest<'a> {
    pub config: &'a StratificationConfig,
    pub registry: &'a SplitRegistry,
    pub output_dir: &'a Path,
    pub train_label: &'a str,
    pub test_label: &'a str,
    pub overwrite: bool,
}

#[derive(Debug)]
pub struct StratifyOutcome {
    pub table: MaxSimilarityTable,
    pub metrics: Vec<MetricCacheEntry>,
    pub output_path: PathBuf,
    pub output_sha256: String,
}

pub fn validate_labels(train_label: &str, test_label: &str) -> Result<()> {
    ensure_split_label("train label", train_label)?;
    ensure_split_label("test label", test_label)?;
    if train_label == test_label {
        return Err(StratifyError::configuration(format!(
            "train and test labels must differ (both are {train_label:?})"
        ))
        .into());
    }
    Ok(())
}

/// Resolves every configured metric through the cache, then loads all of
/// them back. Aggregation only starts once every metric is on disk.
pub fn compute_train_test_max_similarity(
    request: &StratifyRequest<'_>,
    collaborators: &Collaborators<'_>,
    cache: &mut MetricCache,
) -> Result<(Vec<MetricRelation>, Vec<MetricCacheEntry>)> {
    let test = request.registry.test();
    let train = request.registry.train();

    let mut outcomes = Vec::with_capacity(request.config.metrics.len());
    for metric in &request.config.metrics {
        let provider = if request.config.is_ligand_metric(metric) {
            collaborators.ligand_similarity
        } else {
            collaborators.cross_similarity
        };
        let outcome = cache.resolve(metric, request.overwrite, || {
            provider.compute(metric, test, train)
        })?;
        outcomes.push(outcome);
    }

    let mut relations = Vec::with_capacity(request.config.metrics.len());
    let mut entries = Vec::with_capacity(request.config.metrics.len());
    for (metric, outcome) in request.config.metrics.iter().zip(outcomes) {
        let records = cache.load(&cache.key(metric))?;
        entries.push(MetricCacheEntry {
            metric: metric.clone(),
            path: outcome.path.display().to_string(),
            reused: outcome.reused,
            record_count: records.len(),
            sha256: sha256_file(&outcome.path)?,
        });
        relations.push(MetricRelation {
            metric: metric.clone(),
            records,
        });
    }

    Ok((relations, entries))
}

/// Split registry → per-metric similarities → aggregation → quality →
/// novelty labels → `<test_label>_set.parquet`.
///
/// Nothing is written to the final path unless every step succeeds.
pub fn run_stratification(
    request: &StratifyRequest<'_>,
    collaborators: &Collaborators<'_>,
    reporter: &dyn Reporter,
) -> Result<StratifyOutcome> {
    request.config.validate()?;
    validate_labels(request.train_label, request.test_label)?;

    let registry = request.registry;
    reporter.emit(
        ReportLevel::Info,
        "split.loaded",
        &[("train", registry.train().len()), ("test", registry.test().len())],
    );

    ensure_directory(request.output_dir)?;
    let mut cache = MetricCache::open(request.output_dir, request.test_label, request.train_label)?;
    let (relations, metrics) = compute_train_test_max_similarity(request, collaborators, &mut cache)?;

    let mut table = aggregate_max_similarities(&relations, registry.test(), reporter);
    let lookup = collaborators.quality_index.lookup(registry.test())?;
    annotate_quality(&mut table, &lookup, reporter);
    stratify_test_set(&mut table, request.config, reporter)?;

    let output_path = stratified_table_path(request.output_dir, request.test_label);
    write_stratified_table(&output_path, &table)?;
    let output_sha256 = sha256_file(&output_path)?;
    info!(
        path = %output_path.display(),
        systems = table.rows.len(),
        sha256 = %output_sha256,
        "wrote stratified test set"
    );

    Ok(StratifyOutcome {
        table,
        metrics,
        output_path,
        output_sha256,
    })
}
