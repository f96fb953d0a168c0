use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::config::StratificationConfig;
use crate::model::StratifyRunSummary;

use super::stratify::{
    MetricCache, read_stratified_table, run_manifest_path, stratified_table_path, validate_labels,
};

#[derive(Debug, Default)]
struct StatusReport {
    cached: Vec<(String, PathBuf)>,
    missing: Vec<String>,
    unconfigured: Vec<(String, PathBuf)>,
    manifest: Option<StratifyRunSummary>,
    table: Option<TableStatus>,
}

#[derive(Debug)]
struct TableStatus {
    path: PathBuf,
    systems: usize,
    not_novel: usize,
    categories: Vec<(String, usize)>,
}

pub fn run(args: StatusArgs) -> Result<()> {
    info!(
        output_dir = %args.output_dir.display(),
        train_label = %args.train_label,
        test_label = %args.test_label,
        "status requested"
    );

    let report = inspect(&args)?;
    for (metric, path) in &report.cached {
        info!(metric = %metric, path = %path.display(), "cached");
    }
    for metric in &report.missing {
        warn!(metric = %metric, "not cached");
    }
    for (metric, path) in &report.unconfigured {
        warn!(metric = %metric, path = %path.display(), "cached metric is not configured");
    }
    info!(
        cached = report.cached.len(),
        missing = report.missing.len(),
        "per-metric cache state"
    );

    let manifest_path = run_manifest_path(&args.output_dir, &args.test_label);
    match &report.manifest {
        Some(summary) => {
            let counts = summary.counts.as_ref();
            info!(
                run_id = %summary.run_id.as_deref().unwrap_or_default(),
                status = %summary.status.as_deref().unwrap_or_default(),
                updated_at = %summary.updated_at.as_deref().unwrap_or_default(),
                output_sha256 = %summary.output_sha256.as_deref().unwrap_or_default(),
                output_table = %summary
                    .paths
                    .as_ref()
                    .map(|paths| paths.output_table.as_str())
                    .unwrap_or_default(),
                train_systems = counts.map(|c| c.train_systems).unwrap_or_default(),
                test_systems = counts.map(|c| c.test_systems).unwrap_or_default(),
                output_systems = counts.map(|c| c.output_systems).unwrap_or_default(),
                passing_quality = counts.map(|c| c.passing_quality).unwrap_or_default(),
                "loaded run manifest"
            );
        }
        None => warn!(path = %manifest_path.display(), "run manifest missing"),
    }

    match &report.table {
        Some(table) => {
            for (category, systems) in &table.categories {
                info!(category = %category, systems, "stratified test set category");
            }
            info!(
                path = %table.path.display(),
                systems = table.systems,
                not_novel = table.not_novel,
                "stratified test set"
            );
        }
        None => {
            let table_path = stratified_table_path(&args.output_dir, &args.test_label);
            warn!(path = %table_path.display(), "stratified test set missing");
        }
    }

    Ok(())
}

fn inspect(args: &StatusArgs) -> Result<StatusReport> {
    let config = StratificationConfig::load(args.config.as_deref())?;
    config.validate()?;
    validate_labels(&args.train_label, &args.test_label)?;

    let mut report = StatusReport::default();
    let cache = MetricCache::open(&args.output_dir, &args.test_label, &args.train_label)?;
    for metric in &config.metrics {
        match cache.path(&cache.key(metric)) {
            Some(path) => report.cached.push((metric.clone(), path.to_path_buf())),
            None => report.missing.push(metric.clone()),
        }
    }
    for (key, path) in cache.entries() {
        if !config.metrics.contains(&key.metric) {
            report.unconfigured.push((key.metric.clone(), path.clone()));
        }
    }

    let manifest_path = run_manifest_path(&args.output_dir, &args.test_label);
    if manifest_path.exists() {
        let raw = fs::read(&manifest_path)
            .with_context(|| format!("failed to read {}", manifest_path.display()))?;
        let summary: StratifyRunSummary = serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse {}", manifest_path.display()))?;
        report.manifest = Some(summary);
    }

    let table_path = stratified_table_path(&args.output_dir, &args.test_label);
    if table_path.exists() {
        let table = read_stratified_table(&table_path)?;
        let categories = table
            .categories
            .iter()
            .enumerate()
            .map(|(index, category)| {
                let systems = table.rows.iter().filter(|row| row.categories[index]).count();
                (category.clone(), systems)
            })
            .collect();
        report.table = Some(TableStatus {
            path: table_path,
            systems: table.rows.len(),
            not_novel: table.rows.iter().filter(|row| row.not_novel).count(),
            categories,
        });
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::model::SimilarityRecord;

    fn args(output_dir: &Path) -> StatusArgs {
        StatusArgs {
            output_dir: output_dir.to_path_buf(),
            train_label: "train".to_string(),
            test_label: "test".to_string(),
            config: None,
        }
    }

    #[test]
    fn inspect_reports_cached_missing_and_unconfigured_metrics() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let mut cache = MetricCache::open(dir.path(), "test", "train").expect("cache should open");
        for metric in ["pocket_qcov", "retired_metric"] {
            let key = cache.key(metric);
            cache
                .insert(key, &[SimilarityRecord::new("X", "A", 70.0)])
                .expect("insert should succeed");
        }

        let manifest_path = run_manifest_path(dir.path(), "test");
        fs::create_dir_all(manifest_path.parent().expect("manifest dir"))
            .expect("manifest dir should be created");
        fs::write(
            &manifest_path,
            r#"{
                "run_id": "stratify-20260101T000000Z",
                "status": "completed",
                "counts": {
                    "train_systems": 2,
                    "test_systems": 3,
                    "output_systems": 2,
                    "passing_quality": 1
                }
            }"#,
        )
        .expect("manifest should write");

        let report = inspect(&args(dir.path())).expect("status should succeed");
        let cached: Vec<&str> = report.cached.iter().map(|(m, _)| m.as_str()).collect();
        assert_eq!(cached, vec!["pocket_qcov"]);
        assert_eq!(report.missing.len(), 8);
        assert!(report.missing.iter().any(|metric| metric == "tanimoto_similarity_max"));
        let unconfigured: Vec<&str> =
            report.unconfigured.iter().map(|(m, _)| m.as_str()).collect();
        assert_eq!(unconfigured, vec!["retired_metric"]);

        let manifest = report.manifest.expect("manifest should be read");
        assert_eq!(manifest.status.as_deref(), Some("completed"));
        assert_eq!(manifest.counts.map(|c| c.output_systems), Some(2));
        assert!(report.table.is_none());

        run(args(dir.path())).expect("status command should succeed");
    }

    #[test]
    fn inspect_on_empty_output_dir_reports_everything_missing() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let report = inspect(&args(&dir.path().join("absent"))).expect("status should succeed");
        assert!(report.cached.is_empty());
        assert_eq!(report.missing.len(), 9);
        assert!(report.manifest.is_none());
        assert!(report.table.is_none());
    }

    #[test]
    fn inspect_rejects_ambiguous_labels() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let mut status = args(dir.path());
        status.test_label = "a_vs_b".to_string();
        assert!(inspect(&status).is_err());

        status.test_label = "train".to_string();
        status.config = Some(PathBuf::from("does-not-exist.json"));
        assert!(inspect(&status).is_err());
    }

    #[test]
    fn stratified_table_counts_are_reported() {
        use crate::model::{MaxSimilarityRow, MaxSimilarityTable};

        use super::super::stratify::write_stratified_table;

        let dir = tempfile::tempdir().expect("temp dir should be created");
        let table = MaxSimilarityTable {
            metrics: vec!["pocket_qcov".to_string()],
            categories: vec!["novel_pocket".to_string()],
            rows: vec![
                MaxSimilarityRow {
                    system_id: "X".to_string(),
                    similarities: vec![70.0],
                    passes_quality: true,
                    categories: vec![false],
                    not_novel: true,
                },
                MaxSimilarityRow {
                    system_id: "Y".to_string(),
                    similarities: vec![10.0],
                    passes_quality: true,
                    categories: vec![true],
                    not_novel: false,
                },
            ],
        };
        write_stratified_table(&stratified_table_path(dir.path(), "test"), &table)
            .expect("table should write");

        let report = inspect(&args(dir.path())).expect("status should succeed");
        let status = report.table.expect("table should be read");
        assert_eq!(status.systems, 2);
        assert_eq!(status.not_novel, 1);
        assert_eq!(status.categories, vec![("novel_pocket".to_string(), 1)]);
    }
}
