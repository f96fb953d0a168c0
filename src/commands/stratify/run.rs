use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use tracing::info;

use crate::cli::StratifyArgs;
use crate::config::StratificationConfig;
use crate::model::{StratifyCounts, StratifyPaths, StratifyRunManifest};
use crate::report::{MemoryReporter, TracingReporter};
use crate::util::{now_utc_string, utc_compact_string, write_json_pretty};

use super::fingerprints::SqliteLigandSource;
use super::pipeline::{Collaborators, StratifyOutcome, StratifyRequest, run_stratification};
use super::providers::{CrossSimilarityProvider, LigandSimilarityProvider};
use super::quality::SqliteQualityIndex;
use super::similarity_source::SqliteCrossSimilarity;
use super::split_registry::SplitRegistry;

pub fn run(args: StratifyArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("stratify-{}", utc_compact_string(started_ts));

    info!(
        run_id = %run_id,
        split_file = %args.split_file.display(),
        output_dir = %args.output_dir.display(),
        train_label = %args.train_label,
        test_label = %args.test_label,
        overwrite = args.overwrite,
        "starting test set stratification"
    );

    let config = StratificationConfig::load(args.config.as_deref())?;
    config.validate()?;
    let registry = SplitRegistry::load(&args.split_file, &args.train_label, &args.test_label)?;
    info!(
        train = registry.train().len(),
        test = registry.test().len(),
        "loaded split table"
    );

    let cross_similarity =
        CrossSimilarityProvider::new(SqliteCrossSimilarity::new(args.similarity_db_path()));
    let ligand_similarity = LigandSimilarityProvider::new(SqliteLigandSource::new(
        args.annotation_db_path(),
        args.fingerprint_db_path(),
    ));
    let quality_index = SqliteQualityIndex::new(args.annotation_db_path());
    let collaborators = Collaborators {
        cross_similarity: &cross_similarity,
        ligand_similarity: &ligand_similarity,
        quality_index: &quality_index,
    };

    let request = StratifyRequest {
        config: &config,
        registry: &registry,
        output_dir: &args.output_dir,
        train_label: &args.train_label,
        test_label: &args.test_label,
        overwrite: args.overwrite,
    };
    let reporter = MemoryReporter::forwarding(TracingReporter);
    let outcome = run_stratification(&request, &collaborators, &reporter)?;

    let manifest_path = run_manifest_path(&args.output_dir, &args.test_label);
    let manifest = StratifyRunManifest {
        manifest_version: 1,
        run_id,
        status: "completed".to_string(),
        started_at,
        updated_at: now_utc_string(),
        command: render_stratify_command(&args),
        train_label: args.train_label.clone(),
        test_label: args.test_label.clone(),
        overwrite: args.overwrite,
        paths: render_paths(&args, &outcome),
        counts: StratifyCounts {
            train_systems: registry.train().len(),
            test_systems: registry.test().len(),
            output_systems: outcome.table.rows.len(),
            passing_quality: outcome
                .table
                .rows
                .iter()
                .filter(|row| row.passes_quality)
                .count(),
        },
        metrics: outcome.metrics.clone(),
        output_sha256: outcome.output_sha256.clone(),
        config,
        events: reporter.events(),
    };
    write_json_pretty(&manifest_path, &manifest)?;

    info!(path = %manifest_path.display(), "wrote stratification run manifest");
    info!(
        systems = outcome.table.rows.len(),
        metrics_reused = outcome.metrics.iter().filter(|entry| entry.reused).count(),
        "stratification completed"
    );

    Ok(())
}

pub fn run_manifest_path(output_dir: &Path, test_label: &str) -> PathBuf {
    output_dir
        .join("manifests")
        .join(format!("{test_label}_set_run.json"))
}

fn render_paths(args: &StratifyArgs, outcome: &StratifyOutcome) -> StratifyPaths {
    StratifyPaths {
        split_file: args.split_file.display().to_string(),
        data_dir: args.data_dir.display().to_string(),
        output_dir: args.output_dir.display().to_string(),
        similarity_db: args.similarity_db_path().display().to_string(),
        annotation_db: args.annotation_db_path().display().to_string(),
        fingerprint_db: args.fingerprint_db_path().display().to_string(),
        output_table: outcome.output_path.display().to_string(),
    }
}

fn render_stratify_command(args: &StratifyArgs) -> String {
    let mut command = vec![
        "plinder-stratify".to_string(),
        "stratify".to_string(),
        "--split-file".to_string(),
        args.split_file.display().to_string(),
        "--data-dir".to_string(),
        args.data_dir.display().to_string(),
        "--output-dir".to_string(),
        args.output_dir.display().to_string(),
        "--train-label".to_string(),
        args.train_label.clone(),
        "--test-label".to_string(),
        args.test_label.clone(),
    ];

    if args.overwrite {
        command.push("--overwrite".to_string());
    }
    if let Some(path) = &args.config {
        command.push("--config".to_string());
        command.push(path.display().to_string());
    }
    if let Some(path) = &args.similarity_db {
        command.push("--similarity-db".to_string());
        command.push(path.display().to_string());
    }
    if let Some(path) = &args.annotation_db {
        command.push("--annotation-db".to_string());
        command.push(path.display().to_string());
    }
    if let Some(path) = &args.fingerprint_db {
        command.push("--fingerprint-db".to_string());
        command.push(path.display().to_string());
    }

    command.join(" ")
}
