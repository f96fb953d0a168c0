use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::StratifyError;

pub const LIGAND_METRIC: &str = "tanimoto_similarity_max";

pub const SIMILARITY_METRICS: [&str; 9] = [
    // pli
    "pli_unique_qcov",
    // protein
    "protein_seqsim_weighted_sum",
    "protein_fident_weighted_sum",
    "protein_lddt_weighted_sum",
    // pocket
    "pocket_fident_qcov",
    "pocket_lddt_qcov",
    "pocket_lddt",
    "pocket_qcov",
    // ligand
    LIGAND_METRIC,
];

pub const SYSTEM_ID_COLUMN: &str = "system_id";
pub const QUALITY_COLUMN: &str = "passes_quality";
pub const NOT_NOVEL_COLUMN: &str = "not_novel";

/// A named group of metrics that must all sit below their thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoveltyCategory {
    pub name: String,
    pub metrics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StratificationConfig {
    pub metrics: Vec<String>,
    pub ligand_metric: String,
    pub thresholds: BTreeMap<String, f64>,
    pub categories: Vec<NoveltyCategory>,
}

impl Default for StratificationConfig {
    fn default() -> Self {
        let thresholds = [
            ("pli_unique_qcov", 50.0),
            ("pocket_lddt_qcov", 50.0),
            ("pocket_lddt", 50.0),
            ("pocket_qcov", 50.0),
            ("protein_seqsim_weighted_sum", 30.0),
            ("protein_lddt_weighted_sum", 50.0),
            (LIGAND_METRIC, 30.0),
        ]
        .into_iter()
        .map(|(metric, value)| (metric.to_string(), value))
        .collect();

        let categories = vec![
            category(
                "novel_pocket_pli",
                &["pli_unique_qcov", "pocket_qcov", "pocket_lddt_qcov"],
            ),
            category("novel_ligand_pli", &["pli_unique_qcov", LIGAND_METRIC]),
            category(
                "novel_protein",
                &["protein_seqsim_weighted_sum", "protein_lddt_weighted_sum"],
            ),
            category(
                "novel_all",
                &[
                    "pli_unique_qcov",
                    "pocket_qcov",
                    "pocket_lddt",
                    "protein_seqsim_weighted_sum",
                    "protein_lddt_weighted_sum",
                    LIGAND_METRIC,
                ],
            ),
        ];

        Self {
            metrics: SIMILARITY_METRICS.iter().map(|m| m.to_string()).collect(),
            ligand_metric: LIGAND_METRIC.to_string(),
            thresholds,
            categories,
        }
    }
}

fn category(name: &str, metrics: &[&str]) -> NoveltyCategory {
    NoveltyCategory {
        name: name.to_string(),
        metrics: metrics.iter().map(|m| m.to_string()).collect(),
    }
}

impl StratificationConfig {
    /// Reads a JSON config, or returns the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn is_ligand_metric(&self, metric: &str) -> bool {
        metric == self.ligand_metric
    }

    pub fn threshold(&self, metric: &str) -> Option<f64> {
        self.thresholds.get(metric).copied()
    }

    /// Checks names and category references before any data is read.
    pub fn validate(&self) -> Result<()> {
        if self.metrics.is_empty() {
            return Err(StratifyError::configuration("no similarity metrics configured").into());
        }

        let mut seen_metrics = HashSet::new();
        for metric in &self.metrics {
            ensure_file_safe_name("metric", metric)?;
            if !seen_metrics.insert(metric.as_str()) {
                return Err(
                    StratifyError::configuration(format!("metric {metric} listed twice")).into(),
                );
            }
            if is_reserved_column(metric) {
                return Err(StratifyError::configuration(format!(
                    "metric {metric} collides with a reserved column"
                ))
                .into());
            }
        }

        for (metric, threshold) in &self.thresholds {
            if !threshold.is_finite() {
                return Err(StratifyError::configuration(format!(
                    "threshold for {metric} is not a finite number"
                ))
                .into());
            }
        }

        let mut seen_categories = HashSet::new();
        for category in &self.categories {
            if !seen_categories.insert(category.name.as_str()) {
                return Err(StratifyError::configuration(format!(
                    "novelty category {} defined twice",
                    category.name
                ))
                .into());
            }
            if is_reserved_column(&category.name) || seen_metrics.contains(category.name.as_str())
            {
                return Err(StratifyError::configuration(format!(
                    "novelty category {} collides with an existing column",
                    category.name
                ))
                .into());
            }
            if category.metrics.is_empty() {
                return Err(StratifyError::configuration(format!(
                    "novelty category {} names no metrics",
                    category.name
                ))
                .into());
            }
            for metric in &category.metrics {
                if !seen_metrics.contains(metric.as_str()) {
                    return Err(StratifyError::configuration(format!(
                        "novelty category {} references unknown metric {metric}",
                        category.name
                    ))
                    .into());
                }
                if self.threshold(metric).is_none() {
                    return Err(StratifyError::configuration(format!(
                        "novelty category {} uses metric {metric} which has no threshold",
                        category.name
                    ))
                    .into());
                }
            }
        }

        Ok(())
    }
}

fn is_reserved_column(name: &str) -> bool {
    matches!(name, SYSTEM_ID_COLUMN | QUALITY_COLUMN | NOT_NOVEL_COLUMN)
}

/// Labels and metric names end up in file names, joined by `__`.
pub fn ensure_file_safe_name(kind: &str, value: &str) -> Result<()> {
    let pattern = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$")
        .context("failed to compile file-safe name regex")?;
    if !pattern.is_match(value) {
        return Err(StratifyError::configuration(format!("invalid {kind} name: {value:?}")).into());
    }
    if value.contains("__") || value.ends_with('_') {
        return Err(StratifyError::configuration(format!(
            "{kind} name {value:?} must not contain \"__\" or end with \"_\""
        ))
        .into());
    }
    Ok(())
}

/// Split labels are additionally joined to each other by `_vs_`, so a label
/// may not carry that separator, even partially at either end.
pub fn ensure_split_label(kind: &str, value: &str) -> Result<()> {
    ensure_file_safe_name(kind, value)?;
    if value.contains("_vs_") || value.ends_with("_vs") || value.starts_with("vs_") {
        return Err(StratifyError::configuration(format!(
            "{kind} name {value:?} must not contain the \"_vs_\" separator"
        ))
        .into());
    }
    Ok(())
}
