use std::collections::{BTreeMap, BTreeSet};

use crate::model::{MaxSimilarityRow, MaxSimilarityTable, SimilarityRecord};
use crate::report::{ReportLevel, Reporter};

/// The relation loaded for one metric.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRelation {
    pub metric: String,
    pub records: Vec<SimilarityRecord>,
}

/// Best record per query system. Ties go to the lowest train system id;
/// NaN similarities are ignored.
pub fn max_per_system(records: &[SimilarityRecord]) -> BTreeMap<&str, &SimilarityRecord> {
    let mut best = BTreeMap::<&str, &SimilarityRecord>::new();
    for record in records.iter().filter(|record| !record.similarity.is_nan()) {
        best.entry(record.system_id.as_str())
            .and_modify(|current| {
                let higher = record.similarity > current.similarity;
                let tied_lower = record.similarity == current.similarity
                    && record.train_system_id < current.train_system_id;
                if higher || tied_lower {
                    *current = record;
                }
            })
            .or_insert(record);
    }
    best
}

/// Outer-joins the per-metric maxima over the test systems.
///
/// Every test system gets exactly one row, in id order. Metrics with no
/// record for a system are 0, and so is every metric of a system with no
/// train neighbour at all.
pub fn aggregate_max_similarities(
    relations: &[MetricRelation],
    test_systems: &BTreeSet<String>,
    reporter: &dyn Reporter,
) -> MaxSimilarityTable {
    let metrics = relations
        .iter()
        .map(|relation| relation.metric.clone())
        .collect::<Vec<String>>();

    let mut joined = BTreeMap::<&str, Vec<Option<f64>>>::new();
    for (index, relation) in relations.iter().enumerate() {
        for (system_id, record) in max_per_system(&relation.records) {
            let Some(system_id) = test_systems.get(system_id) else {
                continue;
            };
            joined
                .entry(system_id.as_str())
                .or_insert_with(|| vec![None; metrics.len()])[index] = Some(record.similarity);
        }
    }

    reporter.emit(
        ReportLevel::Info,
        "aggregate.systems_with_similarities",
        &[("systems", joined.len())],
    );

    let synthesized = test_systems.len() - joined.len();
    let level = if synthesized > 0 {
        ReportLevel::Warning
    } else {
        ReportLevel::Info
    };
    reporter.emit(level, "aggregate.synthesized", &[("systems", synthesized)]);

    let rows = test_systems
        .iter()
        .map(|system_id| {
            let similarities = match joined.get(system_id.as_str()) {
                Some(values) => values.iter().map(|value| value.unwrap_or(0.0)).collect(),
                None => vec![0.0; metrics.len()],
            };
            MaxSimilarityRow {
                system_id: system_id.clone(),
                similarities,
                passes_quality: false,
                categories: Vec::new(),
                not_novel: false,
            }
        })
        .collect();

    MaxSimilarityTable {
        metrics,
        categories: Vec::new(),
        rows,
    }
}
