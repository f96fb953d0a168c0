use std::collections::{BTreeMap, BTreeSet, HashMap};

use anyhow::Result;
use tracing::info;

use crate::error::StratifyError;
use crate::model::SimilarityRecord;

use super::fingerprints::{Fingerprint, LigandSource};
use super::similarity_source::CrossSimilaritySource;

/// Tanimoto coefficients are reported on the same 0-100 scale as the other
/// metrics.
pub const TANIMOTO_SCALE: f64 = 100.0;

/// Produces the test-to-train similarity relation for one metric.
pub trait MetricProvider {
    fn compute(
        &self,
        metric: &str,
        query_systems: &BTreeSet<String>,
        target_systems: &BTreeSet<String>,
    ) -> Result<Vec<SimilarityRecord>>;
}

/// Sequence, structure, pocket and interaction metrics from the bulk service.
pub struct CrossSimilarityProvider<S> {
    source: S,
}

impl<S: CrossSimilaritySource> CrossSimilarityProvider<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }
}

impl<S: CrossSimilaritySource> MetricProvider for CrossSimilarityProvider<S> {
    fn compute(
        &self,
        metric: &str,
        query_systems: &BTreeSet<String>,
        target_systems: &BTreeSet<String>,
    ) -> Result<Vec<SimilarityRecord>> {
        info!(metric = %metric, "computing max similarities from cross-similarity store");
        let records = self
            .source
            .cross_similarity(query_systems, target_systems, metric)
            .map_err(|err| StratifyError::upstream(metric, format!("{err:#}")))?;
        info!(metric = %metric, records = records.len(), "done computing max similarities");
        Ok(records)
    }
}

/// Ligand similarity computed in-process from precomputed fingerprints.
pub struct LigandSimilarityProvider<L> {
    source: L,
}

impl<L: LigandSource> LigandSimilarityProvider<L> {
    pub fn new(source: L) -> Self {
        Self { source }
    }
}

impl<L: LigandSource> MetricProvider for LigandSimilarityProvider<L> {
    /// One record per query system that has a proper ligand: its best match
    /// over all proper train ligands.
    fn compute(
        &self,
        metric: &str,
        query_systems: &BTreeSet<String>,
        target_systems: &BTreeSet<String>,
    ) -> Result<Vec<SimilarityRecord>> {
        info!(metric = %metric, "computing ligand max similarities");
        let systems = query_systems
            .union(target_systems)
            .cloned()
            .collect::<BTreeSet<String>>();
        let ligands = self
            .source
            .proper_ligands(&systems)
            .map_err(|err| StratifyError::upstream(metric, format!("{err:#}")))?;

        // group id -> (fingerprint, lowest train system carrying it)
        let mut train_ligands = BTreeMap::<i64, (&Fingerprint, &str)>::new();
        for ligand in ligands
            .iter()
            .filter(|ligand| target_systems.contains(&ligand.system_id))
        {
            train_ligands
                .entry(ligand.group_id)
                .or_insert((&ligand.fingerprint, ligand.system_id.as_str()));
        }

        let mut best_by_group = HashMap::<i64, Option<(f64, &str)>>::new();
        let mut best_by_system = BTreeMap::<&str, (f64, &str)>::new();
        for ligand in ligands
            .iter()
            .filter(|ligand| query_systems.contains(&ligand.system_id))
        {
            let best = *best_by_group.entry(ligand.group_id).or_insert_with(|| {
                best_train_match(ligand.group_id, &ligand.fingerprint, &train_ligands)
            });
            let Some(candidate) = best else {
                continue;
            };
            best_by_system
                .entry(ligand.system_id.as_str())
                .and_modify(|current| {
                    if is_better(candidate, *current) {
                        *current = candidate;
                    }
                })
                .or_insert(candidate);
        }

        let records = best_by_system
            .into_iter()
            .map(|(system_id, (similarity, train_system_id))| {
                SimilarityRecord::new(system_id, train_system_id, similarity)
            })
            .collect::<Vec<_>>();
        info!(
            metric = %metric,
            ligands = ligands.len(),
            unique_train_ligands = train_ligands.len(),
            records = records.len(),
            "done computing ligand max similarities"
        );
        Ok(records)
    }
}

fn best_train_match<'a>(
    group_id: i64,
    fingerprint: &Fingerprint,
    train_ligands: &BTreeMap<i64, (&'a Fingerprint, &'a str)>,
) -> Option<(f64, &'a str)> {
    if let Some((_, system_id)) = train_ligands.get(&group_id) {
        return Some((TANIMOTO_SCALE, *system_id));
    }

    let mut best: Option<(f64, &str)> = None;
    for (train_fingerprint, system_id) in train_ligands.values() {
        let similarity = fingerprint.tanimoto(train_fingerprint) * TANIMOTO_SCALE;
        let candidate = (similarity, *system_id);
        best = match best {
            Some(current) if !is_better(candidate, current) => Some(current),
            _ => Some(candidate),
        };
    }
    best
}

/// Higher similarity wins; equal scores go to the lower train system id.
fn is_better(candidate: (f64, &str), current: (f64, &str)) -> bool {
    candidate.0 > current.0 || (candidate.0 == current.0 && candidate.1 < current.1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::stratify::fingerprints::ProperLigand;

    struct StaticLigands(Vec<ProperLigand>);

    impl LigandSource for StaticLigands {
        fn proper_ligands(&self, systems: &BTreeSet<String>) -> Result<Vec<ProperLigand>> {
            Ok(self
                .0
                .iter()
                .filter(|ligand| systems.contains(&ligand.system_id))
                .cloned()
                .collect())
        }
    }

    struct FailingSource;

    impl CrossSimilaritySource for FailingSource {
        fn cross_similarity(
            &self,
            _query_systems: &BTreeSet<String>,
            _target_systems: &BTreeSet<String>,
            _metric: &str,
        ) -> Result<Vec<SimilarityRecord>> {
            anyhow::bail!("similarity service unavailable")
        }
    }

    fn ligand(system_id: &str, group_id: i64, hex: &str) -> ProperLigand {
        ProperLigand {
            system_id: system_id.to_string(),
            group_id,
            fingerprint: Fingerprint::from_hex(hex).expect("hex should parse"),
        }
    }

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn ligand_provider_scores_shared_group_as_identical() {
        let provider = LigandSimilarityProvider::new(StaticLigands(vec![
            ligand("A", 1, "f0"),
            ligand("B", 2, "0f"),
            // same molecule as A's ligand even though the bits differ
            ligand("X", 1, "01"),
        ]));

        let records = provider
            .compute("tanimoto_similarity_max", &set(&["X"]), &set(&["A", "B"]))
            .expect("ligand similarity should compute");
        assert_eq!(records, vec![SimilarityRecord::new("X", "A", 100.0)]);
    }

    #[test]
    fn ligand_provider_takes_max_over_system_ligands() {
        let provider = LigandSimilarityProvider::new(StaticLigands(vec![
            ligand("A", 1, "f0"),
            ligand("B", 2, "0f"),
            ligand("X", 3, "f1"),
            ligand("X", 4, "03"),
            ligand("Y", 5, "00"),
        ]));

        let records = provider
            .compute(
                "tanimoto_similarity_max",
                &set(&["X", "Y", "Z"]),
                &set(&["A", "B"]),
            )
            .expect("ligand similarity should compute");

        // X: f1 vs f0 = 4/5, 03 vs 0f = 2/4; Y has no set bits; Z has no ligand
        assert_eq!(
            records,
            vec![
                SimilarityRecord::new("X", "A", 80.0),
                SimilarityRecord::new("Y", "A", 0.0),
            ]
        );
    }

    #[test]
    fn ligand_provider_without_train_ligands_returns_nothing() {
        let provider = LigandSimilarityProvider::new(StaticLigands(vec![ligand("X", 1, "ff")]));
        let records = provider
            .compute("tanimoto_similarity_max", &set(&["X"]), &set(&["A"]))
            .expect("ligand similarity should compute");
        assert!(records.is_empty());
    }

    #[test]
    fn ties_go_to_lowest_train_system() {
        assert!(is_better((50.0, "A"), (50.0, "B")));
        assert!(!is_better((50.0, "B"), (50.0, "A")));
        assert!(is_better((51.0, "Z"), (50.0, "A")));
    }

    #[test]
    fn cross_provider_failure_is_upstream_error() {
        let provider = CrossSimilarityProvider::new(FailingSource);
        let err = provider
            .compute("pocket_qcov", &set(&["X"]), &set(&["A"]))
            .expect_err("failure should propagate");

        match err.downcast_ref::<StratifyError>() {
            Some(StratifyError::UpstreamComputation { metric, message }) => {
                assert_eq!(metric, "pocket_qcov");
                assert!(message.contains("unavailable"), "unexpected message: {message}");
            }
            other => panic!("expected upstream error, got {other:?}"),
        }
    }
}
