use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use rusqlite::params_from_iter;
use tracing::debug;

use crate::model::SimilarityRecord;

use super::store::{IN_FILTER_BATCH, LazyConnection, placeholders};

/// The bulk cross-similarity service: query systems against target systems
/// for one metric.
pub trait CrossSimilaritySource {
    fn cross_similarity(
        &self,
        query_systems: &BTreeSet<String>,
        target_systems: &BTreeSet<String>,
        metric: &str,
    ) -> Result<Vec<SimilarityRecord>>;
}

/// Precomputed similarities in `similarities(query_system, target_system,
/// metric, similarity)`.
pub struct SqliteCrossSimilarity {
    connection: LazyConnection,
}

impl SqliteCrossSimilarity {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            connection: LazyConnection::new(path),
        }
    }

    #[cfg(test)]
    pub fn from_connection(connection: rusqlite::Connection) -> Self {
        Self {
            connection: LazyConnection::from_connection(connection),
        }
    }
}

impl CrossSimilaritySource for SqliteCrossSimilarity {
    fn cross_similarity(
        &self,
        query_systems: &BTreeSet<String>,
        target_systems: &BTreeSet<String>,
        metric: &str,
    ) -> Result<Vec<SimilarityRecord>> {
        let connection = self.connection.get()?;
        let queries = query_systems.iter().map(String::as_str).collect::<Vec<&str>>();
        let mut out = Vec::new();

        if target_systems.is_empty() {
            return Ok(out);
        }

        for batch in queries.chunks(IN_FILTER_BATCH) {
            let sql = format!(
                "
                SELECT query_system, target_system, similarity
                FROM similarities
                WHERE metric = ?1 AND query_system IN ({})
                ORDER BY query_system ASC, target_system ASC
                ",
                placeholders(2, batch.len())
            );
            let mut statement = connection.prepare(&sql).with_context(|| {
                format!(
                    "failed to prepare similarity query on {}",
                    self.connection.path().display()
                )
            })?;

            let params = std::iter::once(metric).chain(batch.iter().copied());
            let mut rows = statement.query(params_from_iter(params))?;
            while let Some(row) = rows.next()? {
                let target: String = row.get(1)?;
                if !target_systems.contains(&target) {
                    continue;
                }
                let similarity: Option<f64> = row.get(2)?;
                let Some(similarity) = similarity else {
                    continue;
                };
                out.push(SimilarityRecord::new(
                    row.get::<_, String>(0)?,
                    target,
                    similarity,
                ));
            }
        }

        debug!(metric = %metric, records = out.len(), "fetched cross similarities");
        Ok(out)
    }
}
