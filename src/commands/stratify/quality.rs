use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use anyhow::{Context, Result};
use rusqlite::params_from_iter;

use crate::model::MaxSimilarityTable;
use crate::report::{ReportLevel, Reporter};

use super::store::{IN_FILTER_BATCH, LazyConnection, placeholders};

/// Validation flags keyed by system id. A system present with `None` has no
/// recorded flag.
pub type QualityLookup = HashMap<String, Option<bool>>;

pub trait QualityIndex {
    fn lookup(&self, systems: &BTreeSet<String>) -> Result<QualityLookup>;
}

/// `annotations.system_pass_validation_criteria`, one row per ligand; the
/// last row of a system in rowid order wins.
pub struct SqliteQualityIndex {
    connection: LazyConnection,
}

impl SqliteQualityIndex {
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

impl QualityIndex for SqliteQualityIndex {
    fn lookup(&self, systems: &BTreeSet<String>) -> Result<QualityLookup> {
        let connection = self.connection.get()?;
        let ids = systems.iter().map(String::as_str).collect::<Vec<&str>>();
        let mut out = QualityLookup::new();

        for batch in ids.chunks(IN_FILTER_BATCH) {
            let sql = format!(
                "
                SELECT system_id, system_pass_validation_criteria
                FROM annotations
                WHERE system_id IN ({})
                ORDER BY rowid ASC
                ",
                placeholders(1, batch.len())
            );
            let mut statement = connection.prepare(&sql).with_context(|| {
                format!(
                    "failed to query annotation index {}",
                    self.connection.path().display()
                )
            })?;
            let mut rows = statement.query(params_from_iter(batch.iter().copied()))?;
            while let Some(row) = rows.next()? {
                let system_id: String = row.get(0)?;
                let passes: Option<bool> = row.get(1)?;
                out.insert(system_id, passes);
            }
        }

        Ok(out)
    }
}

/// Drops rows whose system is not in the index, then sets `passes_quality`
/// with missing flags read as `false`.
pub fn annotate_quality(
    table: &mut MaxSimilarityTable,
    lookup: &QualityLookup,
    reporter: &dyn Reporter,
) {
    let before = table.rows.len();
    table
        .rows
        .retain(|row| lookup.contains_key(row.system_id.as_str()));
    let discarded = before - table.rows.len();

    let level = if discarded > 0 {
        ReportLevel::Warning
    } else {
        ReportLevel::Info
    };
    reporter.emit(level, "quality.discarded", &[("systems", discarded)]);

    for row in &mut table.rows {
        row.passes_quality = lookup
            .get(row.system_id.as_str())
            .copied()
            .flatten()
            .unwrap_or(false);
    }

    let passing = table.rows.iter().filter(|row| row.passes_quality).count();
    reporter.emit(
        ReportLevel::Info,
        "quality.passing",
        &[("passing", passing), ("total", table.rows.len())],
    );
}
