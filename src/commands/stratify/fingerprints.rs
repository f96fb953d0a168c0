use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use rusqlite::params_from_iter;

use super::store::{IN_FILTER_BATCH, LazyConnection, placeholders};

/// A chemical fingerprint as a packed bit vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    bytes: Vec<u8>,
}

impl Fingerprint {
    #[cfg(test)]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn from_hex(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if !raw.is_ascii() {
            bail!("fingerprint hex contains non-ASCII characters");
        }
        if raw.len() % 2 != 0 {
            bail!("fingerprint hex has odd length {}", raw.len());
        }

        let bytes = (0..raw.len())
            .step_by(2)
            .map(|start| {
                u8::from_str_radix(&raw[start..start + 2], 16)
                    .with_context(|| format!("invalid fingerprint hex at offset {start}"))
            })
            .collect::<Result<Vec<u8>>>()?;
        Ok(Self { bytes })
    }

    /// |A ∧ B| / |A ∨ B|; bits beyond the shorter vector count as unset.
    pub fn tanimoto(&self, other: &Fingerprint) -> f64 {
        let mut common = 0_u32;
        let mut union = 0_u32;
        let longest = self.bytes.len().max(other.bytes.len());
        for index in 0..longest {
            let left = self.bytes.get(index).copied().unwrap_or(0);
            let right = other.bytes.get(index).copied().unwrap_or(0);
            common += (left & right).count_ones();
            union += (left | right).count_ones();
        }

        if union == 0 {
            return 0.0;
        }
        f64::from(common) / f64::from(union)
    }
}

/// A non-ion, non-artifact ligand of a system with its fingerprint.
#[derive(Debug, Clone, PartialEq)]
pub struct ProperLigand {
    pub system_id: String,
    /// Ligands sharing this id are the same molecule.
    pub group_id: i64,
    pub fingerprint: Fingerprint,
}

pub trait LigandSource {
    /// Proper ligands of the given systems, ordered by system then group id.
    fn proper_ligands(&self, systems: &BTreeSet<String>) -> Result<Vec<ProperLigand>>;
}

/// Joins per-ligand annotation flags with the fingerprint table via SMILES.
pub struct SqliteLigandSource {
    annotations: LazyConnection,
    fingerprints: LazyConnection,
}

impl SqliteLigandSource {
    pub fn new(annotation_db: impl Into<PathBuf>, fingerprint_db: impl Into<PathBuf>) -> Self {
        Self {
            annotations: LazyConnection::new(annotation_db),
            fingerprints: LazyConnection::new(fingerprint_db),
        }
    }

    #[cfg(test)]
    pub fn from_connections(
        annotations: rusqlite::Connection,
        fingerprints: rusqlite::Connection,
    ) -> Self {
        Self {
            annotations: LazyConnection::from_connection(annotations),
            fingerprints: LazyConnection::from_connection(fingerprints),
        }
    }

    fn fingerprints_by_smiles(
        &self,
        systems: &[&str],
    ) -> Result<HashMap<String, (i64, Fingerprint)>> {
        let connection = self.fingerprints.get()?;
        let mut out = HashMap::new();

        for batch in systems.chunks(IN_FILTER_BATCH) {
            let sql = format!(
                "
                SELECT ligand_rdkit_canonical_smiles, number_id_by_inchikeys, fingerprint
                FROM ligands_per_system
                WHERE system_id IN ({})
                  AND ligand_rdkit_canonical_smiles IS NOT NULL
                  AND number_id_by_inchikeys IS NOT NULL
                  AND fingerprint IS NOT NULL
                ",
                placeholders(1, batch.len())
            );
            let mut statement = connection.prepare(&sql).with_context(|| {
                format!(
                    "failed to query ligand fingerprints in {}",
                    self.fingerprints.path().display()
                )
            })?;
            let mut rows = statement.query(params_from_iter(batch.iter().copied()))?;
            while let Some(row) = rows.next()? {
                let smiles: String = row.get(0)?;
                let group_id: i64 = row.get(1)?;
                let hex: String = row.get(2)?;
                let fingerprint = Fingerprint::from_hex(&hex)
                    .with_context(|| format!("bad fingerprint for ligand {smiles}"))?;
                out.insert(smiles, (group_id, fingerprint));
            }
        }

        Ok(out)
    }
}

impl LigandSource for SqliteLigandSource {
    fn proper_ligands(&self, systems: &BTreeSet<String>) -> Result<Vec<ProperLigand>> {
        let ids = systems.iter().map(String::as_str).collect::<Vec<&str>>();
        let by_smiles = self.fingerprints_by_smiles(&ids)?;
        let connection = self.annotations.get()?;

        let mut seen = BTreeSet::<(String, i64)>::new();
        let mut out = Vec::new();
        for batch in ids.chunks(IN_FILTER_BATCH) {
            let sql = format!(
                "
                SELECT system_id, ligand_rdkit_canonical_smiles
                FROM annotations
                WHERE system_id IN ({})
                  AND ligand_is_ion = 0
                  AND ligand_is_artifact = 0
                  AND ligand_rdkit_canonical_smiles IS NOT NULL
                ",
                placeholders(1, batch.len())
            );
            let mut statement = connection.prepare(&sql).with_context(|| {
                format!(
                    "failed to query ligand annotations in {}",
                    self.annotations.path().display()
                )
            })?;
            let mut rows = statement.query(params_from_iter(batch.iter().copied()))?;
            while let Some(row) = rows.next()? {
                let system_id: String = row.get(0)?;
                let smiles: String = row.get(1)?;
                let Some((group_id, fingerprint)) = by_smiles.get(&smiles) else {
                    continue;
                };
                if seen.insert((system_id.clone(), *group_id)) {
                    out.push(ProperLigand {
                        system_id,
                        group_id: *group_id,
                        fingerprint: fingerprint.clone(),
                    });
                }
            }
        }

        out.sort_by(|a, b| {
            a.system_id
                .cmp(&b.system_id)
                .then(a.group_id.cmp(&b.group_id))
        });
        Ok(out)
    }
}
