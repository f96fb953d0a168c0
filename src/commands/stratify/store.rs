use std::cell::OnceCell;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags};

/// Upper bound on ids bound into a single `IN (...)` filter.
pub const IN_FILTER_BATCH: usize = 500;

pub fn open_read_only(path: &Path) -> Result<Connection> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("failed to open {}", path.display()))
}

/// `?first, ?first+1, ...` for `count` parameters.
pub fn placeholders(first: usize, count: usize) -> String {
    (first..first + count)
        .map(|index| format!("?{index}"))
        .collect::<Vec<String>>()
        .join(", ")
}

/// A read-only connection that is only opened when first queried, so runs
/// served entirely from cache never touch the store.
pub struct LazyConnection {
    path: PathBuf,
    connection: OnceCell<Connection>,
}

impl LazyConnection {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            connection: OnceCell::new(),
        }
    }

    #[cfg(test)]
    pub fn from_connection(connection: Connection) -> Self {
        Self {
            path: PathBuf::from(":memory:"),
            connection: OnceCell::from(connection),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> Result<&Connection> {
        if let Some(connection) = self.connection.get() {
            return Ok(connection);
        }
        let connection = open_read_only(&self.path)?;
        Ok(self.connection.get_or_init(|| connection))
    }

    #[cfg(test)]
    pub fn is_open(&self) -> bool {
        self.connection.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_numbered_from_first() {
        assert_eq!(placeholders(2, 3), "?2, ?3, ?4");
        assert_eq!(placeholders(1, 1), "?1");
    }

    #[test]
    fn lazy_connection_defers_open_until_queried() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let lazy = LazyConnection::new(dir.path().join("missing.sqlite"));
        assert!(!lazy.is_open());
        assert!(lazy.get().is_err(), "missing store should fail on first use");
    }
}
