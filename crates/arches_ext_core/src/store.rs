use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use rusqlite::Connection;

use crate::kind::ALL_KINDS;
use crate::migrate::pending_migration_count;
use crate::runtime::{MIGRATIONS_POLICY_MESSAGE, ResolvedPaths};

const AUXILIARY_TABLES: &[&str] = &[
    "map_sources",
    "map_layers",
    "graphs",
    "resource_instances",
    "nodes",
    "tiles",
    "files",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableCount {
    pub table: String,
    pub rows: u64,
}

pub fn open_connection(db_path: &Path) -> Result<Connection> {
    let connection = Connection::open(db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    connection
        .busy_timeout(Duration::from_secs(5))
        .context("failed to set sqlite busy timeout")?;
    connection
        .pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign_keys pragma")?;
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to enable WAL journal mode")?;
    Ok(connection)
}

/// Open the project database, refusing to continue while migrations are pending.
pub fn open_store(paths: &ResolvedPaths) -> Result<Connection> {
    if !paths.db_path.exists() {
        bail!(
            "database not found at {}. {MIGRATIONS_POLICY_MESSAGE}",
            paths.db_path.display()
        );
    }
    let connection = open_connection(&paths.db_path)?;
    let pending = pending_migration_count(&connection)?;
    if pending > 0 {
        bail!("{pending} schema migration(s) pending. {MIGRATIONS_POLICY_MESSAGE}");
    }
    Ok(connection)
}

pub(crate) fn ensure_db_parent(paths: &ResolvedPaths) -> Result<()> {
    let parent = paths
        .db_path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("db path has no parent: {}", paths.db_path.display()))?;
    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create database parent directory {}",
            parent.display()
        )
    })
}

/// Row counts for every extension table followed by the auxiliary tables.
pub fn table_counts(connection: &Connection) -> Result<Vec<TableCount>> {
    let tables = ALL_KINDS
        .iter()
        .map(|kind| kind.schema().table)
        .chain(AUXILIARY_TABLES.iter().copied());

    let mut counts = Vec::new();
    for table in tables {
        let rows: i64 = connection
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .with_context(|| format!("failed to count rows in {table}"))?;
        counts.push(TableCount {
            table: table.to_string(),
            rows: u64::try_from(rows).unwrap_or(0),
        });
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::migrate::{apply_migrations, run_migrations};

    #[test]
    fn open_store_requires_migrated_database() {
        let temp = tempdir().expect("tempdir");
        let paths = ResolvedPaths::for_project(temp.path());

        let missing = open_store(&paths).expect_err("missing db");
        assert!(missing.to_string().contains("db migrate"));

        ensure_db_parent(&paths).expect("parent");
        open_connection(&paths.db_path).expect("create empty db");
        let pending = open_store(&paths).expect_err("pending migrations");
        assert!(pending.to_string().contains("pending"));

        run_migrations(&paths).expect("migrate");
        open_store(&paths).expect("open migrated store");
    }

    #[test]
    fn table_counts_cover_every_table() {
        let connection = Connection::open_in_memory().expect("open");
        apply_migrations(&connection).expect("apply");
        connection
            .execute(
                "INSERT INTO graphs (graphid, name) VALUES ('g1', 'Heritage Asset')",
                [],
            )
            .expect("insert graph");

        let counts = table_counts(&connection).expect("counts");
        assert_eq!(counts.len(), ALL_KINDS.len() + AUXILIARY_TABLES.len());
        let graphs = counts
            .iter()
            .find(|count| count.table == "graphs")
            .expect("graphs count");
        assert_eq!(graphs.rows, 1);
        assert!(
            counts
                .iter()
                .filter(|count| count.table != "graphs")
                .all(|count| count.rows == 0)
        );
    }
}
