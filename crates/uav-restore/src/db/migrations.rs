//! Versioned schema migrations for the job database.
//!
//! Applied versions are recorded in `_migrations`. Each pending step runs in
//! its own transaction together with its bookkeeping row, so a failed step
//! leaves the schema at the previous version.

use rusqlite::{params, Connection};

use super::error::DatabaseError;

struct Step {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const STEPS: &[Step] = &[
    Step {
        version: 1,
        name: "create_jobs_table",
        sql: include_str!("sql/001_create_jobs.sql"),
    },
    Step {
        version: 2,
        name: "index_jobs_status_and_created_at",
        sql: include_str!("sql/002_index_jobs.sql"),
    },
];

/// Highest version known to this build.
pub fn latest_version() -> u32 {
    STEPS.last().map_or(0, |step| step.version)
}

/// Highest version recorded in the database, 0 for a fresh one.
pub fn schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    ensure_ledger(conn)?;
    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;
    Ok(version)
}

/// Brings the schema up to [`latest_version`].
///
/// Returns how many steps were applied. A database written by a newer build
/// is refused.
pub fn run_all(conn: &Connection) -> Result<usize, DatabaseError> {
    let current = schema_version(conn)?;
    if current > latest_version() {
        return Err(DatabaseError::Migration {
            version: current,
            reason: format!(
                "database schema is newer than this build (knows up to v{})",
                latest_version()
            ),
        });
    }

    let mut applied = 0;
    for step in STEPS.iter().filter(|step| step.version > current) {
        log::info!("Applying schema v{}: {}", step.version, step.name);

        let fail = |e: rusqlite::Error| DatabaseError::Migration {
            version: step.version,
            reason: e.to_string(),
        };
        let tx = conn.unchecked_transaction().map_err(fail)?;
        tx.execute_batch(step.sql).map_err(fail)?;
        tx.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            params![step.version, step.name],
        )
        .map_err(fail)?;
        tx.commit().map_err(fail)?;
        applied += 1;
    }

    Ok(applied)
}

fn ensure_ledger(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;
    Ok(())
}
