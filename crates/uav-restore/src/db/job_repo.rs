//! Row-level access to the `jobs` table.
//!
//! Structured job fields (stage states, outputs, stats, error detail,
//! warnings) are stored as JSON text; the store converts to and from
//! [`Job`](crate::job::Job).

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

const COLUMNS: &str = "id, original_filename, input_reference, mime_type, status, \
    stage_states, progress, outputs, stats, error_detail, warnings, created_at, \
    updated_at, completed_at";

/// One row of the `jobs` table.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub id: String,
    pub original_filename: String,
    pub input_reference: String,
    pub mime_type: Option<String>,
    pub status: String,
    pub stage_states: String,
    pub progress: i64,
    pub outputs: String,
    pub stats: Option<String>,
    pub error_detail: Option<String>,
    pub warnings: String,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl JobRow {
    // Column order follows COLUMNS.
    fn read(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get(0)?,
            original_filename: row.get(1)?,
            input_reference: row.get(2)?,
            mime_type: row.get(3)?,
            status: row.get(4)?,
            stage_states: row.get(5)?,
            progress: row.get(6)?,
            outputs: row.get(7)?,
            stats: row.get(8)?,
            error_detail: row.get(9)?,
            warnings: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
            completed_at: row.get(13)?,
        })
    }
}

pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            &format!(
                "INSERT INTO jobs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                COLUMNS
            ),
            params![
                job.id,
                job.original_filename,
                job.input_reference,
                job.mime_type,
                job.status,
                job.stage_states,
                job.progress,
                job.outputs,
                job.stats,
                job.error_detail,
                job.warnings,
                job.created_at,
                job.updated_at,
                job.completed_at,
            ],
        )?;
        Ok(())
    })
}

/// Writes the fields a pipeline run can change. Identity, upload and
/// creation time are never rewritten.
///
/// Returns `false` when the row is gone.
pub fn update(db: &Database, job: &JobRow) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = ?2, stage_states = ?3, progress = ?4, outputs = ?5,
                 stats = ?6, error_detail = ?7, warnings = ?8, updated_at = ?9,
                 completed_at = ?10
             WHERE id = ?1",
            params![
                job.id,
                job.status,
                job.stage_states,
                job.progress,
                job.outputs,
                job.stats,
                job.error_detail,
                job.warnings,
                job.updated_at,
                job.completed_at,
            ],
        )?;
        Ok(changed > 0)
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!("SELECT {} FROM jobs WHERE id = ?1", COLUMNS))?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(JobRow::read(row)?)),
            None => Ok(None),
        }
    })
}

/// Every stored job, oldest first.
pub fn load_all(db: &Database) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM jobs ORDER BY created_at ASC, id ASC",
            COLUMNS
        ))?;
        let rows = stmt
            .query_map([], JobRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Returns `false` when there was no such row.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let removed = conn.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn row(id: &str, created_at: &str) -> JobRow {
        JobRow {
            id: id.to_string(),
            original_filename: "site.png".to_string(),
            input_reference: format!("/data/uploads/{}_site.png", id),
            mime_type: Some("image/png".to_string()),
            status: "uploaded".to_string(),
            stage_states: r#"{"deblur":"pending","depth":"pending","mesh":"pending","hallucination":"pending"}"#
                .to_string(),
            progress: 0,
            outputs: "{}".to_string(),
            stats: None,
            error_detail: None,
            warnings: "[]".to_string(),
            created_at: created_at.to_string(),
            updated_at: created_at.to_string(),
            completed_at: None,
        }
    }

    // ── Insert / find ──

    #[test]
    fn test_insert_and_find() {
        let db = test_db();
        let stored = row("job-1", "2026-01-01T00:00:00+00:00");
        insert(&db, &stored).unwrap();

        assert_eq!(find_by_id(&db, "job-1").unwrap(), Some(stored));
        assert!(find_by_id(&db, "job-2").unwrap().is_none());
    }

    #[test]
    fn test_insert_duplicate_fails() {
        let db = test_db();
        insert(&db, &row("dup", "2026-01-01T00:00:00+00:00")).unwrap();
        assert!(insert(&db, &row("dup", "2026-01-02T00:00:00+00:00")).is_err());
    }

    // ── Update ──

    #[test]
    fn test_update_rewrites_progress_fields_only() {
        let db = test_db();
        let mut job = row("job-2", "2026-01-01T00:00:00+00:00");
        insert(&db, &job).unwrap();

        job.status = "completed".to_string();
        job.progress = 100;
        job.outputs = r#"{"restoredImage":"/p/job-2_restored.png"}"#.to_string();
        job.completed_at = Some("2026-01-01T01:00:00+00:00".to_string());
        job.original_filename = "renamed.png".to_string();
        assert!(update(&db, &job).unwrap());

        let found = find_by_id(&db, "job-2").unwrap().unwrap();
        assert_eq!(found.status, "completed");
        assert_eq!(found.progress, 100);
        assert!(found.outputs.contains("restoredImage"));
        assert!(found.completed_at.is_some());
        assert_eq!(found.original_filename, "site.png");
    }

    #[test]
    fn test_update_missing_row() {
        let db = test_db();
        assert!(!update(&db, &row("ghost", "2026-01-01T00:00:00+00:00")).unwrap());
    }

    // ── Load / delete ──

    #[test]
    fn test_load_all_oldest_first() {
        let db = test_db();
        insert(&db, &row("late", "2026-03-01T00:00:00+00:00")).unwrap();
        insert(&db, &row("early", "2026-01-01T00:00:00+00:00")).unwrap();
        insert(&db, &row("middle", "2026-02-01T00:00:00+00:00")).unwrap();

        let ids: Vec<String> = load_all(&db).unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["early", "middle", "late"]);
    }

    #[test]
    fn test_delete() {
        let db = test_db();
        insert(&db, &row("d1", "2026-01-01T00:00:00+00:00")).unwrap();

        assert!(delete(&db, "d1").unwrap());
        assert!(!delete(&db, "d1").unwrap());
        assert!(load_all(&db).unwrap().is_empty());
    }
}
