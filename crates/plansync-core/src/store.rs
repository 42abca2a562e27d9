use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::baseline::{Baseline, BaselineKind, BaselineStore, baseline_not_found};
use crate::error::SyncError;
use crate::identifiers::ScopeId;

pub const BASELINE_SCHEMA_VERSION: u32 = 1;

/// Durable baseline store backed by a single SQLite database. The baseline
/// document itself is stored as JSON; the key columns exist for querying.
#[derive(Debug)]
pub struct SqliteBaselineStore {
    conn: Mutex<Connection>,
}

impl SqliteBaselineStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let conn = Connection::open(path).map_err(|err| SyncError::Persistence(err.to_string()))?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self, SyncError> {
        let conn =
            Connection::open_in_memory().map_err(|err| SyncError::Persistence(err.to_string()))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, SyncError> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.check_schema_version()?;
        store.init_schema()?;
        Ok(store)
    }

    fn check_schema_version(&self) -> Result<(), SyncError> {
        let conn = self.conn.lock().expect("baseline db lock");
        let found: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .map_err(|err| SyncError::Persistence(err.to_string()))?;
        if found > BASELINE_SCHEMA_VERSION {
            return Err(SyncError::UnsupportedSchemaVersion {
                supported: BASELINE_SCHEMA_VERSION,
                found,
            });
        }
        if found < BASELINE_SCHEMA_VERSION {
            conn.pragma_update(None, "user_version", BASELINE_SCHEMA_VERSION)
                .map_err(|err| SyncError::Persistence(err.to_string()))?;
        }
        Ok(())
    }

    fn init_schema(&self) -> Result<(), SyncError> {
        let conn = self.conn.lock().expect("baseline db lock");
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS baselines (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scope TEXT NOT NULL,
                kind TEXT NOT NULL,
                captured_at TEXT NOT NULL,
                captured_on TEXT NOT NULL,
                document TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_baselines_scope_kind
                ON baselines(scope, kind, captured_at DESC);
            CREATE INDEX IF NOT EXISTS idx_baselines_scope_day
                ON baselines(scope, kind, captured_on);
            ",
        )
        .map_err(|err| SyncError::Persistence(err.to_string()))
    }

    fn timestamp_text(captured_at: DateTime<Utc>) -> String {
        captured_at.to_rfc3339_opts(SecondsFormat::Micros, true)
    }
}

impl BaselineStore for SqliteBaselineStore {
    fn put(&self, baseline: &Baseline) -> Result<(), SyncError> {
        let document = serde_json::to_string(baseline)
            .map_err(|err| SyncError::Persistence(err.to_string()))?;
        let mut conn = self.conn.lock().expect("baseline db lock");
        let tx = conn
            .transaction()
            .map_err(|err| SyncError::Persistence(err.to_string()))?;
        if baseline.kind == BaselineKind::Verify {
            tx.execute(
                "DELETE FROM baselines WHERE scope = ?1 AND kind = ?2",
                params![baseline.scope.as_str(), BaselineKind::Verify.as_key()],
            )
            .map_err(|err| SyncError::Persistence(err.to_string()))?;
        }
        tx.execute(
            "
            INSERT INTO baselines (scope, kind, captured_at, captured_on, document)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
            params![
                baseline.scope.as_str(),
                baseline.kind.as_key(),
                Self::timestamp_text(baseline.captured_at),
                baseline.captured_on().to_string(),
                document,
            ],
        )
        .map_err(|err| SyncError::Persistence(err.to_string()))?;
        tx.commit()
            .map_err(|err| SyncError::Persistence(err.to_string()))
    }

    fn comparison_on(&self, scope: &ScopeId, day: NaiveDate) -> Result<Baseline, SyncError> {
        let conn = self.conn.lock().expect("baseline db lock");
        conn.query_row(
            "
            SELECT document FROM baselines
            WHERE scope = ?1 AND kind = ?2 AND captured_on = ?3
            ORDER BY captured_at DESC
            LIMIT 1
            ",
            params![
                scope.as_str(),
                BaselineKind::Comparison.as_key(),
                day.to_string()
            ],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(|err| SyncError::Persistence(err.to_string()))?
        .ok_or_else(|| baseline_not_found(scope, format!("no comparison baseline for {day}")))
        .and_then(|document| {
            serde_json::from_str(&document).map_err(|err| SyncError::Persistence(err.to_string()))
        })
    }

    fn latest_comparison(&self, scope: &ScopeId) -> Result<Option<Baseline>, SyncError> {
        let conn = self.conn.lock().expect("baseline db lock");
        let mut stmt = conn
            .prepare(
                "
                SELECT document FROM baselines
                WHERE scope = ?1 AND kind = ?2
                ORDER BY captured_at DESC
                LIMIT 1
                ",
            )
            .map_err(|err| SyncError::Persistence(err.to_string()))?;
        let document = stmt
            .query_row(
                params![scope.as_str(), BaselineKind::Comparison.as_key()],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(|err| SyncError::Persistence(err.to_string()))?;
        match document {
            Some(document) => serde_json::from_str(&document)
                .map(Some)
                .map_err(|err| SyncError::Persistence(err.to_string())),
            None => Ok(None),
        }
    }

    fn list_comparisons(&self, scope: &ScopeId) -> Result<Vec<NaiveDate>, SyncError> {
        let conn = self.conn.lock().expect("baseline db lock");
        let mut stmt = conn
            .prepare(
                "
                SELECT DISTINCT captured_on FROM baselines
                WHERE scope = ?1 AND kind = ?2
                ORDER BY captured_on ASC
                ",
            )
            .map_err(|err| SyncError::Persistence(err.to_string()))?;
        let rows = stmt
            .query_map(
                params![scope.as_str(), BaselineKind::Comparison.as_key()],
                |row| row.get::<_, String>(0),
            )
            .map_err(|err| SyncError::Persistence(err.to_string()))?;

        let mut days = Vec::new();
        for row in rows {
            let text = row.map_err(|err| SyncError::Persistence(err.to_string()))?;
            let day = text
                .parse::<NaiveDate>()
                .map_err(|err| SyncError::Persistence(err.to_string()))?;
            days.push(day);
        }
        Ok(days)
    }

    fn peek_verify(&self, scope: &ScopeId) -> Result<Option<Baseline>, SyncError> {
        let conn = self.conn.lock().expect("baseline db lock");
        let row = conn
            .query_row(
                "
                SELECT document FROM baselines
                WHERE scope = ?1 AND kind = ?2
                ORDER BY captured_at DESC
                LIMIT 1
                ",
                params![scope.as_str(), BaselineKind::Verify.as_key()],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(|err| SyncError::Persistence(err.to_string()))?;
        match row {
            Some(document) => serde_json::from_str(&document)
                .map(Some)
                .map_err(|err| SyncError::Persistence(err.to_string())),
            None => Ok(None),
        }
    }

    fn take_verify(&self, scope: &ScopeId) -> Result<Option<Baseline>, SyncError> {
        let mut conn = self.conn.lock().expect("baseline db lock");
        let tx = conn
            .transaction()
            .map_err(|err| SyncError::Persistence(err.to_string()))?;
        let row = tx
            .query_row(
                "
                SELECT id, document FROM baselines
                WHERE scope = ?1 AND kind = ?2
                ORDER BY captured_at DESC
                LIMIT 1
                ",
                params![scope.as_str(), BaselineKind::Verify.as_key()],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .map_err(|err| SyncError::Persistence(err.to_string()))?;

        let baseline = match row {
            Some((id, document)) => {
                tx.execute("DELETE FROM baselines WHERE id = ?1", params![id])
                    .map_err(|err| SyncError::Persistence(err.to_string()))?;
                Some(
                    serde_json::from_str(&document)
                        .map_err(|err| SyncError::Persistence(err.to_string()))?,
                )
            }
            None => None,
        };
        tx.commit()
            .map_err(|err| SyncError::Persistence(err.to_string()))?;
        Ok(baseline)
    }

    fn delete_comparison(&self, scope: &ScopeId, day: NaiveDate) -> Result<bool, SyncError> {
        let conn = self.conn.lock().expect("baseline db lock");
        let deleted = conn
            .execute(
                "DELETE FROM baselines WHERE scope = ?1 AND kind = ?2 AND captured_on = ?3",
                params![
                    scope.as_str(),
                    BaselineKind::Comparison.as_key(),
                    day.to_string()
                ],
            )
            .map_err(|err| SyncError::Persistence(err.to_string()))?;
        Ok(deleted > 0)
    }

    fn clear_scope(&self, scope: &ScopeId) -> Result<usize, SyncError> {
        let conn = self.conn.lock().expect("baseline db lock");
        conn.execute(
            "DELETE FROM baselines WHERE scope = ?1",
            params![scope.as_str()],
        )
        .map_err(|err| SyncError::Persistence(err.to_string()))
    }
}
