//! Data Access Layer
//!
//! The session document lives in one JSONB column; `module_type`, `status`
//! and `session_code` are extracted for filtering and the `version` column
//! carries the optimistic-concurrency revision. The guarded UPDATE makes the
//! compare-and-swap atomic at the database, which is what the client-side
//! retry loops depend on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use duet_core::session::{NewSession, PracticeSession, generate_session_code};
use duet_core::store::{SessionFilter, SessionPatch, SessionStore, StoreError};

/// How many times a create retries on a session-code collision.
const CODE_RETRIES: usize = 3;

/// A wrapper around the `PgPool` to provide a clear data access interface.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Creates a new `Db` instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs all pending `sqlx` migrations.
    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Inserts a freshly materialized session. Share codes are random and
    /// short, so a unique-violation retry regenerates the code rather than
    /// failing the create.
    pub async fn create_session(&self, new: NewSession) -> Result<PracticeSession, StoreError> {
        let mut session = new.into_session();

        for _ in 0..CODE_RETRIES {
            let doc = serde_json::to_value(&session)
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            let result = sqlx::query(
                r#"
                INSERT INTO practice_sessions
                    (id, session_code, module_type, status, doc, version, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(session.id)
            .bind(&session.session_code)
            .bind(session.module_type.to_string())
            .bind(session.status.to_string())
            .bind(&doc)
            .bind(session.version)
            .bind(session.created_at)
            .bind(session.updated_at)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => return Ok(session),
                Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                    session.session_code = generate_session_code();
                }
                Err(e) => return Err(StoreError::Unavailable(e.to_string())),
            }
        }
        Err(StoreError::Unavailable(
            "could not allocate a unique session code".to_string(),
        ))
    }

    /// Retrieves a single session by its ID.
    pub async fn get_session(&self, id: Uuid) -> Result<PracticeSession, StoreError> {
        let row = sqlx::query("SELECT doc FROM practice_sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        match row {
            Some(row) => decode_doc(&row),
            None => Err(StoreError::NotFound(id)),
        }
    }

    /// Lists sessions matching the filter, most recent first.
    pub async fn query_sessions(
        &self,
        filter: &SessionFilter,
    ) -> Result<Vec<PracticeSession>, StoreError> {
        let mut builder = sqlx::QueryBuilder::<sqlx::Postgres>::new(
            "SELECT doc FROM practice_sessions WHERE TRUE",
        );
        if let Some(module) = filter.module_type {
            builder.push(" AND module_type = ");
            builder.push_bind(module.to_string());
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ");
            builder.push_bind(status.to_string());
        }
        if let Some(code) = &filter.session_code {
            builder.push(" AND session_code = ");
            builder.push_bind(code.clone());
        }
        builder.push(" ORDER BY created_at DESC");

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        rows.iter().map(decode_doc).collect()
    }

    /// Applies a shallow-merge patch iff the stored version still equals
    /// `expected_version`. The version check rides in the UPDATE's WHERE
    /// clause, so two racing writers can never both commit against the same
    /// revision.
    pub async fn update_session(
        &self,
        id: Uuid,
        patch: SessionPatch,
        expected_version: i64,
    ) -> Result<PracticeSession, StoreError> {
        let mut current = self.get_session(id).await?;
        if current.version != expected_version {
            return Err(StoreError::VersionConflict {
                id,
                expected: expected_version,
            });
        }
        patch.validate_against(&current)?;

        patch.apply(&mut current);
        current.version = expected_version + 1;
        current.updated_at = Utc::now();
        let doc =
            serde_json::to_value(&current).map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let result = sqlx::query(
            r#"
            UPDATE practice_sessions
            SET doc = $1, status = $2, version = $3, updated_at = $4
            WHERE id = $5 AND version = $6
            "#,
        )
        .bind(&doc)
        .bind(current.status.to_string())
        .bind(current.version)
        .bind(current.updated_at)
        .bind(id)
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        if result.rows_affected() == 0 {
            // Someone advanced the row between our read and our write, or
            // the sweeper deleted it.
            let exists = sqlx::query("SELECT 1 FROM practice_sessions WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?
                .is_some();
            return Err(if exists {
                StoreError::VersionConflict {
                    id,
                    expected: expected_version,
                }
            } else {
                StoreError::NotFound(id)
            });
        }

        Ok(current)
    }

    /// Deletes never-completed sessions whose last update predates `cutoff`.
    /// Returns how many rows were removed.
    pub async fn purge_stale(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM practice_sessions WHERE status <> 'completed' AND updated_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(result.rows_affected())
    }
}

fn decode_doc(row: &sqlx::postgres::PgRow) -> Result<PracticeSession, StoreError> {
    let doc: serde_json::Value = row
        .try_get("doc")
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;
    serde_json::from_value(doc)
        .map_err(|e| StoreError::Unavailable(format!("corrupt session document: {}", e)))
}

#[async_trait]
impl SessionStore for Db {
    async fn create(&self, new: NewSession) -> Result<PracticeSession, StoreError> {
        self.create_session(new).await
    }

    async fn get(&self, id: Uuid) -> Result<PracticeSession, StoreError> {
        self.get_session(id).await
    }

    async fn query(&self, filter: &SessionFilter) -> Result<Vec<PracticeSession>, StoreError> {
        self.query_sessions(filter).await
    }

    async fn update(
        &self,
        id: Uuid,
        patch: SessionPatch,
        expected_version: i64,
    ) -> Result<PracticeSession, StoreError> {
        self.update_session(id, patch, expected_version).await
    }
}
