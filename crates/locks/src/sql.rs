// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 Shahzad A. Bhatti <bhatti@plexobject.com>
//
// This file is part of Repolock.
//
// Repolock is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// Repolock is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with Repolock. If not, see <https://www.gnu.org/licenses/>.

//! SQLite-backed lock store.
//!
//! Lock records live in one table keyed by the resource's canonical key.
//! Every mutation is a single conditional statement, so the database row is
//! the serialization point for all processes sharing the file:
//!
//! - first acquisition: `INSERT ... ON CONFLICT(resource) DO NOTHING`
//! - everything else: `UPDATE ... WHERE resource = ? AND update_count = ?`
//! - purge: `DELETE ... WHERE resource = ? AND update_count = ?`
//!
//! Timestamps are stored as UNIX epoch milliseconds.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::{LockError, LockRecord, LockResource, LockResult, LockStore, PutOutcome};

const SELECT_COLUMNS: &str =
    "resource, token, expires_at, update_count, acquired_at, renewed_at, released";

/// SQLite-based lock store.
///
/// Schema:
///
/// ```sql
/// CREATE TABLE IF NOT EXISTS lock_records (
///   resource TEXT PRIMARY KEY,
///   token TEXT NOT NULL,
///   expires_at INTEGER NOT NULL,
///   update_count INTEGER NOT NULL,
///   acquired_at INTEGER NOT NULL,
///   renewed_at INTEGER NOT NULL,
///   released INTEGER NOT NULL
/// );
/// ```
#[derive(Clone)]
pub struct SqliteLockStore {
    pool: SqlitePool,
}

impl SqliteLockStore {
    /// Open (and if needed create) a SQLite lock store.
    ///
    /// `database_url` is any valid `sqlx` SQLite URL, e.g.:
    /// - `sqlite::memory:` or `sqlite:file:name?mode=memory` (in-memory,
    ///   single connection)
    /// - `sqlite://locks.db`
    #[instrument(skip(database_url))]
    pub async fn new(database_url: &str) -> LockResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| LockError::ConfigError(format!("invalid SQLite url '{database_url}': {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        // An in-memory database only exists inside its connection.
        let max_connections = if is_in_memory_url(database_url) { 1 } else { 8 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| LockError::BackendError(format!("failed to connect SQLite: {e}")))?;

        Self::from_pool(pool).await
    }

    /// Use an existing pool, creating the table if it does not exist.
    pub async fn from_pool(pool: SqlitePool) -> LockResult<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS lock_records (
              resource TEXT PRIMARY KEY,
              token TEXT NOT NULL,
              expires_at INTEGER NOT NULL,
              update_count INTEGER NOT NULL,
              acquired_at INTEGER NOT NULL,
              renewed_at INTEGER NOT NULL,
              released INTEGER NOT NULL
            );
        "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| LockError::BackendError(format!("failed to create lock_records table: {e}")))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn record_from_row(row: &SqliteRow) -> LockResult<LockRecord> {
        let resource: String = row.try_get("resource")?;
        let update_count: i64 = row.try_get("update_count")?;
        let released: i64 = row.try_get("released")?;

        Ok(LockRecord {
            resource: LockResource::new(&resource)?,
            token: row.try_get("token")?,
            expires_at: from_millis(row.try_get("expires_at")?)?,
            update_count: u64::try_from(update_count)
                .map_err(|_| LockError::BackendError(format!("negative update_count for {resource}")))?,
            acquired_at: from_millis(row.try_get("acquired_at")?)?,
            renewed_at: from_millis(row.try_get("renewed_at")?)?,
            released: released != 0,
        })
    }
}

fn is_in_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

fn from_millis(ms: i64) -> LockResult<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| LockError::BackendError(format!("invalid timestamp: {ms}")))
}

// Round a timestamp down to the stored precision.
fn to_stored(at: DateTime<Utc>) -> LockResult<DateTime<Utc>> {
    from_millis(at.timestamp_millis())
}

fn to_count(count: u64) -> LockResult<i64> {
    i64::try_from(count).map_err(|_| LockError::BackendError(format!("update_count {count} out of range")))
}

#[async_trait]
impl LockStore for SqliteLockStore {
    #[instrument(skip(self), fields(resource = %resource))]
    async fn get(&self, resource: &LockResource) -> LockResult<Option<LockRecord>> {
        let row = sqlx::query(&format!("SELECT {SELECT_COLUMNS} FROM lock_records WHERE resource = ?1"))
            .bind(resource.key())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::record_from_row).transpose()
    }

    #[instrument(skip(self, record), fields(resource = %resource, update_count = record.update_count))]
    async fn try_put(
        &self,
        resource: &LockResource,
        expected_update_count: Option<u64>,
        record: LockRecord,
    ) -> LockResult<PutOutcome> {
        let record = LockRecord {
            expires_at: to_stored(record.expires_at)?,
            acquired_at: to_stored(record.acquired_at)?,
            renewed_at: to_stored(record.renewed_at)?,
            ..record
        };
        let key = resource.key();
        let result = match expected_update_count {
            None => {
                sqlx::query(
                    r#"INSERT INTO lock_records
                       (resource, token, expires_at, update_count, acquired_at, renewed_at, released)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                       ON CONFLICT(resource) DO NOTHING"#,
                )
                .bind(&key)
                .bind(&record.token)
                .bind(record.expires_at.timestamp_millis())
                .bind(to_count(record.update_count)?)
                .bind(record.acquired_at.timestamp_millis())
                .bind(record.renewed_at.timestamp_millis())
                .bind(record.released as i64)
                .execute(&self.pool)
                .await?
            }
            Some(expected) => {
                sqlx::query(
                    r#"UPDATE lock_records
                       SET token = ?3,
                           expires_at = ?4,
                           update_count = ?5,
                           acquired_at = ?6,
                           renewed_at = ?7,
                           released = ?8
                     WHERE resource = ?1 AND update_count = ?2"#,
                )
                .bind(&key)
                .bind(to_count(expected)?)
                .bind(&record.token)
                .bind(record.expires_at.timestamp_millis())
                .bind(to_count(record.update_count)?)
                .bind(record.acquired_at.timestamp_millis())
                .bind(record.renewed_at.timestamp_millis())
                .bind(record.released as i64)
                .execute(&self.pool)
                .await?
            }
        };

        if result.rows_affected() == 1 {
            return Ok(PutOutcome::Stored(record));
        }

        debug!(?expected_update_count, "conditional write matched no row");
        Ok(PutOutcome::Conflict(self.get(resource).await?))
    }

    #[instrument(skip(self), fields(resource = %resource))]
    async fn remove(&self, resource: &LockResource, expected_update_count: u64) -> LockResult<bool> {
        let result = sqlx::query("DELETE FROM lock_records WHERE resource = ?1 AND update_count = ?2")
            .bind(resource.key())
            .bind(to_count(expected_update_count)?)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list(&self) -> LockResult<Vec<LockRecord>> {
        let rows = sqlx::query(&format!("SELECT {SELECT_COLUMNS} FROM lock_records ORDER BY resource"))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::record_from_row).collect()
    }
}
