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

//! SQLite lock store integration tests.
//!
//! These tests verify:
//! - Manager operations against the durable store
//! - Several "cluster members" (independent pools and token generators)
//!   sharing one database file
//! - Update counts surviving a reopen of the database
//! - Database rows reflecting lock state

#[cfg(feature = "sqlite-backend")]
mod tests {
    use repolock_locks::{
        LockError, LockManager, LockResource, LockStore, ManualClock, ResourceGuard, SqliteLockStore,
        UlidTokenGenerator,
    };
    use sqlx::Row;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    const TTL: Duration = Duration::from_secs(30);

    fn resource(key: &str) -> LockResource {
        LockResource::new(key).unwrap()
    }

    fn db_url(dir: &TempDir) -> String {
        format!("sqlite://{}", dir.path().join("locks.db").display())
    }

    /// One cluster member: its own pool, token generator and clock.
    async fn member(url: &str, clock: Arc<ManualClock>) -> LockManager {
        let store = SqliteLockStore::new(url).await.unwrap();
        LockManager::new(Arc::new(store), Arc::new(UlidTokenGenerator::new()), clock)
    }

    #[tokio::test]
    async fn test_sqlite_lock_lifecycle() {
        let store = Arc::new(SqliteLockStore::new("sqlite::memory:").await.unwrap());
        let manager = LockManager::with_store(store.clone());
        let doc = resource("{urn:repo}doc-1");

        let handle = manager.acquire(&doc, TTL).await.unwrap();
        assert_eq!(handle.update_count, 0);
        assert!(manager.validate(&handle).await.unwrap());

        let renewed = manager.renew(&handle, TTL).await.unwrap();
        assert_eq!(renewed.update_count, 1);
        assert_eq!(renewed.token, handle.token);

        assert!(manager.release(&renewed).await.unwrap());

        // Verify the row in the database
        let row = sqlx::query("SELECT token, update_count, released FROM lock_records WHERE resource = ?1")
            .bind("{urn:repo}doc-1")
            .fetch_one(store.pool())
            .await
            .unwrap();
        let token: String = row.get("token");
        let update_count: i64 = row.get("update_count");
        let released: i64 = row.get("released");
        assert_eq!(token, handle.token);
        assert_eq!(update_count, 1);
        assert_eq!(released, 1);

        let next = manager.acquire(&doc, TTL).await.unwrap();
        assert_eq!(next.update_count, 2);
    }

    #[tokio::test]
    async fn test_sqlite_members_share_locks() {
        let dir = TempDir::new().unwrap();
        let url = db_url(&dir);
        let clock = Arc::new(ManualClock::default());
        let node_a = member(&url, clock.clone()).await;
        let node_b = member(&url, clock.clone()).await;
        let doc = resource("doc:42");

        let a = node_a.acquire(&doc, TTL).await.unwrap();
        let err = node_b.acquire(&doc, TTL).await.unwrap_err();
        assert!(matches!(err, LockError::ExclusiveLockExists { .. }));

        assert!(node_a.release(&a).await.unwrap());
        let b = node_b.acquire(&doc, TTL).await.unwrap();
        assert_eq!(b.update_count, 1);
        assert_ne!(b.token, a.token);
    }

    #[tokio::test]
    async fn test_sqlite_stale_member_cannot_renew() {
        let dir = TempDir::new().unwrap();
        let url = db_url(&dir);
        let clock = Arc::new(ManualClock::default());
        let node_a = member(&url, clock.clone()).await;
        let node_b = member(&url, clock.clone()).await;
        let doc = resource("doc:7");

        let a = node_a.acquire(&doc, Duration::from_secs(1)).await.unwrap();
        clock.advance(Duration::from_secs(2));
        let b = node_b.acquire(&doc, TTL).await.unwrap();
        assert_eq!(b.update_count, 1);

        let err = node_a.renew(&a, TTL).await.unwrap_err();
        assert!(matches!(err, LockError::LockUpdateCount { actual: 1, expected: 0, .. }));
        assert!(!node_a.validate(&a).await.unwrap());
        assert!(node_b.validate(&b).await.unwrap());
    }

    #[tokio::test]
    async fn test_sqlite_update_count_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let url = db_url(&dir);
        let clock = Arc::new(ManualClock::default());
        let doc = resource("doc:durable");

        {
            let manager = member(&url, clock.clone()).await;
            let handle = manager.acquire(&doc, TTL).await.unwrap();
            let handle = manager.renew(&handle, TTL).await.unwrap();
            manager.release(&handle).await.unwrap();
        }

        let manager = member(&url, clock.clone()).await;
        let record = manager.current(&doc).await.unwrap().unwrap();
        assert!(record.released);
        assert_eq!(record.update_count, 1);

        let handle = manager.acquire(&doc, TTL).await.unwrap();
        assert_eq!(handle.update_count, 2);
    }

    #[tokio::test]
    async fn test_sqlite_purge_then_renew_is_missing() {
        let clock = Arc::new(ManualClock::default());
        let manager = member("sqlite::memory:", clock.clone()).await;
        let doc = resource("doc:deleted");

        let handle = manager.acquire(&doc, Duration::from_secs(1)).await.unwrap();
        clock.advance(Duration::from_secs(2));
        assert!(manager.purge(&doc).await.unwrap());
        assert!(manager.store().get(&doc).await.unwrap().is_none());

        let err = manager.renew(&handle, TTL).await.unwrap_err();
        assert!(matches!(err, LockError::LockResourceMissing { .. }));
        let err = manager.validate(&handle).await.unwrap_err();
        assert_eq!(err.message_id(), Some("system.locks.err.lock_resource_missing"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sqlite_concurrent_members_single_winner() {
        let dir = TempDir::new().unwrap();
        let url = db_url(&dir);
        let clock = Arc::new(ManualClock::default());

        let mut members = Vec::new();
        for _ in 0..4 {
            members.push(Arc::new(member(&url, clock.clone()).await));
        }

        let mut tasks = Vec::new();
        for (i, manager) in members.iter().enumerate() {
            for _ in 0..4 {
                let manager = manager.clone();
                tasks.push(tokio::spawn(async move {
                    let result = manager.acquire(&LockResource::new("doc:race").unwrap(), TTL).await;
                    (i, result)
                }));
            }
        }

        let mut winners = 0;
        for task in tasks {
            let (_member, result) = task.await.unwrap();
            match result {
                Ok(handle) => {
                    assert_eq!(handle.update_count, 0);
                    winners += 1;
                }
                Err(err) => assert!(err.is_contention(), "unexpected error: {err:?}"),
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_sqlite_guarded_section() {
        let store = Arc::new(SqliteLockStore::new("sqlite::memory:").await.unwrap());
        let guard = ResourceGuard::new(LockManager::with_store(store));
        let doc = resource("doc:guarded");

        let count = guard
            .with_lock(&doc, TTL, |scope| async move {
                scope.confirm().await?;
                Ok::<_, LockError>(scope.handle().update_count)
            })
            .await
            .unwrap();
        assert_eq!(count, 0);

        let record = guard.manager().current(&doc).await.unwrap().unwrap();
        assert!(record.released);
    }
}
