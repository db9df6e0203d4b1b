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

//! Lock manager: acquisition, renewal, release and validation of leases.
//!
//! ## Protocol
//! Every mutation is a compare-and-swap on the stored `update_count`:
//!
//! - **Acquire**: read the record; if it is absent, expired or released,
//!   write a new generation (`update_count + 1`, or 0 for a first lock)
//!   conditional on the count just read. Losing that race is
//!   [`LockError::FailedToAcquireLock`]; finding a live lock held under another
//!   token is [`LockError::ExclusiveLockExists`].
//! - **Renew**: the stored count must still equal the handle's. A different
//!   count means someone else acquired the resource in the meantime
//!   ([`LockError::LockUpdateCount`]); no record at all is
//!   [`LockError::LockResourceMissing`]. Renewal extends the lease from now.
//! - **Release**: writes a released tombstone for the handle's generation.
//!   A handle that no longer matches is treated as already released.
//! - **Validate**: read-only check that the handle is the current, unexpired
//!   holder.
//!
//! The manager never waits on other holders and never retries; callers that
//! want to wait poll with their own backoff (see [`ResourceGuard`](crate::ResourceGuard)).

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::{
    Clock, LockError, LockHandle, LockRecord, LockResource, LockResult, LockStore, PutOutcome, SystemClock,
    TokenGenerator, UlidTokenGenerator,
};

/// Coordinates leases over resources stored in a [`LockStore`].
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn LockStore>,
    tokens: Arc<dyn TokenGenerator>,
    clock: Arc<dyn Clock>,
}

impl LockManager {
    /// Create a manager from explicit collaborators.
    pub fn new(store: Arc<dyn LockStore>, tokens: Arc<dyn TokenGenerator>, clock: Arc<dyn Clock>) -> Self {
        Self { store, tokens, clock }
    }

    /// Manager over `store` with ULID tokens and the system clock.
    pub fn with_store(store: Arc<dyn LockStore>) -> Self {
        Self::new(store, Arc::new(UlidTokenGenerator::new()), Arc::new(SystemClock))
    }

    pub fn store(&self) -> &Arc<dyn LockStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Acquire an exclusive lease on `resource` under a fresh token.
    #[instrument(skip(self), fields(resource = %resource, ttl_ms = ttl.as_millis() as u64))]
    pub async fn acquire(&self, resource: &LockResource, ttl: Duration) -> LockResult<LockHandle> {
        let token = self.tokens.new_token();
        self.acquire_with_token(resource, &token, ttl).await
    }

    /// Acquire `resource` under a caller-chosen token.
    ///
    /// A live lock already held under the same token is re-acquired: its
    /// count is bumped and the lease starts over.
    #[instrument(skip(self), fields(resource = %resource, ttl_ms = ttl.as_millis() as u64))]
    pub async fn acquire_with_token(
        &self,
        resource: &LockResource,
        token: &str,
        ttl: Duration,
    ) -> LockResult<LockHandle> {
        if token.is_empty() {
            return Err(LockError::InvalidLease("lock token must not be empty".to_string()));
        }
        let now = self.clock.now();
        let expires_at = expiry(now, ttl)?;

        let current = self.store.get(resource).await?;
        let (expected, update_count) = match &current {
            Some(existing) if existing.is_live(now) && existing.token != token => {
                debug!(holder = %existing.token, "exclusive lock exists");
                return Err(LockError::ExclusiveLockExists {
                    resource: resource.clone(),
                    token: token.to_string(),
                });
            }
            Some(existing) => (Some(existing.update_count), next_count(existing)?),
            None => (None, 0),
        };

        let record = LockRecord {
            resource: resource.clone(),
            token: token.to_string(),
            expires_at,
            update_count,
            acquired_at: now,
            renewed_at: now,
            released: false,
        };

        match self.store.try_put(resource, expected, record).await? {
            PutOutcome::Stored(stored) => {
                debug!(token = %stored.token, update_count = stored.update_count, "lock acquired");
                Ok(stored.handle())
            }
            PutOutcome::Conflict(winner) => {
                debug!(
                    winner = winner.as_ref().map(|w| w.token.as_str()).unwrap_or("<none>"),
                    "lost acquisition race"
                );
                Err(LockError::FailedToAcquireLock {
                    resource: resource.clone(),
                    token: token.to_string(),
                })
            }
        }
    }

    /// Extend the lease held by `handle` to `now + ttl`.
    ///
    /// A lease that ran out but was never taken by anyone else can still be
    /// renewed: an unchanged count proves nobody else held the resource.
    #[instrument(skip(self, handle), fields(resource = %handle.resource, token = %handle.token, update_count = handle.update_count))]
    pub async fn renew(&self, handle: &LockHandle, ttl: Duration) -> LockResult<LockHandle> {
        let now = self.clock.now();
        let expires_at = expiry(now, ttl)?;

        let current = self
            .store
            .get(&handle.resource)
            .await?
            .ok_or_else(|| missing(handle))?;
        check_generation(&current, handle)?;

        let expected = current.update_count;
        let record = LockRecord {
            expires_at,
            update_count: next_count(&current)?,
            renewed_at: now,
            ..current
        };

        match self.store.try_put(&handle.resource, Some(expected), record).await? {
            PutOutcome::Stored(stored) => {
                debug!(update_count = stored.update_count, "lock renewed");
                Ok(stored.handle())
            }
            PutOutcome::Conflict(Some(winner)) => {
                warn!(actual = winner.update_count, "lock taken during renewal");
                Err(update_count_mismatch(handle, winner.update_count))
            }
            PutOutcome::Conflict(None) => Err(missing(handle)),
        }
    }

    /// Release the lease held by `handle`.
    ///
    /// Returns `true` when this call released the lock, `false` when the
    /// handle had already lost it (expired and taken, released, or purged).
    #[instrument(skip(self, handle), fields(resource = %handle.resource, token = %handle.token, update_count = handle.update_count))]
    pub async fn release(&self, handle: &LockHandle) -> LockResult<bool> {
        let now = self.clock.now();
        let current = match self.store.get(&handle.resource).await? {
            Some(current) if !current.released && current.matches(handle) => current,
            Some(current) => {
                debug!(
                    current_token = %current.token,
                    current_count = current.update_count,
                    released = current.released,
                    "handle no longer current, nothing to release"
                );
                return Ok(false);
            }
            None => {
                debug!("no lock record, nothing to release");
                return Ok(false);
            }
        };

        let tombstone = LockRecord {
            expires_at: current.expires_at.min(now),
            renewed_at: now,
            released: true,
            ..current
        };

        match self.store.try_put(&handle.resource, Some(handle.update_count), tombstone).await? {
            PutOutcome::Stored(_) => {
                debug!("lock released");
                Ok(true)
            }
            PutOutcome::Conflict(_) => {
                debug!("lock changed before release");
                Ok(false)
            }
        }
    }

    /// Whether `handle` is still the current, unexpired holder.
    ///
    /// Read-only. Fails with [`LockError::LockResourceMissing`] when the
    /// record is gone or was released.
    pub async fn validate(&self, handle: &LockHandle) -> LockResult<bool> {
        match self.verify(handle).await {
            Ok(_) => Ok(true),
            Err(err @ LockError::LockResourceMissing { .. }) => Err(err),
            Err(err) if err.is_consistency_violation() || err.is_contention() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Return the stored record if `handle` is still the current, unexpired
    /// holder, otherwise the reason it is not.
    #[instrument(skip(self, handle), fields(resource = %handle.resource, token = %handle.token, update_count = handle.update_count))]
    pub async fn verify(&self, handle: &LockHandle) -> LockResult<LockRecord> {
        let now = self.clock.now();
        let current = self
            .store
            .get(&handle.resource)
            .await?
            .ok_or_else(|| missing(handle))?;
        check_generation(&current, handle)?;

        if current.is_expired(now) {
            return Err(LockError::LeaseExpired {
                resource: handle.resource.clone(),
                token: handle.token.clone(),
                expired_at: current.expires_at,
            });
        }
        Ok(current)
    }

    /// Delete the record for `resource` once it is no longer live.
    ///
    /// Used when the locked entity itself goes away. Handles for the purged
    /// record then fail with [`LockError::LockResourceMissing`].
    #[instrument(skip(self), fields(resource = %resource))]
    pub async fn purge(&self, resource: &LockResource) -> LockResult<bool> {
        let now = self.clock.now();
        let Some(current) = self.store.get(resource).await? else {
            return Ok(false);
        };
        if current.is_live(now) {
            return Err(LockError::ExclusiveLockExists {
                resource: resource.clone(),
                token: current.token,
            });
        }

        let removed = self.store.remove(resource, current.update_count).await?;
        debug!(removed, "purge");
        Ok(removed)
    }

    /// Stored record for `resource`, if any.
    pub async fn current(&self, resource: &LockResource) -> LockResult<Option<LockRecord>> {
        self.store.get(resource).await
    }

    /// All stored records.
    pub async fn list(&self) -> LockResult<Vec<LockRecord>> {
        self.store.list().await
    }
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> LockResult<DateTime<Utc>> {
    if ttl.is_zero() {
        return Err(LockError::InvalidLease("ttl must be greater than zero".to_string()));
    }
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| LockError::InvalidLease(format!("ttl {ttl:?} is out of range")))
}

fn next_count(record: &LockRecord) -> LockResult<u64> {
    record
        .update_count
        .checked_add(1)
        .ok_or_else(|| LockError::BackendError(format!("update count exhausted for {}", record.resource)))
}

/// Same generation, still held: the checks shared by renew and verify.
fn check_generation(current: &LockRecord, handle: &LockHandle) -> LockResult<()> {
    if current.update_count != handle.update_count {
        return Err(update_count_mismatch(handle, current.update_count));
    }
    if current.released {
        return Err(missing(handle));
    }
    if current.token != handle.token {
        return Err(LockError::ExclusiveLockExists {
            resource: handle.resource.clone(),
            token: handle.token.clone(),
        });
    }
    Ok(())
}

fn missing(handle: &LockHandle) -> LockError {
    LockError::LockResourceMissing {
        resource: handle.resource.clone(),
        token: handle.token.clone(),
    }
}

fn update_count_mismatch(handle: &LockHandle, actual: u64) -> LockError {
    LockError::LockUpdateCount {
        resource: handle.resource.clone(),
        token: handle.token.clone(),
        actual,
        expected: handle.update_count,
    }
}
