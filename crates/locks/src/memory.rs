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

//! In-memory lock store (reference implementation).

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::trace;

use crate::{LockRecord, LockResource, LockResult, LockStore, PutOutcome};

/// In-memory lock store.
///
/// ## Purpose
/// Reference [`LockStore`] for tests and single-process deployments. The
/// compare-and-swap is performed under one write lock, which is sufficient
/// because every holder shares this process.
///
/// ## Limitations
/// - Not persistent (locks lost on restart)
/// - Not distributed (single process only)
/// - No TTL cleanup (expired records remain until superseded or purged)
#[derive(Clone, Default)]
pub struct MemoryLockStore {
    records: Arc<RwLock<HashMap<String, LockRecord>>>,
}

impl MemoryLockStore {
    /// Create a new in-memory lock store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn get(&self, resource: &LockResource) -> LockResult<Option<LockRecord>> {
        let records = self.records.read().await;
        Ok(records.get(&resource.key()).cloned())
    }

    async fn try_put(
        &self,
        resource: &LockResource,
        expected_update_count: Option<u64>,
        record: LockRecord,
    ) -> LockResult<PutOutcome> {
        let mut records = self.records.write().await;
        let key = resource.key();
        let current = records.get(&key);

        if current.map(|r| r.update_count) != expected_update_count {
            trace!(resource = %resource, ?expected_update_count, "conditional put rejected");
            return Ok(PutOutcome::Conflict(current.cloned()));
        }

        records.insert(key, record.clone());
        Ok(PutOutcome::Stored(record))
    }

    async fn remove(&self, resource: &LockResource, expected_update_count: u64) -> LockResult<bool> {
        let mut records = self.records.write().await;
        let key = resource.key();
        match records.get(&key) {
            Some(current) if current.update_count == expected_update_count => {
                records.remove(&key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list(&self) -> LockResult<Vec<LockRecord>> {
        let records = self.records.read().await;
        let mut all: Vec<LockRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| a.resource.cmp(&b.resource));
        Ok(all)
    }
}
