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

//! Lock store contract.
//!
//! The store is the single source of truth for conflict detection. Every
//! mutation is conditional on the stored `update_count`, so two writers can
//! never silently overwrite each other, whether they share a process or only
//! a database.

use async_trait::async_trait;

use crate::{LockRecord, LockResource, LockResult};

/// Result of a conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// The record was written.
    Stored(LockRecord),
    /// The expectation did not hold; carries what is stored now (if anything).
    Conflict(Option<LockRecord>),
}

/// Durable table of lock records keyed by resource.
///
/// ## Atomicity
/// Each call is atomic with respect to concurrent callers on the same
/// resource. Implementations backed by shared storage must perform the
/// count comparison and the write as one operation on that storage
/// (`UPDATE ... WHERE key = ? AND update_count = ?` or equivalent), not
/// behind an in-process mutex.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Current record for `resource`, expired and released ones included.
    async fn get(&self, resource: &LockResource) -> LockResult<Option<LockRecord>>;

    /// Replace the record for `resource` if its stored count equals
    /// `expected_update_count`, or insert it if no record exists and the
    /// expectation is `None`.
    async fn try_put(
        &self,
        resource: &LockResource,
        expected_update_count: Option<u64>,
        record: LockRecord,
    ) -> LockResult<PutOutcome>;

    /// Delete the record for `resource` if its stored count equals
    /// `expected_update_count`. Returns whether a row was deleted.
    async fn remove(&self, resource: &LockResource, expected_update_count: u64) -> LockResult<bool>;

    /// All stored records, for diagnostics.
    async fn list(&self) -> LockResult<Vec<LockRecord>>;
}
