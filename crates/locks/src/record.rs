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

//! Lock records and holder handles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::LockResource;

/// Persisted state of a lock on one resource.
///
/// `update_count` only ever grows while the record exists. A record that is
/// expired or released is logically absent and may be superseded by the next
/// acquisition, which continues from `update_count + 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub resource: LockResource,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub update_count: u64,
    pub acquired_at: DateTime<Utc>,
    pub renewed_at: DateTime<Utc>,
    /// Set by an explicit release; the row is kept so the count survives.
    pub released: bool,
}

impl LockRecord {
    /// Whether the lease has run out at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Whether the record currently excludes other holders.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.released && !self.is_expired(now)
    }

    /// Whether `handle` names this exact generation of the lock.
    pub fn matches(&self, handle: &LockHandle) -> bool {
        self.token == handle.token && self.update_count == handle.update_count
    }

    pub fn handle(&self) -> LockHandle {
        LockHandle {
            resource: self.resource.clone(),
            token: self.token.clone(),
            update_count: self.update_count,
            expires_at: self.expires_at,
        }
    }
}

/// What a holder keeps after a successful acquisition or renewal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHandle {
    pub resource: LockResource,
    pub token: String,
    pub update_count: u64,
    pub expires_at: DateTime<Utc>,
}
