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

//! Error types for lock acquisition.
//!
//! Every failure the lock core surfaces is a variant of [`LockError`]. The four
//! lock-acquisition variants carry the resource and token involved so callers
//! can attribute the failure, and each reports a stable message id through
//! [`LockError::message_id`].

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::LockResource;

/// Result type for lock operations.
pub type LockResult<T> = Result<T, LockError>;

/// Message id for [`LockError::FailedToAcquireLock`].
pub const ERR_FAILED_TO_ACQUIRE_LOCK: &str = "system.locks.err.failed_to_acquire_lock";
/// Message id for [`LockError::LockResourceMissing`].
pub const ERR_LOCK_RESOURCE_MISSING: &str = "system.locks.err.lock_resource_missing";
/// Message id for [`LockError::LockUpdateCount`].
pub const ERR_LOCK_UPDATE_COUNT: &str = "system.locks.err.lock_update_count";
/// Message id for [`LockError::ExclusiveLockExists`].
pub const ERR_EXCLUSIVE_LOCK_EXISTS: &str = "system.locks.err.excl_lock_exists";
/// Message id for [`LockError::LeaseExpired`].
pub const ERR_LEASE_EXPIRED: &str = "system.locks.err.lease_expired";

/// Errors that can occur during lock operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// A concurrent acquirer won the compare-and-swap for the resource.
    #[error("Failed to acquire lock {resource} with token {token}")]
    FailedToAcquireLock { resource: LockResource, token: String },

    /// The lock record backing a handle no longer exists.
    #[error("Lock resource {resource} is missing (token {token})")]
    LockResourceMissing { resource: LockResource, token: String },

    /// The stored update count no longer matches the handle.
    #[error("Lock {resource} update count mismatch for token {token}: actual {actual}, expected {expected}")]
    LockUpdateCount {
        resource: LockResource,
        token: String,
        actual: u64,
        expected: u64,
    },

    /// A live lock on the resource is held under another token.
    #[error("Exclusive lock already exists on {resource} (token {token})")]
    ExclusiveLockExists { resource: LockResource, token: String },

    /// The handle is still current but its lease has run out.
    #[error("Lease on {resource} for token {token} expired at {expired_at}")]
    LeaseExpired {
        resource: LockResource,
        token: String,
        expired_at: DateTime<Utc>,
    },

    /// Invalid resource name
    #[error("Invalid lock resource: {0}")]
    InvalidResource(String),

    /// Invalid lease duration or guard setting
    #[error("Invalid lease: {0}")]
    InvalidLease(String),

    /// Backend error (database, network, etc.)
    #[error("Backend error: {0}")]
    BackendError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl LockError {
    /// Stable message id for the lock-acquisition variants.
    pub fn message_id(&self) -> Option<&'static str> {
        match self {
            LockError::FailedToAcquireLock { .. } => Some(ERR_FAILED_TO_ACQUIRE_LOCK),
            LockError::LockResourceMissing { .. } => Some(ERR_LOCK_RESOURCE_MISSING),
            LockError::LockUpdateCount { .. } => Some(ERR_LOCK_UPDATE_COUNT),
            LockError::ExclusiveLockExists { .. } => Some(ERR_EXCLUSIVE_LOCK_EXISTS),
            LockError::LeaseExpired { .. } => Some(ERR_LEASE_EXPIRED),
            _ => None,
        }
    }

    /// Contention failures are expected under load and may be retried.
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            LockError::FailedToAcquireLock { .. } | LockError::ExclusiveLockExists { .. }
        )
    }

    /// Consistency violations mean the caller's exclusivity no longer holds;
    /// the in-progress operation must be aborted, not retried.
    pub fn is_consistency_violation(&self) -> bool {
        matches!(
            self,
            LockError::LockUpdateCount { .. }
                | LockError::LockResourceMissing { .. }
                | LockError::LeaseExpired { .. }
        )
    }

    /// Resource the failure refers to, if any.
    pub fn resource(&self) -> Option<&LockResource> {
        match self {
            LockError::FailedToAcquireLock { resource, .. }
            | LockError::LockResourceMissing { resource, .. }
            | LockError::LockUpdateCount { resource, .. }
            | LockError::ExclusiveLockExists { resource, .. }
            | LockError::LeaseExpired { resource, .. } => Some(resource),
            _ => None,
        }
    }
}

#[cfg(feature = "sqlite-backend")]
impl From<sqlx::Error> for LockError {
    fn from(err: sqlx::Error) -> Self {
        LockError::BackendError(format!("SQL error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> LockResource {
        LockResource::new("doc:42").unwrap()
    }

    #[test]
    fn test_message_ids() {
        let err = LockError::FailedToAcquireLock { resource: doc(), token: "t1".to_string() };
        assert_eq!(err.message_id(), Some(ERR_FAILED_TO_ACQUIRE_LOCK));

        let err = LockError::LockUpdateCount {
            resource: doc(),
            token: "t1".to_string(),
            actual: 3,
            expected: 2,
        };
        assert_eq!(err.message_id(), Some(ERR_LOCK_UPDATE_COUNT));
        assert_eq!(err.to_string(), "Lock doc:42 update count mismatch for token t1: actual 3, expected 2");

        assert_eq!(LockError::BackendError("down".to_string()).message_id(), None);
    }

    #[test]
    fn test_classification() {
        let contention = LockError::ExclusiveLockExists { resource: doc(), token: "t2".to_string() };
        assert!(contention.is_contention());
        assert!(!contention.is_consistency_violation());

        let missing = LockError::LockResourceMissing { resource: doc(), token: "t1".to_string() };
        assert!(missing.is_consistency_violation());
        assert!(!missing.is_contention());
        assert_eq!(missing.resource(), Some(&doc()));

        let backend = LockError::BackendError("io".to_string());
        assert!(!backend.is_contention());
        assert!(!backend.is_consistency_violation());
        assert!(backend.resource().is_none());
    }
}
