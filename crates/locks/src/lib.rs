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

//! # Repolock Locks
//!
//! ## Purpose
//! Exclusive, time-bounded leases over named repository resources. Content
//! services take a lock on a node before mutating it; cluster members share
//! the lock table, so a lock taken on one application server excludes
//! writers on every other.
//!
//! ## Design Decisions
//! - **Update-count conflict detection**: every lock record carries a
//!   monotonically increasing `update_count`; every write is conditional on
//!   it. Timestamps decide expiry only, never correctness.
//! - **Leases, not membership**: a crashed holder's lock is reclaimed once
//!   its lease runs out. There are no heartbeats between nodes and no wait
//!   queues; contended callers fail fast and retry on their own terms.
//! - **Explicit collaborators**: [`LockManager`] is built from a
//!   [`LockStore`], a [`TokenGenerator`] and a [`Clock`].
//!
//! ## Backend Support
//! - **Memory**: `HashMap`-based, single process (always available)
//! - **SQLite**: durable, shared by every process that opens the file
//!   (feature: `sqlite-backend`, on by default)
//!
//! ## Examples
//!
//! ```rust,no_run
//! use repolock_locks::{LockManager, LockResource, MemoryLockStore};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = LockManager::with_store(Arc::new(MemoryLockStore::new()));
//! let node = LockResource::new("doc:42")?;
//!
//! let handle = manager.acquire(&node, Duration::from_secs(30)).await?;
//! let handle = manager.renew(&handle, Duration::from_secs(30)).await?;
//! assert!(manager.validate(&handle).await?);
//! manager.release(&handle).await?;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod guard;
pub mod manager;
pub mod memory;
pub mod record;
pub mod resource;
pub mod store;
pub mod token;

#[cfg(feature = "sqlite-backend")]
pub mod sql;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    create_lock_manager_from_config, create_lock_manager_from_env, create_lock_store_from_config,
    create_resource_guard_from_config, create_resource_guard_from_env, BackendType, LockConfig, DEFAULT_TTL,
};
pub use error::{
    LockError, LockResult, ERR_EXCLUSIVE_LOCK_EXISTS, ERR_FAILED_TO_ACQUIRE_LOCK, ERR_LEASE_EXPIRED,
    ERR_LOCK_RESOURCE_MISSING, ERR_LOCK_UPDATE_COUNT,
};
pub use guard::{GuardConfig, LockScope, ResourceGuard, RetryPolicy};
pub use manager::LockManager;
pub use memory::MemoryLockStore;
pub use record::{LockHandle, LockRecord};
pub use resource::LockResource;
pub use store::{LockStore, PutOutcome};
pub use token::{TokenGenerator, UlidTokenGenerator};

#[cfg(feature = "sqlite-backend")]
pub use sql::SqliteLockStore;
