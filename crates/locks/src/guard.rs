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

//! Scoped lock acquisition for critical sections.
//!
//! ## Purpose
//! [`ResourceGuard`] wraps a critical section over one resource: it acquires
//! the lock (retrying contention if configured), hands the work a
//! [`LockScope`], and releases the lock on every exit path. Normal return and
//! error return release inline; if the enclosing future is dropped, the last
//! [`LockScope`] clone spawns the release on the current tokio runtime.
//!
//! ## Revalidation
//! Work that is about to perform a durable side effect calls
//! [`LockScope::checkpoint`]. Once more than `revalidate_fraction × ttl` has
//! passed since the lock was last confirmed, the checkpoint re-reads the
//! record and fails fast if the scope no longer holds it.
//!
//! ## Example
//! ```rust,no_run
//! use repolock_locks::{LockError, LockManager, LockResource, MemoryLockStore, ResourceGuard};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), LockError> {
//! let manager = LockManager::with_store(Arc::new(MemoryLockStore::new()));
//! let guard = ResourceGuard::new(manager);
//! let node = LockResource::new("doc:42")?;
//!
//! guard
//!     .with_lock(&node, Duration::from_secs(30), |scope| async move {
//!         // ... prepare the update ...
//!         scope.checkpoint().await?;
//!         // ... write the node ...
//!         Ok::<_, LockError>(())
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{LockError, LockHandle, LockManager, LockResource, LockResult};

/// Caller-side retry of contended acquisitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub wait: Duration,
}

impl RetryPolicy {
    /// Single attempt, fail immediately on contention.
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            wait: Duration::ZERO,
        }
    }

    pub const fn fixed(max_attempts: u32, wait: Duration) -> Self {
        Self { max_attempts, wait }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Settings for [`ResourceGuard`].
#[derive(Debug, Clone, PartialEq)]
pub struct GuardConfig {
    /// Fraction of the ttl after which a checkpoint re-reads the lock, in (0, 1].
    pub revalidate_fraction: f64,
    pub retry: RetryPolicy,
    /// Renew the lease in the background at this interval.
    pub heartbeat_interval: Option<Duration>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            revalidate_fraction: 0.5,
            retry: RetryPolicy::none(),
            heartbeat_interval: None,
        }
    }
}

impl GuardConfig {
    pub fn validate(&self) -> LockResult<()> {
        if !(self.revalidate_fraction > 0.0 && self.revalidate_fraction <= 1.0) {
            return Err(LockError::InvalidLease(format!(
                "revalidate_fraction must be in (0, 1], got {}",
                self.revalidate_fraction
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(LockError::InvalidLease("retry.max_attempts must be at least 1".to_string()));
        }
        if self.heartbeat_interval == Some(Duration::ZERO) {
            return Err(LockError::InvalidLease("heartbeat_interval must be greater than zero".to_string()));
        }
        Ok(())
    }
}

/// Acquires locks around critical sections.
#[derive(Clone)]
pub struct ResourceGuard {
    manager: LockManager,
    config: GuardConfig,
}

impl ResourceGuard {
    /// Guard with the default [`GuardConfig`].
    pub fn new(manager: LockManager) -> Self {
        Self {
            manager,
            config: GuardConfig::default(),
        }
    }

    pub fn with_config(manager: LockManager, config: GuardConfig) -> LockResult<Self> {
        config.validate()?;
        Ok(Self { manager, config })
    }

    pub fn manager(&self) -> &LockManager {
        &self.manager
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Acquire `resource` and return the scope holding it.
    ///
    /// Contention is retried according to [`GuardConfig::retry`]; any other
    /// failure is returned at once. The caller must [`LockScope::release`] the
    /// scope, or drop it inside a tokio runtime.
    pub async fn lock(&self, resource: &LockResource, ttl: Duration) -> LockResult<LockScope> {
        if let Some(interval) = self.config.heartbeat_interval {
            if interval >= ttl {
                return Err(LockError::InvalidLease(format!(
                    "heartbeat interval {interval:?} must be shorter than ttl {ttl:?}"
                )));
            }
        }

        let mut attempt = 1;
        loop {
            match self.manager.acquire(resource, ttl).await {
                Ok(handle) => return Ok(LockScope::start(self.manager.clone(), handle, ttl, &self.config)),
                Err(err) if err.is_contention() && attempt < self.config.retry.max_attempts => {
                    debug!(resource = %resource, attempt, error = %err, "lock contended, retrying");
                    tokio::time::sleep(self.config.retry.wait).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Run `work` while holding `resource`.
    ///
    /// The lock is released whether `work` succeeds or fails; the error from
    /// `work` is returned unchanged. A failed release is logged, since the
    /// lease expires on its own.
    pub async fn with_lock<T, E, F, Fut>(&self, resource: &LockResource, ttl: Duration, work: F) -> Result<T, E>
    where
        F: FnOnce(LockScope) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        let scope = self.lock(resource, ttl).await?;
        let outcome = work(scope.clone()).await;
        if let Err(err) = scope.release().await {
            warn!(resource = %resource, error = %err, "failed to release lock after critical section");
        }
        outcome
    }
}

struct ScopeState {
    handle: LockHandle,
    last_confirmed: Instant,
    lost: Option<LockError>,
}

struct ScopeInner {
    manager: LockManager,
    state: Arc<Mutex<ScopeState>>,
    // Serializes heartbeat renewals with confirm, renew and release.
    op: Arc<tokio::sync::Mutex<()>>,
    ttl: Duration,
    revalidate_after: Duration,
    released: AtomicBool,
    stop: Option<watch::Sender<bool>>,
}

/// A held lock. Cheap to clone; all clones share one lease.
#[derive(Clone)]
pub struct LockScope {
    inner: Arc<ScopeInner>,
}

impl LockScope {
    fn start(manager: LockManager, handle: LockHandle, ttl: Duration, config: &GuardConfig) -> Self {
        let state = Arc::new(Mutex::new(ScopeState {
            handle,
            last_confirmed: Instant::now(),
            lost: None,
        }));
        let op = Arc::new(tokio::sync::Mutex::new(()));

        let stop = config.heartbeat_interval.map(|interval| {
            let (tx, rx) = watch::channel(false);
            tokio::spawn(heartbeat(manager.clone(), state.clone(), op.clone(), ttl, interval, rx));
            tx
        });

        Self {
            inner: Arc::new(ScopeInner {
                manager,
                state,
                op,
                ttl,
                revalidate_after: ttl.mul_f64(config.revalidate_fraction),
                released: AtomicBool::new(false),
                stop,
            }),
        }
    }

    /// Current handle (changes when the lease is renewed).
    pub fn handle(&self) -> LockHandle {
        lock_state(&self.inner.state).handle.clone()
    }

    pub fn resource(&self) -> LockResource {
        self.handle().resource
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::SeqCst)
    }

    /// Confirm the lock is still held before a durable side effect.
    ///
    /// Re-reads the lock only when `revalidate_fraction × ttl` has passed
    /// since the last confirmation.
    pub async fn checkpoint(&self) -> LockResult<()> {
        let due = {
            let state = lock_state(&self.inner.state);
            if let Some(lost) = &state.lost {
                return Err(lost.clone());
            }
            state.last_confirmed.elapsed() >= self.inner.revalidate_after
        };
        if self.is_released() {
            return Err(self.missing());
        }
        if !due {
            return Ok(());
        }
        self.confirm().await
    }

    /// Re-read the lock now, regardless of when it was last confirmed.
    pub async fn confirm(&self) -> LockResult<()> {
        let _op = self.inner.op.lock().await;
        if self.is_released() {
            return Err(self.missing());
        }
        let handle = self.handle();
        match self.inner.manager.verify(&handle).await {
            Ok(_) => {
                lock_state(&self.inner.state).last_confirmed = Instant::now();
                Ok(())
            }
            Err(err) => {
                warn!(resource = %handle.resource, token = %handle.token, error = %err, "lock no longer held");
                Err(err)
            }
        }
    }

    /// Extend the lease by the scope's ttl from now.
    pub async fn renew(&self) -> LockResult<LockHandle> {
        let _op = self.inner.op.lock().await;
        if self.is_released() {
            return Err(self.missing());
        }
        let renewed = self.inner.manager.renew(&self.handle(), self.inner.ttl).await?;
        let mut state = lock_state(&self.inner.state);
        state.handle = renewed.clone();
        state.last_confirmed = Instant::now();
        Ok(renewed)
    }

    /// Release the lock. Later calls return `Ok(false)`.
    pub async fn release(&self) -> LockResult<bool> {
        if self.inner.released.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        if let Some(stop) = &self.inner.stop {
            let _ = stop.send(true);
        }
        let _op = self.inner.op.lock().await;
        self.inner.manager.release(&self.handle()).await
    }

    fn missing(&self) -> LockError {
        let handle = self.handle();
        LockError::LockResourceMissing {
            resource: handle.resource,
            token: handle.token,
        }
    }
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        if let Some(stop) = &self.stop {
            let _ = stop.send(true);
        }
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }

        let handle = lock_state(&self.state).handle.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let manager = self.manager.clone();
                let op = self.op.clone();
                runtime.spawn(async move {
                    let _op = op.lock().await;
                    if let Err(err) = manager.release(&handle).await {
                        warn!(resource = %handle.resource, error = %err, "background release failed");
                    }
                });
            }
            Err(_) => {
                warn!(
                    resource = %handle.resource,
                    token = %handle.token,
                    "lock scope dropped outside a runtime, lease will expire on its own"
                );
            }
        }
    }
}

fn lock_state(state: &Mutex<ScopeState>) -> MutexGuard<'_, ScopeState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

async fn heartbeat(
    manager: LockManager,
    state: Arc<Mutex<ScopeState>>,
    op: Arc<tokio::sync::Mutex<()>>,
    ttl: Duration,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        let _op = op.lock().await;
        if *stop.borrow() {
            break;
        }
        let handle = lock_state(&state).handle.clone();
        match manager.renew(&handle, ttl).await {
            Ok(renewed) => {
                debug!(resource = %renewed.resource, update_count = renewed.update_count, "heartbeat renewed lease");
                let mut state = lock_state(&state);
                state.handle = renewed;
                state.last_confirmed = Instant::now();
            }
            Err(err) => {
                warn!(resource = %handle.resource, error = %err, "heartbeat lost lease");
                lock_state(&state).lost = Some(err);
                break;
            }
        }
    }
}
