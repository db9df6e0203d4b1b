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

//! Configuration support for lock store backends and lease defaults.
//!
//! ## Environment Variables
//!
//! ### Backend Selection
//! - `REPOLOCK_BACKEND`: Backend type (default: "memory")
//!   - "memory" | "in-memory" → MemoryLockStore
//!   - "sqlite" → SqliteLockStore (requires `sqlite-backend` feature)
//!
//! ### SQLite Configuration
//! - `REPOLOCK_SQLITE_URL`: sqlx SQLite URL (default: "sqlite::memory:")
//!
//! ### Leases
//! - `REPOLOCK_DEFAULT_TTL_MS`: Default lease duration (default: 30000)
//! - `REPOLOCK_REVALIDATE_FRACTION`: Guard revalidation fraction (default: 0.5)
//! - `REPOLOCK_HEARTBEAT_MS`: Guard heartbeat interval (default: unset, no heartbeat)
//!
//! ## Examples
//!
//! ```bash
//! export REPOLOCK_BACKEND=sqlite
//! export REPOLOCK_SQLITE_URL=sqlite:///var/lib/repo/locks.db
//! export REPOLOCK_DEFAULT_TTL_MS=60000
//! ```

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::{GuardConfig, LockError, LockManager, LockResult, LockStore, MemoryLockStore, ResourceGuard, RetryPolicy};

/// Default lease duration.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

/// Backend type configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BackendType {
    /// In-memory backend (default, always available)
    #[default]
    Memory,
    /// SQLite backend (requires sqlite-backend feature)
    Sqlite {
        /// sqlx connection URL
        url: String,
    },
}

/// Lock subsystem configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct LockConfig {
    pub backend: BackendType,
    pub default_ttl: Duration,
    pub guard: GuardConfig,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::Memory,
            default_ttl: DEFAULT_TTL,
            guard: GuardConfig::default(),
        }
    }
}

impl LockConfig {
    /// Create configuration with explicit backend and default leases.
    pub fn new(backend: BackendType) -> Self {
        Self {
            backend,
            ..Self::default()
        }
    }

    /// Create configuration from environment variables.
    ///
    /// See module documentation for the complete list.
    pub fn from_env() -> LockResult<Self> {
        let backend_str = std::env::var("REPOLOCK_BACKEND")
            .unwrap_or_else(|_| "memory".to_string())
            .to_lowercase();

        let backend = match backend_str.as_str() {
            "memory" | "in-memory" => BackendType::Memory,
            "sqlite" => BackendType::Sqlite {
                url: std::env::var("REPOLOCK_SQLITE_URL").unwrap_or_else(|_| "sqlite::memory:".to_string()),
            },
            other => {
                return Err(LockError::ConfigError(format!(
                    "Unknown backend type: {}. Valid options: memory, sqlite",
                    other
                )));
            }
        };

        let default_ttl = match env_parse::<u64>("REPOLOCK_DEFAULT_TTL_MS")? {
            Some(0) => {
                return Err(LockError::ConfigError("REPOLOCK_DEFAULT_TTL_MS must be greater than zero".to_string()))
            }
            Some(ms) => Duration::from_millis(ms),
            None => DEFAULT_TTL,
        };

        let guard = GuardConfig {
            revalidate_fraction: env_parse::<f64>("REPOLOCK_REVALIDATE_FRACTION")?.unwrap_or(0.5),
            retry: RetryPolicy::none(),
            heartbeat_interval: env_parse::<u64>("REPOLOCK_HEARTBEAT_MS")?.map(Duration::from_millis),
        };
        guard
            .validate()
            .map_err(|e| LockError::ConfigError(e.to_string()))?;

        Ok(Self {
            backend,
            default_ttl,
            guard,
        })
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> LockResult<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| LockError::ConfigError(format!("invalid {name} '{value}': {e}"))),
        Err(_) => Ok(None),
    }
}

/// Create a lock store from explicit configuration.
pub async fn create_lock_store_from_config(config: &LockConfig) -> LockResult<Arc<dyn LockStore>> {
    match &config.backend {
        BackendType::Memory => Ok(Arc::new(MemoryLockStore::new())),

        #[cfg(feature = "sqlite-backend")]
        BackendType::Sqlite { url } => {
            let store = crate::sql::SqliteLockStore::new(url).await?;
            Ok(Arc::new(store))
        }

        #[cfg(not(feature = "sqlite-backend"))]
        BackendType::Sqlite { .. } => Err(LockError::ConfigError(
            "SQLite backend requires 'sqlite-backend' feature".to_string(),
        )),
    }
}

/// Create a lock manager from explicit configuration.
pub async fn create_lock_manager_from_config(config: &LockConfig) -> LockResult<LockManager> {
    let store = create_lock_store_from_config(config).await?;
    info!(backend = ?config.backend, default_ttl_ms = config.default_ttl.as_millis() as u64, "lock manager ready");
    Ok(LockManager::with_store(store))
}

/// Create a lock manager from environment configuration.
pub async fn create_lock_manager_from_env() -> LockResult<LockManager> {
    let config = LockConfig::from_env()?;
    create_lock_manager_from_config(&config).await
}

/// Create a resource guard over a fresh lock manager, with the configured
/// revalidation fraction and heartbeat.
pub async fn create_resource_guard_from_config(config: &LockConfig) -> LockResult<ResourceGuard> {
    let manager = create_lock_manager_from_config(config).await?;
    ResourceGuard::with_config(manager, config.guard.clone())
}

/// Create a resource guard from environment configuration.
pub async fn create_resource_guard_from_env() -> LockResult<ResourceGuard> {
    let config = LockConfig::from_env()?;
    create_resource_guard_from_config(&config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LockResource;
    use serial_test::serial;

    const VARS: [&str; 5] = [
        "REPOLOCK_BACKEND",
        "REPOLOCK_SQLITE_URL",
        "REPOLOCK_DEFAULT_TTL_MS",
        "REPOLOCK_REVALIDATE_FRACTION",
        "REPOLOCK_HEARTBEAT_MS",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_default_config() {
        let config = LockConfig::default();
        assert_eq!(config.backend, BackendType::Memory);
        assert_eq!(config.default_ttl, Duration::from_secs(30));
        assert_eq!(config.guard, GuardConfig::default());
    }

    #[test]
    #[serial]
    fn test_config_from_env_default() {
        clear_env();
        assert_eq!(LockConfig::from_env().unwrap(), LockConfig::default());
    }

    #[test]
    #[serial]
    fn test_config_from_env_sqlite() {
        clear_env();
        std::env::set_var("REPOLOCK_BACKEND", "SQLite");
        std::env::set_var("REPOLOCK_SQLITE_URL", "sqlite:///tmp/locks.db");
        std::env::set_var("REPOLOCK_DEFAULT_TTL_MS", "5000");
        std::env::set_var("REPOLOCK_REVALIDATE_FRACTION", "0.25");
        std::env::set_var("REPOLOCK_HEARTBEAT_MS", "1000");

        let config = LockConfig::from_env().unwrap();
        assert_eq!(
            config.backend,
            BackendType::Sqlite {
                url: "sqlite:///tmp/locks.db".to_string()
            }
        );
        assert_eq!(config.default_ttl, Duration::from_secs(5));
        assert_eq!(config.guard.revalidate_fraction, 0.25);
        assert_eq!(config.guard.heartbeat_interval, Some(Duration::from_secs(1)));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_config_from_env_rejects_bad_values() {
        clear_env();
        std::env::set_var("REPOLOCK_BACKEND", "redis");
        assert!(matches!(LockConfig::from_env(), Err(LockError::ConfigError(_))));

        clear_env();
        std::env::set_var("REPOLOCK_DEFAULT_TTL_MS", "soon");
        assert!(matches!(LockConfig::from_env(), Err(LockError::ConfigError(_))));

        clear_env();
        std::env::set_var("REPOLOCK_DEFAULT_TTL_MS", "0");
        assert!(matches!(LockConfig::from_env(), Err(LockError::ConfigError(_))));

        clear_env();
        std::env::set_var("REPOLOCK_REVALIDATE_FRACTION", "0");
        assert!(matches!(LockConfig::from_env(), Err(LockError::ConfigError(_))));

        clear_env();
    }

    #[tokio::test]
    #[serial]
    async fn test_create_manager_from_env() {
        clear_env();
        let manager = create_lock_manager_from_env().await.unwrap();
        let handle = manager
            .acquire(&LockResource::new("doc:1").unwrap(), DEFAULT_TTL)
            .await
            .unwrap();
        assert!(manager.validate(&handle).await.unwrap());
    }

    #[cfg(feature = "sqlite-backend")]
    #[tokio::test]
    async fn test_create_sqlite_manager_from_config() {
        let config = LockConfig::new(BackendType::Sqlite {
            url: "sqlite::memory:".to_string(),
        });
        let manager = create_lock_manager_from_config(&config).await.unwrap();
        let handle = manager
            .acquire(&LockResource::new("doc:1").unwrap(), config.default_ttl)
            .await
            .unwrap();
        assert!(manager.release(&handle).await.unwrap());
    }

    #[tokio::test]
    #[serial]
    async fn test_create_guard_from_env_applies_guard_settings() {
        clear_env();
        std::env::set_var("REPOLOCK_REVALIDATE_FRACTION", "0.2");
        std::env::set_var("REPOLOCK_HEARTBEAT_MS", "250");

        let guard = create_resource_guard_from_env().await.unwrap();
        assert_eq!(guard.config().revalidate_fraction, 0.2);
        assert_eq!(guard.config().heartbeat_interval, Some(Duration::from_millis(250)));

        // The heartbeat must be shorter than the lease it keeps alive.
        let resource = LockResource::new("doc:1").unwrap();
        assert!(matches!(
            guard.lock(&resource, Duration::from_millis(100)).await,
            Err(LockError::InvalidLease(_))
        ));
        let scope = guard.lock(&resource, DEFAULT_TTL).await.unwrap();
        assert!(scope.release().await.unwrap());

        clear_env();
    }
}
