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

//! Lock resource identity.
//!
//! A [`LockResource`] names the thing being locked. Repository nodes are
//! usually identified by a qualified name (`{namespace-uri}local-name`), but a
//! flat key such as `doc:42` is accepted as well. The canonical string form is
//! the storage key used by every [`LockStore`](crate::LockStore).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{LockError, LockResult};

/// Immutable identity of a lockable resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LockResource {
    namespace: Option<String>,
    local_name: String,
}

impl LockResource {
    /// Create a resource from a flat key or a `{namespace}local` qualified name.
    pub fn new(key: impl AsRef<str>) -> LockResult<Self> {
        let key = key.as_ref();
        if let Some(rest) = key.strip_prefix('{') {
            let (namespace, local_name) = rest
                .split_once('}')
                .ok_or_else(|| LockError::InvalidResource(format!("unterminated namespace in '{key}'")))?;
            return Self::qualified(namespace, local_name);
        }
        if key.trim().is_empty() {
            return Err(LockError::InvalidResource("resource key is empty".to_string()));
        }
        Ok(Self {
            namespace: None,
            local_name: key.to_string(),
        })
    }

    /// Create a qualified resource name.
    pub fn qualified(namespace: impl Into<String>, local_name: impl Into<String>) -> LockResult<Self> {
        let namespace = namespace.into();
        let local_name = local_name.into();
        if local_name.trim().is_empty() {
            return Err(LockError::InvalidResource(format!(
                "local name is empty in namespace '{namespace}'"
            )));
        }
        if namespace.contains('}') {
            return Err(LockError::InvalidResource(format!("namespace '{namespace}' contains '}}'")));
        }
        Ok(Self {
            namespace: if namespace.is_empty() { None } else { Some(namespace) },
            local_name,
        })
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    /// Canonical storage key.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for LockResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{{{}}}{}", ns, self.local_name),
            None => f.write_str(&self.local_name),
        }
    }
}

impl FromStr for LockResource {
    type Err = LockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for LockResource {
    type Error = LockError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<LockResource> for String {
    fn from(resource: LockResource) -> Self {
        resource.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_key() {
        let resource = LockResource::new("doc:42").unwrap();
        assert_eq!(resource.namespace(), None);
        assert_eq!(resource.local_name(), "doc:42");
        assert_eq!(resource.key(), "doc:42");
    }

    #[test]
    fn test_qualified_name() {
        let resource = LockResource::qualified("http://www.alfresco.org/model/system/1.0", "node-cleanup").unwrap();
        assert_eq!(resource.key(), "{http://www.alfresco.org/model/system/1.0}node-cleanup");

        let parsed: LockResource = resource.key().parse().unwrap();
        assert_eq!(parsed, resource);
        assert_eq!(parsed.namespace(), Some("http://www.alfresco.org/model/system/1.0"));
    }

    #[test]
    fn test_empty_namespace_is_flat() {
        let resource = LockResource::new("{}doc").unwrap();
        assert_eq!(resource, LockResource::new("doc").unwrap());
    }

    #[test]
    fn test_invalid_names() {
        assert!(matches!(LockResource::new(""), Err(LockError::InvalidResource(_))));
        assert!(matches!(LockResource::new("   "), Err(LockError::InvalidResource(_))));
        assert!(matches!(LockResource::new("{ns"), Err(LockError::InvalidResource(_))));
        assert!(matches!(LockResource::new("{ns}"), Err(LockError::InvalidResource(_))));
    }

    #[test]
    fn test_serde_uses_key() {
        let resource = LockResource::qualified("ns", "a").unwrap();
        let json = serde_json::to_string(&resource).unwrap();
        assert_eq!(json, "\"{ns}a\"");
        let back: LockResource = serde_json::from_str(&json).unwrap();
        assert_eq!(back, resource);
        assert!(serde_json::from_str::<LockResource>("\"\"").is_err());
    }
}
