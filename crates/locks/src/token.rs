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

//! Lock token generation.

use std::sync::Mutex;
use ulid::{Generator, Ulid};

/// Produces the opaque token identifying one acquisition attempt.
pub trait TokenGenerator: Send + Sync {
    fn new_token(&self) -> String;
}

/// ULID-based tokens: `<instance>-<monotonic ulid>`.
///
/// The monotonic generator never yields the same value twice inside one
/// process; the random instance id keeps tokens apart across processes.
pub struct UlidTokenGenerator {
    instance: String,
    generator: Mutex<Generator>,
}

impl UlidTokenGenerator {
    pub fn new() -> Self {
        Self {
            instance: Ulid::new().to_string(),
            generator: Mutex::new(Generator::new()),
        }
    }

    /// Instance identity embedded in every token from this generator.
    pub fn instance(&self) -> &str {
        &self.instance
    }
}

impl Default for UlidTokenGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenGenerator for UlidTokenGenerator {
    fn new_token(&self) -> String {
        let mut generator = self.generator.lock().unwrap_or_else(|e| e.into_inner());
        // Overflow only after 2^80 ids in one millisecond.
        let id = generator.generate().unwrap_or_else(|_| Ulid::new());
        format!("{}-{}", self.instance, id)
    }
}
