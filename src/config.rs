// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Engine configuration.

use crate::error::{LendingError, LockedResource};
use std::thread;
use std::time::Duration;
use tracing::warn;

/// Bounded-wait policy for acquiring book and request locks.
///
/// Each attempt waits up to `attempt_timeout` per lock. When any lock in the
/// set times out, every lock already taken is dropped, the caller sleeps for
/// `backoff * attempt`, and the whole set is retried. After `max_attempts`
/// the operation fails with [`LendingError::LockTimeout`](crate::LendingError::LockTimeout).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    pub attempt_timeout: Duration,
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl LockPolicy {
    pub const DEFAULT_ATTEMPT_TIMEOUT_MS: u64 = 25;
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 8;
    pub const DEFAULT_BACKOFF_MS: u64 = 2;

    pub fn new(attempt_timeout: Duration, max_attempts: u32, backoff: Duration) -> Self {
        Self {
            attempt_timeout,
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }

    /// Runs `try_lock` until it succeeds or the attempts are exhausted.
    ///
    /// `try_lock` receives the per-lock timeout and reports which resource
    /// blocked it. It must release everything it took before returning `Err`.
    pub(crate) fn acquire<T>(
        &self,
        mut try_lock: impl FnMut(Duration) -> Result<T, LockedResource>,
    ) -> Result<T, LendingError> {
        let mut attempt = 1;
        loop {
            match try_lock(self.attempt_timeout) {
                Ok(locked) => return Ok(locked),
                Err(resource) if attempt >= self.max_attempts => {
                    warn!(%resource, attempts = attempt, "giving up on lock acquisition");
                    return Err(LendingError::LockTimeout { resource });
                }
                Err(resource) => {
                    warn!(%resource, attempt, "lock wait timed out; backing off");
                    thread::sleep(self.backoff_for(attempt));
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(Self::DEFAULT_ATTEMPT_TIMEOUT_MS),
            Self::DEFAULT_MAX_ATTEMPTS,
            Duration::from_millis(Self::DEFAULT_BACKOFF_MS),
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineConfig {
    pub lock_policy: LockPolicy,
}
