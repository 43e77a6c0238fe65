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

//! Bounded retries with exponential backoff and per-attempt deadlines.
//!
//! Every external call that may take seconds to confirm goes through
//! [`with_retry`]. A timed-out attempt counts as a transient failure;
//! deterministic failures (contract reverts, constraint violations) are
//! returned immediately.

use crate::config::RetryPolicy;
use crate::error::{LedgerError, StoreError};
use std::fmt::Display;
use std::future::Future;
use tracing::warn;

/// Errors that can tell a transient failure from a deterministic one.
pub trait Transient: Display {
    fn is_transient(&self) -> bool;

    /// Error reported when an attempt exceeds its deadline.
    fn deadline_exceeded() -> Self;
}

impl Transient for LedgerError {
    fn is_transient(&self) -> bool {
        LedgerError::is_transient(self)
    }

    fn deadline_exceeded() -> Self {
        LedgerError::Timeout
    }
}

impl Transient for StoreError {
    fn is_transient(&self) -> bool {
        StoreError::is_transient(self)
    }

    fn deadline_exceeded() -> Self {
        StoreError::Backend("operation timed out".to_string())
    }
}

/// Runs `call` until it succeeds, fails deterministically, or the policy's
/// attempt budget is exhausted. Returns the last error on exhaustion.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut call: F,
) -> Result<T, E>
where
    E: Transient,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let outcome = match tokio::time::timeout(policy.attempt_timeout, call()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(E::deadline_exceeded()),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) if attempt >= max_attempts => {
                warn!(operation, attempt, error = %e, "retry budget exhausted");
                return Err(e);
            }
            Err(e) => {
                let delay = policy.backoff_for(attempt);
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient failure, will retry"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
