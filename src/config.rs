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

//! Pipeline configuration.
//!
//! Defaults mirror the production constants. [`PipelineConfig::from_env`]
//! overrides them from `AIDVERIFY_*` environment variables and fails fast on
//! malformed values.

use crate::error::ConfigError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Bounded exponential backoff for calls to an external system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt. Doubles after each further failure.
    pub initial_backoff: Duration,
    /// Upper bound on a single delay.
    pub max_backoff: Duration,
    /// Deadline for a single attempt. Expiry counts as a transient failure.
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn ledger() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            attempt_timeout: Duration::from_secs(30),
        }
    }

    pub fn store() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(500),
            attempt_timeout: Duration::from_secs(5),
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// AI trust scores strictly above this percentage verify an application.
    pub ai_trust_threshold: u8,
    pub ledger_retry: RetryPolicy,
    pub store_retry: RetryPolicy,
    /// Currency units per reward token.
    pub reward_unit: Decimal,
    /// Deadline for a single notification dispatch.
    pub notify_timeout: Duration,
    /// How long an admin decision may hold its claim. Must outlast the
    /// ledger retry budget.
    pub decision_lease: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ai_trust_threshold: 40,
            ledger_retry: RetryPolicy::ledger(),
            store_retry: RetryPolicy::store(),
            reward_unit: dec!(100),
            notify_timeout: Duration::from_secs(5),
            decision_lease: Duration::from_secs(600),
        }
    }
}

impl PipelineConfig {
    /// Loads configuration from the process environment.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `AIDVERIFY_AI_TRUST_THRESHOLD` | 40 |
    /// | `AIDVERIFY_LEDGER_MAX_ATTEMPTS` | 3 |
    /// | `AIDVERIFY_LEDGER_BACKOFF_MS` | 200 |
    /// | `AIDVERIFY_LEDGER_TIMEOUT_SECS` | 30 |
    /// | `AIDVERIFY_REWARD_UNIT` | 100 |
    /// | `AIDVERIFY_DECISION_LEASE_SECS` | 600 |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(threshold) = parse_var::<u8, _>(&lookup, "AIDVERIFY_AI_TRUST_THRESHOLD")? {
            if threshold > 100 {
                return Err(invalid(
                    "AIDVERIFY_AI_TRUST_THRESHOLD",
                    threshold.to_string(),
                    "must be a percentage between 0 and 100",
                ));
            }
            config.ai_trust_threshold = threshold;
        }
        if let Some(attempts) = parse_var::<u32, _>(&lookup, "AIDVERIFY_LEDGER_MAX_ATTEMPTS")? {
            if attempts == 0 {
                return Err(invalid(
                    "AIDVERIFY_LEDGER_MAX_ATTEMPTS",
                    attempts.to_string(),
                    "at least one attempt is required",
                ));
            }
            config.ledger_retry.max_attempts = attempts;
        }
        if let Some(millis) = parse_var::<u64, _>(&lookup, "AIDVERIFY_LEDGER_BACKOFF_MS")? {
            config.ledger_retry.initial_backoff = Duration::from_millis(millis);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "AIDVERIFY_LEDGER_TIMEOUT_SECS")? {
            config.ledger_retry.attempt_timeout = Duration::from_secs(secs);
        }
        if let Some(unit) = parse_var::<Decimal, _>(&lookup, "AIDVERIFY_REWARD_UNIT")? {
            if unit <= Decimal::ZERO {
                return Err(invalid(
                    "AIDVERIFY_REWARD_UNIT",
                    unit.to_string(),
                    "must be positive",
                ));
            }
            config.reward_unit = unit;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "AIDVERIFY_DECISION_LEASE_SECS")? {
            if secs == 0 {
                return Err(invalid(
                    "AIDVERIFY_DECISION_LEASE_SECS",
                    secs.to_string(),
                    "must be positive",
                ));
            }
            config.decision_lease = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

fn parse_var<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| invalid(key, raw.clone(), &e.to_string())),
    }
}

fn invalid(key: &'static str, value: String, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value,
        reason: reason.to_string(),
    }
}
