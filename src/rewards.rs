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
//! Donor reward tokens.
//!
//! Each account keeps an append-only log of `earned` and `redeemed`
//! entries. Balances are sums over that log:
//!
//! ```text
//!  credit(amount) ──► Earned(floor(amount / unit))   once per donation reference
//!  debit(tokens)  ──► Redeemed(tokens)                only while tokens <= total
//! ```
//!
//! Accounts live in the [`Store`]. [`RewardLedger`] converts amounts to
//! tokens and goes through the store's conditional updates, so balances
//! survive restarts and are shared by every pipeline on the same store.
//! [`RewardAccounts`] is the in-process collection behind
//! [`InMemoryStore`](crate::store::InMemoryStore).
//!
//! # Example
//!
//! ```
//! use aidverify::{DonorId, RewardAccounts};
//!
//! let accounts = RewardAccounts::new();
//! let donor = DonorId("donor-1".into());
//! assert_eq!(accounts.credit(&donor, 2, "donation", "tx-1").unwrap(), 2);
//! assert_eq!(accounts.balance(&donor).total, 2);
//! ```

use crate::base::DonorId;
use crate::config::RetryPolicy;
use crate::error::{PipelineError, StoreError};
use crate::retry::with_retry;
use crate::store::Store;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewardKind {
    Earned,
    Redeemed,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, Deserialize)]
pub struct RewardEntry {
    pub kind: RewardKind,
    pub tokens: u64,
    pub reason: String,
    /// Donation the tokens were earned for. Empty on redemptions.
    pub reference: Option<String>,
    pub at: DateTime<Utc>,
}

/// Point-in-time view of an account.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RewardBalance {
    pub donor: DonorId,
    pub total: u64,
    pub earned: u64,
    pub redeemed: u64,
    pub entries: Vec<RewardEntry>,
}

impl RewardBalance {
    pub fn empty(donor: &DonorId) -> Self {
        Self {
            donor: donor.clone(),
            total: 0,
            earned: 0,
            redeemed: 0,
            entries: Vec::new(),
        }
    }
}

/// Outcome of a conditional token debit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redemption {
    Redeemed(RewardBalance),
    /// Nothing was written; the account holds only `available` tokens.
    Insufficient { available: u64 },
}

#[derive(Debug)]
struct AccountData {
    donor: DonorId,
    earned: u64,
    redeemed: u64,
    entries: Vec<RewardEntry>,
    /// Tokens awarded per donation reference.
    credited: HashMap<String, u64>,
}

impl AccountData {
    fn new(donor: DonorId) -> Self {
        Self {
            donor,
            earned: 0,
            redeemed: 0,
            entries: Vec::new(),
            credited: HashMap::new(),
        }
    }

    fn total(&self) -> u64 {
        self.earned - self.redeemed
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.redeemed <= self.earned,
            "Invariant violated: redeemed {} exceeds earned {}",
            self.redeemed,
            self.earned
        );
        debug_assert_eq!(
            self.earned,
            self.sum(RewardKind::Earned),
            "Invariant violated: earned counter diverged from log"
        );
        debug_assert_eq!(
            self.redeemed,
            self.sum(RewardKind::Redeemed),
            "Invariant violated: redeemed counter diverged from log"
        );
    }

    fn sum(&self, kind: RewardKind) -> u64 {
        self.entries
            .iter()
            .filter(|entry| entry.kind == kind)
            .map(|entry| entry.tokens)
            .sum()
    }

    /// Appends an earned entry unless `reference` was already credited.
    fn credit(&mut self, tokens: u64, reason: &str, reference: &str) -> Result<u64, StoreError> {
        if let Some(&awarded) = self.credited.get(reference) {
            return Ok(awarded);
        }
        let earned = self.earned.checked_add(tokens).ok_or_else(|| {
            StoreError::Conflict(format!("token balance overflow for donor {}", self.donor))
        })?;
        if tokens > 0 {
            self.entries.push(RewardEntry {
                kind: RewardKind::Earned,
                tokens,
                reason: reason.to_string(),
                reference: Some(reference.to_string()),
                at: Utc::now(),
            });
            self.earned = earned;
        }
        self.credited.insert(reference.to_string(), tokens);
        self.assert_invariants();
        Ok(tokens)
    }

    /// Appends a redeemed entry if the balance covers it. Zero tokens
    /// record nothing.
    fn debit(&mut self, tokens: u64, reason: &str) -> Redemption {
        let available = self.total();
        if tokens > available {
            return Redemption::Insufficient { available };
        }
        if tokens > 0 {
            self.entries.push(RewardEntry {
                kind: RewardKind::Redeemed,
                tokens,
                reason: reason.to_string(),
                reference: None,
                at: Utc::now(),
            });
            self.redeemed += tokens;
        }
        self.assert_invariants();
        Redemption::Redeemed(self.balance())
    }

    fn balance(&self) -> RewardBalance {
        RewardBalance {
            donor: self.donor.clone(),
            total: self.total(),
            earned: self.earned,
            redeemed: self.redeemed,
            entries: self.entries.clone(),
        }
    }
}

/// A donor's token account.
#[derive(Debug)]
pub struct RewardAccount {
    inner: Mutex<AccountData>,
}

impl RewardAccount {
    pub fn new(donor: DonorId) -> Self {
        Self {
            inner: Mutex::new(AccountData::new(donor)),
        }
    }

    /// Returns `earned - redeemed`.
    pub fn total(&self) -> u64 {
        self.inner.lock().total()
    }

    pub fn earned(&self) -> u64 {
        self.inner.lock().earned
    }

    pub fn redeemed(&self) -> u64 {
        self.inner.lock().redeemed
    }

    pub fn entries(&self) -> Vec<RewardEntry> {
        self.inner.lock().entries.clone()
    }

    pub fn balance(&self) -> RewardBalance {
        self.inner.lock().balance()
    }

    /// Credits `tokens` for `reference`. A repeated reference returns the
    /// tokens originally awarded and changes nothing.
    pub fn credit(&self, tokens: u64, reason: &str, reference: &str) -> Result<u64, StoreError> {
        self.inner.lock().credit(tokens, reason, reference)
    }

    pub fn debit(&self, tokens: u64, reason: &str) -> Redemption {
        self.inner.lock().debit(tokens, reason)
    }
}

impl Serialize for RewardAccount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = self.inner.lock();
        let mut state = serializer.serialize_struct("RewardAccount", 4)?;
        state.serialize_field("donor", &data.donor)?;
        state.serialize_field("total", &data.total())?;
        state.serialize_field("earned", &data.earned)?;
        state.serialize_field("redeemed", &data.redeemed)?;
        state.end()
    }
}

/// In-process token accounts keyed by donor.
///
/// # Invariants
///
/// - `total == earned - redeemed` and never goes negative.
/// - A donation reference earns tokens at most once per donor.
#[derive(Debug, Default)]
pub struct RewardAccounts {
    accounts: DashMap<DonorId, RewardAccount>,
}

impl RewardAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the tokens awarded for `reference`. Idempotent per reference.
    pub fn credit(
        &self,
        donor: &DonorId,
        tokens: u64,
        reason: &str,
        reference: &str,
    ) -> Result<u64, StoreError> {
        let account = self
            .accounts
            .entry(donor.clone())
            .or_insert_with(|| RewardAccount::new(donor.clone()));
        account.credit(tokens, reason, reference)
    }

    pub fn debit(&self, donor: &DonorId, tokens: u64, reason: &str) -> Redemption {
        match self.accounts.get(donor) {
            Some(account) => account.debit(tokens, reason),
            None if tokens == 0 => Redemption::Redeemed(RewardBalance::empty(donor)),
            None => Redemption::Insufficient { available: 0 },
        }
    }

    pub fn balance(&self, donor: &DonorId) -> RewardBalance {
        self.accounts
            .get(donor)
            .map(|account| account.balance())
            .unwrap_or_else(|| RewardBalance::empty(donor))
    }

    pub fn iter(
        &self,
    ) -> impl Iterator<Item = dashmap::mapref::multiple::RefMulti<'_, DonorId, RewardAccount>> {
        self.accounts.iter()
    }
}

/// Donor token accounts kept in the [`Store`].
pub struct RewardLedger {
    store: Arc<dyn Store>,
    /// Currency units per token.
    unit: Decimal,
    retry: RetryPolicy,
}

impl RewardLedger {
    pub fn new(store: Arc<dyn Store>, unit: Decimal, retry: RetryPolicy) -> Self {
        Self { store, unit, retry }
    }

    /// `floor(amount / unit)`.
    pub fn tokens_for(&self, amount: Decimal) -> Result<u64, PipelineError> {
        if amount <= Decimal::ZERO {
            return Err(PipelineError::Validation(format!(
                "reward amount must be positive, got {amount}"
            )));
        }
        amount
            .checked_div(self.unit)
            .and_then(|units| units.floor().to_u64())
            .ok_or_else(|| {
                PipelineError::Validation(format!(
                    "cannot convert {amount} into tokens of {} units",
                    self.unit
                ))
            })
    }

    /// Awards tokens for a donation of `amount`. Idempotent per `reference`,
    /// so a failed attempt is retried.
    ///
    /// Returns the tokens awarded for `reference`.
    pub async fn credit(
        &self,
        donor: &DonorId,
        amount: Decimal,
        reason: &str,
        reference: &str,
    ) -> Result<u64, PipelineError> {
        let tokens = self.tokens_for(amount)?;
        let awarded = with_retry(&self.retry, "credit_reward", || {
            self.store.credit_reward(donor, tokens, reason, reference)
        })
        .await?;
        Ok(awarded)
    }

    /// Redeems `tokens`. Fails with [`PipelineError::InsufficientBalance`]
    /// rather than going negative.
    ///
    /// Tried once: a redemption has no reference to deduplicate a replay.
    pub async fn debit(
        &self,
        donor: &DonorId,
        tokens: u64,
        reason: &str,
    ) -> Result<RewardBalance, PipelineError> {
        if tokens == 0 {
            return Err(PipelineError::Validation(
                "redeemed tokens must be positive".to_string(),
            ));
        }
        match self.store.redeem_reward(donor, tokens, reason).await? {
            Redemption::Redeemed(balance) => Ok(balance),
            Redemption::Insufficient { available } => Err(PipelineError::InsufficientBalance {
                requested: tokens,
                available,
            }),
        }
    }

    pub async fn balance(&self, donor: &DonorId) -> Result<RewardBalance, PipelineError> {
        let balance = with_retry(&self.retry, "reward_balance", || {
            self.store.reward_balance(donor)
        })
        .await?;
        Ok(balance)
    }
}
