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

//! Operational database interface.
//!
//! Collections: campaign applications, donation transactions (unique on
//! transaction id), donor profiles (unique on email), and reward accounts
//! (earned entries unique on donor and reference). Every conditional
//! transition is a single compare-and-set on the backing document, so the
//! store, not an in-process lock, arbitrates concurrent writers.

pub mod memory;
mod transaction_log;

use crate::application::{
    AdminApproval, AiApproval, CampaignApplication, DecisionLease, NewApplication,
};
use crate::base::{ApplicationId, CampaignLedgerId, DonorId, DonorLedgerId, Email, NgoLedgerId, TransactionId};
use crate::error::StoreError;
use crate::rewards::{Redemption, RewardBalance};
use crate::transaction::{DonorProfile, TransactionRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

pub use memory::{InMemoryStore, StoreCall};

#[async_trait]
pub trait Store: Send + Sync {
    // === Applications ===

    async fn insert_application(
        &self,
        submission: NewApplication,
        now: DateTime<Utc>,
    ) -> Result<CampaignApplication, StoreError>;

    async fn application(
        &self,
        id: ApplicationId,
    ) -> Result<Option<CampaignApplication>, StoreError>;

    /// Applications in submission order, optionally filtered by admin state.
    async fn applications(
        &self,
        status: Option<AdminApproval>,
    ) -> Result<Vec<CampaignApplication>, StoreError>;

    async fn application_by_campaign(
        &self,
        campaign: &CampaignLedgerId,
    ) -> Result<Option<CampaignApplication>, StoreError>;

    /// Overwrites the AI verdict. Not write-once.
    async fn set_ai_approval(
        &self,
        id: ApplicationId,
        verdict: AiApproval,
    ) -> Result<CampaignApplication, StoreError>;

    /// Takes the write-once decision claim until `expires_at`.
    ///
    /// Fails with [`StoreError::Conflict`] if the application is already
    /// decided or another claim's lease is still live at `now`.
    async fn claim_decision(
        &self,
        id: ApplicationId,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<(CampaignApplication, DecisionLease), StoreError>;

    /// Sets `Approved` together with both ledger ids.
    ///
    /// Only the holder of `token` may commit. Repeating a commit that
    /// already landed returns the approved application.
    async fn commit_approval(
        &self,
        id: ApplicationId,
        token: u64,
        ngo: NgoLedgerId,
        campaign: CampaignLedgerId,
    ) -> Result<CampaignApplication, StoreError>;

    /// Sets `Rejected`. Same claim rules as [`commit_approval`](Self::commit_approval).
    async fn commit_rejection(
        &self,
        id: ApplicationId,
        token: u64,
    ) -> Result<CampaignApplication, StoreError>;

    /// Drops the claim held by `token`, leaving the application `Pending`.
    /// A no-op once the claim was superseded or committed.
    async fn release_decision(
        &self,
        id: ApplicationId,
        token: u64,
    ) -> Result<CampaignApplication, StoreError>;

    /// Adds `amount` to a campaign's received total once per transaction.
    ///
    /// The transaction is marked counted in the same atomic update, so a
    /// repeated call for `transaction` changes nothing. Returns the total.
    async fn increment_received(
        &self,
        campaign: &CampaignLedgerId,
        transaction: &TransactionId,
        amount: Decimal,
    ) -> Result<Decimal, StoreError>;

    // === Transactions ===

    /// Fails with [`StoreError::DuplicateKey`] if the transaction id exists.
    async fn insert_transaction(&self, record: TransactionRecord) -> Result<(), StoreError>;

    async fn transaction(
        &self,
        id: &TransactionId,
    ) -> Result<Option<TransactionRecord>, StoreError>;

    async fn transactions_by_donor(
        &self,
        donor: &DonorId,
    ) -> Result<Vec<TransactionRecord>, StoreError>;

    async fn transactions_by_campaign(
        &self,
        campaign: &CampaignLedgerId,
    ) -> Result<Vec<TransactionRecord>, StoreError>;

    // === Donors ===

    async fn donor(&self, email: &Email) -> Result<Option<DonorProfile>, StoreError>;

    /// Links an email to its ledger donor id. Idempotent for the same id;
    /// fails with [`StoreError::Conflict`] if a different id is already linked.
    async fn link_donor(
        &self,
        email: &Email,
        ledger_id: &DonorLedgerId,
        verified: bool,
    ) -> Result<DonorProfile, StoreError>;

    // === Rewards ===

    /// Appends an earned entry keyed by `(donor, reference)`. Returns the
    /// tokens awarded for `reference`, the original award on a repeat.
    async fn credit_reward(
        &self,
        donor: &DonorId,
        tokens: u64,
        reason: &str,
        reference: &str,
    ) -> Result<u64, StoreError>;

    /// Appends a redeemed entry only if the balance covers `tokens`.
    async fn redeem_reward(
        &self,
        donor: &DonorId,
        tokens: u64,
        reason: &str,
    ) -> Result<Redemption, StoreError>;

    /// Empty for a donor with no account.
    async fn reward_balance(&self, donor: &DonorId) -> Result<RewardBalance, StoreError>;
}
