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

//! In-process [`Store`] backed by sharded concurrent maps.
//!
//! Each conditional update runs under the owning document's shard lock,
//! which gives the same single-document atomicity a document database
//! offers for `findOneAndUpdate`/`$inc`. Reward accounts are kept in a
//! [`RewardAccounts`] collection.

use super::Store;
use super::transaction_log::TransactionLog;
use crate::application::{
    AdminApproval, AiApproval, CampaignApplication, DecisionLease, NewApplication,
};
use crate::base::{ApplicationId, CampaignLedgerId, DonorId, DonorLedgerId, Email, NgoLedgerId, TransactionId};
use crate::error::StoreError;
use crate::rewards::{Redemption, RewardAccounts, RewardBalance};
use crate::transaction::{DonorProfile, TransactionRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};

/// Store operations that accept injected backend failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreCall {
    ClaimDecision,
    CommitApproval,
    CommitRejection,
    ReleaseDecision,
    IncrementReceived,
    InsertTransaction,
    LinkDonor,
    CreditReward,
    RedeemReward,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    next_application: AtomicU64,
    next_claim: AtomicU64,
    applications: DashMap<ApplicationId, CampaignApplication>,
    /// Campaign ledger id -> owning application.
    campaigns: DashMap<CampaignLedgerId, ApplicationId>,
    transactions: TransactionLog,
    /// Transactions already added to their campaign's received total.
    counted: DashMap<TransactionId, ()>,
    donors: DashMap<Email, DonorProfile>,
    rewards: RewardAccounts,
    faults: DashMap<StoreCall, u32>,
    lost_acks: DashMap<StoreCall, u32>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `times` calls of `call` fail with a backend error.
    pub fn fail_next(&self, call: StoreCall, times: u32) {
        *self.faults.entry(call).or_insert(0) += times;
    }

    /// Applies the next call of `call`, then reports a backend error as if
    /// the acknowledgement was lost.
    pub fn lose_ack_next(&self, call: StoreCall) {
        *self.lost_acks.entry(call).or_insert(0) += 1;
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    fn check_fault(&self, call: StoreCall) -> Result<(), StoreError> {
        if let Some(mut remaining) = self.faults.get_mut(&call) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StoreError::Backend(format!("injected {call:?} failure")));
            }
        }
        Ok(())
    }

    fn check_lost_ack(&self, call: StoreCall) -> Result<(), StoreError> {
        if let Some(mut remaining) = self.lost_acks.get_mut(&call) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StoreError::Backend(format!("{call:?} acknowledgement lost")));
            }
        }
        Ok(())
    }

    fn update<F>(&self, id: ApplicationId, apply: F) -> Result<CampaignApplication, StoreError>
    where
        F: FnOnce(&mut CampaignApplication) -> Result<(), StoreError>,
    {
        let mut application = self
            .applications
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("application {id}")))?;
        apply(application.value_mut())?;
        application.updated_at = Utc::now();
        Ok(application.value().clone())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_application(
        &self,
        submission: NewApplication,
        now: DateTime<Utc>,
    ) -> Result<CampaignApplication, StoreError> {
        let id = ApplicationId(self.next_application.fetch_add(1, Ordering::SeqCst) + 1);
        let application = CampaignApplication::new(id, submission, now);
        self.applications.insert(id, application.clone());
        Ok(application)
    }

    async fn application(
        &self,
        id: ApplicationId,
    ) -> Result<Option<CampaignApplication>, StoreError> {
        Ok(self.applications.get(&id).map(|app| app.value().clone()))
    }

    async fn applications(
        &self,
        status: Option<AdminApproval>,
    ) -> Result<Vec<CampaignApplication>, StoreError> {
        let mut selected: Vec<CampaignApplication> = self
            .applications
            .iter()
            .filter(|app| status.is_none_or(|wanted| app.admin_approval == wanted))
            .map(|app| app.value().clone())
            .collect();
        selected.sort_by_key(|app| app.id);
        Ok(selected)
    }

    async fn application_by_campaign(
        &self,
        campaign: &CampaignLedgerId,
    ) -> Result<Option<CampaignApplication>, StoreError> {
        let id = match self.campaigns.get(campaign) {
            Some(entry) => *entry.value(),
            None => return Ok(None),
        };
        self.application(id).await
    }

    async fn set_ai_approval(
        &self,
        id: ApplicationId,
        verdict: AiApproval,
    ) -> Result<CampaignApplication, StoreError> {
        self.update(id, |app| {
            app.ai_approval = verdict;
            Ok(())
        })
    }

    async fn claim_decision(
        &self,
        id: ApplicationId,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<(CampaignApplication, DecisionLease), StoreError> {
        self.check_fault(StoreCall::ClaimDecision)?;
        let lease = DecisionLease {
            token: self.next_claim.fetch_add(1, Ordering::SeqCst) + 1,
            expires_at,
        };
        let claimed = self.update(id, |app| {
            if app.admin_approval.is_terminal() || app.is_claimed(now) {
                return Err(StoreError::Conflict(format!(
                    "application {} is {} (claimed: {})",
                    app.id,
                    app.admin_approval,
                    app.is_claimed(now)
                )));
            }
            app.decision_lease = Some(lease);
            Ok(())
        })?;
        Ok((claimed, lease))
    }

    async fn commit_approval(
        &self,
        id: ApplicationId,
        token: u64,
        ngo: NgoLedgerId,
        campaign: CampaignLedgerId,
    ) -> Result<CampaignApplication, StoreError> {
        self.check_fault(StoreCall::CommitApproval)?;
        let index_key = campaign.clone();
        let committed = self.update(id, move |app| {
            let holder = app.decision_lease.is_some_and(|lease| lease.token == token);
            if holder
                && app.admin_approval == AdminApproval::Approved
                && app.campaign_ledger_id.as_ref() == Some(&campaign)
            {
                return Ok(());
            }
            if !holder
                || app.admin_approval != AdminApproval::Pending
                || app.campaign_ledger_id.is_some()
            {
                return Err(StoreError::Conflict(format!(
                    "application {} does not hold decision claim {token}",
                    app.id
                )));
            }
            app.admin_approval = AdminApproval::Approved;
            app.ngo_ledger_id = Some(ngo);
            app.campaign_ledger_id = Some(campaign);
            Ok(())
        })?;
        self.campaigns.insert(index_key, id);
        self.check_lost_ack(StoreCall::CommitApproval)?;
        Ok(committed)
    }

    async fn commit_rejection(
        &self,
        id: ApplicationId,
        token: u64,
    ) -> Result<CampaignApplication, StoreError> {
        self.check_fault(StoreCall::CommitRejection)?;
        let committed = self.update(id, |app| {
            let holder = app.decision_lease.is_some_and(|lease| lease.token == token);
            if holder && app.admin_approval == AdminApproval::Rejected {
                return Ok(());
            }
            if !holder || app.admin_approval != AdminApproval::Pending {
                return Err(StoreError::Conflict(format!(
                    "application {} does not hold decision claim {token}",
                    app.id
                )));
            }
            app.admin_approval = AdminApproval::Rejected;
            Ok(())
        })?;
        self.check_lost_ack(StoreCall::CommitRejection)?;
        Ok(committed)
    }

    async fn release_decision(
        &self,
        id: ApplicationId,
        token: u64,
    ) -> Result<CampaignApplication, StoreError> {
        self.check_fault(StoreCall::ReleaseDecision)?;
        self.update(id, |app| {
            let holder = app.decision_lease.is_some_and(|lease| lease.token == token);
            if holder && app.admin_approval == AdminApproval::Pending {
                app.decision_lease = None;
            }
            Ok(())
        })
    }

    async fn increment_received(
        &self,
        campaign: &CampaignLedgerId,
        transaction: &TransactionId,
        amount: Decimal,
    ) -> Result<Decimal, StoreError> {
        self.check_fault(StoreCall::IncrementReceived)?;
        if amount <= Decimal::ZERO {
            return Err(StoreError::Conflict(format!(
                "received amount only grows, got increment {amount}"
            )));
        }
        let id = self
            .campaigns
            .get(campaign)
            .map(|entry| *entry.value())
            .ok_or_else(|| StoreError::NotFound(format!("campaign {campaign}")))?;
        let total = match self.counted.entry(transaction.clone()) {
            Entry::Occupied(_) => self
                .applications
                .get(&id)
                .map(|app| app.received_amount)
                .ok_or_else(|| StoreError::NotFound(format!("application {id}")))?,
            Entry::Vacant(entry) => {
                let updated = self.update(id, |app| {
                    app.received_amount += amount;
                    Ok(())
                })?;
                entry.insert(());
                updated.received_amount
            }
        };
        self.check_lost_ack(StoreCall::IncrementReceived)?;
        Ok(total)
    }

    async fn insert_transaction(&self, record: TransactionRecord) -> Result<(), StoreError> {
        self.check_fault(StoreCall::InsertTransaction)?;
        self.transactions.insert(record)?;
        self.check_lost_ack(StoreCall::InsertTransaction)
    }

    async fn transaction(
        &self,
        id: &TransactionId,
    ) -> Result<Option<TransactionRecord>, StoreError> {
        Ok(self.transactions.get(id))
    }

    async fn transactions_by_donor(
        &self,
        donor: &DonorId,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        Ok(self.transactions.by_donor(donor))
    }

    async fn transactions_by_campaign(
        &self,
        campaign: &CampaignLedgerId,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        Ok(self.transactions.by_campaign(campaign))
    }

    async fn donor(&self, email: &Email) -> Result<Option<DonorProfile>, StoreError> {
        Ok(self.donors.get(email).map(|profile| profile.value().clone()))
    }

    async fn link_donor(
        &self,
        email: &Email,
        ledger_id: &DonorLedgerId,
        verified: bool,
    ) -> Result<DonorProfile, StoreError> {
        self.check_fault(StoreCall::LinkDonor)?;
        match self.donors.entry(email.clone()) {
            Entry::Occupied(existing) => {
                if &existing.get().ledger_id != ledger_id {
                    return Err(StoreError::Conflict(format!(
                        "donor {email} already linked to {}",
                        existing.get().ledger_id
                    )));
                }
                Ok(existing.get().clone())
            }
            Entry::Vacant(entry) => {
                let profile = DonorProfile {
                    email: email.clone(),
                    ledger_id: ledger_id.clone(),
                    verified,
                };
                entry.insert(profile.clone());
                Ok(profile)
            }
        }
    }

    async fn credit_reward(
        &self,
        donor: &DonorId,
        tokens: u64,
        reason: &str,
        reference: &str,
    ) -> Result<u64, StoreError> {
        self.check_fault(StoreCall::CreditReward)?;
        let awarded = self.rewards.credit(donor, tokens, reason, reference)?;
        self.check_lost_ack(StoreCall::CreditReward)?;
        Ok(awarded)
    }

    async fn redeem_reward(
        &self,
        donor: &DonorId,
        tokens: u64,
        reason: &str,
    ) -> Result<Redemption, StoreError> {
        self.check_fault(StoreCall::RedeemReward)?;
        Ok(self.rewards.debit(donor, tokens, reason))
    }

    async fn reward_balance(&self, donor: &DonorId) -> Result<RewardBalance, StoreError> {
        Ok(self.rewards.balance(donor))
    }
}
