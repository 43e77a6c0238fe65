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

//! Explicit wiring of the pipeline components.
//!
//! Every collaborator is constructed once by the caller and injected here.
//! There are no process-wide singletons.

use crate::application::{
    AdminApproval, CampaignApplication, Decision, NewApplication, TrustScore,
};
use crate::approval::ApprovalStateMachine;
use crate::base::{ApplicationId, CampaignLedgerId, DonorId, Email, TransactionId};
use crate::config::PipelineConfig;
use crate::donor::DonorResolver;
use crate::error::PipelineError;
use crate::evidence::{ContentAddressedStore, EvidenceStore};
use crate::ledger::{DonationEntry, InMemoryLedger, LedgerClient, OperatorCredential};
use crate::notify::{LogNotifier, Notifier};
use crate::proof::{PlainTextRecognizer, ProofExtractor, TextRecognizer};
use crate::retry::with_retry;
use crate::rewards::{RewardBalance, RewardLedger};
use crate::saga::{DonationReceipt, DonationRequest, DonationSaga};
use crate::store::{InMemoryStore, Store};
use crate::transaction::TransactionRecord;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

/// External systems the pipeline talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn Store>,
    pub ledger: Arc<dyn LedgerClient>,
    pub evidence: Arc<dyn EvidenceStore>,
    pub recognizer: Arc<dyn TextRecognizer>,
    pub notifier: Arc<dyn Notifier>,
}

impl Collaborators {
    /// In-process collaborators. Receipts are read as plain text.
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(InMemoryStore::new()),
            ledger: Arc::new(InMemoryLedger::new()),
            evidence: Arc::new(ContentAddressedStore::new()),
            recognizer: Arc::new(PlainTextRecognizer),
            notifier: Arc::new(LogNotifier::new()),
        }
    }
}

/// Funding progress of one campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CampaignStats {
    pub application: ApplicationId,
    pub campaign: CampaignLedgerId,
    pub title: String,
    pub goal: Decimal,
    pub received: Decimal,
    /// `received / goal` in percent, two decimal places.
    pub percentage: Decimal,
}

impl CampaignStats {
    fn from_application(app: &CampaignApplication, campaign: CampaignLedgerId) -> Self {
        let percentage = (app.received_amount * Decimal::ONE_HUNDRED)
            .checked_div(app.campaign.goal_amount)
            .unwrap_or(Decimal::ZERO)
            .round_dp(2);
        Self {
            application: app.id,
            campaign,
            title: app.campaign.title.clone(),
            goal: app.campaign.goal_amount,
            received: app.received_amount,
            percentage,
        }
    }
}

/// Giving summary of one donor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DonorStats {
    pub donor: DonorId,
    pub total_amount: Decimal,
    pub donations: usize,
    /// Distinct campaigns donated to.
    pub campaigns: usize,
}

pub struct Pipeline {
    config: Arc<PipelineConfig>,
    store: Arc<dyn Store>,
    ledger: Arc<dyn LedgerClient>,
    approvals: ApprovalStateMachine,
    donors: Arc<DonorResolver>,
    saga: DonationSaga,
    rewards: Arc<RewardLedger>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, collaborators: Collaborators) -> Self {
        let config = Arc::new(config);
        let Collaborators {
            store,
            ledger,
            evidence,
            recognizer,
            notifier,
        } = collaborators;

        let approvals = ApprovalStateMachine::new(
            Arc::clone(&store),
            Arc::clone(&ledger),
            notifier,
            Arc::clone(&config),
        );
        let donors = Arc::new(DonorResolver::new(
            Arc::clone(&store),
            Arc::clone(&ledger),
            Arc::clone(&config),
        ));
        let rewards = Arc::new(RewardLedger::new(
            Arc::clone(&store),
            config.reward_unit,
            config.store_retry,
        ));
        let saga = DonationSaga::new(
            Arc::clone(&store),
            Arc::clone(&ledger),
            evidence,
            Arc::new(ProofExtractor::new(recognizer)),
            Arc::clone(&donors),
            Arc::clone(&rewards),
            Arc::clone(&config),
        );

        Self {
            config,
            store,
            ledger,
            approvals,
            donors,
            saga,
            rewards,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn approvals(&self) -> &ApprovalStateMachine {
        &self.approvals
    }

    pub fn donors(&self) -> &DonorResolver {
        &self.donors
    }

    pub fn rewards(&self) -> &RewardLedger {
        &self.rewards
    }

    // === Operations ===

    pub async fn submit_application(
        &self,
        submission: NewApplication,
    ) -> Result<CampaignApplication, PipelineError> {
        self.approvals.submit(submission).await
    }

    pub async fn record_ai_verdict(
        &self,
        id: ApplicationId,
        score: TrustScore,
    ) -> Result<CampaignApplication, PipelineError> {
        self.approvals.record_ai_verdict(id, score).await
    }

    pub async fn decide(
        &self,
        id: ApplicationId,
        decision: Decision,
        signer: &OperatorCredential,
    ) -> Result<CampaignApplication, PipelineError> {
        self.approvals.decide(id, decision, signer).await
    }

    pub async fn donate(&self, request: DonationRequest) -> Result<DonationReceipt, PipelineError> {
        self.saga.submit(request).await
    }

    pub async fn redeem(
        &self,
        donor: &DonorId,
        tokens: u64,
        reason: &str,
    ) -> Result<RewardBalance, PipelineError> {
        self.rewards.debit(donor, tokens, reason).await
    }

    // === Read accessors ===

    pub async fn applications_by_status(
        &self,
        status: AdminApproval,
    ) -> Result<Vec<CampaignApplication>, PipelineError> {
        self.approvals.applications_by_status(status).await
    }

    pub async fn all_applications(&self) -> Result<Vec<CampaignApplication>, PipelineError> {
        self.approvals.all_applications().await
    }

    pub async fn listed_campaigns(&self) -> Result<Vec<CampaignApplication>, PipelineError> {
        self.approvals.listed_campaigns().await
    }

    pub async fn campaign_stats(
        &self,
        campaign: &CampaignLedgerId,
    ) -> Result<CampaignStats, PipelineError> {
        let app = self
            .store
            .application_by_campaign(campaign)
            .await?
            .ok_or(PipelineError::CampaignNotFound)?;
        Ok(CampaignStats::from_application(&app, campaign.clone()))
    }

    pub async fn donor_stats(&self, donor: &DonorId) -> Result<DonorStats, PipelineError> {
        let records = self.store.transactions_by_donor(donor).await?;
        let campaigns: BTreeSet<&CampaignLedgerId> =
            records.iter().map(|record| &record.campaign_id).collect();
        Ok(DonorStats {
            donor: donor.clone(),
            total_amount: records.iter().map(|record| record.amount).sum(),
            donations: records.len(),
            campaigns: campaigns.len(),
        })
    }

    pub async fn transaction(
        &self,
        id: &TransactionId,
    ) -> Result<Option<TransactionRecord>, PipelineError> {
        Ok(self.store.transaction(id).await?)
    }

    pub async fn transactions_by_donor(
        &self,
        donor: &DonorId,
    ) -> Result<Vec<TransactionRecord>, PipelineError> {
        Ok(self.store.transactions_by_donor(donor).await?)
    }

    pub async fn transactions_by_campaign(
        &self,
        campaign: &CampaignLedgerId,
    ) -> Result<Vec<TransactionRecord>, PipelineError> {
        Ok(self.store.transactions_by_campaign(campaign).await?)
    }

    /// The ledger's view of a donor's donations. Empty if the donor never
    /// donated through this system.
    pub async fn ledger_donations_by_donor(
        &self,
        email: &Email,
    ) -> Result<Vec<DonationEntry>, PipelineError> {
        let Some(profile) = self.store.donor(email).await? else {
            return Ok(Vec::new());
        };
        with_retry(&self.config.ledger_retry, "donations_by_donor", || {
            self.ledger.donations_by_donor(&profile.ledger_id)
        })
        .await
        .map_err(|e| PipelineError::LedgerUnavailable(e.to_string()))
    }

    pub async fn reward_balance(&self, donor: &DonorId) -> Result<RewardBalance, PipelineError> {
        self.rewards.balance(donor).await
    }
}
