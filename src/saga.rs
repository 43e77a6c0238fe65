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

//! Donation recording saga.
//!
//! Steps run in a fixed order and each failure aborts the rest:
//!
//! ```text
//!  validate ─► claim tx id ─► duplicate check ─► proof check ─► resolve donor ─► store evidence
//!                                                                                    │
//!       ┌────────────────────────────────────────────────────────────────────────────┘
//!       ▼
//!  ledger record ══ commit point ══► persist transaction ─► increment campaign ─► credit rewards
//! ```
//!
//! Everything before the ledger write is free of side effects that matter
//! (a resolved donor and stored evidence are reused by a retry). The ledger
//! write cannot be undone, so later steps are retried and logged instead of
//! rolled back. Each of them is keyed by the transaction id, so a retried
//! step applies at most once. A ledger entry left without a transaction
//! record is reconciled when the same submission is retried, and a
//! resubmitted recorded transaction replays the campaign and reward steps.

use crate::application::AdminApproval;
use crate::base::{CampaignLedgerId, DonorId, Email, ProofReference, TransactionId};
use crate::config::PipelineConfig;
use crate::donor::DonorResolver;
use crate::error::{LedgerError, PipelineError, StoreError};
use crate::evidence::EvidenceStore;
use crate::ledger::{DonationEntry, LedgerClient};
use crate::proof::ProofExtractor;
use crate::retry::with_retry;
use crate::rewards::RewardLedger;
use crate::store::Store;
use crate::transaction::{PaymentMethod, TransactionRecord, TransactionStatus};
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// A donor's donation claim with its receipt.
#[derive(Debug, Clone)]
pub struct DonationRequest {
    pub transaction_id: TransactionId,
    pub amount: Decimal,
    pub campaign_id: CampaignLedgerId,
    pub donor_id: DonorId,
    pub donor_email: Email,
    pub donor_name: String,
    pub payment_method: PaymentMethod,
    /// Raw receipt image.
    pub receipt: Vec<u8>,
}

impl DonationRequest {
    fn validate(&self) -> Result<(), PipelineError> {
        if self.amount <= Decimal::ZERO {
            return Err(PipelineError::Validation(
                "donation amount must be positive".to_string(),
            ));
        }
        if self.donor_id.0.trim().is_empty() {
            return Err(PipelineError::Validation("donor id is required".to_string()));
        }
        if self.donor_name.trim().is_empty() {
            return Err(PipelineError::Validation(
                "donor name is required".to_string(),
            ));
        }
        if self.receipt.is_empty() {
            return Err(PipelineError::Validation(
                "payment receipt is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Outcome of a committed donation.
///
/// The side-effect fields are `None` when that step failed after the commit point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DonationReceipt {
    pub transaction: TransactionRecord,
    pub campaign_received: Option<Decimal>,
    pub tokens_awarded: Option<u64>,
}

/// Exclusive right to process one transaction id, released on drop.
struct InFlightClaim<'a> {
    claims: &'a DashMap<TransactionId, ()>,
    id: TransactionId,
}

impl Drop for InFlightClaim<'_> {
    fn drop(&mut self) {
        self.claims.remove(&self.id);
    }
}

pub struct DonationSaga {
    store: Arc<dyn Store>,
    ledger: Arc<dyn LedgerClient>,
    evidence: Arc<dyn EvidenceStore>,
    extractor: Arc<ProofExtractor>,
    donors: Arc<DonorResolver>,
    rewards: Arc<RewardLedger>,
    config: Arc<PipelineConfig>,
    in_flight: DashMap<TransactionId, ()>,
}

impl DonationSaga {
    pub fn new(
        store: Arc<dyn Store>,
        ledger: Arc<dyn LedgerClient>,
        evidence: Arc<dyn EvidenceStore>,
        extractor: Arc<ProofExtractor>,
        donors: Arc<DonorResolver>,
        rewards: Arc<RewardLedger>,
        config: Arc<PipelineConfig>,
    ) -> Self {
        Self {
            store,
            ledger,
            evidence,
            extractor,
            donors,
            rewards,
            config,
            in_flight: DashMap::new(),
        }
    }

    /// Records a donation on the ledger and in the database.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::Validation`] - malformed request.
    /// - [`PipelineError::DuplicateTransaction`] - id already recorded or being recorded.
    /// - [`PipelineError::CampaignNotFound`] - campaign unknown or not approved.
    /// - [`PipelineError::ProofMismatch`] - receipt amount missing or different.
    /// - [`PipelineError::LedgerUnavailable`] - ledger retry budget exhausted; nothing recorded.
    /// - [`PipelineError::Storage`] - database or evidence storage failure before the ledger write.
    /// - [`PipelineError::RecordingIncomplete`] - on the ledger but not yet in the database.
    pub async fn submit(&self, request: DonationRequest) -> Result<DonationReceipt, PipelineError> {
        request.validate()?;
        let tx = request.transaction_id.clone();
        let _claim = self.claim(&tx)?;

        if let Some(existing) = self.store.transaction(&tx).await? {
            info!(transaction_id = %tx, "duplicate donation rejected");
            self.apply_side_effects(&existing).await;
            return Err(PipelineError::DuplicateTransaction);
        }

        self.store
            .application_by_campaign(&request.campaign_id)
            .await?
            .filter(|app| app.admin_approval == AdminApproval::Approved)
            .ok_or(PipelineError::CampaignNotFound)?;

        let proof = self.extractor.extract(&request.receipt).await;
        if !proof.amount_matches(request.amount) {
            warn!(
                transaction_id = %tx,
                claimed = %request.amount,
                extracted = ?proof.amount,
                "payment proof rejected"
            );
            return Err(PipelineError::ProofMismatch {
                claimed: request.amount,
                extracted: proof.amount,
            });
        }
        if let Some(receipt_tx) = proof.transaction_id.as_deref() {
            if receipt_tx != tx.as_str() {
                warn!(transaction_id = %tx, %receipt_tx, "receipt shows a different reference");
            }
        }

        let donor = self.donors.resolve(&request.donor_email).await?;

        let proof_ref: ProofReference = self
            .evidence
            .put(&request.receipt)
            .await
            .map_err(|e| PipelineError::Storage(e.to_string()))?;

        let entry = DonationEntry {
            transaction_id: tx.clone(),
            campaign_id: request.campaign_id.clone(),
            donor_id: donor.ledger_id.clone(),
            donor_name: request.donor_name.clone(),
            amount: request.amount,
            proof: proof_ref.clone(),
        };
        self.record_on_ledger(&entry).await?;

        let record = TransactionRecord {
            transaction_id: tx.clone(),
            amount: request.amount,
            campaign_id: request.campaign_id.clone(),
            donor_id: request.donor_id.clone(),
            donor_email: request.donor_email.clone(),
            donor_name: request.donor_name.clone(),
            donor_ledger_id: donor.ledger_id.clone(),
            payment_method: request.payment_method,
            proof: proof_ref,
            status: TransactionStatus::Completed,
            recorded_at: Utc::now(),
        };
        self.persist(&record).await?;

        let (campaign_received, tokens_awarded) = self.apply_side_effects(&record).await;

        info!(
            transaction_id = %tx,
            campaign_ledger_id = %request.campaign_id,
            amount = %request.amount,
            ?tokens_awarded,
            "donation recorded"
        );
        Ok(DonationReceipt {
            transaction: record,
            campaign_received,
            tokens_awarded,
        })
    }

    /// Adds a recorded donation to its campaign total and credits the
    /// donor's rewards. Both steps are idempotent per transaction id.
    ///
    /// Returns the new campaign total and the tokens awarded, `None` for a
    /// step that failed.
    async fn apply_side_effects(&self, record: &TransactionRecord) -> (Option<Decimal>, Option<u64>) {
        let tx = &record.transaction_id;
        let campaign_received = match with_retry(&self.config.store_retry, "increment_received", || {
            self.store
                .increment_received(&record.campaign_id, tx, record.amount)
        })
        .await
        {
            Ok(total) => Some(total),
            Err(e) => {
                error!(
                    transaction_id = %tx,
                    campaign_ledger_id = %record.campaign_id,
                    amount = %record.amount,
                    error = %e,
                    "campaign total not updated for recorded donation"
                );
                None
            }
        };

        let tokens_awarded = match self
            .rewards
            .credit(&record.donor_id, record.amount, "donation", tx.as_str())
            .await
        {
            Ok(tokens) => Some(tokens),
            Err(e) => {
                warn!(transaction_id = %tx, donor_id = %record.donor_id, error = %e, "reward accrual skipped");
                None
            }
        };

        (campaign_received, tokens_awarded)
    }

    fn claim<'a>(&'a self, id: &TransactionId) -> Result<InFlightClaim<'a>, PipelineError> {
        match self.in_flight.entry(id.clone()) {
            Entry::Occupied(_) => {
                info!(transaction_id = %id, "donation already in flight");
                Err(PipelineError::DuplicateTransaction)
            }
            Entry::Vacant(entry) => {
                entry.insert(());
                Ok(InFlightClaim {
                    claims: &self.in_flight,
                    id: id.clone(),
                })
            }
        }
    }

    /// Writes the donation to the ledger.
    ///
    /// An existing entry for the same transaction id counts as confirmed if
    /// it describes the same donation (an earlier attempt whose confirmation
    /// was lost). Any other existing entry is a duplicate.
    async fn record_on_ledger(&self, entry: &DonationEntry) -> Result<(), PipelineError> {
        let policy = &self.config.ledger_retry;
        let unavailable = |e: LedgerError| {
            warn!(transaction_id = %entry.transaction_id, error = %e, "ledger write failed, donation not recorded");
            PipelineError::LedgerUnavailable(e.to_string())
        };

        match with_retry(policy, "record_donation", || self.ledger.record_donation(entry)).await {
            Ok(()) => Ok(()),
            Err(LedgerError::DuplicateDonation) => {
                let existing = with_retry(policy, "find_donation", || {
                    self.ledger.find_donation(&entry.transaction_id)
                })
                .await
                .map_err(unavailable)?;
                match existing {
                    Some(found) if found.matches(entry) => {
                        info!(transaction_id = %entry.transaction_id, "ledger entry from earlier attempt reconciled");
                        Ok(())
                    }
                    _ => Err(PipelineError::DuplicateTransaction),
                }
            }
            Err(e) => Err(unavailable(e)),
        }
    }

    /// Inserts the transaction record. A duplicate key holding this same
    /// record is an earlier attempt whose acknowledgement was lost.
    async fn persist(&self, record: &TransactionRecord) -> Result<(), PipelineError> {
        let inserted = with_retry(&self.config.store_retry, "insert_transaction", || {
            self.store.insert_transaction(record.clone())
        })
        .await;
        match inserted {
            Ok(()) => Ok(()),
            Err(StoreError::DuplicateKey(_)) => {
                let existing = self.store.transaction(&record.transaction_id).await?;
                if existing.as_ref() == Some(record) {
                    Ok(())
                } else {
                    Err(PipelineError::DuplicateTransaction)
                }
            }
            Err(e) => {
                error!(
                    transaction_id = %record.transaction_id,
                    error = %e,
                    "donation on ledger but not persisted; resubmission will reconcile"
                );
                Err(PipelineError::RecordingIncomplete(e.to_string()))
            }
        }
    }
}
