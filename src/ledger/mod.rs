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

//! Typed interface over the smart-contract ledger.
//!
//! Four registries are exposed: NGO, Campaign, Donor, and Donation. Every
//! write is a ledger transaction with its own confirmation latency; callers
//! wrap calls in [`with_retry`](crate::retry::with_retry).
//!
//! Lookups are non-reverting queries: "not found" is `Ok(None)`.
//!
//! A [`LedgerClient`] is constructed once at process start and injected into
//! every component that needs it.

pub mod memory;

use crate::base::{CampaignLedgerId, DonorLedgerId, Email, NgoLedgerId, ProofReference, TransactionId};
use crate::error::{LedgerError, PipelineError};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use memory::{InMemoryLedger, LedgerCall};

/// Credential an operator signs registry writes with.
///
/// Its value is never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct OperatorCredential(String);

impl OperatorCredential {
    pub fn new(secret: impl Into<String>) -> Result<Self, PipelineError> {
        let secret = secret.into();
        if secret.trim().is_empty() {
            return Err(PipelineError::Validation(
                "operator credential is required to approve".to_string(),
            ));
        }
        Ok(Self(secret))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for OperatorCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OperatorCredential(***)")
    }
}

/// Fields written to the NGO registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NgoRegistration {
    pub name: String,
    pub registration_number: String,
    pub website: String,
    pub contact_person: String,
    pub email: Email,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NgoRecord {
    pub id: NgoLedgerId,
    pub name: String,
    pub email: Email,
}

/// Fields written to the Campaign registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignRegistration {
    pub title: String,
    pub description: String,
    pub location: String,
    pub goal_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonorRecord {
    pub id: DonorLedgerId,
    pub username: Email,
    pub verified: bool,
}

/// One entry of the Donation registry, keyed by the payment transaction id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonationEntry {
    pub transaction_id: TransactionId,
    pub campaign_id: CampaignLedgerId,
    pub donor_id: DonorLedgerId,
    pub donor_name: String,
    pub amount: Decimal,
    pub proof: ProofReference,
}

impl DonationEntry {
    /// Same donation as `other`, ignoring presentation-only fields.
    pub fn matches(&self, other: &DonationEntry) -> bool {
        self.transaction_id == other.transaction_id
            && self.campaign_id == other.campaign_id
            && self.donor_id == other.donor_id
            && self.amount == other.amount
    }
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// NGO registry lookup by contact email.
    async fn find_ngo_by_email(&self, email: &Email) -> Result<Option<NgoRecord>, LedgerError>;

    async fn register_ngo(
        &self,
        signer: &OperatorCredential,
        ngo: &NgoRegistration,
    ) -> Result<NgoLedgerId, LedgerError>;

    async fn register_campaign(
        &self,
        signer: &OperatorCredential,
        ngo: &NgoLedgerId,
        campaign: &CampaignRegistration,
    ) -> Result<CampaignLedgerId, LedgerError>;

    /// Donor registry lookup by username (the donor's email).
    async fn find_donor(&self, username: &Email) -> Result<Option<DonorRecord>, LedgerError>;

    async fn register_donor(
        &self,
        username: &Email,
        verified: bool,
    ) -> Result<DonorLedgerId, LedgerError>;

    /// Records a donation. Fails with [`LedgerError::DuplicateDonation`] if an
    /// entry with the same transaction id already exists.
    async fn record_donation(&self, donation: &DonationEntry) -> Result<(), LedgerError>;

    async fn find_donation(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<DonationEntry>, LedgerError>;

    async fn donations_by_donor(
        &self,
        donor: &DonorLedgerId,
    ) -> Result<Vec<DonationEntry>, LedgerError>;
}
