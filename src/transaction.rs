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

//! Donation transaction records.
//!
//! A record is persisted only after its ledger entry has confirmed, so every
//! stored record starts out [`Completed`](TransactionStatus::Completed):
//!
//! ```text
//!  Pending ──ledger confirmed──► Completed
//!     │
//!     └─────ledger failed──────► Failed   (never persisted)
//! ```

use crate::base::{CampaignLedgerId, DonorId, DonorLedgerId, Email, ProofReference, TransactionId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

/// How the donor paid.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    #[default]
    Upi,
    Card,
    NetBanking,
    Other,
}

/// A persisted donation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionRecord {
    pub transaction_id: TransactionId,
    pub amount: Decimal,
    pub campaign_id: CampaignLedgerId,
    pub donor_id: DonorId,
    pub donor_email: Email,
    pub donor_name: String,
    pub donor_ledger_id: DonorLedgerId,
    pub payment_method: PaymentMethod,
    pub proof: ProofReference,
    pub status: TransactionStatus,
    pub recorded_at: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn is_completed(&self) -> bool {
        self.status == TransactionStatus::Completed
    }
}

/// Persisted link between a donor's email and their ledger record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DonorProfile {
    pub email: Email,
    /// Written once, on first registration.
    pub ledger_id: DonorLedgerId,
    pub verified: bool,
}
