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

//! # Aidverify
//!
//! Approval and donation reconciliation pipeline for verifiable fundraising
//! campaigns. Keeps three independently failing systems consistent: an
//! append-only ledger, an operational database, and receipt text
//! recognition.
//!
//! ## Core Components
//!
//! - [`ApprovalStateMachine`]: application lifecycle and on-ledger registration of approved campaigns
//! - [`DonorResolver`]: one ledger donor record per email
//! - [`ProofExtractor`]: amount, reference, date and payee from receipt text
//! - [`DonationSaga`]: ordered ledger → database → aggregate → rewards recording
//! - [`RewardLedger`]: append-only donor token accounts kept in the store
//! - [`Pipeline`]: wires the components around injected collaborators
//!
//! ## Example
//!
//! ```
//! use aidverify::{
//!     CampaignDetails, Collaborators, Decision, Email, NewApplication, OperatorCredential,
//!     Organization, Pipeline, PipelineConfig,
//! };
//! use rust_decimal_macros::dec;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let pipeline = Pipeline::new(PipelineConfig::default(), Collaborators::in_memory());
//!
//! let app = pipeline
//!     .submit_application(NewApplication {
//!         organization: Organization {
//!             name: "Helping Hands".into(),
//!             registration_number: "REG-1".into(),
//!             website: "https://hands.example".into(),
//!             contact_person: "Asha".into(),
//!             email: Email::parse("ngo@hands.example").unwrap(),
//!             phone: "+91 90000 00000".into(),
//!         },
//!         campaign: CampaignDetails {
//!             title: "Flood relief".into(),
//!             description: "Relief kits".into(),
//!             location: "Assam".into(),
//!             goal_amount: dec!(50000),
//!             start_date: None,
//!             end_date: None,
//!         },
//!     })
//!     .await
//!     .unwrap();
//!
//! let signer = OperatorCredential::new("operator-key").unwrap();
//! let approved = pipeline.decide(app.id, Decision::Approved, &signer).await.unwrap();
//! assert!(approved.campaign_ledger_id.is_some());
//! # });
//! ```

pub mod application;
pub mod approval;
mod base;
pub mod config;
pub mod donor;
pub mod error;
pub mod evidence;
pub mod ledger;
pub mod notify;
pub mod pipeline;
pub mod proof;
pub mod retry;
pub mod rewards;
pub mod saga;
pub mod store;
mod transaction;
mod words;

pub use application::{
    AdminApproval, AiApproval, CampaignApplication, CampaignDetails, Decision, DecisionLease,
    NewApplication, Organization, TrustScore,
};
pub use approval::ApprovalStateMachine;
pub use base::{
    ApplicationId, CampaignLedgerId, DonorId, DonorLedgerId, Email, NgoLedgerId, ProofReference,
    TransactionId,
};
pub use config::{PipelineConfig, RetryPolicy};
pub use donor::DonorResolver;
pub use error::{ConfigError, LedgerError, PipelineError, StoreError};
pub use evidence::{ContentAddressedStore, EvidenceStore};
pub use ledger::{InMemoryLedger, LedgerCall, LedgerClient, OperatorCredential};
pub use notify::{LogNotifier, Notification, Notifier};
pub use pipeline::{CampaignStats, Collaborators, DonorStats, Pipeline};
pub use proof::{ExtractedProof, PlainTextRecognizer, ProofExtractor, TextRecognizer};
pub use rewards::{
    Redemption, RewardAccount, RewardAccounts, RewardBalance, RewardEntry, RewardKind,
    RewardLedger,
};
pub use saga::{DonationReceipt, DonationRequest, DonationSaga};
pub use store::{InMemoryStore, Store, StoreCall};
pub use transaction::{DonorProfile, PaymentMethod, TransactionRecord, TransactionStatus};
pub use words::parse_number_words;
