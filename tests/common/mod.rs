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

//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use aidverify::{
    ApplicationId, CampaignDetails, CampaignLedgerId, Collaborators, ContentAddressedStore,
    Decision, DonationRequest, DonorId, Email, InMemoryLedger, InMemoryStore, LogNotifier,
    NewApplication, OperatorCredential, Organization, PaymentMethod, Pipeline, PipelineConfig,
    PlainTextRecognizer, RetryPolicy, TransactionId,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

/// Retry policy with millisecond backoff so failure paths finish quickly.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        attempt_timeout: Duration::from_secs(2),
    }
}

pub fn fast_config() -> PipelineConfig {
    PipelineConfig {
        ledger_retry: fast_retry(),
        store_retry: fast_retry(),
        ..PipelineConfig::default()
    }
}

/// A pipeline over in-memory collaborators, with handles for fault injection.
pub struct Harness {
    pub pipeline: Arc<Pipeline>,
    pub ledger: Arc<InMemoryLedger>,
    pub store: Arc<InMemoryStore>,
    pub evidence: Arc<ContentAddressedStore>,
    pub notifier: Arc<LogNotifier>,
}

pub fn harness() -> Harness {
    harness_with(fast_config())
}

pub fn harness_with(config: PipelineConfig) -> Harness {
    let ledger = Arc::new(InMemoryLedger::new());
    let store = Arc::new(InMemoryStore::new());
    let evidence = Arc::new(ContentAddressedStore::new());
    let notifier = Arc::new(LogNotifier::new());
    let pipeline = Pipeline::new(
        config,
        Collaborators {
            store: store.clone(),
            ledger: ledger.clone(),
            evidence: evidence.clone(),
            recognizer: Arc::new(PlainTextRecognizer),
            notifier: notifier.clone(),
        },
    );
    Harness {
        pipeline: Arc::new(pipeline),
        ledger,
        store,
        evidence,
        notifier,
    }
}

pub fn email(raw: &str) -> Email {
    Email::parse(raw).unwrap()
}

pub fn signer() -> OperatorCredential {
    OperatorCredential::new("operator-key").unwrap()
}

pub fn submission(org_email: &str, title: &str, goal: Decimal) -> NewApplication {
    NewApplication {
        organization: Organization {
            name: "Helping Hands".into(),
            registration_number: "REG-2024-001".into(),
            website: "https://hands.example".into(),
            contact_person: "Asha Rao".into(),
            email: email(org_email),
            phone: "+91 90000 00000".into(),
        },
        campaign: CampaignDetails {
            title: title.into(),
            description: "Relief kits for affected families".into(),
            location: "Guwahati, Assam".into(),
            goal_amount: goal,
            start_date: None,
            end_date: None,
        },
    }
}

/// Submits and approves a campaign, returning its application and ledger ids.
pub async fn approved_campaign(
    h: &Harness,
    org_email: &str,
    goal: Decimal,
) -> (ApplicationId, CampaignLedgerId) {
    let app = h
        .pipeline
        .submit_application(submission(org_email, "Flood relief", goal))
        .await
        .unwrap();
    let approved = h
        .pipeline
        .decide(app.id, Decision::Approved, &signer())
        .await
        .unwrap();
    (app.id, approved.campaign_ledger_id.unwrap())
}

/// Receipt text as a UPI app renders it.
pub fn receipt(amount: Decimal, reference: &str) -> Vec<u8> {
    format!(
        "Payment Successful\n₹{amount}\nPaid To: Helping Hands Trust\n\
         UPI Ref. No: {reference}\n12 Jan 2025, 10:42 AM"
    )
    .into_bytes()
}

pub fn donation(
    tx: &str,
    campaign: &CampaignLedgerId,
    donor_email: &str,
    amount: Decimal,
) -> DonationRequest {
    DonationRequest {
        transaction_id: TransactionId::parse(tx).unwrap(),
        amount,
        campaign_id: campaign.clone(),
        donor_id: DonorId(donor_email.to_string()),
        donor_email: email(donor_email),
        donor_name: "Ravi Kumar".into(),
        payment_method: PaymentMethod::Upi,
        receipt: receipt(amount, tx),
    }
}
