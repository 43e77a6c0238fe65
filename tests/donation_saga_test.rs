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

//! Donation recording against an in-memory ledger and database with
//! injected faults.

mod common;

use aidverify::{
    CampaignLedgerId, Collaborators, DonorId, LedgerCall, LedgerError, Pipeline, PipelineConfig,
    PipelineError, PlainTextRecognizer, StoreCall, TransactionId, TransactionStatus,
};
use common::{approved_campaign, donation, email, fast_config, harness, harness_with, receipt};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

fn tx(raw: &str) -> TransactionId {
    TransactionId::parse(raw).unwrap()
}

#[tokio::test]
async fn donation_is_recorded_end_to_end() {
    let h = harness();
    let (_, campaign) = approved_campaign(&h, "ngo@hands.org", dec!(10000)).await;

    let receipt = h
        .pipeline
        .donate(donation("402155667788", &campaign, "ravi@example.com", dec!(500)))
        .await
        .unwrap();

    let record = &receipt.transaction;
    assert_eq!(record.status, TransactionStatus::Completed);
    assert_eq!(record.amount, dec!(500));
    assert!(record.proof.as_str().starts_with("sha256:"));
    assert!(h.evidence.get(&record.proof).is_some());
    assert_eq!(receipt.campaign_received, Some(dec!(500)));
    assert_eq!(receipt.tokens_awarded, Some(5));

    let stored = h.pipeline.transaction(&tx("402155667788")).await.unwrap();
    assert_eq!(stored.as_ref(), Some(record));
    assert_eq!(h.ledger.donation_count(), 1);

    let on_ledger = h
        .pipeline
        .ledger_donations_by_donor(&email("ravi@example.com"))
        .await
        .unwrap();
    assert_eq!(on_ledger.len(), 1);
    assert_eq!(on_ledger[0].donor_id, record.donor_ledger_id);
    assert_eq!(on_ledger[0].proof, record.proof);

    let balance = h
        .pipeline
        .reward_balance(&DonorId("ravi@example.com".into()))
        .await
        .unwrap();
    assert_eq!(balance.total, 5);
}

#[tokio::test]
async fn resubmitting_a_recorded_transaction_is_rejected() {
    let h = harness();
    let (_, campaign) = approved_campaign(&h, "ngo@hands.org", dec!(10000)).await;
    let request = donation("402155667788", &campaign, "ravi@example.com", dec!(500));

    h.pipeline.donate(request.clone()).await.unwrap();
    let again = h.pipeline.donate(request).await;

    assert_eq!(again.unwrap_err(), PipelineError::DuplicateTransaction);
    assert_eq!(h.ledger.calls(LedgerCall::RecordDonation), 1);
    let stats = h.pipeline.campaign_stats(&campaign).await.unwrap();
    assert_eq!(stats.received, dec!(500));
}

#[tokio::test]
async fn mismatched_receipt_writes_nothing() {
    let h = harness();
    let (_, campaign) = approved_campaign(&h, "ngo@hands.org", dec!(10000)).await;
    let mut request = donation("402155667788", &campaign, "ravi@example.com", dec!(1000));
    request.receipt = receipt(dec!(100), "402155667788");

    let result = h.pipeline.donate(request).await;

    assert_eq!(
        result.unwrap_err(),
        PipelineError::ProofMismatch {
            claimed: dec!(1000),
            extracted: Some(dec!(100)),
        }
    );
    assert_eq!(h.ledger.calls(LedgerCall::FindDonor), 0);
    assert_eq!(h.ledger.calls(LedgerCall::RecordDonation), 0);
    assert_eq!(h.store.transaction_count(), 0);
    assert!(h.evidence.is_empty());
}

#[tokio::test]
async fn unreadable_receipt_is_a_mismatch() {
    let h = harness();
    let (_, campaign) = approved_campaign(&h, "ngo@hands.org", dec!(10000)).await;
    let mut request = donation("402155667788", &campaign, "ravi@example.com", dec!(500));
    request.receipt = vec![0xff, 0xd8, 0xff, 0xe0, 0x00, 0x10];

    let result = h.pipeline.donate(request).await;

    assert_eq!(
        result.unwrap_err(),
        PipelineError::ProofMismatch {
            claimed: dec!(500),
            extracted: None,
        }
    );
}

#[tokio::test]
async fn receipt_in_words_is_accepted() {
    let h = harness();
    let (_, campaign) = approved_campaign(&h, "ngo@hands.org", dec!(10000)).await;
    let mut request = donation("402155667788", &campaign, "ravi@example.com", dec!(1500));
    request.receipt = b"Donation receipt\nReceived with thanks Rupees One Thousand Five Hundred Only\nRef: 402155667788"
        .to_vec();

    let receipt = h.pipeline.donate(request).await.unwrap();
    assert_eq!(receipt.transaction.amount, dec!(1500));
}

#[tokio::test]
async fn invalid_requests_fail_validation() {
    let h = harness();
    let (_, campaign) = approved_campaign(&h, "ngo@hands.org", dec!(10000)).await;

    let mut zero = donation("402155667788", &campaign, "ravi@example.com", dec!(500));
    zero.amount = Decimal::ZERO;
    let mut no_receipt = donation("402155667789", &campaign, "ravi@example.com", dec!(500));
    no_receipt.receipt.clear();
    let mut no_name = donation("402155667790", &campaign, "ravi@example.com", dec!(500));
    no_name.donor_name = "  ".into();

    for request in [zero, no_receipt, no_name] {
        let result = h.pipeline.donate(request).await;
        assert!(matches!(result, Err(PipelineError::Validation(_))));
    }
    assert_eq!(h.ledger.calls(LedgerCall::RecordDonation), 0);
}

#[tokio::test]
async fn unknown_campaign_is_rejected() {
    let h = harness();
    let campaign = CampaignLedgerId("0xdeadbeef".into());

    let result = h
        .pipeline
        .donate(donation("402155667788", &campaign, "ravi@example.com", dec!(500)))
        .await;

    assert_eq!(result.unwrap_err(), PipelineError::CampaignNotFound);
    assert_eq!(h.ledger.calls(LedgerCall::RecordDonation), 0);
}

#[tokio::test]
async fn ledger_timeouts_are_retried() {
    let h = harness();
    let (_, campaign) = approved_campaign(&h, "ngo@hands.org", dec!(10000)).await;
    h.ledger
        .fail_next(LedgerCall::RecordDonation, 2, LedgerError::Timeout);

    let receipt = h
        .pipeline
        .donate(donation("402155667788", &campaign, "ravi@example.com", dec!(500)))
        .await
        .unwrap();

    assert_eq!(receipt.campaign_received, Some(dec!(500)));
    assert_eq!(h.ledger.calls(LedgerCall::RecordDonation), 3);
    assert_eq!(h.ledger.donation_count(), 1);
}

#[tokio::test]
async fn exhausted_ledger_records_nothing() {
    let h = harness();
    let (_, campaign) = approved_campaign(&h, "ngo@hands.org", dec!(10000)).await;
    h.ledger
        .fail_next(LedgerCall::RecordDonation, 3, LedgerError::Timeout);
    let request = donation("402155667788", &campaign, "ravi@example.com", dec!(500));

    let result = h.pipeline.donate(request.clone()).await;

    let err = result.unwrap_err();
    assert!(matches!(err, PipelineError::LedgerUnavailable(_)));
    assert!(err.is_retryable());
    assert_eq!(h.store.transaction_count(), 0);
    assert_eq!(h.ledger.donation_count(), 0);
    let stats = h.pipeline.campaign_stats(&campaign).await.unwrap();
    assert_eq!(stats.received, dec!(0));

    // The donor may simply try again.
    h.pipeline.donate(request).await.unwrap();
    assert_eq!(h.store.transaction_count(), 1);
}

#[tokio::test]
async fn lost_ledger_confirmation_is_reconciled() {
    let h = harness();
    let (_, campaign) = approved_campaign(&h, "ngo@hands.org", dec!(10000)).await;
    h.ledger.lose_ack_next(LedgerCall::RecordDonation);

    let receipt = h
        .pipeline
        .donate(donation("402155667788", &campaign, "ravi@example.com", dec!(500)))
        .await
        .unwrap();

    assert_eq!(receipt.campaign_received, Some(dec!(500)));
    assert_eq!(h.ledger.donation_count(), 1);
    assert_eq!(h.ledger.calls(LedgerCall::FindDonation), 1);
    assert_eq!(h.store.transaction_count(), 1);
}

#[tokio::test]
async fn failed_persist_is_reconciled_on_resubmission() {
    let h = harness();
    let (_, campaign) = approved_campaign(&h, "ngo@hands.org", dec!(10000)).await;
    h.store.fail_next(StoreCall::InsertTransaction, 3);
    let request = donation("402155667788", &campaign, "ravi@example.com", dec!(500));

    let first = h.pipeline.donate(request.clone()).await;
    let err = first.unwrap_err();
    assert!(matches!(err, PipelineError::RecordingIncomplete(_)));
    assert!(err.is_retryable());
    assert!(err.user_message().contains("resubmit"));
    assert_eq!(h.ledger.donation_count(), 1);
    assert_eq!(h.store.transaction_count(), 0);

    let receipt = h.pipeline.donate(request).await.unwrap();
    assert_eq!(receipt.campaign_received, Some(dec!(500)));
    assert_eq!(receipt.tokens_awarded, Some(5));
    assert_eq!(h.ledger.donation_count(), 1);
    assert_eq!(h.store.transaction_count(), 1);
}

#[tokio::test]
async fn foreign_ledger_entry_is_a_duplicate() {
    let h = harness();
    let (_, campaign) = approved_campaign(&h, "ngo@hands.org", dec!(10000)).await;
    h.store.fail_next(StoreCall::InsertTransaction, 3);
    let _ = h
        .pipeline
        .donate(donation("402155667788", &campaign, "ravi@example.com", dec!(500)))
        .await;

    // Same transaction id, different donor: not the same donation.
    let result = h
        .pipeline
        .donate(donation("402155667788", &campaign, "meera@example.com", dec!(500)))
        .await;

    assert_eq!(result.unwrap_err(), PipelineError::DuplicateTransaction);
    assert_eq!(h.store.transaction_count(), 0);
}

#[tokio::test]
async fn aggregate_failure_does_not_fail_donation() {
    let h = harness();
    let (_, campaign) = approved_campaign(&h, "ngo@hands.org", dec!(10000)).await;
    h.store.fail_next(StoreCall::IncrementReceived, 3);

    let receipt = h
        .pipeline
        .donate(donation("402155667788", &campaign, "ravi@example.com", dec!(500)))
        .await
        .unwrap();

    assert_eq!(receipt.campaign_received, None);
    assert_eq!(receipt.tokens_awarded, Some(5));
    assert_eq!(h.store.transaction_count(), 1);
}

#[tokio::test]
async fn missed_aggregate_is_applied_on_resubmission() {
    let h = harness();
    let (_, campaign) = approved_campaign(&h, "ngo@hands.org", dec!(10000)).await;
    h.store.fail_next(StoreCall::IncrementReceived, 3);
    let request = donation("402155667788", &campaign, "ravi@example.com", dec!(500));

    let receipt = h.pipeline.donate(request.clone()).await.unwrap();
    assert_eq!(receipt.campaign_received, None);
    assert_eq!(h.pipeline.campaign_stats(&campaign).await.unwrap().received, dec!(0));

    let again = h.pipeline.donate(request.clone()).await;
    assert_eq!(again.unwrap_err(), PipelineError::DuplicateTransaction);
    assert_eq!(h.pipeline.campaign_stats(&campaign).await.unwrap().received, dec!(500));

    // Further resubmissions do not count it twice.
    let _ = h.pipeline.donate(request).await;
    assert_eq!(h.pipeline.campaign_stats(&campaign).await.unwrap().received, dec!(500));
    assert_eq!(h.ledger.donation_count(), 1);
}

#[tokio::test]
async fn lost_aggregate_ack_counts_once() {
    let h = harness();
    let (_, campaign) = approved_campaign(&h, "ngo@hands.org", dec!(10000)).await;
    h.store.lose_ack_next(StoreCall::IncrementReceived);

    let receipt = h
        .pipeline
        .donate(donation("402155667788", &campaign, "ravi@example.com", dec!(500)))
        .await
        .unwrap();

    assert_eq!(receipt.campaign_received, Some(dec!(500)));
    let stats = h.pipeline.campaign_stats(&campaign).await.unwrap();
    assert_eq!(stats.received, dec!(500));
}

#[tokio::test]
async fn rewards_outlive_the_pipeline() {
    let h = harness();
    let (_, campaign) = approved_campaign(&h, "ngo@hands.org", dec!(10000)).await;
    h.pipeline
        .donate(donation("402155667788", &campaign, "ravi@example.com", dec!(500)))
        .await
        .unwrap();
    let donor = DonorId("ravi@example.com".into());

    let restarted = Pipeline::new(
        fast_config(),
        Collaborators {
            store: h.store.clone(),
            ledger: h.ledger.clone(),
            evidence: h.evidence.clone(),
            recognizer: Arc::new(PlainTextRecognizer),
            notifier: h.notifier.clone(),
        },
    );

    assert_eq!(restarted.reward_balance(&donor).await.unwrap().total, 5);
    restarted.redeem(&donor, 2, "badge").await.unwrap();
    assert_eq!(h.pipeline.reward_balance(&donor).await.unwrap().total, 3);
}

#[tokio::test]
async fn reward_failure_does_not_fail_donation() {
    let h = harness_with(PipelineConfig {
        reward_unit: Decimal::new(1, 28),
        ..fast_config()
    });
    let (_, campaign) = approved_campaign(&h, "ngo@hands.org", dec!(10000)).await;

    let receipt = h
        .pipeline
        .donate(donation("402155667788", &campaign, "ravi@example.com", dec!(500)))
        .await
        .unwrap();

    assert_eq!(receipt.tokens_awarded, None);
    assert_eq!(receipt.campaign_received, Some(dec!(500)));
}

#[tokio::test]
async fn evidence_failure_stops_before_the_ledger() {
    let h = harness();
    let (_, campaign) = approved_campaign(&h, "ngo@hands.org", dec!(10000)).await;
    h.evidence.fail_next(1);

    let result = h
        .pipeline
        .donate(donation("402155667788", &campaign, "ravi@example.com", dec!(500)))
        .await;

    assert!(matches!(result, Err(PipelineError::Storage(_))));
    assert_eq!(h.ledger.calls(LedgerCall::RecordDonation), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submissions_of_one_transaction_yield_one_winner() {
    let h = harness();
    let (_, campaign) = approved_campaign(&h, "ngo@hands.org", dec!(10000)).await;
    h.ledger.set_latency(Duration::from_millis(10));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pipeline = Arc::clone(&h.pipeline);
        let request = donation("402155667788", &campaign, "ravi@example.com", dec!(500));
        handles.push(tokio::spawn(async move { pipeline.donate(request).await }));
    }

    let mut recorded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => recorded += 1,
            Err(e) => assert_eq!(e, PipelineError::DuplicateTransaction),
        }
    }
    assert_eq!(recorded, 1);
    assert_eq!(h.ledger.donation_count(), 1);
    let stats = h.pipeline.campaign_stats(&campaign).await.unwrap();
    assert_eq!(stats.received, dec!(500));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_donations_sum_exactly() {
    let h = harness();
    let (_, campaign) = approved_campaign(&h, "ngo@hands.org", dec!(100000)).await;

    let amounts = [dec!(100), dec!(250.50), dec!(999.99), dec!(1), dec!(5000), dec!(42.10)];
    let mut handles = Vec::new();
    for (i, amount) in amounts.iter().enumerate() {
        let pipeline = Arc::clone(&h.pipeline);
        let request = donation(
            &format!("40215566{i:04}"),
            &campaign,
            &format!("donor{}@example.com", i % 2),
            *amount,
        );
        handles.push(tokio::spawn(async move { pipeline.donate(request).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let expected: Decimal = amounts.iter().sum();
    let stats = h.pipeline.campaign_stats(&campaign).await.unwrap();
    assert_eq!(stats.received, expected);
    let recorded: Decimal = h
        .pipeline
        .transactions_by_campaign(&campaign)
        .await
        .unwrap()
        .iter()
        .map(|record| record.amount)
        .sum();
    assert_eq!(recorded, expected);
    assert_eq!(h.ledger.donor_records(&email("donor0@example.com")), 1);
    assert_eq!(h.ledger.donor_records(&email("donor1@example.com")), 1);
}

#[tokio::test]
async fn campaign_stats_report_progress() {
    let h = harness();
    let (application, campaign) = approved_campaign(&h, "ngo@hands.org", dec!(3000)).await;
    h.pipeline
        .donate(donation("402155667788", &campaign, "ravi@example.com", dec!(1000)))
        .await
        .unwrap();

    let stats = h.pipeline.campaign_stats(&campaign).await.unwrap();

    assert_eq!(stats.application, application);
    assert_eq!(stats.goal, dec!(3000));
    assert_eq!(stats.received, dec!(1000));
    assert_eq!(stats.percentage, dec!(33.33));

    let missing = h
        .pipeline
        .campaign_stats(&CampaignLedgerId("0xmissing".into()))
        .await;
    assert_eq!(missing.unwrap_err(), PipelineError::CampaignNotFound);
}

#[tokio::test]
async fn donor_stats_cover_all_campaigns() {
    let h = harness();
    let (_, flood) = approved_campaign(&h, "ngo@hands.org", dec!(3000)).await;
    let (_, water) = approved_campaign(&h, "ngo@water.org", dec!(3000)).await;
    for (tx, campaign, amount) in [
        ("402155660001", &flood, dec!(100)),
        ("402155660002", &flood, dec!(200)),
        ("402155660003", &water, dec!(300)),
    ] {
        h.pipeline
            .donate(donation(tx, campaign, "ravi@example.com", amount))
            .await
            .unwrap();
    }

    let donor = DonorId("ravi@example.com".into());
    let stats = h.pipeline.donor_stats(&donor).await.unwrap();
    assert_eq!(stats.total_amount, dec!(600));
    assert_eq!(stats.donations, 3);
    assert_eq!(stats.campaigns, 2);
    assert_eq!(h.pipeline.transactions_by_donor(&donor).await.unwrap().len(), 3);

    let unknown = h
        .pipeline
        .donor_stats(&DonorId("nobody@example.com".into()))
        .await
        .unwrap();
    assert_eq!(unknown.donations, 0);
    assert_eq!(unknown.total_amount, dec!(0));
}

#[tokio::test]
async fn earned_tokens_can_be_redeemed() {
    let h = harness();
    let (_, campaign) = approved_campaign(&h, "ngo@hands.org", dec!(10000)).await;
    h.pipeline
        .donate(donation("402155667788", &campaign, "ravi@example.com", dec!(750)))
        .await
        .unwrap();
    let donor = DonorId("ravi@example.com".into());

    let balance = h.pipeline.redeem(&donor, 5, "badge").await.unwrap();
    assert_eq!(balance.total, 2);
    assert_eq!(balance.redeemed, 5);

    let overdraw = h.pipeline.redeem(&donor, 3, "badge").await;
    assert_eq!(
        overdraw.unwrap_err(),
        PipelineError::InsufficientBalance {
            requested: 3,
            available: 2,
        }
    );
}
