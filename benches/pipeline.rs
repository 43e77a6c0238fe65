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

//! Benchmarks for receipt parsing, reward accrual and donation recording.
//!
//! Run with: cargo bench
//!
//! Benchmarks include:
//! - Receipt text parsing per receipt layout
//! - Reward crediting, single-threaded and parallel
//! - End-to-end donations against in-memory collaborators

use aidverify::proof::parse_receipt_text;
use aidverify::{
    CampaignDetails, Collaborators, Decision, DonationRequest, DonorId, Email, NewApplication,
    OperatorCredential, Organization, PaymentMethod, Pipeline, PipelineConfig, RewardAccounts,
    TransactionId, parse_number_words,
};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rayon::prelude::*;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU32, Ordering};

// =============================================================================
// Receipt Parsing
// =============================================================================

const RECEIPTS: [(&str, &str); 3] = [
    (
        "upi",
        "Payment Successful\n₹2,500\nPaid To: Helping Hands Trust\nUPI Ref. No: 4021 5566 7788\n12 Jan 2025, 10:42 AM",
    ),
    (
        "wallet",
        "Transaction Successful\nPaid to Asha Devi 9876543210\nRs. 1,00,000.00\nTxn ID: T2501121042\n03-Feb-2025 09:15 pm",
    ),
    (
        "words",
        "Donation receipt\nReceived with thanks Rupees Twelve Lakh Fifty Thousand Only\nReference: 998877",
    ),
];

fn bench_parse_receipt(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_receipt");
    for (layout, text) in RECEIPTS.iter() {
        group.bench_with_input(BenchmarkId::from_parameter(layout), text, |b, text| {
            b.iter(|| black_box(parse_receipt_text(black_box(text))))
        });
    }
    group.finish();
}

fn bench_number_words(c: &mut Criterion) {
    c.bench_function("number_words", |b| {
        b.iter(|| {
            black_box(parse_number_words(black_box(
                "ninety nine crore ninety nine lakh ninety nine thousand nine hundred ninety nine",
            )))
        })
    });
}

// =============================================================================
// Rewards
// =============================================================================

fn bench_reward_credits(c: &mut Criterion) {
    let mut group = c.benchmark_group("reward_credits");

    for count in [1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter(|| {
                let accounts = RewardAccounts::new();
                let donor = DonorId("donor-1".into());
                for i in 0..count {
                    let _ = accounts.credit(&donor, 2, "donation", &i.to_string());
                }
                black_box(accounts.balance(&donor).total);
            })
        });
    }
    group.finish();
}

fn bench_parallel_reward_credits(c: &mut Criterion) {
    let mut group = c.benchmark_group("parallel_reward_credits");

    for donors in [1u32, 100, 10_000].iter() {
        let count = 10_000u32;
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(donors), donors, |b, &donors| {
            b.iter(|| {
                let accounts = RewardAccounts::new();
                let counter = AtomicU32::new(0);

                (0..count).into_par_iter().for_each(|i| {
                    let reference = counter.fetch_add(1, Ordering::SeqCst);
                    let donor = DonorId(format!("donor-{}", i % donors));
                    let _ = accounts.credit(&donor, 2, "donation", &reference.to_string());
                });

                black_box(&accounts);
            })
        });
    }
    group.finish();
}

// =============================================================================
// End-to-End Donations
// =============================================================================

fn submission() -> NewApplication {
    NewApplication {
        organization: Organization {
            name: "Helping Hands".into(),
            registration_number: "REG-1".into(),
            website: "https://hands.example".into(),
            contact_person: "Asha".into(),
            email: Email::parse("ngo@hands.example").unwrap(),
            phone: "+91 90000 00000".into(),
        },
        campaign: CampaignDetails {
            title: "Flood relief".into(),
            description: "Relief kits".into(),
            location: "Assam".into(),
            goal_amount: Decimal::new(10_000_000, 0),
            start_date: None,
            end_date: None,
        },
    }
}

fn bench_donations(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("donations");

    for count in [100u32, 1_000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter(|| {
                runtime.block_on(async {
                    let pipeline = Pipeline::new(PipelineConfig::default(), Collaborators::in_memory());
                    let app = pipeline.submit_application(submission()).await.unwrap();
                    let signer = OperatorCredential::new("operator-key").unwrap();
                    let campaign = pipeline
                        .decide(app.id, Decision::Approved, &signer)
                        .await
                        .unwrap()
                        .campaign_ledger_id
                        .unwrap();

                    for i in 0..count {
                        let donor = format!("donor{}@example.com", i % 10);
                        let request = DonationRequest {
                            transaction_id: TransactionId::parse(&format!("4021{i:08}")).unwrap(),
                            amount: Decimal::new(500, 0),
                            campaign_id: campaign.clone(),
                            donor_id: DonorId(donor.clone()),
                            donor_email: Email::parse(&donor).unwrap(),
                            donor_name: "Ravi".into(),
                            payment_method: PaymentMethod::Upi,
                            receipt: format!("Paid ₹500\nUPI Ref. No: 4021{i:08}").into_bytes(),
                        };
                        pipeline.donate(request).await.unwrap();
                    }
                    black_box(pipeline.campaign_stats(&campaign).await.unwrap());
                })
            })
        });
    }
    group.finish();
}

criterion_group!(parsing, bench_parse_receipt, bench_number_words,);

criterion_group!(rewards, bench_reward_credits, bench_parallel_reward_credits,);

criterion_group!(end_to_end, bench_donations,);

criterion_main!(parsing, rewards, end_to_end);
