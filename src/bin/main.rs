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

use aidverify::{
    ApplicationId, CampaignDetails, Collaborators, Decision, DonationRequest, DonorId, Email,
    NewApplication, OperatorCredential, Organization, PaymentMethod, Pipeline, PipelineConfig,
    PipelineError, TransactionId, TrustScore, proof::parse_receipt_text,
};
use clap::{Parser, Subcommand};
use csv::{ReaderBuilder, Trim, Writer};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Donation pipeline tools
///
/// Extracts payment details from receipt text, or replays an operations file
/// through an in-memory pipeline and prints a campaign report.
#[derive(Parser, Debug)]
#[command(name = "aidverify")]
#[command(about = "Approval and donation reconciliation pipeline", long_about = None)]
struct Args {
    /// AI trust score (percent) an application must exceed to be verified
    #[arg(long, env = "AIDVERIFY_AI_TRUST_THRESHOLD", global = true)]
    ai_trust_threshold: Option<String>,

    /// Ledger attempts per call before giving up
    #[arg(long, env = "AIDVERIFY_LEDGER_MAX_ATTEMPTS", global = true)]
    ledger_max_attempts: Option<String>,

    /// Initial ledger retry backoff in milliseconds
    #[arg(long, env = "AIDVERIFY_LEDGER_BACKOFF_MS", global = true)]
    ledger_backoff_ms: Option<String>,

    /// Per-attempt ledger deadline in seconds
    #[arg(long, env = "AIDVERIFY_LEDGER_TIMEOUT_SECS", global = true)]
    ledger_timeout_secs: Option<String>,

    /// Donation amount per reward token
    #[arg(long, env = "AIDVERIFY_REWARD_UNIT", global = true)]
    reward_unit: Option<String>,

    /// Seconds an admin decision may hold its claim
    #[arg(long, env = "AIDVERIFY_DECISION_LEASE_SECS", global = true)]
    decision_lease_secs: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the payment details found in a recognized receipt text as JSON
    Extract {
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },
    /// Replay an operations CSV and print the resulting campaign report
    ///
    /// Expected format: type,ref,campaign,email,name,amount,score,receipt
    Replay {
        #[arg(value_name = "CSV")]
        input: PathBuf,
    },
}

impl Args {
    fn config(&self) -> Result<PipelineConfig, aidverify::ConfigError> {
        PipelineConfig::from_lookup(|key| {
            let value = match key {
                "AIDVERIFY_AI_TRUST_THRESHOLD" => self.ai_trust_threshold.as_ref(),
                "AIDVERIFY_LEDGER_MAX_ATTEMPTS" => self.ledger_max_attempts.as_ref(),
                "AIDVERIFY_LEDGER_BACKOFF_MS" => self.ledger_backoff_ms.as_ref(),
                "AIDVERIFY_LEDGER_TIMEOUT_SECS" => self.ledger_timeout_secs.as_ref(),
                "AIDVERIFY_REWARD_UNIT" => self.reward_unit.as_ref(),
                "AIDVERIFY_DECISION_LEASE_SECS" => self.decision_lease_secs.as_ref(),
                _ => None,
            };
            value.cloned()
        })
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = match args.config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            process::exit(2);
        }
    };

    match &args.command {
        Command::Extract { input } => {
            let text = match fs::read(input) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    eprintln!("Error reading file '{}': {}", input.display(), e);
                    process::exit(1);
                }
            };
            let proof = parse_receipt_text(&text);
            match serde_json::to_string_pretty(&proof) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("Error writing output: {e}");
                    process::exit(1);
                }
            }
        }
        Command::Replay { input } => {
            let file = match File::open(input) {
                Ok(f) => f,
                Err(e) => {
                    eprintln!("Error opening file '{}': {}", input.display(), e);
                    process::exit(1);
                }
            };

            let pipeline = Pipeline::new(config, Collaborators::in_memory());
            let replay = match replay_operations(&pipeline, BufReader::new(file)).await {
                Ok(replay) => replay,
                Err(e) => {
                    eprintln!("Error processing operations: {e}");
                    process::exit(1);
                }
            };

            if let Err(e) = write_report(&pipeline, &replay, std::io::stdout()).await {
                eprintln!("Error writing output: {e}");
                process::exit(1);
            }
        }
    }
}

/// Raw CSV record of the operations file.
///
/// Fields: `type, ref, campaign, email, name, amount, score, receipt`
#[derive(Debug, Deserialize)]
struct OperationRecord {
    #[serde(rename = "type")]
    op_type: String,
    #[serde(rename = "ref")]
    reference: String,
    #[serde(default)]
    campaign: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    name: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    amount: Option<Decimal>,
    #[serde(default)]
    score: String,
    #[serde(default)]
    receipt: String,
}

/// Application labels used by the operations file, in first-seen order.
#[derive(Debug, Default)]
struct Replay {
    labels: Vec<(String, ApplicationId)>,
    by_label: HashMap<String, ApplicationId>,
}

impl Replay {
    fn application(&self, label: &str) -> Result<ApplicationId, PipelineError> {
        self.by_label
            .get(label)
            .copied()
            .ok_or(PipelineError::ApplicationNotFound)
    }
}

fn required_amount(record: &OperationRecord) -> Result<Decimal, PipelineError> {
    record
        .amount
        .ok_or_else(|| PipelineError::Validation("amount is required".to_string()))
}

async fn apply_operation(
    pipeline: &Pipeline,
    replay: &mut Replay,
    signer: &OperatorCredential,
    record: OperationRecord,
) -> Result<(), PipelineError> {
    match record.op_type.to_lowercase().as_str() {
        "apply" => {
            if replay.by_label.contains_key(&record.reference) {
                return Err(PipelineError::Validation(format!(
                    "application label {:?} reused",
                    record.reference
                )));
            }
            let submission = NewApplication {
                organization: Organization {
                    name: record.name.clone(),
                    registration_number: String::new(),
                    website: String::new(),
                    contact_person: record.name.clone(),
                    email: Email::parse(&record.email)?,
                    phone: String::new(),
                },
                campaign: CampaignDetails {
                    title: record.campaign.clone(),
                    description: String::new(),
                    location: String::new(),
                    goal_amount: required_amount(&record)?,
                    start_date: None,
                    end_date: None,
                },
            };
            let app = pipeline.submit_application(submission).await?;
            replay.labels.push((record.reference.clone(), app.id));
            replay.by_label.insert(record.reference, app.id);
        }
        "ai" => {
            let id = replay.application(&record.reference)?;
            pipeline
                .record_ai_verdict(id, TrustScore::parse(&record.score)?)
                .await?;
        }
        "approve" | "reject" => {
            let id = replay.application(&record.reference)?;
            let decision: Decision = record.op_type.parse()?;
            pipeline.decide(id, decision, signer).await?;
        }
        "donate" => {
            let id = replay.application(&record.campaign)?;
            let campaign_id = pipeline
                .approvals()
                .application(id)
                .await?
                .campaign_ledger_id
                .ok_or(PipelineError::CampaignNotFound)?;
            let donor_email = Email::parse(&record.email)?;
            pipeline
                .donate(DonationRequest {
                    transaction_id: TransactionId::parse(&record.reference)?,
                    amount: required_amount(&record)?,
                    campaign_id,
                    donor_id: DonorId(donor_email.to_string()),
                    donor_email,
                    donor_name: record.name,
                    payment_method: PaymentMethod::default(),
                    receipt: record.receipt.into_bytes(),
                })
                .await?;
        }
        "redeem" => {
            let donor = DonorId(Email::parse(&record.email)?.to_string());
            let tokens = required_amount(&record)?
                .to_string()
                .parse::<u64>()
                .map_err(|_| PipelineError::Validation("tokens must be a whole number".to_string()))?;
            pipeline.redeem(&donor, tokens, "redemption").await?;
        }
        other => {
            return Err(PipelineError::Validation(format!(
                "unknown operation {other:?}"
            )));
        }
    }
    Ok(())
}

/// Replays operations from a CSV reader against `pipeline`.
///
/// Rows that fail to parse or whose operation fails are logged and skipped.
///
/// # CSV Format
///
/// ```csv
/// type,ref,campaign,email,name,amount,score,receipt
/// apply,A1,Flood relief,ngo@hands.org,Helping Hands,50000,,
/// ai,A1,,,,,45%,
/// approve,A1,,,,,,
/// donate,UPI1001,A1,donor@x.org,Ravi,500,,Paid ₹500 To: Helping Hands
/// redeem,,,donor@x.org,,5,,
/// ```
///
/// # Errors
///
/// Returns a CSV error only if the header cannot be read.
async fn replay_operations<R: Read>(pipeline: &Pipeline, reader: R) -> Result<Replay, csv::Error> {
    let mut replay = Replay::default();
    let signer = OperatorCredential::new("replay-operator")
        .map_err(|e| csv::Error::from(std::io::Error::other(e.to_string())))?;

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);
    rdr.headers()?;

    for (line, result) in rdr.deserialize::<OperationRecord>().enumerate() {
        let row = line + 2;
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!(row, error = %e, "skipping malformed row");
                continue;
            }
        };
        let op = record.op_type.clone();
        if let Err(e) = apply_operation(pipeline, &mut replay, &signer, record).await {
            warn!(row, op = %op, error = %e, "skipping failed operation");
        }
    }

    info!(applications = replay.labels.len(), "replay finished");
    Ok(replay)
}

/// One line of the campaign report.
#[derive(Debug, Serialize)]
struct ReportRow {
    application: String,
    title: String,
    campaign: String,
    goal: Decimal,
    received: Decimal,
    listed: bool,
}

/// Writes one row per replayed application.
///
/// Columns: `application, title, campaign, goal, received, listed`
async fn write_report<W: Write>(
    pipeline: &Pipeline,
    replay: &Replay,
    writer: W,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut wtr = Writer::from_writer(writer);
    for (label, id) in &replay.labels {
        let app = pipeline.approvals().application(*id).await?;
        wtr.serialize(ReportRow {
            application: label.clone(),
            title: app.campaign.title.clone(),
            campaign: app
                .campaign_ledger_id
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
            goal: app.campaign.goal_amount,
            received: app.received_amount,
            listed: app.is_publicly_listed(),
        })?;
    }
    wtr.flush()?;
    Ok(())
}
