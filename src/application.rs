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

//! Campaign application records and approval states.
//!
//! Admin and AI approval are independent axes:
//!
//! ```text
//!  admin:  Pending ──decide(approved)──► Approved   (write-once, carries ledger ids)
//!             │
//!             └────decide(rejected)──► Rejected   (write-once)
//!
//!  ai:     Pending ──verdict──► Verified | Rejected  (may be overwritten by a later pass)
//! ```
//!
//! Only the admin axis gates ledger registration. The AI axis only affects
//! public listing eligibility.

use crate::base::{ApplicationId, CampaignLedgerId, Email, NgoLedgerId};
use crate::error::PipelineError;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminApproval {
    Pending,
    Approved,
    Rejected,
}

impl AdminApproval {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for AdminApproval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiApproval {
    Pending,
    Verified,
    Rejected,
}

impl fmt::Display for AiApproval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Rejected => "rejected",
        })
    }
}

/// An admin's decision on a pending application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approved,
    Rejected,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        })
    }
}

impl std::str::FromStr for Decision {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "approved" | "approve" => Ok(Self::Approved),
            "rejected" | "reject" => Ok(Self::Rejected),
            other => Err(PipelineError::Validation(format!(
                "invalid admin decision: {other:?}"
            ))),
        }
    }
}

/// AI reviewer trust score as a whole percentage (0..=100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrustScore(u8);

impl TrustScore {
    pub fn new(percent: u8) -> Result<Self, PipelineError> {
        if percent > 100 {
            return Err(PipelineError::Validation(format!(
                "trust score must be between 0 and 100, got {percent}"
            )));
        }
        Ok(Self(percent))
    }

    /// Parses the reviewer's textual form, e.g. `"45%"` or `" 45 "`.
    pub fn parse(raw: &str) -> Result<Self, PipelineError> {
        let digits = raw.trim().trim_end_matches('%').trim();
        let percent = digits.parse::<u8>().map_err(|_| {
            PipelineError::Validation(format!("invalid trust score: {:?}", raw.trim()))
        })?;
        Self::new(percent)
    }

    pub fn percent(self) -> u8 {
        self.0
    }

    /// Scores strictly above `threshold` verify the application.
    pub fn verdict(self, threshold: u8) -> AiApproval {
        if self.0 > threshold {
            AiApproval::Verified
        } else {
            AiApproval::Rejected
        }
    }
}

/// Submitting organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub name: String,
    pub registration_number: String,
    pub website: String,
    pub contact_person: String,
    pub email: Email,
    pub phone: String,
}

/// Public campaign content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignDetails {
    pub title: String,
    pub description: String,
    pub location: String,
    pub goal_amount: Decimal,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

/// A submission awaiting storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewApplication {
    pub organization: Organization,
    pub campaign: CampaignDetails,
}

impl NewApplication {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.organization.name.trim().is_empty() {
            return Err(PipelineError::Validation(
                "organization name is required".to_string(),
            ));
        }
        if self.campaign.title.trim().is_empty() {
            return Err(PipelineError::Validation(
                "campaign title is required".to_string(),
            ));
        }
        if self.campaign.goal_amount <= Decimal::ZERO {
            return Err(PipelineError::Validation(
                "goal amount must be positive".to_string(),
            ));
        }
        if let (Some(start), Some(end)) = (self.campaign.start_date, self.campaign.end_date) {
            if end < start {
                return Err(PipelineError::Validation(
                    "campaign ends before it starts".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Time-limited claim on an application's admin decision.
///
/// A lease past `expires_at` no longer blocks a new claim, so a decision
/// abandoned by a crashed process frees the application on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionLease {
    pub token: u64,
    pub expires_at: DateTime<Utc>,
}

impl DecisionLease {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// A stored campaign application.
///
/// # Invariants
///
/// - `campaign_ledger_id.is_some()` iff `admin_approval == Approved`.
/// - Ledger ids are written once, together with the approval.
/// - `received_amount` never decreases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignApplication {
    pub id: ApplicationId,
    pub organization: Organization,
    pub campaign: CampaignDetails,
    pub admin_approval: AdminApproval,
    pub ai_approval: AiApproval,
    /// Claim that holds, or took, the admin decision.
    pub decision_lease: Option<DecisionLease>,
    pub ngo_ledger_id: Option<NgoLedgerId>,
    pub campaign_ledger_id: Option<CampaignLedgerId>,
    pub received_amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CampaignApplication {
    pub fn new(id: ApplicationId, submission: NewApplication, now: DateTime<Utc>) -> Self {
        Self {
            id,
            organization: submission.organization,
            campaign: submission.campaign,
            admin_approval: AdminApproval::Pending,
            ai_approval: AiApproval::Pending,
            decision_lease: None,
            ngo_ledger_id: None,
            campaign_ledger_id: None,
            received_amount: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    /// Admin-approved and AI-verified.
    pub fn is_publicly_listed(&self) -> bool {
        self.admin_approval == AdminApproval::Approved && self.ai_approval == AiApproval::Verified
    }

    /// Whether an undecided application is held by a live decision claim.
    pub fn is_claimed(&self, now: DateTime<Utc>) -> bool {
        !self.admin_approval.is_terminal()
            && self.decision_lease.is_some_and(|lease| lease.is_live(now))
    }

    /// Checks the approval/ledger-id invariant.
    pub fn is_consistent(&self) -> bool {
        let approved = self.admin_approval == AdminApproval::Approved;
        approved == self.campaign_ledger_id.is_some() && approved == self.ngo_ledger_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trust_score_parses_percent_strings() {
        assert_eq!(TrustScore::parse("45%").unwrap().percent(), 45);
        assert_eq!(TrustScore::parse(" 5 % ").unwrap().percent(), 5);
        assert_eq!(TrustScore::parse("100").unwrap().percent(), 100);
        assert!(TrustScore::parse("101%").is_err());
        assert!(TrustScore::parse("high").is_err());
        assert!(TrustScore::parse("-3%").is_err());
    }

    #[test]
    fn threshold_is_exclusive() {
        assert_eq!(TrustScore::new(40).unwrap().verdict(40), AiApproval::Rejected);
        assert_eq!(TrustScore::new(41).unwrap().verdict(40), AiApproval::Verified);
        assert_eq!(TrustScore::new(0).unwrap().verdict(0), AiApproval::Rejected);
    }

    #[test]
    fn decision_from_str() {
        assert_eq!("approved".parse::<Decision>().unwrap(), Decision::Approved);
        assert_eq!(" Reject ".parse::<Decision>().unwrap(), Decision::Rejected);
        assert!("maybe".parse::<Decision>().is_err());
    }

    #[test]
    fn expired_lease_no_longer_claims() {
        let now = Utc::now();
        let lease = DecisionLease {
            token: 1,
            expires_at: now + chrono::Duration::seconds(30),
        };
        assert!(lease.is_live(now));
        assert!(!lease.is_live(now + chrono::Duration::seconds(31)));
    }

    #[test]
    fn terminal_admin_states() {
        assert!(!AdminApproval::Pending.is_terminal());
        assert!(AdminApproval::Approved.is_terminal());
        assert!(AdminApproval::Rejected.is_terminal());
    }
}
