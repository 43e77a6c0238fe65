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

//! Error types for the approval and donation pipeline.
//!
//! [`PipelineError`] is the only error exposed by pipeline operations.
//! Collaborator failures ([`LedgerError`], [`StoreError`]) are converted into
//! it at the component boundary.

use rust_decimal::Decimal;
use thiserror::Error;

/// Pipeline operation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// Malformed or missing input, caught before any external call
    #[error("validation failed: {0}")]
    Validation(String),

    /// A donation with this transaction id was already recorded or is in flight
    #[error("duplicate transaction ID")]
    DuplicateTransaction,

    /// Receipt evidence does not support the claimed amount
    #[error("payment proof does not match claimed amount {claimed} (extracted: {})", display_amount(.extracted))]
    ProofMismatch {
        claimed: Decimal,
        extracted: Option<Decimal>,
    },

    /// Ledger could not be reached within the retry budget
    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(String),

    /// Admin decision already taken (or being taken) for this application
    #[error("application already decided")]
    AlreadyDecided,

    /// Redemption would drive the token balance negative
    #[error("insufficient token balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: u64, available: u64 },

    /// Referenced application does not exist
    #[error("application not found")]
    ApplicationNotFound,

    /// Referenced campaign is unknown or not approved
    #[error("campaign not found")]
    CampaignNotFound,

    /// Operational database or evidence storage failure
    #[error("storage failure: {0}")]
    Storage(String),

    /// Donation is on the ledger but its database record could not be
    /// written. Resubmitting the same donation completes it.
    #[error("donation on ledger, database record pending: {0}")]
    RecordingIncomplete(String),
}

fn display_amount(amount: &Option<Decimal>) -> String {
    match amount {
        Some(amount) => amount.to_string(),
        None => "none".to_string(),
    }
}

impl PipelineError {
    /// Infrastructure failures the caller may retry with the same input.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LedgerUnavailable(_) | Self::Storage(_) | Self::RecordingIncomplete(_)
        )
    }

    /// Message safe to show to the end user.
    ///
    /// Business errors are actionable. Infrastructure errors are generic and
    /// say whether the donation was received.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(reason) => format!("Please check your input: {reason}."),
            Self::DuplicateTransaction => {
                "This transaction has already been submitted.".to_string()
            }
            Self::ProofMismatch { claimed, extracted } => match extracted {
                Some(found) => format!(
                    "The receipt shows {found}, but {claimed} was entered. Please correct the amount or upload the matching receipt."
                ),
                None => "We could not read an amount from the receipt. Please upload a clearer image.".to_string(),
            },
            Self::AlreadyDecided => "This application has already been decided.".to_string(),
            Self::InsufficientBalance { available, .. } => {
                format!("You only have {available} tokens available.")
            }
            Self::ApplicationNotFound => "Application not found.".to_string(),
            Self::CampaignNotFound => "Campaign not found.".to_string(),
            Self::LedgerUnavailable(_) | Self::Storage(_) => {
                "Something went wrong on our side and your donation was not recorded. Please try again."
                    .to_string()
            }
            Self::RecordingIncomplete(_) => {
                "We received your donation and are still finishing up. Please resubmit the same receipt to confirm it."
                    .to_string()
            }
        }
    }
}

/// Failures reported by a [`LedgerClient`](crate::ledger::LedgerClient).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Call did not confirm before its deadline
    #[error("ledger call timed out")]
    Timeout,

    /// RPC transport failure
    #[error("ledger transport error: {0}")]
    Transport(String),

    /// Contract reverted the transaction
    #[error("ledger transaction reverted: {0}")]
    Reverted(String),

    /// Donation registry already holds an entry with this id
    #[error("donation already recorded on ledger")]
    DuplicateDonation,
}

impl LedgerError {
    /// Whether a retry can succeed. Reverts and duplicates are deterministic.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Transport(_))
    }
}

/// Failures reported by a [`Store`](crate::store::Store).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Unique-key constraint violated
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Record does not exist
    #[error("record not found: {0}")]
    NotFound(String),

    /// Conditional update did not match the current state
    #[error("conditional update conflict: {0}")]
    Conflict(String),

    /// Backend unreachable or failing
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        PipelineError::Storage(err.to_string())
    }
}

/// Invalid configuration value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn error_display_messages() {
        assert_eq!(
            PipelineError::Validation("amount must be positive".into()).to_string(),
            "validation failed: amount must be positive"
        );
        assert_eq!(
            PipelineError::DuplicateTransaction.to_string(),
            "duplicate transaction ID"
        );
        assert_eq!(
            PipelineError::ProofMismatch {
                claimed: dec!(1000),
                extracted: Some(dec!(900)),
            }
            .to_string(),
            "payment proof does not match claimed amount 1000 (extracted: 900)"
        );
        assert_eq!(
            PipelineError::ProofMismatch {
                claimed: dec!(1000),
                extracted: None,
            }
            .to_string(),
            "payment proof does not match claimed amount 1000 (extracted: none)"
        );
        assert_eq!(
            PipelineError::AlreadyDecided.to_string(),
            "application already decided"
        );
        assert_eq!(
            PipelineError::InsufficientBalance {
                requested: 5,
                available: 2
            }
            .to_string(),
            "insufficient token balance: requested 5, available 2"
        );
    }

    #[test]
    fn infrastructure_errors_are_retryable() {
        assert!(PipelineError::LedgerUnavailable("timeout".into()).is_retryable());
        assert!(PipelineError::Storage("down".into()).is_retryable());
        assert!(!PipelineError::DuplicateTransaction.is_retryable());
        assert!(!PipelineError::AlreadyDecided.is_retryable());
    }

    #[test]
    fn infrastructure_user_message_is_generic() {
        let message = PipelineError::LedgerUnavailable("rpc reset by peer".into()).user_message();
        assert!(message.contains("not recorded"));
        assert!(!message.contains("rpc"));
    }

    #[test]
    fn incomplete_recording_is_not_reported_as_lost() {
        let err = PipelineError::RecordingIncomplete("insert timed out".into());
        assert!(err.is_retryable());
        let message = err.user_message();
        assert!(message.contains("received your donation"));
        assert!(!message.contains("not recorded"));
    }

    #[test]
    fn transient_ledger_errors() {
        assert!(LedgerError::Timeout.is_transient());
        assert!(LedgerError::Transport("reset".into()).is_transient());
        assert!(!LedgerError::Reverted("bad ngo".into()).is_transient());
        assert!(!LedgerError::DuplicateDonation.is_transient());
    }

    #[test]
    fn store_errors_convert_to_storage() {
        let err: PipelineError = StoreError::Backend("connection refused".into()).into();
        assert_eq!(
            err,
            PipelineError::Storage("store backend error: connection refused".into())
        );
    }
}
