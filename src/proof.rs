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

//! Payment-proof extraction.
//!
//! A [`TextRecognizer`] turns receipt image bytes into text; the heuristics
//! in [`parse_receipt_text`] then pull out the amount, transaction id, date
//! and counterparty. Every field is independently optional and extraction
//! never fails: whether a proof is good enough is the caller's decision.

use crate::words::parse_number_words;
use async_trait::async_trait;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::{Arc, LazyLock};
use thiserror::Error;
use tracing::{debug, warn};

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Labels that introduce a transaction reference, in priority order.
const TXN_LABELS: [&str; 5] = [
    "UPI Ref. No:",
    "Ref:",
    "Reference:",
    "Txn ID:",
    "Transaction ID:",
];

const AMOUNT: &str = r"(\d{1,7}(?:,\d{2,3})*(?:\.\d{2})?)";

/// An amount may not run on into more digits.
const AMOUNT_END: &str = r"(?:\D|$)";

fn pattern(source: &str) -> Regex {
    match Regex::new(source) {
        Ok(re) => re,
        Err(e) => panic!("invalid receipt pattern {source:?}: {e}"),
    }
}

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| pattern(r"\s+"));

static GLUED_MONTH: LazyLock<Regex> = LazyLock::new(|| {
    pattern(&format!(r"(?i)\d{{1,2}}({})", MONTHS.join("|")))
});

static AMOUNT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        format!(r"[₹रR]\s?{AMOUNT}{AMOUNT_END}"),
        format!(r"(?i)\bRs\.?\s?{AMOUNT}{AMOUNT_END}"),
        format!(r"(?i)\bINR\s?{AMOUNT}{AMOUNT_END}"),
        format!(r"(?i)\bAmount\s*:?\s*{AMOUNT}{AMOUNT_END}"),
        format!(r"(?i)(?:^|\D){AMOUNT}\s+Only\b"),
    ]
    .iter()
    .map(|source| pattern(source))
    .collect()
});

static AMOUNT_IN_WORDS: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?i)\bRupees\s+([A-Za-z\s-]+)\s+Only\b"));

static DATE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\d{1,2}\s+[A-Za-z]{3,9}\s+\d{4},?\s+\d{1,2}:\d{2}\s*[APMapm]{2}",
        r"\d{1,2}[-/][A-Za-z]{3,9}[-/]\d{2,4},?\s+\d{1,2}:\d{2}\s*[APMapm]{2}",
        r"\d{1,2}\s+[A-Za-z]{3,9}\s+\d{4}",
        r"\d{1,2}[-/][A-Za-z]{3,9}[-/]\d{2,4}",
    ]
    .iter()
    .map(|source| pattern(source))
    .collect()
});

static RECIPIENT_MARKER: LazyLock<Regex> = LazyLock::new(|| pattern(r"\b[Tt][Oo]\b:?"));

/// Fields recovered from a receipt. Not persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedProof {
    pub amount: Option<Decimal>,
    pub transaction_id: Option<String>,
    pub date: Option<String>,
    pub counterparty: Option<String>,
}

impl ExtractedProof {
    /// Exact comparison against a claimed amount. A missing amount never matches.
    pub fn amount_matches(&self, claimed: Decimal) -> bool {
        self.amount == Some(claimed)
    }

    pub fn is_empty(&self) -> bool {
        self.amount.is_none()
            && self.transaction_id.is_none()
            && self.date.is_none()
            && self.counterparty.is_none()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("text recognition failed: {0}")]
pub struct RecognizeError(pub String);

/// Optical text recognition over raw image bytes.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(&self, image: &[u8]) -> Result<String, RecognizeError>;
}

/// Treats the "image" as already-recognized UTF-8 text.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextRecognizer;

#[async_trait]
impl TextRecognizer for PlainTextRecognizer {
    async fn recognize(&self, image: &[u8]) -> Result<String, RecognizeError> {
        Ok(String::from_utf8_lossy(image).into_owned())
    }
}

pub struct ProofExtractor {
    recognizer: Arc<dyn TextRecognizer>,
}

impl ProofExtractor {
    pub fn new(recognizer: Arc<dyn TextRecognizer>) -> Self {
        Self { recognizer }
    }

    /// Recognizes and parses a receipt. Recognition failures yield an empty proof.
    pub async fn extract(&self, image: &[u8]) -> ExtractedProof {
        match self.recognizer.recognize(image).await {
            Ok(text) => parse_receipt_text(&text),
            Err(e) => {
                warn!(error = %e, bytes = image.len(), "receipt recognition failed");
                ExtractedProof::default()
            }
        }
    }
}

/// Collapses whitespace and drops OCR digits glued onto month names (`"12Jan"` -> `"Jan"`).
pub fn normalize_text(raw: &str) -> String {
    let collapsed = WHITESPACE.replace_all(raw.trim(), " ");
    GLUED_MONTH.replace_all(&collapsed, "$1").into_owned()
}

pub fn parse_receipt_text(raw: &str) -> ExtractedProof {
    let text = normalize_text(raw);
    let proof = ExtractedProof {
        amount: extract_amount(&text),
        transaction_id: extract_transaction_id(&text),
        date: extract_date(&text),
        counterparty: extract_counterparty(&text),
    };
    debug!(?proof, "parsed receipt text");
    proof
}

/// First matching currency pattern wins; number words are the last resort.
pub fn extract_amount(text: &str) -> Option<Decimal> {
    for re in AMOUNT_PATTERNS.iter() {
        if let Some(caps) = re.captures(text) {
            let digits = caps[1].replace(',', "");
            match Decimal::from_str(&digits) {
                Ok(amount) => return Some(amount),
                Err(e) => debug!(%digits, error = %e, "unparsable amount"),
            }
        }
    }

    let caps = AMOUNT_IN_WORDS.captures(text)?;
    let amount = parse_number_words(&caps[1]);
    if amount.is_none() {
        debug!(words = &caps[1], "amount in words not understood");
    }
    amount.map(Decimal::from)
}

/// Digit runs after the first label found, up to a month token.
/// Runs shorter than three digits are noise.
pub fn extract_transaction_id(text: &str) -> Option<String> {
    let (label, start) = TXN_LABELS
        .iter()
        .find_map(|label| text.find(label).map(|idx| (*label, idx)))?;
    let tail = &text[start + label.len()..];

    let mut id = String::new();
    for part in tail.split_whitespace() {
        if MONTHS.iter().any(|month| part.contains(month)) {
            break;
        }
        let digits: String = part.chars().filter(char::is_ascii_digit).collect();
        if digits.len() >= 3 {
            id.push_str(&digits);
        }
    }
    (!id.is_empty()).then_some(id)
}

pub fn extract_date(text: &str) -> Option<String> {
    DATE_PATTERNS
        .iter()
        .find_map(|re| re.find(text))
        .map(|m| m.as_str().trim().to_string())
}

/// Tokens after a `To:` marker, up to the next label or the first pure number.
pub fn extract_counterparty(text: &str) -> Option<String> {
    let marker = RECIPIENT_MARKER.find(text)?;
    let tail = text[marker.end()..].trim_start();

    let stop = std::iter::once("From:")
        .chain(TXN_LABELS)
        .filter_map(|key| tail.find(key))
        .min()
        .unwrap_or(tail.len());

    let name = tail[..stop]
        .split_whitespace()
        .take_while(|part| !part.chars().all(|c| c.is_ascii_digit()))
        .collect::<Vec<_>>()
        .join(" ");
    (!name.is_empty()).then_some(name)
}
