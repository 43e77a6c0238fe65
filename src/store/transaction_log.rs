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

//! Donation transactions with a unique-key constraint on transaction id.
//!
//! Provides an insertion-ordered collection that rejects a second record
//! carrying an existing transaction id, while staying safe for concurrent
//! writers.

use crate::base::{CampaignLedgerId, DonorId, TransactionId};
use crate::error::StoreError;
use crate::transaction::TransactionRecord;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe transaction collection with duplicate detection.
///
/// A [`DashMap`] gives O(1) duplicate checks; a sequence number stamped at
/// insert time preserves insertion order for listings.
#[derive(Debug, Default)]
pub(crate) struct TransactionLog {
    records: DashMap<TransactionId, (u64, Arc<TransactionRecord>)>,
    sequence: AtomicU64,
}

impl TransactionLog {
    /// Adds a record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateKey`] if a record with the same
    /// transaction id already exists.
    pub(crate) fn insert(&self, record: TransactionRecord) -> Result<(), StoreError> {
        // Entry API keeps check-and-insert atomic under concurrent inserts.
        match self.records.entry(record.transaction_id.clone()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateKey(format!(
                "transactionId {}",
                record.transaction_id
            ))),
            Entry::Vacant(entry) => {
                let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
                entry.insert((seq, Arc::new(record)));
                Ok(())
            }
        }
    }

    pub(crate) fn get(&self, id: &TransactionId) -> Option<TransactionRecord> {
        self.records.get(id).map(|entry| entry.value().1.as_ref().clone())
    }

    pub(crate) fn by_donor(&self, donor: &DonorId) -> Vec<TransactionRecord> {
        self.select(|record| &record.donor_id == donor)
    }

    pub(crate) fn by_campaign(&self, campaign: &CampaignLedgerId) -> Vec<TransactionRecord> {
        self.select(|record| &record.campaign_id == campaign)
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    fn select(&self, keep: impl Fn(&TransactionRecord) -> bool) -> Vec<TransactionRecord> {
        let mut selected: Vec<(u64, Arc<TransactionRecord>)> = self
            .records
            .iter()
            .filter(|entry| keep(&entry.value().1))
            .map(|entry| {
                let (seq, record) = entry.value();
                (*seq, Arc::clone(record))
            })
            .collect();
        selected.sort_by_key(|(seq, _)| *seq);
        selected
            .into_iter()
            .map(|(_, record)| record.as_ref().clone())
            .collect()
    }
}
