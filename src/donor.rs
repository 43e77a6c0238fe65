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

//! Donor identity resolution.
//!
//! Maps a donor's email to exactly one ledger donor record. Resolution is
//! serialized per email, so concurrent first donations from the same address
//! register once and share the id.

use crate::base::{DonorLedgerId, Email};
use crate::config::PipelineConfig;
use crate::error::{LedgerError, PipelineError, StoreError};
use crate::ledger::LedgerClient;
use crate::retry::with_retry;
use crate::store::Store;
use crate::transaction::DonorProfile;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub struct DonorResolver {
    store: Arc<dyn Store>,
    ledger: Arc<dyn LedgerClient>,
    config: Arc<PipelineConfig>,
    /// Per-email locks, held across ledger calls.
    locks: DashMap<Email, Arc<Mutex<()>>>,
}

impl DonorResolver {
    pub fn new(
        store: Arc<dyn Store>,
        ledger: Arc<dyn LedgerClient>,
        config: Arc<PipelineConfig>,
    ) -> Self {
        Self {
            store,
            ledger,
            config,
            locks: DashMap::new(),
        }
    }

    /// Returns the donor's ledger identity, registering it on first use.
    ///
    /// Repeated calls for the same email return the same id without writing
    /// to the ledger again.
    pub async fn resolve(&self, email: &Email) -> Result<DonorProfile, PipelineError> {
        if let Some(profile) = self.store.donor(email).await? {
            return Ok(profile);
        }

        let lock = Arc::clone(
            self.locks
                .entry(email.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        let resolved = {
            let _guard = lock.lock().await;
            self.resolve_locked(email).await
        };
        drop(lock);
        self.locks
            .remove_if(email, |_, lock| Arc::strong_count(lock) == 1);
        resolved
    }

    async fn resolve_locked(&self, email: &Email) -> Result<DonorProfile, PipelineError> {
        // Another caller may have finished while this one waited.
        if let Some(profile) = self.store.donor(email).await? {
            return Ok(profile);
        }

        let (ledger_id, verified) = self
            .find_or_register(email)
            .await
            .map_err(|e| PipelineError::LedgerUnavailable(e.to_string()))?;

        let linked = with_retry(&self.config.store_retry, "link_donor", || {
            self.store.link_donor(email, &ledger_id, verified)
        })
        .await;

        match linked {
            Ok(profile) => Ok(profile),
            Err(StoreError::Conflict(reason)) => {
                warn!(%email, %ledger_id, %reason, "donor already linked to another ledger id");
                self.store
                    .donor(email)
                    .await?
                    .ok_or_else(|| PipelineError::Storage(reason))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Looks the donor up on the ledger and registers them if absent.
    ///
    /// Every attempt starts with the lookup, so a registration whose
    /// confirmation was lost is picked up by the retry.
    async fn find_or_register(&self, email: &Email) -> Result<(DonorLedgerId, bool), LedgerError> {
        let ledger = &self.ledger;
        with_retry(&self.config.ledger_retry, "resolve_donor", || async move {
            if let Some(record) = ledger.find_donor(email).await? {
                if record.verified {
                    debug!(%email, donor_ledger_id = %record.id, "reusing ledger donor");
                } else {
                    warn!(%email, donor_ledger_id = %record.id, "reusing unverified ledger donor");
                }
                return Ok((record.id, record.verified));
            }
            let id = ledger.register_donor(email, true).await?;
            info!(%email, donor_ledger_id = %id, "donor registered on ledger");
            Ok::<_, LedgerError>((id, true))
        })
        .await
    }

    /// Number of emails with a resolution in progress.
    pub fn in_flight(&self) -> usize {
        self.locks.len()
    }
}
