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

//! In-process ledger with the registries' semantics and fault injection.
//!
//! Used by the CLI's replay mode and by tests. Like the deployed contracts,
//! the NGO and Donor registries do not deduplicate on their own: keeping one
//! record per email is the caller's job.

use super::{
    CampaignRegistration, DonationEntry, DonorRecord, LedgerClient, NgoRecord, NgoRegistration,
    OperatorCredential,
};
use crate::base::{CampaignLedgerId, DonorLedgerId, Email, NgoLedgerId, TransactionId};
use crate::error::LedgerError;
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Ledger operations, for fault injection and call accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerCall {
    FindNgo,
    RegisterNgo,
    RegisterCampaign,
    FindDonor,
    RegisterDonor,
    RecordDonation,
    FindDonation,
    DonationsByDonor,
}

#[derive(Debug, Clone)]
enum Fault {
    /// Fail before touching state.
    Fail(LedgerError),
    /// Apply the write, then report a timeout (confirmation lost).
    LoseAck,
}

#[derive(Debug, Clone)]
struct CampaignData {
    ngo: NgoLedgerId,
    registration: CampaignRegistration,
}

#[derive(Debug, Default)]
pub struct InMemoryLedger {
    sequence: AtomicU64,
    ngos: Mutex<Vec<NgoRecord>>,
    campaigns: DashMap<CampaignLedgerId, CampaignData>,
    donors: Mutex<Vec<DonorRecord>>,
    donations: DashMap<TransactionId, DonationEntry>,
    faults: DashMap<LedgerCall, VecDeque<Fault>>,
    calls: DashMap<LedgerCall, u32>,
    latency: Mutex<Duration>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated confirmation latency applied to every call.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Makes the next `times` calls of `call` fail with `error`.
    pub fn fail_next(&self, call: LedgerCall, times: usize, error: LedgerError) {
        let mut queue = self.faults.entry(call).or_default();
        queue.extend(std::iter::repeat_n(Fault::Fail(error), times));
    }

    /// Makes the next call of `call` apply its write but report a timeout.
    pub fn lose_ack_next(&self, call: LedgerCall) {
        self.faults.entry(call).or_default().push_back(Fault::LoseAck);
    }

    /// Number of times `call` was invoked.
    pub fn calls(&self, call: LedgerCall) -> u32 {
        self.calls.get(&call).map(|count| *count).unwrap_or(0)
    }

    pub fn ngo_records(&self, email: &Email) -> usize {
        self.ngos.lock().iter().filter(|ngo| &ngo.email == email).count()
    }

    pub fn donor_records(&self, email: &Email) -> usize {
        self.donors
            .lock()
            .iter()
            .filter(|donor| &donor.username == email)
            .count()
    }

    /// Owning NGO and registered fields of a campaign.
    pub fn campaign(&self, id: &CampaignLedgerId) -> Option<(NgoLedgerId, CampaignRegistration)> {
        self.campaigns
            .get(id)
            .map(|data| (data.ngo.clone(), data.registration.clone()))
    }

    pub fn campaign_count(&self) -> usize {
        self.campaigns.len()
    }

    pub fn donation_count(&self) -> usize {
        self.donations.len()
    }

    /// Seeds a donor record directly, bypassing faults and accounting.
    pub fn seed_donor(&self, username: Email, verified: bool) -> DonorLedgerId {
        let id = DonorLedgerId(self.next_id());
        self.donors.lock().push(DonorRecord {
            id: id.clone(),
            username,
            verified,
        });
        id
    }

    fn next_id(&self) -> String {
        let n = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        format!("0x{n:064x}")
    }

    fn begin(&self, call: LedgerCall) -> Option<Fault> {
        *self.calls.entry(call).or_insert(0) += 1;
        self.faults
            .get_mut(&call)
            .and_then(|mut queue| queue.pop_front())
    }

    async fn confirm(&self) {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    /// Runs a read under the fault plan.
    async fn read<T>(&self, call: LedgerCall, query: impl FnOnce() -> T) -> Result<T, LedgerError> {
        let fault = self.begin(call);
        self.confirm().await;
        match fault {
            Some(Fault::Fail(e)) => Err(e),
            Some(Fault::LoseAck) => Err(LedgerError::Timeout),
            None => Ok(query()),
        }
    }

    /// Runs a write under the fault plan.
    async fn write<T>(
        &self,
        call: LedgerCall,
        apply: impl FnOnce() -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let fault = self.begin(call);
        self.confirm().await;
        match fault {
            Some(Fault::Fail(e)) => Err(e),
            Some(Fault::LoseAck) => apply().and(Err(LedgerError::Timeout)),
            None => apply(),
        }
    }
}

fn check_signer(signer: &OperatorCredential) -> Result<(), LedgerError> {
    if signer.expose().trim().is_empty() {
        return Err(LedgerError::Reverted("unauthorized signer".to_string()));
    }
    Ok(())
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn find_ngo_by_email(&self, email: &Email) -> Result<Option<NgoRecord>, LedgerError> {
        self.read(LedgerCall::FindNgo, || {
            self.ngos.lock().iter().find(|ngo| &ngo.email == email).cloned()
        })
        .await
    }

    async fn register_ngo(
        &self,
        signer: &OperatorCredential,
        ngo: &NgoRegistration,
    ) -> Result<NgoLedgerId, LedgerError> {
        self.write(LedgerCall::RegisterNgo, || {
            check_signer(signer)?;
            let id = NgoLedgerId(self.next_id());
            self.ngos.lock().push(NgoRecord {
                id: id.clone(),
                name: ngo.name.clone(),
                email: ngo.email.clone(),
            });
            Ok(id)
        })
        .await
    }

    async fn register_campaign(
        &self,
        signer: &OperatorCredential,
        ngo: &NgoLedgerId,
        campaign: &CampaignRegistration,
    ) -> Result<CampaignLedgerId, LedgerError> {
        self.write(LedgerCall::RegisterCampaign, || {
            check_signer(signer)?;
            if !self.ngos.lock().iter().any(|record| &record.id == ngo) {
                return Err(LedgerError::Reverted(format!("unknown ngo {ngo}")));
            }
            let id = CampaignLedgerId(self.next_id());
            self.campaigns.insert(
                id.clone(),
                CampaignData {
                    ngo: ngo.clone(),
                    registration: campaign.clone(),
                },
            );
            Ok(id)
        })
        .await
    }

    async fn find_donor(&self, username: &Email) -> Result<Option<DonorRecord>, LedgerError> {
        self.read(LedgerCall::FindDonor, || {
            self.donors
                .lock()
                .iter()
                .find(|donor| &donor.username == username)
                .cloned()
        })
        .await
    }

    async fn register_donor(
        &self,
        username: &Email,
        verified: bool,
    ) -> Result<DonorLedgerId, LedgerError> {
        self.write(LedgerCall::RegisterDonor, || {
            let id = DonorLedgerId(self.next_id());
            self.donors.lock().push(DonorRecord {
                id: id.clone(),
                username: username.clone(),
                verified,
            });
            Ok(id)
        })
        .await
    }

    async fn record_donation(&self, donation: &DonationEntry) -> Result<(), LedgerError> {
        self.write(LedgerCall::RecordDonation, || {
            if !self.campaigns.contains_key(&donation.campaign_id) {
                return Err(LedgerError::Reverted(format!(
                    "unknown campaign {}",
                    donation.campaign_id
                )));
            }
            if !self.donors.lock().iter().any(|d| d.id == donation.donor_id) {
                return Err(LedgerError::Reverted(format!(
                    "unknown donor {}",
                    donation.donor_id
                )));
            }
            match self.donations.entry(donation.transaction_id.clone()) {
                Entry::Occupied(_) => Err(LedgerError::DuplicateDonation),
                Entry::Vacant(entry) => {
                    entry.insert(donation.clone());
                    Ok(())
                }
            }
        })
        .await
    }

    async fn find_donation(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<DonationEntry>, LedgerError> {
        self.read(LedgerCall::FindDonation, || {
            self.donations
                .get(transaction_id)
                .map(|entry| entry.value().clone())
        })
        .await
    }

    async fn donations_by_donor(
        &self,
        donor: &DonorLedgerId,
    ) -> Result<Vec<DonationEntry>, LedgerError> {
        self.read(LedgerCall::DonationsByDonor, || {
            let mut entries: Vec<DonationEntry> = self
                .donations
                .iter()
                .filter(|entry| &entry.donor_id == donor)
                .map(|entry| entry.value().clone())
                .collect();
            entries.sort_by(|a, b| a.transaction_id.as_str().cmp(b.transaction_id.as_str()));
            entries
        })
        .await
    }
}
