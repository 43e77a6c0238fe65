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

//! Campaign application lifecycle.
//!
//! AI review and admin review are independent axes. The AI verdict may be
//! overwritten at any time and only affects public listing. The admin
//! decision is write-once, and an approval is only persisted together with
//! the NGO and campaign ids returned by the ledger:
//!
//! ```text
//!            claim_decision            register on ledger          commit_approval
//!  Pending ─────────────────► (claimed) ──────────────────► ids ─────────────────► Approved
//!     ▲                          │  │
//!     │    release_decision      │  └──── reject ── commit_rejection ──► Rejected
//!     └──── (ledger exhausted) ──┘
//! ```
//!
//! The claim is a lease in the store. A decision that fails, or whose
//! future is dropped mid-flight, releases it. A claim whose release never
//! lands (the process died) stops blocking once the lease expires.

use crate::application::{
    AdminApproval, CampaignApplication, Decision, NewApplication, TrustScore,
};
use crate::base::{ApplicationId, CampaignLedgerId, NgoLedgerId};
use crate::config::{PipelineConfig, RetryPolicy};
use crate::error::{LedgerError, PipelineError, StoreError};
use crate::ledger::{CampaignRegistration, LedgerClient, NgoRegistration, OperatorCredential};
use crate::notify::{self, Notification, Notifier};
use crate::retry::with_retry;
use crate::store::Store;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

impl From<&CampaignApplication> for NgoRegistration {
    fn from(app: &CampaignApplication) -> Self {
        Self {
            name: app.organization.name.clone(),
            registration_number: app.organization.registration_number.clone(),
            website: app.organization.website.clone(),
            contact_person: app.organization.contact_person.clone(),
            email: app.organization.email.clone(),
        }
    }
}

impl From<&CampaignApplication> for CampaignRegistration {
    fn from(app: &CampaignApplication) -> Self {
        Self {
            title: app.campaign.title.clone(),
            description: app.campaign.description.clone(),
            location: app.campaign.location.clone(),
            goal_amount: app.campaign.goal_amount,
        }
    }
}

/// Maps store failures on a single application to pipeline errors.
fn application_error(err: StoreError) -> PipelineError {
    match err {
        StoreError::NotFound(_) => PipelineError::ApplicationNotFound,
        StoreError::Conflict(_) => PipelineError::AlreadyDecided,
        other => other.into(),
    }
}

/// A held decision lease. Dropped unsettled, it releases itself on a
/// background task.
struct DecisionClaim {
    store: Arc<dyn Store>,
    retry: RetryPolicy,
    id: ApplicationId,
    token: u64,
    settled: bool,
}

impl DecisionClaim {
    /// Settles the claim with a commit outcome, releasing it on failure.
    async fn finish(
        mut self,
        committed: Result<CampaignApplication, StoreError>,
    ) -> Result<CampaignApplication, StoreError> {
        match committed {
            Ok(app) => {
                self.settled = true;
                Ok(app)
            }
            Err(e) => {
                self.release().await;
                Err(e)
            }
        }
    }

    async fn release(&mut self) {
        self.settled = true;
        release_claim(self.store.as_ref(), &self.retry, self.id, self.token).await;
    }
}

impl Drop for DecisionClaim {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let (store, retry, id, token) = (Arc::clone(&self.store), self.retry, self.id, self.token);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                warn!(application_id = %id, "decision abandoned, releasing claim");
                runtime.spawn(async move {
                    release_claim(store.as_ref(), &retry, id, token).await;
                });
            }
            Err(_) => {
                warn!(application_id = %id, "decision abandoned outside a runtime, claim lapses at lease expiry");
            }
        }
    }
}

async fn release_claim(store: &dyn Store, retry: &RetryPolicy, id: ApplicationId, token: u64) {
    match with_retry(retry, "release_decision", || store.release_decision(id, token)).await {
        Ok(_) => info!(application_id = %id, "decision claim released"),
        Err(e) => {
            error!(application_id = %id, error = %e, "failed to release decision claim, it lapses at lease expiry")
        }
    }
}

pub struct ApprovalStateMachine {
    store: Arc<dyn Store>,
    ledger: Arc<dyn LedgerClient>,
    notifier: Arc<dyn Notifier>,
    config: Arc<PipelineConfig>,
}

impl ApprovalStateMachine {
    pub fn new(
        store: Arc<dyn Store>,
        ledger: Arc<dyn LedgerClient>,
        notifier: Arc<dyn Notifier>,
        config: Arc<PipelineConfig>,
    ) -> Self {
        Self {
            store,
            ledger,
            notifier,
            config,
        }
    }

    /// Stores a new application as `Pending` on both axes.
    pub async fn submit(
        &self,
        submission: NewApplication,
    ) -> Result<CampaignApplication, PipelineError> {
        submission.validate()?;
        let app = self.store.insert_application(submission, Utc::now()).await?;
        info!(
            application_id = %app.id,
            organization = %app.organization.name,
            campaign = %app.campaign.title,
            "application submitted"
        );
        self.notify(Notification::received(&app)).await;
        Ok(app)
    }

    /// Applies the AI reviewer's trust score. Later verdicts overwrite earlier ones.
    pub async fn record_ai_verdict(
        &self,
        id: ApplicationId,
        score: TrustScore,
    ) -> Result<CampaignApplication, PipelineError> {
        let verdict = score.verdict(self.config.ai_trust_threshold);
        let app = self
            .store
            .set_ai_approval(id, verdict)
            .await
            .map_err(application_error)?;
        info!(
            application_id = %id,
            score = score.percent(),
            threshold = self.config.ai_trust_threshold,
            %verdict,
            "AI verdict recorded"
        );
        self.notify(Notification::ai_verdict(&app)).await;
        Ok(app)
    }

    /// Takes the write-once admin decision.
    ///
    /// Approval registers the NGO (unless the organization already has one)
    /// and the campaign on the ledger before anything is persisted. If the
    /// ledger stays unavailable the application is left `Pending` and
    /// [`PipelineError::LedgerUnavailable`] is returned.
    pub async fn decide(
        &self,
        id: ApplicationId,
        decision: Decision,
        signer: &OperatorCredential,
    ) -> Result<CampaignApplication, PipelineError> {
        let current = self
            .store
            .application(id)
            .await?
            .ok_or(PipelineError::ApplicationNotFound)?;
        if current.admin_approval.is_terminal() {
            return Err(PipelineError::AlreadyDecided);
        }

        let now = Utc::now();
        let (claimed, lease) = self
            .store
            .claim_decision(id, now, self.lease_expiry(now))
            .await
            .map_err(application_error)?;
        let claim = DecisionClaim {
            store: Arc::clone(&self.store),
            retry: self.config.store_retry,
            id,
            token: lease.token,
            settled: false,
        };

        let decided = match decision {
            Decision::Rejected => {
                let committed = with_retry(&self.config.store_retry, "commit_rejection", || {
                    self.store.commit_rejection(id, claim.token)
                })
                .await;
                claim.finish(committed).await.map_err(application_error)?
            }
            Decision::Approved => self.approve(&claimed, claim, signer).await?,
        };

        info!(
            application_id = %id,
            %decision,
            campaign_ledger_id = ?decided.campaign_ledger_id,
            "admin decision committed"
        );
        self.notify(Notification::admin_decision(&decided, decision))
            .await;
        Ok(decided)
    }

    async fn approve(
        &self,
        app: &CampaignApplication,
        mut claim: DecisionClaim,
        signer: &OperatorCredential,
    ) -> Result<CampaignApplication, PipelineError> {
        let (ngo, campaign) = match self.register_on_ledger(app, signer).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(application_id = %app.id, error = %e, "ledger registration failed, reverting to pending");
                claim.release().await;
                return Err(PipelineError::LedgerUnavailable(e.to_string()));
            }
        };

        let committed = with_retry(&self.config.store_retry, "commit_approval", || {
            self.store
                .commit_approval(app.id, claim.token, ngo.clone(), campaign.clone())
        })
        .await;

        claim.finish(committed).await.map_err(|e| {
            error!(
                application_id = %app.id,
                ngo_ledger_id = %ngo,
                campaign_ledger_id = %campaign,
                error = %e,
                "campaign registered on ledger but approval not persisted"
            );
            application_error(e)
        })
    }

    fn lease_expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.config.decision_lease)
            .ok()
            .and_then(|lease| now.checked_add_signed(lease))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Resolves the organization's NGO id, registering it if the ledger has
    /// none, then registers the campaign under it.
    async fn register_on_ledger(
        &self,
        app: &CampaignApplication,
        signer: &OperatorCredential,
    ) -> Result<(NgoLedgerId, CampaignLedgerId), LedgerError> {
        let policy = &self.config.ledger_retry;
        let registration = &NgoRegistration::from(app);
        let ledger = &self.ledger;

        // Each attempt re-reads the registry so a registration whose
        // confirmation was lost is found instead of repeated.
        let ngo = with_retry(policy, "resolve_ngo", || async move {
            if let Some(existing) = ledger.find_ngo_by_email(&registration.email).await? {
                info!(application_id = %app.id, ngo_ledger_id = %existing.id, "reusing registered NGO");
                return Ok(existing.id);
            }
            let id = ledger.register_ngo(signer, registration).await?;
            info!(application_id = %app.id, ngo_ledger_id = %id, "NGO registered");
            Ok::<NgoLedgerId, LedgerError>(id)
        })
        .await?;

        let campaign_registration = CampaignRegistration::from(app);
        let campaign = with_retry(policy, "register_campaign", || {
            self.ledger
                .register_campaign(signer, &ngo, &campaign_registration)
        })
        .await?;
        info!(application_id = %app.id, campaign_ledger_id = %campaign, "campaign registered");

        Ok((ngo, campaign))
    }

    async fn notify(&self, notification: Notification) {
        notify::dispatch(&self.notifier, notification, self.config.notify_timeout).await;
    }

    // === Read accessors ===

    pub async fn application(
        &self,
        id: ApplicationId,
    ) -> Result<CampaignApplication, PipelineError> {
        self.store
            .application(id)
            .await?
            .ok_or(PipelineError::ApplicationNotFound)
    }

    pub async fn applications_by_status(
        &self,
        status: AdminApproval,
    ) -> Result<Vec<CampaignApplication>, PipelineError> {
        Ok(self.store.applications(Some(status)).await?)
    }

    pub async fn all_applications(&self) -> Result<Vec<CampaignApplication>, PipelineError> {
        Ok(self.store.applications(None).await?)
    }

    /// Admin-approved, AI-verified campaigns.
    pub async fn listed_campaigns(&self) -> Result<Vec<CampaignApplication>, PipelineError> {
        let approved = self.store.applications(Some(AdminApproval::Approved)).await?;
        Ok(approved
            .into_iter()
            .filter(CampaignApplication::is_publicly_listed)
            .collect())
    }
}
