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

//! Outbound notifications on application state transitions.
//!
//! Dispatch is fire-and-forget: [`dispatch`] bounds each send with a
//! deadline and only logs failures, so a notification can never fail the
//! transition that triggered it.

use crate::application::{AiApproval, CampaignApplication, Decision};
use crate::base::{ApplicationId, Email, NgoLedgerId};
use async_trait::async_trait;
use crossbeam::queue::SegQueue;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

/// A message to an organization's contact address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    ApplicationReceived {
        application: ApplicationId,
        to: Email,
        organization: String,
        campaign: String,
    },
    AiVerdict {
        application: ApplicationId,
        to: Email,
        organization: String,
        campaign: String,
        verdict: AiApproval,
    },
    AdminDecision {
        application: ApplicationId,
        to: Email,
        organization: String,
        campaign: String,
        decision: Decision,
        ngo: Option<NgoLedgerId>,
    },
}

impl Notification {
    pub fn received(app: &CampaignApplication) -> Self {
        Self::ApplicationReceived {
            application: app.id,
            to: app.organization.email.clone(),
            organization: app.organization.name.clone(),
            campaign: app.campaign.title.clone(),
        }
    }

    pub fn ai_verdict(app: &CampaignApplication) -> Self {
        Self::AiVerdict {
            application: app.id,
            to: app.organization.email.clone(),
            organization: app.organization.name.clone(),
            campaign: app.campaign.title.clone(),
            verdict: app.ai_approval,
        }
    }

    pub fn admin_decision(app: &CampaignApplication, decision: Decision) -> Self {
        Self::AdminDecision {
            application: app.id,
            to: app.organization.email.clone(),
            organization: app.organization.name.clone(),
            campaign: app.campaign.title.clone(),
            decision,
            ngo: app.ngo_ledger_id.clone(),
        }
    }

    pub fn recipient(&self) -> &Email {
        match self {
            Self::ApplicationReceived { to, .. }
            | Self::AiVerdict { to, .. }
            | Self::AdminDecision { to, .. } => to,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: Notification) -> Result<(), NotifyError>;
}

/// Sends `notification`, logging instead of propagating any failure.
pub async fn dispatch(notifier: &Arc<dyn Notifier>, notification: Notification, deadline: Duration) {
    let recipient = notification.recipient().clone();
    match tokio::time::timeout(deadline, notifier.send(notification)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(to = %recipient, error = %e, "notification dropped"),
        Err(_) => warn!(to = %recipient, "notification timed out"),
    }
}

/// Logs notifications and keeps them in an outbox for inspection.
#[derive(Debug, Default)]
pub struct LogNotifier {
    outbox: SegQueue<Notification>,
}

impl LogNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns every queued notification, oldest first.
    pub fn drain(&self) -> Vec<Notification> {
        std::iter::from_fn(|| self.outbox.pop()).collect()
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: Notification) -> Result<(), NotifyError> {
        info!(to = %notification.recipient(), ?notification, "notification sent");
        self.outbox.push(notification);
        Ok(())
    }
}
