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

//! Object storage for receipt evidence.
//!
//! Only the returned [`ProofReference`] is persisted by the pipeline; the
//! bytes live in the evidence store.

use crate::base::ProofReference;
use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvidenceError {
    #[error("evidence upload failed: {0}")]
    Upload(String),
}

#[async_trait]
pub trait EvidenceStore: Send + Sync {
    /// Stores `bytes` and returns a dereferenceable reference to them.
    async fn put(&self, bytes: &[u8]) -> Result<ProofReference, EvidenceError>;
}

/// Content reference of `bytes`: `sha256:<hex digest>`.
pub fn content_reference(bytes: &[u8]) -> ProofReference {
    let digest = Sha256::digest(bytes);
    ProofReference(format!("sha256:{}", hex::encode(digest)))
}

/// Content-addressed in-memory evidence store.
///
/// Storing the same bytes twice yields the same reference.
#[derive(Debug, Default)]
pub struct ContentAddressedStore {
    objects: DashMap<ProofReference, Arc<Vec<u8>>>,
    failures: AtomicU32,
}

impl ContentAddressedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, reference: &ProofReference) -> Option<Arc<Vec<u8>>> {
        self.objects.get(reference).map(|bytes| Arc::clone(bytes.value()))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Makes the next `times` uploads fail.
    pub fn fail_next(&self, times: u32) {
        self.failures.fetch_add(times, Ordering::SeqCst);
    }
}

#[async_trait]
impl EvidenceStore for ContentAddressedStore {
    async fn put(&self, bytes: &[u8]) -> Result<ProofReference, EvidenceError> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(EvidenceError::Upload("injected failure".to_string()));
        }
        let reference = content_reference(bytes);
        self.objects
            .entry(reference.clone())
            .or_insert_with(|| Arc::new(bytes.to_vec()));
        Ok(reference)
    }
}
