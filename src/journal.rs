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

//! Thread-safe journal of committed request transitions.
//!
//! Keeps a per-request history for lookups and a global FIFO for export.

use crate::base::{RequestId, UserId};
use crate::request::{RequestEvent, RequestStatus};
use chrono::{DateTime, Utc};
use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;

/// One committed transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionRecord {
    pub request_id: RequestId,
    pub from: RequestStatus,
    pub to: RequestStatus,
    pub event: RequestEvent,
    pub actor: UserId,
    pub at: DateTime<Utc>,
}

/// Combines a [`DashMap`] of per-request histories with a [`SegQueue`]
/// preserving global commit order.
#[derive(Debug)]
pub struct TransitionJournal {
    /// Records grouped by request, oldest first.
    by_request: DashMap<RequestId, Vec<Arc<TransitionRecord>>>,

    /// Records in commit order, drained by exporters.
    pending_export: SegQueue<Arc<TransitionRecord>>,
}

impl TransitionJournal {
    pub fn new() -> Self {
        Self {
            by_request: DashMap::new(),
            pending_export: SegQueue::new(),
        }
    }

    /// Appends a record.
    ///
    /// Callers hold the request's lock, so records for one request arrive in
    /// the order their transitions committed.
    pub fn push(&self, record: TransitionRecord) {
        let record = Arc::new(record);
        self.by_request
            .entry(record.request_id)
            .or_default()
            .push(Arc::clone(&record));
        self.pending_export.push(record);
    }

    /// Transitions recorded for one request, oldest first.
    pub fn history(&self, request_id: RequestId) -> Vec<TransitionRecord> {
        self.by_request
            .get(&request_id)
            .map(|records| records.iter().map(|r| TransitionRecord::clone(r)).collect())
            .unwrap_or_default()
    }

    /// Removes and returns every record not yet exported, in commit order.
    pub fn drain(&self) -> Vec<TransitionRecord> {
        let mut out = Vec::with_capacity(self.pending_export.len());
        while let Some(record) = self.pending_export.pop() {
            out.push(TransitionRecord::clone(&record));
        }
        out
    }
}

impl Default for TransitionJournal {
    fn default() -> Self {
        Self::new()
    }
}
