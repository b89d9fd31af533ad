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

//! Borrow request lifecycle.
//!
//! Requests follow a state machine driven by [`RequestEvent`]s:
//!
//! ```text
//!  Pending ──approve──► Approved ──borrow──► Borrowed ──return──► Returned
//!     │                    │                    ┆
//!     ├──reject──► Rejected│                    ┆ end_date < today (read time only)
//!     │                    │                    ▼
//!     └──cancel──► Cancelled ◄──cancel──┘     Overdue
//! ```
//!
//! `Rejected`, `Returned` and `Cancelled` are terminal. `Overdue` is never
//! stored: it is derived when a snapshot is read (see
//! [`BorrowRequest::effective_status`]).

use crate::base::{BookId, RequestId, UserId};
use crate::error::{LendingError, ValidationError};
use chrono::NaiveDate;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// User role. Approval rights are a membership check on this closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
    SuperAdmin,
}

impl Role {
    const ADMIN_ROLES: &'static [Role] = &[Role::Admin, Role::SuperAdmin];

    pub fn is_admin(self) -> bool {
        Self::ADMIN_ROLES.contains(&self)
    }
}

impl FromStr for Role {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            "super_admin" => Ok(Self::SuperAdmin),
            other => Err(ValidationError::UnknownRole(other.to_string())),
        }
    }
}

/// The user performing a command, with the role used for authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn new(id: UserId, role: Role) -> Self {
        Self { id, role }
    }

    pub fn user(id: u32) -> Self {
        Self::new(UserId(id), Role::User)
    }

    pub fn admin(id: u32) -> Self {
        Self::new(UserId(id), Role::Admin)
    }

    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Borrowed,
    Returned,
    Overdue,
    Cancelled,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 7] = [
        Self::Pending,
        Self::Approved,
        Self::Rejected,
        Self::Borrowed,
        Self::Returned,
        Self::Overdue,
        Self::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Borrowed => "borrowed",
            Self::Returned => "returned",
            Self::Overdue => "overdue",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Returned | Self::Cancelled)
    }

    /// Looks up the transition table.
    ///
    /// | From | Event | To | Ledger |
    /// |------|-------|----|--------|
    /// | Pending | Approve | Approved | reserve |
    /// | Pending | Reject | Rejected | - |
    /// | Pending | Cancel | Cancelled | - |
    /// | Approved | Cancel | Cancelled | release |
    /// | Approved | MarkBorrowed | Borrowed | - |
    /// | Borrowed | Return | Returned | release |
    ///
    /// # Errors
    ///
    /// [`LendingError::IllegalTransition`] for any other pair.
    pub fn transition(self, event: RequestEvent) -> Result<Transition, LendingError> {
        use RequestEvent::*;
        use RequestStatus::*;

        let (to, effect) = match (self, event) {
            (Pending, Approve) => (Approved, LedgerEffect::Reserve),
            (Pending, Reject) => (Rejected, LedgerEffect::None),
            (Pending, Cancel) => (Cancelled, LedgerEffect::None),
            (Approved, Cancel) => (Cancelled, LedgerEffect::Release),
            (Approved, MarkBorrowed) => (Borrowed, LedgerEffect::None),
            (Borrowed, Return) => (Returned, LedgerEffect::Release),
            (status, event) => return Err(LendingError::IllegalTransition { status, event }),
        };

        Ok(Transition {
            from: self,
            to,
            event,
            effect,
        })
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == needle)
            .ok_or(ValidationError::UnknownStatus(needle))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestEvent {
    Approve,
    Reject,
    MarkBorrowed,
    Return,
    Cancel,
}

impl RequestEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::MarkBorrowed => "borrow",
            Self::Return => "return",
            Self::Cancel => "cancel",
        }
    }

    /// Checks that `actor` may fire this event on a request owned by `requester`.
    ///
    /// Cancel is open to the requester and to administrators; every other
    /// event requires an administrator.
    pub fn authorize(self, actor: &Actor, requester: UserId) -> Result<(), LendingError> {
        let allowed = match self {
            Self::Cancel => actor.is_admin() || actor.id == requester,
            Self::Approve | Self::Reject | Self::MarkBorrowed | Self::Return => actor.is_admin(),
        };
        if allowed {
            Ok(())
        } else {
            Err(LendingError::Unauthorized {
                actor: actor.id,
                event: self,
            })
        }
    }
}

impl fmt::Display for RequestEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestEvent {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approve" => Ok(Self::Approve),
            "reject" => Ok(Self::Reject),
            "borrow" | "mark_borrowed" => Ok(Self::MarkBorrowed),
            "return" => Ok(Self::Return),
            "cancel" => Ok(Self::Cancel),
            other => Err(ValidationError::UnknownEvent(other.to_string())),
        }
    }
}

/// What a transition asks of the inventory ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerEffect {
    None,
    Reserve,
    Release,
}

/// A resolved row of the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: RequestStatus,
    pub to: RequestStatus,
    pub event: RequestEvent,
    pub effect: LedgerEffect,
}

/// Inclusive borrowing period. `start <= end` holds by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ValidationError> {
        if end < start {
            return Err(ValidationError::EndBeforeStart { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }
}

/// One unvalidated `(book, quantity)` pair from the presentation layer's cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub book_id: BookId,
    pub quantity: i64,
}

impl CartItem {
    pub fn new(book_id: BookId, quantity: i64) -> Self {
        Self { book_id, quantity }
    }
}

/// An admitted line item. Immutable once its request exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestItem {
    pub book_id: BookId,
    pub quantity: u32,
}

/// Point-in-time view of a borrow request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowRequest {
    pub id: RequestId,
    pub requester: UserId,
    pub approver: Option<UserId>,
    pub request_date: NaiveDate,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: RequestStatus,
    pub items: Vec<RequestItem>,
}

impl BorrowRequest {
    /// Borrowed and past its end date as of `as_of`.
    pub fn is_overdue(&self, as_of: NaiveDate) -> bool {
        self.status == RequestStatus::Borrowed && self.end_date < as_of
    }

    /// The status a reader should see on `as_of`: the stored status, except
    /// that overdue borrowed requests read as [`RequestStatus::Overdue`].
    pub fn effective_status(&self, as_of: NaiveDate) -> RequestStatus {
        if self.is_overdue(as_of) {
            RequestStatus::Overdue
        } else {
            self.status
        }
    }

    pub fn total_quantity(&self) -> u64 {
        self.items.iter().map(|item| u64::from(item.quantity)).sum()
    }
}

#[derive(Debug)]
pub(crate) struct RequestState {
    pub(crate) status: RequestStatus,
    pub(crate) approver: Option<UserId>,
    /// Set when a pending request is deleted, for holders of a stale handle.
    pub(crate) removed: bool,
}

/// Stored request. Identity, dates and items never change after submission,
/// so they live outside the lock; only status and approver are guarded.
#[derive(Debug)]
pub(crate) struct RequestRecord {
    pub(crate) id: RequestId,
    pub(crate) requester: UserId,
    pub(crate) request_date: NaiveDate,
    pub(crate) dates: DateRange,
    /// Sorted by ascending book ID, matching the lock order.
    pub(crate) items: Vec<RequestItem>,
    pub(crate) state: Mutex<RequestState>,
}

impl RequestRecord {
    pub(crate) fn new(
        id: RequestId,
        requester: UserId,
        request_date: NaiveDate,
        dates: DateRange,
        mut items: Vec<RequestItem>,
    ) -> Self {
        items.sort_by_key(|item| item.book_id);
        Self {
            id,
            requester,
            request_date,
            dates,
            items,
            state: Mutex::new(RequestState {
                status: RequestStatus::Pending,
                approver: None,
                removed: false,
            }),
        }
    }

    pub(crate) fn snapshot_with(&self, state: &RequestState) -> BorrowRequest {
        BorrowRequest {
            id: self.id,
            requester: self.requester,
            approver: state.approver,
            request_date: self.request_date,
            start_date: self.dates.start(),
            end_date: self.dates.end(),
            status: state.status,
            items: self.items.clone(),
        }
    }

    /// `None` once the request has been deleted.
    pub(crate) fn snapshot(&self) -> Option<BorrowRequest> {
        let state = self.state.lock();
        (!state.removed).then(|| self.snapshot_with(&state))
    }
}
