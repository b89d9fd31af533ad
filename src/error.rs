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

//! Error types for inventory and borrow request processing.

use crate::base::{AuthorId, BookId, RequestId, UserId};
use crate::request::{RequestEvent, RequestStatus};
use chrono::NaiveDate;
use std::fmt;
use thiserror::Error;

/// Field-level validation failures. Always recoverable by the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Requested quantity is zero or negative
    #[error("invalid quantity {quantity} for book {book_id} (must be positive)")]
    InvalidQuantity { book_id: BookId, quantity: i64 },

    /// The same book is listed twice in one request
    #[error("book {0} appears more than once in the request")]
    DuplicateBookInRequest(BookId),

    /// A required date was not supplied
    #[error("missing {0}")]
    MissingDate(&'static str),

    /// End date precedes start date
    #[error("end date {end} must not be before start date {start}")]
    EndBeforeStart { start: NaiveDate, end: NaiveDate },

    /// Submission carried no line items
    #[error("request must contain at least one item")]
    EmptyRequest,

    /// Review score outside 1..=5
    #[error("score {0} must be between 1 and 5")]
    ScoreOutOfRange(i64),

    /// Status string outside the closed status set
    #[error("unknown request status `{0}`")]
    UnknownStatus(String),

    /// Role string outside the closed role set
    #[error("unknown role `{0}`")]
    UnknownRole(String),

    /// Event string outside the closed event set
    #[error("unknown request event `{0}`")]
    UnknownEvent(String),
}

impl ValidationError {
    /// Name of the offending input field.
    pub fn field(&self) -> &'static str {
        match self {
            Self::InvalidQuantity { .. } => "quantity",
            Self::DuplicateBookInRequest(_) => "book_id",
            Self::MissingDate(field) => *field,
            Self::EndBeforeStart { .. } => "end_date",
            Self::EmptyRequest => "items",
            Self::ScoreOutOfRange(_) => "score",
            Self::UnknownStatus(_) => "status",
            Self::UnknownRole(_) => "role",
            Self::UnknownEvent(_) => "event",
        }
    }
}

/// A lockable resource, reported when a bounded lock wait gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockedResource {
    Book(BookId),
    Request(RequestId),
}

impl fmt::Display for LockedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Book(id) => write!(f, "book {id}"),
            Self::Request(id) => write!(f, "request {id}"),
        }
    }
}

/// Inventory and lifecycle errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LendingError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Reservation would exceed the book's available quantity
    #[error("insufficient stock for book {book_id}: requested {requested}, available {available}")]
    InsufficientStock {
        book_id: BookId,
        requested: i64,
        available: u32,
    },

    /// Event is not defined for the request's current status
    #[error("cannot {event} a request that is {status}")]
    IllegalTransition {
        status: RequestStatus,
        event: RequestEvent,
    },

    /// Actor lacks the role (or ownership) the event requires
    #[error("user {actor} is not allowed to {event} this request")]
    Unauthorized { actor: UserId, event: RequestEvent },

    /// Stock counters would leave `0 <= available <= total`
    #[error("inventory invariant violated for book {book_id}: {reason}")]
    InvariantViolation { book_id: BookId, reason: String },

    #[error("book {0} not found")]
    BookNotFound(BookId),

    #[error("request {0} not found")]
    RequestNotFound(RequestId),

    /// Book ID already registered in the catalog
    #[error("book {0} already exists")]
    DuplicateBook(BookId),

    #[error("author {0} not found")]
    AuthorNotFound(AuthorId),

    #[error("author {0} already exists")]
    DuplicateAuthor(AuthorId),

    /// Every request ID has been handed out
    #[error("no request IDs left to assign")]
    RequestIdsExhausted,

    /// Only pending requests may be deleted
    #[error("request {request_id} is {status} and cannot be deleted")]
    NotDeletable {
        request_id: RequestId,
        status: RequestStatus,
    },

    /// Bounded lock wait exhausted its retries
    #[error("timed out waiting for {resource}")]
    LockTimeout { resource: LockedResource },

    #[error("user {user} has already favorited this item")]
    DuplicateFavorite { user: UserId },

    #[error("favorite not found")]
    FavoriteNotFound,

    #[error("review not found")]
    ReviewNotFound,
}

impl LendingError {
    /// Returns `true` for internal consistency failures that indicate
    /// ledger corruption rather than bad input.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvariantViolation { .. })
    }
}

/// Every problem found while admitting a cart into a new request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("request rejected with {} error(s)", .errors.len())]
pub struct SubmitError {
    pub errors: Vec<LendingError>,
}

impl SubmitError {
    pub fn errors(&self) -> &[LendingError] {
        &self.errors
    }
}

impl From<LendingError> for SubmitError {
    fn from(error: LendingError) -> Self {
        Self {
            errors: vec![error],
        }
    }
}
