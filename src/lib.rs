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

//! # Book Lending
//!
//! This library tracks lendable book stock and the lifecycle of borrow
//! requests against it: submission, approval, hand-out, return, and
//! cancellation, with reviews and favorites derived alongside.
//!
//! ## Core Components
//!
//! - [`Engine`]: Central request processor owning the catalog and every request
//! - [`Book`]: Lockable stock counters with `0 <= available <= total`
//! - [`RequestStatus`] / [`RequestEvent`]: The borrow request state machine
//! - [`LendingError`]: Error types for rejected commands and ledger faults
//!
//! ## Example
//!
//! ```
//! use book_lending_rs::{Actor, BookId, CartItem, Engine, RequestStatus, Submission, UserId};
//! use chrono::NaiveDate;
//!
//! let engine = Engine::new();
//! engine.add_book(BookId(1), "The Dispossessed", 3).unwrap();
//!
//! let start = NaiveDate::from_ymd_opt(2025, 5, 1).unwrap();
//! let end = NaiveDate::from_ymd_opt(2025, 5, 14).unwrap();
//! let request = engine
//!     .submit_request(
//!         UserId(7),
//!         &Submission::new(start, end, vec![CartItem::new(BookId(1), 2)]),
//!     )
//!     .unwrap();
//!
//! // Approval reserves the copies
//! let approved = engine.approve(request.id, &Actor::admin(1)).unwrap();
//! assert_eq!(approved.status, RequestStatus::Approved);
//! assert_eq!(engine.get_book(BookId(1)).unwrap().available(), 1);
//! ```
//!
//! ## Thread Safety
//!
//! Books and requests are locked individually, so transitions on requests
//! that share no books run in parallel. Overlapping transitions take book
//! locks in ascending ID order with bounded waits; see [`LockPolicy`].

pub mod aggregates;
mod base;
pub mod book;
pub mod config;
mod engine;
pub mod error;
mod inventory;
pub mod journal;
pub mod request;
pub mod validator;

pub use aggregates::{Favorable, Review, ReviewStats};
pub use base::{AuthorId, BookId, RequestId, UserId};
pub use book::{Author, Book, StockLevel};
pub use config::{EngineConfig, LockPolicy};
pub use engine::{Engine, Submission};
pub use error::{LendingError, LockedResource, SubmitError, ValidationError};
pub use inventory::{Inventory, SearchField};
pub use journal::{TransitionJournal, TransitionRecord};
pub use request::{
    Actor, BorrowRequest, CartItem, DateRange, RequestEvent, RequestItem, RequestStatus, Role,
};
