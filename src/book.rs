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

//! Book stock counters.
//!
//! A [`Book`] is the unit of locking for the inventory ledger. Its counters
//! obey `0 <= available <= total` at all times; every mutation checks the
//! bound before writing, so a failed call leaves the counters untouched.
//!
//! ```text
//!  available ──reserve──► reserved (total - available)
//!      ▲                        │
//!      └────────release─────────┘
//! ```
//!
//! Counters only move through the [`Inventory`](crate::Inventory), which
//! takes the book lock with a bounded wait. A [`Book`] handed out by the
//! catalog is read-only.
//!
//! # Example
//!
//! ```
//! use book_lending_rs::{Author, AuthorId, Book, BookId, Inventory};
//!
//! let inventory = Inventory::default();
//! inventory.add_author(Author::new(AuthorId(2), "Frank Herbert")).unwrap();
//! inventory
//!     .add_book(Book::new(BookId(1), "Dune", 5).with_author(AuthorId(2)))
//!     .unwrap();
//!
//! inventory.reserve(BookId(1), 3).unwrap();
//! let book = inventory.get(BookId(1)).unwrap();
//! assert_eq!(book.available(), 2);
//! assert_eq!(book.reserved(), 3);
//! assert_eq!(book.author_id(), Some(AuthorId(2)));
//! ```

use crate::base::{AuthorId, BookId};
use crate::error::{LendingError, ValidationError};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use serde::ser::{SerializeStruct, Serializer};
use std::time::Duration;

/// Read-only copy of a book's counters, taken under the book lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StockLevel {
    pub book_id: BookId,
    pub total: u32,
    pub available: u32,
}

impl StockLevel {
    pub fn reserved(&self) -> u32 {
        self.total - self.available
    }
}

#[derive(Debug)]
pub(crate) struct StockData {
    book_id: BookId,
    total: u32,
    available: u32,
    /// Units handed out over the book's lifetime.
    borrow_count: u64,
}

impl StockData {
    fn new(book_id: BookId, total: u32) -> Self {
        Self {
            book_id,
            total,
            available: total,
            borrow_count: 0,
        }
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.available <= self.total,
            "Invariant violated: book {} available {} exceeds total {}",
            self.book_id,
            self.available,
            self.total
        );
    }

    pub(crate) fn level(&self) -> StockLevel {
        StockLevel {
            book_id: self.book_id,
            total: self.total,
            available: self.available,
        }
    }

    fn invariant(&self, reason: String) -> LendingError {
        LendingError::InvariantViolation {
            book_id: self.book_id,
            reason,
        }
    }

    /// Checks a reservation without applying it.
    pub(crate) fn check_reserve(&self, quantity: u32) -> Result<(), LendingError> {
        if quantity == 0 {
            return Err(ValidationError::InvalidQuantity {
                book_id: self.book_id,
                quantity: 0,
            }
            .into());
        }
        if quantity > self.available {
            return Err(LendingError::InsufficientStock {
                book_id: self.book_id,
                requested: i64::from(quantity),
                available: self.available,
            });
        }
        Ok(())
    }

    /// Checks a release without applying it.
    pub(crate) fn check_release(&self, quantity: u32) -> Result<(), LendingError> {
        match self.available.checked_add(quantity) {
            Some(next) if next <= self.total => Ok(()),
            _ => Err(self.invariant(format!(
                "releasing {} would raise available {} above total {}",
                quantity, self.available, self.total
            ))),
        }
    }

    /// Decreases available stock.
    pub(crate) fn reserve(&mut self, quantity: u32) -> Result<(), LendingError> {
        self.check_reserve(quantity)?;
        self.available -= quantity;
        self.assert_invariants();
        Ok(())
    }

    /// Increases available stock. Never clamps: an over-release is reported.
    pub(crate) fn release(&mut self, quantity: u32) -> Result<(), LendingError> {
        self.check_release(quantity)?;
        self.available += quantity;
        self.assert_invariants();
        Ok(())
    }

    /// Resizes the copy count while keeping outstanding reservations intact.
    pub(crate) fn adjust_total(&mut self, new_total: u32) -> Result<(), LendingError> {
        let reserved = self.total - self.available;
        if new_total < reserved {
            return Err(self.invariant(format!(
                "new total {new_total} is below the {reserved} copies currently reserved"
            )));
        }
        self.total = new_total;
        self.available = new_total - reserved;
        self.assert_invariants();
        Ok(())
    }

    pub(crate) fn record_borrow(&mut self, quantity: u32) {
        self.borrow_count += u64::from(quantity);
    }
}

/// Writer of catalog books.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Author {
    pub id: AuthorId,
    pub name: String,
}

impl Author {
    pub fn new(id: AuthorId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// A catalog book and its lockable stock counters.
///
/// Stock cannot be moved through a shared handle:
///
/// ```compile_fail
/// use book_lending_rs::{Book, BookId};
///
/// let book = Book::new(BookId(1), "Dune", 5);
/// book.release(1).unwrap();
/// ```
#[derive(Debug)]
pub struct Book {
    id: BookId,
    title: String,
    author_id: Option<AuthorId>,
    inner: Mutex<StockData>,
}

impl Book {
    pub fn new(id: BookId, title: impl Into<String>, total: u32) -> Self {
        Self {
            id,
            title: title.into(),
            author_id: None,
            inner: Mutex::new(StockData::new(id, total)),
        }
    }

    pub fn with_author(mut self, author_id: AuthorId) -> Self {
        self.author_id = Some(author_id);
        self
    }

    pub fn id(&self) -> BookId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn author_id(&self) -> Option<AuthorId> {
        self.author_id
    }

    pub fn total(&self) -> u32 {
        self.inner.lock().total
    }

    pub fn available(&self) -> u32 {
        self.inner.lock().available
    }

    /// Returns `total - available`.
    pub fn reserved(&self) -> u32 {
        let data = self.inner.lock();
        data.total - data.available
    }

    pub fn borrow_count(&self) -> u64 {
        self.inner.lock().borrow_count
    }

    /// Consistent snapshot of total and available.
    pub fn stock(&self) -> StockLevel {
        self.inner.lock().level()
    }

    pub(crate) fn try_lock_for(&self, timeout: Duration) -> Option<MutexGuard<'_, StockData>> {
        self.inner.try_lock_for(timeout)
    }
}

impl Serialize for Book {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = self.inner.lock();
        let mut state = serializer.serialize_struct("Book", 7)?;
        state.serialize_field("book", &self.id)?;
        state.serialize_field("title", &self.title)?;
        state.serialize_field("author", &self.author_id)?;
        state.serialize_field("total", &data.total)?;
        state.serialize_field("available", &data.available)?;
        state.serialize_field("reserved", &(data.total - data.available))?;
        state.serialize_field("borrow_count", &data.borrow_count)?;
        state.end()
    }
}
