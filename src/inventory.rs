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

//! Inventory ledger.
//!
//! The [`Inventory`] owns every [`Book`] and is the only component allowed to
//! move stock counters. Single-book operations lock one book with a bounded
//! wait; lifecycle transitions lock a sorted set of books through
//! [`StockGuards`] and apply all of their changes as one unit.
//!
//! # Lock order
//!
//! Books are always locked in ascending [`BookId`] order, and a borrow
//! request's own lock is taken after all of its books. Two transitions that
//! overlap on some books therefore contend on the lowest shared book first
//! and can never hold each other's locks in a cycle.

use crate::base::{AuthorId, BookId};
use crate::book::{Author, Book, StockData, StockLevel};
use crate::config::LockPolicy;
use crate::error::{LendingError, LockedResource};
use crate::request::RequestItem;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::MutexGuard;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Locks held over a set of books, sorted by ascending book ID.
pub(crate) struct StockGuards<'a> {
    guards: Vec<MutexGuard<'a, StockData>>,
}

impl<'a> StockGuards<'a> {
    /// Tries each book's lock in order, waiting at most `timeout` per book.
    ///
    /// `books` must already be sorted and deduplicated. On failure every lock
    /// taken so far is released and the blocking book is reported.
    pub(crate) fn try_acquire(
        books: &'a [Arc<Book>],
        timeout: Duration,
    ) -> Result<Self, LockedResource> {
        debug_assert!(books.windows(2).all(|w| w[0].id() < w[1].id()));

        let mut guards = Vec::with_capacity(books.len());
        for book in books {
            match book.try_lock_for(timeout) {
                Some(guard) => guards.push(guard),
                None => return Err(LockedResource::Book(book.id())),
            }
        }
        Ok(Self { guards })
    }

    fn get(&self, book_id: BookId) -> Result<&StockData, LendingError> {
        self.position(book_id).map(|i| &*self.guards[i])
    }

    fn get_mut(&mut self, book_id: BookId) -> Result<&mut StockData, LendingError> {
        let i = self.position(book_id)?;
        Ok(&mut *self.guards[i])
    }

    fn position(&self, book_id: BookId) -> Result<usize, LendingError> {
        self.guards
            .binary_search_by_key(&book_id, |guard| guard.level().book_id)
            .map_err(|_| LendingError::BookNotFound(book_id))
    }

    /// Live counters for a locked book.
    pub(crate) fn level(&self, book_id: BookId) -> Result<StockLevel, LendingError> {
        self.get(book_id).map(StockData::level)
    }

    /// Reserves every item or none of them.
    pub(crate) fn reserve_all(&mut self, items: &[RequestItem]) -> Result<(), LendingError> {
        for item in items {
            self.get(item.book_id)?.check_reserve(item.quantity)?;
        }
        for item in items {
            self.get_mut(item.book_id)?.reserve(item.quantity)?;
        }
        Ok(())
    }

    /// Releases every item or none of them.
    pub(crate) fn release_all(&mut self, items: &[RequestItem]) -> Result<(), LendingError> {
        for item in items {
            if let Err(e) = self.get(item.book_id)?.check_release(item.quantity) {
                error!(book_id = %item.book_id, error = %e, "ledger release rejected");
                return Err(e);
            }
        }
        for item in items {
            self.get_mut(item.book_id)?.release(item.quantity)?;
        }
        Ok(())
    }

    pub(crate) fn record_borrows(&mut self, items: &[RequestItem]) -> Result<(), LendingError> {
        for item in items {
            self.get_mut(item.book_id)?.record_borrow(item.quantity);
        }
        Ok(())
    }
}

/// Which catalog text a search query is matched against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchField {
    Title,
    Author,
    #[default]
    All,
}

/// Catalog of books and their authors, indexed by ID.
#[derive(Debug)]
pub struct Inventory {
    books: DashMap<BookId, Arc<Book>>,
    authors: DashMap<AuthorId, Author>,
    policy: LockPolicy,
}

impl Inventory {
    pub fn new(policy: LockPolicy) -> Self {
        Self {
            books: DashMap::new(),
            authors: DashMap::new(),
            policy,
        }
    }

    /// # Errors
    ///
    /// [`LendingError::DuplicateAuthor`] if the ID is already taken.
    pub fn add_author(&self, author: Author) -> Result<Author, LendingError> {
        match self.authors.entry(author.id) {
            Entry::Occupied(_) => Err(LendingError::DuplicateAuthor(author.id)),
            Entry::Vacant(entry) => Ok(entry.insert(author).value().clone()),
        }
    }

    pub fn author(&self, author_id: AuthorId) -> Option<Author> {
        self.authors.get(&author_id).map(|entry| entry.value().clone())
    }

    /// Registers a book.
    ///
    /// # Errors
    ///
    /// - [`LendingError::DuplicateBook`] - The ID is already taken.
    /// - [`LendingError::AuthorNotFound`] - The book names an unregistered author.
    pub fn add_book(&self, book: Book) -> Result<Arc<Book>, LendingError> {
        if let Some(author_id) = book.author_id() {
            if !self.authors.contains_key(&author_id) {
                return Err(LendingError::AuthorNotFound(author_id));
            }
        }
        match self.books.entry(book.id()) {
            Entry::Occupied(_) => Err(LendingError::DuplicateBook(book.id())),
            Entry::Vacant(entry) => {
                let book = Arc::new(book);
                entry.insert(Arc::clone(&book));
                Ok(book)
            }
        }
    }

    pub fn get(&self, book_id: BookId) -> Option<Arc<Book>> {
        self.books.get(&book_id).map(|entry| Arc::clone(entry.value()))
    }

    /// All books, ordered by ID.
    pub fn books(&self) -> Vec<Arc<Book>> {
        let mut books: Vec<_> = self.books.iter().map(|e| Arc::clone(e.value())).collect();
        books.sort_by_key(|book| book.id());
        books
    }

    /// Books written by `author_id`, ordered by ID, optionally leaving one out.
    pub fn books_by_author(&self, author_id: AuthorId, excluding: Option<BookId>) -> Vec<Arc<Book>> {
        self.books()
            .into_iter()
            .filter(|book| book.author_id() == Some(author_id) && Some(book.id()) != excluding)
            .collect()
    }

    /// Case-insensitive substring search, ordered by title.
    ///
    /// A blank query matches every book.
    pub fn search(&self, query: &str, field: SearchField) -> Vec<Arc<Book>> {
        let needle = query.trim().to_lowercase();
        let author_matches = |book: &Book| {
            book.author_id()
                .and_then(|id| self.author(id))
                .is_some_and(|author| author.name.to_lowercase().contains(&needle))
        };

        let mut books: Vec<_> = self
            .books()
            .into_iter()
            .filter(|book| {
                needle.is_empty()
                    || match field {
                        SearchField::Title => book.title().to_lowercase().contains(&needle),
                        SearchField::Author => author_matches(book),
                        SearchField::All => {
                            book.title().to_lowercase().contains(&needle) || author_matches(book)
                        }
                    }
            })
            .collect();
        books.sort_by(|a, b| a.title().cmp(b.title()).then(a.id().cmp(&b.id())));
        books
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    pub fn policy(&self) -> &LockPolicy {
        &self.policy
    }

    fn require(&self, book_id: BookId) -> Result<Arc<Book>, LendingError> {
        self.get(book_id).ok_or(LendingError::BookNotFound(book_id))
    }

    /// Looks up the books for `items` in lock order.
    pub(crate) fn books_for(&self, items: &[RequestItem]) -> Result<Vec<Arc<Book>>, LendingError> {
        let mut books = items
            .iter()
            .map(|item| self.require(item.book_id))
            .collect::<Result<Vec<_>, _>>()?;
        books.sort_by_key(|book| book.id());
        books.dedup_by_key(|book| book.id());
        Ok(books)
    }

    fn with_stock<T>(
        &self,
        book_id: BookId,
        apply: impl FnOnce(&mut StockData) -> Result<T, LendingError>,
    ) -> Result<T, LendingError> {
        let book = self.require(book_id)?;
        let mut stock = self
            .policy
            .acquire(|timeout| book.try_lock_for(timeout).ok_or(LockedResource::Book(book_id)))?;
        apply(&mut stock)
    }

    /// Decreases a book's available quantity.
    ///
    /// # Errors
    ///
    /// - [`LendingError::BookNotFound`] - Unknown book.
    /// - [`LendingError::InsufficientStock`] - `quantity` exceeds available stock.
    /// - [`LendingError::LockTimeout`] - The book stayed locked past the policy.
    pub fn reserve(&self, book_id: BookId, quantity: u32) -> Result<StockLevel, LendingError> {
        self.with_stock(book_id, |stock| {
            stock.reserve(quantity)?;
            debug!(%book_id, quantity, "reserved stock");
            Ok(stock.level())
        })
    }

    /// Increases a book's available quantity.
    ///
    /// # Errors
    ///
    /// [`LendingError::InvariantViolation`] if available would exceed total.
    pub fn release(&self, book_id: BookId, quantity: u32) -> Result<StockLevel, LendingError> {
        self.with_stock(book_id, |stock| {
            stock.release(quantity).inspect_err(|e| {
                error!(%book_id, quantity, error = %e, "ledger release rejected");
            })?;
            debug!(%book_id, quantity, "released stock");
            Ok(stock.level())
        })
    }

    /// Administrative resize of a book's total copies.
    ///
    /// # Errors
    ///
    /// [`LendingError::InvariantViolation`] if `new_total` is below the
    /// number of copies currently reserved.
    pub fn adjust_total(&self, book_id: BookId, new_total: u32) -> Result<StockLevel, LendingError> {
        self.with_stock(book_id, |stock| {
            stock.adjust_total(new_total)?;
            debug!(%book_id, new_total, "adjusted total");
            Ok(stock.level())
        })
    }
}

impl Default for Inventory {
    fn default() -> Self {
        Self::new(LockPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(book: u32, quantity: u32) -> RequestItem {
        RequestItem {
            book_id: BookId(book),
            quantity,
        }
    }

    fn inventory_with(stock: &[(u32, u32)]) -> Inventory {
        let inventory = Inventory::default();
        for &(id, total) in stock {
            inventory.add_book(Book::new(BookId(id), format!("book {id}"), total)).unwrap();
        }
        inventory
    }

    #[test]
    fn duplicate_book_is_rejected() {
        let inventory = inventory_with(&[(1, 1)]);
        let result = inventory.add_book(Book::new(BookId(1), "again", 3));
        assert_eq!(result.unwrap_err(), LendingError::DuplicateBook(BookId(1)));
    }

    #[test]
    fn books_are_sorted() {
        let inventory = inventory_with(&[(3, 1), (1, 1), (2, 1)]);
        let ids: Vec<_> = inventory.books().iter().map(|b| b.id()).collect();
        assert_eq!(ids, vec![BookId(1), BookId(2), BookId(3)]);
    }

    #[test]
    fn reserve_all_is_all_or_nothing() {
        let inventory = inventory_with(&[(1, 5), (2, 1)]);
        let items = [item(1, 3), item(2, 2)];
        let books = inventory.books_for(&items).unwrap();

        let mut guards = StockGuards::try_acquire(&books, Duration::from_millis(10)).unwrap();
        let result = guards.reserve_all(&items);
        assert!(matches!(
            result,
            Err(LendingError::InsufficientStock { book_id, .. }) if book_id == BookId(2)
        ));
        drop(guards);

        assert_eq!(inventory.get(BookId(1)).unwrap().available(), 5);
        assert_eq!(inventory.get(BookId(2)).unwrap().available(), 1);
    }

    #[test]
    fn release_all_is_all_or_nothing() {
        let inventory = inventory_with(&[(1, 5), (2, 5)]);
        inventory.reserve(BookId(1), 2).unwrap();
        let items = [item(1, 2), item(2, 1)];
        let books = inventory.books_for(&items).unwrap();

        let mut guards = StockGuards::try_acquire(&books, Duration::from_millis(10)).unwrap();
        assert!(guards.release_all(&items).unwrap_err().is_fatal());
        drop(guards);

        assert_eq!(inventory.get(BookId(1)).unwrap().available(), 3);
    }

    #[test]
    fn try_acquire_reports_blocked_book() {
        let inventory = inventory_with(&[(1, 1), (2, 1)]);
        let books = inventory.books_for(&[item(1, 1), item(2, 1)]).unwrap();
        let held = books[1].try_lock_for(Duration::from_millis(10)).unwrap();

        let result = StockGuards::try_acquire(&books, Duration::from_millis(5));
        assert_eq!(result.err(), Some(LockedResource::Book(BookId(2))));

        // The first book's lock was released on failure.
        assert!(books[0].try_lock_for(Duration::from_millis(5)).is_some());
        drop(held);
    }

    #[test]
    fn single_book_operations() {
        let inventory = inventory_with(&[(1, 5)]);
        assert_eq!(inventory.reserve(BookId(1), 3).unwrap().available, 2);
        assert_eq!(inventory.release(BookId(1), 1).unwrap().available, 3);
        let level = inventory.adjust_total(BookId(1), 8).unwrap();
        assert_eq!((level.total, level.available), (8, 6));
        assert_eq!(
            inventory.reserve(BookId(9), 1),
            Err(LendingError::BookNotFound(BookId(9)))
        );
    }

    #[test]
    fn held_book_times_out() {
        let inventory = Inventory::new(LockPolicy::new(Duration::from_millis(1), 2, Duration::ZERO));
        let book = inventory.add_book(Book::new(BookId(4), "held", 1)).unwrap();
        let held = book.try_lock_for(Duration::from_millis(10)).unwrap();

        assert_eq!(
            inventory.reserve(BookId(4), 1),
            Err(LendingError::LockTimeout {
                resource: LockedResource::Book(BookId(4)),
            })
        );
        drop(held);
        assert!(inventory.reserve(BookId(4), 1).is_ok());
    }

    fn catalog() -> Inventory {
        let inventory = Inventory::default();
        inventory.add_author(Author::new(AuthorId(1), "Ursula K. Le Guin")).unwrap();
        inventory.add_author(Author::new(AuthorId(2), "Octavia E. Butler")).unwrap();
        for (id, title, author) in [
            (1, "The Dispossessed", 1),
            (2, "Kindred", 2),
            (3, "The Lathe of Heaven", 1),
            (4, "Parable of the Sower", 2),
        ] {
            inventory
                .add_book(Book::new(BookId(id), title, 1).with_author(AuthorId(author)))
                .unwrap();
        }
        inventory.add_book(Book::new(BookId(5), "Beowulf", 1)).unwrap();
        inventory
    }

    fn ids(books: &[Arc<Book>]) -> Vec<u32> {
        books.iter().map(|book| book.id().0).collect()
    }

    #[test]
    fn book_requires_registered_author() {
        let inventory = Inventory::default();
        assert_eq!(
            inventory.add_book(Book::new(BookId(1), "Dune", 1).with_author(AuthorId(3))).unwrap_err(),
            LendingError::AuthorNotFound(AuthorId(3))
        );
        assert!(inventory.is_empty());

        inventory.add_author(Author::new(AuthorId(3), "Frank Herbert")).unwrap();
        assert_eq!(
            inventory.add_author(Author::new(AuthorId(3), "F. Herbert")),
            Err(LendingError::DuplicateAuthor(AuthorId(3)))
        );
        assert!(inventory.add_book(Book::new(BookId(1), "Dune", 1).with_author(AuthorId(3))).is_ok());
        assert_eq!(inventory.author(AuthorId(3)).unwrap().name, "Frank Herbert");
    }

    #[test]
    fn books_by_author_leaves_out_current_book() {
        let inventory = catalog();
        assert_eq!(ids(&inventory.books_by_author(AuthorId(1), None)), vec![1, 3]);
        assert_eq!(ids(&inventory.books_by_author(AuthorId(2), Some(BookId(2)))), vec![4]);
        assert!(inventory.books_by_author(AuthorId(9), None).is_empty());
    }

    #[test]
    fn search_matches_title_or_author() {
        let inventory = catalog();
        assert_eq!(ids(&inventory.search("of", SearchField::Title)), vec![4, 3]);
        assert_eq!(ids(&inventory.search("BUTLER", SearchField::Author)), vec![2, 4]);
        assert_eq!(ids(&inventory.search("  le guin ", SearchField::All)), vec![1, 3]);
        assert_eq!(ids(&inventory.search("sower", SearchField::Author)), Vec::<u32>::new());
    }

    #[test]
    fn blank_search_lists_every_book_by_title() {
        let inventory = catalog();
        assert_eq!(ids(&inventory.search("", SearchField::All)), vec![5, 2, 4, 1, 3]);
    }

    #[test]
    fn books_for_unknown_book_fails() {
        let inventory = inventory_with(&[(1, 5)]);
        assert_eq!(
            inventory.books_for(&[item(1, 1), item(7, 1)]).unwrap_err(),
            LendingError::BookNotFound(BookId(7))
        );
    }
}
