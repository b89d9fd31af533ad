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

//! Borrow request processing engine.
//!
//! The [`Engine`] ties the catalog, the inventory ledger, the request state
//! machine, and the review/favorite aggregates together.
//!
//! # Request Processing
//!
//! - **Submission**: A cart of `(book, quantity)` pairs is validated item by
//!   item against current availability and stored as a `Pending` request.
//! - **Approval**: Re-validates every item against live, locked stock and
//!   reserves all of them, or none.
//! - **Rejection**: Closes a pending request without touching stock.
//! - **Borrow**: Hands out an approved request's reserved copies.
//! - **Return / Cancel**: Releases reserved copies back to available stock.
//!
//! # Thread Safety
//!
//! Books and requests are locked individually with a bounded wait (see
//! [`LockPolicy`](crate::LockPolicy)). A transition locks every book its
//! request references in ascending ID order, then the request itself, so
//! concurrent approvals on overlapping books serialize without deadlock.
//! Queries never take book locks and may observe slightly stale stock.

use crate::aggregates::{Favorable, Favorites, Review, ReviewStats, Reviews};
use crate::base::{AuthorId, BookId, RequestId, UserId};
use crate::book::{Author, Book, StockLevel};
use crate::config::EngineConfig;
use crate::error::{LendingError, LockedResource, SubmitError, ValidationError};
use crate::inventory::{Inventory, SearchField, StockGuards};
use crate::journal::{TransitionJournal, TransitionRecord};
use crate::request::{
    Actor, BorrowRequest, CartItem, LedgerEffect, RequestEvent, RequestItem, RequestRecord,
    RequestStatus,
};
use crate::validator::{validate_dates, validate_item};
use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, error, info};

/// A cart handed over by the presentation layer at submission time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Submission {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub items: Vec<CartItem>,
}

impl Submission {
    pub fn new(start_date: NaiveDate, end_date: NaiveDate, items: Vec<CartItem>) -> Self {
        Self {
            start_date: Some(start_date),
            end_date: Some(end_date),
            items,
        }
    }
}

/// Lending engine managing books, borrow requests, and reader feedback.
///
/// # Invariants
///
/// - Every book satisfies `0 <= available <= total`.
/// - A request lists each book at most once, with a positive quantity.
/// - Stock is reserved exactly while a request is `Approved` or `Borrowed`.
/// - Only administrators approve, reject, hand out, or take back requests.
pub struct Engine {
    inventory: Inventory,
    requests: DashMap<RequestId, Arc<RequestRecord>>,
    next_request_id: AtomicU32,
    journal: TransitionJournal,
    reviews: Reviews,
    favorites: Favorites,
    config: EngineConfig,
}

impl Engine {
    /// Creates an engine with no books or requests and the default lock policy.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Engine {
            inventory: Inventory::new(config.lock_policy),
            requests: DashMap::new(),
            next_request_id: AtomicU32::new(1),
            journal: TransitionJournal::new(),
            reviews: Reviews::new(),
            favorites: Favorites::new(),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // === Catalog ===

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    /// Registers a book with `total` copies, all available.
    pub fn add_book(
        &self,
        book_id: BookId,
        title: impl Into<String>,
        total: u32,
    ) -> Result<Arc<Book>, LendingError> {
        let book = self.inventory.add_book(Book::new(book_id, title, total))?;
        info!(%book_id, total, "book registered");
        Ok(book)
    }

    /// Registers a book written by an already registered author.
    pub fn add_book_with_author(
        &self,
        book_id: BookId,
        title: impl Into<String>,
        total: u32,
        author_id: AuthorId,
    ) -> Result<Arc<Book>, LendingError> {
        let book = self
            .inventory
            .add_book(Book::new(book_id, title, total).with_author(author_id))?;
        info!(%book_id, %author_id, total, "book registered");
        Ok(book)
    }

    pub fn add_author(&self, author_id: AuthorId, name: impl Into<String>) -> Result<Author, LendingError> {
        let author = self.inventory.add_author(Author::new(author_id, name))?;
        info!(%author_id, "author registered");
        Ok(author)
    }

    pub fn get_author(&self, author_id: AuthorId) -> Option<Author> {
        self.inventory.author(author_id)
    }

    pub fn get_book(&self, book_id: BookId) -> Option<Arc<Book>> {
        self.inventory.get(book_id)
    }

    /// All books, ordered by ID.
    pub fn books(&self) -> Vec<Arc<Book>> {
        self.inventory.books()
    }

    /// Other books by the same author as `book_id`, ordered by ID.
    pub fn recommended_books(&self, book_id: BookId) -> Result<Vec<Arc<Book>>, LendingError> {
        let book = self
            .inventory
            .get(book_id)
            .ok_or(LendingError::BookNotFound(book_id))?;
        Ok(book
            .author_id()
            .map(|author_id| self.inventory.books_by_author(author_id, Some(book_id)))
            .unwrap_or_default())
    }

    /// See [`Inventory::search`].
    pub fn search_books(&self, query: &str, field: SearchField) -> Vec<Arc<Book>> {
        self.inventory.search(query, field)
    }

    /// Administrative resize; see [`Inventory::adjust_total`].
    pub fn adjust_total(&self, book_id: BookId, new_total: u32) -> Result<StockLevel, LendingError> {
        self.inventory.adjust_total(book_id, new_total)
    }

    // === Request lifecycle ===

    /// Validates a cart and stores it as a pending request.
    ///
    /// Every line item is checked, and all problems are reported together.
    /// The stock check here is advisory; approval repeats it under lock.
    ///
    /// # Errors
    ///
    /// [`SubmitError`] listing each [`ValidationError`],
    /// [`LendingError::InsufficientStock`], or [`LendingError::BookNotFound`].
    /// Nothing is stored when any item fails. Once every `u32` ID has been
    /// issued, submissions fail with [`LendingError::RequestIdsExhausted`].
    pub fn submit_request(
        &self,
        requester: UserId,
        submission: &Submission,
    ) -> Result<BorrowRequest, SubmitError> {
        let mut errors: Vec<LendingError> = Vec::new();

        let dates = validate_dates(submission.start_date, submission.end_date)
            .map_err(|es| errors.extend(es.into_iter().map(LendingError::from)))
            .ok();

        if submission.items.is_empty() {
            errors.push(ValidationError::EmptyRequest.into());
        }

        let mut items: Vec<RequestItem> = Vec::with_capacity(submission.items.len());
        for cart_item in &submission.items {
            let Some(book) = self.inventory.get(cart_item.book_id) else {
                errors.push(LendingError::BookNotFound(cart_item.book_id));
                continue;
            };
            match validate_item(&book.stock(), cart_item.quantity, &items) {
                Ok(item) => items.push(item),
                Err(e) => errors.push(e),
            }
        }

        let dates = match dates {
            Some(dates) if errors.is_empty() => dates,
            _ => {
                debug!(%requester, errors = errors.len(), "submission rejected");
                return Err(SubmitError { errors });
            }
        };

        let request_id = self
            .next_request_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |id| id.checked_add(1))
            .map(RequestId)
            .map_err(|_| {
                error!(%requester, "request IDs exhausted");
                LendingError::RequestIdsExhausted
            })?;
        let record = Arc::new(RequestRecord::new(
            request_id,
            requester,
            Utc::now().date_naive(),
            dates,
            items,
        ));
        let snapshot = record.snapshot_with(&record.state.lock());
        self.requests.insert(request_id, record);

        info!(%request_id, %requester, items = snapshot.items.len(), "request submitted");
        Ok(snapshot)
    }

    /// Fires `event` on a request on behalf of `actor`.
    ///
    /// # Events
    ///
    /// | Event | From | To | Ledger |
    /// |-------|------|----|--------|
    /// | Approve | Pending | Approved | reserve every item |
    /// | Reject | Pending | Rejected | - |
    /// | MarkBorrowed | Approved | Borrowed | count copies handed out |
    /// | Return | Borrowed | Returned | release every item |
    /// | Cancel | Pending / Approved | Cancelled | release if approved |
    ///
    /// # Errors
    ///
    /// - [`LendingError::RequestNotFound`] - Unknown or deleted request.
    /// - [`LendingError::Unauthorized`] - Actor lacks the required role; checked first.
    /// - [`LendingError::IllegalTransition`] - Event not defined for the current status.
    /// - [`LendingError::InsufficientStock`] - Approval found an item no longer available.
    /// - [`LendingError::InvariantViolation`] - A release would overfill a book.
    /// - [`LendingError::LockTimeout`] - Contention outlasted the lock policy.
    ///
    /// On any error, neither the request nor any book is modified.
    pub fn transition(
        &self,
        request_id: RequestId,
        event: RequestEvent,
        actor: &Actor,
    ) -> Result<BorrowRequest, LendingError> {
        let record = self.record(request_id)?;

        let result = self.apply(&record, event, actor);
        match &result {
            Ok(request) => info!(
                %request_id,
                %event,
                status = %request.status,
                actor = %actor.id,
                "request transitioned"
            ),
            Err(e) if e.is_fatal() => error!(%request_id, %event, error = %e, "ledger corruption detected"),
            Err(e) => debug!(%request_id, %event, error = %e, "transition refused"),
        }
        result
    }

    fn apply(
        &self,
        record: &RequestRecord,
        event: RequestEvent,
        actor: &Actor,
    ) -> Result<BorrowRequest, LendingError> {
        event.authorize(actor, record.requester)?;

        let books = self.inventory.books_for(&record.items)?;
        let (mut stock, mut state) = self.config.lock_policy.acquire(|timeout| {
            let stock = StockGuards::try_acquire(&books, timeout)?;
            let state = record
                .state
                .try_lock_for(timeout)
                .ok_or(LockedResource::Request(record.id))?;
            Ok((stock, state))
        })?;

        if state.removed {
            return Err(LendingError::RequestNotFound(record.id));
        }

        let transition = state.status.transition(event)?;
        match transition.effect {
            LedgerEffect::Reserve => {
                // Stock may have moved since submission; replay admission.
                for (i, item) in record.items.iter().enumerate() {
                    let level = stock.level(item.book_id)?;
                    validate_item(&level, i64::from(item.quantity), &record.items[..i])?;
                }
                stock.reserve_all(&record.items)?;
            }
            LedgerEffect::Release => stock.release_all(&record.items)?,
            LedgerEffect::None => {}
        }
        if transition.to == RequestStatus::Borrowed {
            stock.record_borrows(&record.items)?;
        }

        if matches!(event, RequestEvent::Approve | RequestEvent::Reject) {
            state.approver = Some(actor.id);
        }
        state.status = transition.to;

        self.journal.push(TransitionRecord {
            request_id: record.id,
            from: transition.from,
            to: transition.to,
            event,
            actor: actor.id,
            at: Utc::now(),
        });

        Ok(record.snapshot_with(&state))
    }

    pub fn approve(&self, request_id: RequestId, actor: &Actor) -> Result<BorrowRequest, LendingError> {
        self.transition(request_id, RequestEvent::Approve, actor)
    }

    pub fn reject(&self, request_id: RequestId, actor: &Actor) -> Result<BorrowRequest, LendingError> {
        self.transition(request_id, RequestEvent::Reject, actor)
    }

    pub fn mark_borrowed(
        &self,
        request_id: RequestId,
        actor: &Actor,
    ) -> Result<BorrowRequest, LendingError> {
        self.transition(request_id, RequestEvent::MarkBorrowed, actor)
    }

    pub fn mark_returned(
        &self,
        request_id: RequestId,
        actor: &Actor,
    ) -> Result<BorrowRequest, LendingError> {
        self.transition(request_id, RequestEvent::Return, actor)
    }

    pub fn cancel(&self, request_id: RequestId, actor: &Actor) -> Result<BorrowRequest, LendingError> {
        self.transition(request_id, RequestEvent::Cancel, actor)
    }

    /// Deletes a request that is still pending. Anyone allowed to cancel the
    /// request may delete it.
    ///
    /// # Errors
    ///
    /// [`LendingError::NotDeletable`] once the request has left `Pending`;
    /// later requests are kept for history.
    pub fn delete_request(
        &self,
        request_id: RequestId,
        actor: &Actor,
    ) -> Result<BorrowRequest, LendingError> {
        let record = self.record(request_id)?;
        RequestEvent::Cancel.authorize(actor, record.requester)?;

        let snapshot = {
            let mut state = self.config.lock_policy.acquire(|timeout| {
                record
                    .state
                    .try_lock_for(timeout)
                    .ok_or(LockedResource::Request(request_id))
            })?;
            if state.removed {
                return Err(LendingError::RequestNotFound(request_id));
            }
            if state.status != RequestStatus::Pending {
                return Err(LendingError::NotDeletable {
                    request_id,
                    status: state.status,
                });
            }
            state.removed = true;
            record.snapshot_with(&state)
        };

        self.requests.remove(&request_id);
        info!(%request_id, actor = %actor.id, "pending request deleted");
        Ok(snapshot)
    }

    // === Queries ===

    fn record(&self, request_id: RequestId) -> Result<Arc<RequestRecord>, LendingError> {
        self.requests
            .get(&request_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(LendingError::RequestNotFound(request_id))
    }

    /// Handles to every stored request, ordered by ID.
    fn records(&self) -> Vec<Arc<RequestRecord>> {
        let mut records: Vec<_> = self.requests.iter().map(|e| Arc::clone(e.value())).collect();
        records.sort_by_key(|record| record.id);
        records
    }

    pub fn get_request(&self, request_id: RequestId) -> Option<BorrowRequest> {
        self.record(request_id).ok().and_then(|record| record.snapshot())
    }

    /// Every request, ordered by ID.
    pub fn requests(&self) -> Vec<BorrowRequest> {
        self.records().iter().filter_map(|r| r.snapshot()).collect()
    }

    /// Requests whose stored status is `status`.
    ///
    /// Overdue is never stored, so `RequestStatus::Overdue` matches nothing
    /// here; use [`Engine::overdue_requests`].
    pub fn requests_by_status(&self, status: RequestStatus) -> Vec<BorrowRequest> {
        self.records()
            .iter()
            .filter_map(|r| r.snapshot())
            .filter(|r| r.status == status)
            .collect()
    }

    pub fn requests_for_user(&self, user: UserId) -> Vec<BorrowRequest> {
        self.records()
            .iter()
            .filter(|r| r.requester == user)
            .filter_map(|r| r.snapshot())
            .collect()
    }

    /// Borrowed requests whose end date is before `as_of`, ordered by ID.
    ///
    /// The sequence is lazy over a snapshot of request handles taken when
    /// called; calling again restarts it. Stored statuses are not modified.
    pub fn overdue_requests(&self, as_of: NaiveDate) -> impl Iterator<Item = BorrowRequest> {
        self.records()
            .into_iter()
            .filter(move |record| record.dates.end() < as_of)
            .filter_map(|record| record.snapshot())
            .filter(move |request| request.is_overdue(as_of))
    }

    /// Committed transitions of one request, oldest first.
    pub fn history(&self, request_id: RequestId) -> Vec<TransitionRecord> {
        self.journal.history(request_id)
    }

    pub fn journal(&self) -> &TransitionJournal {
        &self.journal
    }

    // === Reviews and favorites ===

    /// Writes (or rewrites) `user`'s review of a book.
    pub fn write_review(
        &self,
        user: UserId,
        book_id: BookId,
        score: i64,
        comment: Option<String>,
    ) -> Result<Review, LendingError> {
        self.require_book(book_id)?;
        self.reviews.write(user, book_id, score, comment)
    }

    pub fn delete_review(&self, user: UserId, book_id: BookId) -> Result<Review, LendingError> {
        self.reviews.remove(user, book_id)
    }

    /// Reviews of a book, most recent first.
    pub fn reviews_for(&self, book_id: BookId) -> Vec<Review> {
        self.reviews.for_book(book_id)
    }

    /// Score distribution, count, and one-decimal average for a book.
    pub fn review_stats(&self, book_id: BookId) -> Result<ReviewStats, LendingError> {
        self.require_book(book_id)?;
        Ok(self.reviews.stats(book_id))
    }

    pub fn add_favorite(&self, user: UserId, target: Favorable) -> Result<(), LendingError> {
        match target {
            Favorable::Book(book_id) => self.require_book(book_id)?,
            Favorable::Author(author_id) => {
                self.inventory
                    .author(author_id)
                    .ok_or(LendingError::AuthorNotFound(author_id))?;
            }
        }
        self.favorites.add(user, target)
    }

    pub fn remove_favorite(&self, user: UserId, target: Favorable) -> Result<(), LendingError> {
        self.favorites.remove(user, target)
    }

    pub fn is_favorited(&self, user: UserId, target: Favorable) -> bool {
        self.favorites.contains(user, target)
    }

    pub fn favorite_count(&self, target: Favorable) -> usize {
        self.favorites.count(target)
    }

    pub fn favorites(&self) -> &Favorites {
        &self.favorites
    }

    fn require_book(&self, book_id: BookId) -> Result<(), LendingError> {
        self.inventory
            .get(book_id)
            .map(|_| ())
            .ok_or(LendingError::BookNotFound(book_id))
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
