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

//! Property-based tests for the lending engine.
//!
//! These tests verify invariants that should hold for any sequence of
//! commands, accepted or rejected.

use book_lending_rs::validator::validate_item;
use book_lending_rs::{
    Actor, Book, BookId, CartItem, Engine, Inventory, LendingError, RequestEvent, RequestId,
    RequestItem, RequestStatus, ReviewStats, StockLevel, Submission, UserId,
};
use chrono::NaiveDate;
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::collections::HashSet;

const NUM_BOOKS: u32 = 4;

// =============================================================================
// Arbitrary Strategies
// =============================================================================

#[derive(Debug, Clone)]
enum Op {
    Submit { user: u32, items: Vec<(u32, i64)> },
    Fire { request: u32, event: RequestEvent, admin: bool },
    Delete { request: u32 },
    Resize { book: u32, total: u32 },
}

fn arb_event() -> impl Strategy<Value = RequestEvent> {
    prop_oneof![
        Just(RequestEvent::Approve),
        Just(RequestEvent::Reject),
        Just(RequestEvent::MarkBorrowed),
        Just(RequestEvent::Return),
        Just(RequestEvent::Cancel),
    ]
}

/// Carts may name unknown books, repeat books, or ask for bad quantities.
fn arb_cart() -> impl Strategy<Value = Vec<(u32, i64)>> {
    prop::collection::vec((1..=NUM_BOOKS + 1, -1i64..6), 0..4)
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (1u32..4, arb_cart()).prop_map(|(user, items)| Op::Submit { user, items }),
        6 => (1u32..12, arb_event(), any::<bool>())
            .prop_map(|(request, event, admin)| Op::Fire { request, event, admin }),
        1 => (1u32..12).prop_map(|request| Op::Delete { request }),
        1 => (1..=NUM_BOOKS, 0u32..12).prop_map(|(book, total)| Op::Resize { book, total }),
    ]
}

fn date(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 7, d).unwrap()
}

fn seeded_engine(totals: &[u32]) -> Engine {
    let engine = Engine::new();
    for (i, &total) in totals.iter().enumerate() {
        engine.add_book(BookId(i as u32 + 1), format!("Book {}", i + 1), total).unwrap();
    }
    engine
}

fn apply(engine: &Engine, op: &Op) {
    match op {
        Op::Submit { user, items } => {
            let items = items
                .iter()
                .map(|&(book, quantity)| CartItem::new(BookId(book), quantity))
                .collect();
            let _ = engine.submit_request(UserId(*user), &Submission::new(date(1), date(10), items));
        }
        Op::Fire { request, event, admin } => {
            let actor = if *admin { Actor::admin(100) } else { Actor::user(1) };
            let _ = engine.transition(RequestId(*request), *event, &actor);
        }
        Op::Delete { request } => {
            let _ = engine.delete_request(RequestId(*request), &Actor::admin(100));
        }
        Op::Resize { book, total } => {
            let _ = engine.adjust_total(BookId(*book), *total);
        }
    }
}

/// Reserved copies per book must equal what approved and borrowed requests hold.
fn check_ledger(engine: &Engine) -> Result<(), TestCaseError> {
    let requests = engine.requests();
    for book in engine.books() {
        let stock = book.stock();
        prop_assert!(stock.available <= stock.total);

        let held: u64 = requests
            .iter()
            .filter(|r| matches!(r.status, RequestStatus::Approved | RequestStatus::Borrowed))
            .flat_map(|r| r.items.iter())
            .filter(|item| item.book_id == stock.book_id)
            .map(|item| u64::from(item.quantity))
            .sum();
        prop_assert_eq!(u64::from(stock.reserved()), held);
    }
    for request in &requests {
        let distinct: HashSet<_> = request.items.iter().map(|i| i.book_id).collect();
        prop_assert_eq!(distinct.len(), request.items.len());
        prop_assert!(request.items.iter().all(|i| i.quantity > 0));
        prop_assert!(request.start_date <= request.end_date);
        prop_assert_ne!(request.status, RequestStatus::Overdue);
    }
    Ok(())
}

// =============================================================================
// Ledger Invariant Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// `0 <= available <= total` and reservations track request states after
    /// every command.
    #[test]
    fn ledger_consistent_after_any_command_sequence(
        totals in prop::collection::vec(0u32..6, NUM_BOOKS as usize),
        ops in prop::collection::vec(arb_op(), 1..60),
    ) {
        let engine = seeded_engine(&totals);
        for op in &ops {
            apply(&engine, op);
            check_ledger(&engine)?;
        }
    }

    /// Non-admins never move stock through admin-only events.
    #[test]
    fn non_admin_events_never_touch_stock(
        totals in prop::collection::vec(1u32..6, NUM_BOOKS as usize),
        carts in prop::collection::vec(arb_cart(), 1..8),
        event in arb_event(),
    ) {
        prop_assume!(event != RequestEvent::Cancel);
        let engine = seeded_engine(&totals);
        for cart in &carts {
            apply(&engine, &Op::Submit { user: 1, items: cart.clone() });
        }
        let before: Vec<_> = engine.books().iter().map(|b| b.stock()).collect();

        for request in engine.requests() {
            let result = engine.transition(request.id, event, &Actor::user(1));
            let is_unauthorized = matches!(result, Err(LendingError::Unauthorized { .. }));
            prop_assert!(is_unauthorized);
        }

        let after: Vec<_> = engine.books().iter().map(|b| b.stock()).collect();
        prop_assert_eq!(before, after);
    }
}

// =============================================================================
// Lifecycle Round-Trip Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Approve then cancel restores every book's availability exactly.
    #[test]
    fn approve_cancel_round_trip(
        totals in prop::collection::vec(1u32..10, NUM_BOOKS as usize),
        picks in prop::collection::btree_map(1..=NUM_BOOKS, 1i64..4, 1..=NUM_BOOKS as usize),
    ) {
        let engine = seeded_engine(&totals);
        let before: Vec<_> = engine.books().iter().map(|b| b.available()).collect();

        let items = picks.into_iter().map(|(book, qty)| CartItem::new(BookId(book), qty)).collect();
        let Ok(request) = engine.submit_request(UserId(1), &Submission::new(date(1), date(2), items)) else {
            return Ok(());
        };
        engine.approve(request.id, &Actor::admin(9)).unwrap();
        engine.cancel(request.id, &Actor::user(1)).unwrap();

        let after: Vec<_> = engine.books().iter().map(|b| b.available()).collect();
        prop_assert_eq!(before, after);
    }

    /// A second return is rejected and never double-releases.
    #[test]
    fn return_is_not_repeatable(total in 1u32..10, qty in 1i64..10) {
        prop_assume!(qty <= i64::from(total));
        let engine = seeded_engine(&[total]);
        let request = engine
            .submit_request(UserId(1), &Submission::new(date(1), date(2), vec![CartItem::new(BookId(1), qty)]))
            .unwrap();
        let admin = Actor::admin(9);
        engine.approve(request.id, &admin).unwrap();
        engine.mark_borrowed(request.id, &admin).unwrap();
        engine.mark_returned(request.id, &admin).unwrap();

        let again = engine.mark_returned(request.id, &admin);
        let is_illegal = matches!(again, Err(LendingError::IllegalTransition { .. }));
        prop_assert!(is_illegal);
        prop_assert_eq!(engine.get_book(BookId(1)).unwrap().available(), total);
    }
}

// =============================================================================
// Book and Validator Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    /// Ledger reserve/release calls never break the bounds, whatever succeeds.
    #[test]
    fn book_bounds_hold(total in 0u32..20, ops in prop::collection::vec((any::<bool>(), 0u32..8), 0..40)) {
        let inventory = Inventory::default();
        let book = inventory.add_book(Book::new(BookId(1), "Bounded", total)).unwrap();
        for (reserve, qty) in ops {
            let before = book.stock();
            let result = if reserve {
                inventory.reserve(BookId(1), qty)
            } else {
                inventory.release(BookId(1), qty)
            };
            let after = book.stock();
            if let Ok(level) = result {
                prop_assert_eq!(level, after);
            }
            prop_assert!(after.available <= after.total);
            if result.is_err() {
                prop_assert_eq!(before, after);
            }
        }
    }

    /// Admitted items are positive and within availability; rejected ones say why.
    #[test]
    fn validator_admits_only_feasible_items(available in 0u32..10, quantity in -5i64..15, duplicate in any::<bool>()) {
        let stock = StockLevel { book_id: BookId(1), total: 10, available };
        let existing = if duplicate {
            vec![RequestItem { book_id: BookId(1), quantity: 1 }]
        } else {
            vec![]
        };

        match validate_item(&stock, quantity, &existing) {
            Ok(item) => {
                prop_assert!(!duplicate);
                prop_assert!(item.quantity > 0 && item.quantity <= available);
                prop_assert_eq!(i64::from(item.quantity), quantity);
            }
            Err(LendingError::Validation(_)) => prop_assert!(quantity <= 0 || duplicate),
            Err(LendingError::InsufficientStock { .. }) => prop_assert!(quantity > i64::from(available)),
            Err(other) => prop_assert!(false, "unexpected error {other}"),
        }
    }

    /// Counts sum to the total, and the average stays within the score range.
    #[test]
    fn review_stats_are_consistent(scores in prop::collection::vec(1u8..=5, 0..50)) {
        let stats = ReviewStats::from_scores(scores.iter().copied());
        prop_assert_eq!(stats.total as usize, scores.len());
        prop_assert_eq!(stats.counts_by_score.values().sum::<u32>(), stats.total);
        if scores.is_empty() {
            prop_assert_eq!(stats.average, Decimal::ZERO);
        } else {
            prop_assert!(stats.average >= Decimal::ONE && stats.average <= Decimal::from(5));
            prop_assert!(stats.average.scale() <= 1);
        }
    }
}
