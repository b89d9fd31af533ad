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

//! Reviews, favorites, and the statistics derived from them.
//!
//! Nothing here is cached: [`Reviews::stats`] and [`Favorites::count`]
//! recompute from the live rows on every call and take no ledger locks.

use crate::base::{AuthorId, BookId, UserId};
use crate::error::{LendingError, ValidationError};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Something a user can favorite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Favorable {
    Book(BookId),
    Author(AuthorId),
}

impl From<BookId> for Favorable {
    fn from(book_id: BookId) -> Self {
        Self::Book(book_id)
    }
}

impl From<AuthorId> for Favorable {
    fn from(author_id: AuthorId) -> Self {
        Self::Author(author_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Review {
    pub user: UserId,
    pub book_id: BookId,
    pub score: u8,
    pub comment: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Per-book review summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewStats {
    /// Every score 1..=5 is present, zero when unused.
    pub counts_by_score: BTreeMap<u8, u32>,
    pub total: u32,
    /// Mean score rounded to one decimal place; zero without reviews.
    pub average: Decimal,
}

impl ReviewStats {
    pub const MIN_SCORE: u8 = 1;
    pub const MAX_SCORE: u8 = 5;
    const AVERAGE_PRECISION: u32 = 1;

    pub fn from_scores(scores: impl IntoIterator<Item = u8>) -> Self {
        let mut counts_by_score: BTreeMap<u8, u32> =
            (Self::MIN_SCORE..=Self::MAX_SCORE).map(|score| (score, 0)).collect();
        let mut total = 0u32;
        let mut sum = 0u64;

        for score in scores {
            *counts_by_score.entry(score).or_default() += 1;
            total += 1;
            sum += u64::from(score);
        }

        let average = if total == 0 {
            Decimal::ZERO
        } else {
            (Decimal::from(sum) / Decimal::from(total)).round_dp_with_strategy(
                Self::AVERAGE_PRECISION,
                RoundingStrategy::MidpointAwayFromZero,
            )
        };

        Self {
            counts_by_score,
            total,
            average,
        }
    }
}

/// Review rows, unique per `(user, book)`.
#[derive(Debug, Default)]
pub struct Reviews {
    rows: DashMap<(UserId, BookId), Review>,
}

impl Reviews {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the user's review of a book, or replaces it if one exists.
    ///
    /// # Errors
    ///
    /// [`ValidationError::ScoreOutOfRange`] unless `score` is within 1..=5.
    pub fn write(
        &self,
        user: UserId,
        book_id: BookId,
        score: i64,
        comment: Option<String>,
    ) -> Result<Review, LendingError> {
        let score = u8::try_from(score)
            .ok()
            .filter(|s| (ReviewStats::MIN_SCORE..=ReviewStats::MAX_SCORE).contains(s))
            .ok_or(ValidationError::ScoreOutOfRange(score))?;

        let review = Review {
            user,
            book_id,
            score,
            comment,
            updated_at: Utc::now(),
        };
        self.rows.insert((user, book_id), review.clone());
        Ok(review)
    }

    pub fn remove(&self, user: UserId, book_id: BookId) -> Result<Review, LendingError> {
        self.rows
            .remove(&(user, book_id))
            .map(|(_, review)| review)
            .ok_or(LendingError::ReviewNotFound)
    }

    pub fn get(&self, user: UserId, book_id: BookId) -> Option<Review> {
        self.rows.get(&(user, book_id)).map(|r| r.value().clone())
    }

    /// Reviews of a book, most recent first.
    pub fn for_book(&self, book_id: BookId) -> Vec<Review> {
        let mut reviews: Vec<_> = self
            .rows
            .iter()
            .filter(|r| r.book_id == book_id)
            .map(|r| r.value().clone())
            .collect();
        reviews.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        reviews
    }

    pub fn stats(&self, book_id: BookId) -> ReviewStats {
        ReviewStats::from_scores(
            self.rows
                .iter()
                .filter(|r| r.book_id == book_id)
                .map(|r| r.score)
                .collect::<Vec<_>>(),
        )
    }
}

/// Favorite rows, unique per `(user, favorable)`.
#[derive(Debug, Default)]
pub struct Favorites {
    rows: DashMap<(UserId, Favorable), DateTime<Utc>>,
}

impl Favorites {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    ///
    /// [`LendingError::DuplicateFavorite`] if the user already favorited `target`.
    pub fn add(&self, user: UserId, target: Favorable) -> Result<(), LendingError> {
        match self.rows.entry((user, target)) {
            Entry::Occupied(_) => Err(LendingError::DuplicateFavorite { user }),
            Entry::Vacant(entry) => {
                entry.insert(Utc::now());
                Ok(())
            }
        }
    }

    pub fn remove(&self, user: UserId, target: Favorable) -> Result<(), LendingError> {
        self.rows
            .remove(&(user, target))
            .map(|_| ())
            .ok_or(LendingError::FavoriteNotFound)
    }

    pub fn contains(&self, user: UserId, target: Favorable) -> bool {
        self.rows.contains_key(&(user, target))
    }

    pub fn count(&self, target: Favorable) -> usize {
        self.rows.iter().filter(|r| r.key().1 == target).count()
    }

    /// Favorited books of one user, ordered by ID.
    pub fn books_of(&self, user: UserId) -> Vec<BookId> {
        let mut books: Vec<_> = self
            .rows
            .iter()
            .filter_map(|r| match *r.key() {
                (owner, Favorable::Book(book_id)) if owner == user => Some(book_id),
                _ => None,
            })
            .collect();
        books.sort();
        books
    }

    /// Favorited authors of one user, ordered by ID.
    pub fn authors_of(&self, user: UserId) -> Vec<AuthorId> {
        let mut authors: Vec<_> = self
            .rows
            .iter()
            .filter_map(|r| match *r.key() {
                (owner, Favorable::Author(author_id)) if owner == user => Some(author_id),
                _ => None,
            })
            .collect();
        authors.sort();
        authors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn empty_stats_default_to_zero() {
        let stats = ReviewStats::from_scores(Vec::<u8>::new());
        assert_eq!(stats.total, 0);
        assert_eq!(stats.average, Decimal::ZERO);
        assert_eq!(stats.counts_by_score.len(), 5);
        assert!(stats.counts_by_score.values().all(|&c| c == 0));
    }

    #[test]
    fn average_rounds_to_one_decimal() {
        // 14 / 3 = 4.666..
        let stats = ReviewStats::from_scores([5, 5, 4]);
        assert_eq!(stats.average, dec!(4.7));
        assert_eq!(stats.counts_by_score[&5], 2);
        assert_eq!(stats.counts_by_score[&4], 1);
        assert_eq!(stats.total, 3);
    }

    #[test]
    fn average_midpoint_rounds_away_from_zero() {
        // 33 / 20 = 1.65
        let scores = std::iter::repeat_n(1u8, 7).chain(std::iter::repeat_n(2u8, 13));
        assert_eq!(ReviewStats::from_scores(scores).average, dec!(1.7));
    }

    #[test]
    fn score_outside_range_is_rejected() {
        let reviews = Reviews::new();
        for score in [0, 6, -3, 300] {
            assert_eq!(
                reviews.write(UserId(1), BookId(1), score, None),
                Err(ValidationError::ScoreOutOfRange(score).into())
            );
        }
    }

    #[test]
    fn second_review_replaces_first() {
        let reviews = Reviews::new();
        reviews.write(UserId(1), BookId(1), 2, None).unwrap();
        reviews.write(UserId(1), BookId(1), 5, Some("better on reread".into())).unwrap();

        let stats = reviews.stats(BookId(1));
        assert_eq!(stats.total, 1);
        assert_eq!(stats.average, dec!(5));
        assert_eq!(
            reviews.get(UserId(1), BookId(1)).unwrap().comment.as_deref(),
            Some("better on reread")
        );
    }

    #[test]
    fn stats_follow_removals() {
        let reviews = Reviews::new();
        reviews.write(UserId(1), BookId(1), 4, None).unwrap();
        reviews.write(UserId(2), BookId(1), 2, None).unwrap();
        reviews.write(UserId(2), BookId(2), 1, None).unwrap();
        assert_eq!(reviews.stats(BookId(1)).average, dec!(3));

        reviews.remove(UserId(2), BookId(1)).unwrap();
        assert_eq!(reviews.stats(BookId(1)).average, dec!(4));
        assert_eq!(reviews.remove(UserId(2), BookId(1)), Err(LendingError::ReviewNotFound));
    }

    #[test]
    fn favorites_are_unique_per_user_and_target() {
        let favorites = Favorites::new();
        let book = Favorable::Book(BookId(1));
        favorites.add(UserId(1), book).unwrap();
        assert_eq!(
            favorites.add(UserId(1), book),
            Err(LendingError::DuplicateFavorite { user: UserId(1) })
        );
        favorites.add(UserId(2), book).unwrap();
        assert_eq!(favorites.count(book), 2);
    }

    #[test]
    fn book_and_author_with_same_id_are_distinct() {
        let favorites = Favorites::new();
        favorites.add(UserId(1), Favorable::Book(BookId(7))).unwrap();
        favorites.add(UserId(1), Favorable::Author(AuthorId(7))).unwrap();
        assert_eq!(favorites.count(Favorable::Book(BookId(7))), 1);
        assert_eq!(favorites.count(Favorable::Author(AuthorId(7))), 1);
        assert_eq!(favorites.books_of(UserId(1)), vec![BookId(7)]);
        assert_eq!(favorites.authors_of(UserId(1)), vec![AuthorId(7)]);
    }

    #[test]
    fn remove_favorite() {
        let favorites = Favorites::new();
        let author = Favorable::Author(AuthorId(1));
        favorites.add(UserId(1), author).unwrap();
        assert!(favorites.contains(UserId(1), author));
        favorites.remove(UserId(1), author).unwrap();
        assert!(!favorites.contains(UserId(1), author));
        assert_eq!(favorites.remove(UserId(1), author), Err(LendingError::FavoriteNotFound));
    }

    #[test]
    fn favorable_serializes_as_tagged_pair() {
        let json = serde_json::to_value(Favorable::Author(AuthorId(3))).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "author", "id": 3}));
    }
}
