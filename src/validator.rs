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

//! Admission checks for request line items and borrowing periods.
//!
//! These are pure functions over snapshots. The stock check is advisory at
//! submission time; the engine replays [`validate_item`] against live,
//! locked counters when a request is approved.

use crate::book::StockLevel;
use crate::error::{LendingError, ValidationError};
use crate::request::{DateRange, RequestItem};
use chrono::NaiveDate;

/// Admits one line item into a request.
///
/// # Errors
///
/// - [`ValidationError::InvalidQuantity`] if `quantity <= 0`.
/// - [`ValidationError::DuplicateBookInRequest`] if the book is already in `existing`.
/// - [`LendingError::InsufficientStock`] if `quantity` exceeds `stock.available`.
pub fn validate_item(
    stock: &StockLevel,
    quantity: i64,
    existing: &[RequestItem],
) -> Result<RequestItem, LendingError> {
    let book_id = stock.book_id;

    if quantity <= 0 {
        return Err(ValidationError::InvalidQuantity { book_id, quantity }.into());
    }
    if existing.iter().any(|item| item.book_id == book_id) {
        return Err(ValidationError::DuplicateBookInRequest(book_id).into());
    }

    match u32::try_from(quantity) {
        Ok(quantity) if quantity <= stock.available => Ok(RequestItem { book_id, quantity }),
        _ => Err(LendingError::InsufficientStock {
            book_id,
            requested: quantity,
            available: stock.available,
        }),
    }
}

/// Builds the borrowing period, reporting every missing or inconsistent date.
pub fn validate_dates(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<DateRange, Vec<ValidationError>> {
    match (start, end) {
        (Some(start), Some(end)) => DateRange::new(start, end).map_err(|e| vec![e]),
        (start, end) => {
            let mut errors = Vec::with_capacity(2);
            if start.is_none() {
                errors.push(ValidationError::MissingDate("start_date"));
            }
            if end.is_none() {
                errors.push(ValidationError::MissingDate("end_date"));
            }
            Err(errors)
        }
    }
}
