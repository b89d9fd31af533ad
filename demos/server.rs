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

//! Simple REST API server demo for the lending engine.
//!
//! Run with: `cargo run --example server`
//!
//! ```bash
//! # Register an author and one of their books
//! curl -X POST http://localhost:3000/authors \
//!   -H "Content-Type: application/json" \
//!   -d '{"author_id": 1, "name": "Octavia E. Butler"}'
//! curl -X POST http://localhost:3000/books \
//!   -H "Content-Type: application/json" \
//!   -d '{"book_id": 1, "title": "Kindred", "total": 3, "author_id": 1}'
//!
//! # Search by author name
//! curl "http://localhost:3000/books/search?q=butler&field=author"
//!
//! # Submit a request
//! curl -X POST http://localhost:3000/requests \
//!   -H "Content-Type: application/json" \
//!   -d '{"requester": 7, "start_date": "2025-05-01", "end_date": "2025-05-14",
//!        "items": [{"book_id": 1, "quantity": 2}]}'
//!
//! # Approve it
//! curl -X POST http://localhost:3000/requests/1/approve \
//!   -H "Content-Type: application/json" \
//!   -d '{"id": 1, "role": "admin"}'
//!
//! # Overdue as of a date
//! curl http://localhost:3000/requests/overdue?as_of=2025-06-01
//! ```

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use book_lending_rs::{
    Actor, Author, AuthorId, Book, BookId, BorrowRequest, Engine, LendingError, RequestEvent,
    RequestId, Review, ReviewStats, SearchField, SubmitError, Submission, UserId,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// === Request/Response DTOs ===

#[derive(Debug, Deserialize)]
pub struct NewAuthor {
    pub author_id: u32,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct NewBook {
    pub book_id: u32,
    pub title: String,
    pub total: u32,
    pub author_id: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    #[serde(default)]
    pub field: SearchField,
}

/// Request body for submitting a cart.
///
/// ```json
/// {"requester": 7, "start_date": "2025-05-01", "end_date": "2025-05-14",
///  "items": [{"book_id": 1, "quantity": 2}]}
/// ```
#[derive(Debug, Deserialize)]
pub struct NewRequest {
    pub requester: u32,
    #[serde(flatten)]
    pub submission: Submission,
}

#[derive(Debug, Deserialize)]
pub struct OverdueQuery {
    pub as_of: Option<NaiveDate>,
}

/// Response body for book stock.
#[derive(Debug, Serialize)]
pub struct BookResponse {
    pub book: u32,
    pub title: String,
    pub author: Option<u32>,
    pub total: u32,
    pub available: u32,
    pub reserved: u32,
    pub borrow_count: u64,
}

impl From<&Book> for BookResponse {
    fn from(book: &Book) -> Self {
        let stock = book.stock();
        Self {
            book: book.id().0,
            title: book.title().to_string(),
            author: book.author_id().map(|id| id.0),
            total: stock.total,
            available: stock.available,
            reserved: stock.reserved(),
            borrow_count: book.borrow_count(),
        }
    }
}

/// Response body for a book's reviews.
#[derive(Debug, Serialize)]
pub struct BookReviews {
    pub stats: ReviewStats,
    pub reviews: Vec<Review>,
}

/// Response body for errors.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitErrorResponse {
    pub errors: Vec<ErrorResponse>,
}

// === Application State ===

/// Shared application state containing the lending engine.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

// === Error Handling ===

fn classify(err: &LendingError) -> (StatusCode, &'static str) {
    match err {
        LendingError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_FAILED"),
        LendingError::InsufficientStock { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, "INSUFFICIENT_STOCK")
        }
        LendingError::IllegalTransition { .. } => (StatusCode::CONFLICT, "ILLEGAL_TRANSITION"),
        LendingError::Unauthorized { .. } => (StatusCode::FORBIDDEN, "UNAUTHORIZED"),
        LendingError::InvariantViolation { .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, "INVARIANT_VIOLATION")
        }
        LendingError::BookNotFound(_) => (StatusCode::NOT_FOUND, "BOOK_NOT_FOUND"),
        LendingError::RequestNotFound(_) => (StatusCode::NOT_FOUND, "REQUEST_NOT_FOUND"),
        LendingError::DuplicateBook(_) => (StatusCode::CONFLICT, "DUPLICATE_BOOK"),
        LendingError::AuthorNotFound(_) => (StatusCode::NOT_FOUND, "AUTHOR_NOT_FOUND"),
        LendingError::DuplicateAuthor(_) => (StatusCode::CONFLICT, "DUPLICATE_AUTHOR"),
        LendingError::RequestIdsExhausted => {
            (StatusCode::SERVICE_UNAVAILABLE, "REQUEST_IDS_EXHAUSTED")
        }
        LendingError::NotDeletable { .. } => (StatusCode::CONFLICT, "NOT_DELETABLE"),
        LendingError::LockTimeout { .. } => (StatusCode::SERVICE_UNAVAILABLE, "LOCK_TIMEOUT"),
        LendingError::DuplicateFavorite { .. } => (StatusCode::CONFLICT, "DUPLICATE_FAVORITE"),
        LendingError::FavoriteNotFound => (StatusCode::NOT_FOUND, "FAVORITE_NOT_FOUND"),
        LendingError::ReviewNotFound => (StatusCode::NOT_FOUND, "REVIEW_NOT_FOUND"),
    }
}

fn error_body(err: &LendingError) -> ErrorResponse {
    ErrorResponse {
        error: err.to_string(),
        code: classify(err).1.to_string(),
    }
}

/// Wrapper for converting `LendingError` into HTTP responses.
pub struct AppError(LendingError);

impl From<LendingError> for AppError {
    fn from(err: LendingError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, _) = classify(&self.0);
        (status, Json(error_body(&self.0))).into_response()
    }
}

/// A rejected submission lists every failing item.
pub struct AppSubmitError(SubmitError);

impl IntoResponse for AppSubmitError {
    fn into_response(self) -> Response {
        let status = self
            .0
            .errors()
            .first()
            .map_or(StatusCode::BAD_REQUEST, |e| classify(e).0);
        let body = SubmitErrorResponse {
            errors: self.0.errors().iter().map(error_body).collect(),
        };
        (status, Json(body)).into_response()
    }
}

// === Handlers ===

/// POST /authors - Register an author.
async fn create_author(
    State(state): State<AppState>,
    Json(body): Json<NewAuthor>,
) -> Result<(StatusCode, Json<Author>), AppError> {
    let author = state.engine.add_author(AuthorId(body.author_id), body.name)?;
    Ok((StatusCode::CREATED, Json(author)))
}

/// POST /books - Register a book, optionally by a registered author.
async fn create_book(
    State(state): State<AppState>,
    Json(body): Json<NewBook>,
) -> Result<(StatusCode, Json<BookResponse>), AppError> {
    let book_id = BookId(body.book_id);
    let book = match body.author_id {
        Some(author_id) => {
            state
                .engine
                .add_book_with_author(book_id, body.title, body.total, AuthorId(author_id))?
        }
        None => state.engine.add_book(book_id, body.title, body.total)?,
    };
    Ok((StatusCode::CREATED, Json(BookResponse::from(&*book))))
}

/// GET /books/search?q=&field= - Search titles and author names.
async fn search_books(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Json<Vec<BookResponse>> {
    let books = state.engine.search_books(&query.q, query.field);
    Json(books.iter().map(|b| BookResponse::from(&**b)).collect())
}

/// GET /books/{id}/recommended - Other books by the same author.
async fn recommended_books(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<Json<Vec<BookResponse>>, AppError> {
    let books = state.engine.recommended_books(BookId(id))?;
    Ok(Json(books.iter().map(|b| BookResponse::from(&**b)).collect()))
}

/// GET /books - List all books.
async fn list_books(State(state): State<AppState>) -> Json<Vec<BookResponse>> {
    Json(state.engine.books().iter().map(|b| BookResponse::from(&**b)).collect())
}

/// GET /books/{id} - Get book by ID.
async fn get_book(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<Json<BookResponse>, AppError> {
    let book_id = BookId(id);
    state
        .engine
        .get_book(book_id)
        .map(|book| Json(BookResponse::from(&*book)))
        .ok_or(AppError(LendingError::BookNotFound(book_id)))
}

/// GET /books/{id}/reviews - Review stats and reviews, most recent first.
async fn get_reviews(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<Json<BookReviews>, AppError> {
    let book_id = BookId(id);
    let stats = state.engine.review_stats(book_id)?;
    Ok(Json(BookReviews {
        stats,
        reviews: state.engine.reviews_for(book_id),
    }))
}

/// POST /requests - Submit a cart as a pending request.
async fn create_request(
    State(state): State<AppState>,
    Json(body): Json<NewRequest>,
) -> Result<(StatusCode, Json<BorrowRequest>), AppSubmitError> {
    state
        .engine
        .submit_request(UserId(body.requester), &body.submission)
        .map(|request| (StatusCode::CREATED, Json(request)))
        .map_err(AppSubmitError)
}

/// GET /requests - List all requests.
async fn list_requests(State(state): State<AppState>) -> Json<Vec<BorrowRequest>> {
    Json(state.engine.requests())
}

/// POST /requests/{id}/{event} - Fire a lifecycle event; the body is the actor.
async fn fire_event(
    State(state): State<AppState>,
    Path((id, event)): Path<(u32, String)>,
    Json(actor): Json<Actor>,
) -> Result<Json<BorrowRequest>, AppError> {
    let event: RequestEvent = event.parse().map_err(LendingError::from)?;
    let request = state.engine.transition(RequestId(id), event, &actor)?;
    Ok(Json(request))
}

/// GET /requests/overdue - Borrowed requests past their end date.
async fn list_overdue(
    State(state): State<AppState>,
    Query(query): Query<OverdueQuery>,
) -> Json<Vec<BorrowRequest>> {
    let as_of = query.as_of.unwrap_or_else(|| Utc::now().date_naive());
    Json(state.engine.overdue_requests(as_of).collect())
}

// === Router ===

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/authors", post(create_author))
        .route("/books", get(list_books).post(create_book))
        .route("/books/search", get(search_books))
        .route("/books/{id}", get(get_book))
        .route("/books/{id}/recommended", get(recommended_books))
        .route("/books/{id}/reviews", get(get_reviews))
        .route("/requests", get(list_requests).post(create_request))
        .route("/requests/overdue", get(list_overdue))
        .route("/requests/{id}/{event}", post(fire_event))
        .with_state(state)
}

// === Main ===

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "book_lending_rs=info,server=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let state = AppState {
        engine: Arc::new(Engine::new()),
    };

    let app = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:3000").await.unwrap();
    tracing::info!("lending API server running on http://127.0.0.1:3000");
    println!();
    println!("Endpoints:");
    println!("  POST /books                   - Register a book");
    println!("  GET  /books/:id               - Get book by ID");
    println!("  GET  /books/:id/reviews       - Review stats for a book");
    println!("  POST /requests                - Submit a borrow request");
    println!("  POST /requests/:id/:event     - approve, reject, borrow, return, cancel");
    println!("  GET  /requests/overdue        - Overdue requests");

    axum::serve(listener, app).await.unwrap();
}
