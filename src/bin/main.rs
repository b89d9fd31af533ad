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

use book_lending_rs::{
    Actor, BookId, BorrowRequest, CartItem, Engine, EngineConfig, LockPolicy, RequestEvent,
    RequestId, RequestStatus, Role, SubmitError, Submission, UserId,
};
use chrono::{NaiveDate, Utc};
use clap::{Parser, ValueEnum};
use csv::{ReaderBuilder, Trim, Writer};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tracing::{debug, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Book Lending - Replay lending commands from a CSV file
///
/// Reads catalog and borrow request commands from a CSV file and writes the
/// selected report to stdout. Rejected commands are logged to stderr.
#[derive(Parser, Debug)]
#[command(name = "book-lending-rs")]
#[command(about = "A lending engine that replays borrow request CSVs", long_about = None)]
struct Args {
    /// Path to CSV file with commands
    ///
    /// Expected format: op,actor,role,request,book,quantity,items,start,end
    /// Example: cargo run -- commands.csv --report requests > requests.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Per-lock wait before a lock attempt is abandoned
    #[arg(long, env = "LENDING_LOCK_TIMEOUT_MS", default_value_t = LockPolicy::DEFAULT_ATTEMPT_TIMEOUT_MS)]
    lock_timeout_ms: u64,

    /// Lock attempts before a command fails with a timeout
    #[arg(long, env = "LENDING_LOCK_ATTEMPTS", default_value_t = LockPolicy::DEFAULT_MAX_ATTEMPTS)]
    lock_attempts: u32,

    /// Base backoff between lock attempts
    #[arg(long, env = "LENDING_LOCK_BACKOFF_MS", default_value_t = LockPolicy::DEFAULT_BACKOFF_MS)]
    lock_backoff_ms: u64,

    /// Report written to stdout
    #[arg(long, value_enum, default_value_t = Report::Books)]
    report: Report,

    /// Date used to derive overdue requests (defaults to today, UTC)
    #[arg(long, value_name = "YYYY-MM-DD")]
    as_of: Option<NaiveDate>,
}

impl Args {
    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            lock_policy: LockPolicy::new(
                Duration::from_millis(self.lock_timeout_ms),
                self.lock_attempts,
                Duration::from_millis(self.lock_backoff_ms),
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Report {
    Books,
    Requests,
    Overdue,
    Journal,
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "book_lending_rs=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let engine = match process_commands(BufReader::new(file), args.engine_config()) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error processing commands: {}", e);
            process::exit(1);
        }
    };

    let as_of = args.as_of.unwrap_or_else(|| Utc::now().date_naive());
    if let Err(e) = write_report(&engine, args.report, as_of, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Raw CSV record matching the input format.
///
/// Fields: `op, actor, role, request, book, quantity, items, start, end`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    op: String,
    actor: u32,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    role: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    request: Option<u32>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    book: Option<u32>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    quantity: Option<i64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    items: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    start: Option<NaiveDate>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    end: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    AddBook { book_id: BookId, total: u32 },
    Resize { book_id: BookId, total: u32 },
    Submit(Submission),
    Transition { request_id: RequestId, event: RequestEvent },
    Delete { request_id: RequestId },
    Review { book_id: BookId, score: i64 },
    Favorite { book_id: BookId },
}

impl CsvRecord {
    /// Converts CSV record to an actor and the command it issues.
    ///
    /// Returns `None` for unknown ops or roles, or missing required fields.
    fn into_command(self) -> Option<(Actor, Command)> {
        let role = match self.role.as_deref() {
            None => Role::User,
            Some(role) => role.parse().ok()?,
        };
        let actor = Actor::new(UserId(self.actor), role);
        let book_id = self.book.map(BookId);
        let request_id = self.request.map(RequestId);

        let command = match self.op.to_lowercase().as_str() {
            "book" => Command::AddBook {
                book_id: book_id?,
                total: u32::try_from(self.quantity?).ok()?,
            },
            "resize" => Command::Resize {
                book_id: book_id?,
                total: u32::try_from(self.quantity?).ok()?,
            },
            // Dates are left optional so the engine reports them as missing.
            "submit" => Command::Submit(Submission {
                start_date: self.start,
                end_date: self.end,
                items: parse_items(self.items.as_deref().unwrap_or_default())?,
            }),
            "delete" => Command::Delete {
                request_id: request_id?,
            },
            "review" => Command::Review {
                book_id: book_id?,
                score: self.quantity?,
            },
            "favorite" => Command::Favorite { book_id: book_id? },
            op => Command::Transition {
                request_id: request_id?,
                event: op.parse().ok()?,
            },
        };
        Some((actor, command))
    }
}

/// Parses a cart written as `book:qty;book:qty`.
fn parse_items(raw: &str) -> Option<Vec<CartItem>> {
    raw.split(';')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (book, quantity) = pair.split_once(':')?;
            Some(CartItem::new(
                BookId(book.trim().parse().ok()?),
                quantity.trim().parse().ok()?,
            ))
        })
        .collect()
}

fn apply(engine: &Engine, actor: &Actor, command: Command) -> Result<(), SubmitError> {
    match command {
        Command::AddBook { book_id, total } => {
            engine.add_book(book_id, format!("Book {book_id}"), total)?;
        }
        Command::Resize { book_id, total } => {
            engine.adjust_total(book_id, total)?;
        }
        Command::Submit(submission) => {
            engine
                .submit_request(actor.id, &submission)
                .inspect_err(|e| {
                    for error in e.errors() {
                        debug!(actor = %actor.id, error = %error, "cart item rejected");
                    }
                })?;
        }
        Command::Transition { request_id, event } => {
            engine.transition(request_id, event, actor)?;
        }
        Command::Delete { request_id } => {
            engine.delete_request(request_id, actor)?;
        }
        Command::Review { book_id, score } => {
            engine.write_review(actor.id, book_id, score, None)?;
        }
        Command::Favorite { book_id } => {
            engine.add_favorite(actor.id, book_id.into())?;
        }
    }
    Ok(())
}

/// Replays lending commands from a CSV reader.
///
/// Rows are streamed one at a time. Malformed rows and rejected commands are
/// logged and skipped; request IDs are assigned in submission order starting
/// at 1, so later rows can refer to earlier submissions.
///
/// # CSV Format
///
/// Expected columns: `op, actor, role, request, book, quantity, items, start, end`
/// - `op`: book, resize, submit, approve, reject, borrow, return, cancel, delete, review, favorite
/// - `actor`: User ID issuing the command (u32)
/// - `role`: user, admin, or super_admin (defaults to user)
/// - `quantity`: Copy count for book/resize, score for review
/// - `items`: Cart for submit, written as `book:qty;book:qty`
///
/// # Example
///
/// ```csv
/// op,actor,role,request,book,quantity,items,start,end
/// book,1,admin,,1,3,,,
/// submit,7,user,,,,1:2,2025-05-01,2025-05-14
/// approve,1,admin,1,,,,,
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails.
pub fn process_commands<R: Read>(reader: R, config: EngineConfig) -> Result<Engine, csv::Error> {
    let engine = Engine::with_config(config);

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for (line, result) in rdr.deserialize::<CsvRecord>().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) if e.is_io_error() => return Err(e),
            Err(e) => {
                warn!(line = line + 2, error = %e, "skipping malformed row");
                continue;
            }
        };

        let Some((actor, command)) = record.into_command() else {
            warn!(line = line + 2, "skipping invalid command");
            continue;
        };

        if let Err(e) = apply(&engine, &actor, command) {
            debug!(line = line + 2, error = %e, "command rejected");
        }
    }

    Ok(engine)
}

/// Flat CSV view of a request; `items` uses the input cart notation.
#[derive(Debug, Serialize)]
struct RequestRow {
    request: RequestId,
    requester: UserId,
    approver: Option<UserId>,
    status: RequestStatus,
    start: NaiveDate,
    end: NaiveDate,
    quantity: u64,
    items: String,
}

impl RequestRow {
    fn new(request: &BorrowRequest, as_of: NaiveDate) -> Self {
        let items = request
            .items
            .iter()
            .map(|item| format!("{}:{}", item.book_id, item.quantity))
            .collect::<Vec<_>>()
            .join(";");
        Self {
            request: request.id,
            requester: request.requester,
            approver: request.approver,
            status: request.effective_status(as_of),
            start: request.start_date,
            end: request.end_date,
            quantity: request.total_quantity(),
            items,
        }
    }
}

/// Writes the selected report as CSV.
///
/// - `books`: `book, title, total, available, reserved, borrow_count`
/// - `requests` / `overdue`: `request, requester, approver, status, start, end, quantity, items`,
///   with statuses as seen on `as_of`
/// - `journal`: every committed transition in commit order
///
/// # Errors
///
/// Returns a CSV error if writing fails.
pub fn write_report<W: Write>(
    engine: &Engine,
    report: Report,
    as_of: NaiveDate,
    writer: W,
) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    match report {
        Report::Books => {
            for book in engine.books() {
                wtr.serialize(&*book)?;
            }
        }
        Report::Requests => {
            for request in engine.requests() {
                wtr.serialize(RequestRow::new(&request, as_of))?;
            }
        }
        Report::Overdue => {
            for request in engine.overdue_requests(as_of) {
                wtr.serialize(RequestRow::new(&request, as_of))?;
            }
        }
        Report::Journal => {
            for record in engine.journal().drain() {
                wtr.serialize(&record)?;
            }
        }
    }

    wtr.flush()?;
    Ok(())
}
