//! Forward-only result cursors.
//!
//! A [`Cursor`] is an owned handle returned by
//! [`Database::query_cursor`](crate::Database::query_cursor) and
//! [`Database::query_cursor_prepared`](crate::Database::query_cursor_prepared).
//! Because each cursor owns its own iteration state, opening a second cursor
//! never invalidates the first, and advancing a cursor that was never opened
//! is impossible by construction.
//!
//! A single connection cannot suspend a server-side cursor between calls, so
//! the result set is materialized when the cursor is opened and handed out
//! one row at a time. Reaching end-of-data closes the cursor.

use crate::error::DaoResult;
use crate::models::{Row, row_to_record};
use serde::de::DeserializeOwned;
use std::collections::VecDeque;

/// Stateful forward-only pointer into one executed statement's result set.
pub struct Cursor {
    rows: VecDeque<Row>,
    open: bool,
}

impl Cursor {
    pub(crate) fn new(rows: Vec<Row>) -> Self {
        Self {
            rows: rows.into(),
            open: true,
        }
    }

    /// The next row, or `None` once the result set is exhausted. Exhaustion
    /// closes the cursor.
    pub fn next_row(&mut self) -> Option<Row> {
        if !self.open {
            return None;
        }
        match self.rows.pop_front() {
            Some(row) => Some(row),
            None => {
                self.open = false;
                None
            }
        }
    }

    /// The next row projected into a typed record.
    pub fn next_record<T: DeserializeOwned>(&mut self) -> DaoResult<Option<T>> {
        match self.next_row() {
            Some(row) => row_to_record(row).map(Some),
            None => Ok(None),
        }
    }

    /// Whether rows can still be fetched.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Rows remaining to be fetched.
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }

    /// Discard any remaining rows and close the cursor.
    pub fn close(&mut self) {
        self.rows.clear();
        self.open = false;
    }
}

impl Iterator for Cursor {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        self.next_row()
    }
}
