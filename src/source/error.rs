// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors raised by row sources.

use std::ops::Range;

use thiserror::Error;

use super::Column;

#[derive(Error, Debug)]
/// Errors reading or writing the underlying table
pub enum SourceError {
    #[error("row range {start}..{end} is invalid for a table with {num_rows} rows")]
    /// A row range was reversed or ran past the end of the table. Ranges are never clamped.
    BadRowRange {
        /// First requested row
        start: usize,
        /// One past the last requested row
        end: usize,
        /// Number of rows in the table
        num_rows: usize,
    },

    #[error("column {0} is not present in this table")]
    /// The table has no such column
    MissingColumn(Column),

    #[error("column {column} holds {expected} values, received {received}")]
    /// Values of the wrong kind were supplied for a column
    ColumnType {
        /// The column written to
        column: Column,
        /// The kind of values the column holds
        expected: &'static str,
        /// The kind of values supplied
        received: &'static str,
    },

    #[error("bad shape for column {column}. expected {expected}, received {received}")]
    /// The values supplied have the wrong shape for the column or row range
    BadShape {
        /// The column written to
        column: Column,
        /// The expected shape
        expected: String,
        /// The shape that was received instead
        received: String,
    },

    #[error("no data description with id {0}")]
    /// A DATA_DESC_ID with no matching data description
    UnknownDataDescription(i32),

    #[error("no field with id {0}")]
    /// A FIELD_ID with no matching field
    UnknownField(i32),

    #[error("row {row} with time {time} is out of order, the previous row of the same chunk has time {previous}")]
    /// Appending this row would break the order iteration relies on.
    ///
    /// This is deliberately separate from [`SourceError::BadShape`] so callers can tell bad input
    /// ordering apart from malformed values.
    OutOfOrderRow {
        /// Index the row would have had
        row: usize,
        /// Time of the row
        time: f64,
        /// Time of the previous row
        previous: f64,
    },
}

impl SourceError {
    pub(crate) fn check_range(rows: &Range<usize>, num_rows: usize) -> Result<(), SourceError> {
        if rows.start > rows.end || rows.end > num_rows {
            Err(SourceError::BadRowRange {
                start: rows.start,
                end: rows.end,
                num_rows,
            })
        } else {
            Ok(())
        }
    }
}
