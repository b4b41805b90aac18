// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Chunk and sub-chunk boundary discovery.
//!
//! The synchronous iterator and the look-ahead thread both go through these functions, which is
//! what makes their sweeps identical.

use std::ops::Range;

use log::trace;
use marlu::ndarray::{s, Array1};

use crate::{
    constants::TIME_TOLERANCE_SECONDS,
    source::{error::SourceError, Column, RowSource},
};

/// The columns which decide chunk and sub-chunk boundaries, for every row of one table.
#[derive(Debug, Clone)]
pub(crate) struct KeyColumns {
    pub array_id: Array1<i32>,
    pub field_id: Array1<i32>,
    pub ddid: Array1<i32>,
    pub time: Array1<f64>,
}

impl KeyColumns {
    pub fn read(source: &dyn RowSource) -> Result<Self, SourceError> {
        let rows = 0..source.num_rows();
        Ok(Self {
            array_id: source.read_int(rows.clone(), Column::ArrayId)?,
            field_id: source.read_int(rows.clone(), Column::FieldId)?,
            ddid: source.read_int(rows.clone(), Column::DataDescId)?,
            time: source.read_double(rows, Column::Time)?,
        })
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    fn identity(&self, row: usize) -> (i32, i32, i32) {
        (self.array_id[row], self.field_id[row], self.ddid[row])
    }
}

/// A run of rows with one array, field and data description.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ChunkSpan {
    pub rows: Range<usize>,
    pub array_id: i32,
    pub field_id: i32,
    pub ddid: i32,
}

/// Find the chunk starting at row `start`.
///
/// The chunk extends while array, field and data description are unchanged and, if
/// `time_interval` is positive, while rows are less than `time_interval` seconds after the first.
pub(crate) fn find_chunk(keys: &KeyColumns, start: usize, time_interval: f64) -> Option<ChunkSpan> {
    if start >= keys.len() {
        return None;
    }
    let identity = keys.identity(start);
    let first_time = keys.time[start];
    let mut end = start + 1;
    while end < keys.len()
        && keys.identity(end) == identity
        && (time_interval <= 0.0 || keys.time[end] - first_time < time_interval)
    {
        end += 1;
    }
    let (array_id, field_id, ddid) = identity;
    trace!(
        "chunk rows {}..{} array {} field {} ddid {}",
        start,
        end,
        array_id,
        field_id,
        ddid
    );
    Some(ChunkSpan {
        rows: start..end,
        array_id,
        field_id,
        ddid,
    })
}

/// Split a chunk into sub-chunks.
///
/// Each sub-chunk holds whole timestamps. With `row_blocking == 0` that is exactly one
/// timestamp, otherwise timestamps are accumulated while the sub-chunk stays within
/// `row_blocking` rows, always taking at least one.
pub(crate) fn find_subchunks(
    keys: &KeyColumns,
    chunk: &Range<usize>,
    row_blocking: usize,
) -> Vec<Range<usize>> {
    let times = keys.time.slice(s![chunk.start..chunk.end]);
    let mut timestamps: Vec<Range<usize>> = vec![];
    let mut group_start = 0;
    for idx in 1..=times.len() {
        if idx == times.len() || (times[idx] - times[group_start]).abs() >= TIME_TOLERANCE_SECONDS {
            timestamps.push(chunk.start + group_start..chunk.start + idx);
            group_start = idx;
        }
    }
    if row_blocking == 0 {
        return timestamps;
    }

    // Blocking only ever merges whole timestamps, so a timestamp is never split across
    // sub-chunks even when it alone holds more than `row_blocking` rows.
    let mut subchunks: Vec<Range<usize>> = vec![];
    for timestamp in timestamps {
        match subchunks.last_mut() {
            Some(last) if last.len() + timestamp.len() <= row_blocking => last.end = timestamp.end,
            _ => subchunks.push(timestamp),
        }
    }
    subchunks
}

#[cfg(test)]
mod tests {
    use marlu::ndarray::array;

    use super::*;

    fn keys() -> KeyColumns {
        KeyColumns {
            array_id: array![0, 0, 0, 0, 0, 0, 0, 0],
            field_id: array![0, 0, 0, 0, 0, 0, 1, 1],
            ddid: array![0, 0, 0, 0, 1, 1, 1, 1],
            time: array![10.0, 10.0, 12.0, 14.0, 10.0, 12.0, 20.0, 20.0],
        }
    }

    #[test]
    fn test_chunks_split_on_identity() {
        let keys = keys();
        let first = find_chunk(&keys, 0, 0.0).unwrap();
        assert_eq!(
            first,
            ChunkSpan {
                rows: 0..4,
                array_id: 0,
                field_id: 0,
                ddid: 0
            }
        );
        assert_eq!(find_chunk(&keys, 4, 0.0).unwrap().rows, 4..6);
        let last = find_chunk(&keys, 6, 0.0).unwrap();
        assert_eq!((last.rows, last.field_id, last.ddid), (6..8, 1, 1));
        assert!(find_chunk(&keys, 8, 0.0).is_none());
    }

    #[test]
    fn test_chunks_split_on_interval() {
        let keys = keys();
        assert_eq!(find_chunk(&keys, 0, 3.0).unwrap().rows, 0..3);
        assert_eq!(find_chunk(&keys, 3, 3.0).unwrap().rows, 3..4);
        // an interval shorter than one integration never splits a timestamp
        assert_eq!(find_chunk(&keys, 0, 0.5).unwrap().rows, 0..2);
    }

    #[test]
    fn test_subchunks_one_timestamp_each() {
        let keys = keys();
        assert_eq!(find_subchunks(&keys, &(0..4), 0), vec![0..2, 2..3, 3..4]);
        assert_eq!(find_subchunks(&keys, &(6..8), 0), vec![6..8]);
    }

    #[test]
    fn test_subchunks_row_blocking() {
        let keys = keys();
        assert_eq!(find_subchunks(&keys, &(0..4), 3), vec![0..3, 3..4]);
        assert_eq!(find_subchunks(&keys, &(0..4), 4), vec![0..4]);
        // a timestamp bigger than the blocking still forms a sub-chunk
        assert_eq!(find_subchunks(&keys, &(0..4), 1), vec![0..2, 2..3, 3..4]);
    }
}
