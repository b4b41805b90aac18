// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Full sweeps over an iterator, and comparison of two sweeps.

use std::fmt::{self, Display};

use itertools::{EitherOrBoth, Itertools};
use log::trace;

use crate::{
    error::VisIterError,
    iter::{SubChunkPair, VisibilityIterator},
};

/// What a sweep saw of one sub-chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferInfo {
    /// Position of the sub-chunk
    pub pair: SubChunkPair,
    /// Time of the first row, `NaN` for an empty sub-chunk
    pub time: f64,
    /// Number of rows
    pub n_rows: usize,
}

/// Visit every sub-chunk of `vi` in order, recording a [`BufferInfo`] for each.
///
/// In asynchronous mode the prefetch set must include `Time` and `NRow`.
///
/// # Errors
///
/// Any error from the iterator or its buffer.
pub fn sweep(vi: &mut VisibilityIterator) -> Result<Vec<BufferInfo>, VisIterError> {
    sweep_with(vi, |_| {})
}

/// Like [`sweep`], calling `on_subchunk` after each sub-chunk is recorded.
///
/// # Errors
///
/// Any error from the iterator or its buffer.
pub fn sweep_with<F: FnMut(&BufferInfo)>(
    vi: &mut VisibilityIterator,
    mut on_subchunk: F,
) -> Result<Vec<BufferInfo>, VisIterError> {
    let mut infos = vec![];
    vi.origin_chunks()?;
    while vi.more_chunks() {
        vi.origin()?;
        while vi.more() {
            let pair = vi.subchunk();
            let vb = vi.vis_buffer();
            let n_rows = vb.n_row()?.max(0) as usize;
            let time = vb.time()?.first().copied().unwrap_or(f64::NAN);
            let info = BufferInfo { pair, time, n_rows };
            trace!("swept {:?}", info);
            on_subchunk(&info);
            infos.push(info);
            vi.advance()?;
        }
        vi.next_chunk()?;
    }
    Ok(infos)
}

/// One way two sweeps disagree.
#[derive(Debug, Clone, PartialEq)]
pub enum SweepDifference {
    /// The sweeps visited a different number of sub-chunks
    Length { expected: usize, received: usize },
    /// The `index`th sub-chunks have different chunk / sub-chunk numbers
    Pair {
        index: usize,
        expected: SubChunkPair,
        received: SubChunkPair,
    },
    /// The `index`th sub-chunks start at different times
    Time {
        index: usize,
        pair: SubChunkPair,
        expected: f64,
        received: f64,
    },
    /// The `index`th sub-chunks have a different number of rows
    Rows {
        index: usize,
        pair: SubChunkPair,
        expected: usize,
        received: usize,
    },
}

impl Display for SweepDifference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SweepDifference::Length { expected, received } => write!(
                f,
                "expected {} sub-chunks, received {}",
                expected, received
            ),
            SweepDifference::Pair {
                index,
                expected,
                received,
            } => write!(
                f,
                "sub-chunk #{}: expected {}, received {}",
                index, expected, received
            ),
            SweepDifference::Time {
                index,
                pair,
                expected,
                received,
            } => write!(
                f,
                "sub-chunk #{} {}: expected time {}, received {}",
                index, pair, expected, received
            ),
            SweepDifference::Rows {
                index,
                pair,
                expected,
                received,
            } => write!(
                f,
                "sub-chunk #{} {}: expected {} rows, received {}",
                index, pair, expected, received
            ),
        }
    }
}

fn times_match(expected: f64, received: f64, tolerance: f64) -> bool {
    (expected.is_nan() && received.is_nan()) || (expected - received).abs() <= tolerance
}

/// Every difference between two sweeps, empty if they agree.
///
/// Times agree when they are within `tolerance` seconds.
pub fn compare_sweeps(
    expected: &[BufferInfo],
    received: &[BufferInfo],
    tolerance: f64,
) -> Vec<SweepDifference> {
    let mut differences = vec![];
    for (index, infos) in expected.iter().zip_longest(received.iter()).enumerate() {
        let (exp, rec) = match infos {
            EitherOrBoth::Both(exp, rec) => (exp, rec),
            _ => {
                differences.push(SweepDifference::Length {
                    expected: expected.len(),
                    received: received.len(),
                });
                break;
            }
        };
        if exp.pair != rec.pair {
            differences.push(SweepDifference::Pair {
                index,
                expected: exp.pair,
                received: rec.pair,
            });
        }
        if !times_match(exp.time, rec.time, tolerance) {
            differences.push(SweepDifference::Time {
                index,
                pair: exp.pair,
                expected: exp.time,
                received: rec.time,
            });
        }
        if exp.n_rows != rec.n_rows {
            differences.push(SweepDifference::Rows {
                index,
                pair: exp.pair,
                expected: exp.n_rows,
                received: rec.n_rows,
            });
        }
    }
    differences
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(chunk: usize, subchunk: usize, time: f64) -> BufferInfo {
        BufferInfo {
            pair: SubChunkPair::new(chunk, subchunk),
            time,
            n_rows: 1,
        }
    }

    #[test]
    fn test_identical_sweeps_agree() {
        let sweep = vec![info(0, 0, 10.0), info(0, 1, 12.0), info(1, 0, f64::NAN)];
        assert!(compare_sweeps(&sweep, &sweep, 1e-3).is_empty());
    }

    #[test]
    fn test_time_tolerance() {
        let expected = vec![info(0, 0, 10.0)];
        assert!(compare_sweeps(&expected, &[info(0, 0, 10.0005)], 1e-3).is_empty());
        let differences = compare_sweeps(&expected, &[info(0, 0, 10.01)], 1e-3);
        assert_eq!(differences.len(), 1);
        assert!(matches!(
            differences[0],
            SweepDifference::Time { index: 0, .. }
        ));
    }

    #[test]
    fn test_reordered_and_missing_subchunks() {
        let expected = vec![info(0, 0, 10.0), info(0, 1, 12.0)];
        let received = vec![info(0, 1, 10.0)];
        let differences = compare_sweeps(&expected, &received, 1e-3);
        assert_eq!(
            differences,
            vec![
                SweepDifference::Pair {
                    index: 0,
                    expected: SubChunkPair::new(0, 0),
                    received: SubChunkPair::new(0, 1),
                },
                SweepDifference::Length {
                    expected: 2,
                    received: 1
                },
            ]
        );
        assert_eq!(
            differences[1].to_string(),
            "expected 2 sub-chunks, received 1"
        );
    }
}
