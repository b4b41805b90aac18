// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Synchronous iteration, reading straight from the row sources.

use std::{
    ops::Range,
    sync::{Arc, PoisonError, RwLock},
};

use log::{debug, trace};

use super::{
    chunking::{find_chunk, find_subchunks, ChunkSpan, KeyColumns},
    ColumnWrite, IterCursor, SubChunkPair, SubChunkView, VisIterConfig, VisIterImpl,
};
use crate::{
    error::VisIterError,
    source::RowSource,
    vis_buffer::{VisBuffer, VisBufferAccess, VisBufferAsync},
};

/// The chunk the iterator is on, and how it differs from the one before.
#[derive(Debug, Clone)]
struct ChunkState {
    ms_id: usize,
    span: ChunkSpan,
    subchunks: Vec<Range<usize>>,
    new_ms: bool,
    new_array_id: bool,
    new_field_id: bool,
    new_spectral_window: bool,
}

/// Walks the chunks and sub-chunks of its sources in table order.
///
/// Both the consumer facing synchronous mode and the look-ahead thread are driven by this type,
/// so both visit exactly the same sub-chunks.
pub(crate) struct SyncVisIter {
    sources: Vec<Arc<dyn RowSource>>,
    /// Key columns of each source, read on first use
    keys: Vec<Option<KeyColumns>>,
    time_interval: f64,
    row_blocking: usize,
    pending_interval: Option<f64>,
    pending_row_blocking: Option<usize>,
    chunk: Option<ChunkState>,
    subchunk_idx: usize,
    pair: SubChunkPair,
    cursor: Arc<RwLock<IterCursor>>,
    vb: VisBuffer,
    n_writes: usize,
}

impl SyncVisIter {
    pub fn new(sources: Vec<Arc<dyn RowSource>>, config: &VisIterConfig) -> Self {
        let cursor = Arc::new(RwLock::new(IterCursor::default()));
        let mut vb = VisBuffer::new();
        vb.attach_cursor(&cursor);
        Self {
            keys: vec![None; sources.len()],
            sources,
            time_interval: config.time_interval,
            row_blocking: config.row_blocking,
            pending_interval: None,
            pending_row_blocking: None,
            chunk: None,
            subchunk_idx: 0,
            pair: SubChunkPair::default(),
            cursor,
            vb,
            n_writes: 0,
        }
    }

    fn has_pending_changes(&self) -> bool {
        self.pending_interval.is_some() || self.pending_row_blocking.is_some()
    }

    fn check_pending(&self, function: &'static str) -> Result<(), VisIterError> {
        if self.has_pending_changes() {
            Err(VisIterError::PendingChanges { function })
        } else {
            Ok(())
        }
    }

    fn keys(&mut self, ms_id: usize) -> Result<&KeyColumns, VisIterError> {
        let keys = match self.keys[ms_id].take() {
            Some(keys) => keys,
            None => {
                let keys = KeyColumns::read(&*self.sources[ms_id])?;
                debug!("table {} has {} rows", ms_id, keys.len());
                keys
            }
        };
        Ok(self.keys[ms_id].insert(keys))
    }

    /// Find the first chunk at or after `start` in table `ms_id`, moving on to the following
    /// tables when one runs out.
    fn locate_chunk(
        &mut self,
        mut ms_id: usize,
        mut start: usize,
        previous: Option<&ChunkState>,
    ) -> Result<Option<ChunkState>, VisIterError> {
        let time_interval = self.time_interval;
        let row_blocking = self.row_blocking;
        let mut new_ms = previous.is_none();
        while ms_id < self.sources.len() {
            let keys = self.keys(ms_id)?;
            if let Some(span) = find_chunk(keys, start, time_interval) {
                let subchunks = find_subchunks(keys, &span.rows, row_blocking);
                let (new_array_id, new_field_id, new_spectral_window) = match previous {
                    Some(prev) => (
                        new_ms || prev.span.array_id != span.array_id,
                        new_ms || prev.span.field_id != span.field_id,
                        new_ms || prev.span.ddid != span.ddid,
                    ),
                    None => (true, true, true),
                };
                return Ok(Some(ChunkState {
                    ms_id,
                    span,
                    subchunks,
                    new_ms,
                    new_array_id,
                    new_field_id,
                    new_spectral_window,
                }));
            }
            ms_id += 1;
            start = 0;
            new_ms = true;
        }
        Ok(None)
    }

    fn current_view(&self) -> Option<SubChunkView> {
        let chunk = self.chunk.as_ref()?;
        let rows = chunk.subchunks.get(self.subchunk_idx)?.clone();
        Some(SubChunkView {
            source: Arc::clone(&self.sources[chunk.ms_id]),
            ms_id: chunk.ms_id,
            rows,
            array_id: chunk.span.array_id,
            field_id: chunk.span.field_id,
            ddid: chunk.span.ddid,
            new_ms: chunk.new_ms,
            new_array_id: chunk.new_array_id,
            new_field_id: chunk.new_field_id,
            new_spectral_window: chunk.new_spectral_window,
        })
    }

    /// Tell attached buffers the cursor has moved or the data under it has changed.
    fn publish(&mut self) {
        let view = self.current_view();
        let mut cursor = self.cursor.write().unwrap_or_else(PoisonError::into_inner);
        cursor.generation += 1;
        cursor.view = view;
    }

    /// Table and rows of the current sub-chunk.
    pub(crate) fn current_rows(&self) -> Option<(usize, Range<usize>)> {
        let chunk = self.chunk.as_ref()?;
        let rows = chunk.subchunks.get(self.subchunk_idx)?.clone();
        Some((chunk.ms_id, rows))
    }

    /// Apply `write` to `rows` of table `ms_id`, which need not be the current sub-chunk.
    pub(crate) fn write_rows(
        &mut self,
        ms_id: usize,
        rows: Range<usize>,
        write: ColumnWrite,
    ) -> Result<(), VisIterError> {
        write.check_rows(rows.len())?;
        let source = self
            .sources
            .get(ms_id)
            .ok_or(VisIterError::NoCurrentChunk {
                function: write.function(),
            })?;
        trace!("{} rows {:?} of table {}", write.function(), rows, ms_id);
        write.apply(&**source, rows)?;
        self.n_writes += 1;
        self.publish();
        Ok(())
    }

    pub(crate) fn vb_mut(&mut self) -> &mut VisBuffer {
        &mut self.vb
    }

    /// Number of writes applied so far.
    pub fn n_writes(&self) -> usize {
        self.n_writes
    }
}

impl VisIterImpl for SyncVisIter {
    fn origin_chunks(&mut self) -> Result<(), VisIterError> {
        if let Some(time_interval) = self.pending_interval.take() {
            debug!("applying time interval {}s", time_interval);
            self.time_interval = time_interval;
        }
        if let Some(row_blocking) = self.pending_row_blocking.take() {
            debug!("applying row blocking {}", row_blocking);
            self.row_blocking = row_blocking;
        }
        if !self.time_interval.is_finite() || self.time_interval < 0.0 {
            return Err(VisIterError::BadConfig(format!(
                "time interval must be a non-negative number of seconds, received {}",
                self.time_interval
            )));
        }
        self.pair.reset();
        self.subchunk_idx = 0;
        self.chunk = self.locate_chunk(0, 0, None)?;
        self.publish();
        Ok(())
    }

    fn more_chunks(&self) -> bool {
        self.chunk.is_some()
    }

    fn next_chunk(&mut self) -> Result<(), VisIterError> {
        self.check_pending("next_chunk")?;
        let previous = self
            .chunk
            .take()
            .ok_or(VisIterError::PastEnd {
                function: "next_chunk",
            })?;
        match self.locate_chunk(previous.ms_id, previous.span.rows.end, Some(&previous)) {
            Ok(chunk) => self.chunk = chunk,
            Err(e) => {
                // stay on the chunk we had
                self.chunk = Some(previous);
                return Err(e);
            }
        }
        self.pair.increment_chunk();
        self.subchunk_idx = 0;
        self.publish();
        Ok(())
    }

    fn origin(&mut self) -> Result<(), VisIterError> {
        self.check_pending("origin")?;
        if self.chunk.is_none() {
            return Err(VisIterError::NoCurrentChunk { function: "origin" });
        }
        self.pair.reset_subchunk();
        self.subchunk_idx = 0;
        self.publish();
        Ok(())
    }

    fn more(&self) -> bool {
        self.chunk
            .as_ref()
            .map_or(false, |chunk| self.subchunk_idx < chunk.subchunks.len())
    }

    fn advance(&mut self) -> Result<(), VisIterError> {
        self.check_pending("advance")?;
        if !self.more() {
            return Err(VisIterError::PastEnd { function: "advance" });
        }
        self.subchunk_idx += 1;
        self.pair.increment_subchunk();
        self.publish();
        Ok(())
    }

    fn subchunk(&self) -> SubChunkPair {
        self.pair
    }

    fn vis_buffer(&mut self) -> &mut dyn VisBufferAccess {
        &mut self.vb
    }

    fn set_interval(&mut self, seconds: f64) {
        self.pending_interval = Some(seconds);
    }

    fn set_row_blocking(&mut self, rows: usize) {
        self.pending_row_blocking = Some(rows);
    }

    fn write(&mut self, write: ColumnWrite) -> Result<(), VisIterError> {
        let (ms_id, rows) = self.current_rows().ok_or(VisIterError::NoCurrentChunk {
            function: write.function(),
        })?;
        self.write_rows(ms_id, rows, write)
    }

    fn copy_vis_buffer(&mut self) -> Result<VisBufferAsync, VisIterError> {
        Ok(VisBufferAsync::from_sync(&mut self.vb))
    }

    fn cursor(&self) -> Option<&Arc<RwLock<IterCursor>>> {
        Some(&self.cursor)
    }

    fn finish(&mut self) -> Result<usize, VisIterError> {
        self.chunk = None;
        self.publish();
        Ok(self.n_writes)
    }

    fn is_async(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use marlu::ndarray::{array, Array1};

    use super::*;
    use crate::{
        source::{MemoryTable, SyntheticLayoutBuilder},
        test_common::three_subchunk_table,
    };

    fn sync(sources: Vec<Arc<dyn RowSource>>) -> SyncVisIter {
        SyncVisIter::new(sources, &VisIterConfig::default())
    }

    fn pairs(vi: &mut SyncVisIter) -> Vec<(SubChunkPair, Range<usize>)> {
        let mut pairs = vec![];
        vi.origin_chunks().unwrap();
        while vi.more_chunks() {
            vi.origin().unwrap();
            while vi.more() {
                pairs.push((vi.subchunk(), vi.current_rows().unwrap().1));
                vi.advance().unwrap();
            }
            vi.next_chunk().unwrap();
        }
        pairs
    }

    #[test]
    fn test_sweep_visits_every_timestep() {
        let mut vi = sync(vec![Arc::new(three_subchunk_table())]);
        assert_eq!(
            pairs(&mut vi),
            vec![
                (SubChunkPair::new(0, 0), 0..1),
                (SubChunkPair::new(0, 1), 1..2),
                (SubChunkPair::new(0, 2), 2..3),
            ]
        );
        assert!(matches!(
            vi.next_chunk(),
            Err(VisIterError::PastEnd { .. })
        ));
    }

    #[test]
    fn test_chunks_follow_fields_and_tables() {
        let layout = SyntheticLayoutBuilder::default()
            .n_antennas(2)
            .n_timesteps(2)
            .n_fields(2)
            .build()
            .unwrap();
        let first: Arc<dyn RowSource> = Arc::new(MemoryTable::synthesize(&layout).unwrap());
        let second: Arc<dyn RowSource> = Arc::new(MemoryTable::synthesize(&layout).unwrap());
        let mut vi = sync(vec![first, second]);

        let mut flags = vec![];
        vi.origin_chunks().unwrap();
        while vi.more_chunks() {
            vi.origin().unwrap();
            let vb = vi.vis_buffer();
            flags.push((
                vb.ms_id().unwrap(),
                vb.field_id().unwrap(),
                vb.new_ms().unwrap(),
                vb.new_field_id().unwrap(),
                vb.new_array_id().unwrap(),
            ));
            vi.next_chunk().unwrap();
        }
        assert_eq!(
            flags,
            vec![
                (0, 0, true, true, true),
                (0, 1, false, true, false),
                (1, 0, true, true, true),
                (1, 1, false, true, false),
            ]
        );
    }

    #[test]
    fn test_pending_changes_need_origin_chunks() {
        let mut vi = sync(vec![Arc::new(three_subchunk_table())]);
        vi.origin_chunks().unwrap();
        vi.set_row_blocking(2);
        assert!(matches!(
            vi.advance(),
            Err(VisIterError::PendingChanges { function: "advance" })
        ));
        assert!(matches!(vi.origin(), Err(VisIterError::PendingChanges { .. })));
        assert!(matches!(
            vi.next_chunk(),
            Err(VisIterError::PendingChanges { .. })
        ));

        let pairs = pairs(&mut vi);
        assert_eq!(
            pairs,
            vec![(SubChunkPair::new(0, 0), 0..2), (SubChunkPair::new(0, 1), 2..3)]
        );
    }

    #[test]
    fn test_time_interval_splits_chunks() {
        let mut vi = sync(vec![Arc::new(three_subchunk_table())]);
        vi.set_interval(3.0);
        let pairs = pairs(&mut vi);
        assert_eq!(
            pairs,
            vec![
                (SubChunkPair::new(0, 0), 0..1),
                (SubChunkPair::new(0, 1), 1..2),
                (SubChunkPair::new(1, 0), 2..3),
            ]
        );
    }

    #[test]
    fn test_negative_interval_rejected() {
        let mut vi = sync(vec![Arc::new(three_subchunk_table())]);
        vi.set_interval(-1.0);
        assert!(matches!(
            vi.origin_chunks(),
            Err(VisIterError::BadConfig(_))
        ));
    }

    #[test]
    fn test_sync_rewinds() {
        let mut vi = sync(vec![Arc::new(three_subchunk_table())]);
        vi.origin_chunks().unwrap();
        vi.origin().unwrap();
        vi.advance().unwrap();
        vi.advance().unwrap();
        vi.origin().unwrap();
        assert_eq!(vi.subchunk(), SubChunkPair::new(0, 0));
        assert_abs_diff_eq!(vi.vis_buffer().time().unwrap()[0], 1_254_670_392.0);
    }

    #[test]
    fn test_write_invalidates_buffer() {
        let mut vi = sync(vec![Arc::new(three_subchunk_table())]);
        vi.origin_chunks().unwrap();
        vi.origin().unwrap();
        assert_eq!(vi.vis_buffer().weight().unwrap(), &array![1.25]);

        vi.write(ColumnWrite::Weight(array![7.0])).unwrap();
        assert!(!vi.vis_buffer().weight_ok());
        assert_eq!(vi.vis_buffer().weight().unwrap(), &array![7.0]);
        assert_eq!(vi.n_writes(), 1);

        assert!(matches!(
            vi.write(ColumnWrite::FlagRow(Array1::from_elem(2, true))),
            Err(VisIterError::BadArrayShape { .. })
        ));
        assert_eq!(vi.finish().unwrap(), 1);
    }

    #[test]
    fn test_write_without_subchunk() {
        let mut vi = sync(vec![Arc::new(three_subchunk_table())]);
        assert!(matches!(
            vi.write(ColumnWrite::FlagRow(array![true])),
            Err(VisIterError::NoCurrentChunk {
                function: "write_flag_row"
            })
        ));
    }
}
