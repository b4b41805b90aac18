// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Asynchronous iteration: the consumer side of the look-ahead thread.

use std::{
    ops::Range,
    sync::{Arc, RwLock},
};

use log::{debug, trace};

use super::{ColumnWrite, IterCursor, SubChunkPair, SyncVisIter, VisIterConfig, VisIterImpl};
use crate::{
    error::VisIterError,
    lookahead::{Lookahead, LookaheadItem, PendingWrite},
    source::RowSource,
    vis_buffer::{VisBufferAccess, VisBufferAsync, VisBufferAsyncWrapper},
};

/// Where the wrapped buffer came from.
#[derive(Debug, Clone)]
struct Current {
    pair: SubChunkPair,
    ms_id: usize,
    rows: Range<usize>,
}

/// Serves sub-chunks from a look-ahead thread.
///
/// The thread is started by `origin_chunks` and stopped by the next `origin_chunks`, by
/// `finish`, or on drop. The current buffer is owned by the wrapper while the consumer is on
/// its sub-chunk, and goes back to the pool as soon as the consumer moves on.
pub(crate) struct AsyncVisIter {
    sources: Vec<Arc<dyn RowSource>>,
    config: VisIterConfig,
    pending_interval: Option<f64>,
    pending_row_blocking: Option<usize>,
    lookahead: Option<Lookahead>,
    /// The next item from the look-ahead thread, received but not yet handed out
    peeked: Option<LookaheadItem>,
    current: Option<Current>,
    wrapper: VisBufferAsyncWrapper,
    chunk: Option<usize>,
    position: SubChunkPair,
    last_delivered: Option<SubChunkPair>,
    /// Writes applied by look-ahead threads which have already been stopped
    n_writes: usize,
}

impl AsyncVisIter {
    pub fn new(sources: Vec<Arc<dyn RowSource>>, config: VisIterConfig) -> Self {
        Self {
            sources,
            config,
            pending_interval: None,
            pending_row_blocking: None,
            lookahead: None,
            peeked: None,
            current: None,
            wrapper: VisBufferAsyncWrapper::new(),
            chunk: None,
            position: SubChunkPair::default(),
            last_delivered: None,
            n_writes: 0,
        }
    }

    fn check_pending(&self, function: &'static str) -> Result<(), VisIterError> {
        if self.pending_interval.is_some() || self.pending_row_blocking.is_some() {
            Err(VisIterError::PendingChanges { function })
        } else {
            Ok(())
        }
    }

    /// The chunk number of the next buffer, `None` at end of data.
    ///
    /// An error from the look-ahead thread is returned once, after which the sweep is over.
    fn peek_chunk(&mut self) -> Result<Option<usize>, VisIterError> {
        if self.peeked.is_none() {
            let item = match self.lookahead.as_mut() {
                Some(lookahead) => lookahead.next_item().unwrap_or_else(LookaheadItem::Error),
                None => LookaheadItem::EndOfData,
            };
            self.peeked = Some(item);
        }
        match self.peeked.take() {
            Some(LookaheadItem::Buffer(ready)) => {
                let chunk = ready.pair.chunk;
                self.peeked = Some(LookaheadItem::Buffer(ready));
                Ok(Some(chunk))
            }
            Some(LookaheadItem::Error(e)) => {
                self.peeked = Some(LookaheadItem::EndOfData);
                Err(e)
            }
            Some(LookaheadItem::EndOfData) | None => {
                self.peeked = Some(LookaheadItem::EndOfData);
                Ok(None)
            }
        }
    }

    /// Wrap the peeked buffer, making it current.
    fn take_current(&mut self) {
        match self.peeked.take() {
            Some(LookaheadItem::Buffer(ready)) => {
                debug_assert!(
                    self.last_delivered.map_or(true, |last| last < ready.pair),
                    "look-ahead delivered {} after {:?}",
                    ready.pair,
                    self.last_delivered
                );
                trace!("consumer takes {}", ready.pair);
                self.last_delivered = Some(ready.pair);
                self.position = ready.pair;
                self.wrapper
                    .set_context(format!("asynchronous iterator at {}", ready.pair));
                if let Some(previous) = self.wrapper.wrap(ready.buffer) {
                    self.recycle(previous);
                }
                self.current = Some(Current {
                    pair: ready.pair,
                    ms_id: ready.ms_id,
                    rows: ready.rows,
                });
            }
            other => self.peeked = other,
        }
    }

    fn recycle(&self, buffer: Box<VisBufferAsync>) {
        if let Some(lookahead) = self.lookahead.as_ref() {
            lookahead.release(buffer);
        }
    }

    /// Give the current buffer back to the pool.
    fn release_current(&mut self) {
        self.current = None;
        if let Some(buffer) = self.wrapper.release() {
            self.recycle(buffer);
        }
    }

    /// Make the first buffer of the next chunk current.
    fn enter_chunk(&mut self) -> Result<(), VisIterError> {
        match self.peek_chunk() {
            Ok(Some(chunk)) => {
                self.chunk = Some(chunk);
                self.take_current();
                Ok(())
            }
            Ok(None) => {
                self.chunk = None;
                Ok(())
            }
            Err(e) => {
                self.chunk = None;
                Err(e)
            }
        }
    }

    /// Stop the look-ahead thread, if any, returning how many writes it applied.
    fn stop(&mut self) -> Result<usize, VisIterError> {
        self.release_current();
        self.peeked = None;
        self.chunk = None;
        let n_writes = match self.lookahead.take() {
            Some(mut lookahead) => lookahead.shutdown()?,
            None => 0,
        };
        self.n_writes += n_writes;
        Ok(n_writes)
    }
}

impl VisIterImpl for AsyncVisIter {
    fn origin_chunks(&mut self) -> Result<(), VisIterError> {
        let n_writes = self.stop()?;
        if n_writes > 0 {
            debug!("previous look-ahead thread applied {} writes", n_writes);
        }
        if let Some(time_interval) = self.pending_interval.take() {
            self.config.time_interval = time_interval;
        }
        if let Some(row_blocking) = self.pending_row_blocking.take() {
            self.config.row_blocking = row_blocking;
        }
        self.config.validate()?;

        let vi = SyncVisIter::new(self.sources.clone(), &self.config);
        self.lookahead = Some(Lookahead::spawn(
            vi,
            self.config.prefetch.clone(),
            self.config.n_buffers,
        )?);
        self.position.reset();
        self.last_delivered = None;
        self.enter_chunk()
    }

    fn more_chunks(&self) -> bool {
        self.chunk.is_some()
    }

    fn next_chunk(&mut self) -> Result<(), VisIterError> {
        self.check_pending("next_chunk")?;
        let chunk = self.chunk.ok_or(VisIterError::PastEnd {
            function: "next_chunk",
        })?;
        self.release_current();
        // skip whatever the consumer did not visit
        loop {
            match self.peek_chunk() {
                Ok(Some(next)) if next == chunk => {
                    self.take_current();
                    self.release_current();
                }
                Ok(_) => break,
                Err(e) => {
                    self.chunk = None;
                    return Err(e);
                }
            }
        }
        self.position.increment_chunk();
        self.enter_chunk()
    }

    fn origin(&mut self) -> Result<(), VisIterError> {
        self.check_pending("origin")?;
        let chunk = self
            .chunk
            .ok_or(VisIterError::NoCurrentChunk { function: "origin" })?;
        match self.current.as_ref() {
            Some(current) if current.pair.subchunk == 0 => Ok(()),
            _ => Err(VisIterError::AsyncRewind { chunk }),
        }
    }

    fn more(&self) -> bool {
        self.current.is_some()
    }

    fn advance(&mut self) -> Result<(), VisIterError> {
        self.check_pending("advance")?;
        let chunk = match self.current.as_ref() {
            Some(current) => current.pair.chunk,
            None => return Err(VisIterError::PastEnd { function: "advance" }),
        };
        self.release_current();
        self.position.increment_subchunk();
        if self.peek_chunk()? == Some(chunk) {
            self.take_current();
        }
        Ok(())
    }

    fn subchunk(&self) -> SubChunkPair {
        self.position
    }

    fn vis_buffer(&mut self) -> &mut dyn VisBufferAccess {
        &mut self.wrapper
    }

    fn set_interval(&mut self, seconds: f64) {
        self.pending_interval = Some(seconds);
    }

    fn set_row_blocking(&mut self, rows: usize) {
        self.pending_row_blocking = Some(rows);
    }

    fn write(&mut self, write: ColumnWrite) -> Result<(), VisIterError> {
        let current = self.current.as_ref().ok_or(VisIterError::NoCurrentChunk {
            function: write.function(),
        })?;
        write.check_rows(current.rows.len())?;
        let pending = PendingWrite {
            ms_id: current.ms_id,
            rows: current.rows.clone(),
            write,
        };
        match self.lookahead.as_ref() {
            Some(lookahead) => lookahead.write(pending),
            None => Err(VisIterError::LookaheadTerminated {
                source_file: file!(),
                source_line: line!(),
            }),
        }
    }

    fn copy_vis_buffer(&mut self) -> Result<VisBufferAsync, VisIterError> {
        match self.wrapper.wrapped() {
            Some(vba) => {
                let mut copy = VisBufferAsync::new();
                copy.fill_from(vba);
                Ok(copy)
            }
            None => Err(VisIterError::NoAttachedBuffer {
                function: "copy_vis_buffer",
                context: String::new(),
                source_file: file!(),
                source_line: line!(),
            }),
        }
    }

    fn cursor(&self) -> Option<&Arc<RwLock<IterCursor>>> {
        None
    }

    fn finish(&mut self) -> Result<usize, VisIterError> {
        self.stop()?;
        Ok(self.n_writes)
    }

    fn is_async(&self) -> bool {
        true
    }
}
