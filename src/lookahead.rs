// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The look-ahead thread, which fills asynchronous buffers ahead of the consumer.
//!
//! Three queues connect the consumer and the producer:
//! - a pool of free buffers, pre-filled with `n_buffers` empty buffers. The producer blocks on it
//!   when the consumer is `n_buffers` sub-chunks behind, which is the only backpressure.
//! - a ready queue of filled buffers, end of data, or an error, in sweep order.
//! - a write queue of column writes, applied by the producer between sub-chunks and drained
//!   before it exits.
//!
//! Dropping the stop sender asks the producer to stop at the next sub-chunk boundary.

use std::{
    any::Any,
    ops::Range,
    thread::{self, JoinHandle},
};

use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use log::{debug, error, trace, warn};

use crate::{
    component::PrefetchColumns,
    error::VisIterError,
    iter::{ColumnWrite, SubChunkPair, SyncVisIter, VisIterImpl},
    vis_buffer::VisBufferAsync,
};

/// A filled buffer and where it came from.
#[derive(Debug)]
pub(crate) struct ReadyBuffer {
    pub pair: SubChunkPair,
    pub ms_id: usize,
    pub rows: Range<usize>,
    pub buffer: Box<VisBufferAsync>,
}

#[derive(Debug)]
pub(crate) enum LookaheadItem {
    Buffer(ReadyBuffer),
    EndOfData,
    Error(VisIterError),
}

/// A write to rows the consumer has already been handed.
#[derive(Debug)]
pub(crate) struct PendingWrite {
    pub ms_id: usize,
    pub rows: Range<usize>,
    pub write: ColumnWrite,
}

struct ProducerChannels {
    free_rx: Receiver<Box<VisBufferAsync>>,
    ready_tx: Sender<LookaheadItem>,
    write_rx: Receiver<PendingWrite>,
    stop_rx: Receiver<()>,
}

enum Flow {
    Finished,
    Stopped,
}

/// Applies writes for the producer, keeping the first failure for the join handle.
struct WriteBack {
    first_error: Option<VisIterError>,
}

impl WriteBack {
    fn apply(&mut self, vi: &mut SyncVisIter, pending: PendingWrite) {
        if let Err(e) = vi.write_rows(pending.ms_id, pending.rows, pending.write) {
            warn!("look-ahead write failed: {}", e);
            self.first_error.get_or_insert(e);
        }
    }
}

/// Handle on a running look-ahead thread.
pub(crate) struct Lookahead {
    ready_rx: Option<Receiver<LookaheadItem>>,
    free_tx: Option<Sender<Box<VisBufferAsync>>>,
    write_tx: Option<Sender<PendingWrite>>,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<Result<usize, VisIterError>>>,
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Lookahead {
    /// Start a producer sweeping `vi`, filling the components in `prefetch`.
    ///
    /// # Errors
    ///
    /// [`VisIterError::LookaheadSpawn`] if the thread can't be started.
    pub fn spawn(
        vi: SyncVisIter,
        prefetch: PrefetchColumns,
        n_buffers: usize,
    ) -> Result<Self, VisIterError> {
        let (free_tx, free_rx) = bounded(n_buffers);
        for _ in 0..n_buffers {
            free_tx
                .send(Box::new(VisBufferAsync::new()))
                .map_err(|_| VisIterError::LookaheadTerminated {
                    source_file: file!(),
                    source_line: line!(),
                })?;
        }
        // room for every buffer plus end of data, so the producer never blocks on it
        let (ready_tx, ready_rx) = bounded(n_buffers + 1);
        let (write_tx, write_rx) = unbounded();
        let (stop_tx, stop_rx) = bounded(0);

        let channels = ProducerChannels {
            free_rx,
            ready_tx,
            write_rx,
            stop_rx,
        };
        debug!(
            "starting look-ahead thread with {} buffers, prefetching [{}]",
            n_buffers, prefetch
        );
        let handle = thread::Builder::new()
            .name("visiter-lookahead".to_string())
            .spawn(move || run_producer(vi, &prefetch, channels))
            .map_err(VisIterError::LookaheadSpawn)?;

        Ok(Self {
            ready_rx: Some(ready_rx),
            free_tx: Some(free_tx),
            write_tx: Some(write_tx),
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Wait for the next item from the producer.
    ///
    /// # Errors
    ///
    /// If the producer went away without end of data, [`VisIterError::LookaheadPanicked`] when
    /// it panicked, [`VisIterError::LookaheadTerminated`] otherwise.
    pub fn next_item(&mut self) -> Result<LookaheadItem, VisIterError> {
        let received = match self.ready_rx.as_ref() {
            Some(ready_rx) => ready_rx.recv().ok(),
            None => None,
        };
        match received {
            Some(item) => Ok(item),
            None => {
                self.shutdown()?;
                Err(VisIterError::LookaheadTerminated {
                    source_file: file!(),
                    source_line: line!(),
                })
            }
        }
    }

    /// Hand a buffer back to the pool.
    pub fn release(&self, mut buffer: Box<VisBufferAsync>) {
        buffer.clear();
        if let Some(free_tx) = self.free_tx.as_ref() {
            // a stopped producer no longer needs it
            let _ = free_tx.send(buffer);
        }
    }

    /// Queue a write for the producer.
    ///
    /// # Errors
    ///
    /// [`VisIterError::LookaheadTerminated`] if the producer has already exited.
    pub fn write(&self, pending: PendingWrite) -> Result<(), VisIterError> {
        let sent = match self.write_tx.as_ref() {
            Some(write_tx) => write_tx.send(pending).is_ok(),
            None => false,
        };
        if sent {
            Ok(())
        } else {
            Err(VisIterError::LookaheadTerminated {
                source_file: file!(),
                source_line: line!(),
            })
        }
    }

    /// Stop the producer, let it apply every queued write, and wait for it.
    ///
    /// Returns the number of writes applied. Calling this again returns `Ok(0)`.
    ///
    /// # Errors
    ///
    /// The first write which failed, or [`VisIterError::LookaheadPanicked`].
    pub fn shutdown(&mut self) -> Result<usize, VisIterError> {
        let handle = match self.handle.take() {
            Some(handle) => handle,
            None => return Ok(0),
        };
        self.stop_tx.take();
        self.write_tx.take();
        self.ready_rx.take();
        self.free_tx.take();
        match handle.join() {
            Ok(result) => {
                if let Ok(n_writes) = result.as_ref() {
                    debug!("look-ahead thread finished after {} writes", n_writes);
                }
                result
            }
            Err(payload) => Err(VisIterError::LookaheadPanicked(panic_message(payload))),
        }
    }
}

impl Drop for Lookahead {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("look-ahead thread failed during shutdown: {}", e);
        }
    }
}

fn run_producer(
    mut vi: SyncVisIter,
    prefetch: &PrefetchColumns,
    channels: ProducerChannels,
) -> Result<usize, VisIterError> {
    let ProducerChannels {
        free_rx,
        ready_tx,
        write_rx,
        stop_rx,
    } = channels;
    let mut write_back = WriteBack { first_error: None };

    let flow = produce(
        &mut vi,
        prefetch,
        &free_rx,
        &ready_tx,
        &write_rx,
        &stop_rx,
        &mut write_back,
    );
    let flow = match flow {
        Ok(flow) => flow,
        Err(e) => {
            debug!("look-ahead thread stopping on error: {}", e);
            if ready_tx.send(LookaheadItem::Error(e)).is_err() {
                trace!("consumer left before the error was delivered");
            }
            Flow::Finished
        }
    };
    drop(ready_tx);
    drop(free_rx);

    // once the sweep is over, keep serving writes until asked to stop
    if let Flow::Finished = flow {
        loop {
            select! {
                recv(write_rx) -> pending => match pending {
                    Ok(pending) => write_back.apply(&mut vi, pending),
                    Err(_) => break,
                },
                recv(stop_rx) -> _ => break,
            }
        }
    }
    for pending in write_rx.try_iter() {
        write_back.apply(&mut vi, pending);
    }

    match write_back.first_error {
        Some(e) => Err(e),
        None => Ok(vi.n_writes()),
    }
}

fn produce(
    vi: &mut SyncVisIter,
    prefetch: &PrefetchColumns,
    free_rx: &Receiver<Box<VisBufferAsync>>,
    ready_tx: &Sender<LookaheadItem>,
    write_rx: &Receiver<PendingWrite>,
    stop_rx: &Receiver<()>,
    write_back: &mut WriteBack,
) -> Result<Flow, VisIterError> {
    vi.origin_chunks()?;
    while vi.more_chunks() {
        vi.origin()?;
        while vi.more() {
            let mut buffer = loop {
                select! {
                    recv(free_rx) -> buffer => match buffer {
                        Ok(buffer) => break buffer,
                        Err(_) => return Ok(Flow::Stopped),
                    },
                    recv(write_rx) -> pending => match pending {
                        Ok(pending) => write_back.apply(vi, pending),
                        // only dropped together with the stop sender
                        Err(_) => return Ok(Flow::Stopped),
                    },
                    recv(stop_rx) -> _ => return Ok(Flow::Stopped),
                }
            };
            let (ms_id, rows) = match vi.current_rows() {
                Some(current) => current,
                None => return Err(VisIterError::NoCurrentChunk { function: "produce" }),
            };
            let pair = vi.subchunk();

            buffer.clear();
            buffer.fill_from_sync(vi.vb_mut(), prefetch)?;
            trace!("filled {} rows {:?} of table {}", pair, rows, ms_id);
            let item = LookaheadItem::Buffer(ReadyBuffer {
                pair,
                ms_id,
                rows,
                buffer,
            });
            if ready_tx.send(item).is_err() {
                return Ok(Flow::Stopped);
            }
            vi.advance()?;
        }
        vi.next_chunk()?;
    }
    debug!("look-ahead thread reached end of data");
    if ready_tx.send(LookaheadItem::EndOfData).is_err() {
        return Ok(Flow::Stopped);
    }
    Ok(Flow::Finished)
}
