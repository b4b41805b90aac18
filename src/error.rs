// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors that can occur while iterating over visibilities.

use cfg_if::cfg_if;
use thiserror::Error;

use crate::{component::VisBufferComponent, source::error::SourceError};

#[derive(Error, Debug)]
/// All the errors that can occur when buffering or iterating visibilities
pub enum VisIterError {
    /// An async wrapper accessor was used while no async buffer was wrapped.
    #[error("{source_file}:{source_line}\n{function}: no VisBufferAsync is attached to the wrapper{context}")]
    NoAttachedBuffer {
        /// The accessor that was called
        function: &'static str,
        /// Extra context about the iterator the wrapper belongs to (may be empty)
        context: String,
        /// The file where the error originated (usually `file!()`)
        source_file: &'static str,
        /// The line number where the error originated (usually `line!()`)
        source_line: u32,
    },

    /// A synchronous buffer needed its iterator to fill a cache slot, but it was detached.
    #[error("{source_file}:{source_line}\n{function}: VisBuffer is not attached to a live VisibilityIterator")]
    NotAttached {
        /// The accessor that needed to fill
        function: &'static str,
        /// The file where the error originated (usually `file!()`)
        source_file: &'static str,
        /// The line number where the error originated (usually `line!()`)
        source_line: u32,
    },

    /// A field of an async buffer was read which the producer never filled.
    #[error("{source_file}:{source_line}\n{function}: {component} was not prefetched; consider adjusting prefetch columns")]
    NotPrefetched {
        /// The component which was missing
        component: VisBufferComponent,
        /// The accessor that was called
        function: &'static str,
        /// The file where the error originated (usually `file!()`)
        source_file: &'static str,
        /// The line number where the error originated (usually `line!()`)
        source_line: u32,
    },

    #[error("{function}: attempt to advance past the end of the data")]
    /// Advancing a chunk or sub-chunk cursor which has no more data
    PastEnd {
        /// The cursor operation
        function: &'static str,
    },

    #[error("{function}: no current chunk, call origin_chunks() first")]
    /// A sub-chunk operation was called without a valid chunk
    NoCurrentChunk {
        /// The cursor operation
        function: &'static str,
    },

    #[error("{function}: call origin_chunks() to apply pending interval / row blocking changes")]
    /// The iterator was advanced while configuration changes were queued
    PendingChanges {
        /// The cursor operation
        function: &'static str,
    },

    #[error("origin(): chunk {chunk} has already been consumed past sub-chunk 0, asynchronous iteration cannot rewind")]
    /// Rewinding to the first sub-chunk after the look-ahead thread has recycled it
    AsyncRewind {
        /// The chunk that was rewound
        chunk: usize,
    },

    #[error("{function}: a synchronous VisBuffer cannot be attached to an asynchronous VisibilityIterator")]
    /// A lazily filled buffer needs a synchronous iterator to read from
    SyncBufferOnAsyncIter {
        /// The operation that was attempted
        function: &'static str,
    },

    /// Error for bad array shape in provided argument
    #[error("bad array shape supplied to argument {argument} of function {function}. expected {expected}, received {received}")]
    BadArrayShape {
        /// The argument name within the function
        argument: String,
        /// The function name
        function: String,
        /// The expected shape
        expected: String,
        /// The shape that was received instead
        received: String,
    },

    #[error("invalid configuration: {0}")]
    /// Error for an invalid iterator configuration
    BadConfig(String),

    #[error("{source_file}:{source_line}\nthe look-ahead thread stopped without reporting end of data")]
    /// The producer disappeared without an end of data or error message
    LookaheadTerminated {
        /// The file where the error originated (usually `file!()`)
        source_file: &'static str,
        /// The line number where the error originated (usually `line!()`)
        source_line: u32,
    },

    #[error("could not start the look-ahead thread: {0}")]
    /// The operating system refused to spawn the producer thread
    LookaheadSpawn(#[source] std::io::Error),

    #[error("the look-ahead thread panicked: {0}")]
    /// The producer thread panicked
    LookaheadPanicked(String),

    #[error(transparent)]
    /// Error derived from [`SourceError`]
    Source(#[from] SourceError),
}

cfg_if! {
    if #[cfg(feature = "cli")] {
        /// Errors that only occur on the command line
        #[derive(Error, Debug)]
        pub enum CLIError {
            #[error(transparent)]
            /// Error derived from [`clap::Error`]
            Clap(#[from] clap::Error),

            #[error("Invalid Command Line Argument {option}: {received}. Expected {expected}")]
            /// When a bad CLI argument is provided
            InvalidCommandLineArgument {
                /// The argument name
                option: String,
                /// Description of what was expected
                expected: String,
                /// The value that was received
                received: String,
            },

            #[error("Dry run")]
            /// The user asked for a summary only
            DryRun {},

            #[error("sync and async sweeps differ: {0}")]
            /// The sweep comparison failed
            SweepMismatch(String),

            #[error(transparent)]
            /// Error derived from [`VisIterError`]
            VisIter(#[from] VisIterError),
        }
    }
}
