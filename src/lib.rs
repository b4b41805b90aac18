// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

#![warn(missing_docs)]
#![warn(clippy::missing_safety_doc)]
#![warn(clippy::missing_errors_doc)]

//! Visiter iterates over the rows of radio interferometer visibility tables, one sub-chunk at a
//! time, optionally with a look-ahead thread which fills buffers before they are asked for.
//!
//! # Examples
//!
//! Here's an example of how to sweep a table asynchronously, prefetching only what is read
//!
//! ```rust
//! use visiter::{
//!     MemoryTable, PrefetchColumns, SyntheticLayoutBuilder, VisBufferAccess, VisBufferComponent,
//!     VisIterConfigBuilder, VisibilityIterator,
//! };
//!
//! // a small synthetic table: 3 baselines over 3 timesteps
//! let layout = SyntheticLayoutBuilder::default().build().unwrap();
//! let table = MemoryTable::synthesize(&layout).unwrap();
//!
//! let config = VisIterConfigBuilder::default()
//!     .async_enabled(true)
//!     .n_buffers(2)
//!     .prefetch(PrefetchColumns::from_components([
//!         VisBufferComponent::Time,
//!         VisBufferComponent::FlagCube,
//!     ]))
//!     .build()
//!     .unwrap();
//! let mut vi = VisibilityIterator::from_source(table, config).unwrap();
//!
//! let mut n_flagged = 0;
//! vi.origin_chunks().unwrap();
//! while vi.more_chunks() {
//!     vi.origin().unwrap();
//!     while vi.more() {
//!         let vb = vi.vis_buffer();
//!         n_flagged += vb.flag_cube().unwrap().iter().filter(|&&f| f).count();
//!         // anything outside the prefetch set is an error, not a silent read
//!         assert!(vb.antenna1().is_err());
//!         vi.advance().unwrap();
//!     }
//!     vi.next_chunk().unwrap();
//! }
//! vi.finish().unwrap();
//! assert!(n_flagged > 0);
//! ```
//!
//! # Details
//!
//! In synchronous mode the [`VisBuffer`] reads each component from the table on first access.
//! In asynchronous mode a producer thread fills a pool of [`VisBufferAsync`]s with the
//! components in the [`PrefetchColumns`] set, and the consumer reads them through a
//! [`VisBufferAsyncWrapper`]. Both modes share the [`VisBufferAccess`] accessor surface and visit
//! the same sub-chunks in the same order.

use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use lazy_static::lazy_static;

pub mod cache;
pub mod component;
pub mod constants;
pub mod error;
pub mod iter;
mod lookahead;
pub mod measures;
pub mod source;
pub mod sweep;
pub mod vis_buffer;

#[cfg(feature = "cli")]
pub mod cli;

#[cfg(test)]
pub(crate) mod test_common;

pub use component::{PrefetchColumns, VisBufferComponent};
pub use error::VisIterError;
pub use iter::{
    ColumnWrite, SubChunkPair, VisIterConfig, VisIterConfigBuilder, VisibilityIterator,
};
pub use measures::{MDirection, MEpoch, MeasFrame, MeasFrameRef};
pub use source::{
    Column, ColumnValues, DataColumn, MemoryTable, RowSource, SyntheticLayout,
    SyntheticLayoutBuilder,
};
pub use sweep::{compare_sweeps, sweep, BufferInfo, SweepDifference};
pub use vis_buffer::{VisBuffer, VisBufferAccess, VisBufferAsync, VisBufferAsyncWrapper};

// re-exports
pub use marlu;
pub use marlu::{ndarray, Complex};

lazy_static! {
    #[doc(hidden)]
    pub static ref DURATIONS: Mutex<HashMap<String, Duration>> = Mutex::new(HashMap::new());
}

/// Time an expression, adding the elapsed time to the named entry of [`get_durations`].
#[macro_export]
macro_rules! with_increment_duration {
    ($name:expr, $($s:stmt);+ $(;)?) => {
        {
            let _now = std::time::Instant::now();
            let _res = {
                $(
                    $s
                )*
            };
            *$crate::DURATIONS
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .entry($name.into())
                .or_insert(std::time::Duration::default())
                += _now.elapsed();
            _res
        }
    };
}

/// Total time spent in each named [`with_increment_duration`] section so far.
pub fn get_durations() -> HashMap<String, Duration> {
    DURATIONS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}
