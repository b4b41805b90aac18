// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The consumer facing visibility iterator.
//!
//! Data is visited chunk by chunk, and each chunk sub-chunk by sub-chunk:
//!
//! ```rust
//! use visiter::{
//!     MemoryTable, SyntheticLayoutBuilder, VisBufferAccess, VisIterConfigBuilder,
//!     VisibilityIterator,
//! };
//!
//! let table = MemoryTable::synthesize(&SyntheticLayoutBuilder::default().build().unwrap()).unwrap();
//! let config = VisIterConfigBuilder::default().build().unwrap();
//! let mut vi = VisibilityIterator::from_source(table, config).unwrap();
//!
//! let mut n_rows = 0;
//! vi.origin_chunks().unwrap();
//! while vi.more_chunks() {
//!     vi.origin().unwrap();
//!     while vi.more() {
//!         n_rows += vi.vis_buffer().n_row().unwrap();
//!         vi.advance().unwrap();
//!     }
//!     vi.next_chunk().unwrap();
//! }
//! assert_eq!(n_rows, 9);
//! ```
//!
//! With `async_enabled` the same loop is served by a look-ahead thread, and the buffer returned by
//! [`VisibilityIterator::vis_buffer`] only holds the components in the prefetch set.

use std::{
    env,
    fmt::{self, Display},
    ops::Range,
    sync::{Arc, RwLock},
};

use derive_builder::Builder;
use marlu::{
    ndarray::{Array1, Array2, Array3, Axis},
    Complex,
};

use crate::{
    component::PrefetchColumns,
    constants::{DEFAULT_N_BUFFERS, ENV_ASYNC_ENABLED, ENV_ASYNC_NBUFFERS},
    error::VisIterError,
    source::{Column, ColumnValues, DataColumn, RowSource},
    vis_buffer::{VisBufferAccess, VisBufferAsync},
};

mod async_iter;
pub(crate) mod chunking;
mod sync_iter;

pub(crate) use async_iter::AsyncVisIter;
pub(crate) use sync_iter::SyncVisIter;

/// Options for a [`VisibilityIterator`].
#[derive(Builder, Debug, Clone)]
pub struct VisIterConfig {
    /// Serve sub-chunks from a look-ahead thread
    #[builder(default = "false")]
    pub async_enabled: bool,

    /// Number of buffers in the look-ahead pool
    #[builder(default = "DEFAULT_N_BUFFERS")]
    pub n_buffers: usize,

    /// Components the look-ahead thread fills for each sub-chunk
    #[builder(default)]
    pub prefetch: PrefetchColumns,

    /// Maximum time span of a chunk in seconds, `0` for no limit
    #[builder(default = "0.0")]
    pub time_interval: f64,

    /// Maximum rows in a sub-chunk, `0` for one timestamp per sub-chunk
    #[builder(default = "0")]
    pub row_blocking: usize,
}

impl Default for VisIterConfig {
    fn default() -> Self {
        Self {
            async_enabled: false,
            n_buffers: DEFAULT_N_BUFFERS,
            prefetch: PrefetchColumns::default(),
            time_interval: 0.0,
            row_blocking: 0,
        }
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool, VisIterError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(VisIterError::BadConfig(format!(
            "{} must be a boolean, received {:?}",
            name, value
        ))),
    }
}

impl VisIterConfig {
    /// Check the configuration can be iterated with.
    ///
    /// # Errors
    ///
    /// [`VisIterError::BadConfig`] if `n_buffers` is zero or `time_interval` is negative or not
    /// finite.
    pub fn validate(&self) -> Result<(), VisIterError> {
        if self.n_buffers == 0 {
            return Err(VisIterError::BadConfig(
                "the look-ahead needs at least one buffer".to_string(),
            ));
        }
        if !self.time_interval.is_finite() || self.time_interval < 0.0 {
            return Err(VisIterError::BadConfig(format!(
                "time interval must be a non-negative number of seconds, received {}",
                self.time_interval
            )));
        }
        Ok(())
    }

    /// Override `async_enabled` and `n_buffers` from `VISITER_ASYNC_ENABLED` and
    /// `VISITER_ASYNC_NBUFFERS` when they are set.
    ///
    /// # Errors
    ///
    /// [`VisIterError::BadConfig`] if a variable can't be parsed.
    pub fn with_env_overrides(self) -> Result<Self, VisIterError> {
        self.with_overrides(
            env::var(ENV_ASYNC_ENABLED).ok().as_deref(),
            env::var(ENV_ASYNC_NBUFFERS).ok().as_deref(),
        )
    }

    fn with_overrides(
        mut self,
        async_enabled: Option<&str>,
        n_buffers: Option<&str>,
    ) -> Result<Self, VisIterError> {
        if let Some(value) = async_enabled {
            self.async_enabled = parse_flag(ENV_ASYNC_ENABLED, value)?;
        }
        if let Some(value) = n_buffers {
            self.n_buffers = value.trim().parse().map_err(|_| {
                VisIterError::BadConfig(format!(
                    "{} must be a positive integer, received {:?}",
                    ENV_ASYNC_NBUFFERS, value
                ))
            })?;
        }
        self.validate()?;
        Ok(self)
    }
}

/// Position of the iterator: chunk number and sub-chunk number within the chunk.
///
/// Pairs are ordered lexicographically, and a sweep visits them in strictly increasing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SubChunkPair {
    /// Chunk number, counted from the start of the sweep
    pub chunk: usize,
    /// Sub-chunk number within the chunk
    pub subchunk: usize,
}

impl SubChunkPair {
    /// The pair for sub-chunk `subchunk` of chunk `chunk`.
    pub fn new(chunk: usize, subchunk: usize) -> Self {
        Self { chunk, subchunk }
    }

    /// Move to the first sub-chunk of the next chunk.
    pub fn increment_chunk(&mut self) {
        self.chunk += 1;
        self.subchunk = 0;
    }

    /// Move to the next sub-chunk of the same chunk.
    pub fn increment_subchunk(&mut self) {
        self.subchunk += 1;
    }

    /// Go back to the first sub-chunk of the chunk.
    pub fn reset_subchunk(&mut self) {
        self.subchunk = 0;
    }

    /// Go back to the start of the sweep.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl Display for SubChunkPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.chunk, self.subchunk)
    }
}

/// Everything a buffer needs to fill itself for one sub-chunk.
#[derive(Clone)]
pub struct SubChunkView {
    /// The table the rows belong to
    pub source: Arc<dyn RowSource>,
    /// Index of `source` among the iterator's sources
    pub ms_id: usize,
    /// Rows of the sub-chunk
    pub rows: Range<usize>,
    /// `ARRAY_ID` shared by the chunk
    pub array_id: i32,
    /// `FIELD_ID` shared by the chunk
    pub field_id: i32,
    /// `DATA_DESC_ID` shared by the chunk
    pub ddid: i32,
    /// Whether the chunk is the first of its table
    pub new_ms: bool,
    /// Whether the array id differs from the previous chunk's
    pub new_array_id: bool,
    /// Whether the field differs from the previous chunk's
    pub new_field_id: bool,
    /// Whether the spectral window differs from the previous chunk's
    pub new_spectral_window: bool,
}

impl fmt::Debug for SubChunkView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubChunkView")
            .field("ms_id", &self.ms_id)
            .field("rows", &self.rows)
            .field("array_id", &self.array_id)
            .field("field_id", &self.field_id)
            .field("ddid", &self.ddid)
            .finish()
    }
}

/// Where a synchronous iterator currently is, shared with the buffers attached to it.
///
/// `generation` changes whenever the position or the underlying data changes, which tells
/// attached buffers that their caches are stale.
#[derive(Debug, Default)]
pub struct IterCursor {
    /// Bumped on every move and every write
    pub generation: u64,
    /// The current sub-chunk, `None` when there is none
    pub view: Option<SubChunkView>,
}

/// A write of the current sub-chunk's rows back to the table.
#[derive(Debug, Clone)]
pub enum ColumnWrite {
    /// `(correlation, channel, row)`
    FlagCube(Array3<bool>),
    /// `(channel, row)`, applied to every correlation
    Flag(Array2<bool>),
    FlagRow(Array1<bool>),
    /// `(correlation, row)`
    WeightMat(Array2<f32>),
    /// One weight per row, applied to every correlation
    Weight(Array1<f32>),
    /// `(correlation, row)`
    SigmaMat(Array2<f32>),
    /// `(correlation, channel, row)`
    VisCube(DataColumn, Array3<Complex<f32>>),
}

fn bad_shape(function: &str, argument: &str, expected: String, received: String) -> VisIterError {
    VisIterError::BadArrayShape {
        argument: argument.to_string(),
        function: function.to_string(),
        expected,
        received,
    }
}

impl ColumnWrite {
    /// The column written to.
    pub fn column(&self) -> Column {
        match self {
            ColumnWrite::FlagCube(_) | ColumnWrite::Flag(_) => Column::Flag,
            ColumnWrite::FlagRow(_) => Column::FlagRow,
            ColumnWrite::WeightMat(_) | ColumnWrite::Weight(_) => Column::Weight,
            ColumnWrite::SigmaMat(_) => Column::Sigma,
            ColumnWrite::VisCube(data_column, _) => data_column.column(),
        }
    }

    /// The iterator method which issues this write.
    pub fn function(&self) -> &'static str {
        match self {
            ColumnWrite::FlagCube(_) => "write_flag_cube",
            ColumnWrite::Flag(_) => "write_flag",
            ColumnWrite::FlagRow(_) => "write_flag_row",
            ColumnWrite::WeightMat(_) => "write_weight_mat",
            ColumnWrite::Weight(_) => "write_weight",
            ColumnWrite::SigmaMat(_) => "write_sigma_mat",
            ColumnWrite::VisCube(..) => "write_vis_cube",
        }
    }

    /// Number of rows covered, the length of the last axis.
    pub fn n_rows(&self) -> usize {
        match self {
            ColumnWrite::FlagCube(cube) => cube.len_of(Axis(2)),
            ColumnWrite::Flag(flag) => flag.len_of(Axis(1)),
            ColumnWrite::FlagRow(flag_row) => flag_row.len(),
            ColumnWrite::WeightMat(matrix) | ColumnWrite::SigmaMat(matrix) => matrix.len_of(Axis(1)),
            ColumnWrite::Weight(weight) => weight.len(),
            ColumnWrite::VisCube(_, cube) => cube.len_of(Axis(2)),
        }
    }

    /// Check the write covers exactly the `n_rows` rows of the current sub-chunk.
    pub(crate) fn check_rows(&self, n_rows: usize) -> Result<(), VisIterError> {
        if self.n_rows() == n_rows {
            Ok(())
        } else {
            Err(bad_shape(
                self.function(),
                "rows",
                format!("{} rows", n_rows),
                format!("{} rows", self.n_rows()),
            ))
        }
    }

    /// Write to `rows` of `source`.
    ///
    /// # Errors
    ///
    /// [`VisIterError::BadArrayShape`] if a broadcast write has the wrong number of rows or
    /// channels, otherwise whatever the source fails with.
    pub fn apply(self, source: &dyn RowSource, rows: Range<usize>) -> Result<(), VisIterError> {
        let column = self.column();
        let function = self.function();
        let n_rows = rows.len();
        let values = match self {
            ColumnWrite::FlagCube(cube) => ColumnValues::BoolCube(cube),
            ColumnWrite::FlagRow(flag_row) => ColumnValues::Bool(flag_row),
            ColumnWrite::WeightMat(weight_mat) => ColumnValues::FloatMatrix(weight_mat),
            ColumnWrite::SigmaMat(sigma_mat) => ColumnValues::FloatMatrix(sigma_mat),
            ColumnWrite::VisCube(_, cube) => ColumnValues::ComplexCube(cube),
            ColumnWrite::Flag(flag) => {
                let existing = source
                    .read_column(rows.clone(), column)?
                    .into_bool_cube(column)?;
                let (n_corr, n_chan, _) = existing.dim();
                if flag.dim() != (n_chan, n_rows) {
                    return Err(bad_shape(
                        function,
                        "flag",
                        format!("({}, {})", n_chan, n_rows),
                        format!("{:?}", flag.dim()),
                    ));
                }
                ColumnValues::BoolCube(Array3::from_shape_fn(
                    (n_corr, n_chan, n_rows),
                    |(_, c, r)| flag[[c, r]],
                ))
            }
            ColumnWrite::Weight(weight) => {
                let existing = source
                    .read_column(rows.clone(), column)?
                    .into_float_matrix(column)?;
                if weight.len() != n_rows {
                    return Err(bad_shape(
                        function,
                        "weight",
                        format!("({})", n_rows),
                        format!("({})", weight.len()),
                    ));
                }
                let n_corr = existing.len_of(Axis(0));
                ColumnValues::FloatMatrix(Array2::from_shape_fn((n_corr, n_rows), |(_, r)| {
                    weight[r]
                }))
            }
        };
        source.write_column(rows, column, values)?;
        Ok(())
    }
}

/// The operations the synchronous and asynchronous iterators both implement.
pub(crate) trait VisIterImpl: Send {
    fn origin_chunks(&mut self) -> Result<(), VisIterError>;
    fn more_chunks(&self) -> bool;
    fn next_chunk(&mut self) -> Result<(), VisIterError>;
    fn origin(&mut self) -> Result<(), VisIterError>;
    fn more(&self) -> bool;
    fn advance(&mut self) -> Result<(), VisIterError>;
    fn subchunk(&self) -> SubChunkPair;
    fn vis_buffer(&mut self) -> &mut dyn VisBufferAccess;
    fn set_interval(&mut self, seconds: f64);
    fn set_row_blocking(&mut self, rows: usize);
    fn write(&mut self, write: ColumnWrite) -> Result<(), VisIterError>;
    fn copy_vis_buffer(&mut self) -> Result<VisBufferAsync, VisIterError>;
    fn cursor(&self) -> Option<&Arc<RwLock<IterCursor>>>;
    fn finish(&mut self) -> Result<usize, VisIterError>;
    fn is_async(&self) -> bool;
}

/// Iterates over the chunks and sub-chunks of one or more tables.
///
/// The cursor protocol is the same in both modes:
/// - `origin_chunks` / `more_chunks` / `next_chunk` step between chunks
/// - `origin` / `more` / `advance` step between the sub-chunks of the current chunk
pub struct VisibilityIterator {
    imp: Box<dyn VisIterImpl>,
}

impl VisibilityIterator {
    /// Create an iterator over `sources`, asynchronous if `config.async_enabled`.
    ///
    /// Chunks never span sources. No data is read until [`origin_chunks`](Self::origin_chunks).
    ///
    /// # Errors
    ///
    /// [`VisIterError::BadConfig`] if the configuration is invalid.
    pub fn new(
        sources: Vec<Arc<dyn RowSource>>,
        config: VisIterConfig,
    ) -> Result<Self, VisIterError> {
        config.validate()?;
        let imp: Box<dyn VisIterImpl> = if config.async_enabled {
            Box::new(AsyncVisIter::new(sources, config))
        } else {
            Box::new(SyncVisIter::new(sources, &config))
        };
        Ok(Self { imp })
    }

    /// Create an iterator over a single source.
    ///
    /// # Errors
    ///
    /// See [`VisibilityIterator::new`].
    pub fn from_source<S: RowSource + 'static>(
        source: S,
        config: VisIterConfig,
    ) -> Result<Self, VisIterError> {
        Self::new(vec![Arc::new(source)], config)
    }

    /// Move to the first chunk, applying any pending interval or row blocking change.
    ///
    /// # Errors
    ///
    /// Source read errors, or in asynchronous mode an error from the look-ahead thread.
    pub fn origin_chunks(&mut self) -> Result<(), VisIterError> {
        self.imp.origin_chunks()
    }

    /// Whether there is a current chunk.
    pub fn more_chunks(&self) -> bool {
        self.imp.more_chunks()
    }

    /// Move to the next chunk.
    ///
    /// # Errors
    ///
    /// [`VisIterError::PendingChanges`], [`VisIterError::PastEnd`], or a read error.
    pub fn next_chunk(&mut self) -> Result<(), VisIterError> {
        self.imp.next_chunk()
    }

    /// Move to the first sub-chunk of the current chunk.
    ///
    /// # Errors
    ///
    /// [`VisIterError::PendingChanges`], [`VisIterError::NoCurrentChunk`], and in asynchronous
    /// mode [`VisIterError::AsyncRewind`] once the chunk's first sub-chunk has been released.
    pub fn origin(&mut self) -> Result<(), VisIterError> {
        self.imp.origin()
    }

    /// Whether the current chunk has a current sub-chunk.
    pub fn more(&self) -> bool {
        self.imp.more()
    }

    /// Move to the next sub-chunk of the current chunk.
    ///
    /// # Errors
    ///
    /// [`VisIterError::PendingChanges`] or [`VisIterError::PastEnd`].
    pub fn advance(&mut self) -> Result<(), VisIterError> {
        self.imp.advance()
    }

    /// Position of the current sub-chunk.
    pub fn subchunk(&self) -> SubChunkPair {
        self.imp.subchunk()
    }

    /// The buffer for the current sub-chunk: a lazily filled [`VisBuffer`](crate::VisBuffer)
    /// in synchronous mode, a [`VisBufferAsyncWrapper`](crate::VisBufferAsyncWrapper) otherwise.
    pub fn vis_buffer(&mut self) -> &mut dyn VisBufferAccess {
        self.imp.vis_buffer()
    }

    /// Queue a new maximum chunk time span, applied by the next `origin_chunks`.
    pub fn set_interval(&mut self, seconds: f64) {
        self.imp.set_interval(seconds);
    }

    /// Queue a new sub-chunk row limit, applied by the next `origin_chunks`.
    pub fn set_row_blocking(&mut self, rows: usize) {
        self.imp.set_row_blocking(rows);
    }

    /// Overwrite the flags of the current sub-chunk.
    ///
    /// # Errors
    ///
    /// [`VisIterError::NoCurrentChunk`] without a current sub-chunk, or a write error.
    pub fn write_flag_cube(&mut self, flag_cube: Array3<bool>) -> Result<(), VisIterError> {
        self.imp.write(ColumnWrite::FlagCube(flag_cube))
    }

    /// Overwrite the flags of the current sub-chunk, the same for every correlation.
    ///
    /// # Errors
    ///
    /// As for [`write_flag_cube`](Self::write_flag_cube).
    pub fn write_flag(&mut self, flag: Array2<bool>) -> Result<(), VisIterError> {
        self.imp.write(ColumnWrite::Flag(flag))
    }

    /// Overwrite the row flags of the current sub-chunk.
    ///
    /// # Errors
    ///
    /// As for [`write_flag_cube`](Self::write_flag_cube).
    pub fn write_flag_row(&mut self, flag_row: Array1<bool>) -> Result<(), VisIterError> {
        self.imp.write(ColumnWrite::FlagRow(flag_row))
    }

    /// Overwrite the per-correlation weights of the current sub-chunk.
    ///
    /// # Errors
    ///
    /// As for [`write_flag_cube`](Self::write_flag_cube).
    pub fn write_weight_mat(&mut self, weight_mat: Array2<f32>) -> Result<(), VisIterError> {
        self.imp.write(ColumnWrite::WeightMat(weight_mat))
    }

    /// Overwrite the weights of the current sub-chunk, the same for every correlation.
    ///
    /// # Errors
    ///
    /// As for [`write_flag_cube`](Self::write_flag_cube).
    pub fn write_weight(&mut self, weight: Array1<f32>) -> Result<(), VisIterError> {
        self.imp.write(ColumnWrite::Weight(weight))
    }

    /// Overwrite the per-correlation sigmas of the current sub-chunk.
    ///
    /// # Errors
    ///
    /// As for [`write_flag_cube`](Self::write_flag_cube).
    pub fn write_sigma_mat(&mut self, sigma_mat: Array2<f32>) -> Result<(), VisIterError> {
        self.imp.write(ColumnWrite::SigmaMat(sigma_mat))
    }

    /// Overwrite one visibility column of the current sub-chunk.
    ///
    /// # Errors
    ///
    /// As for [`write_flag_cube`](Self::write_flag_cube), plus a missing column.
    pub fn write_vis_cube(
        &mut self,
        data_column: DataColumn,
        cube: Array3<Complex<f32>>,
    ) -> Result<(), VisIterError> {
        self.imp.write(ColumnWrite::VisCube(data_column, cube))
    }

    /// An owned, unshared snapshot of the current buffer which outlives iteration.
    ///
    /// # Errors
    ///
    /// [`VisIterError::NoAttachedBuffer`] in asynchronous mode without a current sub-chunk.
    pub fn copy_vis_buffer(&mut self) -> Result<VisBufferAsync, VisIterError> {
        self.imp.copy_vis_buffer()
    }

    /// Whether buffers come from a look-ahead thread.
    pub fn is_async(&self) -> bool {
        self.imp.is_async()
    }

    /// Stop iterating and flush outstanding writes, returning how many writes were applied.
    ///
    /// In asynchronous mode this shuts down the look-ahead thread. Dropping the iterator does
    /// the same but can only log errors.
    ///
    /// # Errors
    ///
    /// A failed write, or [`VisIterError::LookaheadPanicked`].
    pub fn finish(mut self) -> Result<usize, VisIterError> {
        self.imp.finish()
    }

    /// A short description for diagnostics.
    pub fn describe(&self) -> String {
        format!(
            "{} iterator at {}",
            if self.is_async() { "asynchronous" } else { "synchronous" },
            self.subchunk()
        )
    }

    pub(crate) fn cursor(&self) -> Option<&Arc<RwLock<IterCursor>>> {
        self.imp.cursor()
    }
}
