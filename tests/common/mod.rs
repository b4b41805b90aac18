// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{ops::Range, sync::Arc};

use visiter::{
    marlu::LatLngHeight,
    source::{error::SourceError, DataDescription, FieldInfo},
    Column, ColumnValues, MemoryTable, PrefetchColumns, RowSource, SyntheticLayout,
    SyntheticLayoutBuilder, VisIterConfigBuilder, VisibilityIterator,
};

/// A single baseline over three timesteps, one row per sub-chunk.
pub fn one_baseline_layout() -> SyntheticLayout {
    SyntheticLayoutBuilder::default()
        .n_antennas(2)
        .n_timesteps(3)
        .build()
        .unwrap()
}

/// Several fields and spectral windows, so chunks change identity.
pub fn mixed_layout() -> SyntheticLayout {
    SyntheticLayoutBuilder::default()
        .n_antennas(4)
        .autocorrelations(true)
        .n_timesteps(4)
        .n_chans(3)
        .n_corrs(4)
        .n_fields(2)
        .n_spws(2)
        .build()
        .unwrap()
}

pub fn table_source(layout: &SyntheticLayout) -> Arc<dyn RowSource> {
    Arc::new(MemoryTable::synthesize(layout).unwrap())
}

pub fn sync_vi(sources: Vec<Arc<dyn RowSource>>) -> VisibilityIterator {
    VisibilityIterator::new(sources, VisIterConfigBuilder::default().build().unwrap()).unwrap()
}

pub fn async_vi(
    sources: Vec<Arc<dyn RowSource>>,
    prefetch: PrefetchColumns,
    n_buffers: usize,
) -> VisibilityIterator {
    VisibilityIterator::new(
        sources,
        VisIterConfigBuilder::default()
            .async_enabled(true)
            .n_buffers(n_buffers)
            .prefetch(prefetch)
            .build()
            .unwrap(),
    )
    .unwrap()
}

/// Wraps a table so that every read of `column` starting at or after `fail_from` fails.
pub struct FailingSource {
    pub inner: Arc<dyn RowSource>,
    pub column: Column,
    pub fail_from: usize,
}

impl RowSource for FailingSource {
    fn num_rows(&self) -> usize {
        self.inner.num_rows()
    }

    fn has_column(&self, column: Column) -> bool {
        self.inner.has_column(column)
    }

    fn read_column(&self, rows: Range<usize>, column: Column) -> Result<ColumnValues, SourceError> {
        if column == self.column && rows.start >= self.fail_from {
            return Err(SourceError::MissingColumn(column));
        }
        self.inner.read_column(rows, column)
    }

    fn write_column(
        &self,
        rows: Range<usize>,
        column: Column,
        values: ColumnValues,
    ) -> Result<(), SourceError> {
        self.inner.write_column(rows, column, values)
    }

    fn data_description(&self, ddid: i32) -> Result<DataDescription, SourceError> {
        self.inner.data_description(ddid)
    }

    fn field(&self, field_id: i32) -> Result<FieldInfo, SourceError> {
        self.inner.field(field_id)
    }

    fn observatory(&self) -> LatLngHeight {
        self.inner.observatory()
    }

    fn receptor_angle(&self, antenna: i32) -> f32 {
        self.inner.receptor_angle(antenna)
    }
}
