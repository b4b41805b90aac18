// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Fixtures shared by the unit tests.

use std::sync::Arc;

use crate::{
    component::PrefetchColumns,
    iter::{VisIterConfigBuilder, VisibilityIterator},
    source::{MemoryTable, RowSource, SyntheticLayoutBuilder},
};

/// One baseline over three timesteps, so one row per sub-chunk.
pub fn three_subchunk_table() -> MemoryTable {
    MemoryTable::synthesize(
        &SyntheticLayoutBuilder::default()
            .n_antennas(2)
            .n_timesteps(3)
            .build()
            .unwrap(),
    )
    .unwrap()
}

pub fn sync_iter(table: MemoryTable) -> VisibilityIterator {
    VisibilityIterator::new(
        vec![Arc::new(table) as Arc<dyn RowSource>],
        VisIterConfigBuilder::default().build().unwrap(),
    )
    .unwrap()
}

pub fn async_iter(
    table: MemoryTable,
    prefetch: PrefetchColumns,
    n_buffers: usize,
) -> VisibilityIterator {
    VisibilityIterator::new(
        vec![Arc::new(table) as Arc<dyn RowSource>],
        VisIterConfigBuilder::default()
            .async_enabled(true)
            .n_buffers(n_buffers)
            .prefetch(prefetch)
            .build()
            .unwrap(),
    )
    .unwrap()
}
