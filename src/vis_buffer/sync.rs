// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The synchronous, lazily filled visibility buffer.

use std::{
    panic::Location,
    sync::{Arc, PoisonError, RwLock, Weak},
};

use marlu::{
    ndarray::{Array1, Array2, Array3},
    Complex, UVW,
};

use super::{fill::Filler, VisBufferAccess, VisBufferCache};
use crate::{
    component::{for_each_component, VisBufferComponent},
    error::VisIterError,
    iter::{IterCursor, VisibilityIterator},
    measures::{MDirection, MEpoch, MeasFrameRef},
};

/// A buffer that reads each component from its iterator's current sub-chunk on first access.
///
/// The buffer only holds a weak back-reference to the iterator's cursor. Whenever the iterator
/// moves, the next access notices the new cursor generation and invalidates every slot. Once
/// detached (or once the iterator is dropped), values already cached can still be read but
/// anything else fails with [`VisIterError::NotAttached`].
#[derive(Debug, Default)]
pub struct VisBuffer {
    cache: VisBufferCache,
    cursor: Option<Weak<RwLock<IterCursor>>>,
    generation: u64,
    frame: Option<MeasFrameRef>,
}

impl VisBuffer {
    /// A detached buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// A buffer attached to `vi`.
    ///
    /// # Errors
    ///
    /// [`VisIterError::SyncBufferOnAsyncIter`] if `vi` is asynchronous.
    pub fn attached(vi: &VisibilityIterator) -> Result<Self, VisIterError> {
        let mut vb = Self::new();
        vb.attach_to_vis_iter(vi)?;
        Ok(vb)
    }

    /// Attach to `vi`, dropping everything cached so far.
    ///
    /// # Errors
    ///
    /// [`VisIterError::SyncBufferOnAsyncIter`] if `vi` is asynchronous, since there is no
    /// cursor to fill from on the consumer side.
    pub fn attach_to_vis_iter(&mut self, vi: &VisibilityIterator) -> Result<(), VisIterError> {
        let cursor = vi
            .cursor()
            .ok_or(VisIterError::SyncBufferOnAsyncIter {
                function: "attach_to_vis_iter",
            })?;
        self.attach_cursor(cursor);
        Ok(())
    }

    pub(crate) fn attach_cursor(&mut self, cursor: &Arc<RwLock<IterCursor>>) {
        self.generation = cursor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .generation;
        self.cursor = Some(Arc::downgrade(cursor));
        self.cache.invalidate();
        self.frame = None;
    }

    /// Forget the iterator. Cached values stay readable.
    pub fn detach_from_vis_iter(&mut self) {
        self.cursor = None;
    }

    /// Whether the buffer is attached to an iterator which is still alive.
    pub fn is_attached(&self) -> bool {
        self.live_cursor().is_some()
    }

    pub(crate) fn cache(&self) -> &VisBufferCache {
        &self.cache
    }

    fn live_cursor(&self) -> Option<Arc<RwLock<IterCursor>>> {
        self.cursor.as_ref().and_then(Weak::upgrade)
    }

    /// Whether the cache still describes the iterator's current position.
    fn is_current(&self) -> bool {
        match self.live_cursor() {
            Some(cursor) => {
                cursor
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .generation
                    == self.generation
            }
            None => true,
        }
    }

    /// Invalidate everything if the iterator has moved since the last access.
    pub(crate) fn refresh(&mut self) {
        if !self.is_current() {
            self.cache.invalidate();
            self.frame = None;
            if let Some(cursor) = self.live_cursor() {
                self.generation = cursor
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .generation;
            }
        }
    }

    /// Make `component` valid, reading it from the iterator's current sub-chunk if needed.
    #[track_caller]
    pub(crate) fn fill_if_needed(
        &mut self,
        component: VisBufferComponent,
        function: &'static str,
    ) -> Result<(), VisIterError> {
        let caller = Location::caller();
        self.refresh();
        if self.cache.is_valid(component) {
            return Ok(());
        }
        let cursor = self.live_cursor().ok_or(VisIterError::NotAttached {
            function,
            source_file: caller.file(),
            source_line: caller.line(),
        })?;
        let view = cursor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .view
            .clone()
            .ok_or(VisIterError::NoCurrentChunk { function })?;
        Filler {
            cache: &mut self.cache,
            view: &view,
            frame: &mut self.frame,
        }
        .ensure(component)
    }
}

macro_rules! impl_sync_access {
    (
        scalars: [$( ($s_variant:ident, $s_name:literal, $s_get:ident, $s_ok:ident, $s_set:ident, $s_ty:ty) ),* $(,)?],
        arrays: [$( ($a_variant:ident, $a_name:literal, $a_get:ident, $a_ok:ident, $a_set:ident, $a_ty:ty) ),* $(,)?]
    ) => {
        impl VisBufferAccess for VisBuffer {
            fn is_valid(&self, component: VisBufferComponent) -> bool {
                self.is_current() && self.cache.is_valid(component)
            }

            fn invalidate(&mut self) {
                self.cache.invalidate();
                self.frame = None;
            }

            $(
                #[track_caller]
                fn $s_get(&mut self) -> Result<$s_ty, VisIterError> {
                    self.fill_if_needed(VisBufferComponent::$s_variant, stringify!($s_get))?;
                    Ok(*self.cache.$s_get.peek())
                }
            )*

            $(
                #[track_caller]
                fn $a_get(&mut self) -> Result<&$a_ty, VisIterError> {
                    self.fill_if_needed(VisBufferComponent::$a_variant, stringify!($a_get))?;
                    Ok(self.cache.$a_get.peek())
                }
            )*
        }
    };
}

for_each_component!(impl_sync_access);
