// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The asynchronous visibility buffer, a self contained snapshot of one sub-chunk.

use std::panic::Location;

use log::trace;
use marlu::{
    ndarray::{Array1, Array2, Array3},
    Complex, UVW,
};

use super::{ScalarValue, VisBuffer, VisBufferAccess, VisBufferCache};
use crate::{
    cache::Unshare,
    component::{for_each_component, PrefetchColumns, VisBufferComponent},
    error::VisIterError,
    measures::{MDirection, MEpoch},
};

/// A visibility buffer filled in bulk by the look-ahead thread.
///
/// It never refers to an iterator, so it is `Send` and can be handed from the producer to the
/// consumer. Every value stored is unshared first, so no measure frame is aliased across
/// threads. Reading a component that was never set fails with [`VisIterError::NotPrefetched`].
///
/// Lifecycle: a pooled buffer is [`clear`](VisBufferAsync::clear)ed, filled by the producer
/// and only then published, read by the consumer, and finally returned to the pool.
#[derive(Debug, Default)]
pub struct VisBufferAsync {
    cache: VisBufferCache,
}

impl VisBufferAsync {
    /// An empty buffer, every slot invalid and holding its sentinel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Invalidate every slot and put every value back to its sentinel, so nothing from a
    /// previous sub-chunk can leak into the next.
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    /// Copy every valid component of `other` into this buffer, unsharing measures.
    ///
    /// Components not valid in `other` are left as they were.
    pub fn fill_from(&mut self, other: &VisBufferAsync) {
        let copied = self.cache.copy_valid_from(&other.cache);
        trace!("fill_from copied {} components", copied);
    }

    /// Make this buffer a copy of `other`.
    ///
    /// With `copy` the valid components are copied, otherwise the buffer is only cleared.
    pub fn assign(&mut self, other: &VisBufferAsync, copy: bool) {
        self.clear();
        if copy {
            self.fill_from(other);
        }
    }

    /// Fill exactly the components in `prefetch` from a synchronous buffer, reading them
    /// through `vb` first if necessary.
    ///
    /// Components `vb` had to fill on the way (say `FlagCube` for `Flag`) are not copied.
    ///
    /// # Errors
    ///
    /// Whatever filling `vb` fails with.
    pub fn fill_from_sync(
        &mut self,
        vb: &mut VisBuffer,
        prefetch: &PrefetchColumns,
    ) -> Result<(), VisIterError> {
        for component in prefetch.iter() {
            vb.fill_if_needed(component, component.accessor())?;
            self.cache.copy_component_from(vb.cache(), component);
        }
        Ok(())
    }

    /// Snapshot whatever a synchronous buffer currently holds.
    pub(crate) fn from_sync(vb: &mut VisBuffer) -> Self {
        vb.refresh();
        let mut vba = Self::new();
        vba.cache.copy_valid_from(vb.cache());
        vba
    }

    /// The raw value of a scalar component, valid or not. `None` for arrays.
    pub fn peek_scalar(&self, component: VisBufferComponent) -> Option<ScalarValue> {
        self.cache.peek_scalar(component)
    }
}

#[track_caller]
fn not_prefetched(component: VisBufferComponent, function: &'static str) -> VisIterError {
    let caller = Location::caller();
    VisIterError::NotPrefetched {
        component,
        function,
        source_file: caller.file(),
        source_line: caller.line(),
    }
}

macro_rules! impl_async_access {
    (
        scalars: [$( ($s_variant:ident, $s_name:literal, $s_get:ident, $s_ok:ident, $s_set:ident, $s_ty:ty) ),* $(,)?],
        arrays: [$( ($a_variant:ident, $a_name:literal, $a_get:ident, $a_ok:ident, $a_set:ident, $a_ty:ty) ),* $(,)?]
    ) => {
        impl VisBufferAccess for VisBufferAsync {
            fn is_valid(&self, component: VisBufferComponent) -> bool {
                self.cache.is_valid(component)
            }

            fn invalidate(&mut self) {
                self.cache.invalidate();
            }

            $(
                #[track_caller]
                fn $s_get(&mut self) -> Result<$s_ty, VisIterError> {
                    match self.cache.$s_get.get() {
                        Some(value) => Ok(*value),
                        None => Err(not_prefetched(VisBufferComponent::$s_variant, stringify!($s_get))),
                    }
                }
            )*

            $(
                #[track_caller]
                fn $a_get(&mut self) -> Result<&$a_ty, VisIterError> {
                    match self.cache.$a_get.get() {
                        Some(value) => Ok(value),
                        None => Err(not_prefetched(VisBufferComponent::$a_variant, stringify!($a_get))),
                    }
                }
            )*
        }

        impl VisBufferAsync {
            $(
                #[doc = concat!("Store the `", $s_name, "` component and mark it valid.")]
                pub fn $s_set(&mut self, value: $s_ty) {
                    self.cache.$s_get.set(value);
                }
            )*

            $(
                #[doc = concat!("Store an unshared copy of the `", $a_name, "` component and mark it valid.")]
                pub fn $a_set(&mut self, value: $a_ty) {
                    self.cache.$a_get.set(value.into_unshared());
                }
            )*
        }
    };
}

for_each_component!(impl_async_access);
