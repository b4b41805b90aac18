// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A façade which lets code written against [`VisBufferAccess`] read whichever
//! [`VisBufferAsync`] the asynchronous iterator currently holds.

use std::panic::Location;

use marlu::{
    ndarray::{Array1, Array2, Array3},
    Complex, UVW,
};

use super::{VisBufferAccess, VisBufferAsync};
use crate::{
    component::{for_each_component, VisBufferComponent},
    error::VisIterError,
    iter::VisibilityIterator,
    measures::{MDirection, MEpoch},
};

/// Forwards every accessor to the wrapped [`VisBufferAsync`].
///
/// The wrapped buffer moves in with [`wrap`](Self::wrap) and back out with
/// [`release`](Self::release). Every accessor fails with [`VisIterError::NoAttachedBuffer`]
/// while nothing is wrapped; that is the only error the wrapper itself produces.
#[derive(Debug, Default)]
pub struct VisBufferAsyncWrapper {
    wrapped: Option<Box<VisBufferAsync>>,
    /// Describes the iterator this wrapper serves, only used in error messages.
    context: String,
}

impl VisBufferAsyncWrapper {
    /// A wrapper with nothing wrapped.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap `vba`, handing back whatever was wrapped before.
    pub fn wrap(&mut self, vba: Box<VisBufferAsync>) -> Option<Box<VisBufferAsync>> {
        self.wrapped.replace(vba)
    }

    /// Stop wrapping, handing back the buffer.
    pub fn release(&mut self) -> Option<Box<VisBufferAsync>> {
        self.wrapped.take()
    }

    /// Whether a buffer is wrapped.
    pub fn is_attached(&self) -> bool {
        self.wrapped.is_some()
    }

    /// The wrapped buffer, if any.
    pub fn wrapped(&self) -> Option<&VisBufferAsync> {
        self.wrapped.as_deref()
    }

    /// Record `vi` for error messages.
    pub fn attach_to_vis_iter(&mut self, vi: &VisibilityIterator) {
        self.set_context(vi.describe());
    }

    /// Forget the iterator recorded by [`attach_to_vis_iter`](Self::attach_to_vis_iter).
    pub fn detach_from_vis_iter(&mut self) {
        self.context.clear();
    }

    pub(crate) fn set_context(&mut self, context: String) {
        self.context = context;
    }

    #[track_caller]
    fn attached_mut(&mut self, function: &'static str) -> Result<&mut VisBufferAsync, VisIterError> {
        let caller = Location::caller();
        match self.wrapped.as_deref_mut() {
            Some(vba) => Ok(vba),
            None => Err(VisIterError::NoAttachedBuffer {
                function,
                context: if self.context.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", self.context)
                },
                source_file: caller.file(),
                source_line: caller.line(),
            }),
        }
    }
}

macro_rules! impl_wrapper_access {
    (
        scalars: [$( ($s_variant:ident, $s_name:literal, $s_get:ident, $s_ok:ident, $s_set:ident, $s_ty:ty) ),* $(,)?],
        arrays: [$( ($a_variant:ident, $a_name:literal, $a_get:ident, $a_ok:ident, $a_set:ident, $a_ty:ty) ),* $(,)?]
    ) => {
        impl VisBufferAccess for VisBufferAsyncWrapper {
            /// Relays the wrapped buffer's flag, `false` when nothing is wrapped.
            fn is_valid(&self, component: VisBufferComponent) -> bool {
                self.wrapped
                    .as_deref()
                    .map_or(false, |vba| vba.is_valid(component))
            }

            /// Does nothing, the asynchronous iterator manages validity.
            fn invalidate(&mut self) {}

            $(
                #[track_caller]
                fn $s_get(&mut self) -> Result<$s_ty, VisIterError> {
                    self.attached_mut(stringify!($s_get))?.$s_get()
                }
            )*

            $(
                #[track_caller]
                fn $a_get(&mut self) -> Result<&$a_ty, VisIterError> {
                    self.attached_mut(stringify!($a_get))?.$a_get()
                }
            )*
        }
    };
}

for_each_component!(impl_wrapper_access);

#[cfg(test)]
mod tests {
    use marlu::ndarray::array;

    use super::*;

    #[test]
    fn test_unattached_wrapper_fails_loudly() {
        let mut wrapper = VisBufferAsyncWrapper::new();
        wrapper.set_context("chunk 2, sub-chunk 0".to_string());
        let line = line!() + 1;
        match wrapper.weight_mat() {
            Err(VisIterError::NoAttachedBuffer {
                function,
                context,
                source_file,
                source_line,
            }) => {
                assert_eq!(function, "weight_mat");
                assert_eq!(context, " (chunk 2, sub-chunk 0)");
                assert!(source_file.ends_with("wrapper.rs"));
                assert_eq!(source_line, line);
            }
            other => panic!("expected NoAttachedBuffer, got {:?}", other.map(|w| w.dim())),
        }
        assert!(matches!(
            wrapper.new_ms(),
            Err(VisIterError::NoAttachedBuffer { .. })
        ));
        assert!(!wrapper.new_ms_ok());
    }

    #[test]
    fn test_wrapper_forwards_values_and_probes() {
        let mut vba = Box::new(VisBufferAsync::new());
        vba.set_antenna2(array![3, 4]);
        vba.set_spectral_window(1);

        let mut wrapper = VisBufferAsyncWrapper::new();
        assert!(wrapper.wrap(vba).is_none());
        assert_eq!(wrapper.antenna2().unwrap(), &array![3, 4]);
        assert_eq!(wrapper.spectral_window().unwrap(), 1);
        assert!(wrapper.antenna2_ok());
        assert!(!wrapper.antenna1_ok());
        assert_eq!(
            wrapper.valid_components(),
            vec![VisBufferComponent::SpW, VisBufferComponent::Ant2]
        );

        // misses on the wrapped buffer pass straight through
        assert!(matches!(
            wrapper.antenna1(),
            Err(VisIterError::NotPrefetched {
                component: VisBufferComponent::Ant1,
                ..
            })
        ));

        // invalidation is left to the iterator
        wrapper.invalidate();
        assert!(wrapper.antenna2_ok());

        let released = wrapper.release().unwrap();
        assert!(released.antenna2_ok());
        assert!(!wrapper.is_attached());
        assert!(matches!(
            wrapper.antenna2(),
            Err(VisIterError::NoAttachedBuffer { .. })
        ));
    }
}
