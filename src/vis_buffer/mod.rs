// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Visibility buffers: one sub-chunk's worth of cached fields.
//!
//! Three buffers share the [`VisBufferAccess`] accessor surface:
//! - [`VisBuffer`] fills each field lazily from the iterator it is attached to.
//! - [`VisBufferAsync`] is a self contained snapshot filled in bulk by the look-ahead thread.
//! - [`VisBufferAsyncWrapper`] forwards to whichever [`VisBufferAsync`] it currently wraps.

use marlu::{
    ndarray::{Array1, Array2, Array3},
    Complex, UVW,
};

use crate::{
    cache::CacheSlot,
    component::{for_each_component, VisBufferComponent},
    error::VisIterError,
    measures::{MDirection, MEpoch},
};

pub mod async_buffer;
mod fill;
pub mod sync;
pub mod wrapper;

pub use async_buffer::VisBufferAsync;
pub use sync::VisBuffer;
pub use wrapper::VisBufferAsyncWrapper;

/// The raw value of a scalar slot, valid or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarValue {
    Int(i32),
    Bool(bool),
}

impl From<i32> for ScalarValue {
    fn from(value: i32) -> Self {
        ScalarValue::Int(value)
    }
}

impl From<bool> for ScalarValue {
    fn from(value: bool) -> Self {
        ScalarValue::Bool(value)
    }
}

impl ScalarValue {
    /// Whether this is the "no value" sentinel, `-1` or `false`.
    pub fn is_sentinel(self) -> bool {
        matches!(self, ScalarValue::Int(-1) | ScalarValue::Bool(false))
    }
}

macro_rules! define_cache {
    (
        scalars: [$( ($s_variant:ident, $s_name:literal, $s_get:ident, $s_ok:ident, $s_set:ident, $s_ty:ty) ),* $(,)?],
        arrays: [$( ($a_variant:ident, $a_name:literal, $a_get:ident, $a_ok:ident, $a_set:ident, $a_ty:ty) ),* $(,)?]
    ) => {
        /// One [`CacheSlot`] per [`VisBufferComponent`].
        #[derive(Debug, Clone, Default)]
        pub struct VisBufferCache {
            $( pub(crate) $s_get: CacheSlot<$s_ty>, )*
            $( pub(crate) $a_get: CacheSlot<$a_ty>, )*
        }

        impl VisBufferCache {
            /// Whether `component` has been filled.
            pub fn is_valid(&self, component: VisBufferComponent) -> bool {
                match component {
                    $( VisBufferComponent::$s_variant => self.$s_get.is_valid(), )*
                    $( VisBufferComponent::$a_variant => self.$a_get.is_valid(), )*
                }
            }

            /// Mark every slot invalid, keeping storage.
            pub fn invalidate(&mut self) {
                $( self.$s_get.invalidate(); )*
                $( self.$a_get.invalidate(); )*
            }

            /// Mark one slot invalid.
            pub fn invalidate_component(&mut self, component: VisBufferComponent) {
                match component {
                    $( VisBufferComponent::$s_variant => self.$s_get.invalidate(), )*
                    $( VisBufferComponent::$a_variant => self.$a_get.invalidate(), )*
                }
            }

            /// Mark every slot invalid and put every value back to its sentinel.
            pub fn clear(&mut self) {
                $( self.$s_get.reset(); )*
                $( self.$a_get.reset(); )*
            }

            /// Copy one component from `other` if it is valid there, unsharing measures.
            pub fn copy_component_from(
                &mut self,
                other: &VisBufferCache,
                component: VisBufferComponent,
            ) -> bool {
                match component {
                    $( VisBufferComponent::$s_variant => self.$s_get.copy_from(&other.$s_get), )*
                    $( VisBufferComponent::$a_variant => self.$a_get.copy_from(&other.$a_get), )*
                }
            }

            /// The raw value of a scalar slot, whether or not it is valid. `None` for arrays.
            pub fn peek_scalar(&self, component: VisBufferComponent) -> Option<ScalarValue> {
                match component {
                    $( VisBufferComponent::$s_variant => Some(ScalarValue::from(*self.$s_get.peek())), )*
                    _ => None,
                }
            }
        }

        /// The accessor surface shared by every kind of visibility buffer.
        ///
        /// Getters take `&mut self` because the synchronous buffer fills on first access. What
        /// happens when a slot is invalid depends on the buffer: [`VisBuffer`] fills it,
        /// [`VisBufferAsync`] fails with [`VisIterError::NotPrefetched`] and a detached
        /// [`VisBufferAsyncWrapper`] fails with [`VisIterError::NoAttachedBuffer`].
        pub trait VisBufferAccess {
            /// Whether the component's slot currently holds a value.
            fn is_valid(&self, component: VisBufferComponent) -> bool;

            /// Mark every slot invalid.
            fn invalidate(&mut self);

            /// Every component with a valid slot.
            fn valid_components(&self) -> Vec<VisBufferComponent> {
                VisBufferComponent::ALL
                    .iter()
                    .copied()
                    .filter(|&component| self.is_valid(component))
                    .collect()
            }

            $(
                #[doc = concat!("The `", $s_name, "` component.")]
                fn $s_get(&mut self) -> Result<$s_ty, VisIterError>;

                #[doc = concat!("Whether the `", $s_name, "` slot is valid.")]
                fn $s_ok(&self) -> bool {
                    self.is_valid(VisBufferComponent::$s_variant)
                }
            )*

            $(
                #[doc = concat!("The `", $a_name, "` component.")]
                fn $a_get(&mut self) -> Result<&$a_ty, VisIterError>;

                #[doc = concat!("Whether the `", $a_name, "` slot is valid.")]
                fn $a_ok(&self) -> bool {
                    self.is_valid(VisBufferComponent::$a_variant)
                }
            )*
        }
    };
}

for_each_component!(define_cache);

impl VisBufferCache {
    /// Copy every valid slot of `other`, returning how many were copied.
    pub fn copy_valid_from(&mut self, other: &VisBufferCache) -> usize {
        VisBufferComponent::ALL
            .iter()
            .filter(|&&component| self.copy_component_from(other, component))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use marlu::ndarray::array;

    use super::*;
    use crate::measures::MeasFrameRef;

    #[test]
    fn test_fresh_cache_holds_sentinels() {
        let cache = VisBufferCache::default();
        for &component in VisBufferComponent::ALL {
            assert!(!cache.is_valid(component));
            match cache.peek_scalar(component) {
                Some(value) => assert!(value.is_sentinel(), "{} is {:?}", component, value),
                None => assert!(!component.is_scalar()),
            }
        }
    }

    #[test]
    fn test_clear_resets_values() {
        let mut cache = VisBufferCache::default();
        cache.n_row.set(3);
        cache.new_ms.set(true);
        cache.time.set(array![1.0, 2.0, 3.0]);
        assert!(cache.is_valid(VisBufferComponent::NRow));

        cache.invalidate();
        assert!(!cache.is_valid(VisBufferComponent::NRow));
        assert_eq!(cache.peek_scalar(VisBufferComponent::NRow), Some(ScalarValue::Int(3)));

        cache.clear();
        assert_eq!(cache.peek_scalar(VisBufferComponent::NRow), Some(ScalarValue::Int(-1)));
        assert_eq!(
            cache.peek_scalar(VisBufferComponent::NewMs),
            Some(ScalarValue::Bool(false))
        );
        assert_eq!(cache.time.peek().len(), 0);
    }

    #[test]
    fn test_copy_valid_from_unshares_measures() {
        let mut source = VisBufferCache::default();
        let frame = MeasFrameRef::default();
        source.epoch.set(MEpoch::new(10.0, frame.clone()));
        source.antenna1.set(array![0, 1]);

        let mut target = VisBufferCache::default();
        assert_eq!(target.copy_valid_from(&source), 2);
        assert_eq!(
            target.valid_slots(),
            vec![VisBufferComponent::Ant1, VisBufferComponent::Epoch]
        );
        let copied = target.epoch.get().unwrap();
        assert!(!copied.frame.ptr_eq(&frame));
    }

    impl VisBufferCache {
        fn valid_slots(&self) -> Vec<VisBufferComponent> {
            VisBufferComponent::ALL
                .iter()
                .copied()
                .filter(|&c| self.is_valid(c))
                .collect()
        }
    }
}
