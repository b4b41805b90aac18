// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Cache slots: a value paired with a flag saying whether it may be read.

use marlu::{
    ndarray::{Array, Dimension},
    UVW,
};

/// A value which stands for "nothing has been stored here".
pub trait Sentinel {
    /// `-1` for identifiers, `false` for flags, empty containers otherwise.
    fn sentinel() -> Self;
}

impl Sentinel for i32 {
    fn sentinel() -> Self {
        -1
    }
}

impl Sentinel for bool {
    fn sentinel() -> Self {
        false
    }
}

impl<A: Default, D: Dimension> Sentinel for Array<A, D> {
    fn sentinel() -> Self {
        Array::default(D::default())
    }
}

impl<T> Sentinel for Vec<T> {
    fn sentinel() -> Self {
        Vec::new()
    }
}

/// Produce a copy which shares no mutable interior state with `self`.
///
/// Plain data is simply cloned. Measures point at reference frames behind an `Arc`, so those
/// frames are deep copied.
pub trait Unshare {
    fn unshared(&self) -> Self;

    /// Unshare a value that is being moved in. Plain data is already exclusively owned.
    fn into_unshared(self) -> Self
    where
        Self: Sized,
    {
        self.unshared()
    }
}

macro_rules! unshare_by_clone {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Unshare for $ty {
                fn unshared(&self) -> Self {
                    *self
                }
            }
        )*
    };
}

unshare_by_clone!(i32, bool);

impl<A: Clone, D: Dimension> Unshare for Array<A, D> {
    fn unshared(&self) -> Self {
        self.clone()
    }

    fn into_unshared(self) -> Self {
        self
    }
}

impl Unshare for Vec<UVW> {
    fn unshared(&self) -> Self {
        self.clone()
    }

    fn into_unshared(self) -> Self {
        self
    }
}

/// One field's cached value and whether it is valid.
///
/// The value of an invalid slot must not be handed out; [`CacheSlot::get`] returns `None` and
/// the owner decides whether to fill it or fail.
#[derive(Debug, Clone)]
pub struct CacheSlot<T> {
    value: T,
    valid: bool,
}

impl<T: Sentinel> Default for CacheSlot<T> {
    fn default() -> Self {
        Self {
            value: T::sentinel(),
            valid: false,
        }
    }
}

impl<T: Sentinel> CacheSlot<T> {
    /// The value if the slot is valid.
    pub fn get(&self) -> Option<&T> {
        if self.valid {
            Some(&self.value)
        } else {
            None
        }
    }

    /// Store a value and mark the slot valid.
    pub fn set(&mut self, value: T) {
        self.value = value;
        self.valid = true;
    }

    /// Whether the slot holds a filled value.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Mark the slot invalid, keeping the storage around for the next fill.
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    /// Mark the slot invalid and drop its value, leaving the sentinel behind.
    pub fn reset(&mut self) {
        self.value = T::sentinel();
        self.valid = false;
    }

    /// The stored value whether or not it is valid. Only used to check sentinels.
    pub fn peek(&self) -> &T {
        &self.value
    }
}

impl<T: Sentinel + Unshare> CacheSlot<T> {
    /// Copy `other` into this slot if it is valid, unsharing the value on the way.
    /// Returns whether anything was copied.
    pub fn copy_from(&mut self, other: &CacheSlot<T>) -> bool {
        match other.get() {
            Some(value) => {
                self.set(value.unshared());
                true
            }
            None => false,
        }
    }
}
