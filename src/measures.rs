// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Measures (epochs and directions) which refer to a shared, mutable reference frame.
//!
//! Several measures filled for the same sub-chunk point at one [`MeasFrame`]. That sharing is
//! fine on one thread, but a buffer handed across threads must not alias a frame that the other
//! side may still mutate, so buffers store [`Unshare`]d copies.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use marlu::{hifitime::Epoch, LatLngHeight, RADec};

use crate::cache::{Sentinel, Unshare};

/// The reference frame a measure is interpreted in.
#[derive(Debug, Clone, Default)]
pub struct MeasFrame {
    /// GPS seconds of the frame epoch
    pub epoch_gpst_seconds: Option<f64>,
    /// Position of the observatory
    pub position: Option<LatLngHeight>,
    /// Reference direction, usually the phase centre
    pub direction: Option<RADec>,
}

/// A reference counted handle on a [`MeasFrame`].
///
/// Cloning the handle shares the frame, [`MeasFrameRef::deep_copy`] does not.
#[derive(Debug, Clone, Default)]
pub struct MeasFrameRef(Arc<RwLock<MeasFrame>>);

impl MeasFrameRef {
    /// A handle on a new frame.
    pub fn new(frame: MeasFrame) -> Self {
        Self(Arc::new(RwLock::new(frame)))
    }

    /// A new handle on a copy of the frame's current contents.
    pub fn deep_copy(&self) -> Self {
        Self::new(self.read().clone())
    }

    /// Lock the frame for reading.
    pub fn read(&self) -> RwLockReadGuard<'_, MeasFrame> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the frame for writing.
    pub fn write(&self) -> RwLockWriteGuard<'_, MeasFrame> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether both handles refer to the same frame.
    pub fn ptr_eq(&self, other: &MeasFrameRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Set the frame epoch, visible through every handle sharing this frame.
    pub fn set_epoch(&self, gpst_seconds: f64) {
        self.write().epoch_gpst_seconds = Some(gpst_seconds);
    }

    /// Set the frame direction.
    pub fn set_direction(&self, direction: RADec) {
        self.write().direction = Some(direction);
    }

    /// Set the frame position.
    pub fn set_position(&self, position: LatLngHeight) {
        self.write().position = Some(position);
    }
}

/// An instant in time, in GPS seconds.
#[derive(Debug, Clone)]
pub struct MEpoch {
    /// GPS seconds
    pub gpst_seconds: f64,
    /// The frame this epoch was measured in
    pub frame: MeasFrameRef,
}

impl MEpoch {
    /// An epoch at `gpst_seconds` in `frame`.
    pub fn new(gpst_seconds: f64, frame: MeasFrameRef) -> Self {
        Self {
            gpst_seconds,
            frame,
        }
    }

    /// The epoch as a [`hifitime::Epoch`](marlu::hifitime::Epoch).
    pub fn to_epoch(&self) -> Epoch {
        Epoch::from_gpst_seconds(self.gpst_seconds)
    }
}

impl Sentinel for MEpoch {
    fn sentinel() -> Self {
        Self::new(f64::NAN, MeasFrameRef::default())
    }
}

impl Unshare for MEpoch {
    fn unshared(&self) -> Self {
        Self::new(self.gpst_seconds, self.frame.deep_copy())
    }
}

/// A sky direction.
#[derive(Debug, Clone)]
pub struct MDirection {
    /// Right ascension and declination
    pub radec: RADec,
    /// The frame this direction was measured in
    pub frame: MeasFrameRef,
}

impl MDirection {
    /// A direction `radec` in `frame`.
    pub fn new(radec: RADec, frame: MeasFrameRef) -> Self {
        Self { radec, frame }
    }
}

impl Sentinel for MDirection {
    fn sentinel() -> Self {
        Self::new(
            RADec {
                ra: f64::NAN,
                dec: f64::NAN,
            },
            MeasFrameRef::default(),
        )
    }
}

impl Unshare for MDirection {
    fn unshared(&self) -> Self {
        Self::new(self.radec, self.frame.deep_copy())
    }
}

impl Unshare for Vec<MDirection> {
    /// Directions which shared a frame still share one afterwards, but it is a new frame.
    fn unshared(&self) -> Self {
        let mut copies: Vec<(MeasFrameRef, MeasFrameRef)> = Vec::new();
        self.iter()
            .map(|direction| {
                let frame = match copies
                    .iter()
                    .find(|(original, _)| original.ptr_eq(&direction.frame))
                {
                    Some((_, copy)) => copy.clone(),
                    None => {
                        let copy = direction.frame.deep_copy();
                        copies.push((direction.frame.clone(), copy.clone()));
                        copy
                    }
                };
                MDirection::new(direction.radec, frame)
            })
            .collect()
    }
}
