// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Useful constants.

/// Default number of buffers in the look-ahead pool, and so how many sub-chunks the
/// look-ahead thread may fill before the consumer has released any.
pub const DEFAULT_N_BUFFERS: usize = 2;

/// Environment variable which switches asynchronous iteration on (`1`, `true`, `yes`, `on`).
pub const ENV_ASYNC_ENABLED: &str = "VISITER_ASYNC_ENABLED";

/// Environment variable which sets the look-ahead depth.
pub const ENV_ASYNC_NBUFFERS: &str = "VISITER_ASYNC_NBUFFERS";

/// Two times are considered equal when iterating if they differ by less than this many seconds.
pub const TIME_TOLERANCE_SECONDS: f64 = 1e-6;

/// Tolerance used when comparing the times of a sync and an async sweep.
pub const SWEEP_TIME_TOLERANCE: f64 = 1e-3;

/// MWA longitude on Earth in radians, used for synthetic tables.
pub const MWA_LONGITUDE_RADIANS: f64 = 2.0362898668561042;
/// MWA latitude on Earth in radians, used for synthetic tables.
pub const MWA_LATITUDE_RADIANS: f64 = -0.4660608448386394;
/// MWA altitude in metres, used for synthetic tables.
pub const MWA_HEIGHT_METRES: f64 = 377.827;

/// Width of a synthetic fine channel in Hz.
pub const SYNTHETIC_CHANNEL_WIDTH_HZ: f64 = 40e3;
/// Centre frequency of the first synthetic channel in Hz.
pub const SYNTHETIC_START_FREQ_HZ: f64 = 167.055e6;
/// Stokes code for XX. Synthetic correlations count up from here (XX, XY, YX, YY).
pub const CORR_TYPE_XX: i32 = 9;
