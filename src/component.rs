// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Identifiers for every field a visibility buffer can cache, and the prefetch set built from them.

use std::{
    collections::{BTreeSet, HashMap},
    fmt::{self, Display},
    str::FromStr,
};

use itertools::Itertools;
use lazy_static::lazy_static;

/// The table of buffer components.
///
/// Each entry is `(Variant, "Name", getter, probe, setter, Type)`. Scalars are returned by value,
/// arrays and measures by reference. `$callback` is invoked once with the whole table so that the
/// enum, the cache struct and every accessor surface are generated from one list.
macro_rules! for_each_component {
    ($callback:ident) => {
        $callback! {
            scalars: [
                (ArrayId, "ArrayId", array_id, array_id_ok, set_array_id, i32),
                (DataDescriptionId, "DataDescriptionId", data_description_id, data_description_id_ok, set_data_description_id, i32),
                (FieldId, "FieldId", field_id, field_id_ok, set_field_id, i32),
                (MsId, "MsId", ms_id, ms_id_ok, set_ms_id, i32),
                (NChannel, "NChannel", n_channel, n_channel_ok, set_n_channel, i32),
                (NCorr, "NCorr", n_corr, n_corr_ok, set_n_corr, i32),
                (NRow, "NRow", n_row, n_row_ok, set_n_row, i32),
                (NewArrayId, "NewArrayId", new_array_id, new_array_id_ok, set_new_array_id, bool),
                (NewFieldId, "NewFieldId", new_field_id, new_field_id_ok, set_new_field_id, bool),
                (NewMs, "NewMs", new_ms, new_ms_ok, set_new_ms, bool),
                (NewSpectralWindow, "NewSpectralWindow", new_spectral_window, new_spectral_window_ok, set_new_spectral_window, bool),
                (SpW, "SpW", spectral_window, spectral_window_ok, set_spectral_window, i32),
            ],
            arrays: [
                (Ant1, "Ant1", antenna1, antenna1_ok, set_antenna1, Array1<i32>),
                (Ant2, "Ant2", antenna2, antenna2_ok, set_antenna2, Array1<i32>),
                (Channel, "Channel", channel, channel_ok, set_channel, Array1<i32>),
                (CorrType, "CorrType", corr_type, corr_type_ok, set_corr_type, Array1<i32>),
                (CorrectedCube, "CorrectedCube", corrected_vis_cube, corrected_vis_cube_ok, set_corrected_vis_cube, Array3<Complex<f32>>),
                (Direction1, "Direction1", direction1, direction1_ok, set_direction1, Vec<MDirection>),
                (Direction2, "Direction2", direction2, direction2_ok, set_direction2, Vec<MDirection>),
                (Epoch, "Epoch", epoch, epoch_ok, set_epoch, MEpoch),
                (Exposure, "Exposure", exposure, exposure_ok, set_exposure, Array1<f64>),
                (Feed1, "Feed1", feed1, feed1_ok, set_feed1, Array1<i32>),
                (Feed1Pa, "Feed1Pa", feed1_pa, feed1_pa_ok, set_feed1_pa, Array1<f32>),
                (Feed2, "Feed2", feed2, feed2_ok, set_feed2, Array1<i32>),
                (Feed2Pa, "Feed2Pa", feed2_pa, feed2_pa_ok, set_feed2_pa, Array1<f32>),
                (Flag, "Flag", flag, flag_ok, set_flag, Array2<bool>),
                (FlagCube, "FlagCube", flag_cube, flag_cube_ok, set_flag_cube, Array3<bool>),
                (FlagRow, "FlagRow", flag_row, flag_row_ok, set_flag_row, Array1<bool>),
                (Freq, "Freq", frequency, frequency_ok, set_frequency, Array1<f64>),
                (ImagingWeight, "ImagingWeight", imaging_weight, imaging_weight_ok, set_imaging_weight, Array2<f32>),
                (ModelCube, "ModelCube", model_vis_cube, model_vis_cube_ok, set_model_vis_cube, Array3<Complex<f32>>),
                (ObservationId, "ObservationId", observation_id, observation_id_ok, set_observation_id, Array1<i32>),
                (ObservedCube, "ObservedCube", vis_cube, vis_cube_ok, set_vis_cube, Array3<Complex<f32>>),
                (PhaseCenter, "PhaseCenter", phase_center, phase_center_ok, set_phase_center, MDirection),
                (ProcessorId, "ProcessorId", processor_id, processor_id_ok, set_processor_id, Array1<i32>),
                (RowIds, "RowIds", row_ids, row_ids_ok, set_row_ids, Array1<usize>),
                (Scan, "Scan", scan, scan_ok, set_scan, Array1<i32>),
                (Sigma, "Sigma", sigma, sigma_ok, set_sigma, Array1<f32>),
                (SigmaMat, "SigmaMat", sigma_mat, sigma_mat_ok, set_sigma_mat, Array2<f32>),
                (StateId, "StateId", state_id, state_id_ok, set_state_id, Array1<i32>),
                (Time, "Time", time, time_ok, set_time, Array1<f64>),
                (TimeCentroid, "TimeCentroid", time_centroid, time_centroid_ok, set_time_centroid, Array1<f64>),
                (TimeInterval, "TimeInterval", time_interval, time_interval_ok, set_time_interval, Array1<f64>),
                (Uvw, "Uvw", uvw, uvw_ok, set_uvw, Vec<UVW>),
                (UvwMat, "UvwMat", uvw_mat, uvw_mat_ok, set_uvw_mat, Array2<f64>),
                (Weight, "Weight", weight, weight_ok, set_weight, Array1<f32>),
                (WeightMat, "WeightMat", weight_mat, weight_mat_ok, set_weight_mat, Array2<f32>),
                (WeightSpectrum, "WeightSpectrum", weight_spectrum, weight_spectrum_ok, set_weight_spectrum, Array3<f32>),
            ]
        }
    };
}
pub(crate) use for_each_component;

macro_rules! define_component_enum {
    (
        scalars: [$( ($s_variant:ident, $s_name:literal, $s_get:ident, $s_ok:ident, $s_set:ident, $s_ty:ty) ),* $(,)?],
        arrays: [$( ($a_variant:ident, $a_name:literal, $a_get:ident, $a_ok:ident, $a_set:ident, $a_ty:ty) ),* $(,)?]
    ) => {
        /// A single cacheable field of a visibility buffer.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[allow(missing_docs)]
        pub enum VisBufferComponent {
            $( $s_variant, )*
            $( $a_variant, )*
        }

        impl VisBufferComponent {
            /// Every component, scalars first.
            pub const ALL: &'static [VisBufferComponent] = &[
                $( VisBufferComponent::$s_variant, )*
                $( VisBufferComponent::$a_variant, )*
            ];

            /// The name used for this component in prefetch lists and diagnostics.
            pub fn name(self) -> &'static str {
                match self {
                    $( VisBufferComponent::$s_variant => $s_name, )*
                    $( VisBufferComponent::$a_variant => $a_name, )*
                }
            }

            /// The accessor which returns this component.
            pub fn accessor(self) -> &'static str {
                match self {
                    $( VisBufferComponent::$s_variant => stringify!($s_get), )*
                    $( VisBufferComponent::$a_variant => stringify!($a_get), )*
                }
            }

            /// Whether this component is a plain scalar with a sentinel value (`-1` or `false`).
            pub fn is_scalar(self) -> bool {
                match self {
                    $( VisBufferComponent::$s_variant => true, )*
                    $( VisBufferComponent::$a_variant => false, )*
                }
            }
        }
    };
}

for_each_component!(define_component_enum);

lazy_static! {
    static ref COMPONENTS_BY_NAME: HashMap<String, VisBufferComponent> = VisBufferComponent::ALL
        .iter()
        .flat_map(|&c| {
            [
                (c.name().to_lowercase(), c),
                (c.accessor().to_lowercase(), c),
            ]
        })
        .collect();
}

impl Display for VisBufferComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A component name could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown visibility buffer component {0:?}")]
pub struct UnknownComponent(pub String);

impl FromStr for VisBufferComponent {
    type Err = UnknownComponent;

    /// Parse either the component name (`"FlagCube"`) or its accessor (`"flag_cube"`),
    /// ignoring case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        COMPONENTS_BY_NAME
            .get(&s.trim().to_lowercase())
            .copied()
            .ok_or_else(|| UnknownComponent(s.to_string()))
    }
}

/// The set of components the look-ahead thread fills for every sub-chunk.
///
/// Components outside the set are left invalid in the buffers handed to the consumer, so
/// reading them is an error rather than a silent lazy read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefetchColumns(BTreeSet<VisBufferComponent>);

impl PrefetchColumns {
    /// An empty prefetch set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every component the buffer knows about.
    pub fn all() -> Self {
        Self::from_components(VisBufferComponent::ALL.iter().copied())
    }

    /// Every component except those given.
    pub fn all_except(excluded: &[VisBufferComponent]) -> Self {
        Self::from_components(
            VisBufferComponent::ALL
                .iter()
                .copied()
                .filter(|c| !excluded.contains(c)),
        )
    }

    /// Collect a prefetch set from components, duplicates are ignored.
    pub fn from_components<I: IntoIterator<Item = VisBufferComponent>>(components: I) -> Self {
        Self(components.into_iter().collect())
    }

    /// Add a component, returning whether it was new.
    pub fn insert(&mut self, component: VisBufferComponent) -> bool {
        self.0.insert(component)
    }

    /// Whether `component` is prefetched.
    pub fn contains(&self, component: VisBufferComponent) -> bool {
        self.0.contains(&component)
    }

    /// Number of components in the set.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether nothing is prefetched.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the components in a stable order.
    pub fn iter(&self) -> impl Iterator<Item = VisBufferComponent> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<VisBufferComponent> for PrefetchColumns {
    fn from_iter<I: IntoIterator<Item = VisBufferComponent>>(iter: I) -> Self {
        Self::from_components(iter)
    }
}

impl Display for PrefetchColumns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.iter().map(|c| c.name()).join(","))
    }
}

impl FromStr for PrefetchColumns {
    type Err = UnknownComponent;

    /// Parse a comma separated list of components. `all` selects everything and a leading
    /// `-` removes a component, so `all,-CorrectedCube,-ModelCube` is accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut result = Self::new();
        for token in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if token.eq_ignore_ascii_case("all") {
                result = Self::all();
            } else if let Some(excluded) = token.strip_prefix('-') {
                result.0.remove(&excluded.parse()?);
            } else {
                result.insert(token.parse()?);
            }
        }
        Ok(result)
    }
}
