// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! How each component is read from a row source or derived from other components.

use log::trace;
use marlu::{
    ndarray::{Array1, Array2, Array3, Axis},
    UVW,
};

use super::VisBufferCache;
use crate::{
    component::VisBufferComponent as C,
    error::VisIterError,
    iter::SubChunkView,
    measures::{MDirection, MEpoch, MeasFrame, MeasFrameRef},
    source::Column,
};

/// Fills slots of one cache for the sub-chunk described by `view`.
///
/// Measures filled through the same `Filler` session share one reference frame.
pub(crate) struct Filler<'a> {
    pub cache: &'a mut VisBufferCache,
    pub view: &'a SubChunkView,
    pub frame: &'a mut Option<MeasFrameRef>,
}

fn mean_over_corrs(matrix: &Array2<f32>) -> Array1<f32> {
    matrix
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(matrix.len_of(Axis(1))))
}

impl Filler<'_> {
    /// Fill `component`, and whatever it is derived from, unless it is already valid.
    pub fn ensure(&mut self, component: C) -> Result<(), VisIterError> {
        if self.cache.is_valid(component) {
            Ok(())
        } else {
            self.fill(component)
        }
    }

    fn frame(&mut self) -> Result<MeasFrameRef, VisIterError> {
        if let Some(frame) = self.frame.as_ref() {
            return Ok(frame.clone());
        }
        self.ensure(C::Time)?;
        let view = self.view;
        let field = view.source.field(view.field_id)?;
        let frame = MeasFrameRef::new(MeasFrame {
            epoch_gpst_seconds: self.cache.time.peek().first().copied(),
            position: Some(view.source.observatory()),
            direction: Some(field.phase_centre),
        });
        *self.frame = Some(frame.clone());
        Ok(frame)
    }

    fn fill(&mut self, component: C) -> Result<(), VisIterError> {
        let view = self.view;
        let source = &*view.source;
        let rows = view.rows.clone();
        let n_rows = rows.len();
        trace!(
            "filling {} for rows {:?} of table {}",
            component,
            rows,
            view.ms_id
        );

        match component {
            C::ArrayId => self.cache.array_id.set(view.array_id),
            C::DataDescriptionId => self.cache.data_description_id.set(view.ddid),
            C::FieldId => self.cache.field_id.set(view.field_id),
            C::MsId => self.cache.ms_id.set(view.ms_id as i32),
            C::NRow => self.cache.n_row.set(n_rows as i32),
            C::NewArrayId => self.cache.new_array_id.set(view.new_array_id),
            C::NewFieldId => self.cache.new_field_id.set(view.new_field_id),
            C::NewMs => self.cache.new_ms.set(view.new_ms),
            C::NewSpectralWindow => self.cache.new_spectral_window.set(view.new_spectral_window),
            C::SpW => {
                let spw_id = source.data_description(view.ddid)?.spw_id;
                self.cache.spectral_window.set(spw_id);
            }
            C::NChannel => {
                let n_chan = source.data_description(view.ddid)?.freqs.len();
                self.cache.n_channel.set(n_chan as i32);
            }
            C::NCorr => {
                let n_corr = source.data_description(view.ddid)?.corr_types.len();
                self.cache.n_corr.set(n_corr as i32);
            }
            C::Freq => {
                let freqs = source.data_description(view.ddid)?.freqs;
                self.cache.frequency.set(freqs);
            }
            C::CorrType => {
                let corr_types = source.data_description(view.ddid)?.corr_types;
                self.cache.corr_type.set(corr_types);
            }
            C::Channel => {
                self.ensure(C::NChannel)?;
                let n_chan = *self.cache.n_channel.peek();
                self.cache.channel.set((0..n_chan).collect());
            }
            C::Ant1 => self.cache.antenna1.set(source.read_int(rows, Column::Antenna1)?),
            C::Ant2 => self.cache.antenna2.set(source.read_int(rows, Column::Antenna2)?),
            C::Feed1 => self.cache.feed1.set(source.read_int(rows, Column::Feed1)?),
            C::Feed2 => self.cache.feed2.set(source.read_int(rows, Column::Feed2)?),
            C::ObservationId => self
                .cache
                .observation_id
                .set(source.read_int(rows, Column::ObservationId)?),
            C::ProcessorId => self
                .cache
                .processor_id
                .set(source.read_int(rows, Column::ProcessorId)?),
            C::Scan => self.cache.scan.set(source.read_int(rows, Column::Scan)?),
            C::StateId => self.cache.state_id.set(source.read_int(rows, Column::StateId)?),
            C::Time => self.cache.time.set(source.read_double(rows, Column::Time)?),
            C::TimeCentroid => self
                .cache
                .time_centroid
                .set(source.read_double(rows, Column::TimeCentroid)?),
            C::TimeInterval => self
                .cache
                .time_interval
                .set(source.read_double(rows, Column::Interval)?),
            C::Exposure => self
                .cache
                .exposure
                .set(source.read_double(rows, Column::Exposure)?),
            C::RowIds => self.cache.row_ids.set(rows.collect()),
            C::ObservedCube => {
                let cube = source
                    .read_column(rows, Column::Data)?
                    .into_complex_cube(Column::Data)?;
                self.cache.vis_cube.set(cube);
            }
            C::CorrectedCube => {
                let cube = source
                    .read_column(rows, Column::CorrectedData)?
                    .into_complex_cube(Column::CorrectedData)?;
                self.cache.corrected_vis_cube.set(cube);
            }
            C::ModelCube => {
                let cube = source
                    .read_column(rows, Column::ModelData)?
                    .into_complex_cube(Column::ModelData)?;
                self.cache.model_vis_cube.set(cube);
            }
            C::FlagCube => {
                let cube = source
                    .read_column(rows, Column::Flag)?
                    .into_bool_cube(Column::Flag)?;
                self.cache.flag_cube.set(cube);
            }
            C::FlagRow => {
                let flag_row = source
                    .read_column(rows, Column::FlagRow)?
                    .into_bool(Column::FlagRow)?;
                self.cache.flag_row.set(flag_row);
            }
            C::Flag => {
                self.ensure(C::FlagCube)?;
                // flagged if any correlation is flagged
                let flag = self
                    .cache
                    .flag_cube
                    .peek()
                    .map_axis(Axis(0), |corrs| corrs.iter().any(|&f| f));
                self.cache.flag.set(flag);
            }
            C::WeightMat => {
                let weight_mat = source
                    .read_column(rows, Column::Weight)?
                    .into_float_matrix(Column::Weight)?;
                self.cache.weight_mat.set(weight_mat);
            }
            C::SigmaMat => {
                let sigma_mat = source
                    .read_column(rows, Column::Sigma)?
                    .into_float_matrix(Column::Sigma)?;
                self.cache.sigma_mat.set(sigma_mat);
            }
            C::Weight => {
                self.ensure(C::WeightMat)?;
                let weight = mean_over_corrs(self.cache.weight_mat.peek());
                self.cache.weight.set(weight);
            }
            C::Sigma => {
                self.ensure(C::SigmaMat)?;
                let sigma = mean_over_corrs(self.cache.sigma_mat.peek());
                self.cache.sigma.set(sigma);
            }
            C::WeightSpectrum => {
                let weight_spectrum = if source.has_column(Column::WeightSpectrum) {
                    source
                        .read_column(rows, Column::WeightSpectrum)?
                        .into_float_cube(Column::WeightSpectrum)?
                } else {
                    self.ensure(C::WeightMat)?;
                    self.ensure(C::NChannel)?;
                    let n_chan = *self.cache.n_channel.peek() as usize;
                    let weight_mat = self.cache.weight_mat.peek();
                    let (n_corr, n_row) = weight_mat.dim();
                    Array3::from_shape_fn((n_corr, n_chan, n_row), |(p, _, r)| weight_mat[[p, r]])
                };
                self.cache.weight_spectrum.set(weight_spectrum);
            }
            C::ImagingWeight => {
                self.ensure(C::Weight)?;
                self.ensure(C::Flag)?;
                self.ensure(C::FlagRow)?;
                let weight = self.cache.weight.peek();
                let flag = self.cache.flag.peek();
                let flag_row = self.cache.flag_row.peek();
                let imaging_weight = Array2::from_shape_fn(flag.dim(), |(c, r)| {
                    if flag[[c, r]] || flag_row[r] {
                        0.0
                    } else {
                        weight[r]
                    }
                });
                self.cache.imaging_weight.set(imaging_weight);
            }
            C::UvwMat => {
                let uvw_mat = source
                    .read_column(rows, Column::Uvw)?
                    .into_double_matrix(Column::Uvw)?;
                self.cache.uvw_mat.set(uvw_mat);
            }
            C::Uvw => {
                self.ensure(C::UvwMat)?;
                let uvw = self
                    .cache
                    .uvw_mat
                    .peek()
                    .axis_iter(Axis(1))
                    .map(|column| UVW {
                        u: column[0],
                        v: column[1],
                        w: column[2],
                    })
                    .collect();
                self.cache.uvw.set(uvw);
            }
            C::Feed1Pa => {
                self.ensure(C::Ant1)?;
                let angles = self
                    .cache
                    .antenna1
                    .peek()
                    .mapv(|antenna| source.receptor_angle(antenna));
                self.cache.feed1_pa.set(angles);
            }
            C::Feed2Pa => {
                self.ensure(C::Ant2)?;
                let angles = self
                    .cache
                    .antenna2
                    .peek()
                    .mapv(|antenna| source.receptor_angle(antenna));
                self.cache.feed2_pa.set(angles);
            }
            C::Epoch => {
                let frame = self.frame()?;
                let first_time = self.cache.time.peek().first().copied().unwrap_or(f64::NAN);
                self.cache.epoch.set(MEpoch::new(first_time, frame));
            }
            C::PhaseCenter => {
                let frame = self.frame()?;
                let phase_centre = source.field(view.field_id)?.phase_centre;
                self.cache
                    .phase_center
                    .set(MDirection::new(phase_centre, frame));
            }
            C::Direction1 | C::Direction2 => {
                self.ensure(C::PhaseCenter)?;
                let phase_center = self.cache.phase_center.peek().clone();
                let directions = vec![phase_center; n_rows];
                if component == C::Direction1 {
                    self.cache.direction1.set(directions);
                } else {
                    self.cache.direction2.set(directions);
                }
            }
        }
        Ok(())
    }
}
