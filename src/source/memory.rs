// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! An in-memory columnar table, and a generator for deterministic synthetic observations.

use std::{
    collections::HashMap,
    ops::Range,
    sync::{PoisonError, RwLock},
};

use derive_builder::Builder;
use log::{debug, trace};
use marlu::{
    ndarray::{Array1, Array2, Array3},
    Complex, LatLngHeight, RADec, UVW,
};

use super::{error::SourceError, Column, ColumnValues, DataDescription, FieldInfo, RowSource};
use crate::constants::{
    CORR_TYPE_XX, MWA_HEIGHT_METRES, MWA_LATITUDE_RADIANS, MWA_LONGITUDE_RADIANS,
    SYNTHETIC_CHANNEL_WIDTH_HZ, SYNTHETIC_START_FREQ_HZ,
};

/// Everything stored for a single row of the main table.
///
/// Array values are indexed `[correlation, channel]` or `[correlation]`.
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub struct TableRow {
    pub antenna1: i32,
    pub antenna2: i32,
    pub array_id: i32,
    pub data_desc_id: i32,
    pub field_id: i32,
    pub feed1: i32,
    pub feed2: i32,
    pub observation_id: i32,
    pub processor_id: i32,
    pub scan: i32,
    pub state_id: i32,
    pub time: f64,
    pub time_centroid: f64,
    pub interval: f64,
    pub exposure: f64,
    pub uvw: UVW,
    pub flag_row: bool,
    pub data: Array2<Complex<f32>>,
    pub corrected_data: Option<Array2<Complex<f32>>>,
    pub model_data: Option<Array2<Complex<f32>>>,
    pub flag: Array2<bool>,
    pub weight: Array1<f32>,
    pub sigma: Array1<f32>,
    pub weight_spectrum: Option<Array2<f32>>,
}

impl TableRow {
    fn identity(&self) -> (i32, i32, i32) {
        (self.array_id, self.field_id, self.data_desc_id)
    }
}

/// Accumulates rows for a [`MemoryTable`], checking order and shape as they arrive.
pub struct MemoryTableBuilder {
    rows: Vec<TableRow>,
    data_descriptions: Vec<DataDescription>,
    fields: Vec<FieldInfo>,
    observatory: LatLngHeight,
    receptor_angles: Vec<f32>,
}

fn shape_error(column: Column, expected: impl std::fmt::Debug, received: impl std::fmt::Debug) -> SourceError {
    SourceError::BadShape {
        column,
        expected: format!("{:?}", expected),
        received: format!("{:?}", received),
    }
}

fn check_optional<A>(
    column: Column,
    first: &Option<Array2<A>>,
    row: &Option<Array2<A>>,
    dim: (usize, usize),
) -> Result<(), SourceError> {
    match (first, row) {
        (None, None) => Ok(()),
        (Some(_), None) => Err(SourceError::MissingColumn(column)),
        (None, Some(_)) => Err(shape_error(column, "absent", "present")),
        (Some(_), Some(values)) if values.dim() != dim => {
            Err(shape_error(column, dim, values.dim()))
        }
        _ => Ok(()),
    }
}

impl MemoryTableBuilder {
    /// An empty table at `observatory`.
    pub fn new(observatory: LatLngHeight) -> Self {
        Self {
            rows: vec![],
            data_descriptions: vec![],
            fields: vec![],
            observatory,
            receptor_angles: vec![],
        }
    }

    /// Add a data description, its id is its position.
    pub fn data_description(mut self, data_description: DataDescription) -> Self {
        self.data_descriptions.push(data_description);
        self
    }

    /// Add a field, its id is its position.
    pub fn field(mut self, field: FieldInfo) -> Self {
        self.fields.push(field);
        self
    }

    /// Receptor angles indexed by antenna.
    pub fn receptor_angles(mut self, receptor_angles: Vec<f32>) -> Self {
        self.receptor_angles = receptor_angles;
        self
    }

    /// Append a row.
    ///
    /// # Errors
    ///
    /// - [`SourceError::OutOfOrderRow`] if the row's time goes backwards while array, field and
    ///   data description are unchanged, since rows of one timestamp must stay contiguous.
    /// - [`SourceError::BadShape`] or [`SourceError::MissingColumn`] if the row's arrays do not
    ///   match the first row's.
    pub fn push_row(&mut self, row: TableRow) -> Result<(), SourceError> {
        if let Some(previous) = self.rows.last() {
            if previous.identity() == row.identity() && row.time < previous.time {
                return Err(SourceError::OutOfOrderRow {
                    row: self.rows.len(),
                    time: row.time,
                    previous: previous.time,
                });
            }
        }
        if let Some(first) = self.rows.first() {
            let dim = first.data.dim();
            if row.data.dim() != dim {
                return Err(shape_error(Column::Data, dim, row.data.dim()));
            }
            if row.flag.dim() != dim {
                return Err(shape_error(Column::Flag, dim, row.flag.dim()));
            }
            if row.weight.len() != dim.0 {
                return Err(shape_error(Column::Weight, dim.0, row.weight.len()));
            }
            if row.sigma.len() != dim.0 {
                return Err(shape_error(Column::Sigma, dim.0, row.sigma.len()));
            }
            check_optional(Column::CorrectedData, &first.corrected_data, &row.corrected_data, dim)?;
            check_optional(Column::ModelData, &first.model_data, &row.model_data, dim)?;
            check_optional(Column::WeightSpectrum, &first.weight_spectrum, &row.weight_spectrum, dim)?;
        } else if row.flag.dim() != row.data.dim() {
            return Err(shape_error(Column::Flag, row.data.dim(), row.flag.dim()));
        }
        self.rows.push(row);
        Ok(())
    }

    /// Assemble the columns.
    ///
    /// # Errors
    ///
    /// [`SourceError::BadShape`] if a data description does not match the table's channel or
    /// correlation count.
    pub fn build(self) -> Result<MemoryTable, SourceError> {
        let num_rows = self.rows.len();
        let (n_corr, n_chan) = self.rows.first().map_or((0, 0), |row| row.data.dim());
        if num_rows > 0 {
            for data_description in self.data_descriptions.iter() {
                if data_description.freqs.len() != n_chan {
                    return Err(shape_error(Column::Data, n_chan, data_description.freqs.len()));
                }
                if data_description.corr_types.len() != n_corr {
                    return Err(shape_error(
                        Column::Data,
                        n_corr,
                        data_description.corr_types.len(),
                    ));
                }
            }
        }

        let rows = &self.rows;
        let ints = |get: fn(&TableRow) -> i32| ColumnValues::Int(rows.iter().map(get).collect());
        let doubles =
            |get: fn(&TableRow) -> f64| ColumnValues::Double(rows.iter().map(get).collect());

        let mut columns = HashMap::new();
        columns.insert(Column::Antenna1, ints(|r| r.antenna1));
        columns.insert(Column::Antenna2, ints(|r| r.antenna2));
        columns.insert(Column::ArrayId, ints(|r| r.array_id));
        columns.insert(Column::DataDescId, ints(|r| r.data_desc_id));
        columns.insert(Column::FieldId, ints(|r| r.field_id));
        columns.insert(Column::Feed1, ints(|r| r.feed1));
        columns.insert(Column::Feed2, ints(|r| r.feed2));
        columns.insert(Column::ObservationId, ints(|r| r.observation_id));
        columns.insert(Column::ProcessorId, ints(|r| r.processor_id));
        columns.insert(Column::Scan, ints(|r| r.scan));
        columns.insert(Column::StateId, ints(|r| r.state_id));
        columns.insert(Column::Time, doubles(|r| r.time));
        columns.insert(Column::TimeCentroid, doubles(|r| r.time_centroid));
        columns.insert(Column::Interval, doubles(|r| r.interval));
        columns.insert(Column::Exposure, doubles(|r| r.exposure));
        columns.insert(
            Column::FlagRow,
            ColumnValues::Bool(rows.iter().map(|r| r.flag_row).collect()),
        );

        let uvw: Vec<f64> = rows.iter().flat_map(|r| [r.uvw.u, r.uvw.v, r.uvw.w]).collect();
        columns.insert(
            Column::Uvw,
            ColumnValues::DoubleMatrix(
                Array2::from_shape_vec((num_rows, 3), uvw)
                    .map_err(|_| shape_error(Column::Uvw, (num_rows, 3), "ragged"))?
                    .reversed_axes(),
            ),
        );
        columns.insert(
            Column::Weight,
            ColumnValues::FloatMatrix(matrix(Column::Weight, rows, n_corr, |r| &r.weight)?),
        );
        columns.insert(
            Column::Sigma,
            ColumnValues::FloatMatrix(matrix(Column::Sigma, rows, n_corr, |r| &r.sigma)?),
        );
        columns.insert(
            Column::Data,
            ColumnValues::ComplexCube(cube(Column::Data, rows, (n_corr, n_chan), |r| Some(&r.data))?),
        );
        columns.insert(
            Column::Flag,
            ColumnValues::BoolCube(cube(Column::Flag, rows, (n_corr, n_chan), |r| Some(&r.flag))?),
        );
        if rows.first().map_or(false, |r| r.corrected_data.is_some()) {
            columns.insert(
                Column::CorrectedData,
                ColumnValues::ComplexCube(cube(Column::CorrectedData, rows, (n_corr, n_chan), |r| {
                    r.corrected_data.as_ref()
                })?),
            );
        }
        if rows.first().map_or(false, |r| r.model_data.is_some()) {
            columns.insert(
                Column::ModelData,
                ColumnValues::ComplexCube(cube(Column::ModelData, rows, (n_corr, n_chan), |r| {
                    r.model_data.as_ref()
                })?),
            );
        }
        if rows.first().map_or(false, |r| r.weight_spectrum.is_some()) {
            columns.insert(
                Column::WeightSpectrum,
                ColumnValues::FloatCube(cube(Column::WeightSpectrum, rows, (n_corr, n_chan), |r| {
                    r.weight_spectrum.as_ref()
                })?),
            );
        }

        debug!(
            "built memory table with {} rows, {} correlations, {} channels",
            num_rows, n_corr, n_chan
        );

        Ok(MemoryTable {
            num_rows,
            columns: RwLock::new(columns),
            data_descriptions: self.data_descriptions,
            fields: self.fields,
            observatory: self.observatory,
            receptor_angles: self.receptor_angles,
        })
    }
}

/// Stack per row vectors into a `(correlation, row)` matrix.
fn matrix(
    column: Column,
    rows: &[TableRow],
    n_corr: usize,
    get: fn(&TableRow) -> &Array1<f32>,
) -> Result<Array2<f32>, SourceError> {
    let flat: Vec<f32> = rows.iter().flat_map(|r| get(r).iter().copied()).collect();
    Ok(Array2::from_shape_vec((rows.len(), n_corr), flat)
        .map_err(|_| shape_error(column, (rows.len(), n_corr), "ragged"))?
        .reversed_axes())
}

/// Stack per row `(correlation, channel)` arrays into a `(correlation, channel, row)` cube.
fn cube<A: Clone>(
    column: Column,
    rows: &[TableRow],
    dim: (usize, usize),
    get: impl Fn(&TableRow) -> Option<&Array2<A>>,
) -> Result<Array3<A>, SourceError> {
    let mut flat = Vec::with_capacity(rows.len() * dim.0 * dim.1);
    for row in rows {
        let values = get(row).ok_or(SourceError::MissingColumn(column))?;
        flat.extend(values.iter().cloned());
    }
    Ok(Array3::from_shape_vec((rows.len(), dim.0, dim.1), flat)
        .map_err(|_| shape_error(column, (rows.len(), dim.0, dim.1), "ragged"))?
        .permuted_axes([1, 2, 0]))
}

/// A table held entirely in memory.
///
/// Reads copy the requested rows out, writes lock the columns for the duration of the copy in.
pub struct MemoryTable {
    num_rows: usize,
    columns: RwLock<HashMap<Column, ColumnValues>>,
    data_descriptions: Vec<DataDescription>,
    fields: Vec<FieldInfo>,
    observatory: LatLngHeight,
    receptor_angles: Vec<f32>,
}

impl MemoryTable {
    /// Start building a table row by row.
    pub fn builder(observatory: LatLngHeight) -> MemoryTableBuilder {
        MemoryTableBuilder::new(observatory)
    }

    /// Generate a deterministic observation.
    ///
    /// Rows are ordered by field, then spectral window, then timestep, then baseline, so every
    /// (field, spectral window) pair is one chunk and every timestep one sub-chunk.
    ///
    /// Values are chosen so that every row is distinguishable:
    /// - `DATA[p, c]` is `row + i (c * n_corrs + p)`
    /// - `FLAG[p, c]` is set when `(row + c + p) % 5 == 0`
    /// - `WEIGHT[p]` is `1 + baseline + p / 2`, and `SIGMA` is `1 / sqrt(WEIGHT)`
    ///
    /// # Errors
    ///
    /// Only if the layout is inconsistent, see [`MemoryTableBuilder::build`].
    pub fn synthesize(layout: &SyntheticLayout) -> Result<MemoryTable, SourceError> {
        let n_corrs = layout.n_corrs;
        let n_chans = layout.n_chans;
        let baselines: Vec<(i32, i32)> = (0..layout.n_antennas as i32)
            .flat_map(|a1| (a1..layout.n_antennas as i32).map(move |a2| (a1, a2)))
            .filter(|(a1, a2)| layout.autocorrelations || a1 != a2)
            .collect();

        let mut builder = MemoryTable::builder(LatLngHeight {
            longitude_rad: MWA_LONGITUDE_RADIANS,
            latitude_rad: MWA_LATITUDE_RADIANS,
            height_metres: MWA_HEIGHT_METRES,
        })
        .receptor_angles(
            (0..layout.n_antennas)
                .map(|antenna| antenna as f32 * 0.1)
                .collect(),
        );
        for spw in 0..layout.n_spws {
            let first_chan = spw * n_chans;
            builder = builder.data_description(DataDescription {
                spw_id: spw as i32,
                freqs: (first_chan..first_chan + n_chans)
                    .map(|c| SYNTHETIC_START_FREQ_HZ + c as f64 * SYNTHETIC_CHANNEL_WIDTH_HZ)
                    .collect(),
                corr_types: (0..n_corrs as i32).map(|p| CORR_TYPE_XX + p).collect(),
            });
        }
        for field in 0..layout.n_fields {
            builder = builder.field(FieldInfo {
                name: format!("field{:02}", field),
                phase_centre: RADec {
                    ra: field as f64 * 0.1,
                    dec: MWA_LATITUDE_RADIANS,
                },
            });
        }

        let mut row_idx = 0_usize;
        for field in 0..layout.n_fields {
            for spw in 0..layout.n_spws {
                for timestep in 0..layout.n_timesteps {
                    let time = layout.start_gps_seconds
                        + (field * layout.n_timesteps + timestep) as f64 * layout.integration_time;
                    for (baseline, &(a1, a2)) in baselines.iter().enumerate() {
                        let r = row_idx as f32;
                        let data = Array2::from_shape_fn((n_corrs, n_chans), |(p, c)| {
                            Complex::new(r, (c * n_corrs + p) as f32)
                        });
                        let weight = Array1::from_shape_fn(n_corrs, |p| {
                            1.0 + baseline as f32 + p as f32 / 2.0
                        });
                        builder.push_row(TableRow {
                            antenna1: a1,
                            antenna2: a2,
                            array_id: 0,
                            data_desc_id: spw as i32,
                            field_id: field as i32,
                            feed1: 0,
                            feed2: 0,
                            observation_id: 0,
                            processor_id: 0,
                            scan: field as i32 + 1,
                            state_id: 0,
                            time,
                            time_centroid: time,
                            interval: layout.integration_time,
                            exposure: layout.integration_time,
                            uvw: UVW {
                                u: (a2 - a1) as f64 * 100.0 + timestep as f64,
                                v: (a1 + a2) as f64 * 10.0,
                                w: timestep as f64 * 0.1,
                            },
                            flag_row: false,
                            corrected_data: layout
                                .model_and_corrected
                                .then(|| data.mapv(|v| v * 2.0)),
                            model_data: layout
                                .model_and_corrected
                                .then(|| Array2::from_elem((n_corrs, n_chans), Complex::new(1.0, 0.0))),
                            flag: Array2::from_shape_fn((n_corrs, n_chans), |(p, c)| {
                                (row_idx + c + p) % 5 == 0
                            }),
                            sigma: weight.mapv(|w| 1.0 / w.sqrt()),
                            weight,
                            weight_spectrum: None,
                            data,
                        })?;
                        row_idx += 1;
                    }
                }
            }
        }
        trace!("synthesized {} rows for {:?}", row_idx, layout);
        builder.build()
    }
}

impl RowSource for MemoryTable {
    fn num_rows(&self) -> usize {
        self.num_rows
    }

    fn has_column(&self, column: Column) -> bool {
        self.columns
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&column)
    }

    fn read_column(&self, rows: Range<usize>, column: Column) -> Result<ColumnValues, SourceError> {
        SourceError::check_range(&rows, self.num_rows)?;
        let columns = self.columns.read().unwrap_or_else(PoisonError::into_inner);
        let values = columns
            .get(&column)
            .ok_or(SourceError::MissingColumn(column))?;
        Ok(values.slice_rows(rows))
    }

    fn write_column(
        &self,
        rows: Range<usize>,
        column: Column,
        values: ColumnValues,
    ) -> Result<(), SourceError> {
        SourceError::check_range(&rows, self.num_rows)?;
        let mut columns = self.columns.write().unwrap_or_else(PoisonError::into_inner);
        let target = columns
            .get_mut(&column)
            .ok_or(SourceError::MissingColumn(column))?;
        target.assign_rows(column, rows, &values)
    }

    fn data_description(&self, ddid: i32) -> Result<DataDescription, SourceError> {
        usize::try_from(ddid)
            .ok()
            .and_then(|idx| self.data_descriptions.get(idx))
            .cloned()
            .ok_or(SourceError::UnknownDataDescription(ddid))
    }

    fn field(&self, field_id: i32) -> Result<FieldInfo, SourceError> {
        usize::try_from(field_id)
            .ok()
            .and_then(|idx| self.fields.get(idx))
            .cloned()
            .ok_or(SourceError::UnknownField(field_id))
    }

    fn observatory(&self) -> LatLngHeight {
        self.observatory
    }

    fn receptor_angle(&self, antenna: i32) -> f32 {
        usize::try_from(antenna)
            .ok()
            .and_then(|idx| self.receptor_angles.get(idx))
            .copied()
            .unwrap_or(0.0)
    }
}

/// The shape of a synthetic observation generated by [`MemoryTable::synthesize`].
#[derive(Builder, Debug, Clone)]
pub struct SyntheticLayout {
    /// Number of antennas, every pair of them forms a baseline
    #[builder(default = "3")]
    pub n_antennas: usize,
    /// Whether to include autocorrelation baselines
    #[builder(default = "false")]
    pub autocorrelations: bool,
    /// Timesteps per field
    #[builder(default = "3")]
    pub n_timesteps: usize,
    /// Channels per spectral window
    #[builder(default = "4")]
    pub n_chans: usize,
    /// Correlations (polarisation products), at most 4
    #[builder(default = "2")]
    pub n_corrs: usize,
    /// Fields, observed one after the other
    #[builder(default = "1")]
    pub n_fields: usize,
    /// Spectral windows, one data description each
    #[builder(default = "1")]
    pub n_spws: usize,
    /// GPS time of the first timestep
    #[builder(default = "1_254_670_392.0")]
    pub start_gps_seconds: f64,
    /// Seconds between timesteps
    #[builder(default = "2.0")]
    pub integration_time: f64,
    /// Whether to generate `CORRECTED_DATA` and `MODEL_DATA` columns
    #[builder(default = "false")]
    pub model_and_corrected: bool,
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use marlu::ndarray::array;

    use super::*;

    fn small_layout() -> SyntheticLayout {
        SyntheticLayoutBuilder::default()
            .n_antennas(3)
            .n_timesteps(2)
            .n_chans(3)
            .n_corrs(2)
            .build()
            .unwrap()
    }

    #[test]
    fn test_synthesize_shapes() {
        let table = MemoryTable::synthesize(&small_layout()).unwrap();
        // 3 baselines * 2 timesteps
        assert_eq!(table.num_rows(), 6);
        let data = table
            .read_column(0..6, Column::Data)
            .unwrap()
            .into_complex_cube(Column::Data)
            .unwrap();
        assert_eq!(data.dim(), (2, 3, 6));
        assert_eq!(data[[1, 2, 4]], Complex::new(4.0, 5.0));
        assert!(!table.has_column(Column::CorrectedData));
        assert!(table.has_column(Column::Flag));
    }

    #[test]
    fn test_synthesize_row_order() {
        let table = MemoryTable::synthesize(&small_layout()).unwrap();
        let ant1 = table.read_int(0..6, Column::Antenna1).unwrap();
        let ant2 = table.read_int(0..6, Column::Antenna2).unwrap();
        let time = table.read_double(0..6, Column::Time).unwrap();
        assert_eq!(ant1, array![0, 0, 1, 0, 0, 1]);
        assert_eq!(ant2, array![1, 2, 2, 1, 2, 2]);
        assert_abs_diff_eq!(time[0], 1_254_670_392.0);
        assert_abs_diff_eq!(time[3], 1_254_670_394.0);
    }

    #[test]
    fn test_read_rejects_bad_range() {
        let table = MemoryTable::synthesize(&small_layout()).unwrap();
        assert!(matches!(
            table.read_column(4..7, Column::Time),
            Err(SourceError::BadRowRange {
                start: 4,
                end: 7,
                num_rows: 6
            })
        ));
        #[allow(clippy::reversed_empty_ranges)]
        let reversed = 3..2;
        assert!(matches!(
            table.read_column(reversed, Column::Time),
            Err(SourceError::BadRowRange { .. })
        ));
        assert!(matches!(
            table.read_column(0..1, Column::ModelData),
            Err(SourceError::MissingColumn(Column::ModelData))
        ));
    }

    #[test]
    fn test_write_then_read() {
        let table = MemoryTable::synthesize(&small_layout()).unwrap();
        table
            .write_column(
                1..3,
                Column::Weight,
                ColumnValues::FloatMatrix(array![[5.0, 6.0], [7.0, 8.0]]),
            )
            .unwrap();
        let weight = table
            .read_column(0..3, Column::Weight)
            .unwrap()
            .into_float_matrix(Column::Weight)
            .unwrap();
        assert_eq!(weight, array![[1.0, 5.0, 6.0], [1.5, 7.0, 8.0]]);

        assert!(matches!(
            table.write_column(0..2, Column::Weight, ColumnValues::Int(array![1, 2])),
            Err(SourceError::ColumnType { .. })
        ));
    }

    #[test]
    fn test_push_row_rejects_time_going_backwards() {
        let mut builder = MemoryTable::builder(LatLngHeight {
            longitude_rad: 0.0,
            latitude_rad: 0.0,
            height_metres: 0.0,
        });
        let row = |time: f64, field_id: i32| TableRow {
            antenna1: 0,
            antenna2: 1,
            array_id: 0,
            data_desc_id: 0,
            field_id,
            feed1: 0,
            feed2: 0,
            observation_id: 0,
            processor_id: 0,
            scan: 0,
            state_id: 0,
            time,
            time_centroid: time,
            interval: 1.0,
            exposure: 1.0,
            uvw: UVW {
                u: 0.0,
                v: 0.0,
                w: 0.0,
            },
            flag_row: false,
            data: Array2::zeros((1, 1)),
            corrected_data: None,
            model_data: None,
            flag: Array2::from_elem((1, 1), false),
            weight: array![1.0],
            sigma: array![1.0],
            weight_spectrum: None,
        };
        builder.push_row(row(10.0, 0)).unwrap();
        builder.push_row(row(10.0, 0)).unwrap();
        assert!(matches!(
            builder.push_row(row(9.0, 0)),
            Err(SourceError::OutOfOrderRow { row: 2, .. })
        ));
        // a new field may start at an earlier time
        builder.push_row(row(9.0, 1)).unwrap();

        let mut bad = row(11.0, 1);
        bad.data = Array2::zeros((2, 1));
        assert!(matches!(
            builder.push_row(bad),
            Err(SourceError::BadShape {
                column: Column::Data,
                ..
            })
        ));
    }
}
