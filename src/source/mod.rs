// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The row source contract: synchronous, blocking reads and writes of column values for a
//! half-open range of rows.
//!
//! Array valued columns keep the row on their last axis, so a `DATA` cube has the shape
//! `(correlation, channel, row)`, like the visibility buffer cubes.

use std::{
    fmt::{self, Display},
    ops::Range,
};

use marlu::{
    ndarray::{Array, Array1, Array2, Array3, Axis, Dimension, Slice},
    Complex, LatLngHeight, RADec,
};

pub mod error;
pub mod memory;

use error::SourceError;
pub use memory::{MemoryTable, MemoryTableBuilder, SyntheticLayout, SyntheticLayoutBuilder, TableRow};

/// Columns of the main table a row source can provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[allow(missing_docs)]
pub enum Column {
    Antenna1,
    Antenna2,
    ArrayId,
    DataDescId,
    Exposure,
    Feed1,
    Feed2,
    FieldId,
    Flag,
    FlagRow,
    Interval,
    ObservationId,
    ProcessorId,
    Scan,
    Sigma,
    StateId,
    Time,
    TimeCentroid,
    Uvw,
    Data,
    CorrectedData,
    ModelData,
    Weight,
    WeightSpectrum,
}

impl Column {
    /// The kind of values stored in the column.
    pub fn kind(self) -> ColumnKind {
        match self {
            Column::Antenna1
            | Column::Antenna2
            | Column::ArrayId
            | Column::DataDescId
            | Column::Feed1
            | Column::Feed2
            | Column::FieldId
            | Column::ObservationId
            | Column::ProcessorId
            | Column::Scan
            | Column::StateId => ColumnKind::Int,
            Column::Exposure | Column::Interval | Column::Time | Column::TimeCentroid => {
                ColumnKind::Double
            }
            Column::FlagRow => ColumnKind::Bool,
            Column::Uvw => ColumnKind::DoubleMatrix,
            Column::Sigma | Column::Weight => ColumnKind::FloatMatrix,
            Column::Data | Column::CorrectedData | Column::ModelData => ColumnKind::ComplexCube,
            Column::Flag => ColumnKind::BoolCube,
            Column::WeightSpectrum => ColumnKind::FloatCube,
        }
    }

    /// The conventional upper case column name.
    pub fn name(self) -> &'static str {
        match self {
            Column::Antenna1 => "ANTENNA1",
            Column::Antenna2 => "ANTENNA2",
            Column::ArrayId => "ARRAY_ID",
            Column::DataDescId => "DATA_DESC_ID",
            Column::Exposure => "EXPOSURE",
            Column::Feed1 => "FEED1",
            Column::Feed2 => "FEED2",
            Column::FieldId => "FIELD_ID",
            Column::Flag => "FLAG",
            Column::FlagRow => "FLAG_ROW",
            Column::Interval => "INTERVAL",
            Column::ObservationId => "OBSERVATION_ID",
            Column::ProcessorId => "PROCESSOR_ID",
            Column::Scan => "SCAN_NUMBER",
            Column::Sigma => "SIGMA",
            Column::StateId => "STATE_ID",
            Column::Time => "TIME",
            Column::TimeCentroid => "TIME_CENTROID",
            Column::Uvw => "UVW",
            Column::Data => "DATA",
            Column::CorrectedData => "CORRECTED_DATA",
            Column::ModelData => "MODEL_DATA",
            Column::Weight => "WEIGHT",
            Column::WeightSpectrum => "WEIGHT_SPECTRUM",
        }
    }
}

impl Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The element type and dimensionality of a column, row axis included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// `i32` per row
    Int,
    /// `f64` per row
    Double,
    /// `bool` per row
    Bool,
    /// `(3, row)` of `f64`
    DoubleMatrix,
    /// `(correlation, row)` of `f32`
    FloatMatrix,
    /// `(correlation, channel, row)` of complex `f32`
    ComplexCube,
    /// `(correlation, channel, row)` of `bool`
    BoolCube,
    /// `(correlation, channel, row)` of `f32`
    FloatCube,
}

impl Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnKind::Int => "int",
            ColumnKind::Double => "double",
            ColumnKind::Bool => "bool",
            ColumnKind::DoubleMatrix => "double matrix",
            ColumnKind::FloatMatrix => "float matrix",
            ColumnKind::ComplexCube => "complex cube",
            ColumnKind::BoolCube => "bool cube",
            ColumnKind::FloatCube => "float cube",
        };
        write!(f, "{}", name)
    }
}

/// Values read from, or to be written to, a column over a range of rows.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum ColumnValues {
    Int(Array1<i32>),
    Double(Array1<f64>),
    Bool(Array1<bool>),
    DoubleMatrix(Array2<f64>),
    FloatMatrix(Array2<f32>),
    ComplexCube(Array3<Complex<f32>>),
    BoolCube(Array3<bool>),
    FloatCube(Array3<f32>),
}

/// Apply the same generic expression to whichever array a [`ColumnValues`] holds.
macro_rules! with_array {
    ($values:expr, $array:ident => $body:expr) => {
        match $values {
            ColumnValues::Int($array) => $body,
            ColumnValues::Double($array) => $body,
            ColumnValues::Bool($array) => $body,
            ColumnValues::DoubleMatrix($array) => $body,
            ColumnValues::FloatMatrix($array) => $body,
            ColumnValues::ComplexCube($array) => $body,
            ColumnValues::BoolCube($array) => $body,
            ColumnValues::FloatCube($array) => $body,
        }
    };
}

/// Same as [`with_array`], rewrapping the result in the same variant.
macro_rules! map_array {
    ($values:expr, $array:ident => $body:expr) => {
        match $values {
            ColumnValues::Int($array) => ColumnValues::Int($body),
            ColumnValues::Double($array) => ColumnValues::Double($body),
            ColumnValues::Bool($array) => ColumnValues::Bool($body),
            ColumnValues::DoubleMatrix($array) => ColumnValues::DoubleMatrix($body),
            ColumnValues::FloatMatrix($array) => ColumnValues::FloatMatrix($body),
            ColumnValues::ComplexCube($array) => ColumnValues::ComplexCube($body),
            ColumnValues::BoolCube($array) => ColumnValues::BoolCube($body),
            ColumnValues::FloatCube($array) => ColumnValues::FloatCube($body),
        }
    };
}

fn row_axis<A, D: Dimension>(array: &Array<A, D>) -> Axis {
    Axis(array.ndim() - 1)
}

fn slice_rows<A: Clone, D: Dimension>(array: &Array<A, D>, rows: Range<usize>) -> Array<A, D> {
    array
        .slice_axis(row_axis(array), Slice::from(rows))
        .to_owned()
}

fn assign_rows<A: Clone, D: Dimension>(
    column: Column,
    target: &mut Array<A, D>,
    rows: Range<usize>,
    values: &Array<A, D>,
) -> Result<(), SourceError> {
    let axis = row_axis(target);
    let mut expected = target.shape().to_vec();
    expected[axis.index()] = rows.len();
    if values.shape() != expected.as_slice() {
        return Err(SourceError::BadShape {
            column,
            expected: format!("{:?}", expected),
            received: format!("{:?}", values.shape()),
        });
    }
    target
        .slice_axis_mut(axis, Slice::from(rows))
        .assign(values);
    Ok(())
}

macro_rules! into_variant {
    ($fn_name:ident, $variant:ident, $ty:ty, $kind:ident) => {
        /// Unwrap the values, failing with [`SourceError::ColumnType`] if they are another kind.
        pub fn $fn_name(self, column: Column) -> Result<$ty, SourceError> {
            match self {
                ColumnValues::$variant(array) => Ok(array),
                other => Err(SourceError::ColumnType {
                    column,
                    expected: stringify!($kind),
                    received: other.kind_name(),
                }),
            }
        }
    };
}

impl ColumnValues {
    /// The kind of these values.
    pub fn kind(&self) -> ColumnKind {
        match self {
            ColumnValues::Int(_) => ColumnKind::Int,
            ColumnValues::Double(_) => ColumnKind::Double,
            ColumnValues::Bool(_) => ColumnKind::Bool,
            ColumnValues::DoubleMatrix(_) => ColumnKind::DoubleMatrix,
            ColumnValues::FloatMatrix(_) => ColumnKind::FloatMatrix,
            ColumnValues::ComplexCube(_) => ColumnKind::ComplexCube,
            ColumnValues::BoolCube(_) => ColumnKind::BoolCube,
            ColumnValues::FloatCube(_) => ColumnKind::FloatCube,
        }
    }

    fn kind_name(&self) -> &'static str {
        match self.kind() {
            ColumnKind::Int => "Int",
            ColumnKind::Double => "Double",
            ColumnKind::Bool => "Bool",
            ColumnKind::DoubleMatrix => "DoubleMatrix",
            ColumnKind::FloatMatrix => "FloatMatrix",
            ColumnKind::ComplexCube => "ComplexCube",
            ColumnKind::BoolCube => "BoolCube",
            ColumnKind::FloatCube => "FloatCube",
        }
    }

    /// The full shape, row axis last.
    pub fn shape(&self) -> Vec<usize> {
        with_array!(self, array => array.shape().to_vec())
    }

    /// Number of rows held.
    pub fn num_rows(&self) -> usize {
        with_array!(self, array => array.len_of(row_axis(array)))
    }

    /// Copy out a range of rows. The range must already have been checked.
    pub(crate) fn slice_rows(&self, rows: Range<usize>) -> ColumnValues {
        map_array!(self, array => slice_rows(array, rows))
    }

    /// Overwrite a range of rows with `values`, which must be the same kind and have the
    /// same shape apart from the row axis.
    pub(crate) fn assign_rows(
        &mut self,
        column: Column,
        rows: Range<usize>,
        values: &ColumnValues,
    ) -> Result<(), SourceError> {
        match (self, values) {
            (ColumnValues::Int(t), ColumnValues::Int(v)) => assign_rows(column, t, rows, v),
            (ColumnValues::Double(t), ColumnValues::Double(v)) => assign_rows(column, t, rows, v),
            (ColumnValues::Bool(t), ColumnValues::Bool(v)) => assign_rows(column, t, rows, v),
            (ColumnValues::DoubleMatrix(t), ColumnValues::DoubleMatrix(v)) => {
                assign_rows(column, t, rows, v)
            }
            (ColumnValues::FloatMatrix(t), ColumnValues::FloatMatrix(v)) => {
                assign_rows(column, t, rows, v)
            }
            (ColumnValues::ComplexCube(t), ColumnValues::ComplexCube(v)) => {
                assign_rows(column, t, rows, v)
            }
            (ColumnValues::BoolCube(t), ColumnValues::BoolCube(v)) => {
                assign_rows(column, t, rows, v)
            }
            (ColumnValues::FloatCube(t), ColumnValues::FloatCube(v)) => {
                assign_rows(column, t, rows, v)
            }
            (target, values) => Err(SourceError::ColumnType {
                column,
                expected: target.kind_name(),
                received: values.kind_name(),
            }),
        }
    }

    into_variant!(into_int, Int, Array1<i32>, Int);
    into_variant!(into_double, Double, Array1<f64>, Double);
    into_variant!(into_bool, Bool, Array1<bool>, Bool);
    into_variant!(into_double_matrix, DoubleMatrix, Array2<f64>, DoubleMatrix);
    into_variant!(into_float_matrix, FloatMatrix, Array2<f32>, FloatMatrix);
    into_variant!(into_complex_cube, ComplexCube, Array3<Complex<f32>>, ComplexCube);
    into_variant!(into_bool_cube, BoolCube, Array3<bool>, BoolCube);
    into_variant!(into_float_cube, FloatCube, Array3<f32>, FloatCube);
}

/// Which visibility column a cube belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataColumn {
    /// `DATA`
    Observed,
    /// `CORRECTED_DATA`
    Corrected,
    /// `MODEL_DATA`
    Model,
}

impl DataColumn {
    /// The main table column holding this cube.
    pub fn column(self) -> Column {
        match self {
            DataColumn::Observed => Column::Data,
            DataColumn::Corrected => Column::CorrectedData,
            DataColumn::Model => Column::ModelData,
        }
    }
}

/// A spectral window together with the correlation setup, as selected by `DATA_DESC_ID`.
#[derive(Debug, Clone, PartialEq)]
pub struct DataDescription {
    /// Spectral window id
    pub spw_id: i32,
    /// Channel centre frequencies in Hz
    pub freqs: Array1<f64>,
    /// Stokes / correlation type code of each correlation
    pub corr_types: Array1<i32>,
}

/// A field, selected by `FIELD_ID`.
#[derive(Debug, Clone)]
pub struct FieldInfo {
    /// Field name
    pub name: String,
    /// Phase centre of the field
    pub phase_centre: RADec,
}

/// Synchronous access to the rows of one table.
///
/// Implementations must reject malformed row ranges with [`SourceError::BadRowRange`] instead
/// of clamping them. Sources are shared with the look-ahead thread, so writes go through `&self`.
pub trait RowSource: Send + Sync {
    /// Total number of rows.
    fn num_rows(&self) -> usize;

    /// Whether the optional column is present.
    fn has_column(&self, column: Column) -> bool;

    /// Read the values of one column for `rows`.
    ///
    /// # Errors
    ///
    /// [`SourceError::BadRowRange`] or [`SourceError::MissingColumn`].
    fn read_column(&self, rows: Range<usize>, column: Column)
        -> Result<ColumnValues, SourceError>;

    /// Overwrite one column for `rows`.
    ///
    /// # Errors
    ///
    /// As for [`RowSource::read_column`], plus [`SourceError::ColumnType`] and
    /// [`SourceError::BadShape`] when `values` do not fit the column.
    fn write_column(
        &self,
        rows: Range<usize>,
        column: Column,
        values: ColumnValues,
    ) -> Result<(), SourceError>;

    /// Look up a data description.
    ///
    /// # Errors
    ///
    /// [`SourceError::UnknownDataDescription`].
    fn data_description(&self, ddid: i32) -> Result<DataDescription, SourceError>;

    /// Look up a field.
    ///
    /// # Errors
    ///
    /// [`SourceError::UnknownField`].
    fn field(&self, field_id: i32) -> Result<FieldInfo, SourceError>;

    /// Position of the array reference.
    fn observatory(&self) -> LatLngHeight;

    /// Receptor angle of the first feed receptor of an antenna, in radians.
    fn receptor_angle(&self, antenna: i32) -> f32;

    /// Read several columns at once.
    fn read_columns(
        &self,
        rows: Range<usize>,
        columns: &[Column],
    ) -> Result<Vec<ColumnValues>, SourceError> {
        columns
            .iter()
            .map(|&column| self.read_column(rows.clone(), column))
            .collect()
    }

    /// Read an `Int` column.
    ///
    /// # Errors
    ///
    /// As for [`RowSource::read_column`], plus [`SourceError::ColumnType`].
    fn read_int(&self, rows: Range<usize>, column: Column) -> Result<Array1<i32>, SourceError> {
        self.read_column(rows, column)?.into_int(column)
    }

    /// Read a `Double` column.
    ///
    /// # Errors
    ///
    /// As for [`RowSource::read_column`], plus [`SourceError::ColumnType`].
    fn read_double(&self, rows: Range<usize>, column: Column) -> Result<Array1<f64>, SourceError> {
        self.read_column(rows, column)?.into_double(column)
    }
}
