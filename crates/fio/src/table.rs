//! The unified in-memory table
//!
//! A [`Table`] is an ordered sequence of named, typed columns sharing one row
//! count. Array data (N-dimensional buffers) is a table with a single column
//! holding the flat buffer in file order plus an [`ArrayLayout`] describing
//! its shape.

use ndarray::{ArrayD, ArrayViewD, IxDyn, ShapeBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::column::{Column, ColumnData, DataType, Value};
use crate::error::{FioError, Result};

/// Memory order of an N-dimensional buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Order {
    /// Row-major, last axis varies fastest
    C,
    /// Column-major, first axis varies fastest
    Fortran,
}

/// Shape and order of an array table
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArrayLayout {
    pub shape: Vec<usize>,
    pub order: Order,
}

impl ArrayLayout {
    pub fn new(shape: Vec<usize>, order: Order) -> Self {
        Self { shape, order }
    }

    /// Row-major layout
    pub fn c(shape: Vec<usize>) -> Self {
        Self::new(shape, Order::C)
    }

    /// Total number of elements
    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Element strides for each axis
    pub fn strides(&self) -> Vec<usize> {
        let mut strides = vec![0; self.shape.len()];
        let mut step = 1;
        match self.order {
            Order::C => {
                for (axis, extent) in self.shape.iter().enumerate().rev() {
                    strides[axis] = step;
                    step *= extent;
                }
            }
            Order::Fortran => {
                for (axis, extent) in self.shape.iter().enumerate() {
                    strides[axis] = step;
                    step *= extent;
                }
            }
        }
        strides
    }

    /// Axis along which contiguous chunks can be cut: the slowest-varying one.
    /// `None` for zero-dimensional arrays.
    pub fn chunk_axis(&self) -> Option<usize> {
        if self.shape.is_empty() {
            return None;
        }
        match self.order {
            Order::C => Some(0),
            Order::Fortran => Some(self.shape.len() - 1),
        }
    }

    /// Extent of the chunk axis (1 for scalars)
    pub fn chunk_extent(&self) -> usize {
        self.chunk_axis().map(|axis| self.shape[axis]).unwrap_or(1)
    }

    /// Number of elements in one step along the chunk axis
    pub fn chunk_unit(&self) -> usize {
        match self.chunk_axis() {
            Some(axis) => self
                .shape
                .iter()
                .enumerate()
                .filter(|&(i, _)| i != axis)
                .map(|(_, &extent)| extent)
                .product(),
            None => 1,
        }
    }

    /// The same layout with a different chunk-axis extent
    pub fn with_chunk_extent(&self, extent: usize) -> Self {
        let mut layout = self.clone();
        if let Some(axis) = self.chunk_axis() {
            layout.shape[axis] = extent;
        }
        layout
    }
}

/// Name and type of a column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Schema describing the columns of a table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Get a field by name
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Get column index by name
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Get column names
    pub fn names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// A table with these columns and no rows
    pub fn empty_table(&self) -> Result<Table> {
        Table::new(
            self.fields
                .iter()
                .map(|f| Column::new(f.name.clone(), ColumnData::empty(f.data_type)))
                .collect(),
        )
    }
}

/// Element types that can be viewed as an ndarray
pub trait ArrayElement: Clone + Sized {
    fn from_column(data: &ColumnData) -> Option<&[Self]>;
    fn into_column(values: Vec<Self>) -> ColumnData;
}

macro_rules! array_element {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl ArrayElement for $ty {
                fn from_column(data: &ColumnData) -> Option<&[Self]> {
                    match data {
                        ColumnData::$variant(v) => Some(v),
                        _ => None,
                    }
                }

                fn into_column(values: Vec<Self>) -> ColumnData {
                    ColumnData::$variant(values)
                }
            }
        )*
    };
}

array_element! {
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
    bool => Bool,
    String => Utf8,
}

/// Ordered named typed columns with a consistent row count
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    columns: Vec<Column>,
    num_rows: usize,
    layout: Option<ArrayLayout>,
    metadata: BTreeMap<String, String>,
}

impl Table {
    /// Build a table, validating row counts and name uniqueness
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.name()) {
                return Err(FioError::SchemaMismatch(format!(
                    "duplicate column name '{}'",
                    column.name()
                )));
            }
        }

        let num_rows = columns.first().map(Column::len).unwrap_or(0);
        if let Some(bad) = columns.iter().find(|c| c.len() != num_rows) {
            return Err(FioError::SchemaMismatch(format!(
                "column '{}' has {} rows, expected {}",
                bad.name(),
                bad.len(),
                num_rows
            )));
        }

        Ok(Self {
            columns,
            num_rows,
            layout: None,
            metadata: BTreeMap::new(),
        })
    }

    /// Build an array table from a flat buffer in `layout` order
    pub fn array(name: impl Into<String>, data: ColumnData, layout: ArrayLayout) -> Result<Self> {
        if data.len() != layout.num_elements() {
            return Err(FioError::SchemaMismatch(format!(
                "array of shape {:?} needs {} elements, buffer has {}",
                layout.shape,
                layout.num_elements(),
                data.len()
            )));
        }
        let mut table = Self::new(vec![Column::new(name, data)])?;
        table.layout = Some(layout);
        Ok(table)
    }

    /// Build an array table from an owned ndarray (stored in C order)
    pub fn from_ndarray<T: ArrayElement>(name: impl Into<String>, array: ArrayD<T>) -> Result<Self> {
        let layout = ArrayLayout::c(array.shape().to_vec());
        let values: Vec<T> = array.iter().cloned().collect();
        Self::array(name, T::into_column(values), layout)
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Get a column by name
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name() == name)
    }

    /// Get a column by name, failing with `ColumnNotFound`
    pub fn try_column(&self, name: &str) -> Result<&Column> {
        self.column(name)
            .ok_or_else(|| FioError::ColumnNotFound(name.to_string()))
    }

    pub fn column_at(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(Column::name).collect()
    }

    pub fn schema(&self) -> Schema {
        Schema::new(
            self.columns
                .iter()
                .map(|c| Field::new(c.name(), c.data_type()))
                .collect(),
        )
    }

    pub fn layout(&self) -> Option<&ArrayLayout> {
        self.layout.as_ref()
    }

    pub fn is_array(&self) -> bool {
        self.layout.is_some()
    }

    /// Shape of an array table
    pub fn shape(&self) -> Option<&[usize]> {
        self.layout.as_ref().map(|l| l.shape.as_slice())
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_metadata(key, value);
        self
    }

    /// Borrow one row
    pub fn row(&self, index: usize) -> Result<Row<'_>> {
        if index >= self.num_rows {
            return Err(FioError::OutOfRange {
                index: index as u64,
                len: self.num_rows as u64,
            });
        }
        Ok(Row { table: self, index })
    }

    /// Iterate rows in order
    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        (0..self.num_rows).map(move |index| Row { table: self, index })
    }

    /// View an array table as an ndarray without copying
    pub fn as_array<T: ArrayElement>(&self) -> Result<ArrayViewD<'_, T>> {
        let layout = self
            .layout
            .as_ref()
            .ok_or_else(|| FioError::SchemaMismatch("table is not an array".to_string()))?;
        let column = &self.columns[0];
        let values = T::from_column(column.data()).ok_or_else(|| {
            FioError::SchemaMismatch(format!(
                "array elements are {}, not the requested type",
                column.data_type()
            ))
        })?;
        let view = match layout.order {
            Order::C => ArrayViewD::from_shape(IxDyn(&layout.shape), values),
            Order::Fortran => ArrayViewD::from_shape(IxDyn(&layout.shape).f(), values),
        };
        view.map_err(|e| FioError::SchemaMismatch(e.to_string()))
    }

    /// Project onto the named columns, in the given order
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Table> {
        let columns = names
            .iter()
            .map(|name| self.try_column(name.as_ref()).cloned())
            .collect::<Result<Vec<_>>>()?;
        let mut table = Table::new(columns)?;
        if table.num_columns() == 1 && self.num_columns() == 1 {
            table.layout = self.layout.clone();
        }
        table.metadata = self.metadata.clone();
        Ok(table)
    }

    /// Copy out `len` rows starting at `start`
    pub fn slice(&self, start: usize, len: usize) -> Result<Table> {
        if start > self.num_rows {
            return Err(FioError::OutOfRange {
                index: start as u64,
                len: self.num_rows as u64,
            });
        }
        if self.layout.is_some() {
            return Err(FioError::SchemaMismatch(
                "array tables are sliced along their chunk axis by the codec".to_string(),
            ));
        }
        let end = start.saturating_add(len).min(self.num_rows);
        let columns = self
            .columns
            .iter()
            .map(|c| Column::new(c.name(), c.data().slice(start..end)))
            .collect();
        let mut table = Table::new(columns)?;
        table.metadata = self.metadata.clone();
        Ok(table)
    }

    /// Append the rows of `other`. Schemas must match; array tables grow
    /// along their chunk axis. A table with no columns adopts `other` whole.
    pub fn concat(&mut self, other: Table) -> Result<()> {
        if self.columns.is_empty() && self.layout.is_none() {
            let mut metadata = std::mem::take(&mut self.metadata);
            *self = other;
            metadata.append(&mut self.metadata);
            self.metadata = metadata;
            return Ok(());
        }

        if self.schema() != other.schema() {
            return Err(FioError::SchemaMismatch(format!(
                "cannot append columns {:?} to {:?}",
                other.column_names(),
                self.column_names()
            )));
        }

        let layout = match (&self.layout, &other.layout) {
            (None, None) => None,
            (Some(ours), Some(theirs)) => {
                let compatible = ours.order == theirs.order
                    && ours.ndim() == theirs.ndim()
                    && ours.ndim() > 0
                    && ours.chunk_unit() == theirs.chunk_unit()
                    && ours.with_chunk_extent(0) == theirs.with_chunk_extent(0);
                if !compatible {
                    return Err(FioError::SchemaMismatch(format!(
                        "cannot append array of shape {:?} to shape {:?}",
                        theirs.shape, ours.shape
                    )));
                }
                Some(ours.with_chunk_extent(ours.chunk_extent() + theirs.chunk_extent()))
            }
            _ => {
                return Err(FioError::SchemaMismatch(
                    "cannot mix array and plain tables".to_string(),
                ))
            }
        };

        let Table {
            columns,
            num_rows,
            mut metadata,
            ..
        } = other;
        for (ours, theirs) in self.columns.iter_mut().zip(columns) {
            let (_, data) = theirs.into_parts();
            ours.data_mut().extend(data)?;
        }
        self.num_rows += num_rows;
        self.layout = layout;
        self.metadata.append(&mut metadata);
        Ok(())
    }

    /// Concatenate fragments in order
    pub fn concat_all(tables: impl IntoIterator<Item = Table>) -> Result<Table> {
        let mut out = Table::default();
        for table in tables {
            out.concat(table)?;
        }
        Ok(out)
    }
}

/// A borrowed row of a table
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    table: &'a Table,
    index: usize,
}

impl<'a> Row<'a> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.table.num_columns()
    }

    pub fn is_empty(&self) -> bool {
        self.table.num_columns() == 0
    }

    /// Value of the named column in this row
    pub fn get(&self, name: &str) -> Option<Value<'a>> {
        self.table.column(name)?.data().value(self.index)
    }

    /// Value of the column at `column` in this row
    pub fn get_at(&self, column: usize) -> Option<Value<'a>> {
        self.table.column_at(column)?.data().value(self.index)
    }

    pub fn values(&self) -> Vec<Value<'a>> {
        self.table
            .columns()
            .iter()
            .filter_map(|c| c.data().value(self.index))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        Table::new(vec![
            Column::new("id", ColumnData::Int64(vec![1, 2, 3])),
            Column::new("x", ColumnData::Float64(vec![0.5, 1.5, 2.5])),
            Column::new(
                "name",
                ColumnData::Utf8(vec!["a".into(), "b".into(), "c".into()]),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_mismatched_lengths_rejected() {
        let result = Table::new(vec![
            Column::new("a", ColumnData::Int32(vec![1, 2])),
            Column::new("b", ColumnData::Int32(vec![1])),
        ]);
        assert!(matches!(result, Err(FioError::SchemaMismatch(_))));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = Table::new(vec![
            Column::new("a", ColumnData::Int32(vec![1])),
            Column::new("a", ColumnData::Float32(vec![1.0])),
        ]);
        assert!(matches!(result, Err(FioError::SchemaMismatch(_))));
    }

    #[test]
    fn test_row_access() {
        let table = sample();
        let row = table.row(1).unwrap();
        assert_eq!(row.get("id"), Some(Value::Int64(2)));
        assert_eq!(row.get("name"), Some(Value::Utf8("b")));
        assert_eq!(row.get_at(1), Some(Value::Float64(1.5)));
        assert_eq!(row.values().len(), 3);
        assert!(matches!(table.row(3), Err(FioError::OutOfRange { index: 3, len: 3 })));
    }

    #[test]
    fn test_select_and_slice() {
        let table = sample();
        let projected = table.select(&["name", "id"]).unwrap();
        assert_eq!(projected.column_names(), vec!["name", "id"]);
        assert!(matches!(
            table.select(&["missing"]),
            Err(FioError::ColumnNotFound(_))
        ));

        let sliced = table.slice(1, 5).unwrap();
        assert_eq!(sliced.num_rows(), 2);
        assert_eq!(
            sliced.column("id").unwrap().data().as_i64(),
            Some(&[2, 3][..])
        );
    }

    #[test]
    fn test_concat_restores_whole() {
        let table = sample();
        let parts = vec![table.slice(0, 2).unwrap(), table.slice(2, 1).unwrap()];
        let joined = Table::concat_all(parts).unwrap();
        assert_eq!(joined, table);
    }

    #[test]
    fn test_concat_rejects_other_schema() {
        let mut table = sample();
        let other = Table::new(vec![Column::new("id", ColumnData::Int64(vec![9]))]).unwrap();
        assert!(matches!(
            table.concat(other),
            Err(FioError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_array_view_c_and_fortran() {
        let data = ColumnData::Int32(vec![1, 2, 3, 4, 5, 6]);
        let c = Table::array("array", data.clone(), ArrayLayout::c(vec![2, 3])).unwrap();
        let view = c.as_array::<i32>().unwrap();
        assert_eq!(view[[0, 2]], 3);
        assert_eq!(view[[1, 0]], 4);

        let f = Table::array(
            "array",
            data,
            ArrayLayout::new(vec![2, 3], Order::Fortran),
        )
        .unwrap();
        let view = f.as_array::<i32>().unwrap();
        assert_eq!(view[[1, 0]], 2);
        assert_eq!(view[[0, 1]], 3);
        assert!(f.as_array::<f64>().is_err());
    }

    #[test]
    fn test_array_shape_checked() {
        let result = Table::array("a", ColumnData::Int8(vec![1, 2, 3]), ArrayLayout::c(vec![2, 2]));
        assert!(matches!(result, Err(FioError::SchemaMismatch(_))));
    }

    #[test]
    fn test_array_concat_along_chunk_axis() {
        let top = Table::array("a", ColumnData::Int8(vec![1, 2]), ArrayLayout::c(vec![1, 2])).unwrap();
        let bottom =
            Table::array("a", ColumnData::Int8(vec![3, 4, 5, 6]), ArrayLayout::c(vec![2, 2])).unwrap();
        let joined = Table::concat_all(vec![top, bottom]).unwrap();
        assert_eq!(joined.shape(), Some(&[3, 2][..]));

        let left = Table::array(
            "a",
            ColumnData::Int8(vec![1, 2]),
            ArrayLayout::new(vec![2, 1], Order::Fortran),
        )
        .unwrap();
        let right = Table::array(
            "a",
            ColumnData::Int8(vec![3, 4]),
            ArrayLayout::new(vec![2, 1], Order::Fortran),
        )
        .unwrap();
        let joined = Table::concat_all(vec![left, right]).unwrap();
        assert_eq!(joined.shape(), Some(&[2, 2][..]));
        assert_eq!(joined.as_array::<i8>().unwrap()[[1, 1]], 4);
    }

    #[test]
    fn test_from_ndarray() {
        let array = ndarray::Array2::from_shape_vec((2, 2), vec![1.0f64, 2.0, 3.0, 4.0])
            .unwrap()
            .into_dyn();
        let table = Table::from_ndarray("grid", array).unwrap();
        assert_eq!(table.shape(), Some(&[2, 2][..]));
        assert_eq!(table.as_array::<f64>().unwrap()[[1, 0]], 3.0);
    }

    #[test]
    fn test_layout_strides() {
        assert_eq!(ArrayLayout::c(vec![2, 3, 4]).strides(), vec![12, 4, 1]);
        assert_eq!(
            ArrayLayout::new(vec![2, 3, 4], Order::Fortran).strides(),
            vec![1, 2, 6]
        );
        assert_eq!(ArrayLayout::c(vec![5, 3]).chunk_unit(), 3);
        assert_eq!(ArrayLayout::c(vec![]).chunk_axis(), None);
    }
}
