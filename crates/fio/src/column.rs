//! Column buffers and the closed element type set

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

use crate::error::{FioError, Result};

/// Resolution of a timestamp column, counted from the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeUnit {
    Second,
    Millisecond,
    Microsecond,
    Nanosecond,
}

impl TimeUnit {
    /// Short unit name as used in datetime64 type strings
    pub fn suffix(&self) -> &'static str {
        match self {
            TimeUnit::Second => "s",
            TimeUnit::Millisecond => "ms",
            TimeUnit::Microsecond => "us",
            TimeUnit::Nanosecond => "ns",
        }
    }

    /// Parse a short unit name
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "s" => Some(TimeUnit::Second),
            "ms" => Some(TimeUnit::Millisecond),
            "us" => Some(TimeUnit::Microsecond),
            "ns" => Some(TimeUnit::Nanosecond),
            _ => None,
        }
    }

    /// Convert a raw tick count into a UTC datetime
    pub fn to_datetime(&self, ticks: i64) -> Option<DateTime<Utc>> {
        match self {
            TimeUnit::Second => DateTime::from_timestamp(ticks, 0),
            TimeUnit::Millisecond => DateTime::from_timestamp_millis(ticks),
            TimeUnit::Microsecond => DateTime::from_timestamp_micros(ticks),
            TimeUnit::Nanosecond => Some(DateTime::from_timestamp_nanos(ticks)),
        }
    }
}

/// Element type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Bool,
    Utf8,
    Binary,
    Timestamp(TimeUnit),
}

impl DataType {
    /// Size in bytes for fixed-width types
    pub fn byte_size(&self) -> Option<usize> {
        match self {
            DataType::Int8 | DataType::UInt8 | DataType::Bool => Some(1),
            DataType::Int16 | DataType::UInt16 => Some(2),
            DataType::Int32 | DataType::UInt32 | DataType::Float32 => Some(4),
            DataType::Int64 | DataType::UInt64 | DataType::Float64 => Some(8),
            DataType::Timestamp(_) => Some(8),
            DataType::Utf8 | DataType::Binary => None,
        }
    }

    /// Check if this is a numeric type
    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_float()
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            DataType::Int8
                | DataType::Int16
                | DataType::Int32
                | DataType::Int64
                | DataType::UInt8
                | DataType::UInt16
                | DataType::UInt32
                | DataType::UInt64
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Int8 => write!(f, "int8"),
            DataType::Int16 => write!(f, "int16"),
            DataType::Int32 => write!(f, "int32"),
            DataType::Int64 => write!(f, "int64"),
            DataType::UInt8 => write!(f, "uint8"),
            DataType::UInt16 => write!(f, "uint16"),
            DataType::UInt32 => write!(f, "uint32"),
            DataType::UInt64 => write!(f, "uint64"),
            DataType::Float32 => write!(f, "float32"),
            DataType::Float64 => write!(f, "float64"),
            DataType::Bool => write!(f, "bool"),
            DataType::Utf8 => write!(f, "utf8"),
            DataType::Binary => write!(f, "binary"),
            DataType::Timestamp(unit) => write!(f, "timestamp[{}]", unit.suffix()),
        }
    }
}

/// A single borrowed element
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value<'a> {
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    Bool(bool),
    Utf8(&'a str),
    Binary(&'a [u8]),
    Timestamp(TimeUnit, i64),
}

impl Value<'_> {
    /// Widen a numeric value to f64
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Int8(v) => Some(v as f64),
            Value::Int16(v) => Some(v as f64),
            Value::Int32(v) => Some(v as f64),
            Value::Int64(v) => Some(v as f64),
            Value::UInt8(v) => Some(v as f64),
            Value::UInt16(v) => Some(v as f64),
            Value::UInt32(v) => Some(v as f64),
            Value::UInt64(v) => Some(v as f64),
            Value::Float32(v) => Some(v as f64),
            Value::Float64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Utf8(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match *self {
            Value::Timestamp(unit, ticks) => unit.to_datetime(ticks),
            _ => None,
        }
    }
}

/// Typed, owned column buffer
#[derive(Debug, Clone)]
pub enum ColumnData {
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    UInt8(Vec<u8>),
    UInt16(Vec<u16>),
    UInt32(Vec<u32>),
    UInt64(Vec<u64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Bool(Vec<bool>),
    Utf8(Vec<String>),
    Binary(Vec<Vec<u8>>),
    Timestamp(TimeUnit, Vec<i64>),
}

/// Apply `$body` to the inner vector of any variant.
macro_rules! with_values {
    ($data:expr, $values:ident => $body:expr) => {
        match $data {
            ColumnData::Int8($values) => $body,
            ColumnData::Int16($values) => $body,
            ColumnData::Int32($values) => $body,
            ColumnData::Int64($values) => $body,
            ColumnData::UInt8($values) => $body,
            ColumnData::UInt16($values) => $body,
            ColumnData::UInt32($values) => $body,
            ColumnData::UInt64($values) => $body,
            ColumnData::Float32($values) => $body,
            ColumnData::Float64($values) => $body,
            ColumnData::Bool($values) => $body,
            ColumnData::Utf8($values) => $body,
            ColumnData::Binary($values) => $body,
            ColumnData::Timestamp(_, $values) => $body,
        }
    };
}

/// Rebuild the same variant around a transformed inner vector.
macro_rules! map_values {
    ($data:expr, $values:ident => $body:expr) => {
        match $data {
            ColumnData::Int8($values) => ColumnData::Int8($body),
            ColumnData::Int16($values) => ColumnData::Int16($body),
            ColumnData::Int32($values) => ColumnData::Int32($body),
            ColumnData::Int64($values) => ColumnData::Int64($body),
            ColumnData::UInt8($values) => ColumnData::UInt8($body),
            ColumnData::UInt16($values) => ColumnData::UInt16($body),
            ColumnData::UInt32($values) => ColumnData::UInt32($body),
            ColumnData::UInt64($values) => ColumnData::UInt64($body),
            ColumnData::Float32($values) => ColumnData::Float32($body),
            ColumnData::Float64($values) => ColumnData::Float64($body),
            ColumnData::Bool($values) => ColumnData::Bool($body),
            ColumnData::Utf8($values) => ColumnData::Utf8($body),
            ColumnData::Binary($values) => ColumnData::Binary($body),
            ColumnData::Timestamp(unit, $values) => ColumnData::Timestamp(*unit, $body),
        }
    };
}

macro_rules! typed_accessors {
    ($($name:ident => $variant:ident : $ty:ty),* $(,)?) => {
        $(
            pub fn $name(&self) -> Option<&[$ty]> {
                match self {
                    ColumnData::$variant(v) => Some(v),
                    _ => None,
                }
            }
        )*
    };
}

impl ColumnData {
    /// An empty buffer of the given type
    pub fn empty(dtype: DataType) -> Self {
        Self::with_capacity(dtype, 0)
    }

    pub fn with_capacity(dtype: DataType, capacity: usize) -> Self {
        match dtype {
            DataType::Int8 => ColumnData::Int8(Vec::with_capacity(capacity)),
            DataType::Int16 => ColumnData::Int16(Vec::with_capacity(capacity)),
            DataType::Int32 => ColumnData::Int32(Vec::with_capacity(capacity)),
            DataType::Int64 => ColumnData::Int64(Vec::with_capacity(capacity)),
            DataType::UInt8 => ColumnData::UInt8(Vec::with_capacity(capacity)),
            DataType::UInt16 => ColumnData::UInt16(Vec::with_capacity(capacity)),
            DataType::UInt32 => ColumnData::UInt32(Vec::with_capacity(capacity)),
            DataType::UInt64 => ColumnData::UInt64(Vec::with_capacity(capacity)),
            DataType::Float32 => ColumnData::Float32(Vec::with_capacity(capacity)),
            DataType::Float64 => ColumnData::Float64(Vec::with_capacity(capacity)),
            DataType::Bool => ColumnData::Bool(Vec::with_capacity(capacity)),
            DataType::Utf8 => ColumnData::Utf8(Vec::with_capacity(capacity)),
            DataType::Binary => ColumnData::Binary(Vec::with_capacity(capacity)),
            DataType::Timestamp(unit) => ColumnData::Timestamp(unit, Vec::with_capacity(capacity)),
        }
    }

    /// Get the column type
    pub fn data_type(&self) -> DataType {
        match self {
            ColumnData::Int8(_) => DataType::Int8,
            ColumnData::Int16(_) => DataType::Int16,
            ColumnData::Int32(_) => DataType::Int32,
            ColumnData::Int64(_) => DataType::Int64,
            ColumnData::UInt8(_) => DataType::UInt8,
            ColumnData::UInt16(_) => DataType::UInt16,
            ColumnData::UInt32(_) => DataType::UInt32,
            ColumnData::UInt64(_) => DataType::UInt64,
            ColumnData::Float32(_) => DataType::Float32,
            ColumnData::Float64(_) => DataType::Float64,
            ColumnData::Bool(_) => DataType::Bool,
            ColumnData::Utf8(_) => DataType::Utf8,
            ColumnData::Binary(_) => DataType::Binary,
            ColumnData::Timestamp(unit, _) => DataType::Timestamp(*unit),
        }
    }

    /// Get the number of elements
    pub fn len(&self) -> usize {
        with_values!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrow a single element
    pub fn value(&self, index: usize) -> Option<Value<'_>> {
        let value = match self {
            ColumnData::Int8(v) => Value::Int8(*v.get(index)?),
            ColumnData::Int16(v) => Value::Int16(*v.get(index)?),
            ColumnData::Int32(v) => Value::Int32(*v.get(index)?),
            ColumnData::Int64(v) => Value::Int64(*v.get(index)?),
            ColumnData::UInt8(v) => Value::UInt8(*v.get(index)?),
            ColumnData::UInt16(v) => Value::UInt16(*v.get(index)?),
            ColumnData::UInt32(v) => Value::UInt32(*v.get(index)?),
            ColumnData::UInt64(v) => Value::UInt64(*v.get(index)?),
            ColumnData::Float32(v) => Value::Float32(*v.get(index)?),
            ColumnData::Float64(v) => Value::Float64(*v.get(index)?),
            ColumnData::Bool(v) => Value::Bool(*v.get(index)?),
            ColumnData::Utf8(v) => Value::Utf8(v.get(index)?.as_str()),
            ColumnData::Binary(v) => Value::Binary(v.get(index)?.as_slice()),
            ColumnData::Timestamp(unit, v) => Value::Timestamp(*unit, *v.get(index)?),
        };
        Some(value)
    }

    /// Copy out a contiguous range of elements
    pub fn slice(&self, range: Range<usize>) -> ColumnData {
        let end = range.end.min(self.len());
        let start = range.start.min(end);
        map_values!(self, v => v[start..end].to_vec())
    }

    /// Append another buffer of the same type
    pub fn extend(&mut self, other: ColumnData) -> Result<()> {
        let (ours, theirs) = (self.data_type(), other.data_type());
        if ours != theirs {
            return Err(FioError::SchemaMismatch(format!(
                "cannot append {} values to a {} column",
                theirs, ours
            )));
        }
        match (self, other) {
            (ColumnData::Int8(a), ColumnData::Int8(b)) => a.extend(b),
            (ColumnData::Int16(a), ColumnData::Int16(b)) => a.extend(b),
            (ColumnData::Int32(a), ColumnData::Int32(b)) => a.extend(b),
            (ColumnData::Int64(a), ColumnData::Int64(b)) => a.extend(b),
            (ColumnData::UInt8(a), ColumnData::UInt8(b)) => a.extend(b),
            (ColumnData::UInt16(a), ColumnData::UInt16(b)) => a.extend(b),
            (ColumnData::UInt32(a), ColumnData::UInt32(b)) => a.extend(b),
            (ColumnData::UInt64(a), ColumnData::UInt64(b)) => a.extend(b),
            (ColumnData::Float32(a), ColumnData::Float32(b)) => a.extend(b),
            (ColumnData::Float64(a), ColumnData::Float64(b)) => a.extend(b),
            (ColumnData::Bool(a), ColumnData::Bool(b)) => a.extend(b),
            (ColumnData::Utf8(a), ColumnData::Utf8(b)) => a.extend(b),
            (ColumnData::Binary(a), ColumnData::Binary(b)) => a.extend(b),
            (ColumnData::Timestamp(_, a), ColumnData::Timestamp(_, b)) => a.extend(b),
            _ => unreachable!("data types compared equal above"),
        }
        Ok(())
    }

    typed_accessors! {
        as_i8 => Int8: i8,
        as_i16 => Int16: i16,
        as_i32 => Int32: i32,
        as_i64 => Int64: i64,
        as_u8 => UInt8: u8,
        as_u16 => UInt16: u16,
        as_u32 => UInt32: u32,
        as_u64 => UInt64: u64,
        as_f32 => Float32: f32,
        as_f64 => Float64: f64,
        as_bool => Bool: bool,
        as_utf8 => Utf8: String,
        as_binary => Binary: Vec<u8>,
    }

    /// Raw ticks of a timestamp column with their unit
    pub fn as_timestamps(&self) -> Option<(TimeUnit, &[i64])> {
        match self {
            ColumnData::Timestamp(unit, v) => Some((*unit, v)),
            _ => None,
        }
    }

    /// Convert to f64 (for numeric types)
    pub fn to_f64(&self) -> Option<Vec<f64>> {
        match self {
            ColumnData::Int8(v) => Some(v.iter().map(|&x| x as f64).collect()),
            ColumnData::Int16(v) => Some(v.iter().map(|&x| x as f64).collect()),
            ColumnData::Int32(v) => Some(v.iter().map(|&x| x as f64).collect()),
            ColumnData::Int64(v) => Some(v.iter().map(|&x| x as f64).collect()),
            ColumnData::UInt8(v) => Some(v.iter().map(|&x| x as f64).collect()),
            ColumnData::UInt16(v) => Some(v.iter().map(|&x| x as f64).collect()),
            ColumnData::UInt32(v) => Some(v.iter().map(|&x| x as f64).collect()),
            ColumnData::UInt64(v) => Some(v.iter().map(|&x| x as f64).collect()),
            ColumnData::Float32(v) => Some(v.iter().map(|&x| x as f64).collect()),
            ColumnData::Float64(v) => Some(v.clone()),
            _ => None,
        }
    }
}

fn floats_identical<T: Copy, B: PartialEq>(a: &[T], b: &[T], bits: impl Fn(T) -> B) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(&x, &y)| bits(x) == bits(y))
}

/// Type- and value-exact equality. Floats compare by bit pattern, so NaN
/// payloads and signed zeros must match too.
impl PartialEq for ColumnData {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ColumnData::Int8(a), ColumnData::Int8(b)) => a == b,
            (ColumnData::Int16(a), ColumnData::Int16(b)) => a == b,
            (ColumnData::Int32(a), ColumnData::Int32(b)) => a == b,
            (ColumnData::Int64(a), ColumnData::Int64(b)) => a == b,
            (ColumnData::UInt8(a), ColumnData::UInt8(b)) => a == b,
            (ColumnData::UInt16(a), ColumnData::UInt16(b)) => a == b,
            (ColumnData::UInt32(a), ColumnData::UInt32(b)) => a == b,
            (ColumnData::UInt64(a), ColumnData::UInt64(b)) => a == b,
            (ColumnData::Float32(a), ColumnData::Float32(b)) => floats_identical(a, b, f32::to_bits),
            (ColumnData::Float64(a), ColumnData::Float64(b)) => floats_identical(a, b, f64::to_bits),
            (ColumnData::Bool(a), ColumnData::Bool(b)) => a == b,
            (ColumnData::Utf8(a), ColumnData::Utf8(b)) => a == b,
            (ColumnData::Binary(a), ColumnData::Binary(b)) => a == b,
            (ColumnData::Timestamp(ua, a), ColumnData::Timestamp(ub, b)) => ua == ub && a == b,
            _ => false,
        }
    }
}

/// A named column
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    data: ColumnData,
}

impl Column {
    pub fn new(name: impl Into<String>, data: ColumnData) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &ColumnData {
        &self.data
    }

    pub fn data_type(&self) -> DataType {
        self.data.data_type()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Element at `index` converted to a UTC datetime, for timestamp columns
    pub fn timestamp_at(&self, index: usize) -> Option<DateTime<Utc>> {
        self.data.value(index)?.as_datetime()
    }

    pub(crate) fn data_mut(&mut self) -> &mut ColumnData {
        &mut self.data
    }

    pub fn into_parts(self) -> (String, ColumnData) {
        (self.name, self.data)
    }
}
