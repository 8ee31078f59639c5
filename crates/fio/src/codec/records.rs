//! Native row-oriented binary tables
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! "FIOREC" u16:version
//! u8:layout (0 plain, 1 C array, 2 Fortran array) [u32:ndim u64:dim...]
//! u32:metadata_count (u32:len key u32:len value)...
//! u32:column_count (u16:len name u8:type_tag u8:time_unit)...
//! u64:row_count
//! rows: fields in column order; fixed width values, bool as 0/1,
//!       utf8/binary as u32:len + payload
//! ```
//!
//! Every table in the type set round-trips byte-for-byte.

use std::collections::{BTreeMap, HashSet};
use std::io::{BufWriter, Read, Write};

use crate::chunk::{plan_chunk, ChunkIterator, ChunkSource};
use crate::codec::wire::WireReader;
use crate::codec::{drain, Encoding, SniffMatch};
use crate::column::{Column, ColumnData, DataType, TimeUnit};
use crate::error::{FioError, Result};
use crate::options::DecodeOptions;
use crate::source::ByteSource;
use crate::table::{ArrayLayout, Field, Order, Schema, Table};

pub const MAGIC: &[u8; 6] = b"FIOREC";
pub const VERSION: u16 = 1;
pub const EXTENSIONS: &[&str] = &["fio"];

const FORMAT: &str = "fio-records";
/// Upper bound on rows preallocated from an untrusted row count
const PREALLOC_ROWS: usize = 1 << 16;

pub(crate) fn sniff(prefix: &[u8]) -> Option<SniffMatch> {
    if !prefix.starts_with(MAGIC) {
        return None;
    }
    let version = prefix
        .get(6..8)
        .map(|v| u16::from_le_bytes([v[0], v[1]]).to_string());
    Some(SniffMatch {
        version,
        encoding: Encoding::Binary {
            little_endian: true,
        },
    })
}

fn type_tag(dtype: DataType) -> (u8, u8) {
    match dtype {
        DataType::Int8 => (1, 0),
        DataType::Int16 => (2, 0),
        DataType::Int32 => (3, 0),
        DataType::Int64 => (4, 0),
        DataType::UInt8 => (5, 0),
        DataType::UInt16 => (6, 0),
        DataType::UInt32 => (7, 0),
        DataType::UInt64 => (8, 0),
        DataType::Float32 => (9, 0),
        DataType::Float64 => (10, 0),
        DataType::Bool => (11, 0),
        DataType::Utf8 => (12, 0),
        DataType::Binary => (13, 0),
        DataType::Timestamp(unit) => (14, unit_tag(unit)),
    }
}

fn unit_tag(unit: TimeUnit) -> u8 {
    match unit {
        TimeUnit::Second => 0,
        TimeUnit::Millisecond => 1,
        TimeUnit::Microsecond => 2,
        TimeUnit::Nanosecond => 3,
    }
}

fn data_type(tag: u8, unit: u8) -> Result<DataType> {
    let dtype = match (tag, unit) {
        (1, 0) => DataType::Int8,
        (2, 0) => DataType::Int16,
        (3, 0) => DataType::Int32,
        (4, 0) => DataType::Int64,
        (5, 0) => DataType::UInt8,
        (6, 0) => DataType::UInt16,
        (7, 0) => DataType::UInt32,
        (8, 0) => DataType::UInt64,
        (9, 0) => DataType::Float32,
        (10, 0) => DataType::Float64,
        (11, 0) => DataType::Bool,
        (12, 0) => DataType::Utf8,
        (13, 0) => DataType::Binary,
        (14, 0) => DataType::Timestamp(TimeUnit::Second),
        (14, 1) => DataType::Timestamp(TimeUnit::Millisecond),
        (14, 2) => DataType::Timestamp(TimeUnit::Microsecond),
        (14, 3) => DataType::Timestamp(TimeUnit::Nanosecond),
        _ => {
            return Err(FioError::unsupported(
                FORMAT,
                format!("type tag {} with unit {}", tag, unit),
            ))
        }
    };
    Ok(dtype)
}

struct Header {
    schema: Schema,
    layout: Option<ArrayLayout>,
    metadata: BTreeMap<String, String>,
    num_rows: u64,
}

fn read_string<R: Read>(wire: &mut WireReader<R>, len: usize, what: &str) -> Result<String> {
    let start = wire.offset();
    let bytes = wire.read_vec(len, what)?;
    String::from_utf8(bytes).map_err(|e| {
        wire.corrupt(
            start + e.utf8_error().valid_up_to() as u64,
            format!("invalid UTF-8 in {}", what),
        )
    })
}

fn read_header<R: Read>(wire: &mut WireReader<R>) -> Result<Header> {
    let start = wire.offset();
    let magic: [u8; 6] = wire.read_array("magic")?;
    if &magic != MAGIC {
        return Err(wire.corrupt(start, "missing FIOREC magic"));
    }
    let version = wire.read_u16("version")?;
    if version != VERSION {
        return Err(FioError::unsupported(FORMAT, format!("version {}", version)));
    }

    let layout_at = wire.offset();
    let order = match wire.read_u8("layout kind")? {
        0 => None,
        1 => Some(Order::C),
        2 => Some(Order::Fortran),
        other => return Err(wire.corrupt(layout_at, format!("invalid layout kind {}", other))),
    };
    let layout = match order {
        Some(order) => {
            let ndim = wire.read_u32("array rank")?;
            let mut shape = Vec::new();
            for _ in 0..ndim {
                let at = wire.offset();
                let extent = wire.read_u64("array extent")?;
                let extent = usize::try_from(extent)
                    .map_err(|_| wire.corrupt(at, format!("array extent {} too large", extent)))?;
                shape.push(extent);
            }
            Some(ArrayLayout::new(shape, order))
        }
        None => None,
    };

    let mut metadata = BTreeMap::new();
    let count = wire.read_u32("metadata count")?;
    for _ in 0..count {
        let len = wire.read_u32("metadata key length")? as usize;
        let key = read_string(wire, len, "metadata key")?;
        let len = wire.read_u32("metadata value length")? as usize;
        let value = read_string(wire, len, "metadata value")?;
        metadata.insert(key, value);
    }

    let num_columns = wire.read_u32("column count")?;
    let mut fields = Vec::new();
    let mut names = HashSet::new();
    for _ in 0..num_columns {
        let name_at = wire.offset();
        let len = wire.read_u16("column name length")? as usize;
        let name = read_string(wire, len, "column name")?;
        if !names.insert(name.clone()) {
            return Err(wire.corrupt(name_at, format!("duplicate column name '{}'", name)));
        }
        let tag = wire.read_u8("type tag")?;
        let unit = wire.read_u8("time unit")?;
        fields.push(Field::new(name, data_type(tag, unit)?));
    }

    let rows_at = wire.offset();
    let num_rows = wire.read_u64("row count")?;
    if fields.is_empty() && num_rows > 0 {
        return Err(wire.corrupt(rows_at, format!("{} rows declared without columns", num_rows)));
    }

    if let Some(layout) = &layout {
        let elements = layout
            .shape
            .iter()
            .try_fold(1u64, |acc, &extent| acc.checked_mul(extent as u64));
        if fields.len() != 1 || elements != Some(num_rows) {
            return Err(wire.corrupt(
                rows_at,
                format!(
                    "array of shape {:?} does not match {} column(s) of {} rows",
                    layout.shape,
                    fields.len(),
                    num_rows
                ),
            ));
        }
    }

    Ok(Header {
        schema: Schema::new(fields),
        layout,
        metadata,
        num_rows,
    })
}

fn read_field<R: Read>(wire: &mut WireReader<R>, column: &mut ColumnData) -> Result<()> {
    match column {
        ColumnData::Int8(v) => v.push(i8::from_le_bytes(wire.read_array("int8 field")?)),
        ColumnData::Int16(v) => v.push(i16::from_le_bytes(wire.read_array("int16 field")?)),
        ColumnData::Int32(v) => v.push(i32::from_le_bytes(wire.read_array("int32 field")?)),
        ColumnData::Int64(v) => v.push(i64::from_le_bytes(wire.read_array("int64 field")?)),
        ColumnData::UInt8(v) => v.push(wire.read_u8("uint8 field")?),
        ColumnData::UInt16(v) => v.push(wire.read_u16("uint16 field")?),
        ColumnData::UInt32(v) => v.push(wire.read_u32("uint32 field")?),
        ColumnData::UInt64(v) => v.push(wire.read_u64("uint64 field")?),
        ColumnData::Float32(v) => v.push(f32::from_le_bytes(wire.read_array("float32 field")?)),
        ColumnData::Float64(v) => v.push(f64::from_le_bytes(wire.read_array("float64 field")?)),
        ColumnData::Bool(v) => {
            let at = wire.offset();
            match wire.read_u8("bool field")? {
                0 => v.push(false),
                1 => v.push(true),
                other => return Err(wire.corrupt(at, format!("invalid bool byte {:#04x}", other))),
            }
        }
        ColumnData::Utf8(v) => {
            let len = wire.read_u32("string length")? as usize;
            v.push(read_string(wire, len, "string field")?);
        }
        ColumnData::Binary(v) => {
            let len = wire.read_u32("binary length")? as usize;
            v.push(wire.read_vec(len, "binary field")?);
        }
        ColumnData::Timestamp(_, v) => {
            v.push(i64::from_le_bytes(wire.read_array("timestamp field")?))
        }
    }
    Ok(())
}

/// Streaming decoder: header up front, rows on demand
pub(crate) struct RecordsReader<R> {
    wire: WireReader<R>,
    header: Header,
    chunk_rows: usize,
    rows_read: u64,
    emitted: bool,
    finished: bool,
}

impl<R: Read> RecordsReader<R> {
    pub fn new(inner: R, offset: u64, chunk_rows: usize) -> Result<Self> {
        let mut wire = WireReader::new(inner, offset);
        let header = read_header(&mut wire)?;
        Ok(Self {
            wire,
            header,
            chunk_rows,
            rows_read: 0,
            emitted: false,
            finished: false,
        })
    }

    fn read_rows(&mut self, rows: usize, layout: Option<ArrayLayout>) -> Result<Table> {
        let mut builders: Vec<ColumnData> = self
            .header
            .schema
            .fields
            .iter()
            .map(|f| ColumnData::with_capacity(f.data_type, rows.min(PREALLOC_ROWS)))
            .collect();

        for _ in 0..rows {
            for builder in builders.iter_mut() {
                read_field(&mut self.wire, builder)?;
            }
            self.rows_read += 1;
            self.wire.set_rows_decoded(self.rows_read as usize);
        }

        let mut columns: Vec<Column> = self
            .header
            .schema
            .fields
            .iter()
            .zip(builders)
            .map(|(f, data)| Column::new(f.name.clone(), data))
            .collect();
        let mut table = match (layout, columns.pop()) {
            (Some(layout), Some(column)) if columns.is_empty() => {
                let (name, data) = column.into_parts();
                Table::array(name, data, layout)?
            }
            (Some(_), _) => {
                return Err(FioError::SchemaMismatch(
                    "array tables hold exactly one column".to_string(),
                ))
            }
            (None, last) => {
                columns.extend(last);
                Table::new(columns)?
            }
        };
        for (key, value) in &self.header.metadata {
            table.set_metadata(key.clone(), value.clone());
        }
        Ok(table)
    }
}

impl<R: Read + Send> ChunkSource for RecordsReader<R> {
    fn next_chunk(&mut self) -> Result<Option<Table>> {
        if self.finished {
            return Ok(None);
        }
        let remaining = self.header.num_rows - self.rows_read;
        if remaining == 0 && self.emitted {
            self.finished = true;
            let at = self.wire.offset();
            if !self.wire.at_end()? {
                return Err(self.wire.corrupt(at, "trailing bytes after the last record"));
            }
            return Ok(None);
        }

        let remaining = usize::try_from(remaining).unwrap_or(usize::MAX);
        let (rows, layout) = plan_chunk(self.header.layout.as_ref(), self.chunk_rows, remaining);
        let result = self.read_rows(rows, layout);
        if result.is_err() {
            self.finished = true;
        }
        self.emitted = true;
        result.map(Some)
    }
}

pub(crate) fn decode(source: &mut ByteSource, _options: &DecodeOptions) -> Result<Table> {
    let offset = source.position();
    drain(RecordsReader::new(&mut *source, offset, usize::MAX)?)
}

pub(crate) fn decode_chunks(source: ByteSource, options: &DecodeOptions) -> Result<ChunkIterator> {
    let offset = source.position();
    Ok(ChunkIterator::new(RecordsReader::new(
        source,
        offset,
        options.chunk_rows,
    )?))
}

fn write_blob<W: Write>(out: &mut W, bytes: &[u8], what: &str) -> Result<()> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| FioError::unsupported(FORMAT, format!("{} longer than 4 GiB", what)))?;
    out.write_all(&len.to_le_bytes())?;
    out.write_all(bytes)?;
    Ok(())
}

fn write_field<W: Write>(out: &mut W, data: &ColumnData, row: usize) -> Result<()> {
    match data {
        ColumnData::Int8(v) => out.write_all(&v[row].to_le_bytes())?,
        ColumnData::Int16(v) => out.write_all(&v[row].to_le_bytes())?,
        ColumnData::Int32(v) => out.write_all(&v[row].to_le_bytes())?,
        ColumnData::Int64(v) => out.write_all(&v[row].to_le_bytes())?,
        ColumnData::UInt8(v) => out.write_all(&[v[row]])?,
        ColumnData::UInt16(v) => out.write_all(&v[row].to_le_bytes())?,
        ColumnData::UInt32(v) => out.write_all(&v[row].to_le_bytes())?,
        ColumnData::UInt64(v) => out.write_all(&v[row].to_le_bytes())?,
        ColumnData::Float32(v) => out.write_all(&v[row].to_le_bytes())?,
        ColumnData::Float64(v) => out.write_all(&v[row].to_le_bytes())?,
        ColumnData::Bool(v) => out.write_all(&[u8::from(v[row])])?,
        ColumnData::Utf8(v) => write_blob(out, v[row].as_bytes(), "string")?,
        ColumnData::Binary(v) => write_blob(out, &v[row], "binary value")?,
        ColumnData::Timestamp(_, v) => out.write_all(&v[row].to_le_bytes())?,
    }
    Ok(())
}

pub(crate) fn encode(table: &Table, sink: &mut ByteSource) -> Result<()> {
    let mut out = BufWriter::new(&mut *sink);
    out.write_all(MAGIC)?;
    out.write_all(&VERSION.to_le_bytes())?;

    match table.layout() {
        None => out.write_all(&[0])?,
        Some(layout) => {
            let kind = match layout.order {
                Order::C => 1u8,
                Order::Fortran => 2u8,
            };
            out.write_all(&[kind])?;
            out.write_all(&(layout.ndim() as u32).to_le_bytes())?;
            for &extent in &layout.shape {
                out.write_all(&(extent as u64).to_le_bytes())?;
            }
        }
    }

    out.write_all(&(table.metadata().len() as u32).to_le_bytes())?;
    for (key, value) in table.metadata() {
        write_blob(&mut out, key.as_bytes(), "metadata key")?;
        write_blob(&mut out, value.as_bytes(), "metadata value")?;
    }

    out.write_all(&(table.num_columns() as u32).to_le_bytes())?;
    for column in table.columns() {
        let name = column.name().as_bytes();
        let len = u16::try_from(name.len()).map_err(|_| {
            FioError::unsupported(FORMAT, format!("column name of {} bytes", name.len()))
        })?;
        out.write_all(&len.to_le_bytes())?;
        out.write_all(name)?;
        let (tag, unit) = type_tag(column.data_type());
        out.write_all(&[tag, unit])?;
    }

    out.write_all(&(table.num_rows() as u64).to_le_bytes())?;
    for row in 0..table.num_rows() {
        for column in table.columns() {
            write_field(&mut out, column.data(), row)?;
        }
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn every_type() -> Table {
        Table::new(vec![
            Column::new("i8", ColumnData::Int8(vec![-1, 2])),
            Column::new("i16", ColumnData::Int16(vec![-300, 300])),
            Column::new("i32", ColumnData::Int32(vec![i32::MIN, i32::MAX])),
            Column::new("i64", ColumnData::Int64(vec![i64::MIN, 0])),
            Column::new("u8", ColumnData::UInt8(vec![0, 255])),
            Column::new("u16", ColumnData::UInt16(vec![1, 65535])),
            Column::new("u32", ColumnData::UInt32(vec![7, u32::MAX])),
            Column::new("u64", ColumnData::UInt64(vec![u64::MAX, 1])),
            Column::new("f32", ColumnData::Float32(vec![1.5, f32::NAN])),
            Column::new("f64", ColumnData::Float64(vec![-0.0, f64::INFINITY])),
            Column::new("flag", ColumnData::Bool(vec![true, false])),
            Column::new("label", ColumnData::Utf8(vec!["héllo".into(), String::new()])),
            Column::new("blob", ColumnData::Binary(vec![vec![0, 1, 2], vec![]])),
            Column::new(
                "when",
                ColumnData::Timestamp(TimeUnit::Microsecond, vec![1_700_000_000_000_000, -1]),
            ),
        ])
        .unwrap()
        .with_metadata("origin", "unit test")
    }

    fn encode_to_vec(table: &Table) -> Vec<u8> {
        let mut sink = ByteSource::memory();
        encode(table, &mut sink).unwrap();
        sink.into_bytes().unwrap()
    }

    fn decode_vec(bytes: Vec<u8>) -> Result<Table> {
        let mut source = ByteSource::from_bytes(bytes)?;
        decode(&mut source, &DecodeOptions::default())
    }

    #[test]
    fn test_round_trip_every_type() {
        let table = every_type();
        let bytes = encode_to_vec(&table);
        let decoded = decode_vec(bytes.clone()).unwrap();
        assert_eq!(decoded, table);
        assert_eq!(encode_to_vec(&decoded), bytes);
    }

    #[test]
    fn test_sniff() {
        let bytes = encode_to_vec(&every_type());
        let found = sniff(&bytes[..16]).unwrap();
        assert_eq!(found.version.as_deref(), Some("1"));
        assert!(sniff(b"\x93NUMPY").is_none());
    }

    #[test]
    fn test_truncation_reports_offset_and_progress() {
        let table = every_type();
        let mut bytes = encode_to_vec(&table);
        let full = bytes.len() as u64;
        bytes.truncate(bytes.len() - 3);
        let err = decode_vec(bytes).unwrap_err();
        // the last field is an 8-byte timestamp
        assert_eq!(err.offset(), Some(full - 8));
        assert_eq!(err.rows_decoded(), Some(1));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = encode_to_vec(&every_type());
        let end = bytes.len() as u64;
        bytes.push(0);
        let err = decode_vec(bytes).unwrap_err();
        assert_eq!(err.offset(), Some(end));
        assert_eq!(err.rows_decoded(), Some(2));
    }

    #[test]
    fn test_rows_without_columns_rejected() {
        let mut bytes = encode_to_vec(&Table::default());
        let rows_at = bytes.len() - 8;
        bytes[rows_at..].copy_from_slice(&u64::MAX.to_le_bytes());

        let err = decode_vec(bytes.clone()).unwrap_err();
        assert!(matches!(err, FioError::CorruptData { .. }));
        assert_eq!(err.offset(), Some(rows_at as u64));

        let source = ByteSource::from_bytes(bytes).unwrap();
        assert!(matches!(
            decode_chunks(source, &DecodeOptions::default()),
            Err(FioError::CorruptData { .. })
        ));
    }

    #[test]
    fn test_invalid_bool_rejected() {
        let table = Table::new(vec![Column::new("b", ColumnData::Bool(vec![true]))]).unwrap();
        let mut bytes = encode_to_vec(&table);
        let last = bytes.len() - 1;
        bytes[last] = 7;
        let err = decode_vec(bytes).unwrap_err();
        assert_eq!(err.offset(), Some(last as u64));
    }

    #[test]
    fn test_unknown_type_tag_is_unsupported() {
        let table = Table::new(vec![Column::new("x", ColumnData::Int8(vec![]))]).unwrap();
        let mut bytes = encode_to_vec(&table);
        // tag sits right after the one-byte name
        let tag_at = bytes.len() - 8 - 2;
        bytes[tag_at] = 99;
        assert!(matches!(
            decode_vec(bytes),
            Err(FioError::UnsupportedType { .. })
        ));
    }

    #[test]
    fn test_chunks_reassemble() {
        let values: Vec<i64> = (0..25).collect();
        let table = Table::new(vec![
            Column::new("n", ColumnData::Int64(values.clone())),
            Column::new("s", ColumnData::Utf8(values.iter().map(|v| v.to_string()).collect())),
        ])
        .unwrap();
        let bytes = encode_to_vec(&table);
        let source = ByteSource::from_bytes(bytes).unwrap();
        let chunks: Vec<Table> = decode_chunks(source, &DecodeOptions::new().with_chunk_rows(10))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(
            chunks.iter().map(Table::num_rows).collect::<Vec<_>>(),
            vec![10, 10, 5]
        );
        assert_eq!(Table::concat_all(chunks).unwrap(), table);
    }

    #[test]
    fn test_empty_table_yields_one_fragment() {
        let table = Table::new(vec![Column::new("x", ColumnData::Float64(vec![]))]).unwrap();
        let source = ByteSource::from_bytes(encode_to_vec(&table)).unwrap();
        let chunks: Vec<Table> = decode_chunks(source, &DecodeOptions::default())
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], table);
    }

    #[test]
    fn test_array_layout_round_trip_and_chunks() {
        let table = Table::array(
            "grid",
            ColumnData::Float32((0..12).map(|v| v as f32).collect()),
            ArrayLayout::new(vec![3, 4], Order::Fortran),
        )
        .unwrap();
        let bytes = encode_to_vec(&table);
        assert_eq!(decode_vec(bytes.clone()).unwrap(), table);

        let source = ByteSource::from_bytes(bytes).unwrap();
        let chunks: Vec<Table> = decode_chunks(source, &DecodeOptions::new().with_chunk_rows(3))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(chunks[0].shape(), Some(&[3, 3][..]));
        assert_eq!(chunks[1].shape(), Some(&[3, 1][..]));
        assert_eq!(Table::concat_all(chunks).unwrap(), table);
    }
}
