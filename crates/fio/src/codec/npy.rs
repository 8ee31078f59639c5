//! NumPy `.npy` arrays
//!
//! Headers are read and written through `npyz`; this module maps dtypes onto
//! columns and cuts the data along the slowest axis. Output is little-endian.

use std::io::{self, BufWriter, Read, Write};

use npyz::{DType, Endianness, NpyHeader, TypeChar, TypeStr, WriteOptions, WriterBuilder};

use crate::chunk::{plan_chunk, ChunkIterator, ChunkSource};
use crate::codec::wire::{decode_fixed, WireReader};
use crate::codec::{drain, Encoding, SniffMatch};
use crate::column::{ColumnData, TimeUnit};
use crate::error::{FioError, Result};
use crate::options::DecodeOptions;
use crate::source::ByteSource;
use crate::table::{ArrayLayout, Order, Table};

pub const MAGIC: &[u8; 6] = b"\x93NUMPY";
pub const EXTENSIONS: &[&str] = &["npy"];
/// Name of the single column of a decoded array
pub const COLUMN_NAME: &str = "array";

const FORMAT: &str = "npy";

pub(crate) fn sniff(prefix: &[u8]) -> Option<SniffMatch> {
    if !prefix.starts_with(MAGIC) || prefix.len() < 8 {
        return None;
    }
    // the descr usually falls inside the prefix; assume little-endian if not
    let text = String::from_utf8_lossy(prefix);
    let big_endian = text.contains("'descr': '>");
    Some(SniffMatch {
        version: Some(format!("{}.{}", prefix[6], prefix[7])),
        encoding: Encoding::Binary {
            little_endian: !big_endian,
        },
    })
}

/// Element kinds with a table counterpart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Bool,
    Int(usize),
    UInt(usize),
    Float(usize),
    /// Fixed-width byte string of `n` bytes
    Bytes(usize),
    /// Fixed-width UCS4 string of `n` code points
    Unicode(usize),
    Datetime(TimeUnit),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Dtype {
    kind: Kind,
    big_endian: bool,
}

impl Dtype {
    fn from_npy(dtype: &DType) -> Result<Self> {
        let unsupported = || FioError::unsupported(FORMAT, format!("dtype {}", dtype.descr()));
        let type_str = match dtype {
            DType::Plain(type_str) => type_str,
            DType::Array(..) | DType::Record(_) => return Err(unsupported()),
        };
        let size = usize::try_from(type_str.size_field()).map_err(|_| unsupported())?;
        let kind = match (type_str.type_char(), size) {
            (TypeChar::Bool, 1) => Kind::Bool,
            (TypeChar::Int, 1 | 2 | 4 | 8) => Kind::Int(size),
            (TypeChar::Uint, 1 | 2 | 4 | 8) => Kind::UInt(size),
            (TypeChar::Float, 4 | 8) => Kind::Float(size),
            (TypeChar::ByteStr, n) if n > 0 => Kind::Bytes(n),
            (TypeChar::UnicodeStr, n) if n > 0 => Kind::Unicode(n),
            (TypeChar::DateTime, 8) => type_str
                .time_units()
                .and_then(|units| TimeUnit::from_suffix(&units.to_string()))
                .map(Kind::Datetime)
                .ok_or_else(unsupported)?,
            _ => return Err(unsupported()),
        };
        Ok(Self {
            kind,
            big_endian: type_str.endianness() == Endianness::Big,
        })
    }

    fn item_size(&self) -> usize {
        match self.kind {
            Kind::Bool => 1,
            Kind::Int(n) | Kind::UInt(n) | Kind::Float(n) | Kind::Bytes(n) => n,
            Kind::Unicode(n) => 4 * n,
            Kind::Datetime(_) => 8,
        }
    }
}

struct Header {
    dtype: Dtype,
    layout: ArrayLayout,
    num_elements: usize,
}

fn read_header<R: Read>(wire: &mut WireReader<R>) -> Result<Header> {
    let start = wire.offset();
    let header = NpyHeader::from_reader(&mut *wire).map_err(|e| match e.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
            wire.corrupt(start, format!("invalid npy header: {}", e))
        }
        _ => FioError::Io(e),
    })?;
    let dtype = Dtype::from_npy(&header.dtype())?;

    let too_large = || wire.corrupt(start, format!("shape {:?} is too large", header.shape()));
    let shape = header
        .shape()
        .iter()
        .map(|&extent| usize::try_from(extent).map_err(|_| too_large()))
        .collect::<Result<Vec<usize>>>()?;
    let num_elements = shape
        .iter()
        .try_fold(1usize, |acc, &extent| acc.checked_mul(extent))
        .filter(|n| n.checked_mul(dtype.item_size()).is_some())
        .ok_or_else(too_large)?;
    let order = match header.order() {
        npyz::Order::C => Order::C,
        npyz::Order::Fortran => Order::Fortran,
    };

    Ok(Header {
        dtype,
        layout: ArrayLayout::new(shape, order),
        num_elements,
    })
}

fn decode_strings(bytes: &[u8], width: usize) -> Vec<Vec<u8>> {
    bytes
        .chunks_exact(width)
        .map(|item| {
            let end = item.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
            item[..end].to_vec()
        })
        .collect()
}

/// Convert raw element bytes; `start` is the absolute offset of `bytes` and
/// `first` the index of its first element
fn convert(dtype: Dtype, bytes: &[u8], start: u64, first: usize) -> Result<ColumnData> {
    let be = dtype.big_endian;
    let data = match dtype.kind {
        Kind::Bool => {
            let mut values = Vec::with_capacity(bytes.len());
            for (i, &b) in bytes.iter().enumerate() {
                match b {
                    0 => values.push(false),
                    1 => values.push(true),
                    other => {
                        return Err(FioError::corrupt(
                            start + i as u64,
                            format!("invalid bool byte {:#04x}", other),
                        )
                        .with_rows_decoded(first + i))
                    }
                }
            }
            ColumnData::Bool(values)
        }
        Kind::Int(1) => ColumnData::Int8(bytes.iter().map(|&b| b as i8).collect()),
        Kind::Int(2) => ColumnData::Int16(decode_fixed(bytes, be, i16::from_le_bytes, i16::from_be_bytes)),
        Kind::Int(4) => ColumnData::Int32(decode_fixed(bytes, be, i32::from_le_bytes, i32::from_be_bytes)),
        Kind::Int(_) => ColumnData::Int64(decode_fixed(bytes, be, i64::from_le_bytes, i64::from_be_bytes)),
        Kind::UInt(1) => ColumnData::UInt8(bytes.to_vec()),
        Kind::UInt(2) => ColumnData::UInt16(decode_fixed(bytes, be, u16::from_le_bytes, u16::from_be_bytes)),
        Kind::UInt(4) => ColumnData::UInt32(decode_fixed(bytes, be, u32::from_le_bytes, u32::from_be_bytes)),
        Kind::UInt(_) => ColumnData::UInt64(decode_fixed(bytes, be, u64::from_le_bytes, u64::from_be_bytes)),
        Kind::Float(4) => ColumnData::Float32(decode_fixed(bytes, be, f32::from_le_bytes, f32::from_be_bytes)),
        Kind::Float(_) => ColumnData::Float64(decode_fixed(bytes, be, f64::from_le_bytes, f64::from_be_bytes)),
        Kind::Bytes(n) => ColumnData::Binary(decode_strings(bytes, n)),
        Kind::Unicode(n) => {
            let width = 4 * n;
            let mut values = Vec::with_capacity(bytes.len() / width);
            for (i, item) in bytes.chunks_exact(width).enumerate() {
                let points = decode_fixed(item, be, u32::from_le_bytes, u32::from_be_bytes);
                let end = points.iter().rposition(|&p| p != 0).map_or(0, |i| i + 1);
                let text: Option<String> = points[..end].iter().map(|&p| char::from_u32(p)).collect();
                match text {
                    Some(text) => values.push(text),
                    None => {
                        return Err(FioError::corrupt(
                            start + (i * width) as u64,
                            "invalid code point in unicode element",
                        )
                        .with_rows_decoded(first + i))
                    }
                }
            }
            ColumnData::Utf8(values)
        }
        Kind::Datetime(unit) => {
            ColumnData::Timestamp(unit, decode_fixed(bytes, be, i64::from_le_bytes, i64::from_be_bytes))
        }
    };
    Ok(data)
}

/// Streaming decoder cutting the array along its slowest axis
pub(crate) struct NpyReader<R> {
    wire: WireReader<R>,
    header: Header,
    chunk_rows: usize,
    elements_read: usize,
    emitted: bool,
    finished: bool,
}

impl<R: Read> NpyReader<R> {
    pub fn new(inner: R, offset: u64, chunk_rows: usize) -> Result<Self> {
        let mut wire = WireReader::new(inner, offset);
        let header = read_header(&mut wire)?;
        tracing::debug!(
            "npy array of shape {:?} ({:?})",
            header.layout.shape,
            header.dtype.kind
        );
        Ok(Self {
            wire,
            header,
            chunk_rows,
            elements_read: 0,
            emitted: false,
            finished: false,
        })
    }

    fn read_elements(&mut self, count: usize) -> Result<ColumnData> {
        let size = self.header.dtype.item_size();
        let start = self.wire.offset();
        let needed = count * size;
        let bytes = self.wire.read_up_to(needed)?;
        if bytes.len() < needed {
            let whole = bytes.len() / size;
            return Err(FioError::corrupt(
                start + (whole * size) as u64,
                format!(
                    "unexpected end of data in element {} of {}",
                    self.elements_read + whole,
                    self.header.num_elements
                ),
            )
            .with_rows_decoded(self.elements_read + whole));
        }
        convert(self.header.dtype, &bytes, start, self.elements_read)
    }
}

impl<R: Read + Send> ChunkSource for NpyReader<R> {
    fn next_chunk(&mut self) -> Result<Option<Table>> {
        if self.finished {
            return Ok(None);
        }
        let remaining = self.header.num_elements - self.elements_read;
        if remaining == 0 && self.emitted {
            self.finished = true;
            self.wire.set_rows_decoded(self.elements_read);
            let at = self.wire.offset();
            if !self.wire.at_end()? {
                return Err(self.wire.corrupt(at, "trailing bytes after the array data"));
            }
            return Ok(None);
        }

        let (count, layout) = plan_chunk(Some(&self.header.layout), self.chunk_rows, remaining);
        self.emitted = true;
        let data = match self.read_elements(count) {
            Ok(data) => data,
            Err(e) => {
                self.finished = true;
                return Err(e);
            }
        };
        self.elements_read += count;
        let layout = layout.unwrap_or_else(|| self.header.layout.clone());
        Table::array(COLUMN_NAME, data, layout).map(Some)
    }
}

pub(crate) fn decode(source: &mut ByteSource, _options: &DecodeOptions) -> Result<Table> {
    let offset = source.position();
    drain(NpyReader::new(&mut *source, offset, usize::MAX)?)
}

pub(crate) fn decode_chunks(source: ByteSource, options: &DecodeOptions) -> Result<ChunkIterator> {
    let offset = source.position();
    Ok(ChunkIterator::new(NpyReader::new(
        source,
        offset,
        options.chunk_rows,
    )?))
}

fn type_str_for(data: &ColumnData) -> Result<TypeStr> {
    let descr = match data {
        ColumnData::Int8(_) => "|i1".to_string(),
        ColumnData::Int16(_) => "<i2".to_string(),
        ColumnData::Int32(_) => "<i4".to_string(),
        ColumnData::Int64(_) => "<i8".to_string(),
        ColumnData::UInt8(_) => "|u1".to_string(),
        ColumnData::UInt16(_) => "<u2".to_string(),
        ColumnData::UInt32(_) => "<u4".to_string(),
        ColumnData::UInt64(_) => "<u8".to_string(),
        ColumnData::Float32(_) => "<f4".to_string(),
        ColumnData::Float64(_) => "<f8".to_string(),
        ColumnData::Bool(_) => "|b1".to_string(),
        ColumnData::Utf8(v) => {
            let width = v.iter().map(|s| s.chars().count()).max().unwrap_or(0);
            format!("<U{}", width.max(1))
        }
        ColumnData::Binary(v) => {
            let width = v.iter().map(Vec::len).max().unwrap_or(0);
            format!("|S{}", width.max(1))
        }
        ColumnData::Timestamp(unit, _) => format!("<M8[{}]", unit.suffix()),
    };
    descr
        .parse()
        .map_err(|e| FioError::unsupported(FORMAT, format!("dtype '{}': {}", descr, e)))
}

/// Write header and elements; `values` are in storage order already
fn write_values<T, W>(out: W, type_str: TypeStr, layout: &ArrayLayout, values: &[T]) -> io::Result<()>
where
    T: npyz::Serialize,
    W: Write,
{
    let shape: Vec<u64> = layout.shape.iter().map(|&extent| extent as u64).collect();
    let order = match layout.order {
        Order::C => npyz::Order::C,
        Order::Fortran => npyz::Order::Fortran,
    };
    let mut writer = WriteOptions::<T>::new()
        .order(order)
        .dtype(DType::Plain(type_str))
        .shape(&shape)
        .writer(out)
        .begin_nd()?;
    for value in values {
        writer.push(value)?;
    }
    writer.finish()
}

pub(crate) fn encode(table: &Table, sink: &mut ByteSource) -> Result<()> {
    let column = match table.columns() {
        [column] => column,
        columns => {
            return Err(FioError::unsupported(
                FORMAT,
                format!("table with {} columns", columns.len()),
            ))
        }
    };
    let layout = table
        .layout()
        .cloned()
        .unwrap_or_else(|| ArrayLayout::c(vec![table.num_rows()]));
    let ts = type_str_for(column.data())?;

    let mut out = BufWriter::new(&mut *sink);
    match column.data() {
        ColumnData::Int8(v) => write_values(&mut out, ts, &layout, v)?,
        ColumnData::Int16(v) => write_values(&mut out, ts, &layout, v)?,
        ColumnData::Int32(v) => write_values(&mut out, ts, &layout, v)?,
        ColumnData::Int64(v) => write_values(&mut out, ts, &layout, v)?,
        ColumnData::UInt8(v) => write_values(&mut out, ts, &layout, v)?,
        ColumnData::UInt16(v) => write_values(&mut out, ts, &layout, v)?,
        ColumnData::UInt32(v) => write_values(&mut out, ts, &layout, v)?,
        ColumnData::UInt64(v) => write_values(&mut out, ts, &layout, v)?,
        ColumnData::Float32(v) => write_values(&mut out, ts, &layout, v)?,
        ColumnData::Float64(v) => write_values(&mut out, ts, &layout, v)?,
        ColumnData::Bool(v) => write_values(&mut out, ts, &layout, v)?,
        ColumnData::Utf8(v) => write_values(&mut out, ts, &layout, v)?,
        ColumnData::Binary(v) => write_values(&mut out, ts, &layout, v)?,
        ColumnData::Timestamp(_, v) => write_values(&mut out, ts, &layout, v)?,
    }
    out.flush()?;
    Ok(())
}
