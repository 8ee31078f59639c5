//! Fortran unformatted sequential files
//!
//! Every record is framed by its byte length, written before and after the
//! payload as a little-endian u32 (the gfortran default). Records decode to
//! a single binary column named `record`, one row per record; interpreting
//! the payload is left to the caller.

use std::io::{BufWriter, Read, Write};

use crate::chunk::{ChunkIterator, ChunkSource};
use crate::codec::wire::WireReader;
use crate::codec::{drain, Encoding, SniffMatch};
use crate::column::{Column, ColumnData};
use crate::error::{FioError, Result};
use crate::options::DecodeOptions;
use crate::source::ByteSource;
use crate::table::Table;

pub const EXTENSIONS: &[&str] = &["unf"];
pub const COLUMN: &str = "record";

const FORMAT: &str = "fortran-unformatted";
const MARKER: usize = 4;
/// Upper bound on records preallocated per fragment
const PREALLOC_RECORDS: usize = 1 << 12;

/// Matches when the first record's leading and trailing markers agree
/// inside the prefix
pub(crate) fn sniff(prefix: &[u8], extension: Option<&str>) -> Option<SniffMatch> {
    let found = SniffMatch {
        version: None,
        encoding: Encoding::Binary {
            little_endian: true,
        },
    };
    if extension.is_some_and(|ext| EXTENSIONS.contains(&ext)) {
        return Some(found);
    }
    let lead = marker_at(prefix, 0)?;
    if lead == 0 {
        return None;
    }
    let tail = marker_at(prefix, MARKER.checked_add(lead as usize)?)?;
    (tail == lead).then_some(found)
}

fn marker_at(bytes: &[u8], at: usize) -> Option<u32> {
    let raw = bytes.get(at..at.checked_add(MARKER)?)?;
    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

/// Streaming decoder yielding `chunk_rows` records per fragment
pub(crate) struct RecordFile<R> {
    wire: WireReader<R>,
    chunk_rows: usize,
    records: usize,
    emitted: bool,
    finished: bool,
}

impl<R: Read> RecordFile<R> {
    pub fn new(inner: R, offset: u64, chunk_rows: usize) -> Self {
        Self {
            wire: WireReader::new(inner, offset),
            chunk_rows: chunk_rows.max(1),
            records: 0,
            emitted: false,
            finished: false,
        }
    }

    fn read_record(&mut self) -> Result<Vec<u8>> {
        let len = self.wire.read_u32("leading record marker")?;
        let payload = self.wire.read_vec(len as usize, "record payload")?;
        let tail_at = self.wire.offset();
        let tail = self.wire.read_u32("trailing record marker")?;
        if tail != len {
            return Err(self.wire.corrupt(
                tail_at,
                format!("record marker mismatch: {} before, {} after", len, tail),
            ));
        }
        self.records += 1;
        self.wire.set_rows_decoded(self.records);
        Ok(payload)
    }

    fn read_fragment(&mut self) -> Result<Vec<Vec<u8>>> {
        let mut records = Vec::with_capacity(self.chunk_rows.min(PREALLOC_RECORDS));
        while records.len() < self.chunk_rows {
            if self.wire.at_end()? {
                self.finished = true;
                break;
            }
            records.push(self.read_record()?);
        }
        Ok(records)
    }
}

impl<R: Read + Send> ChunkSource for RecordFile<R> {
    fn next_chunk(&mut self) -> Result<Option<Table>> {
        if self.finished && self.emitted {
            return Ok(None);
        }
        let records = match self.read_fragment() {
            Ok(records) => records,
            Err(e) => {
                self.finished = true;
                self.emitted = true;
                return Err(e);
            }
        };
        if records.is_empty() && self.emitted {
            return Ok(None);
        }
        self.emitted = true;
        tracing::trace!("Read {} fortran records", records.len());
        Table::new(vec![Column::new(COLUMN, ColumnData::Binary(records))]).map(Some)
    }
}

pub(crate) fn decode(source: &mut ByteSource, _options: &DecodeOptions) -> Result<Table> {
    let offset = source.position();
    drain(RecordFile::new(&mut *source, offset, usize::MAX))
}

pub(crate) fn decode_chunks(source: ByteSource, options: &DecodeOptions) -> Result<ChunkIterator> {
    let offset = source.position();
    Ok(ChunkIterator::new(RecordFile::new(
        source,
        offset,
        options.chunk_rows,
    )))
}

pub(crate) fn encode(table: &Table, sink: &mut ByteSource) -> Result<()> {
    if table.is_array() {
        return Err(FioError::unsupported(FORMAT, "array tables"));
    }
    if table.num_columns() != 1 {
        return Err(FioError::SchemaMismatch(format!(
            "{} writes a single '{}' column, table has {}",
            FORMAT,
            COLUMN,
            table.num_columns()
        )));
    }
    let column = table.try_column(COLUMN)?;
    let records = column.data().as_binary().ok_or_else(|| {
        FioError::unsupported(FORMAT, format!("record column of type {}", column.data_type()))
    })?;

    let mut out = BufWriter::new(&mut *sink);
    for record in records {
        let len = u32::try_from(record.len()).map_err(|_| {
            FioError::unsupported(FORMAT, format!("record of {} bytes", record.len()))
        })?;
        out.write_all(&len.to_le_bytes())?;
        out.write_all(record)?;
        out.write_all(&len.to_le_bytes())?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framed(records: &[&[u8]]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for record in records {
            bytes.extend((record.len() as u32).to_le_bytes());
            bytes.extend_from_slice(record);
            bytes.extend((record.len() as u32).to_le_bytes());
        }
        bytes
    }

    fn decode_vec(bytes: Vec<u8>) -> Result<Table> {
        let mut source = ByteSource::from_bytes(bytes)?;
        decode(&mut source, &DecodeOptions::default())
    }

    #[test]
    fn test_decode_records() {
        let header = 3i32.to_le_bytes();
        let positions: Vec<u8> = [1.0f64, 2.0, 3.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        let table = decode_vec(framed(&[&header, &positions, &[]])).unwrap();
        assert_eq!(table.column_names(), vec![COLUMN]);
        let records = table.column(COLUMN).unwrap().data().as_binary().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0], header.to_vec());
        assert_eq!(records[1], positions);
        assert!(records[2].is_empty());
    }

    #[test]
    fn test_empty_file_keeps_schema() {
        let table = decode_vec(Vec::new()).unwrap();
        assert_eq!(table.num_rows(), 0);
        assert_eq!(table.column_names(), vec![COLUMN]);
    }

    #[test]
    fn test_marker_mismatch_reports_trailing_marker() {
        let mut bytes = framed(&[b"abcd", b"efgh"]);
        let tail_at = bytes.len() - MARKER;
        bytes[tail_at] = 5;
        let err = decode_vec(bytes).unwrap_err();
        assert!(matches!(err, FioError::CorruptData { .. }));
        assert_eq!(err.offset(), Some(tail_at as u64));
        assert_eq!(err.rows_decoded(), Some(1));
    }

    #[test]
    fn test_truncated_payload() {
        let mut bytes = framed(&[b"abcd", b"efgh"]);
        bytes.truncate(bytes.len() - 6);
        let err = decode_vec(bytes).unwrap_err();
        // the second payload starts after one full record and a marker
        assert_eq!(err.offset(), Some(16));
        assert_eq!(err.rows_decoded(), Some(1));
    }

    #[test]
    fn test_chunks_split_records() {
        let bytes = framed(&[b"a", b"bb", b"ccc", b"dddd", b"eeeee"]);
        let source = ByteSource::from_bytes(bytes.clone()).unwrap();
        let chunks: Vec<Table> = decode_chunks(source, &DecodeOptions::new().with_chunk_rows(2))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        let sizes: Vec<usize> = chunks.iter().map(Table::num_rows).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(Table::concat_all(chunks).unwrap(), decode_vec(bytes).unwrap());
    }

    #[test]
    fn test_encode_is_byte_exact() {
        let bytes = framed(&[b"first", &[0u8; 40], b""]);
        let table = decode_vec(bytes.clone()).unwrap();
        let mut sink = ByteSource::memory();
        encode(&table, &mut sink).unwrap();
        assert_eq!(sink.into_bytes().unwrap(), bytes);
    }

    #[test]
    fn test_encode_requires_binary_record_column() {
        let text = Table::new(vec![Column::new(COLUMN, ColumnData::Utf8(vec!["x".into()]))]).unwrap();
        let err = encode(&text, &mut ByteSource::memory()).unwrap_err();
        assert!(matches!(err, FioError::UnsupportedType { .. }));

        let wide = Table::new(vec![
            Column::new(COLUMN, ColumnData::Binary(vec![vec![1]])),
            Column::new("extra", ColumnData::Int64(vec![1])),
        ])
        .unwrap();
        let err = encode(&wide, &mut ByteSource::memory()).unwrap_err();
        assert!(matches!(err, FioError::SchemaMismatch(_)));
    }

    #[test]
    fn test_sniff() {
        let bytes = framed(&[b"abcdef"]);
        assert!(sniff(&bytes, None).is_some());
        assert!(sniff(&bytes[..8], None).is_none());
        assert!(sniff(b"a,b\n1,2\n", None).is_none());
        assert!(sniff(&[0u8; 16], None).is_none());
        assert!(sniff(b"", Some("unf")).is_some());
    }
}
