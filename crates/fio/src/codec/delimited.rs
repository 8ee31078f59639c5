//! Delimited text (CSV/TSV) with type inference
//!
//! Decoding makes two passes: the first infers one type per column over all
//! records (int64, uint64, float64, then bool, falling back to utf8) and
//! checks that every record has the same number of fields; the second streams
//! the typed values. A column only takes a typed form when each field is
//! already in the encoder's canonical spelling, so `1.50`, `+1` or `TRUE`
//! stay text and re-encoding never rewrites a field.

use std::io::{Read, Seek};

use crate::chunk::{ChunkIterator, ChunkSource};
use crate::codec::{drain, SniffMatch};
use crate::column::{Column, ColumnData, DataType};
use crate::error::{FioError, Result};
use crate::options::{CsvOptions, DecodeOptions};
use crate::source::ByteSource;
use crate::table::{Field, Schema, Table};

pub const EXTENSIONS: &[&str] = &["csv", "tsv"];

const FORMAT: &str = "csv";

pub(crate) fn sniff(prefix: &[u8], extension: Option<&str>) -> Option<SniffMatch> {
    if matches!(extension, Some("csv" | "tsv")) {
        return Some(SniffMatch::text());
    }
    if prefix.contains(&0) {
        return None;
    }
    let text = match std::str::from_utf8(prefix) {
        Ok(text) => text,
        Err(e) => std::str::from_utf8(&prefix[..e.valid_up_to()]).ok()?,
    };
    let first = text.lines().next()?;
    if first.contains([',', '\t']) {
        Some(SniffMatch::text())
    } else {
        None
    }
}

fn csv_error(err: csv::Error, base: u64, rows: usize) -> FioError {
    let offset = base + err.position().map_or(0, |p| p.byte());
    let message = err.to_string();
    match err.into_kind() {
        csv::ErrorKind::Io(e) => FioError::Io(e),
        _ => FioError::corrupt(offset, message).with_rows_decoded(rows),
    }
}

fn reader_builder(delimiter: u8, has_header: bool) -> csv::ReaderBuilder {
    let mut builder = csv::ReaderBuilder::new();
    builder
        .delimiter(delimiter)
        .has_headers(has_header)
        .flexible(true);
    builder
}

fn check_width(record: &csv::StringRecord, width: usize, base: u64, rows: usize) -> Result<()> {
    if record.len() == width {
        return Ok(());
    }
    let offset = base + record.position().map_or(0, |p| p.byte());
    Err(FioError::corrupt(
        offset,
        format!("record has {} fields, expected {}", record.len(), width),
    )
    .with_rows_decoded(rows))
}

fn parse_bool(field: &str) -> Option<bool> {
    match field {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

fn format_float<T: std::fmt::Debug>(value: T) -> String {
    format!("{:?}", value)
}

/// Per-column inference state. A candidate survives only while every field
/// is exactly the text the encoder would write for its parsed value.
#[derive(Debug, Clone, Copy)]
struct Candidates {
    int: bool,
    uint: bool,
    float: bool,
    boolean: bool,
    seen: bool,
}

impl Candidates {
    fn new() -> Self {
        Self {
            int: true,
            uint: true,
            float: true,
            boolean: true,
            seen: false,
        }
    }

    fn observe(&mut self, field: &str) {
        self.seen = true;
        if self.int {
            self.int = field.parse::<i64>().map_or(false, |v| v.to_string() == field);
        }
        if self.uint {
            self.uint = field.parse::<u64>().map_or(false, |v| v.to_string() == field);
        }
        if self.float {
            self.float = field.parse::<f64>().map_or(false, |v| format_float(v) == field);
        }
        if self.boolean {
            self.boolean = parse_bool(field).is_some();
        }
    }

    fn data_type(&self) -> DataType {
        match *self {
            Candidates { seen: false, .. } => DataType::Utf8,
            Candidates { int: true, .. } => DataType::Int64,
            Candidates { uint: true, .. } => DataType::UInt64,
            Candidates { float: true, .. } => DataType::Float64,
            Candidates { boolean: true, .. } => DataType::Bool,
            _ => DataType::Utf8,
        }
    }
}

/// First pass: column names, widths and inferred types
fn infer_schema<R: Read>(inner: R, base: u64, delimiter: u8, has_header: bool) -> Result<Schema> {
    let mut reader = reader_builder(delimiter, has_header).from_reader(inner);
    let mut names: Option<Vec<String>> = if has_header {
        let headers = reader.headers().map_err(|e| csv_error(e, base, 0))?;
        if headers.is_empty() {
            None
        } else {
            Some(headers.iter().map(str::to_string).collect())
        }
    } else {
        None
    };

    let mut candidates: Vec<Candidates> = names
        .as_ref()
        .map(|n| vec![Candidates::new(); n.len()])
        .unwrap_or_default();
    let mut width = names.as_ref().map(Vec::len);
    let mut record = csv::StringRecord::new();
    let mut rows = 0;
    while reader
        .read_record(&mut record)
        .map_err(|e| csv_error(e, base, rows))?
    {
        let expected = *width.get_or_insert_with(|| {
            candidates = vec![Candidates::new(); record.len()];
            record.len()
        });
        check_width(&record, expected, base, rows)?;
        for (state, field) in candidates.iter_mut().zip(record.iter()) {
            state.observe(field);
        }
        rows += 1;
    }

    let names = names
        .take()
        .unwrap_or_else(|| (0..candidates.len()).map(|i| format!("col_{}", i)).collect());
    tracing::debug!("Inferred {} columns over {} records", names.len(), rows);
    Ok(Schema::new(
        names
            .into_iter()
            .zip(candidates)
            .map(|(name, state)| Field::new(name, state.data_type()))
            .collect(),
    ))
}

fn push_field(column: &mut ColumnData, field: &str, offset: u64) -> Result<()> {
    let invalid = |kind: &str| FioError::corrupt(offset, format!("'{}' is not a valid {}", field, kind));
    match column {
        ColumnData::Int64(v) => v.push(field.parse().map_err(|_| invalid("int64"))?),
        ColumnData::UInt64(v) => v.push(field.parse().map_err(|_| invalid("uint64"))?),
        ColumnData::Float64(v) => v.push(field.parse().map_err(|_| invalid("float64"))?),
        ColumnData::Bool(v) => v.push(parse_bool(field).ok_or_else(|| invalid("bool"))?),
        ColumnData::Utf8(v) => v.push(field.to_string()),
        other => return Err(FioError::unsupported(FORMAT, other.data_type().to_string())),
    }
    Ok(())
}

/// Second pass: typed records in fragments of `chunk_rows`
pub(crate) struct CsvReader<R> {
    reader: csv::Reader<R>,
    schema: Schema,
    base: u64,
    chunk_rows: usize,
    rows_read: usize,
    emitted: bool,
    finished: bool,
}

impl<R: Read> CsvReader<R> {
    /// Infer the schema from `source`, then rewind it for the typed pass
    pub fn new(mut source: R, options: &CsvOptions, delimiter: u8, chunk_rows: usize) -> Result<Self>
    where
        R: Seek,
    {
        let base = source.stream_position()?;
        let schema = infer_schema(&mut source, base, delimiter, options.has_header)?;
        source.seek(std::io::SeekFrom::Start(base))?;
        let reader = reader_builder(delimiter, options.has_header).from_reader(source);
        Ok(Self {
            reader,
            schema,
            base,
            chunk_rows,
            rows_read: 0,
            emitted: false,
            finished: false,
        })
    }

    fn read_rows(&mut self) -> Result<Table> {
        let mut builders: Vec<ColumnData> = self
            .schema
            .fields
            .iter()
            .map(|f| ColumnData::empty(f.data_type))
            .collect();
        let mut record = csv::StringRecord::new();
        let mut rows = 0;
        while rows < self.chunk_rows {
            let decoded = self.rows_read + rows;
            let more = self
                .reader
                .read_record(&mut record)
                .map_err(|e| csv_error(e, self.base, decoded))?;
            if !more {
                self.finished = true;
                break;
            }
            check_width(&record, builders.len(), self.base, decoded)?;
            let offset = self.base + record.position().map_or(0, |p| p.byte());
            for (builder, field) in builders.iter_mut().zip(record.iter()) {
                push_field(builder, field, offset).map_err(|e| e.with_rows_decoded(decoded))?;
            }
            rows += 1;
        }
        self.rows_read += rows;

        Table::new(
            self.schema
                .fields
                .iter()
                .zip(builders)
                .map(|(f, data)| Column::new(f.name.clone(), data))
                .collect(),
        )
    }
}

impl<R: Read + Send> ChunkSource for CsvReader<R> {
    fn next_chunk(&mut self) -> Result<Option<Table>> {
        if self.finished && self.emitted {
            return Ok(None);
        }
        let table = match self.read_rows() {
            Ok(table) => table,
            Err(e) => {
                self.finished = true;
                self.emitted = true;
                return Err(e);
            }
        };
        if table.num_rows() == 0 && self.emitted {
            return Ok(None);
        }
        self.emitted = true;
        Ok(Some(table))
    }
}

pub(crate) fn decode(source: &mut ByteSource, options: &DecodeOptions) -> Result<Table> {
    let delimiter = options.csv.delimiter_for(source.extension().as_deref())?;
    drain(CsvReader::new(&mut *source, &options.csv, delimiter, usize::MAX)?)
}

pub(crate) fn decode_chunks(source: ByteSource, options: &DecodeOptions) -> Result<ChunkIterator> {
    let delimiter = options.csv.delimiter_for(source.extension().as_deref())?;
    Ok(ChunkIterator::new(CsvReader::new(
        source,
        &options.csv,
        delimiter,
        options.chunk_rows,
    )?))
}

fn format_value(data: &ColumnData, row: usize) -> Result<String> {
    let text = match data {
        ColumnData::Int8(v) => v[row].to_string(),
        ColumnData::Int16(v) => v[row].to_string(),
        ColumnData::Int32(v) => v[row].to_string(),
        ColumnData::Int64(v) => v[row].to_string(),
        ColumnData::UInt8(v) => v[row].to_string(),
        ColumnData::UInt16(v) => v[row].to_string(),
        ColumnData::UInt32(v) => v[row].to_string(),
        ColumnData::UInt64(v) => v[row].to_string(),
        ColumnData::Float32(v) => format_float(v[row]),
        ColumnData::Float64(v) => format_float(v[row]),
        ColumnData::Bool(v) => v[row].to_string(),
        ColumnData::Utf8(v) => v[row].clone(),
        other => return Err(FioError::unsupported(FORMAT, other.data_type().to_string())),
    };
    Ok(text)
}

pub(crate) fn encode(table: &Table, sink: &mut ByteSource, options: &CsvOptions) -> Result<()> {
    if table.is_array() {
        return Err(FioError::unsupported(FORMAT, "array tables"));
    }
    if let Some(column) = table
        .columns()
        .iter()
        .find(|c| matches!(c.data_type(), DataType::Binary | DataType::Timestamp(_)))
    {
        return Err(FioError::unsupported(
            FORMAT,
            format!("column '{}' of type {}", column.name(), column.data_type()),
        ));
    }
    let delimiter = options.delimiter_for(sink.extension().as_deref())?;

    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(&mut *sink);
    let to_fio = |e: csv::Error| match e.into_kind() {
        csv::ErrorKind::Io(e) => FioError::Io(e),
        other => FioError::InvalidOptions(format!("{:?}", other)),
    };
    if options.has_header && table.num_columns() > 0 {
        writer.write_record(table.column_names()).map_err(to_fio)?;
    }
    let mut fields = Vec::with_capacity(table.num_columns());
    for row in 0..table.num_rows() {
        fields.clear();
        for column in table.columns() {
            fields.push(format_value(column.data(), row)?);
        }
        writer.write_record(&fields).map_err(to_fio)?;
    }
    writer.flush()?;
    Ok(())
}
