//! Multi-frame XYZ trajectories
//!
//! Each frame is an atom count line, a free-form comment line and one
//! `element x y z` line per atom. Decoded tables have the columns `frame`,
//! `element`, `x`, `y` and `z`; frame comments are kept in the metadata under
//! `comment.<frame>`.

use std::io::{BufRead, BufReader, BufWriter, Write};

use crate::chunk::{ChunkIterator, ChunkSource};
use crate::codec::{drain, SniffMatch};
use crate::column::{Column, ColumnData};
use crate::error::{FioError, Result};
use crate::options::{DecodeOptions, XyzOptions};
use crate::source::ByteSource;
use crate::table::Table;

pub const EXTENSIONS: &[&str] = &["xyz"];

const FORMAT: &str = "xyz";

/// Metadata key of a frame comment
pub fn comment_key(frame: i64) -> String {
    format!("comment.{}", frame)
}

pub(crate) fn sniff(prefix: &[u8], extension: Option<&str>) -> Option<SniffMatch> {
    if extension == Some("xyz") {
        return Some(SniffMatch::text());
    }
    // the prefix may end inside a multi-byte character
    let text = match std::str::from_utf8(prefix) {
        Ok(text) => text,
        Err(e) => std::str::from_utf8(&prefix[..e.valid_up_to()]).ok()?,
    };
    let mut lines = text.lines();
    let count: usize = lines.next()?.trim().parse().ok()?;
    lines.next()?;
    if count == 0 {
        return Some(SniffMatch::text());
    }
    let first = lines.next()?.split_whitespace().next()?;
    if first.parse::<f64>().is_err() {
        Some(SniffMatch::text())
    } else {
        None
    }
}

/// Lines with the absolute offset they start at
struct LineReader<R> {
    inner: R,
    offset: u64,
    buf: Vec<u8>,
}

impl<R: BufRead> LineReader<R> {
    fn new(inner: R, offset: u64) -> Self {
        Self {
            inner,
            offset,
            buf: Vec::new(),
        }
    }

    fn next_line(&mut self) -> Result<Option<(u64, String)>> {
        self.buf.clear();
        let start = self.offset;
        let n = self.inner.read_until(b'\n', &mut self.buf)?;
        if n == 0 {
            return Ok(None);
        }
        self.offset += n as u64;

        let mut line = self.buf.as_slice();
        if let Some(stripped) = line.strip_suffix(b"\n") {
            line = stripped;
        }
        if let Some(stripped) = line.strip_suffix(b"\r") {
            line = stripped;
        }
        let text = std::str::from_utf8(line)
            .map_err(|e| FioError::corrupt(start + e.valid_up_to() as u64, "invalid UTF-8"))?;
        Ok(Some((start, text.to_string())))
    }
}

/// Column buffers for a run of whole frames
#[derive(Default)]
struct FrameBatch {
    frame: Vec<i64>,
    element: Vec<String>,
    x: Vec<f64>,
    y: Vec<f64>,
    z: Vec<f64>,
    comments: Vec<(i64, String)>,
}

impl FrameBatch {
    fn rows(&self) -> usize {
        self.frame.len()
    }

    fn into_table(self) -> Result<Table> {
        let mut table = Table::new(vec![
            Column::new("frame", ColumnData::Int64(self.frame)),
            Column::new("element", ColumnData::Utf8(self.element)),
            Column::new("x", ColumnData::Float64(self.x)),
            Column::new("y", ColumnData::Float64(self.y)),
            Column::new("z", ColumnData::Float64(self.z)),
        ])?;
        for (frame, comment) in self.comments {
            table.set_metadata(comment_key(frame), comment);
        }
        Ok(table)
    }
}

fn parse_coordinate(token: &str, at: u64) -> Result<f64> {
    token
        .parse()
        .map_err(|_| FioError::corrupt(at, format!("invalid coordinate '{}'", token)))
}

/// Parse one frame into `batch`. Returns `false` at end of data; trailing
/// blank lines count as end of data.
fn read_frame<R: BufRead>(
    lines: &mut LineReader<R>,
    batch: &mut FrameBatch,
    frame: i64,
) -> Result<bool> {
    let mut blank = None;
    let (count_at, count_line) = loop {
        match lines.next_line()? {
            None => return Ok(false),
            Some((at, line)) if line.trim().is_empty() => {
                blank.get_or_insert(at);
            }
            Some(found) => break found,
        }
    };
    if let Some(at) = blank {
        return Err(FioError::corrupt(at, "blank line where an atom count was expected"));
    }

    let count: usize = count_line.trim().parse().map_err(|_| {
        FioError::corrupt(
            count_at,
            format!("invalid atom count '{}'", count_line.trim()),
        )
    })?;
    let comment = match lines.next_line()? {
        Some((_, comment)) => comment,
        None => {
            return Err(FioError::corrupt(
                lines.offset,
                format!("frame {} ends before its comment line", frame),
            ))
        }
    };
    batch.comments.push((frame, comment));

    for atom in 0..count {
        let (at, line) = lines.next_line()?.ok_or_else(|| {
            FioError::corrupt(
                lines.offset,
                format!("frame {} ends after {} of {} atoms", frame, atom, count),
            )
        })?;
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let [element, x, y, z] = tokens.as_slice() else {
            return Err(FioError::corrupt(
                at,
                format!("expected 'element x y z', found {} fields", tokens.len()),
            ));
        };
        let (x, y, z) = (
            parse_coordinate(x, at)?,
            parse_coordinate(y, at)?,
            parse_coordinate(z, at)?,
        );
        batch.frame.push(frame);
        batch.element.push(element.to_string());
        batch.x.push(x);
        batch.y.push(y);
        batch.z.push(z);
    }
    Ok(true)
}

/// Streaming decoder yielding whole frames per fragment
pub(crate) struct XyzReader<R> {
    lines: LineReader<R>,
    chunk_rows: usize,
    next_frame: i64,
    rows_read: usize,
    emitted: bool,
    finished: bool,
}

impl<R: BufRead> XyzReader<R> {
    pub fn new(inner: R, offset: u64, chunk_rows: usize) -> Self {
        Self {
            lines: LineReader::new(inner, offset),
            chunk_rows,
            next_frame: 0,
            rows_read: 0,
            emitted: false,
            finished: false,
        }
    }
}

impl<R: BufRead + Send> ChunkSource for XyzReader<R> {
    fn next_chunk(&mut self) -> Result<Option<Table>> {
        if self.finished {
            return Ok(None);
        }
        let mut batch = FrameBatch::default();
        let mut frames = 0;
        while batch.rows() < self.chunk_rows {
            match read_frame(&mut self.lines, &mut batch, self.next_frame) {
                Ok(true) => {
                    self.next_frame += 1;
                    frames += 1;
                }
                Ok(false) => {
                    self.finished = true;
                    break;
                }
                Err(e) => {
                    self.finished = true;
                    return Err(e.with_rows_decoded(self.rows_read + batch.rows()));
                }
            }
        }
        if frames == 0 && self.emitted {
            return Ok(None);
        }
        self.emitted = true;
        self.rows_read += batch.rows();
        batch.into_table().map(Some)
    }
}

pub(crate) fn decode(source: &mut ByteSource, _options: &DecodeOptions) -> Result<Table> {
    let offset = source.position();
    drain(XyzReader::new(BufReader::new(&mut *source), offset, usize::MAX))
}

pub(crate) fn decode_chunks(source: ByteSource, options: &DecodeOptions) -> Result<ChunkIterator> {
    let offset = source.position();
    Ok(ChunkIterator::new(XyzReader::new(
        BufReader::new(source),
        offset,
        options.chunk_rows,
    )))
}

/// Start offset of every frame followed by the end of the last one. The
/// source is left where it was, also when a frame is malformed.
pub(crate) fn frame_offsets(source: &mut ByteSource) -> Result<Vec<u64>> {
    let start = source.position();
    let scanned = scan_frames(source, start);
    source.seek_to(start)?;
    let offsets = scanned?;
    tracing::debug!("Indexed {} xyz frames", offsets.len() - 1);
    Ok(offsets)
}

fn scan_frames(source: &mut ByteSource, start: u64) -> Result<Vec<u64>> {
    let mut lines = LineReader::new(BufReader::new(source), start);
    let mut offsets = Vec::new();
    let mut end = start;
    loop {
        let frame_start = lines.offset;
        let mut batch = FrameBatch::default();
        if !read_frame(&mut lines, &mut batch, offsets.len() as i64)? {
            break;
        }
        offsets.push(frame_start);
        end = lines.offset;
    }
    offsets.push(end);
    Ok(offsets)
}

/// Decode the bytes of frame number `frame`, which start at `offset`
pub(crate) fn decode_frame(bytes: Vec<u8>, frame: usize, offset: u64) -> Result<Table> {
    let mut lines = LineReader::new(bytes.as_slice(), offset);
    let mut batch = FrameBatch::default();
    if !read_frame(&mut lines, &mut batch, frame as i64)? {
        return Err(FioError::corrupt(offset, format!("frame {} is empty", frame)));
    }
    batch.into_table()
}

fn coordinates(table: &Table, name: &str) -> Result<Vec<f64>> {
    let column = table.try_column(name)?;
    column.data().to_f64().ok_or_else(|| {
        FioError::unsupported(
            FORMAT,
            format!("{} column of type {}", name, column.data_type()),
        )
    })
}

fn format_coordinate(value: f64, precision: Option<usize>) -> String {
    match precision {
        Some(precision) => format!("{:.*}", precision, value),
        None => format!("{:?}", value),
    }
}

pub(crate) fn encode(table: &Table, sink: &mut ByteSource, options: &XyzOptions) -> Result<()> {
    if table.is_array() {
        return Err(FioError::unsupported(FORMAT, "array tables"));
    }
    let element_column = table.try_column("element")?;
    let elements = element_column.data().as_utf8().ok_or_else(|| {
        FioError::unsupported(
            FORMAT,
            format!("element column of type {}", element_column.data_type()),
        )
    })?;
    let (x, y, z) = (
        coordinates(table, "x")?,
        coordinates(table, "y")?,
        coordinates(table, "z")?,
    );
    let frames = match table.column("frame") {
        Some(column) => Some(column.data().as_i64().ok_or_else(|| {
            FioError::unsupported(FORMAT, format!("frame column of type {}", column.data_type()))
        })?),
        None => None,
    };

    let mut out = BufWriter::new(&mut *sink);
    let mut start = 0;
    while start < table.num_rows() {
        let (id, end) = match frames {
            Some(frames) => {
                let id = frames[start];
                let run = frames[start..].iter().take_while(|&&f| f == id).count();
                (id, start + run)
            }
            None => (0, table.num_rows()),
        };
        let comment = table
            .metadata()
            .get(&comment_key(id))
            .map(String::as_str)
            .unwrap_or("");
        if comment.contains(['\n', '\r']) {
            return Err(FioError::SchemaMismatch(format!(
                "comment of frame {} spans several lines",
                id
            )));
        }
        writeln!(out, "{}", end - start)?;
        writeln!(out, "{}", comment)?;
        for row in start..end {
            let element = &elements[row];
            if element.is_empty() || element.contains(char::is_whitespace) {
                return Err(FioError::SchemaMismatch(format!(
                    "element '{}' in row {} is not a single token",
                    element, row
                )));
            }
            writeln!(
                out,
                "{} {} {} {}",
                element,
                format_coordinate(x[row], options.precision),
                format_coordinate(y[row], options.precision),
                format_coordinate(z[row], options.precision)
            )?;
        }
        start = end;
    }
    out.flush()?;
    Ok(())
}
