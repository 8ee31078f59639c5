//! Codecs: paired decode/encode logic per on-disk format
//!
//! The built-in formats are a closed set of variants ([`BuiltinCodec`])
//! behind the common [`Codec`] capability. Additional codecs implement the
//! trait and are added through the registry builder.

use crate::chunk::{ChunkIterator, ChunkSource};
use crate::error::{FioError, Result};
use crate::options::{DecodeOptions, EncodeOptions};
use crate::registry::FormatId;
use crate::source::ByteSource;
use crate::table::Table;

#[cfg(feature = "csv")]
pub mod delimited;
pub mod fortran;
pub mod npy;
pub mod records;
pub(crate) mod wire;
pub mod xyz;

/// Native row-oriented binary tables
pub const RECORDS: FormatId = FormatId::from_static("fio-records");
/// NumPy `.npy` arrays
pub const NPY: FormatId = FormatId::from_static("npy");
/// Fortran unformatted sequential records
pub const FORTRAN: FormatId = FormatId::from_static("fortran-unformatted");
/// Multi-frame XYZ trajectories
pub const XYZ: FormatId = FormatId::from_static("xyz");
/// Delimited text
pub const CSV: FormatId = FormatId::from_static("csv");

/// How a format stores its bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Binary { little_endian: bool },
    Text,
}

/// What a codec recognised in a source prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SniffMatch {
    pub version: Option<String>,
    pub encoding: Encoding,
}

impl SniffMatch {
    pub fn text() -> Self {
        Self {
            version: None,
            encoding: Encoding::Text,
        }
    }
}

/// Whether a codec can write. Every built-in is `ReadWrite`; `ReadOnly` is
/// for registered codecs that only decode, and makes `write` refuse them
/// before a sink is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capabilities {
    ReadOnly,
    ReadWrite,
}

impl Capabilities {
    pub fn can_encode(&self) -> bool {
        matches!(self, Capabilities::ReadWrite)
    }
}

/// Round-trip contract of a codec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundTrip {
    /// `encode(decode(x)) == x` byte-for-byte for canonical input
    Exact,
    /// Values survive; bytes are canonicalised by the first encode
    ValueEquivalent(&'static str),
}

/// Decode/encode capability for one on-disk format. Codecs are stateless
/// and shared read-only across all operations.
pub trait Codec: Send + Sync {
    /// Human readable format name
    fn name(&self) -> &'static str;

    /// File extensions claimed by this codec, lowercase without the dot
    fn extensions(&self) -> &'static [&'static str];

    /// Inspect a bounded prefix (and the extension, if known)
    fn sniff(&self, prefix: &[u8], extension: Option<&str>) -> Option<SniffMatch>;

    fn capabilities(&self) -> Capabilities {
        Capabilities::ReadWrite
    }

    fn round_trip(&self) -> RoundTrip;

    /// Decode the whole source from its current position
    fn decode(&self, source: &mut ByteSource, options: &DecodeOptions) -> Result<Table>;

    /// Decode lazily; the iterator takes ownership of the source
    fn decode_chunks(&self, source: ByteSource, options: &DecodeOptions) -> Result<ChunkIterator>;

    /// Write `table` at the sink's current position
    fn encode(&self, table: &Table, sink: &mut ByteSource, options: &EncodeOptions) -> Result<()> {
        let _ = (table, sink, options);
        Err(FioError::ReadOnlyFormat(self.name().to_string()))
    }

    /// Frame-level access for multi-frame formats
    fn as_multi_frame(&self) -> Option<&dyn MultiFrame> {
        None
    }
}

/// Random access to the frames of a multi-frame format
pub trait MultiFrame {
    /// Absolute start offset of every frame followed by the end offset
    fn frame_offsets(&self, source: &mut ByteSource) -> Result<Vec<u64>>;

    /// Decode the bytes of a single frame. `frame` is its index in the file
    /// and `offset` the absolute position of `bytes`.
    fn decode_frame(
        &self,
        bytes: Vec<u8>,
        frame: usize,
        offset: u64,
        options: &DecodeOptions,
    ) -> Result<Table>;
}

/// The formats shipped with the crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinCodec {
    Records,
    Npy,
    Fortran,
    Xyz,
    #[cfg(feature = "csv")]
    Csv,
}

impl BuiltinCodec {
    /// Built-ins in sniffing priority order: binary magic first, the most
    /// permissive text heuristic last
    #[cfg(feature = "csv")]
    pub const ALL: &'static [BuiltinCodec] = &[
        BuiltinCodec::Records,
        BuiltinCodec::Npy,
        BuiltinCodec::Fortran,
        BuiltinCodec::Xyz,
        BuiltinCodec::Csv,
    ];

    #[cfg(not(feature = "csv"))]
    pub const ALL: &'static [BuiltinCodec] = &[
        BuiltinCodec::Records,
        BuiltinCodec::Npy,
        BuiltinCodec::Fortran,
        BuiltinCodec::Xyz,
    ];

    pub fn format_id(&self) -> FormatId {
        match self {
            BuiltinCodec::Records => RECORDS,
            BuiltinCodec::Npy => NPY,
            BuiltinCodec::Fortran => FORTRAN,
            BuiltinCodec::Xyz => XYZ,
            #[cfg(feature = "csv")]
            BuiltinCodec::Csv => CSV,
        }
    }
}

impl Codec for BuiltinCodec {
    fn name(&self) -> &'static str {
        match self {
            BuiltinCodec::Records => "fio records",
            BuiltinCodec::Npy => "NumPy array",
            BuiltinCodec::Fortran => "Fortran unformatted",
            BuiltinCodec::Xyz => "XYZ trajectory",
            #[cfg(feature = "csv")]
            BuiltinCodec::Csv => "CSV",
        }
    }

    fn extensions(&self) -> &'static [&'static str] {
        match self {
            BuiltinCodec::Records => records::EXTENSIONS,
            BuiltinCodec::Npy => npy::EXTENSIONS,
            BuiltinCodec::Fortran => fortran::EXTENSIONS,
            BuiltinCodec::Xyz => xyz::EXTENSIONS,
            #[cfg(feature = "csv")]
            BuiltinCodec::Csv => delimited::EXTENSIONS,
        }
    }

    fn sniff(&self, prefix: &[u8], extension: Option<&str>) -> Option<SniffMatch> {
        match self {
            BuiltinCodec::Records => records::sniff(prefix),
            BuiltinCodec::Npy => npy::sniff(prefix),
            BuiltinCodec::Fortran => fortran::sniff(prefix, extension),
            BuiltinCodec::Xyz => xyz::sniff(prefix, extension),
            #[cfg(feature = "csv")]
            BuiltinCodec::Csv => delimited::sniff(prefix, extension),
        }
    }

    fn round_trip(&self) -> RoundTrip {
        match self {
            BuiltinCodec::Records => RoundTrip::Exact,
            BuiltinCodec::Npy => RoundTrip::ValueEquivalent(
                "big-endian input, foreign header layouts and string padding are rewritten canonically",
            ),
            BuiltinCodec::Fortran => RoundTrip::Exact,
            BuiltinCodec::Xyz => RoundTrip::ValueEquivalent(
                "whitespace and number formatting are rewritten; frames without atoms are dropped",
            ),
            #[cfg(feature = "csv")]
            BuiltinCodec::Csv => RoundTrip::ValueEquivalent(
                "column types are re-inferred from text and widened to int64/uint64/float64",
            ),
        }
    }

    fn decode(&self, source: &mut ByteSource, options: &DecodeOptions) -> Result<Table> {
        let table = match self {
            BuiltinCodec::Records => records::decode(source, options),
            BuiltinCodec::Npy => npy::decode(source, options),
            BuiltinCodec::Fortran => fortran::decode(source, options),
            BuiltinCodec::Xyz => xyz::decode(source, options),
            #[cfg(feature = "csv")]
            BuiltinCodec::Csv => delimited::decode(source, options),
        }?;
        project(table, options)
    }

    fn decode_chunks(&self, source: ByteSource, options: &DecodeOptions) -> Result<ChunkIterator> {
        let chunks = match self {
            BuiltinCodec::Records => records::decode_chunks(source, options),
            BuiltinCodec::Npy => npy::decode_chunks(source, options),
            BuiltinCodec::Fortran => fortran::decode_chunks(source, options),
            BuiltinCodec::Xyz => xyz::decode_chunks(source, options),
            #[cfg(feature = "csv")]
            BuiltinCodec::Csv => delimited::decode_chunks(source, options),
        }?;
        Ok(chunks.with_columns(options.columns.clone()))
    }

    fn encode(&self, table: &Table, sink: &mut ByteSource, options: &EncodeOptions) -> Result<()> {
        if !sink.is_writable() {
            return Err(FioError::NotWritable);
        }
        match self {
            BuiltinCodec::Records => records::encode(table, sink),
            BuiltinCodec::Npy => npy::encode(table, sink),
            BuiltinCodec::Fortran => fortran::encode(table, sink),
            BuiltinCodec::Xyz => xyz::encode(table, sink, &options.xyz),
            #[cfg(feature = "csv")]
            BuiltinCodec::Csv => delimited::encode(table, sink, &options.csv),
        }
    }

    fn as_multi_frame(&self) -> Option<&dyn MultiFrame> {
        match self {
            BuiltinCodec::Xyz => Some(self),
            _ => None,
        }
    }
}

impl MultiFrame for BuiltinCodec {
    fn frame_offsets(&self, source: &mut ByteSource) -> Result<Vec<u64>> {
        match self {
            BuiltinCodec::Xyz => xyz::frame_offsets(source),
            _ => Err(FioError::unsupported(self.name(), "multi-frame access")),
        }
    }

    fn decode_frame(
        &self,
        bytes: Vec<u8>,
        frame: usize,
        offset: u64,
        options: &DecodeOptions,
    ) -> Result<Table> {
        let table = match self {
            BuiltinCodec::Xyz => xyz::decode_frame(bytes, frame, offset),
            _ => Err(FioError::unsupported(self.name(), "multi-frame access")),
        }?;
        project(table, options)
    }
}

/// Apply the column selection of `options`
pub(crate) fn project(table: Table, options: &DecodeOptions) -> Result<Table> {
    match &options.columns {
        Some(columns) => table.select(columns),
        None => Ok(table),
    }
}

/// Run a chunk source to completion as one fragment sequence
pub(crate) fn drain(mut source: impl ChunkSource) -> Result<Table> {
    let mut table = Table::default();
    while let Some(chunk) = source.next_chunk()? {
        table.concat(chunk)?;
    }
    Ok(table)
}
