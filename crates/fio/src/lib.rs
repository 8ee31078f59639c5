//! fio - Unified I/O for scientific data files
//!
//! This crate detects, decodes and encodes several on-disk formats through
//! one in-memory table representation:
//!
//! - **fio records**: native row-oriented binary tables (exact round-trip)
//! - **NumPy**: `.npy` arrays, versions 1.0 to 3.0
//! - **Fortran unformatted**: length-framed sequential records (exact round-trip)
//! - **XYZ**: multi-frame molecular trajectories with random frame access
//! - **CSV/TSV**: delimited text with type inference
//!
//! Gzip-compressed input is decompressed transparently.
//!
//! # Design
//!
//! Codecs implement the [`Codec`] trait and are looked up in an immutable
//! [`Registry`] built once and passed explicitly. Decoding is either eager
//! ([`read`]) or lazy through a [`ChunkIterator`] ([`read_chunks`]) that
//! owns its [`ByteSource`].
//!
//! ```no_run
//! use fio::{read_path, DecodeOptions, Registry};
//!
//! let registry = Registry::builtin();
//! let table = read_path(&registry, "positions.xyz", &DecodeOptions::default())?;
//! println!("{} rows", table.num_rows());
//! # Ok::<(), fio::FioError>(())
//! ```

pub mod chunk;
pub mod codec;
pub mod column;
pub mod dispatch;
pub mod error;
pub mod frames;
pub mod options;
pub mod registry;
pub mod sniff;
pub mod source;
pub mod table;

pub use chunk::{ChunkIterator, ChunkSource, PartialDecode};
pub use codec::{BuiltinCodec, Capabilities, Codec, Encoding, MultiFrame, RoundTrip, SniffMatch};
pub use column::{Column, ColumnData, DataType, TimeUnit, Value};
pub use dispatch::{read, read_chunks, read_path, resolve, write, write_path};
pub use error::{FioError, Result};
pub use frames::{FrameIndex, FrameView};
pub use options::{CsvOptions, DecodeOptions, EncodeOptions, XyzOptions, DEFAULT_CHUNK_ROWS};
pub use registry::{FormatId, Registry, RegistryBuilder};
pub use sniff::{sniff, FormatDescriptor, SNIFF_LEN};
pub use source::{ByteSource, Compression};
pub use table::{ArrayElement, ArrayLayout, Field, Order, Row, Schema, Table};
