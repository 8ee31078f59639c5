//! Seekable byte sources over files and in-memory buffers
//!
//! A [`ByteSource`] is exclusively owned by its caller. Gzip input (by `.gz`
//! suffix or magic bytes) is decompressed into memory on open so codecs can
//! seek freely; writable `.gz` destinations are compressed on [`ByteSource::finish`].

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{FioError, Result};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Transparent compression applied to a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compression {
    None,
    Gzip,
}

enum Backing {
    FileReader(BufReader<File>),
    FileWriter(BufWriter<File>),
    Memory(Cursor<Vec<u8>>),
}

/// Exclusive handle to a seekable byte range
pub struct ByteSource {
    backing: Backing,
    path: Option<PathBuf>,
    name: Option<String>,
    len: Option<u64>,
    position: u64,
    readable: bool,
    writable: bool,
    compression: Compression,
    /// Destination file for a compressed writer
    gzip_target: Option<PathBuf>,
    finished: bool,
}

impl ByteSource {
    /// Open a file for reading
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| FioError::from_open(e, path))?;
        let len = file.metadata().map_err(|e| FioError::from_open(e, path))?.len();
        let mut reader = BufReader::new(file);

        let gzip_suffix = has_gz_suffix(path);
        let gzip_magic = reader.fill_buf()?.starts_with(&GZIP_MAGIC);

        let mut source = if gzip_suffix || gzip_magic {
            tracing::debug!("Decompressing gzip source {}", path.display());
            let bytes = gunzip(reader)?;
            let mut source = Self::readable_memory(bytes);
            source.compression = Compression::Gzip;
            source
        } else {
            Self {
                backing: Backing::FileReader(reader),
                path: None,
                name: None,
                len: Some(len),
                position: 0,
                readable: true,
                writable: false,
                compression: Compression::None,
                gzip_target: None,
                finished: false,
            }
        };
        source.path = Some(path.to_path_buf());
        Ok(source)
    }

    /// Wrap an in-memory buffer for reading. Gzip data is decompressed.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.starts_with(&GZIP_MAGIC) {
            let mut source = Self::readable_memory(gunzip(bytes.as_slice())?);
            source.compression = Compression::Gzip;
            return Ok(source);
        }
        Ok(Self::readable_memory(bytes))
    }

    /// An empty, growable in-memory buffer open for reading and writing
    pub fn memory() -> Self {
        let mut source = Self::readable_memory(Vec::new());
        source.writable = true;
        source
    }

    /// Create (or truncate) a file for writing. A `.gz` suffix compresses
    /// the output when the source is finished.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if has_gz_suffix(path) {
            // Fail early on an unwritable destination.
            File::create(path).map_err(|e| FioError::from_open(e, path))?;
            let mut source = Self::memory();
            source.path = Some(path.to_path_buf());
            source.compression = Compression::Gzip;
            source.gzip_target = Some(path.to_path_buf());
            return Ok(source);
        }

        let file = File::create(path).map_err(|e| FioError::from_open(e, path))?;
        Ok(Self {
            backing: Backing::FileWriter(BufWriter::new(file)),
            path: Some(path.to_path_buf()),
            name: None,
            len: Some(0),
            position: 0,
            readable: false,
            writable: true,
            compression: Compression::None,
            gzip_target: None,
            finished: false,
        })
    }

    fn readable_memory(bytes: Vec<u8>) -> Self {
        Self {
            len: Some(bytes.len() as u64),
            backing: Backing::Memory(Cursor::new(bytes)),
            path: None,
            name: None,
            position: 0,
            readable: true,
            writable: false,
            compression: Compression::None,
            gzip_target: None,
            finished: false,
        }
    }

    /// Attach a file name to an in-memory source so extension-based
    /// detection can use it
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Lowercase extension of the path or name, ignoring a trailing `.gz`
    pub fn extension(&self) -> Option<String> {
        let name = match (&self.name, &self.path) {
            (Some(name), _) => name.clone(),
            (None, Some(path)) => path.file_name()?.to_string_lossy().into_owned(),
            (None, None) => return None,
        };
        extension_of(&name)
    }

    /// Total length, when known
    pub fn len(&self) -> Option<u64> {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == Some(0)
    }

    /// Current cursor position
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn is_readable(&self) -> bool {
        self.readable
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Read up to `n` bytes; fewer only at end of data
    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        if !self.readable {
            return Err(FioError::NotReadable);
        }
        let mut buf = Vec::new();
        (&mut *self).take(n as u64).read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Move the cursor to an absolute offset
    pub fn seek_to(&mut self, offset: u64) -> Result<()> {
        if let Some(len) = self.len {
            if offset > len {
                return Err(FioError::OutOfRange { index: offset, len });
            }
        }
        self.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    /// Read up to `n` bytes without moving the cursor
    pub fn peek(&mut self, n: usize) -> Result<Vec<u8>> {
        let start = self.position;
        let bytes = self.read_bytes(n);
        self.seek(SeekFrom::Start(start))?;
        bytes
    }

    /// Write all of `bytes` at the cursor
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(FioError::NotWritable);
        }
        self.write_all(bytes)?;
        Ok(())
    }

    /// Flush buffered output and compress `.gz` destinations
    pub fn finish(mut self) -> Result<()> {
        self.finish_in_place()
    }

    fn finish_in_place(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        match &mut self.backing {
            Backing::FileWriter(writer) => writer.flush()?,
            Backing::Memory(cursor) => {
                if let Some(target) = &self.gzip_target {
                    let file = File::create(target).map_err(|e| FioError::from_open(e, target))?;
                    let mut encoder = GzEncoder::new(BufWriter::new(file), flate2::Compression::default());
                    encoder.write_all(cursor.get_ref())?;
                    encoder.finish()?.flush()?;
                }
            }
            Backing::FileReader(_) => {}
        }
        Ok(())
    }

    /// Take the buffer of an in-memory source
    pub fn into_bytes(mut self) -> Option<Vec<u8>> {
        self.finished = true;
        let backing = std::mem::replace(&mut self.backing, Backing::Memory(Cursor::new(Vec::new())));
        match backing {
            Backing::Memory(cursor) if self.gzip_target.is_none() => Some(cursor.into_inner()),
            _ => None,
        }
    }
}

impl Read for ByteSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.readable {
            return Err(io::Error::new(io::ErrorKind::Unsupported, "byte source is not readable"));
        }
        let n = match &mut self.backing {
            Backing::FileReader(reader) => reader.read(buf)?,
            Backing::Memory(cursor) => cursor.read(buf)?,
            Backing::FileWriter(_) => 0,
        };
        self.position += n as u64;
        Ok(n)
    }
}

impl Write for ByteSource {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.writable {
            return Err(io::Error::new(io::ErrorKind::Unsupported, "byte source is not writable"));
        }
        let n = match &mut self.backing {
            Backing::FileWriter(writer) => writer.write(buf)?,
            Backing::Memory(cursor) => cursor.write(buf)?,
            Backing::FileReader(_) => 0,
        };
        self.position += n as u64;
        self.len = Some(self.len.unwrap_or(0).max(self.position));
        self.finished = false;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.backing {
            Backing::FileWriter(writer) => writer.flush(),
            Backing::Memory(_) | Backing::FileReader(_) => Ok(()),
        }
    }
}

impl Seek for ByteSource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let position = match &mut self.backing {
            Backing::FileReader(reader) => reader.seek(pos)?,
            Backing::FileWriter(writer) => writer.seek(pos)?,
            Backing::Memory(cursor) => cursor.seek(pos)?,
        };
        self.position = position;
        Ok(position)
    }
}

impl Drop for ByteSource {
    fn drop(&mut self) {
        if self.writable {
            if let Err(e) = self.finish_in_place() {
                tracing::warn!("Failed to finish byte source on drop: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for ByteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteSource")
            .field("path", &self.path)
            .field("name", &self.name)
            .field("len", &self.len)
            .field("position", &self.position)
            .field("readable", &self.readable)
            .field("writable", &self.writable)
            .field("compression", &self.compression)
            .finish()
    }
}

/// Lowercase extension of a file name, ignoring a trailing `.gz`
pub(crate) fn extension_of(name: &str) -> Option<String> {
    let lower = name.to_ascii_lowercase();
    let stem = lower.strip_suffix(".gz").unwrap_or(&lower);
    let (_, ext) = stem.rsplit_once('.')?;
    Some(ext.to_string())
}

fn has_gz_suffix(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false)
}

fn gunzip(reader: impl Read) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    MultiGzDecoder::new(reader)
        .read_to_end(&mut bytes)
        .map_err(|e| match e.kind() {
            io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
                FioError::corrupt(0, format!("gzip stream: {}", e))
            }
            _ => FioError::Io(e),
        })?;
    Ok(bytes)
}
