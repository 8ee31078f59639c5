//! Offset-tracking little-endian reads shared by the binary codecs

use std::io::{self, BufRead, BufReader, Read};

use crate::error::{FioError, Result};

/// Buffered reader that knows the absolute offset of every byte it returns
/// and turns short reads into `CorruptData` at the offset of the field.
pub(crate) struct WireReader<R> {
    inner: BufReader<R>,
    offset: u64,
    rows_decoded: usize,
}

impl<R: Read> WireReader<R> {
    /// `offset` is the absolute position `inner` is currently at
    pub fn new(inner: R, offset: u64) -> Self {
        Self {
            inner: BufReader::new(inner),
            offset,
            rows_decoded: 0,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn set_rows_decoded(&mut self, rows: usize) {
        self.rows_decoded = rows;
    }

    /// `CorruptData` at `offset` carrying the current progress
    pub fn corrupt(&self, offset: u64, message: impl Into<String>) -> FioError {
        FioError::corrupt(offset, message).with_rows_decoded(self.rows_decoded)
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        self.offset += filled as u64;
        Ok(filled)
    }

    /// Read exactly `N` bytes
    pub fn read_array<const N: usize>(&mut self, what: &str) -> Result<[u8; N]> {
        let start = self.offset;
        let mut buf = [0u8; N];
        let got = self.fill(&mut buf)?;
        if got < N {
            return Err(self.corrupt(
                start,
                format!("unexpected end of data reading {} ({} of {} bytes)", what, got, N),
            ));
        }
        Ok(buf)
    }

    /// Read exactly `n` bytes without trusting `n` for the allocation
    pub fn read_vec(&mut self, n: usize, what: &str) -> Result<Vec<u8>> {
        let start = self.offset;
        let mut buf = Vec::new();
        let got = (&mut self.inner).take(n as u64).read_to_end(&mut buf)?;
        self.offset += got as u64;
        if got < n {
            return Err(self.corrupt(
                start,
                format!("unexpected end of data reading {} ({} of {} bytes)", what, got, n),
            ));
        }
        Ok(buf)
    }

    /// Read up to `n` bytes; fewer only at end of data
    pub fn read_up_to(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let got = (&mut self.inner).take(n as u64).read_to_end(&mut buf)?;
        self.offset += got as u64;
        Ok(buf)
    }

    pub fn read_u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.read_array::<1>(what)?[0])
    }

    pub fn read_u16(&mut self, what: &str) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_array(what)?))
    }

    pub fn read_u32(&mut self, what: &str) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array(what)?))
    }

    pub fn read_u64(&mut self, what: &str) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_array(what)?))
    }

    /// True when no bytes remain
    pub fn at_end(&mut self) -> Result<bool> {
        Ok(self.inner.fill_buf()?.is_empty())
    }
}

/// Raw access for parsers that consume the stream themselves
impl<R: Read> Read for WireReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.offset += n as u64;
        Ok(n)
    }
}

/// Convert a run of fixed-width elements
pub(crate) fn decode_fixed<T, const N: usize>(
    bytes: &[u8],
    big_endian: bool,
    from_le: fn([u8; N]) -> T,
    from_be: fn([u8; N]) -> T,
) -> Vec<T> {
    bytes
        .chunks_exact(N)
        .map(|chunk| {
            let mut raw = [0u8; N];
            raw.copy_from_slice(chunk);
            if big_endian {
                from_be(raw)
            } else {
                from_le(raw)
            }
        })
        .collect()
}
