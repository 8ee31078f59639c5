//! Random access to the frames of multi-frame files
//!
//! A [`FrameIndex`] records the byte offset of every frame so single frames
//! can be decoded without reading the frames before them. [`FrameView`]s
//! select a subset of frames by index; views of views map straight back to
//! the root index.

use std::ops::Range;
use std::sync::Arc;

use crate::codec::Codec;
use crate::error::{FioError, Result};
use crate::options::DecodeOptions;
use crate::source::ByteSource;
use crate::table::Table;

/// Resolve a possibly negative index against `len`
fn resolve(index: isize, len: usize) -> Result<usize> {
    let resolved = if index < 0 {
        len.checked_sub(index.unsigned_abs())
    } else {
        Some(index as usize)
    };
    match resolved {
        Some(i) if i < len => Ok(i),
        // negative indices report their magnitude
        _ => Err(FioError::OutOfRange {
            index: index.unsigned_abs() as u64,
            len: len as u64,
        }),
    }
}

fn check_range(range: &Range<usize>, len: usize) -> Result<()> {
    if range.start > range.end || range.end > len {
        return Err(FioError::OutOfRange {
            index: range.end as u64,
            len: len as u64,
        });
    }
    Ok(())
}

/// Byte offsets of the frames in one source
pub struct FrameIndex {
    /// Frame starts followed by the end of the last frame
    offsets: Vec<u64>,
    codec: Arc<dyn Codec>,
}

impl FrameIndex {
    /// Scan `source` from its current position. Fails with `UnsupportedType`
    /// if the codec has no notion of frames.
    pub fn build(source: &mut ByteSource, codec: Arc<dyn Codec>) -> Result<Self> {
        let offsets = codec
            .as_multi_frame()
            .ok_or_else(|| FioError::unsupported(codec.name(), "multi-frame access"))?
            .frame_offsets(source)?;
        Ok(Self { offsets, codec })
    }

    pub fn len(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frame number for `index`; negative indices count from the end
    pub fn resolve(&self, index: isize) -> Result<usize> {
        resolve(index, self.len())
    }

    /// Start and end offset of a frame
    pub fn frame_bounds(&self, index: isize) -> Result<(u64, u64)> {
        let frame = self.resolve(index)?;
        Ok((self.offsets[frame], self.offsets[frame + 1]))
    }

    /// Decode a single frame. `source` must be the one the index was built on.
    pub fn read_frame(
        &self,
        source: &mut ByteSource,
        index: isize,
        options: &DecodeOptions,
    ) -> Result<Table> {
        let frame = self.resolve(index)?;
        self.decode(source, frame, options)
    }

    fn decode(&self, source: &mut ByteSource, frame: usize, options: &DecodeOptions) -> Result<Table> {
        let (start, end) = (self.offsets[frame], self.offsets[frame + 1]);
        let len = (end - start) as usize;
        source.seek_to(start)?;
        let bytes = source.read_bytes(len)?;
        if bytes.len() < len {
            return Err(FioError::corrupt(
                start + bytes.len() as u64,
                format!("frame {} is shorter than indexed", frame),
            ));
        }
        let frames = self
            .codec
            .as_multi_frame()
            .ok_or_else(|| FioError::unsupported(self.codec.name(), "multi-frame access"))?;
        frames.decode_frame(bytes, frame, start, options)
    }

    /// View of the given frames, in the given order
    pub fn view(&self, indices: impl IntoIterator<Item = isize>) -> Result<FrameView<'_>> {
        let frames = indices
            .into_iter()
            .map(|i| self.resolve(i))
            .collect::<Result<Vec<_>>>()?;
        Ok(FrameView { index: self, frames })
    }

    /// View of a contiguous run of frames
    pub fn slice(&self, range: Range<usize>) -> Result<FrameView<'_>> {
        check_range(&range, self.len())?;
        Ok(FrameView {
            index: self,
            frames: range.collect(),
        })
    }

    /// View of every frame
    pub fn all(&self) -> FrameView<'_> {
        FrameView {
            index: self,
            frames: (0..self.len()).collect(),
        }
    }
}

impl std::fmt::Debug for FrameIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameIndex")
            .field("codec", &self.codec.name())
            .field("frames", &self.len())
            .finish()
    }
}

/// A selection of frames from a [`FrameIndex`]
#[derive(Debug, Clone)]
pub struct FrameView<'a> {
    index: &'a FrameIndex,
    /// Root frame numbers
    frames: Vec<usize>,
}

impl<'a> FrameView<'a> {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Root frame numbers, in view order
    pub fn frames(&self) -> &[usize] {
        &self.frames
    }

    /// Root frame number of a view-local index
    pub fn root_index(&self, index: isize) -> Result<usize> {
        Ok(self.frames[resolve(index, self.len())?])
    }

    pub fn read_frame(
        &self,
        source: &mut ByteSource,
        index: isize,
        options: &DecodeOptions,
    ) -> Result<Table> {
        let frame = self.root_index(index)?;
        self.index.decode(source, frame, options)
    }

    /// Decode every frame of the view into one table
    pub fn read_all(&self, source: &mut ByteSource, options: &DecodeOptions) -> Result<Table> {
        let mut table = Table::default();
        for &frame in &self.frames {
            table.concat(self.index.decode(source, frame, options)?)?;
        }
        Ok(table)
    }

    /// Sub-view by view-local indices
    pub fn view(&self, indices: impl IntoIterator<Item = isize>) -> Result<FrameView<'a>> {
        let frames = indices
            .into_iter()
            .map(|i| self.root_index(i))
            .collect::<Result<Vec<_>>>()?;
        Ok(FrameView {
            index: self.index,
            frames,
        })
    }

    /// Sub-view of a contiguous run of view-local indices
    pub fn slice(&self, range: Range<usize>) -> Result<FrameView<'a>> {
        check_range(&range, self.len())?;
        Ok(FrameView {
            index: self.index,
            frames: self.frames[range].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BuiltinCodec;

    fn trajectory(frames: usize) -> Vec<u8> {
        let mut text = String::new();
        for frame in 0..frames {
            text.push_str(&format!("1\nstep {}\nAr {}.0 0.0 0.0\n", frame, frame));
        }
        text.into_bytes()
    }

    fn x_of(table: &Table) -> f64 {
        table.column("x").unwrap().data().as_f64().unwrap()[0]
    }

    #[test]
    fn test_random_access_and_negative_indices() {
        let mut source = ByteSource::from_bytes(trajectory(5)).unwrap();
        let index = FrameIndex::build(&mut source, Arc::new(BuiltinCodec::Xyz)).unwrap();
        assert_eq!(index.len(), 5);

        let options = DecodeOptions::default();
        let last = index.read_frame(&mut source, -1, &options).unwrap();
        assert_eq!(x_of(&last), 4.0);
        assert_eq!(last.column("frame").unwrap().data().as_i64(), Some(&[4][..]));
        assert_eq!(x_of(&index.read_frame(&mut source, 2, &options).unwrap()), 2.0);

        assert!(matches!(
            index.read_frame(&mut source, 5, &options),
            Err(FioError::OutOfRange { index: 5, len: 5 })
        ));
        assert!(matches!(
            index.read_frame(&mut source, -6, &options),
            Err(FioError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_views_compose() {
        let mut source = ByteSource::from_bytes(trajectory(10)).unwrap();
        let index = FrameIndex::build(&mut source, Arc::new(BuiltinCodec::Xyz)).unwrap();

        let evens = index.view((0..10).step_by(2).map(|i| i as isize)).unwrap();
        assert_eq!(evens.frames(), &[0, 2, 4, 6, 8]);
        let tail = evens.slice(2..5).unwrap();
        assert_eq!(tail.frames(), &[4, 6, 8]);
        let picked = tail.view([-1, 0]).unwrap();
        assert_eq!(picked.frames(), &[8, 4]);

        let options = DecodeOptions::default();
        assert_eq!(x_of(&picked.read_frame(&mut source, 0, &options).unwrap()), 8.0);
        let joined = picked.read_all(&mut source, &options).unwrap();
        assert_eq!(joined.num_rows(), 2);
        assert!(tail.slice(1..4).is_err());
    }

    #[test]
    fn test_projection_applies_to_frames() {
        let mut source = ByteSource::from_bytes(trajectory(2)).unwrap();
        let index = FrameIndex::build(&mut source, Arc::new(BuiltinCodec::Xyz)).unwrap();
        let options = DecodeOptions::new().with_columns(["element"]);
        let frame = index.read_frame(&mut source, 0, &options).unwrap();
        assert_eq!(frame.column_names(), vec!["element"]);
    }

    #[test]
    fn test_single_frame_formats_rejected() {
        let mut source = ByteSource::from_bytes(vec![0u8; 4]).unwrap();
        assert!(matches!(
            FrameIndex::build(&mut source, Arc::new(BuiltinCodec::Records)),
            Err(FioError::UnsupportedType { .. })
        ));
    }
}
