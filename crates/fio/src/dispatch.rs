//! Entry points tying sniffing, the registry and the codecs together

use std::path::Path;
use std::sync::Arc;

use crate::chunk::ChunkIterator;
use crate::codec::Codec;
use crate::error::{FioError, Result};
use crate::options::{DecodeOptions, EncodeOptions};
use crate::registry::{FormatId, Registry};
use crate::sniff::sniff;
use crate::source::{extension_of, ByteSource};
use crate::table::Table;

/// Pick the codec for `source`: the hinted format if given, else sniff
pub fn resolve(
    registry: &Registry,
    source: &mut ByteSource,
    hint: Option<&FormatId>,
) -> Result<(FormatId, Arc<dyn Codec>)> {
    let id = match hint {
        Some(id) => id.clone(),
        None => sniff(registry, source)?.format,
    };
    let codec = registry.lookup(&id)?.clone();
    tracing::debug!("Resolved {} to codec {}", id, codec.name());
    Ok((id, codec))
}

/// Decode a whole source into one table
pub fn read(
    registry: &Registry,
    source: &mut ByteSource,
    hint: Option<&FormatId>,
    options: &DecodeOptions,
) -> Result<Table> {
    options.validate()?;
    let (_, codec) = resolve(registry, source, hint)?;
    codec.decode(source, options)
}

/// Open and decode a file, sniffing its format
pub fn read_path(
    registry: &Registry,
    path: impl AsRef<Path>,
    options: &DecodeOptions,
) -> Result<Table> {
    let mut source = ByteSource::open(path)?;
    read(registry, &mut source, None, options)
}

/// Decode lazily. The iterator owns the source.
pub fn read_chunks(
    registry: &Registry,
    mut source: ByteSource,
    hint: Option<&FormatId>,
    options: &DecodeOptions,
) -> Result<ChunkIterator> {
    options.validate()?;
    let (_, codec) = resolve(registry, &mut source, hint)?;
    codec.decode_chunks(source, options)
}

/// Look up a codec that can encode, before any destination is touched
fn encoder_for<'r>(
    registry: &'r Registry,
    format: &FormatId,
    options: &EncodeOptions,
) -> Result<&'r Arc<dyn Codec>> {
    options.validate()?;
    let codec = registry.lookup(format)?;
    if !codec.capabilities().can_encode() {
        return Err(FioError::ReadOnlyFormat(codec.name().to_string()));
    }
    Ok(codec)
}

/// Encode `table` into `dest` in the given format
pub fn write(
    registry: &Registry,
    table: &Table,
    dest: &mut ByteSource,
    format: &FormatId,
    options: &EncodeOptions,
) -> Result<()> {
    let codec = encoder_for(registry, format, options)?;
    if !dest.is_writable() {
        return Err(FioError::NotWritable);
    }
    tracing::debug!(
        "Encoding {} rows x {} columns as {}",
        table.num_rows(),
        table.num_columns(),
        format
    );
    codec.encode(table, dest, options)
}

/// Create a file and encode `table` into it. The format is chosen from the
/// extension, ignoring a trailing `.gz`. An existing file is left alone
/// unless the format resolves and accepts the options.
pub fn write_path(
    registry: &Registry,
    table: &Table,
    path: impl AsRef<Path>,
    options: &EncodeOptions,
) -> Result<()> {
    let path = path.as_ref();
    let extension = path
        .file_name()
        .and_then(|name| extension_of(&name.to_string_lossy()))
        .unwrap_or_default();
    let format = registry
        .for_extension(&extension)
        .map(|(id, _)| id.clone())
        .ok_or_else(|| FioError::UnknownFormat(FormatId::new(extension)))?;
    encoder_for(registry, &format, options)?;

    let mut dest = ByteSource::create(path)?;
    write(registry, table, &mut dest, &format, options)?;
    dest.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{RECORDS, XYZ};
    use crate::column::{Column, ColumnData};

    fn sample() -> Table {
        Table::new(vec![
            Column::new("id", ColumnData::Int64(vec![1, 2, 3])),
            Column::new("x", ColumnData::Float64(vec![0.5, 1.5, 2.5])),
        ])
        .unwrap()
    }

    #[test]
    fn test_write_then_read_by_sniffing() {
        let registry = Registry::builtin();
        let mut dest = ByteSource::memory();
        write(&registry, &sample(), &mut dest, &RECORDS, &EncodeOptions::default()).unwrap();

        let mut source = ByteSource::from_bytes(dest.into_bytes().unwrap()).unwrap();
        let table = read(&registry, &mut source, None, &DecodeOptions::default()).unwrap();
        assert_eq!(table, sample());
    }

    #[test]
    fn test_hint_skips_sniffing() {
        let registry = Registry::builtin();
        let mut source = ByteSource::from_bytes(b"1\n\nHe 0 0 0\n".to_vec()).unwrap();
        let table = read(&registry, &mut source, Some(&XYZ), &DecodeOptions::default()).unwrap();
        assert_eq!(table.num_rows(), 1);

        let mut source = ByteSource::from_bytes(b"\x93NUMPY".to_vec()).unwrap();
        assert!(matches!(
            read(&registry, &mut source, Some(&FormatId::new("hdf5")), &DecodeOptions::default()),
            Err(FioError::UnknownFormat(_))
        ));
    }

    #[test]
    fn test_invalid_options_rejected_up_front() {
        let registry = Registry::builtin();
        let source = ByteSource::from_bytes(Vec::new()).unwrap();
        let options = DecodeOptions::new().with_chunk_rows(0);
        assert!(matches!(
            read_chunks(&registry, source, Some(&RECORDS), &options),
            Err(FioError::InvalidOptions(_))
        ));
    }

    #[test]
    fn test_write_to_read_only_source() {
        let registry = Registry::builtin();
        let mut dest = ByteSource::from_bytes(Vec::new()).unwrap();
        assert!(matches!(
            write(&registry, &sample(), &mut dest, &RECORDS, &EncodeOptions::default()),
            Err(FioError::NotWritable)
        ));
    }
}
