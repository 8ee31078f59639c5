//! Format detection from a bounded prefix
//!
//! Codecs are asked in registration order; the first match wins. The source
//! position is restored whether or not a format is found.

use crate::codec::Encoding;
use crate::error::{FioError, Result};
use crate::registry::{FormatId, Registry};
use crate::source::{ByteSource, Compression};

/// Number of bytes inspected
pub const SNIFF_LEN: usize = 64;

/// What sniffing found out about a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDescriptor {
    pub format: FormatId,
    /// Human readable codec name
    pub name: &'static str,
    pub version: Option<String>,
    pub encoding: Encoding,
    pub compression: Compression,
}

/// Identify the format of `source` from its prefix and extension
pub fn sniff(registry: &Registry, source: &mut ByteSource) -> Result<FormatDescriptor> {
    let prefix = source.peek(SNIFF_LEN)?;
    let extension = source.extension();

    let found = registry.iter().find_map(|(id, codec)| {
        codec
            .sniff(&prefix, extension.as_deref())
            .map(|found| (id, codec, found))
    });

    match found {
        Some((id, codec, found)) => {
            tracing::debug!(
                "Sniffed {} (version {:?}) from {} prefix bytes",
                id,
                found.version,
                prefix.len()
            );
            Ok(FormatDescriptor {
                format: id.clone(),
                name: codec.name(),
                version: found.version,
                encoding: found.encoding,
                compression: source.compression(),
            })
        }
        None => {
            tracing::debug!("No codec matched {} prefix bytes", prefix.len());
            Err(FioError::UnrecognizedFormat)
        }
    }
}
