//! Registry of codecs keyed by format id.
//!
//! Registration happens on a [`RegistryBuilder`]; [`RegistryBuilder::build`]
//! freezes it into an immutable [`Registry`] snapshot that is passed
//! explicitly to sniffing and decoding and can be shared across threads.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use crate::codec::{BuiltinCodec, Codec};
use crate::error::{FioError, Result};

/// Identifier a codec is registered under
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormatId(Cow<'static, str>);

impl FormatId {
    pub const fn from_static(id: &'static str) -> Self {
        Self(Cow::Borrowed(id))
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(Cow::Owned(id.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FormatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FormatId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

struct Entry {
    id: FormatId,
    codec: Arc<dyn Codec>,
}

/// Mutable registration phase
pub struct RegistryBuilder {
    entries: Vec<Entry>,
}

impl RegistryBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Create a builder with all built-in codecs registered, in sniffing
    /// priority order.
    pub fn with_builtins() -> Self {
        let mut builder = Self::new();
        for &codec in BuiltinCodec::ALL {
            builder.entries.push(Entry {
                id: codec.format_id(),
                codec: Arc::new(codec),
            });
        }
        builder
    }

    /// Register a codec. Fails with `DuplicateFormat` if `id` is already
    /// bound, leaving the existing binding in place.
    pub fn register(&mut self, id: FormatId, codec: Arc<dyn Codec>) -> Result<&mut Self> {
        if self.entries.iter().any(|e| e.id == id) {
            return Err(FioError::DuplicateFormat(id));
        }
        tracing::debug!("Registered codec {} as {}", codec.name(), id);
        self.entries.push(Entry { id, codec });
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Freeze into an immutable snapshot
    pub fn build(self) -> Registry {
        Registry {
            entries: self.entries.into(),
        }
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable, cheaply cloneable codec lookup table
#[derive(Clone)]
pub struct Registry {
    entries: Arc<[Entry]>,
}

impl Registry {
    /// Registry holding only the built-in codecs
    pub fn builtin() -> Self {
        RegistryBuilder::with_builtins().build()
    }

    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Resolve a format id, failing with `UnknownFormat`
    pub fn lookup(&self, id: &FormatId) -> Result<&Arc<dyn Codec>> {
        self.get(id)
            .ok_or_else(|| FioError::UnknownFormat(id.clone()))
    }

    pub fn get(&self, id: &FormatId) -> Option<&Arc<dyn Codec>> {
        self.entries.iter().find(|e| &e.id == id).map(|e| &e.codec)
    }

    /// Registered ids in registration order
    pub fn formats(&self) -> Vec<&FormatId> {
        self.entries.iter().map(|e| &e.id).collect()
    }

    /// Iterate `(id, codec)` pairs in registration order
    pub fn iter(&self) -> impl Iterator<Item = (&FormatId, &Arc<dyn Codec>)> {
        self.entries.iter().map(|e| (&e.id, &e.codec))
    }

    /// Find the codec claiming a file extension, in registration order
    pub fn for_extension(&self, extension: &str) -> Option<(&FormatId, &Arc<dyn Codec>)> {
        let extension = extension.to_ascii_lowercase();
        self.iter()
            .find(|(_, codec)| codec.extensions().contains(&extension.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.iter().map(|e| &e.id)).finish()
    }
}
