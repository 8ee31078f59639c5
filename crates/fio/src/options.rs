//! Decode and encode options
//!
//! Options are plain serde structs so a collaborator (CLI, config loader)
//! can hand them over as TOML or JSON. The core never reads the environment.

use serde::{Deserialize, Serialize};

use crate::error::{FioError, Result};

/// Default number of rows per chunk
pub const DEFAULT_CHUNK_ROWS: usize = 65_536;

/// Options for delimited text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CsvOptions {
    /// Field delimiter; `None` picks tab for `.tsv` and comma otherwise
    pub delimiter: Option<char>,
    /// Whether the first record holds column names
    pub has_header: bool,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: None,
            has_header: true,
        }
    }
}

impl CsvOptions {
    /// Resolve the delimiter byte for a source with the given extension
    pub fn delimiter_for(&self, extension: Option<&str>) -> Result<u8> {
        match self.delimiter {
            Some(c) if c.is_ascii() => Ok(c as u8),
            Some(c) => Err(FioError::InvalidOptions(format!(
                "delimiter must be ASCII, got {:?}",
                c
            ))),
            None if extension == Some("tsv") => Ok(b'\t'),
            None => Ok(b','),
        }
    }
}

/// Options for multi-frame trajectory text
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct XyzOptions {
    /// Fixed number of decimals for coordinates; `None` writes the shortest
    /// representation that reads back to the same value
    pub precision: Option<usize>,
}

/// Options accepted by every decode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DecodeOptions {
    /// Columns to keep, in output order; `None` keeps all
    pub columns: Option<Vec<String>>,
    /// Rows per fragment for chunked decoding. For array data this counts
    /// steps along the slowest axis; for trajectories it rounds up to whole
    /// frames.
    pub chunk_rows: usize,
    pub csv: CsvOptions,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            columns: None,
            chunk_rows: DEFAULT_CHUNK_ROWS,
            csv: CsvOptions::default(),
        }
    }
}

impl DecodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_chunk_rows(mut self, chunk_rows: usize) -> Self {
        self.chunk_rows = chunk_rows;
        self
    }

    /// Validate option values
    pub fn validate(&self) -> Result<()> {
        if self.chunk_rows == 0 {
            return Err(FioError::InvalidOptions(
                "chunk_rows must be at least 1".to_string(),
            ));
        }
        if let Some(columns) = &self.columns {
            let mut seen = std::collections::HashSet::new();
            if let Some(dup) = columns.iter().find(|c| !seen.insert(c.as_str())) {
                return Err(FioError::InvalidOptions(format!(
                    "column '{}' selected twice",
                    dup
                )));
            }
        }
        if let Some(c) = self.csv.delimiter {
            if !c.is_ascii() {
                return Err(FioError::InvalidOptions(format!(
                    "delimiter must be ASCII, got {:?}",
                    c
                )));
            }
        }
        Ok(())
    }

    /// Load options from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let options: Self =
            toml::from_str(toml_str).map_err(|e| FioError::InvalidOptions(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Serialize options to TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| FioError::InvalidOptions(e.to_string()))
    }

    /// Load options from a JSON string
    pub fn from_json(json_str: &str) -> Result<Self> {
        let options: Self =
            serde_json::from_str(json_str).map_err(|e| FioError::InvalidOptions(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }
}

/// Options accepted by every encode
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EncodeOptions {
    pub csv: CsvOptions,
    pub xyz: XyzOptions,
}

impl EncodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        self.csv.delimiter_for(None).map(|_| ())
    }

    /// Load options from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let options: Self =
            toml::from_str(toml_str).map_err(|e| FioError::InvalidOptions(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Serialize options to TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| FioError::InvalidOptions(e.to_string()))
    }
}
