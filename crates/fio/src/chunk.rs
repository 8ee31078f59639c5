//! Lazy, pull-based chunked decoding
//!
//! A [`ChunkIterator`] owns the decoder state (and through it the byte
//! source). Nothing is read until `next()` is called; dropping the iterator
//! releases the source. After an error or the end of data it stays finished.

use crate::error::{FioError, Result};
use crate::table::{ArrayLayout, Table};

/// Decoder state that produces fragments on demand
pub trait ChunkSource: Send {
    /// The next fragment, or `None` at end of data. Implementations yield at
    /// least one fragment (possibly with zero rows) so the schema survives.
    fn next_chunk(&mut self) -> Result<Option<Table>>;
}

/// Size of the next fragment given `remaining` rows (elements, for arrays)
/// and the layout that goes with it. For arrays `chunk_rows` counts steps
/// along the chunk axis.
pub(crate) fn plan_chunk(
    layout: Option<&ArrayLayout>,
    chunk_rows: usize,
    remaining: usize,
) -> (usize, Option<ArrayLayout>) {
    match layout {
        None => (chunk_rows.min(remaining), None),
        Some(layout) if layout.chunk_axis().is_none() || layout.chunk_unit() == 0 => {
            (remaining, Some(layout.clone()))
        }
        Some(layout) => {
            let unit = layout.chunk_unit();
            let rows = chunk_rows.saturating_mul(unit).min(remaining);
            (rows, Some(layout.with_chunk_extent(rows / unit)))
        }
    }
}

/// Ordered, finite, non-restartable sequence of table fragments
///
/// A `CorruptData` error yielded here counts only the rows of fragments
/// already yielded, so it always matches what [`collect_partial`] keeps.
///
/// [`collect_partial`]: ChunkIterator::collect_partial
pub struct ChunkIterator {
    source: Option<Box<dyn ChunkSource>>,
    columns: Option<Vec<String>>,
    rows_yielded: usize,
    chunks_yielded: usize,
}

/// A chunked decode that failed partway, with everything decoded before it
#[derive(Debug)]
pub struct PartialDecode {
    /// Fragments decoded before the failure, concatenated
    pub table: Table,
    /// Number of fragments in `table`
    pub chunks: usize,
    pub error: FioError,
}

impl ChunkIterator {
    pub fn new(source: impl ChunkSource + 'static) -> Self {
        Self {
            source: Some(Box::new(source)),
            columns: None,
            rows_yielded: 0,
            chunks_yielded: 0,
        }
    }

    /// Project every fragment onto the named columns
    pub fn with_columns(mut self, columns: Option<Vec<String>>) -> Self {
        self.columns = columns;
        self
    }

    pub fn rows_yielded(&self) -> usize {
        self.rows_yielded
    }

    pub fn chunks_yielded(&self) -> usize {
        self.chunks_yielded
    }

    pub fn is_finished(&self) -> bool {
        self.source.is_none()
    }

    /// Consume the rest of the sequence into one table
    pub fn collect_table(self) -> Result<Table> {
        self.collect_partial().map_err(|partial| partial.error)
    }

    /// Consume the rest of the sequence, keeping what was decoded if a
    /// fragment fails
    pub fn collect_partial(mut self) -> std::result::Result<Table, Box<PartialDecode>> {
        let mut table = Table::default();
        let mut chunks = 0;
        while let Some(next) = self.next() {
            let appended = next.and_then(|fragment| table.concat(fragment));
            if let Err(error) = appended {
                return Err(Box::new(PartialDecode {
                    table,
                    chunks,
                    error,
                }));
            }
            chunks += 1;
        }
        Ok(table)
    }

    fn project(&self, table: Table) -> Result<Table> {
        match &self.columns {
            Some(columns) => table.select(columns),
            None => Ok(table),
        }
    }
}

impl Iterator for ChunkIterator {
    type Item = Result<Table>;

    fn next(&mut self) -> Option<Self::Item> {
        let source = self.source.as_mut()?;
        let outcome = source.next_chunk().and_then(|chunk| match chunk {
            Some(table) => self.project(table).map(Some),
            None => Ok(None),
        });
        match outcome {
            Ok(Some(table)) => {
                self.rows_yielded += table.num_rows();
                self.chunks_yielded += 1;
                tracing::debug!(
                    "Chunk {} decoded with {} rows",
                    self.chunks_yielded,
                    table.num_rows()
                );
                Some(Ok(table))
            }
            Ok(None) => {
                self.source = None;
                None
            }
            Err(e) => {
                self.source = None;
                // rows of the failed fragment never reach the caller
                Some(Err(e.with_rows_decoded(self.rows_yielded)))
            }
        }
    }
}

impl std::iter::FusedIterator for ChunkIterator {}

impl std::fmt::Debug for ChunkIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkIterator")
            .field("finished", &self.is_finished())
            .field("rows_yielded", &self.rows_yielded)
            .field("chunks_yielded", &self.chunks_yielded)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{Column, ColumnData};

    struct Counter {
        next: i64,
        end: i64,
        fail_at: Option<i64>,
    }

    impl ChunkSource for Counter {
        fn next_chunk(&mut self) -> Result<Option<Table>> {
            if Some(self.next) == self.fail_at {
                // one row of the failing fragment was decoded
                return Err(FioError::corrupt(self.next as u64, "boom").with_rows_decoded(self.next as usize + 1));
            }
            if self.next >= self.end {
                return Ok(None);
            }
            let values = vec![self.next, self.next + 1];
            self.next += 2;
            Table::new(vec![
                Column::new("n", ColumnData::Int64(values.clone())),
                Column::new("m", ColumnData::Int64(values)),
            ])
            .map(Some)
        }
    }

    #[test]
    fn test_plan_chunk_cuts_along_chunk_axis() {
        assert_eq!(plan_chunk(None, 10, 25), (10, None));
        let layout = ArrayLayout::c(vec![5, 4]);
        let (rows, next) = plan_chunk(Some(&layout), 2, 20);
        assert_eq!(rows, 8);
        assert_eq!(next.unwrap().shape, vec![2, 4]);
        let (rows, next) = plan_chunk(Some(&layout), 2, 4);
        assert_eq!(rows, 4);
        assert_eq!(next.unwrap().shape, vec![1, 4]);
        let scalar = ArrayLayout::c(vec![]);
        assert_eq!(plan_chunk(Some(&scalar), 2, 1).0, 1);
    }

    #[test]
    fn test_iterator_is_lazy_and_fused() {
        let mut chunks = ChunkIterator::new(Counter {
            next: 0,
            end: 4,
            fail_at: None,
        });
        assert_eq!(chunks.rows_yielded(), 0);
        assert!(chunks.next().unwrap().is_ok());
        assert!(chunks.next().unwrap().is_ok());
        assert!(chunks.next().is_none());
        assert!(chunks.next().is_none());
        assert_eq!(chunks.rows_yielded(), 4);
        assert_eq!(chunks.chunks_yielded(), 2);
    }

    #[test]
    fn test_collect_partial_keeps_prefix() {
        let chunks = ChunkIterator::new(Counter {
            next: 0,
            end: 10,
            fail_at: Some(4),
        });
        let partial = chunks.collect_partial().unwrap_err();
        assert_eq!(partial.table.num_rows(), 4);
        assert_eq!(partial.chunks, 2);
        assert_eq!(partial.error.rows_decoded(), Some(4));
    }

    #[test]
    fn test_error_counts_only_yielded_rows() {
        let mut chunks = ChunkIterator::new(Counter {
            next: 0,
            end: 10,
            fail_at: Some(4),
        });
        assert!(chunks.next().unwrap().is_ok());
        assert!(chunks.next().unwrap().is_ok());
        let err = chunks.next().unwrap().unwrap_err();
        assert_eq!(err.rows_decoded(), Some(4));
    }

    #[test]
    fn test_projection_applies_to_each_chunk() {
        let chunks = ChunkIterator::new(Counter {
            next: 0,
            end: 4,
            fail_at: None,
        })
        .with_columns(Some(vec!["m".to_string()]));
        let table = chunks.collect_table().unwrap();
        assert_eq!(table.column_names(), vec!["m"]);
        assert_eq!(table.num_rows(), 4);
    }
}
