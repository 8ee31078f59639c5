//! Chunked decoding: reassembly, projection and partial failure

mod common;

use common::fixtures::{encode, sample_csv, sample_table, trajectory};
use fio::codec::{CSV, NPY, RECORDS, XYZ};
use fio::{
    read, read_chunks, ArrayLayout, ByteSource, ColumnData, DecodeOptions, FioError, FormatId,
    Order, Registry, Table,
};
use proptest::prelude::*;
use rstest::rstest;

fn chunks(bytes: Vec<u8>, format: &FormatId, options: &DecodeOptions) -> Vec<Table> {
    let registry = Registry::builtin();
    let source = ByteSource::from_bytes(bytes).unwrap();
    read_chunks(&registry, source, Some(format), options)
        .unwrap()
        .collect::<fio::Result<Vec<_>>>()
        .unwrap()
}

fn eager(bytes: Vec<u8>, format: &FormatId, options: &DecodeOptions) -> Table {
    let mut source = ByteSource::from_bytes(bytes).unwrap();
    read(&Registry::builtin(), &mut source, Some(format), options).unwrap()
}

// === Fragment sizes ===

#[rstest]
#[case(100, 30, vec![30, 30, 30, 10])]
#[case(100, 100, vec![100])]
#[case(100, 1000, vec![100])]
#[case(0, 10, vec![0])]
fn test_records_fragment_sizes(
    #[case] rows: usize,
    #[case] chunk_rows: usize,
    #[case] expected: Vec<usize>,
) {
    let bytes = encode(&Registry::builtin(), &sample_table(rows), &RECORDS);
    let options = DecodeOptions::new().with_chunk_rows(chunk_rows);
    let sizes: Vec<usize> = chunks(bytes, &RECORDS, &options)
        .iter()
        .map(Table::num_rows)
        .collect();
    assert_eq!(sizes, expected);
}

#[test]
fn test_xyz_fragments_hold_whole_frames() {
    let options = DecodeOptions::new().with_chunk_rows(5);
    let fragments = chunks(trajectory(6, 3).into_bytes(), &XYZ, &options);
    assert!(fragments.iter().all(|t| t.num_rows() % 3 == 0));
    assert_eq!(fragments.iter().map(Table::num_rows).sum::<usize>(), 18);
}

#[test]
fn test_npy_fragments_follow_chunk_axis() {
    let registry = Registry::builtin();
    let layout = ArrayLayout::new(vec![4, 5], Order::Fortran);
    let table = Table::array("array", ColumnData::Float64((0..20).map(f64::from).collect()), layout)
        .unwrap();
    let options = DecodeOptions::new().with_chunk_rows(2);
    let shapes: Vec<Vec<usize>> = chunks(encode(&registry, &table, &NPY), &NPY, &options)
        .iter()
        .map(|t| t.shape().unwrap().to_vec())
        .collect();
    assert_eq!(shapes, vec![vec![4, 2], vec![4, 2], vec![4, 1]]);
}

// === Projection ===

#[test]
fn test_projection_applies_to_every_fragment() {
    let options = DecodeOptions::new()
        .with_chunk_rows(7)
        .with_columns(["label", "id"]);
    for fragment in chunks(sample_csv(20).into_bytes(), &CSV, &options) {
        assert_eq!(fragment.column_names(), vec!["label", "id"]);
    }
}

#[test]
fn test_projection_of_missing_column_fails() {
    let registry = Registry::builtin();
    let source = ByteSource::from_bytes(sample_csv(3).into_bytes()).unwrap();
    let options = DecodeOptions::new().with_columns(["nope"]);
    let mut fragments = read_chunks(&registry, source, Some(&CSV), &options).unwrap();
    assert!(matches!(
        fragments.next(),
        Some(Err(FioError::ColumnNotFound(_)))
    ));
    assert!(fragments.next().is_none());
}

// === Partial failure ===

#[test]
fn test_corrupt_tail_keeps_earlier_fragments() {
    let registry = Registry::builtin();
    let mut bytes = encode(&registry, &sample_table(100), &RECORDS);
    bytes.truncate(bytes.len() - 10);

    let source = ByteSource::from_bytes(bytes).unwrap();
    let options = DecodeOptions::new().with_chunk_rows(25);
    let partial = read_chunks(&registry, source, Some(&RECORDS), &options)
        .unwrap()
        .collect_partial()
        .unwrap_err();

    assert_eq!(partial.chunks, 3);
    assert_eq!(partial.table, sample_table(75));
    assert!(matches!(partial.error, FioError::CorruptData { .. }));
    assert_eq!(partial.error.rows_decoded(), Some(75));
}

#[test]
fn test_partial_rows_match_retained_table() {
    let registry = Registry::builtin();
    let mut bytes = encode(&registry, &sample_table(25), &RECORDS);
    bytes.truncate(bytes.len() - 3);

    let source = ByteSource::from_bytes(bytes).unwrap();
    let options = DecodeOptions::new().with_chunk_rows(10);
    let partial = read_chunks(&registry, source, Some(&RECORDS), &options)
        .unwrap()
        .collect_partial()
        .unwrap_err();

    assert_eq!(partial.table.num_rows(), 20);
    assert_eq!(partial.error.rows_decoded(), Some(partial.table.num_rows()));
}

#[test]
fn test_iterator_stays_finished_after_error() {
    let registry = Registry::builtin();
    let mut bytes = encode(&registry, &sample_table(10), &RECORDS);
    bytes.truncate(bytes.len() - 1);
    let source = ByteSource::from_bytes(bytes).unwrap();
    let mut fragments =
        read_chunks(&registry, source, Some(&RECORDS), &DecodeOptions::default()).unwrap();

    assert!(matches!(fragments.next(), Some(Err(FioError::CorruptData { .. }))));
    assert!(fragments.is_finished());
    assert!(fragments.next().is_none());
}

// === Reassembly ===

proptest! {
    #[test]
    fn prop_records_chunks_reassemble(rows in 0usize..200, chunk_rows in 1usize..64) {
        let bytes = encode(&Registry::builtin(), &sample_table(rows), &RECORDS);
        let options = DecodeOptions::new().with_chunk_rows(chunk_rows);
        let joined = Table::concat_all(chunks(bytes.clone(), &RECORDS, &options)).unwrap();
        prop_assert_eq!(joined, eager(bytes, &RECORDS, &options));
    }

    #[test]
    fn prop_csv_chunks_reassemble(rows in 0usize..200, chunk_rows in 1usize..64) {
        let bytes = sample_csv(rows).into_bytes();
        let options = DecodeOptions::new().with_chunk_rows(chunk_rows);
        let joined = Table::concat_all(chunks(bytes.clone(), &CSV, &options)).unwrap();
        prop_assert_eq!(joined, eager(bytes, &CSV, &options));
    }

    #[test]
    fn prop_xyz_chunks_reassemble(
        frames in 0usize..12,
        atoms in 1usize..5,
        chunk_rows in 1usize..20,
    ) {
        let bytes = trajectory(frames, atoms).into_bytes();
        let options = DecodeOptions::new().with_chunk_rows(chunk_rows);
        let joined = Table::concat_all(chunks(bytes.clone(), &XYZ, &options)).unwrap();
        prop_assert_eq!(joined, eager(bytes, &XYZ, &options));
    }

    #[test]
    fn prop_npy_chunks_reassemble(rows in 0usize..30, cols in 1usize..6, chunk_rows in 1usize..8) {
        let registry = Registry::builtin();
        let data = ColumnData::Int64((0..(rows * cols) as i64).collect());
        let table = Table::array("array", data, ArrayLayout::c(vec![rows, cols])).unwrap();
        let bytes = encode(&registry, &table, &NPY);
        let options = DecodeOptions::new().with_chunk_rows(chunk_rows);
        let joined = Table::concat_all(chunks(bytes.clone(), &NPY, &options)).unwrap();
        prop_assert_eq!(&joined, &eager(bytes, &NPY, &options));
        prop_assert_eq!(joined, table);
    }
}
