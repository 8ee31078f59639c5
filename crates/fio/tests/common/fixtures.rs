//! Shared table builders and byte helpers for integration tests

use fio::{
    ByteSource, Column, ColumnData, DecodeOptions, EncodeOptions, FormatId, Registry, Table,
};

/// Route `tracing` output through the test harness; safe to call repeatedly
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Three columns: `id` (Int64), `x` (Float64, id * 0.5), `label` (Utf8)
#[allow(dead_code)]
pub fn sample_table(rows: usize) -> Table {
    let ids: Vec<i64> = (0..rows as i64).collect();
    let xs = ids.iter().map(|&i| i as f64 * 0.5).collect();
    let labels = ids.iter().map(|i| format!("label{}", i)).collect();
    Table::new(vec![
        Column::new("id", ColumnData::Int64(ids)),
        Column::new("x", ColumnData::Float64(xs)),
        Column::new("label", ColumnData::Utf8(labels)),
    ])
    .unwrap()
}

/// CSV text matching [`sample_table`], header included
#[allow(dead_code)]
pub fn sample_csv(rows: usize) -> String {
    let mut text = String::from("id,x,label\n");
    for i in 0..rows {
        text.push_str(&format!("{},{:?},label{}\n", i, i as f64 * 0.5, i));
    }
    text
}

/// XYZ trajectory with `frames` frames of `atoms` argon atoms each. Atom
/// `a` of frame `f` sits at `(f, a, 0)`.
#[allow(dead_code)]
pub fn trajectory(frames: usize, atoms: usize) -> String {
    let mut text = String::new();
    for frame in 0..frames {
        text.push_str(&format!("{}\nframe {}\n", atoms, frame));
        for atom in 0..atoms {
            text.push_str(&format!("Ar {}.0 {}.0 0.0\n", frame, atom));
        }
    }
    text
}

/// Encode into memory and return the bytes
#[allow(dead_code)]
pub fn encode(registry: &Registry, table: &Table, format: &FormatId) -> Vec<u8> {
    let mut sink = ByteSource::memory();
    fio::write(registry, table, &mut sink, format, &EncodeOptions::default()).unwrap();
    sink.into_bytes().unwrap()
}

/// Decode bytes with a format hint
#[allow(dead_code)]
pub fn decode(registry: &Registry, bytes: Vec<u8>, format: &FormatId) -> fio::Result<Table> {
    let mut source = ByteSource::from_bytes(bytes)?;
    fio::read(registry, &mut source, Some(format), &DecodeOptions::default())
}
