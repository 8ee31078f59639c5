//! Random frame access on trajectory files

mod common;

use common::fixtures::trajectory;
use fio::codec::XYZ;
use fio::{resolve, ByteSource, DecodeOptions, FioError, FrameIndex, Registry, Table};
use rstest::rstest;

fn indexed(frames: usize, atoms: usize) -> (ByteSource, FrameIndex) {
    let registry = Registry::builtin();
    let mut source = ByteSource::from_bytes(trajectory(frames, atoms).into_bytes())
        .unwrap()
        .with_name("traj.xyz");
    let (format, codec) = resolve(&registry, &mut source, None).unwrap();
    assert_eq!(format, XYZ);
    let index = FrameIndex::build(&mut source, codec).unwrap();
    (source, index)
}

fn frame_number(table: &Table) -> f64 {
    // atoms of frame f sit at x == f
    table.column("x").unwrap().data().as_f64().unwrap()[0]
}

// === Index ===

#[rstest]
#[case(0, 0.0)]
#[case(3, 3.0)]
#[case(-1, 9.0)]
#[case(-10, 0.0)]
fn test_frame_lookup(#[case] index: isize, #[case] expected: f64) {
    let (mut source, frames) = indexed(10, 2);
    let table = frames
        .read_frame(&mut source, index, &DecodeOptions::default())
        .unwrap();
    assert_eq!(table.num_rows(), 2);
    assert_eq!(frame_number(&table), expected);
}

#[rstest]
#[case(10)]
#[case(-11)]
fn test_frame_lookup_out_of_range(#[case] index: isize) {
    let (mut source, frames) = indexed(10, 2);
    assert!(matches!(
        frames.read_frame(&mut source, index, &DecodeOptions::default()),
        Err(FioError::OutOfRange { len: 10, .. })
    ));
}

#[test]
fn test_frame_bounds_cover_file() {
    let text = trajectory(4, 3);
    let (_, frames) = indexed(4, 3);
    assert_eq!(frames.len(), 4);
    assert_eq!(frames.frame_bounds(0).unwrap().0, 0);
    assert_eq!(frames.frame_bounds(-1).unwrap().1, text.len() as u64);
    for i in 0..3 {
        assert_eq!(frames.frame_bounds(i).unwrap().1, frames.frame_bounds(i + 1).unwrap().0);
    }
}

#[test]
fn test_empty_trajectory_has_no_frames() {
    let mut source = ByteSource::from_bytes(Vec::new()).unwrap().with_name("empty.xyz");
    let codec = Registry::builtin().lookup(&XYZ).unwrap().clone();
    let frames = FrameIndex::build(&mut source, codec).unwrap();
    assert!(frames.is_empty());
    assert!(frames.all().read_all(&mut source, &DecodeOptions::default()).unwrap().columns().is_empty());
}

#[test]
fn test_frame_index_on_gzip_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.xyz.gz");
    let mut sink = ByteSource::create(&path).unwrap();
    std::io::Write::write_all(&mut sink, trajectory(5, 1).as_bytes()).unwrap();
    sink.finish().unwrap();

    let mut source = ByteSource::open(&path).unwrap();
    let codec = Registry::builtin().lookup(&XYZ).unwrap().clone();
    let frames = FrameIndex::build(&mut source, codec).unwrap();
    let last = frames
        .read_frame(&mut source, -1, &DecodeOptions::default())
        .unwrap();
    assert_eq!(frame_number(&last), 4.0);
    assert_eq!(last.metadata().get("comment.4").map(String::as_str), Some("frame 4"));
}

// === Views ===

#[test]
fn test_view_reads_in_view_order() {
    let (mut source, frames) = indexed(6, 2);
    let view = frames.view([5, 1, 3]).unwrap();
    let table = view.read_all(&mut source, &DecodeOptions::default()).unwrap();
    let xs = table.column("x").unwrap().data().as_f64().unwrap();
    assert_eq!(xs, &[5.0, 5.0, 1.0, 1.0, 3.0, 3.0]);
    assert_eq!(
        table.column("frame").unwrap().data().as_i64().unwrap(),
        &[5, 5, 1, 1, 3, 3]
    );
}

#[test]
fn test_nested_views_map_to_root_frames() {
    let (mut source, frames) = indexed(20, 1);
    let second_half = frames.slice(10..20).unwrap();
    let odd = second_half
        .view((0..10).filter(|i| i % 2 == 1).map(|i| i as isize))
        .unwrap();
    assert_eq!(odd.frames(), &[11, 13, 15, 17, 19]);
    assert_eq!(odd.root_index(-2).unwrap(), 17);

    let table = odd
        .read_frame(&mut source, 1, &DecodeOptions::default())
        .unwrap();
    assert_eq!(frame_number(&table), 13.0);
    assert!(odd.view([5]).is_err());
    assert!(frames.slice(15..21).is_err());
}

#[test]
fn test_view_projection() {
    let (mut source, frames) = indexed(3, 2);
    let options = DecodeOptions::new().with_columns(["z", "element"]);
    let table = frames.all().read_all(&mut source, &options).unwrap();
    assert_eq!(table.column_names(), vec!["z", "element"]);
    assert_eq!(table.num_rows(), 6);
}
