use rand::random;

use std::env;

use super::*;
use crate::Bitvector;

fn scratch_dir(name: &str) -> ffi::OsString {
    let mut loc = env::temp_dir();
    loc.push(format!("{}-{:x}", name, random::<u64>()));
    fs::create_dir_all(&loc).unwrap();
    loc.into_os_string()
}

fn write_ints(dir: &ffi::OsStr, name: &str, vals: &[i32]) {
    let mut buf = vec![];
    for v in vals.iter() {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    fs::write(data_file(dir, name), &buf).unwrap();
}

#[test]
fn test_datatype_codes() {
    for (dtype, code, width) in [
        (DataType::Byte, 'B', Some(1)),
        (DataType::Short, 'S', Some(2)),
        (DataType::Int, 'I', Some(4)),
        (DataType::Long, 'L', Some(8)),
        (DataType::Float, 'F', Some(4)),
        (DataType::Double, 'D', Some(8)),
        (DataType::Category, 'K', Some(4)),
        (DataType::Text, 'T', None),
    ] {
        assert_eq!(dtype.code(), code);
        assert_eq!(dtype.width(), width);
        assert_eq!(DataType::try_from(code).unwrap(), dtype);
    }
    assert!(DataType::try_from('X').is_err());
}

#[test]
fn test_column_evaluate() {
    let dir = scratch_dir("test-column-evaluate");
    let vals: Vec<i32> = vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11];
    write_ints(&dir, "s1", &vals);

    let mut col = Column::new(&dir, "s1", DataType::Int, Some(1.0), Some(11.0));
    let mask = Bitvector::ones(11);

    let range = ContinuousRange::eq("s1", 1.0);
    let hits = col.evaluate(&range, &mask).unwrap();
    assert_eq!((hits.cnt(), hits.get_bit(0)), (1, true));

    let range = ContinuousRange::between("s1", 3.0, 7.0);
    let hits = col.evaluate(&range, &mask).unwrap();
    assert_eq!(hits.to_positions(), vec![2, 3, 4, 5, 6]);

    // the index landed on disk as a side effect
    assert!(path::Path::new(&index_file(&dir, "s1")).is_file());

    // deactivated rows drop out through the mask
    let mut masked = Bitvector::ones(11);
    masked.set_bit(4, false);
    let range = ContinuousRange::between("s1", 3.0, 7.0);
    let hits = col.evaluate(&range, &masked).unwrap();
    assert_eq!(hits.to_positions(), vec![2, 3, 5, 6]);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_column_rebuild_corrupt_index() {
    let dir = scratch_dir("test-column-rebuild");
    write_ints(&dir, "c", &[5, 6, 7]);
    fs::write(index_file(&dir, "c"), b"not an index file at all").unwrap();

    let mut col = Column::new(&dir, "c", DataType::Int, Some(5.0), Some(7.0));
    let mask = Bitvector::ones(3);
    let hits = col.evaluate(&ContinuousRange::eq("c", 6.0), &mask).unwrap();
    assert_eq!(hits.to_positions(), vec![1]);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_column_append_fixed() {
    let src = scratch_dir("test-column-append-src");
    let dest = scratch_dir("test-column-append-dest");
    write_ints(&dest, "c", &[1, 2, 3]);
    write_ints(&src, "c", &[4, 5]);

    let col = Column::new(&dest, "c", DataType::Int, Some(1.0), Some(3.0));
    let mut buf = vec![];
    let n = col.append(&dest, &src, 3, 2, &mut buf).unwrap();
    assert_eq!(n, 2);

    let data = fs::read(data_file(&dest, "c")).unwrap();
    assert_eq!(data.len(), 5 * 4);
    let back: Vec<i32> = data
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    assert_eq!(back, vec![1, 2, 3, 4, 5]);

    fs::remove_dir_all(&src).ok();
    fs::remove_dir_all(&dest).ok();
}

#[test]
fn test_column_append_missing_source_pads() {
    let src = scratch_dir("test-column-append-pad-src");
    let dest = scratch_dir("test-column-append-pad-dest");
    write_ints(&dest, "c", &[9, 9]);

    let col = Column::new(&dest, "c", DataType::Int, None, None);
    let mut buf = vec![];
    col.append(&dest, &src, 2, 3, &mut buf).unwrap();

    let data = fs::read(data_file(&dest, "c")).unwrap();
    assert_eq!(data.len(), 5 * 4);
    assert_eq!(&data[8..], &[0_u8; 12][..]);

    fs::remove_dir_all(&src).ok();
    fs::remove_dir_all(&dest).ok();
}

#[test]
fn test_column_save_selected() {
    let dir = scratch_dir("test-column-save-selected");
    write_ints(&dir, "c", &[10, 20, 30, 40, 50]);

    let mut mask = Bitvector::ones(5);
    mask.set_bit(1, false);
    mask.set_bit(3, false);

    let col = Column::new(&dir, "c", DataType::Int, None, None);
    let mut buf = vec![];
    let kept = col.save_selected(&mask, &dir, &mut buf).unwrap();
    assert_eq!(kept, 3);

    let data = fs::read(data_file(&dir, "c")).unwrap();
    let back: Vec<i32> = data
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    assert_eq!(back, vec![10, 30, 50]);
    assert_eq!(data.len(), 3 * 4); // popcount times the element width

    fs::remove_dir_all(&dir).ok();
}
