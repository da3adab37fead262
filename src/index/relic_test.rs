use rand::random;

use std::{env, fs};

use super::*;
use crate::index::Index;

fn scratch_file(name: &str) -> ffi::OsString {
    let mut loc = env::temp_dir();
    loc.push(format!("{}-{:x}.idx", name, random::<u64>()));
    loc.into_os_string()
}

#[test]
fn test_relic_build() {
    let values: Vec<f64> = (1..=11).map(|v| v as f64).collect();
    let index = Relic::build(&values);
    assert_eq!(index.values(), &values[..]);

    let mut index = index;
    assert_eq!(index.nrows(), 11);
    assert_eq!(index.nobs(), 11);

    let hits = index.evaluate(&ContinuousRange::eq("s1", 1.0)).unwrap();
    assert_eq!(hits.cnt(), 1);
    assert!(hits.get_bit(0));

    let hits = index.evaluate(&ContinuousRange::between("s1", 3.0, 7.0)).unwrap();
    assert_eq!(hits.cnt(), 5);
    assert_eq!(hits.to_positions(), vec![2, 3, 4, 5, 6]);
}

#[test]
fn test_relic_operators() {
    let values: Vec<f64> = vec![3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0, 5.0, 3.0];
    let mut index = Relic::build(&values);
    assert_eq!(index.nobs(), 7); // distinct values

    for (range, pred) in [
        (ContinuousRange::lt("c", 4.0), Box::new(|v: f64| v < 4.0) as Box<dyn Fn(f64) -> bool>),
        (ContinuousRange::le("c", 4.0), Box::new(|v: f64| v <= 4.0)),
        (ContinuousRange::gt("c", 3.0), Box::new(|v: f64| v > 3.0)),
        (ContinuousRange::ge("c", 3.0), Box::new(|v: f64| v >= 3.0)),
        (ContinuousRange::eq("c", 5.0), Box::new(|v: f64| v == 5.0)),
        (ContinuousRange::between("c", 2.0, 5.0), Box::new(|v: f64| (2.0..=5.0).contains(&v))),
    ] {
        let hits = index.evaluate(&range).unwrap();
        for (row, v) in values.iter().enumerate() {
            assert_eq!(hits.get_bit(row), pred(*v), "{} row {}", range, row);
        }
        let expect = values.iter().filter(|v| pred(**v)).count();
        assert_eq!(hits.cnt(), expect, "{}", range);
    }
}

#[test]
fn test_relic_discrete() {
    let values: Vec<f64> = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0];
    let mut index = Relic::build(&values);

    let range = DiscreteRange::new("x", vec![1.0, 3.0, 5.0, 7.0]);
    let hits = index.evaluate_discrete(&range).unwrap();
    assert_eq!(hits.cnt(), 4);
    assert_eq!(hits.to_positions(), vec![0, 2, 4, 6]);

    // values absent from the column match nothing
    let range = DiscreteRange::new("x", vec![0.0, 100.0]);
    assert_eq!(index.evaluate_discrete(&range).unwrap().cnt(), 0);
}

#[test]
fn test_relic_estimate() {
    let values: Vec<f64> = (0..100).map(|v| (v % 10) as f64).collect();
    let index = Relic::build(&values);

    let narrow = index.estimate_cost(&ContinuousRange::eq("c", 3.0));
    let wide = index.estimate_cost(&ContinuousRange::between("c", 1.0, 8.0));
    assert!(narrow > 0.0);
    assert!(wide > narrow);
    assert_eq!(index.estimate_cost(&ContinuousRange::eq("c", 55.0)), 0.0);
}

#[test]
fn test_relic_write_read() {
    let values: Vec<f64> = vec![3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0];
    let mut index = Relic::build(&values);

    let file = scratch_file("test-relic-write-read");
    index.write(&file).unwrap();

    // bit-exact header
    let data = fs::read(&file).unwrap();
    assert_eq!(&data[..5], b"#IBIS");
    assert_eq!(data[5], 7); // encoding tag
    assert_eq!(data[6], 4); // offset word width
    assert_eq!(data[7], 0);
    assert_eq!(u32::from_le_bytes([data[8], data[9], data[10], data[11]]), 8);
    assert_eq!(u32::from_le_bytes([data[12], data[13], data[14], data[15]]), 6);

    let mut loaded = crate::index::open_index(&file, 8).unwrap();
    assert_eq!(loaded.itype(), IndexType::Relic);
    assert_eq!((loaded.nrows(), loaded.nobs()), (8, 6));

    // loaded bitmaps are byte identical to the in-memory form
    for v in [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 9.0].iter() {
        let range = ContinuousRange::eq("c", *v);
        let a = index.evaluate(&range).unwrap();
        let b = loaded.evaluate(&range).unwrap();
        assert_eq!(a.to_bytes(), b.to_bytes(), "value {}", v);
    }

    // wrong row count is a corrupt index
    crate::storage::filemgr().unload(&file);
    assert!(matches!(
        crate::index::open_index(&file, 9),
        Err(Error::CorruptIndex(_, _))
    ));

    filemgr_cleanup(&file);
}

#[test]
fn test_relic_corrupt() {
    let file = scratch_file("test-relic-corrupt");
    fs::write(&file, b"#IBIX\x07\x04\x00garbage").unwrap();
    assert!(matches!(
        crate::index::open_index(&file, 4),
        Err(Error::CorruptIndex(_, _))
    ));
    filemgr_cleanup(&file);
}

fn filemgr_cleanup(file: &ffi::OsStr) {
    crate::storage::filemgr().unload(file);
    fs::remove_file(file).ok();
}
