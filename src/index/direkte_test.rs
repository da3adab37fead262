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
fn test_direkte_evaluate() {
    let values: Vec<f64> = vec![3.0, 0.0, 2.0, 3.0, 1.0, 0.0, 2.0, 3.0];
    let mut index = Direkte::build(&values, 4);
    assert_eq!((index.nrows(), index.nobs()), (8, 4));

    let hits = index.evaluate(&ContinuousRange::eq("u", 3.0)).unwrap();
    assert_eq!(hits.to_positions(), vec![0, 3, 7]);

    let hits = index.evaluate(&ContinuousRange::lt("u", 2.0)).unwrap();
    assert_eq!(hits.to_positions(), vec![1, 4, 5]);

    let hits = index.evaluate(&ContinuousRange::between("u", 1.0, 2.0)).unwrap();
    assert_eq!(hits.to_positions(), vec![2, 4, 6]);

    // the domain clamps out-of-range predicates
    let hits = index.evaluate(&ContinuousRange::gt("u", 100.0)).unwrap();
    assert_eq!(hits.cnt(), 0);
    let hits = index.evaluate(&ContinuousRange::ge("u", -5.0)).unwrap();
    assert_eq!(hits.cnt(), 8);

    // fractional bounds fall between the integer values
    let hits = index.evaluate(&ContinuousRange::between("u", 0.5, 2.5)).unwrap();
    assert_eq!(hits.to_positions(), vec![2, 4, 6]);
    assert_eq!(index.evaluate(&ContinuousRange::eq("u", 1.5)).unwrap().cnt(), 0);
}

#[test]
fn test_direkte_discrete() {
    let values: Vec<f64> = (0..20).map(|v| (v % 5) as f64).collect();
    let mut index = Direkte::build(&values, 5);

    let range = DiscreteRange::new("u", vec![0.0, 4.0]);
    let hits = index.evaluate_discrete(&range).unwrap();
    assert_eq!(hits.cnt(), 8);
    for row in hits.iter_ones() {
        assert!(values[row] == 0.0 || values[row] == 4.0);
    }
}

#[test]
fn test_direkte_write_read() {
    let values: Vec<f64> = vec![1.0, 0.0, 2.0, 1.0, 0.0, 2.0, 1.0];
    let mut index = Direkte::build(&values, 3);

    let file = scratch_file("test-direkte-write-read");
    index.write(&file).unwrap();

    let data = fs::read(&file).unwrap();
    assert_eq!(&data[..5], b"#IBIS");
    assert_eq!(data[5], 22); // encoding tag

    let mut loaded = crate::index::open_index(&file, 7).unwrap();
    assert_eq!(loaded.itype(), IndexType::Direkte);
    for v in [0.0, 1.0, 2.0].iter() {
        let range = ContinuousRange::eq("u", *v);
        assert_eq!(
            index.evaluate(&range).unwrap().to_bytes(),
            loaded.evaluate(&range).unwrap().to_bytes(),
            "value {}",
            v
        );
    }

    crate::storage::filemgr().unload(&file);
    fs::remove_file(&file).ok();
}
