use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use std::{env, fs};

use super::*;
use crate::index::Index;

fn scratch_file(name: &str) -> ffi::OsString {
    let mut loc = env::temp_dir();
    loc.push(format!("{}-{:x}.idx", name, random::<u64>()));
    loc.into_os_string()
}

// enough distinct values that the size heuristic builds the coarse level
fn spread_values(rng: &mut SmallRng, nrows: usize) -> Vec<f64> {
    (0..nrows).map(|_| (rng.gen::<u32>() % (nrows as u32)) as f64).collect()
}

#[test]
fn test_fuzz_few_values_stays_fine() {
    let values: Vec<f64> = (0..100).map(|v| (v % 8) as f64).collect();
    let index = Fuzz::build(&values).unwrap();
    assert_eq!(index.ncoarse(), 0);
}

#[test]
fn test_fuzz_coarsen() {
    let seed: u128 = random();
    println!("test_fuzz_coarsen {}", seed);
    let mut rng = SmallRng::from_seed({
        let mut s = [0u8; 32];
        s[..16].copy_from_slice(&seed.to_le_bytes());
        s[16..].copy_from_slice(&seed.to_le_bytes());
        s
    });

    let values = spread_values(&mut rng, 2000);
    let index = Fuzz::build(&values).unwrap();
    assert!(index.ncoarse() >= 5, "ncoarse {}", index.ncoarse());
    assert!(index.ncoarse() < index.values().len());
}

#[test]
fn test_fuzz_range_sweep() {
    let seed: u128 = random();
    println!("test_fuzz_range_sweep {}", seed);
    let mut rng = SmallRng::from_seed({
        let mut s = [0u8; 32];
        s[..16].copy_from_slice(&seed.to_le_bytes());
        s[16..].copy_from_slice(&seed.to_le_bytes());
        s
    });

    let nrows = 2000;
    let values = spread_values(&mut rng, nrows);
    let mut index = Fuzz::build(&values).unwrap();
    assert!(index.ncoarse() >= 5);

    // narrow, wide and edge-to-edge ranges against a naive filter
    for _ in 0..40 {
        let a = (rng.gen::<u32>() % (nrows as u32)) as f64;
        let b = (rng.gen::<u32>() % (nrows as u32)) as f64;
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };

        let range = ContinuousRange::between("v", lo, hi);
        let hits = index.evaluate(&range).unwrap();
        let expect: Vec<usize> = values
            .iter()
            .enumerate()
            .filter(|(_, v)| (lo..=hi).contains(*v))
            .map(|(row, _)| row)
            .collect();
        assert_eq!(
            hits.iter_ones().collect::<Vec<usize>>(),
            expect,
            "between {} and {}",
            lo,
            hi
        );
    }

    // one-sided and equality forms
    let hits = index.evaluate(&ContinuousRange::lt("v", 100.0)).unwrap();
    assert_eq!(hits.cnt(), values.iter().filter(|v| **v < 100.0).count());
    let hits = index.evaluate(&ContinuousRange::ge("v", 1500.0)).unwrap();
    assert_eq!(hits.cnt(), values.iter().filter(|v| **v >= 1500.0).count());
    let probe = values[17];
    let hits = index.evaluate(&ContinuousRange::eq("v", probe)).unwrap();
    assert_eq!(hits.cnt(), values.iter().filter(|v| **v == probe).count());
}

#[test]
fn test_fuzz_estimate() {
    let seed: u128 = random();
    println!("test_fuzz_estimate {}", seed);
    let mut rng = SmallRng::from_seed({
        let mut s = [0u8; 32];
        s[..16].copy_from_slice(&seed.to_le_bytes());
        s[16..].copy_from_slice(&seed.to_le_bytes());
        s
    });

    let values = spread_values(&mut rng, 2000);
    let index = Fuzz::build(&values).unwrap();

    // full range and empty range cost nothing to answer
    assert_eq!(index.estimate_cost(&ContinuousRange::between("v", -1.0, 3000.0)), 0.0);
    assert_eq!(index.estimate_cost(&ContinuousRange::eq("v", -7.0)), 0.0);

    // a wide range must not cost more than its fine-only realization
    let range = ContinuousRange::between("v", 100.0, 1700.0);
    let (lo, hi) = (100.0, 1700.0);
    let fine_direct: f64 = {
        let mut bytes = 0.0;
        for (i, v) in index.values().iter().enumerate() {
            if (lo..=hi).contains(v) {
                bytes += index.fine.bin_bytes(i) as f64;
            }
        }
        bytes
    };
    let cost = index.estimate_cost(&range);
    assert!(cost > 0.0);
    assert!(cost <= fine_direct, "cost {} fine {}", cost, fine_direct);
}

#[test]
fn test_fuzz_write_read() {
    let seed: u128 = random();
    println!("test_fuzz_write_read {}", seed);
    let mut rng = SmallRng::from_seed({
        let mut s = [0u8; 32];
        s[..16].copy_from_slice(&seed.to_le_bytes());
        s[16..].copy_from_slice(&seed.to_le_bytes());
        s
    });

    let values = spread_values(&mut rng, 1500);
    let mut index = Fuzz::build(&values).unwrap();
    assert!(index.ncoarse() >= 5);

    let file = scratch_file("test-fuzz-write-read");
    index.write(&file).unwrap();

    let data = fs::read(&file).unwrap();
    assert_eq!(&data[..5], b"#IBIS");
    assert_eq!(data[5], 26); // encoding tag

    let mut loaded = crate::index::open_index(&file, 1500).unwrap();
    assert_eq!(loaded.itype(), IndexType::Fuzz);

    for _ in 0..20 {
        let a = (rng.gen::<u32>() % 1500) as f64;
        let b = (rng.gen::<u32>() % 1500) as f64;
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let range = ContinuousRange::between("v", lo, hi);
        assert_eq!(
            index.evaluate(&range).unwrap(),
            loaded.evaluate(&range).unwrap(),
            "between {} and {}",
            lo,
            hi
        );
    }

    crate::storage::filemgr().unload(&file);
    fs::remove_file(&file).ok();
}
