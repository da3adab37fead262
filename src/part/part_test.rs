use rand::random;

use std::{collections::HashMap, env};

use super::*;
use crate::query::{BinOp, ContinuousRange, MathTerm};

fn scratch_dir(name: &str) -> ffi::OsString {
    let mut loc = env::temp_dir();
    loc.push(format!("{}-{:x}", name, random::<u64>()));
    loc.into_os_string()
}

fn snapshot(dir: &ffi::OsStr) -> HashMap<String, Vec<u8>> {
    let mut files = HashMap::new();
    for entry in fs::read_dir(dir).unwrap() {
        let entry = entry.unwrap();
        if entry.file_type().unwrap().is_file() {
            let name = entry.file_name().to_string_lossy().to_string();
            files.insert(name, fs::read(entry.path()).unwrap());
        }
    }
    files
}

#[test]
fn test_part_scenario_range() {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = scratch_dir("test-part-range");
    let mut part = Partition::create(&dir, "range").unwrap();
    let s1: Vec<i32> = (1..=11).collect();
    part.add_column("s1", DataType::Int, &s1).unwrap();
    assert_eq!(part.nrows(), 11);

    let hits = part.evaluate(&QueryExpr::Range(ContinuousRange::eq("s1", 1.0))).unwrap();
    assert_eq!((hits.cnt(), hits.to_positions()), (1, vec![0]));

    let expr = QueryExpr::Range(ContinuousRange::between("s1", 3.0, 7.0));
    let hits = part.evaluate(&expr).unwrap();
    assert_eq!(hits.cnt(), 5);
    assert_eq!(hits.to_positions(), vec![2, 3, 4, 5, 6]);

    // projected values come back by position
    assert_eq!(
        part.select_values("s1", &hits).unwrap(),
        vec![3.0, 4.0, 5.0, 6.0, 7.0]
    );

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_part_scenario_signs() {
    let dir = scratch_dir("test-part-signs");
    let mut part = Partition::create(&dir, "signs").unwrap();
    let b3: Vec<i8> = vec![
        3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 10, -21, 32, -43, 54, -65, 76, -87, 98,
        -127,
    ];
    let i2: Vec<i16> = b3.iter().map(|v| *v as i16).collect();
    part.add_column("b3", DataType::Byte, &b3).unwrap();
    part.add_column("i2", DataType::Short, &i2).unwrap();

    let expr = QueryExpr::Range(ContinuousRange::between("b3", 10.0, 100.0));
    let hits = part.evaluate(&expr).unwrap();
    let expect = b3.iter().filter(|v| (10..=100).contains(*v)).count();
    assert_eq!(hits.cnt(), expect);
    for row in hits.iter_ones() {
        assert!((10..=100).contains(&b3[row]));
    }

    // the two columns agree in sign, the conjunction is empty
    let expr = QueryExpr::and(
        QueryExpr::Range(ContinuousRange::gt("b3", 0.0)),
        QueryExpr::Range(ContinuousRange::lt("i2", 0.0)),
    );
    assert_eq!(part.count(&expr).unwrap(), 0);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_part_scenario_strings() {
    let dir = scratch_dir("test-part-strings");
    let mut part = Partition::create(&dir, "strings").unwrap();
    let k7: Vec<&str> = vec!["7", "8", "9", "10", "11", "12"];
    let t8: Vec<&str> = vec!["8", "9", "10", "11", "12", "13"];
    part.add_category("k7", &k7).unwrap();
    part.add_text("t8", &t8).unwrap();

    let expr = QueryExpr::or(
        QueryExpr::StringEq { col: "k7".to_string(), value: "8".to_string() },
        QueryExpr::StringEq { col: "t8".to_string(), value: "8".to_string() },
    );
    let hits = part.evaluate(&expr).unwrap();
    assert_eq!(hits.cnt(), 2);
    assert_eq!(hits.to_positions(), vec![0, 1]);

    // category IN over several strings
    let expr = QueryExpr::AnyString {
        col: "k7".to_string(),
        values: vec!["7".to_string(), "12".to_string(), "99".to_string()],
    };
    assert_eq!(part.rows(&expr).unwrap(), vec![0, 5]);

    let hits = part
        .evaluate(&QueryExpr::StringEq { col: "t8".to_string(), value: "8".to_string() })
        .unwrap();
    assert_eq!(part.select_strings("t8", &hits).unwrap(), vec!["8".to_string()]);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_part_scenario_comp() {
    let dir = scratch_dir("test-part-comp");
    let mut part = Partition::create(&dir, "comp").unwrap();
    let f5: Vec<f32> = vec![0.5, 1.5, 2.5, 3.5, 4.5, 5.5, 6.5, 7.5];
    let d6: Vec<f64> = f5.iter().map(|v| 1.0 + (*v as f64)).collect();
    part.add_column("f5", DataType::Float, &f5).unwrap();
    part.add_column("d6", DataType::Double, &d6).unwrap();

    // 1 + f5 == d6 holds on every row
    let expr = QueryExpr::Comp(CompRange::cmp(
        MathTerm::bin(BinOp::Add, MathTerm::number(1.0), MathTerm::variable("f5")),
        CompOp::Eq,
        MathTerm::variable("d6"),
    ));
    assert_eq!(part.count(&expr).unwrap(), 8);

    // constant bounds reduce to an indexed range instead of a scan
    let expr = QueryExpr::Comp(CompRange::cmp(
        MathTerm::bin(BinOp::Add, MathTerm::number(1.0), MathTerm::variable("f5")),
        CompOp::Lt,
        MathTerm::number(3.0),
    ));
    assert_eq!(part.rows(&expr).unwrap(), vec![0, 1]);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_part_scenario_discrete() {
    let dir = scratch_dir("test-part-discrete");
    let mut part = Partition::create(&dir, "discrete").unwrap();
    let x: Vec<i32> = vec![1, 2, 3, 4, 5, 6, 7];
    part.add_column("x", DataType::Int, &x).unwrap();

    let expr =
        QueryExpr::Discrete(DiscreteRange::new("x", vec![1.0, 3.0, 5.0, 7.0]));
    let hits = part.evaluate(&expr).unwrap();
    assert_eq!(hits.cnt(), 4);
    assert_eq!(hits.to_positions(), vec![0, 2, 4, 6]);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_part_unknown_column() {
    let dir = scratch_dir("test-part-unknown");
    let mut part = Partition::create(&dir, "unknown").unwrap();
    part.add_column("a", DataType::Int, &[1_i32, 2, 3]).unwrap();

    let expr = QueryExpr::Range(ContinuousRange::eq("nosuch", 1.0));
    assert_eq!(part.count(&expr).unwrap(), 0);
    let expr = QueryExpr::or(
        QueryExpr::Range(ContinuousRange::eq("a", 2.0)),
        QueryExpr::Range(ContinuousRange::eq("nosuch", 1.0)),
    );
    assert_eq!(part.rows(&expr).unwrap(), vec![1]);

    fs::remove_dir_all(&dir).ok();
}

fn two_dir_partition(tag: &str) -> (Partition, ffi::OsString, ffi::OsString, ffi::OsString) {
    let active = scratch_dir(&format!("{}-active", tag));
    let backup = scratch_dir(&format!("{}-backup", tag));
    let srcdir = scratch_dir(&format!("{}-src", tag));

    let mut part = Partition::create(&active, "events").unwrap();
    let base: Vec<i32> = (0..100).collect();
    part.add_column("v", DataType::Int, &base).unwrap();
    part.fill_rids(1).unwrap();
    part.set_backup(&backup).unwrap();

    let mut src = Partition::create(&srcdir, "delta").unwrap();
    let extra: Vec<i32> = (100..150).collect();
    src.add_column("v", DataType::Int, &extra).unwrap();

    (part, active, backup, srcdir)
}

#[test]
fn test_part_append_rollback() {
    let (mut part, active, backup, srcdir) = two_dir_partition("test-part-rollback");
    let before = snapshot(&active);

    let n = part.append(&srcdir).unwrap();
    assert_eq!(n, 50);
    assert_eq!(part.nrows(), 150);
    assert_eq!(part.state(), State::Transition);
    // the appended rows answer queries right away
    assert_eq!(
        part.count(&QueryExpr::Range(ContinuousRange::ge("v", 120.0))).unwrap(),
        30
    );

    part.rollback().unwrap();
    assert_eq!(part.nrows(), 100);
    assert_eq!(part.state(), State::Stable);
    assert_eq!(part.rids().unwrap().len(), 100);

    // active directory is byte identical to the pre-append snapshot
    let after = snapshot(&active);
    assert_eq!(before.len(), after.len());
    for (name, bytes) in before.iter() {
        assert_eq!(after.get(name), Some(bytes), "file {}", name);
    }

    assert_eq!(
        part.count(&QueryExpr::Range(ContinuousRange::ge("v", 120.0))).unwrap(),
        0
    );

    fs::remove_dir_all(&active).ok();
    fs::remove_dir_all(&backup).ok();
    fs::remove_dir_all(&srcdir).ok();
}

#[test]
fn test_part_append_commit() {
    let (mut part, active, backup, srcdir) = two_dir_partition("test-part-commit");

    assert_eq!(part.append(&srcdir).unwrap(), 50);
    assert_eq!(part.nrows(), 150);
    part.commit().unwrap();
    assert_eq!(part.state(), State::Stable);
    assert_eq!(part.rids().unwrap().len(), 150);

    // both directories carry the committed row count
    let dirs = [part.active_dir().to_os_string(), active.clone(), backup.clone()];
    for dir in dirs.iter() {
        let meta = PartMeta::read(dir).unwrap();
        assert_eq!(meta.nrows, 150, "dir {:?}", dir);
    }

    // a reopened partition sees the appended rows
    let mut back = Partition::open(part.active_dir()).unwrap();
    assert_eq!(back.nrows(), 150);
    assert_eq!(
        back.count(&QueryExpr::Range(ContinuousRange::ge("v", 120.0))).unwrap(),
        30
    );

    fs::remove_dir_all(&active).ok();
    fs::remove_dir_all(&backup).ok();
    fs::remove_dir_all(&srcdir).ok();
}

#[test]
fn test_part_state_violations() {
    let (mut part, active, backup, srcdir) = two_dir_partition("test-part-states");

    // rollback and commit without a pending append
    assert!(matches!(part.rollback(), Err(Error::StateViolation(_, _))));
    part.commit().unwrap(); // commit in Stable is a no-op

    part.append(&srcdir).unwrap();
    assert_eq!(part.state(), State::Transition);
    // a second mutation cannot start during the transition
    assert!(matches!(part.append(&srcdir), Err(Error::StateViolation(_, _))));
    assert!(matches!(part.purge_inactive(), Err(Error::StateViolation(_, _))));
    assert!(matches!(part.reorder(), Err(Error::StateViolation(_, _))));

    part.rollback().unwrap();
    assert_eq!(part.state(), State::Stable);

    fs::remove_dir_all(&active).ok();
    fs::remove_dir_all(&backup).ok();
    fs::remove_dir_all(&srcdir).ok();
}

#[test]
fn test_part_deactivate_purge() {
    let dir = scratch_dir("test-part-purge");
    let mut part = Partition::create(&dir, "purge").unwrap();
    let vals: Vec<i32> = (0..50).collect();
    part.add_column("v", DataType::Int, &vals).unwrap();
    part.fill_rids(7).unwrap();

    part.deactivate(&[1, 3, 5, 7, 9]).unwrap();
    assert_eq!(part.nactive(), 45);
    // deactivated rows stop matching
    assert_eq!(
        part.count(&QueryExpr::Range(ContinuousRange::lt("v", 10.0))).unwrap(),
        5
    );

    let mask = part.mask().clone();
    let kept = part.purge_inactive().unwrap();
    assert_eq!(kept, 45);
    assert_eq!(part.nrows(), 45);
    assert_eq!(part.nactive(), 45);
    assert_eq!(part.rids().unwrap().len(), 45);

    // data file shrank to popcount(mask) * element width
    let data = fs::read(crate::column::data_file(&dir, "v")).unwrap();
    assert_eq!(data.len(), mask.cnt() * 4);

    // remaining rows are the ones that were active
    assert_eq!(
        part.count(&QueryExpr::Range(ContinuousRange::lt("v", 10.0))).unwrap(),
        5
    );
    assert_eq!(part.count(&QueryExpr::Range(ContinuousRange::ge("v", 0.0))).unwrap(), 45);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_part_not_and_xor() {
    let dir = scratch_dir("test-part-logic");
    let mut part = Partition::create(&dir, "logic").unwrap();
    let v: Vec<i32> = (0..10).collect();
    part.add_column("v", DataType::Int, &v).unwrap();

    let lt5 = QueryExpr::Range(ContinuousRange::lt("v", 5.0));
    let even = QueryExpr::Discrete(DiscreteRange::new(
        "v",
        vec![0.0, 2.0, 4.0, 6.0, 8.0],
    ));

    let hits = part.evaluate(&QueryExpr::not(lt5.clone())).unwrap();
    assert_eq!(hits.to_positions(), vec![5, 6, 7, 8, 9]);

    let hits = part.evaluate(&QueryExpr::xor(lt5.clone(), even.clone())).unwrap();
    assert_eq!(hits.to_positions(), vec![1, 3, 6, 8]);

    let hits = part.evaluate(&QueryExpr::andnot(lt5, even)).unwrap();
    assert_eq!(hits.to_positions(), vec![1, 3]);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_part_reorder() {
    let dir = scratch_dir("test-part-reorder");
    let mut part = Partition::create(&dir, "reorder").unwrap();
    // narrow-range key first, then the wide key within it
    let narrow: Vec<i32> = (0..40).map(|i| i % 2).collect();
    let wide: Vec<i32> = (0..40).rev().collect();
    let tag: Vec<f64> = (0..40).map(|i| i as f64).collect();
    part.add_column("narrow", DataType::Int, &narrow).unwrap();
    part.add_column("wide", DataType::Int, &wide).unwrap();
    part.add_column("tag", DataType::Double, &tag).unwrap();

    let expr = QueryExpr::Range(ContinuousRange::between("wide", 10.0, 19.0));
    let before = part.count(&expr).unwrap();

    part.reorder().unwrap();
    assert_eq!(part.state(), State::Stable);

    // rows are sorted by (narrow, wide)
    let n = part.column("narrow").unwrap().read_values(40).unwrap();
    let w = part.column("wide").unwrap().read_values(40).unwrap();
    let pairs: Vec<(i64, i64)> =
        n.iter().zip(w.iter()).map(|(a, b)| (*a as i64, *b as i64)).collect();
    let mut sorted = pairs.clone();
    sorted.sort_unstable();
    assert_eq!(pairs, sorted);

    // every row survived, with its tag still aligned to the wide key
    assert_eq!(part.count(&expr).unwrap(), before);
    let t = part.column("tag").unwrap().read_values(40).unwrap();
    for (row, wv) in w.iter().enumerate() {
        assert_eq!(t[row], 39.0 - wv, "row {}", row);
    }

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_part_join_unsupported() {
    let dir = scratch_dir("test-part-join");
    let mut part = Partition::create(&dir, "join").unwrap();
    part.add_column("a", DataType::Int, &[1_i32, 2]).unwrap();

    let expr = QueryExpr::Join(crate::query::JoinSpec {
        left_col: "a".to_string(),
        right_col: "b".to_string(),
        term: None,
    });
    assert!(matches!(part.evaluate(&expr), Err(Error::NotImplemented(_, _))));

    fs::remove_dir_all(&dir).ok();
}
