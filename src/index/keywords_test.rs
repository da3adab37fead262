use rand::random;

use std::{env, fs};

use super::*;
use crate::index::Index;

fn scratch_file(name: &str, ext: &str) -> ffi::OsString {
    let mut loc = env::temp_dir();
    loc.push(format!("{}-{:x}.{}", name, random::<u64>(), ext));
    loc.into_os_string()
}

const TDLIST: &str = "\
# term-document list
-- both comment styles are ignored
apple : 0, 2, 4
banana : 1, \\
 3, 5
cherry : 2
apple : 6
";

#[test]
fn test_keywords_tdlist() {
    let file = scratch_file("test-keywords-tdlist", "tdlist");
    fs::write(&file, TDLIST).unwrap();

    let mut index = Keywords::from_tdlist(&file, 8, None).unwrap();
    fs::remove_file(&file).ok();

    assert_eq!(index.nterms(), 3);
    assert_eq!(index.nrows(), 8);
    assert_eq!(index.nobs(), 4); // terms plus the null slot

    // continuation line folded into banana, repeated term merged
    assert_eq!(index.search("apple").unwrap().to_positions(), vec![0, 2, 4, 6]);
    assert_eq!(index.search("banana").unwrap().to_positions(), vec![1, 3, 5]);
    assert_eq!(index.search("cherry").unwrap().to_positions(), vec![2]);

    // unknown terms match nothing, at the full row count
    let hits = index.search("durian").unwrap();
    assert_eq!((hits.size(), hits.cnt()), (8, 0));

    // row 7 carries no term at all
    assert_eq!(index.null_mask().unwrap().to_positions(), vec![7]);
}

#[test]
fn test_keywords_id_column() {
    let file = scratch_file("test-keywords-idcol", "tdlist");
    fs::write(&file, "alpha : 100, 300\nbeta : 200\n").unwrap();

    // external ids live in an id column, rerouted to row positions
    let ids: Vec<u32> = vec![300, 100, 200, 400];
    let mut index = Keywords::from_tdlist(&file, 4, Some(&ids)).unwrap();
    fs::remove_file(&file).ok();

    assert_eq!(index.search("alpha").unwrap().to_positions(), vec![0, 1]);
    assert_eq!(index.search("beta").unwrap().to_positions(), vec![2]);
    assert_eq!(index.null_mask().unwrap().to_positions(), vec![3]);
}

#[test]
fn test_keywords_write_read() {
    let file = scratch_file("test-keywords-write", "tdlist");
    fs::write(&file, TDLIST).unwrap();
    let mut index = Keywords::from_tdlist(&file, 8, None).unwrap();
    fs::remove_file(&file).ok();

    let idx_file = scratch_file("test-keywords-write", "idx");
    index.write(&idx_file).unwrap();

    let data = fs::read(&idx_file).unwrap();
    assert_eq!(&data[..5], b"#IBIS");
    assert_eq!(data[5], 18); // encoding tag

    let mut loaded = crate::index::open_index(&idx_file, 8).unwrap();
    assert_eq!(loaded.itype(), IndexType::Keywords);
    for term in ["apple", "banana", "cherry", "durian"].iter() {
        assert_eq!(
            index.search(term).unwrap(),
            loaded.search(term).unwrap(),
            "term {}",
            term
        );
    }

    crate::storage::filemgr().unload(&idx_file);
    fs::remove_file(&idx_file).ok();
    fs::remove_file(terms_file_of(&idx_file)).ok();
}
