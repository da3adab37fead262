use rand::random;

use std::{env, fs, path::PathBuf};

use super::*;

fn scratch_file(name: &str, content: &[u8]) -> ffi::OsString {
    let mut loc: PathBuf = env::temp_dir();
    loc.push(format!("{}-{:x}", name, random::<u64>()));
    fs::write(&loc, content).unwrap();
    loc.into_os_string()
}

#[test]
fn test_storage_heap() {
    let storage = Storage::from_vec(vec![1, 2, 3, 4]);
    assert_eq!(storage.len(), 4);
    assert_eq!(storage.as_slice(), &[1, 2, 3, 4]);
    assert!(!storage.is_file_mapped());

    let copy = storage.to_heap_copy();
    assert_eq!(copy.as_slice(), storage.as_slice());
}

#[test]
fn test_storage_sharing() {
    let one = Arc::new(Storage::from_vec(vec![9; 16]));
    assert!(!is_shared(&one));
    let two = Arc::clone(&one);
    assert!(is_shared(&one));
    drop(two);
    assert!(!is_shared(&one));
}

#[test]
fn test_filemgr_identity() {
    let file = scratch_file("test-filemgr-identity", b"0123456789");

    let a = filemgr().get_file(&file).unwrap();
    let b = filemgr().get_file(&file).unwrap();
    // unchanged file, same storage by identity
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.as_slice(), b"0123456789");

    filemgr().unload(&file);
    fs::remove_file(&file).ok();
}

#[test]
fn test_filemgr_segment() {
    let file = scratch_file("test-filemgr-segment", b"abcdefghij");

    let seg = filemgr().get_file_segment(&file, 2, 6).unwrap();
    assert_eq!(seg.as_slice(), b"cdef");

    // ranges past the end clamp to the file size
    let seg = filemgr().get_file_segment(&file, 8, 100).unwrap();
    assert_eq!(seg.as_slice(), b"ij");
    let seg = filemgr().get_file_segment(&file, 50, 100).unwrap();
    assert_eq!(seg.len(), 0);

    filemgr().unload(&file);
    fs::remove_file(&file).ok();
}

#[test]
fn test_filemgr_missing() {
    let mut loc = env::temp_dir();
    loc.push(format!("no-such-file-{:x}", random::<u64>()));
    let res = filemgr().get_file(loc.as_os_str());
    assert!(matches!(res, Err(Error::NotFound(_, _))));
}

#[test]
fn test_filemgr_reload_on_change() {
    let file = scratch_file("test-filemgr-reload", b"before-change!");

    let a = filemgr().get_file(&file).unwrap();
    assert_eq!(a.as_slice(), b"before-change!");

    fs::write(&file, b"after--change, longer").unwrap();
    let b = filemgr().get_file(&file).unwrap();
    assert_eq!(b.as_slice(), b"after--change, longer");
    // the old storage stays valid for its holders
    assert_eq!(a.as_slice(), b"before-change!");

    filemgr().unload(&file);
    fs::remove_file(&file).ok();
}
