use rand::random;

use std::env;

use super::*;

fn scratch_file(name: &str) -> ffi::OsString {
    let mut loc = env::temp_dir();
    loc.push(format!("{}-{:x}", name, random::<u64>()));
    loc.into_os_string()
}

#[test]
fn test_dict_ids() {
    let mut dict = Dictionary::new();
    assert!(dict.is_empty());

    assert_eq!(dict.insert("blue"), 1);
    assert_eq!(dict.insert("red"), 2);
    assert_eq!(dict.insert("blue"), 1); // insertion is idempotent
    assert_eq!(dict.insert("green"), 3);
    assert_eq!(dict.len(), 3);

    assert_eq!(dict.find("red"), 2);
    assert_eq!(dict.find("black"), 0); // 0 is the NULL id
    assert_eq!(dict.key_of(0), None);
    assert_eq!(dict.key_of(1), Some("blue"));
    assert_eq!(dict.key_of(3), Some("green"));
    assert_eq!(dict.key_of(4), None);
}

#[test]
fn test_dict_sorted_keys() {
    let mut dict = Dictionary::new();
    for key in ["zebra", "apple", "mango"].iter() {
        dict.insert(key);
    }
    let sorted = dict.sorted_keys();
    assert_eq!(sorted, vec![("apple", 2), ("mango", 3), ("zebra", 1)]);
}

#[test]
fn test_dict_save_load() {
    let mut dict = Dictionary::new();
    for key in ["one", "two", "three", "four"].iter() {
        dict.insert(key);
    }

    let file = scratch_file("test-dict-save-load");
    dict.save(&file).unwrap();
    let loaded = Dictionary::load(&file).unwrap();
    fs::remove_file(&file).ok();

    assert_eq!(loaded.len(), dict.len());
    for (key, id) in dict.iter() {
        assert_eq!(loaded.find(key), id, "key {}", key);
        assert_eq!(loaded.key_of(id), Some(key));
    }
}
