use rand::random;

use std::env;

use super::*;

#[test]
fn test_meta_roundtrip() {
    let dir: ffi::OsString = {
        let mut loc = env::temp_dir();
        loc.push(format!("test-meta-roundtrip-{:x}", random::<u64>()));
        fs::create_dir_all(&loc).unwrap();
        loc.into_os_string()
    };

    let meta = PartMeta {
        name: "events".to_string(),
        nrows: 1234,
        timestamp: 1_700_000_000,
        columns: vec![
            ColumnMeta {
                name: "s1".to_string(),
                dtype: DataType::Int,
                minimum: Some(1.0),
                maximum: Some(11.0),
            },
            ColumnMeta {
                name: "note".to_string(),
                dtype: DataType::Text,
                minimum: None,
                maximum: None,
            },
        ],
    };
    meta.write(&dir).unwrap();

    let text = fs::read_to_string(meta_file(&dir)).unwrap();
    assert!(text.starts_with("BEGIN HEADER\n"));
    assert!(text.contains("DataSet.Name = events\n"));
    assert!(text.contains("Number_of_columns = 2\n"));
    assert!(text.contains("Number_of_rows = 1234\n"));
    assert!(text.contains("data_type = I\n"));
    assert!(text.contains("data_type = T\n"));

    let back = PartMeta::read(&dir).unwrap();
    assert_eq!(back, meta);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_meta_missing() {
    let dir: ffi::OsString = {
        let mut loc = env::temp_dir();
        loc.push(format!("test-meta-missing-{:x}", random::<u64>()));
        loc.into_os_string()
    };
    assert!(matches!(PartMeta::read(&dir), Err(Error::NotFound(_, _))));
}
