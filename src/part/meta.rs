//! Module implement the partition metadata file.
//!
//! `-part.txt` is a line oriented `key = value` file, a `BEGIN HEADER` /
//! `END HEADER` block naming the data set, its row and column counts and
//! a timestamp, followed by one `Begin Column` / `End Column` block per
//! column.

use chrono::Utc;

use std::{convert::TryFrom, ffi, fs, path};

use crate::{column::DataType, util, Error, Result};

pub(crate) const META_FILE: &str = "-part.txt";
pub(crate) const MASK_FILE: &str = "-part.msk";
pub(crate) const RIDS_FILE: &str = "rids";

pub(crate) fn meta_file(dir: &ffi::OsStr) -> ffi::OsString {
    let loc: path::PathBuf = [dir.to_os_string(), META_FILE.into()].iter().collect();
    loc.into_os_string()
}

pub(crate) fn mask_file(dir: &ffi::OsStr) -> ffi::OsString {
    let loc: path::PathBuf = [dir.to_os_string(), MASK_FILE.into()].iter().collect();
    loc.into_os_string()
}

pub(crate) fn rids_file(dir: &ffi::OsStr) -> ffi::OsString {
    let loc: path::PathBuf = [dir.to_os_string(), RIDS_FILE.into()].iter().collect();
    loc.into_os_string()
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ColumnMeta {
    pub name: String,
    pub dtype: DataType,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct PartMeta {
    pub name: String,
    pub nrows: u32,
    pub timestamp: i64,
    pub columns: Vec<ColumnMeta>,
}

impl PartMeta {
    pub fn new(name: &str) -> PartMeta {
        PartMeta {
            name: name.to_string(),
            nrows: 0,
            timestamp: Utc::now().timestamp(),
            columns: vec![],
        }
    }

    pub fn read(dir: &ffi::OsStr) -> Result<PartMeta> {
        let file = meta_file(dir);
        let text = match fs::read_to_string(&file) {
            Ok(text) => text,
            Err(err) => return err_at!(NotFound, msg: "{:?} {}", file, err),
        };

        let mut meta = PartMeta::new("");
        let mut column: Option<ColumnMeta> = None;
        for line in text.lines() {
            let line = line.trim();
            match line {
                "" | "BEGIN HEADER" | "END HEADER" => continue,
                "Begin Column" => {
                    column = Some(ColumnMeta {
                        name: String::new(),
                        dtype: DataType::Int,
                        minimum: None,
                        maximum: None,
                    });
                    continue;
                }
                "End Column" => {
                    match column.take() {
                        Some(cm) if !cm.name.is_empty() => meta.columns.push(cm),
                        _ => return err_at!(InvalidFile, msg: "unnamed column block"),
                    }
                    continue;
                }
                _ => (),
            }

            let mut kv = line.splitn(2, '=');
            let key = kv.next().unwrap_or("").trim();
            let value = match kv.next() {
                Some(value) => value.trim(),
                None => return err_at!(InvalidFile, msg: "meta line {:?}", line),
            };
            match &mut column {
                Some(cm) => match key {
                    "name" => cm.name = value.to_string(),
                    "data_type" => {
                        let code = value.chars().next().unwrap_or(' ');
                        cm.dtype = DataType::try_from(code)?;
                    }
                    "minimum" => {
                        cm.minimum = Some(err_at!(FailConvert, value.parse::<f64>())?)
                    }
                    "maximum" => {
                        cm.maximum = Some(err_at!(FailConvert, value.parse::<f64>())?)
                    }
                    _ => (), // tolerate unknown keys
                },
                None => match key {
                    "DataSet.Name" => meta.name = value.to_string(),
                    "Number_of_rows" => {
                        meta.nrows = err_at!(FailConvert, value.parse::<u32>())?
                    }
                    "Number_of_columns" => (), // derived from the column blocks
                    "Timestamp" => {
                        meta.timestamp = err_at!(FailConvert, value.parse::<i64>())?
                    }
                    _ => (),
                },
            }
        }

        if meta.name.is_empty() {
            return err_at!(InvalidFile, msg: "{:?} has no DataSet.Name", file);
        }
        Ok(meta)
    }

    pub fn write(&self, dir: &ffi::OsStr) -> Result<()> {
        let mut text = String::new();
        text.push_str("BEGIN HEADER\n");
        text.push_str(&format!("DataSet.Name = {}\n", self.name));
        text.push_str(&format!("Number_of_columns = {}\n", self.columns.len()));
        text.push_str(&format!("Number_of_rows = {}\n", self.nrows));
        text.push_str(&format!("Timestamp = {}\n", self.timestamp));
        text.push_str("END HEADER\n");
        for cm in self.columns.iter() {
            text.push_str("Begin Column\n");
            text.push_str(&format!("name = {}\n", cm.name));
            text.push_str(&format!("data_type = {}\n", cm.dtype));
            if let Some(min) = cm.minimum {
                text.push_str(&format!("minimum = {}\n", min));
            }
            if let Some(max) = cm.maximum {
                text.push_str(&format!("maximum = {}\n", max));
            }
            text.push_str("End Column\n");
        }

        let file = meta_file(dir);
        let mut fd = util::create_file_w(&file)?;
        util::sync_write(&mut fd, text.as_bytes())?;
        Ok(())
    }

    pub fn touch(&mut self) {
        self.timestamp = Utc::now().timestamp();
    }
}

#[cfg(test)]
#[path = "meta_test.rs"]
mod meta_test;
