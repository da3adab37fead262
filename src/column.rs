//! Module implement one vertical slice of a partition.
//!
//! A column owns its raw data file and at most one loaded index. Data
//! files hold little-endian fixed width numbers, category columns hold
//! 4-byte dictionary ids with the dictionary in a `.dic` sidecar, text
//! columns hold length-prefixed strings with a `.tdlist` term-document
//! file feeding the keyword index.
//!
//! Indexes load lazily. A missing or corrupt `.idx` file is rebuilt from
//! the column data on first access.

use log::{info, warn};

use std::{convert::TryFrom, ffi, fmt, fs, path, result};

use crate::{
    array::{Array, Element},
    dict::Dictionary,
    index::{self, Direkte, Fuzz, Index, Keywords, Relic},
    query::{ContinuousRange, DiscreteRange},
    storage::filemgr,
    util, write_file, Bitvector, Error, Result,
};

// distinct value count from which the interval-equality encoding takes
// over from plain equality encoding.
const FUZZ_THRESHOLD: usize = 32;
// largest direct-encoded integer domain.
const DIREKTE_DOMAIN: f64 = 256.0;

/// Data type of a column, the letter codes are used in the metadata file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataType {
    /// `B`, signed 8-bit integer.
    Byte,
    /// `S`, signed 16-bit integer.
    Short,
    /// `I`, signed 32-bit integer.
    Int,
    /// `L`, signed 64-bit integer.
    Long,
    /// `F`, 32-bit float.
    Float,
    /// `D`, 64-bit float.
    Double,
    /// `K`, categorical string, stored as 4-byte dictionary ids.
    Category,
    /// `T`, free text, stored length-prefixed, indexed by keywords.
    Text,
}

impl DataType {
    pub fn code(&self) -> char {
        match self {
            DataType::Byte => 'B',
            DataType::Short => 'S',
            DataType::Int => 'I',
            DataType::Long => 'L',
            DataType::Float => 'F',
            DataType::Double => 'D',
            DataType::Category => 'K',
            DataType::Text => 'T',
        }
    }

    /// Fixed row width in bytes, None for text.
    pub fn width(&self) -> Option<usize> {
        match self {
            DataType::Byte => Some(1),
            DataType::Short => Some(2),
            DataType::Int => Some(4),
            DataType::Long => Some(8),
            DataType::Float => Some(4),
            DataType::Double => Some(8),
            DataType::Category => Some(4),
            DataType::Text => None,
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            DataType::Byte | DataType::Short | DataType::Int | DataType::Long
        )
    }
}

impl TryFrom<char> for DataType {
    type Error = Error;

    fn try_from(code: char) -> Result<DataType> {
        match code {
            'B' => Ok(DataType::Byte),
            'S' => Ok(DataType::Short),
            'I' => Ok(DataType::Int),
            'L' => Ok(DataType::Long),
            'F' => Ok(DataType::Float),
            'D' => Ok(DataType::Double),
            'K' => Ok(DataType::Category),
            'T' => Ok(DataType::Text),
            code => err_at!(InvalidInput, msg: "data type {:?}", code),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "{}", self.code())
    }
}

// path builders under the column's directory
pub(crate) fn data_file(dir: &ffi::OsStr, name: &str) -> ffi::OsString {
    let loc: path::PathBuf = [dir.to_os_string(), name.into()].iter().collect();
    loc.into_os_string()
}

pub(crate) fn index_file(dir: &ffi::OsStr, name: &str) -> ffi::OsString {
    let loc: path::PathBuf =
        [dir.to_os_string(), format!("{}.idx", name).into()].iter().collect();
    loc.into_os_string()
}

pub(crate) fn dict_file(dir: &ffi::OsStr, name: &str) -> ffi::OsString {
    let loc: path::PathBuf =
        [dir.to_os_string(), format!("{}.dic", name).into()].iter().collect();
    loc.into_os_string()
}

pub(crate) fn tdlist_file(dir: &ffi::OsStr, name: &str) -> ffi::OsString {
    let loc: path::PathBuf =
        [dir.to_os_string(), format!("{}.tdlist", name).into()].iter().collect();
    loc.into_os_string()
}

fn terms_file(dir: &ffi::OsStr, name: &str) -> ffi::OsString {
    let loc: path::PathBuf =
        [dir.to_os_string(), format!("{}.terms", name).into()].iter().collect();
    loc.into_os_string()
}

/// One column, its data file handle and its index.
pub struct Column {
    name: String,
    dtype: DataType,
    dir: ffi::OsString,
    min: Option<f64>,
    max: Option<f64>,
    index: Option<Box<dyn Index>>,
    dict: Option<Dictionary>,
}

impl fmt::Debug for Column {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "column<{}:{}>", self.name, self.dtype)
    }
}

impl Column {
    pub fn new(
        dir: &ffi::OsStr,
        name: &str,
        dtype: DataType,
        min: Option<f64>,
        max: Option<f64>,
    ) -> Column {
        Column {
            name: name.to_string(),
            dtype,
            dir: dir.to_os_string(),
            min,
            max,
            index: None,
            dict: None,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn min(&self) -> Option<f64> {
        self.min
    }

    pub fn max(&self) -> Option<f64> {
        self.max
    }

    /// Re-point the column at `dir`, dropping the loaded index. Used when
    /// the partition switches its active directory.
    pub(crate) fn set_dir(&mut self, dir: &ffi::OsStr) {
        self.dir = dir.to_os_string();
        self.index = None;
        self.dict = None;
    }

    /// Drop the loaded index, forcing a reload on next use.
    pub(crate) fn unload_index(&mut self) {
        self.index = None;
    }

    pub(crate) fn set_minmax(&mut self, min: Option<f64>, max: Option<f64>) {
        self.min = min;
        self.max = max;
    }

    /// Typed view over the raw data file.
    pub fn array<T>(&self) -> Result<Array<T>>
    where
        T: Element,
    {
        let file = data_file(&self.dir, &self.name);
        let storage = filemgr().get_file(&file)?;
        let n = storage.len();
        Array::from_storage(storage, 0, n)
    }

    /// All row values as doubles, category rows read as their ids, NaN
    /// where a text column is asked for numbers.
    pub fn read_values(&self, nrows: usize) -> Result<Vec<f64>> {
        let mut vals = match self.dtype {
            DataType::Byte => self.array::<i8>()?.iter().map(|v| v.to_f64()).collect(),
            DataType::Short => {
                self.array::<i16>()?.iter().map(|v| v.to_f64()).collect()
            }
            DataType::Int => self.array::<i32>()?.iter().map(|v| v.to_f64()).collect(),
            DataType::Long => {
                self.array::<i64>()?.iter().map(|v| v.to_f64()).collect()
            }
            DataType::Float => {
                self.array::<f32>()?.iter().map(|v| v.to_f64()).collect()
            }
            DataType::Double => {
                self.array::<f64>()?.iter().map(|v| v.to_f64()).collect()
            }
            DataType::Category => {
                self.array::<u32>()?.iter().map(|v| v.to_f64()).collect()
            }
            DataType::Text => vec![f64::NAN; nrows],
        };
        vals.resize(nrows, f64::NAN);
        Ok(vals)
    }

    /// The string rows of a text column.
    pub fn read_strings(&self, nrows: usize) -> Result<Vec<String>> {
        let file = data_file(&self.dir, &self.name);
        let storage = filemgr().get_file(&file)?;
        let buf = storage.as_slice();

        let mut out = Vec::with_capacity(nrows);
        let mut at = 0;
        while at + 4 <= buf.len() && out.len() < nrows {
            let mut quad = [0_u8; 4];
            quad.copy_from_slice(&buf[at..at + 4]);
            let n = u32::from_le_bytes(quad) as usize;
            at += 4;
            if at + n > buf.len() {
                return err_at!(IOError, msg: "string row reaches {}", at + n);
            }
            let s = err_at!(FailConvert, std::str::from_utf8(&buf[at..at + n]))?;
            out.push(s.to_string());
            at += n;
        }
        out.resize(nrows, String::new());
        Ok(out)
    }

    fn load_dict(&mut self) -> Result<&Dictionary> {
        if self.dict.is_none() {
            let file = dict_file(&self.dir, &self.name);
            self.dict = Some(Dictionary::load(&file)?);
        }
        Ok(self.dict.as_ref().unwrap())
    }
}

impl Column {
    // load the persisted index, rebuilding it from data when the file is
    // missing or does not parse.
    fn load_index(&mut self, nrows: u32) -> Result<&mut Box<dyn Index>> {
        if self.index.is_none() {
            let file = index_file(&self.dir, &self.name);
            let loaded = match path::Path::new(&file).is_file() {
                true => match index::open_index(&file, nrows) {
                    Ok(index) => Some(index),
                    Err(Error::CorruptIndex(p, m)) => {
                        warn!(
                            target: "column",
                            "{} discarding index {:?}: {},{}", self.name, file, p, m
                        );
                        fs::remove_file(&file).ok();
                        filemgr().unload(&file);
                        None
                    }
                    Err(err) => return Err(err),
                },
                false => None,
            };
            let index = match loaded {
                Some(index) => index,
                None => self.build_index(nrows)?,
            };
            self.index = Some(index);
        }
        Ok(self.index.as_mut().unwrap())
    }

    fn build_index(&mut self, nrows: u32) -> Result<Box<dyn Index>> {
        let file = index_file(&self.dir, &self.name);
        let mut index: Box<dyn Index> = match self.dtype {
            DataType::Text => {
                let tdlist = tdlist_file(&self.dir, &self.name);
                Box::new(Keywords::from_tdlist(&tdlist, nrows, None)?)
            }
            DataType::Category => {
                let dict_len = self.load_dict()?.len();
                let vals = self.read_values(nrows as usize)?;
                Box::new(Direkte::build(&vals, dict_len as u32 + 1))
            }
            dtype => {
                let vals = self.read_values(nrows as usize)?;
                let distinct = distinct_count(&vals);
                let dense_ints = dtype.is_integer()
                    && self.min.unwrap_or(-1.0) >= 0.0
                    && self.max.unwrap_or(f64::INFINITY) < DIREKTE_DOMAIN;
                if dense_ints {
                    let domain = self.max.unwrap_or(0.0) as u32 + 1;
                    Box::new(Direkte::build(&vals, domain))
                } else if distinct >= FUZZ_THRESHOLD {
                    Box::new(Fuzz::build(&vals)?)
                } else {
                    Box::new(Relic::build(&vals))
                }
            }
        };
        info!(
            target: "column",
            "{} built {:?} index, {} bitmaps", self.name, index.itype(),
            index.nobs()
        );
        index.write(&file)?;
        Ok(index)
    }

    /// Bitmap of rows satisfying `range`, within `mask`.
    pub fn evaluate(&mut self, range: &ContinuousRange, mask: &Bitvector) -> Result<Bitvector> {
        let index = self.load_index(mask.size() as u32)?;
        let hits = index.evaluate(range)?;
        hits.and(mask)
    }

    /// Bitmap of rows whose value is in the discrete set, within `mask`.
    pub fn evaluate_discrete(
        &mut self,
        range: &DiscreteRange,
        mask: &Bitvector,
    ) -> Result<Bitvector> {
        let index = self.load_index(mask.size() as u32)?;
        let hits = index.evaluate_discrete(range)?;
        hits.and(mask)
    }

    /// Bitmap of rows equal to the string `value`, within `mask`. For a
    /// category column the dictionary resolves the value, for a text
    /// column the keyword index is searched.
    pub fn evaluate_string(&mut self, value: &str, mask: &Bitvector) -> Result<Bitvector> {
        match self.dtype {
            DataType::Category => {
                let id = self.load_dict()?.find(value);
                match id {
                    0 => Ok(Bitvector::zeros(mask.size())),
                    id => {
                        let range = ContinuousRange::eq(&self.name, id as f64);
                        self.evaluate(&range, mask)
                    }
                }
            }
            DataType::Text => {
                let index = self.load_index(mask.size() as u32)?;
                let hits = index.search(value)?;
                hits.and(mask)
            }
            _ => err_at!(InvalidInput, msg: "{} is not a string column", self.name),
        }
    }

    /// Estimated bytes of bitmaps to read for `range`.
    pub fn estimate_cost(&mut self, range: &ContinuousRange, nrows: u32) -> f64 {
        match self.load_index(nrows) {
            Ok(index) => index.estimate_cost(range),
            Err(_) => f64::MAX,
        }
    }
}

fn distinct_count(vals: &[f64]) -> usize {
    let mut sorted: Vec<f64> = vals.iter().copied().filter(|v| !v.is_nan()).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    sorted.dedup();
    sorted.len()
}

impl Column {
    /// Stream `n_new` rows of this column from `src_dir` onto the end of
    /// the column file in `dest_dir`, which holds `n_old` rows. `buf` is
    /// scratch space reused across columns. Returns the appended count.
    pub fn append(
        &self,
        dest_dir: &ffi::OsStr,
        src_dir: &ffi::OsStr,
        n_old: u32,
        n_new: u32,
        buf: &mut Vec<u8>,
    ) -> Result<u32> {
        // the stale index does not describe the grown column
        fs::remove_file(index_file(dest_dir, &self.name)).ok();
        fs::remove_file(terms_file(dest_dir, &self.name)).ok();

        let appended = match self.dtype {
            DataType::Text => self.append_text(dest_dir, src_dir, n_old, n_new, buf)?,
            DataType::Category => {
                self.append_category(dest_dir, src_dir, n_old, n_new, buf)?
            }
            dtype => {
                let width = dtype.width().unwrap();
                let dest = data_file(dest_dir, &self.name);
                let src = data_file(src_dir, &self.name);

                buf.clear();
                match fs::read(&src) {
                    Ok(data) => buf.extend_from_slice(&data),
                    Err(_) => (), // column absent in source, pad below
                }
                buf.resize((n_new as usize) * width, 0);

                let mut fd = util::open_file_a(&dest)?;
                let have = util::file_size(&dest) as usize;
                let want = (n_old as usize) * width;
                if have < want {
                    // square off columns that were short in the old data
                    let pad = vec![0_u8; want - have];
                    write_file!(fd, &pad, &dest, "column pad")?;
                }
                write_file!(fd, &buf, &dest, "column append")?;
                err_at!(IOError, fd.sync_all())?;
                n_new
            }
        };

        filemgr().unload(&data_file(dest_dir, &self.name));
        Ok(appended)
    }

    fn append_text(
        &self,
        dest_dir: &ffi::OsStr,
        src_dir: &ffi::OsStr,
        n_old: u32,
        n_new: u32,
        buf: &mut Vec<u8>,
    ) -> Result<u32> {
        let dest = data_file(dest_dir, &self.name);
        let src = data_file(src_dir, &self.name);

        buf.clear();
        if let Ok(data) = fs::read(&src) {
            buf.extend_from_slice(&data);
        }
        let mut fd = util::open_file_a(&dest)?;
        write_file!(fd, &buf, &dest, "text append")?;
        err_at!(IOError, fd.sync_all())?;

        // carry the term-document list over, shifting row ids
        let src_td = tdlist_file(src_dir, &self.name);
        if path::Path::new(&src_td).is_file() {
            let text = err_at!(IOError, fs::read_to_string(&src_td))?;
            let mut shifted = String::new();
            for line in text.lines() {
                let t = line.trim();
                if t.is_empty() || t.starts_with('#') || t.starts_with("--") {
                    continue;
                }
                let mut parts = t.splitn(2, ':');
                let term = parts.next().unwrap_or("").trim();
                let ids = parts.next().unwrap_or("");
                let ids: Vec<String> = ids
                    .split(',')
                    .filter_map(|s| s.trim().parse::<u32>().ok())
                    .map(|id| (id + n_old).to_string())
                    .collect();
                if !term.is_empty() && !ids.is_empty() {
                    shifted.push_str(&format!("{} : {}\n", term, ids.join(", ")));
                }
            }
            let dest_td = tdlist_file(dest_dir, &self.name);
            let mut fd = util::open_file_a(&dest_td)?;
            write_file!(fd, shifted.as_bytes(), &dest_td, "tdlist append")?;
            err_at!(IOError, fd.sync_all())?;
        }
        Ok(n_new)
    }

    fn append_category(
        &self,
        dest_dir: &ffi::OsStr,
        src_dir: &ffi::OsStr,
        n_old: u32,
        n_new: u32,
        buf: &mut Vec<u8>,
    ) -> Result<u32> {
        let dest = data_file(dest_dir, &self.name);
        let src = data_file(src_dir, &self.name);

        // union the dictionaries, then remap source ids through the union
        let mut dict = match path::Path::new(&dict_file(dest_dir, &self.name)).is_file()
        {
            true => Dictionary::load(&dict_file(dest_dir, &self.name))?,
            false => Dictionary::new(),
        };
        let src_dict = match path::Path::new(&dict_file(src_dir, &self.name)).is_file()
        {
            true => Dictionary::load(&dict_file(src_dir, &self.name))?,
            false => Dictionary::new(),
        };
        let remap: Vec<u32> = {
            let mut remap = vec![0_u32];
            for (key, _) in src_dict.iter() {
                remap.push(dict.insert(key));
            }
            remap
        };

        buf.clear();
        if let Ok(data) = fs::read(&src) {
            for chunk in data.chunks_exact(4) {
                let mut quad = [0_u8; 4];
                quad.copy_from_slice(chunk);
                let id = u32::from_le_bytes(quad);
                let id = remap.get(id as usize).copied().unwrap_or(0);
                buf.extend_from_slice(&id.to_le_bytes());
            }
        }
        buf.resize((n_new as usize) * 4, 0);

        let mut fd = util::open_file_a(&dest)?;
        let have = util::file_size(&dest) as usize;
        let want = (n_old as usize) * 4;
        if have < want {
            let pad = vec![0_u8; want - have];
            write_file!(fd, &pad, &dest, "category pad")?;
        }
        write_file!(fd, &buf, &dest, "category append")?;
        err_at!(IOError, fd.sync_all())?;

        dict.save(&dict_file(dest_dir, &self.name))?;
        Ok(n_new)
    }

    /// Rewrite the column file under `dest_dir` keeping only the rows
    /// set in `mask`. Returns the number of rows kept.
    pub fn save_selected(
        &self,
        mask: &Bitvector,
        dest_dir: &ffi::OsStr,
        buf: &mut Vec<u8>,
    ) -> Result<u32> {
        let dest = data_file(dest_dir, &self.name);
        fs::remove_file(index_file(dest_dir, &self.name)).ok();
        fs::remove_file(terms_file(dest_dir, &self.name)).ok();

        let kept = match self.dtype.width() {
            Some(width) => {
                let data = err_at!(IOError, fs::read(&dest), "{:?}", dest)?;
                buf.clear();
                let mut kept = 0;
                for row in mask.iter_ones() {
                    let at = row * width;
                    if at + width <= data.len() {
                        buf.extend_from_slice(&data[at..at + width]);
                        kept += 1;
                    }
                }
                let mut fd = util::create_file_w(&dest)?;
                util::sync_write(&mut fd, buf)?;
                kept
            }
            None => self.save_selected_text(mask, dest_dir, &dest)?,
        };

        filemgr().unload(&dest);
        Ok(kept)
    }

    fn save_selected_text(
        &self,
        mask: &Bitvector,
        dest_dir: &ffi::OsStr,
        dest: &ffi::OsStr,
    ) -> Result<u32> {
        let rows = self.read_strings(mask.size())?;
        let mut out = vec![];
        let mut old_to_new = vec![u32::MAX; mask.size()];
        let mut kept = 0_u32;
        for row in mask.iter_ones() {
            old_to_new[row] = kept;
            kept += 1;
            let s = rows[row].as_bytes();
            out.extend_from_slice(&(s.len() as u32).to_le_bytes());
            out.extend_from_slice(s);
        }
        let mut fd = util::create_file_w(dest)?;
        util::sync_write(&mut fd, &out)?;

        // renumber the term-document rows
        let td = tdlist_file(dest_dir, &self.name);
        if path::Path::new(&td).is_file() {
            let text = err_at!(IOError, fs::read_to_string(&td))?;
            let mut renumbered = String::new();
            for line in text.lines() {
                let t = line.trim();
                if t.is_empty() || t.starts_with('#') || t.starts_with("--") {
                    continue;
                }
                let mut parts = t.splitn(2, ':');
                let term = parts.next().unwrap_or("").trim();
                let ids: Vec<String> = parts
                    .next()
                    .unwrap_or("")
                    .split(',')
                    .filter_map(|s| s.trim().parse::<u32>().ok())
                    .filter_map(|id| old_to_new.get(id as usize).copied())
                    .filter(|id| *id != u32::MAX)
                    .map(|id| id.to_string())
                    .collect();
                if !term.is_empty() && !ids.is_empty() {
                    renumbered.push_str(&format!("{} : {}\n", term, ids.join(", ")));
                }
            }
            let mut fd = util::create_file_w(&td)?;
            util::sync_write(&mut fd, renumbered.as_bytes())?;
        }
        Ok(kept)
    }
}

#[cfg(test)]
#[path = "column_test.rs"]
mod column_test;
