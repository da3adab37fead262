//! Module implement common utility functions and types.

use cbordata::{Cbor, FromCbor, IntoCbor};
use serde::de::DeserializeOwned;

use std::{ffi, fs, path};

use crate::{Error, Result};

#[macro_export]
macro_rules! write_file {
    ($fd:expr, $buffer:expr, $file:expr, $msg:expr) => {{
        use std::io::Write;

        match err_at!(IOError, $fd.write($buffer))? {
            n if $buffer.len() == n => Ok(n),
            n => err_at!(
                Fatal, msg: "partial-wr {}, {:?}, {}/{}", $msg, $file, $buffer.len(), n
            ),
        }
    }};
}

/// Helper function to serialize value `T` implementing IntoCbor, into byte-string.
pub fn into_cbor_bytes<T>(val: T) -> Result<Vec<u8>>
where
    T: IntoCbor,
{
    let mut data: Vec<u8> = vec![];
    let n = err_at!(
        FailCbor,
        err_at!(FailCbor, val.into_cbor())?.encode(&mut data)
    )?;
    if n != data.len() {
        err_at!(Fatal, msg: "cbor encoding len mistmatch {} {}", n, data.len())
    } else {
        Ok(data)
    }
}

/// Helper function to deserialize value `T` implementing FromCbor, from byte-string.
/// Return (value, bytes-consumed)
pub fn from_cbor_bytes<T>(mut data: &[u8]) -> Result<(T, usize)>
where
    T: FromCbor,
{
    let (val, n) = err_at!(FailCbor, Cbor::decode(&mut data))?;
    Ok((err_at!(FailCbor, T::from_cbor(val))?, n))
}

/// create a file in write mode, purging any existing file.
pub fn create_file_w(file: &ffi::OsStr) -> Result<fs::File> {
    let os_file = {
        let os_file = path::Path::new(file);
        fs::remove_file(os_file).ok(); // NOTE: ignore remove errors.
        os_file
    };

    {
        let parent = match os_file.parent() {
            Some(parent) => Ok(parent),
            None => err_at!(InvalidFile, msg: "{:?}", file),
        }?;
        err_at!(IOError, fs::create_dir_all(parent))?;
    };

    let mut opts = fs::OpenOptions::new();
    Ok(err_at!(
        IOError,
        opts.write(true).create_new(true).open(os_file)
    )?)
}

/// open existing file in append mode for writing.
pub fn open_file_a(file: &ffi::OsStr) -> Result<fs::File> {
    let os_file = path::Path::new(file);
    let mut opts = fs::OpenOptions::new();
    Ok(err_at!(
        IOError,
        opts.append(true).create(true).open(os_file)
    )?)
}

/// open file for reading.
pub fn open_file_r(file: &ffi::OsStr) -> Result<fs::File> {
    let os_file = path::Path::new(file);
    Ok(err_at!(
        IOError,
        fs::OpenOptions::new().read(true).open(os_file)
    )?)
}

pub fn sync_write(file: &mut fs::File, data: &[u8]) -> Result<usize> {
    use std::io::Write;

    let n = err_at!(IOError, file.write(data))?;
    if n != data.len() {
        err_at!(IOError, msg: "partial write to file {} {}", n, data.len())?
    }
    err_at!(IOError, file.sync_all())?;
    Ok(n)
}

/// Size of file in bytes, or zero when the file is absent.
pub fn file_size(file: &ffi::OsStr) -> u64 {
    fs::metadata(file).map(|m| m.len()).unwrap_or(0)
}

/// Copy every regular file under `src` into `dst`, creating `dst` when
/// needed and purging files in `dst` that `src` does not have. Returns
/// the number of files copied.
pub fn mirror_dir(src: &ffi::OsStr, dst: &ffi::OsStr) -> Result<usize> {
    err_at!(IOError, fs::create_dir_all(dst))?;

    let mut copied = 0;
    let mut keep = vec![];
    let entries = err_at!(IOError, fs::read_dir(src), "read_dir({:?})", src)?;
    for entry in entries {
        let entry = err_at!(IOError, entry)?;
        if !err_at!(IOError, entry.file_type())?.is_file() {
            continue;
        }
        let to: path::PathBuf =
            [dst.to_os_string(), entry.file_name()].iter().collect();
        err_at!(IOError, fs::copy(entry.path(), &to), "copy to {:?}", to)?;
        keep.push(entry.file_name());
        copied += 1;
    }

    let entries = err_at!(IOError, fs::read_dir(dst), "read_dir({:?})", dst)?;
    for entry in entries {
        let entry = err_at!(IOError, entry)?;
        if err_at!(IOError, entry.file_type())?.is_file()
            && !keep.contains(&entry.file_name())
        {
            err_at!(IOError, fs::remove_file(entry.path()))?;
        }
    }

    Ok(copied)
}

/// Load toml file and parse it into type `T`.
pub fn load_toml<P, T>(loc: P) -> Result<T>
where
    P: AsRef<path::Path>,
    T: DeserializeOwned,
{
    use std::str::from_utf8;

    let ploc: &path::Path = loc.as_ref();
    let data = err_at!(IOError, fs::read(ploc))?;
    let s = err_at!(FailConvert, from_utf8(&data), "not utf8 for {:?}", ploc)?;
    err_at!(FailConvert, toml::from_str(s), "file:{:?}", ploc)
}
