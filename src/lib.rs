//! Package implement a compressed-bitmap-indexed column store for
//! append-only analytical data.
//!
//! Data is partitioned vertically, one file per column, and queries are
//! answered by boolean algebra over per-column [bitmap indexes][bitmap-index].
//! The building blocks are,
//!
//! * [Bitvector], a word-aligned run-length compressed bit sequence.
//! * [Storage] and [FileManager], reference counted byte buffers that are
//!   either heap allocated or memory-mapped, deduplicated per file range.
//! * [Array], typed views over a [Storage] region with sort/search routines.
//! * [index], the family of bitmap index encodings and their on-disk format.
//! * [query], the expression tree over columns with algebraic simplification.
//! * [Column] and [Partition], which tie data files, indexes and the
//!   append/commit/rollback mutation protocol together.
//!
//! Queries are expression trees built with the [query] module. Evaluating a
//! tree against a [Partition] reduces every range predicate to a bitmap
//! lookup and combines the resulting [Bitvector] values, producing the bitmap
//! of matching row positions. Projected values are then fetched from the
//! column files by position.
//!
//! Mutations are serialized. A partition configured with a backup directory
//! appends via copy-on-write into the backup and atomically switches roles,
//! so an append can be rolled back until it is committed.
//!
//! [bitmap-index]: https://en.wikipedia.org/wiki/Bitmap_index

use std::{error, fmt, result};

/// Type alias for Result return type, used by this package.
pub type Result<T> = result::Result<T, Error>;

/// Error variants that can be returned by this package's API.
///
/// Each variant carries a prefix, typically identifying the `file:line`
/// where the error originates, and a description of the error.
#[derive(Clone, PartialEq)]
pub enum Error {
    Fatal(String, String),
    BadAlloc(String, String),
    IOError(String, String),
    NotFound(String, String),
    CorruptIndex(String, String),
    SizeMismatch(String, String),
    UnknownColumn(String, String),
    StateViolation(String, String),
    InvalidInput(String, String),
    InvalidFile(String, String),
    FailConvert(String, String),
    FailCbor(String, String),
    NotImplemented(String, String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        use Error::*;

        match self {
            Fatal(p, m) => write!(f, "Fatal,{},{}", p, m),
            BadAlloc(p, m) => write!(f, "BadAlloc,{},{}", p, m),
            IOError(p, m) => write!(f, "IOError,{},{}", p, m),
            NotFound(p, m) => write!(f, "NotFound,{},{}", p, m),
            CorruptIndex(p, m) => write!(f, "CorruptIndex,{},{}", p, m),
            SizeMismatch(p, m) => write!(f, "SizeMismatch,{},{}", p, m),
            UnknownColumn(p, m) => write!(f, "UnknownColumn,{},{}", p, m),
            StateViolation(p, m) => write!(f, "StateViolation,{},{}", p, m),
            InvalidInput(p, m) => write!(f, "InvalidInput,{},{}", p, m),
            InvalidFile(p, m) => write!(f, "InvalidFile,{},{}", p, m),
            FailConvert(p, m) => write!(f, "FailConvert,{},{}", p, m),
            FailCbor(p, m) => write!(f, "FailCbor,{},{}", p, m),
            NotImplemented(p, m) => write!(f, "NotImplemented,{},{}", p, m),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "{}", self)
    }
}

impl error::Error for Error {}

/// Convert error, or construct one in place, tagging it with the location.
///
/// Three forms,
///
/// * `err_at!(Variant, msg: "format", args..)` construct an error.
/// * `err_at!(Variant, result)` wrap the error of a `Result`.
/// * `err_at!(Variant, result, "format", args..)` wrap with added context.
#[macro_export]
macro_rules! err_at {
    ($v:ident, msg: $($arg:expr),+) => {{
        let prefix = format!("{}:{}", file!(), line!());
        Err(Error::$v(prefix, format!($($arg),+)))
    }};
    ($v:ident, $e:expr) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                Err(Error::$v(prefix, format!("{}", err)))
            }
        }
    }};
    ($v:ident, $e:expr, $($arg:expr),+) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                let msg = format!($($arg),+);
                Err(Error::$v(prefix, format!("{} {}", err, msg)))
            }
        }
    }};
}

pub mod util;

mod array;
mod bitvector;
mod column;
mod config;
mod dict;
pub mod index;
mod part;
pub mod query;
mod storage;

pub use crate::array::{Array, Element};
pub use crate::bitvector::Bitvector;
pub use crate::column::{Column, DataType};
pub use crate::config::{init_config, Config};
pub use crate::dict::Dictionary;
pub use crate::part::{Partition, Rid, State};
pub use crate::storage::{filemgr, FileManager, Storage};
