//! Module implement bitmap indexes over column data.
//!
//! An index for a column over `n` rows is a list of bitmaps, each of size
//! `n`, plus encoding-specific metadata. Four encodings are implemented,
//!
//! * [Relic], one bitmap per distinct value.
//! * [Direkte], for dense small-domain integer columns, a value is its own
//!   bitmap position.
//! * [Fuzz], the equality encoding augmented with a coarse layer of
//!   prefix-union bitmaps that accelerates wide range predicates.
//! * [Keywords], a term to document index over text columns.
//!
//! All encodings share one file layout, an 8-byte magic carrying the
//! encoding tag and offset width, row and bitmap counts, an encoding
//! specific header, the offset table and finally the bitmap bodies.
//! Bitmap bodies are activated lazily, the header and offset table are
//! read eagerly while individual bodies are decoded from the shared
//! [Storage][crate::Storage] on first access.

mod bitmaps;
mod direkte;
mod fuzz;
mod keywords;
mod relic;

pub use direkte::Direkte;
pub use fuzz::Fuzz;
pub use keywords::Keywords;
pub use relic::Relic;

pub(crate) use bitmaps::Bitmaps;

use std::{convert::TryFrom, ffi};

use crate::{
    query::{ContinuousRange, DiscreteRange},
    storage::filemgr,
    Bitvector, Error, Result,
};

pub(crate) const MAGIC: [u8; 5] = *b"#IBIS";
pub(crate) const HEADER_SIZE: usize = 16;

/// Encoding tag, stored in byte 5 of the index file magic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexType {
    Relic = 7,
    Keywords = 18,
    Direkte = 22,
    Fuzz = 26,
}

impl TryFrom<u8> for IndexType {
    type Error = Error;

    fn try_from(tag: u8) -> Result<IndexType> {
        match tag {
            7 => Ok(IndexType::Relic),
            18 => Ok(IndexType::Keywords),
            22 => Ok(IndexType::Direkte),
            26 => Ok(IndexType::Fuzz),
            tag => err_at!(CorruptIndex, msg: "unknown index tag {}", tag),
        }
    }
}

// Fixed 16-byte prefix of every index file.
#[derive(Clone, Debug)]
pub(crate) struct Header {
    pub itype: IndexType,
    pub offset_width: u8, // 4 or 8
    pub nrows: u32,
    pub nobs: u32,
}

impl Header {
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&MAGIC);
        buf.push(self.itype as u8);
        buf.push(self.offset_width);
        buf.push(0);
        buf.extend_from_slice(&self.nrows.to_le_bytes());
        buf.extend_from_slice(&self.nobs.to_le_bytes());
    }

    pub fn decode(buf: &[u8]) -> Result<Header> {
        if buf.len() < HEADER_SIZE {
            return err_at!(CorruptIndex, msg: "index file {} bytes", buf.len());
        }
        if buf[..5] != MAGIC {
            return err_at!(CorruptIndex, msg: "bad magic {:?}", &buf[..5]);
        }
        let itype = IndexType::try_from(buf[5])?;
        let offset_width = buf[6];
        if offset_width != 4 && offset_width != 8 {
            return err_at!(CorruptIndex, msg: "offset width {}", offset_width);
        }

        let mut quad = [0_u8; 4];
        quad.copy_from_slice(&buf[8..12]);
        let nrows = u32::from_le_bytes(quad);
        quad.copy_from_slice(&buf[12..16]);
        let nobs = u32::from_le_bytes(quad);

        Ok(Header { itype, offset_width, nrows, nobs })
    }
}

// read `n + 1` offsets of `width` bytes starting at `at`.
pub(crate) fn decode_offsets(
    buf: &[u8],
    at: usize,
    width: u8,
    n: usize,
) -> Result<Vec<u64>> {
    let end = at + (n + 1) * (width as usize);
    if end > buf.len() {
        return err_at!(CorruptIndex, msg: "offset table [{}..{})", at, end);
    }
    let mut offsets = Vec::with_capacity(n + 1);
    for i in 0..=n {
        let p = at + i * (width as usize);
        let off = match width {
            4 => {
                let mut quad = [0_u8; 4];
                quad.copy_from_slice(&buf[p..p + 4]);
                u32::from_le_bytes(quad) as u64
            }
            _ => {
                let mut oct = [0_u8; 8];
                oct.copy_from_slice(&buf[p..p + 8]);
                u64::from_le_bytes(oct)
            }
        };
        offsets.push(off);
    }
    for w in offsets.windows(2) {
        if w[0] > w[1] {
            return err_at!(CorruptIndex, msg: "offsets not monotonic");
        }
    }
    if *offsets.last().unwrap() > buf.len() as u64 {
        return err_at!(
            CorruptIndex, msg: "offsets reach {} of {}",
            offsets.last().unwrap(), buf.len()
        );
    }
    Ok(offsets)
}

// offset word width able to address `end`.
pub(crate) fn offset_width_for(end: u64) -> u8 {
    if end > (u32::MAX as u64) {
        8
    } else {
        4
    }
}

pub(crate) fn encode_offset(buf: &mut Vec<u8>, off: u64, width: u8) {
    match width {
        4 => buf.extend_from_slice(&(off as u32).to_le_bytes()),
        _ => buf.extend_from_slice(&off.to_le_bytes()),
    }
}

/// One bitmap index over a column.
///
/// `evaluate` resolves a canonical range predicate into the bitmap of
/// matching rows and `estimate_cost` prices the same predicate in bytes
/// of bitmaps to read, for operand ordering.
pub trait Index {
    fn itype(&self) -> IndexType;

    fn nrows(&self) -> u32;

    /// Number of bitmaps held.
    fn nobs(&self) -> u32;

    fn evaluate(&mut self, range: &ContinuousRange) -> Result<Bitvector>;

    fn evaluate_discrete(&mut self, range: &DiscreteRange) -> Result<Bitvector>;

    fn estimate_cost(&self, range: &ContinuousRange) -> f64;

    /// Rows in which `term` occurs. Only keyword indexes hold terms, the
    /// other encodings match nothing.
    fn search(&mut self, _term: &str) -> Result<Bitvector> {
        Ok(Bitvector::zeros(self.nrows() as usize))
    }

    /// Persist into `file`, see the module description for the layout.
    fn write(&mut self, file: &ffi::OsStr) -> Result<()>;
}

/// Open an index file, dispatching on the encoding tag in its magic.
/// `nrows` is the row count of the owning column, a mismatching header is
/// a corrupt index.
pub fn open_index(file: &ffi::OsStr, nrows: u32) -> Result<Box<dyn Index>> {
    let storage = filemgr().get_file(file)?;
    let header = Header::decode(storage.as_slice())?;
    if header.nrows != nrows {
        return err_at!(
            CorruptIndex, msg: "index of {} rows, column has {}", header.nrows,
            nrows
        );
    }

    let index: Box<dyn Index> = match header.itype {
        IndexType::Relic => Box::new(Relic::load(storage, header)?),
        IndexType::Direkte => Box::new(Direkte::load(storage, header)?),
        IndexType::Fuzz => Box::new(Fuzz::load(storage, header)?),
        IndexType::Keywords => Box::new(Keywords::load(file, storage, header)?),
    };
    Ok(index)
}
