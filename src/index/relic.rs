//! Module implement the equality encoded bitmap index.

use std::{cmp::Ordering, ffi, sync::Arc};

use crate::{
    index::{
        self, decode_offsets, encode_offset, offset_width_for, Bitmaps, Header,
        IndexType,
    },
    query::{CompOp, ContinuousRange, DiscreteRange},
    storage::Storage,
    util, Bitvector, Error, Result,
};

/// Equality encoding, one bitmap per distinct value.
///
/// The distinct values are kept sorted ascending beside the bitmaps, a
/// range predicate binary-searches the value array for its `[lo, hi)`
/// bitmap slice and ORs the slice together.
pub struct Relic {
    vals: Vec<f64>,
    bitmaps: Bitmaps,
}

impl Relic {
    /// Build from the column values, one entry per row. NaN rows are
    /// treated as null and set in no bitmap.
    pub fn build(values: &[f64]) -> Relic {
        let nrows = values.len() as u32;
        let mut vals: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
        vals.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        vals.dedup();

        let mut bitmaps = Bitmaps::new_empty(nrows, vals.len());
        for (row, v) in values.iter().enumerate() {
            if v.is_nan() {
                continue;
            }
            let bin = vals.partition_point(|x| x < v);
            bitmaps.set_bit(bin, row);
        }
        bitmaps.finish();

        Relic { vals, bitmaps }
    }

    pub(crate) fn load(storage: Arc<Storage>, header: Header) -> Result<Relic> {
        let (vals, offsets) = load_values(&storage, &header)?;
        let bitmaps = Bitmaps::load(header.nrows, offsets, storage);
        Ok(Relic { vals, bitmaps })
    }

    pub(crate) fn into_parts(self) -> (Vec<f64>, Bitmaps) {
        (self.vals, self.bitmaps)
    }

    /// The sorted distinct values.
    pub fn values(&self) -> &[f64] {
        &self.vals
    }

    /// Bitmap slice `[lo, hi)` matching the canonical range.
    pub(crate) fn locate(&self, range: &ContinuousRange) -> (usize, usize) {
        locate_in(&self.vals, range)
    }
}

// bitmap slice of a canonical range within sorted distinct values.
pub(crate) fn locate_in(vals: &[f64], range: &ContinuousRange) -> (usize, usize) {
    match range.left_op {
        CompOp::Eq => {
            let lo = vals.partition_point(|x| *x < range.lower);
            match vals.get(lo) {
                Some(v) if *v == range.lower => (lo, lo + 1),
                _ => (lo, lo),
            }
        }
        _ => {
            let lo = vals.partition_point(|x| *x < range.lower);
            let hi = vals.partition_point(|x| *x < range.upper);
            (lo, hi)
        }
    }
}

// decode the value array and offset table of an equality encoded file.
pub(crate) fn load_values(
    storage: &Arc<Storage>,
    header: &Header,
) -> Result<(Vec<f64>, Vec<u64>)> {
    let buf = storage.as_slice();
    let nobs = header.nobs as usize;
    let vals_end = index::HEADER_SIZE + nobs * 8;
    if vals_end > buf.len() {
        return err_at!(CorruptIndex, msg: "value array reaches {}", vals_end);
    }

    let mut vals = Vec::with_capacity(nobs);
    for i in 0..nobs {
        let p = index::HEADER_SIZE + i * 8;
        let mut oct = [0_u8; 8];
        oct.copy_from_slice(&buf[p..p + 8]);
        vals.push(f64::from_le_bytes(oct));
    }
    for w in vals.windows(2) {
        if !(w[0] < w[1]) {
            return err_at!(CorruptIndex, msg: "value array not sorted unique");
        }
    }

    let offsets = decode_offsets(buf, vals_end, header.offset_width, nobs)?;
    Ok((vals, offsets))
}

// serialize an equality encoded index, returning the absolute end offset.
pub(crate) fn write_equality(
    file: &ffi::OsStr,
    itype: IndexType,
    nrows: u32,
    vals: &[f64],
    bitmaps: &mut Bitmaps,
    trailer: Option<&dyn Fn(&mut Vec<u8>, u8) -> Result<()>>,
) -> Result<u64> {
    let nobs = vals.len();
    let bodies: Vec<Vec<u8>> = {
        bitmaps.activate_all()?;
        (0..nobs).map(|i| Ok(bitmaps.get(i)?.to_bytes())).collect::<Result<_>>()?
    };

    let body_total: u64 = bodies.iter().map(|b| b.len() as u64).sum();
    let fixed = (index::HEADER_SIZE + nobs * 8) as u64;
    let offset_width = {
        let end4 = fixed + (nobs as u64 + 1) * 4 + body_total;
        offset_width_for(end4)
    };
    let data_start = fixed + (nobs as u64 + 1) * (offset_width as u64);

    let header = Header { itype, offset_width, nrows, nobs: nobs as u32 };
    let mut buf = Vec::with_capacity((data_start + body_total) as usize);
    header.encode(&mut buf);
    for v in vals.iter() {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    let mut off = data_start;
    encode_offset(&mut buf, off, offset_width);
    for body in bodies.iter() {
        off += body.len() as u64;
        encode_offset(&mut buf, off, offset_width);
    }
    for body in bodies.iter() {
        buf.extend_from_slice(body);
    }
    if let Some(trailer) = trailer {
        trailer(&mut buf, offset_width)?;
    }

    let mut fd = util::create_file_w(file)?;
    util::sync_write(&mut fd, &buf)?;
    crate::storage::filemgr().unload(file);
    Ok(off)
}

impl index::Index for Relic {
    fn itype(&self) -> IndexType {
        IndexType::Relic
    }

    fn nrows(&self) -> u32 {
        self.bitmaps.nrows()
    }

    fn nobs(&self) -> u32 {
        self.vals.len() as u32
    }

    fn evaluate(&mut self, range: &ContinuousRange) -> Result<Bitvector> {
        let (lo, hi) = self.locate(range);
        self.bitmaps.sum_bins(lo, hi)
    }

    fn evaluate_discrete(&mut self, range: &DiscreteRange) -> Result<Bitvector> {
        let mut res = Bitvector::zeros(self.nrows() as usize);
        for v in range.values.iter() {
            let (lo, hi) = self.locate(&ContinuousRange::eq(&range.col, *v));
            self.bitmaps.add_bins(lo, hi, &mut res)?;
        }
        Ok(res)
    }

    fn estimate_cost(&self, range: &ContinuousRange) -> f64 {
        let (lo, hi) = self.locate(range);
        self.bitmaps.range_bytes(lo, hi) as f64
    }

    fn write(&mut self, file: &ffi::OsStr) -> Result<()> {
        write_equality(
            file,
            IndexType::Relic,
            self.bitmaps.nrows(),
            &self.vals,
            &mut self.bitmaps,
            None,
        )?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "relic_test.rs"]
mod relic_test;
