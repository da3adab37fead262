//! Module implement the direct bitmap index for dense integer domains.

use std::{ffi, sync::Arc};

use crate::{
    index::{
        self, decode_offsets, encode_offset, offset_width_for, Bitmaps, Header,
        IndexType,
    },
    query::{CompOp, ContinuousRange, DiscreteRange},
    storage::Storage,
    util, Bitvector, Error, Result,
};

/// Direct encoding, value `u` is bitmap `u`.
///
/// Appropriate only for columns over a dense small range of non-negative
/// integers, there is no value array and range predicates turn into index
/// arithmetic.
pub struct Direkte {
    bitmaps: Bitmaps,
}

impl Direkte {
    /// Build from integer valued rows. `domain` is one past the largest
    /// encodable value, rows outside `[0, domain)` are treated as null.
    pub fn build(values: &[f64], domain: u32) -> Direkte {
        let nrows = values.len() as u32;
        let mut bitmaps = Bitmaps::new_empty(nrows, domain as usize);
        for (row, v) in values.iter().enumerate() {
            if v.fract() != 0.0 || *v < 0.0 || *v >= (domain as f64) {
                continue;
            }
            bitmaps.set_bit(*v as usize, row);
        }
        bitmaps.finish();
        Direkte { bitmaps }
    }

    pub(crate) fn load(storage: Arc<Storage>, header: Header) -> Result<Direkte> {
        let offsets = decode_offsets(
            storage.as_slice(),
            index::HEADER_SIZE,
            header.offset_width,
            header.nobs as usize,
        )?;
        let bitmaps = Bitmaps::load(header.nrows, offsets, storage);
        Ok(Direkte { bitmaps })
    }

    // clamp the canonical range to bitmap positions.
    fn locate(&self, range: &ContinuousRange) -> (usize, usize) {
        let nobs = self.bitmaps.len() as f64;
        match range.left_op {
            CompOp::Eq => {
                let v = range.lower;
                if v.fract() == 0.0 && v >= 0.0 && v < nobs {
                    (v as usize, v as usize + 1)
                } else {
                    (0, 0)
                }
            }
            _ => {
                let lo = range.lower.ceil().max(0.0).min(nobs);
                let hi = range.upper.ceil().max(0.0).min(nobs);
                (lo as usize, hi as usize)
            }
        }
    }
}

impl index::Index for Direkte {
    fn itype(&self) -> IndexType {
        IndexType::Direkte
    }

    fn nrows(&self) -> u32 {
        self.bitmaps.nrows()
    }

    fn nobs(&self) -> u32 {
        self.bitmaps.len() as u32
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
        let nobs = self.bitmaps.len();
        let bodies: Vec<Vec<u8>> = {
            self.bitmaps.activate_all()?;
            (0..nobs)
                .map(|i| Ok(self.bitmaps.get(i)?.to_bytes()))
                .collect::<Result<_>>()?
        };

        let body_total: u64 = bodies.iter().map(|b| b.len() as u64).sum();
        let offset_width = {
            let end4 = (index::HEADER_SIZE as u64) + (nobs as u64 + 1) * 4 + body_total;
            offset_width_for(end4)
        };
        let data_start =
            (index::HEADER_SIZE as u64) + (nobs as u64 + 1) * (offset_width as u64);

        let header = Header {
            itype: IndexType::Direkte,
            offset_width,
            nrows: self.bitmaps.nrows(),
            nobs: nobs as u32,
        };
        let mut buf = Vec::with_capacity((data_start + body_total) as usize);
        header.encode(&mut buf);
        let mut off = data_start;
        encode_offset(&mut buf, off, offset_width);
        for body in bodies.iter() {
            off += body.len() as u64;
            encode_offset(&mut buf, off, offset_width);
        }
        for body in bodies.iter() {
            buf.extend_from_slice(body);
        }

        let mut fd = util::create_file_w(file)?;
        util::sync_write(&mut fd, &buf)?;
        crate::storage::filemgr().unload(file);
        Ok(())
    }
}

#[cfg(test)]
#[path = "direkte_test.rs"]
mod direkte_test;
