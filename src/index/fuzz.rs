//! Module implement the interval-equality bitmap index.
//!
//! The fine level is the equality encoding, one bitmap per distinct value.
//! On top of it sits a coarse level, the distinct values are partitioned
//! into `nc` bins of roughly equal summed bitmap bytes, and coarse bitmap
//! `j` holds the union of `nc/2` consecutive fine bins starting at bin
//! `j`. Consecutive coarse bitmaps differ by one fine bin group on either
//! end, so each is derived from its predecessor by subtracting the front
//! group and adding the next back group.
//!
//! A range predicate mapping to fine bins `[lo, hi)` is answered by the
//! cheapest of five plans, fine bitmaps only, coarse bitmaps plus direct
//! edge bins, or coarse bitmaps with one or both edges complemented. Costs
//! are summed serialized bytes, with the fine-only plan preferred within
//! one percent.

use log::debug;

use std::{ffi, sync::Arc};

use crate::{
    config,
    index::{self, decode_offsets, encode_offset, relic, Bitmaps, Header, IndexType},
    query::{ContinuousRange, DiscreteRange},
    storage::Storage,
    Bitvector, Error, Result,
};

// below this many distinct values the coarse level is not built.
const MIN_COARSE_VALUES: usize = 32;

/// Interval-equality encoding, fine equality bitmaps plus a coarse layer
/// of prefix unions accelerating wide ranges.
pub struct Fuzz {
    vals: Vec<f64>,
    fine: Bitmaps,
    cbounds: Vec<u32>, // nc+1 fine-bin boundaries, empty without coarse level
    coarse: Bitmaps,   // nc - (nc+1)/2 + 1 bitmaps
}

impl Fuzz {
    /// Build from the column values, one entry per row.
    pub fn build(values: &[f64]) -> Result<Fuzz> {
        let (vals, fine) = relic::Relic::build(values).into_parts();
        let nrows = fine.nrows();
        let mut index = Fuzz {
            vals,
            fine,
            cbounds: vec![],
            coarse: Bitmaps::from_bits(nrows, vec![]),
        };
        index.coarsen()?;
        Ok(index)
    }

    pub(crate) fn load(storage: Arc<Storage>, header: Header) -> Result<Fuzz> {
        let (vals, offsets) = relic::load_values(&storage, &header)?;
        let trailer_at = *offsets.last().unwrap() as usize;
        let fine = Bitmaps::load(header.nrows, offsets, Arc::clone(&storage));

        let buf = storage.as_slice();
        if trailer_at == buf.len() {
            // fine-only file
            let coarse = Bitmaps::from_bits(header.nrows, vec![]);
            return Ok(Fuzz { vals, fine, cbounds: vec![], coarse });
        }
        if trailer_at + 4 > buf.len() {
            return err_at!(CorruptIndex, msg: "coarse trailer at {}", trailer_at);
        }
        let mut quad = [0_u8; 4];
        quad.copy_from_slice(&buf[trailer_at..trailer_at + 4]);
        let nc = u32::from_le_bytes(quad) as usize;
        let ncb = nc - (nc + 1) / 2 + 1;

        let mut at = trailer_at + 4;
        if at + (nc + 1) * 4 > buf.len() {
            return err_at!(CorruptIndex, msg: "coarse bounds at {}", at);
        }
        let mut cbounds = Vec::with_capacity(nc + 1);
        for i in 0..=nc {
            quad.copy_from_slice(&buf[at + i * 4..at + i * 4 + 4]);
            cbounds.push(u32::from_le_bytes(quad));
        }
        at += (nc + 1) * 4;

        let coffsets = decode_offsets(buf, at, header.offset_width, ncb)?;
        let coarse = Bitmaps::load(header.nrows, coffsets, storage);

        Ok(Fuzz { vals, fine, cbounds, coarse })
    }

    /// The sorted distinct values.
    pub fn values(&self) -> &[f64] {
        &self.vals
    }

    /// Number of coarse bins, zero without a coarse level.
    pub fn ncoarse(&self) -> usize {
        self.cbounds.len().saturating_sub(1)
    }

    fn locate(&self, range: &ContinuousRange) -> (usize, usize) {
        relic::locate_in(&self.vals, range)
    }

    // Partition the fine bins into coarse bins of roughly equal summed
    // bytes and derive the coarse bitmaps.
    fn coarsen(&mut self) -> Result<()> {
        let nobs = self.vals.len();
        if nobs < MIN_COARSE_VALUES {
            return Ok(());
        }

        // cumulative fine bitmap bytes
        let mut offs: Vec<u64> = Vec::with_capacity(nobs + 1);
        offs.push(0);
        for i in 0..nobs {
            offs.push(offs[i] + self.fine.bin_bytes(i));
        }
        let total = offs[nobs];

        let nrows = self.fine.nrows() as u64;
        let ncoarse = match config::current().ncoarse {
            Some(nc) if nc > 4 => nc as usize,
            _ if total > nrows / 31 => {
                // size heuristic, balancing coarse layer cost against the
                // expected number of edge bins per query
                let wm1 = 31_u64;
                let sf = total / 4;
                let mut nc = ((wm1 * sf) as f64 / (2f64.sqrt() * nrows as f64)) as usize;
                let ncmax = (2.0 * nobs as f64).sqrt() as usize;
                if nc < ncmax {
                    // nc of zero sends obj1 to infinity, the refinement then
                    // yields 1 and the < 5 rejection below declines to build
                    // the coarse level
                    let (sf, nrows) = (sf as f64, nrows as f64);
                    let wm1 = wm1 as f64;
                    let ncf = nc as f64;
                    let obj1 = (sf + (ncf + 1.0 - (0.5 * ncf).ceil()) * nrows / wm1)
                        * (sf * 0.5 / ncf + 2.0 * nrows / wm1);
                    let obj2 = (sf + (ncf + 2.0 - (0.5 * ncf + 0.5).ceil()) * nrows / wm1)
                        * (sf * 0.5 / (ncf + 1.0) + 2.0 * nrows / wm1);
                    nc += (obj2 < obj1) as usize;
                } else {
                    nc = ncmax;
                }
                nc
            }
            _ => 0,
        };
        if ncoarse < 5 || ncoarse >= nobs {
            return Ok(());
        }

        let nc2 = (ncoarse + 1) / 2;
        let ncb = ncoarse - nc2 + 1;

        let mut cbounds = vec![0_u32; ncoarse + 1];
        for i in 1..ncoarse {
            let prev = cbounds[i - 1] as usize;
            let target = offs[prev] + (total - offs[prev]) / ((ncoarse - i + 1) as u64);
            let mut b = offs.partition_point(|x| *x < target);
            if b > prev + 1 && offs[b] - target > target - offs[b - 1] {
                b -= 1;
            } else if b <= prev {
                b = prev + 1;
            }
            cbounds[i] = b as u32;
        }
        cbounds[ncoarse] = nobs as u32;
        for i in (1..ncoarse).rev() {
            if cbounds[i + 1] < cbounds[i] {
                cbounds[i] = cbounds[i + 1] - 1;
            } else {
                break;
            }
        }
        debug!(
            target: "index",
            "coarsened {} fine bitmaps into {} groups", nobs, ncoarse
        );

        // cbits[j] covers fine bins [cbounds[j], cbounds[j+nc2]); each is
        // derived from the previous by the interval difference trick
        let mut cbits: Vec<Bitvector> = Vec::with_capacity(ncb);
        let first = self.fine.sum_bins(0, cbounds[nc2] as usize)?;
        cbits.push(first);
        for i in 1..ncb {
            let front =
                self.fine.sum_bins(cbounds[i - 1] as usize, cbounds[i] as usize)?;
            let back = self
                .fine
                .sum_bins(cbounds[i - 1 + nc2] as usize, cbounds[i + nc2] as usize)?;
            let bv = cbits[i - 1].minus(&front)?.or(&back)?;
            cbits.push(bv);
        }

        self.cbounds = cbounds;
        self.coarse = Bitmaps::from_bits(self.fine.nrows(), cbits);
        Ok(())
    }

    fn has_coarse(&self) -> bool {
        if self.cbounds.len() < 2 {
            return false;
        }
        let nc = self.cbounds.len() - 1;
        self.coarse.len() == nc - (nc + 1) / 2 + 1
    }

    // serialized bytes needed to realize coarse bins [lo, hi).
    fn coarse_estimate(&self, lo: usize, hi: usize) -> u64 {
        let mid = self.cbounds.len() / 2;
        if lo >= self.cbounds.len() || lo >= hi {
            0
        } else if hi > mid {
            let mut cost = self.coarse.bin_bytes(hi - mid);
            if lo > hi - mid {
                if lo >= mid {
                    cost += self.coarse.bin_bytes(lo - mid);
                } else {
                    cost += self.coarse.bin_bytes(lo);
                }
            } else if lo < hi - mid {
                cost += self.coarse.bin_bytes(lo);
            }
            cost
        } else if hi < mid {
            self.coarse.bin_bytes(lo) + self.coarse.bin_bytes(hi)
        } else {
            let mut cost = self.coarse.bin_bytes(0);
            if lo > 0 {
                cost += self.coarse.bin_bytes(lo);
            }
            cost
        }
    }

    // OR of the fine bins [cbounds[lo], cbounds[hi]) via coarse bitmaps.
    fn coarse_evaluate(&mut self, lo: usize, hi: usize) -> Result<Bitvector> {
        let nrows = self.fine.nrows() as usize;
        let mid = self.cbounds.len() / 2;
        if lo >= self.cbounds.len() || lo >= hi {
            Ok(Bitvector::zeros(nrows))
        } else if lo + 1 == hi {
            if hi < self.coarse.len() {
                let a = self.coarse.get(lo)?.clone();
                let b = self.coarse.get(hi)?;
                a.minus(b)
            } else {
                let a = self.coarse.get(hi - mid)?.clone();
                let b = self.coarse.get(lo - mid)?;
                a.minus(b)
            }
        } else if hi > mid {
            let mut res = self.coarse.get(hi - mid)?.clone();
            if lo > hi - mid {
                if lo >= mid {
                    let b = self.coarse.get(lo - mid)?;
                    res.minus_inplace(b)?;
                } else {
                    let b = self.coarse.get(lo)?;
                    res.and_inplace(b)?;
                }
            } else if lo < hi - mid {
                let b = self.coarse.get(lo)?;
                res.or_inplace(b)?;
            }
            Ok(res)
        } else if hi < mid {
            let a = self.coarse.get(lo)?.clone();
            let b = self.coarse.get(hi)?;
            a.minus(b)
        } else {
            let mut res = self.coarse.get(0)?.clone();
            if lo > 0 {
                let b = self.coarse.get(lo)?;
                res.and_inplace(b)?;
            }
            Ok(res)
        }
    }

    // fine-only cost of realizing bins [hit0, hit1), direct or by
    // complement, whichever is smaller.
    fn fine_cost(&self, hit0: usize, hit1: usize) -> u64 {
        let nobs = self.fine.len();
        let direct = self.fine.range_bytes(hit0, hit1);
        let complement =
            self.fine.range_bytes(0, hit0) + self.fine.range_bytes(hit1, nobs);
        direct.min(complement)
    }
}

impl index::Index for Fuzz {
    fn itype(&self) -> IndexType {
        IndexType::Fuzz
    }

    fn nrows(&self) -> u32 {
        self.fine.nrows()
    }

    fn nobs(&self) -> u32 {
        self.vals.len() as u32
    }

    fn evaluate(&mut self, range: &ContinuousRange) -> Result<Bitvector> {
        let nrows = self.fine.nrows() as usize;
        let nobs = self.fine.len();
        if nobs == 0 {
            return Ok(Bitvector::zeros(nrows));
        }

        let (hit0, hit1) = self.locate(range);
        if hit1 <= hit0 || hit0 >= nobs {
            return Ok(Bitvector::zeros(nrows));
        }
        if hit0 == 0 && hit1 >= nobs {
            // every encoded value matches, the union of all fine bins is
            // the not-null mask and costs nothing to plan
            return self.fine.sum_bins(0, nobs);
        }
        if hit0 + 1 == hit1 {
            return Ok(self.fine.get(hit0)?.clone());
        }
        if hit0 + 3 >= hit1 || !self.has_coarse() {
            return self.fine.sum_bins(hit0, hit1);
        }

        let c0 = self.cbounds.partition_point(|x| (*x as usize) < hit0);
        let c1 = self.cbounds.partition_point(|x| (*x as usize) < hit1);
        let cbounds = self.cbounds.clone();

        if c0 >= c1 {
            // both edges inside one coarse bin, complement within it
            let tmp = self.coarse_estimate(c1 - 1, c1)
                + self.fine.range_bytes(cbounds[c1 - 1] as usize, hit0)
                + self.fine.range_bytes(hit1, cbounds[c1] as usize);
            let direct = self.fine.range_bytes(hit0, hit1);
            if (direct as f64) <= 0.99 * (tmp as f64) {
                return self.fine.sum_bins(hit0, hit1);
            }
            let mut res = self.coarse_evaluate(c1 - 1, c1)?;
            if hit0 > cbounds[c1 - 1] as usize {
                let bv = self.fine.sum_bins(cbounds[c1 - 1] as usize, hit0)?;
                res.minus_inplace(&bv)?;
            }
            if (cbounds[c1] as usize) > hit1 {
                let bv = self.fine.sum_bins(hit1, cbounds[c1] as usize)?;
                res.minus_inplace(&bv)?;
            }
            return Ok(res);
        }

        // five plans, priced in serialized bytes
        let mut option = 2; // [direct | coarse | direct]
        let mut cost = self.fine.range_bytes(hit0, cbounds[c0] as usize)
            + self.coarse_estimate(c0, c1 - 1)
            + self.fine.range_bytes(cbounds[c1 - 1] as usize, hit1);
        if c0 > 0 {
            // option 3: [complement | coarse | direct]
            let tmp = self.fine.range_bytes(cbounds[c0 - 1] as usize, hit0)
                + self.coarse_estimate(c0 - 1, c1 - 1)
                + self.fine.range_bytes(cbounds[c1 - 1] as usize, hit1);
            if tmp < cost {
                cost = tmp;
                option = 3;
            }
        }
        {
            // option 4: [direct | coarse | complement]
            let tmp = self.fine.range_bytes(hit0, cbounds[c0] as usize)
                + self.coarse_estimate(if c0 > 0 { c0 - 1 } else { 0 }, c1)
                + self.fine.range_bytes(hit1, cbounds[c1] as usize);
            if tmp < cost {
                cost = tmp;
                option = 4;
            }
        }
        if c0 > 0 {
            // option 5: [complement | coarse | complement]
            let tmp = self.fine.range_bytes(cbounds[c0 - 1] as usize, hit0)
                + self.coarse_estimate(c0 - 1, c1)
                + self.fine.range_bytes(hit1, cbounds[c1] as usize);
            if tmp < cost {
                cost = tmp;
                option = 5;
            }
        }
        let fine_only = self.fine_cost(hit0, hit1);
        if (cost as f64) > 0.99 * (fine_only as f64) {
            option = 1; // slightly prefer the fine level
        }

        debug!(
            target: "index",
            "range [{}, {}) via option {} coarse [{}, {})", hit0, hit1, option,
            c0, c1
        );
        match option {
            2 => {
                let mut res = self.coarse_evaluate(c0, c1 - 1)?;
                if hit0 < cbounds[c0] as usize {
                    let bv = self.fine.sum_bins(hit0, cbounds[c0] as usize)?;
                    res.or_inplace(&bv)?;
                }
                if (cbounds[c1 - 1] as usize) < hit1 {
                    let bv = self.fine.sum_bins(cbounds[c1 - 1] as usize, hit1)?;
                    res.or_inplace(&bv)?;
                }
                Ok(res)
            }
            3 => {
                let mut res = self.coarse_evaluate(c0 - 1, c1 - 1)?;
                if (cbounds[c0 - 1] as usize) < hit0 {
                    let bv = self.fine.sum_bins(cbounds[c0 - 1] as usize, hit0)?;
                    res.minus_inplace(&bv)?;
                }
                if (cbounds[c1 - 1] as usize) < hit1 {
                    let bv = self.fine.sum_bins(cbounds[c1 - 1] as usize, hit1)?;
                    res.or_inplace(&bv)?;
                }
                Ok(res)
            }
            4 => {
                let mut res = self.coarse_evaluate(c0, c1)?;
                if hit0 < cbounds[c0] as usize {
                    let bv = self.fine.sum_bins(hit0, cbounds[c0] as usize)?;
                    res.or_inplace(&bv)?;
                }
                if (cbounds[c1] as usize) > hit1 {
                    let bv = self.fine.sum_bins(hit1, cbounds[c1] as usize)?;
                    res.minus_inplace(&bv)?;
                }
                Ok(res)
            }
            5 => {
                let mut res = self.coarse_evaluate(c0 - 1, c1)?;
                if hit0 > cbounds[c0 - 1] as usize {
                    let bv = self.fine.sum_bins(cbounds[c0 - 1] as usize, hit0)?;
                    res.minus_inplace(&bv)?;
                }
                if (cbounds[c1] as usize) > hit1 {
                    let bv = self.fine.sum_bins(hit1, cbounds[c1] as usize)?;
                    res.minus_inplace(&bv)?;
                }
                Ok(res)
            }
            _ => self.fine.sum_bins(hit0, hit1),
        }
    }

    fn evaluate_discrete(&mut self, range: &DiscreteRange) -> Result<Bitvector> {
        let mut res = Bitvector::zeros(self.nrows() as usize);
        for v in range.values.iter() {
            let (lo, hi) =
                relic::locate_in(&self.vals, &ContinuousRange::eq(&range.col, *v));
            self.fine.add_bins(lo, hi, &mut res)?;
        }
        Ok(res)
    }

    fn estimate_cost(&self, range: &ContinuousRange) -> f64 {
        let nobs = self.fine.len();
        if nobs == 0 {
            return 8.0 * self.fine.nrows() as f64;
        }
        let (hit0, hit1) = self.locate(range);
        if hit1 <= hit0 || hit0 >= nobs {
            return 0.0;
        }
        if hit0 == 0 && hit1 >= nobs {
            return 0.0;
        }
        let fine = self.fine_cost(hit0, hit1);
        if hit0 + 1 == hit1 || hit0 + 3 >= hit1 || !self.has_coarse() {
            return fine as f64;
        }

        let c0 = self.cbounds.partition_point(|x| (*x as usize) < hit0);
        let c1 = self.cbounds.partition_point(|x| (*x as usize) < hit1);
        let cbounds = &self.cbounds;
        let cost = if c0 >= c1 {
            self.coarse_estimate(c1 - 1, c1)
                + self.fine.range_bytes(cbounds[c1 - 1] as usize, hit0)
                + self.fine.range_bytes(hit1, cbounds[c1] as usize)
        } else {
            let mut cost = self.fine.range_bytes(hit0, cbounds[c0] as usize)
                + self.coarse_estimate(c0, c1 - 1)
                + self.fine.range_bytes(cbounds[c1 - 1] as usize, hit1);
            if c0 > 0 {
                let tmp = self.fine.range_bytes(cbounds[c0 - 1] as usize, hit0)
                    + self.coarse_estimate(c0 - 1, c1 - 1)
                    + self.fine.range_bytes(cbounds[c1 - 1] as usize, hit1);
                cost = cost.min(tmp);
            }
            let tmp = self.fine.range_bytes(hit0, cbounds[c0] as usize)
                + self.coarse_estimate(if c0 > 0 { c0 - 1 } else { 0 }, c1)
                + self.fine.range_bytes(hit1, cbounds[c1] as usize);
            cost = cost.min(tmp);
            if c0 > 0 {
                let tmp = self.fine.range_bytes(cbounds[c0 - 1] as usize, hit0)
                    + self.coarse_estimate(c0 - 1, c1)
                    + self.fine.range_bytes(hit1, cbounds[c1] as usize);
                cost = cost.min(tmp);
            }
            cost
        };
        if (cost as f64) >= 0.99 * (fine as f64) {
            fine as f64
        } else {
            cost as f64
        }
    }

    fn write(&mut self, file: &ffi::OsStr) -> Result<()> {
        let cbodies: Vec<Vec<u8>> = {
            self.coarse.activate_all()?;
            (0..self.coarse.len())
                .map(|i| Ok(self.coarse.get(i)?.to_bytes()))
                .collect::<Result<_>>()?
        };
        let cbounds = self.cbounds.clone();

        let trailer = move |buf: &mut Vec<u8>, width: u8| -> Result<()> {
            if cbounds.len() < 2 {
                return Ok(());
            }
            let nc = (cbounds.len() - 1) as u32;
            buf.extend_from_slice(&nc.to_le_bytes());
            for b in cbounds.iter() {
                buf.extend_from_slice(&b.to_le_bytes());
            }
            let mut off =
                (buf.len() + (cbodies.len() + 1) * (width as usize)) as u64;
            encode_offset(buf, off, width);
            for body in cbodies.iter() {
                off += body.len() as u64;
                encode_offset(buf, off, width);
            }
            for body in cbodies.iter() {
                buf.extend_from_slice(body);
            }
            Ok(())
        };

        relic::write_equality(
            file,
            IndexType::Fuzz,
            self.fine.nrows(),
            &self.vals,
            &mut self.fine,
            Some(&trailer),
        )?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "fuzz_test.rs"]
mod fuzz_test;
