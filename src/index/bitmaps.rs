//! Module implement the bitmap list shared by every index encoding.

use log::debug;

use std::sync::Arc;

use crate::{storage::Storage, Bitvector, Error, Result};

/// Ordered list of equal-sized bitmaps with lazy activation.
///
/// When loaded from a file the bodies stay unread until first touched,
/// `offsets[i]..offsets[i+1]` delimits bitmap `i` within the backing
/// storage. A freshly built list has no offsets until it is written.
pub(crate) struct Bitmaps {
    nrows: u32,
    offsets: Vec<u64>,
    bits: Vec<Option<Bitvector>>,
    storage: Option<Arc<Storage>>,
}

impl Bitmaps {
    /// In-memory list, fully active.
    pub fn from_bits(nrows: u32, bits: Vec<Bitvector>) -> Bitmaps {
        Bitmaps {
            nrows,
            offsets: vec![],
            bits: bits.into_iter().map(Some).collect(),
            storage: None,
        }
    }

    /// All-zero list of `n` bitmaps, the starting point when building.
    pub fn new_empty(nrows: u32, n: usize) -> Bitmaps {
        let bits = (0..n).map(|_| Some(Bitvector::new())).collect();
        Bitmaps { nrows, offsets: vec![], bits, storage: None }
    }

    /// Lazy list over `storage`, bodies activate on demand.
    pub fn load(nrows: u32, offsets: Vec<u64>, storage: Arc<Storage>) -> Bitmaps {
        let n = offsets.len().saturating_sub(1);
        let bits = (0..n).map(|_| None).collect();
        Bitmaps { nrows, offsets, bits, storage: Some(storage) }
    }

    #[inline]
    pub fn nrows(&self) -> u32 {
        self.nrows
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Serialized bytes of bitmap `i`, from the offset table when present.
    pub fn bin_bytes(&self, i: usize) -> u64 {
        if i + 1 < self.offsets.len() {
            self.offsets[i + 1] - self.offsets[i]
        } else {
            match self.bits.get(i) {
                Some(Some(bv)) => bv.bytes() as u64,
                _ => 0,
            }
        }
    }

    /// Summed serialized bytes of bitmaps `[lo, hi)`.
    pub fn range_bytes(&self, lo: usize, hi: usize) -> u64 {
        (lo..hi.min(self.len())).map(|i| self.bin_bytes(i)).sum()
    }

    /// Summed serialized bytes of the whole list.
    pub fn total_bytes(&self) -> u64 {
        self.range_bytes(0, self.len())
    }

    /// Decode bitmap `i` from the backing storage unless already active.
    pub fn activate(&mut self, i: usize) -> Result<()> {
        if i >= self.bits.len() || self.bits[i].is_some() {
            return Ok(());
        }
        let storage = match &self.storage {
            Some(storage) => storage,
            None => return err_at!(CorruptIndex, msg: "no storage for bitmap {}", i),
        };
        let (begin, end) = (self.offsets[i] as usize, self.offsets[i + 1] as usize);
        let bv = if begin == end {
            Bitvector::zeros(self.nrows as usize)
        } else {
            let bv = Bitvector::from_slice(&storage.as_slice()[begin..end])?;
            if bv.size() != self.nrows as usize {
                return err_at!(
                    CorruptIndex, msg: "bitmap {} of {} bits, expected {}", i,
                    bv.size(), self.nrows
                );
            }
            bv
        };
        debug!(target: "index", "activated bitmap {} [{}..{})", i, begin, end);
        self.bits[i] = Some(bv);
        Ok(())
    }

    pub fn activate_range(&mut self, lo: usize, hi: usize) -> Result<()> {
        for i in lo..hi.min(self.bits.len()) {
            self.activate(i)?;
        }
        Ok(())
    }

    pub fn activate_all(&mut self) -> Result<()> {
        self.activate_range(0, self.bits.len())
    }

    /// Bitmap `i`, activating it first.
    pub fn get(&mut self, i: usize) -> Result<&Bitvector> {
        self.activate(i)?;
        match self.bits.get(i).and_then(|b| b.as_ref()) {
            Some(bv) => Ok(bv),
            None => err_at!(CorruptIndex, msg: "bitmap {} of {}", i, self.bits.len()),
        }
    }

    /// Set `row` in bitmap `bin`, the build path. Bitmaps grow as rows
    /// stream in and are squared off with [Bitmaps::finish].
    pub fn set_bit(&mut self, bin: usize, row: usize) {
        if let Some(Some(bv)) = self.bits.get_mut(bin) {
            bv.set_bit(row, true);
        }
    }

    /// Square every bitmap off to the row count.
    pub fn finish(&mut self) {
        let nrows = self.nrows as usize;
        for bv in self.bits.iter_mut().flatten() {
            bv.adjust_size(0, nrows);
        }
    }

    /// OR of bitmaps `[lo, hi)`, pairwise to keep intermediates compact.
    pub fn sum_bins(&mut self, lo: usize, hi: usize) -> Result<Bitvector> {
        let hi = hi.min(self.len());
        if lo >= hi {
            return Ok(Bitvector::zeros(self.nrows as usize));
        }
        self.activate_range(lo, hi)?;

        let mut level: Vec<Bitvector> = Vec::with_capacity((hi - lo + 1) / 2);
        let mut i = lo;
        while i < hi {
            let a = self.bits[i].as_ref().unwrap();
            match self.bits.get(i + 1).filter(|_| i + 1 < hi) {
                Some(Some(b)) => level.push(a.or(b)?),
                _ => level.push(a.clone()),
            }
            i += 2;
        }
        while level.len() > 1 {
            let mut next = Vec::with_capacity((level.len() + 1) / 2);
            let mut it = level.into_iter();
            while let Some(a) = it.next() {
                match it.next() {
                    Some(b) => next.push(a.or(&b)?),
                    None => next.push(a),
                }
            }
            level = next;
        }
        Ok(level.pop().unwrap())
    }

    /// OR bitmaps `[lo, hi)` into `into`.
    pub fn add_bins(&mut self, lo: usize, hi: usize, into: &mut Bitvector) -> Result<()> {
        let sum = self.sum_bins(lo, hi)?;
        into.or_inplace(&sum)
    }
}
