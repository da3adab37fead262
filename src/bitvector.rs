//! Module implement a word-aligned run-length compressed bitvector.
//!
//! Bits are packed into 32-bit words carrying 31 payload bits each. A word
//! is either a _literal_, bit-31 clear and 31 bits stored verbatim, or a
//! _fill_, bit-31 set, bit-30 holding the fill bit and the low 30 bits
//! counting how many consecutive 31-bit groups the fill covers. A trailing
//! partial group, fewer than 31 bits, lives in a separate _active_ word
//! together with its valid-bit count, so the logical size of the vector is
//! exact even though the run-length form only counts whole groups.
//!
//! All construction paths, append, boolean operators, decode, produce the
//! canonical compressed form, adjacent compatible runs are merged and a
//! run of exactly one group is stored as a literal.

use std::{cmp, fmt, result};

use crate::{Error, Result};

/// Number of payload bits in each word.
pub const MAXBITS: usize = 31;
/// Payload mask, a literal word with every bit set.
pub const ALLONES: u32 = 0x7FFF_FFFF;
/// Maximum number of groups a single fill word can count.
pub const MAXCNT: u32 = 0x3FFF_FFFF;

const HEADER0: u32 = 0x8000_0000; // fill word of zeros
const HEADER1: u32 = 0xC000_0000; // fill word of ones
const FILLBIT: u32 = 0x4000_0000;

#[inline]
fn is_fill(w: u32) -> bool {
    w > ALLONES
}

#[inline]
fn fill_bit(w: u32) -> bool {
    (w & FILLBIT) != 0
}

#[inline]
fn fill_count(w: u32) -> u32 {
    w & MAXCNT
}

// number of 31-bit groups a stored word covers.
#[inline]
fn word_groups(w: u32) -> usize {
    if is_fill(w) {
        fill_count(w) as usize
    } else {
        1
    }
}

/// Compressed ordered bit sequence of a fixed logical size.
///
/// Boolean operators require both operands to be of the same size and
/// produce a result of that size. Use [Bitvector::zeros] and
/// [Bitvector::ones] for uniform vectors, [Bitvector::set_bit] and the
/// append methods to build arbitrary content.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Bitvector {
    m_vec: Vec<u32>,
    active_val: u32,
    active_nbits: u32, // < MAXBITS
    nbits: usize,      // bits covered by m_vec, excludes the active word
}

impl fmt::Debug for Bitvector {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(
            f,
            "bitvector<size:{} cnt:{} words:{}>",
            self.size(),
            self.cnt(),
            self.m_vec.len()
        )
    }
}

impl Bitvector {
    /// Create an empty bitvector of size zero.
    pub fn new() -> Bitvector {
        Bitvector::default()
    }

    /// Create an all-zero bitvector of `n` bits.
    pub fn zeros(n: usize) -> Bitvector {
        let mut bv = Bitvector::new();
        bv.pad(false, n);
        bv
    }

    /// Create an all-one bitvector of `n` bits.
    pub fn ones(n: usize) -> Bitvector {
        let mut bv = Bitvector::new();
        bv.pad(true, n);
        bv
    }

    /// Total number of bits represented, compressed or not.
    #[inline]
    pub fn size(&self) -> usize {
        self.nbits + (self.active_nbits as usize)
    }

    /// Number of set bits. Runs in time proportional to the compressed size.
    pub fn cnt(&self) -> usize {
        let mut n = 0;
        for &w in self.m_vec.iter() {
            if is_fill(w) {
                if fill_bit(w) {
                    n += MAXBITS * fill_count(w) as usize;
                }
            } else {
                n += w.count_ones() as usize;
            }
        }
        n + self.active_val.count_ones() as usize
    }

    /// Serialized size in bytes, the regular words plus the two trailer words.
    #[inline]
    pub fn bytes(&self) -> usize {
        (self.m_vec.len() + 2) * 4
    }

    /// Number of 32-bit words in the run-length encoded body.
    #[inline]
    pub fn words(&self) -> usize {
        self.m_vec.len()
    }
}

impl Bitvector {
    /// Append a single bit.
    pub fn append_bit(&mut self, bit: bool) {
        self.active_val = (self.active_val << 1) | (bit as u32);
        self.active_nbits += 1;
        if self.active_nbits as usize == MAXBITS {
            let w = self.active_val;
            self.active_val = 0;
            self.active_nbits = 0;
            self.append_literal(w);
        }
    }

    /// Append one full 31-bit group, given as a literal payload. The vector
    /// must be group-aligned, that is, the active word must be empty.
    pub fn append_literal(&mut self, w: u32) {
        debug_assert_eq!(self.active_nbits, 0);
        debug_assert_eq!(w & !ALLONES, 0);

        if w == 0 {
            match self.m_vec.last_mut() {
                Some(last) if *last == 0 => *last = HEADER0 | 2,
                Some(last) if (*last & !MAXCNT) == HEADER0 && fill_count(*last) < MAXCNT => {
                    *last += 1
                }
                _ => self.m_vec.push(w),
            }
        } else if w == ALLONES {
            match self.m_vec.last_mut() {
                Some(last) if *last == ALLONES => *last = HEADER1 | 2,
                Some(last) if (*last & !MAXCNT) == HEADER1 && fill_count(*last) < MAXCNT => {
                    *last += 1
                }
                _ => self.m_vec.push(w),
            }
        } else {
            self.m_vec.push(w);
        }
        self.nbits += MAXBITS;
    }

    /// Append `n` uniform 31-bit groups of `bit`. The active word must be
    /// empty.
    pub fn append_counter(&mut self, bit: bool, mut n: u32) {
        if n == 0 {
            return;
        }
        debug_assert_eq!(self.active_nbits, 0);
        if n == 1 {
            self.append_literal(if bit { ALLONES } else { 0 });
            return;
        }

        let head = if bit { HEADER1 } else { HEADER0 };
        let lit = if bit { ALLONES } else { 0 };
        self.nbits += MAXBITS * (n as usize);

        match self.m_vec.last_mut() {
            Some(last) if (*last & !MAXCNT) == head => {
                let room = MAXCNT - fill_count(*last);
                let take = cmp::min(room, n);
                *last += take;
                n -= take;
            }
            Some(last) if *last == lit => {
                *last = head | 1; // absorb the literal into the fill
                let take = cmp::min(MAXCNT - 1, n);
                *last += take;
                n -= take;
            }
            _ => (),
        }
        while n > 0 {
            let take = cmp::min(MAXCNT, n);
            self.m_vec.push(head | take);
            n -= take;
        }
    }

    // extend with uniform bits until the total size reaches `upto`.
    fn pad(&mut self, bit: bool, upto: usize) {
        while self.active_nbits > 0 && self.size() < upto {
            self.append_bit(bit);
        }
        let remaining = upto.saturating_sub(self.size());
        self.append_counter(bit, (remaining / MAXBITS) as u32);
        for _ in 0..(remaining % MAXBITS) {
            self.append_bit(bit);
        }
    }

    /// Make the vector exactly `n` bits long, padding with ones up to
    /// `n_ones` first and with zeros after, truncating when oversized.
    pub fn adjust_size(&mut self, n_ones: usize, n: usize) {
        if self.size() == n {
            return;
        }
        if self.size() < n_ones {
            self.pad(true, cmp::min(n_ones, n));
        }
        if self.size() < n {
            self.pad(false, n);
        } else if self.size() > n {
            *self = self.truncated(n);
        }
    }

    // first `count` bits of a 31-bit payload, most significant payload bit
    // first.
    fn append_group_prefix(&mut self, payload: u32, count: usize) {
        for k in 0..count {
            self.append_bit(payload & (1 << (MAXBITS - 1 - k)) != 0);
        }
    }

    fn truncated(&self, n: usize) -> Bitvector {
        let mut out = Bitvector::new();
        let mut pos = 0;
        for &w in self.m_vec.iter() {
            if pos >= n {
                break;
            }
            let groups = word_groups(w);
            let take = cmp::min(groups * MAXBITS, n - pos);
            if is_fill(w) {
                out.append_counter(fill_bit(w), (take / MAXBITS) as u32);
                let payload = if fill_bit(w) { ALLONES } else { 0 };
                out.append_group_prefix(payload, take % MAXBITS);
            } else if take == MAXBITS {
                out.append_literal(w);
            } else {
                out.append_group_prefix(w, take);
            }
            pos += take;
        }
        if pos < n {
            let take = cmp::min(self.active_nbits as usize, n - pos);
            let payload = self.active_val << (MAXBITS as u32 - self.active_nbits);
            out.append_group_prefix(payload, take);
        }
        out
    }
}

impl Bitvector {
    /// Read bit `i`. Out-of-range positions read as zero.
    pub fn get_bit(&self, i: usize) -> bool {
        if i < self.nbits {
            let g = i / MAXBITS;
            let off = i % MAXBITS;
            let mut pos = 0;
            for &w in self.m_vec.iter() {
                let groups = word_groups(w);
                if g < pos + groups {
                    return if is_fill(w) {
                        fill_bit(w)
                    } else {
                        (w >> (MAXBITS - 1 - off)) & 1 == 1
                    };
                }
                pos += groups;
            }
            unreachable!()
        } else if i < self.size() {
            let off = (i - self.nbits) as u32;
            (self.active_val >> (self.active_nbits - 1 - off)) & 1 == 1
        } else {
            false
        }
    }

    /// Set or clear bit `i`, growing the vector with zeros when `i` is past
    /// the current size. Growing by appending is cheap; rewriting a bit
    /// inside an existing fill splits the fill and re-canonicalizes.
    pub fn set_bit(&mut self, i: usize, bit: bool) {
        if i >= self.size() {
            self.pad(false, i);
            self.append_bit(bit);
        } else if i >= self.nbits {
            let off = (i - self.nbits) as u32;
            let mask = 1 << (self.active_nbits - 1 - off);
            if bit {
                self.active_val |= mask;
            } else {
                self.active_val &= !mask;
            }
        } else {
            self.set_bit_in_vec(i, bit);
        }
    }

    fn set_bit_in_vec(&mut self, i: usize, bit: bool) {
        let g = i / MAXBITS;
        let off = i % MAXBITS;
        let mask = 1 << (MAXBITS - 1 - off);

        let mut pos = 0; // group index at the start of word `at`
        let mut at = 0;
        loop {
            let groups = word_groups(self.m_vec[at]);
            if g < pos + groups {
                break;
            }
            pos += groups;
            at += 1;
        }

        let w = self.m_vec[at];
        if !is_fill(w) {
            let nw = if bit { w | mask } else { w & !mask };
            if nw == w {
                return;
            }
            self.m_vec[at] = nw;
            if nw == 0 || nw == ALLONES {
                self.compress();
            }
            return;
        }
        if fill_bit(w) == bit {
            return;
        }

        // split the fill into pre-fill, modified literal, post-fill
        let fill_lit = if fill_bit(w) { ALLONES } else { 0 };
        let lit = if bit { fill_lit | mask } else { fill_lit & !mask };
        let pre = (g - pos) as u32;
        let post = fill_count(w) - pre - 1;
        let head = w & !MAXCNT;

        let mut repl = Vec::with_capacity(3);
        if pre > 0 {
            repl.push(if pre == 1 { fill_lit } else { head | pre });
        }
        repl.push(lit);
        if post > 0 {
            repl.push(if post == 1 { fill_lit } else { head | post });
        }
        self.m_vec.splice(at..at + 1, repl);
    }

    /// Coalesce adjacent compatible words, restoring the canonical form.
    pub fn compress(&mut self) {
        let mut out = Bitvector::new();
        out.m_vec.reserve(self.m_vec.len());
        for &w in self.m_vec.iter() {
            if is_fill(w) {
                out.append_counter(fill_bit(w), fill_count(w));
            } else {
                out.append_literal(w);
            }
        }
        out.active_val = self.active_val;
        out.active_nbits = self.active_nbits;
        *self = out;
    }

    /// Complement every bit in place.
    pub fn flip(&mut self) {
        for w in self.m_vec.iter_mut() {
            if is_fill(*w) {
                *w ^= FILLBIT;
            } else {
                *w = !*w & ALLONES;
            }
        }
        if self.active_nbits > 0 {
            self.active_val = !self.active_val & ((1 << self.active_nbits) - 1);
        }
    }
}

enum Op {
    And,
    Or,
    Xor,
    AndNot,
}

impl Op {
    #[inline]
    fn apply(&self, x: u32, y: u32) -> u32 {
        match self {
            Op::And => x & y,
            Op::Or => x | y,
            Op::Xor => x ^ y,
            Op::AndNot => x & (!y & ALLONES),
        }
    }
}

// Cursor over the run-length encoded words, decoding one run at a time.
struct Run<'a> {
    it: std::slice::Iter<'a, u32>,
    n: u32,    // groups remaining in the current run
    word: u32, // literal payload, or the expanded fill group
    fill: bool,
}

impl<'a> Run<'a> {
    fn new(words: &'a [u32]) -> Run<'a> {
        Run { it: words.iter(), n: 0, word: 0, fill: false }
    }

    fn advance(&mut self) -> bool {
        match self.it.next() {
            Some(&w) if is_fill(w) => {
                self.n = fill_count(w);
                self.word = if fill_bit(w) { ALLONES } else { 0 };
                self.fill = true;
                true
            }
            Some(&w) => {
                self.n = 1;
                self.word = w;
                self.fill = false;
                true
            }
            None => false,
        }
    }
}

impl Bitvector {
    fn binary_op(&self, other: &Bitvector, op: Op) -> Result<Bitvector> {
        if self.size() != other.size() {
            return err_at!(SizeMismatch, msg: "{} != {}", self.size(), other.size());
        }

        let mut res = Bitvector::new();
        res.m_vec.reserve(cmp::max(self.m_vec.len(), other.m_vec.len()));

        let mut x = Run::new(&self.m_vec);
        let mut y = Run::new(&other.m_vec);
        loop {
            if x.n == 0 && !x.advance() {
                break;
            }
            if y.n == 0 && !y.advance() {
                break;
            }
            if x.fill && y.fill {
                let n = cmp::min(x.n, y.n);
                let w = op.apply(x.word, y.word);
                res.append_counter(w == ALLONES, n);
                x.n -= n;
                y.n -= n;
            } else {
                res.append_literal(op.apply(x.word, y.word));
                x.n -= 1;
                y.n -= 1;
            }
        }

        res.active_nbits = self.active_nbits;
        if self.active_nbits > 0 {
            let mask = (1 << self.active_nbits) - 1;
            res.active_val = op.apply(self.active_val, other.active_val) & mask;
        }
        Ok(res)
    }

    /// Bitwise AND. Both vectors must be of the same size.
    pub fn and(&self, other: &Bitvector) -> Result<Bitvector> {
        self.binary_op(other, Op::And)
    }

    /// Bitwise OR. Both vectors must be of the same size.
    pub fn or(&self, other: &Bitvector) -> Result<Bitvector> {
        self.binary_op(other, Op::Or)
    }

    /// Bitwise XOR. Both vectors must be of the same size.
    pub fn xor(&self, other: &Bitvector) -> Result<Bitvector> {
        self.binary_op(other, Op::Xor)
    }

    /// Bitwise difference, `self AND NOT other`. Both vectors must be of
    /// the same size.
    pub fn minus(&self, other: &Bitvector) -> Result<Bitvector> {
        self.binary_op(other, Op::AndNot)
    }

    pub fn and_inplace(&mut self, other: &Bitvector) -> Result<()> {
        *self = self.and(other)?;
        Ok(())
    }

    pub fn or_inplace(&mut self, other: &Bitvector) -> Result<()> {
        *self = self.or(other)?;
        Ok(())
    }

    pub fn xor_inplace(&mut self, other: &Bitvector) -> Result<()> {
        *self = self.xor(other)?;
        Ok(())
    }

    pub fn minus_inplace(&mut self, other: &Bitvector) -> Result<()> {
        *self = self.minus(other)?;
        Ok(())
    }
}

impl Bitvector {
    /// Serialize into `buf`. The layout is the run-length words, then one
    /// word holding the active value and one word holding the total number
    /// of bits, all little-endian.
    pub fn write(&self, buf: &mut Vec<u8>) {
        buf.reserve(self.bytes());
        for &w in self.m_vec.iter() {
            buf.extend_from_slice(&w.to_le_bytes());
        }
        buf.extend_from_slice(&self.active_val.to_le_bytes());
        buf.extend_from_slice(&(self.size() as u32).to_le_bytes());
    }

    /// Serialize into a fresh byte vector, the inverse of
    /// [Bitvector::from_slice].
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.bytes());
        self.write(&mut buf);
        buf
    }

    /// Decode a bitvector from its serialized form.
    pub fn from_slice(buf: &[u8]) -> Result<Bitvector> {
        if buf.len() < 8 || buf.len() % 4 != 0 {
            return err_at!(CorruptIndex, msg: "bitvector body {} bytes", buf.len());
        }
        let mut words = Vec::with_capacity(buf.len() / 4);
        for chunk in buf.chunks_exact(4) {
            let mut quad = [0_u8; 4];
            quad.copy_from_slice(chunk);
            words.push(u32::from_le_bytes(quad));
        }

        let n = words.pop().unwrap() as usize;
        let active_val = words.pop().unwrap();

        let mut nbits = 0;
        for &w in words.iter() {
            if is_fill(w) && fill_count(w) == 0 {
                return err_at!(CorruptIndex, msg: "zero length fill word");
            }
            nbits += word_groups(w) * MAXBITS;
        }
        if n < nbits || n - nbits >= MAXBITS {
            return err_at!(CorruptIndex, msg: "bit count {} vs {} words", n, nbits);
        }
        let active_nbits = (n - nbits) as u32;
        if active_nbits == 0 && active_val != 0 {
            return err_at!(CorruptIndex, msg: "stray active word {:x}", active_val);
        }
        if active_nbits > 0 && (active_val & !((1 << active_nbits) - 1)) != 0 {
            return err_at!(CorruptIndex, msg: "active word {:x} overflows", active_val);
        }

        Ok(Bitvector { m_vec: words, active_val, active_nbits, nbits })
    }

    /// Iterate the positions of set bits in ascending order.
    pub fn iter_ones(&self) -> Ones {
        Ones {
            words: self.m_vec.iter(),
            lit: 0,
            lit_bits: 0,
            fill_ones: 0,
            pos: 0,
            active: Some((self.active_val, self.active_nbits)),
        }
    }

    /// Positions of set bits, materialized.
    pub fn to_positions(&self) -> Vec<u32> {
        self.iter_ones().map(|p| p as u32).collect()
    }
}

/// Iterator over set bit positions, see [Bitvector::iter_ones].
pub struct Ones<'a> {
    words: std::slice::Iter<'a, u32>,
    lit: u32,
    lit_bits: u32,
    fill_ones: usize,
    pos: usize,
    active: Option<(u32, u32)>,
}

impl<'a> Iterator for Ones<'a> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        loop {
            if self.fill_ones > 0 {
                self.fill_ones -= 1;
                let p = self.pos;
                self.pos += 1;
                return Some(p);
            }
            while self.lit_bits > 0 {
                let bit = self.lit & (1 << (MAXBITS - 1)) != 0;
                self.lit <<= 1;
                self.lit_bits -= 1;
                let p = self.pos;
                self.pos += 1;
                if bit {
                    return Some(p);
                }
            }
            match self.words.next() {
                Some(&w) if is_fill(w) => {
                    let n = fill_count(w) as usize * MAXBITS;
                    if fill_bit(w) {
                        self.fill_ones = n;
                    } else {
                        self.pos += n;
                    }
                }
                Some(&w) => {
                    self.lit = w; // first payload bit is bit 30
                    self.lit_bits = MAXBITS as u32;
                }
                None => match self.active.take() {
                    Some((val, nbits)) if nbits > 0 => {
                        self.lit = val << (MAXBITS as u32 - nbits);
                        self.lit_bits = nbits;
                    }
                    _ => return None,
                },
            }
        }
    }
}

#[cfg(test)]
#[path = "bitvector_test.rs"]
mod bitvector_test;
