//! Module implement typed views over storage regions.
//!
//! An [Array] reads little-endian fixed-width numbers out of a [Storage]
//! window without copying. The decode-on-read accessors keep the view
//! independent of host alignment and byte order. Mutating access first
//! promotes the view into an owned vector, see [Array::make_mut], which is
//! the copy-on-write step protecting shared and file-mapped storages.

use std::{cmp::Ordering, convert::TryInto, fmt, marker, sync::Arc};

use crate::{storage::Storage, Error, Result};

/// Fixed width numeric element of a column file, little-endian on disk.
pub trait Element:
    Copy + PartialOrd + PartialEq + Default + fmt::Debug + 'static
{
    /// Serialized width in bytes.
    const WIDTH: usize;

    fn read_le(buf: &[u8]) -> Self;
    fn write_le(&self, buf: &mut Vec<u8>);
    fn to_f64(&self) -> f64;
    fn from_f64(val: f64) -> Self;
}

macro_rules! impl_element {
    ($($t:ident),*) => {$(
        impl Element for $t {
            const WIDTH: usize = std::mem::size_of::<$t>();

            #[inline]
            fn read_le(buf: &[u8]) -> $t {
                $t::from_le_bytes(buf[..Self::WIDTH].try_into().unwrap())
            }

            #[inline]
            fn write_le(&self, buf: &mut Vec<u8>) {
                buf.extend_from_slice(&self.to_le_bytes());
            }

            #[inline]
            fn to_f64(&self) -> f64 {
                *self as f64
            }

            #[inline]
            fn from_f64(val: f64) -> $t {
                val as $t
            }
        }
    )*};
}

impl_element![u8, i8, u16, i16, u32, i32, u64, i64, f32, f64];

// ordering that tolerates NaN, treating incomparable pairs as equal.
#[inline]
pub(crate) fn cmp_elem<T: PartialOrd>(a: &T, b: &T) -> Ordering {
    a.partial_cmp(b).unwrap_or(Ordering::Equal)
}

enum Inner<T> {
    Owned(Vec<T>),
    View {
        storage: Arc<Storage>,
        begin: usize, // byte offset into the storage
        len: usize,   // element count
    },
}

/// Typed view over a [Storage] region, or an owned vector of elements.
pub struct Array<T>
where
    T: Element,
{
    inner: Inner<T>,
    _t: marker::PhantomData<T>,
}

impl<T> fmt::Debug for Array<T>
where
    T: Element,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = match &self.inner {
            Inner::Owned(_) => "owned",
            Inner::View { .. } => "view",
        };
        write!(f, "array<{} len:{}>", kind, self.len())
    }
}

impl<T> From<Vec<T>> for Array<T>
where
    T: Element,
{
    fn from(vals: Vec<T>) -> Array<T> {
        Array { inner: Inner::Owned(vals), _t: marker::PhantomData }
    }
}

impl<T> Array<T>
where
    T: Element,
{
    /// View the byte range `[begin, end)` of `storage` as elements.
    pub fn from_storage(
        storage: Arc<Storage>,
        begin: usize,
        end: usize,
    ) -> Result<Array<T>> {
        if end < begin || end > storage.len() {
            return err_at!(
                CorruptIndex, msg: "array window [{}..{}) of {}", begin, end,
                storage.len()
            );
        }
        if (end - begin) % T::WIDTH != 0 {
            return err_at!(
                CorruptIndex, msg: "array window {} not a multiple of {}",
                end - begin, T::WIDTH
            );
        }
        let len = (end - begin) / T::WIDTH;
        let inner = Inner::View { storage, begin, len };
        Ok(Array { inner, _t: marker::PhantomData })
    }

    #[inline]
    pub fn len(&self) -> usize {
        match &self.inner {
            Inner::Owned(vals) => vals.len(),
            Inner::View { len, .. } => *len,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at `i`, panics when out of range.
    #[inline]
    pub fn get(&self, i: usize) -> T {
        match &self.inner {
            Inner::Owned(vals) => vals[i],
            Inner::View { storage, begin, len } => {
                assert!(i < *len, "array index {} of {}", i, len);
                let off = begin + i * T::WIDTH;
                T::read_le(&storage.as_slice()[off..])
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.iter().collect()
    }

    /// Serialize all elements little-endian into `buf`.
    pub fn write(&self, buf: &mut Vec<u8>) {
        buf.reserve(self.len() * T::WIDTH);
        for val in self.iter() {
            val.write_le(buf);
        }
    }

    /// Mutable access, promoting a storage view into an owned vector
    /// first. Views are promoted unconditionally since their backing
    /// storage is shared with the file manager, or file-mapped.
    pub fn make_mut(&mut self) -> &mut Vec<T> {
        if let Inner::View { .. } = self.inner {
            self.inner = Inner::Owned(self.to_vec());
        }
        match &mut self.inner {
            Inner::Owned(vals) => vals,
            Inner::View { .. } => unreachable!(),
        }
    }
}

impl<T> Array<T>
where
    T: Element,
{
    /// First index whose element is `>= key`, assuming ascending order.
    pub fn find_lower(&self, key: T) -> usize {
        let (mut lo, mut hi) = (0, self.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if cmp_elem(&self.get(mid), &key) == Ordering::Less {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// First index whose element is `> key`, assuming ascending order.
    pub fn find_upper(&self, key: T) -> usize {
        let (mut lo, mut hi) = (0, self.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if cmp_elem(&self.get(mid), &key) == Ordering::Greater {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        lo
    }

    /// Sort elements in place, a quicksort hybrid falling back to
    /// insertion sort on short ranges and heap sort when the recursion
    /// budget runs out.
    pub fn sort(&mut self) {
        let vals = self.make_mut();
        let depth = 2 * (usize::BITS - vals.len().leading_zeros()) as usize;
        let mut vals = &mut vals[..];
        introsort(&mut vals, depth);
    }

    /// Fill `idx` with a permutation ordering the elements ascending,
    /// stable across equal elements, merge based.
    pub fn sort_index(&self, idx: &mut Vec<u32>) {
        idx.clear();
        idx.extend(0..self.len() as u32);
        idx.sort_by(|&a, &b| cmp_elem(&self.get(a as usize), &self.get(b as usize)));
    }

    /// The k-th smallest element, zero based, by in-place partitioning.
    pub fn kth_smallest(&self, k: usize) -> Option<T> {
        if k >= self.len() {
            return None;
        }
        let mut vals = self.to_vec();
        let mut lo = 0;
        let mut hi = vals.len();
        loop {
            if hi - lo <= 8 {
                vals[lo..hi].sort_by(cmp_elem);
                return Some(vals[k]);
            }
            let p = partition(&mut vals[lo..hi]) + lo;
            match k.cmp(&p) {
                Ordering::Equal => return Some(vals[p]),
                Ordering::Less => hi = p,
                Ordering::Greater => lo = p + 1,
            }
        }
    }

    /// Stable argsort within each `[starts[i], starts[i+1])` segment of
    /// `idx`, returning the refined segment boundaries, one segment per
    /// run of equal elements. `starts` must begin with 0 and end with
    /// `idx.len()`.
    pub fn sort_within(&self, idx: &mut [u32], starts: &[u32]) -> Vec<u32> {
        let mut fine = vec![0_u32];
        for seg in starts.windows(2) {
            let (s, e) = (seg[0] as usize, seg[1] as usize);
            idx[s..e].sort_by(|&a, &b| {
                cmp_elem(&self.get(a as usize), &self.get(b as usize))
            });
            for i in s + 1..e {
                let prev = self.get(idx[i - 1] as usize);
                let cur = self.get(idx[i] as usize);
                if prev != cur {
                    fine.push(i as u32);
                }
            }
            fine.push(e as u32);
        }
        fine.dedup();
        fine
    }
}

const INSERTION_CUTOFF: usize = 16;

fn introsort<T: Element>(vals: &mut &mut [T], depth: usize) {
    while vals.len() > INSERTION_CUTOFF {
        if depth == 0 {
            heapsort(vals);
            return;
        }
        let p = partition(vals);
        // recurse into the smaller half, loop on the larger
        let (left, right) = std::mem::take(vals).split_at_mut(p);
        let right = &mut right[1..];
        if left.len() < right.len() {
            let mut left = left;
            introsort(&mut left, depth - 1);
            *vals = right;
        } else {
            let mut right = right;
            introsort(&mut right, depth - 1);
            *vals = left;
        }
    }
    insertion_sort(vals);
}

fn insertion_sort<T: Element>(vals: &mut [T]) {
    for i in 1..vals.len() {
        let mut j = i;
        while j > 0 && cmp_elem(&vals[j], &vals[j - 1]) == Ordering::Less {
            vals.swap(j, j - 1);
            j -= 1;
        }
    }
}

// median-of-three single pivot partition, returns the pivot position.
fn partition<T: Element>(vals: &mut [T]) -> usize {
    let n = vals.len();
    let mid = n / 2;
    if cmp_elem(&vals[mid], &vals[0]) == Ordering::Less {
        vals.swap(mid, 0);
    }
    if cmp_elem(&vals[n - 1], &vals[0]) == Ordering::Less {
        vals.swap(n - 1, 0);
    }
    if cmp_elem(&vals[n - 1], &vals[mid]) == Ordering::Less {
        vals.swap(n - 1, mid);
    }
    vals.swap(mid, n - 2);
    let pivot = vals[n - 2];

    let mut store = 1;
    for i in 1..n - 2 {
        if cmp_elem(&vals[i], &pivot) == Ordering::Less {
            vals.swap(i, store);
            store += 1;
        }
    }
    vals.swap(store, n - 2);
    store
}

fn heapsort<T: Element>(vals: &mut [T]) {
    let n = vals.len();
    for i in (0..n / 2).rev() {
        sift_down(vals, i, n);
    }
    for end in (1..n).rev() {
        vals.swap(0, end);
        sift_down(vals, 0, end);
    }
}

fn sift_down<T: Element>(vals: &mut [T], mut root: usize, end: usize) {
    loop {
        let mut child = 2 * root + 1;
        if child >= end {
            break;
        }
        if child + 1 < end && cmp_elem(&vals[child], &vals[child + 1]) == Ordering::Less
        {
            child += 1;
        }
        if cmp_elem(&vals[root], &vals[child]) == Ordering::Less {
            vals.swap(root, child);
            root = child;
        } else {
            break;
        }
    }
}

#[cfg(test)]
#[path = "array_test.rs"]
mod array_test;
