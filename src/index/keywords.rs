//! Module implement the keyword, term to document, index.

use log::{info, warn};

use std::{
    collections::BTreeMap,
    ffi, fs,
    io::{BufRead, BufReader},
    path::Path,
    sync::Arc,
};

use crate::{
    index::{
        self, decode_offsets, encode_offset, offset_width_for, Bitmaps, Header,
        IndexType,
    },
    query::{ContinuousRange, DiscreteRange},
    storage::Storage,
    util, Bitvector, Dictionary, Error, Result,
};

/// Keyword index over a text column.
///
/// One bitmap per term, bitmap slot equals the term's dictionary id.
/// Slot 0 is the null mask, rows in which no term occurs at all. The
/// term dictionary lives in a sidecar file next to the index.
pub struct Keywords {
    dict: Dictionary,
    bitmaps: Bitmaps,
}

// `<col>.idx` to `<col>.terms`, the dictionary sidecar.
fn terms_file_of(idx_file: &ffi::OsStr) -> ffi::OsString {
    let mut name = idx_file.to_os_string();
    if let Some(s) = name.to_str() {
        if let Some(stem) = s.strip_suffix(".idx") {
            return format!("{}.terms", stem).into();
        }
    }
    name.push(".terms");
    name
}

impl Keywords {
    /// Build from a term-document list file. Each line reads
    /// `term : id1, id2, ...`, a trailing `\` continues the line and
    /// lines starting with `#` or `--` are comments. Without `id_rows`
    /// the listed ids are row numbers, with it they are looked up in the
    /// id column and rerouted to the rows holding them.
    pub fn from_tdlist(
        file: &ffi::OsStr,
        nrows: u32,
        id_rows: Option<&[u32]>,
    ) -> Result<Keywords> {
        let fd = err_at!(IOError, fs::File::open(file), "tdlist {:?}", file)?;

        // id value to the rows carrying it, sorted-position mapping
        let id_map: Option<Vec<(u32, u32)>> = id_rows.map(|ids| {
            let mut pairs: Vec<(u32, u32)> =
                ids.iter().enumerate().map(|(row, id)| (*id, row as u32)).collect();
            pairs.sort_unstable();
            pairs
        });

        let mut terms: BTreeMap<String, Vec<u32>> = BTreeMap::new();
        let mut logical = String::new();
        for line in BufReader::new(fd).lines() {
            let line = err_at!(IOError, line)?;
            let text = line.trim();
            if text.is_empty() || text.starts_with('#') || text.starts_with("--") {
                continue;
            }
            match text.strip_suffix('\\') {
                Some(cont) => {
                    logical.push_str(cont);
                    continue;
                }
                None => logical.push_str(text),
            }

            match parse_tdline(&logical) {
                Ok(Some((term, ids))) => {
                    let rows = terms.entry(term).or_insert_with(Vec::new);
                    for id in ids {
                        match &id_map {
                            Some(pairs) => {
                                let p = pairs.partition_point(|(v, _)| *v < id);
                                for (v, row) in &pairs[p..] {
                                    if *v != id {
                                        break;
                                    }
                                    rows.push(*row);
                                }
                            }
                            None => rows.push(id),
                        }
                    }
                }
                Ok(None) => (),
                Err(err) => {
                    warn!(target: "index", "skipping tdlist line: {}", err)
                }
            }
            logical.clear();
        }

        let mut dict = Dictionary::new();
        let mut bits = vec![Bitvector::new()];
        for (term, rows) in terms.iter() {
            let id = dict.insert(term);
            debug_assert_eq!(id as usize, bits.len());
            let mut bv = Bitvector::new();
            for row in rows.iter() {
                if (*row as usize) < (nrows as usize) {
                    bv.set_bit(*row as usize, true);
                }
            }
            bv.adjust_size(0, nrows as usize);
            bits.push(bv);
        }

        // slot 0 is the null mask, rows without any term
        let mut any = Bitvector::zeros(nrows as usize);
        for bv in bits.iter().skip(1) {
            any.or_inplace(bv)?;
        }
        any.flip();
        bits[0] = any;

        info!(target: "index", "{} terms from tdlist {:?}", dict.len(), file);

        let bitmaps = Bitmaps::from_bits(nrows, bits);
        Ok(Keywords { dict, bitmaps })
    }

    pub(crate) fn load(
        idx_file: &ffi::OsStr,
        storage: Arc<Storage>,
        header: Header,
    ) -> Result<Keywords> {
        let offsets = decode_offsets(
            storage.as_slice(),
            index::HEADER_SIZE,
            header.offset_width,
            header.nobs as usize,
        )?;
        let bitmaps = Bitmaps::load(header.nrows, offsets, storage);

        let terms_file = terms_file_of(idx_file);
        let dict = match Path::new(&terms_file).is_file() {
            true => Dictionary::load(&terms_file)?,
            false => {
                return err_at!(CorruptIndex, msg: "missing terms {:?}", terms_file)
            }
        };
        if dict.len() + 1 != header.nobs as usize {
            return err_at!(
                CorruptIndex, msg: "{} terms for {} bitmaps", dict.len(),
                header.nobs
            );
        }
        Ok(Keywords { dict, bitmaps })
    }

    /// Number of distinct terms.
    pub fn nterms(&self) -> usize {
        self.dict.len()
    }

    /// Rows in which `term` occurs. Unknown terms match nothing.
    pub fn search(&mut self, term: &str) -> Result<Bitvector> {
        match self.dict.find(term) {
            0 => Ok(Bitvector::zeros(self.bitmaps.nrows() as usize)),
            id => Ok(self.bitmaps.get(id as usize)?.clone()),
        }
    }

    /// Rows in which any of `terms` occurs.
    pub fn search_any(&mut self, terms: &[String]) -> Result<Bitvector> {
        let mut res = Bitvector::zeros(self.bitmaps.nrows() as usize);
        for term in terms.iter() {
            match self.dict.find(term) {
                0 => (),
                id => res.or_inplace(self.bitmaps.get(id as usize)?)?,
            }
        }
        Ok(res)
    }

    /// Rows without any term.
    pub fn null_mask(&mut self) -> Result<Bitvector> {
        Ok(self.bitmaps.get(0)?.clone())
    }
}

impl index::Index for Keywords {
    fn itype(&self) -> IndexType {
        IndexType::Keywords
    }

    fn nrows(&self) -> u32 {
        self.bitmaps.nrows()
    }

    fn nobs(&self) -> u32 {
        self.bitmaps.len() as u32
    }

    // numeric ranges do not apply to terms
    fn evaluate(&mut self, _range: &ContinuousRange) -> Result<Bitvector> {
        Ok(Bitvector::zeros(self.bitmaps.nrows() as usize))
    }

    fn evaluate_discrete(&mut self, _range: &DiscreteRange) -> Result<Bitvector> {
        Ok(Bitvector::zeros(self.bitmaps.nrows() as usize))
    }

    fn estimate_cost(&self, _range: &ContinuousRange) -> f64 {
        0.0
    }

    fn search(&mut self, term: &str) -> Result<Bitvector> {
        Keywords::search(self, term)
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
            itype: IndexType::Keywords,
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
        self.dict.save(&terms_file_of(file))?;
        crate::storage::filemgr().unload(file);
        Ok(())
    }
}

// `term : id1, id2, ...`, None for lines without ids.
fn parse_tdline(line: &str) -> Result<Option<(String, Vec<u32>)>> {
    let mut parts = line.splitn(2, ':');
    let term = match parts.next() {
        Some(term) if !term.trim().is_empty() => term.trim().to_string(),
        _ => return err_at!(InvalidInput, msg: "tdlist line {:?}", line),
    };
    let ids = match parts.next() {
        Some(rest) => rest,
        None => return err_at!(InvalidInput, msg: "tdlist line {:?} has no ':'", line),
    };

    let mut out = vec![];
    for tok in ids.split(',') {
        let tok = tok.trim();
        if tok.is_empty() {
            continue;
        }
        out.push(err_at!(FailConvert, tok.parse::<u32>(), "tdlist id {:?}", tok)?);
    }
    Ok(if out.is_empty() { None } else { Some((term, out)) })
}

#[cfg(test)]
#[path = "keywords_test.rs"]
mod keywords_test;
