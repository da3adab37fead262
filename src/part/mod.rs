//! Module implement the partition, a directory level table fragment.
//!
//! A partition is a directory of per-column data files, their indexes, a
//! metadata file, an optional active-row mask and an optional list of row
//! identifiers. Queries are expression trees evaluated into row bitmaps,
//! see [Partition::evaluate].
//!
//! Mutations follow a two-directory copy-on-write protocol. A partition
//! configured with a backup directory keeps it as a byte mirror of the
//! active directory. An append streams the new rows into the backup,
//! rewrites its metadata and atomically swaps the roles of the two
//! directories, readers keep the old storages alive through the file
//! manager while the swap happens. Until [Partition::commit] re-mirrors
//! the directories, [Partition::rollback] can swap back and restore the
//! pre-append bytes. Failures fall back to [State::Unknown], from which
//! re-mirroring restores [State::Stable].
//!
//! Within one process a partition handle serializes mutations by taking
//! `&mut self`, across handles and processes an exclusive lock on the
//! metadata file guards the protocol.

mod meta;

use fs2::FileExt;
use log::{info, warn};

use std::{collections::HashMap, ffi, fmt, fs, path, result};

use crate::{
    array::Array,
    column::{self, Column, DataType},
    dict::Dictionary,
    query::{self, CompOp, CompRange, DiscreteRange, LogicalOp, QueryExpr},
    storage::filemgr,
    util, Bitvector, Element, Error, Result,
};

pub(crate) use meta::{ColumnMeta, PartMeta};

/// Partition life cycle states, see the module description.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Stable,
    Receiving,
    PreTransition,
    Transition,
    PostTransition,
    Unknown,
}

/// Row identifier, stable across mutations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rid {
    pub mid: u64,
    pub low: u64,
}

// exclusive cross-process lock over a partition directory, held for the
// duration of a mutation.
struct DirLock {
    fd: fs::File,
}

impl DirLock {
    fn exclusive(dir: &ffi::OsStr) -> Result<DirLock> {
        let fd = util::open_file_r(&meta::meta_file(dir))?;
        err_at!(IOError, fd.lock_exclusive(), "lock {:?}", dir)?;
        Ok(DirLock { fd })
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        self.fd.unlock().ok();
    }
}

/// A partition of vertically organized columns.
pub struct Partition {
    name: String,
    active_dir: ffi::OsString,
    backup_dir: Option<ffi::OsString>,
    columns: Vec<Column>,
    nrows: u32,
    amask: Bitvector,
    rids: Option<Vec<Rid>>,
    state: State,
}

impl fmt::Debug for Partition {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(
            f,
            "partition<{} rows:{} cols:{} {:?}>",
            self.name,
            self.nrows,
            self.columns.len(),
            self.state
        )
    }
}

impl Partition {
    /// Create a fresh, empty partition under `dir`.
    pub fn create(dir: &ffi::OsStr, name: &str) -> Result<Partition> {
        err_at!(IOError, fs::create_dir_all(dir))?;
        let meta = PartMeta::new(name);
        meta.write(dir)?;
        Ok(Partition {
            name: name.to_string(),
            active_dir: dir.to_os_string(),
            backup_dir: None,
            columns: vec![],
            nrows: 0,
            amask: Bitvector::new(),
            rids: None,
            state: State::Stable,
        })
    }

    /// Open an existing partition directory.
    pub fn open(dir: &ffi::OsStr) -> Result<Partition> {
        let meta = PartMeta::read(dir)?;
        let columns = meta
            .columns
            .iter()
            .map(|cm| Column::new(dir, &cm.name, cm.dtype, cm.minimum, cm.maximum))
            .collect();
        let amask = read_mask(dir, meta.nrows)?;
        let rids = read_rids(dir, meta.nrows)?;

        Ok(Partition {
            name: meta.name,
            active_dir: dir.to_os_string(),
            backup_dir: None,
            columns,
            nrows: meta.nrows,
            amask,
            rids,
            state: State::Stable,
        })
    }

    /// Configure `dir` as the backup directory and mirror the active
    /// directory into it. Appends become rollback-able afterwards.
    pub fn set_backup(&mut self, dir: &ffi::OsStr) -> Result<()> {
        err_at!(IOError, fs::create_dir_all(dir))?;
        self.backup_dir = Some(dir.to_os_string());
        self.make_backup_copy()
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn nrows(&self) -> u32 {
        self.nrows
    }

    #[inline]
    pub fn state(&self) -> State {
        self.state
    }

    /// Number of active, not deactivated, rows.
    pub fn nactive(&self) -> usize {
        self.amask.cnt()
    }

    pub fn active_dir(&self) -> &ffi::OsStr {
        &self.active_dir
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name() == name)
    }

    fn column_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.name() == name)
    }

    fn to_meta(&self) -> PartMeta {
        let columns = self
            .columns
            .iter()
            .map(|c| ColumnMeta {
                name: c.name().to_string(),
                dtype: c.dtype(),
                minimum: c.min(),
                maximum: c.max(),
            })
            .collect();
        PartMeta {
            name: self.name.clone(),
            nrows: self.nrows,
            timestamp: chrono::Utc::now().timestamp(),
            columns,
        }
    }

    fn persist_mask(&self, dir: &ffi::OsStr) -> Result<()> {
        let file = meta::mask_file(dir);
        if self.amask.cnt() < self.amask.size() {
            let mut fd = util::create_file_w(&file)?;
            util::sync_write(&mut fd, &self.amask.to_bytes())?;
        } else {
            fs::remove_file(&file).ok(); // all-ones mask is implicit
        }
        filemgr().unload(&file);
        Ok(())
    }

    fn persist_rids(&self, dir: &ffi::OsStr) -> Result<()> {
        if let Some(rids) = &self.rids {
            let mut buf = Vec::with_capacity(rids.len() * 16);
            for rid in rids.iter() {
                buf.extend_from_slice(&rid.mid.to_le_bytes());
                buf.extend_from_slice(&rid.low.to_le_bytes());
            }
            let file = meta::rids_file(dir);
            let mut fd = util::create_file_w(&file)?;
            util::sync_write(&mut fd, &buf)?;
            filemgr().unload(&file);
        }
        Ok(())
    }
}

fn read_mask(dir: &ffi::OsStr, nrows: u32) -> Result<Bitvector> {
    let file = meta::mask_file(dir);
    match fs::read(&file) {
        Ok(data) => {
            let mut mask = Bitvector::from_slice(&data)?;
            mask.adjust_size(nrows as usize, nrows as usize);
            Ok(mask)
        }
        Err(_) => Ok(Bitvector::ones(nrows as usize)),
    }
}

fn read_rids(dir: &ffi::OsStr, nrows: u32) -> Result<Option<Vec<Rid>>> {
    let file = meta::rids_file(dir);
    let data = match fs::read(&file) {
        Ok(data) => data,
        Err(_) => return Ok(None),
    };
    if data.len() != (nrows as usize) * 16 {
        return err_at!(InvalidFile, msg: "rids {} bytes for {} rows", data.len(), nrows);
    }
    let mut rids = Vec::with_capacity(nrows as usize);
    for chunk in data.chunks_exact(16) {
        let mut oct = [0_u8; 8];
        oct.copy_from_slice(&chunk[..8]);
        let mid = u64::from_le_bytes(oct);
        oct.copy_from_slice(&chunk[8..]);
        let low = u64::from_le_bytes(oct);
        rids.push(Rid { mid, low });
    }
    Ok(Some(rids))
}

// ingest helpers, columns land in the active directory
impl Partition {
    fn admit_rows(&mut self, name: &str, n: usize) -> Result<()> {
        if self.column(name).is_some() {
            return err_at!(InvalidInput, msg: "column {} exists", name);
        }
        if self.columns.is_empty() {
            self.nrows = n as u32;
            self.amask = Bitvector::ones(n);
        } else if n != self.nrows as usize {
            return err_at!(
                InvalidInput, msg: "column {} of {} rows, partition has {}", name,
                n, self.nrows
            );
        }
        Ok(())
    }

    /// Add a numeric column holding `vals`, one entry per row.
    pub fn add_column<T>(&mut self, name: &str, dtype: DataType, vals: &[T]) -> Result<()>
    where
        T: Element,
    {
        match dtype.width() {
            Some(width) if width == T::WIDTH && dtype != DataType::Category => (),
            _ => return err_at!(InvalidInput, msg: "{} rows as {:?}", name, dtype),
        }
        self.admit_rows(name, vals.len())?;

        let mut buf = Vec::with_capacity(vals.len() * T::WIDTH);
        for v in vals.iter() {
            v.write_le(&mut buf);
        }
        let file = column::data_file(&self.active_dir, name);
        let mut fd = util::create_file_w(&file)?;
        util::sync_write(&mut fd, &buf)?;

        let min = vals.iter().map(|v| v.to_f64()).fold(f64::INFINITY, f64::min);
        let max = vals.iter().map(|v| v.to_f64()).fold(f64::NEG_INFINITY, f64::max);
        let (min, max) = match vals.is_empty() {
            true => (None, None),
            false => (Some(min), Some(max)),
        };
        self.columns.push(Column::new(&self.active_dir, name, dtype, min, max));
        self.to_meta().write(&self.active_dir)?;
        Ok(())
    }

    /// Add a categorical string column.
    pub fn add_category(&mut self, name: &str, keys: &[&str]) -> Result<()> {
        self.admit_rows(name, keys.len())?;

        let mut dict = Dictionary::new();
        let mut buf = Vec::with_capacity(keys.len() * 4);
        let mut max_id = 0_u32;
        for key in keys.iter() {
            let id = dict.insert(key);
            max_id = max_id.max(id);
            buf.extend_from_slice(&id.to_le_bytes());
        }
        let file = column::data_file(&self.active_dir, name);
        let mut fd = util::create_file_w(&file)?;
        util::sync_write(&mut fd, &buf)?;
        dict.save(&column::dict_file(&self.active_dir, name))?;

        let (min, max) = match keys.is_empty() {
            true => (None, None),
            false => (Some(1.0), Some(max_id as f64)),
        };
        self.columns.push(Column::new(
            &self.active_dir,
            name,
            DataType::Category,
            min,
            max,
        ));
        self.to_meta().write(&self.active_dir)?;
        Ok(())
    }

    /// Add a text column. Rows are stored length-prefixed and a
    /// term-document list, one term per whitespace separated token, feeds
    /// the keyword index.
    pub fn add_text(&mut self, name: &str, docs: &[&str]) -> Result<()> {
        self.admit_rows(name, docs.len())?;

        let mut buf = vec![];
        let mut terms: std::collections::BTreeMap<&str, Vec<u32>> = Default::default();
        for (row, doc) in docs.iter().enumerate() {
            buf.extend_from_slice(&(doc.len() as u32).to_le_bytes());
            buf.extend_from_slice(doc.as_bytes());
            for tok in doc.split_whitespace() {
                terms.entry(tok).or_insert_with(Vec::new).push(row as u32);
            }
        }
        let file = column::data_file(&self.active_dir, name);
        let mut fd = util::create_file_w(&file)?;
        util::sync_write(&mut fd, &buf)?;

        let mut td = String::new();
        for (term, rows) in terms.iter() {
            let ids: Vec<String> = rows.iter().map(|r| r.to_string()).collect();
            td.push_str(&format!("{} : {}\n", term, ids.join(", ")));
        }
        let tdf = column::tdlist_file(&self.active_dir, name);
        let mut fd = util::create_file_w(&tdf)?;
        util::sync_write(&mut fd, td.as_bytes())?;

        self.columns.push(Column::new(
            &self.active_dir,
            name,
            DataType::Text,
            None,
            None,
        ));
        self.to_meta().write(&self.active_dir)?;
        Ok(())
    }

    /// Generate sequential row identifiers for the current rows and
    /// persist them.
    pub fn fill_rids(&mut self, mid: u64) -> Result<()> {
        let rids: Vec<Rid> =
            (0..self.nrows as u64).map(|low| Rid { mid, low }).collect();
        self.rids = Some(rids);
        self.persist_rids(&self.active_dir)
    }

    pub fn rids(&self) -> Option<&[Rid]> {
        self.rids.as_deref()
    }
}

// query evaluation
impl Partition {
    /// Evaluate a query expression into the bitmap of matching rows.
    /// The expression is simplified, reordered by estimated cost, and
    /// every range predicate is answered by the column's index.
    pub fn evaluate(&mut self, expr: &QueryExpr) -> Result<Bitvector> {
        let expr = query::simplify(expr.clone());
        let mut costs = HashMap::new();
        self.collect_costs(&expr, &mut costs);
        let weight = CostWeight { costs, scan_cost: 8.0 * (self.nrows as f64) };
        let expr = query::reorder(expr, &weight);
        self.evaluate_node(&expr)
    }

    /// Number of rows matching `expr`.
    pub fn count(&mut self, expr: &QueryExpr) -> Result<usize> {
        Ok(self.evaluate(expr)?.cnt())
    }

    /// Row positions matching `expr`, ascending.
    pub fn rows(&mut self, expr: &QueryExpr) -> Result<Vec<u32>> {
        Ok(self.evaluate(expr)?.to_positions())
    }

    /// Values of `col` at the rows set in `hits`, fetched by position.
    pub fn select_values(&self, col: &str, hits: &Bitvector) -> Result<Vec<f64>> {
        let column = match self.column(col) {
            Some(column) => column,
            None => return err_at!(UnknownColumn, msg: "{}", col),
        };
        let vals = column.read_values(self.nrows as usize)?;
        Ok(hits.iter_ones().filter_map(|row| vals.get(row).copied()).collect())
    }

    /// String values of `col` at the rows set in `hits`.
    pub fn select_strings(&self, col: &str, hits: &Bitvector) -> Result<Vec<String>> {
        let column = match self.column(col) {
            Some(column) => column,
            None => return err_at!(UnknownColumn, msg: "{}", col),
        };
        let rows = column.read_strings(self.nrows as usize)?;
        Ok(hits.iter_ones().filter_map(|row| rows.get(row).cloned()).collect())
    }

    fn collect_costs(&mut self, expr: &QueryExpr, costs: &mut HashMap<String, f64>) {
        match expr {
            QueryExpr::Logical { left, right, .. } => {
                self.collect_costs(left, costs);
                self.collect_costs(right, costs);
            }
            QueryExpr::Not(t) => self.collect_costs(t, costs),
            QueryExpr::Range(range) => {
                let nrows = self.nrows;
                let cost = match self.column_mut(&range.col) {
                    Some(col) => col.estimate_cost(range, nrows),
                    None => 0.0,
                };
                costs.insert(range.to_string(), cost);
            }
            _ => (),
        }
    }

    fn evaluate_node(&mut self, expr: &QueryExpr) -> Result<Bitvector> {
        let nrows = self.nrows as usize;
        match expr {
            QueryExpr::Logical { op, left, right } => {
                let l = self.evaluate_node(left)?;
                // an empty left side decides conjunctive operators
                match op {
                    LogicalOp::And | LogicalOp::AndNot if l.cnt() == 0 => return Ok(l),
                    _ => (),
                }
                let r = self.evaluate_node(right)?;
                match op {
                    LogicalOp::And => l.and(&r),
                    LogicalOp::Or => l.or(&r),
                    LogicalOp::Xor => l.xor(&r),
                    LogicalOp::AndNot => l.minus(&r),
                }
            }
            QueryExpr::Not(t) => {
                let inner = self.evaluate_node(t)?;
                self.amask.minus(&inner)
            }
            QueryExpr::Range(range) => {
                let amask = self.amask.clone();
                match self.column_mut(&range.col) {
                    Some(col) => col.evaluate(range, &amask),
                    None => {
                        warn!(target: "part", "unknown column {}", range.col);
                        Ok(Bitvector::zeros(nrows))
                    }
                }
            }
            QueryExpr::Discrete(range) => {
                let amask = self.amask.clone();
                match self.column_mut(&range.col) {
                    Some(col) => col.evaluate_discrete(range, &amask),
                    None => {
                        warn!(target: "part", "unknown column {}", range.col);
                        Ok(Bitvector::zeros(nrows))
                    }
                }
            }
            QueryExpr::StringEq { col, value } => {
                let amask = self.amask.clone();
                match self.column_mut(col) {
                    Some(column) => column.evaluate_string(value, &amask),
                    None => {
                        warn!(target: "part", "unknown column {}", col);
                        Ok(Bitvector::zeros(nrows))
                    }
                }
            }
            QueryExpr::AnyString { col, values } => {
                let amask = self.amask.clone();
                let mut res = Bitvector::zeros(nrows);
                for value in values.iter() {
                    match self.column_mut(col) {
                        Some(column) => {
                            res.or_inplace(&column.evaluate_string(value, &amask)?)?
                        }
                        None => {
                            warn!(target: "part", "unknown column {}", col);
                            break;
                        }
                    }
                }
                Ok(res)
            }
            QueryExpr::AnyOf { prefix, values } => {
                let names: Vec<String> = self
                    .columns
                    .iter()
                    .filter(|c| c.name().starts_with(prefix.as_str()))
                    .map(|c| c.name().to_string())
                    .collect();
                let mut res = Bitvector::zeros(nrows);
                for name in names {
                    let range = DiscreteRange::new(&name, values.clone());
                    res.or_inplace(&self.evaluate_node(&QueryExpr::Discrete(range))?)?;
                }
                Ok(res)
            }
            QueryExpr::Comp(comp) => self.scan_comp(comp),
            QueryExpr::Join(_) => {
                err_at!(NotImplemented, msg: "join conditions need a table context")
            }
        }
    }

    // row-scan fallback for arithmetic comparisons that did not reduce to
    // an indexable range.
    fn scan_comp(&mut self, comp: &CompRange) -> Result<Bitvector> {
        let nrows = self.nrows as usize;
        let mut vars = comp.term.variables();
        if let Some((t, _)) = &comp.left {
            vars.extend(t.variables());
        }
        if let Some((_, t)) = &comp.right {
            vars.extend(t.variables());
        }

        let mut data: HashMap<String, Vec<f64>> = HashMap::new();
        for var in vars {
            match self.column(&var) {
                Some(col) => {
                    data.insert(var.clone(), col.read_values(nrows)?);
                }
                None => {
                    warn!(target: "part", "unknown column {}", var);
                    return Ok(Bitvector::zeros(nrows));
                }
            }
        }

        let mut res = Bitvector::new();
        for row in self.amask.iter_ones() {
            let lookup = |name: &str| -> Option<f64> {
                data.get(name).and_then(|v| v.get(row)).copied()
            };
            let mid = comp.term.eval(&lookup)?;
            let ok_left = match &comp.left {
                Some((t, op)) => cmp_vals(t.eval(&lookup)?, *op, mid),
                None => true,
            };
            let ok_right = match &comp.right {
                Some((op, t)) => cmp_vals(mid, *op, t.eval(&lookup)?),
                None => true,
            };
            if ok_left && ok_right {
                res.set_bit(row, true);
            }
        }
        res.adjust_size(0, nrows);
        Ok(res)
    }
}

fn cmp_vals(a: f64, op: CompOp, b: f64) -> bool {
    match op {
        CompOp::Lt => a < b,
        CompOp::Le => a <= b,
        CompOp::Gt => a > b,
        CompOp::Ge => a >= b,
        CompOp::Eq => a == b,
        CompOp::Undefined => true,
    }
}

// weight used to reorder operands, known index costs per range, a scan
// cost for everything the indexes cannot answer directly.
struct CostWeight {
    costs: HashMap<String, f64>,
    scan_cost: f64,
}

impl query::Weight for CostWeight {
    fn weight(&self, expr: &QueryExpr) -> f64 {
        match expr {
            QueryExpr::Range(range) => {
                *self.costs.get(&range.to_string()).unwrap_or(&self.scan_cost)
            }
            QueryExpr::Logical { left, right, .. } => {
                1.0 + self.weight(left) + self.weight(right)
            }
            QueryExpr::Not(t) => 1.0 + self.weight(t),
            QueryExpr::Comp(_) => self.scan_cost,
            QueryExpr::Join(_) => self.scan_cost,
            _ => 16.0,
        }
    }
}

// mutation protocol
impl Partition {
    /// Append the rows of the partition directory `src_dir`. With a
    /// backup directory configured the append lands there first and stays
    /// rollback-able until [Partition::commit], without one it applies in
    /// place immediately. Returns the number of appended rows.
    pub fn append(&mut self, src_dir: &ffi::OsStr) -> Result<u32> {
        match self.state {
            State::Stable | State::Receiving => self.state = State::Receiving,
            state => {
                return err_at!(StateViolation, msg: "append while {:?}", state)
            }
        }
        let res = match self.backup_dir.clone() {
            Some(backup) => self.append2(src_dir, &backup),
            None => self.append1(src_dir),
        };
        match res {
            Ok(n) => Ok(n),
            Err(err) => {
                warn!(target: "part", "{} append failed: {}", self.name, err);
                self.state = State::Unknown;
                self.reload_active()?;
                self.make_backup_copy()?;
                Err(err)
            }
        }
    }

    // restore the in-memory view from the active directory, the recovery
    // step after a failed mutation.
    fn reload_active(&mut self) -> Result<()> {
        let meta = PartMeta::read(&self.active_dir)?;
        self.nrows = meta.nrows;
        self.columns = meta
            .columns
            .iter()
            .map(|cm| {
                Column::new(&self.active_dir, &cm.name, cm.dtype, cm.minimum, cm.maximum)
            })
            .collect();
        self.amask = read_mask(&self.active_dir, self.nrows)?;
        self.rids = read_rids(&self.active_dir, self.nrows)?;
        Ok(())
    }

    // two-directory path, build the new data in the backup and swap roles
    fn append2(&mut self, src_dir: &ffi::OsStr, backup: &ffi::OsString) -> Result<u32> {
        let _lock = DirLock::exclusive(&self.active_dir)?;

        let src_meta = PartMeta::read(src_dir)?;
        let n_new = src_meta.nrows;
        if n_new == 0 {
            self.state = State::Stable;
            return Ok(0);
        }
        self.state = State::PreTransition;

        let total = self.nrows + n_new;
        let mut buf = vec![];
        for col in self.columns.iter() {
            col.append(backup, src_dir, self.nrows, n_new, &mut buf)?;
        }
        for src_cm in src_meta.columns.iter() {
            if self.column(&src_cm.name).is_none() {
                warn!(
                    target: "part",
                    "{} ignores source-only column {}", self.name, src_cm.name
                );
            }
        }

        // widen per-column bounds by the incoming data
        let mut bounds = vec![];
        for col in self.columns.iter() {
            let src_cm = src_meta.columns.iter().find(|cm| cm.name == col.name());
            let min = merge_bound(col.min(), src_cm.and_then(|cm| cm.minimum), f64::min);
            let max = merge_bound(col.max(), src_cm.and_then(|cm| cm.maximum), f64::max);
            bounds.push((min, max));
        }
        for (col, (min, max)) in self.columns.iter_mut().zip(bounds.into_iter()) {
            col.set_minmax(min, max);
        }

        // extend the mask and the row identifiers
        let mut amask = self.amask.clone();
        amask.adjust_size(total as usize, total as usize);
        let rids = match self.rids.take() {
            Some(mut rids) => {
                match read_rids(src_dir, n_new)? {
                    Some(src) => rids.extend(src),
                    None => {
                        let base = rids.len() as u64;
                        rids.extend(
                            (0..n_new as u64).map(|i| Rid { mid: 0, low: base + i }),
                        );
                    }
                }
                Some(rids)
            }
            None => None,
        };

        let mut meta = self.to_meta();
        meta.nrows = total;
        meta.touch();
        meta.write(backup)?;

        self.nrows = total;
        self.amask = amask;
        self.rids = rids;
        self.persist_mask(backup)?;
        self.persist_rids(backup)?;

        // verify before the roles switch
        let check = PartMeta::read(backup)?;
        if check.nrows != total {
            return err_at!(Fatal, msg: "backup holds {} rows, expected {}", check.nrows, total);
        }

        // swap directory roles, readers against the old active keep their
        // storages alive through the file manager
        filemgr().unload_dir(&self.active_dir);
        filemgr().unload_dir(backup);
        let old_active = std::mem::replace(&mut self.active_dir, backup.clone());
        self.backup_dir = Some(old_active);
        for col in self.columns.iter_mut() {
            col.set_dir(&self.active_dir);
        }

        self.state = State::Transition;
        info!(
            target: "part",
            "{} switched to {} rows, rollback possible", self.name, total
        );
        Ok(n_new)
    }

    // one-directory path, applies in place and commits immediately
    fn append1(&mut self, src_dir: &ffi::OsStr) -> Result<u32> {
        let _lock = DirLock::exclusive(&self.active_dir)?;

        let src_meta = PartMeta::read(src_dir)?;
        let n_new = src_meta.nrows;
        if n_new == 0 {
            self.state = State::Stable;
            return Ok(0);
        }

        let total = self.nrows + n_new;
        let active = self.active_dir.clone();
        let mut buf = vec![];
        for col in self.columns.iter() {
            col.append(&active, src_dir, self.nrows, n_new, &mut buf)?;
            filemgr().unload(&column::data_file(&active, col.name()));
        }

        let mut bounds = vec![];
        for col in self.columns.iter() {
            let src_cm = src_meta.columns.iter().find(|cm| cm.name == col.name());
            let min = merge_bound(col.min(), src_cm.and_then(|cm| cm.minimum), f64::min);
            let max = merge_bound(col.max(), src_cm.and_then(|cm| cm.maximum), f64::max);
            bounds.push((min, max));
        }
        for (col, (min, max)) in self.columns.iter_mut().zip(bounds.into_iter()) {
            col.set_minmax(min, max);
            col.unload_index();
        }

        self.nrows = total;
        self.amask.adjust_size(total as usize, total as usize);
        if let Some(rids) = &mut self.rids {
            let base = rids.len() as u64;
            match read_rids(src_dir, n_new)? {
                Some(src) => rids.extend(src),
                None => {
                    rids.extend((0..n_new as u64).map(|i| Rid { mid: 0, low: base + i }))
                }
            }
        }

        self.to_meta().write(&self.active_dir)?;
        self.persist_mask(&self.active_dir)?;
        self.persist_rids(&self.active_dir)?;
        filemgr().unload_dir(&self.active_dir);
        self.state = State::Stable;
        info!(target: "part", "{} appended {} rows in place", self.name, n_new);
        Ok(n_new)
    }

    /// Make the appended rows permanent, re-mirroring the directories.
    pub fn commit(&mut self) -> Result<()> {
        match self.state {
            State::Transition => (),
            State::Stable => return Ok(()),
            state => return err_at!(StateViolation, msg: "commit while {:?}", state),
        }
        let _lock = DirLock::exclusive(&self.active_dir)?;

        self.state = State::PostTransition;
        self.to_meta().write(&self.active_dir)?;
        match self.make_backup_copy() {
            Ok(()) => {
                info!(target: "part", "{} committed {} rows", self.name, self.nrows);
                Ok(())
            }
            Err(err) => {
                self.state = State::Unknown;
                Err(err)
            }
        }
    }

    /// Undo an uncommitted append, swapping the directory roles back.
    /// The active directory is restored byte for byte.
    pub fn rollback(&mut self) -> Result<()> {
        match self.state {
            State::Transition => (),
            state => {
                return err_at!(StateViolation, msg: "rollback while {:?}", state)
            }
        }
        let backup = match self.backup_dir.clone() {
            Some(backup) => backup,
            None => return err_at!(StateViolation, msg: "rollback without backup"),
        };
        let _lock = DirLock::exclusive(&backup)?;

        filemgr().unload_dir(&self.active_dir);
        filemgr().unload_dir(&backup);
        let appended = std::mem::replace(&mut self.active_dir, backup);
        self.backup_dir = Some(appended);
        self.reload_active()?;

        self.state = State::Unknown;
        self.make_backup_copy()?;
        info!(target: "part", "{} rolled back to {} rows", self.name, self.nrows);
        Ok(())
    }

    /// Re-mirror the active directory into the backup directory and
    /// return to [State::Stable]. This is also the recovery path from
    /// [State::Unknown].
    pub fn make_backup_copy(&mut self) -> Result<()> {
        if let Some(backup) = self.backup_dir.clone() {
            filemgr().unload_dir(&backup);
            util::mirror_dir(&self.active_dir, &backup)?;
            let check = PartMeta::read(&backup)?;
            if check.nrows != self.nrows {
                return err_at!(
                    Fatal, msg: "backup verify {} vs {}", check.nrows, self.nrows
                );
            }
        }
        self.state = State::Stable;
        Ok(())
    }
}

fn merge_bound(
    a: Option<f64>,
    b: Option<f64>,
    pick: fn(f64, f64) -> f64,
) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(pick(a, b)),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}

// logical deletion and physical reorganization
impl Partition {
    /// Mark rows logically deleted. Deactivated rows stop matching
    /// queries, their bytes remain until [Partition::purge_inactive].
    pub fn deactivate(&mut self, rows: &[u32]) -> Result<()> {
        for row in rows.iter() {
            if *row < self.nrows {
                self.amask.set_bit(*row as usize, false);
            }
        }
        self.persist_mask(&self.active_dir)
    }

    /// Clear the deactivation of `rows`.
    pub fn reactivate(&mut self, rows: &[u32]) -> Result<()> {
        for row in rows.iter() {
            if *row < self.nrows {
                self.amask.set_bit(*row as usize, true);
            }
        }
        self.persist_mask(&self.active_dir)
    }

    /// Mask of active rows.
    pub fn mask(&self) -> &Bitvector {
        &self.amask
    }

    /// Physically drop the deactivated rows, rewriting every column file.
    pub fn purge_inactive(&mut self) -> Result<u32> {
        match self.state {
            State::Stable => (),
            state => return err_at!(StateViolation, msg: "purge while {:?}", state),
        }
        let kept = self.amask.cnt() as u32;
        if kept == self.nrows {
            return Ok(kept);
        }
        let _lock = DirLock::exclusive(&self.active_dir)?;

        let active = self.active_dir.clone();
        let mask = self.amask.clone();
        let mut buf = vec![];
        for col in self.columns.iter() {
            let n = col.save_selected(&mask, &active, &mut buf)?;
            if n != kept {
                return err_at!(Fatal, msg: "{} kept {} of {}", col.name(), n, kept);
            }
        }
        if let Some(rids) = &mut self.rids {
            let filtered: Vec<Rid> =
                mask.iter_ones().filter_map(|row| rids.get(row).copied()).collect();
            *rids = filtered;
        }

        self.nrows = kept;
        self.amask = Bitvector::ones(kept as usize);
        for col in self.columns.iter_mut() {
            col.unload_index();
        }
        self.to_meta().write(&self.active_dir)?;
        self.persist_mask(&self.active_dir)?;
        self.persist_rids(&self.active_dir)?;
        filemgr().unload_dir(&self.active_dir);
        self.make_backup_copy()?;
        info!(target: "part", "{} purged down to {} rows", self.name, kept);
        Ok(kept)
    }

    /// Reorder rows so that integer key columns sort ascending, narrowest
    /// value range first. Every column file is rewritten through the
    /// composed permutation and indexes are rebuilt on next use.
    pub fn reorder(&mut self) -> Result<()> {
        match self.state {
            State::Stable => (),
            state => return err_at!(StateViolation, msg: "reorder while {:?}", state),
        }
        let _lock = DirLock::exclusive(&self.active_dir)?;
        let nrows = self.nrows as usize;

        // ordering keys, integer columns with more than one distinct
        // value, narrow ranges first
        let mut keys: Vec<(String, f64)> = self
            .columns
            .iter()
            .filter(|c| c.dtype().is_integer())
            .filter_map(|c| match (c.min(), c.max()) {
                (Some(min), Some(max)) if max > min => {
                    Some((c.name().to_string(), max - min))
                }
                _ => None,
            })
            .collect();
        keys.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        if keys.is_empty() {
            return Ok(());
        }

        let mut perm: Vec<u32> = (0..nrows as u32).collect();
        let mut starts: Vec<u32> = vec![0, nrows as u32];
        for (name, _) in keys.iter() {
            let col = self.column(name).unwrap();
            let arr = Array::from(col.read_values(nrows)?);
            starts = arr.sort_within(&mut perm, &starts);
        }

        let active = self.active_dir.clone();
        for col in self.columns.iter() {
            rewrite_permuted(col, &active, &perm)?;
        }
        if let Some(rids) = &mut self.rids {
            let permuted: Vec<Rid> =
                perm.iter().map(|old| rids[*old as usize]).collect();
            *rids = permuted;
        }
        let amask = self.amask.clone();
        let mut permuted = Bitvector::new();
        for (new_row, old) in perm.iter().enumerate() {
            permuted.set_bit(new_row, amask.get_bit(*old as usize));
        }
        permuted.adjust_size(0, nrows);
        self.amask = permuted;

        for col in self.columns.iter_mut() {
            col.unload_index();
        }
        let mut meta = self.to_meta();
        meta.touch();
        meta.write(&self.active_dir)?;
        self.persist_mask(&self.active_dir)?;
        self.persist_rids(&self.active_dir)?;
        filemgr().unload_dir(&self.active_dir);
        self.make_backup_copy()?;
        info!(
            target: "part",
            "{} reordered {} rows by {} keys", self.name, nrows, keys.len()
        );
        Ok(())
    }
}

// rewrite one column file with rows in permutation order, perm[i] is the
// old row landing at position i.
fn rewrite_permuted(col: &Column, dir: &ffi::OsStr, perm: &[u32]) -> Result<()> {
    let file = column::data_file(dir, col.name());
    fs::remove_file(column::index_file(dir, col.name())).ok();

    match col.dtype().width() {
        Some(width) => {
            let data = err_at!(IOError, fs::read(&file), "{:?}", file)?;
            let mut out = Vec::with_capacity(data.len());
            for old in perm.iter() {
                let at = (*old as usize) * width;
                if at + width <= data.len() {
                    out.extend_from_slice(&data[at..at + width]);
                } else {
                    out.extend(std::iter::repeat(0).take(width));
                }
            }
            let mut fd = util::create_file_w(&file)?;
            util::sync_write(&mut fd, &out)?;
        }
        None => {
            let rows = col.read_strings(perm.len())?;
            let mut out = vec![];
            for old in perm.iter() {
                let s = rows[*old as usize].as_bytes();
                out.extend_from_slice(&(s.len() as u32).to_le_bytes());
                out.extend_from_slice(s);
            }
            let mut fd = util::create_file_w(&file)?;
            util::sync_write(&mut fd, &out)?;

            // renumber the term-document list through the permutation
            let td = column::tdlist_file(dir, col.name());
            if path::Path::new(&td).is_file() {
                let mut new_of_old = vec![0_u32; perm.len()];
                for (new_row, old) in perm.iter().enumerate() {
                    new_of_old[*old as usize] = new_row as u32;
                }
                let text = err_at!(IOError, fs::read_to_string(&td))?;
                let mut renumbered = String::new();
                for line in text.lines() {
                    let t = line.trim();
                    if t.is_empty() || t.starts_with('#') || t.starts_with("--") {
                        continue;
                    }
                    let mut parts = t.splitn(2, ':');
                    let term = parts.next().unwrap_or("").trim();
                    let mut ids: Vec<u32> = parts
                        .next()
                        .unwrap_or("")
                        .split(',')
                        .filter_map(|s| s.trim().parse::<u32>().ok())
                        .filter_map(|id| new_of_old.get(id as usize).copied())
                        .collect();
                    ids.sort_unstable();
                    if !term.is_empty() && !ids.is_empty() {
                        let ids: Vec<String> =
                            ids.iter().map(|i| i.to_string()).collect();
                        renumbered
                            .push_str(&format!("{} : {}\n", term, ids.join(", ")));
                    }
                }
                let mut fd = util::create_file_w(&td)?;
                util::sync_write(&mut fd, renumbered.as_bytes())?;
            }
        }
    }
    filemgr().unload(&file);
    Ok(())
}

#[cfg(test)]
#[path = "part_test.rs"]
mod part_test;
