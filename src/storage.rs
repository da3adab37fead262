//! Module implement shared byte buffers and the process wide file manager.
//!
//! A [Storage] is either a heap buffer or a read-only window over a memory
//! mapped file. Storages are handed out as `Arc<Storage>`, the strong count
//! doubles as the in-use counter. Anything that wants to mutate bytes
//! reachable through a shared or file-mapped storage must first copy them
//! out, see [Storage::to_heap_copy].
//!
//! The [FileManager] dedupes storages per `(path, byte-range)`, so several
//! indexes sharing one mapped file refer to the same buffer, and evicts
//! unreferenced storages least-recently-used first once the configured
//! resident budget is exceeded.

use lazy_static::lazy_static;
use log::{debug, warn};
use memmap2::Mmap;

use std::{
    collections::HashMap,
    ffi, fs,
    path::Path,
    sync::{Arc, Mutex},
    time,
};

use crate::{config, Error, Result};

/// Byte buffer underlying bitvectors and typed arrays.
pub struct Storage {
    data: Data,
    begin: usize,
    end: usize,
}

enum Data {
    Heap(Vec<u8>),
    Map(Mmap),
}

impl Storage {
    /// Wrap a heap buffer.
    pub fn from_vec(data: Vec<u8>) -> Storage {
        let end = data.len();
        Storage { data: Data::Heap(data), begin: 0, end }
    }

    fn from_map(map: Mmap, begin: usize, end: usize) -> Storage {
        Storage { data: Data::Map(map), begin, end }
    }

    /// The bytes of this storage.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        match &self.data {
            Data::Heap(data) => &data[self.begin..self.end],
            Data::Map(map) => &map[self.begin..self.end],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.begin
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the buffer is a view over a memory mapped file. Such a
    /// storage is never written through.
    #[inline]
    pub fn is_file_mapped(&self) -> bool {
        matches!(&self.data, Data::Map(_))
    }

    /// Copy the content into a fresh, exclusively owned heap storage.
    pub fn to_heap_copy(&self) -> Storage {
        Storage::from_vec(self.as_slice().to_vec())
    }
}

/// Whether `storage` may be mutated through. Shared and file-mapped
/// storages must be copied first.
pub fn is_shared(storage: &Arc<Storage>) -> bool {
    Arc::strong_count(storage) > 1 || storage.is_file_mapped()
}

type Key = (ffi::OsString, u64, u64);

struct Entry {
    storage: Arc<Storage>,
    file_len: u64,
    modified: Option<time::SystemTime>,
    last_used: u64,
}

struct Pool {
    cache: HashMap<Key, Entry>,
    tick: u64,
}

/// Process wide service that reads files into shared [Storage] buffers,
/// deduplicating by path and byte range. Obtain the configured instance
/// with [filemgr].
pub struct FileManager {
    pool: Mutex<Pool>,
}

impl FileManager {
    fn new() -> FileManager {
        let pool = Pool { cache: HashMap::new(), tick: 0 };
        FileManager { pool: Mutex::new(pool) }
    }

    /// Shared storage over the whole content of `path`. Repeat calls with
    /// the file unchanged return the same storage, by identity.
    pub fn get_file(&self, path: &ffi::OsStr) -> Result<Arc<Storage>> {
        self.get(path, 0, u64::MAX)
    }

    /// Shared storage over the byte range `[begin, end)` of `path`. Ranges
    /// reaching past the end of the file are clamped to the file size.
    pub fn get_file_segment(
        &self,
        path: &ffi::OsStr,
        begin: u64,
        end: u64,
    ) -> Result<Arc<Storage>> {
        self.get(path, begin, end)
    }

    fn get(&self, path: &ffi::OsStr, begin: u64, end: u64) -> Result<Arc<Storage>> {
        let md = match fs::metadata(path) {
            Ok(md) => md,
            Err(err) => return err_at!(NotFound, msg: "{:?} {}", path, err),
        };
        let (file_len, modified) = (md.len(), md.modified().ok());

        let key: Key = (path.to_os_string(), begin, end);
        let mut pool = self.pool.lock().expect("filemanager lock poisoned");
        pool.tick += 1;
        let tick = pool.tick;

        if let Some(entry) = pool.cache.get_mut(&key) {
            if entry.file_len == file_len && entry.modified == modified {
                entry.last_used = tick;
                return Ok(Arc::clone(&entry.storage));
            }
            pool.cache.remove(&key);
        }

        let storage = Arc::new(load_storage(path, begin, end, file_len)?);
        let entry = Entry {
            storage: Arc::clone(&storage),
            file_len,
            modified,
            last_used: tick,
        };
        pool.cache.insert(key, entry);
        evict(&mut pool);
        Ok(storage)
    }

    /// Drop cache entries for `path`. Call before rewriting a file in
    /// place, so later reads see the fresh content.
    pub fn unload(&self, path: &ffi::OsStr) {
        let mut pool = self.pool.lock().expect("filemanager lock poisoned");
        pool.cache.retain(|key, _| key.0 != path);
    }

    /// Drop cache entries for every file under directory `dir`.
    pub fn unload_dir(&self, dir: &ffi::OsStr) {
        let dir = Path::new(dir);
        let mut pool = self.pool.lock().expect("filemanager lock poisoned");
        pool.cache.retain(|key, _| !Path::new(&key.0).starts_with(dir));
    }

    /// Drop the whole cache. Storages still referenced elsewhere stay
    /// alive until their last reference is gone.
    pub fn unload_all(&self) {
        let mut pool = self.pool.lock().expect("filemanager lock poisoned");
        pool.cache.clear();
    }

    /// Total bytes of cached storages, mapped and heap.
    pub fn resident_bytes(&self) -> usize {
        let pool = self.pool.lock().expect("filemanager lock poisoned");
        pool.cache.values().map(|e| e.storage.len()).sum()
    }
}

fn load_storage(
    path: &ffi::OsStr,
    begin: u64,
    end: u64,
    file_len: u64,
) -> Result<Storage> {
    let begin = if begin > file_len {
        warn!(target: "filemgr", "segment begin {} clamped to {:?} size {}", begin, path, file_len);
        file_len
    } else {
        begin
    };
    let end = if end > file_len {
        if end != u64::MAX {
            warn!(target: "filemgr", "segment end {} clamped to {:?} size {}", end, path, file_len);
        }
        file_len
    } else {
        end
    };

    let config = config::current();
    let fd = err_at!(IOError, fs::OpenOptions::new().read(true).open(path))?;

    if config.use_mmap && (file_len as usize) >= config.map_threshold && file_len > 0 {
        // SAFETY: the mapping is never written through, and mutation of
        // the underlying files goes through unload() first.
        let map = err_at!(IOError, unsafe { Mmap::map(&fd) }, "mmap {:?}", path)?;
        debug!(target: "filemgr", "mapped {:?} [{}..{})", path, begin, end);
        Ok(Storage::from_map(map, begin as usize, end as usize))
    } else {
        use std::io::{Read, Seek, SeekFrom};

        let mut fd = fd;
        let n = end - begin;
        let mut buf = vec![0; n as usize];
        err_at!(IOError, fd.seek(SeekFrom::Start(begin)))?;
        err_at!(IOError, fd.read_exact(&mut buf), "read {:?}", path)?;
        Ok(Storage::from_vec(buf))
    }
}

fn evict(pool: &mut Pool) {
    let limit = config::current().cache_limit;
    loop {
        let resident: usize = pool.cache.values().map(|e| e.storage.len()).sum();
        if resident <= limit {
            break;
        }
        // oldest entry nothing else refers to
        let key = pool
            .cache
            .iter()
            .filter(|(_, e)| Arc::strong_count(&e.storage) == 1)
            .min_by_key(|(_, e)| e.last_used)
            .map(|(k, _)| k.clone());
        match key {
            Some(key) => {
                let e = pool.cache.remove(&key).unwrap();
                debug!(
                    target: "filemgr",
                    "evicted {:?} [{}..{}) {} bytes", key.0, key.1, key.2,
                    e.storage.len()
                );
            }
            None => break,
        }
    }
}

lazy_static! {
    static ref FILE_MANAGER: FileManager = FileManager::new();
}

/// Handle to the one process wide [FileManager] instance.
pub fn filemgr() -> &'static FileManager {
    &FILE_MANAGER
}

#[cfg(test)]
#[path = "storage_test.rs"]
mod storage_test;
