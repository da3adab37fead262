//! Module implement the ordered string to id dictionary.

use cbordata::Cborize;

use std::{collections::HashMap, ffi, fmt, fs, result};

use crate::{util, Error, Result};

const DICT_VER: u32 = 0x000d0001;

/// Bidirectional map between strings and compact unsigned ids.
///
/// Ids are handed out in insertion order starting at 1, id 0 is reserved
/// for NULL. Ids are stable across save and reload.
#[derive(Clone, Default)]
pub struct Dictionary {
    keys: Vec<String>, // keys[i] carries id i+1
    ids: HashMap<String, u32>,
}

// persisted shape of the dictionary.
#[derive(Cborize, Clone, Default)]
struct DictPayload {
    keys: Vec<String>,
}

impl DictPayload {
    const ID: u32 = DICT_VER;
}

impl fmt::Debug for Dictionary {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "dictionary<{} keys>", self.keys.len())
    }
}

impl Dictionary {
    pub fn new() -> Dictionary {
        Dictionary::default()
    }

    /// Number of keys, NULL excluded.
    #[inline]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Id for `key`, inserting it when absent.
    pub fn insert(&mut self, key: &str) -> u32 {
        match self.ids.get(key) {
            Some(id) => *id,
            None => {
                self.keys.push(key.to_string());
                let id = self.keys.len() as u32;
                self.ids.insert(key.to_string(), id);
                id
            }
        }
    }

    /// Id for `key`, or 0 when the key is unknown.
    pub fn find(&self, key: &str) -> u32 {
        self.ids.get(key).copied().unwrap_or(0)
    }

    /// Key carrying `id`, 0 and out-of-range ids read as None.
    pub fn key_of(&self, id: u32) -> Option<&str> {
        match id {
            0 => None,
            id => self.keys.get((id - 1) as usize).map(|k| k.as_str()),
        }
    }

    /// Keys in id order, starting with id 1.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.keys.iter().enumerate().map(|(i, k)| (k.as_str(), (i + 1) as u32))
    }

    /// Keys sorted lexically, each with its id.
    pub fn sorted_keys(&self) -> Vec<(&str, u32)> {
        let mut keys: Vec<(&str, u32)> = self.iter().collect();
        keys.sort_by(|a, b| a.0.cmp(b.0));
        keys
    }
}

impl Dictionary {
    /// Persist into `file`, overwriting existing content.
    pub fn save(&self, file: &ffi::OsStr) -> Result<()> {
        let payload = DictPayload { keys: self.keys.clone() };
        let data = util::into_cbor_bytes(payload)?;
        let mut fd = util::create_file_w(file)?;
        util::sync_write(&mut fd, &data)?;
        Ok(())
    }

    /// Load a dictionary saved with [Dictionary::save].
    pub fn load(file: &ffi::OsStr) -> Result<Dictionary> {
        let data = err_at!(IOError, fs::read(file), "read {:?}", file)?;
        let (payload, _) = util::from_cbor_bytes::<DictPayload>(&data)?;

        let mut ids = HashMap::with_capacity(payload.keys.len());
        for (i, key) in payload.keys.iter().enumerate() {
            ids.insert(key.clone(), (i + 1) as u32);
        }
        Ok(Dictionary { keys: payload.keys, ids })
    }
}

#[cfg(test)]
#[path = "dict_test.rs"]
mod dict_test;
