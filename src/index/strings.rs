//! String interning for repeated URLs, methods, MIME types and addresses.

use rustc_hash::FxHashMap;
use std::sync::Arc;

/// First-seen string table. Ids are dense and stable for the table's lifetime.
#[derive(Debug, Clone, Default)]
pub struct StringTable {
    strings: Vec<Arc<str>>,
    lookup: FxHashMap<Arc<str>, u32>,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a table from strings in id order
    pub fn from_strings<I, S>(strings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut table = Self::new();
        for s in strings {
            table.intern_id(s.as_ref());
        }
        table
    }

    /// Shared handle for `s`, inserting it on first sight
    pub fn intern(&mut self, s: &str) -> Arc<str> {
        let id = self.intern_id(s);
        Arc::clone(&self.strings[id as usize])
    }

    pub fn intern_id(&mut self, s: &str) -> u32 {
        if let Some(&id) = self.lookup.get(s) {
            return id;
        }
        let id = self.strings.len() as u32;
        let shared: Arc<str> = Arc::from(s);
        self.strings.push(Arc::clone(&shared));
        self.lookup.insert(shared, id);
        id
    }

    pub fn id_of(&self, s: &str) -> Option<u32> {
        self.lookup.get(s).copied()
    }

    pub fn get(&self, id: u32) -> Option<&Arc<str>> {
        self.strings.get(id as usize)
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Strings in id order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<str>> {
        self.strings.iter()
    }

    /// Bytes of string data held once by the table
    pub fn data_bytes(&self) -> usize {
        self.strings.iter().map(|s| s.len()).sum()
    }
}

impl PartialEq for StringTable {
    fn eq(&self, other: &Self) -> bool {
        self.strings == other.strings
    }
}
