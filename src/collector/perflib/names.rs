//! Index ↔ name tables for performance objects and counters.
//!
//! The registry stores names as a `REG_MULTI_SZ` of `"index\0name\0"` pairs in
//! UTF-16LE. Tables are parsed once per table name and shared process-wide. A
//! failed build is returned to the caller and not cached, so a later call retries.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io;
use std::sync::{Arc, LazyLock, Mutex, PoisonError, RwLock};

use tracing::{debug, info};

use crate::collector::traits::PerfDataSource;

/// Error building a name table.
#[derive(Debug)]
pub enum NameTableError {
    /// Reading the raw table failed.
    Io { table: String, source: io::Error },
    /// The raw table is not a sequence of UTF-16 code units.
    OddLength(usize),
    /// An index entry is not a number.
    BadIndex { position: usize, value: String },
    /// The table holds no entries.
    Empty,
}

impl fmt::Display for NameTableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameTableError::Io { table, source } => {
                write!(f, "failed to read name table {:?}: {}", table, source)
            }
            NameTableError::OddLength(len) => {
                write!(f, "name table has odd byte length {}", len)
            }
            NameTableError::BadIndex { position, value } => {
                write!(f, "name table entry {} has invalid index {:?}", position, value)
            }
            NameTableError::Empty => write!(f, "name table is empty"),
        }
    }
}

impl std::error::Error for NameTableError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NameTableError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Bidirectional index ↔ name lookup.
#[derive(Debug, Clone, Default)]
pub struct NameTable {
    by_index: BTreeMap<u32, String>,
    by_name: HashMap<String, u32>,
}

impl NameTable {
    /// Parses a raw `REG_MULTI_SZ` table.
    ///
    /// A name listed under several indices resolves to the first one. A trailing
    /// index without a name is ignored.
    pub fn parse(raw: &[u8]) -> Result<Self, NameTableError> {
        if raw.len() % 2 != 0 {
            return Err(NameTableError::OddLength(raw.len()));
        }
        let units: Vec<u16> = raw
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        let mut strings: Vec<String> = units
            .split(|&unit| unit == 0)
            .map(String::from_utf16_lossy)
            .collect();
        while strings.last().is_some_and(|s| s.is_empty()) {
            strings.pop();
        }

        let mut table = NameTable::default();
        for (position, pair) in strings.chunks_exact(2).enumerate() {
            let index: u32 = pair[0].trim().parse().map_err(|_| NameTableError::BadIndex {
                position,
                value: pair[0].clone(),
            })?;
            table.by_name.entry(pair[1].clone()).or_insert(index);
            table.by_index.insert(index, pair[1].clone());
        }

        if table.by_index.is_empty() {
            return Err(NameTableError::Empty);
        }
        Ok(table)
    }

    pub fn name(&self, index: u32) -> Option<&str> {
        self.by_index.get(&index).map(String::as_str)
    }

    pub fn index(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.by_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }
}

/// Process-wide cache of parsed name tables.
///
/// Readers share a lock; a build runs under a separate gate so concurrent first
/// callers wait for one build instead of racing.
#[derive(Debug, Default)]
pub struct NameTables {
    tables: RwLock<HashMap<String, Arc<NameTable>>>,
    build_gate: Mutex<()>,
}

static GLOBAL: LazyLock<Arc<NameTables>> = LazyLock::new(|| Arc::new(NameTables::new()));

impl NameTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared cache used by default.
    pub fn global() -> Arc<NameTables> {
        Arc::clone(&GLOBAL)
    }

    fn cached(&self, table: &str) -> Option<Arc<NameTable>> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
            .cloned()
    }

    /// Returns the table, building it from `source` on first use.
    pub fn table<S: PerfDataSource + ?Sized>(
        &self,
        source: &S,
        table: &str,
    ) -> Result<Arc<NameTable>, NameTableError> {
        if let Some(cached) = self.cached(table) {
            return Ok(cached);
        }

        let _gate = self.build_gate.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cached) = self.cached(table) {
            return Ok(cached);
        }

        debug!(table, "building name table");
        let raw = source.name_table(table).map_err(|source| NameTableError::Io {
            table: table.to_string(),
            source,
        })?;
        let parsed = Arc::new(NameTable::parse(&raw)?);
        info!(table, entries = parsed.len(), "name table loaded");

        self.tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(table.to_string(), Arc::clone(&parsed));
        Ok(parsed)
    }

    /// Drops every cached table.
    pub fn clear(&self) {
        self.tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
