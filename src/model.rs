use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Symbol name to address, ordered so serialized records are stable across runs.
pub type SymbolTable = BTreeMap<String, u64>;

/// Marks a (archive filename, path pattern) pair as fully processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub name: String, // e.g. "libc6-i386_2.19-0ubuntu6_amd64.deb"
    pub path: String, // the pattern source, not a concrete file path
}

/// Dynamic symbol table of one binary, keyed by `<archive>/<path inside archive>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryRecord {
    pub name: String,
    pub symbols: SymbolTable,
}

impl PackageRecord {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

impl BinaryRecord {
    pub fn new(name: impl Into<String>, symbols: SymbolTable) -> Self {
        Self {
            name: name.into(),
            symbols,
        }
    }
}
