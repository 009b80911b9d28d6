//! [`DedupStore`] backends.
//!
//! - [`MemoryStore`]: process-local maps, for tests and dry runs.
//! - [`SledStore`]: embedded on-disk store; records are JSON-encoded.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use crate::model::{BinaryRecord, PackageRecord, SymbolTable};
use crate::traits::{DedupStore, StoreError};

#[derive(Debug, Default)]
pub struct MemoryStore {
    packages: RwLock<HashMap<(String, String), PackageRecord>>,
    binaries: RwLock<HashMap<String, BinaryRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All package records, sorted by key.
    pub fn packages(&self) -> Result<Vec<PackageRecord>, StoreError> {
        let guard = self.packages.read().map_err(|_| StoreError::Poisoned)?;
        let mut records: Vec<PackageRecord> = guard.values().cloned().collect();
        records.sort_by(|a, b| (&a.name, &a.path).cmp(&(&b.name, &b.path)));
        Ok(records)
    }

    /// All binary records, sorted by name.
    pub fn binaries(&self) -> Result<Vec<BinaryRecord>, StoreError> {
        let guard = self.binaries.read().map_err(|_| StoreError::Poisoned)?;
        let mut records: Vec<BinaryRecord> = guard.values().cloned().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }
}

#[async_trait]
impl DedupStore for MemoryStore {
    async fn find_package(
        &self,
        name: &str,
        path: &str,
    ) -> Result<Option<PackageRecord>, StoreError> {
        let guard = self.packages.read().map_err(|_| StoreError::Poisoned)?;
        Ok(guard.get(&(name.to_string(), path.to_string())).cloned())
    }

    async fn save_package(&self, name: &str, path: &str) -> Result<(), StoreError> {
        let mut guard = self.packages.write().map_err(|_| StoreError::Poisoned)?;
        guard.insert(
            (name.to_string(), path.to_string()),
            PackageRecord::new(name, path),
        );
        Ok(())
    }

    async fn find_binary(&self, name: &str) -> Result<Option<BinaryRecord>, StoreError> {
        let guard = self.binaries.read().map_err(|_| StoreError::Poisoned)?;
        Ok(guard.get(name).cloned())
    }

    async fn save_binary(&self, name: &str, symbols: &SymbolTable) -> Result<(), StoreError> {
        let mut guard = self.binaries.write().map_err(|_| StoreError::Poisoned)?;
        guard.insert(name.to_string(), BinaryRecord::new(name, symbols.clone()));
        Ok(())
    }
}

pub struct SledStore {
    db: sled::Db,
    packages: sled::Tree,
    binaries: sled::Tree,
}

fn db_error(e: sled::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(db_error)?;
        let packages = db.open_tree("packages").map_err(db_error)?;
        let binaries = db.open_tree("binaries").map_err(db_error)?;
        Ok(Self {
            db,
            packages,
            binaries,
        })
    }

    /// Package keys are `name NUL path`; neither part can contain NUL.
    fn package_key(name: &str, path: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(name.len() + path.len() + 1);
        key.extend_from_slice(name.as_bytes());
        key.push(0);
        key.extend_from_slice(path.as_bytes());
        key
    }

    pub fn binary_count(&self) -> usize {
        self.binaries.len()
    }

    pub fn package_count(&self) -> usize {
        self.packages.len()
    }

    pub async fn flush(&self) -> Result<(), StoreError> {
        self.db.flush_async().await.map_err(db_error)?;
        Ok(())
    }
}

#[async_trait]
impl DedupStore for SledStore {
    async fn find_package(
        &self,
        name: &str,
        path: &str,
    ) -> Result<Option<PackageRecord>, StoreError> {
        let key = Self::package_key(name, path);
        match self.packages.get(key).map_err(db_error)? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    async fn save_package(&self, name: &str, path: &str) -> Result<(), StoreError> {
        let key = Self::package_key(name, path);
        let value = serde_json::to_vec(&PackageRecord::new(name, path))?;
        self.packages.insert(key, value).map_err(db_error)?;
        Ok(())
    }

    async fn find_binary(&self, name: &str) -> Result<Option<BinaryRecord>, StoreError> {
        match self.binaries.get(name.as_bytes()).map_err(db_error)? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    async fn save_binary(&self, name: &str, symbols: &SymbolTable) -> Result<(), StoreError> {
        let value = serde_json::to_vec(&BinaryRecord::new(name, symbols.clone()))?;
        self.binaries
            .insert(name.as_bytes(), value)
            .map_err(db_error)?;
        Ok(())
    }
}
