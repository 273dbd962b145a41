//! Purpose: Registry mapping table names to table stores.
//! Exports: `Database`.
//! Role: Constructed once by the caller and shared by handle; tables are added by name.
//! Invariants: Table names are unique and non-empty; registration never replaces a table.
//! Invariants: Listings follow creation order.
//! Invariants: Ownership is one-way (registry -> table -> records); tables never see the registry.
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use super::error::{Error, ErrorKind};
use super::table::Table;

#[derive(Debug, Default)]
pub struct Database {
    tables: RwLock<Registry>,
}

#[derive(Debug, Default)]
struct Registry {
    by_name: HashMap<String, Arc<Table>>,
    order: Vec<String>,
}

impl Registry {
    fn insert(&mut self, name: &str, table: Arc<Table>) {
        self.by_name.insert(name.to_string(), table);
        self.order.push(name.to_string());
    }

    fn iter(&self) -> impl Iterator<Item = (&String, &Arc<Table>)> {
        self.order
            .iter()
            .filter_map(|name| self.by_name.get_key_value(name))
    }
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an empty, unvalidated table.
    pub fn create_table(&self, name: &str) -> Result<Arc<Table>, Error> {
        self.register(name, Table::new())
    }

    /// Registers a prepared table (for example one carrying a validator).
    pub fn register(&self, name: &str, table: Table) -> Result<Arc<Table>, Error> {
        validate_table_name(name)?;
        let mut tables = self.write();
        if tables.by_name.contains_key(name) {
            return Err(Error::new(ErrorKind::AlreadyExists)
                .with_message(format!("table '{name}' already exists")));
        }
        let table = Arc::new(table);
        tables.insert(name, Arc::clone(&table));
        debug!(table = name, validated = table.has_validator(), "registered table");
        Ok(table)
    }

    /// Returns the named table, registering an empty one if it is missing.
    pub fn ensure_table(&self, name: &str) -> Result<Arc<Table>, Error> {
        if let Some(table) = self.get(name) {
            return Ok(table);
        }
        validate_table_name(name)?;
        let mut tables = self.write();
        if let Some(table) = tables.by_name.get(name) {
            return Ok(Arc::clone(table));
        }
        let table = Arc::new(Table::new());
        tables.insert(name, Arc::clone(&table));
        debug!(table = name, "registered table on demand");
        Ok(table)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Table>> {
        self.read().by_name.get(name).cloned()
    }

    /// Like `get`, but a missing table is a `NotFound` error.
    pub fn table(&self, name: &str) -> Result<Arc<Table>, Error> {
        self.get(name).ok_or_else(|| {
            Error::new(ErrorKind::NotFound)
                .with_message(format!("table '{name}' not found"))
                .with_hint("Create it first with POST /tables or a seed file.")
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().by_name.contains_key(name)
    }

    /// Table names in creation order.
    pub fn table_names(&self) -> Vec<String> {
        self.read().order.clone()
    }

    /// `(name, table)` pairs in creation order.
    pub fn tables(&self) -> Vec<(String, Arc<Table>)> {
        self.read()
            .iter()
            .map(|(name, table)| (name.clone(), Arc::clone(table)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_records(&self) -> usize {
        self.read().by_name.values().map(|table| table.len()).sum()
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.tables
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.tables
            .write()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

fn validate_table_name(name: &str) -> Result<(), Error> {
    if name.trim().is_empty() {
        return Err(Error::new(ErrorKind::Usage).with_message("table name is required"));
    }
    if name.contains('/') {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("table name must not contain path separators"));
    }
    Ok(())
}
