//! Purpose: Own one table's ordered records and expose CRUD plus bulk load.
//! Exports: `Table`.
//! Role: Mutations pass through the optional validator; reads go through the query pipeline.
//! Invariants: Records stay in insertion order; update keeps each record's position.
//! Invariants: Rejected inserts/loads/updates leave the table unchanged.
//! Invariants: Reads return owned copies; snapshots are never mutated in place.
//! Notes: One mutex per table; writers copy the sequence only while a snapshot is alive.
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use super::error::Error;
use super::query::{QueryOptions, execute};
use super::validate::{ValidationIssue, Validator};
use super::value::Record;
use super::where_clause::{WhereClause, matches};

pub struct Table {
    records: Mutex<Arc<Vec<Record>>>,
    validator: Option<Arc<dyn Validator>>,
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("len", &self.len())
            .field("validated", &self.has_validator())
            .finish()
    }
}

impl Table {
    /// Untyped table: every record is accepted as-is.
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Arc::new(Vec::new())),
            validator: None,
        }
    }

    pub fn with_validator(validator: impl Validator + 'static) -> Self {
        Self::with_shared_validator(Arc::new(validator))
    }

    pub fn with_shared_validator(validator: Arc<dyn Validator>) -> Self {
        Self {
            records: Mutex::new(Arc::new(Vec::new())),
            validator: Some(validator),
        }
    }

    pub fn has_validator(&self) -> bool {
        self.validator.is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends one record after validating it.
    pub fn insert(&self, record: Record) -> Result<(), Error> {
        if let Some(validator) = &self.validator {
            let issues = validator.validate(&record);
            if !issues.is_empty() {
                return Err(Error::validation(issues));
            }
        }
        let mut guard = self.lock();
        Arc::make_mut(&mut guard).push(record);
        Ok(())
    }

    pub fn find(&self, options: &QueryOptions) -> Vec<Record> {
        execute(&self.snapshot(), options)
    }

    pub fn all(&self) -> Vec<Record> {
        Vec::clone(&self.snapshot())
    }

    /// Shared read-only view of the records as of this call.
    pub fn snapshot(&self) -> Arc<Vec<Record>> {
        Arc::clone(&self.lock())
    }

    /// Removes every matching record (all records when `where_clause` is `None`).
    /// Returns how many were removed.
    pub fn delete(&self, where_clause: Option<&WhereClause>) -> usize {
        let mut guard = self.lock();
        let before = guard.len();
        match where_clause {
            None => *guard = Arc::new(Vec::new()),
            Some(where_clause) => {
                if guard.iter().any(|record| matches(record, where_clause)) {
                    Arc::make_mut(&mut guard).retain(|record| !matches(record, where_clause));
                }
            }
        }
        before - guard.len()
    }

    /// Merges `patch` over every matching record in place.
    /// Only the patch itself is validated. Returns how many records changed.
    pub fn update(&self, where_clause: Option<&WhereClause>, patch: &Record) -> Result<usize, Error> {
        if let Some(validator) = &self.validator {
            let issues = validator.validate_patch(patch);
            if !issues.is_empty() {
                return Err(Error::validation(issues));
            }
        }
        let is_match = |record: &Record| where_clause.is_none_or(|clause| matches(record, clause));

        let mut guard = self.lock();
        if !guard.iter().any(is_match) {
            return Ok(0);
        }
        let mut updated = 0;
        for record in Arc::make_mut(&mut guard).iter_mut() {
            if !is_match(&*record) {
                continue;
            }
            for (field, value) in patch {
                record.insert(field.clone(), value.clone());
            }
            updated += 1;
        }
        Ok(updated)
    }

    /// Appends a batch after validating all of it; one bad record rejects the batch.
    pub fn load(&self, records: Vec<Record>) -> Result<(), Error> {
        if let Some(validator) = &self.validator {
            let issues: Vec<ValidationIssue> = records
                .iter()
                .enumerate()
                .flat_map(|(index, record)| {
                    validator
                        .validate(record)
                        .into_iter()
                        .map(move |issue| issue.at_index(index))
                })
                .collect();
            if !issues.is_empty() {
                return Err(Error::validation(issues));
            }
        }
        let mut guard = self.lock();
        Arc::make_mut(&mut guard).extend(records);
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Arc<Vec<Record>>> {
        self.records
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}
