//! Purpose: Define the stable public Rust API boundary for sproutdb.
//! Exports: Table/registry types, query building blocks, validation, and errors.
//! Role: Public, additive-only surface re-exported from `core`.
//! Invariants: Callers embedding tables in tests only need this module.

use crate::core::value::kind_name;

pub use crate::core::condition::{Condition, OperatorSet};
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::database::Database;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::query::{QueryOptions, SortClause, SortDirection};
pub use crate::core::table::Table;
pub use crate::core::validate::{FieldKind, FieldRule, Schema, ValidationIssue, Validator};
pub use crate::core::value::Record;
pub use crate::core::where_clause::{FieldCondition, WhereClause};

/// Converts a JSON value into a `Record`, rejecting anything but an object.
pub fn record_from_json(value: serde_json::Value) -> Result<Record, Error> {
    match value {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(Error::new(ErrorKind::Usage)
            .with_message(format!("record must be a JSON object, got {}", kind_name(&other)))),
    }
}
