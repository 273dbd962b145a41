//! Purpose: Run the read pipeline: filter, then sort, then offset, then limit.
//! Exports: `QueryOptions`, `SortClause`, `SortDirection`, `execute`.
//! Role: Orchestrates the where-clause matcher over a table snapshot.
//! Invariants: Input is never mutated; results are freshly cloned records.
//! Invariants: Sorting is stable; ties keep their original relative order.
//! Invariants: `limit` of zero means "no limit".
use std::cmp::Ordering;

use serde::Deserialize;
use serde_json::Value;

use super::error::{Error, ErrorKind};
use super::value::{Record, sort_cmp};
use super::where_clause::{WhereClause, matches};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            Self::Asc => ordering,
            Self::Desc => ordering.reverse(),
        }
    }
}

/// Ordered sort keys; earlier keys take precedence.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(try_from = "Value")]
pub struct SortClause {
    keys: Vec<(String, SortDirection)>,
}

impl SortClause {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.keys.push((field.into(), direction));
        self
    }

    pub fn keys(&self) -> &[(String, SortDirection)] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn compare(&self, a: &Record, b: &Record) -> Ordering {
        for (field, direction) in &self.keys {
            let ordering = direction.apply(sort_cmp(a.get(field), b.get(field)));
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

impl TryFrom<Value> for SortClause {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let Value::Object(map) = value else {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("sort must be a JSON object")
                .with_hint(r#"Example: {"name": "asc", "age": "desc"}"#));
        };
        let mut clause = Self::new();
        for (field, direction) in map {
            let direction = match direction.as_str() {
                Some("asc") => SortDirection::Asc,
                Some("desc") => SortDirection::Desc,
                _ => {
                    return Err(Error::new(ErrorKind::Usage)
                        .with_message(format!(
                            "invalid sort direction for field `{field}`: {direction}"
                        ))
                        .with_hint("Use \"asc\" or \"desc\"."));
                }
            };
            clause = clause.then(field, direction);
        }
        Ok(clause)
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryOptions {
    #[serde(rename = "where")]
    pub where_clause: Option<WhereClause>,
    pub sort: Option<SortClause>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, where_clause: WhereClause) -> Self {
        self.where_clause = Some(where_clause);
        self
    }

    pub fn sort_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        let sort = self.sort.take().unwrap_or_default();
        self.sort = Some(sort.then(field, direction));
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

pub fn execute(records: &[Record], options: &QueryOptions) -> Vec<Record> {
    let mut selected: Vec<&Record> = match &options.where_clause {
        Some(where_clause) => records
            .iter()
            .filter(|record| matches(record, where_clause))
            .collect(),
        None => records.iter().collect(),
    };

    if let Some(sort) = options.sort.as_ref().filter(|sort| !sort.is_empty()) {
        selected.sort_by(|a, b| sort.compare(a, b));
    }

    let offset = options.offset.unwrap_or(0);
    let limit = match options.limit {
        Some(0) | None => usize::MAX,
        Some(limit) => limit,
    };
    selected
        .into_iter()
        .skip(offset)
        .take(limit)
        .cloned()
        .collect()
}
