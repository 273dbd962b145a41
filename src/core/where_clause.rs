//! Purpose: Represent and evaluate record predicates (field conditions plus `$or`).
//! Exports: `WhereClause`, `FieldCondition`, `matches`.
//! Role: Parses the JSON wire form once, then matches records without allocation.
//! Invariants: Field conditions are ANDed; an `$or` branch needs at least one match.
//! Invariants: A clause with no field conditions and no `$or` matches every record.
//! Invariants: A field literally named `$or` is only reachable via the Rust builders.
use serde::Deserialize;
use serde_json::Value;

use super::condition::{Condition, evaluate};
use super::error::{Error, ErrorKind};
use super::value::Record;

const OR_KEY: &str = "$or";

#[derive(Clone, Debug)]
pub struct FieldCondition {
    pub field: String,
    pub condition: Condition,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(try_from = "Value")]
pub enum WhereClause {
    Fields(Vec<FieldCondition>),
    AnyOf(Vec<WhereClause>),
    Both {
        fields: Vec<FieldCondition>,
        any_of: Vec<WhereClause>,
    },
}

impl Default for WhereClause {
    fn default() -> Self {
        Self::Fields(Vec::new())
    }
}

impl WhereClause {
    /// Clause that matches every record.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn field(field: impl Into<String>, condition: impl Into<Condition>) -> Self {
        Self::all().and(field, condition)
    }

    pub fn any_of(branches: Vec<WhereClause>) -> Self {
        Self::AnyOf(branches)
    }

    /// Adds one more ANDed field condition.
    pub fn and(self, field: impl Into<String>, condition: impl Into<Condition>) -> Self {
        let entry = FieldCondition {
            field: field.into(),
            condition: condition.into(),
        };
        match self {
            Self::Fields(mut fields) => {
                fields.push(entry);
                Self::Fields(fields)
            }
            Self::AnyOf(any_of) => Self::Both {
                fields: vec![entry],
                any_of,
            },
            Self::Both { mut fields, any_of } => {
                fields.push(entry);
                Self::Both { fields, any_of }
            }
        }
    }

    /// Attaches (or replaces) the disjunction branches.
    pub fn or(self, branches: Vec<WhereClause>) -> Self {
        match self {
            Self::Fields(fields) if fields.is_empty() => Self::AnyOf(branches),
            Self::Fields(fields) | Self::Both { fields, .. } => Self::Both {
                fields,
                any_of: branches,
            },
            Self::AnyOf(_) => Self::AnyOf(branches),
        }
    }

    pub fn fields(&self) -> &[FieldCondition] {
        match self {
            Self::Fields(fields) | Self::Both { fields, .. } => fields,
            Self::AnyOf(_) => &[],
        }
    }

    pub fn branches(&self) -> Option<&[WhereClause]> {
        match self {
            Self::Fields(_) => None,
            Self::AnyOf(any_of) | Self::Both { any_of, .. } => Some(any_of),
        }
    }

    pub fn from_json(value: &Value) -> Result<Self, Error> {
        let Value::Object(map) = value else {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("where clause must be a JSON object")
                .with_hint(r#"Example: {"age": {"$gte": 30}, "$or": [{"name": "Alice"}]}"#));
        };

        let mut fields = Vec::with_capacity(map.len());
        let mut any_of = None;
        for (key, value) in map {
            if key == OR_KEY {
                any_of = Some(parse_branches(value)?);
                continue;
            }
            let condition = Condition::from_json(value).map_err(|err| {
                let hint = format!("while parsing the condition for field `{key}`");
                err.with_hint(hint)
            })?;
            fields.push(FieldCondition {
                field: key.clone(),
                condition,
            });
        }

        Ok(match any_of {
            None => Self::Fields(fields),
            Some(any_of) if fields.is_empty() => Self::AnyOf(any_of),
            Some(any_of) => Self::Both { fields, any_of },
        })
    }
}

impl TryFrom<Value> for WhereClause {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_json(&value)
    }
}

fn parse_branches(value: &Value) -> Result<Vec<WhereClause>, Error> {
    let Value::Array(items) = value else {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("`$or` expects an array of where clauses"));
    };
    items.iter().map(WhereClause::from_json).collect()
}

/// True when `record` satisfies every field condition and, if present, one `$or` branch.
pub fn matches(record: &Record, clause: &WhereClause) -> bool {
    let fields_ok = clause
        .fields()
        .iter()
        .all(|entry| evaluate(record.get(&entry.field), &entry.condition));
    if !fields_ok {
        return false;
    }
    match clause.branches() {
        None => true,
        Some(branches) => branches.iter().any(|branch| matches(record, branch)),
    }
}

#[cfg(test)]
mod tests {
    use super::{WhereClause, matches};
    use crate::core::condition::Condition;
    use crate::core::error::ErrorKind;
    use crate::core::value::Record;
    use serde_json::{Value, json};

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn clause(value: Value) -> WhereClause {
        WhereClause::from_json(&value).expect("where clause")
    }

    #[test]
    fn empty_clause_matches_everything() {
        assert!(matches(&record(json!({"a": 1})), &clause(json!({}))));
        assert!(matches(&record(json!({})), &WhereClause::all()));
    }

    #[test]
    fn field_conditions_are_anded() {
        let where_clause = clause(json!({"name": "Alice", "age": {"$gte": 30}}));
        assert!(matches(&record(json!({"name": "Alice", "age": 31})), &where_clause));
        assert!(!matches(&record(json!({"name": "Alice", "age": 29})), &where_clause));
        assert!(!matches(&record(json!({"name": "Bob", "age": 31})), &where_clause));
        assert!(!matches(&record(json!({"age": 31})), &where_clause));
    }

    #[test]
    fn or_requires_one_branch_and_the_flat_part() {
        let where_clause = clause(json!({
            "active": true,
            "$or": [{"name": "Alice"}, {"name": "Charlie"}]
        }));
        assert!(matches(&record(json!({"name": "Alice", "active": true})), &where_clause));
        assert!(!matches(&record(json!({"name": "Alice", "active": false})), &where_clause));
        assert!(!matches(&record(json!({"name": "Bob", "active": true})), &where_clause));
        assert!(matches!(where_clause, WhereClause::Both { .. }));
    }

    #[test]
    fn only_or_is_a_disjunction() {
        let where_clause = clause(json!({"$or": [{"age": {"$lt": 18}}, {"age": {"$gt": 65}}]}));
        assert!(matches!(where_clause, WhereClause::AnyOf(_)));
        assert!(matches(&record(json!({"age": 70})), &where_clause));
        assert!(!matches(&record(json!({"age": 40})), &where_clause));
    }

    #[test]
    fn empty_or_matches_nothing() {
        let where_clause = clause(json!({"$or": []}));
        assert!(!matches(&record(json!({"a": 1})), &where_clause));
    }

    #[test]
    fn nested_or_is_recursive() {
        let where_clause = clause(json!({
            "$or": [
                {"kind": "a", "$or": [{"n": 1}, {"n": 2}]},
                {"kind": "b"}
            ]
        }));
        assert!(matches(&record(json!({"kind": "a", "n": 2})), &where_clause));
        assert!(!matches(&record(json!({"kind": "a", "n": 3})), &where_clause));
        assert!(matches(&record(json!({"kind": "b", "n": 3})), &where_clause));
    }

    #[test]
    fn builder_can_address_a_field_named_or() {
        let where_clause = WhereClause::field("$or", Condition::eq("literal"));
        assert!(matches(&record(json!({"$or": "literal"})), &where_clause));
    }

    #[test]
    fn builder_combines_fields_and_branches() {
        let where_clause = WhereClause::field("age", Condition::gte(30)).or(vec![
            WhereClause::field("name", Condition::eq("Alice")),
            WhereClause::field("name", Condition::eq("Bob")),
        ]);
        assert!(matches(&record(json!({"name": "Bob", "age": 30})), &where_clause));
        assert!(!matches(&record(json!({"name": "Bob", "age": 20})), &where_clause));
    }

    #[test]
    fn malformed_clauses_are_usage_errors() {
        for value in [json!([1, 2]), json!({"$or": {"a": 1}}), json!({"a": {"$in": "x"}})] {
            let err = WhereClause::from_json(&value).expect_err("usage error");
            assert_eq!(err.kind(), ErrorKind::Usage);
        }
    }

    #[test]
    fn deserializes_from_json_text() {
        let where_clause: WhereClause =
            serde_json::from_str(r#"{"age": {"$gt": 20}}"#).expect("deserialize");
        assert_eq!(where_clause.fields().len(), 1);
    }
}
