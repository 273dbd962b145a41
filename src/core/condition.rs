//! Purpose: Decide whether one field value satisfies one condition.
//! Exports: `Condition`, `OperatorSet`, `evaluate`.
//! Role: Leaf of the query engine; the where-clause matcher delegates here.
//! Invariants: Evaluation is pure and infallible; malformed input fails at parse time.
//! Invariants: Ordering operators are false for absent or cross-kind values.
//! Invariants: An operator set with no operators places no requirement on the field.
use std::cmp::Ordering;

use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};

use super::error::{Error, ErrorKind};
use super::value::{match_text, natural_cmp, values_equal};

#[derive(Clone, Debug)]
pub enum Condition {
    Equals(Value),
    Operators(OperatorSet),
}

#[derive(Clone, Debug, Default)]
pub struct OperatorSet {
    gt: Option<Value>,
    gte: Option<Value>,
    lt: Option<Value>,
    lte: Option<Value>,
    ne: Option<Value>,
    one_of: Option<Vec<Value>>,
    none_of: Option<Vec<Value>>,
    regex: Option<Regex>,
}

impl Condition {
    pub fn eq(value: impl Into<Value>) -> Self {
        Self::Equals(value.into())
    }

    pub fn gt(value: impl Into<Value>) -> Self {
        Self::Operators(OperatorSet::new().gt(value))
    }

    pub fn gte(value: impl Into<Value>) -> Self {
        Self::Operators(OperatorSet::new().gte(value))
    }

    pub fn lt(value: impl Into<Value>) -> Self {
        Self::Operators(OperatorSet::new().lt(value))
    }

    pub fn lte(value: impl Into<Value>) -> Self {
        Self::Operators(OperatorSet::new().lte(value))
    }

    pub fn ne(value: impl Into<Value>) -> Self {
        Self::Operators(OperatorSet::new().ne(value))
    }

    pub fn one_of<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::Operators(OperatorSet::new().one_of(values))
    }

    pub fn none_of<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::Operators(OperatorSet::new().none_of(values))
    }

    pub fn regex(pattern: &str) -> Result<Self, Error> {
        Ok(Self::Operators(OperatorSet::new().regex(compile_regex(
            pattern, "",
        )?)))
    }

    /// Parses the JSON wire form: a literal, or an object of `$` operators.
    pub fn from_json(value: &Value) -> Result<Self, Error> {
        match value {
            Value::Object(map) if map.keys().any(|key| key.starts_with('$')) => {
                OperatorSet::from_json(map).map(Self::Operators)
            }
            other => Ok(Self::Equals(other.clone())),
        }
    }
}

impl From<OperatorSet> for Condition {
    fn from(operators: OperatorSet) -> Self {
        Self::Operators(operators)
    }
}

impl OperatorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gt(mut self, value: impl Into<Value>) -> Self {
        self.gt = Some(value.into());
        self
    }

    pub fn gte(mut self, value: impl Into<Value>) -> Self {
        self.gte = Some(value.into());
        self
    }

    pub fn lt(mut self, value: impl Into<Value>) -> Self {
        self.lt = Some(value.into());
        self
    }

    pub fn lte(mut self, value: impl Into<Value>) -> Self {
        self.lte = Some(value.into());
        self
    }

    pub fn ne(mut self, value: impl Into<Value>) -> Self {
        self.ne = Some(value.into());
        self
    }

    pub fn one_of<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.one_of = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn none_of<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.none_of = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn regex(mut self, regex: Regex) -> Self {
        self.regex = Some(regex);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.gt.is_none()
            && self.gte.is_none()
            && self.lt.is_none()
            && self.lte.is_none()
            && self.ne.is_none()
            && self.one_of.is_none()
            && self.none_of.is_none()
            && self.regex.is_none()
    }

    fn from_json(map: &Map<String, Value>) -> Result<Self, Error> {
        let mut set = Self::new();
        let mut pattern: Option<&str> = None;
        let mut flags = "";
        for (key, value) in map {
            match key.as_str() {
                "$gt" => set.gt = Some(value.clone()),
                "$gte" => set.gte = Some(value.clone()),
                "$lt" => set.lt = Some(value.clone()),
                "$lte" => set.lte = Some(value.clone()),
                "$ne" => set.ne = Some(value.clone()),
                "$in" => set.one_of = Some(array_operand(key, value)?),
                "$nin" => set.none_of = Some(array_operand(key, value)?),
                "$regex" => pattern = Some(string_operand(key, value)?),
                "$options" => flags = string_operand(key, value)?,
                other if other.starts_with('$') => {
                    return Err(Error::new(ErrorKind::Usage)
                        .with_message(format!("unknown query operator `{other}`"))
                        .with_hint(
                            "Supported operators: $gt $gte $lt $lte $ne $in $nin $regex.",
                        ));
                }
                other => {
                    return Err(Error::new(ErrorKind::Usage)
                        .with_message(format!(
                            "operator object mixes operators with field `{other}`"
                        ))
                        .with_hint("Use either a literal value or an object of `$` operators."));
                }
            }
        }
        match pattern {
            Some(pattern) => set.regex = Some(compile_regex(pattern, flags)?),
            None if !flags.is_empty() => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("`$options` requires `$regex`"));
            }
            None => {}
        }
        Ok(set)
    }
}

/// Evaluates `condition` against a field value; `None` means the field is absent.
pub fn evaluate(field: Option<&Value>, condition: &Condition) -> bool {
    match condition {
        Condition::Equals(expected) => field.is_some_and(|value| values_equal(value, expected)),
        Condition::Operators(set) => evaluate_operators(field, set),
    }
}

fn evaluate_operators(field: Option<&Value>, set: &OperatorSet) -> bool {
    let ordered = |bound: &Option<Value>, accept: fn(Ordering) -> bool| match bound {
        None => true,
        Some(bound) => field
            .and_then(|value| natural_cmp(value, bound))
            .is_some_and(accept),
    };

    if !ordered(&set.gt, Ordering::is_gt)
        || !ordered(&set.gte, Ordering::is_ge)
        || !ordered(&set.lt, Ordering::is_lt)
        || !ordered(&set.lte, Ordering::is_le)
    {
        return false;
    }
    if let Some(unwanted) = &set.ne {
        if field.is_some_and(|value| values_equal(value, unwanted)) {
            return false;
        }
    }
    if let Some(allowed) = &set.one_of {
        let Some(value) = field else {
            return false;
        };
        if !allowed.iter().any(|candidate| values_equal(value, candidate)) {
            return false;
        }
    }
    if let Some(excluded) = &set.none_of {
        if let Some(value) = field {
            if excluded.iter().any(|candidate| values_equal(value, candidate)) {
                return false;
            }
        }
    }
    if let Some(regex) = &set.regex {
        let Some(value) = field else {
            return false;
        };
        if !regex.is_match(&match_text(value)) {
            return false;
        }
    }
    true
}

fn array_operand(key: &str, value: &Value) -> Result<Vec<Value>, Error> {
    match value {
        Value::Array(values) => Ok(values.clone()),
        _ => Err(Error::new(ErrorKind::Usage)
            .with_message(format!("`{key}` expects an array of values"))),
    }
}

fn string_operand<'a>(key: &str, value: &'a Value) -> Result<&'a str, Error> {
    value.as_str().ok_or_else(|| {
        Error::new(ErrorKind::Usage).with_message(format!("`{key}` expects a string"))
    })
}

fn compile_regex(pattern: &str, flags: &str) -> Result<Regex, Error> {
    let mut builder = RegexBuilder::new(pattern);
    for flag in flags.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            other => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(format!("unsupported regex option `{other}`"))
                    .with_hint("Supported `$options` flags: i m s x."));
            }
        };
    }
    builder.build().map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("invalid `$regex` pattern `{pattern}`"))
            .with_source(err)
    })
}
