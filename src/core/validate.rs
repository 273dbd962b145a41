//! Purpose: Pluggable record validation plus a built-in declarative field schema.
//! Exports: `Validator`, `ValidationIssue`, `Schema`, `FieldRule`, `FieldKind`.
//! Role: Tables consult a validator before committing inserts, loads, and updates.
//! Invariants: An empty issue list means the record is accepted.
//! Invariants: Patch validation never reports missing required fields.
//! Notes: Any `Fn(&Record) -> Vec<ValidationIssue>` closure is a validator.
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::{Error, ErrorKind};
use super::value::{Record, kind_name, values_equal};

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Prefixes the path with the record's position inside a batch.
    pub fn at_index(mut self, index: usize) -> Self {
        self.path = if self.path.is_empty() {
            format!("[{index}]")
        } else {
            format!("[{index}].{}", self.path)
        };
        self
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

pub trait Validator: Send + Sync {
    /// Checks a complete candidate record.
    fn validate(&self, record: &Record) -> Vec<ValidationIssue>;

    /// Checks the fields of an update patch. Defaults to accepting everything.
    fn validate_patch(&self, _patch: &Record) -> Vec<ValidationIssue> {
        Vec::new()
    }
}

impl<F> Validator for F
where
    F: Fn(&Record) -> Vec<ValidationIssue> + Send + Sync,
{
    fn validate(&self, record: &Record) -> Vec<ValidationIssue> {
        self(record)
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    #[default]
    Any,
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    Null,
}

impl FieldKind {
    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value
                .as_f64()
                .is_some_and(|n| value.is_i64() || value.is_u64() || n.fract() == 0.0),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Null => value.is_null(),
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::Null => "null",
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Email,
}

#[derive(Clone, Debug)]
pub struct FieldRule {
    kind: FieldKind,
    required: bool,
    min: Option<f64>,
    max: Option<f64>,
    min_length: Option<usize>,
    max_length: Option<usize>,
    pattern: Option<Regex>,
    format: Option<Format>,
    allowed: Option<Vec<Value>>,
    message: Option<String>,
}

impl FieldRule {
    pub fn of(kind: FieldKind) -> Self {
        Self {
            kind,
            required: true,
            min: None,
            max: None,
            min_length: None,
            max_length: None,
            pattern: None,
            format: None,
            allowed: None,
            message: None,
        }
    }

    pub fn any() -> Self {
        Self::of(FieldKind::Any)
    }

    pub fn string() -> Self {
        Self::of(FieldKind::String)
    }

    pub fn number() -> Self {
        Self::of(FieldKind::Number)
    }

    pub fn integer() -> Self {
        Self::of(FieldKind::Integer)
    }

    pub fn boolean() -> Self {
        Self::of(FieldKind::Boolean)
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn min_length(mut self, len: usize) -> Self {
        self.min_length = Some(len);
        self
    }

    pub fn max_length(mut self, len: usize) -> Self {
        self.max_length = Some(len);
        self
    }

    pub fn pattern(mut self, pattern: &str) -> Result<Self, Error> {
        let regex = Regex::new(pattern).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("invalid schema pattern `{pattern}`"))
                .with_source(err)
        })?;
        self.pattern = Some(regex);
        Ok(self)
    }

    pub fn email(mut self) -> Self {
        self.format = Some(Format::Email);
        self
    }

    pub fn one_of<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.allowed = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Replaces the default text of every issue this rule reports.
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    fn check(&self, field: &str, value: Option<&Value>, patch: bool, out: &mut Vec<ValidationIssue>) {
        // An overridden message is reported once per field.
        let mut reported = false;
        let mut report = |default: String| {
            if reported && self.message.is_some() {
                return;
            }
            reported = true;
            let message = self.message.clone().unwrap_or(default);
            out.push(ValidationIssue::new(field, message));
        };

        let value = match value {
            Some(Value::Null) if !self.required && self.kind != FieldKind::Null => return,
            Some(value) => value,
            None => {
                if self.required && !patch {
                    report("is required".to_string());
                }
                return;
            }
        };

        if !self.kind.accepts(value) {
            report(format!("expected {}, got {}", self.kind.label(), kind_name(value)));
            return;
        }

        if let Some(n) = value.as_f64() {
            if let Some(min) = self.min.filter(|min| n < *min) {
                report(format!("must be greater than or equal to {min}"));
            }
            if let Some(max) = self.max.filter(|max| n > *max) {
                report(format!("must be less than or equal to {max}"));
            }
        }

        let length = match value {
            Value::String(s) => Some((s.chars().count(), "characters")),
            Value::Array(items) => Some((items.len(), "items")),
            _ => None,
        };
        if let Some((len, unit)) = length {
            if let Some(min) = self.min_length.filter(|min| len < *min) {
                report(format!("must have at least {min} {unit}"));
            }
            if let Some(max) = self.max_length.filter(|max| len > *max) {
                report(format!("must have at most {max} {unit}"));
            }
        }

        if let Value::String(text) = value {
            if let Some(pattern) = self.pattern.as_ref().filter(|re| !re.is_match(text)) {
                report(format!("must match pattern `{}`", pattern.as_str()));
            }
            if self.format == Some(Format::Email) && !looks_like_email(text) {
                report("must be a valid email address".to_string());
            }
        }

        if let Some(allowed) = &self.allowed {
            if !allowed.iter().any(|candidate| values_equal(value, candidate)) {
                let list = Value::Array(allowed.clone());
                report(format!("must be one of {list}"));
            }
        }
    }
}

/// Declarative per-field schema; the built-in `Validator`.
#[derive(Clone, Debug, Deserialize)]
#[serde(try_from = "Value")]
pub struct Schema {
    fields: Vec<(String, FieldRule)>,
    additional_fields: bool,
}

impl Default for Schema {
    fn default() -> Self {
        Self {
            fields: Vec::new(),
            additional_fields: true,
        }
    }
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, rule: FieldRule) -> Self {
        self.fields.push((name.into(), rule));
        self
    }

    /// Rejects fields the schema does not name.
    pub fn deny_additional_fields(mut self) -> Self {
        self.additional_fields = false;
        self
    }

    fn rule(&self, name: &str) -> Option<&FieldRule> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, rule)| rule)
    }

    fn check_unknown<'a>(&self, keys: impl Iterator<Item = &'a String>, out: &mut Vec<ValidationIssue>) {
        if self.additional_fields {
            return;
        }
        for key in keys {
            if self.rule(key).is_none() {
                out.push(ValidationIssue::new(key.as_str(), "unknown field"));
            }
        }
    }
}

impl Validator for Schema {
    fn validate(&self, record: &Record) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        for (name, rule) in &self.fields {
            rule.check(name, record.get(name), false, &mut issues);
        }
        self.check_unknown(record.keys(), &mut issues);
        issues
    }

    fn validate_patch(&self, patch: &Record) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        for (name, value) in patch {
            if let Some(rule) = self.rule(name) {
                rule.check(name, Some(value), true, &mut issues);
            }
        }
        self.check_unknown(patch.keys(), &mut issues);
        issues
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SchemaSpec {
    fields: Map<String, Value>,
    #[serde(default = "default_true")]
    additional_fields: bool,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct FieldRuleSpec {
    #[serde(rename = "type", default)]
    kind: FieldKind,
    #[serde(default = "default_true")]
    required: bool,
    min: Option<f64>,
    max: Option<f64>,
    min_length: Option<usize>,
    max_length: Option<usize>,
    pattern: Option<String>,
    format: Option<Format>,
    #[serde(rename = "enum")]
    allowed: Option<Vec<Value>>,
    message: Option<String>,
}

fn default_true() -> bool {
    true
}

impl TryFrom<Value> for Schema {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let spec: SchemaSpec = serde_json::from_value(value).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("invalid schema: {err}"))
                .with_hint(r#"Example: {"fields": {"id": {"type": "integer", "min": 1}}}"#)
        })?;
        let mut schema = Self {
            fields: Vec::with_capacity(spec.fields.len()),
            additional_fields: spec.additional_fields,
        };
        for (name, raw) in spec.fields {
            let rule_spec: FieldRuleSpec = serde_json::from_value(raw).map_err(|err| {
                Error::new(ErrorKind::Usage)
                    .with_message(format!("invalid schema rule for field `{name}`: {err}"))
            })?;
            let mut rule = FieldRule::of(rule_spec.kind);
            rule.required = rule_spec.required;
            rule.min = rule_spec.min;
            rule.max = rule_spec.max;
            rule.min_length = rule_spec.min_length;
            rule.max_length = rule_spec.max_length;
            rule.format = rule_spec.format;
            rule.allowed = rule_spec.allowed;
            rule.message = rule_spec.message;
            if let Some(pattern) = rule_spec.pattern.as_deref() {
                rule = rule.pattern(pattern)?;
            }
            schema.fields.push((name, rule));
        }
        Ok(schema)
    }
}

fn looks_like_email(text: &str) -> bool {
    if text.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = text.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain
            .split_once('.')
            .is_some_and(|(host, _)| !host.is_empty())
        && !domain.ends_with('.')
}

#[cfg(test)]
mod tests {
    use super::{FieldRule, Schema, ValidationIssue, Validator};
    use crate::core::value::Record;
    use serde_json::{Value, json};

    fn record(value: Value) -> Record {
        serde_json::from_value(value).expect("record")
    }

    fn user_schema() -> Schema {
        Schema::new()
            .field("id", FieldRule::number().min(1.0).message("ID must be positive"))
            .field("name", FieldRule::string().min_length(1).message("Name is required"))
            .field("email", FieldRule::string().email().message("Must be a valid email"))
            .field("age", FieldRule::integer().min(0.0).max(150.0).optional())
    }

    #[test]
    fn valid_record_has_no_issues() {
        let issues = user_schema().validate(&record(json!({
            "id": 1, "name": "John Doe", "email": "john@example.com", "age": 30
        })));
        assert!(issues.is_empty(), "{issues:?}");
    }

    #[test]
    fn every_failing_field_is_reported_in_schema_order() {
        let issues = user_schema().validate(&record(json!({
            "id": -1, "name": "", "email": "invalid"
        })));
        let paths: Vec<&str> = issues.iter().map(|issue| issue.path.as_str()).collect();
        assert_eq!(paths, ["id", "name", "email"]);
        assert_eq!(issues[0].message, "ID must be positive");
        assert_eq!(issues[2].message, "Must be a valid email");
    }

    #[test]
    fn default_messages_describe_the_failure() {
        let schema = Schema::new()
            .field("age", FieldRule::integer().max(150.0))
            .field("role", FieldRule::any().one_of(["admin", "user"]))
            .field("code", FieldRule::string().pattern("^[A-Z]{3}$").expect("pattern"));
        let issues = schema.validate(&record(json!({"age": 200, "role": "root", "code": "ab"})));
        let text: Vec<String> = issues.iter().map(ToString::to_string).collect();
        assert_eq!(
            text,
            [
                "age: must be less than or equal to 150",
                "role: must be one of [\"admin\",\"user\"]",
                "code: must match pattern `^[A-Z]{3}$`",
            ]
        );
    }

    #[test]
    fn overridden_message_is_reported_once_per_field() {
        let schema = Schema::new().field(
            "code",
            FieldRule::string()
                .min_length(5)
                .pattern("^[A-Z]+$")
                .expect("pattern")
                .message("Code must be five capital letters"),
        );
        let issues = schema.validate(&record(json!({"code": "ab"})));
        assert_eq!(
            issues,
            [ValidationIssue::new("code", "Code must be five capital letters")]
        );

        let plain = Schema::new().field(
            "code",
            FieldRule::string().min_length(5).pattern("^[A-Z]+$").expect("pattern"),
        );
        assert_eq!(plain.validate(&record(json!({"code": "ab"}))).len(), 2);
    }

    #[test]
    fn missing_and_mistyped_fields() {
        let schema = Schema::new()
            .field("id", FieldRule::integer())
            .field("nick", FieldRule::string().optional());
        let issues = schema.validate(&record(json!({"nick": 5})));
        assert_eq!(
            issues,
            [
                ValidationIssue::new("id", "is required"),
                ValidationIssue::new("nick", "expected string, got number"),
            ]
        );
        assert!(schema.validate(&record(json!({"id": 2, "nick": null}))).is_empty());
    }

    #[test]
    fn patch_checks_only_present_fields() {
        let schema = user_schema();
        assert!(schema
            .validate_patch(&record(json!({"email": "new@example.com"})))
            .is_empty());
        let issues = schema.validate_patch(&record(json!({"email": "nope"})));
        assert_eq!(issues, [ValidationIssue::new("email", "Must be a valid email")]);
    }

    #[test]
    fn closed_schema_rejects_unknown_fields() {
        let schema = Schema::new()
            .field("id", FieldRule::integer())
            .deny_additional_fields();
        let issues = schema.validate(&record(json!({"id": 1, "extra": true})));
        assert_eq!(issues, [ValidationIssue::new("extra", "unknown field")]);
    }

    #[test]
    fn closures_are_validators() {
        let validator = |record: &Record| {
            if record.contains_key("id") {
                Vec::new()
            } else {
                vec![ValidationIssue::new("id", "missing id")]
            }
        };
        assert_eq!(validator.validate(&record(json!({}))).len(), 1);
        assert!(validator.validate_patch(&record(json!({}))).is_empty());
    }

    #[test]
    fn schema_deserializes_from_json() {
        let schema: Schema = serde_json::from_value(json!({
            "fields": {
                "id": {"type": "integer", "min": 1, "message": "ID must be positive"},
                "email": {"type": "string", "format": "email", "required": false}
            },
            "additional_fields": false
        }))
        .expect("schema");
        let issues = schema.validate(&record(json!({"id": 0, "email": "x", "other": 1})));
        let text: Vec<String> = issues.iter().map(ToString::to_string).collect();
        assert_eq!(
            text,
            [
                "id: ID must be positive",
                "email: must be a valid email address",
                "other: unknown field",
            ]
        );
    }

    #[test]
    fn schema_json_errors_are_reported() {
        let bad = [
            json!({"fields": {"id": {"type": "uuid"}}}),
            json!({"fields": {"id": {"pattern": "("}}}),
            json!({"columns": {}}),
        ];
        for value in bad {
            assert!(serde_json::from_value::<Schema>(value).is_err());
        }
    }

    #[test]
    fn issue_paths_gain_batch_index() {
        let issue = ValidationIssue::new("id", "bad").at_index(2);
        assert_eq!(issue.to_string(), "[2].id: bad");
    }
}
