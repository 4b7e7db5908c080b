// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Flat input/output schemas (sufficient for strict object validation).

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Base type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// UTF-8 string.
    String,
    /// Signed or unsigned integer.
    Integer,
    /// Any JSON number.
    Number,
    /// Boolean flag.
    Bool,
    /// Array of strings.
    StringList,
    /// Object with arbitrary keys (dictionary).
    Map,
    /// Any JSON value.
    Any,
}

impl FieldType {
    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::StringList => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string)),
            Self::Map => value.is_object(),
            Self::Any => true,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Bool => "boolean",
            Self::StringList => "list of strings",
            Self::Map => "object",
            Self::Any => "value",
        }
    }
}

/// Field descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    /// Field name as it appears on the wire.
    pub name: &'static str,
    /// Base type.
    pub ty: FieldType,
    /// Whether the field must be present and non-null.
    pub required: bool,
    /// Minimum length in characters (strings) or items (lists). Zero disables the check.
    pub min_len: usize,
}

impl FieldDef {
    /// Required field without a length constraint.
    pub const fn required(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty,
            required: true,
            min_len: 0,
        }
    }

    /// Optional field; absent and `null` are both accepted.
    pub const fn optional(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty,
            required: false,
            min_len: 0,
        }
    }

    /// Set a minimum length.
    pub const fn min_len(mut self, min_len: usize) -> Self {
        self.min_len = min_len;
        self
    }

    fn check(&self, value: &Value, issues: &mut Vec<FieldIssue>) {
        if !self.ty.accepts(value) {
            issues.push(FieldIssue::new(
                self.name,
                format!("expected {}", self.ty.name()),
            ));
            return;
        }
        if self.min_len == 0 {
            return;
        }
        let len = match value {
            Value::String(s) => s.chars().count(),
            Value::Array(items) => items.len(),
            _ => return,
        };
        if len < self.min_len {
            issues.push(FieldIssue::new(
                self.name,
                format!("must be at least {} long", self.min_len),
            ));
        }
    }
}

/// One schema violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldIssue {
    /// Offending field (`$` for the value itself).
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl FieldIssue {
    /// Construct an issue.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Shape of a procedure's input or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    /// Anything goes.
    Any,
    /// No input; only `null` is accepted.
    Unit,
    /// Strict object: listed fields only.
    Object(&'static [FieldDef]),
    /// Array of [`Schema::Object`] values.
    List(&'static [FieldDef]),
    /// Strict object plus a required string `id`.
    Record(&'static [FieldDef]),
    /// Array of [`Schema::Record`] values.
    RecordList(&'static [FieldDef]),
}

impl Schema {
    /// Validate `value`, collecting every issue.
    pub fn validate(&self, value: &Value) -> Result<(), Vec<FieldIssue>> {
        let mut issues = Vec::new();
        match self {
            Self::Any => {}
            Self::Unit => {
                if !value.is_null() {
                    issues.push(FieldIssue::new("$", "expected no input"));
                }
            }
            Self::Object(fields) => check_object(fields, false, value, true, &mut issues),
            Self::Record(fields) => check_object(fields, true, value, true, &mut issues),
            Self::List(fields) => check_list(fields, false, value, &mut issues),
            Self::RecordList(fields) => check_list(fields, true, value, &mut issues),
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }

    /// Validate a partial object (patch): present fields must match and
    /// required fields may be omitted but not nulled.
    pub fn validate_patch(&self, value: &Value) -> Result<(), Vec<FieldIssue>> {
        let mut issues = Vec::new();
        match self {
            Self::Object(fields) | Self::Record(fields) => {
                check_object(fields, false, value, false, &mut issues);
            }
            _ => return self.validate(value),
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }

    /// Fields declared by an object-like schema (empty otherwise).
    pub fn fields(&self) -> &'static [FieldDef] {
        match self {
            Self::Object(fields)
            | Self::List(fields)
            | Self::Record(fields)
            | Self::RecordList(fields) => fields,
            Self::Any | Self::Unit => &[],
        }
    }
}

fn check_list(fields: &[FieldDef], with_id: bool, value: &Value, issues: &mut Vec<FieldIssue>) {
    match value.as_array() {
        Some(items) => {
            for item in items {
                check_object(fields, with_id, item, true, issues);
            }
        }
        None => issues.push(FieldIssue::new("$", "expected a list")),
    }
}

fn check_object(
    fields: &[FieldDef],
    with_id: bool,
    value: &Value,
    enforce_required: bool,
    issues: &mut Vec<FieldIssue>,
) {
    let Some(map) = value.as_object() else {
        issues.push(FieldIssue::new("$", "expected an object"));
        return;
    };
    if with_id && !map.get("id").is_some_and(Value::is_string) {
        issues.push(FieldIssue::new("id", "required"));
    }
    for field in fields {
        match map.get(field.name) {
            None => {
                if field.required && enforce_required {
                    issues.push(FieldIssue::new(field.name, "required"));
                }
            }
            // A patch that nulls a required field would delete it on merge.
            Some(Value::Null) => {
                if field.required {
                    issues.push(FieldIssue::new(field.name, "required"));
                }
            }
            Some(v) => field.check(v, issues),
        }
    }
    reject_unknown(fields, with_id, map, issues);
}

fn reject_unknown(
    fields: &[FieldDef],
    with_id: bool,
    map: &Map<String, Value>,
    issues: &mut Vec<FieldIssue>,
) {
    for key in map.keys() {
        let known = (with_id && key == "id") || fields.iter().any(|f| f.name == key);
        if !known {
            issues.push(FieldIssue::new(key.clone(), "unknown field"));
        }
    }
}
