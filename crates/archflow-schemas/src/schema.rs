//! Schema data types (spec.md §3, §4.5)
//!
//! The `Schema` value shape lives here; the validation algorithm (error
//! accumulation, dot-path nesting, constraint checks) is a *component*
//! (C5, Tool & Schema Layer) and lives in `archflow-tools`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The primitive field types a [`Schema`] field can declare.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Array,
    Object,
    Any,
}

/// A constraint attached to a field, beyond its base type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Constraint {
    /// Value must equal one of the allowed values.
    Enum { allowed: Vec<serde_json::Value> },
    /// String value must fully match the regex.
    Pattern { regex: String },
    /// Numeric value must fall within `[min, max]` inclusive.
    Range { min: f64, max: f64 },
}

/// A single field definition within a [`Schema`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Field {
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    /// Present iff `field_type == Object`: nested field definitions.
    #[serde(default)]
    pub nested: Option<Schema>,
    /// Present iff `field_type == Array`: the element schema's single field
    /// definition (validated per-element).
    #[serde(default)]
    pub items: Option<Box<Field>>,
}

impl Field {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: false,
            constraints: vec![],
            nested: None,
            items: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_constraint(mut self, c: Constraint) -> Self {
        self.constraints.push(c);
        self
    }
}

/// A named field-definition mapping with a strict-mode flag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Schema {
    pub fields: HashMap<String, Field>,
    /// Reject unknown fields not present in `fields`.
    #[serde(default)]
    pub strict: bool,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: impl Into<String>, field: Field) -> Self {
        self.fields.insert(name.into(), field);
        self
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }
}

/// One accumulated validation failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationError {
    /// Dot-path to the offending field, e.g. "address.zip".
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}
