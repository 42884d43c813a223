//! Schema validation algorithm (C5, spec.md §4.5).
//!
//! Deterministic, error-accumulating (not fail-fast): every violation in the
//! value tree is collected before returning, so a caller (e.g. the
//! Deterministic Agent Executor's repair prompt) can report everything
//! wrong with one attempt rather than one violation per retry.

use archflow_schemas::{Constraint, Field, FieldType, Schema, ValidationError};
use regex::Regex;
use serde_json::Value;

/// Validate `value` against `schema`, accumulating every violation.
/// Returns `Ok(())` iff the accumulated list is empty.
pub fn validate(schema: &Schema, value: &Value) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    validate_object(schema, value, "", &mut errors);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_object(schema: &Schema, value: &Value, prefix: &str, errors: &mut Vec<ValidationError>) {
    let object = match value.as_object() {
        Some(object) => object,
        None => {
            errors.push(ValidationError::new(
                path(prefix, ""),
                format!("expected an object, got {}", type_name(value)),
            ));
            return;
        }
    };

    for (name, field) in &schema.fields {
        let field_path = path(prefix, name);
        match object.get(name) {
            Some(found) => validate_field(field, found, &field_path, errors),
            None if field.required => {
                errors.push(ValidationError::new(&field_path, "required field is missing"));
            }
            None => {}
        }
    }

    if schema.strict {
        for key in object.keys() {
            if !schema.fields.contains_key(key) {
                errors.push(ValidationError::new(
                    path(prefix, key),
                    "unexpected field in strict schema",
                ));
            }
        }
    }
}

fn validate_field(field: &Field, value: &Value, field_path: &str, errors: &mut Vec<ValidationError>) {
    if !type_matches(&field.field_type, value) {
        errors.push(ValidationError::new(
            field_path,
            format!(
                "expected type {:?}, got {}",
                field.field_type,
                type_name(value)
            ),
        ));
        return;
    }

    for constraint in &field.constraints {
        if let Some(message) = check_constraint(constraint, value) {
            errors.push(ValidationError::new(field_path, message));
        }
    }

    match field.field_type {
        FieldType::Object => {
            if let Some(nested) = &field.nested {
                validate_object(nested, value, field_path, errors);
            }
        }
        FieldType::Array => {
            if let (Some(item_field), Some(items)) = (&field.items, value.as_array()) {
                for (index, item) in items.iter().enumerate() {
                    let item_path = format!("{field_path}[{index}]");
                    validate_field(item_field, item, &item_path, errors);
                }
            }
        }
        _ => {}
    }
}

fn type_matches(expected: &FieldType, value: &Value) -> bool {
    match expected {
        FieldType::String => value.is_string(),
        FieldType::Number => value.is_number(),
        FieldType::Boolean => value.is_boolean(),
        FieldType::Array => value.is_array(),
        FieldType::Object => value.is_object(),
        FieldType::Any => true,
    }
}

fn check_constraint(constraint: &Constraint, value: &Value) -> Option<String> {
    match constraint {
        Constraint::Enum { allowed } => {
            if allowed.contains(value) {
                None
            } else {
                Some(format!("value is not one of the allowed values {allowed:?}"))
            }
        }
        Constraint::Pattern { regex } => {
            let text = value.as_str()?;
            let re = Regex::new(regex).ok()?;
            match re.find(text) {
                Some(m) if m.start() == 0 && m.end() == text.len() => None,
                _ => Some(format!("value does not fully match pattern /{regex}/")),
            }
        }
        Constraint::Range { min, max } => {
            let number = value.as_f64()?;
            if number >= *min && number <= *max {
                None
            } else {
                Some(format!("value {number} is outside range [{min}, {max}]"))
            }
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else if name.is_empty() {
        prefix.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address_schema() -> Schema {
        Schema::new()
            .with_field("zip", Field::new(FieldType::String).required())
            .strict()
    }

    fn person_schema() -> Schema {
        Schema::new()
            .with_field("name", Field::new(FieldType::String).required())
            .with_field(
                "age",
                Field::new(FieldType::Number)
                    .required()
                    .with_constraint(Constraint::Range { min: 0.0, max: 150.0 }),
            )
            .with_field("address", {
                let mut f = Field::new(FieldType::Object);
                f.nested = Some(address_schema());
                f
            })
    }

    #[test]
    fn accumulates_every_violation_rather_than_failing_fast() {
        let schema = person_schema();
        let value = serde_json::json!({"age": 200});
        let errors = validate(&schema, &value).unwrap_err();

        // missing 'name' AND out-of-range 'age' both reported in one pass
        assert!(errors.iter().any(|e| e.path == "name"));
        assert!(errors.iter().any(|e| e.path == "age"));
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn nested_schema_errors_use_dot_path() {
        let schema = person_schema();
        let value = serde_json::json!({"name": "Ada", "age": 30, "address": {}});
        let errors = validate(&schema, &value).unwrap_err();
        assert_eq!(errors, vec![ValidationError::new("address.zip", "required field is missing")]);
    }

    #[test]
    fn strict_mode_rejects_unexpected_fields() {
        let schema = Schema::new()
            .with_field("name", Field::new(FieldType::String).required())
            .strict();
        let value = serde_json::json!({"name": "Ada", "extra": true});
        let errors = validate(&schema, &value).unwrap_err();
        assert_eq!(errors, vec![ValidationError::new("extra", "unexpected field in strict schema")]);
    }

    #[test]
    fn pattern_constraint_requires_full_match() {
        let schema = Schema::new().with_field(
            "code",
            Field::new(FieldType::String)
                .required()
                .with_constraint(Constraint::Pattern {
                    regex: r"^[A-Z]{3}\d{3}$".to_string(),
                }),
        );
        assert!(validate(&schema, &serde_json::json!({"code": "ABC123"})).is_ok());
        assert!(validate(&schema, &serde_json::json!({"code": "abc123"})).is_err());
    }

    #[test]
    fn array_items_validated_per_element() {
        let schema = Schema::new().with_field("tags", {
            let mut f = Field::new(FieldType::Array).required();
            f.items = Some(Box::new(Field::new(FieldType::String)));
            f
        });
        let errors = validate(&schema, &serde_json::json!({"tags": ["ok", 5]})).unwrap_err();
        assert_eq!(errors, vec![ValidationError::new("tags[1]", "expected type String, got number")]);
    }
}
