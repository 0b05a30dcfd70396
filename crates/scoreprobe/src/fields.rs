//! Declarative field initialization for decoded check definitions.
//!
//! Every probe kind publishes a static table of [`FieldSpec`]s. One generic
//! walker applies the table to the decoded definition object: required
//! fields must be non-zero, optional fields may receive a literal default,
//! and list fields apply a nested table to each element. Adding a probe kind
//! therefore means declaring its table, not writing validation code.

use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::models::CheckMetadata;

/// A literal default declared for an optional field
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal {
    Str(&'static str),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
}

impl Literal {
    fn to_value(self) -> Value {
        match self {
            Literal::Str(s) => Value::String(s.to_string()),
            Literal::Int(i) => Value::Number(i.into()),
            Literal::UInt(u) => Value::Number(u.into()),
            Literal::Float(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
            Literal::Bool(b) => Value::Bool(b),
        }
    }
}

/// What the walker does with a field
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rule {
    /// The field must be present and non-zero
    Required,
    /// Zero-valued fields take the default, if one is declared
    Optional(Option<Literal>),
    /// Every element of the array is walked with the nested table
    List(&'static [FieldSpec]),
    /// No validation and no default
    Passthrough,
}

/// One row of a probe kind's field table
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub rule: Rule,
}

impl FieldSpec {
    pub const fn required(name: &'static str) -> Self {
        Self { name, rule: Rule::Required }
    }

    pub const fn optional(name: &'static str) -> Self {
        Self { name, rule: Rule::Optional(None) }
    }

    pub const fn defaulted(name: &'static str, default: Literal) -> Self {
        Self { name, rule: Rule::Optional(Some(default)) }
    }

    pub const fn list(name: &'static str, items: &'static [FieldSpec]) -> Self {
        Self { name, rule: Rule::List(items) }
    }

    pub const fn passthrough(name: &'static str) -> Self {
        Self { name, rule: Rule::Passthrough }
    }
}

/// The first required field that was missing from a check definition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("check (kind: `{kind}`, id: `{check_id}`) is missing value for required field `{field}`")]
pub struct ValidationError {
    pub check_id: String,
    pub kind: String,
    pub field: String,
}

/// Whether a decoded value is the zero value of its type
pub fn is_zero(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f == 0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

/// Apply `fields` to a decoded definition object.
///
/// Defaults are written in place. Validation stops at the first missing
/// required field.
pub fn apply(
    object: &mut Map<String, Value>,
    fields: &[FieldSpec],
    metadata: &CheckMetadata,
) -> Result<(), ValidationError> {
    for spec in fields {
        match spec.rule {
            Rule::Required => {
                if object.get(spec.name).is_none_or(is_zero) {
                    return Err(ValidationError {
                        check_id: metadata.id.clone(),
                        kind: metadata.kind.clone(),
                        field: spec.name.to_string(),
                    });
                }
            }
            Rule::Optional(Some(default)) => {
                if object.get(spec.name).is_none_or(is_zero) {
                    object.insert(spec.name.to_string(), default.to_value());
                }
            }
            Rule::List(items) => {
                if let Some(Value::Array(elements)) = object.get_mut(spec.name) {
                    for element in elements.iter_mut() {
                        if let Value::Object(nested) = element {
                            apply(nested, items, metadata)?;
                        }
                    }
                }
            }
            Rule::Optional(None) | Rule::Passthrough => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const REQUEST: &[FieldSpec] = &[
        FieldSpec::required("Host"),
        FieldSpec::defaulted("Port", Literal::UInt(80)),
        FieldSpec::defaulted("Method", Literal::Str("GET")),
    ];

    const DEFINITION: &[FieldSpec] = &[
        FieldSpec::optional("Verify"),
        FieldSpec::defaulted("Retries", Literal::Int(-1)),
        FieldSpec::defaulted("Ratio", Literal::Float(0.5)),
        FieldSpec::defaulted("Strict", Literal::Bool(true)),
        FieldSpec::list("Requests", REQUEST),
        FieldSpec::passthrough("Notes"),
    ];

    fn meta() -> CheckMetadata {
        CheckMetadata::new("web-team01", "team01", "http")
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn test_defaults_fill_only_zero_values() {
        let mut def = object(json!({
            "Retries": 3,
            "Ratio": 0,
            "Requests": [{"Host": "a", "Port": 8080}, {"Host": "b", "Method": ""}]
        }));

        apply(&mut def, DEFINITION, &meta()).unwrap();

        assert_eq!(def["Retries"], json!(3));
        assert_eq!(def["Ratio"], json!(0.5));
        assert_eq!(def["Strict"], json!(true));
        assert!(!def.contains_key("Verify"));
        assert_eq!(def["Requests"][0]["Port"], json!(8080));
        assert_eq!(def["Requests"][0]["Method"], json!("GET"));
        assert_eq!(def["Requests"][1]["Port"], json!(80));
        assert_eq!(def["Requests"][1]["Method"], json!("GET"));
    }

    #[test]
    fn test_explicit_false_is_replaced_by_true_default() {
        // An explicit `false` is indistinguishable from an absent bool.
        let mut def = object(json!({"Strict": false}));
        apply(&mut def, DEFINITION, &meta()).unwrap();
        assert_eq!(def["Strict"], json!(true));
    }

    #[test]
    fn test_missing_required_in_list_element() {
        let mut def = object(json!({"Requests": [{"Host": "a"}, {"Port": 22}]}));
        let err = apply(&mut def, DEFINITION, &meta()).unwrap_err();
        assert_eq!(
            err,
            ValidationError {
                check_id: "web-team01".to_string(),
                kind: "http".to_string(),
                field: "Host".to_string(),
            }
        );
    }

    #[test]
    fn test_reports_first_missing_field_only() {
        const TWO: &[FieldSpec] = &[FieldSpec::required("A"), FieldSpec::required("B")];
        let mut def = object(json!({"A": "", "B": null}));
        let err = apply(&mut def, TWO, &meta()).unwrap_err();
        assert_eq!(err.field, "A");
    }

    #[test]
    fn test_passthrough_and_unknown_fields_untouched() {
        let mut def = object(json!({"Notes": "", "Extra": {"x": 1}}));
        apply(&mut def, DEFINITION, &meta()).unwrap();
        assert_eq!(def["Notes"], json!(""));
        assert_eq!(def["Extra"], json!({"x": 1}));
    }

    #[test]
    fn test_zero_values() {
        assert!(is_zero(&json!(null)));
        assert!(is_zero(&json!(0)));
        assert!(is_zero(&json!(0.0)));
        assert!(is_zero(&json!("")));
        assert!(is_zero(&json!([])));
        assert!(is_zero(&json!({})));
        assert!(!is_zero(&json!(" ")));
        assert!(!is_zero(&json!(-1)));
        assert!(!is_zero(&json!(true)));
    }

    #[test]
    fn test_error_message_names_check_kind_and_field() {
        let err = ValidationError {
            check_id: "web-team01".to_string(),
            kind: "http".to_string(),
            field: "Host".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("web-team01"));
        assert!(msg.contains("http"));
        assert!(msg.contains("Host"));
    }
}
