//! Feedback form definitions and answer validation.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{FormId, UserId};
use crate::domain::user::is_plausible_email;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormKind {
    Review,
    Complaint,
}

/// Whether the owner's plan currently covers the form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormStatus {
    Active,
    /// Disabled from editing and sharing after a downgrade.
    Locked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldType {
    Text,
    LongText,
    Email,
    Rating { max: u8 },
    Choice { options: Vec<String> },
    Checkbox,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormField {
    pub key: String,
    pub label: String,
    pub field: FieldType,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Form {
    pub id: FormId,
    pub owner_id: UserId,
    pub title: String,
    pub description: String,
    pub kind: FormKind,
    pub fields: Vec<FormField>,
    pub status: FormStatus,
    pub published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
}

impl Form {
    pub fn is_active(&self) -> bool {
        self.status == FormStatus::Active
    }

    pub fn is_locked(&self) -> bool {
        self.status == FormStatus::Locked
    }

    pub fn lock(&mut self, at: DateTime<Utc>) {
        self.status = FormStatus::Locked;
        self.locked_at = Some(at);
        self.updated_at = at;
    }

    pub fn unlock(&mut self, at: DateTime<Utc>) {
        self.status = FormStatus::Active;
        self.locked_at = None;
        self.updated_at = at;
    }
}

/// Check a form definition. Returns a human-readable reason on failure.
pub fn validate_definition(title: &str, fields: &[FormField]) -> Result<(), String> {
    if title.trim().is_empty() {
        return Err("form title must not be empty".to_string());
    }

    let mut keys = HashSet::new();
    for field in fields {
        if field.key.trim().is_empty() {
            return Err("field key must not be empty".to_string());
        }
        if !keys.insert(field.key.as_str()) {
            return Err(format!("duplicate field key '{}'", field.key));
        }
        match &field.field {
            FieldType::Rating { max } if !(1..=10).contains(max) => {
                return Err(format!("rating field '{}' must have max between 1 and 10", field.key));
            }
            FieldType::Choice { options } if options.is_empty() => {
                return Err(format!("choice field '{}' needs at least one option", field.key));
            }
            _ => {}
        }
    }

    Ok(())
}

/// Check submitted answers against a form's fields.
pub fn validate_answers(fields: &[FormField], answers: &BTreeMap<String, Value>) -> Result<(), String> {
    for key in answers.keys() {
        if !fields.iter().any(|f| &f.key == key) {
            return Err(format!("unknown field '{}'", key));
        }
    }

    for field in fields {
        let value = match answers.get(&field.key) {
            None | Some(Value::Null) => {
                if field.required {
                    return Err(format!("field '{}' is required", field.key));
                }
                continue;
            }
            Some(v) => v,
        };

        let ok = match &field.field {
            FieldType::Text | FieldType::LongText => value
                .as_str()
                .map(|s| !field.required || !s.trim().is_empty())
                .unwrap_or(false),
            FieldType::Email => value.as_str().map(is_plausible_email).unwrap_or(false),
            FieldType::Rating { max } => value
                .as_u64()
                .map(|r| r >= 1 && r <= u64::from(*max))
                .unwrap_or(false),
            FieldType::Choice { options } => value
                .as_str()
                .map(|s| options.iter().any(|o| o == s))
                .unwrap_or(false),
            FieldType::Checkbox => value.is_boolean(),
        };

        if !ok {
            return Err(format!("invalid value for field '{}'", field.key));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields() -> Vec<FormField> {
        vec![
            FormField {
                key: "rating".into(),
                label: "How was it?".into(),
                field: FieldType::Rating { max: 5 },
                required: true,
            },
            FormField {
                key: "topic".into(),
                label: "Topic".into(),
                field: FieldType::Choice {
                    options: vec!["delivery".into(), "quality".into()],
                },
                required: false,
            },
            FormField {
                key: "email".into(),
                label: "Email".into(),
                field: FieldType::Email,
                required: false,
            },
            FormField {
                key: "comment".into(),
                label: "Comment".into(),
                field: FieldType::LongText,
                required: true,
            },
        ]
    }

    fn answers(value: Value) -> BTreeMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_definition_rules() {
        assert!(validate_definition("Feedback", &fields()).is_ok());
        assert!(validate_definition("  ", &fields()).is_err());

        let mut dup = fields();
        dup.push(dup[0].clone());
        assert!(validate_definition("x", &dup).unwrap_err().contains("duplicate"));

        let bad_rating = vec![FormField {
            key: "r".into(),
            label: "r".into(),
            field: FieldType::Rating { max: 0 },
            required: false,
        }];
        assert!(validate_definition("x", &bad_rating).is_err());

        let empty_choice = vec![FormField {
            key: "c".into(),
            label: "c".into(),
            field: FieldType::Choice { options: vec![] },
            required: false,
        }];
        assert!(validate_definition("x", &empty_choice).is_err());
    }

    #[test]
    fn test_valid_answers() {
        let ok = answers(json!({ "rating": 4, "topic": "quality", "comment": "Great" }));
        assert!(validate_answers(&fields(), &ok).is_ok());
    }

    #[test]
    fn test_rejected_answers() {
        let missing = answers(json!({ "rating": 4 }));
        assert!(validate_answers(&fields(), &missing).unwrap_err().contains("required"));

        let blank = answers(json!({ "rating": 4, "comment": "   " }));
        assert!(validate_answers(&fields(), &blank).is_err());

        let out_of_range = answers(json!({ "rating": 6, "comment": "x" }));
        assert!(validate_answers(&fields(), &out_of_range).is_err());

        let bad_choice = answers(json!({ "rating": 3, "topic": "price", "comment": "x" }));
        assert!(validate_answers(&fields(), &bad_choice).is_err());

        let bad_email = answers(json!({ "rating": 3, "email": "nope", "comment": "x" }));
        assert!(validate_answers(&fields(), &bad_email).is_err());

        let unknown = answers(json!({ "rating": 3, "comment": "x", "extra": true }));
        assert!(validate_answers(&fields(), &unknown).unwrap_err().contains("unknown"));
    }
}
