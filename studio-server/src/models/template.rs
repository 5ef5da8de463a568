//! Contract templates and their variable schema
//!
//! A template's body holds `{{placeholder}}` tokens and conditional blocks.
//! The variable schema is a closed, typed description of what the body may
//! reference: ordered sections of field descriptors, validated at contract
//! creation rather than render time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Variable field type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Number,
    Date,
    Currency,
    Select,
    Multiselect,
    Textarea,
    Email,
}

/// One variable the template body may reference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    /// Default value substituted when the caller supplies none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Choices for select/multiselect fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

/// Ordered group of fields presented together
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSection {
    pub title: String,
    pub fields: Vec<FieldDescriptor>,
}

/// A named contract template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractTemplate {
    pub id: Uuid,

    /// Unique among active templates
    pub name: String,

    pub description: Option<String>,

    /// Event-type tag, e.g. "wedding", "portrait"
    pub event_type: Option<String>,

    /// HTML body with `{{name}}` tokens and `{{#if}}`/`{{#unless}}` blocks
    pub body_html: String,

    pub variables_schema: Vec<TemplateSection>,

    pub is_active: bool,
    pub is_published: bool,

    /// Bumped on publish-affecting edits
    pub version: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContractTemplate {
    /// Iterate every field descriptor across all sections
    pub fn fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.variables_schema.iter().flat_map(|s| s.fields.iter())
    }

    /// Names of required fields missing (or empty) in the supplied bindings.
    ///
    /// Advisory check performed at contract creation; fields with a schema
    /// default are never reported missing.
    pub fn missing_required_fields(
        &self,
        variables: &serde_json::Map<String, serde_json::Value>,
    ) -> Vec<String> {
        self.fields()
            .filter(|f| f.required && f.default.is_none())
            .filter(|f| match variables.get(&f.name) {
                None | Some(serde_json::Value::Null) => true,
                Some(serde_json::Value::String(s)) => s.trim().is_empty(),
                Some(_) => false,
            })
            .map(|f| f.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template_with(fields: Vec<FieldDescriptor>) -> ContractTemplate {
        ContractTemplate {
            id: Uuid::new_v4(),
            name: "Wedding".into(),
            description: None,
            event_type: Some("wedding".into()),
            body_html: "<p>{{client_name}}</p>".into(),
            variables_schema: vec![TemplateSection {
                title: "Details".into(),
                fields,
            }],
            is_active: true,
            is_published: true,
            version: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn field(name: &str, required: bool) -> FieldDescriptor {
        FieldDescriptor {
            name: name.into(),
            field_type: FieldType::Text,
            required,
            default: None,
            min: None,
            max: None,
            options: None,
        }
    }

    #[test]
    fn missing_required_reported() {
        let template = template_with(vec![field("event_date", true), field("notes", false)]);
        let vars = serde_json::Map::new();
        assert_eq!(template.missing_required_fields(&vars), vec!["event_date"]);
    }

    #[test]
    fn blank_string_counts_as_missing() {
        let template = template_with(vec![field("event_date", true)]);
        let mut vars = serde_json::Map::new();
        vars.insert("event_date".into(), serde_json::Value::String("  ".into()));
        assert_eq!(template.missing_required_fields(&vars), vec!["event_date"]);
    }

    #[test]
    fn defaulted_field_never_missing() {
        let mut f = field("studio_name", true);
        f.default = Some(serde_json::Value::String("StudioDesk".into()));
        let template = template_with(vec![f]);
        assert!(template
            .missing_required_fields(&serde_json::Map::new())
            .is_empty());
    }

    #[test]
    fn schema_json_shape() {
        let descriptor: FieldDescriptor = serde_json::from_value(serde_json::json!({
            "name": "total_amount",
            "type": "currency",
            "required": true,
            "min": 0.0
        }))
        .unwrap();
        assert_eq!(descriptor.field_type, FieldType::Currency);
        assert!(descriptor.required);
        assert_eq!(descriptor.min, Some(0.0));
    }
}
