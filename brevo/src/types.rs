use serde::{Deserialize, Serialize};

/// Attribute kind as declared in the Brevo account. Unknown kinds decode
/// as `Text` since the dropdown rendering treats them identically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttributeKind {
    #[default]
    Text,
    Date,
    Float,
    Boolean,
    Id,
    Category,
    MultipleChoice,
    User,
}

impl AttributeKind {
    pub fn from_api(raw: Option<&str>) -> Self {
        match raw {
            Some("date") => AttributeKind::Date,
            Some("float") => AttributeKind::Float,
            Some("boolean") => AttributeKind::Boolean,
            Some("id") => AttributeKind::Id,
            Some("category") => AttributeKind::Category,
            Some("multiple-choice") => AttributeKind::MultipleChoice,
            Some("user") => AttributeKind::User,
            _ => AttributeKind::Text,
        }
    }
}

/// One option of a category attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumerationOption {
    pub value: i64,
    pub label: String,
}

/// A single record of the `GET /v3/contacts/attributes` response, as the
/// API sends it. `type` and `category` may be absent.
#[derive(Debug, Clone, Deserialize)]
pub struct RawAttribute {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub enumeration: Vec<EnumerationOption>,
}

/// Normalized attribute definition. Produced only from a [`RawAttribute`]
/// and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeDefinition {
    pub name: String,
    pub kind: AttributeKind,
    pub category: String,
    pub enumeration: Vec<EnumerationOption>,
}

impl AttributeDefinition {
    pub fn from_raw(raw: RawAttribute) -> Self {
        AttributeDefinition {
            kind: AttributeKind::from_api(raw.kind.as_deref()),
            name: raw.name,
            category: raw.category.unwrap_or_default(),
            enumeration: raw.enumeration,
        }
    }
}

/// Canonical spelling of an attribute name. Every cache and lookup key
/// goes through this, so two raw spellings of the same name collapse to
/// one entry.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_uppercase()
}
