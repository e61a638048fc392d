//! Core document types: [`Document`] and the typed [`AttributeValue`] bag.
//!
//! A document is identified by a stable string id chosen by the caller.
//! Attributes serve two purposes: the recognized typed columns drive filter
//! evaluation (see [`crate::filters`]), and the full bag hydrates results.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A typed attribute value attached to a document.
///
/// Filters only ever inspect the typed columns they recognize; any other
/// entries ride along for result hydration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    /// 64-bit signed integer (e.g. `experience_years`).
    Integer(i64),
    /// 64-bit floating-point number.
    Float(f64),
    /// UTF-8 string (e.g. `seniority_level`, `updated_at`).
    String(String),
    /// List of strings (e.g. `skills`, `technologies`).
    StringList(Vec<String>),
}

impl AttributeValue {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            AttributeValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_string_list(&self) -> Option<&[String]> {
        match self {
            AttributeValue::StringList(v) => Some(v),
            _ => None,
        }
    }
}

/// Attribute bag: attribute name → typed value.
pub type AttributeBag = HashMap<String, AttributeValue>;

/// A document submitted for indexing.
///
/// The canonical search text and token set are derived deterministically from
/// `text` and the salient list attributes (see [`crate::text`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Stable caller-chosen identifier.
    pub id: String,
    /// Content payload the canonical search text is derived from.
    pub text: String,
    /// Filterable and hydratable attributes.
    #[serde(default)]
    pub attributes: AttributeBag,
}

impl Document {
    /// Create a document with no attributes.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            attributes: AttributeBag::new(),
        }
    }

    /// Builder-style attribute attachment.
    pub fn with_attribute(mut self, key: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}
