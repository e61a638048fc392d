//! Filter predicates over document attributes.
//!
//! A filter bag recognizes a closed set of fields; anything else is rejected
//! at parse time rather than silently dropped. The canonical fingerprint —
//! stable JSON with sorted keys and sorted set members — keys the query
//! cache, so two semantically identical bags always hit the same entry.

use crate::document::{AttributeBag, AttributeValue};
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;

/// Inclusive ISO-8601 date range, compared against a document's `updated_at`
/// attribute. Dates in `YYYY-MM-DD` form compare correctly as strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DateRange {
    pub start: String,
    pub end: String,
}

/// Recognized filter fields. All provided fields must match (AND semantics).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterBag {
    /// Minimum `experience_years` (inclusive).
    pub min_experience: Option<i64>,
    /// Acceptable `seniority_level` values.
    pub seniority_levels: Option<BTreeSet<String>>,
    /// Skills that must all be present in the document's `skills` list.
    /// Case-insensitive.
    pub required_skills: Option<BTreeSet<String>>,
    /// Inclusive bounds on the `updated_at` attribute.
    pub date_range: Option<DateRange>,
}

impl FilterBag {
    /// Parse from JSON, rejecting unknown fields as a Validation error.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| EngineError::Validation(format!("invalid filter: {e}")))
    }

    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        self.min_experience.is_none()
            && self.seniority_levels.is_none()
            && self.required_skills.is_none()
            && self.date_range.is_none()
    }

    /// Canonical cache-key fragment: JSON with sorted keys, only the provided
    /// fields, set members sorted (BTreeSet iteration order).
    pub fn fingerprint(&self) -> String {
        let mut map = serde_json::Map::new();
        if let Some(range) = &self.date_range {
            map.insert(
                "date_range".into(),
                json!({ "end": range.end, "start": range.start }),
            );
        }
        if let Some(min) = self.min_experience {
            map.insert("min_experience".into(), json!(min));
        }
        if let Some(skills) = &self.required_skills {
            let lowered: Vec<String> = skills.iter().map(|s| s.to_lowercase()).collect();
            map.insert("required_skills".into(), json!(lowered));
        }
        if let Some(levels) = &self.seniority_levels {
            map.insert("seniority_levels".into(), json!(levels));
        }
        serde_json::Value::Object(map).to_string()
    }

    /// Evaluate against a document's attribute bag. Documents missing a
    /// filtered attribute do not match.
    pub fn matches(&self, attrs: &AttributeBag) -> bool {
        if let Some(min) = self.min_experience {
            let years = match attrs.get("experience_years") {
                Some(AttributeValue::Integer(i)) => *i,
                Some(AttributeValue::Float(f)) => *f as i64,
                _ => return false,
            };
            if years < min {
                return false;
            }
        }

        if let Some(levels) = &self.seniority_levels {
            match attrs.get("seniority_level").and_then(AttributeValue::as_str) {
                Some(level) if levels.contains(level) => {}
                _ => return false,
            }
        }

        if let Some(required) = &self.required_skills {
            let Some(skills) = attrs.get("skills").and_then(AttributeValue::as_string_list)
            else {
                return false;
            };
            let have: BTreeSet<String> = skills.iter().map(|s| s.to_lowercase()).collect();
            if !required.iter().all(|s| have.contains(&s.to_lowercase())) {
                return false;
            }
        }

        if let Some(range) = &self.date_range {
            match attrs.get("updated_at").and_then(AttributeValue::as_str) {
                Some(date) if range.start.as_str() <= date && date <= range.end.as_str() => {}
                _ => return false,
            }
        }

        true
    }
}
