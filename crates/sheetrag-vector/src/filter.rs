//! Typed metadata filters.
//!
//! Filters are values, not predicate strings. A collection evaluates them
//! against each candidate's [`VectorMetadata`]; a vector without metadata
//! never matches a field condition.

use crate::types::{MetadataValue, VectorMetadata};
use serde::{Deserialize, Serialize};

/// A filter condition over vector metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    /// `field == value`.
    Eq {
        /// Metadata key.
        field: String,
        /// Required value.
        value: MetadataValue,
    },
    /// `field ∈ values`. An empty value set matches nothing.
    In {
        /// Metadata key.
        field: String,
        /// Accepted values.
        values: Vec<MetadataValue>,
    },
    /// All conditions must hold. An empty list matches everything.
    And(Vec<Filter>),
    /// At least one condition must hold. An empty list matches nothing.
    Or(Vec<Filter>),
}

impl Filter {
    /// Build an equality condition.
    pub fn eq(field: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        Filter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Build a set-membership condition.
    pub fn any_of<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<MetadataValue>,
    {
        Filter::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Evaluate the filter against optional metadata.
    pub fn matches(&self, metadata: Option<&VectorMetadata>) -> bool {
        match self {
            Filter::Eq { field, value } => {
                metadata.and_then(|m| m.get(field)) == Some(value)
            }
            Filter::In { field, values } => match metadata.and_then(|m| m.get(field)) {
                Some(v) => values.contains(v),
                None => false,
            },
            Filter::And(conditions) => conditions.iter().all(|c| c.matches(metadata)),
            Filter::Or(conditions) => conditions.iter().any(|c| c.matches(metadata)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(sheet: &str) -> VectorMetadata {
        VectorMetadata::from_pairs([("sheet_id", sheet)])
    }

    #[test]
    fn test_eq() {
        let f = Filter::eq("sheet_id", "Pricing");
        assert!(f.matches(Some(&meta("Pricing"))));
        assert!(!f.matches(Some(&meta("Inventory"))));
        assert!(!f.matches(None));
    }

    #[test]
    fn test_in() {
        let f = Filter::any_of("sheet_id", ["Pricing", "Inventory"]);
        assert!(f.matches(Some(&meta("Pricing"))));
        assert!(f.matches(Some(&meta("Inventory"))));
        assert!(!f.matches(Some(&meta("Products"))));
    }

    #[test]
    fn test_empty_in_matches_nothing() {
        let f = Filter::any_of("sheet_id", Vec::<String>::new());
        assert!(!f.matches(Some(&meta("Pricing"))));
    }

    #[test]
    fn test_and_or() {
        let mut m = meta("Pricing");
        m.insert("kind", "row");

        let both = Filter::And(vec![Filter::eq("sheet_id", "Pricing"), Filter::eq("kind", "row")]);
        assert!(both.matches(Some(&m)));

        let either = Filter::Or(vec![Filter::eq("sheet_id", "Other"), Filter::eq("kind", "row")]);
        assert!(either.matches(Some(&m)));

        assert!(Filter::And(vec![]).matches(Some(&m)));
        assert!(!Filter::Or(vec![]).matches(Some(&m)));
    }

    #[test]
    fn test_type_sensitive() {
        let m = VectorMetadata::from_pairs([("row", MetadataValue::Int(3))]);
        assert!(!Filter::eq("row", "3").matches(Some(&m)));
        assert!(Filter::eq("row", 3i64).matches(Some(&m)));
    }
}
