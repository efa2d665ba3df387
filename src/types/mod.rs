use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============= Tabular Types =============

/// Schema-level record: one per (sheet, column set).
///
/// Wide sheets produce several descriptors sharing a `sheet_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetDescriptor {
    pub descriptor_id: String,
    pub sheet_id: String,
    pub column_names: Vec<String>,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// Content-level record: one per row, or per batch of consecutive rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowRecord {
    pub row_id: String,
    pub sheet_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

// ============= Query Types =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HitSource {
    Structure,
    Content,
}

impl fmt::Display for HitSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HitSource::Structure => write!(f, "structure"),
            HitSource::Content => write!(f, "content"),
        }
    }
}

/// A single retrieval hit.
///
/// `raw_score` is the normalized similarity from the index; `score` is the
/// score after entity boosting (equal to `raw_score` when no boost applied).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryHit {
    pub source: HitSource,
    pub matched_id: String,
    pub sheet_id: String,
    pub score: f32,
    pub raw_score: f32,
    pub entity_match: bool,
    pub text: String,
}

impl QueryHit {
    pub fn new(
        source: HitSource,
        matched_id: impl Into<String>,
        sheet_id: impl Into<String>,
        score: f32,
        text: impl Into<String>,
    ) -> Self {
        Self {
            source,
            matched_id: matched_id.into(),
            sheet_id: sheet_id.into(),
            score,
            raw_score: score,
            entity_match: false,
            text: text.into(),
        }
    }
}

// ============= Error Types =============

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Index build failed: {0}")]
    IndexBuild(String),

    #[error("Both indexes are empty; run a build first")]
    EmptyIndex,

    #[error("Provider timed out: {0}")]
    ProviderTimeout(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("LLM error: {0}")]
    LLM(String),

    #[error("Source error: {0}")]
    Source(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sheetrag_vector::Error> for AppError {
    fn from(err: sheetrag_vector::Error) -> Self {
        match err {
            sheetrag_vector::Error::CollectionNotFound(name) => {
                AppError::NotFound(format!("collection '{}'", name))
            }
            other => AppError::VectorStore(other.to_string()),
        }
    }
}

impl From<csv::Error> for AppError {
    fn from(err: csv::Error) -> Self {
        AppError::Source(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_defaults() {
        let hit = QueryHit::new(HitSource::Content, "Pricing:1", "Pricing", 0.8, "row");
        assert_eq!(hit.raw_score, hit.score);
        assert!(!hit.entity_match);
    }

    #[test]
    fn test_vector_error_mapping() {
        let err: AppError = sheetrag_vector::Error::CollectionNotFound("rows".into()).into();
        assert!(matches!(err, AppError::NotFound(_)));

        let err: AppError = sheetrag_vector::Error::DimensionMismatch {
            expected: 3,
            actual: 2,
        }
        .into();
        assert!(matches!(err, AppError::VectorStore(_)));
    }

    #[test]
    fn test_hit_source_serde() {
        let json = serde_json::to_string(&HitSource::Structure).unwrap();
        assert_eq!(json, "\"structure\"");
    }
}
