//! Evaluation cases

use aqp_ir::FilterExpr;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalCase {
    pub id: String,
    pub utterance: String,
    /// Canonical text form of the expected filter
    pub ground_truth_filter: String,
}

impl EvalCase {
    pub fn new(id: impl Into<String>, utterance: impl Into<String>, ground_truth_filter: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            utterance: utterance.into(),
            ground_truth_filter: ground_truth_filter.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CaseLoadError {
    #[error("Failed to read evaluation cases from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Evaluation cases are not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Evaluation cases must be a JSON array of objects")]
    UnexpectedShape,

    #[error("Case {index} is missing '{field}'")]
    MissingField { index: usize, field: &'static str },

    #[error("Case '{id}' has an unusable ground truth filter: {reason}")]
    InvalidGroundTruth { id: String, reason: String },
}

pub fn load_cases<P: AsRef<Path>>(path: P) -> Result<Vec<EvalCase>, CaseLoadError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| CaseLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let cases = cases_from_json(&contents)?;
    tracing::info!(path = %path.display(), cases = cases.len(), "Loaded evaluation cases");
    Ok(cases)
}

/// Parse an array of cases.
///
/// Each entry needs an utterance (`utterance` or `user_query`) and a ground
/// truth (`ground_truth_filter` or `gt_filters`), which is either filter text
/// or an `$expr` document. A missing `id` defaults to the entry's index.
pub fn cases_from_json(contents: &str) -> Result<Vec<EvalCase>, CaseLoadError> {
    let doc: Json = serde_json::from_str(contents)?;
    let entries = doc.as_array().ok_or(CaseLoadError::UnexpectedShape)?;

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let object = entry.as_object().ok_or(CaseLoadError::UnexpectedShape)?;

            let id = match object.get("id") {
                Some(Json::String(id)) => id.clone(),
                Some(Json::Number(n)) => n.to_string(),
                _ => index.to_string(),
            };
            let utterance = object
                .get("utterance")
                .or_else(|| object.get("user_query"))
                .and_then(Json::as_str)
                .ok_or(CaseLoadError::MissingField {
                    index,
                    field: "utterance",
                })?
                .to_string();
            let truth = object
                .get("ground_truth_filter")
                .or_else(|| object.get("gt_filters"))
                .ok_or(CaseLoadError::MissingField {
                    index,
                    field: "ground_truth_filter",
                })?;

            let ground_truth_filter = match truth {
                Json::String(text) => text.clone(),
                Json::Object(_) => FilterExpr::from_expr_document(truth)
                    .map_err(|e| CaseLoadError::InvalidGroundTruth {
                        id: id.clone(),
                        reason: e.to_string(),
                    })?
                    .to_string(),
                _ => {
                    return Err(CaseLoadError::InvalidGroundTruth {
                        id,
                        reason: "expected filter text or an $expr document".to_string(),
                    })
                }
            };

            Ok(EvalCase {
                id,
                utterance,
                ground_truth_filter,
            })
        })
        .collect()
}
