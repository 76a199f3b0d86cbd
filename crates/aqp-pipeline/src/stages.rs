//! Stage identities, stage-level errors and schema validation of stage output

use aqp_ir::{Comparison, FilterExpr, Schema, SortSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

use crate::parse::ColumnSelection;
use crate::prompt::TemplateId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ColumnSelection,
    FilterGeneration,
    SortExtraction,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ColumnSelection => "column_selection",
            Stage::FilterGeneration => "filter_generation",
            Stage::SortExtraction => "sort_extraction",
        }
    }

    pub fn template(&self) -> TemplateId {
        match self {
            Stage::ColumnSelection => TemplateId::ColumnSelection,
            Stage::FilterGeneration => TemplateId::QueryGeneration,
            Stage::SortExtraction => TemplateId::SortExtraction,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The completion service call failed
    Transport,
    /// The completion could not be parsed
    Parse,
    /// Parsed, but nothing usable survived schema validation
    NoUsableOutput,
}

/// A stage that could not produce its output and was degraded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{stage} failed after {attempts} attempt(s): {cause}")]
pub struct TranslationStageError {
    pub stage: Stage,
    pub attempts: u32,
    pub kind: FailureKind,
    pub cause: String,
}

impl TranslationStageError {
    pub fn user_message(&self) -> &'static str {
        match self.stage {
            Stage::ColumnSelection => "No columns could be matched to the question; all columns were searched instead.",
            Stage::FilterGeneration => "The query could not be parsed; results are unfiltered.",
            Stage::SortExtraction => "The requested ordering could not be understood; results are unsorted.",
        }
    }
}

/// Keep only schema columns. Returns the kept set and the dropped names.
pub fn validate_columns(selection: &ColumnSelection, schema: &Schema) -> (BTreeSet<String>, Vec<String>) {
    let mut kept = BTreeSet::new();
    let mut dropped = Vec::new();
    for column in &selection.columns {
        if schema.contains(column) {
            kept.insert(column.clone());
        } else {
            dropped.push(column.clone());
        }
    }
    (kept, dropped)
}

/// Drop comparisons that do not type-check; coerce the rest
pub fn validate_filter(filter: FilterExpr, schema: &Schema) -> (FilterExpr, Vec<(Comparison, String)>) {
    let mut kept = FilterExpr::empty();
    let mut dropped = Vec::new();
    for comparison in filter.into_comparisons() {
        match schema.check_comparison(&comparison) {
            Ok(checked) => kept.push(checked),
            Err(err) => dropped.push((comparison, err.to_string())),
        }
    }
    (kept, dropped)
}

pub fn validate_sort(sort: Option<SortSpec>, schema: &Schema) -> Result<Option<SortSpec>, SortSpec> {
    match sort {
        Some(spec) if !schema.contains(&spec.column) => Err(spec),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aqp_ir::{ColumnDescriptor, ColumnType, CompareOp, SortDirection, Value};

    fn schema() -> Schema {
        Schema::new(vec![
            ColumnDescriptor::new("latency_ms", ColumnType::Numeric, ""),
            ColumnDescriptor::new("model_name", ColumnType::String, ""),
        ])
        .unwrap()
    }

    #[test]
    fn test_unknown_columns_dropped() {
        let selection = ColumnSelection {
            columns: vec!["latency_ms".into(), "f1".into()],
        };
        let (kept, dropped) = validate_columns(&selection, &schema());
        assert_eq!(kept.into_iter().collect::<Vec<_>>(), vec!["latency_ms"]);
        assert_eq!(dropped, vec!["f1"]);
    }

    #[test]
    fn test_incompatible_comparisons_dropped() {
        let filter = FilterExpr::new(vec![
            Comparison::new("latency_ms", CompareOp::Lt, Value::String("100".into())),
            Comparison::new("latency_ms", CompareOp::Contains, Value::String("1".into())),
            Comparison::new("model_name", CompareOp::Eq, Value::Int(4)),
            Comparison::new("f1", CompareOp::Gt, Value::Float(0.5)),
        ]);
        let (kept, dropped) = validate_filter(filter, &schema());
        assert_eq!(kept.to_string(), "latency_ms < 100");
        assert_eq!(dropped.len(), 3);
    }

    #[test]
    fn test_sort_on_unknown_column_rejected() {
        let bad = SortSpec::new("f1", SortDirection::Desc);
        assert_eq!(validate_sort(Some(bad.clone()), &schema()), Err(bad));
        assert_eq!(validate_sort(None, &schema()), Ok(None));
    }
}
