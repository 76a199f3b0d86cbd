//! Strict parsers for stage completions
//!
//! Each parser yields a typed result or a [`ParseFailure`]; raw completion text
//! never travels further down the pipeline.

use aqp_ir::{CompareOp, Comparison, FilterExpr, SortDirection, SortSpec, Value};
use serde_json::Value as Json;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseFailure {
    #[error("Completion is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Completion is missing the '{0}' field")]
    MissingField(&'static str),

    #[error("Field '{field}' should be {expected}")]
    WrongType { field: &'static str, expected: &'static str },

    #[error("Unknown comparison operator '{0}'")]
    UnknownOperator(String),

    #[error("Unknown sort direction '{0}'")]
    UnknownDirection(String),

    #[error("Filter could not be parsed: {0}")]
    Filter(String),
}

/// Stage 1 output before schema validation
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSelection {
    pub columns: Vec<String>,
}

/// Remove a surrounding markdown code fence, if any
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // drop the info string (```json)
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

fn parse_object(text: &str) -> Result<serde_json::Map<String, Json>, ParseFailure> {
    let doc: Json =
        serde_json::from_str(strip_code_fences(text)).map_err(|e| ParseFailure::InvalidJson(e.to_string()))?;
    match doc {
        Json::Object(map) => Ok(map),
        _ => Err(ParseFailure::InvalidJson("expected a JSON object".to_string())),
    }
}

/// `{"columns": ["a", "b"]}`
pub fn parse_columns(text: &str) -> Result<ColumnSelection, ParseFailure> {
    let object = parse_object(text)?;
    let items = object
        .get("columns")
        .ok_or(ParseFailure::MissingField("columns"))?
        .as_array()
        .ok_or(ParseFailure::WrongType {
            field: "columns",
            expected: "an array of strings",
        })?;

    let columns = items
        .iter()
        .map(|item| {
            item.as_str().map(|s| s.trim().to_string()).ok_or(ParseFailure::WrongType {
                field: "columns",
                expected: "an array of strings",
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ColumnSelection { columns })
}

/// Accepts `{"filter": [{column, op, value}]}`, `{"filter": "a < 1 AND ..."}`
/// or an `$expr` document under `"query"`.
pub fn parse_filter(text: &str) -> Result<FilterExpr, ParseFailure> {
    let object = parse_object(text)?;

    if let Some(filter) = object.get("filter") {
        return match filter {
            Json::Null => Ok(FilterExpr::empty()),
            Json::Array(items) => items.iter().map(comparison).collect::<Result<Vec<_>, _>>().map(FilterExpr::new),
            Json::String(source) => aqp_ast::parse_filter(source).map_err(|e| ParseFailure::Filter(e.to_string())),
            Json::Object(_) => FilterExpr::from_expr_document(filter).map_err(|e| ParseFailure::Filter(e.to_string())),
            _ => Err(ParseFailure::WrongType {
                field: "filter",
                expected: "a list of comparisons or a filter expression",
            }),
        };
    }

    if let Some(query) = object.get("query") {
        return FilterExpr::from_expr_document(query).map_err(|e| ParseFailure::Filter(e.to_string()));
    }

    Err(ParseFailure::MissingField("filter"))
}

fn comparison(item: &Json) -> Result<Comparison, ParseFailure> {
    let not_a_comparison = ParseFailure::WrongType {
        field: "filter",
        expected: "a list of {column, op, value} objects",
    };
    let object = item.as_object().ok_or_else(|| not_a_comparison.clone())?;

    let column = object
        .get("column")
        .and_then(Json::as_str)
        .ok_or_else(|| not_a_comparison.clone())?;
    let op_text = object.get("op").and_then(Json::as_str).ok_or_else(|| not_a_comparison.clone())?;
    let op = CompareOp::parse(op_text).ok_or_else(|| ParseFailure::UnknownOperator(op_text.to_string()))?;
    let value = scalar(object.get("value").unwrap_or(&Json::Null)).ok_or(not_a_comparison)?;

    Ok(Comparison::new(column.trim(), op, value))
}

fn scalar(json: &Json) -> Option<Value> {
    match json {
        Json::Null => Some(Value::Null),
        Json::Bool(b) => Some(Value::Bool(*b)),
        Json::Number(n) => n.as_i64().map(Value::Int).or_else(|| n.as_f64().map(Value::Float)),
        Json::String(s) => Some(Value::String(s.clone())),
        Json::Array(_) | Json::Object(_) => None,
    }
}

/// `{"sort_by": [{"field", "direction"}]}` or a single object; an empty list
/// or `null` means no ordering.
pub fn parse_sort(text: &str) -> Result<Option<SortSpec>, ParseFailure> {
    let object = parse_object(text)?;
    let sort_by = object.get("sort_by").ok_or(ParseFailure::MissingField("sort_by"))?;

    let entry = match sort_by {
        Json::Null => return Ok(None),
        Json::Array(items) => match items.first() {
            Some(first) => first,
            None => return Ok(None),
        },
        Json::Object(_) => sort_by,
        _ => {
            return Err(ParseFailure::WrongType {
                field: "sort_by",
                expected: "a list of {field, direction} objects",
            })
        }
    };

    let field = entry
        .get("field")
        .and_then(Json::as_str)
        .ok_or(ParseFailure::MissingField("field"))?;
    let direction = match entry.get("direction").and_then(Json::as_str) {
        Some(text) => SortDirection::parse(text).ok_or_else(|| ParseFailure::UnknownDirection(text.to_string()))?,
        None => SortDirection::Asc,
    };

    Ok(Some(SortSpec::new(field.trim(), direction)))
}
