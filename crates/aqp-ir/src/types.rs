//! Column type system and schema for AQP IR

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use crate::{CompareOp, Comparison, Value};

/// Scalar column types supported by the flat tabular schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Numeric,
    String,
    Boolean,
}

impl ColumnType {
    /// Parse a type name as written in column-description sources
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "numeric" | "number" | "float" | "double" | "int" | "integer" => Some(ColumnType::Numeric),
            "string" | "text" | "str" => Some(ColumnType::String),
            "boolean" | "bool" => Some(ColumnType::Boolean),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Numeric => "numeric",
            ColumnType::String => "string",
            ColumnType::Boolean => "boolean",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    pub description: String,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, column_type: ColumnType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type,
            description: description.into(),
        }
    }
}

/// Reasons a comparison does not fit the schema
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TypeCheckError {
    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Operator '{op}' is not valid for {column_type} column '{column}'")]
    OperatorNotAllowed {
        column: String,
        op: CompareOp,
        column_type: ColumnType,
    },

    #[error("Value {value} does not fit {column_type} column '{column}'")]
    ValueMismatch {
        column: String,
        value: Value,
        column_type: ColumnType,
    },
}

/// A schema was given the same column name twice
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Duplicate column name: {0}")]
pub struct DuplicateColumnError(pub String);

/// Ordered, name-unique collection of column descriptors
#[derive(Debug, Clone, Serialize)]
pub struct Schema {
    columns: Vec<ColumnDescriptor>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl Schema {
    /// Build a schema, failing with the first duplicated column name
    pub fn new(columns: Vec<ColumnDescriptor>) -> Result<Self, DuplicateColumnError> {
        let mut index = HashMap::with_capacity(columns.len());
        for (pos, column) in columns.iter().enumerate() {
            if index.insert(column.name.clone(), pos).is_some() {
                return Err(DuplicateColumnError(column.name.clone()));
            }
        }
        Ok(Self { columns, index })
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.index.get(name).map(|&pos| &self.columns[pos])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Position of a column in declaration order
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Check a comparison against the declared column type.
    ///
    /// Returns the comparison with its value coerced to the column type when the
    /// model produced a quoted number (`"100"`) or a quoted boolean (`"true"`).
    pub fn check_comparison(&self, comparison: &Comparison) -> Result<Comparison, TypeCheckError> {
        let column = self
            .column(&comparison.column)
            .ok_or_else(|| TypeCheckError::UnknownColumn(comparison.column.clone()))?;

        if !comparison.op.admits(column.column_type) {
            return Err(TypeCheckError::OperatorNotAllowed {
                column: column.name.clone(),
                op: comparison.op,
                column_type: column.column_type,
            });
        }

        let value = comparison
            .value
            .coerce_to(column.column_type)
            .ok_or_else(|| TypeCheckError::ValueMismatch {
                column: column.name.clone(),
                value: comparison.value.clone(),
                column_type: column.column_type,
            })?;

        Ok(Comparison {
            column: comparison.column.clone(),
            op: comparison.op,
            value,
        })
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.columns == other.columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::new(vec![
            ColumnDescriptor::new("latency_ms", ColumnType::Numeric, "Mean latency"),
            ColumnDescriptor::new("model_name", ColumnType::String, "Model identifier"),
            ColumnDescriptor::new("is_baseline", ColumnType::Boolean, "Baseline flag"),
        ])
        .unwrap()
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = Schema::new(vec![
            ColumnDescriptor::new("a", ColumnType::Numeric, ""),
            ColumnDescriptor::new("a", ColumnType::String, ""),
        ]);
        let err = result.unwrap_err();
        assert_eq!(err, DuplicateColumnError("a".to_string()));
        assert_eq!(err.to_string(), "Duplicate column name: a");
    }

    #[test]
    fn test_lookup_by_name() {
        let schema = schema();
        assert_eq!(schema.column("model_name").unwrap().column_type, ColumnType::String);
        assert_eq!(schema.position("is_baseline"), Some(2));
        assert!(!schema.contains("accuracy"));
    }

    #[test]
    fn test_contains_only_on_strings() {
        let schema = schema();
        let bad = Comparison::new("latency_ms", CompareOp::Contains, Value::Int(5));
        assert!(matches!(
            schema.check_comparison(&bad),
            Err(TypeCheckError::OperatorNotAllowed { .. })
        ));

        let good = Comparison::new("model_name", CompareOp::Contains, Value::String("gpt".into()));
        assert!(schema.check_comparison(&good).is_ok());
    }

    #[test]
    fn test_quoted_number_is_coerced() {
        let schema = schema();
        let cmp = Comparison::new("latency_ms", CompareOp::Lt, Value::String("100".into()));
        let checked = schema.check_comparison(&cmp).unwrap();
        assert_eq!(checked.value, Value::Int(100));
    }

    #[test]
    fn test_ordering_not_allowed_on_booleans() {
        let schema = schema();
        let cmp = Comparison::new("is_baseline", CompareOp::Gt, Value::Bool(true));
        assert!(schema.check_comparison(&cmp).is_err());
    }
}
