//! Schema registry
//!
//! Loads the column descriptors that ground every prompt stage and serves
//! them read-only for the lifetime of the process.

use aqp_ir::{ColumnDescriptor, ColumnType, Schema};
use serde_json::Value as Json;
use std::collections::BTreeSet;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaLoadError {
    #[error("Failed to read column descriptions from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Column descriptions are not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Column descriptions must be a JSON array or object")]
    UnexpectedShape,

    #[error("Column entry {index} is missing required field '{field}'")]
    MissingField { index: usize, field: &'static str },

    #[error("Column '{column}' has unknown type '{found}'")]
    InvalidType { column: String, found: String },

    #[error("Duplicate column name: {0}")]
    DuplicateColumn(String),

    #[error("Column descriptions contain no columns")]
    Empty,
}

#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    schema: Arc<Schema>,
    source: Option<PathBuf>,
}

impl SchemaRegistry {
    /// Load column descriptors from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SchemaLoadError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| SchemaLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut registry = Self::from_json_str(&contents)?;
        registry.source = Some(path.to_path_buf());

        tracing::info!(
            path = %path.display(),
            columns = registry.schema.len(),
            "Loaded column descriptions"
        );
        Ok(registry)
    }

    /// Parse column descriptors from JSON text.
    ///
    /// Accepts either an array of `{name, type, description}` objects or an
    /// object keyed by column name with `{type, description}` values.
    pub fn from_json_str(contents: &str) -> Result<Self, SchemaLoadError> {
        let doc: Json = serde_json::from_str(contents)?;
        let descriptors = match &doc {
            Json::Array(entries) => entries
                .iter()
                .enumerate()
                .map(|(index, entry)| {
                    let name = required_str(entry, index, "name")?;
                    descriptor(entry, index, name)
                })
                .collect::<Result<Vec<_>, _>>()?,
            Json::Object(entries) => entries
                .iter()
                .enumerate()
                .map(|(index, (name, entry))| descriptor(entry, index, name.clone()))
                .collect::<Result<Vec<_>, _>>()?,
            _ => return Err(SchemaLoadError::UnexpectedShape),
        };
        Self::from_descriptors(descriptors)
    }

    pub fn from_descriptors(descriptors: Vec<ColumnDescriptor>) -> Result<Self, SchemaLoadError> {
        if descriptors.is_empty() {
            return Err(SchemaLoadError::Empty);
        }
        let schema = Schema::new(descriptors).map_err(|err| SchemaLoadError::DuplicateColumn(err.0))?;
        Ok(Self {
            schema: Arc::new(schema),
            source: None,
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.schema.column(name)
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Describe the requested columns (all when `None`) for prompt injection
    pub fn describe(&self, columns: Option<&BTreeSet<String>>) -> String {
        describe(&self.schema, columns)
    }
}

/// Render column descriptions in schema order, skipping unknown names
pub fn describe(schema: &Schema, columns: Option<&BTreeSet<String>>) -> String {
    let mut out = String::new();
    for column in schema.columns() {
        if let Some(wanted) = columns {
            if !wanted.contains(&column.name) {
                continue;
            }
        }
        let _ = write!(
            out,
            "Column: {}\nType: {}\nDescription: {}\n\n",
            column.name, column.column_type, column.description
        );
    }
    out
}

fn required_str(entry: &Json, index: usize, field: &'static str) -> Result<String, SchemaLoadError> {
    entry
        .get(field)
        .and_then(Json::as_str)
        .map(str::to_string)
        .ok_or(SchemaLoadError::MissingField { index, field })
}

fn descriptor(entry: &Json, index: usize, name: String) -> Result<ColumnDescriptor, SchemaLoadError> {
    let type_name = required_str(entry, index, "type")?;
    let column_type = ColumnType::parse(&type_name).ok_or_else(|| SchemaLoadError::InvalidType {
        column: name.clone(),
        found: type_name.clone(),
    })?;
    let description = required_str(entry, index, "description")?;
    Ok(ColumnDescriptor::new(name, column_type, description))
}
