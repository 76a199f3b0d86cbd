//! In-memory tabular datasets

use aqp_ir::Value;
use serde_json::{Map, Value as Json};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Failed to read dataset {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Dataset is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Dataset must be a JSON array of records")]
    NotAnArray,

    #[error("Record {0} is not a JSON object")]
    NotAnObject(usize),

    #[error("Row {row} has {found} cells, expected {expected}")]
    RowWidth { row: usize, expected: usize, found: usize },

    #[error("Duplicate dataset column: {0}")]
    DuplicateColumn(String),
}

/// Read-only rectangular data with named columns
pub trait Dataset: Send + Sync {
    /// Column names in declaration order
    fn columns(&self) -> &[String];

    fn column_index(&self, name: &str) -> Option<usize>;

    fn rows(&self) -> Box<dyn Iterator<Item = &[Value]> + '_>;

    fn row_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct TableDataset {
    columns: Vec<String>,
    index: HashMap<String, usize>,
    rows: Vec<Vec<Value>>,
}

impl TableDataset {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self, DatasetError> {
        let mut index = HashMap::with_capacity(columns.len());
        for (pos, name) in columns.iter().enumerate() {
            if index.insert(name.clone(), pos).is_some() {
                return Err(DatasetError::DuplicateColumn(name.clone()));
            }
        }
        for (row, cells) in rows.iter().enumerate() {
            if cells.len() != columns.len() {
                return Err(DatasetError::RowWidth {
                    row,
                    expected: columns.len(),
                    found: cells.len(),
                });
            }
        }
        Ok(Self { columns, index, rows })
    }

    /// Load an array of JSON records from a file
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let dataset = Self::from_json_records(&contents)?;
        tracing::info!(
            path = %path.display(),
            rows = dataset.row_count(),
            columns = dataset.columns.len(),
            "Loaded dataset"
        );
        Ok(dataset)
    }

    /// Build a dataset from an array of JSON objects.
    ///
    /// Nested objects are flattened into dotted column names
    /// (`{"output": {"latency": 3}}` becomes `output.latency`). Columns appear
    /// in order of first appearance; records missing a column get `null`.
    pub fn from_json_records(contents: &str) -> Result<Self, DatasetError> {
        let doc: Json = serde_json::from_str(contents)?;
        let records = doc.as_array().ok_or(DatasetError::NotAnArray)?;

        let mut columns: Vec<String> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut flat_records = Vec::with_capacity(records.len());

        for (pos, record) in records.iter().enumerate() {
            let object = record.as_object().ok_or(DatasetError::NotAnObject(pos))?;
            let mut flat = Vec::new();
            flatten("", object, &mut flat);
            for (name, _) in &flat {
                if !index.contains_key(name) {
                    index.insert(name.clone(), columns.len());
                    columns.push(name.clone());
                }
            }
            flat_records.push(flat);
        }

        let rows = flat_records
            .into_iter()
            .map(|flat| {
                let mut row = vec![Value::Null; columns.len()];
                for (name, value) in flat {
                    if let Some(&pos) = index.get(&name) {
                        row[pos] = value;
                    }
                }
                row
            })
            .collect();

        Self::new(columns, rows)
    }
}

fn flatten(prefix: &str, object: &Map<String, Json>, out: &mut Vec<(String, Value)>) {
    for (key, value) in object {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            Json::Object(inner) => flatten(&name, inner, out),
            other => out.push((name, json_to_value(other))),
        }
    }
}

fn json_to_value(json: &Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => n
            .as_i64()
            .map(Value::Int)
            .or_else(|| n.as_f64().map(Value::Float))
            .unwrap_or(Value::Null),
        Json::String(s) => Value::String(s.clone()),
        // Arrays have no scalar form; keep their JSON text so they remain visible
        Json::Array(_) | Json::Object(_) => Value::String(json.to_string()),
    }
}

impl Dataset for TableDataset {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    fn rows(&self) -> Box<dyn Iterator<Item = &[Value]> + '_> {
        Box::new(self.rows.iter().map(|row| row.as_slice()))
    }

    fn row_count(&self) -> usize {
        self.rows.len()
    }
}
