//! Prompt templates for the three translation stages
//!
//! Templates are static skeletons with `{{name}}` placeholders. Rendering is a
//! single left-to-right pass: substituted text is never scanned again, so an
//! utterance containing `{{query}}` reaches the model verbatim.

use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

const VERSION: &str = "aqp-prompts/1";

const COLUMN_SELECTION: &str = r#"You are a data analysis assistant. Your job is to pick the columns of a table that are needed to answer a question about it.

The table has these columns:

{{columns_with_description}}
Instructions:
1. Work out which values the question filters on, compares or orders by.
2. Select ONLY the columns needed for that. Do not include unrelated columns.
3. Include an identifier column (such as a model name) when the question asks which rows or models match.
4. Use column names exactly as listed above.
5. Respond with JSON only, in this format:
{"columns": ["column1", "column2"]}

Examples:

Question: Which model had the highest accuracy?
{"columns": ["attributes.model_name", "output.scorer.accuracy"]}

Question: Find all the models that had a precision score greater than 0.8
{"columns": ["attributes.model_name", "output.scorer.precision"]}

Question: Give me the list of all models that were trained for more than 10 epochs
{"columns": ["attributes.model_name", "attributes.num_train_epochs"]}

Question: Return all the rows where the latency was greater than 100ms
{"columns": ["output.model_latency.mean"]}

Question: {{query}}
"#;

const QUERY_GENERATION: &str = r#"You are a data analysis assistant that writes filters over a table.

The relevant columns are:

{{columns_with_description}}
Instructions:
1. Turn the conditions in the question into a list of comparisons. All comparisons are combined with AND.
2. Each comparison is an object with "column", "op" and "value".
3. Allowed operators: "=", "!=", "<", "<=", ">", ">=", "contains".
4. Numeric columns take numeric values and any operator except "contains".
5. String columns take string values with "=", "!=" or "contains".
6. Boolean columns take true or false with "=" or "!=".
7. Percentages are written as fractions (90% is 0.9). Durations keep the unit of the column.
8. Use only the columns listed above. If the question has no conditions, return an empty list.
9. Respond with JSON only, in this format:
{"filter": [{"column": "column_name", "op": ">", "value": 1}]}

Examples:

Question: Find all the rows where the latency was greater than 100ms
Columns: ["output.model_latency.mean"]
{"filter": [{"column": "output.model_latency.mean", "op": ">", "value": 100}]}

Question: Find models with accuracy above 90%
Columns: ["attributes.model_name", "output.scorer.accuracy"]
{"filter": [{"column": "output.scorer.accuracy", "op": ">", "value": 0.9}]}

Question: Find models trained for more than 5 epochs with learning rate no higher than 0.001
Columns: ["attributes.model_name", "attributes.num_train_epochs", "attributes.learning_rate"]
{"filter": [{"column": "attributes.num_train_epochs", "op": ">", "value": 5}, {"column": "attributes.learning_rate", "op": "<=", "value": 0.001}]}

Question: Find all the rows where the model name contains 'gpt'
Columns: ["attributes.model_name"]
{"filter": [{"column": "attributes.model_name", "op": "contains", "value": "gpt"}]}

Question: Show me every model
Columns: ["attributes.model_name"]
{"filter": []}

Question: {{query}}
Columns: {{columns}}
"#;

const SORT_EXTRACTION: &str = r#"You are a data analysis assistant that decides how query results should be ordered.

The relevant columns are:

{{columns_with_description}}
Instructions:
1. Decide whether the question asks for an ordering (highest, lowest, top, ascending, descending, best, worst).
2. If it does, pick the single column to sort by and the direction, "asc" or "desc".
3. If the question implies no ordering, return an empty list.
4. Use only the columns listed above.
5. Respond with JSON only, in this format:
{"sort_by": [{"field": "column_name", "direction": "asc"}]}

Examples:

Question: Find models with the highest accuracy
Columns: ["output.scorer.accuracy"]
Filter: (none)
{"sort_by": [{"field": "output.scorer.accuracy", "direction": "desc"}]}

Question: Find models with the lowest latency
Columns: ["output.model_latency.mean"]
Filter: (none)
{"sort_by": [{"field": "output.model_latency.mean", "direction": "asc"}]}

Question: Find all the rows where the latency was greater than 100ms
Columns: ["output.model_latency.mean"]
Filter: output.model_latency.mean > 100
{"sort_by": []}

Question: {{query}}
Columns: {{columns}}
Filter: {{filter}}
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateId {
    ColumnSelection,
    QueryGeneration,
    SortExtraction,
}

impl TemplateId {
    pub const ALL: [TemplateId; 3] = [
        TemplateId::ColumnSelection,
        TemplateId::QueryGeneration,
        TemplateId::SortExtraction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateId::ColumnSelection => "COLUMN_SELECTION",
            TemplateId::QueryGeneration => "QUERY_GENERATION",
            TemplateId::SortExtraction => "SORT_EXTRACTION",
        }
    }

    fn body(&self) -> &'static str {
        match self {
            TemplateId::ColumnSelection => COLUMN_SELECTION,
            TemplateId::QueryGeneration => QUERY_GENERATION,
            TemplateId::SortExtraction => SORT_EXTRACTION,
        }
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Template {template} requires variable '{variable}' but it was not supplied")]
pub struct MissingVariableError {
    pub template: TemplateId,
    pub variable: String,
}

enum Segment<'a> {
    Text(&'a str),
    Placeholder(&'a str),
}

/// Split a template into literal text and placeholder names
fn segments(body: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut rest = body;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            break;
        };
        let name = after[..end].trim();
        if is_identifier(name) {
            out.push(Segment::Text(&rest[..start]));
            out.push(Segment::Placeholder(name));
        } else {
            // not a placeholder; keep the braces as literal text
            out.push(Segment::Text(&rest[..start + 2]));
            rest = after;
            continue;
        }
        rest = &after[end + 2..];
    }
    out.push(Segment::Text(rest));
    out
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Renders the built-in stage templates
pub struct PromptEngine;

impl PromptEngine {
    pub fn version() -> &'static str {
        VERSION
    }

    /// Required variables of a template, in order of first use
    pub fn placeholders(id: TemplateId) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = Vec::new();
        for segment in segments(id.body()) {
            if let Segment::Placeholder(name) = segment {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Substitute every placeholder. Extra variables are ignored; a missing
    /// one fails the whole render.
    pub fn render(id: TemplateId, variables: &HashMap<String, String>) -> Result<String, MissingVariableError> {
        let body = id.body();
        let mut out = String::with_capacity(body.len() + variables.values().map(String::len).sum::<usize>());
        for segment in segments(body) {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Placeholder(name) => {
                    let value = variables.get(name).ok_or_else(|| MissingVariableError {
                        template: id,
                        variable: name.to_string(),
                    })?;
                    out.push_str(value);
                }
            }
        }
        tracing::debug!(template = %id, version = VERSION, bytes = out.len(), "Rendered prompt");
        Ok(out)
    }
}
