//! AQP Intermediate Representation (IR)
//!
//! Structured forms of a translated question: the filter conjunction, the sort
//! key, the translation result and the schema-checked query plan. All types are
//! deterministically serializable for caching and provenance.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::ops::{Add, AddAssign};

mod expr_doc;
mod types;
pub use expr_doc::ExprDocError;
pub use types::*;

/// Scalar literal used in filter comparisons and dataset cells
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Coerce the literal to a column type, or `None` if it cannot fit
    pub fn coerce_to(&self, column_type: ColumnType) -> Option<Value> {
        match (column_type, self) {
            (ColumnType::Numeric, Value::Int(_) | Value::Float(_)) => Some(self.clone()),
            (ColumnType::Numeric, Value::String(s)) => parse_number(s.trim()),
            (ColumnType::String, Value::String(_)) => Some(self.clone()),
            (ColumnType::Boolean, Value::Bool(_)) => Some(self.clone()),
            (ColumnType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        }
    }

    /// Order two values of the same kind; numbers compare by magnitude
    /// regardless of integer/float representation.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        }
    }
}

/// Parse a numeric literal, preferring integers
pub fn parse_number(text: &str) -> Option<Value> {
    if let Ok(i) = text.parse::<i64>() {
        return Some(Value::Int(i));
    }
    text.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(Value::Float)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => {
                f.write_str("\"")?;
                for ch in s.chars() {
                    match ch {
                        '"' => f.write_str("\\\"")?,
                        '\\' => f.write_str("\\\\")?,
                        _ => write!(f, "{}", ch)?,
                    }
                }
                f.write_str("\"")
            }
        }
    }
}

/// Comparison operators allowed in a filter conjunction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = "=", alias = "==", alias = "eq", alias = "$eq")]
    Eq,
    #[serde(rename = "!=", alias = "<>", alias = "ne", alias = "$ne")]
    Ne,
    #[serde(rename = "<", alias = "lt", alias = "$lt")]
    Lt,
    #[serde(rename = "<=", alias = "le", alias = "lte", alias = "$lte")]
    Le,
    #[serde(rename = ">", alias = "gt", alias = "$gt")]
    Gt,
    #[serde(rename = ">=", alias = "ge", alias = "gte", alias = "$gte")]
    Ge,
    #[serde(rename = "contains", alias = "CONTAINS", alias = "$contains")]
    Contains,
}

impl CompareOp {
    pub const ALL: [CompareOp; 7] = [
        CompareOp::Eq,
        CompareOp::Ne,
        CompareOp::Lt,
        CompareOp::Le,
        CompareOp::Gt,
        CompareOp::Ge,
        CompareOp::Contains,
    ];

    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Contains => "contains",
        }
    }

    /// Parse an operator symbol or one of its common spellings
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "=" | "==" | "eq" | "$eq" => Some(CompareOp::Eq),
            "!=" | "<>" | "ne" | "$ne" => Some(CompareOp::Ne),
            "<" | "lt" | "$lt" => Some(CompareOp::Lt),
            "<=" | "le" | "lte" | "$lte" => Some(CompareOp::Le),
            ">" | "gt" | "$gt" => Some(CompareOp::Gt),
            ">=" | "ge" | "gte" | "$gte" => Some(CompareOp::Ge),
            "contains" | "$contains" => Some(CompareOp::Contains),
            _ => None,
        }
    }

    /// Whether the operator is meaningful for a column type
    pub fn admits(&self, column_type: ColumnType) -> bool {
        match column_type {
            ColumnType::Numeric => !matches!(self, CompareOp::Contains),
            ColumnType::String => matches!(self, CompareOp::Eq | CompareOp::Ne | CompareOp::Contains),
            ColumnType::Boolean => matches!(self, CompareOp::Eq | CompareOp::Ne),
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A single `column op value` predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub column: String,
    pub op: CompareOp,
    pub value: Value,
}

impl Comparison {
    pub fn new(column: impl Into<String>, op: CompareOp, value: Value) -> Self {
        Self {
            column: column.into(),
            op,
            value,
        }
    }
}

/// Whether a column name can be written without backticks in filter text
fn is_bare_identifier(column: &str) -> bool {
    let mut chars = column.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        }
        _ => false,
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if is_bare_identifier(&self.column) {
            write!(f, "{} {} {}", self.column, self.op, self.value)
        } else {
            write!(f, "`{}` {} {}", self.column, self.op, self.value)
        }
    }
}

/// Conjunction of comparisons. The empty conjunction matches every row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterExpr {
    comparisons: Vec<Comparison>,
}

impl FilterExpr {
    pub fn new(comparisons: Vec<Comparison>) -> Self {
        Self { comparisons }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn comparisons(&self) -> &[Comparison] {
        &self.comparisons
    }

    pub fn into_comparisons(self) -> Vec<Comparison> {
        self.comparisons
    }

    pub fn push(&mut self, comparison: Comparison) {
        self.comparisons.push(comparison);
    }

    pub fn is_empty(&self) -> bool {
        self.comparisons.is_empty()
    }

    pub fn len(&self) -> usize {
        self.comparisons.len()
    }

    /// Distinct column names referenced by the conjunction
    pub fn columns(&self) -> BTreeSet<String> {
        self.comparisons.iter().map(|c| c.column.clone()).collect()
    }
}

impl fmt::Display for FilterExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, comparison) in self.comparisons.iter().enumerate() {
            if idx > 0 {
                f.write_str(" AND ")?;
            }
            write!(f, "{}", comparison)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Some(SortDirection::Asc),
            "desc" | "descending" => Some(SortDirection::Desc),
            _ => None,
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Asc => f.write_str("asc"),
            SortDirection::Desc => f.write_str("desc"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub column: String,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn new(column: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            column: column.into(),
            direction,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("The question was empty. Please ask again.")]
    EmptyUtterance,
}

/// A single natural-language question entering the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationRequest {
    utterance: String,
}

impl TranslationRequest {
    pub fn new(utterance: impl Into<String>) -> Result<Self, RequestError> {
        let utterance = utterance.into();
        let trimmed = utterance.trim();
        if trimmed.is_empty() {
            return Err(RequestError::EmptyUtterance);
        }
        Ok(Self {
            utterance: trimmed.to_string(),
        })
    }

    /// Build a request from a speech-to-text transcript
    pub fn from_transcript(transcript: &str) -> Result<Self, RequestError> {
        Self::new(transcript)
    }

    pub fn utterance(&self) -> &str {
        &self.utterance
    }
}

/// Output of the three translation stages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranslationResult {
    pub selected_columns: BTreeSet<String>,
    pub filter: FilterExpr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortSpec>,
}

impl TranslationResult {
    /// Canonical text form of the filter (`a < 1 AND b = "x"`)
    pub fn filter_expression(&self) -> String {
        self.filter.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanValidationError {
    #[error("Column '{column}' used in {role} is not part of the schema")]
    UnknownColumn { column: String, role: &'static str },

    #[error("Incompatible comparison: {0}")]
    TypeMismatch(#[from] TypeCheckError),

    #[error("Column '{0}' is declared in the schema but missing from the dataset")]
    MissingFromDataset(String),
}

impl PlanValidationError {
    /// Message suitable for showing to the person who asked the question
    pub fn user_message(&self) -> String {
        format!("No valid query could be formed: {}", self)
    }
}

/// Validated, schema-checked form of a translation, ready for execution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryPlan {
    selected_columns: Vec<String>,
    filter: FilterExpr,
    #[serde(skip_serializing_if = "Option::is_none")]
    sort: Option<SortSpec>,
}

impl QueryPlan {
    /// Check a translation against the schema. Never yields a plan that
    /// references an unknown column.
    pub fn new(result: &TranslationResult, schema: &Schema) -> Result<Self, PlanValidationError> {
        for column in &result.selected_columns {
            if !schema.contains(column) {
                return Err(PlanValidationError::UnknownColumn {
                    column: column.clone(),
                    role: "projection",
                });
            }
        }

        let mut comparisons = Vec::with_capacity(result.filter.len());
        for comparison in result.filter.comparisons() {
            if !schema.contains(&comparison.column) {
                return Err(PlanValidationError::UnknownColumn {
                    column: comparison.column.clone(),
                    role: "filter",
                });
            }
            comparisons.push(schema.check_comparison(comparison)?);
        }

        if let Some(sort) = &result.sort {
            if !schema.contains(&sort.column) {
                return Err(PlanValidationError::UnknownColumn {
                    column: sort.column.clone(),
                    role: "sort",
                });
            }
        }

        // Projection follows schema declaration order
        let mut selected_columns: Vec<String> = result.selected_columns.iter().cloned().collect();
        selected_columns.sort_by_key(|name| schema.position(name));

        Ok(Self {
            selected_columns,
            filter: FilterExpr::new(comparisons),
            sort: result.sort.clone(),
        })
    }

    /// Selected columns in schema order; empty means every column
    pub fn selected_columns(&self) -> &[String] {
        &self.selected_columns
    }

    pub fn filter(&self) -> &FilterExpr {
        &self.filter
    }

    pub fn sort(&self) -> Option<&SortSpec> {
        self.sort.as_ref()
    }

    /// Every column name the plan touches
    pub fn referenced_columns(&self) -> BTreeSet<String> {
        let mut columns: BTreeSet<String> = self.selected_columns.iter().cloned().collect();
        columns.extend(self.filter.columns());
        if let Some(sort) = &self.sort {
            columns.insert(sort.column.clone());
        }
        columns
    }

    /// Calculate fingerprint (SHA-256) for deterministic caching
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Token counts reported by the completion service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt: u32,
    pub completion: u32,
}

impl TokenUsage {
    pub fn new(prompt: u32, completion: u32) -> Self {
        Self { prompt, completion }
    }

    pub fn total(&self) -> u64 {
        self.prompt as u64 + self.completion as u64
    }
}

impl Add for TokenUsage {
    type Output = TokenUsage;

    fn add(self, rhs: TokenUsage) -> TokenUsage {
        TokenUsage {
            prompt: self.prompt.saturating_add(rhs.prompt),
            completion: self.completion.saturating_add(rhs.completion),
        }
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: TokenUsage) {
        *self = *self + rhs;
    }
}

/// Scored outcome of one evaluation case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub case_id: String,
    pub utterance: String,
    pub ground_truth_filter: String,
    pub predicted_filter: String,
    pub score: f64,
    pub latency_ms: f64,
    pub token_usage: TokenUsage,
}

impl EvaluationRecord {
    /// Equality ignoring the wall-clock latency
    pub fn same_outcome(&self, other: &EvaluationRecord) -> bool {
        self.case_id == other.case_id
            && self.utterance == other.utterance
            && self.ground_truth_filter == other.ground_truth_filter
            && self.predicted_filter == other.predicted_filter
            && self.score == other.score
            && self.token_usage == other.token_usage
    }

    pub fn is_exact_match(&self) -> bool {
        self.score >= 1.0
    }
}

/// Aggregate view over the records of one evaluation run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub cases: usize,
    pub mean_score: f64,
    pub exact_matches: usize,
    pub total_tokens: u64,
    pub mean_latency_ms: f64,
}

impl RunSummary {
    pub fn from_records(records: &[EvaluationRecord]) -> Self {
        if records.is_empty() {
            return Self::default();
        }
        let cases = records.len();
        let n = cases as f64;
        Self {
            cases,
            mean_score: records.iter().map(|r| r.score).sum::<f64>() / n,
            exact_matches: records.iter().filter(|r| r.is_exact_match()).count(),
            total_tokens: records.iter().map(|r| r.token_usage.total()).sum(),
            mean_latency_ms: records.iter().map(|r| r.latency_ms).sum::<f64>() / n,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::new(vec![
            ColumnDescriptor::new("model_name", ColumnType::String, "Model identifier"),
            ColumnDescriptor::new("latency_ms", ColumnType::Numeric, "Mean latency"),
            ColumnDescriptor::new("accuracy", ColumnType::Numeric, "Accuracy in [0, 1]"),
        ])
        .unwrap()
    }

    fn result() -> TranslationResult {
        TranslationResult {
            selected_columns: ["accuracy", "latency_ms"].iter().map(|s| s.to_string()).collect(),
            filter: FilterExpr::new(vec![
                Comparison::new("latency_ms", CompareOp::Lt, Value::Int(100)),
                Comparison::new("accuracy", CompareOp::Gt, Value::Float(0.9)),
            ]),
            sort: None,
        }
    }

    #[test]
    fn test_filter_display() {
        assert_eq!(result().filter_expression(), "latency_ms < 100 AND accuracy > 0.9");

        let filter = FilterExpr::new(vec![Comparison::new(
            "model_name",
            CompareOp::Contains,
            Value::String("say \"hi\"".into()),
        )]);
        assert_eq!(filter.to_string(), r#"model_name contains "say \"hi\"""#);
    }

    #[test]
    fn test_filter_display_quotes_unusual_columns() {
        let filter = FilterExpr::new(vec![
            Comparison::new("f1-score", CompareOp::Gt, Value::Float(0.9)),
            Comparison::new("model name", CompareOp::Eq, Value::String("x".into())),
            Comparison::new("2nd_pass", CompareOp::Lt, Value::Int(3)),
            Comparison::new("output.latency", CompareOp::Le, Value::Int(250)),
        ]);
        assert_eq!(
            filter.to_string(),
            r#"`f1-score` > 0.9 AND `model name` = "x" AND `2nd_pass` < 3 AND output.latency <= 250"#
        );
    }

    #[test]
    fn test_plan_orders_projection_by_schema() {
        let plan = QueryPlan::new(&result(), &schema()).unwrap();
        assert_eq!(plan.selected_columns(), &["latency_ms".to_string(), "accuracy".to_string()]);
    }

    #[test]
    fn test_plan_rejects_unknown_sort_column() {
        let mut result = result();
        result.sort = Some(SortSpec::new("f1", SortDirection::Desc));
        let err = QueryPlan::new(&result, &schema()).unwrap_err();
        assert_eq!(
            err,
            PlanValidationError::UnknownColumn {
                column: "f1".to_string(),
                role: "sort"
            }
        );
    }

    #[test]
    fn test_plan_rejects_unknown_filter_column() {
        let mut result = result();
        result.filter.push(Comparison::new("f1", CompareOp::Gt, Value::Float(0.5)));
        assert!(matches!(
            QueryPlan::new(&result, &schema()),
            Err(PlanValidationError::UnknownColumn { role: "filter", .. })
        ));
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let plan1 = QueryPlan::new(&result(), &schema()).unwrap();
        let plan2 = QueryPlan::new(&result(), &schema()).unwrap();
        assert_eq!(plan1.fingerprint(), plan2.fingerprint());

        let mut other = result();
        other.sort = Some(SortSpec::new("accuracy", SortDirection::Desc));
        let plan3 = QueryPlan::new(&other, &schema()).unwrap();
        assert_ne!(plan1.fingerprint(), plan3.fingerprint());
    }

    #[test]
    fn test_numeric_compare_across_representations() {
        assert_eq!(Value::Int(1).compare(&Value::Float(1.0)), Some(Ordering::Equal));
        assert_eq!(Value::Float(0.9).compare(&Value::Float(0.90)), Some(Ordering::Equal));
        assert_eq!(Value::String("a".into()).compare(&Value::Int(1)), None);
    }

    #[test]
    fn test_empty_request_rejected() {
        assert_eq!(TranslationRequest::new("   "), Err(RequestError::EmptyUtterance));
        assert_eq!(TranslationRequest::new(" hi ").unwrap().utterance(), "hi");
    }

    #[test]
    fn test_operator_serde_aliases() {
        let cmp: Comparison =
            serde_json::from_str(r#"{"column": "accuracy", "op": "gte", "value": 0.9}"#).unwrap();
        assert_eq!(cmp.op, CompareOp::Ge);
        assert_eq!(serde_json::to_value(cmp.op).unwrap(), ">=");
    }

    #[test]
    fn test_token_usage_adds() {
        let mut usage = TokenUsage::new(10, 2);
        usage += TokenUsage::new(5, 1);
        assert_eq!(usage, TokenUsage::new(15, 3));
        assert_eq!(usage.total(), 18);
    }

    #[test]
    fn test_run_summary() {
        let record = |id: &str, score: f64| EvaluationRecord {
            case_id: id.to_string(),
            utterance: String::new(),
            ground_truth_filter: String::new(),
            predicted_filter: String::new(),
            score,
            latency_ms: 10.0,
            token_usage: TokenUsage::new(100, 20),
        };
        let summary = RunSummary::from_records(&[record("a", 1.0), record("b", 0.5)]);
        assert_eq!(summary.cases, 2);
        assert_eq!(summary.mean_score, 0.75);
        assert_eq!(summary.exact_matches, 1);
        assert_eq!(summary.total_tokens, 240);
        assert_eq!(summary.mean_latency_ms, 10.0);

        assert_eq!(RunSummary::from_records(&[]), RunSummary::default());
    }
}
