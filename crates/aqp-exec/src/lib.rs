//! In-memory executor for validated query plans

use aqp_ir::{CompareOp, Comparison, PlanValidationError, QueryPlan, SortDirection, Value};
use std::cmp::Ordering;
use thiserror::Error;

mod dataset;
pub use dataset::{Dataset, DatasetError, TableDataset};

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Plan validation failed: {0}")]
    PlanValidation(#[from] PlanValidationError),
}

impl ExecutionError {
    pub fn user_message(&self) -> String {
        match self {
            ExecutionError::PlanValidation(err) => err.user_message(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionBudget {
    pub max_rows: Option<usize>,
}

impl ExecutionBudget {
    pub fn max_rows(max_rows: usize) -> Self {
        Self {
            max_rows: Some(max_rows),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
}

impl QueryResult {
    /// `{columns, rows, row_count}` as served to clients
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "columns": self.columns,
            "rows": self.rows,
            "row_count": self.row_count,
        })
    }
}

/// Cell positions a plan resolves to in one dataset
struct Resolved<'p> {
    filter: Vec<(usize, &'p Comparison)>,
    sort: Option<(usize, SortDirection)>,
    projection: Vec<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct QueryExecutor {
    budget: ExecutionBudget,
}

impl QueryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_budget(budget: ExecutionBudget) -> Self {
        Self { budget }
    }

    pub fn budget(&self) -> ExecutionBudget {
        self.budget
    }

    /// Run a plan against a dataset.
    ///
    /// Every column the plan references must exist in the dataset before any
    /// row is touched. Filtering is a conjunction; sorting is stable with nulls
    /// last in both directions; projection follows dataset column order.
    pub fn execute(&self, plan: &QueryPlan, dataset: &dyn Dataset) -> Result<QueryResult, ExecutionError> {
        let resolved = resolve(plan, dataset)?;

        let mut matched: Vec<&[Value]> = dataset
            .rows()
            .filter(|row| {
                resolved
                    .filter
                    .iter()
                    .all(|(idx, comparison)| matches(&row[*idx], comparison))
            })
            .collect();

        if let Some((idx, direction)) = resolved.sort {
            // sort_by is stable, so ties keep dataset order
            matched.sort_by(|a, b| compare_cells(&a[idx], &b[idx], direction));
        }

        let total = matched.len();
        if let Some(max_rows) = self.budget.max_rows {
            matched.truncate(max_rows);
        }

        let columns: Vec<String> = resolved
            .projection
            .iter()
            .map(|&idx| dataset.columns()[idx].clone())
            .collect();
        let rows: Vec<Vec<Value>> = matched
            .into_iter()
            .map(|row| resolved.projection.iter().map(|&idx| row[idx].clone()).collect())
            .collect();

        tracing::debug!(
            scanned = dataset.row_count(),
            matched = total,
            returned = rows.len(),
            fingerprint = %plan.fingerprint(),
            "Executed query plan"
        );

        Ok(QueryResult {
            row_count: rows.len(),
            columns,
            rows,
        })
    }
}

fn lookup(dataset: &dyn Dataset, column: &str) -> Result<usize, PlanValidationError> {
    dataset
        .column_index(column)
        .ok_or_else(|| PlanValidationError::MissingFromDataset(column.to_string()))
}

fn resolve<'p>(plan: &'p QueryPlan, dataset: &dyn Dataset) -> Result<Resolved<'p>, PlanValidationError> {
    let filter = plan
        .filter()
        .comparisons()
        .iter()
        .map(|comparison| Ok((lookup(dataset, &comparison.column)?, comparison)))
        .collect::<Result<Vec<_>, PlanValidationError>>()?;

    let sort = match plan.sort() {
        Some(spec) => Some((lookup(dataset, &spec.column)?, spec.direction)),
        None => None,
    };

    let projection = if plan.selected_columns().is_empty() {
        (0..dataset.columns().len()).collect()
    } else {
        let mut positions = plan
            .selected_columns()
            .iter()
            .map(|column| lookup(dataset, column))
            .collect::<Result<Vec<_>, _>>()?;
        positions.sort_unstable();
        positions
    };

    Ok(Resolved {
        filter,
        sort,
        projection,
    })
}

/// Whether a cell satisfies a comparison. Null never matches.
fn matches(cell: &Value, comparison: &Comparison) -> bool {
    if cell.is_null() || comparison.value.is_null() {
        return false;
    }
    if comparison.op == CompareOp::Contains {
        return match (cell.as_str(), comparison.value.as_str()) {
            (Some(haystack), Some(needle)) => haystack.to_lowercase().contains(&needle.to_lowercase()),
            _ => false,
        };
    }
    let Some(ordering) = cell.compare(&comparison.value) else {
        return false;
    };
    match comparison.op {
        CompareOp::Eq => ordering == Ordering::Equal,
        CompareOp::Ne => ordering != Ordering::Equal,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Le => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Ge => ordering != Ordering::Less,
        CompareOp::Contains => false,
    }
}

/// Sort position of a value kind: numbers, then booleans, then strings, then null
fn kind_rank(value: &Value) -> u8 {
    match value {
        Value::Int(_) | Value::Float(_) => 0,
        Value::Bool(_) => 1,
        Value::String(_) => 2,
        Value::Null => 3,
    }
}

// Kinds are grouped in the same order for both directions; only values of
// one kind are reversed by a descending sort.
fn compare_cells(a: &Value, b: &Value, direction: SortDirection) -> Ordering {
    let (rank_a, rank_b) = (kind_rank(a), kind_rank(b));
    if rank_a != rank_b {
        return rank_a.cmp(&rank_b);
    }
    let ordering = a.compare(b).unwrap_or(Ordering::Equal);
    match direction {
        SortDirection::Asc => ordering,
        SortDirection::Desc => ordering.reverse(),
    }
}
