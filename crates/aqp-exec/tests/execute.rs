use aqp_exec::{Dataset, ExecutionBudget, ExecutionError, QueryExecutor, TableDataset};
use aqp_ir::{
    ColumnDescriptor, ColumnType, PlanValidationError, QueryPlan, Schema, SortDirection, SortSpec,
    TranslationResult, Value,
};

const RUNS: &str = r#"[
    {"model_name": "gpt-4o",      "latency_ms": 80,  "accuracy": 0.95, "is_baseline": false},
    {"model_name": "llama-3-8b",  "latency_ms": 45,  "accuracy": 0.71, "is_baseline": true},
    {"model_name": "claude-mini", "latency_ms": 120, "accuracy": 0.93, "is_baseline": false},
    {"model_name": "mistral-7b",  "latency_ms": 60,  "accuracy": 0.92, "is_baseline": false},
    {"model_name": "phi-3",       "latency_ms": null, "accuracy": 0.97, "is_baseline": false}
]"#;

fn schema() -> Schema {
    Schema::new(vec![
        ColumnDescriptor::new("model_name", ColumnType::String, "Model identifier"),
        ColumnDescriptor::new("latency_ms", ColumnType::Numeric, "Mean latency in milliseconds"),
        ColumnDescriptor::new("accuracy", ColumnType::Numeric, "Accuracy between 0 and 1"),
        ColumnDescriptor::new("is_baseline", ColumnType::Boolean, "Whether the run is a baseline"),
        ColumnDescriptor::new("f1", ColumnType::Numeric, "F1 score"),
    ])
    .unwrap()
}

fn plan(columns: &[&str], filter: &str, sort: Option<SortSpec>) -> QueryPlan {
    let result = TranslationResult {
        selected_columns: columns.iter().map(|c| c.to_string()).collect(),
        filter: aqp_ast::parse_filter(filter).unwrap(),
        sort,
    };
    QueryPlan::new(&result, &schema()).unwrap()
}

fn dataset() -> TableDataset {
    TableDataset::from_json_records(RUNS).unwrap()
}

fn names(rows: &[Vec<Value>]) -> Vec<&str> {
    rows.iter().map(|row| row[0].as_str().unwrap()).collect()
}

#[test]
fn test_filter_keeps_matching_rows_in_order() {
    let plan = plan(
        &["model_name", "latency_ms", "accuracy"],
        "latency_ms < 100 AND accuracy > 0.9",
        None,
    );
    let result = QueryExecutor::new().execute(&plan, &dataset()).unwrap();

    assert_eq!(result.row_count, 2);
    assert_eq!(names(&result.rows), vec!["gpt-4o", "mistral-7b"]);
    assert_eq!(result.columns, vec!["model_name", "latency_ms", "accuracy"]);
}

#[test]
fn test_empty_filter_returns_full_projection() {
    let plan = plan(&["accuracy", "model_name"], "", None);
    let result = QueryExecutor::new().execute(&plan, &dataset()).unwrap();

    assert_eq!(result.row_count, 5);
    // dataset column order, not selection order
    assert_eq!(result.columns, vec!["model_name", "accuracy"]);
    assert_eq!(
        names(&result.rows),
        vec!["gpt-4o", "llama-3-8b", "claude-mini", "mistral-7b", "phi-3"]
    );
}

#[test]
fn test_empty_selection_projects_every_column() {
    let plan = plan(&[], "is_baseline = true", None);
    let result = QueryExecutor::new().execute(&plan, &dataset()).unwrap();
    assert_eq!(result.columns.len(), 4);
    assert_eq!(names(&result.rows), vec!["llama-3-8b"]);
}

#[test]
fn test_column_missing_from_dataset_is_rejected() {
    let plan = plan(&["model_name"], "f1 > 0.5", None);
    let err = QueryExecutor::new().execute(&plan, &dataset()).unwrap_err();
    assert!(matches!(
        err,
        ExecutionError::PlanValidation(PlanValidationError::MissingFromDataset(ref column)) if column == "f1"
    ));
}

#[test]
fn test_sort_is_stable_with_nulls_last() {
    let asc = plan(
        &["model_name", "latency_ms"],
        "",
        Some(SortSpec::new("latency_ms", SortDirection::Asc)),
    );
    let result = QueryExecutor::new().execute(&asc, &dataset()).unwrap();
    assert_eq!(
        names(&result.rows),
        vec!["llama-3-8b", "mistral-7b", "gpt-4o", "claude-mini", "phi-3"]
    );

    let desc = plan(
        &["model_name", "is_baseline"],
        "",
        Some(SortSpec::new("latency_ms", SortDirection::Desc)),
    );
    let result = QueryExecutor::new().execute(&desc, &dataset()).unwrap();
    assert_eq!(
        names(&result.rows),
        vec!["claude-mini", "gpt-4o", "mistral-7b", "llama-3-8b", "phi-3"]
    );
}

#[test]
fn test_sort_with_mixed_kinds_in_numeric_column() {
    let records: Vec<serde_json::Value> = (0..300)
        .map(|i| {
            let latency = if i % 3 == 0 {
                serde_json::json!("n/a")
            } else {
                serde_json::json!((i * 7919) % 1000)
            };
            serde_json::json!({"model_name": format!("m{}", i), "latency_ms": latency})
        })
        .collect();
    let dataset = TableDataset::from_json_records(&serde_json::Value::Array(records).to_string()).unwrap();

    for direction in [SortDirection::Asc, SortDirection::Desc] {
        let plan = plan(&["latency_ms"], "", Some(SortSpec::new("latency_ms", direction)));
        let result = QueryExecutor::new().execute(&plan, &dataset).unwrap();
        assert_eq!(result.row_count, 300);

        let numbers: Vec<i64> = result
            .rows
            .iter()
            .filter_map(|row| match row[0] {
                Value::Int(i) => Some(i),
                _ => None,
            })
            .collect();
        assert_eq!(numbers.len(), 200);
        let mut expected = numbers.clone();
        expected.sort_unstable();
        if direction == SortDirection::Desc {
            expected.reverse();
        }
        assert_eq!(numbers, expected);

        // Numbers come first, then the stray strings
        assert!(result.rows[..200].iter().all(|row| matches!(row[0], Value::Int(_))));
        assert!(result.rows[200..].iter().all(|row| row[0].as_str() == Some("n/a")));
    }
}

#[test]
fn test_sort_ties_keep_dataset_order() {
    let plan = plan(
        &["model_name"],
        "",
        Some(SortSpec::new("is_baseline", SortDirection::Asc)),
    );
    let result = QueryExecutor::new().execute(&plan, &dataset()).unwrap();
    assert_eq!(
        names(&result.rows),
        vec!["gpt-4o", "claude-mini", "mistral-7b", "phi-3", "llama-3-8b"]
    );
}

#[test]
fn test_no_matches_is_empty_result() {
    let plan = plan(&["model_name"], "accuracy > 0.99", None);
    let result = QueryExecutor::new().execute(&plan, &dataset()).unwrap();
    assert_eq!(result.row_count, 0);
    assert!(result.rows.is_empty());
    assert_eq!(result.columns, vec!["model_name"]);
}

#[test]
fn test_budget_truncates_output() {
    let plan = plan(&["model_name"], "", None);
    let executor = QueryExecutor::with_budget(ExecutionBudget::max_rows(2));
    let result = executor.execute(&plan, &dataset()).unwrap();
    assert_eq!(result.row_count, 2);
    assert_eq!(names(&result.rows), vec!["gpt-4o", "llama-3-8b"]);
}

#[test]
fn test_contains_filter() {
    let plan = plan(&["model_name"], "model_name contains \"LLAMA\"", None);
    let result = QueryExecutor::new().execute(&plan, &dataset()).unwrap();
    assert_eq!(names(&result.rows), vec!["llama-3-8b"]);
}

#[test]
fn test_dataset_trait_object() {
    let dataset = dataset();
    let dyn_dataset: &dyn Dataset = &dataset;
    assert_eq!(dyn_dataset.row_count(), 5);
    assert_eq!(dyn_dataset.column_index("accuracy"), Some(2));
}
