use aqp_eval::{cases_from_json, EvalCase, EvaluationHarness, JsonlSink, PrometheusSink, Scorer};
use aqp_ir::{ColumnDescriptor, ColumnType, EvaluationRecord, RunSummary, Schema, TokenUsage};
use aqp_pipeline::{Completion, CompletionError, CompletionService, MetricsSink, ModelConfig, TranslationPipeline};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SCENARIO: &str = "models with latency less than 100ms and accuracy greater than 90%";

#[derive(Clone, Copy)]
struct Script {
    columns: &'static str,
    filter: &'static str,
    sort: &'static str,
    delay_ms: u64,
}

impl Script {
    fn filter(filter: &'static str) -> Self {
        Self {
            columns: r#"{"columns": ["latency_ms", "accuracy"]}"#,
            filter,
            sort: r#"{"sort_by": []}"#,
            delay_ms: 0,
        }
    }

    fn delayed(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }
}

/// Replies keyed on the question in the prompt, so concurrent cases never
/// interfere with each other's script.
#[derive(Default)]
struct KeyedLlm {
    scripts: HashMap<&'static str, Script>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl KeyedLlm {
    fn with(mut self, utterance: &'static str, script: Script) -> Self {
        self.scripts.insert(utterance, script);
        self
    }

    fn question(prompt: &str) -> &str {
        prompt
            .rfind("Question: ")
            .map(|at| &prompt[at + "Question: ".len()..])
            .and_then(|rest| rest.lines().next())
            .unwrap_or_default()
            .trim()
    }
}

#[async_trait]
impl CompletionService for KeyedLlm {
    async fn complete(&self, prompt: &str, _config: &ModelConfig) -> Result<Completion, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let script = self.scripts.get(Self::question(prompt)).copied();
        if let Some(script) = script {
            tokio::time::sleep(Duration::from_millis(script.delay_ms)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let script = script.ok_or_else(|| CompletionError::Unavailable("no script for question".to_string()))?;
        let text = if prompt.contains("pick the columns") {
            script.columns
        } else if prompt.contains("writes filters") {
            script.filter
        } else {
            script.sort
        };
        Ok(Completion {
            text: text.to_string(),
            token_usage: TokenUsage::new(100, 10),
            latency_ms: 1.0,
        })
    }
}

#[derive(Default)]
struct CollectingSink {
    records: Mutex<Vec<EvaluationRecord>>,
    runs: Mutex<Vec<RunSummary>>,
}

impl MetricsSink for CollectingSink {
    fn record_evaluation(&self, record: &EvaluationRecord) {
        self.records.lock().unwrap().push(record.clone());
    }

    fn record_run(&self, summary: &RunSummary) {
        self.runs.lock().unwrap().push(summary.clone());
    }
}

fn schema() -> Arc<Schema> {
    Arc::new(
        Schema::new(vec![
            ColumnDescriptor::new("model_name", ColumnType::String, "Name of the evaluated model"),
            ColumnDescriptor::new("latency_ms", ColumnType::Numeric, "Mean latency in milliseconds"),
            ColumnDescriptor::new("accuracy", ColumnType::Numeric, "Accuracy between 0 and 1"),
        ])
        .unwrap(),
    )
}

fn scenario_llm() -> KeyedLlm {
    KeyedLlm::default()
        .with(
            SCENARIO,
            Script::filter(r#"{"filter": "latency_ms < 100 AND accuracy > 0.9"}"#),
        )
        .with("fast models", Script::filter(r#"{"filter": [{"column": "latency_ms", "op": "<", "value": 50}]}"#))
        .with("broken output", Script::filter("the filter is latency under 100"))
}

fn harness(llm: Arc<KeyedLlm>) -> EvaluationHarness<Arc<KeyedLlm>> {
    let pipeline = Arc::new(TranslationPipeline::new(llm, schema()));
    EvaluationHarness::new(pipeline, Scorer::strict())
}

#[tokio::test]
async fn test_scenario_scores_one() {
    let llm = Arc::new(scenario_llm());
    let run = harness(llm.clone())
        .run(vec![EvalCase::new("scenario", SCENARIO, "latency_ms < 100 AND accuracy > 0.90")])
        .await;

    assert_eq!(run.records.len(), 1);
    let record = &run.records[0];
    assert_eq!(record.score, 1.0);
    assert_eq!(record.predicted_filter, "latency_ms < 100 AND accuracy > 0.9");
    assert_eq!(record.token_usage, TokenUsage::new(300, 30));
    assert_eq!(llm.calls.load(Ordering::SeqCst), 3);
    assert!(run.finished_at >= run.started_at);
}

#[tokio::test]
async fn test_malformed_filter_scores_zero_and_batch_continues() {
    let run = harness(Arc::new(scenario_llm()))
        .run(vec![
            EvalCase::new("bad", "broken output", "latency_ms < 100"),
            EvalCase::new("good", "fast models", "latency_ms < 50"),
        ])
        .await;

    assert_eq!(run.records.len(), 2);
    assert_eq!(run.records[0].case_id, "bad");
    assert_eq!(run.records[0].score, 0.0);
    assert_eq!(run.records[0].predicted_filter, "");
    // columns + two filter attempts + sort
    assert_eq!(run.records[0].token_usage, TokenUsage::new(400, 40));
    assert_eq!(run.records[1].score, 1.0);
}

#[tokio::test]
async fn test_unanswerable_case_scores_zero() {
    let run = harness(Arc::new(scenario_llm()))
        .run(vec![
            EvalCase::new("empty", "   ", "latency_ms < 100"),
            EvalCase::new("bad-truth", "fast models", "latency_ms <"),
        ])
        .await;

    assert_eq!(run.records[0].score, 0.0);
    assert_eq!(run.records[0].token_usage, TokenUsage::default());
    assert_eq!(run.records[1].score, 0.0);
    assert_eq!(run.records[1].predicted_filter, "latency_ms < 50");
}

#[tokio::test]
async fn test_partial_credit() {
    let run = harness(Arc::new(scenario_llm()))
        .run(vec![EvalCase::new("partial", "fast models", "latency_ms < 50 AND accuracy > 0.9")])
        .await;
    assert_eq!(run.records[0].score, 0.5);
}

#[tokio::test]
async fn test_records_keep_input_order_under_concurrency() {
    // earlier cases finish last
    let utterances = ["case zero", "case one", "case two", "case three", "case four", "case five"];
    let mut llm = KeyedLlm::default();
    for (i, utterance) in utterances.iter().enumerate() {
        let script = Script::filter(r#"{"filter": "latency_ms < 100"}"#).delayed(5 * (6 - i as u64));
        llm = llm.with(*utterance, script);
    }
    let llm = Arc::new(llm);

    let cases: Vec<EvalCase> = utterances
        .iter()
        .enumerate()
        .map(|(i, u)| EvalCase::new(i.to_string(), *u, "latency_ms < 100"))
        .collect();
    let run = harness(llm.clone()).with_max_concurrency(2).run(cases).await;

    let ids: Vec<&str> = run.records.iter().map(|r| r.case_id.as_str()).collect();
    assert_eq!(ids, vec!["0", "1", "2", "3", "4", "5"]);
    assert!(run.records.iter().all(|r| r.score == 1.0));
    assert!(llm.peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_deterministic_pipeline_gives_identical_records() {
    let cases = vec![
        EvalCase::new("scenario", SCENARIO, "latency_ms < 100 AND accuracy > 0.9"),
        EvalCase::new("fast", "fast models", "latency_ms < 100"),
        EvalCase::new("bad", "broken output", "latency_ms < 100"),
    ];
    let harness = harness(Arc::new(scenario_llm())).with_max_concurrency(3);

    let first = harness.run(cases.clone()).await;
    let second = harness.run(cases).await;

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(first.records.len(), second.records.len());
    for (a, b) in first.records.iter().zip(&second.records) {
        assert!(a.same_outcome(b), "{:?} != {:?}", a, b);
    }
    assert_eq!(first.summary.mean_score, second.summary.mean_score);
}

#[tokio::test]
async fn test_summary_and_sink() {
    let sink = Arc::new(CollectingSink::default());
    let run = harness(Arc::new(scenario_llm()))
        .with_project("unit")
        .with_sink(sink.clone())
        .run(vec![
            EvalCase::new("a", SCENARIO, "latency_ms < 100 AND accuracy > 0.9"),
            EvalCase::new("b", "fast models", "latency_ms < 50 AND accuracy > 0.9"),
            EvalCase::new("c", "broken output", "latency_ms < 100"),
        ])
        .await;

    assert_eq!(run.project, "unit");
    assert_eq!(run.summary.cases, 3);
    assert_eq!(run.summary.exact_matches, 1);
    assert!((run.summary.mean_score - 0.5).abs() < 1e-9);
    assert_eq!(run.summary.total_tokens, 330 + 330 + 440);

    let recorded: Vec<String> = sink.records.lock().unwrap().iter().map(|r| r.case_id.clone()).collect();
    assert_eq!(recorded, vec!["a", "b", "c"]);
    assert_eq!(sink.runs.lock().unwrap().as_slice(), &[run.summary.clone()]);
}

#[tokio::test]
async fn test_cases_file_through_prometheus_and_jsonl() {
    let cases = cases_from_json(&format!(
        r#"[
            {{"id": "scenario", "utterance": "{}", "ground_truth_filter": {{"$expr": {{"$and": [
                {{"$not": [{{"$gte": [{{"$convert": {{"input": {{"$getField": "latency_ms"}}, "to": "double"}}}}, {{"$literal": 100}}]}}]}},
                {{"$gt": [{{"$convert": {{"input": {{"$getField": "accuracy"}}, "to": "double"}}}}, {{"$literal": 0.9}}]}}
            ]}}}}}}
        ]"#,
        SCENARIO
    ))
    .unwrap();
    assert_eq!(cases[0].ground_truth_filter, "latency_ms < 100 AND accuracy > 0.9");

    let prometheus = Arc::new(PrometheusSink::new("unit").unwrap());
    let path = std::env::temp_dir().join(format!("aqp-eval-{}.jsonl", uuid::Uuid::new_v4()));
    let jsonl = Arc::new(JsonlSink::create(&path).unwrap());
    let fanout: Arc<dyn MetricsSink> = Arc::new(aqp_eval::FanoutSink::new(vec![prometheus.clone(), jsonl.clone()]));

    let pipeline = Arc::new(TranslationPipeline::new(Arc::new(scenario_llm()), schema()).with_sink(fanout.clone()));
    let run = EvaluationHarness::new(pipeline, Scorer::tolerant(0.01))
        .with_sink(fanout)
        .run(cases)
        .await;
    assert_eq!(run.records[0].score, 1.0);

    let metrics = prometheus.render();
    assert!(metrics.contains(r#"aqp_llm_calls_total{outcome="success",project="unit",stage="column_selection"} 1"#));
    assert!(metrics.contains(r#"aqp_evaluation_last_run_accuracy{project="unit"} 1"#));

    let contents = std::fs::read_to_string(&path).unwrap();
    let kinds: Vec<String> = contents
        .lines()
        .map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap()["kind"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(kinds, vec!["call", "call", "call", "evaluation", "run"]);
    std::fs::remove_file(&path).ok();
}
