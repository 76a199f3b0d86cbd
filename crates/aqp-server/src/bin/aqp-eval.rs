//! Runs the evaluation cases through the live pipeline and prints the run
//!
//! Usage: `aqp-eval [cases.json]` (defaults to `evaluation.cases_path`)

use anyhow::Context;
use aqp_eval::{load_cases, EvaluationHarness, Scorer};
use aqp_server::{logging, setup, Config};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config_path = std::env::var("AQP_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
    let config = Config::load_or_default(&config_path).with_context(|| format!("loading {}", config_path))?;
    logging::init(&config.logging, "aqp-eval.log");

    let cases_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config.evaluation.cases_path.clone());
    let cases = load_cases(&cases_path).with_context(|| format!("loading cases from {}", cases_path))?;

    let registry = setup::load_schema(&config)?;
    let (sink, prometheus) = setup::build_sink(&config.metrics)?;
    let pipeline = setup::pipeline(setup::openai_client()?, &registry, &config.llm, Arc::clone(&sink));

    let harness = EvaluationHarness::new(Arc::new(pipeline), Scorer::new(config.evaluation.scoring_config()))
        .with_max_concurrency(config.evaluation.max_concurrency)
        .with_project(config.metrics.project.clone())
        .with_sink(sink);

    info!(cases = cases.len(), scoring = ?config.evaluation.scoring, "Running evaluation");
    let run = harness.run(cases).await;

    println!("{}", serde_json::to_string_pretty(&run)?);
    if let Some(prometheus) = prometheus {
        eprintln!("{}", prometheus.render());
    }

    info!(
        run_id = %run.run_id,
        mean_score = run.summary.mean_score,
        exact_matches = run.summary.exact_matches,
        cases = run.summary.cases,
        "Evaluation complete"
    );
    Ok(())
}
