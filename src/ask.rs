//! One-shot question answering from the command line.

use anyhow::Result;

use crate::config::Config;
use crate::models::QueryResponse;
use crate::pipeline::{PipelineState, RagPipeline};

/// Build the pipeline, run startup (rebuilding the index if the policy
/// calls for it), answer `question` and print the result.
pub async fn run_ask(config: &Config, question: &str) -> Result<()> {
    let pipeline = RagPipeline::from_config(config).await?;

    let state = pipeline.startup().await;
    if state == PipelineState::ReadyDegraded {
        eprintln!("warning: index is empty or unusable; answers will fall back");
    }

    let response = pipeline.process_query(question, &[]).await?;
    print!("{}", render(&response));
    Ok(())
}

fn render(response: &QueryResponse) -> String {
    let mut out = format!("{}\n", response.answer);
    if !response.sources.is_empty() {
        out.push_str("\nSources:\n");
        for source in &response.sources {
            out.push_str(&format!("  - {}\n", source));
        }
    }
    out.push_str(&format!("\n({:.2}s)\n", response.latency));
    out
}
