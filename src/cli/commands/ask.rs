use anyhow::{Context, Result};
use clap::Args;

use crate::cli::context::AppContext;
use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat};
use crate::services::{AgentLimits, RetrievalParams};

#[derive(Debug, Args)]
pub struct AskArgs {
    #[arg(required = true, help = "Question to gather context for")]
    pub question: String,

    #[arg(long, short = 'c', help = "Collection to search")]
    pub collection: Option<String>,

    #[arg(long, help = "Maximum tool-calling rounds")]
    pub max_iterations: Option<u32>,
}

pub async fn handle_ask(args: AskArgs, format: OutputFormat, verbose: bool) -> Result<()> {
    let config = Config::load()?.config;
    let collection = args
        .collection
        .unwrap_or_else(|| config.vector_store.collection.clone());
    let formatter = get_formatter(format);

    let params = RetrievalParams::from(&config.retrieval);
    let mut limits = AgentLimits::from(&config.agentic);
    if let Some(max) = args.max_iterations {
        limits = limits.with_max_iterations(max);
    }

    if verbose {
        eprintln!("Question: \"{}\"", args.question.trim());
        eprintln!("  Collection: {collection}");
        eprintln!("  Policy: {:?}", config.agentic.policy);
        eprintln!(
            "  Max iterations: {}, budget: {}s",
            limits.max_iterations,
            limits.query_budget.as_secs()
        );
    }

    let ctx = AppContext::open(config, &collection).await?;
    let orchestrator = ctx.orchestrator(params, limits)?;
    let response = orchestrator
        .run(&collection, &args.question)
        .await
        .context("agentic query failed")?;

    print!("{}", formatter.format_agent_response(&response));
    Ok(())
}
