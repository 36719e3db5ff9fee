use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;

use crate::cli::context::AppContext;
use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat};
use crate::services::RetrievalParams;

#[derive(Debug, Args)]
pub struct SearchArgs {
    #[arg(required = true, help = "Search query text")]
    pub query: String,

    #[arg(long, short = 'c', help = "Collection to search")]
    pub collection: Option<String>,

    #[arg(long, short = 'n', help = "Maximum number of candidates per source")]
    pub limit: Option<usize>,

    #[arg(long, help = "Size of the final (reranked) list")]
    pub rerank_top: Option<usize>,

    #[arg(long, help = "Minimum fused score threshold (0.0-1.0)")]
    pub min_score: Option<f32>,

    #[arg(long, help = "Rerank the final list")]
    pub rerank: bool,
}

pub async fn handle_search(args: SearchArgs, format: OutputFormat, verbose: bool) -> Result<()> {
    let query = args.query.trim();
    if query.is_empty() {
        anyhow::bail!("search query cannot be empty");
    }

    let mut config = Config::load()?.config;
    if args.rerank {
        config.retrieval.rerank = true;
    }
    let collection = args
        .collection
        .unwrap_or_else(|| config.vector_store.collection.clone());
    let formatter = get_formatter(format);
    let start_time = Instant::now();

    let mut params = RetrievalParams::from(&config.retrieval);
    if let Some(limit) = args.limit {
        params = params.with_top_k(limit);
    }
    if let Some(top) = args.rerank_top {
        params = params.with_top_k_rerank(top);
    }
    if args.min_score.is_some() {
        params = params.with_relevance_threshold(args.min_score);
    }
    params.validate()?;

    if verbose {
        eprintln!("Query: \"{query}\"");
        eprintln!("  Collection: {collection}");
        eprintln!("  Candidates: {}, final: {}", params.top_k, params.limit());
        eprintln!(
            "  Weights: vector {:.2}, lexical {:.2}",
            params.vector_weight, params.lexical_weight
        );
        if let Some(score) = params.relevance_threshold {
            eprintln!("  Min score: {score:.3}");
        }
    }

    let ctx = AppContext::open(config, &collection).await?;
    let retriever = ctx.retriever()?;
    let results = retriever
        .search(&collection, query, &params)
        .await
        .context("search failed")?;

    if verbose {
        eprintln!("Total: {}ms\n", start_time.elapsed().as_millis());
    }

    print!("{}", formatter.format_search_results(&results));
    Ok(())
}
