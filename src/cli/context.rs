//! Wiring shared by the commands: one provider, one vector store and the
//! lexical index, built from configuration.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::models::{Config, validate_collection_name};
use crate::services::tool_bridge::ToolBridge;
use crate::services::{
    AgentLimits, EmbeddingProvider, HybridRetriever, Ingestor, LexicalIndex, Orchestrator,
    RetrievalParams, ToolRouter, VectorStore, create_backend, create_policy, create_provider,
    create_reranker,
};
use crate::utils::retry::RetryConfig;

pub struct AppContext {
    pub config: Config,
    pub provider: Arc<dyn EmbeddingProvider>,
    pub store: Arc<dyn VectorStore>,
    pub lexical: Arc<LexicalIndex>,
}

impl AppContext {
    /// Connect to the configured backends and load the lexical snapshot of
    /// `collection`.
    pub async fn open(config: Config, collection: &str) -> Result<Self> {
        validate_collection_name(collection)?;
        let provider = create_provider(&config.embedding).context("failed to create embedding provider")?;
        let store = create_backend(&config)
            .await
            .context("failed to open vector store")?;

        let ctx = Self {
            config,
            provider,
            store,
            lexical: Arc::new(LexicalIndex::new()),
        };
        if let Some(path) = ctx.lexical_snapshot(collection) {
            ctx.lexical
                .load_collection(collection, &path)
                .with_context(|| format!("failed to load lexical index {}", path.display()))?;
        }
        Ok(ctx)
    }

    /// `<data_dir>/lexical/<collection>.json`
    pub fn lexical_snapshot(&self, collection: &str) -> Option<PathBuf> {
        self.config
            .data_dir()
            .map(|dir| dir.join("lexical").join(format!("{collection}.json")))
    }

    /// Write the lexical index and any buffered vector state to disk.
    pub async fn persist(&self, collection: &str) -> Result<()> {
        if let Some(path) = self.lexical_snapshot(collection) {
            self.lexical
                .save_collection(collection, &path)
                .with_context(|| format!("failed to save lexical index {}", path.display()))?;
        }
        self.store.flush().await.context("failed to flush vector store")?;
        Ok(())
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig::new(self.config.vector_store.max_attempts)
    }

    pub fn ingestor(&self) -> Ingestor {
        let embedding = &self.config.embedding;
        Ingestor::new(self.provider.clone(), self.store.clone(), self.lexical.clone())
            .with_chunking(self.config.chunking.strategy, (&self.config.chunking).into())
            .with_batching(embedding.batch_size, embedding.concurrency)
            .with_retry(self.retry())
    }

    pub fn retriever(&self) -> Result<HybridRetriever> {
        let reranker = create_reranker(&self.config.retrieval, self.config.embedding.timeout_secs)
            .context("failed to create reranker")?;
        Ok(
            HybridRetriever::new(self.provider.clone(), self.store.clone(), self.lexical.clone())
                .with_reranker(reranker)
                .with_retry(self.retry()),
        )
    }

    /// `None` when no tool servers are configured.
    pub fn tool_router(&self) -> Result<Option<ToolRouter>> {
        let servers = &self.config.tools.servers;
        if servers.is_empty() {
            return Ok(None);
        }
        let router = ToolRouter::from_config(servers, self.config.agentic.tool_timeout_secs)
            .context("failed to create tool clients")?;
        Ok(Some(router))
    }

    pub fn orchestrator(&self, params: RetrievalParams, limits: AgentLimits) -> Result<Orchestrator> {
        let policy = create_policy(&self.config).context("failed to create sufficiency policy")?;
        let tools = self
            .tool_router()?
            .map(|router| Arc::new(router) as Arc<dyn ToolBridge>);
        Ok(Orchestrator::new(self.retriever()?, policy)
            .with_tools(tools)
            .with_params(params)
            .with_limits(limits))
    }
}

/// Ask for confirmation on stdin; anything but `y` declines.
pub fn confirm(prompt: &str) -> Result<bool> {
    println!("{prompt} [y/N]");
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}
