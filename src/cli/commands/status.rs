use anyhow::Result;

use crate::cli::output::{EmbeddingStatus, StatusInfo, ToolServerStatus, VectorStoreStatus, get_formatter};
use crate::models::{Config, EmbeddingProviderKind, OutputFormat, VectorDriver};
use crate::services::{EmbeddingClient, LexicalIndex, ToolRouter, create_backend};

pub async fn handle_status(format: OutputFormat, _verbose: bool) -> Result<()> {
    let config = Config::load()?.config;
    let formatter = get_formatter(format);

    let embedding = embedding_status(&config).await;
    let vector_store = vector_store_status(&config).await;
    let tool_servers = tool_server_status(&config).await;

    let status = StatusInfo {
        embedding,
        vector_store,
        tool_servers,
    };
    print!("{}", formatter.format_status(&status));

    if !status.embedding.healthy {
        eprintln!("\nHint: embedding server unreachable. Queries will run lexical-only.");
    }
    if !status.vector_store.connected {
        match config.vector_store.driver {
            VectorDriver::Qdrant => {
                eprintln!("Warning: Qdrant not running. Start with: docker-compose up -d qdrant");
            }
            VectorDriver::PostgreSQL => {
                eprintln!("Warning: PostgreSQL not accessible. Check connection settings.");
            }
            VectorDriver::Memory => {
                eprintln!("Warning: local vector snapshot could not be loaded.");
            }
        }
    }

    Ok(())
}

async fn embedding_status(config: &Config) -> EmbeddingStatus {
    let e = &config.embedding;
    let mut status = EmbeddingStatus {
        provider: format!("{:?}", e.provider).to_lowercase(),
        url: None,
        model: e.model_id.clone(),
        dimension: e.dimension,
        healthy: true,
        error: None,
    };
    if e.provider == EmbeddingProviderKind::Http {
        status.url = Some(e.url.clone());
        let checked = match EmbeddingClient::new(e) {
            Ok(client) => client.health_check().await.map(|_| ()),
            Err(err) => Err(err),
        };
        if let Err(err) = checked {
            status.healthy = false;
            status.error = Some(err.to_string());
        }
    }
    status
}

async fn vector_store_status(config: &Config) -> VectorStoreStatus {
    let collection = config.vector_store.collection.clone();
    let lexical = LexicalIndex::new();
    let lexical_chunks = config
        .data_dir()
        .map(|dir| dir.join("lexical").join(format!("{collection}.json")))
        .and_then(|path| lexical.load_collection(&collection, &path).ok())
        .map_or(0, |()| lexical.len(&collection));

    let mut status = VectorStoreStatus {
        driver: config.vector_store.driver.to_string(),
        url: match config.vector_store.driver {
            VectorDriver::Memory => config
                .data_dir()
                .map(|d| d.join("vectors.json").display().to_string())
                .unwrap_or_else(|| "(in memory)".to_string()),
            _ => config.vector_store.url.clone(),
        },
        connected: false,
        collection: collection.clone(),
        points: 0,
        dimension: None,
        lexical_chunks,
        error: None,
    };

    let store = match create_backend(config).await {
        Ok(store) => store,
        Err(e) => {
            status.error = Some(e.to_string());
            return status;
        }
    };
    if let Err(e) = store.health_check().await {
        status.error = Some(e.to_string());
        return status;
    }
    status.connected = true;
    match store.collection_info(&collection).await {
        Ok(Some(info)) => {
            status.points = info.points_count;
            status.dimension = Some(info.dimension);
        }
        Ok(None) => {}
        Err(e) => status.error = Some(e.to_string()),
    }
    status
}

async fn tool_server_status(config: &Config) -> Vec<ToolServerStatus> {
    let router = match ToolRouter::from_config(&config.tools.servers, config.agentic.tool_timeout_secs) {
        Ok(router) => router,
        Err(e) => {
            return config
                .tools
                .servers
                .iter()
                .map(|s| ToolServerStatus {
                    name: s.name.clone(),
                    url: s.url.clone(),
                    reachable: false,
                    tools: 0,
                    error: Some(e.to_string()),
                })
                .collect();
        }
    };

    router
        .list_by_server()
        .await
        .into_iter()
        .zip(&config.tools.servers)
        .map(|((name, listed), server)| match listed {
            Ok(tools) => ToolServerStatus {
                name,
                url: server.url.clone(),
                reachable: true,
                tools: tools.len(),
                error: None,
            },
            Err(e) => ToolServerStatus {
                name,
                url: server.url.clone(),
                reachable: false,
                tools: 0,
                error: Some(e.to_string()),
            },
        })
        .collect()
}
