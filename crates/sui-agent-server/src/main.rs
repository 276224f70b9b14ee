mod configuration;
mod error;
mod routes;
mod secret;
mod state;

use configuration::{EmbeddingBackend, Settings};
use secret::PrivateKey;
use state::AppState;
use std::sync::Arc;
use sui_agent::{
    agent::Agent,
    chat::ChatService,
    providers::{
        base::Provider,
        embedding::{Embedder, OpenAiEmbedder},
        local_embedding::FastEmbedder,
        openai::OpenAiProvider,
    },
    rag::Retriever,
    registry::ToolRegistry,
    session::SessionStore,
    systems::{DocumentationSystem, McpSystem},
};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // Initialize tracing for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // The key leaves this process's environment before anything else runs
    let private_key = PrivateKey::take_from_env()?;

    let settings = Settings::new()?;

    let provider: Arc<dyn Provider> = Arc::new(OpenAiProvider::new(settings.provider_config())?);

    let mut registry = ToolRegistry::new();

    match settings.mcp.server_config(&private_key) {
        Some(mcp_config) => {
            let system = McpSystem::spawn(mcp_config).await?;
            registry.add_system(Arc::new(system));
        }
        None => info!("No MCP server command configured, skipping wallet tools"),
    }
    drop(private_key);

    let retriever = async {
        let embedder = build_embedder(&settings).await?;
        let retriever = Retriever::load_or_build(&settings.rag.to_config(), embedder).await?;
        Ok::<_, anyhow::Error>(retriever)
    }
    .await;
    match retriever {
        Ok(Some(retriever)) => {
            registry.add_system(Arc::new(DocumentationSystem::new(
                Arc::new(retriever),
                provider.clone(),
            )));
            info!("DocumentationQA tool added");
        }
        Ok(None) => info!("No documents to index, DocumentationQA tool not added"),
        Err(e) => tracing::warn!(
            "Failed to prepare the document index, DocumentationQA tool not added: {:#}",
            e
        ),
    }

    let agent = Agent::new(provider).with_max_turns(settings.agent.max_turns);
    let chat = ChatService::new(
        Arc::new(SessionStore::new()),
        Arc::new(agent),
        Arc::new(registry),
    );

    // Create router with CORS support
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::configure(AppState::new(chat)).layer(cors);

    let listener = tokio::net::TcpListener::bind(settings.server.socket_addr()?).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn build_embedder(settings: &Settings) -> anyhow::Result<Arc<dyn Embedder>> {
    match settings.embedding.backend {
        EmbeddingBackend::Local => {
            let cache_dir = settings.embedding.cache_dir();
            let embedder =
                tokio::task::spawn_blocking(move || FastEmbedder::new(cache_dir)).await??;
            Ok(Arc::new(embedder))
        }
        EmbeddingBackend::Remote => Ok(Arc::new(OpenAiEmbedder::new(
            settings.embedding_config(),
        )?)),
    }
}
