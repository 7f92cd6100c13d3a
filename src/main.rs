//! Stacks server binary.
//!
//! Wires the core library together - profile, vector store, BM25 snapshot,
//! embedding service, providers, indexer, chat controller - and serves the
//! HTTP API. For library usage, import from the `stacks` crate instead.

use std::sync::Arc;

use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stacks::catalog::{JsonCatalogue, LopdfExtractor};
use stacks::chat::{system_prompt, ConversationStore, ResearchChat};
use stacks::db::{collection_name, EmbeddedVectorStore, SparseIndex};
use stacks::migrate::{MetadataMigration, MetadataVersionManager};
use stacks::profile::ProfileManager;
use stacks::rag::{EmbeddingService, HybridRetriever};
use stacks::{AppState, Indexer, ProviderManager, ProviderRegistry, VectorStore};

/// Stacks - local research-assistant server.
#[derive(Debug, Parser)]
#[command(name = "stacks-server", version, about)]
struct Cli {
    /// Address to bind.
    #[arg(long, default_value = "127.0.0.1", env = "STACKS_HOST")]
    host: String,

    /// Port to bind.
    #[arg(long, default_value_t = 8000, env = "STACKS_PORT")]
    port: u16,

    /// Base data directory (profiles live beneath it).
    #[arg(long, default_value = "./data", env = "STACKS_DATA_DIR")]
    data_dir: String,

    /// Profile name.
    #[arg(long, default_value = "default", env = "STACKS_PROFILE")]
    profile: String,

    /// Catalogue file (JSON item list). Overrides the stored setting.
    #[arg(long, env = "STACKS_CATALOGUE")]
    catalogue: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,stacks=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Stacks research-assistant server");

    // Profile and settings.
    let profile = Arc::new(ProfileManager::new(&cli.data_dir, &cli.profile)?);
    let settings = profile.load_settings();
    let embedding_model = settings.embedding_model;

    // Catalogue and PDF extraction.
    let catalogue_path = cli
        .catalogue
        .map(std::path::PathBuf::from)
        .or(settings.catalogue_path.clone())
        .ok_or_else(|| {
            anyhow::anyhow!("no catalogue configured; pass --catalogue or set it in settings.json")
        })?;
    let catalogue: Arc<dyn stacks::catalog::CatalogueReader> =
        Arc::new(JsonCatalogue::new(catalogue_path));
    let pdf = Arc::new(LopdfExtractor);

    // One collection per embedding model, plus the sibling BM25 snapshot.
    let store: Arc<dyn VectorStore> = Arc::new(EmbeddedVectorStore::open(
        profile.model_dir(embedding_model),
        &collection_name(&embedding_model.to_string()),
        embedding_model.dimension(),
    )?);
    let sparse = Arc::new(SparseIndex::new(profile.bm25_path(embedding_model)));
    tracing::info!(
        collection = store.collection_name(),
        model = %embedding_model,
        "vector store opened"
    );

    // Local models.
    #[cfg(feature = "local-embeddings")]
    let (embeddings, cross_encoder) = {
        let embeddings = Arc::new(EmbeddingService::local(embedding_model));
        let cross_encoder: Arc<dyn stacks::rag::CrossEncoder> =
            Arc::new(stacks::rag::reranker::FastembedCrossEncoder::new()?);
        (embeddings, cross_encoder)
    };
    #[cfg(not(feature = "local-embeddings"))]
    let (embeddings, cross_encoder): (
        Arc<EmbeddingService>,
        Arc<dyn stacks::rag::CrossEncoder>,
    ) = {
        anyhow::bail!(
            "built without the 'local-embeddings' feature; no embedding backend available"
        );
    };

    // Providers.
    let provider = Arc::new(ProviderManager::new(
        ProviderRegistry::standard(),
        settings.active_provider,
        settings.active_model.clone(),
    ));
    for (kind, provider_settings) in &settings.providers {
        if provider_settings.enabled {
            provider.set_credentials(*kind, provider_settings.credentials.clone());
        }
    }

    // Core components.
    let indexer = Arc::new(Indexer::new(
        catalogue.clone(),
        pdf,
        embeddings.clone(),
        store.clone(),
        sparse.clone(),
        embedding_model,
    ));
    let retriever = Arc::new(HybridRetriever::new(
        store.clone(),
        sparse,
        embeddings,
        cross_encoder,
        embedding_model,
    ));
    let versions = Arc::new(MetadataVersionManager::new(store.clone()));
    let migration = Arc::new(MetadataMigration::new(store.clone(), catalogue.clone()));
    let conversations = Arc::new(ConversationStore::new(system_prompt(None)));
    let chat = Arc::new(ResearchChat::new(
        store.clone(),
        retriever,
        provider.clone(),
        conversations,
        versions.clone(),
    ));

    let state = AppState {
        chat,
        indexer,
        provider,
        versions,
        migration,
        profile,
        store,
        catalogue,
        embedding_model,
    };

    let app = stacks::api::routes(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let addr = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
