use std::sync::Arc;

use autoxloo_agent::{
    ConversationStore, IntentRouter, LlmClassifier, LlmClient, LlmError, NarrativePolisher,
    OpenAiCompatibleClient, Orchestrator, QualifierAgent, ResearchAgent, RouterSettings,
    SchedulerAgent,
};
use autoxloo_core::catalog::{CatalogError, HashingEmbedder, InMemoryCatalog, InMemoryVectorIndex};
use autoxloo_core::clock::{Clock, SystemClock};
use autoxloo_core::config::{AppConfig, ClassifierKind, LlmProvider};
use autoxloo_core::executor::{InMemoryIdempotencyStore, ToolExecutor, ToolServices};
use autoxloo_core::retriever::KnowledgeRetriever;
use autoxloo_db::repositories::{SqlDeliveryRepository, SqlLeadRepository, SqlReservationRepository};
use autoxloo_db::{connect_with_settings, migrations, DbPool, LocalCalendar, LocalCrm, LocalEmail};
use thiserror::Error;
use tracing::{info, warn};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub catalog: Arc<InMemoryCatalog>,
    pub store: Arc<ConversationStore>,
    pub orchestrator: Arc<Orchestrator>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("inventory could not be loaded: {0}")]
    Catalog(#[from] CatalogError),
    #[error("language model client could not be built: {0}")]
    Llm(#[from] LlmError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let catalog = Arc::new(InMemoryCatalog::from_json_file(&config.catalog.inventory_path)?);
    let embedder = HashingEmbedder::new();
    let index = InMemoryVectorIndex::build(&embedder, catalog.records());
    info!(
        event_name = "system.bootstrap.inventory_loaded",
        correlation_id = "bootstrap",
        vehicles = catalog.len(),
        path = %config.catalog.inventory_path.display(),
        "inventory loaded and indexed"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let services = ToolServices {
        calendar: Arc::new(LocalCalendar::new(
            Arc::new(SqlReservationRepository::new(db_pool.clone())),
            clock.clone(),
        )),
        crm: Arc::new(LocalCrm::new(
            Arc::new(SqlLeadRepository::new(db_pool.clone())),
            clock.clone(),
        )),
        email: Arc::new(LocalEmail::new(
            Arc::new(SqlDeliveryRepository::new(db_pool.clone())),
            clock.clone(),
        )),
    };
    let executor = ToolExecutor::with_config(
        services,
        Arc::new(InMemoryIdempotencyStore::new()),
        config.executor.to_executor_config(),
    );

    let llm = llm_client(&config)?;
    let polisher = match &llm {
        Some(client) => NarrativePolisher::new(client.clone(), config.llm.timeout()),
        None => NarrativePolisher::disabled(),
    };

    let settings = RouterSettings {
        history_window: config.router.history_window,
        confidence_floor: config.router.confidence_floor,
        timeout: config.llm.timeout(),
    };
    let router = match (config.router.classifier, &llm) {
        (ClassifierKind::Llm, Some(client)) => IntentRouter::new(
            Arc::new(LlmClassifier::new(client.clone(), config.llm.timeout())),
            settings,
        ),
        (ClassifierKind::Llm, None) => {
            warn!(
                event_name = "system.bootstrap.classifier_fallback",
                correlation_id = "bootstrap",
                "llm classifier requested without a language model, using keywords"
            );
            IntentRouter::keyword(settings)
        }
        (ClassifierKind::Keyword, _) => IntentRouter::keyword(settings),
    };

    let retriever = KnowledgeRetriever::new(
        Arc::new(embedder),
        Arc::new(index),
        catalog.clone(),
        config.catalog.to_retriever_config(),
    );
    let store =
        Arc::new(ConversationStore::new(clock.clone(), config.conversation.idle_timeout()));
    let orchestrator = Orchestrator::new(store.clone(), router, clock)
        .with_agent(Arc::new(ResearchAgent::new(retriever, polisher.clone())))
        .with_agent(Arc::new(QualifierAgent::new(executor.clone(), polisher.clone())))
        .with_agent(Arc::new(SchedulerAgent::new(executor, catalog.clone(), polisher)));

    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        agents = ?orchestrator.registered_agents(),
        llm_provider = ?config.llm.provider,
        "orchestrator assembled"
    );

    Ok(Application { config, db_pool, catalog, store, orchestrator: Arc::new(orchestrator) })
}

fn llm_client(config: &AppConfig) -> Result<Option<Arc<dyn LlmClient>>, BootstrapError> {
    let base_url = match config.llm.provider {
        LlmProvider::Disabled => return Ok(None),
        LlmProvider::OpenAi => config
            .llm
            .base_url
            .clone()
            .unwrap_or_else(|| OpenAiCompatibleClient::OPENAI_BASE_URL.to_string()),
        LlmProvider::Ollama => config
            .llm
            .base_url
            .clone()
            .unwrap_or_else(|| OpenAiCompatibleClient::OLLAMA_BASE_URL.to_string()),
    };
    let client = OpenAiCompatibleClient::new(
        base_url,
        config.llm.api_key.clone(),
        config.llm.model.clone(),
        config.llm.timeout(),
    )?;
    Ok(Some(Arc::new(client)))
}
