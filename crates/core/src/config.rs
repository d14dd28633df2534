use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::executor::ToolExecutorConfig;
use crate::retriever::RetrieverConfig;

pub const DEFAULT_CONFIG_FILE: &str = "autoxloo.toml";
pub const ENV_PREFIX: &str = "AUTOXLOO_";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub server: ServerConfig,
    pub router: RouterConfig,
    pub executor: ExecutorConfig,
    pub conversation: ConversationConfig,
    pub catalog: CatalogConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct RouterConfig {
    pub classifier: ClassifierKind,
    /// Prior messages handed to the classifier alongside the new one.
    pub history_window: usize,
    pub confidence_floor: f32,
}

#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_backoff_multiplier: u32,
    pub call_timeout_ms: u64,
}

#[derive(Clone, Debug)]
pub struct ConversationConfig {
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Clone, Debug)]
pub struct CatalogConfig {
    pub inventory_path: PathBuf,
    pub candidate_pool: usize,
    pub retrieval_timeout_ms: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    /// No language model; every LLM-assisted step uses its deterministic path.
    Disabled,
    #[serde(rename = "openai")]
    OpenAi,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    Keyword,
    Llm,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub server_port: Option<u16>,
    pub inventory_path: Option<PathBuf>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://autoxloo.db?mode=rwc".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Disabled,
                api_key: None,
                base_url: None,
                model: "gpt-4o-mini".to_string(),
                timeout_secs: 10,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8000,
                cors_origins: vec![
                    "http://localhost:3000".to_string(),
                    "http://localhost:5173".to_string(),
                ],
                graceful_shutdown_secs: 15,
            },
            router: RouterConfig {
                classifier: ClassifierKind::Keyword,
                history_window: 6,
                confidence_floor: 0.5,
            },
            executor: ExecutorConfig {
                max_retries: 2,
                retry_base_delay_ms: 500,
                retry_backoff_multiplier: 2,
                call_timeout_ms: 5_000,
            },
            conversation: ConversationConfig {
                idle_timeout_secs: 30 * 60,
                sweep_interval_secs: 60,
            },
            catalog: CatalogConfig {
                inventory_path: PathBuf::from("data/dealership_inventory.json"),
                candidate_pool: 50,
                retrieval_timeout_ms: 5_000,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn is_enabled(&self) -> bool {
        self.provider != LlmProvider::Disabled
    }
}

impl ExecutorConfig {
    pub fn to_executor_config(&self) -> ToolExecutorConfig {
        ToolExecutorConfig {
            max_retries: self.max_retries,
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms),
            retry_backoff_multiplier: self.retry_backoff_multiplier,
            call_timeout: Duration::from_millis(self.call_timeout_ms),
        }
    }
}

impl ConversationConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl CatalogConfig {
    pub fn to_retriever_config(&self) -> RetrieverConfig {
        RetrieverConfig {
            candidate_pool: self.candidate_pool,
            timeout: Duration::from_millis(self.retrieval_timeout_ms),
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "disabled" | "none" => Ok(Self::Disabled),
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected disabled|openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for ClassifierKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "keyword" => Ok(Self::Keyword),
            "llm" => Ok(Self::Llm),
            other => Err(ConfigError::Validation(format!(
                "unsupported router classifier `{other}` (expected keyword|llm)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(cors_origins) = server.cors_origins {
                self.server.cors_origins = cors_origins;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(router) = patch.router {
            if let Some(classifier) = router.classifier {
                self.router.classifier = classifier;
            }
            if let Some(history_window) = router.history_window {
                self.router.history_window = history_window;
            }
            if let Some(confidence_floor) = router.confidence_floor {
                self.router.confidence_floor = confidence_floor;
            }
        }

        if let Some(executor) = patch.executor {
            if let Some(max_retries) = executor.max_retries {
                self.executor.max_retries = max_retries;
            }
            if let Some(retry_base_delay_ms) = executor.retry_base_delay_ms {
                self.executor.retry_base_delay_ms = retry_base_delay_ms;
            }
            if let Some(retry_backoff_multiplier) = executor.retry_backoff_multiplier {
                self.executor.retry_backoff_multiplier = retry_backoff_multiplier;
            }
            if let Some(call_timeout_ms) = executor.call_timeout_ms {
                self.executor.call_timeout_ms = call_timeout_ms;
            }
        }

        if let Some(conversation) = patch.conversation {
            if let Some(idle_timeout_secs) = conversation.idle_timeout_secs {
                self.conversation.idle_timeout_secs = idle_timeout_secs;
            }
            if let Some(sweep_interval_secs) = conversation.sweep_interval_secs {
                self.conversation.sweep_interval_secs = sweep_interval_secs;
            }
        }

        if let Some(catalog) = patch.catalog {
            if let Some(inventory_path) = catalog.inventory_path {
                self.catalog.inventory_path = inventory_path;
            }
            if let Some(candidate_pool) = catalog.candidate_pool {
                self.catalog.candidate_pool = candidate_pool;
            }
            if let Some(retrieval_timeout_ms) = catalog.retrieval_timeout_ms {
                self.catalog.retrieval_timeout_ms = retrieval_timeout_ms;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("AUTOXLOO_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("AUTOXLOO_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_env("AUTOXLOO_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("AUTOXLOO_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("AUTOXLOO_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("AUTOXLOO_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("AUTOXLOO_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("AUTOXLOO_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("AUTOXLOO_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("AUTOXLOO_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_env("AUTOXLOO_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("AUTOXLOO_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("AUTOXLOO_SERVER_PORT") {
            self.server.port = parse_env("AUTOXLOO_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("AUTOXLOO_SERVER_CORS_ORIGINS") {
            self.server.cors_origins = value
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(value) = read_env("AUTOXLOO_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_env("AUTOXLOO_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("AUTOXLOO_ROUTER_CLASSIFIER") {
            self.router.classifier = value.parse()?;
        }
        if let Some(value) = read_env("AUTOXLOO_ROUTER_HISTORY_WINDOW") {
            self.router.history_window = parse_env("AUTOXLOO_ROUTER_HISTORY_WINDOW", &value)?;
        }
        if let Some(value) = read_env("AUTOXLOO_ROUTER_CONFIDENCE_FLOOR") {
            self.router.confidence_floor = parse_env("AUTOXLOO_ROUTER_CONFIDENCE_FLOOR", &value)?;
        }

        if let Some(value) = read_env("AUTOXLOO_EXECUTOR_MAX_RETRIES") {
            self.executor.max_retries = parse_env("AUTOXLOO_EXECUTOR_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("AUTOXLOO_EXECUTOR_RETRY_BASE_DELAY_MS") {
            self.executor.retry_base_delay_ms =
                parse_env("AUTOXLOO_EXECUTOR_RETRY_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("AUTOXLOO_EXECUTOR_CALL_TIMEOUT_MS") {
            self.executor.call_timeout_ms = parse_env("AUTOXLOO_EXECUTOR_CALL_TIMEOUT_MS", &value)?;
        }

        if let Some(value) = read_env("AUTOXLOO_CONVERSATION_IDLE_TIMEOUT_SECS") {
            self.conversation.idle_timeout_secs =
                parse_env("AUTOXLOO_CONVERSATION_IDLE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("AUTOXLOO_CATALOG_INVENTORY_PATH") {
            self.catalog.inventory_path = PathBuf::from(value);
        }

        let log_level =
            read_env("AUTOXLOO_LOGGING_LEVEL").or_else(|| read_env("AUTOXLOO_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("AUTOXLOO_LOGGING_FORMAT").or_else(|| read_env("AUTOXLOO_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(server_port) = overrides.server_port {
            self.server.port = server_port;
        }
        if let Some(inventory_path) = overrides.inventory_path {
            self.catalog.inventory_path = inventory_path;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_server(&self.server)?;
        validate_router(&self.router, &self.llm)?;
        validate_executor(&self.executor)?;
        validate_conversation(&self.conversation)?;
        validate_catalog(&self.catalog)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

/// The config file `load` would read, if any.
pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from("config").join(DEFAULT_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::Disabled => {}
        LlmProvider::OpenAi => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for the openai provider".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for the ollama provider".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    if let Some(origin) = server
        .cors_origins
        .iter()
        .find(|origin| !origin.starts_with("http://") && !origin.starts_with("https://"))
    {
        return Err(ConfigError::Validation(format!(
            "server.cors_origins entry `{origin}` must start with http:// or https://"
        )));
    }

    Ok(())
}

fn validate_router(router: &RouterConfig, llm: &LlmConfig) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&router.confidence_floor) {
        return Err(ConfigError::Validation(
            "router.confidence_floor must be in range 0.0..=1.0".to_string(),
        ));
    }

    if router.history_window > 50 {
        return Err(ConfigError::Validation(
            "router.history_window must be at most 50".to_string(),
        ));
    }

    if router.classifier == ClassifierKind::Llm && !llm.is_enabled() {
        return Err(ConfigError::Validation(
            "router.classifier = \"llm\" requires llm.provider to be openai or ollama".to_string(),
        ));
    }

    Ok(())
}

fn validate_executor(executor: &ExecutorConfig) -> Result<(), ConfigError> {
    if executor.max_retries > 10 {
        return Err(ConfigError::Validation("executor.max_retries must be at most 10".to_string()));
    }

    if executor.retry_backoff_multiplier == 0 {
        return Err(ConfigError::Validation(
            "executor.retry_backoff_multiplier must be greater than zero".to_string(),
        ));
    }

    if executor.call_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "executor.call_timeout_ms must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_conversation(conversation: &ConversationConfig) -> Result<(), ConfigError> {
    if conversation.idle_timeout_secs == 0 || conversation.sweep_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "conversation.idle_timeout_secs and conversation.sweep_interval_secs must be greater than zero"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_catalog(catalog: &CatalogConfig) -> Result<(), ConfigError> {
    if catalog.inventory_path.as_os_str().is_empty() {
        return Err(ConfigError::Validation("catalog.inventory_path must be set".to_string()));
    }

    if catalog.candidate_pool == 0 {
        return Err(ConfigError::Validation(
            "catalog.candidate_pool must be greater than zero".to_string(),
        ));
    }

    if catalog.retrieval_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "catalog.retrieval_timeout_ms must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    server: Option<ServerPatch>,
    router: Option<RouterPatch>,
    executor: Option<ExecutorPatch>,
    conversation: Option<ConversationPatch>,
    catalog: Option<CatalogPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    cors_origins: Option<Vec<String>>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RouterPatch {
    classifier: Option<ClassifierKind>,
    history_window: Option<usize>,
    confidence_floor: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct ExecutorPatch {
    max_retries: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    retry_backoff_multiplier: Option<u32>,
    call_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ConversationPatch {
    idle_timeout_secs: Option<u64>,
    sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CatalogPatch {
    inventory_path: Option<PathBuf>,
    candidate_pool: Option<usize>,
    retrieval_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::path::PathBuf;
    use std::sync::{Mutex, OnceLock};
    use std::time::Duration;

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{
        AppConfig, ClassifierKind, ConfigError, ConfigOverrides, LlmProvider, LoadOptions,
        LogFormat,
    };

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_match_documented_values() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.router.history_window == 6, "history window defaults to 6")?;
        ensure((config.router.confidence_floor - 0.5).abs() < f32::EPSILON, "floor is 0.5")?;
        ensure(config.router.classifier == ClassifierKind::Keyword, "keyword classifier")?;
        ensure(config.llm.provider == LlmProvider::Disabled, "llm disabled by default")?;
        ensure(config.llm.timeout() == Duration::from_secs(10), "llm timeout is 10s")?;

        let executor = config.executor.to_executor_config();
        ensure(executor.max_retries == 2, "two retries")?;
        ensure(executor.retry_base_delay == Duration::from_millis(500), "500ms base delay")?;
        ensure(executor.call_timeout == Duration::from_secs(5), "5s call timeout")?;
        ensure(
            config.conversation.idle_timeout() == Duration::from_secs(1800),
            "30 minute idle timeout",
        )?;
        ensure(
            config.server.cors_origins.contains(&"http://localhost:5173".to_string()),
            "vite dev origin allowed",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_AUTOXLOO_OPENAI_KEY", "sk-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("autoxloo.toml");
            fs::write(
                &path,
                r#"
[llm]
provider = "openai"
api_key = "${TEST_AUTOXLOO_OPENAI_KEY}"

[router]
classifier = "llm"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config
                    .llm
                    .api_key
                    .as_ref()
                    .is_some_and(|key| key.expose_secret() == "sk-from-env"),
                "api key should be loaded from environment",
            )?;
            ensure(config.router.classifier == ClassifierKind::Llm, "llm classifier selected")?;
            Ok(())
        })();

        clear_vars(&["TEST_AUTOXLOO_OPENAI_KEY"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("AUTOXLOO_LOG_LEVEL", "warn");
        env::set_var("AUTOXLOO_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["AUTOXLOO_LOG_LEVEL", "AUTOXLOO_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("AUTOXLOO_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("AUTOXLOO_SERVER_PORT", "9100");
        env::set_var("AUTOXLOO_SERVER_CORS_ORIGINS", "https://shop.example, http://localhost:3000");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("autoxloo.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[server]
port = 9000

[catalog]
inventory_path = "from-file.json"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.server.port == 9100, "env port should win over file")?;
            let expected_origins = ["https://shop.example", "http://localhost:3000"];
            ensure(
                config.server.cors_origins == expected_origins.map(str::to_string),
                "cors origins split from env",
            )?;
            ensure(
                config.catalog.inventory_path == PathBuf::from("from-file.json"),
                "file inventory path should win over default",
            )?;
            Ok(())
        })();

        clear_vars(&[
            "AUTOXLOO_DATABASE_URL",
            "AUTOXLOO_SERVER_PORT",
            "AUTOXLOO_SERVER_CORS_ORIGINS",
        ]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("AUTOXLOO_ROUTER_CONFIDENCE_FLOOR", "1.5");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("router.confidence_floor")
            );
            ensure(has_message, "validation failure should mention router.confidence_floor")
        })();

        clear_vars(&["AUTOXLOO_ROUTER_CONFIDENCE_FLOOR"]);
        result
    }

    #[test]
    fn llm_classifier_requires_a_provider() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("AUTOXLOO_ROUTER_CLASSIFIER", "llm");

        let result = (|| -> Result<(), String> {
            let error = AppConfig::load(LoadOptions::default())
                .err()
                .ok_or_else(|| "expected validation failure".to_string())?;
            let points_at_provider = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("llm.provider")
            );
            ensure(points_at_provider, "error should point at llm.provider")
        })();

        clear_vars(&["AUTOXLOO_ROUTER_CLASSIFIER"]);
        result
    }

    #[test]
    fn invalid_numeric_env_override_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("AUTOXLOO_EXECUTOR_MAX_RETRIES", "many");

        let result = (|| -> Result<(), String> {
            let error = AppConfig::load(LoadOptions::default())
                .err()
                .ok_or_else(|| "expected env override failure".to_string())?;
            ensure(
                matches!(
                    error,
                    ConfigError::InvalidEnvOverride { ref key, .. }
                        if key == "AUTOXLOO_EXECUTOR_MAX_RETRIES"
                ),
                "error should name the env var",
            )
        })();

        clear_vars(&["AUTOXLOO_EXECUTOR_MAX_RETRIES"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("AUTOXLOO_LLM_PROVIDER", "openai");
        env::set_var("AUTOXLOO_LLM_API_KEY", "sk-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("sk-secret-value"), "debug output should not contain api key")?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&["AUTOXLOO_LLM_PROVIDER", "AUTOXLOO_LLM_API_KEY"]);
        result
    }
}
