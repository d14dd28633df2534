use std::env;
use std::fs;
use std::path::Path;

use crate::commands::CommandResult;
use autoxloo_core::config::{resolve_config_path, AppConfig, LoadOptions};
use toml::Value;

struct Field {
    key_path: &'static str,
    env_keys: &'static [&'static str],
    value: String,
}

impl Field {
    fn new(key_path: &'static str, env_keys: &'static [&'static str], value: String) -> Self {
        Self { key_path, env_keys, value }
    }
}

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult {
                exit_code: 2,
                output: format!("config validation failed: {error}"),
            };
        }
    };

    let config_file_path = resolve_config_path(None);
    let config_file_doc = config_file_path.as_deref().and_then(load_config_file_doc);

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key_path,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(format!("- {} = {} (source: {source})", field.key_path, field.value));
    }

    CommandResult { exit_code: 0, output: lines.join("\n") }
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let api_key = if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" };

    vec![
        Field::new("database.url", &["AUTOXLOO_DATABASE_URL"], config.database.url.clone()),
        Field::new(
            "database.max_connections",
            &["AUTOXLOO_DATABASE_MAX_CONNECTIONS"],
            config.database.max_connections.to_string(),
        ),
        Field::new(
            "llm.provider",
            &["AUTOXLOO_LLM_PROVIDER"],
            format!("{:?}", config.llm.provider),
        ),
        Field::new("llm.model", &["AUTOXLOO_LLM_MODEL"], config.llm.model.clone()),
        Field::new(
            "llm.base_url",
            &["AUTOXLOO_LLM_BASE_URL"],
            config.llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
        ),
        Field::new("llm.api_key", &["AUTOXLOO_LLM_API_KEY"], api_key.to_string()),
        Field::new(
            "server.bind_address",
            &["AUTOXLOO_SERVER_BIND_ADDRESS"],
            config.server.bind_address.clone(),
        ),
        Field::new("server.port", &["AUTOXLOO_SERVER_PORT"], config.server.port.to_string()),
        Field::new(
            "server.cors_origins",
            &["AUTOXLOO_SERVER_CORS_ORIGINS"],
            config.server.cors_origins.join(","),
        ),
        Field::new(
            "router.classifier",
            &["AUTOXLOO_ROUTER_CLASSIFIER"],
            format!("{:?}", config.router.classifier),
        ),
        Field::new(
            "router.confidence_floor",
            &["AUTOXLOO_ROUTER_CONFIDENCE_FLOOR"],
            config.router.confidence_floor.to_string(),
        ),
        Field::new(
            "executor.max_retries",
            &["AUTOXLOO_EXECUTOR_MAX_RETRIES"],
            config.executor.max_retries.to_string(),
        ),
        Field::new(
            "conversation.idle_timeout_secs",
            &["AUTOXLOO_CONVERSATION_IDLE_TIMEOUT_SECS"],
            config.conversation.idle_timeout_secs.to_string(),
        ),
        Field::new(
            "catalog.inventory_path",
            &["AUTOXLOO_CATALOG_INVENTORY_PATH"],
            config.catalog.inventory_path.display().to_string(),
        ),
        Field::new(
            "logging.level",
            &["AUTOXLOO_LOGGING_LEVEL", "AUTOXLOO_LOG_LEVEL"],
            config.logging.level.clone(),
        ),
        Field::new(
            "logging.format",
            &["AUTOXLOO_LOGGING_FORMAT", "AUTOXLOO_LOG_FORMAT"],
            format!("{:?}", config.logging.format),
        ),
    ]
}

fn load_config_file_doc(path: &Path) -> Option<Value> {
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}
