use std::collections::BTreeMap;

use crate::commands::CommandResult;
use autoxloo_core::catalog::InMemoryCatalog;
use autoxloo_core::config::{AppConfig, LoadOptions};

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "inventory",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let path = &config.catalog.inventory_path;
    let catalog = match InMemoryCatalog::from_json_file(path) {
        Ok(catalog) => catalog,
        Err(error) => {
            return CommandResult::failure("inventory", "inventory_load", error.to_string(), 4);
        }
    };

    let mut categories: BTreeMap<&str, usize> = BTreeMap::new();
    for record in catalog.records() {
        *categories.entry(record.category.as_str()).or_insert(0) += 1;
    }
    let available = catalog.records().iter().filter(|record| record.available).count();
    let breakdown = categories
        .iter()
        .map(|(category, count)| format!("{category}={count}"))
        .collect::<Vec<_>>()
        .join(", ");

    CommandResult::success(
        "inventory",
        format!(
            "{} vehicles ({available} available) from {}: {breakdown}",
            catalog.len(),
            path.display()
        ),
    )
}
