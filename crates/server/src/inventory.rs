//! Read-only inventory endpoints:
//! - `GET /api/inventory?limit=N`: first N vehicles plus the total
//! - `GET /api/inventory/{stock_number}`: one vehicle, 404 when unknown
//! - `GET /api/stats`: availability, price and category summary

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use autoxloo_core::catalog::InMemoryCatalog;
use autoxloo_core::domain::vehicle::{StockNumber, VehicleRecord};
use autoxloo_core::errors::ApplicationError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 200;

#[derive(Clone)]
pub struct InventoryState {
    catalog: Arc<InMemoryCatalog>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InventoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct InventoryPage {
    pub total: usize,
    pub vehicles: Vec<VehicleRecord>,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct InventoryCounts {
    pub total_vehicles: usize,
    pub available: usize,
    pub featured: usize,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct PriceRange {
    pub min: u32,
    pub max: u32,
    pub avg: u32,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct InventoryStats {
    pub inventory: InventoryCounts,
    pub price_range: PriceRange,
    pub categories: BTreeMap<&'static str, usize>,
}

pub fn router(catalog: Arc<InMemoryCatalog>) -> Router {
    Router::new()
        .route("/api/inventory", get(list_inventory))
        .route("/api/inventory/{stock_number}", get(get_vehicle))
        .route("/api/stats", get(stats))
        .with_state(InventoryState { catalog })
}

async fn list_inventory(
    State(state): State<InventoryState>,
    Query(query): Query<InventoryQuery>,
) -> Json<InventoryPage> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let records = state.catalog.records();
    Json(InventoryPage {
        total: records.len(),
        vehicles: records.iter().take(limit).cloned().collect(),
    })
}

async fn get_vehicle(
    State(state): State<InventoryState>,
    Path(stock_number): Path<String>,
) -> Result<Json<VehicleRecord>, ApiError> {
    let stock_number = StockNumber::normalized(&stock_number);
    state.catalog.lookup(&stock_number).cloned().map(Json).ok_or_else(|| {
        let missing = ApplicationError::NotFound(format!("vehicle {stock_number} not found"));
        ApiError(missing.into_interface(Uuid::new_v4().to_string()))
    })
}

async fn stats(State(state): State<InventoryState>) -> Json<InventoryStats> {
    Json(summarize(state.catalog.records()))
}

pub fn summarize(records: &[VehicleRecord]) -> InventoryStats {
    let mut categories = BTreeMap::new();
    for record in records {
        *categories.entry(record.category.as_str()).or_insert(0) += 1;
    }

    let prices = records.iter().map(|record| record.price);
    let total: u64 = prices.clone().map(u64::from).sum();
    let price_range = PriceRange {
        min: prices.clone().min().unwrap_or(0),
        max: prices.max().unwrap_or(0),
        avg: u64::checked_div(total, records.len() as u64)
            .and_then(|avg| u32::try_from(avg).ok())
            .unwrap_or(0),
    };

    InventoryStats {
        inventory: InventoryCounts {
            total_vehicles: records.len(),
            available: records.iter().filter(|record| record.available).count(),
            featured: records.iter().filter(|record| record.featured).count(),
        },
        price_range,
        categories,
    }
}
