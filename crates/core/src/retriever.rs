//! Knowledge Retriever
//!
//! Semantic lookup over the vehicle catalog with structured post-filtering.
//! The vector collaborator is asked for an oversampled candidate pool, ids
//! are mapped back through the catalog, and the filters are applied after
//! the fact. Retrieval never fails the caller: a failing or slow vector
//! service degrades to a filtered catalog scan.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::vehicle::{VehicleCategory, VehicleRecord};
use crate::ports::{Embedder, ServiceError, VectorIndex, VehicleCatalog};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    pub category: Option<VehicleCategory>,
    pub max_price: Option<u32>,
    pub min_price: Option<u32>,
    pub make: Option<String>,
    /// Include vehicles flagged unavailable.
    #[serde(default)]
    pub include_unavailable: bool,
}

impl SearchFilters {
    pub fn matches(&self, record: &VehicleRecord) -> bool {
        self.matches_ignoring_price(record) && self.price_gap(record.price) == 0
    }

    fn matches_ignoring_price(&self, record: &VehicleRecord) -> bool {
        if !self.include_unavailable && !record.available {
            return false;
        }
        if self.category.is_some_and(|category| category != record.category) {
            return false;
        }
        match &self.make {
            Some(make) => record.make.eq_ignore_ascii_case(make),
            None => true,
        }
    }

    /// Dollars outside the `[min_price, max_price]` range; zero when inside.
    pub fn price_gap(&self, price: u32) -> u32 {
        if let Some(max_price) = self.max_price {
            if price > max_price {
                return price - max_price;
            }
        }
        if let Some(min_price) = self.min_price {
            if price < min_price {
                return min_price - price;
            }
        }
        0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetrieverConfig {
    /// Candidates requested from the vector index before post-filtering.
    pub candidate_pool: usize,
    pub timeout: Duration,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self { candidate_pool: 50, timeout: Duration::from_secs(5) }
    }
}

#[derive(Clone)]
pub struct KnowledgeRetriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    catalog: Arc<dyn VehicleCatalog>,
    config: RetrieverConfig,
}

impl KnowledgeRetriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        catalog: Arc<dyn VehicleCatalog>,
        config: RetrieverConfig,
    ) -> Self {
        Self { embedder, index, catalog, config }
    }

    pub fn catalog(&self) -> &Arc<dyn VehicleCatalog> {
        &self.catalog
    }

    /// Up to `top_k` records matching `filters`, most relevant first.
    pub async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        top_k: usize,
    ) -> Vec<VehicleRecord> {
        if top_k == 0 {
            return Vec::new();
        }

        let pool = self.config.candidate_pool.max(top_k);
        let semantic =
            match tokio::time::timeout(self.config.timeout, self.semantic_candidates(query, pool))
                .await
            {
                Ok(Ok(candidates)) => Some(candidates),
                Ok(Err(error)) => {
                    warn!(
                        event_name = "retriever.degraded",
                        error = %error,
                        "vector search failed, falling back to catalog scan"
                    );
                    None
                }
                Err(_) => {
                    warn!(
                        event_name = "retriever.degraded",
                        timeout_ms = self.config.timeout.as_millis() as u64,
                        "vector search timed out, falling back to catalog scan"
                    );
                    None
                }
            };

        let mut results: Vec<VehicleRecord> = semantic
            .unwrap_or_default()
            .into_iter()
            .filter(|record| filters.matches(record))
            .take(top_k)
            .collect();

        if results.len() < top_k {
            let seen: HashSet<_> =
                results.iter().map(|record| record.stock_number.clone()).collect();
            let remaining = top_k - results.len();
            results.extend(
                self.scan(filters)
                    .await
                    .into_iter()
                    .filter(|record| !seen.contains(&record.stock_number))
                    .take(remaining),
            );
        }

        debug!(
            event_name = "retriever.search",
            query_len = query.len(),
            results = results.len(),
            "knowledge retrieval completed"
        );
        results
    }

    /// Closest-priced alternatives when `search` comes back empty. Category
    /// and make are kept when they still yield something, then relaxed.
    pub async fn nearest_by_price(&self, filters: &SearchFilters, n: usize) -> Vec<VehicleRecord> {
        if n == 0 {
            return Vec::new();
        }

        let records = match self.catalog.all().await {
            Ok(records) => records,
            Err(error) => {
                warn!(
                    event_name = "retriever.degraded",
                    error = %error,
                    "catalog unavailable for price alternatives"
                );
                return Vec::new();
            }
        };

        let relaxations = [
            filters.clone(),
            SearchFilters { make: None, ..filters.clone() },
            SearchFilters { make: None, category: None, ..filters.clone() },
        ];

        for relaxed in relaxations.iter() {
            let mut candidates: Vec<&VehicleRecord> =
                records.iter().filter(|record| relaxed.matches_ignoring_price(record)).collect();
            if candidates.is_empty() {
                continue;
            }
            candidates.sort_by(|left, right| {
                relaxed
                    .price_gap(left.price)
                    .cmp(&relaxed.price_gap(right.price))
                    .then_with(|| left.price.cmp(&right.price))
                    .then_with(|| left.stock_number.cmp(&right.stock_number))
            });
            return candidates.into_iter().take(n).cloned().collect();
        }

        Vec::new()
    }

    async fn semantic_candidates(
        &self,
        query: &str,
        pool: usize,
    ) -> Result<Vec<VehicleRecord>, ServiceError> {
        let embedding = self.embedder.embed(query).await?;
        let neighbors = self.index.nearest(&embedding, pool).await?;

        let mut records = Vec::with_capacity(neighbors.len());
        for neighbor in neighbors {
            if let Some(record) = self.catalog.get(&neighbor.id).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn scan(&self, filters: &SearchFilters) -> Vec<VehicleRecord> {
        match self.catalog.all().await {
            Ok(records) => records.into_iter().filter(|record| filters.matches(record)).collect(),
            Err(error) => {
                warn!(
                    event_name = "retriever.degraded",
                    error = %error,
                    "catalog scan failed, returning no results"
                );
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::{KnowledgeRetriever, RetrieverConfig, SearchFilters};
    use crate::catalog::{HashingEmbedder, InMemoryCatalog, InMemoryVectorIndex};
    use crate::domain::vehicle::{StockNumber, VehicleCategory, VehicleRecord};
    use crate::ports::{Neighbor, ServiceError, VectorIndex};

    fn vehicle(stock: &str, model: &str, category: VehicleCategory, price: u32) -> VehicleRecord {
        VehicleRecord {
            stock_number: StockNumber(stock.to_string()),
            year: 2024,
            make: "Toyota".to_string(),
            model: model.to_string(),
            price,
            category,
            safety_rating: 4.0,
            features: Vec::new(),
            mileage: 0,
            available: true,
            featured: false,
        }
    }

    fn inventory() -> Vec<VehicleRecord> {
        let mut sold = vehicle("AX5", "Highlander", VehicleCategory::Suv, 30_000);
        sold.available = false;
        vec![
            vehicle("AX1", "RAV4", VehicleCategory::Suv, 32_000),
            vehicle("AX2", "4Runner", VehicleCategory::Suv, 41_000),
            vehicle("AX3", "Camry", VehicleCategory::Sedan, 27_000),
            vehicle("AX4", "Tacoma", VehicleCategory::Truck, 36_000),
            sold,
        ]
    }

    fn retriever_with_index(index: Arc<dyn VectorIndex>) -> KnowledgeRetriever {
        let catalog = InMemoryCatalog::from_records(inventory()).expect("catalog");
        KnowledgeRetriever::new(
            Arc::new(HashingEmbedder::new()),
            index,
            Arc::new(catalog),
            RetrieverConfig { candidate_pool: 10, timeout: Duration::from_millis(50) },
        )
    }

    fn local_retriever() -> KnowledgeRetriever {
        let index = InMemoryVectorIndex::build(&HashingEmbedder::new(), &inventory());
        retriever_with_index(Arc::new(index))
    }

    struct FailingIndex;

    #[async_trait]
    impl VectorIndex for FailingIndex {
        async fn nearest(&self, _: &[f32], _: usize) -> Result<Vec<Neighbor>, ServiceError> {
            Err(ServiceError::Unavailable("vector store down".to_string()))
        }
    }

    struct StalledIndex;

    #[async_trait]
    impl VectorIndex for StalledIndex {
        async fn nearest(&self, _: &[f32], _: usize) -> Result<Vec<Neighbor>, ServiceError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn search_applies_structured_filters() {
        let retriever = local_retriever();
        let filters = SearchFilters {
            category: Some(VehicleCategory::Suv),
            max_price: Some(35_000),
            ..SearchFilters::default()
        };

        let results = retriever.search("suv under 35k", &filters, 3).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].stock_number.0, "AX1");
    }

    #[tokio::test]
    async fn impossible_price_ceiling_yields_empty_results() {
        let retriever = local_retriever();
        let filters = SearchFilters { max_price: Some(1), ..SearchFilters::default() };

        assert!(retriever.search("anything cheap", &filters, 3).await.is_empty());
    }

    #[tokio::test]
    async fn failing_vector_service_degrades_to_catalog_scan() {
        let retriever = retriever_with_index(Arc::new(FailingIndex));
        let filters =
            SearchFilters { category: Some(VehicleCategory::Suv), ..SearchFilters::default() };

        let results = retriever.search("suv", &filters, 3).await;

        let stocks: Vec<_> = results.iter().map(|record| record.stock_number.0.as_str()).collect();
        assert_eq!(stocks, vec!["AX1", "AX2"]);
    }

    #[tokio::test]
    async fn stalled_vector_service_times_out_into_catalog_scan() {
        let retriever = retriever_with_index(Arc::new(StalledIndex));
        let filters =
            SearchFilters { category: Some(VehicleCategory::Truck), ..SearchFilters::default() };

        let results = retriever.search("pickup", &filters, 3).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].model, "Tacoma");
    }

    #[tokio::test]
    async fn nearest_by_price_prefers_smallest_gap_within_category() {
        let retriever = local_retriever();
        let filters = SearchFilters {
            category: Some(VehicleCategory::Suv),
            max_price: Some(20_000),
            ..SearchFilters::default()
        };

        let alternatives = retriever.nearest_by_price(&filters, 2).await;

        let stocks: Vec<_> =
            alternatives.iter().map(|record| record.stock_number.0.as_str()).collect();
        assert_eq!(stocks, vec!["AX1", "AX2"]);
    }

    #[tokio::test]
    async fn nearest_by_price_relaxes_category_when_nothing_matches() {
        let retriever = local_retriever();
        let filters = SearchFilters {
            category: Some(VehicleCategory::Minivan),
            max_price: Some(1),
            ..SearchFilters::default()
        };

        let alternatives = retriever.nearest_by_price(&filters, 1).await;

        assert_eq!(alternatives.len(), 1);
        assert_eq!(alternatives[0].model, "Camry");
    }

    #[test]
    fn price_gap_is_zero_inside_range() {
        let filters = SearchFilters {
            min_price: Some(20_000),
            max_price: Some(30_000),
            ..SearchFilters::default()
        };
        assert_eq!(filters.price_gap(25_000), 0);
        assert_eq!(filters.price_gap(31_000), 1_000);
        assert_eq!(filters.price_gap(18_500), 1_500);
    }
}
