//! Local stand-ins for the catalog and vector-search collaborators.
//!
//! `InMemoryCatalog` is loaded from the dealership inventory export,
//! `HashingEmbedder` produces feature-hashed bag-of-words vectors, and
//! `InMemoryVectorIndex` ranks records by cosine distance. Together they let
//! the engine run without any hosted retrieval service.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::vehicle::{StockNumber, VehicleRecord};
use crate::ports::{Embedder, Neighbor, ServiceError, VectorIndex, VehicleCatalog};

pub const EMBEDDING_DIMENSIONS: usize = 256;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read inventory file {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("failed to parse inventory file {path}: {source}")]
    Parse { path: String, source: serde_json::Error },
    #[error("duplicate stock number `{0}` in inventory")]
    DuplicateStockNumber(String),
}

/// Read-only catalog keyed by stock number, preserving file order.
#[derive(Clone, Debug, Default)]
pub struct InMemoryCatalog {
    records: Vec<VehicleRecord>,
    by_stock_number: HashMap<StockNumber, usize>,
}

impl InMemoryCatalog {
    pub fn from_records(records: Vec<VehicleRecord>) -> Result<Self, CatalogError> {
        let mut by_stock_number = HashMap::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            if by_stock_number.insert(record.stock_number.clone(), index).is_some() {
                return Err(CatalogError::DuplicateStockNumber(record.stock_number.0.clone()));
            }
        }
        Ok(Self { records, by_stock_number })
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path)
            .map_err(|source| CatalogError::Read { path: display.clone(), source })?;
        let records: Vec<VehicleRecord> = serde_json::from_str(&raw)
            .map_err(|source| CatalogError::Parse { path: display, source })?;
        Self::from_records(records)
    }

    pub fn records(&self) -> &[VehicleRecord] {
        &self.records
    }

    pub fn lookup(&self, stock_number: &StockNumber) -> Option<&VehicleRecord> {
        self.by_stock_number.get(stock_number).and_then(|index| self.records.get(*index))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl VehicleCatalog for InMemoryCatalog {
    async fn get(&self, stock_number: &StockNumber) -> Result<Option<VehicleRecord>, ServiceError> {
        Ok(self.lookup(stock_number).cloned())
    }

    async fn all(&self) -> Result<Vec<VehicleRecord>, ServiceError> {
        Ok(self.records.clone())
    }
}

/// Feature-hashing embedder: each token lands in a signed bucket, and the
/// vector is L2-normalized so a dot product is a cosine similarity.
#[derive(Clone, Debug, Default)]
pub struct HashingEmbedder;

impl HashingEmbedder {
    pub fn new() -> Self {
        Self
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; EMBEDDING_DIMENSIONS];
        for token in embedding_tokens(text) {
            let hash = fnv1a_64(token.as_bytes());
            let bucket = (hash % EMBEDDING_DIMENSIONS as u64) as usize;
            let sign = if (hash >> 63) & 1 == 1 { -1.0 } else { 1.0 };
            vector[bucket] += sign;
        }
        normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        Ok(self.embed_text(text))
    }
}

/// Brute-force cosine index over pre-embedded catalog records.
#[derive(Clone, Debug, Default)]
pub struct InMemoryVectorIndex {
    entries: Vec<(StockNumber, Vec<f32>)>,
}

impl InMemoryVectorIndex {
    pub fn build(embedder: &HashingEmbedder, records: &[VehicleRecord]) -> Self {
        let entries = records
            .iter()
            .map(|record| (record.stock_number.clone(), embedder.embed_text(&record.search_text())))
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn nearest(
        &self,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<Neighbor>, ServiceError> {
        if embedding.len() != EMBEDDING_DIMENSIONS {
            return Err(ServiceError::Validation(format!(
                "embedding has {} dimensions, expected {EMBEDDING_DIMENSIONS}",
                embedding.len()
            )));
        }

        let mut neighbors: Vec<Neighbor> = self
            .entries
            .iter()
            .map(|(id, vector)| Neighbor { id: id.clone(), distance: 1.0 - dot(embedding, vector) })
            .collect();
        neighbors.sort_by(|left, right| {
            left.distance.total_cmp(&right.distance).then_with(|| left.id.cmp(&right.id))
        });
        neighbors.truncate(top_k);
        Ok(neighbors)
    }
}

fn embedding_tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|character: char| !character.is_ascii_alphanumeric() && character != '-')
        .filter(|token| !token.is_empty())
        .map(|token| token.to_ascii_lowercase())
}

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x1000_0000_01b3;

fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

fn dot(left: &[f32], right: &[f32]) -> f32 {
    left.iter().zip(right).map(|(a, b)| a * b).sum()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::{
        CatalogError, HashingEmbedder, InMemoryCatalog, InMemoryVectorIndex, EMBEDDING_DIMENSIONS,
    };
    use crate::domain::vehicle::{StockNumber, VehicleCategory, VehicleRecord};
    use crate::ports::{VectorIndex, VehicleCatalog};

    fn record(stock: &str, make: &str, model: &str, category: VehicleCategory) -> VehicleRecord {
        VehicleRecord {
            stock_number: StockNumber(stock.to_string()),
            year: 2024,
            make: make.to_string(),
            model: model.to_string(),
            price: 30_000,
            category,
            safety_rating: 5.0,
            features: vec!["Backup Camera".to_string()],
            mileage: 0,
            available: true,
            featured: false,
        }
    }

    #[test]
    fn embeddings_are_unit_length_and_deterministic() {
        let embedder = HashingEmbedder::new();
        let first = embedder.embed_text("Honda CR-V suv");
        let second = embedder.embed_text("honda cr-v SUV");

        assert_eq!(first.len(), EMBEDDING_DIMENSIONS);
        assert_eq!(first, second);
        let norm: f32 = first.iter().map(|value| value * value).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
        assert!(embedder.embed_text("   ").iter().all(|value| *value == 0.0));
    }

    #[tokio::test]
    async fn index_ranks_lexically_closer_records_first() {
        let embedder = HashingEmbedder::new();
        let records = vec![
            record("AX1", "Ford", "F-150", VehicleCategory::Truck),
            record("AX2", "Honda", "CR-V", VehicleCategory::Suv),
            record("AX3", "Toyota", "Camry", VehicleCategory::Sedan),
        ];
        let index = InMemoryVectorIndex::build(&embedder, &records);

        let neighbors =
            index.nearest(&embedder.embed_text("honda cr-v"), 2).await.expect("nearest");

        assert_eq!(neighbors.len(), 2);
        assert_eq!(neighbors[0].id, StockNumber("AX2".to_string()));
        assert!(neighbors[0].distance <= neighbors[1].distance);
    }

    #[tokio::test]
    async fn index_rejects_mismatched_dimensions() {
        let index = InMemoryVectorIndex::default();
        assert!(index.nearest(&[1.0, 0.0], 3).await.is_err());
    }

    #[tokio::test]
    async fn catalog_loads_inventory_export() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"[
                {{"stock_number":"AX10000","year":2024,"make":"Toyota","model":"RAV4",
                  "price":32000,"category":"suv","safety_rating":{{"overall":5}}}},
                {{"stock_number":"AX10001","year":2023,"make":"Honda","model":"Civic",
                  "price":24000,"category":"sedan","safety_rating":4,"available":false}}
            ]"#
        )
        .expect("write inventory");

        let catalog = InMemoryCatalog::from_json_file(file.path()).expect("catalog");

        assert_eq!(catalog.len(), 2);
        let rav4 = catalog.get(&StockNumber("AX10000".to_string())).await.expect("get");
        assert_eq!(rav4.map(|record| record.model), Some("RAV4".to_string()));
        assert_eq!(catalog.all().await.expect("all").len(), 2);
        assert!(catalog.get(&StockNumber("AX99999".to_string())).await.expect("get").is_none());
    }

    #[test]
    fn duplicate_stock_numbers_are_rejected() {
        let error = InMemoryCatalog::from_records(vec![
            record("AX1", "Ford", "F-150", VehicleCategory::Truck),
            record("AX1", "Ford", "Ranger", VehicleCategory::Truck),
        ])
        .expect_err("duplicate");

        assert!(matches!(error, CatalogError::DuplicateStockNumber(stock) if stock == "AX1"));
    }
}
