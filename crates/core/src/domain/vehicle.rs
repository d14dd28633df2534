use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockNumber(pub String);

impl StockNumber {
    /// Normalizes user-typed stock numbers (`ax10000`, `#AX10000`) to catalog form.
    pub fn normalized(raw: &str) -> Self {
        Self(raw.trim().trim_start_matches('#').to_ascii_uppercase())
    }
}

impl fmt::Display for StockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleCategory {
    Suv,
    Sedan,
    Truck,
    Electric,
    Hybrid,
    Coupe,
    Minivan,
    Hatchback,
}

impl VehicleCategory {
    pub const ALL: [VehicleCategory; 8] = [
        Self::Suv,
        Self::Sedan,
        Self::Truck,
        Self::Electric,
        Self::Hybrid,
        Self::Coupe,
        Self::Minivan,
        Self::Hatchback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Suv => "suv",
            Self::Sedan => "sedan",
            Self::Truck => "truck",
            Self::Electric => "electric",
            Self::Hybrid => "hybrid",
            Self::Coupe => "coupe",
            Self::Minivan => "minivan",
            Self::Hatchback => "hatchback",
        }
    }

    /// Human label used in replies ("SUVs", "sedans").
    pub fn plural_label(&self) -> &'static str {
        match self {
            Self::Suv => "SUVs",
            Self::Sedan => "sedans",
            Self::Truck => "trucks",
            Self::Electric => "electric vehicles",
            Self::Hybrid => "hybrids",
            Self::Coupe => "coupes",
            Self::Minivan => "minivans",
            Self::Hatchback => "hatchbacks",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "suv" | "suvs" | "crossover" | "crossovers" => Some(Self::Suv),
            "sedan" | "sedans" => Some(Self::Sedan),
            "truck" | "trucks" | "pickup" | "pickups" => Some(Self::Truck),
            "electric" | "ev" | "evs" => Some(Self::Electric),
            "hybrid" | "hybrids" => Some(Self::Hybrid),
            "coupe" | "coupes" => Some(Self::Coupe),
            "minivan" | "minivans" | "van" | "vans" => Some(Self::Minivan),
            "hatchback" | "hatchbacks" => Some(Self::Hatchback),
            _ => None,
        }
    }
}

fn default_available() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SafetyRatingRepr {
    Overall(f32),
    Detailed { overall: f32 },
}

/// Inventory exports carry either a bare number or the full NHTSA breakdown.
fn deserialize_safety_rating<'de, D>(deserializer: D) -> Result<f32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let rating = match SafetyRatingRepr::deserialize(deserializer)? {
        SafetyRatingRepr::Overall(value) | SafetyRatingRepr::Detailed { overall: value } => value,
    };
    Ok(rating.clamp(0.0, 5.0))
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VehicleRecord {
    pub stock_number: StockNumber,
    pub year: u16,
    pub make: String,
    pub model: String,
    /// Whole US dollars.
    pub price: u32,
    pub category: VehicleCategory,
    /// Overall rating on a 0-5 scale.
    #[serde(deserialize_with = "deserialize_safety_rating")]
    pub safety_rating: f32,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub mileage: u32,
    #[serde(default = "default_available")]
    pub available: bool,
    #[serde(default)]
    pub featured: bool,
}

impl VehicleRecord {
    pub fn display_name(&self) -> String {
        format!("{} {} {}", self.year, self.make, self.model)
    }

    /// Text the embedder sees for this record.
    pub fn search_text(&self) -> String {
        format!(
            "{} {} {} {} {}",
            self.year,
            self.make,
            self.model,
            self.category.as_str(),
            self.features.join(" ")
        )
    }

    pub fn has_feature(&self, keyword: &str) -> bool {
        let keyword = keyword.to_ascii_lowercase();
        self.features.iter().any(|feature| feature.to_ascii_lowercase().contains(&keyword))
    }
}

/// Formats whole dollars with thousands separators: `34500` -> `$34,500`.
pub fn format_price(price: u32) -> String {
    let digits = price.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, character) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(character);
    }
    format!("${grouped}")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{format_price, StockNumber, VehicleCategory, VehicleRecord};

    #[test]
    fn records_accept_detailed_safety_ratings_and_default_flags() {
        let record: VehicleRecord = serde_json::from_value(json!({
            "stock_number": "AX10004",
            "year": 2024,
            "make": "Honda",
            "model": "CR-V",
            "price": 33900,
            "category": "suv",
            "safety_rating": {"overall": 5, "frontal_crash": 5, "side_crash": 4},
            "features": ["Backup Camera"],
            "vin": "ignored"
        }))
        .expect("record");

        assert_eq!(record.safety_rating, 5.0);
        assert!(record.available);
        assert!(!record.featured);
        assert_eq!(record.mileage, 0);
        assert!(record.has_feature("camera"));
    }

    #[test]
    fn category_parse_accepts_common_synonyms() {
        assert_eq!(VehicleCategory::parse("SUVs"), Some(VehicleCategory::Suv));
        assert_eq!(VehicleCategory::parse("pickup"), Some(VehicleCategory::Truck));
        assert_eq!(VehicleCategory::parse("ev"), Some(VehicleCategory::Electric));
        assert_eq!(VehicleCategory::parse("spaceship"), None);
    }

    #[test]
    fn stock_numbers_are_normalized_to_upper_case() {
        assert_eq!(StockNumber::normalized(" #ax10000 ").0, "AX10000");
    }

    #[test]
    fn prices_render_with_thousands_separators() {
        assert_eq!(format_price(0), "$0");
        assert_eq!(format_price(999), "$999");
        assert_eq!(format_price(34_500), "$34,500");
        assert_eq!(format_price(1_250_000), "$1,250,000");
    }
}
