//! Merges the agents' results into the single reply a customer sees.

use std::collections::HashSet;

use autoxloo_core::domain::routing::AgentKind;
use autoxloo_core::domain::tool::ActionRecord;
use autoxloo_core::domain::vehicle::{format_price, StockNumber, VehicleCategory, VehicleRecord};

use crate::agents::AgentResult;
use crate::llm::split_lead_sentence;

const DEFAULT_WORD_CEILING: usize = 150;
const DEFAULT_TABLE_ROWS: usize = 3;

#[derive(Clone, Debug, PartialEq)]
pub struct TurnManifest {
    pub agents_used: Vec<AgentKind>,
    pub actions_taken: Vec<ActionRecord>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ComposedReply {
    pub text: String,
    pub manifest: TurnManifest,
}

#[derive(Clone, Debug)]
pub struct ResponseComposer {
    word_ceiling: usize,
    max_table_rows: usize,
}

impl Default for ResponseComposer {
    fn default() -> Self {
        Self { word_ceiling: DEFAULT_WORD_CEILING, max_table_rows: DEFAULT_TABLE_ROWS }
    }
}

fn category_label(category: VehicleCategory) -> &'static str {
    match category {
        VehicleCategory::Suv => "SUV",
        VehicleCategory::Sedan => "Sedan",
        VehicleCategory::Truck => "Truck",
        VehicleCategory::Electric => "Electric",
        VehicleCategory::Hybrid => "Hybrid",
        VehicleCategory::Coupe => "Coupe",
        VehicleCategory::Minivan => "Minivan",
        VehicleCategory::Hatchback => "Hatchback",
    }
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

impl ResponseComposer {
    pub fn new(word_ceiling: usize, max_table_rows: usize) -> Self {
        Self { word_ceiling, max_table_rows: max_table_rows.max(1) }
    }

    pub fn compose(&self, results: &[AgentResult]) -> ComposedReply {
        let vehicles = self.referenced_vehicles(results);
        let mut narratives: Vec<String> = results
            .iter()
            .map(|result| result.narrative.trim().to_string())
            .filter(|narrative| !narrative.is_empty())
            .collect();

        let total_words: usize = narratives.iter().map(|narrative| word_count(narrative)).sum();
        if total_words > self.word_ceiling {
            narratives = narratives
                .iter()
                .map(|narrative| split_lead_sentence(narrative).0.to_string())
                .collect();
        }

        let mut sections = narratives;
        match vehicles.as_slice() {
            [] => {}
            [single] => sections.push(vehicle_line(single)),
            many => sections.push(vehicle_table(many)),
        }

        ComposedReply { text: sections.join("\n\n"), manifest: manifest(results) }
    }

    /// Vehicles in first-mention order, each stock number once. The
    /// scheduler's vehicle goes first so the row cap never drops it.
    fn referenced_vehicles<'a>(&self, results: &'a [AgentResult]) -> Vec<&'a VehicleRecord> {
        let mut seen: HashSet<&StockNumber> = HashSet::new();
        let (scheduled, others): (Vec<&AgentResult>, Vec<&AgentResult>) =
            results.iter().partition(|result| result.agent == AgentKind::Scheduler);
        scheduled
            .into_iter()
            .chain(others)
            .flat_map(|result| result.vehicles.iter())
            .filter(|vehicle| seen.insert(&vehicle.stock_number))
            .take(self.max_table_rows)
            .collect()
    }
}

fn manifest(results: &[AgentResult]) -> TurnManifest {
    let mut agents_used = Vec::new();
    for result in results {
        if !agents_used.contains(&result.agent) {
            agents_used.push(result.agent);
        }
    }
    let actions_taken = results
        .iter()
        .flat_map(|result| result.tool_calls.iter())
        .map(|call| call.action_record())
        .collect();
    TurnManifest { agents_used, actions_taken }
}

fn vehicle_line(vehicle: &VehicleRecord) -> String {
    format!(
        "**{}** ({}) · {} · {:.1}★ safety · stock {}",
        vehicle.display_name(),
        category_label(vehicle.category),
        format_price(vehicle.price),
        vehicle.safety_rating,
        vehicle.stock_number
    )
}

fn vehicle_table(vehicles: &[&VehicleRecord]) -> String {
    let mut table =
        String::from("| Vehicle | Type | Price | Safety | Stock |\n|---|---|---|---|---|");
    for vehicle in vehicles {
        table.push_str(&format!(
            "\n| {} | {} | {} | {:.1}★ | {} |",
            vehicle.display_name(),
            category_label(vehicle.category),
            format_price(vehicle.price),
            vehicle.safety_rating,
            vehicle.stock_number
        ));
    }
    table
}
