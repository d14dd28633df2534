use std::cmp::Ordering;

use async_trait::async_trait;

use autoxloo_core::domain::conversation::Fact;
use autoxloo_core::domain::routing::AgentKind;
use autoxloo_core::domain::vehicle::{format_price, VehicleRecord};
use autoxloo_core::retriever::{KnowledgeRetriever, SearchFilters};

use super::{Agent, AgentError, AgentResult, TurnContext};
use crate::llm::NarrativePolisher;

const SHOWN_VEHICLES: usize = 3;
const SEARCH_POOL: usize = 10;

pub struct ResearchAgent {
    retriever: KnowledgeRetriever,
    polisher: NarrativePolisher,
}

impl ResearchAgent {
    pub fn new(retriever: KnowledgeRetriever, polisher: NarrativePolisher) -> Self {
        Self { retriever, polisher }
    }

    /// Structured filters from this message, falling back to what the
    /// customer told us earlier.
    fn filters(context: &TurnContext<'_>) -> SearchFilters {
        let signals = context.signals;
        SearchFilters {
            category: signals.category.or(context.scratch.preferred_category),
            max_price: signals.price_ceiling.or(context.scratch.budget),
            min_price: signals.price_floor,
            make: signals.make.clone(),
            include_unavailable: false,
        }
    }
}

#[async_trait]
impl Agent for ResearchAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Research
    }

    async fn run(&self, context: &TurnContext<'_>) -> Result<AgentResult, AgentError> {
        let filters = Self::filters(context);
        let features = &context.signals.features;

        let mut candidates = self.retriever.search(context.message, &filters, SEARCH_POOL).await;
        let exact_match = !candidates.is_empty();
        let vehicles = if exact_match {
            rank(&mut candidates, &filters, features);
            candidates.truncate(SHOWN_VEHICLES);
            candidates
        } else {
            self.retriever.nearest_by_price(&filters, SHOWN_VEHICLES).await
        };

        let narrative = if exact_match {
            match_narrative(&vehicles, &filters, features)
        } else {
            no_match_narrative(&vehicles, &filters)
        };

        let mut result =
            AgentResult::new(AgentKind::Research, self.polisher.polish(narrative).await);
        if let Some(category) = context.signals.category {
            result.facts.push(Fact::PreferredCategory(category));
        }
        if let Some(budget) = context.signals.price_ceiling {
            result.facts.push(Fact::Budget(budget));
        }
        if let Some(top) = vehicles.first() {
            result.facts.push(Fact::FocusVehicle(top.stock_number.clone()));
        }
        result.facts.push(Fact::ShownVehicles(
            vehicles.iter().map(|vehicle| vehicle.stock_number.clone()).collect(),
        ));
        result.vehicles = vehicles;
        Ok(result)
    }
}

/// Orders by exact category match, then price fit, then requested features,
/// then safety rating, all descending. Retrieval order breaks the rest.
fn rank(candidates: &mut [VehicleRecord], filters: &SearchFilters, features: &[String]) {
    let feature_hits = |vehicle: &VehicleRecord| {
        features.iter().filter(|feature| vehicle.has_feature(feature)).count()
    };
    let category_match = |vehicle: &VehicleRecord| {
        filters.category.is_some_and(|category| category == vehicle.category)
    };
    let price_fit = |vehicle: &VehicleRecord| filters.price_gap(vehicle.price) == 0;

    candidates.sort_by(|left, right| {
        category_match(right)
            .cmp(&category_match(left))
            .then_with(|| price_fit(right).cmp(&price_fit(left)))
            .then_with(|| feature_hits(right).cmp(&feature_hits(left)))
            .then_with(|| {
                right.safety_rating.partial_cmp(&left.safety_rating).unwrap_or(Ordering::Equal)
            })
    });
}

/// "Toyota SUVs under $35,000", "vehicles between $20,000 and $30,000".
fn describe(filters: &SearchFilters) -> String {
    let kind = filters.category.map(|category| category.plural_label()).unwrap_or("vehicles");
    let mut description = match &filters.make {
        Some(make) => format!("{make} {kind}"),
        None => kind.to_string(),
    };
    match (filters.min_price, filters.max_price) {
        (Some(min), Some(max)) => description.push_str(&format!(
            " between {} and {}",
            format_price(min),
            format_price(max)
        )),
        (None, Some(max)) => description.push_str(&format!(" under {}", format_price(max))),
        (Some(min), None) => description.push_str(&format!(" over {}", format_price(min))),
        (None, None) => {}
    }
    description
}

fn safety_phrase(vehicle: &VehicleRecord) -> String {
    format!("a {:.1}-star safety rating", vehicle.safety_rating)
}

fn match_narrative(
    vehicles: &[VehicleRecord],
    filters: &SearchFilters,
    features: &[String],
) -> String {
    let Some(top) = vehicles.first() else {
        return format!("I couldn't find any {} right now.", describe(filters));
    };

    let mut narrative = if vehicles.len() == 1 {
        format!(
            "The {} at {} is the one match for {}, with {}.",
            top.display_name(),
            format_price(top.price),
            describe(filters),
            safety_phrase(top)
        )
    } else {
        format!(
            "I found {} {} that fit. The {} leads at {} with {}.",
            vehicles.len(),
            describe(filters),
            top.display_name(),
            format_price(top.price),
            safety_phrase(top)
        )
    };

    let matched: Vec<&str> = top
        .features
        .iter()
        .filter(|name| features.iter().any(|wanted| name.to_ascii_lowercase().contains(wanted)))
        .map(String::as_str)
        .collect();
    if !matched.is_empty() {
        narrative.push_str(&format!(" It comes with {}.", matched.join(" and ")));
    }

    if let Some(cheapest) =
        vehicles.iter().skip(1).filter(|vehicle| vehicle.price < top.price).min_by_key(|v| v.price)
    {
        narrative.push_str(&format!(
            " For the lowest price, the {} is {}.",
            cheapest.display_name(),
            format_price(cheapest.price)
        ));
    }
    narrative
}

fn no_match_narrative(alternatives: &[VehicleRecord], filters: &SearchFilters) -> String {
    if alternatives.is_empty() {
        return format!(
            "I couldn't find an exact match for {}, and nothing close is in stock right now.",
            describe(filters)
        );
    }
    format!(
        "I couldn't find an exact match for {}. Here are the closest options by price.",
        describe(filters)
    )
}
