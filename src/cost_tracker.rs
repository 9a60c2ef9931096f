//! Session Cost Tracker
//!
//! Aggregates the estimated cost of a run: embedding tokens billed by Azure
//! OpenAI and Request Units consumed by Cosmos DB.
//!
//! # Usage
//!
//! ```rust
//! use cosmos_vector_search::cost_tracker::SessionCostTracker;
//!
//! let mut tracker = SessionCostTracker::new();
//!
//! // 12,000 prompt tokens against ada-002
//! tracker.record_embedding("text-embedding-ada-002", "create-embeddings", 12_000);
//!
//! // 5,000 RU spent inserting documents
//! tracker.record_request_units("hotels", "resilient-load", 5_000.0);
//!
//! let summary = tracker.summary();
//! println!("Total cost: ${:.4}", summary.total_cost);
//! ```
//!
//! Prices are list prices used for display only.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Default serverless price per million Request Units (USD).
pub const DEFAULT_RU_PRICE_PER_MILLION: f64 = 0.25;

/// Share of the budget at which a session counts as near its limit.
pub const BUDGET_WARNING_THRESHOLD: f64 = 0.8;

/// Embedding pricing in dollars per million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmbeddingPricing {
    pub cost_per_million_tokens: f64,
}

impl EmbeddingPricing {
    pub fn new(cost_per_million_tokens: f64) -> Self {
        Self {
            cost_per_million_tokens,
        }
    }

    /// List price for a known embedding model.
    ///
    /// Matches on substrings so deployment names such as
    /// `my-text-embedding-3-small` resolve. Unknown models are priced as
    /// ada-002.
    pub fn for_model(model: &str) -> Self {
        let model = model.to_ascii_lowercase();
        if model.contains("3-small") {
            Self::new(0.02)
        } else if model.contains("3-large") {
            Self::new(0.13)
        } else {
            Self::default()
        }
    }

    pub fn calculate_cost(&self, tokens: u64) -> f64 {
        (tokens as f64 / 1_000_000.0) * self.cost_per_million_tokens
    }
}

impl Default for EmbeddingPricing {
    fn default() -> Self {
        // text-embedding-ada-002
        Self::new(0.10)
    }
}

/// Request Unit pricing in dollars per million RU.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestUnitPricing {
    pub cost_per_million_ru: f64,
}

impl RequestUnitPricing {
    pub fn new(cost_per_million_ru: f64) -> Self {
        Self {
            cost_per_million_ru,
        }
    }

    pub fn calculate_cost(&self, request_units: f64) -> f64 {
        (request_units / 1_000_000.0) * self.cost_per_million_ru
    }
}

impl Default for RequestUnitPricing {
    fn default() -> Self {
        Self::new(DEFAULT_RU_PRICE_PER_MILLION)
    }
}

/// What a cost entry measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageKind {
    /// Embedding prompt tokens.
    Tokens,
    /// Cosmos DB Request Units.
    RequestUnits,
}

/// A single cost entry.
#[derive(Debug, Clone)]
pub struct CostEntry {
    /// Model or collection the usage was billed against.
    pub resource: String,

    /// Operation type (e.g., "create-embeddings", "query", "resilient-load").
    pub operation: String,

    pub kind: UsageKind,

    /// Tokens or Request Units consumed.
    pub units: f64,

    /// Calculated cost in USD.
    pub cost: f64,

    /// When the usage was recorded.
    pub timestamp: DateTime<Utc>,
}

impl CostEntry {
    pub fn new(
        resource: impl Into<String>,
        operation: impl Into<String>,
        kind: UsageKind,
        units: f64,
        cost: f64,
    ) -> Self {
        Self {
            resource: resource.into(),
            operation: operation.into(),
            kind,
            units,
            cost,
            timestamp: Utc::now(),
        }
    }
}

/// Summary of costs across a session.
#[derive(Debug, Clone, Default)]
pub struct CostSummary {
    /// Total cost in USD.
    pub total_cost: f64,

    /// Total embedding tokens.
    pub total_tokens: u64,

    /// Total Request Units.
    pub total_request_units: f64,

    /// Number of recorded entries.
    pub call_count: usize,

    /// Breakdown by model or collection.
    pub by_resource: BTreeMap<String, f64>,

    /// Breakdown by operation.
    pub by_operation: BTreeMap<String, f64>,
}

/// Session-level cost tracker.
///
/// One tracker lives for a whole command; every workflow that bills tokens
/// or Request Units records into it.
#[derive(Debug, Clone)]
pub struct SessionCostTracker {
    entries: Vec<CostEntry>,

    ru_pricing: RequestUnitPricing,

    /// Optional budget limit in USD.
    budget_limit: Option<f64>,
}

impl Default for SessionCostTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionCostTracker {
    /// Create a new session cost tracker.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            ru_pricing: RequestUnitPricing::default(),
            budget_limit: None,
        }
    }

    /// Create with a budget limit.
    pub fn with_budget(limit: f64) -> Self {
        let mut tracker = Self::new();
        tracker.budget_limit = Some(limit);
        tracker
    }

    pub fn set_ru_pricing(&mut self, pricing: RequestUnitPricing) {
        self.ru_pricing = pricing;
    }

    pub fn budget_limit(&self) -> Option<f64> {
        self.budget_limit
    }

    /// Record embedding token usage and return its cost.
    pub fn record_embedding(&mut self, model: &str, operation: &str, tokens: u64) -> f64 {
        let cost = EmbeddingPricing::for_model(model).calculate_cost(tokens);
        self.entries.push(CostEntry::new(
            model,
            operation,
            UsageKind::Tokens,
            tokens as f64,
            cost,
        ));
        cost
    }

    /// Record Request Unit usage and return its cost.
    pub fn record_request_units(&mut self, collection: &str, operation: &str, ru: f64) -> f64 {
        let cost = self.ru_pricing.calculate_cost(ru);
        self.entries.push(CostEntry::new(
            collection,
            operation,
            UsageKind::RequestUnits,
            ru,
            cost,
        ));
        cost
    }

    /// Get total cost.
    pub fn total_cost(&self) -> f64 {
        self.entries.iter().map(|e| e.cost).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check if budget is exceeded.
    pub fn is_over_budget(&self) -> bool {
        self.budget_limit
            .map(|b| self.total_cost() >= b)
            .unwrap_or(false)
    }

    /// Check if spending passed the warning share of the budget.
    pub fn is_near_budget(&self) -> bool {
        self.budget_limit
            .map(|b| self.total_cost() >= b * BUDGET_WARNING_THRESHOLD)
            .unwrap_or(false)
    }

    /// Get remaining budget.
    pub fn remaining_budget(&self) -> Option<f64> {
        self.budget_limit.map(|b| (b - self.total_cost()).max(0.0))
    }

    /// Get summary statistics.
    pub fn summary(&self) -> CostSummary {
        let mut summary = CostSummary::default();

        for entry in &self.entries {
            summary.total_cost += entry.cost;
            match entry.kind {
                UsageKind::Tokens => summary.total_tokens += entry.units as u64,
                UsageKind::RequestUnits => summary.total_request_units += entry.units,
            }
            summary.call_count += 1;

            *summary
                .by_resource
                .entry(entry.resource.clone())
                .or_default() += entry.cost;
            *summary
                .by_operation
                .entry(entry.operation.clone())
                .or_default() += entry.cost;
        }

        summary
    }
}

/// Format cost in a human-readable way.
pub fn format_cost(cost: f64) -> String {
    if cost < 0.01 {
        format!("${:.4}", cost)
    } else if cost < 1.0 {
        format!("${:.3}", cost)
    } else {
        format!("${:.2}", cost)
    }
}

/// Format a token or RU count compactly.
pub fn format_count(count: f64) -> String {
    if count >= 1_000_000.0 {
        format!("{:.1}M", count / 1_000_000.0)
    } else if count >= 1_000.0 {
        format!("{:.1}K", count / 1_000.0)
    } else if count.fract() == 0.0 {
        format!("{}", count as u64)
    } else {
        format!("{:.2}", count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_pricing_for_model() {
        let price = |model: &str| EmbeddingPricing::for_model(model).cost_per_million_tokens;
        assert_eq!(price("text-embedding-ada-002"), 0.10);
        assert_eq!(price("text-embedding-3-small"), 0.02);
        assert_eq!(price("TEXT-EMBEDDING-3-LARGE"), 0.13);
        // Unknown deployments fall back to ada-002
        assert_eq!(price("my-deployment"), 0.10);
    }

    #[test]
    fn test_calculate_costs() {
        let cost = EmbeddingPricing::default().calculate_cost(1_000_000);
        assert!((cost - 0.10).abs() < 1e-9);

        let cost = RequestUnitPricing::default().calculate_cost(4_000_000.0);
        assert!((cost - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_record_and_summarise() {
        let mut tracker = SessionCostTracker::new();
        assert!(tracker.is_empty());
        let embed =
            tracker.record_embedding("text-embedding-3-small", "create-embeddings", 500_000);
        let insert = tracker.record_request_units("hotels", "resilient-load", 2_000_000.0);

        assert!((embed - 0.01).abs() < 1e-9);
        assert!((insert - 0.5).abs() < 1e-9);

        let summary = tracker.summary();
        assert_eq!(summary.call_count, 2);
        assert_eq!(summary.total_tokens, 500_000);
        assert!((summary.total_request_units - 2_000_000.0).abs() < 1e-6);
        assert!((summary.total_cost - 0.51).abs() < 1e-9);
        assert!((summary.by_operation["resilient-load"] - 0.5).abs() < 1e-9);
        assert!((summary.by_resource["text-embedding-3-small"] - 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_ru_pricing_override() {
        let mut tracker = SessionCostTracker::new();
        tracker.set_ru_pricing(RequestUnitPricing::new(1.0));
        assert!((tracker.record_request_units("c", "insert", 1_000_000.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_budget() {
        let mut tracker = SessionCostTracker::with_budget(1.0);
        assert_eq!(tracker.budget_limit(), Some(1.0));
        assert!(!tracker.is_near_budget());

        tracker.record_request_units("c", "insert", 3_400_000.0); // $0.85
        assert!(tracker.is_near_budget());
        assert!(!tracker.is_over_budget());
        assert!((tracker.remaining_budget().unwrap() - 0.15).abs() < 1e-9);

        tracker.record_request_units("c", "insert", 1_000_000.0);
        assert!(tracker.is_over_budget());
        assert_eq!(tracker.remaining_budget(), Some(0.0));
    }

    #[test]
    fn test_no_budget() {
        let mut tracker = SessionCostTracker::new();
        tracker.record_request_units("c", "insert", 1e12);
        assert!(!tracker.is_over_budget());
        assert_eq!(tracker.remaining_budget(), None);
    }

    #[test]
    fn test_format_cost() {
        assert_eq!(format_cost(0.00123), "$0.0012");
        assert_eq!(format_cost(0.123), "$0.123");
        assert_eq!(format_cost(12.346), "$12.35");
    }

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(950.0), "950");
        assert_eq!(format_count(12.5), "12.50");
        assert_eq!(format_count(1_500.0), "1.5K");
        assert_eq!(format_count(2_300_000.0), "2.3M");
    }
}
