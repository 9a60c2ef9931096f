//! Human-readable summaries printed by the CLI.

use mongodb::bson::{Bson, Document};
use std::fmt::Write;

use crate::config::Settings;
use crate::cost_tracker::{format_cost, format_count, SessionCostTracker};
use crate::pipeline::EmbeddingRunSummary;
use crate::resilient::InsertReport;
use crate::store::InsertStats;

const DESCRIPTION_LIMIT: usize = 200;

/// Display form of a BSON value: strings unquoted, numbers as written.
pub fn bson_display(value: &Bson) -> String {
    match value {
        Bson::String(s) => s.clone(),
        Bson::Int32(v) => v.to_string(),
        Bson::Int64(v) => v.to_string(),
        Bson::Double(v) => v.to_string(),
        Bson::Boolean(v) => v.to_string(),
        Bson::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Format search results, at most `max_results` of them.
pub fn format_search_results(results: &[Document], max_results: usize, show_score: bool) -> String {
    if results.is_empty() {
        return "No search results found.".to_string();
    }

    let mut out = String::new();
    let shown = results.len().min(max_results);
    let _ = writeln!(out, "\nSearch Results (showing top {}):", shown);
    let _ = writeln!(out, "{}", "=".repeat(80));

    for (i, result) in results.iter().take(max_results).enumerate() {
        let _ = writeln!(out, "\nResult {}:", i + 1);
        let _ = writeln!(out, "{}", "-".repeat(40));

        if show_score {
            if let Some(score) = result.get("score").and_then(Bson::as_f64) {
                let _ = writeln!(out, "Similarity Score: {:.4}", score);
            }
        }
        if let Some(name) = result.get("HotelName") {
            let _ = writeln!(out, "Hotel: {}", bson_display(name));
        }
        if let Some(id) = result.get("HotelId") {
            let _ = writeln!(out, "Hotel ID: {}", bson_display(id));
        }
        if let Some(description) = result.get("Description") {
            let text = bson_display(description);
            let _ = writeln!(out, "Description: {}", truncate_chars(&text, DESCRIPTION_LIMIT));
        }
        if let Some(category) = result.get("Category") {
            let _ = writeln!(out, "Category: {}", bson_display(category));
        }
        match result.get("Rating") {
            Some(Bson::Null) | None => {}
            Some(rating) => {
                let _ = writeln!(out, "Rating: {}", bson_display(rating));
            }
        }
        if let Ok(address) = result.get_document("Address") {
            let parts: Vec<String> = ["StreetAddress", "City", "StateProvince"]
                .iter()
                .filter_map(|key| address.get(*key).map(bson_display))
                .collect();
            if !parts.is_empty() {
                let _ = writeln!(out, "Address: {}", parts.join(", "));
            }
        }
    }

    if results.len() > max_results {
        let _ = writeln!(out, "\n... and {} more results", results.len() - max_results);
    }
    out
}

fn algorithm_name(kind: &str) -> &str {
    match kind {
        "vector-ivf" | "ivf" => "IVF (Inverted File)",
        "vector-hnsw" | "hnsw" => "HNSW (Hierarchical Navigable Small World)",
        "vector-diskann" | "diskann" => "DiskANN",
        other => other,
    }
}

/// (label, option key) pairs shown for each algorithm.
fn algorithm_params(kind: &str) -> &'static [(&'static str, &'static str)] {
    match kind {
        "vector-ivf" | "ivf" => &[("Number of Lists", "numLists")],
        "vector-hnsw" | "hnsw" => &[
            ("Max Connections", "m"),
            ("EF Construction", "efConstruction"),
        ],
        "vector-diskann" | "diskann" => &[("Max Degree", "maxDegree"), ("L Build", "lBuild")],
        _ => &[],
    }
}

/// Vector options of an index document, plus its algorithm kind.
///
/// Current servers report `cosmosSearchOptions` with a `kind` field; some
/// report `vectorSearchConfiguration` with a nested per-algorithm document.
fn vector_options(index: &Document) -> Option<(String, Document)> {
    if let Ok(options) = index.get_document("cosmosSearchOptions") {
        let kind = options.get_str("kind").unwrap_or("unknown").to_string();
        return Some((kind, options.clone()));
    }

    let config = index.get_document("vectorSearchConfiguration").ok()?;
    let mut merged = config.clone();
    for kind in ["diskann", "hnsw", "ivf"] {
        if let Ok(nested) = config.get_document(kind) {
            for (key, value) in nested {
                merged.insert(key.clone(), value.clone());
            }
            return Some((kind.to_string(), merged));
        }
    }
    Some(("unknown".to_string(), merged))
}

/// Format one index document.
pub fn format_index_info(index: &Document) -> String {
    let mut lines = vec![format!(
        "Index Name: {}",
        index.get_str("name").unwrap_or("Unknown")
    )];

    match vector_options(index) {
        Some((kind, options)) => {
            lines.push("Type: Vector Search Index".to_string());
            lines.push(format!("Algorithm: {}", algorithm_name(&kind)));
            if let Some(similarity) = options.get("similarity") {
                lines.push(format!("Similarity Metric: {}", bson_display(similarity)));
            }
            if let Some(dimensions) = options.get("dimensions") {
                lines.push(format!("Vector Dimensions: {}", bson_display(dimensions)));
            }
            for (label, key) in algorithm_params(&kind) {
                let value = options.get(*key).map_or_else(|| "N/A".to_string(), bson_display);
                lines.push(format!("  {}: {}", label, value));
            }
        }
        None => {
            lines.push("Type: Standard MongoDB Index".to_string());
            if let Ok(key) = index.get_document("key") {
                let fields: Vec<String> = key
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, bson_display(v)))
                    .collect();
                lines.push(format!("Key Pattern: {}", fields.join(", ")));
            }
        }
    }

    let flag = |name: &str| index.get_bool(name).unwrap_or(false);
    if flag("unique") {
        lines.push("Unique: Yes".to_string());
    }
    if flag("sparse") {
        lines.push("Sparse: Yes".to_string());
    }
    if flag("background") {
        lines.push("Built in Background: Yes".to_string());
    }

    lines
        .iter()
        .map(|line| format!("  {}", line))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_insert_stats(stats: &InsertStats) -> String {
    format!(
        "Insertion completed:\n  Total documents: {}\n  Successfully inserted: {}\n  Failed: {}",
        stats.total, stats.inserted, stats.failed
    )
}

pub fn format_embedding_summary(summary: &EmbeddingRunSummary) -> String {
    let mut out = String::from("Summary:\n");
    let _ = writeln!(out, "  Total documents processed: {}", summary.total);
    let _ = writeln!(out, "  Documents with embeddings: {}", summary.embedded);
    if summary.skipped > 0 {
        let _ = writeln!(out, "  Documents skipped: {}", summary.skipped);
    }
    if let Some(dimensions) = summary.dimensions {
        let _ = writeln!(out, "  Embedding dimensions: {}", dimensions);
    }
    let _ = writeln!(
        out,
        "  Prompt tokens: {}",
        format_count(summary.prompt_tokens as f64)
    );
    let _ = write!(out, "  Estimated cost: {}", format_cost(summary.estimated_cost));
    out
}

pub fn format_insert_report(report: &InsertReport, projection_documents: u64) -> String {
    let mut out = String::from("Resilient insert summary:\n");
    for line in report.metrics.to_string().lines() {
        let _ = writeln!(out, "  {}", line);
    }
    if !report.cost.is_measured() {
        let _ = write!(out, "  RU charge not reported; no cost estimate");
        return out;
    }
    let _ = writeln!(
        out,
        "  Average RU per document: {:.2} (over {} charged inserts)",
        report.cost.avg_request_units, report.cost.charged_inserts
    );
    let _ = writeln!(
        out,
        "  Serverless cost: {}",
        format_cost(report.cost.serverless_cost)
    );
    let _ = write!(
        out,
        "  Projected cost for {} documents: {}",
        format_count(projection_documents as f64),
        format_cost(report.cost.project(projection_documents))
    );
    out
}

/// Session cost totals, per-operation breakdown and budget status.
pub fn format_cost_summary(tracker: &SessionCostTracker) -> String {
    let summary = tracker.summary();
    let mut out = String::from("Session cost:\n");
    let _ = writeln!(out, "  Total: {}", format_cost(summary.total_cost));
    if summary.total_tokens > 0 {
        let _ = writeln!(
            out,
            "  Embedding tokens: {}",
            format_count(summary.total_tokens as f64)
        );
    }
    if summary.total_request_units > 0.0 {
        let _ = writeln!(
            out,
            "  Request units: {}",
            format_count(summary.total_request_units)
        );
    }
    for (operation, cost) in &summary.by_operation {
        let _ = writeln!(out, "  {}: {}", operation, format_cost(*cost));
    }
    if let (Some(limit), Some(remaining)) = (tracker.budget_limit(), tracker.remaining_budget()) {
        let status = if tracker.is_over_budget() {
            "over budget"
        } else if tracker.is_near_budget() {
            "near budget"
        } else {
            "within budget"
        };
        let _ = writeln!(
            out,
            "  Budget: {} ({} remaining, {})",
            format_cost(limit),
            format_cost(remaining),
            status
        );
    }
    out.truncate(out.trim_end().len());
    out
}

/// Configuration echo printed at the start of a workflow.
pub fn format_config(settings: &Settings) -> String {
    let mut out = String::from("Configuration:\n");
    let _ = writeln!(out, "  Cluster: {}", settings.mongo.cluster_name);
    let _ = writeln!(out, "  Database: {}", settings.mongo.database);
    let _ = writeln!(out, "  Collection: {}", settings.mongo.collection);
    let _ = writeln!(out, "  Authentication: {}", settings.auth);
    let _ = writeln!(out, "  Model: {}", settings.embedding.deployment);
    let _ = writeln!(out, "  Vector field: {}", settings.data.embedded_field);
    let _ = writeln!(out, "  Vector dimensions: {}", settings.embedding.dimensions);
    let _ = writeln!(out, "  Input file: {}", settings.data.input_file.display());
    let _ = write!(out, "  Vectors file: {}", settings.data.output_file.display());
    out
}
