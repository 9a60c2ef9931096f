//! Database, collection and index listing.
//!
//! Per-item failures are rendered into the listing instead of aborting it.

use mongodb::bson::Document;
use mongodb::{Client, Database};
use std::fmt::Write;

use crate::config::MongoSettings;
use crate::report::format_index_info;
use crate::store::{collection_stats_count, list_index_documents};

/// Databases never listed.
pub const SYSTEM_DATABASES: &[&str] = &["admin", "local", "config"];

/// User databases from `names`, in order.
pub fn user_databases(names: Vec<String>) -> Vec<String> {
    names
        .into_iter()
        .filter(|n| !SYSTEM_DATABASES.contains(&n.as_str()))
        .collect()
}

/// Render the indexes of one collection.
pub fn render_indexes(out: &mut String, collection: &str, indexes: &[Document]) {
    let _ = writeln!(out, "\n{}", "=".repeat(80));
    let _ = writeln!(out, "INDEXES FOR COLLECTION: {}", collection);
    let _ = writeln!(out, "{}", "=".repeat(80));

    if indexes.is_empty() {
        let _ = writeln!(out, "No indexes found in this collection.");
        return;
    }

    let _ = writeln!(out, "Found {} index(es):\n", indexes.len());
    for (i, index) in indexes.iter().enumerate() {
        let _ = writeln!(out, "Index {}:", i + 1);
        let _ = writeln!(out, "{}", format_index_info(index));
        if i + 1 < indexes.len() {
            let _ = writeln!(out, "\n{}", "-".repeat(60));
        }
        let _ = writeln!(out);
    }
}

async fn show_collection(out: &mut String, database: &Database, collection: &str) {
    match list_index_documents(database, collection).await {
        Ok(indexes) => render_indexes(out, collection, &indexes),
        Err(e) => {
            let _ = writeln!(
                out,
                "Error retrieving indexes for collection '{}': {}",
                collection, e
            );
        }
    }
}

async fn show_database(out: &mut String, database: &Database) {
    let _ = writeln!(out, "\n{}", "#".repeat(80));
    let _ = writeln!(out, "DATABASE: {}", database.name());
    let _ = writeln!(out, "{}", "#".repeat(80));

    let names = match database.list_collection_names().await {
        Ok(names) => names,
        Err(e) => {
            let _ = writeln!(out, "Error accessing database '{}': {}", database.name(), e);
            return;
        }
    };

    if names.is_empty() {
        let _ = writeln!(out, "No collections found in this database.");
        return;
    }

    let _ = writeln!(out, "Found {} collection(s) in database:", names.len());
    for name in &names {
        match collection_stats_count(database, name).await {
            Ok(Some(count)) => {
                let _ = writeln!(out, "\nCollection: {} ({} documents)", name, count);
            }
            _ => {
                let _ = writeln!(out, "\nCollection: {}", name);
            }
        }
        show_collection(out, database, name).await;
    }
}

/// List the default collection, then every user database.
pub async fn show_indexes(client: &Client, settings: &MongoSettings) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "\n{}", "*".repeat(80));
    let _ = writeln!(out, "DEFAULT DATABASE AND COLLECTION");
    let _ = writeln!(out, "{}", "*".repeat(80));

    let database = client.database(&settings.database);
    let collection = database.collection::<Document>(&settings.collection);
    match collection.count_documents(mongodb::bson::doc! {}).await {
        Ok(count) if count > 0 => {
            let _ = writeln!(
                out,
                "Collection '{}' contains {} documents",
                settings.collection, count
            );
            show_collection(&mut out, &database, &settings.collection).await;
        }
        Ok(_) => {
            let _ = writeln!(
                out,
                "Collection '{}' is empty or doesn't exist.",
                settings.collection
            );
            let _ = writeln!(out, "Run one of the index workflows (ivf, hnsw, diskann) first.");
        }
        Err(e) => {
            let _ = writeln!(
                out,
                "Cannot access collection '{}': {}",
                settings.collection, e
            );
        }
    }

    let _ = writeln!(out, "\n{}", "*".repeat(80));
    let _ = writeln!(out, "ALL DATABASES AND COLLECTIONS");
    let _ = writeln!(out, "{}", "*".repeat(80));

    match client.list_database_names().await {
        Ok(names) => {
            let databases = user_databases(names);
            if databases.is_empty() {
                let _ = writeln!(out, "No user databases found.");
            } else {
                let _ = writeln!(out, "Found {} user database(s):", databases.len());
                for name in &databases {
                    show_database(&mut out, &client.database(name)).await;
                }
            }
        }
        Err(e) => {
            let _ = writeln!(out, "Error listing databases: {}", e);
        }
    }

    out
}
