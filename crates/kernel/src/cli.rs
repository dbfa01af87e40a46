//! Command-line interface: serve, dev-data import and bulk delete.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;

use crate::services::Resource;
use crate::state::AppState;
use crate::store::document::Document;

/// Tour booking API server.
#[derive(Parser, Debug)]
#[command(name = "tourbook", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP server (default).
    Serve,

    /// Load tours, users and reviews from JSON files.
    Import {
        /// Directory containing tours.json, users.json and reviews.json.
        #[arg(long, default_value = "dev-data")]
        dir: PathBuf,
    },

    /// Remove every document from every collection.
    Delete,
}

/// Documents created by an import.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub tours: usize,
    pub users: usize,
    pub reviews: usize,
}

/// Read a JSON array of objects.
fn read_documents(path: &Path) -> Result<Vec<Document>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    let Value::Array(items) = value else {
        bail!("{} must contain a JSON array", path.display());
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::Object(doc) => Ok(doc),
            _ => bail!("{}: entry {index} is not an object", path.display()),
        })
        .collect()
}

async fn import_all(
    resource: &dyn Resource,
    docs: Vec<Document>,
    file: &str,
) -> Result<usize> {
    let mut created = 0;
    for (index, doc) in docs.into_iter().enumerate() {
        let receipt = resource
            .create(doc)
            .await
            .with_context(|| format!("{file}: entry {index} was rejected"))?;
        for warning in &receipt.warnings {
            tracing::warn!(file, index, warning = %warning, "import warning");
        }
        created += 1;
    }
    Ok(created)
}

/// Import dev data. Reviews go through the review service so tour rating
/// aggregates are recomputed.
pub async fn cmd_import(state: &AppState, dir: &Path) -> Result<ImportSummary> {
    let users = read_documents(&dir.join("users.json"))?;
    let tours = read_documents(&dir.join("tours.json"))?;
    let reviews = read_documents(&dir.join("reviews.json"))?;

    let summary = ImportSummary {
        users: import_all(state.users().as_ref(), users, "users.json").await?,
        tours: import_all(state.tours().as_ref(), tours, "tours.json").await?,
        reviews: import_all(state.reviews().as_ref(), reviews, "reviews.json").await?,
    };

    info!(
        tours = summary.tours,
        users = summary.users,
        reviews = summary.reviews,
        "Data successfully loaded"
    );
    Ok(summary)
}

/// Delete every document. Returns the number removed.
pub async fn cmd_delete(state: &AppState) -> Result<u64> {
    let mut removed = 0;
    for collection in state.stores().all() {
        let count = collection
            .delete_all()
            .await
            .with_context(|| format!("failed to clear {}", collection.name()))?;
        info!(collection = collection.name(), count, "collection cleared");
        removed += count;
    }
    Ok(removed)
}
