//! Read-only sources of the test catalog.
//!
//! The matching engine depends only on [`CatalogProvider::list_tests`].
//! Freshness is handled by wrapping a provider in [`CatalogCache`].

pub mod cache;
pub mod json_file;
pub mod sqlite;
pub mod static_catalog;

pub use cache::CatalogCache;
pub use json_file::JsonFileCatalog;
pub use sqlite::SqliteCatalog;
pub use static_catalog::StaticCatalog;

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;

use crate::db::DatabaseError;
use crate::models::MedicalTest;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Catalog I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Catalog JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Catalog database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Invalid catalog: {0}")]
    Invalid(String),

    #[error("Catalog unavailable: {0}")]
    Unavailable(String),
}

/// Source of the tests a transcript is matched against.
///
/// Calls may block on disk or database access; the engine runs them on the
/// blocking pool. Returned snapshots are immutable and shared.
pub trait CatalogProvider: Send + Sync {
    fn list_tests(&self) -> Result<Arc<[MedicalTest]>, CatalogError>;
}

/// Turn raw entries into a matchable snapshot.
///
/// Mismatched embeddings are dropped so the test stays arbiter-only. Entries
/// that still fail validation are skipped. Duplicate ids are an error.
pub(crate) fn prepare_snapshot(
    tests: Vec<MedicalTest>,
    source: &str,
) -> Result<Arc<[MedicalTest]>, CatalogError> {
    let mut ids = HashSet::new();
    let mut prepared = Vec::with_capacity(tests.len());

    for test in tests {
        let test = if !test.synonym_embeddings.is_empty() && !test.has_embeddings() {
            tracing::warn!(
                source,
                test_id = %test.id,
                synonyms = test.synonyms.len(),
                embeddings = test.synonym_embeddings.len(),
                "Embedding count does not match synonyms, test is arbiter-only"
            );
            test.without_embeddings()
        } else {
            test
        };

        if let Err(reason) = test.validate() {
            tracing::warn!(source, reason = %reason, "Skipping invalid catalog entry");
            continue;
        }

        if !ids.insert(test.id.clone()) {
            return Err(CatalogError::Invalid(format!(
                "duplicate test id '{}' in {source}",
                test.id
            )));
        }

        prepared.push(test);
    }

    tracing::debug!(
        source,
        tests = prepared.len(),
        embedded = prepared.iter().filter(|t| t.has_embeddings()).count(),
        "Catalog snapshot prepared"
    );

    Ok(prepared.into())
}
