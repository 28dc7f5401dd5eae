use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use super::{prepare_snapshot, CatalogError, CatalogProvider};
use crate::models::{slug_id, MedicalTest};

const DEFAULT_CATEGORY: &str = "lab";

/// One element of a `tests_with_embeddings.json` array.
#[derive(Debug, Deserialize)]
struct JsonTestEntry {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    synonyms: Vec<String>,
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
    #[serde(default)]
    embedding_model: Option<String>,
}

impl JsonTestEntry {
    fn into_test(self) -> MedicalTest {
        let id = self
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| slug_id(&self.name));
        let category = self
            .category
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());

        let mut synonyms = self.synonyms;
        // Some exports embed the display name first, then each synonym.
        if !self.embeddings.is_empty() && self.embeddings.len() == synonyms.len() + 1 {
            synonyms.insert(0, self.name.clone());
        }

        MedicalTest {
            id,
            name: self.name,
            category,
            synonyms,
            synonym_embeddings: self.embeddings,
            embedding_model: self.embedding_model,
        }
    }
}

/// Catalog read from a JSON file on every call. Wrap in `CatalogCache` to
/// avoid re-reading.
pub struct JsonFileCatalog {
    path: PathBuf,
}

impl JsonFileCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CatalogProvider for JsonFileCatalog {
    fn list_tests(&self) -> Result<Arc<[MedicalTest]>, CatalogError> {
        let raw = std::fs::read_to_string(&self.path)?;
        let entries: Vec<JsonTestEntry> = serde_json::from_str(&raw)?;
        let tests = entries.into_iter().map(JsonTestEntry::into_test).collect();
        let source = self.path.display().to_string();
        prepare_snapshot(tests, &source)
    }
}
