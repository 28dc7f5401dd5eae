use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{prepare_snapshot, CatalogError, CatalogProvider};
use crate::db;
use crate::models::MedicalTest;

/// Catalog read from the `tests` table of a SQLite database.
///
/// Opens a read-only connection per call so the provider can be shared
/// across threads without holding a connection.
pub struct SqliteCatalog {
    path: PathBuf,
}

impl SqliteCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CatalogProvider for SqliteCatalog {
    fn list_tests(&self) -> Result<Arc<[MedicalTest]>, CatalogError> {
        if !self.path.exists() {
            return Err(CatalogError::Unavailable(format!(
                "database not found: {}",
                self.path.display()
            )));
        }
        let conn = db::open_database_read_only(&self.path)?;
        let tests = db::load_all_tests(&conn)?;
        prepare_snapshot(tests, "sqlite")
    }
}
