use std::sync::Arc;

use super::{prepare_snapshot, CatalogError, CatalogProvider};
use crate::models::MedicalTest;

/// Fixed in-memory catalog.
pub struct StaticCatalog {
    tests: Arc<[MedicalTest]>,
}

impl StaticCatalog {
    pub fn new(tests: Vec<MedicalTest>) -> Result<Self, CatalogError> {
        Ok(Self {
            tests: prepare_snapshot(tests, "static")?,
        })
    }

    pub fn empty() -> Self {
        Self {
            tests: Arc::from(Vec::new()),
        }
    }
}

impl CatalogProvider for StaticCatalog {
    fn list_tests(&self) -> Result<Arc<[MedicalTest]>, CatalogError> {
        Ok(Arc::clone(&self.tests))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_shared_snapshot() {
        let catalog = StaticCatalog::new(vec![MedicalTest::new("cbc", "CBC", "lab", &["cbc"])]).unwrap();
        let a = catalog.list_tests().unwrap();
        let b = catalog.list_tests().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a[0].id, "cbc");
    }

    #[test]
    fn empty_catalog_lists_nothing() {
        assert!(StaticCatalog::empty().list_tests().unwrap().is_empty());
    }
}
