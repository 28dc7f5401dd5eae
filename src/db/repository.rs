use rusqlite::{params, Connection, Row};

use crate::db::DatabaseError;
use crate::models::MedicalTest;

/// All catalog tests ordered by name.
///
/// `synonyms` and `embeddings` are stored as JSON arrays; a NULL or empty
/// `embeddings` column yields a test without vectors. `embeddings_model`
/// records which encoder produced them.
pub fn load_all_tests(conn: &Connection) -> Result<Vec<MedicalTest>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, name, category, synonyms, embeddings, embeddings_model FROM tests ORDER BY name",
    )?;
    let rows = stmt
        .query_map([], raw_row)?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter().map(RawTestRow::into_test).collect()
}

pub fn count_tests(conn: &Connection) -> Result<i64, DatabaseError> {
    let count = conn.query_row("SELECT COUNT(*) FROM tests", [], |row| row.get(0))?;
    Ok(count)
}

/// Insert or replace a test. Used by catalog tooling and tests; the matching
/// engine never writes.
pub fn upsert_test(conn: &Connection, test: &MedicalTest) -> Result<(), DatabaseError> {
    let synonyms = serde_json::to_string(&test.synonyms)
        .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?;
    let embeddings = if test.synonym_embeddings.is_empty() {
        None
    } else {
        Some(
            serde_json::to_string(&test.synonym_embeddings)
                .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        )
    };
    let embeddings_updated = embeddings
        .as_ref()
        .map(|_| chrono::Utc::now().to_rfc3339());
    let embeddings_model = embeddings.as_ref().and(test.embedding_model.as_deref());

    conn.execute(
        "INSERT INTO tests (id, name, category, synonyms, embeddings, embeddings_updated, embeddings_model)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            category = excluded.category,
            synonyms = excluded.synonyms,
            embeddings = excluded.embeddings,
            embeddings_updated = excluded.embeddings_updated,
            embeddings_model = excluded.embeddings_model",
        params![
            test.id,
            test.name,
            test.category,
            synonyms,
            embeddings,
            embeddings_updated,
            embeddings_model
        ],
    )?;
    Ok(())
}

struct RawTestRow {
    id: String,
    name: String,
    category: String,
    synonyms: String,
    embeddings: Option<String>,
    embeddings_model: Option<String>,
}

fn raw_row(row: &Row<'_>) -> rusqlite::Result<RawTestRow> {
    Ok(RawTestRow {
        id: row.get(0)?,
        name: row.get(1)?,
        category: row.get(2)?,
        synonyms: row.get(3)?,
        embeddings: row.get(4)?,
        embeddings_model: row.get(5)?,
    })
}

impl RawTestRow {
    fn into_test(self) -> Result<MedicalTest, DatabaseError> {
        let synonyms: Vec<String> = serde_json::from_str(&self.synonyms).map_err(|e| {
            DatabaseError::ConstraintViolation(format!("synonyms of test {}: {e}", self.id))
        })?;

        let synonym_embeddings: Vec<Vec<f32>> = match self.embeddings.as_deref() {
            None | Some("") => Vec::new(),
            Some(json) => serde_json::from_str(json).map_err(|e| {
                DatabaseError::ConstraintViolation(format!("embeddings of test {}: {e}", self.id))
            })?,
        };

        Ok(MedicalTest {
            id: self.id,
            name: self.name,
            category: self.category,
            synonyms,
            synonym_embeddings,
            embedding_model: self.embeddings_model,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;

    #[test]
    fn upsert_then_load_round_trips() {
        let conn = open_memory_database().unwrap();
        let cbc = MedicalTest::new("cbc", "CBC", "Hematology", &["cbc", "hemogram"])
            .with_embeddings(vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        upsert_test(&conn, &cbc).unwrap();

        let loaded = load_all_tests(&conn).unwrap();
        assert_eq!(loaded, vec![cbc]);
    }

    #[test]
    fn embedding_model_is_stored_with_vectors() {
        let conn = open_memory_database().unwrap();
        let esr = MedicalTest::new("esr", "ESR", "Hematology", &["esr"])
            .with_embeddings(vec![vec![0.0, 1.0]])
            .embedded_by("sha256-hashing-2");
        upsert_test(&conn, &esr).unwrap();

        let loaded = load_all_tests(&conn).unwrap();
        assert_eq!(loaded[0].embedding_model.as_deref(), Some("sha256-hashing-2"));
        assert_eq!(loaded[0].embedding_source(), "sha256-hashing-2");
    }

    #[test]
    fn upsert_replaces_existing_row() {
        let conn = open_memory_database().unwrap();
        upsert_test(&conn, &MedicalTest::new("esr", "ESR", "lab", &["esr"])).unwrap();
        upsert_test(&conn, &MedicalTest::new("esr", "ESR", "Hematology", &["esr", "sed rate"])).unwrap();

        assert_eq!(count_tests(&conn).unwrap(), 1);
        let loaded = load_all_tests(&conn).unwrap();
        assert_eq!(loaded[0].category, "Hematology");
        assert_eq!(loaded[0].synonyms.len(), 2);
    }

    #[test]
    fn null_embeddings_load_as_empty() {
        let conn = open_memory_database().unwrap();
        conn.execute(
            "INSERT INTO tests (id, name, category, synonyms) VALUES ('tsh', 'TSH', 'Endocrine', '[\"tsh\"]')",
            [],
        )
        .unwrap();
        let loaded = load_all_tests(&conn).unwrap();
        assert!(loaded[0].synonym_embeddings.is_empty());
        assert!(!loaded[0].has_embeddings());
    }

    #[test]
    fn corrupt_synonyms_json_is_rejected() {
        let conn = open_memory_database().unwrap();
        conn.execute(
            "INSERT INTO tests (id, name, category, synonyms) VALUES ('x', 'X', 'lab', 'not json')",
            [],
        )
        .unwrap();
        assert!(matches!(
            load_all_tests(&conn),
            Err(DatabaseError::ConstraintViolation(_))
        ));
    }

    #[test]
    fn tests_are_ordered_by_name() {
        let conn = open_memory_database().unwrap();
        for (id, name) in [("tsh", "TSH"), ("cbc", "CBC"), ("lft", "LFT")] {
            upsert_test(&conn, &MedicalTest::new(id, name, "lab", &[id])).unwrap();
        }
        let names: Vec<_> = load_all_tests(&conn).unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(names, ["CBC", "LFT", "TSH"]);
    }
}
