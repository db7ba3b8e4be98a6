//! Cached control catalogs and their baselines

use anyhow::{Context, Result};
use rusqlite::params;
use tracing::{debug, info};

use crate::catalog::oscalize_control_id;

use super::database::Database;
use super::models::CatalogMeta;

impl Database {
    /// Insert or replace a catalog and its baselines
    pub fn upsert_catalog(
        &self,
        catalog_key: &str,
        catalog: &serde_json::Value,
        baselines: Option<&serde_json::Value>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Self::now();

        let catalog_json = serde_json::to_string(catalog)?;
        let baselines_json = baselines.map(serde_json::to_string).transpose()?;

        conn.execute(
            r#"
            INSERT INTO catalogs (catalog_key, catalog_json, baselines_json, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            ON CONFLICT(catalog_key) DO UPDATE SET
                catalog_json = excluded.catalog_json,
                baselines_json = excluded.baselines_json,
                updated_at = excluded.updated_at
            "#,
            params![catalog_key, catalog_json, baselines_json, now],
        )?;

        info!(catalog = %catalog_key, size = catalog_json.len(), "Catalog stored");
        Ok(())
    }

    /// Get a catalog's raw OSCAL JSON
    pub fn get_catalog(&self, catalog_key: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.conn.lock().unwrap();
        let result: Result<String, _> = conn.query_row(
            "SELECT catalog_json FROM catalogs WHERE catalog_key = ?1",
            [catalog_key],
            |row| row.get(0),
        );
        match result {
            Ok(raw) => Ok(Some(
                serde_json::from_str(&raw).context("Stored catalog is not valid JSON")?,
            )),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Get the baseline map for a catalog
    pub fn get_baselines(&self, catalog_key: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.conn.lock().unwrap();
        let result: Result<Option<String>, _> = conn.query_row(
            "SELECT baselines_json FROM catalogs WHERE catalog_key = ?1",
            [catalog_key],
            |row| row.get(0),
        );
        match result {
            Ok(Some(raw)) => Ok(Some(
                serde_json::from_str(&raw).context("Stored baselines are not valid JSON")?,
            )),
            Ok(None) => Ok(None),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Control ids of one named baseline, normalized to OSCAL form
    pub fn get_baseline_controls(
        &self,
        catalog_key: &str,
        baseline_name: &str,
    ) -> Result<Option<Vec<String>>> {
        let baselines = match self.get_baselines(catalog_key)? {
            Some(b) => b,
            None => return Ok(None),
        };
        let controls = match baselines.get(baseline_name).and_then(|v| v.as_array()) {
            Some(list) => list,
            None => return Ok(None),
        };
        let normalized = controls
            .iter()
            .filter_map(|v| v.as_str())
            .map(oscalize_control_id)
            .collect();
        Ok(Some(normalized))
    }

    /// List stored catalogs with their titles and baseline names
    pub fn list_catalogs(&self) -> Result<Vec<CatalogMeta>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT catalog_key, catalog_json, baselines_json, created_at, updated_at \
             FROM catalogs ORDER BY catalog_key",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut results = Vec::new();
        for row in rows {
            let (catalog_key, catalog_json, baselines_json, created_at, updated_at) = row?;
            let catalog: serde_json::Value =
                serde_json::from_str(&catalog_json).unwrap_or_default();
            let title = catalog
                .pointer("/catalog/metadata/title")
                .and_then(|v| v.as_str())
                .map(String::from);
            let baseline_names = baselines_json
                .and_then(|raw| serde_json::from_str::<serde_json::Value>(&raw).ok())
                .and_then(|b| {
                    b.as_object()
                        .map(|m| m.keys().cloned().collect::<Vec<String>>())
                })
                .unwrap_or_default();
            results.push(CatalogMeta {
                catalog_key,
                title,
                baseline_names,
                created_at,
                updated_at,
            });
        }
        Ok(results)
    }

    /// Delete a stored catalog
    pub fn delete_catalog(&self, catalog_key: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute("DELETE FROM catalogs WHERE catalog_key = ?1", [catalog_key])?;
        debug!(catalog = %catalog_key, deleted = affected > 0, "Catalog delete attempted");
        Ok(affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_catalog() -> serde_json::Value {
        json!({
            "catalog": {
                "uuid": "11111111-2222-3333-4444-555555555555",
                "metadata": { "title": "Test Catalog", "version": "5.0" },
                "groups": []
            }
        })
    }

    #[test]
    fn test_upsert_and_get_catalog() {
        let db = Database::new(":memory:").expect("Failed to create database");
        db.upsert_catalog("TEST_CAT", &test_catalog(), None).unwrap();

        let catalog = db.get_catalog("TEST_CAT").unwrap().unwrap();
        assert_eq!(
            catalog.pointer("/catalog/metadata/title").unwrap(),
            "Test Catalog"
        );
        assert!(db.get_catalog("MISSING").unwrap().is_none());
    }

    #[test]
    fn test_upsert_replaces_existing() {
        let db = Database::new(":memory:").expect("Failed to create database");
        db.upsert_catalog("TEST_CAT", &test_catalog(), None).unwrap();

        let mut updated = test_catalog();
        updated["catalog"]["metadata"]["title"] = json!("Revised Catalog");
        db.upsert_catalog("TEST_CAT", &updated, None).unwrap();

        let catalogs = db.list_catalogs().unwrap();
        assert_eq!(catalogs.len(), 1);
        assert_eq!(catalogs[0].title.as_deref(), Some("Revised Catalog"));
    }

    #[test]
    fn test_baseline_controls_normalized() {
        let db = Database::new(":memory:").expect("Failed to create database");
        let baselines = json!({
            "low": ["AC-2", "AC-2 (1)", "au-3"],
        });
        db.upsert_catalog("TEST_CAT", &test_catalog(), Some(&baselines))
            .unwrap();

        let controls = db.get_baseline_controls("TEST_CAT", "low").unwrap().unwrap();
        assert_eq!(controls, vec!["ac-2", "ac-2.1", "au-3"]);

        assert!(db.get_baseline_controls("TEST_CAT", "high").unwrap().is_none());
        assert!(db.get_baseline_controls("MISSING", "low").unwrap().is_none());
    }

    #[test]
    fn test_list_catalogs_includes_baseline_names() {
        let db = Database::new(":memory:").expect("Failed to create database");
        let baselines = json!({ "low": [], "moderate": [] });
        db.upsert_catalog("TEST_CAT", &test_catalog(), Some(&baselines))
            .unwrap();

        let catalogs = db.list_catalogs().unwrap();
        assert_eq!(catalogs[0].catalog_key, "TEST_CAT");
        assert!(catalogs[0].baseline_names.contains(&"low".to_string()));
        assert!(catalogs[0].baseline_names.contains(&"moderate".to_string()));
    }
}
