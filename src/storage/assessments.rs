//! Deployments and system assessment results

use anyhow::{Result, anyhow, bail};
use rusqlite::{Row, params};
use tracing::{debug, info};

use super::database::Database;
use super::models::{AssessmentMeta, DeploymentMeta};

const DEPLOYMENT_COLUMNS: &str =
    "id, system_id, name, description, uuid, inventory_items, created_at, updated_at";

const ASSESSMENT_COLUMNS: &str = "id, system_id, deployment_id, name, description, uuid, \
     assessment_results, created_at, updated_at";

fn json_column(raw: Option<String>) -> serde_json::Value {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or(serde_json::Value::Null)
}

fn deployment_from_row(row: &Row) -> rusqlite::Result<DeploymentMeta> {
    Ok(DeploymentMeta {
        id: row.get(0)?,
        system_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        uuid: row.get(4)?,
        inventory_items: json_column(row.get(5)?),
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn assessment_from_row(row: &Row) -> rusqlite::Result<AssessmentMeta> {
    Ok(AssessmentMeta {
        id: row.get(0)?,
        system_id: row.get(1)?,
        deployment_id: row.get(2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        uuid: row.get(5)?,
        assessment_results: json_column(row.get(6)?),
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

impl Database {
    /// Create a deployment of a system
    pub fn create_deployment(
        &self,
        system_id: i64,
        name: &str,
        description: &str,
        inventory_items: Option<&serde_json::Value>,
    ) -> Result<DeploymentMeta> {
        if self.get_system(system_id)?.is_none() {
            bail!("System {} not found", system_id);
        }

        let conn = self.conn.lock().unwrap();
        let now = Self::now();
        let inventory_json = inventory_items.map(serde_json::to_string).transpose()?;

        conn.execute(
            r#"
            INSERT INTO deployments (
                system_id, name, description, uuid, inventory_items, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            "#,
            params![
                system_id,
                name,
                description,
                uuid::Uuid::new_v4().to_string(),
                inventory_json,
                now,
            ],
        )?;
        let id = conn.last_insert_rowid();

        info!(system_id, deployment_id = id, name = %name, "Deployment created");

        let deployment = conn.query_row(
            &format!("SELECT {DEPLOYMENT_COLUMNS} FROM deployments WHERE id = ?1"),
            [id],
            deployment_from_row,
        )?;
        Ok(deployment)
    }

    /// Get a deployment by id
    pub fn get_deployment(&self, id: i64) -> Result<Option<DeploymentMeta>> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            &format!("SELECT {DEPLOYMENT_COLUMNS} FROM deployments WHERE id = ?1"),
            [id],
            deployment_from_row,
        );
        match result {
            Ok(deployment) => Ok(Some(deployment)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// List a system's deployments
    pub fn list_deployments(&self, system_id: i64) -> Result<Vec<DeploymentMeta>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {DEPLOYMENT_COLUMNS} FROM deployments \
             WHERE system_id = ?1 ORDER BY name COLLATE NOCASE"
        ))?;
        let rows = stmt.query_map([system_id], deployment_from_row)?;
        let results: Result<Vec<_>, _> = rows.collect();
        Ok(results?)
    }

    /// Update a deployment's name, description, and inventory
    pub fn update_deployment(
        &self,
        id: i64,
        name: &str,
        description: &str,
        inventory_items: Option<&serde_json::Value>,
    ) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let now = Self::now();
        let inventory_json = inventory_items.map(serde_json::to_string).transpose()?;

        let affected = conn.execute(
            "UPDATE deployments SET name = ?1, description = ?2, \
             inventory_items = COALESCE(?3, inventory_items), updated_at = ?4 WHERE id = ?5",
            params![name, description, inventory_json, now, id],
        )?;

        debug!(deployment_id = id, updated = affected > 0, "Deployment updated");
        Ok(affected > 0)
    }

    /// Delete a deployment. Assessments keep their rows with a null deployment.
    pub fn delete_deployment(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute("DELETE FROM deployments WHERE id = ?1", [id])?;
        debug!(deployment_id = id, deleted = affected > 0, "Deployment delete attempted");
        Ok(affected > 0)
    }

    /// Record an assessment result for a system, optionally tied to one of
    /// its deployments
    pub fn create_assessment(
        &self,
        system_id: i64,
        deployment_id: Option<i64>,
        name: &str,
        description: Option<&str>,
        results: &serde_json::Value,
    ) -> Result<AssessmentMeta> {
        if self.get_system(system_id)?.is_none() {
            bail!("System {} not found", system_id);
        }
        if let Some(dep_id) = deployment_id {
            let deployment = self
                .get_deployment(dep_id)?
                .ok_or_else(|| anyhow!("Deployment {} not found", dep_id))?;
            if deployment.system_id != system_id {
                bail!("Deployment {} belongs to a different system", dep_id);
            }
        }

        let conn = self.conn.lock().unwrap();
        let now = Self::now();
        let results_json = serde_json::to_string(results)?;

        conn.execute(
            r#"
            INSERT INTO assessments (
                system_id, deployment_id, name, description, uuid,
                assessment_results, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            "#,
            params![
                system_id,
                deployment_id,
                name,
                description,
                uuid::Uuid::new_v4().to_string(),
                results_json,
                now,
            ],
        )?;
        let id = conn.last_insert_rowid();

        info!(system_id, assessment_id = id, name = %name, "Assessment recorded");

        let assessment = conn.query_row(
            &format!("SELECT {ASSESSMENT_COLUMNS} FROM assessments WHERE id = ?1"),
            [id],
            assessment_from_row,
        )?;
        Ok(assessment)
    }

    /// Get an assessment by id
    pub fn get_assessment(&self, id: i64) -> Result<Option<AssessmentMeta>> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            &format!("SELECT {ASSESSMENT_COLUMNS} FROM assessments WHERE id = ?1"),
            [id],
            assessment_from_row,
        );
        match result {
            Ok(assessment) => Ok(Some(assessment)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// List a system's assessments, newest first
    pub fn list_assessments(&self, system_id: i64) -> Result<Vec<AssessmentMeta>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ASSESSMENT_COLUMNS} FROM assessments \
             WHERE system_id = ?1 ORDER BY created_at DESC, id DESC"
        ))?;
        let rows = stmt.query_map([system_id], assessment_from_row)?;
        let results: Result<Vec<_>, _> = rows.collect();
        Ok(results?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn setup() -> (Database, i64) {
        let db = Database::new(":memory:").expect("Failed to create database");
        let system = db.create_system("Agency GRC", None, "alice").unwrap();
        (db, system.id)
    }

    #[test]
    fn test_create_and_list_deployments() {
        let (db, system_id) = setup();
        let inventory = json!([{ "name": "web-1", "ip": "10.0.0.5" }]);
        db.create_deployment(system_id, "prod", "Production", Some(&inventory))
            .unwrap();
        db.create_deployment(system_id, "dev", "Development", None)
            .unwrap();

        let deployments = db.list_deployments(system_id).unwrap();
        assert_eq!(deployments.len(), 2);
        assert_eq!(deployments[0].name, "dev");
        assert_eq!(deployments[1].inventory_items[0]["name"], "web-1");
    }

    #[test]
    fn test_deployment_for_unknown_system() {
        let db = Database::new(":memory:").expect("Failed to create database");
        let err = db.create_deployment(42, "prod", "", None).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_create_assessment_with_deployment() {
        let (db, system_id) = setup();
        let deployment = db
            .create_deployment(system_id, "prod", "Production", None)
            .unwrap();

        let results = json!({ "schema": "scan-v1", "findings": [{ "rule": "ssh-root-login", "pass": false }] });
        let assessment = db
            .create_assessment(system_id, Some(deployment.id), "Nightly scan", None, &results)
            .unwrap();

        assert_eq!(assessment.deployment_id, Some(deployment.id));
        assert_eq!(assessment.assessment_results["schema"], "scan-v1");
    }

    #[test]
    fn test_assessment_rejects_foreign_deployment() {
        let (db, system_id) = setup();
        let other = db.create_system("Other System", None, "alice").unwrap();
        let deployment = db.create_deployment(other.id, "prod", "", None).unwrap();

        let err = db
            .create_assessment(system_id, Some(deployment.id), "Scan", None, &json!({}))
            .unwrap_err();
        assert!(err.to_string().contains("different system"));
    }

    #[test]
    fn test_list_assessments_newest_first() {
        let (db, system_id) = setup();
        db.create_assessment(system_id, None, "first", None, &json!({}))
            .unwrap();
        db.create_assessment(system_id, None, "second", None, &json!({}))
            .unwrap();

        let assessments = db.list_assessments(system_id).unwrap();
        assert_eq!(assessments.len(), 2);
        assert_eq!(assessments[0].name, "second");
    }

    #[test]
    fn test_delete_deployment_keeps_assessments() {
        let (db, system_id) = setup();
        let deployment = db.create_deployment(system_id, "prod", "", None).unwrap();
        let assessment = db
            .create_assessment(system_id, Some(deployment.id), "Scan", None, &json!({}))
            .unwrap();

        assert!(db.delete_deployment(deployment.id).unwrap());

        let fetched = db.get_assessment(assessment.id).unwrap().unwrap();
        assert_eq!(fetched.deployment_id, None);
    }
}
