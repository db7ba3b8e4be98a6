//! POA&M records
//!
//! A POA&M is a statement of type `poam` on a system's root element plus a
//! detail row. The poam_id is a per-system sequence number used in exports.

use anyhow::{Result, anyhow};
use rusqlite::{Row, params};
use tracing::{debug, info};

use super::database::Database;
use super::models::{PoamDetails, PoamMeta, StatementType};

const POAM_COLUMNS: &str = "p.id, p.statement_id, p.poam_id, s.body, s.status, \
     p.controls, p.weakness_name, p.weakness_detection_source, p.weakness_source_identifier, \
     p.remediation_plan, p.scheduled_completion_date, p.milestones, p.milestone_changes, \
     p.risk_rating_original, p.risk_rating_adjusted, p.poam_group, s.created_at, s.updated_at";

fn poam_from_row(row: &Row) -> rusqlite::Result<PoamMeta> {
    Ok(PoamMeta {
        id: row.get(0)?,
        statement_id: row.get(1)?,
        poam_id: row.get(2)?,
        body: row.get(3)?,
        status: row.get(4)?,
        details: PoamDetails {
            controls: row.get(5)?,
            weakness_name: row.get(6)?,
            weakness_detection_source: row.get(7)?,
            weakness_source_identifier: row.get(8)?,
            remediation_plan: row.get(9)?,
            scheduled_completion_date: row.get(10)?,
            milestones: row.get(11)?,
            milestone_changes: row.get(12)?,
            risk_rating_original: row.get(13)?,
            risk_rating_adjusted: row.get(14)?,
            poam_group: row.get(15)?,
        },
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
    })
}

impl Database {
    /// Create a POA&M on a system. The weakness description is the statement
    /// body; the poam_id is the next number in the system's sequence.
    pub fn create_poam(
        &self,
        system_id: i64,
        body: &str,
        status: Option<&str>,
        details: &PoamDetails,
    ) -> Result<PoamMeta> {
        let system = self
            .get_system(system_id)?
            .ok_or_else(|| anyhow!("System {} not found", system_id))?;

        let conn = self.conn.lock().unwrap();
        let now = Self::now();
        let tx = conn.unchecked_transaction()?;

        tx.execute(
            r#"
            INSERT INTO statements (
                body, statement_type, status, uuid, consumer_element_id, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            "#,
            params![
                body,
                StatementType::Poam.as_str(),
                status,
                uuid::Uuid::new_v4().to_string(),
                system.root_element_id,
                now,
            ],
        )?;
        let statement_id = tx.last_insert_rowid();

        // Next poam_id in this system's sequence
        let next_poam_id: i64 = tx.query_row(
            r#"
            SELECT COALESCE(MAX(p.poam_id), 0) + 1
            FROM poams p
            JOIN statements s ON s.id = p.statement_id
            WHERE s.consumer_element_id = ?1
            "#,
            [system.root_element_id],
            |row| row.get(0),
        )?;

        tx.execute(
            r#"
            INSERT INTO poams (
                statement_id, poam_id, controls, weakness_name, weakness_detection_source,
                weakness_source_identifier, remediation_plan, scheduled_completion_date,
                milestones, milestone_changes, risk_rating_original, risk_rating_adjusted,
                poam_group
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                statement_id,
                next_poam_id,
                details.controls,
                details.weakness_name,
                details.weakness_detection_source,
                details.weakness_source_identifier,
                details.remediation_plan,
                details.scheduled_completion_date,
                details.milestones,
                details.milestone_changes,
                details.risk_rating_original,
                details.risk_rating_adjusted,
                details.poam_group,
            ],
        )?;
        let id = tx.last_insert_rowid();

        tx.commit()?;

        info!(system_id, poam_id = next_poam_id, "POA&M created");

        let poam = conn.query_row(
            &format!(
                "SELECT {POAM_COLUMNS} FROM poams p \
                 JOIN statements s ON s.id = p.statement_id WHERE p.id = ?1"
            ),
            [id],
            poam_from_row,
        )?;
        Ok(poam)
    }

    /// Get a POA&M by its row id
    pub fn get_poam(&self, id: i64) -> Result<Option<PoamMeta>> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            &format!(
                "SELECT {POAM_COLUMNS} FROM poams p \
                 JOIN statements s ON s.id = p.statement_id WHERE p.id = ?1"
            ),
            [id],
            poam_from_row,
        );
        match result {
            Ok(poam) => Ok(Some(poam)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// List a system's POA&Ms in sequence order
    pub fn list_poams(&self, system_id: i64) -> Result<Vec<PoamMeta>> {
        let system = self
            .get_system(system_id)?
            .ok_or_else(|| anyhow!("System {} not found", system_id))?;

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {POAM_COLUMNS} FROM poams p \
             JOIN statements s ON s.id = p.statement_id \
             WHERE s.consumer_element_id = ?1 ORDER BY p.poam_id"
        ))?;
        let rows = stmt.query_map([system.root_element_id], poam_from_row)?;
        let results: Result<Vec<_>, _> = rows.collect();
        Ok(results?)
    }

    /// Update a POA&M's weakness description, status, and details
    pub fn update_poam(
        &self,
        id: i64,
        body: Option<&str>,
        status: Option<&str>,
        details: &PoamDetails,
    ) -> Result<bool> {
        let poam = match self.get_poam(id)? {
            Some(p) => p,
            None => return Ok(false),
        };

        let conn = self.conn.lock().unwrap();
        let now = Self::now();
        let tx = conn.unchecked_transaction()?;

        tx.execute(
            "UPDATE statements SET body = COALESCE(?1, body), status = COALESCE(?2, status), \
             updated_at = ?3 WHERE id = ?4",
            params![body, status, now, poam.statement_id],
        )?;

        let affected = tx.execute(
            r#"
            UPDATE poams SET
                controls = COALESCE(?1, controls),
                weakness_name = COALESCE(?2, weakness_name),
                weakness_detection_source = COALESCE(?3, weakness_detection_source),
                weakness_source_identifier = COALESCE(?4, weakness_source_identifier),
                remediation_plan = COALESCE(?5, remediation_plan),
                scheduled_completion_date = COALESCE(?6, scheduled_completion_date),
                milestones = COALESCE(?7, milestones),
                milestone_changes = COALESCE(?8, milestone_changes),
                risk_rating_original = COALESCE(?9, risk_rating_original),
                risk_rating_adjusted = COALESCE(?10, risk_rating_adjusted),
                poam_group = COALESCE(?11, poam_group)
            WHERE id = ?12
            "#,
            params![
                details.controls,
                details.weakness_name,
                details.weakness_detection_source,
                details.weakness_source_identifier,
                details.remediation_plan,
                details.scheduled_completion_date,
                details.milestones,
                details.milestone_changes,
                details.risk_rating_original,
                details.risk_rating_adjusted,
                details.poam_group,
                id,
            ],
        )?;

        tx.commit()?;

        debug!(poam_id = id, updated = affected > 0, "POA&M updated");
        Ok(affected > 0)
    }

    /// Delete a POA&M. Deleting the statement cascades to the detail row.
    pub fn delete_poam(&self, id: i64) -> Result<bool> {
        let poam = match self.get_poam(id)? {
            Some(p) => p,
            None => return Ok(false),
        };
        self.delete_statement(poam.statement_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Database, i64) {
        let db = Database::new(":memory:").expect("Failed to create database");
        let system = db.create_system("Agency GRC", None, "alice").unwrap();
        (db, system.id)
    }

    fn weak_password_details() -> PoamDetails {
        PoamDetails {
            controls: Some("ia-5".to_string()),
            weakness_name: Some("Weak password policy".to_string()),
            risk_rating_original: Some("high".to_string()),
            scheduled_completion_date: Some("2026-12-31".to_string()),
            ..default_details()
        }
    }

    fn default_details() -> PoamDetails {
        PoamDetails {
            controls: None,
            weakness_name: None,
            weakness_detection_source: None,
            weakness_source_identifier: None,
            remediation_plan: None,
            scheduled_completion_date: None,
            milestones: None,
            milestone_changes: None,
            risk_rating_original: None,
            risk_rating_adjusted: None,
            poam_group: None,
        }
    }

    #[test]
    fn test_create_poam_sequential_ids() {
        let (db, system_id) = setup();
        let first = db
            .create_poam(system_id, "Passwords too short", Some("open"), &weak_password_details())
            .unwrap();
        let second = db
            .create_poam(system_id, "Logs not reviewed", Some("open"), &default_details())
            .unwrap();

        assert_eq!(first.poam_id, 1);
        assert_eq!(second.poam_id, 2);

        // A second system starts its own sequence
        let other = db.create_system("Other System", None, "alice").unwrap();
        let third = db
            .create_poam(other.id, "Unpatched host", None, &default_details())
            .unwrap();
        assert_eq!(third.poam_id, 1);
    }

    #[test]
    fn test_list_and_get_poams() {
        let (db, system_id) = setup();
        db.create_poam(system_id, "Passwords too short", Some("open"), &weak_password_details())
            .unwrap();

        let poams = db.list_poams(system_id).unwrap();
        assert_eq!(poams.len(), 1);
        assert_eq!(poams[0].body, "Passwords too short");
        assert_eq!(poams[0].details.weakness_name.as_deref(), Some("Weak password policy"));

        let fetched = db.get_poam(poams[0].id).unwrap().unwrap();
        assert_eq!(fetched.details.controls.as_deref(), Some("ia-5"));
    }

    #[test]
    fn test_update_poam_partial() {
        let (db, system_id) = setup();
        let poam = db
            .create_poam(system_id, "Passwords too short", Some("open"), &weak_password_details())
            .unwrap();

        let updated = db
            .update_poam(
                poam.id,
                None,
                Some("closed"),
                &PoamDetails {
                    risk_rating_adjusted: Some("low".to_string()),
                    ..default_details()
                },
            )
            .unwrap();
        assert!(updated);

        let fetched = db.get_poam(poam.id).unwrap().unwrap();
        assert_eq!(fetched.status.as_deref(), Some("closed"));
        assert_eq!(fetched.body, "Passwords too short");
        assert_eq!(fetched.details.risk_rating_adjusted.as_deref(), Some("low"));
        // Untouched detail fields survive
        assert_eq!(fetched.details.risk_rating_original.as_deref(), Some("high"));
    }

    #[test]
    fn test_delete_poam_removes_statement() {
        let (db, system_id) = setup();
        let poam = db
            .create_poam(system_id, "Passwords too short", None, &default_details())
            .unwrap();

        assert!(db.delete_poam(poam.id).unwrap());
        assert!(db.get_poam(poam.id).unwrap().is_none());
        assert!(db.get_statement(poam.statement_id).unwrap().is_none());
    }

    #[test]
    fn test_poam_status_counts() {
        let (db, system_id) = setup();
        db.create_poam(system_id, "W1", Some("open"), &default_details()).unwrap();
        db.create_poam(system_id, "W2", Some("open"), &default_details()).unwrap();
        db.create_poam(system_id, "W3", Some("closed"), &default_details()).unwrap();

        let counts = db.poam_status_counts(system_id).unwrap();
        assert_eq!(counts["open"], 2);
        assert_eq!(counts["closed"], 1);
    }
}
