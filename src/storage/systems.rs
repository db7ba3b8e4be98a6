//! Systems: root-element wrappers and system-level security statements

use anyhow::{Result, anyhow};
use rusqlite::{Row, params};
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::database::Database;
use super::models::{StatementType, SystemMeta};

const SYSTEM_COLUMNS: &str = "sys.id, sys.root_element_id, e.name, sys.fisma_id, sys.owner, \
     sys.created_at, sys.updated_at";

fn system_from_row(row: &Row) -> rusqlite::Result<SystemMeta> {
    Ok(SystemMeta {
        id: row.get(0)?,
        root_element_id: row.get(1)?,
        name: row.get(2)?,
        fisma_id: row.get(3)?,
        owner: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

impl Database {
    /// Create a system and its root element in one transaction
    pub fn create_system(
        &self,
        name: &str,
        fisma_id: Option<&str>,
        owner: &str,
    ) -> Result<SystemMeta> {
        let conn = self.conn.lock().unwrap();
        let now = Self::now();
        let tx = conn.unchecked_transaction()?;

        tx.execute(
            r#"
            INSERT INTO elements (name, description, element_type, uuid, owner, created_at, updated_at)
            VALUES (?1, ?2, 'system', ?3, ?4, ?5, ?5)
            "#,
            params![
                name,
                format!("Root element for system '{}'", name),
                uuid::Uuid::new_v4().to_string(),
                owner,
                now,
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                anyhow!("Element name '{}' already exists", name)
            }
            other => other.into(),
        })?;
        let root_element_id = tx.last_insert_rowid();

        tx.execute(
            r#"
            INSERT INTO systems (root_element_id, fisma_id, owner, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            "#,
            params![root_element_id, fisma_id, owner, now],
        )?;
        let id = tx.last_insert_rowid();

        tx.commit()?;

        info!(system_id = id, root_element_id, name = %name, "System created");

        let system = conn.query_row(
            &format!(
                "SELECT {SYSTEM_COLUMNS} FROM systems sys \
                 JOIN elements e ON e.id = sys.root_element_id WHERE sys.id = ?1"
            ),
            [id],
            system_from_row,
        )?;
        Ok(system)
    }

    /// Get a system by id
    pub fn get_system(&self, id: i64) -> Result<Option<SystemMeta>> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            &format!(
                "SELECT {SYSTEM_COLUMNS} FROM systems sys \
                 JOIN elements e ON e.id = sys.root_element_id WHERE sys.id = ?1"
            ),
            [id],
            system_from_row,
        );
        match result {
            Ok(system) => Ok(Some(system)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// List all systems
    pub fn list_systems(&self) -> Result<Vec<SystemMeta>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SYSTEM_COLUMNS} FROM systems sys \
             JOIN elements e ON e.id = sys.root_element_id ORDER BY e.name COLLATE NOCASE"
        ))?;
        let rows = stmt.query_map([], system_from_row)?;
        let results: Result<Vec<_>, _> = rows.collect();
        Ok(results?)
    }

    /// Rename a system or change its FISMA id
    pub fn update_system(&self, id: i64, name: &str, fisma_id: Option<&str>) -> Result<bool> {
        let system = match self.get_system(id)? {
            Some(s) => s,
            None => return Ok(false),
        };

        let conn = self.conn.lock().unwrap();
        let now = Self::now();
        let tx = conn.unchecked_transaction()?;

        tx.execute(
            "UPDATE elements SET name = ?1, updated_at = ?2 WHERE id = ?3",
            params![name, now, system.root_element_id],
        )?;
        let affected = tx.execute(
            "UPDATE systems SET fisma_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![fisma_id, now, id],
        )?;
        tx.commit()?;

        debug!(system_id = id, updated = affected > 0, "System updated");
        Ok(affected > 0)
    }

    /// Delete a system by deleting its root element. Statements, selected
    /// controls, deployments, and assessments cascade.
    pub fn delete_system(&self, id: i64) -> Result<bool> {
        let system = match self.get_system(id)? {
            Some(s) => s,
            None => return Ok(false),
        };
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute(
            "DELETE FROM elements WHERE id = ?1",
            [system.root_element_id],
        )?;
        debug!(system_id = id, deleted = affected > 0, "System delete attempted");
        Ok(affected > 0)
    }

    /// Set the system's security sensitivity level (low, moderate, high).
    /// Stored as a single special statement on the root element.
    pub fn set_security_sensitivity_level(&self, system_id: i64, level: &str) -> Result<String> {
        let system = self
            .get_system(system_id)?
            .ok_or_else(|| anyhow!("System {} not found", system_id))?;
        self.upsert_special_statement(
            system.root_element_id,
            StatementType::SecuritySensitivityLevel,
            level,
        )?;
        Ok(level.to_string())
    }

    /// Current security sensitivity level, if set
    pub fn get_security_sensitivity_level(&self, system_id: i64) -> Result<Option<String>> {
        let system = self
            .get_system(system_id)?
            .ok_or_else(|| anyhow!("System {} not found", system_id))?;
        self.get_special_statement_body(
            system.root_element_id,
            StatementType::SecuritySensitivityLevel,
        )
    }

    /// Set the CIA impact levels. Stored as a JSON object in a single special
    /// statement on the root element.
    pub fn set_security_impact_level(
        &self,
        system_id: i64,
        impact: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let system = self
            .get_system(system_id)?
            .ok_or_else(|| anyhow!("System {} not found", system_id))?;
        let body = serde_json::to_string(impact)?;
        self.upsert_special_statement(
            system.root_element_id,
            StatementType::SecurityImpactLevel,
            &body,
        )?;
        Ok(impact.clone())
    }

    /// Current CIA impact levels, if set
    pub fn get_security_impact_level(&self, system_id: i64) -> Result<Option<serde_json::Value>> {
        let system = self
            .get_system(system_id)?
            .ok_or_else(|| anyhow!("System {} not found", system_id))?;
        let body = self.get_special_statement_body(
            system.root_element_id,
            StatementType::SecurityImpactLevel,
        )?;
        match body {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// POA&M counts per status for a system
    pub fn poam_status_counts(&self, system_id: i64) -> Result<BTreeMap<String, i64>> {
        let system = self
            .get_system(system_id)?
            .ok_or_else(|| anyhow!("System {} not found", system_id))?;

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT COALESCE(s.status, 'unknown'), COUNT(*)
            FROM statements s
            WHERE s.consumer_element_id = ?1 AND s.statement_type = ?2
            GROUP BY s.status
            "#,
        )?;
        let rows = stmt.query_map(
            params![system.root_element_id, StatementType::Poam.as_str()],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
        )?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let (status, count) = row?;
            counts.insert(status, count);
        }
        Ok(counts)
    }

    /// There is at most one special statement of each type per root element
    fn upsert_special_statement(
        &self,
        root_element_id: i64,
        statement_type: StatementType,
        body: &str,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Self::now();

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM statements \
                 WHERE consumer_element_id = ?1 AND statement_type = ?2",
                params![root_element_id, statement_type.as_str()],
                |row| row.get(0),
            )
            .ok();

        match existing {
            Some(id) => {
                conn.execute(
                    "UPDATE statements SET body = ?1, updated_at = ?2 WHERE id = ?3",
                    params![body, now, id],
                )?;
            }
            None => {
                conn.execute(
                    r#"
                    INSERT INTO statements (
                        body, statement_type, uuid, consumer_element_id, created_at, updated_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                    "#,
                    params![
                        body,
                        statement_type.as_str(),
                        uuid::Uuid::new_v4().to_string(),
                        root_element_id,
                        now,
                    ],
                )?;
            }
        }

        debug!(
            root_element_id,
            statement_type = %statement_type,
            "Special statement set"
        );
        Ok(())
    }

    fn get_special_statement_body(
        &self,
        root_element_id: i64,
        statement_type: StatementType,
    ) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let result: Result<String, _> = conn.query_row(
            "SELECT body FROM statements \
             WHERE consumer_element_id = ?1 AND statement_type = ?2",
            params![root_element_id, statement_type.as_str()],
            |row| row.get(0),
        );
        match result {
            Ok(body) => Ok(Some(body)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
