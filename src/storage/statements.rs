//! Statement lifecycle: narratives, prototypes, and sync state

use anyhow::{Result, anyhow, bail};
use rusqlite::{Row, params};
use serde_json::json;
use tracing::debug;

use super::database::Database;
use super::models::{PrototypeSync, StatementInput, StatementMeta, StatementType};

const STATEMENT_COLUMNS: &str = "id, sid, sid_class, source, pid, body, statement_type, status, \
     remarks, uuid, producer_element_id, consumer_element_id, prototype_id, import_record_id, \
     created_at, updated_at";

pub(super) fn statement_from_row(row: &Row) -> rusqlite::Result<StatementMeta> {
    Ok(StatementMeta {
        id: row.get(0)?,
        sid: row.get(1)?,
        sid_class: row.get(2)?,
        source: row.get(3)?,
        pid: row.get(4)?,
        body: row.get(5)?,
        statement_type: row.get(6)?,
        status: row.get(7)?,
        remarks: row.get(8)?,
        uuid: row.get(9)?,
        producer_element_id: row.get(10)?,
        consumer_element_id: row.get(11)?,
        prototype_id: row.get(12)?,
        import_record_id: row.get(13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
    })
}

impl Database {
    /// Create a prototype statement in a component's library
    pub fn create_prototype_statement(
        &self,
        producer_element_id: i64,
        input: &StatementInput,
    ) -> Result<StatementMeta> {
        self.insert_statement(
            StatementType::ControlImplementationPrototype,
            input,
            Some(producer_element_id),
            None,
            None,
            None,
        )
    }

    /// Create a control-implementation statement on a system's root element
    pub fn create_statement(
        &self,
        producer_element_id: i64,
        consumer_element_id: i64,
        input: &StatementInput,
    ) -> Result<StatementMeta> {
        let statement = self.insert_statement(
            StatementType::ControlImplementation,
            input,
            Some(producer_element_id),
            Some(consumer_element_id),
            None,
            None,
        )?;
        self.touch_control_statements_updated(consumer_element_id, input.sid.as_deref())?;
        Ok(statement)
    }

    pub(crate) fn insert_statement(
        &self,
        statement_type: StatementType,
        input: &StatementInput,
        producer_element_id: Option<i64>,
        consumer_element_id: Option<i64>,
        prototype_id: Option<i64>,
        import_record_id: Option<i64>,
    ) -> Result<StatementMeta> {
        let conn = self.conn.lock().unwrap();
        let now = Self::now();
        let uuid = uuid::Uuid::new_v4().to_string();
        let change_log = json!([{ "time": now, "event": "created" }]).to_string();

        conn.execute(
            r#"
            INSERT INTO statements (
                sid, sid_class, source, pid, body, statement_type, status, remarks,
                uuid, producer_element_id, consumer_element_id, prototype_id,
                import_record_id, change_log, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)
            "#,
            params![
                input.sid,
                input.sid_class,
                input.source,
                input.pid,
                input.body,
                statement_type.as_str(),
                input.status,
                input.remarks,
                uuid,
                producer_element_id,
                consumer_element_id,
                prototype_id,
                import_record_id,
                change_log,
                now,
            ],
        )?;

        let id = conn.last_insert_rowid();
        debug!(
            statement_id = id,
            statement_type = %statement_type,
            sid = input.sid.as_deref().unwrap_or(""),
            "Statement created"
        );

        let statement = conn.query_row(
            &format!("SELECT {STATEMENT_COLUMNS} FROM statements WHERE id = ?1"),
            [id],
            statement_from_row,
        )?;
        Ok(statement)
    }

    /// Instantiate a prototype onto a consumer element, producing a linked
    /// control-implementation statement
    pub fn instantiate_prototype(
        &self,
        prototype_id: i64,
        consumer_element_id: i64,
    ) -> Result<StatementMeta> {
        let prototype = self
            .get_statement(prototype_id)?
            .ok_or_else(|| anyhow!("Statement {} not found", prototype_id))?;

        if prototype.statement_type != StatementType::ControlImplementationPrototype.as_str() {
            bail!("Statement {} is not a prototype", prototype_id);
        }

        let input = StatementInput {
            sid: prototype.sid.clone(),
            sid_class: prototype.sid_class.clone(),
            source: prototype.source.clone(),
            pid: prototype.pid.clone(),
            body: prototype.body.clone(),
            status: prototype.status.clone(),
            remarks: prototype.remarks.clone(),
        };

        let statement = self.insert_statement(
            StatementType::ControlImplementation,
            &input,
            prototype.producer_element_id,
            Some(consumer_element_id),
            Some(prototype_id),
            None,
        )?;
        self.touch_control_statements_updated(consumer_element_id, input.sid.as_deref())?;
        Ok(statement)
    }

    /// Get a statement by id
    pub fn get_statement(&self, id: i64) -> Result<Option<StatementMeta>> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            &format!("SELECT {STATEMENT_COLUMNS} FROM statements WHERE id = ?1"),
            [id],
            statement_from_row,
        );
        match result {
            Ok(statement) => Ok(Some(statement)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// List statements produced by an element
    pub fn list_statements_for_producer(
        &self,
        producer_element_id: i64,
        statement_type: Option<StatementType>,
    ) -> Result<Vec<StatementMeta>> {
        let conn = self.conn.lock().unwrap();
        let mut results = Vec::new();

        if let Some(ty) = statement_type {
            let mut stmt = conn.prepare(&format!(
                "SELECT {STATEMENT_COLUMNS} FROM statements \
                 WHERE producer_element_id = ?1 AND statement_type = ?2 ORDER BY sid, pid"
            ))?;
            let rows = stmt.query_map(params![producer_element_id, ty.as_str()], statement_from_row)?;
            for row in rows {
                results.push(row?);
            }
        } else {
            let mut stmt = conn.prepare(&format!(
                "SELECT {STATEMENT_COLUMNS} FROM statements \
                 WHERE producer_element_id = ?1 ORDER BY sid, pid"
            ))?;
            let rows = stmt.query_map([producer_element_id], statement_from_row)?;
            for row in rows {
                results.push(row?);
            }
        }
        Ok(results)
    }

    /// List statements consumed by an element, optionally narrowed to one control
    pub fn list_statements_for_consumer(
        &self,
        consumer_element_id: i64,
        statement_type: Option<StatementType>,
        sid: Option<&str>,
    ) -> Result<Vec<StatementMeta>> {
        let conn = self.conn.lock().unwrap();

        let mut sql = format!(
            "SELECT {STATEMENT_COLUMNS} FROM statements WHERE consumer_element_id = ?"
        );
        let mut sql_params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(consumer_element_id)];

        if let Some(ty) = statement_type {
            sql.push_str(" AND statement_type = ?");
            sql_params.push(Box::new(ty.as_str().to_string()));
        }
        if let Some(sid) = sid {
            sql.push_str(" AND sid = ?");
            sql_params.push(Box::new(sid.to_string()));
        }
        sql.push_str(" ORDER BY sid, pid");

        let params_refs: Vec<&dyn rusqlite::ToSql> =
            sql_params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_refs.as_slice(), statement_from_row)?;

        let results: Result<Vec<_>, _> = rows.collect();
        Ok(results?)
    }

    /// Update a statement's editable fields and append to its change log
    pub fn update_statement(&self, id: i64, input: &StatementInput) -> Result<bool> {
        let existing = match self.get_statement(id)? {
            Some(s) => s,
            None => return Ok(false),
        };

        let conn = self.conn.lock().unwrap();
        let now = Self::now();

        let change_log: Option<String> = conn
            .query_row("SELECT change_log FROM statements WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .ok()
            .flatten();
        let mut log: Vec<serde_json::Value> = change_log
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        log.push(json!({ "time": now, "event": "updated" }));
        let log_json = serde_json::to_string(&log)?;

        let affected = conn.execute(
            r#"
            UPDATE statements SET
                sid = COALESCE(?1, sid),
                sid_class = COALESCE(?2, sid_class),
                pid = COALESCE(?3, pid),
                body = ?4,
                status = COALESCE(?5, status),
                remarks = COALESCE(?6, remarks),
                change_log = ?7,
                updated_at = ?8
            WHERE id = ?9
            "#,
            params![
                input.sid,
                input.sid_class,
                input.pid,
                input.body,
                input.status,
                input.remarks,
                log_json,
                now,
                id,
            ],
        )?;
        drop(conn);

        if affected > 0 && let Some(consumer) = existing.consumer_element_id {
            self.touch_control_statements_updated(consumer, existing.sid.as_deref())?;
        }

        debug!(statement_id = id, updated = affected > 0, "Statement updated");
        Ok(affected > 0)
    }

    /// Delete a statement
    pub fn delete_statement(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute("DELETE FROM statements WHERE id = ?1", [id])?;
        debug!(statement_id = id, deleted = affected > 0, "Statement delete attempted");
        Ok(affected > 0)
    }

    /// Change-log entries for a statement
    pub fn get_statement_change_log(&self, id: i64) -> Result<serde_json::Value> {
        let conn = self.conn.lock().unwrap();
        let raw: Option<String> = conn
            .query_row("SELECT change_log FROM statements WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .ok()
            .flatten();
        Ok(raw
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_else(|| json!([])))
    }

    /// Sync state of an instance statement against its prototype
    pub fn prototype_sync(&self, statement: &StatementMeta) -> Result<PrototypeSync> {
        let prototype_id = match statement.prototype_id {
            Some(id) => id,
            None => return Ok(PrototypeSync::Orphaned),
        };
        match self.get_statement(prototype_id)? {
            Some(prototype) if prototype.body == statement.body => Ok(PrototypeSync::Synched),
            Some(_) => Ok(PrototypeSync::NotSynched),
            None => Ok(PrototypeSync::Orphaned),
        }
    }

    /// Push an instance statement's body up into its prototype
    pub fn promote_statement_to_prototype(&self, id: i64) -> Result<StatementMeta> {
        let instance = self
            .get_statement(id)?
            .ok_or_else(|| anyhow!("Statement {} not found", id))?;
        let prototype_id = instance
            .prototype_id
            .ok_or_else(|| anyhow!("Statement {} has no prototype", id))?;
        let prototype = self
            .get_statement(prototype_id)?
            .ok_or_else(|| anyhow!("Prototype {} no longer exists", prototype_id))?;

        self.update_statement(
            prototype.id,
            &StatementInput {
                body: instance.body.clone(),
                ..Default::default()
            },
        )?;

        debug!(statement_id = id, prototype_id, "Statement promoted to prototype");
        self.get_statement(prototype_id)?
            .ok_or_else(|| anyhow!("Prototype {} no longer exists", prototype_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ElementInput;

    fn setup() -> (Database, i64, i64) {
        let db = Database::new(":memory:").expect("Failed to create database");
        let component = db
            .create_element(
                &ElementInput {
                    name: "OpenLDAP".to_string(),
                    element_type: Some("component".to_string()),
                    ..Default::default()
                },
                "alice",
                None,
            )
            .unwrap();
        let root = db
            .create_element(
                &ElementInput {
                    name: "My System".to_string(),
                    element_type: Some("system".to_string()),
                    ..Default::default()
                },
                "alice",
                None,
            )
            .unwrap();
        (db, component.id, root.id)
    }

    fn ac2_input() -> StatementInput {
        StatementInput {
            sid: Some("ac-2".to_string()),
            sid_class: Some("NIST_SP-800-53_rev5".to_string()),
            body: "Accounts are managed centrally.".to_string(),
            status: Some("implemented".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_instantiate_prototype_links_and_copies() {
        let (db, component_id, root_id) = setup();
        let prototype = db
            .create_prototype_statement(component_id, &ac2_input())
            .unwrap();

        let instance = db.instantiate_prototype(prototype.id, root_id).unwrap();
        assert_eq!(instance.prototype_id, Some(prototype.id));
        assert_eq!(instance.body, prototype.body);
        assert_eq!(instance.consumer_element_id, Some(root_id));
        assert_eq!(
            instance.statement_type,
            StatementType::ControlImplementation.as_str()
        );
        assert_ne!(instance.uuid, prototype.uuid);
    }

    #[test]
    fn test_instantiate_rejects_non_prototype() {
        let (db, component_id, root_id) = setup();
        let statement = db
            .create_statement(component_id, root_id, &ac2_input())
            .unwrap();
        let err = db.instantiate_prototype(statement.id, root_id).unwrap_err();
        assert!(err.to_string().contains("not a prototype"));
    }

    #[test]
    fn test_prototype_sync_states() {
        let (db, component_id, root_id) = setup();
        let prototype = db
            .create_prototype_statement(component_id, &ac2_input())
            .unwrap();
        let instance = db.instantiate_prototype(prototype.id, root_id).unwrap();

        assert_eq!(db.prototype_sync(&instance).unwrap(), PrototypeSync::Synched);

        db.update_statement(
            instance.id,
            &StatementInput {
                body: "Accounts are managed by the IdP.".to_string(),
                ..Default::default()
            },
        )
        .unwrap();
        let instance = db.get_statement(instance.id).unwrap().unwrap();
        assert_eq!(db.prototype_sync(&instance).unwrap(), PrototypeSync::NotSynched);

        db.delete_statement(prototype.id).unwrap();
        let instance = db.get_statement(instance.id).unwrap().unwrap();
        assert_eq!(db.prototype_sync(&instance).unwrap(), PrototypeSync::Orphaned);
    }

    #[test]
    fn test_promote_statement_to_prototype() {
        let (db, component_id, root_id) = setup();
        let prototype = db
            .create_prototype_statement(component_id, &ac2_input())
            .unwrap();
        let instance = db.instantiate_prototype(prototype.id, root_id).unwrap();

        db.update_statement(
            instance.id,
            &StatementInput {
                body: "Improved wording.".to_string(),
                ..Default::default()
            },
        )
        .unwrap();

        let updated = db.promote_statement_to_prototype(instance.id).unwrap();
        assert_eq!(updated.id, prototype.id);
        assert_eq!(updated.body, "Improved wording.");

        let instance = db.get_statement(instance.id).unwrap().unwrap();
        assert_eq!(db.prototype_sync(&instance).unwrap(), PrototypeSync::Synched);
    }

    #[test]
    fn test_change_log_appends() {
        let (db, component_id, root_id) = setup();
        let statement = db
            .create_statement(component_id, root_id, &ac2_input())
            .unwrap();

        db.update_statement(
            statement.id,
            &StatementInput {
                body: "Edited.".to_string(),
                ..Default::default()
            },
        )
        .unwrap();

        let log = db.get_statement_change_log(statement.id).unwrap();
        let entries = log.as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["event"], "created");
        assert_eq!(entries[1]["event"], "updated");
    }

    #[test]
    fn test_list_statements_for_consumer_by_sid() {
        let (db, component_id, root_id) = setup();
        db.create_statement(component_id, root_id, &ac2_input())
            .unwrap();
        db.create_statement(
            component_id,
            root_id,
            &StatementInput {
                sid: Some("au-2".to_string()),
                sid_class: Some("NIST_SP-800-53_rev5".to_string()),
                body: "Events are logged.".to_string(),
                ..Default::default()
            },
        )
        .unwrap();

        let all = db
            .list_statements_for_consumer(root_id, Some(StatementType::ControlImplementation), None)
            .unwrap();
        assert_eq!(all.len(), 2);

        let ac2 = db
            .list_statements_for_consumer(
                root_id,
                Some(StatementType::ControlImplementation),
                Some("ac-2"),
            )
            .unwrap();
        assert_eq!(ac2.len(), 1);
        assert_eq!(ac2[0].sid.as_deref(), Some("ac-2"));
    }
}
