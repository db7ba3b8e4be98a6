//! Element CRUD and copy operations

use anyhow::{Result, anyhow, bail};
use rusqlite::{Row, params};
use tracing::{debug, info};

use super::database::Database;
use super::models::{ElementInput, ElementMeta, StatementType, SystemMeta};

const ELEMENT_COLUMNS: &str = "id, name, full_name, description, element_type, component_type, \
     component_state, oscal_version, uuid, owner, import_record_id, created_at, updated_at";

pub(super) fn element_from_row(row: &Row) -> rusqlite::Result<ElementMeta> {
    Ok(ElementMeta {
        id: row.get(0)?,
        name: row.get(1)?,
        full_name: row.get(2)?,
        description: row.get(3)?,
        element_type: row.get(4)?,
        component_type: row.get(5)?,
        component_state: row.get(6)?,
        oscal_version: row.get(7)?,
        uuid: row.get(8)?,
        owner: row.get(9)?,
        import_record_id: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

impl Database {
    /// Create a new element. Names are unique across the store.
    pub fn create_element(
        &self,
        input: &ElementInput,
        owner: &str,
        import_record_id: Option<i64>,
    ) -> Result<ElementMeta> {
        let conn = self.conn.lock().unwrap();
        let now = Self::now();
        let uuid = uuid::Uuid::new_v4().to_string();

        conn.execute(
            r#"
            INSERT INTO elements (
                name, full_name, description, element_type, component_type,
                component_state, uuid, owner, import_record_id, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
            "#,
            params![
                input.name,
                input.full_name,
                input
                    .description
                    .clone()
                    .unwrap_or_else(|| "Description needed".to_string()),
                input.element_type,
                input
                    .component_type
                    .clone()
                    .unwrap_or_else(|| "software".to_string()),
                input
                    .component_state
                    .clone()
                    .unwrap_or_else(|| "operational".to_string()),
                uuid,
                owner,
                import_record_id,
                now,
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                anyhow!("Element name '{}' already exists", input.name)
            }
            other => other.into(),
        })?;

        let id = conn.last_insert_rowid();
        debug!(element_id = id, name = %input.name, "Element created");

        let element = conn.query_row(
            &format!("SELECT {ELEMENT_COLUMNS} FROM elements WHERE id = ?1"),
            [id],
            element_from_row,
        )?;
        Ok(element)
    }

    /// Get an element by id
    pub fn get_element(&self, id: i64) -> Result<Option<ElementMeta>> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            &format!("SELECT {ELEMENT_COLUMNS} FROM elements WHERE id = ?1"),
            [id],
            element_from_row,
        );
        match result {
            Ok(element) => Ok(Some(element)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Get an element by its unique name
    pub fn get_element_by_name(&self, name: &str) -> Result<Option<ElementMeta>> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            &format!("SELECT {ELEMENT_COLUMNS} FROM elements WHERE name = ?1"),
            [name],
            element_from_row,
        );
        match result {
            Ok(element) => Ok(Some(element)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// List elements, optionally filtered by element_type
    pub fn list_elements(&self, element_type: Option<&str>) -> Result<Vec<ElementMeta>> {
        let conn = self.conn.lock().unwrap();

        let mut results = Vec::new();
        if let Some(ty) = element_type {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ELEMENT_COLUMNS} FROM elements WHERE element_type = ?1 ORDER BY name COLLATE NOCASE"
            ))?;
            let rows = stmt.query_map([ty], element_from_row)?;
            for row in rows {
                results.push(row?);
            }
        } else {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ELEMENT_COLUMNS} FROM elements ORDER BY name COLLATE NOCASE"
            ))?;
            let rows = stmt.query_map([], element_from_row)?;
            for row in rows {
                results.push(row?);
            }
        }
        Ok(results)
    }

    /// Update an element's descriptive fields
    pub fn update_element(&self, id: i64, input: &ElementInput) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let now = Self::now();

        let affected = conn.execute(
            r#"
            UPDATE elements SET
                name = ?1,
                full_name = COALESCE(?2, full_name),
                description = COALESCE(?3, description),
                component_type = COALESCE(?4, component_type),
                component_state = COALESCE(?5, component_state),
                updated_at = ?6
            WHERE id = ?7
            "#,
            params![
                input.name,
                input.full_name,
                input.description,
                input.component_type,
                input.component_state,
                now,
                id,
            ],
        )?;

        debug!(element_id = id, updated = affected > 0, "Element updated");
        Ok(affected > 0)
    }

    /// Delete an element and its statements
    pub fn delete_element(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute("DELETE FROM elements WHERE id = ?1", [id])?;
        debug!(element_id = id, deleted = affected > 0, "Element delete attempted");
        Ok(affected > 0)
    }

    /// Copy a component element along with its prototype statements.
    /// System elements cannot be copied.
    pub fn copy_element(&self, id: i64, new_name: &str, owner: &str) -> Result<ElementMeta> {
        let source = self
            .get_element(id)?
            .ok_or_else(|| anyhow!("Element {} not found", id))?;

        if source.element_type.as_deref() == Some("system") {
            bail!("Copying a system element is not permitted");
        }

        let conn = self.conn.lock().unwrap();
        let now = Self::now();
        let uuid = uuid::Uuid::new_v4().to_string();

        let tx = conn.unchecked_transaction()?;

        tx.execute(
            r#"
            INSERT INTO elements (
                name, full_name, description, element_type, component_type,
                component_state, oscal_version, uuid, owner, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
            "#,
            params![
                new_name,
                source.full_name,
                source.description,
                source.element_type,
                source.component_type,
                source.component_state,
                source.oscal_version,
                uuid,
                owner,
                now,
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                anyhow!("Element name '{}' already exists", new_name)
            }
            other => other.into(),
        })?;
        let new_id = tx.last_insert_rowid();

        // Copy prototype statements so the new component carries the same library content
        let mut stmt = tx.prepare(
            r#"
            SELECT sid, sid_class, source, pid, body, status, remarks
            FROM statements
            WHERE producer_element_id = ?1 AND statement_type = ?2
            "#,
        )?;
        let rows: Vec<(Option<String>, Option<String>, Option<String>, Option<String>, String, Option<String>, Option<String>)> = stmt
            .query_map(
                params![id, StatementType::ControlImplementationPrototype.as_str()],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                    ))
                },
            )?
            .collect::<Result<_, _>>()?;
        drop(stmt);

        let copied = rows.len();
        for (sid, sid_class, src, pid, body, status, remarks) in rows {
            tx.execute(
                r#"
                INSERT INTO statements (
                    sid, sid_class, source, pid, body, statement_type, status,
                    remarks, uuid, producer_element_id, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
                "#,
                params![
                    sid,
                    sid_class,
                    src,
                    pid,
                    body,
                    StatementType::ControlImplementationPrototype.as_str(),
                    status,
                    remarks,
                    uuid::Uuid::new_v4().to_string(),
                    new_id,
                    now,
                ],
            )?;
        }

        tx.commit()?;

        info!(
            source_id = id,
            element_id = new_id,
            name = %new_name,
            statements = copied,
            "Element copied"
        );

        let element = conn.query_row(
            &format!("SELECT {ELEMENT_COLUMNS} FROM elements WHERE id = ?1"),
            [new_id],
            element_from_row,
        )?;
        Ok(element)
    }

    /// Systems whose root element consumes statements produced by this element
    pub fn consuming_systems(&self, element_id: i64) -> Result<Vec<SystemMeta>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            r#"
            SELECT DISTINCT sys.id, sys.root_element_id, e.name, sys.fisma_id,
                   sys.owner, sys.created_at, sys.updated_at
            FROM systems sys
            JOIN elements e ON e.id = sys.root_element_id
            JOIN statements s ON s.consumer_element_id = sys.root_element_id
            WHERE s.producer_element_id = ?1 AND s.statement_type = ?2
            ORDER BY e.name COLLATE NOCASE
            "#,
        )?;

        let rows = stmt.query_map(
            params![element_id, StatementType::ControlImplementation.as_str()],
            |row| {
                Ok(SystemMeta {
                    id: row.get(0)?,
                    root_element_id: row.get(1)?,
                    name: row.get(2)?,
                    fisma_id: row.get(3)?,
                    owner: row.get(4)?,
                    created_at: row.get(5)?,
                    updated_at: row.get(6)?,
                })
            },
        )?;

        let results: Result<Vec<_>, _> = rows.collect();
        Ok(results?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component_input(name: &str) -> ElementInput {
        ElementInput {
            name: name.to_string(),
            description: Some("A test component".to_string()),
            element_type: Some("component".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_and_get_element() {
        let db = Database::new(":memory:").expect("Failed to create database");
        let element = db
            .create_element(&component_input("OpenLDAP"), "alice", None)
            .expect("Failed to create element");

        assert_eq!(element.name, "OpenLDAP");
        assert_eq!(element.component_type, "software");
        assert_eq!(element.component_state, "operational");
        assert_eq!(element.owner, "alice");

        let fetched = db.get_element(element.id).unwrap().unwrap();
        assert_eq!(fetched.name, "OpenLDAP");

        let by_name = db.get_element_by_name("OpenLDAP").unwrap().unwrap();
        assert_eq!(by_name.id, element.id);
    }

    #[test]
    fn test_element_name_unique() {
        let db = Database::new(":memory:").expect("Failed to create database");
        db.create_element(&component_input("OpenLDAP"), "alice", None)
            .unwrap();
        let err = db
            .create_element(&component_input("OpenLDAP"), "bob", None)
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_list_elements_filtered() {
        let db = Database::new(":memory:").expect("Failed to create database");
        db.create_element(&component_input("Zebra"), "alice", None)
            .unwrap();
        db.create_element(&component_input("Apache"), "alice", None)
            .unwrap();
        db.create_element(
            &ElementInput {
                name: "My System".to_string(),
                element_type: Some("system".to_string()),
                ..Default::default()
            },
            "alice",
            None,
        )
        .unwrap();

        let components = db.list_elements(Some("component")).unwrap();
        assert_eq!(components.len(), 2);
        // Sorted by name
        assert_eq!(components[0].name, "Apache");

        let all = db.list_elements(None).unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_update_element() {
        let db = Database::new(":memory:").expect("Failed to create database");
        let element = db
            .create_element(&component_input("OpenLDAP"), "alice", None)
            .unwrap();

        let updated = db
            .update_element(
                element.id,
                &ElementInput {
                    name: "OpenLDAP Server".to_string(),
                    description: Some("Directory service".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(updated);

        let fetched = db.get_element(element.id).unwrap().unwrap();
        assert_eq!(fetched.name, "OpenLDAP Server");
        assert_eq!(fetched.description, "Directory service");
        // Unspecified fields keep their values
        assert_eq!(fetched.component_type, "software");
    }

    #[test]
    fn test_delete_element() {
        let db = Database::new(":memory:").expect("Failed to create database");
        let element = db
            .create_element(&component_input("OpenLDAP"), "alice", None)
            .unwrap();

        assert!(db.delete_element(element.id).unwrap());
        assert!(db.get_element(element.id).unwrap().is_none());
        assert!(!db.delete_element(element.id).unwrap());
    }

    #[test]
    fn test_copy_element_with_prototypes() {
        let db = Database::new(":memory:").expect("Failed to create database");
        let element = db
            .create_element(&component_input("OpenLDAP"), "alice", None)
            .unwrap();
        db.create_prototype_statement(
            element.id,
            &crate::storage::StatementInput {
                sid: Some("ac-2".to_string()),
                sid_class: Some("NIST_SP-800-53_rev5".to_string()),
                body: "Accounts are managed centrally.".to_string(),
                ..Default::default()
            },
        )
        .unwrap();

        let copy = db.copy_element(element.id, "OpenLDAP Copy", "bob").unwrap();
        assert_eq!(copy.name, "OpenLDAP Copy");
        assert_eq!(copy.owner, "bob");
        assert_ne!(copy.uuid, element.uuid);

        let prototypes = db
            .list_statements_for_producer(copy.id, Some(StatementType::ControlImplementationPrototype))
            .unwrap();
        assert_eq!(prototypes.len(), 1);
        assert_eq!(prototypes[0].sid.as_deref(), Some("ac-2"));
    }

    #[test]
    fn test_copy_system_element_refused() {
        let db = Database::new(":memory:").expect("Failed to create database");
        let element = db
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

        let err = db.copy_element(element.id, "Another", "alice").unwrap_err();
        assert!(err.to_string().contains("not permitted"));
    }
}
