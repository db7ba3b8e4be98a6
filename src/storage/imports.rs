//! Import records: grouping and rollback for imported components

use anyhow::Result;
use rusqlite::{Row, params};
use tracing::{debug, info};

use super::database::Database;
use super::models::ImportRecordMeta;

const IMPORT_COLUMNS: &str = "r.id, r.name, r.uuid, \
     (SELECT COUNT(*) FROM elements e WHERE e.import_record_id = r.id), \
     (SELECT COUNT(*) FROM statements s WHERE s.import_record_id = r.id), \
     r.created_at";

fn import_from_row(row: &Row) -> rusqlite::Result<ImportRecordMeta> {
    Ok(ImportRecordMeta {
        id: row.get(0)?,
        name: row.get(1)?,
        uuid: row.get(2)?,
        element_count: row.get(3)?,
        statement_count: row.get(4)?,
        created_at: row.get(5)?,
    })
}

impl Database {
    /// Create an import record to group the rows of one import
    pub fn create_import_record(&self, name: &str) -> Result<ImportRecordMeta> {
        let conn = self.conn.lock().unwrap();
        let now = Self::now();

        conn.execute(
            "INSERT INTO import_records (name, uuid, created_at) VALUES (?1, ?2, ?3)",
            params![name, uuid::Uuid::new_v4().to_string(), now],
        )?;
        let id = conn.last_insert_rowid();

        debug!(import_record_id = id, name = %name, "Import record created");

        let record = conn.query_row(
            &format!("SELECT {IMPORT_COLUMNS} FROM import_records r WHERE r.id = ?1"),
            [id],
            import_from_row,
        )?;
        Ok(record)
    }

    /// Get an import record with its row counts
    pub fn get_import_record(&self, id: i64) -> Result<Option<ImportRecordMeta>> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            &format!("SELECT {IMPORT_COLUMNS} FROM import_records r WHERE r.id = ?1"),
            [id],
            import_from_row,
        );
        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// List import records, newest first
    pub fn list_import_records(&self) -> Result<Vec<ImportRecordMeta>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {IMPORT_COLUMNS} FROM import_records r ORDER BY r.created_at DESC, r.id DESC"
        ))?;
        let rows = stmt.query_map([], import_from_row)?;
        let results: Result<Vec<_>, _> = rows.collect();
        Ok(results?)
    }

    /// Roll back an import: delete every element and statement it created,
    /// then the record itself. Returns (elements, statements) deleted.
    pub fn rollback_import(&self, id: i64) -> Result<Option<(usize, usize)>> {
        if self.get_import_record(id)?.is_none() {
            return Ok(None);
        }

        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;

        // Statements attached to imported elements go with them via cascade;
        // count standalone imported statements separately first
        let statements = tx.execute(
            "DELETE FROM statements WHERE import_record_id = ?1",
            [id],
        )?;
        let elements = tx.execute(
            "DELETE FROM elements WHERE import_record_id = ?1",
            [id],
        )?;
        tx.execute("DELETE FROM import_records WHERE id = ?1", [id])?;

        tx.commit()?;

        info!(import_record_id = id, elements, statements, "Import rolled back");
        Ok(Some((elements, statements)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ElementInput, StatementInput, StatementType};

    #[test]
    fn test_import_record_counts() {
        let db = Database::new(":memory:").expect("Failed to create database");
        let record = db.create_import_record("vendor-catalog.json").unwrap();
        assert_eq!(record.element_count, 0);

        let element = db
            .create_element(
                &ElementInput {
                    name: "OpenLDAP".to_string(),
                    element_type: Some("component".to_string()),
                    ..Default::default()
                },
                "alice",
                Some(record.id),
            )
            .unwrap();
        db.insert_statement(
            StatementType::ControlImplementationPrototype,
            &StatementInput {
                sid: Some("ac-2".to_string()),
                body: "Accounts are managed.".to_string(),
                ..Default::default()
            },
            Some(element.id),
            None,
            None,
            Some(record.id),
        )
        .unwrap();

        let record = db.get_import_record(record.id).unwrap().unwrap();
        assert_eq!(record.element_count, 1);
        assert_eq!(record.statement_count, 1);
    }

    #[test]
    fn test_rollback_import() {
        let db = Database::new(":memory:").expect("Failed to create database");
        let record = db.create_import_record("vendor-catalog.json").unwrap();
        let element = db
            .create_element(
                &ElementInput {
                    name: "OpenLDAP".to_string(),
                    element_type: Some("component".to_string()),
                    ..Default::default()
                },
                "alice",
                Some(record.id),
            )
            .unwrap();
        db.insert_statement(
            StatementType::ControlImplementationPrototype,
            &StatementInput {
                sid: Some("ac-2".to_string()),
                body: "Accounts are managed.".to_string(),
                ..Default::default()
            },
            Some(element.id),
            None,
            None,
            Some(record.id),
        )
        .unwrap();

        // An element from a different import is untouched
        let keeper = db
            .create_element(
                &ElementInput {
                    name: "Keeper".to_string(),
                    element_type: Some("component".to_string()),
                    ..Default::default()
                },
                "alice",
                None,
            )
            .unwrap();

        let (elements, statements) = db.rollback_import(record.id).unwrap().unwrap();
        assert_eq!(elements, 1);
        assert_eq!(statements, 1);

        assert!(db.get_element(element.id).unwrap().is_none());
        assert!(db.get_element(keeper.id).unwrap().is_some());
        assert!(db.get_import_record(record.id).unwrap().is_none());
        assert!(db.rollback_import(record.id).unwrap().is_none());
    }
}
