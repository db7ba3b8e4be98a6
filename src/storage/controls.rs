//! Control selection and baseline assignment

use anyhow::{Result, anyhow};
use rusqlite::{Row, params};
use std::collections::BTreeMap;
use std::collections::HashSet;
use tracing::{debug, info};

use crate::catalog::control_sort_key;

use super::database::Database;
use super::models::{BaselineDiff, ControlStatus, ElementControlMeta, StatementType};

const CONTROL_COLUMNS: &str = "id, element_id, oscal_ctl_id, oscal_catalog_key, status, uuid, \
     smts_updated_at, created_at, updated_at";

fn control_from_row(row: &Row) -> rusqlite::Result<ElementControlMeta> {
    Ok(ElementControlMeta {
        id: row.get(0)?,
        element_id: row.get(1)?,
        oscal_ctl_id: row.get(2)?,
        oscal_catalog_key: row.get(3)?,
        status: ControlStatus::from_i64(row.get(4)?),
        uuid: row.get(5)?,
        smts_updated_at: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

impl Database {
    /// Select a control for an element. Adding an already-selected control
    /// returns the existing row unchanged.
    pub fn add_control(
        &self,
        element_id: i64,
        oscal_ctl_id: &str,
        oscal_catalog_key: &str,
    ) -> Result<ElementControlMeta> {
        let conn = self.conn.lock().unwrap();
        let now = Self::now();
        let uuid = uuid::Uuid::new_v4().to_string();

        let inserted = conn.execute(
            r#"
            INSERT INTO element_controls (
                element_id, oscal_ctl_id, oscal_catalog_key, status, uuid, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            ON CONFLICT(element_id, oscal_ctl_id, oscal_catalog_key) DO NOTHING
            "#,
            params![
                element_id,
                oscal_ctl_id,
                oscal_catalog_key,
                ControlStatus::Pending.as_i64(),
                uuid,
                now,
            ],
        )?;

        debug!(
            element_id,
            control = %oscal_ctl_id,
            catalog = %oscal_catalog_key,
            added = inserted > 0,
            "Control selection"
        );

        let control = conn.query_row(
            &format!(
                "SELECT {CONTROL_COLUMNS} FROM element_controls \
                 WHERE element_id = ?1 AND oscal_ctl_id = ?2 AND oscal_catalog_key = ?3"
            ),
            params![element_id, oscal_ctl_id, oscal_catalog_key],
            control_from_row,
        )?;
        Ok(control)
    }

    /// Deselect a control and delete the narrative statements written for it,
    /// in one transaction
    pub fn remove_control(
        &self,
        element_id: i64,
        oscal_ctl_id: &str,
        oscal_catalog_key: &str,
    ) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;

        let removed = tx.execute(
            "DELETE FROM element_controls \
             WHERE element_id = ?1 AND oscal_ctl_id = ?2 AND oscal_catalog_key = ?3",
            params![element_id, oscal_ctl_id, oscal_catalog_key],
        )?;

        let statements_removed = if removed > 0 {
            tx.execute(
                "DELETE FROM statements \
                 WHERE consumer_element_id = ?1 AND sid = ?2 AND statement_type = ?3",
                params![
                    element_id,
                    oscal_ctl_id,
                    StatementType::ControlImplementation.as_str()
                ],
            )?
        } else {
            0
        };

        tx.commit()?;

        debug!(
            element_id,
            control = %oscal_ctl_id,
            removed = removed > 0,
            statements_removed,
            "Control removed"
        );
        Ok(removed > 0)
    }

    /// Get one selected control
    pub fn get_control(
        &self,
        element_id: i64,
        oscal_ctl_id: &str,
        oscal_catalog_key: &str,
    ) -> Result<Option<ElementControlMeta>> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            &format!(
                "SELECT {CONTROL_COLUMNS} FROM element_controls \
                 WHERE element_id = ?1 AND oscal_ctl_id = ?2 AND oscal_catalog_key = ?3"
            ),
            params![element_id, oscal_ctl_id, oscal_catalog_key],
            control_from_row,
        );
        match result {
            Ok(control) => Ok(Some(control)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// List selected controls for an element in natural control-id order
    /// (ac-2 before ac-10)
    pub fn list_controls(&self, element_id: i64) -> Result<Vec<ElementControlMeta>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CONTROL_COLUMNS} FROM element_controls WHERE element_id = ?1"
        ))?;
        let rows = stmt.query_map([element_id], control_from_row)?;
        let mut results: Vec<ElementControlMeta> = rows.collect::<Result<_, _>>()?;
        results.sort_by(|a, b| {
            control_sort_key(&a.oscal_ctl_id).cmp(&control_sort_key(&b.oscal_ctl_id))
        });
        Ok(results)
    }

    /// Update the workflow status of a selected control
    pub fn set_control_status(
        &self,
        element_id: i64,
        oscal_ctl_id: &str,
        oscal_catalog_key: &str,
        status: ControlStatus,
    ) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let now = Self::now();

        let affected = conn.execute(
            "UPDATE element_controls SET status = ?1, updated_at = ?2 \
             WHERE element_id = ?3 AND oscal_ctl_id = ?4 AND oscal_catalog_key = ?5",
            params![
                status.as_i64(),
                now,
                element_id,
                oscal_ctl_id,
                oscal_catalog_key
            ],
        )?;

        debug!(
            element_id,
            control = %oscal_ctl_id,
            status = %status.label(),
            updated = affected > 0,
            "Control status updated"
        );
        Ok(affected > 0)
    }

    /// Record that the statements under a control changed
    pub(super) fn touch_control_statements_updated(
        &self,
        element_id: i64,
        sid: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Self::now();
        match sid {
            Some(sid) => {
                conn.execute(
                    "UPDATE element_controls SET smts_updated_at = ?1 \
                     WHERE element_id = ?2 AND oscal_ctl_id = ?3",
                    params![now, element_id, sid],
                )?;
            }
            None => {
                conn.execute(
                    "UPDATE element_controls SET smts_updated_at = ?1 WHERE element_id = ?2",
                    params![now, element_id],
                )?;
            }
        }
        Ok(())
    }

    /// Replace an element's selection for one catalog with a baseline's control
    /// set. Controls already selected are left untouched so their status and
    /// statements survive.
    pub fn assign_baseline(
        &self,
        element_id: i64,
        catalog_key: &str,
        baseline_name: &str,
    ) -> Result<BaselineDiff> {
        let baseline_controls = self
            .get_baseline_controls(catalog_key, baseline_name)?
            .ok_or_else(|| {
                anyhow!("Baseline '{}' not found in catalog '{}'", baseline_name, catalog_key)
            })?;
        let target: HashSet<String> = baseline_controls.into_iter().collect();

        let current: HashSet<String> = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT oscal_ctl_id FROM element_controls \
                 WHERE element_id = ?1 AND oscal_catalog_key = ?2",
            )?;
            let rows = stmt.query_map(params![element_id, catalog_key], |row| {
                row.get::<_, String>(0)
            })?;
            rows.collect::<Result<_, _>>()?
        };

        let mut diff = BaselineDiff::default();
        for ctl in target.iter() {
            if current.contains(ctl) {
                diff.no_change.push(ctl.clone());
            } else {
                diff.add.push(ctl.clone());
            }
        }
        for ctl in current.iter() {
            if !target.contains(ctl) {
                diff.remove.push(ctl.clone());
            }
        }

        {
            let conn = self.conn.lock().unwrap();
            let now = Self::now();
            let tx = conn.unchecked_transaction()?;
            for ctl in &diff.add {
                tx.execute(
                    r#"
                    INSERT INTO element_controls (
                        element_id, oscal_ctl_id, oscal_catalog_key, status, uuid,
                        created_at, updated_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                    "#,
                    params![
                        element_id,
                        ctl,
                        catalog_key,
                        ControlStatus::Pending.as_i64(),
                        uuid::Uuid::new_v4().to_string(),
                        now,
                    ],
                )?;
            }
            for ctl in &diff.remove {
                tx.execute(
                    "DELETE FROM element_controls \
                     WHERE element_id = ?1 AND oscal_ctl_id = ?2 AND oscal_catalog_key = ?3",
                    params![element_id, ctl, catalog_key],
                )?;
            }
            tx.commit()?;
        }

        diff.add.sort_by_key(|c| control_sort_key(c));
        diff.remove.sort_by_key(|c| control_sort_key(c));
        diff.no_change.sort_by_key(|c| control_sort_key(c));

        info!(
            element_id,
            catalog = %catalog_key,
            baseline = %baseline_name,
            added = diff.add.len(),
            removed = diff.remove.len(),
            unchanged = diff.no_change.len(),
            "Baseline assigned"
        );
        Ok(diff)
    }

    /// Count of selected controls per workflow status label
    pub fn control_status_counts(&self, element_id: i64) -> Result<BTreeMap<String, i64>> {
        let conn = self.conn.lock().unwrap();
        let mut counts: BTreeMap<String, i64> = BTreeMap::new();
        for status in [
            ControlStatus::Pending,
            ControlStatus::Implemented,
            ControlStatus::Assessed,
            ControlStatus::ChangesRequested,
        ] {
            counts.insert(status.label().to_string(), 0);
        }

        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM element_controls WHERE element_id = ?1 GROUP BY status",
        )?;
        let rows = stmt.query_map([element_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (status, count) = row?;
            *counts
                .entry(ControlStatus::from_i64(status).label().to_string())
                .or_insert(0) += count;
        }
        Ok(counts)
    }

    /// Distinct producer components contributing statements, per control id
    pub fn control_component_counts(
        &self,
        consumer_element_id: i64,
    ) -> Result<BTreeMap<String, i64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT sid, COUNT(DISTINCT producer_element_id)
            FROM statements
            WHERE consumer_element_id = ?1 AND statement_type = ?2 AND sid IS NOT NULL
            GROUP BY sid
            "#,
        )?;
        let rows = stmt.query_map(
            params![
                consumer_element_id,
                StatementType::ControlImplementation.as_str()
            ],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
        )?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let (sid, count) = row?;
            counts.insert(sid, count);
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ElementInput, StatementInput};

    fn setup() -> (Database, i64) {
        let db = Database::new(":memory:").expect("Failed to create database");
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
        (db, root.id)
    }

    #[test]
    fn test_add_control_idempotent() {
        let (db, root_id) = setup();
        let first = db.add_control(root_id, "ac-2", "NIST_SP-800-53_rev5").unwrap();
        let second = db.add_control(root_id, "ac-2", "NIST_SP-800-53_rev5").unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.status, ControlStatus::Pending);
        assert_eq!(db.list_controls(root_id).unwrap().len(), 1);
    }

    #[test]
    fn test_list_controls_natural_order() {
        let (db, root_id) = setup();
        for ctl in ["ac-10", "ac-2", "au-3", "ac-2.1"] {
            db.add_control(root_id, ctl, "NIST_SP-800-53_rev5").unwrap();
        }
        let controls = db.list_controls(root_id).unwrap();
        let ids: Vec<&str> = controls.iter().map(|c| c.oscal_ctl_id.as_str()).collect();
        assert_eq!(ids, vec!["ac-2", "ac-2.1", "ac-10", "au-3"]);
    }

    #[test]
    fn test_remove_control_deletes_statements() {
        let (db, root_id) = setup();
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
        db.add_control(root_id, "ac-2", "NIST_SP-800-53_rev5").unwrap();
        db.create_statement(
            component.id,
            root_id,
            &StatementInput {
                sid: Some("ac-2".to_string()),
                sid_class: Some("NIST_SP-800-53_rev5".to_string()),
                body: "Accounts are managed.".to_string(),
                ..Default::default()
            },
        )
        .unwrap();

        assert!(db.remove_control(root_id, "ac-2", "NIST_SP-800-53_rev5").unwrap());

        let remaining = db
            .list_statements_for_consumer(root_id, None, Some("ac-2"))
            .unwrap();
        assert!(remaining.is_empty());
        assert!(db.list_controls(root_id).unwrap().is_empty());
    }

    #[test]
    fn test_set_control_status() {
        let (db, root_id) = setup();
        db.add_control(root_id, "ac-2", "NIST_SP-800-53_rev5").unwrap();

        assert!(
            db.set_control_status(root_id, "ac-2", "NIST_SP-800-53_rev5", ControlStatus::Assessed)
                .unwrap()
        );
        let control = db
            .get_control(root_id, "ac-2", "NIST_SP-800-53_rev5")
            .unwrap()
            .unwrap();
        assert_eq!(control.status, ControlStatus::Assessed);

        let counts = db.control_status_counts(root_id).unwrap();
        assert_eq!(counts["Assessed"], 1);
        assert_eq!(counts["Pending"], 0);
    }

    #[test]
    fn test_statement_write_touches_control() {
        let (db, root_id) = setup();
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
        db.add_control(root_id, "ac-2", "NIST_SP-800-53_rev5").unwrap();

        let control = db
            .get_control(root_id, "ac-2", "NIST_SP-800-53_rev5")
            .unwrap()
            .unwrap();
        assert!(control.smts_updated_at.is_none());

        db.create_statement(
            component.id,
            root_id,
            &StatementInput {
                sid: Some("ac-2".to_string()),
                body: "Accounts are managed.".to_string(),
                ..Default::default()
            },
        )
        .unwrap();

        let control = db
            .get_control(root_id, "ac-2", "NIST_SP-800-53_rev5")
            .unwrap()
            .unwrap();
        assert!(control.smts_updated_at.is_some());
    }

    #[test]
    fn test_assign_baseline_diff() {
        let (db, root_id) = setup();
        let catalog = serde_json::json!({"catalog": {"uuid": "x", "metadata": {"title": "Test"}, "groups": []}});
        let baselines = serde_json::json!({
            "low": ["ac-2", "au-3"],
            "moderate": ["ac-2", "ac-2.1", "au-3", "cm-4"]
        });
        db.upsert_catalog("TEST_CAT", &catalog, Some(&baselines)).unwrap();

        // Pre-select one baseline control and one stray control
        db.add_control(root_id, "ac-2", "TEST_CAT").unwrap();
        db.add_control(root_id, "zz-9", "TEST_CAT").unwrap();

        let diff = db.assign_baseline(root_id, "TEST_CAT", "low").unwrap();
        assert_eq!(diff.add, vec!["au-3"]);
        assert_eq!(diff.remove, vec!["zz-9"]);
        assert_eq!(diff.no_change, vec!["ac-2"]);

        let selected: Vec<String> = db
            .list_controls(root_id)
            .unwrap()
            .into_iter()
            .map(|c| c.oscal_ctl_id)
            .collect();
        assert_eq!(selected, vec!["ac-2", "au-3"]);
    }

    #[test]
    fn test_assign_unknown_baseline() {
        let (db, root_id) = setup();
        let catalog = serde_json::json!({"catalog": {"uuid": "x", "metadata": {"title": "Test"}, "groups": []}});
        db.upsert_catalog("TEST_CAT", &catalog, None).unwrap();

        let err = db.assign_baseline(root_id, "TEST_CAT", "low").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
