//! OSCAL component-definition import
//!
//! The document is deserialized into typed models, which rejects malformed
//! input before any rows are written.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::{info, warn};

use crate::catalog::oscalize_control_id;
use crate::storage::{
    Database, ElementInput, ImportRecordMeta, StatementInput, StatementType,
};

use super::DEFAULT_CATALOG_KEY;

#[derive(Debug, Deserialize)]
struct ComponentDefinitionDocument {
    #[serde(rename = "component-definition")]
    component_definition: ComponentDefinition,
}

#[derive(Debug, Deserialize)]
struct ComponentDefinition {
    components: Vec<ComponentEntry>,
}

#[derive(Debug, Deserialize)]
struct ComponentEntry {
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(rename = "type", default)]
    component_type: Option<String>,
    #[serde(rename = "control-implementations", default)]
    control_implementations: Vec<ControlImplementation>,
}

#[derive(Debug, Deserialize)]
struct ControlImplementation {
    #[serde(default)]
    source: Option<String>,
    #[serde(rename = "implemented-requirements", default)]
    implemented_requirements: Vec<ImplementedRequirement>,
}

#[derive(Debug, Deserialize)]
struct ImplementedRequirement {
    #[serde(rename = "control-id")]
    control_id: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    remarks: Option<String>,
}

/// Import components and their prototype statements from an OSCAL
/// component-definition JSON string. All created rows are attached to one
/// import record so the import can be rolled back.
pub fn import_components(
    db: &Database,
    import_name: &str,
    raw: &str,
    owner: &str,
) -> Result<ImportRecordMeta> {
    let document: ComponentDefinitionDocument =
        serde_json::from_str(raw).context("Invalid OSCAL component-definition document")?;
    let components = document.component_definition.components;
    if components.is_empty() {
        bail!("Component-definition contains no components");
    }

    let record = db.create_import_record(import_name)?;

    let mut imported = 0usize;
    for component in components {
        // Components with no statements are skipped, matching the rule that a
        // library entry must carry at least one narrative
        let statement_count: usize = component
            .control_implementations
            .iter()
            .map(|ci| ci.implemented_requirements.len())
            .sum();
        if statement_count == 0 {
            warn!(component = %component.title, "Component skipped: no implemented requirements");
            continue;
        }

        // Resolve name collisions by suffixing " (n)"
        let mut name = component.title.clone();
        while db.get_element_by_name(&name)?.is_some() {
            name = increment_element_name(&name);
        }

        let element = db.create_element(
            &ElementInput {
                name,
                description: component.description.clone(),
                element_type: Some("component".to_string()),
                component_type: component.component_type.clone(),
                ..Default::default()
            },
            owner,
            Some(record.id),
        )?;

        for control_impl in &component.control_implementations {
            let source = control_impl
                .source
                .clone()
                .unwrap_or_else(|| DEFAULT_CATALOG_KEY.to_string());
            for req in &control_impl.implemented_requirements {
                let (sid, pid) = split_control_part(&req.control_id);
                db.insert_statement(
                    StatementType::ControlImplementationPrototype,
                    &StatementInput {
                        sid: Some(sid),
                        sid_class: Some(source.clone()),
                        source: Some(source.clone()),
                        pid,
                        body: req.description.clone().unwrap_or_default(),
                        status: None,
                        remarks: req.remarks.clone(),
                    },
                    Some(element.id),
                    None,
                    None,
                    Some(record.id),
                )?;
            }
        }
        imported += 1;
    }

    if imported == 0 {
        db.rollback_import(record.id)?;
        bail!("No component in the document carried any implemented requirements");
    }

    let record = db
        .get_import_record(record.id)?
        .context("Import record vanished during import")?;
    info!(
        import = %import_name,
        components = record.element_count,
        statements = record.statement_count,
        "Components imported"
    );
    Ok(record)
}

/// "Name" -> "Name (2)", "Name (2)" -> "Name (3)"
fn increment_element_name(name: &str) -> String {
    if let Some(open) = name.rfind(" (")
        && let Some(inner) = name[open + 2..].strip_suffix(')')
        && let Ok(n) = inner.parse::<u64>()
    {
        return format!("{} ({})", &name[..open], n + 1);
    }
    format!("{} (2)", name)
}

/// Split a trailing alphabetic statement part off a control id:
/// "ac-2.a" -> ("ac-2", Some("a")), "ac-2.3" -> ("ac-2.3", None)
fn split_control_part(control_id: &str) -> (String, Option<String>) {
    if let Some(dot) = control_id.rfind('.') {
        let part = &control_id[dot + 1..];
        if !part.is_empty() && part.chars().all(|c| c.is_ascii_alphabetic()) {
            return (
                oscalize_control_id(&control_id[..dot]),
                Some(part.to_lowercase()),
            );
        }
    }
    (oscalize_control_id(control_id), None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_document() -> String {
        json!({
            "component-definition": {
                "uuid": "11111111-2222-3333-4444-555555555555",
                "metadata": { "title": "Vendor Pack", "version": "1.0" },
                "components": [
                    {
                        "uuid": "aaaaaaaa-0000-0000-0000-000000000001",
                        "type": "software",
                        "title": "OpenLDAP",
                        "description": "Directory service",
                        "control-implementations": [
                            {
                                "uuid": "bbbbbbbb-0000-0000-0000-000000000001",
                                "source": "NIST_SP-800-53_rev5",
                                "description": "rev5 controls",
                                "implemented-requirements": [
                                    { "control-id": "AC-2", "description": "Accounts are managed." },
                                    { "control-id": "ac-2.a", "description": "Account types are defined." }
                                ]
                            }
                        ]
                    },
                    {
                        "title": "Empty Component",
                        "control-implementations": []
                    }
                ]
            }
        })
        .to_string()
    }

    #[test]
    fn test_increment_element_name() {
        assert_eq!(increment_element_name("OpenLDAP"), "OpenLDAP (2)");
        assert_eq!(increment_element_name("OpenLDAP (2)"), "OpenLDAP (3)");
        assert_eq!(increment_element_name("OpenLDAP (x)"), "OpenLDAP (x) (2)");
    }

    #[test]
    fn test_split_control_part() {
        assert_eq!(split_control_part("ac-2.a"), ("ac-2".to_string(), Some("a".to_string())));
        assert_eq!(split_control_part("AC-2"), ("ac-2".to_string(), None));
        assert_eq!(split_control_part("ac-2.3"), ("ac-2.3".to_string(), None));
    }

    #[test]
    fn test_import_creates_components_and_statements() {
        let db = Database::new(":memory:").expect("Failed to create database");
        let record = import_components(&db, "vendor-pack.json", &sample_document(), "alice").unwrap();

        // The empty component was skipped
        assert_eq!(record.element_count, 1);
        assert_eq!(record.statement_count, 2);

        let element = db.get_element_by_name("OpenLDAP").unwrap().unwrap();
        assert_eq!(element.import_record_id, Some(record.id));

        let prototypes = db
            .list_statements_for_producer(
                element.id,
                Some(StatementType::ControlImplementationPrototype),
            )
            .unwrap();
        assert_eq!(prototypes.len(), 2);
        assert_eq!(prototypes[0].sid.as_deref(), Some("ac-2"));
        assert_eq!(prototypes[1].pid.as_deref(), Some("a"));
    }

    #[test]
    fn test_import_name_collision_suffixed() {
        let db = Database::new(":memory:").expect("Failed to create database");
        import_components(&db, "first.json", &sample_document(), "alice").unwrap();
        import_components(&db, "second.json", &sample_document(), "alice").unwrap();

        assert!(db.get_element_by_name("OpenLDAP").unwrap().is_some());
        assert!(db.get_element_by_name("OpenLDAP (2)").unwrap().is_some());
    }

    #[test]
    fn test_import_invalid_document() {
        let db = Database::new(":memory:").expect("Failed to create database");
        let err = import_components(&db, "bad.json", "{\"catalog\": {}}", "alice").unwrap_err();
        assert!(err.to_string().contains("Invalid OSCAL"));
        assert!(db.list_import_records().unwrap().is_empty());
    }

    #[test]
    fn test_import_all_empty_rolls_back() {
        let db = Database::new(":memory:").expect("Failed to create database");
        let doc = json!({
            "component-definition": {
                "components": [{ "title": "Empty", "control-implementations": [] }]
            }
        })
        .to_string();

        assert!(import_components(&db, "empty.json", &doc, "alice").is_err());
        assert!(db.list_import_records().unwrap().is_empty());
    }
}
