//! OpenControl component YAML serialization

use anyhow::Result;
use serde::Serialize;

use crate::catalog::Catalog;
use crate::storage::{ElementMeta, StatementMeta};

pub const OPENCONTROL_SCHEMA_VERSION: &str = "3.0.0";

#[derive(Debug, Serialize)]
struct OpenControlComponent {
    name: String,
    schema_version: String,
    documentation_complete: bool,
    satisfies: Vec<Satisfies>,
}

#[derive(Debug, Serialize)]
struct Satisfies {
    control_key: String,
    control_name: String,
    standard_key: String,
    covered_by: Vec<String>,
    security_control_type: String,
    narrative: Vec<Text>,
    remarks: Vec<Text>,
}

#[derive(Debug, Serialize)]
struct Text {
    text: String,
}

/// Serialize a component's statements as an OpenControl component YAML
/// document. Control titles are resolved against the catalog when available.
pub fn opencontrol_component(
    element: &ElementMeta,
    statements: &[StatementMeta],
    catalog: Option<&Catalog>,
) -> Result<String> {
    let satisfies = statements
        .iter()
        .map(|smt| {
            let sid = smt.sid.as_deref().unwrap_or("");
            let control_name = catalog
                .and_then(|c| c.get_control(sid))
                .map(|c| c.title.clone())
                .unwrap_or_default();
            Satisfies {
                control_key: sid.to_uppercase(),
                control_name,
                standard_key: smt.sid_class.clone().unwrap_or_default(),
                covered_by: Vec::new(),
                security_control_type: "Hybrid".to_string(),
                narrative: vec![Text {
                    text: smt.body.clone(),
                }],
                remarks: vec![Text {
                    text: smt.remarks.clone().unwrap_or_default(),
                }],
            }
        })
        .collect();

    let doc = OpenControlComponent {
        name: element.name.clone(),
        schema_version: OPENCONTROL_SCHEMA_VERSION.to_string(),
        documentation_complete: false,
        satisfies,
    };
    Ok(serde_yaml::to_string(&doc)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element() -> ElementMeta {
        ElementMeta {
            id: 1,
            name: "OpenLDAP".to_string(),
            full_name: None,
            description: "Directory service".to_string(),
            element_type: Some("component".to_string()),
            component_type: "software".to_string(),
            component_state: "operational".to_string(),
            oscal_version: "1.0.0".to_string(),
            uuid: "aaaaaaaa-0000-0000-0000-000000000001".to_string(),
            owner: "alice".to_string(),
            import_record_id: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-02-01T00:00:00Z".to_string(),
        }
    }

    fn statement(sid: &str) -> StatementMeta {
        StatementMeta {
            id: 0,
            sid: Some(sid.to_string()),
            sid_class: Some("NIST_SP-800-53_rev5".to_string()),
            source: None,
            pid: None,
            body: "Accounts are managed centrally.".to_string(),
            statement_type: "control_implementation_prototype".to_string(),
            status: None,
            remarks: Some("Reviewed annually.".to_string()),
            uuid: uuid::Uuid::new_v4().to_string(),
            producer_element_id: Some(1),
            consumer_element_id: None,
            prototype_id: None,
            import_record_id: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_opencontrol_yaml_shape() {
        let yaml = opencontrol_component(&element(), &[statement("ac-2")], None).unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(parsed["name"], "OpenLDAP");
        assert_eq!(parsed["schema_version"], OPENCONTROL_SCHEMA_VERSION);
        assert_eq!(parsed["documentation_complete"], false);
        assert_eq!(parsed["satisfies"][0]["control_key"], "AC-2");
        assert_eq!(
            parsed["satisfies"][0]["narrative"][0]["text"],
            "Accounts are managed centrally."
        );
        assert_eq!(
            parsed["satisfies"][0]["remarks"][0]["text"],
            "Reviewed annually."
        );
    }

    #[test]
    fn test_opencontrol_empty_satisfies() {
        let yaml = opencontrol_component(&element(), &[], None).unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        assert!(parsed["satisfies"].as_sequence().unwrap().is_empty());
    }
}
