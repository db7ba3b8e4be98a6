//! OSCAL component-definition serialization

use serde_json::json;
use std::collections::BTreeMap;

use crate::catalog::control_sort_key;
use crate::storage::{ElementMeta, StatementMeta};

use super::DEFAULT_CATALOG_KEY;

/// Statement id for an implemented requirement. A part id already present in
/// the control id is not repeated.
fn statement_id_from_control(control_id: &str, part_id: Option<&str>) -> String {
    match part_id {
        Some(pid) if !control_id.contains(pid) => format!("{}.{}", control_id, pid),
        _ => control_id.to_string(),
    }
}

/// Serialize a component and its statements as an OSCAL component-definition.
/// Statements are grouped into one control-implementation per catalog source.
pub fn component_definition(
    element: &ElementMeta,
    statements: &[StatementMeta],
) -> serde_json::Value {
    // Group statements by source, then order each group naturally by control id
    let mut by_source: BTreeMap<String, Vec<&StatementMeta>> = BTreeMap::new();
    for smt in statements {
        let source = smt
            .source
            .clone()
            .or_else(|| smt.sid_class.clone())
            .unwrap_or_else(|| DEFAULT_CATALOG_KEY.to_string());
        by_source.entry(source).or_default().push(smt);
    }

    let mut control_implementations = Vec::new();
    for (source, mut group) in by_source {
        group.sort_by(|a, b| {
            let ka = a.sid.as_deref().map(control_sort_key).unwrap_or_default();
            let kb = b.sid.as_deref().map(control_sort_key).unwrap_or_default();
            ka.cmp(&kb).then_with(|| a.pid.cmp(&b.pid))
        });

        let requirements: Vec<serde_json::Value> = group
            .iter()
            .map(|smt| {
                let control_id = smt.sid.as_deref().unwrap_or("missing");
                json!({
                    "uuid": smt.uuid,
                    "control-id": statement_id_from_control(control_id, smt.pid.as_deref()),
                    "description": smt.body,
                })
            })
            .collect();

        control_implementations.push(json!({
            "uuid": uuid::Uuid::new_v4().to_string(),
            "source": source.clone(),
            "description": format!("Partial implementation of the {} catalog.", source),
            "implemented-requirements": requirements,
        }));
    }

    let mut component = json!({
        "uuid": element.uuid,
        "type": element.component_type.to_lowercase(),
        "title": element.full_name.clone().unwrap_or_else(|| element.name.clone()),
        "description": element.description,
        "control-implementations": control_implementations,
    });
    if statements.is_empty()
        && let Some(map) = component.as_object_mut()
    {
        map.remove("control-implementations");
    }

    json!({
        "component-definition": {
            "uuid": uuid::Uuid::new_v4().to_string(),
            "metadata": {
                "title": element.name,
                "last-modified": element.updated_at,
                "version": element.updated_at,
                "oscal-version": element.oscal_version,
            },
            "components": [component],
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element() -> ElementMeta {
        ElementMeta {
            id: 1,
            name: "OpenLDAP".to_string(),
            full_name: Some("OpenLDAP Directory Server".to_string()),
            description: "Directory service".to_string(),
            element_type: Some("component".to_string()),
            component_type: "Software".to_string(),
            component_state: "operational".to_string(),
            oscal_version: "1.0.0".to_string(),
            uuid: "aaaaaaaa-0000-0000-0000-000000000001".to_string(),
            owner: "alice".to_string(),
            import_record_id: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-02-01T00:00:00Z".to_string(),
        }
    }

    fn statement(sid: &str, pid: Option<&str>, source: Option<&str>) -> StatementMeta {
        StatementMeta {
            id: 0,
            sid: Some(sid.to_string()),
            sid_class: source.map(String::from),
            source: source.map(String::from),
            pid: pid.map(String::from),
            body: format!("Narrative for {}", sid),
            statement_type: "control_implementation_prototype".to_string(),
            status: None,
            remarks: None,
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
    fn test_statement_id_from_control() {
        assert_eq!(statement_id_from_control("ac-2", Some("a")), "ac-2.a");
        assert_eq!(statement_id_from_control("ac-2.3", Some("3")), "ac-2.3");
        assert_eq!(statement_id_from_control("ac-2", None), "ac-2");
    }

    #[test]
    fn test_component_definition_shape() {
        let smts = vec![
            statement("ac-10", None, Some("NIST_SP-800-53_rev5")),
            statement("ac-2", Some("a"), Some("NIST_SP-800-53_rev5")),
            statement("cm-4", None, Some("NIST_SP-800-171_rev1")),
        ];
        let doc = component_definition(&element(), &smts);

        let comp = &doc["component-definition"]["components"][0];
        assert_eq!(comp["title"], "OpenLDAP Directory Server");
        assert_eq!(comp["type"], "software");

        let impls = comp["control-implementations"].as_array().unwrap();
        assert_eq!(impls.len(), 2);

        // Natural control ordering within the rev5 group
        let rev5 = impls
            .iter()
            .find(|ci| ci["source"] == "NIST_SP-800-53_rev5")
            .unwrap();
        let reqs = rev5["implemented-requirements"].as_array().unwrap();
        assert_eq!(reqs[0]["control-id"], "ac-2.a");
        assert_eq!(reqs[1]["control-id"], "ac-10");
    }

    #[test]
    fn test_empty_statements_omit_implementations() {
        let doc = component_definition(&element(), &[]);
        let comp = &doc["component-definition"]["components"][0];
        assert!(comp.get("control-implementations").is_none());
    }

    #[test]
    fn test_missing_source_falls_back_to_default() {
        let smts = vec![statement("ac-2", None, None)];
        let doc = component_definition(&element(), &smts);
        let impls = doc["component-definition"]["components"][0]["control-implementations"]
            .as_array()
            .unwrap();
        assert_eq!(impls[0]["source"], DEFAULT_CATALOG_KEY);
    }
}
