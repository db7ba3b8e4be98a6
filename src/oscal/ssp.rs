//! OSCAL system-security-plan serialization

use serde_json::json;
use std::collections::BTreeMap;

use crate::catalog::{control_sort_key, oscalize_control_id};
use crate::storage::{ElementMeta, StatementMeta, SystemMeta};

/// Statement id within an implemented requirement
fn ssp_statement_id(control_id: &str, part_id: Option<&str>) -> String {
    match part_id {
        Some(pid) => format!("{}_smt.{}", control_id, pid),
        None => format!("{}_smt", control_id),
    }
}

/// Serialize a system as an OSCAL system-security-plan. The statements are
/// the system's control-implementation narratives; components are the
/// operational producer elements behind them.
pub fn system_security_plan(
    system: &SystemMeta,
    root: &ElementMeta,
    components: &[ElementMeta],
    statements: &[StatementMeta],
    sensitivity_level: Option<&str>,
    impact_level: Option<&serde_json::Value>,
) -> serde_json::Value {
    let confidentiality = impact_field(impact_level, "confidentiality");
    let integrity = impact_field(impact_level, "integrity");
    let availability = impact_field(impact_level, "availability");

    // Group statements per control, in natural control order
    let mut by_control: BTreeMap<String, Vec<&StatementMeta>> = BTreeMap::new();
    for smt in statements {
        let Some(sid) = smt.sid.as_deref() else { continue };
        by_control
            .entry(control_sort_key(sid))
            .or_default()
            .push(smt);
    }

    let implemented_requirements: Vec<serde_json::Value> = by_control
        .values()
        .map(|group| {
            let control_id = group[0].sid.as_deref().unwrap_or("missing");
            let statements: Vec<serde_json::Value> = group
                .iter()
                .map(|smt| {
                    let cl_id = oscalize_control_id(control_id);
                    json!({
                        "statement-id": ssp_statement_id(&cl_id, smt.pid.as_deref()),
                        "uuid": uuid::Uuid::new_v4().to_string(),
                        "by-components": [{
                            "component-uuid": producer_uuid(smt, components),
                            "uuid": smt.uuid,
                            "description": smt.body,
                        }],
                    })
                })
                .collect();
            json!({
                "uuid": uuid::Uuid::new_v4().to_string(),
                "control-id": control_id,
                "statements": statements,
            })
        })
        .collect();

    let component_entries: Vec<serde_json::Value> = components
        .iter()
        .map(|comp| {
            json!({
                "uuid": comp.uuid,
                "title": comp.name,
                "description": comp.description,
                "status": { "state": comp.component_state },
                "type": comp.component_type,
            })
        })
        .collect();
    let implemented_components: Vec<serde_json::Value> = components
        .iter()
        .map(|comp| json!({ "component-uuid": comp.uuid }))
        .collect();

    json!({
        "system-security-plan": {
            "uuid": root.uuid,
            "metadata": {
                "title": format!("{} System Security Plan", root.name),
                "last-modified": root.updated_at,
                "version": "1.0",
                "oscal-version": root.oscal_version,
                "parties": [{
                    "uuid": uuid::Uuid::new_v4().to_string(),
                    "type": "person",
                    "name": system.owner,
                }],
            },
            "system-characteristics": {
                "system-name": root.name,
                "description": root.description,
                "system-ids": [{
                    "id": system.fisma_id.clone().unwrap_or_else(|| root.uuid.clone()),
                    "identifier-type": "https://ietf.org/rfc/rfc4122",
                }],
                "security-sensitivity-level": sensitivity_level.unwrap_or("UNKNOWN"),
                "system-information": {
                    "information-types": [{
                        "uuid": uuid::Uuid::new_v4().to_string(),
                        "title": root.name,
                        "description": root.description,
                        "confidentiality-impact": { "base": confidentiality },
                        "integrity-impact": { "base": integrity },
                        "availability-impact": { "base": availability },
                    }],
                },
                "security-impact-level": {
                    "security-objective-confidentiality": confidentiality,
                    "security-objective-integrity": integrity,
                    "security-objective-availability": availability,
                },
                "status": { "state": root.component_state, "remarks": "" },
                "authorization-boundary": {
                    "description": "Authorization boundary not yet described.",
                },
            },
            "system-implementation": {
                "remarks": "",
                "users": [],
                "components": component_entries,
                "inventory-items": [{
                    "uuid": uuid::Uuid::new_v4().to_string(),
                    "description": "System inventory",
                    "implemented-components": implemented_components,
                }],
            },
            "control-implementation": {
                "description": "",
                "implemented-requirements": implemented_requirements,
            },
        }
    })
}

fn impact_field(impact: Option<&serde_json::Value>, field: &str) -> String {
    impact
        .and_then(|v| v.get(field))
        .and_then(|v| v.as_str())
        .unwrap_or("UNKNOWN")
        .to_string()
}

fn producer_uuid(smt: &StatementMeta, components: &[ElementMeta]) -> String {
    smt.producer_element_id
        .and_then(|id| components.iter().find(|c| c.id == id))
        .map(|c| c.uuid.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn system() -> SystemMeta {
        SystemMeta {
            id: 1,
            root_element_id: 10,
            name: "Agency GRC".to_string(),
            fisma_id: Some("FISMA-001".to_string()),
            owner: "alice".to_string(),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-02-01T00:00:00Z".to_string(),
        }
    }

    fn element(id: i64, name: &str) -> ElementMeta {
        ElementMeta {
            id,
            name: name.to_string(),
            full_name: None,
            description: format!("{} description", name),
            element_type: Some("component".to_string()),
            component_type: "software".to_string(),
            component_state: "operational".to_string(),
            oscal_version: "1.0.0".to_string(),
            uuid: format!("aaaaaaaa-0000-0000-0000-{:012}", id),
            owner: "alice".to_string(),
            import_record_id: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-02-01T00:00:00Z".to_string(),
        }
    }

    fn statement(sid: &str, producer: i64) -> StatementMeta {
        StatementMeta {
            id: 0,
            sid: Some(sid.to_string()),
            sid_class: Some("NIST_SP-800-53_rev5".to_string()),
            source: None,
            pid: None,
            body: format!("Narrative for {}", sid),
            statement_type: "control_implementation".to_string(),
            status: None,
            remarks: None,
            uuid: uuid::Uuid::new_v4().to_string(),
            producer_element_id: Some(producer),
            consumer_element_id: Some(10),
            prototype_id: None,
            import_record_id: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_ssp_statement_id() {
        assert_eq!(ssp_statement_id("ac-2", Some("a")), "ac-2_smt.a");
        assert_eq!(ssp_statement_id("ac-2", None), "ac-2_smt");
    }

    #[test]
    fn test_ssp_shape() {
        let root = element(10, "Agency GRC");
        let comps = vec![element(2, "OpenLDAP")];
        let smts = vec![statement("ac-10", 2), statement("ac-2", 2)];
        let impact = json!({ "confidentiality": "moderate", "integrity": "high" });

        let ssp = system_security_plan(
            &system(),
            &root,
            &comps,
            &smts,
            Some("moderate"),
            Some(&impact),
        );

        let plan = &ssp["system-security-plan"];
        assert_eq!(plan["metadata"]["title"], "Agency GRC System Security Plan");
        assert_eq!(
            plan["system-characteristics"]["security-sensitivity-level"],
            "moderate"
        );
        assert_eq!(
            plan["system-characteristics"]["security-impact-level"]["security-objective-integrity"],
            "high"
        );
        // Availability was not set
        assert_eq!(
            plan["system-characteristics"]["security-impact-level"]["security-objective-availability"],
            "UNKNOWN"
        );
        assert_eq!(plan["system-characteristics"]["system-ids"][0]["id"], "FISMA-001");

        // Requirements in natural order, ac-2 before ac-10
        let reqs = plan["control-implementation"]["implemented-requirements"]
            .as_array()
            .unwrap();
        assert_eq!(reqs[0]["control-id"], "ac-2");
        assert_eq!(reqs[1]["control-id"], "ac-10");
        assert_eq!(
            reqs[0]["statements"][0]["by-components"][0]["component-uuid"],
            comps[0].uuid
        );
    }

    #[test]
    fn test_ssp_without_levels() {
        let root = element(10, "Agency GRC");
        let ssp = system_security_plan(&system(), &root, &[], &[], None, None);
        let chars = &ssp["system-security-plan"]["system-characteristics"];
        assert_eq!(chars["security-sensitivity-level"], "UNKNOWN");
        assert!(
            ssp["system-security-plan"]["control-implementation"]["implemented-requirements"]
                .as_array()
                .unwrap()
                .is_empty()
        );
    }
}
