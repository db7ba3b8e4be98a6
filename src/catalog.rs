//! OSCAL control catalog parsing and control-id handling

use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::collections::HashMap;

/// A control flattened out of an OSCAL catalog's group tree
#[derive(Debug, Clone, Serialize)]
pub struct CatalogControl {
    pub id: String,
    pub class: Option<String>,
    pub title: String,
    pub family_id: String,
    pub family_title: String,
    pub statement: String,
    pub guidance: Option<String>,
    pub sort_id: String,
}

/// A parsed catalog: metadata plus its controls in natural order
#[derive(Debug, Clone, Serialize)]
pub struct Catalog {
    pub catalog_key: String,
    pub title: String,
    pub version: Option<String>,
    pub controls: Vec<CatalogControl>,
}

impl Catalog {
    /// Parse an OSCAL catalog JSON document, flattening groups and
    /// enhancement controls into one list
    pub fn from_json(catalog_key: &str, raw: &serde_json::Value) -> Result<Self> {
        let catalog = raw
            .get("catalog")
            .context("Document has no top-level 'catalog' object")?;

        let title = catalog
            .pointer("/metadata/title")
            .and_then(|v| v.as_str())
            .unwrap_or(catalog_key)
            .to_string();
        let version = catalog
            .pointer("/metadata/version")
            .and_then(|v| v.as_str())
            .map(String::from);

        let mut controls = Vec::new();
        if let Some(groups) = catalog.get("groups").and_then(|v| v.as_array()) {
            for group in groups {
                let family_id = group
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                let family_title = group
                    .get("title")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                if let Some(group_controls) = group.get("controls").and_then(|v| v.as_array()) {
                    for control in group_controls {
                        collect_control(control, &family_id, &family_title, &mut controls);
                    }
                }
            }
        }
        if controls.is_empty() {
            bail!("Catalog '{}' contains no controls", catalog_key);
        }

        controls.sort_by(|a, b| a.sort_id.cmp(&b.sort_id));

        Ok(Self {
            catalog_key: catalog_key.to_string(),
            title,
            version,
            controls,
        })
    }

    /// Look up a control by id, accepting any of the common spellings
    pub fn get_control(&self, ctl_id: &str) -> Option<&CatalogControl> {
        let wanted = oscalize_control_id(ctl_id);
        self.controls.iter().find(|c| c.id == wanted)
    }
}

/// Recursively flatten a control and its enhancement controls
fn collect_control(
    control: &serde_json::Value,
    family_id: &str,
    family_title: &str,
    out: &mut Vec<CatalogControl>,
) {
    let id = control
        .get("id")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    if !id.is_empty() {
        let params = param_labels(control);
        let statement = part_prose(control, "statement", &params);
        let guidance = {
            let text = part_prose(control, "guidance", &params);
            if text.is_empty() { None } else { Some(text) }
        };

        out.push(CatalogControl {
            sort_id: control_sort_key(&id),
            class: control.get("class").and_then(|v| v.as_str()).map(String::from),
            title: control
                .get("title")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
            family_id: family_id.to_string(),
            family_title: family_title.to_string(),
            statement,
            guidance,
            id,
        });
    }

    if let Some(children) = control.get("controls").and_then(|v| v.as_array()) {
        for child in children {
            collect_control(child, family_id, family_title, out);
        }
    }
}

/// Map of parameter id to its label, used to fill prose placeholders
fn param_labels(control: &serde_json::Value) -> HashMap<String, String> {
    let mut labels = HashMap::new();
    if let Some(params) = control.get("params").and_then(|v| v.as_array()) {
        for param in params {
            let id = param.get("id").and_then(|v| v.as_str());
            let label = param
                .get("label")
                .and_then(|v| v.as_str())
                .or_else(|| param.pointer("/select/choice/0").and_then(|v| v.as_str()));
            if let (Some(id), Some(label)) = (id, label) {
                labels.insert(id.to_string(), label.to_string());
            }
        }
    }
    labels
}

/// Concatenated prose of the named part and its sub-parts, with parameter
/// placeholders replaced by "[label]"
fn part_prose(
    control: &serde_json::Value,
    part_name: &str,
    params: &HashMap<String, String>,
) -> String {
    let mut lines = Vec::new();
    if let Some(parts) = control.get("parts").and_then(|v| v.as_array()) {
        for part in parts {
            if part.get("name").and_then(|v| v.as_str()) == Some(part_name) {
                gather_prose(part, params, &mut lines);
            }
        }
    }
    lines.join("\n")
}

fn gather_prose(part: &serde_json::Value, params: &HashMap<String, String>, out: &mut Vec<String>) {
    if let Some(prose) = part.get("prose").and_then(|v| v.as_str()) {
        let text = substitute_params(prose, params);
        match part_label(part) {
            Some(label) => out.push(format!("{} {}", label, text)),
            None => out.push(text),
        }
    }
    if let Some(children) = part.get("parts").and_then(|v| v.as_array()) {
        for child in children {
            gather_prose(child, params, out);
        }
    }
}

/// The "label" prop of a part ("a.", "1.", ...), if present
fn part_label(part: &serde_json::Value) -> Option<&str> {
    part.get("props")?
        .as_array()?
        .iter()
        .find(|p| p.get("name").and_then(|v| v.as_str()) == Some("label"))?
        .get("value")?
        .as_str()
}

/// Replace "{{ insert: param, <id> }}" placeholders with "[label]"
fn substitute_params(prose: &str, params: &HashMap<String, String>) -> String {
    let mut result = String::with_capacity(prose.len());
    let mut rest = prose;
    while let Some(start) = rest.find("{{") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            result.push_str(&rest[start..]);
            return result;
        };
        let inner = after[..end].trim();
        let param_id = inner
            .strip_prefix("insert:")
            .map(|s| s.trim())
            .and_then(|s| s.strip_prefix("param,"))
            .map(|s| s.trim());
        match param_id.and_then(|id| params.get(id)) {
            Some(label) => {
                result.push('[');
                result.push_str(label);
                result.push(']');
            }
            None => result.push_str("[Assignment]"),
        }
        rest = &after[end + 2..];
    }
    result.push_str(rest);
    result
}

/// Normalize a control id to OSCAL form: lowercase, no leading zeros,
/// enhancements as ".n". "AC-2 (3)" and "AC-02(3)" both become "ac-2.3".
pub fn oscalize_control_id(ctl_id: &str) -> String {
    let trimmed = ctl_id.trim().to_lowercase();

    let mut chars = trimmed.chars().peekable();
    let mut family = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_alphabetic() {
            family.push(c);
            chars.next();
        } else {
            break;
        }
    }
    if family.is_empty() {
        return trimmed;
    }

    let rest: String = chars.collect();
    let mut numbers: Vec<u64> = Vec::new();
    let mut current = String::new();
    for c in rest.chars() {
        if c.is_ascii_digit() {
            current.push(c);
        } else if !current.is_empty() {
            if let Ok(n) = current.parse() {
                numbers.push(n);
            }
            current.clear();
        }
    }
    if !current.is_empty()
        && let Ok(n) = current.parse()
    {
        numbers.push(n);
    }

    match numbers.as_slice() {
        [] => family,
        [n] => format!("{}-{}", family, n),
        [n, rest @ ..] => {
            let mut id = format!("{}-{}", family, n);
            for part in rest {
                id.push('.');
                id.push_str(&part.to_string());
            }
            id
        }
    }
}

/// Sort key giving natural control ordering (ac-2 before ac-10,
/// base controls before their enhancements)
pub fn control_sort_key(ctl_id: &str) -> String {
    let normalized = oscalize_control_id(ctl_id);
    let mut key = String::new();
    let mut digits = String::new();
    for c in normalized.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
        } else {
            if !digits.is_empty() {
                key.push_str(&format!("{:0>6}", digits));
                digits.clear();
            }
            key.push(c);
        }
    }
    if !digits.is_empty() {
        key.push_str(&format!("{:0>6}", digits));
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_oscalize_control_id() {
        assert_eq!(oscalize_control_id("AC-2"), "ac-2");
        assert_eq!(oscalize_control_id("AC-02"), "ac-2");
        assert_eq!(oscalize_control_id("AC-2 (3)"), "ac-2.3");
        assert_eq!(oscalize_control_id("AC-2(3)"), "ac-2.3");
        assert_eq!(oscalize_control_id("ac-2.3"), "ac-2.3");
        assert_eq!(oscalize_control_id(" au-12 "), "au-12");
        assert_eq!(oscalize_control_id("PE"), "pe");
    }

    #[test]
    fn test_control_sort_key_ordering() {
        let mut ids = vec!["ac-10", "ac-2", "ac-2.11", "ac-2.2", "au-1"];
        ids.sort_by_key(|id| control_sort_key(id));
        assert_eq!(ids, vec!["ac-2", "ac-2.2", "ac-2.11", "ac-10", "au-1"]);
    }

    fn sample_catalog() -> serde_json::Value {
        json!({
            "catalog": {
                "uuid": "11111111-2222-3333-4444-555555555555",
                "metadata": { "title": "Sample Catalog", "version": "5.1" },
                "groups": [
                    {
                        "id": "ac",
                        "title": "Access Control",
                        "controls": [
                            {
                                "id": "ac-2",
                                "class": "SP800-53",
                                "title": "Account Management",
                                "params": [
                                    { "id": "ac-2_prm_1", "label": "organization-defined account types" }
                                ],
                                "parts": [
                                    {
                                        "id": "ac-2_smt",
                                        "name": "statement",
                                        "parts": [
                                            {
                                                "id": "ac-2_smt.a",
                                                "name": "item",
                                                "props": [{ "name": "label", "value": "a." }],
                                                "prose": "Define {{ insert: param, ac-2_prm_1 }} allowed for use;"
                                            }
                                        ]
                                    },
                                    {
                                        "id": "ac-2_gdn",
                                        "name": "guidance",
                                        "prose": "Examples of account types include individual and shared."
                                    }
                                ],
                                "controls": [
                                    {
                                        "id": "ac-2.1",
                                        "class": "SP800-53-enhancement",
                                        "title": "Automated System Account Management",
                                        "parts": [
                                            {
                                                "id": "ac-2.1_smt",
                                                "name": "statement",
                                                "prose": "Support the management of system accounts using automated mechanisms."
                                            }
                                        ]
                                    }
                                ]
                            }
                        ]
                    }
                ]
            }
        })
    }

    #[test]
    fn test_catalog_flattens_enhancements() {
        let catalog = Catalog::from_json("SAMPLE", &sample_catalog()).unwrap();
        assert_eq!(catalog.title, "Sample Catalog");
        assert_eq!(catalog.controls.len(), 2);

        let ids: Vec<&str> = catalog.controls.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["ac-2", "ac-2.1"]);

        let enhancement = catalog.get_control("AC-2 (1)").unwrap();
        assert_eq!(enhancement.title, "Automated System Account Management");
        assert_eq!(enhancement.family_id, "ac");
    }

    #[test]
    fn test_statement_prose_with_params() {
        let catalog = Catalog::from_json("SAMPLE", &sample_catalog()).unwrap();
        let ac2 = catalog.get_control("ac-2").unwrap();
        assert_eq!(
            ac2.statement,
            "a. Define [organization-defined account types] allowed for use;"
        );
        assert_eq!(
            ac2.guidance.as_deref(),
            Some("Examples of account types include individual and shared.")
        );
    }

    #[test]
    fn test_catalog_without_controls_rejected() {
        let raw = json!({ "catalog": { "metadata": { "title": "Empty" }, "groups": [] } });
        assert!(Catalog::from_json("EMPTY", &raw).is_err());
    }

    #[test]
    fn test_missing_catalog_object_rejected() {
        let raw = json!({ "profile": {} });
        assert!(Catalog::from_json("X", &raw).is_err());
    }
}
