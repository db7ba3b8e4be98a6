//! Data types and structures for the storage layer

use serde::{Deserialize, Serialize};

/// Statement type enumeration. Stored as lowercase text in the statements table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementType {
    ControlImplementation,
    ControlImplementationPrototype,
    ControlImplementationLegacy,
    Poam,
    SecuritySensitivityLevel,
    SecurityImpactLevel,
}

impl StatementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementType::ControlImplementation => "control_implementation",
            StatementType::ControlImplementationPrototype => "control_implementation_prototype",
            StatementType::ControlImplementationLegacy => "control_implementation_legacy",
            StatementType::Poam => "poam",
            StatementType::SecuritySensitivityLevel => "security_sensitivity_level",
            StatementType::SecurityImpactLevel => "security_impact_level",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "control_implementation" => Some(StatementType::ControlImplementation),
            "control_implementation_prototype" => {
                Some(StatementType::ControlImplementationPrototype)
            }
            "control_implementation_legacy" => Some(StatementType::ControlImplementationLegacy),
            "poam" => Some(StatementType::Poam),
            "security_sensitivity_level" => Some(StatementType::SecuritySensitivityLevel),
            "security_impact_level" => Some(StatementType::SecurityImpactLevel),
            _ => None,
        }
    }
}

impl std::fmt::Display for StatementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selected-control workflow status. Stored as an integer in element_controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlStatus {
    Pending,
    Implemented,
    Assessed,
    ChangesRequested,
}

impl ControlStatus {
    pub fn as_i64(&self) -> i64 {
        match self {
            ControlStatus::Pending => 2,
            ControlStatus::Implemented => 3,
            ControlStatus::Assessed => 4,
            ControlStatus::ChangesRequested => 5,
        }
    }

    pub fn from_i64(v: i64) -> Self {
        match v {
            3 => ControlStatus::Implemented,
            4 => ControlStatus::Assessed,
            5 => ControlStatus::ChangesRequested,
            _ => ControlStatus::Pending,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ControlStatus::Pending => "Pending",
            ControlStatus::Implemented => "Implemented",
            ControlStatus::Assessed => "Assessed",
            ControlStatus::ChangesRequested => "Changes requested",
        }
    }
}

/// Sync state of a control_implementation statement against its prototype
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrototypeSync {
    Synched,
    NotSynched,
    Orphaned,
}

/// A component or system element
#[derive(Debug, Clone, Serialize)]
pub struct ElementMeta {
    pub id: i64,
    pub name: String,
    pub full_name: Option<String>,
    pub description: String,
    pub element_type: Option<String>,
    pub component_type: String,
    pub component_state: String,
    pub oscal_version: String,
    pub uuid: String,
    pub owner: String,
    pub import_record_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

/// A control-implementation narrative (or one of the special statement kinds)
#[derive(Debug, Clone, Serialize)]
pub struct StatementMeta {
    pub id: i64,
    pub sid: Option<String>,
    pub sid_class: Option<String>,
    pub source: Option<String>,
    pub pid: Option<String>,
    pub body: String,
    pub statement_type: String,
    pub status: Option<String>,
    pub remarks: Option<String>,
    pub uuid: String,
    pub producer_element_id: Option<i64>,
    pub consumer_element_id: Option<i64>,
    pub prototype_id: Option<i64>,
    pub import_record_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

/// Fields accepted when creating or updating an element
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ElementInput {
    pub name: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub element_type: Option<String>,
    #[serde(default)]
    pub component_type: Option<String>,
    #[serde(default)]
    pub component_state: Option<String>,
}

/// Fields accepted when creating or updating a statement
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatementInput {
    pub sid: Option<String>,
    pub sid_class: Option<String>,
    pub source: Option<String>,
    pub pid: Option<String>,
    pub body: String,
    pub status: Option<String>,
    pub remarks: Option<String>,
}

/// A system wrapping one root element
#[derive(Debug, Clone, Serialize)]
pub struct SystemMeta {
    pub id: i64,
    pub root_element_id: i64,
    pub name: String,
    pub fisma_id: Option<String>,
    pub owner: String,
    pub created_at: String,
    pub updated_at: String,
}

/// A selected control on a system's root element
#[derive(Debug, Clone, Serialize)]
pub struct ElementControlMeta {
    pub id: i64,
    pub element_id: i64,
    pub oscal_ctl_id: String,
    pub oscal_catalog_key: String,
    pub status: ControlStatus,
    pub uuid: String,
    pub smts_updated_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Result of assigning a baseline: which controls were added, removed, unchanged
#[derive(Debug, Clone, Default, Serialize)]
pub struct BaselineDiff {
    pub add: Vec<String>,
    pub remove: Vec<String>,
    pub no_change: Vec<String>,
}

/// Cached catalog record
#[derive(Debug, Clone, Serialize)]
pub struct CatalogMeta {
    pub catalog_key: String,
    pub title: Option<String>,
    pub baseline_names: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// POA&M detail fields (the weakness description lives in the statement body)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoamDetails {
    #[serde(default)]
    pub controls: Option<String>,
    #[serde(default)]
    pub weakness_name: Option<String>,
    #[serde(default)]
    pub weakness_detection_source: Option<String>,
    #[serde(default)]
    pub weakness_source_identifier: Option<String>,
    #[serde(default)]
    pub remediation_plan: Option<String>,
    #[serde(default)]
    pub scheduled_completion_date: Option<String>,
    #[serde(default)]
    pub milestones: Option<String>,
    #[serde(default)]
    pub milestone_changes: Option<String>,
    #[serde(default)]
    pub risk_rating_original: Option<String>,
    #[serde(default)]
    pub risk_rating_adjusted: Option<String>,
    #[serde(default)]
    pub poam_group: Option<String>,
}

/// Full POA&M: statement plus detail row
#[derive(Debug, Clone, Serialize)]
pub struct PoamMeta {
    pub id: i64,
    pub statement_id: i64,
    pub poam_id: i64,
    pub body: String,
    pub status: Option<String>,
    pub details: PoamDetails,
    pub created_at: String,
    pub updated_at: String,
}

/// A deployment of a system
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentMeta {
    pub id: i64,
    pub system_id: i64,
    pub name: String,
    pub description: String,
    pub uuid: String,
    pub inventory_items: serde_json::Value,
    pub created_at: String,
    pub updated_at: String,
}

/// A system assessment result
#[derive(Debug, Clone, Serialize)]
pub struct AssessmentMeta {
    pub id: i64,
    pub system_id: i64,
    pub deployment_id: Option<i64>,
    pub name: String,
    pub description: Option<String>,
    pub uuid: String,
    pub assessment_results: serde_json::Value,
    pub created_at: String,
    pub updated_at: String,
}

/// Groups elements and statements created by one import
#[derive(Debug, Clone, Serialize)]
pub struct ImportRecordMeta {
    pub id: i64,
    pub name: String,
    pub uuid: String,
    pub element_count: i64,
    pub statement_count: i64,
    pub created_at: String,
}

/// API token metadata (hash is never exposed)
#[derive(Debug, Clone, Serialize)]
pub struct TokenInfo {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub token_prefix: String,
    pub created_at: String,
    pub expires_at: String,
    pub last_used_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_type_round_trip() {
        for ty in [
            StatementType::ControlImplementation,
            StatementType::ControlImplementationPrototype,
            StatementType::ControlImplementationLegacy,
            StatementType::Poam,
            StatementType::SecuritySensitivityLevel,
            StatementType::SecurityImpactLevel,
        ] {
            assert_eq!(StatementType::parse(ty.as_str()), Some(ty));
        }
        assert_eq!(StatementType::parse("bogus"), None);
    }

    #[test]
    fn test_control_status_values() {
        assert_eq!(ControlStatus::Pending.as_i64(), 2);
        assert_eq!(ControlStatus::from_i64(4), ControlStatus::Assessed);
        // Unknown values fall back to Pending
        assert_eq!(ControlStatus::from_i64(99), ControlStatus::Pending);
        assert_eq!(ControlStatus::ChangesRequested.label(), "Changes requested");
    }
}
