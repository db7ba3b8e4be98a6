//! OSCAL and OpenControl serialization
//!
//! # Module Structure
//! - `component`: OSCAL component-definition JSON output
//! - `ssp`: OSCAL system-security-plan JSON output
//! - `opencontrol`: OpenControl component YAML output
//! - `import`: typed OSCAL component-definition import

pub mod component;
pub mod import;
pub mod opencontrol;
pub mod ssp;

pub use component::component_definition;
pub use import::import_components;
pub use opencontrol::opencontrol_component;
pub use ssp::system_security_plan;

/// Catalog source used when a statement carries none
pub const DEFAULT_CATALOG_KEY: &str = "NIST_SP-800-53_rev5";
