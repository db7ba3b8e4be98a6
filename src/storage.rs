//! Storage layer for the compliance tracker
//!
//! This module provides SQLite-based persistence for elements, statements,
//! control selections, catalogs, and assessment records.
//!
//! # Module Structure
//! - `database`: Database connection and lifecycle management
//! - `models`: Data types and structures
//! - `schema`: Database schema initialization and migrations
//! - `elements`: Element and system CRUD
//! - `statements`: Statement lifecycle and prototype sync
//! - `controls`: Control selection and baseline assignment
//! - `systems`: System-level rollups and security statements
//! - `catalogs`: Cached catalog and baseline storage
//! - `poams`: POA&M records
//! - `assessments`: Deployments and assessment results
//! - `imports`: Import records and rollback
//! - `tokens`: API token management

mod assessments;
mod catalogs;
mod controls;
mod database;
mod elements;
mod imports;
mod models;
mod poams;
mod schema;
mod statements;
mod systems;
mod tokens;

// Re-export public types
pub use database::Database;
pub use models::{
    AssessmentMeta, BaselineDiff, CatalogMeta, ControlStatus, DeploymentMeta, ElementControlMeta,
    ElementInput, ElementMeta, ImportRecordMeta, PoamDetails, PoamMeta, PrototypeSync,
    StatementInput, StatementMeta, StatementType, SystemMeta, TokenInfo,
};
