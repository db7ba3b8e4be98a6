pub mod auth;
pub mod catalog;
pub mod config;
pub mod export;
pub mod health;
pub mod logging;
pub mod oscal;
pub mod server;
pub mod storage;
