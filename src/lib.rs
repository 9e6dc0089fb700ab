//! Task management API with background translation of task text.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod i18n;
pub mod memory;
pub mod metrics;
pub mod models;
pub mod read_model;
pub mod retry;
pub mod scheduler;
pub mod security;
pub mod server;
pub mod store;
pub mod tasks;
pub mod translation;
