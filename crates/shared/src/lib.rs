//! Shared types and configuration for Checkpoint.
//!
//! This crate provides common types used across all other crates:
//! - Typed IDs for type-safe entity references
//! - Pagination types for admin listings
//! - Configuration management
//! - Tracing subscriber bootstrap

pub mod config;
pub mod telemetry;
pub mod types;

pub use config::{AppConfig, EngineConfig, LoggingConfig};
