//! Core approval logic for Checkpoint.
//!
//! This crate contains the approval engine with ZERO web or database dependencies.
//! Persistence and notification delivery are reached through traits that
//! other crates implement.
//!
//! # Modules
//!
//! - `approval` - Rules, conditions, the interception gate, the request
//!   state machine and post-approval resumption

pub mod approval;
