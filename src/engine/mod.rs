//! # Engine Module
//!
//! The staged double-buffered execution engine.
//!
//! This module contains the harness building blocks, leaf first:
//! - Core types (stages, slots, geometry)
//! - Error families
//! - The compute backend capability trait
//! - Stage configuration and variant binding
//! - The resource set and its teardown order
//! - The parity orchestrator
//! - The caller-facing simulation instance
//!
//! Public API exposure is controlled by `lib.rs`.

pub mod types;
pub mod error;
pub mod backend;
pub mod stage;
pub mod resources;
pub mod orchestrator;
pub mod simulation;
