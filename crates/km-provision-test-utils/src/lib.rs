//! Shared test utilities for km-provision
//!
//! This crate provides common test helpers that can be used across
//! multiple test modules without circular dependencies.
//!
//! ## Modules
//!
//! - [`azure`]: Fixed identifiers, resource references and run ids
//! - [`scripts`]: Throwaway stage scripts for pipeline tests

pub mod azure;
pub mod scripts;

// Re-export commonly used items
pub use azure::{TEST_PRINCIPAL, TEST_RESOURCE_GROUP, TEST_SUBSCRIPTION, resource, test_run_id};
pub use scripts::write_stage_script;
