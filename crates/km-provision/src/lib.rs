//! km-provision - provisioning orchestrator for the knowledge-mining accelerator
//!
//! Temporarily opens network access on the accelerator's Azure resources,
//! ensures the role grants the ingestion pipeline needs, runs the pipeline,
//! and puts every resource's exposure back the way it was found, on every
//! exit path.

pub mod azure;
pub mod config;
pub mod control_plane;
pub mod elevator;
pub mod error;
pub mod grants;
pub mod orchestrator;
pub mod pipeline;
pub mod resolver;
pub mod restore;
pub mod snapshot;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod wait;
