//! Flow module - browser seam, element location, callback detection and the orchestrator

pub mod backoff;
pub mod browser;
pub mod callback;
pub mod locator;
pub mod model;
pub mod orchestrator;
pub mod page;
pub mod screenshot;
