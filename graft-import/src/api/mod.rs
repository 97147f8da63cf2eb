//! HTTP API handlers for graft-import
//!
//! Fire-and-forget dispatch of import runs plus status polling.

pub mod health;
pub mod imports;

pub use health::health_routes;
pub use imports::import_routes;
