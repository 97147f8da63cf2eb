//! # Graft Common Library
//!
//! Shared code for the graft import service:
//! - Common error type
//! - Settings model and configuration file resolution
//! - Workflow event types and the broadcast event bus

pub mod config;
pub mod error;
pub mod events;

pub use config::ImportSettings;
pub use error::{Error, Result};
pub use events::{EventBus, ImportEvent};
