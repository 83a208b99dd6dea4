//! Botforge Core - Configuration model, shared types, settings, and error handling

pub mod config;
pub mod error;
pub mod settings;
pub mod types;

pub use config::*;
pub use error::{Error, Result};
pub use settings::FactorySettings;
pub use types::*;
