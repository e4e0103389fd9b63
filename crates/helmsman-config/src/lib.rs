//! Typed configuration for the Helmsman orchestration core.
//!
//! Layers are read from JSON5, checked against the known keys, folded in
//! precedence order and validated before use.

mod error;
mod loader;
mod model;

pub use error::ConfigError;
pub use loader::{ConfigLayer, ConfigLayerSource, LayeredConfig, LayeredConfigOptions};
pub use model::*;
