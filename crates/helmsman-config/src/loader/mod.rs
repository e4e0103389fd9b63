//! Layered configuration loader.
//!
//! Discovers configuration layers (user/project/cwd/runtime), validates schema,
//! merges them, and produces a final `HelmsmanConfig`.

mod layer_io;
mod schema;

#[cfg(test)]
mod tests;

use crate::{ConfigError, HelmsmanConfig, MAX_PLAN_STEPS, MIN_PLAN_STEPS};
use log::{debug, info, warn};
use serde_json::Value;
use serde_json::map::Entry;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Default config filename in local layers.
const DEFAULT_CONFIG_FILE: &str = "helmsman.json5";
/// Default config directory under user or repo roots.
const DEFAULT_CONFIG_DIR: &str = ".helmsman";
/// Marker files/dirs that identify a project root.
const DEFAULT_PROJECT_ROOT_MARKERS: &[&str] = &[".git"];

/// Effective config plus metadata about which layers were loaded.
#[derive(Debug, Clone)]
pub struct LayeredConfig {
    /// The merged, validated config.
    pub config: HelmsmanConfig,
    /// Metadata for each layer that contributed.
    pub layers: Vec<ConfigLayer>,
}

/// Origin for a single config layer in the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLayerSource {
    /// User-specific configuration.
    User,
    /// Project root configuration.
    Project,
    /// Current working directory configuration.
    Cwd,
    /// Runtime overrides (highest precedence).
    Runtime,
}

/// Metadata about a loaded config layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLayer {
    /// Layer origin.
    pub source: ConfigLayerSource,
    /// Location on disk.
    pub path: PathBuf,
}

/// Options controlling layered config discovery and overrides.
#[derive(Debug, Clone)]
pub struct LayeredConfigOptions {
    /// Working directory used to resolve local layers.
    pub cwd: PathBuf,
    /// Optional user config path (defaults to `~/.helmsman/helmsman.json5`).
    pub user_config_path: Option<PathBuf>,
    /// Runtime override config paths applied last.
    pub runtime_paths: Vec<PathBuf>,
    /// Marker files/dirs used to detect the project root.
    pub project_root_markers: Vec<String>,
}

impl LayeredConfigOptions {
    /// Create options with default layer locations for the provided cwd.
    pub fn new(cwd: impl AsRef<Path>) -> Self {
        Self {
            cwd: cwd.as_ref().to_path_buf(),
            user_config_path: layer_io::default_user_config_path(),
            runtime_paths: Vec::new(),
            project_root_markers: DEFAULT_PROJECT_ROOT_MARKERS
                .iter()
                .map(|marker| marker.to_string())
                .collect(),
        }
    }

    /// Override the user config location.
    pub fn with_user_config_path(mut self, path: impl AsRef<Path>) -> Self {
        self.user_config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Add a runtime override config path that is applied last.
    pub fn with_runtime_path(mut self, path: impl AsRef<Path>) -> Self {
        self.runtime_paths.push(path.as_ref().to_path_buf());
        self
    }
}

impl HelmsmanConfig {
    /// Load a single config from a path (no layering).
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        info!("loading config from path: {}", path.as_ref().display());
        let contents = fs::read_to_string(path)?;
        let value: Value = json5::from_str(&contents)?;
        config_from_value(value, "config")
    }

    /// Load a single config from JSON5 contents (no layering).
    pub fn load_from_str(contents: &str) -> Result<Self, ConfigError> {
        debug!("loading config from raw contents (len={})", contents.len());
        let value: Value = json5::from_str(contents)?;
        config_from_value(value, "config")
    }

    /// Load a layered config stack using the default layer locations.
    pub fn load_layered(cwd: impl AsRef<Path>) -> Result<LayeredConfig, ConfigError> {
        Self::load_layered_with_options(LayeredConfigOptions::new(cwd))
    }

    /// Load a layered config stack using explicit layer locations and overrides.
    ///
    /// Layer precedence (low -> high): user, project, cwd, runtime overrides.
    pub fn load_layered_with_options(
        options: LayeredConfigOptions,
    ) -> Result<LayeredConfig, ConfigError> {
        let cwd = layer_io::normalize_path(&options.cwd)?;
        let mut candidates = Vec::new();
        if let Some(path) = options.user_config_path {
            candidates.push((ConfigLayerSource::User, path));
        }
        match layer_io::find_project_root(&cwd, &options.project_root_markers) {
            Some(root) => {
                debug!("resolved project root: {}", root.display());
                candidates.push((
                    ConfigLayerSource::Project,
                    root.join(DEFAULT_CONFIG_DIR).join(DEFAULT_CONFIG_FILE),
                ));
            }
            None => debug!("project root not found; skipping project layer"),
        }
        candidates.push((ConfigLayerSource::Cwd, cwd.join(DEFAULT_CONFIG_FILE)));

        let mut layers = Vec::new();
        let mut merged = Value::Object(serde_json::Map::new());
        let mut seen_paths = HashSet::new();

        for (source, path) in candidates {
            if !path.exists() {
                debug!(
                    "skipping missing layer (source={:?}, path={})",
                    source,
                    path.display()
                );
                continue;
            }
            if !seen_paths.insert(layer_io::unique_path(&path)) {
                debug!("skipping duplicate layer (path={})", path.display());
                continue;
            }
            let value = layer_io::load_layer(source, &path)?;
            overlay_layer(&mut merged, value);
            layers.push(ConfigLayer { source, path });
        }

        for path in options.runtime_paths {
            let value = layer_io::load_layer(ConfigLayerSource::Runtime, &path)?;
            overlay_layer(&mut merged, value);
            layers.push(ConfigLayer {
                source: ConfigLayerSource::Runtime,
                path,
            });
        }

        let config = config_from_value(merged, "effective")?;
        info!("layered config loaded (layers={})", layers.len());
        Ok(LayeredConfig { config, layers })
    }

    /// Validate configuration invariants that cannot be expressed in serde.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let planning = &self.planning;
        if !(MIN_PLAN_STEPS..=MAX_PLAN_STEPS).contains(&planning.max_steps) {
            warn!(
                "planning.max_steps={} outside {}..={}; planner will clamp",
                planning.max_steps, MIN_PLAN_STEPS, MAX_PLAN_STEPS
            );
        }
        let cost = planning.budget.cost_ceiling;
        if !cost.is_finite() || cost < 0.0 {
            return Err(invalid("planning.budget.cost_ceiling", "must be >= 0"));
        }

        let retry = &self.retry;
        if retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be at least 1"));
        }
        if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
            return Err(invalid("retry.multiplier", "must be >= 1.0"));
        }
        if !(0.0..=1.0).contains(&retry.jitter) {
            return Err(invalid("retry.jitter", "must be within 0.0..=1.0"));
        }
        if retry.base_delay_ms > retry.max_delay_ms {
            return Err(invalid(
                "retry.base_delay_ms",
                "must not exceed retry.max_delay_ms",
            ));
        }

        if self.orchestrator.max_concurrency == 0 {
            return Err(invalid("orchestrator.max_concurrency", "must be at least 1"));
        }
        Ok(())
    }
}

/// Fold a later layer into `base`. Objects combine key by key; any other
/// value, arrays included, replaces what was there.
fn overlay_layer(base: &mut Value, layer: Value) {
    match (base, layer) {
        (Value::Object(target), Value::Object(source)) => {
            for (key, value) in source {
                match target.entry(key) {
                    Entry::Occupied(mut slot) => overlay_layer(slot.get_mut(), value),
                    Entry::Vacant(slot) => {
                        slot.insert(value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

fn config_from_value(value: Value, label: &str) -> Result<HelmsmanConfig, ConfigError> {
    schema::validate_layer_schema(&value, label)?;
    let config: HelmsmanConfig = serde_json::from_value(value)?;
    config.validate()?;
    Ok(config)
}

fn invalid(path: &str, message: &str) -> ConfigError {
    ConfigError::InvalidField {
        path: path.to_string(),
        message: message.to_string(),
    }
}
