//! Interpreter Configuration
//!
//! An optional `Ember.toml` in the working directory tunes the collector
//! and the value stack:
//!
//! ```toml
//! [gc]
//! floor_bytes = 2097152
//! grow_factor = 2
//!
//! [vm]
//! stack_max_slots = 1048576
//! ```
//!
//! Every field is optional; missing ones keep the VM defaults.

use std::path::Path;

use ember_runtime::VmOptions;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub gc: GcConfig,
    #[serde(default)]
    pub vm: VmConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GcConfig {
    /// Collection floor in bytes; `next_gc` never drops below this.
    pub floor_bytes: Option<u64>,
    /// Heap growth factor applied after each collection.
    pub grow_factor: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VmConfig {
    /// Hard cap on value-stack slots.
    pub stack_max_slots: Option<u64>,
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "could not read config: {e}"),
            ConfigError::Parse(e) => write!(f, "invalid config: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Loads `path` when present; `Ok(None)` when the file does not exist.
pub fn load(path: &Path) -> Result<Option<Config>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&text)?;
    Ok(Some(config))
}

impl Config {
    pub fn vm_options(&self) -> VmOptions {
        let mut options = VmOptions::default();
        if let Some(floor) = self.gc.floor_bytes {
            options.gc_floor = floor as usize;
        }
        if let Some(factor) = self.gc.grow_factor {
            options.gc_grow_factor = factor as usize;
        }
        if let Some(slots) = self.vm.stack_max_slots {
            options.stack_max = slots as usize;
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config_parses() {
        let config: Config = toml::from_str(
            "[gc]\nfloor_bytes = 4096\ngrow_factor = 3\n\n[vm]\nstack_max_slots = 512\n",
        )
        .expect("parses");
        let options = config.vm_options();
        assert_eq!(options.gc_floor, 4096);
        assert_eq!(options.gc_grow_factor, 3);
        assert_eq!(options.stack_max, 512);
    }

    #[test]
    fn test_empty_config_keeps_defaults() {
        let config: Config = toml::from_str("").expect("parses");
        let options = config.vm_options();
        let defaults = VmOptions::default();
        assert_eq!(options.gc_floor, defaults.gc_floor);
        assert_eq!(options.stack_max, defaults.stack_max);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(toml::from_str::<Config>("[gc]\nbogus = 1\n").is_err());
    }

    #[test]
    fn test_missing_file_is_none() {
        let loaded = load(Path::new("/nonexistent/Ember.toml")).expect("no error");
        assert!(loaded.is_none());
    }
}
