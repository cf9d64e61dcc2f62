//! # Simulation Configuration
//!
//! Tuning knobs read once at startup. Every field has a default, so an
//! empty TOML document is a valid config:
//!
//! ```toml
//! cell_size = 5000.0
//! collision_event_tag = "Event.System.OnCollision"
//! vm_pool_size = 256
//! max_instructions_per_slice = 10000
//! relevancy_interest_radius = 1
//! resolve_overlaps = true
//! ```

use std::path::Path;

use kinetic_core::spatial::{DEFAULT_CELL_SIZE, DEFAULT_COLLISION_EVENT_TAG};
use kinetic_vm::runtime::MAX_VM_INDEX;
use kinetic_vm::{DEFAULT_MAX_INSTRUCTIONS_PER_SLICE, DEFAULT_VM_POOL_SIZE};
use serde::Deserialize;

use crate::error::{ConfigError, ConfigResult};
use crate::relevancy::MAX_INTEREST_RADIUS;

/// World configuration.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// Spatial cell edge length in world units.
    pub cell_size: f32,
    /// Tag of the system event raised per resolved collision.
    pub collision_event_tag: String,
    /// Number of VM runtime slots.
    pub vm_pool_size: usize,
    /// Instruction budget of one VM slice before it is forced to yield.
    pub max_instructions_per_slice: u32,
    /// Half-width of each observer's subscribed cell square.
    pub relevancy_interest_radius: i32,
    /// Run depenetration and collision events after the VM phase.
    pub resolve_overlaps: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            cell_size: DEFAULT_CELL_SIZE,
            collision_event_tag: DEFAULT_COLLISION_EVENT_TAG.to_owned(),
            vm_pool_size: DEFAULT_VM_POOL_SIZE,
            max_instructions_per_slice: DEFAULT_MAX_INSTRUCTIONS_PER_SLICE,
            relevancy_interest_radius: 1,
            resolve_overlaps: true,
        }
    }
}

impl SimulationConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed TOML or unknown fields,
    /// [`ConfigError::Invalid`] when a value is out of range.
    pub fn from_toml_str(raw: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`Self::from_toml_str`].
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&raw)?;
        tracing::info!("[Config] Loaded {}", path.display());
        Ok(config)
    }

    /// Checks every field range.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> ConfigResult<()> {
        if !self.cell_size.is_finite() || self.cell_size <= 0.0 {
            return Err(invalid("cell_size", format!("must be > 0, got {}", self.cell_size)));
        }
        let max_pool = MAX_VM_INDEX as usize + 1;
        if self.vm_pool_size == 0 || self.vm_pool_size > max_pool {
            return Err(invalid(
                "vm_pool_size",
                format!("must be in 1..={max_pool}, got {}", self.vm_pool_size),
            ));
        }
        if self.collision_event_tag.trim().is_empty() {
            return Err(invalid("collision_event_tag", "must not be empty".to_owned()));
        }
        if self.max_instructions_per_slice == 0 {
            return Err(invalid("max_instructions_per_slice", "must be > 0".to_owned()));
        }
        if !(0..=MAX_INTEREST_RADIUS).contains(&self.relevancy_interest_radius) {
            return Err(invalid(
                "relevancy_interest_radius",
                format!(
                    "must be in 0..={MAX_INTEREST_RADIUS}, got {}",
                    self.relevancy_interest_radius
                ),
            ));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: String) -> ConfigError {
    ConfigError::Invalid { field, reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_default() {
        let config = SimulationConfig::from_toml_str("").expect("empty config");
        assert_eq!(config, SimulationConfig::default());
        assert!((config.cell_size - 5000.0).abs() < f32::EPSILON);
        assert_eq!(config.vm_pool_size, 256);
        assert_eq!(config.max_instructions_per_slice, 10_000);
    }

    #[test]
    fn test_partial_override() {
        let config = SimulationConfig::from_toml_str(
            "cell_size = 1000.0\nvm_pool_size = 32\nresolve_overlaps = false\n",
        )
        .expect("valid config");
        assert!((config.cell_size - 1000.0).abs() < f32::EPSILON);
        assert_eq!(config.vm_pool_size, 32);
        assert!(!config.resolve_overlaps);
        assert_eq!(config.collision_event_tag, "Event.System.OnCollision");
    }

    #[test]
    fn test_rejects_bad_values() {
        for raw in [
            "cell_size = 0.0",
            "cell_size = -5.0",
            "vm_pool_size = 0",
            "vm_pool_size = 16777216",
            "collision_event_tag = \"\"",
            "max_instructions_per_slice = 0",
            "relevancy_interest_radius = -1",
            "relevancy_interest_radius = 100000",
        ] {
            assert!(
                matches!(SimulationConfig::from_toml_str(raw), Err(ConfigError::Invalid { .. })),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn test_largest_pool_accepted() {
        assert!(SimulationConfig::from_toml_str("vm_pool_size = 16777215").is_ok());
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            SimulationConfig::from_toml_str("cell_size = \"big\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            SimulationConfig::from_toml_str("unknown_knob = 1"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            SimulationConfig::from_file("/nonexistent/kinetic.toml"),
            Err(ConfigError::Io(_))
        ));
    }
}
