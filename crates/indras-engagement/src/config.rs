//! Configuration and presets for engagement tracking.
//!
//! Provides sensible defaults with the ability to customize behavior
//! through the builder pattern.

use crate::error::{EngagementError, Result};

/// Default cap on events retained per tracker.
pub const DEFAULT_MAX_TRACKED: usize = 500;

/// Default number of registry entries before a sweep runs.
pub const DEFAULT_MAX_CACHE: usize = 100;

/// Reaction payload counted when an event carries no payload.
pub const DEFAULT_REACTION: &str = "+";

/// Preset configurations for common screens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Preset {
    /// Balanced defaults for general use.
    #[default]
    Default,
    /// Timeline-heavy screens with many visible items.
    /// - Larger registry (400 entries)
    /// - Larger writer queue (1024)
    Feed,
    /// Minimal footprint.
    /// - 100 events per tracker
    /// - 32 registry entries
    LowMemory,
}

impl Preset {
    /// Maximum events retained per tracker for this preset.
    pub fn max_tracked(&self) -> usize {
        match self {
            Preset::Default => DEFAULT_MAX_TRACKED,
            Preset::Feed => DEFAULT_MAX_TRACKED,
            Preset::LowMemory => 100,
        }
    }

    /// Registry size that triggers a sweep for this preset.
    pub fn max_cache(&self) -> usize {
        match self {
            Preset::Default => DEFAULT_MAX_CACHE,
            Preset::Feed => 400,
            Preset::LowMemory => 32,
        }
    }

    /// Capacity of the bounded queue feeding each tracker's writer.
    pub fn command_capacity(&self) -> usize {
        match self {
            Preset::Default => 256,
            Preset::Feed => 1024,
            Preset::LowMemory => 64,
        }
    }
}

/// Configuration shared by a registry and the trackers it constructs.
///
/// Each tracker captures a copy at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngagementConfig {
    /// Maximum events kept in one tracker's table.
    pub max_tracked: usize,
    /// Registry entries allowed before dead entries are swept.
    pub max_cache: usize,
    /// Bounded capacity of the writer command queue.
    pub command_capacity: usize,
    /// Reaction payload that also counts empty payloads.
    pub default_reaction: String,
    /// Preset this configuration was derived from.
    pub preset: Preset,
}

impl Default for EngagementConfig {
    fn default() -> Self {
        Self::from_preset(Preset::Default)
    }
}

impl EngagementConfig {
    /// Create a configuration from a preset.
    pub fn from_preset(preset: Preset) -> Self {
        Self {
            max_tracked: preset.max_tracked(),
            max_cache: preset.max_cache(),
            command_capacity: preset.command_capacity(),
            default_reaction: DEFAULT_REACTION.to_string(),
            preset,
        }
    }

    /// Create a builder starting from the default preset.
    pub fn builder() -> EngagementConfigBuilder {
        EngagementConfigBuilder::new()
    }

    fn validate(&self) -> Result<()> {
        if self.max_tracked == 0 {
            return Err(EngagementError::Config("max_tracked must be at least 1".into()));
        }
        if self.max_cache == 0 {
            return Err(EngagementError::Config("max_cache must be at least 1".into()));
        }
        if self.command_capacity == 0 {
            return Err(EngagementError::Config(
                "command_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for an [`EngagementConfig`].
#[derive(Debug, Clone)]
pub struct EngagementConfigBuilder {
    config: EngagementConfig,
}

impl EngagementConfigBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: EngagementConfig::default(),
        }
    }

    /// Create a new builder with a preset configuration.
    pub fn with_preset(preset: Preset) -> Self {
        Self {
            config: EngagementConfig::from_preset(preset),
        }
    }

    /// Set the per-tracker event cap.
    pub fn max_tracked(mut self, max: usize) -> Self {
        self.config.max_tracked = max;
        self
    }

    /// Set the registry sweep threshold.
    pub fn max_cache(mut self, max: usize) -> Self {
        self.config.max_cache = max;
        self
    }

    /// Set the writer queue capacity.
    pub fn command_capacity(mut self, capacity: usize) -> Self {
        self.config.command_capacity = capacity;
        self
    }

    /// Set the reaction that empty payloads count towards.
    pub fn default_reaction(mut self, symbol: impl Into<String>) -> Self {
        self.config.default_reaction = symbol.into();
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<EngagementConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for EngagementConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
