// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Host configuration via `framegate.toml`.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::core::context::FrameBufferPoolConfig;
use crate::core::graph::{DEFAULT_POLL_TIMEOUT, GraphRunnerConfig, RunningMode};
use crate::core::solutions::ModelType;
use crate::core::{GraphError, Result};

/// `[runner]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunnerSection {
    /// Poll deadline in milliseconds. `0` disables the deadline.
    pub poll_timeout_ms: u64,
    pub running_mode: RunningMode,
    pub input_stream: String,
}

impl Default for RunnerSection {
    fn default() -> Self {
        let defaults = GraphRunnerConfig::default();
        Self {
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT.as_millis() as u64,
            running_mode: RunningMode::default(),
            input_stream: defaults.input_stream,
        }
    }
}

impl RunnerSection {
    pub fn runner_config(&self) -> GraphRunnerConfig {
        GraphRunnerConfig {
            input_stream: self.input_stream.clone(),
            poll_timeout: (self.poll_timeout_ms > 0)
                .then(|| Duration::from_millis(self.poll_timeout_ms)),
        }
    }
}

/// `[graph]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphSection {
    pub num_faces: i32,
    pub model_type: ModelType,
}

impl Default for GraphSection {
    fn default() -> Self {
        Self {
            num_faces: 1,
            model_type: ModelType::default(),
        }
    }
}

/// Configuration from `framegate.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FramegateConfig {
    pub pool: FrameBufferPoolConfig,
    pub runner: RunnerSection,
    pub graph: GraphSection,
}

impl FramegateConfig {
    /// Configuration file name.
    pub const FILE_NAME: &'static str = "framegate.toml";

    /// Parse from TOML text and validate.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| GraphError::Configuration(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a directory. Returns error if the file is
    /// missing, cannot be parsed or fails validation.
    pub fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join(Self::FILE_NAME);

        let content = std::fs::read_to_string(&config_path).map_err(|e| {
            GraphError::Configuration(format!("Failed to read {}: {}", config_path.display(), e))
        })?;

        let config = Self::from_toml(&content).map_err(|e| {
            GraphError::Configuration(format!("{}: {}", config_path.display(), e))
        })?;

        tracing::info!("Loaded framegate config from {}", config_path.display());
        Ok(config)
    }

    /// Load configuration from a directory, returning defaults if the file
    /// is missing or invalid.
    pub fn load_or_default(dir: &Path) -> Self {
        let config_path = dir.join(Self::FILE_NAME);

        if !config_path.exists() {
            tracing::debug!(
                "No {} found in {}, using defaults",
                Self::FILE_NAME,
                dir.display()
            );
            return Self::default();
        }

        match Self::load(dir) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("{}, using defaults", e);
                Self::default()
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if let Some(max) = self.pool.max_capacity {
            if max == 0 {
                return Err(GraphError::Configuration(
                    "pool.max_capacity must be at least 1".into(),
                ));
            }
            if self.pool.low_water_mark > max {
                return Err(GraphError::Configuration(format!(
                    "pool.low_water_mark ({}) exceeds pool.max_capacity ({})",
                    self.pool.low_water_mark, max
                )));
            }
        }
        if self.graph.num_faces < 1 {
            return Err(GraphError::Configuration(
                "graph.num_faces must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
