//! Settings for the dispatch runner
//!
//! TOML file with one section per concern. Every field has a default, so a
//! partial file (or none at all) is valid. Decision functions are never
//! read from settings; they are attached in code.

use crate::errors::{Result, ToolError};
use crate::events::{EventEmitter, EventPolicy, EventStream, DEFAULT_EVENT_CAPACITY};
use crate::tools::approval::ApprovalConfig;
use crate::tools::dispatcher::{DispatchConfig, MAX_PARALLEL_OPERATIONS};
use crate::tools::registry::ToolRegistry;
use crate::tools::retry::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Complete runner settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub dispatch: DispatchSettings,
    pub retry: RetrySettings,
    pub approval: ApprovalSettings,
    pub events: EventSettings,
}

/// Execution strategy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DispatchSettings {
    pub parallel: bool,
    pub max_concurrent: usize,
    /// Per-call timeout; absent means unbounded
    pub timeout_ms: Option<u64>,
}

/// Retry and backoff
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

/// Which tools are gated
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApprovalSettings {
    pub tools: Vec<String>,
    pub all_tools: bool,
}

/// Event stream sizing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EventSettings {
    pub capacity: usize,
    pub policy: EventPolicy,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            parallel: false,
            max_concurrent: MAX_PARALLEL_OPERATIONS,
            timeout_ms: None,
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay_ms: 200,
            multiplier: 2.0,
            max_delay_ms: 5000,
            jitter: true,
        }
    }
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_EVENT_CAPACITY,
            policy: EventPolicy::DropNewest,
        }
    }
}

impl Settings {
    /// Load settings from file or use defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Load settings from specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ToolError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(contents)
            .map_err(|e| ToolError::ConfigError(format!("Failed to parse settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate settings values
    pub fn validate(&self) -> Result<()> {
        if self.dispatch.max_concurrent == 0 {
            return Err(ToolError::ConfigError(
                "max_concurrent must be greater than 0".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ToolError::ConfigError(
                "max_attempts must be greater than 0".to_string(),
            ));
        }

        if !(self.retry.multiplier >= 1.0) {
            return Err(ToolError::ConfigError(
                "multiplier must be at least 1.0".to_string(),
            ));
        }

        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(ToolError::ConfigError(
                "initial_delay_ms must not exceed max_delay_ms".to_string(),
            ));
        }

        if self.events.capacity == 0 {
            return Err(ToolError::ConfigError(
                "event capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Save settings to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ToolError::ConfigError(format!("Failed to serialize settings: {}", e)))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_millis(self.retry.initial_delay_ms),
        )
        .with_multiplier(self.retry.multiplier)
        .with_max_delay(Duration::from_millis(self.retry.max_delay_ms))
        .with_jitter(self.retry.jitter)
    }

    /// Approval policy without a decision function
    pub fn approval_config(&self) -> ApprovalConfig {
        ApprovalConfig {
            all_tools: self.approval.all_tools,
            ..ApprovalConfig::for_tools(self.approval.tools.iter().cloned())
        }
    }

    /// Dispatch configuration over `registry`
    pub fn dispatch_config(&self, registry: impl Into<Arc<ToolRegistry>>) -> DispatchConfig {
        let mut config = DispatchConfig::new(registry)
            .with_retry(self.retry_policy())
            .with_approval(self.approval_config());

        if let Some(ms) = self.dispatch.timeout_ms {
            config = config.with_timeout(Duration::from_millis(ms));
        }
        if self.dispatch.parallel {
            config = config.with_parallel(self.dispatch.max_concurrent);
        } else {
            config.max_concurrent = self.dispatch.max_concurrent;
        }
        config
    }

    /// Event channel sized by these settings
    pub fn event_channel(&self) -> (EventEmitter, EventStream) {
        EventEmitter::channel(self.events.capacity, self.events.policy)
    }
}
