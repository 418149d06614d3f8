// Runtime configuration
//
// Execution policy (strategy chain, retries, timeout) and marketplace options. Loadable from TOML,
// either bare or under a [runtime] section.

use crate::error::{Result, RuntimeError};
use busy_abstraction::ExecutionType;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Serializes a `Duration` as whole milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Process-wide execution policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionPolicy {
    /// Strategies tried in order for every step
    pub default_chain: Vec<ExecutionType>,
    /// Whether `human` may be attempted when other strategies are also configured
    pub allow_human_override: bool,
    /// Attempts per strategy before falling back
    pub max_retries: u32,
    /// Time budget per attempt
    #[serde(rename = "execution_timeout_ms", with = "duration_ms")]
    pub execution_timeout: Duration,
    /// Strategies this deployment permits
    pub available_types: Vec<ExecutionType>,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        let chain = vec![ExecutionType::Algorithmic, ExecutionType::Ai, ExecutionType::Human];
        Self {
            default_chain: chain.clone(),
            allow_human_override: true,
            max_retries: 3,
            execution_timeout: Duration::from_secs(30),
            available_types: chain,
        }
    }
}

impl ExecutionPolicy {
    /// Returns `true` if the type is listed in `available_types`.
    #[must_use]
    pub fn permits(&self, execution_type: &ExecutionType) -> bool {
        self.available_types.contains(execution_type)
    }

    /// Attempts made per strategy before falling back.
    #[must_use]
    pub fn attempts_per_type(&self) -> u32 {
        self.max_retries
    }

    /// Checks the policy for values that would make every step fail.
    ///
    /// # Errors
    /// Returns `Config` if the retry budget or the per-attempt timeout is zero
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(RuntimeError::Config("max_retries must be at least 1".to_string()));
        }
        if self.execution_timeout.is_zero() {
            return Err(RuntimeError::Config("execution_timeout_ms must be positive".to_string()));
        }
        Ok(())
    }

    /// Merges a partial update into this policy.
    pub fn apply(&mut self, update: ExecutionPolicyUpdate) {
        if let Some(chain) = update.default_chain {
            self.default_chain = chain;
        }
        if let Some(allow) = update.allow_human_override {
            self.allow_human_override = allow;
        }
        if let Some(retries) = update.max_retries {
            self.max_retries = retries;
        }
        if let Some(timeout) = update.execution_timeout {
            self.execution_timeout = timeout;
        }
        if let Some(types) = update.available_types {
            self.available_types = types;
        }
    }
}

/// Partial execution policy accepted by `update_config`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionPolicyUpdate {
    /// New strategy chain
    pub default_chain: Option<Vec<ExecutionType>>,
    /// New human override flag
    pub allow_human_override: Option<bool>,
    /// New retry budget
    pub max_retries: Option<u32>,
    /// New per-attempt timeout
    pub execution_timeout: Option<Duration>,
    /// New permitted strategies
    pub available_types: Option<Vec<ExecutionType>>,
}

impl ExecutionPolicyUpdate {
    /// Sets the strategy chain
    #[must_use]
    pub fn default_chain(mut self, chain: Vec<ExecutionType>) -> Self {
        self.default_chain = Some(chain);
        self
    }

    /// Sets the human override flag
    #[must_use]
    pub fn allow_human_override(mut self, allow: bool) -> Self {
        self.allow_human_override = Some(allow);
        self
    }

    /// Sets the retry budget
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Sets the per-attempt timeout
    #[must_use]
    pub fn execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }

    /// Sets the permitted strategies
    #[must_use]
    pub fn available_types(mut self, types: Vec<ExecutionType>) -> Self {
        self.available_types = Some(types);
        self
    }
}

/// Capability marketplace options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketplaceConfig {
    /// Cache capability resolutions by name
    pub cache_resolutions: bool,
}

/// Root runtime configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Execution policy
    pub execution: ExecutionPolicy,
    /// Marketplace options
    pub marketplace: MarketplaceConfig,
}

impl RuntimeConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the execution policy
    #[must_use]
    pub fn with_execution(mut self, execution: ExecutionPolicy) -> Self {
        self.execution = execution;
        self
    }

    /// Enable or disable resolution caching
    #[must_use]
    pub fn with_cache_resolutions(mut self, enabled: bool) -> Self {
        self.marketplace.cache_resolutions = enabled;
        self
    }

    /// Load configuration from a TOML file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load_from_toml(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Load configuration from TOML string (may be wrapped in a [runtime] section)
    ///
    /// # Errors
    /// Returns error if TOML cannot be parsed
    pub fn from_toml_str(toml_content: &str) -> Result<Self> {
        let value: toml::Value = toml::from_str(toml_content)?;
        let section = match value.get("runtime") {
            Some(runtime) => runtime.clone(),
            None => value,
        };
        let config: Self = section.try_into()?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a TOML string under a [runtime] section
    pub fn to_toml_string(&self) -> Result<String> {
        #[derive(Serialize)]
        struct ConfigWrapper<'a> {
            runtime: &'a RuntimeConfig,
        }

        toml::to_string_pretty(&ConfigWrapper { runtime: self })
            .map_err(|e| RuntimeError::Config(format!("Failed to serialize config: {}", e)))
    }

    fn validate(&self) -> Result<()> {
        self.execution.validate()
    }
}
