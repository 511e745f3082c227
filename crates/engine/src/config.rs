//! Adapter configuration via `mantle.toml`
//!
//! All fields are optional; a missing or empty file yields the defaults.

use crate::allocator::IdPolicy;
use crate::error::{Error, Result};
use mantle_storage::WriteConcern;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Conventional config file name
pub const CONFIG_FILE_NAME: &str = "mantle.toml";

/// Adapter configuration loaded from `mantle.toml`.
///
/// # Example
///
/// ```toml
/// app_id = "guestbook"
/// durability = "fire_and_forget"
/// id_policy = "scattered"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdapterConfig {
    /// Application identifier; the document-store database name
    #[serde(default = "default_app_id")]
    pub app_id: String,
    /// Durability mode: `"acknowledged"` or `"fire_and_forget"`
    #[serde(default = "default_durability_str")]
    pub durability: String,
    /// Id allocation policy for `Put`: `"sequential"` or `"scattered"`
    #[serde(default = "default_id_policy_str")]
    pub id_policy: String,
    /// Re-reads on retryable driver errors
    #[serde(default = "default_read_retries")]
    pub read_retries: u32,
    /// Result cap when a query has no limit
    #[serde(default = "default_max_query_results")]
    pub max_query_results: usize,
    /// Offsets above this are clamped
    #[serde(default = "default_max_query_offset")]
    pub max_query_offset: usize,
}

fn default_app_id() -> String {
    "dev".to_string()
}

fn default_durability_str() -> String {
    "acknowledged".to_string()
}

fn default_id_policy_str() -> String {
    "sequential".to_string()
}

fn default_read_retries() -> u32 {
    1
}

fn default_max_query_results() -> usize {
    1000
}

fn default_max_query_offset() -> usize {
    4000
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            app_id: default_app_id(),
            durability: default_durability_str(),
            id_policy: default_id_policy_str(),
            read_retries: default_read_retries(),
            max_query_results: default_max_query_results(),
            max_query_offset: default_max_query_offset(),
        }
    }
}

impl AdapterConfig {
    /// Default config for an application id
    pub fn for_app(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            ..Self::default()
        }
    }

    /// Parse the durability string into a `WriteConcern`.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not `"acknowledged"` or
    /// `"fire_and_forget"`.
    pub fn durability_mode(&self) -> Result<WriteConcern> {
        match self.durability.as_str() {
            "acknowledged" => Ok(WriteConcern::Acknowledged),
            "fire_and_forget" => Ok(WriteConcern::Unacknowledged),
            other => Err(Error::Config(format!(
                "Invalid durability mode '{}'. Expected \"acknowledged\" or \"fire_and_forget\".",
                other
            ))),
        }
    }

    /// Parse the id policy string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not `"sequential"` or `"scattered"`.
    pub fn id_policy(&self) -> Result<IdPolicy> {
        match self.id_policy.as_str() {
            "sequential" => Ok(IdPolicy::Sequential),
            "scattered" => Ok(IdPolicy::Scattered),
            other => Err(Error::Config(format!(
                "Invalid id policy '{}'. Expected \"sequential\" or \"scattered\".",
                other
            ))),
        }
    }

    /// Check every enumerated field and the app id
    pub fn validate(&self) -> Result<()> {
        if self.app_id.is_empty() {
            return Err(Error::Config("app_id cannot be empty".into()));
        }
        self.durability_mode()?;
        self.id_policy()?;
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Mantle adapter configuration
#
# Application id; also the name of the document-store database
app_id = "dev"

# Durability mode: "acknowledged" (default) or "fire_and_forget"
#   "acknowledged"    = writes wait for the store and report failures
#   "fire_and_forget" = writes return immediately, failures are only logged
durability = "acknowledged"

# Id allocation for incomplete keys: "sequential" (default) or "scattered"
id_policy = "sequential"

# Re-reads when the store reports a transient error (writes are never retried)
read_retries = 1

# Result cap for queries without a limit
max_query_results = 1000

# Offsets above this value are clamped
max_query_offset = 4000
"#
    }

    /// Parse and validate config from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AdapterConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }
}
