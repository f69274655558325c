//! Cache configuration.
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//!
//! ```toml
//! [evictor]
//! max_size = "100MB"
//! partitions = 8
//!
//! [range]
//! capacity_items = 25600
//! unit_size = 4096
//!
//! [scalar]
//! buckets = 1024
//! value_size = 512
//! ```

use crate::error::{CacheError, CacheResult};
use serde::Deserialize;
use std::path::Path;

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level cache configuration.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Evictor budget and partitioning.
    #[serde(default)]
    pub evictor: EvictorConfig,

    /// Range cache sizing.
    #[serde(default)]
    pub range: RangeConfig,

    /// Scalar cache sizing.
    #[serde(default)]
    pub scalar: ScalarConfig,
}

/// Evictor configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EvictorConfig {
    /// Total byte budget (e.g., "100MB", "4GB").
    #[serde(default = "default_max_size", deserialize_with = "deserialize_size")]
    pub max_size: u64,

    /// Number of independently locked partitions.
    #[serde(default = "default_partitions")]
    pub partitions: usize,
}

/// Range cache configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RangeConfig {
    /// Expected number of resident units; sizes the bucket array.
    #[serde(default = "default_capacity_items")]
    pub capacity_items: usize,

    /// Bytes per addressable unit (e.g., a 4KB block).
    #[serde(default = "default_unit_size", deserialize_with = "deserialize_size")]
    pub unit_size: u64,
}

/// Scalar cache configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ScalarConfig {
    /// Number of buckets.
    #[serde(default = "default_buckets")]
    pub buckets: usize,

    /// Bytes each entry is accounted for.
    #[serde(default = "default_value_size", deserialize_with = "deserialize_size")]
    pub value_size: u64,
}

impl Default for EvictorConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            partitions: default_partitions(),
        }
    }
}

impl Default for RangeConfig {
    fn default() -> Self {
        Self {
            capacity_items: default_capacity_items(),
            unit_size: default_unit_size(),
        }
    }
}

impl Default for ScalarConfig {
    fn default() -> Self {
        Self {
            buckets: default_buckets(),
            value_size: default_value_size(),
        }
    }
}

impl CacheConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file and validate it.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    /// Parse configuration from a TOML string and validate it.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: CacheConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.evictor.max_size == 0 {
            return Err(ConfigError::Invalid("evictor.max_size must be non-zero".into()));
        }
        if self.evictor.partitions == 0 {
            return Err(ConfigError::Invalid(
                "evictor.partitions must be non-zero".into(),
            ));
        }
        if self.evictor.max_size < self.evictor.partitions as u64 {
            return Err(ConfigError::Invalid(format!(
                "evictor.max_size ({}) must be at least evictor.partitions ({})",
                self.evictor.max_size, self.evictor.partitions
            )));
        }
        if self.range.unit_size == 0 || self.range.unit_size > u32::MAX as u64 {
            return Err(ConfigError::Invalid(format!(
                "range.unit_size ({}) must be between 1 and {}",
                self.range.unit_size,
                u32::MAX
            )));
        }
        if self.scalar.buckets == 0 {
            return Err(ConfigError::Invalid("scalar.buckets must be non-zero".into()));
        }
        if self.scalar.value_size > u32::MAX as u64 {
            return Err(ConfigError::Invalid(format!(
                "scalar.value_size ({}) must be at most {}",
                self.scalar.value_size,
                u32::MAX
            )));
        }
        Ok(())
    }

    /// Set the evictor's total byte budget.
    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.evictor.max_size = bytes;
        self
    }

    /// Set the number of evictor partitions.
    pub fn with_partitions(mut self, partitions: usize) -> Self {
        self.evictor.partitions = partitions;
        self
    }

    /// Set the range cache's unit size in bytes.
    pub fn with_unit_size(mut self, unit_size: u64) -> Self {
        self.range.unit_size = unit_size;
        self
    }

    /// Set the range cache's expected resident units.
    pub fn with_capacity_items(mut self, capacity_items: usize) -> Self {
        self.range.capacity_items = capacity_items;
        self
    }

    /// Set the scalar cache's bucket count.
    pub fn with_buckets(mut self, buckets: usize) -> Self {
        self.scalar.buckets = buckets;
        self
    }

    /// Set the bytes each scalar entry is accounted for.
    pub fn with_value_size(mut self, value_size: u64) -> Self {
        self.scalar.value_size = value_size;
        self
    }
}

impl RangeConfig {
    /// Unit size as the width the caches use. Validated to fit.
    pub fn unit_size_u32(&self) -> CacheResult<u32> {
        u32::try_from(self.unit_size).map_err(|_| CacheError::InvalidArgument)
    }
}

impl ScalarConfig {
    /// Value size as the width the caches use. Validated to fit.
    pub fn value_size_u32(&self) -> CacheResult<u32> {
        u32::try_from(self.value_size).map_err(|_| CacheError::InvalidArgument)
    }
}

/// Parse a size string like "64MB", "4GB", "1TB" into bytes.
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size string".to_string());
    }

    let (num_str, suffix) = match s.find(|c: char| c.is_alphabetic()) {
        Some(idx) => (&s[..idx], s[idx..].to_uppercase()),
        None => (s, String::new()),
    };

    let num: u64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("invalid number: {}", num_str))?;

    let multiplier: u64 = match suffix.as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => 1024 * 1024,
        "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
        "T" | "TB" | "TIB" => 1024 * 1024 * 1024 * 1024,
        _ => return Err(format!("unknown size suffix: {}", suffix)),
    };

    num.checked_mul(multiplier)
        .ok_or_else(|| "size overflow".to_string())
}

/// Deserialize a size given as a number of bytes or a string like "64MB".
fn deserialize_size<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SizeValue {
        Number(u64),
        String(String),
    }

    match SizeValue::deserialize(deserializer)? {
        SizeValue::Number(n) => Ok(n),
        SizeValue::String(s) => parse_size(&s).map_err(D::Error::custom),
    }
}

// Default value functions

fn default_max_size() -> u64 {
    100 * 1024 * 1024 // 100MB
}

fn default_partitions() -> usize {
    8
}

fn default_capacity_items() -> usize {
    25600 // 100MB of 4KB units
}

fn default_unit_size() -> u64 {
    4096
}

fn default_buckets() -> usize {
    1024
}

fn default_value_size() -> u64 {
    512
}
