//! Store configuration
//!
//! The first opener of a path establishes the authoritative configuration;
//! every later opener must agree with it field by field.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::engine::Schema;

/// Schema version meaning "no version requested"; never conflicts
pub const NOT_VERSIONED: u64 = u64::MAX;

/// How a store handle is opened
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store file path; also the coordinator key
    pub path: PathBuf,

    /// Open without write access (default: false)
    #[serde(default)]
    pub read_only: bool,

    /// Keep the store in memory only (default: false)
    #[serde(default)]
    pub in_memory: bool,

    /// Key the store is opened with. Only compared between openers.
    #[serde(default)]
    pub encryption_key: Option<Vec<u8>>,

    /// Requested schema version (default: `NOT_VERSIONED`)
    #[serde(default = "default_schema_version")]
    pub schema_version: u64,

    /// Tables this opener expects
    #[serde(default)]
    pub schema: Option<Schema>,

    /// Reuse a live handle already opened by the same thread (default: true)
    #[serde(default = "default_cache")]
    pub cache: bool,
}

fn default_schema_version() -> u64 {
    NOT_VERSIONED
}

fn default_cache() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            read_only: false,
            in_memory: false,
            encryption_key: None,
            schema_version: default_schema_version(),
            schema: None,
            cache: default_cache(),
        }
    }
}

/// Configuration field two openers disagreed on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigField {
    ReadOnly,
    InMemory,
    EncryptionKey,
    SchemaVersion,
}

impl ConfigField {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigField::ReadOnly => "read_only",
            ConfigField::InMemory => "in_memory",
            ConfigField::EncryptionKey => "encryption_key",
            ConfigField::SchemaVersion => "schema_version",
        }
    }
}

impl fmt::Display for ConfigField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            ConfigField::ReadOnly => "different read permissions",
            ConfigField::InMemory => "different in-memory settings",
            ConfigField::EncryptionKey => "a different encryption key",
            ConfigField::SchemaVersion => "a different schema version",
        };
        f.write_str(message)
    }
}

impl StoreConfig {
    /// Default configuration for `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Parse a configuration from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn in_memory(mut self, in_memory: bool) -> Self {
        self.in_memory = in_memory;
        self
    }

    pub fn encryption_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.encryption_key = Some(key.into());
        self
    }

    pub fn schema_version(mut self, version: u64) -> Self {
        self.schema_version = version;
        self
    }

    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    /// Check a later opener against this, the authoritative configuration.
    ///
    /// Schemas are not compared here; the coordinator merges them.
    pub fn check_compatible(&self, opener: &StoreConfig) -> Result<(), ConfigField> {
        if self.read_only != opener.read_only {
            return Err(ConfigField::ReadOnly);
        }
        if self.in_memory != opener.in_memory {
            return Err(ConfigField::InMemory);
        }
        if self.encryption_key != opener.encryption_key {
            return Err(ConfigField::EncryptionKey);
        }
        if opener.schema_version != NOT_VERSIONED && opener.schema_version != self.schema_version {
            return Err(ConfigField::SchemaVersion);
        }
        Ok(())
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("path", &self.path)
            .field("read_only", &self.read_only)
            .field("in_memory", &self.in_memory)
            .field(
                "encryption_key",
                &self.encryption_key.as_ref().map(|_| "<redacted>"),
            )
            .field("schema_version", &self.schema_version)
            .field("schema", &self.schema)
            .field("cache", &self.cache)
            .finish()
    }
}
