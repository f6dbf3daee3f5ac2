//! Configuration management
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (typedefs.toml)
//! - Environment variables (TYPEDEFS__*)
//!
//! ## Example config file (typedefs.toml):
//! ```toml
//! [admin]
//! host = "0.0.0.0"
//! port = 26578
//! threads = 2
//!
//! [ingest]
//! strict = false
//!
//! [[targets]]
//! name = "access_log"
//! fields = { path = "string", status = "long" }
//!
//! [[targets]]
//! name = "metrics"
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::Result;
use crate::field::FieldType;
use crate::manager::TypedefManager;

pub const DEFAULT_LISTEN_HOST: &str = "0.0.0.0";
pub const DEFAULT_LISTEN_PORT: u16 = 26578;
pub const DEFAULT_THREADS: usize = 2;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypedefsConfig {
    /// Admin server settings
    #[serde(default)]
    pub admin: AdminConfig,

    /// Ingestion settings
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Targets declared up front
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

/// Admin (introspection) server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Worker threads of the embedded server
    #[serde(default = "default_threads")]
    pub threads: usize,
}

/// Ingestion configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Only keep fields that are known or awaited by a query
    #[serde(default)]
    pub strict: bool,
}

/// A target and its base schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub name: String,

    /// Field name to type. Empty means the target starts lazy.
    #[serde(default)]
    pub fields: BTreeMap<String, FieldType>,
}

fn default_host() -> String {
    DEFAULT_LISTEN_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_LISTEN_PORT
}

fn default_threads() -> usize {
    DEFAULT_THREADS
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            threads: default_threads(),
        }
    }
}

impl AdminConfig {
    /// `host:port` to bind
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl TypedefsConfig {
    /// Load configuration from default locations
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration, optionally from a specific file
    pub fn load_from(config_path: Option<&str>) -> std::result::Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = ["typedefs.toml", ".typedefs.toml", "config/typedefs.toml"];
        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("io", "event-typedefs", "typedefs") {
            let xdg_config = config_dir.config_dir().join("typedefs.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // TYPEDEFS__ADMIN__PORT=9000 etc.
        builder = builder.add_source(
            Environment::with_prefix("TYPEDEFS")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Build a manager holding every configured target
    pub fn build_manager(&self) -> Result<TypedefManager> {
        let manager = TypedefManager::new();
        for target in &self.targets {
            manager.add_target(&target.name, target.fields.clone())?;
        }
        Ok(manager)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = TypedefsConfig::default();
        assert_eq!(config.admin.port, 26578);
        assert_eq!(config.admin.threads, 2);
        assert_eq!(config.admin.bind_addr(), "0.0.0.0:26578");
        assert!(!config.ingest.strict);
        assert!(config.targets.is_empty());
    }

    #[test]
    fn test_serialize_config() {
        let config = TypedefsConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[admin]"));
        assert!(toml_str.contains("port = 26578"));
    }

    #[test]
    fn test_load_targets_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[admin]
port = 9000

[[targets]]
name = "access_log"
fields = {{ path = "string", status = "long" }}

[[targets]]
name = "metrics"
"#
        )
        .unwrap();

        let config = TypedefsConfig::load_from(file.path().to_str()).unwrap();
        assert_eq!(config.admin.port, 9000);
        assert_eq!(config.admin.host, "0.0.0.0");
        assert_eq!(config.targets.len(), 2);
        assert_eq!(config.targets[0].fields["status"], FieldType::Long);

        let manager = config.build_manager().unwrap();
        assert!(!manager.get("access_log").unwrap().is_lazy());
        assert!(manager.get("metrics").unwrap().is_lazy());
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("typedefs.toml");
        let mut config = TypedefsConfig::default();
        config.targets.push(TargetConfig {
            name: "t".to_string(),
            fields: BTreeMap::from([("a".to_string(), FieldType::Double)]),
        });
        config.save(&path).unwrap();

        let loaded = TypedefsConfig::load_from(path.to_str()).unwrap();
        assert_eq!(loaded.targets[0].fields["a"], FieldType::Double);
    }
}
