use crate::auth::DEFAULT_REALM;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub listen: String,
    #[serde(default = "default_users_file")]
    pub users_file: String,
    #[serde(default = "default_realm")]
    pub realm: String,
    #[serde(default = "default_mountpoints")]
    pub mountpoints: Vec<String>,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub capacity: CapacityConfig,
}

/// Usage percentages at which a resource turns warn or crit.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Thresholds {
    pub cpu_warn: u8,
    pub cpu_crit: u8,
    pub ram_warn: u8,
    pub ram_crit: u8,
    pub disk_warn: u8,
    pub disk_crit: u8,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu_warn: 70,
            cpu_crit: 90,
            ram_warn: 70,
            ram_crit: 90,
            disk_warn: 75,
            disk_crit: 90,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CapacityProfile {
    pub name: String,
    pub vcpus: u32,
    pub ram_mb: u64,
    pub disk_gb: u64,
}

/// Host resources held back from guests, and the VM sizes to count.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CapacityConfig {
    pub reserve_cores: u32,
    pub reserve_ram_mb: u64,
    pub reserve_disk_gb: u64,
    pub profiles: Vec<CapacityProfile>,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            reserve_cores: 1,
            reserve_ram_mb: 1024,
            reserve_disk_gb: 10,
            profiles: vec![
                CapacityProfile {
                    name: "standard".to_string(),
                    vcpus: 2,
                    ram_mb: 4096,
                    disk_gb: 32,
                },
                CapacityProfile {
                    name: "light".to_string(),
                    vcpus: 1,
                    ram_mb: 1024,
                    disk_gb: 16,
                },
            ],
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid config: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation("listen is required".to_string()));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "listen must be a host:port socket address".to_string(),
            ));
        }
        if self.users_file.trim().is_empty() {
            return Err(ConfigError::Validation(
                "users_file must not be empty".to_string(),
            ));
        }
        if self.realm.trim().is_empty() || !self.realm.chars().all(is_realm_char) {
            return Err(ConfigError::Validation(
                "realm must be non-empty printable ASCII without '\"' or '\\'".to_string(),
            ));
        }
        if self.mountpoints.is_empty() {
            return Err(ConfigError::Validation(
                "mountpoints must list at least one path".to_string(),
            ));
        }
        if let Some(i) = self.mountpoints.iter().position(|m| m.trim().is_empty()) {
            return Err(ConfigError::Validation(format!(
                "mountpoints[{i}] must not be empty"
            )));
        }

        self.validate_thresholds()?;
        self.validate_capacity()?;

        Ok(())
    }

    fn validate_thresholds(&self) -> Result<(), ConfigError> {
        let t = &self.thresholds;
        for (resource, warn, crit) in [
            ("cpu", t.cpu_warn, t.cpu_crit),
            ("ram", t.ram_warn, t.ram_crit),
            ("disk", t.disk_warn, t.disk_crit),
        ] {
            if crit > 100 {
                return Err(ConfigError::Validation(format!(
                    "thresholds.{resource}_crit must be at most 100"
                )));
            }
            if warn > crit {
                return Err(ConfigError::Validation(format!(
                    "thresholds.{resource}_warn must not exceed {resource}_crit"
                )));
            }
        }
        Ok(())
    }

    fn validate_capacity(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for (i, p) in self.capacity.profiles.iter().enumerate() {
            if p.name.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "capacity.profiles[{i}].name must not be empty"
                )));
            }
            if !seen.insert(p.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "capacity profile {} is listed twice",
                    p.name
                )));
            }
            if p.vcpus == 0 || p.ram_mb == 0 || p.disk_gb == 0 {
                return Err(ConfigError::Validation(format!(
                    "capacity profile {} needs non-zero vcpus, ram_mb and disk_gb",
                    p.name
                )));
            }
        }
        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

// Visible ASCII and space, minus the characters that would need escaping
// inside the quoted-string of a WWW-Authenticate header.
fn is_realm_char(c: char) -> bool {
    matches!(c, ' '..='~') && c != '"' && c != '\\'
}

fn default_users_file() -> String {
    "/etc/proxreport/users.txt".to_string()
}

fn default_realm() -> String {
    DEFAULT_REALM.to_string()
}

fn default_mountpoints() -> Vec<String> {
    vec!["/".to_string()]
}
