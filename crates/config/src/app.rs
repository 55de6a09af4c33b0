//! Application configuration: defaults, an optional JSON config file, and
//! `STOWAGE_*` environment variables, merged in that order.

use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use stowage_catalog::DoltSettings;

use crate::error::{ErrorKind, Result};
use crate::registry::Registry;

/// Catalog engine settings as they appear in the config file.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DoltConfig {
    pub database: String,
    pub host: String,
    pub port: u16,
    pub socket: Option<PathBuf>,
    pub user: String,
    pub password: Option<String>,
    /// Spawn `dolt sql-server` instead of connecting to a running one.
    pub spawn: bool,
    pub dolt_dir: PathBuf,
    pub commit_message: String,
}

impl Default for DoltConfig {
    fn default() -> Self {
        Self {
            database: "stowage".to_string(),
            host: "localhost".to_string(),
            port: 3306,
            socket: None,
            user: "root".to_string(),
            password: None,
            spawn: false,
            dolt_dir: PathBuf::from(".dolt"),
            commit_message: "update catalog".to_string(),
        }
    }
}

/// SSH client settings for talking to remote filestores.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Private key used to authenticate to SFTP peers.
    pub client_key: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Root for descriptors and default filestore locations.
    pub data_dir: PathBuf,
    /// Name of the repository descriptor this process writes to.
    pub local_repo: String,
    /// Rows buffered per catalog batch; also the sync page size.
    pub batch_size: usize,
    pub dolt: DoltConfig,
    pub ssh: SshConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        let data_dir = directories::ProjectDirs::from("", "", "stowage")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".stowage"));
        Self {
            data_dir,
            local_repo: "local".to_string(),
            batch_size: 1000,
            dolt: DoltConfig::default(),
            ssh: SshConfig::default(),
        }
    }
}

impl AppConfig {
    /// Merge defaults, the given config file (when present) and the
    /// environment. Environment keys use `STOWAGE_` and `__` for nesting:
    /// `STOWAGE_DOLT__PORT=3307`.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = config_file {
            figment = figment.merge(Json::file(path));
        }
        figment = figment.merge(Env::prefixed("STOWAGE_").split("__"));
        figment.extract().or_raise(|| ErrorKind::Config)
    }

    /// Descriptor registry rooted in the data directory.
    pub fn registry(&self) -> Registry {
        Registry::new(self.data_dir.join("descriptors"))
    }

    pub fn dolt_settings(&self) -> DoltSettings {
        DoltSettings {
            database: self.dolt.database.clone(),
            host: self.dolt.host.clone(),
            port: self.dolt.port,
            socket: self.dolt.socket.clone(),
            user: self.dolt.user.clone(),
            password: self.dolt.password.clone(),
            spawn: self.dolt.spawn,
            dolt_dir: self.dolt.dolt_dir.clone(),
            commit_message: self.dolt.commit_message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let config = AppConfig::load(None).unwrap();
        assert_eq!(config.local_repo, "local");
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.dolt.port, 3306);
    }

    #[test]
    fn test_config_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "local_repo": "laptop", "dolt": { "port": 13306, "spawn": true } }"#,
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.local_repo, "laptop");
        assert_eq!(config.dolt.port, 13306);
        assert!(config.dolt.spawn);
        // Untouched keys keep their defaults.
        assert_eq!(config.dolt.user, "root");
    }

    #[test]
    fn test_dolt_settings_conversion() {
        let config = AppConfig::default();
        let settings = config.dolt_settings();
        assert_eq!(settings.database, config.dolt.database);
        assert_eq!(settings.commit_message, "update catalog");
    }
}
