//! Database connection parameters, read from a file keyed by environment name.
//!
//! The file follows the layout of a Rails `database.yml`:
//!
//! ```yaml
//! production:
//!   adapter: mysql2
//!   database: app_production
//!   username: backup
//!   password: secret
//!   host: localhost
//! ```
//!
//! TOML and JSON files with the same shape are accepted as well; the format
//! is picked from the file extension.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use derive_more::{Display, Error, From};

/// Connection parameters of one environment.
///
/// Keys unknown to the backup (`adapter`, `encoding`, `pool`, ...) are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
pub struct ConnectionParams {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub socket: Option<PathBuf>,
    #[serde(alias = "user")]
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
}

/// All environments found in a configuration file.
#[derive(Debug, serde::Deserialize)]
#[serde(transparent)]
pub struct DatabaseConfig {
    environments: HashMap<String, ConnectionParams>,
}

/// Serialization format of a [DatabaseConfig] file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ConfigFormat {
    #[display("yaml")]
    Yaml,
    #[display("toml")]
    Toml,
    #[display("json")]
    Json,
}

impl ConfigFormat {
    /// Picks the format from the extension of `path`.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "yml" | "yaml" => Some(Self::Yaml),
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Display, Error, From)]
/// Errors on loading the [DatabaseConfig].
pub enum ConfigError {
    /// Reading the file failed.
    #[display("Reading {} failed: {_1}", _0.display())]
    Read(PathBuf, #[error(source)] io::Error),
    /// The extension doesn't name a supported format.
    #[display("Unsupported config format: {}", _0.display())]
    UnknownFormat(#[error(ignore)] PathBuf),
    #[from]
    #[display("Invalid yaml: {_0}")]
    Yaml(serde_yaml::Error),
    #[from]
    #[display("Invalid toml: {_0}")]
    Toml(toml::de::Error),
    #[from]
    #[display("Invalid json: {_0}")]
    Json(serde_json::Error),
    /// No entry for the selected environment.
    #[display("No database configured for environment '{_0}'")]
    UnknownEnvironment(#[error(ignore)] String),
}

impl DatabaseConfig {
    /// Reads and parses the configuration file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let format =
            ConfigFormat::from_path(path).ok_or_else(|| ConfigError::UnknownFormat(path.into()))?;
        let content =
            fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        log::debug!(target: "config", "Parsing {} as {format}", path.display());

        Self::parse(&content, format)
    }

    /// Parses `content` in the given `format`.
    pub fn parse(content: &str, format: ConfigFormat) -> Result<Self, ConfigError> {
        let config = match format {
            ConfigFormat::Yaml => serde_yaml::from_str(content)?,
            ConfigFormat::Toml => toml::from_str(content)?,
            ConfigFormat::Json => serde_json::from_str(content)?,
        };

        Ok(config)
    }

    /// Connection parameters of `environment`.
    pub fn environment(&self, environment: &str) -> Result<&ConnectionParams, ConfigError> {
        self.environments
            .get(environment)
            .ok_or_else(|| ConfigError::UnknownEnvironment(environment.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DATABASE_YML: &str = r#"
development:
  adapter: mysql2
  database: app_dev
  username: root
  host: localhost

production:
  adapter: mysql2
  encoding: utf8
  database: app_production
  user: backup
  password: "s3cr3t"
  host: db.internal
  port: 3307
"#;

    #[test]
    fn parses_rails_database_yml() {
        let config = DatabaseConfig::parse(DATABASE_YML, ConfigFormat::Yaml).unwrap();
        let production = config.environment("production").unwrap();

        assert_eq!(production.database.as_deref(), Some("app_production"));
        assert_eq!(production.username.as_deref(), Some("backup"));
        assert_eq!(production.password.as_deref(), Some("s3cr3t"));
        assert_eq!(production.host.as_deref(), Some("db.internal"));
        assert_eq!(production.port, Some(3307));
        assert_eq!(production.socket, None);
    }

    #[test]
    fn parses_toml_and_json() {
        let toml = r#"
[production]
database = "app"
socket = "/run/mysqld/mysqld.sock"
"#;
        let config = DatabaseConfig::parse(toml, ConfigFormat::Toml).unwrap();
        let production = config.environment("production").unwrap();
        assert_eq!(
            production.socket.as_deref(),
            Some(Path::new("/run/mysqld/mysqld.sock"))
        );

        let json = r#"{ "staging": { "database": "app", "username": "ops" } }"#;
        let config = DatabaseConfig::parse(json, ConfigFormat::Json).unwrap();
        assert_eq!(
            config.environment("staging").unwrap().username.as_deref(),
            Some("ops")
        );
    }

    #[test]
    fn unknown_environment_is_an_error() {
        let config = DatabaseConfig::parse(DATABASE_YML, ConfigFormat::Yaml).unwrap();
        let err = config.environment("test").unwrap_err();

        assert!(matches!(err, ConfigError::UnknownEnvironment(ref env) if env == "test"));
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(
            ConfigFormat::from_path(Path::new("config/database.yml")),
            Some(ConfigFormat::Yaml)
        );
        assert_eq!(
            ConfigFormat::from_path(Path::new("db.toml")),
            Some(ConfigFormat::Toml)
        );
        assert_eq!(ConfigFormat::from_path(Path::new("db.ini")), None);
        assert_eq!(ConfigFormat::from_path(Path::new("database")), None);
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("database.yaml");
        fs::write(&path, DATABASE_YML).unwrap();

        let config = DatabaseConfig::load(&path).unwrap();
        assert!(config.environment("development").is_ok());

        let missing = dir.path().join("missing.yml");
        assert!(matches!(
            DatabaseConfig::load(&missing),
            Err(ConfigError::Read(..))
        ));
    }

    #[test]
    fn read_error_keeps_the_io_error_as_source() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.yml");
        let err = DatabaseConfig::load(&missing).unwrap_err();

        let source = std::error::Error::source(&err).unwrap();
        let io = source.downcast_ref::<io::Error>().unwrap();
        assert_eq!(io.kind(), io::ErrorKind::NotFound);
        assert!(err.to_string().contains("missing.yml"));
    }
}
