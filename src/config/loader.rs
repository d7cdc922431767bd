//! Configuration loading from disk.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::schema::FirewallConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Locations searched when no path is given on the command line.
pub const DEFAULT_CONFIG_PATHS: &[&str] = &["./config.toml", "/etc/db_firewall/config.toml"];

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    NotFound(Vec<PathBuf>),
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NotFound(searched) => {
                write!(f, "No config file found (searched: ")?;
                for (i, path) in searched.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{}", path.display())?;
                }
                write!(f, ")")
            }
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Pick the config file: the explicit path if given, else the first default that exists.
pub fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    find_config(DEFAULT_CONFIG_PATHS.iter().map(PathBuf::from))
}

fn find_config(candidates: impl IntoIterator<Item = PathBuf>) -> Result<PathBuf, ConfigError> {
    let mut searched = Vec::new();
    for candidate in candidates {
        if candidate.is_file() {
            return Ok(candidate);
        }
        searched.push(candidate);
    }
    Err(ConfigError::NotFound(searched))
}

/// Parse and validate configuration from a TOML string.
pub fn parse_config(content: &str) -> Result<FirewallConfig, ConfigError> {
    let config: FirewallConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<FirewallConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
        local_address = "127.0.0.1:16432"
        remote_address = "127.0.0.1:15432"
    "#;

    #[test]
    fn loads_minimal_file_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.connection_limit, 1024);
        assert_eq!(config.per_ip_connection_limit, 64);
        assert_eq!(config.idle_timeout_secs, 0);
        assert_eq!(config.rate_limiter.token_bucket_limiter.rate, 0);
    }

    #[test]
    fn parse_errors_are_reported() {
        let err = parse_config("local_address = [").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn validation_errors_are_reported() {
        let err = parse_config("connection_limit = 0").unwrap_err();
        match err {
            ConfigError::Validation(errors) => {
                assert!(errors.contains(&ValidationError::Missing("local_address")));
                assert!(errors.contains(&ValidationError::NonPositive("connection_limit")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn negative_limit_is_a_parse_error() {
        let err = parse_config(&format!("{MINIMAL}\nconnection_limit = -1")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn explicit_path_wins() {
        let path = resolve_config_path(Some(Path::new("custom.toml"))).unwrap();
        assert_eq!(path, PathBuf::from("custom.toml"));
    }

    #[test]
    fn first_existing_candidate_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        let present = dir.path().join("config.toml");
        fs::write(&present, MINIMAL).unwrap();

        let found = find_config(vec![missing.clone(), present.clone()]).unwrap();
        assert_eq!(found, present);

        let err = find_config(vec![missing.clone()]).unwrap_err();
        match err {
            ConfigError::NotFound(searched) => assert_eq!(searched, vec![missing]),
            other => panic!("unexpected error: {other}"),
        }
    }
}
