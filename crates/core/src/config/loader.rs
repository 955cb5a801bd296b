use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Load configuration from file with environment variable overrides
///
/// Nested keys are separated by a double underscore, so
/// `SEEDSYNC_EVICTION__DRY_RUN=true` overrides `eviction.dry_run`.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    let config: Config = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed("SEEDSYNC_").split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    Ok(config)
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const VALID: &str = r#"
[seedbox]
host = "seedbox.example"
username = "user"

[torrent_client.qbittorrent]
url = "http://seedbox.example:8080"
username = "admin"
password = "pw"

[staging]
root = "/data/staging"

[server]
port = 9000
"#;

    #[test]
    fn test_load_config_from_str_valid() {
        let config = load_config_from_str(VALID).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.seedbox.host, "seedbox.example");
    }

    #[test]
    fn test_load_config_from_str_missing_staging() {
        let toml = r#"
[seedbox]
host = "seedbox.example"
username = "user"
"#;
        let result = load_config_from_str(toml);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/seedsync.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", VALID).unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(
            config.torrent_client.qbittorrent.unwrap().url,
            "http://seedbox.example:8080"
        );
    }
}
