use super::{types::Config, ConfigError, TorrentClientBackend};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - The selected torrent client backend has its section
/// - Staging root is absolute
/// - Eviction thresholds are percentages and ratios are non-negative
/// - Cleanup recursion depth is at least 1
/// - Scheduler intervals are non-zero when the scheduler is enabled
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    match config.torrent_client.backend {
        TorrentClientBackend::QBittorrent => {
            if config.torrent_client.qbittorrent.is_none() {
                return Err(ConfigError::ValidationError(
                    "torrent_client.qbittorrent is required for the qbittorrent backend"
                        .to_string(),
                ));
            }
        }
    }

    if !config.staging.root.is_absolute() {
        return Err(ConfigError::ValidationError(format!(
            "staging.root must be an absolute path, got {}",
            config.staging.root.display()
        )));
    }

    let threshold = config.eviction.emergency_threshold_pct;
    if !(threshold > 0.0 && threshold <= 100.0) {
        return Err(ConfigError::ValidationError(format!(
            "eviction.emergency_threshold_pct must be within (0, 100], got {}",
            threshold
        )));
    }

    if config.eviction.min_ratio < 0.0 {
        return Err(ConfigError::ValidationError(
            "eviction.min_ratio cannot be negative".to_string(),
        ));
    }

    if config.cleanup.max_depth == 0 {
        return Err(ConfigError::ValidationError(
            "cleanup.max_depth must be at least 1".to_string(),
        ));
    }

    let scheduler = &config.scheduler;
    if scheduler.enabled
        && (scheduler.scan_interval_secs == 0
            || scheduler.staging_interval_secs == 0
            || scheduler.eviction_interval_secs == 0)
    {
        return Err(ConfigError::ValidationError(
            "scheduler intervals must be greater than 0".to_string(),
        ));
    }

    if config.bulk_move.poll_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "bulk_move.poll_interval_ms must be greater than 0".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;

    fn base_config() -> Config {
        load_config_from_str(
            r#"
[seedbox]
host = "seedbox.example"
username = "user"

[torrent_client.qbittorrent]
url = "http://seedbox.example:8080"
username = "admin"
password = "pw"

[staging]
root = "/data/staging"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(validate_config(&base_config()).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let mut config = base_config();
        config.server.port = 0;
        let result = validate_config(&config);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validate_missing_qbittorrent_section() {
        let mut config = base_config();
        config.torrent_client.qbittorrent = None;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_relative_staging_root() {
        let mut config = base_config();
        config.staging.root = "staging".into();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_threshold_out_of_range() {
        let mut config = base_config();
        config.eviction.emergency_threshold_pct = 120.0;
        assert!(validate_config(&config).is_err());

        config.eviction.emergency_threshold_pct = 0.0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_cleanup_depth() {
        let mut config = base_config();
        config.cleanup.max_depth = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_interval_only_matters_when_enabled() {
        let mut config = base_config();
        config.scheduler.scan_interval_secs = 0;
        assert!(validate_config(&config).is_err());

        config.scheduler.enabled = false;
        assert!(validate_config(&config).is_ok());
    }
}
