//! Plex section refresh.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{LibraryError, MediaServer};

/// Plex server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlexConfig {
    /// Base URL, e.g. `http://localhost:32400`.
    pub url: String,
    /// `X-Plex-Token`.
    pub token: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
}

fn default_timeout() -> u32 {
    30
}

pub struct PlexClient {
    client: Client,
    base_url: String,
    token: String,
}

impl PlexClient {
    pub fn new(config: PlexConfig) -> Result<Self, LibraryError> {
        if config.token.is_empty() {
            return Err(LibraryError::NotConfigured(
                "Plex token is required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token,
        })
    }
}

#[async_trait]
impl MediaServer for PlexClient {
    fn name(&self) -> &str {
        "plex"
    }

    async fn refresh_section(&self, section_key: &str) -> Result<(), LibraryError> {
        let url = format!(
            "{}/library/sections/{}/refresh",
            self.base_url,
            urlencoding::encode(section_key)
        );
        debug!("Plex refresh: section={}", section_key);

        let response = self
            .client
            .get(&url)
            .header("X-Plex-Token", &self.token)
            .send()
            .await?;

        let status = response.status();
        if status == 401 {
            return Err(LibraryError::NotConfigured(
                "Invalid Plex token".to_string(),
            ));
        }
        if status == 404 {
            return Err(LibraryError::NotFound(format!("Plex section {}", section_key)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LibraryError::ApiError {
                status: status.as_u16(),
                message: body,
            });
        }

        info!("Requested Plex refresh of section {}", section_key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_requires_token() {
        let result = PlexClient::new(PlexConfig {
            url: "http://localhost:32400".to_string(),
            token: String::new(),
            timeout_secs: 30,
        });
        assert!(matches!(result, Err(LibraryError::NotConfigured(_))));
    }

    #[test]
    fn test_new_trims_trailing_slash() {
        let client = PlexClient::new(PlexConfig {
            url: "http://plex:32400/".to_string(),
            token: "tok".to_string(),
            timeout_secs: 5,
        })
        .unwrap();
        assert_eq!(client.base_url, "http://plex:32400");
        assert_eq!(client.name(), "plex");
    }
}
