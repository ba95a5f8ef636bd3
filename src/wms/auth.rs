use crate::config::WmsConfig;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum WmsAuthError {
    #[error("ORG required")]
    MissingOrg,
    #[error("WMS credentials not configured")]
    MissingCredentials,
    #[error("Authentication failed")]
    Rejected,
    #[error("WMS auth request failed: {0}")]
    Transport(String),
}

impl WmsAuthError {
    pub fn is_input(&self) -> bool {
        matches!(self, WmsAuthError::MissingOrg)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
}

/// Password-grant token fetch against the WMS auth host. The username is the
/// configured base with the lowercased org appended.
pub async fn fetch_token(
    client: &Client,
    config: &WmsConfig,
    org: &str,
) -> Result<String, WmsAuthError> {
    let org = org.trim();
    if org.is_empty() {
        return Err(WmsAuthError::MissingOrg);
    }
    let (Some(password), Some(secret)) = (&config.password, &config.secret) else {
        return Err(WmsAuthError::MissingCredentials);
    };

    let username = format!("{}{}", config.username_base, org.to_lowercase());
    info!(target = "itemgen.wms", org, "requesting wms token");

    let response = client
        .post(config.token_url())
        .form(&[
            ("grant_type", "password"),
            ("username", username.as_str()),
            ("password", password.as_str()),
        ])
        .basic_auth(&config.client_id, Some(secret))
        .send()
        .await
        .map_err(|err| WmsAuthError::Transport(err.to_string()))?;

    if !response.status().is_success() {
        warn!(
            target = "itemgen.wms",
            org,
            status = %response.status(),
            "wms auth rejected"
        );
        return Err(WmsAuthError::Rejected);
    }

    let payload: TokenResponse = response
        .json()
        .await
        .map_err(|err| WmsAuthError::Transport(err.to_string()))?;
    if payload.access_token.is_empty() {
        return Err(WmsAuthError::Rejected);
    }
    Ok(payload.access_token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> WmsConfig {
        WmsConfig {
            auth_host: "auth.example.com".into(),
            api_host: "api.example.com".into(),
            username_base: "admin@".into(),
            client_id: "client.1".into(),
            password: None,
            secret: None,
            timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn blank_org_is_rejected_before_any_call() {
        let err = fetch_token(&Client::new(), &config(), "  ").await.unwrap_err();
        assert!(matches!(err, WmsAuthError::MissingOrg));
        assert!(err.is_input());
    }

    #[tokio::test]
    async fn missing_credentials_short_circuit() {
        let err = fetch_token(&Client::new(), &config(), "acme").await.unwrap_err();
        assert!(matches!(err, WmsAuthError::MissingCredentials));
    }

    #[test]
    fn token_url_targets_the_auth_host() {
        assert_eq!(config().token_url(), "https://auth.example.com/oauth/token");
    }
}
