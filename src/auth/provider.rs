use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error};

use crate::{config::GoogleConfig, error::AuthError};

/// Normalized identity-provider profile delivered by the callback flow.
#[derive(Debug, Clone)]
pub struct Profile {
    pub provider_id: String,
    pub email: Option<String>,
    pub name: String,
    pub avatar_url: Option<String>,
    pub email_verified: bool,
}

/// A federation provider implements the authorization-code exchange once,
/// as a typed interface injected into the app state.
#[async_trait]
pub trait FederationProvider: Send + Sync {
    /// Authorization URL the client is redirected to; `state` is passed
    /// through opaquely.
    fn authorize_url(&self, state: Option<&str>) -> String;

    /// Exchange a callback code for the provider profile.
    async fn exchange_code(&self, code: &str) -> Result<Profile, AuthError>;
}

const GOOGLE_SCOPES: &str = "https://www.googleapis.com/auth/userinfo.profile \
                             https://www.googleapis.com/auth/userinfo.email";

#[derive(Clone)]
pub struct GoogleProvider {
    http: reqwest::Client,
    config: GoogleConfig,
}

#[derive(Debug, Deserialize)]
struct GoogleTokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    id: String,
    email: Option<String>,
    #[serde(default)]
    verified_email: bool,
    name: Option<String>,
    picture: Option<String>,
}

impl GoogleProvider {
    pub fn new(config: GoogleConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl FederationProvider for GoogleProvider {
    fn authorize_url(&self, state: Option<&str>) -> String {
        let mut url = format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent",
            self.config.auth_url,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(&self.config.redirect_uri),
            urlencoding::encode(GOOGLE_SCOPES),
        );
        if let Some(state) = state {
            url.push_str("&state=");
            url.push_str(&urlencoding::encode(state));
        }
        url
    }

    async fn exchange_code(&self, code: &str) -> Result<Profile, AuthError> {
        let response = self
            .http
            .post(&self.config.token_url)
            .form(&[
                ("code", code),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(|e| AuthError::Provider(format!("token exchange request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(%status, body = %body, "google token exchange rejected");
            return Err(AuthError::Provider(format!(
                "token exchange failed with status {status}"
            )));
        }

        let token: GoogleTokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Provider(format!("malformed token response: {e}")))?;

        let info: GoogleUserInfo = self
            .http
            .get(&self.config.userinfo_url)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .map_err(|e| AuthError::Provider(format!("userinfo request failed: {e}")))?
            .error_for_status()
            .map_err(|e| AuthError::Provider(format!("userinfo rejected: {e}")))?
            .json()
            .await
            .map_err(|e| AuthError::Provider(format!("malformed userinfo response: {e}")))?;

        debug!(provider_id = %info.id, "google profile fetched");

        Ok(Profile {
            name: info
                .name
                .or_else(|| info.email.clone())
                .unwrap_or_else(|| info.id.clone()),
            provider_id: info.id,
            email: info.email,
            avatar_url: info.picture,
            email_verified: info.verified_email,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_config() -> GoogleConfig {
        GoogleConfig {
            client_id: "client-1.apps.googleusercontent.com".into(),
            client_secret: "shhh".into(),
            redirect_uri: "http://localhost:8080/api/v1/auth/google/callback".into(),
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".into(),
            token_url: "https://oauth2.googleapis.com/token".into(),
            userinfo_url: "https://www.googleapis.com/oauth2/v2/userinfo".into(),
        }
    }

    #[test]
    fn authorize_url_carries_client_and_redirect() {
        let provider = GoogleProvider::new(make_config());
        let url = provider.authorize_url(None);
        assert!(url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert!(url.contains("client_id=client-1.apps.googleusercontent.com"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A8080"));
        assert!(url.contains("response_type=code"));
        assert!(!url.contains("state="));
    }

    #[test]
    fn authorize_url_passes_state_through_encoded() {
        let provider = GoogleProvider::new(make_config());
        let url = provider.authorize_url(Some("return to=/app"));
        assert!(url.ends_with("&state=return%20to%3D%2Fapp"));
    }

    #[test]
    fn userinfo_maps_to_profile_fields() {
        let info: GoogleUserInfo = serde_json::from_str(
            r#"{"id":"g-42","email":"alice@example.com","verified_email":true,
                "name":"Alice","picture":"https://lh3.example/p.jpg"}"#,
        )
        .expect("deserialize");
        assert_eq!(info.id, "g-42");
        assert_eq!(info.email.as_deref(), Some("alice@example.com"));
        assert!(info.verified_email);
    }

    #[test]
    fn userinfo_tolerates_missing_optional_fields() {
        let info: GoogleUserInfo = serde_json::from_str(r#"{"id":"g-7"}"#).expect("deserialize");
        assert!(info.email.is_none());
        assert!(!info.verified_email);
        assert!(info.picture.is_none());
    }
}
