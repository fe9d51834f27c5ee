//! App-password session management
//!
//! Password-grant login against `com.atproto.server.createSession`, token
//! refresh, and the validity check write tools run before presenting a
//! bearer token. OAuth-bound credentials refresh through the token endpoint
//! instead; `ensure_valid` dispatches on the credential shape.

use crate::credentials::Credentials;
use crate::error::{AuthError, AuthErrorKind, Result};
use crate::oauth;
use chrono::{Duration, Utc};
use serde::Deserialize;
use url::Url;

/// Advisory lifetime applied to fresh session tokens
fn access_token_lifetime() -> Duration {
    Duration::hours(2)
}

/// Refresh once the remaining lifetime drops below this
fn refresh_leeway() -> Duration {
    Duration::minutes(5)
}

#[derive(Debug, Deserialize)]
struct SessionOutput {
    #[serde(rename = "accessJwt")]
    access_jwt: String,
    #[serde(rename = "refreshJwt")]
    refresh_jwt: String,
    handle: String,
    did: String,
}

/// Password-grant session manager
#[derive(Clone)]
pub struct SessionManager {
    http: reqwest::Client,
}

impl SessionManager {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Log in with an app password and return fresh credentials.
    #[tracing::instrument(level = "debug", skip(self, password), fields(identifier = %identifier, service = %service))]
    pub async fn login(
        &self,
        identifier: &str,
        password: &str,
        service: &Url,
    ) -> Result<Credentials> {
        let mut url = service.clone();
        url.set_path("/xrpc/com.atproto.server.createSession");
        let response = self
            .http
            .post(url)
            .json(&serde_json::json!({
                "identifier": identifier,
                "password": password,
            }))
            .send()
            .await?;

        let status = response.status();
        if status == http::StatusCode::UNAUTHORIZED || status == http::StatusCode::BAD_REQUEST {
            return Err(AuthError::auth_failed(status));
        }
        if !status.is_success() {
            return Err(AuthError::network(std::io::Error::other(format!(
                "createSession returned {status}"
            ))));
        }
        let output: SessionOutput = response.json().await?;
        tracing::info!(handle = %output.handle, did = %output.did, "session created");

        Ok(Credentials {
            handle: output.handle,
            did: output.did,
            access_token: output.access_jwt,
            refresh_token: output.refresh_jwt,
            service_url: service.clone(),
            dpop_key: None,
            expires_at: Some(Utc::now() + access_token_lifetime()),
        })
    }

    /// Exchange the refresh token for a new token pair.
    #[tracing::instrument(level = "debug", skip(self, creds), fields(handle = %creds.handle))]
    pub async fn refresh(&self, creds: &Credentials) -> Result<Credentials> {
        let mut url = creds.service_url.clone();
        url.set_path("/xrpc/com.atproto.server.refreshSession");
        let response = self
            .http
            .post(url)
            .bearer_auth(&creds.refresh_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::auth_failed(status));
        }
        let output: SessionOutput = response.json().await?;

        Ok(Credentials {
            handle: output.handle,
            did: output.did,
            access_token: output.access_jwt,
            refresh_token: output.refresh_jwt,
            service_url: creds.service_url.clone(),
            dpop_key: None,
            expires_at: Some(Utc::now() + access_token_lifetime()),
        })
    }

    /// Return credentials that are valid for at least the leeway window,
    /// refreshing once if needed. An unrefreshable session surfaces as
    /// `AuthRequired`.
    pub async fn ensure_valid(&self, creds: Credentials) -> Result<Credentials> {
        if creds.fresh_for(refresh_leeway()) {
            return Ok(creds);
        }
        let refreshed = if creds.is_dpop_bound() {
            oauth::refresh(&self.http, &creds).await
        } else {
            self.refresh(&creds).await
        };
        refreshed.map_err(|e| match e.kind() {
            AuthErrorKind::Network | AuthErrorKind::Timeout => e,
            _ => AuthError::new(AuthErrorKind::AuthRequired, Some(Box::new(e)))
                .with_help("session expired and could not be refreshed; log in again"),
        })
    }
}
