//! OAuth authorization-code flow (PAR + PKCE S256, loopback redirect)
//!
//! Public-client flow for native use: discover the account's authorization
//! server through its PDS, push the authorization request, send the user to
//! a browser, catch the redirect on an ephemeral loopback listener, and
//! exchange the code. DPoP is negotiated per session with a fresh key; the
//! single `use_dpop_nonce` retry is the only automatic retry anywhere in
//! the flow.
//!
//! Device/verification-code grants are not part of the upstream protocol
//! and are not implemented.

use crate::credentials::Credentials;
use crate::dpop;
use crate::error::{AuthError, AuthErrorKind, Result};
use autoreply_identity::types::AtIdentifier;
use autoreply_identity::{IdentityResolver, ResolvedIdentity};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use rand::RngCore;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

/// Scope requested for new sessions
pub const DEFAULT_SCOPE: &str = "atproto transition:generic";

const SUCCESS_PAGE: &str = "<!doctype html>\n<html><head><title>autoreply</title></head>\
<body><h1>Logged in</h1><p>You can close this tab and return to the terminal.</p></body></html>";

/// Flow configuration
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub scope: String,
    /// How long to wait for the browser round trip
    pub authorize_timeout: Duration,
    pub open_browser: bool,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            scope: DEFAULT_SCOPE.to_string(),
            authorize_timeout: Duration::from_secs(5 * 60),
            open_browser: true,
        }
    }
}

/// The loopback client id for a given scope.
///
/// Loopback clients are identified by `http://localhost` plus their scope;
/// redirect ports are allowed to vary, which keeps the id stable across
/// sessions (token refresh presents the same id).
pub fn client_id(scope: &str) -> String {
    format!("http://localhost?scope={}", urlencoding::encode(scope))
}

/// `/.well-known/oauth-protected-resource` payload
#[derive(Debug, Clone, Deserialize)]
pub struct ProtectedResourceMetadata {
    pub authorization_servers: Vec<Url>,
}

/// `/.well-known/oauth-authorization-server` payload
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizationServerMetadata {
    pub issuer: String,
    pub authorization_endpoint: Url,
    pub token_endpoint: Url,
    #[serde(default)]
    pub pushed_authorization_request_endpoint: Option<Url>,
    #[serde(default)]
    pub dpop_signing_alg_values_supported: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ParResponse {
    request_uri: String,
    #[allow(dead_code)]
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    sub: Option<String>,
    expires_in: Option<u64>,
    #[allow(dead_code)]
    #[serde(default)]
    scope: Option<String>,
}

/// Parameters delivered to the loopback callback
#[derive(Debug, Clone)]
pub struct CallbackParams {
    pub code: String,
    pub state: String,
    pub iss: Option<String>,
}

/// Generate the PKCE pair: 32 random bytes → base64url verifier,
/// challenge = base64url(SHA-256(verifier)).
pub fn generate_pkce() -> (String, String) {
    let mut rng = SmallRng::from_entropy();
    let mut bytes = [0u8; 32];
    rng.fill_bytes(&mut bytes);
    let verifier = URL_SAFE_NO_PAD.encode(bytes);
    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
    (verifier, challenge)
}

/// Generate the state parameter: 16 random bytes, base64url
pub fn generate_state() -> String {
    let mut rng = SmallRng::from_entropy();
    let mut bytes = [0u8; 16];
    rng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Validate a callback against the pending request.
///
/// Both checks are security-relevant: a state mismatch means the response
/// belongs to some other request; an issuer mismatch means someone other
/// than the expected server answered.
pub fn validate_callback(
    params: &CallbackParams,
    expected_state: &str,
    expected_issuer: &str,
) -> Result<()> {
    if params.state != expected_state {
        return Err(AuthError::state_mismatch());
    }
    match params.iss.as_deref() {
        Some(iss) if iss.trim_end_matches('/') == expected_issuer.trim_end_matches('/') => Ok(()),
        Some(iss) => Err(AuthError::identity_mismatch(expected_issuer, iss)),
        None => Err(AuthError::identity_mismatch(expected_issuer, "<absent>")),
    }
}

/// Fetch the protected-resource metadata from a PDS
pub async fn protected_resource(
    http: &reqwest::Client,
    pds: &Url,
) -> Result<ProtectedResourceMetadata> {
    let mut url = pds.clone();
    url.set_path("/.well-known/oauth-protected-resource");
    let response = http.get(url).send().await?;
    if !response.status().is_success() {
        return Err(AuthError::protocol(format!(
            "protected-resource metadata returned {}",
            response.status()
        )));
    }
    let metadata: ProtectedResourceMetadata = response.json().await?;
    if metadata.authorization_servers.is_empty() {
        return Err(AuthError::protocol("PDS lists no authorization servers"));
    }
    Ok(metadata)
}

/// Fetch the authorization-server metadata
pub async fn authorization_server(
    http: &reqwest::Client,
    auth: &Url,
) -> Result<AuthorizationServerMetadata> {
    let mut url = auth.clone();
    url.set_path("/.well-known/oauth-authorization-server");
    let response = http.get(url).send().await?;
    if !response.status().is_success() {
        return Err(AuthError::protocol(format!(
            "authorization-server metadata returned {}",
            response.status()
        )));
    }
    Ok(response.json().await?)
}

/// POST a form with a DPoP proof, retrying once on `use_dpop_nonce`.
///
/// The latest server nonce is threaded through `nonce` so a later call to
/// the same server starts with it.
async fn post_form_with_dpop(
    http: &reqwest::Client,
    key: &jose_jwk::Key,
    url: &Url,
    form: &[(&str, &str)],
    nonce: &mut Option<String>,
) -> Result<(http::StatusCode, Vec<u8>)> {
    let mut retried = false;
    loop {
        let proof = dpop::build_proof(key, "POST", url.as_str(), nonce.as_deref(), None)?;
        let response = http
            .post(url.clone())
            .header("DPoP", proof)
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if let Some(next) = response
            .headers()
            .get("DPoP-Nonce")
            .and_then(|v| v.to_str().ok())
        {
            *nonce = Some(next.to_string());
        }
        let body = response.bytes().await?.to_vec();

        if !retried && dpop::is_use_dpop_nonce(status, None, &body) && nonce.is_some() {
            retried = true;
            continue;
        }
        return Ok((status, body));
    }
}

struct CallbackServer {
    port: u16,
    rx: mpsc::Receiver<CallbackParams>,
    stop: std::sync::mpsc::Sender<()>,
}

/// Bind `127.0.0.1:0` and serve the one-shot callback route.
fn start_callback_server() -> Result<CallbackServer> {
    let (tx, rx) = mpsc::channel(5);
    let server = rouille::Server::new("127.0.0.1:0", move |request| {
        rouille::router!(request,
            (GET) (/callback) => {
                let (code, state) = match (request.get_param("code"), request.get_param("state")) {
                    (Some(code), Some(state)) => (code, state),
                    _ => return rouille::Response::text("missing parameters").with_status_code(400),
                };
                let params = CallbackParams {
                    code,
                    state,
                    iss: request.get_param("iss"),
                };
                let _ = tx.try_send(params);
                rouille::Response::html(SUCCESS_PAGE)
            },
            _ => rouille::Response::empty_404()
        )
    })
    .map_err(|e| AuthError::new(AuthErrorKind::Network, Some(e)))?;
    let port = server.server_addr().port();
    let (_handle, stop) = server.stoppable();
    Ok(CallbackServer { port, rx, stop })
}

/// Drives the full authorization-code flow
pub struct OAuthEngine {
    http: reqwest::Client,
    resolver: IdentityResolver,
    config: OAuthConfig,
}

impl OAuthEngine {
    pub fn new(http: reqwest::Client, resolver: IdentityResolver, config: OAuthConfig) -> Self {
        Self {
            http,
            resolver,
            config,
        }
    }

    /// Run the flow for an account and return credentials ready for the
    /// vault. The caller decides where they are stored.
    #[tracing::instrument(level = "info", skip(self), fields(input = %input))]
    pub async fn login(&self, input: &str) -> Result<Credentials> {
        // Resolve chain: input -> DID -> document -> PDS.
        let identifier = AtIdentifier::parse(input).map_err(AuthError::from)?;
        let ResolvedIdentity { did, doc, pds } =
            self.resolver.resolve_identifier(&identifier).await?;
        let handle = doc
            .handle()
            .map(String::from)
            .unwrap_or_else(|| identifier.to_string());
        self.authorize(&handle, did.as_str(), &pds).await
    }

    /// Authorize against an already-resolved identity (the tail of
    /// [`login`](Self::login), after the resolve chain).
    pub async fn authorize(&self, handle: &str, did: &str, pds: &Url) -> Result<Credentials> {
        // Authorization server discovery.
        let prm = protected_resource(&self.http, &pds).await?;
        let auth_base = &prm.authorization_servers[0];
        let metadata = authorization_server(&self.http, auth_base).await?;
        let par_endpoint = metadata
            .pushed_authorization_request_endpoint
            .as_ref()
            .ok_or_else(|| AuthError::protocol("server does not support PAR"))?;

        // Per-session material.
        let (verifier, challenge) = generate_pkce();
        let state = generate_state();
        let dpop_key = dpop::generate_key();
        let client_id = client_id(&self.config.scope);

        // Loopback listener before PAR so the redirect URI is known.
        let mut callback = start_callback_server()?;
        let redirect_uri = format!("http://127.0.0.1:{}/callback", callback.port);

        let mut nonce: Option<String> = None;
        let (status, body) = post_form_with_dpop(
            &self.http,
            &dpop_key,
            par_endpoint,
            &[
                ("client_id", client_id.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
                ("scope", self.config.scope.as_str()),
                ("state", state.as_str()),
                ("code_challenge", challenge.as_str()),
                ("code_challenge_method", "S256"),
                ("response_type", "code"),
                ("login_hint", handle),
            ],
            &mut nonce,
        )
        .await?;
        if !status.is_success() {
            let _ = callback.stop.send(());
            return Err(AuthError::protocol(format!(
                "PAR returned {}: {}",
                status,
                String::from_utf8_lossy(&body)
            )));
        }
        let par: ParResponse = serde_json::from_slice(&body)?;

        // Send the user off to authorize.
        let mut authorize_url = metadata.authorization_endpoint.clone();
        authorize_url.set_query(Some(&format!(
            "client_id={}&request_uri={}",
            urlencoding::encode(&client_id),
            urlencoding::encode(&par.request_uri)
        )));
        tracing::info!(url = %authorize_url, "waiting for authorization in browser");
        if self.config.open_browser {
            let _ = webbrowser::open(authorize_url.as_str());
        }

        let received = tokio::time::timeout(self.config.authorize_timeout, callback.rx.recv()).await;
        let _ = callback.stop.send(());
        let params = match received {
            Ok(Some(params)) => params,
            Ok(None) | Err(_) => return Err(AuthError::callback_timeout()),
        };
        validate_callback(&params, &state, &metadata.issuer)?;

        // Exchange the code.
        let (status, body) = post_form_with_dpop(
            &self.http,
            &dpop_key,
            &metadata.token_endpoint,
            &[
                ("grant_type", "authorization_code"),
                ("code", params.code.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
                ("client_id", client_id.as_str()),
                ("code_verifier", verifier.as_str()),
            ],
            &mut nonce,
        )
        .await?;
        if !status.is_success() {
            return Err(AuthError::protocol(format!(
                "token exchange returned {}",
                status
            )));
        }
        let token: TokenResponse = serde_json::from_slice(&body)?;

        // The subject the server authenticated must be the DID we resolved.
        match token.sub.as_deref() {
            Some(sub) if sub == did => {}
            Some(sub) => return Err(AuthError::identity_mismatch(did, sub)),
            None => return Err(AuthError::identity_mismatch(did, "<absent>")),
        }

        Ok(Credentials {
            handle: handle.to_string(),
            did: did.to_string(),
            access_token: token.access_token,
            refresh_token: token.refresh_token.unwrap_or_default(),
            service_url: pds.clone(),
            dpop_key: Some(dpop::key_to_json(&dpop_key)?),
            expires_at: token
                .expires_in
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs as i64)),
        })
    }
}

/// Refresh DPoP-bound credentials through the token endpoint.
///
/// Rediscovers the authorization server from the stored PDS so the stored
/// record stays small; presents the same loopback client id.
pub async fn refresh(http: &reqwest::Client, creds: &Credentials) -> Result<Credentials> {
    let key_json = creds
        .dpop_key
        .as_ref()
        .ok_or_else(|| AuthError::protocol("credentials are not DPoP-bound"))?;
    let key = dpop::key_from_json(key_json)?;

    let prm = protected_resource(http, &creds.service_url).await?;
    let metadata = authorization_server(http, &prm.authorization_servers[0]).await?;
    let client_id = client_id(DEFAULT_SCOPE);

    let mut nonce: Option<String> = None;
    let (status, body) = post_form_with_dpop(
        http,
        &key,
        &metadata.token_endpoint,
        &[
            ("grant_type", "refresh_token"),
            ("refresh_token", creds.refresh_token.as_str()),
            ("client_id", client_id.as_str()),
        ],
        &mut nonce,
    )
    .await?;
    if !status.is_success() {
        return Err(AuthError::auth_failed(status));
    }
    let token: TokenResponse = serde_json::from_slice(&body)?;
    if let Some(sub) = token.sub.as_deref() {
        if sub != creds.did {
            return Err(AuthError::identity_mismatch(&creds.did, sub));
        }
    }

    Ok(Credentials {
        handle: creds.handle.clone(),
        did: creds.did.clone(),
        access_token: token.access_token,
        refresh_token: token
            .refresh_token
            .unwrap_or_else(|| creds.refresh_token.clone()),
        service_url: creds.service_url.clone(),
        dpop_key: creds.dpop_key.clone(),
        expires_at: token
            .expires_in
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs as i64)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pkce_challenge_matches_verifier() {
        let (verifier, challenge) = generate_pkce();
        // 32 bytes -> 43 base64url chars, no padding
        assert_eq!(verifier.len(), 43);
        assert!(!verifier.contains('='));
        assert_eq!(
            challenge,
            URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
        );
    }

    #[test]
    fn pkce_pairs_are_unique() {
        let (a, _) = generate_pkce();
        let (b, _) = generate_pkce();
        assert_ne!(a, b);
    }

    #[test]
    fn state_is_16_bytes_base64url() {
        let state = generate_state();
        assert_eq!(URL_SAFE_NO_PAD.decode(&state).unwrap().len(), 16);
    }

    #[test]
    fn client_id_embeds_scope() {
        assert_eq!(
            client_id("atproto transition:generic"),
            "http://localhost?scope=atproto%20transition%3Ageneric"
        );
    }

    #[test]
    fn callback_rejects_altered_state() {
        let params = CallbackParams {
            code: "C".into(),
            state: "tampered".into(),
            iss: Some("https://auth.example".into()),
        };
        let err = validate_callback(&params, "expected", "https://auth.example").unwrap_err();
        assert_eq!(*err.kind(), AuthErrorKind::StateMismatch);
    }

    #[test]
    fn callback_rejects_altered_issuer() {
        let params = CallbackParams {
            code: "C".into(),
            state: "expected".into(),
            iss: Some("https://evil.example".into()),
        };
        let err = validate_callback(&params, "expected", "https://auth.example").unwrap_err();
        assert_eq!(*err.kind(), AuthErrorKind::IdentityMismatch);
    }

    #[test]
    fn callback_accepts_matching_response() {
        let params = CallbackParams {
            code: "C".into(),
            state: "expected".into(),
            iss: Some("https://auth.example/".into()),
        };
        validate_callback(&params, "expected", "https://auth.example").unwrap();
    }

    #[test]
    fn callback_requires_issuer() {
        let params = CallbackParams {
            code: "C".into(),
            state: "expected".into(),
            iss: None,
        };
        assert!(validate_callback(&params, "expected", "https://auth.example").is_err());
    }

    #[tokio::test]
    async fn callback_server_round_trip() {
        let mut server = start_callback_server().unwrap();
        let port = server.port;
        let url = format!(
            "http://127.0.0.1:{port}/callback?code=C&state=S&iss=https%3A%2F%2Fauth.example"
        );
        let body = reqwest::get(&url).await.unwrap();
        assert!(body.status().is_success());
        let params = server.rx.recv().await.unwrap();
        assert_eq!(params.code, "C");
        assert_eq!(params.state, "S");
        assert_eq!(params.iss.as_deref(), Some("https://auth.example"));
        let _ = server.stop.send(());
    }
}
