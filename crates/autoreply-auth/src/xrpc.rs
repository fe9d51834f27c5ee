//! Authenticated XRPC calls
//!
//! One helper for every RPC the write tools make: presents `Bearer` for
//! app-password sessions and `DPoP` (with `ath` and the single nonce retry)
//! for OAuth sessions. Callers never branch on which flow produced the
//! credentials.

use crate::credentials::Credentials;
use crate::dpop;
use crate::error::{AuthError, AuthErrorKind, Result};
use serde_json::Value;
use url::Url;

#[derive(Debug, serde::Deserialize)]
struct XrpcErrorBody {
    error: Option<String>,
    message: Option<String>,
}

/// XRPC client for queries and procedures
#[derive(Clone)]
pub struct XrpcClient {
    http: reqwest::Client,
}

impl XrpcClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    fn endpoint(base: &Url, nsid: &str) -> Url {
        let mut url = base.clone();
        url.set_path(&format!("/xrpc/{nsid}"));
        url.set_query(None);
        url
    }

    /// Unauthenticated GET query against an arbitrary service
    pub async fn public_query(
        &self,
        base: &Url,
        nsid: &str,
        params: &[(&str, String)],
    ) -> Result<Value> {
        let url = Self::endpoint(base, nsid);
        let response = self.http.get(url).query(params).send().await?;
        Self::into_json(response).await
    }

    /// Authenticated GET query
    pub async fn query(
        &self,
        creds: &Credentials,
        nsid: &str,
        params: &[(&str, String)],
    ) -> Result<Value> {
        let url = Self::endpoint(&creds.service_url, nsid);
        let response = self
            .send_authorized(creds, reqwest::Method::GET, url, None, params)
            .await?;
        Self::into_json(response).await
    }

    /// Authenticated POST procedure with a JSON body
    pub async fn procedure(&self, creds: &Credentials, nsid: &str, body: &Value) -> Result<Value> {
        let url = Self::endpoint(&creds.service_url, nsid);
        let response = self
            .send_authorized(creds, reqwest::Method::POST, url, Some(body), &[])
            .await?;
        Self::into_json(response).await
    }

    async fn send_authorized(
        &self,
        creds: &Credentials,
        method: reqwest::Method,
        url: Url,
        body: Option<&Value>,
        params: &[(&str, String)],
    ) -> Result<reqwest::Response> {
        let dpop_key = match &creds.dpop_key {
            Some(json) => Some(dpop::key_from_json(json)?),
            None => None,
        };
        let mut nonce: Option<String> = None;
        let mut retried = false;
        loop {
            let mut request = self.http.request(method.clone(), url.clone());
            if !params.is_empty() {
                request = request.query(params);
            }
            if let Some(body) = body {
                request = request.json(body);
            }
            request = match &dpop_key {
                Some(key) => {
                    let proof = dpop::build_proof(
                        key,
                        method.as_str(),
                        url.as_str(),
                        nonce.as_deref(),
                        Some(&creds.access_token),
                    )?;
                    request
                        .header("Authorization", format!("DPoP {}", creds.access_token))
                        .header("DPoP", proof)
                }
                None => request.bearer_auth(&creds.access_token),
            };

            let response = request.send().await?;
            if dpop_key.is_some() && !retried {
                let www_authenticate = response
                    .headers()
                    .get("WWW-Authenticate")
                    .and_then(|v| v.to_str().ok())
                    .map(String::from);
                let next_nonce = response
                    .headers()
                    .get("DPoP-Nonce")
                    .and_then(|v| v.to_str().ok())
                    .map(String::from);
                if dpop::is_use_dpop_nonce(response.status(), www_authenticate.as_deref(), b"")
                    && next_nonce.is_some()
                {
                    nonce = next_nonce;
                    retried = true;
                    continue;
                }
            }
            return Ok(response);
        }
    }

    async fn into_json(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        if status == http::StatusCode::UNAUTHORIZED {
            return Err(AuthError::new(AuthErrorKind::AuthRequired, None)
                .with_context("server rejected the access token"));
        }
        if !status.is_success() {
            let detail = response
                .json::<XrpcErrorBody>()
                .await
                .ok()
                .and_then(|b| b.message.or(b.error))
                .unwrap_or_default();
            return Err(AuthError::protocol(format!("{status}: {detail}")));
        }
        if status == http::StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        // Some procedures answer 200 with an empty body.
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}
