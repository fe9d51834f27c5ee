//! Full authorization-code flow against a stub authorization server
//!
//! The stub plays both PDS and authorization server on one loopback port.
//! Its PAR endpoint demands a DPoP nonce on the first attempt (exercising
//! the single retry), then drives the redirect itself by calling the
//! engine's loopback callback with the state it was given.

use autoreply_auth::vault::CredentialVault;
use autoreply_auth::{OAuthConfig, OAuthEngine};
use autoreply_identity::{IdentityResolver, ResolverOptions};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

const DID: &str = "did:plc:abc123";
const AUTH_CODE: &str = "authcode-1";
const NONCE: &str = "nonce-1";

struct Stub {
    base: Arc<OnceLock<String>>,
    par_attempts: Arc<AtomicUsize>,
}

fn read_body(request: &rouille::Request) -> String {
    let mut body = String::new();
    if let Some(mut data) = request.data() {
        let _ = data.read_to_string(&mut body);
    }
    body
}

fn form_value(body: &str, key: &str) -> Option<String> {
    url::form_urlencoded::parse(body.as_bytes())
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

/// Minimal raw HTTP GET, used by the stub to play the browser redirect
fn http_get(url: &str) -> std::io::Result<()> {
    let rest = url.strip_prefix("http://").expect("http url");
    let (host, path) = rest.split_once('/').expect("path");
    let mut stream = std::net::TcpStream::connect(host)?;
    write!(
        stream,
        "GET /{path} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n"
    )?;
    let mut response = String::new();
    let _ = stream.read_to_string(&mut response);
    Ok(())
}

fn start_stub() -> String {
    let stub = Stub {
        base: Arc::new(OnceLock::new()),
        par_attempts: Arc::new(AtomicUsize::new(0)),
    };
    let base = stub.base.clone();
    let server = rouille::Server::new("127.0.0.1:0", move |request| {
        let issuer = stub.base.get().expect("base set").clone();
        match (request.method(), request.url().as_str()) {
            ("GET", "/.well-known/oauth-protected-resource") => rouille::Response::json(
                &serde_json::json!({"authorization_servers": [issuer]}),
            ),
            ("GET", "/.well-known/oauth-authorization-server") => rouille::Response::json(
                &serde_json::json!({
                    "issuer": issuer,
                    "authorization_endpoint": format!("{issuer}/authorize"),
                    "token_endpoint": format!("{issuer}/token"),
                    "pushed_authorization_request_endpoint": format!("{issuer}/par"),
                    "dpop_signing_alg_values_supported": ["ES256"],
                }),
            ),
            ("POST", "/par") => {
                let attempt = stub.par_attempts.fetch_add(1, Ordering::SeqCst);
                let body = read_body(request);
                if attempt == 0 {
                    // First attempt carries no nonce: demand one.
                    return rouille::Response::json(
                        &serde_json::json!({"error": "use_dpop_nonce"}),
                    )
                    .with_status_code(400)
                    .with_additional_header("DPoP-Nonce", NONCE);
                }
                // The retried proof must embed the nonce we handed out.
                let proof = request.header("DPoP").expect("DPoP proof").to_string();
                let claims = URL_SAFE_NO_PAD
                    .decode(proof.split('.').nth(1).expect("claims segment"))
                    .expect("base64 claims");
                assert!(String::from_utf8_lossy(&claims).contains(NONCE));

                let state = form_value(&body, "state").expect("state");
                let redirect_uri = form_value(&body, "redirect_uri").expect("redirect_uri");
                assert_eq!(form_value(&body, "code_challenge_method").as_deref(), Some("S256"));
                assert!(form_value(&body, "code_challenge").is_some());
                assert_eq!(form_value(&body, "login_hint").as_deref(), Some("alice.test"));

                // Play the browser: deliver the authorization response.
                let callback = format!(
                    "{redirect_uri}?code={AUTH_CODE}&state={}&iss={}",
                    urlencoding::encode(&state),
                    urlencoding::encode(&issuer),
                );
                std::thread::spawn(move || {
                    std::thread::sleep(std::time::Duration::from_millis(50));
                    let _ = http_get(&callback);
                });

                rouille::Response::json(&serde_json::json!({
                    "request_uri": "urn:ietf:params:oauth:request_uri:rq1",
                    "expires_in": 90,
                }))
                .with_status_code(201)
            }
            ("POST", "/token") => {
                let body = read_body(request);
                assert_eq!(
                    form_value(&body, "grant_type").as_deref(),
                    Some("authorization_code")
                );
                assert_eq!(form_value(&body, "code").as_deref(), Some(AUTH_CODE));
                assert!(form_value(&body, "code_verifier").is_some());
                rouille::Response::json(&serde_json::json!({
                    "access_token": "oauth-access-1",
                    "refresh_token": "oauth-refresh-1",
                    "token_type": "DPoP",
                    "sub": DID,
                    "expires_in": 3600,
                    "scope": "atproto transition:generic",
                }))
            }
            _ => rouille::Response::empty_404(),
        }
    })
    .expect("stub server");
    let url = format!("http://{}", server.server_addr());
    base.set(url.clone()).expect("base once");
    let (_handle, _stop) = server.stoppable();
    std::mem::forget(_stop);
    url
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oauth_happy_path_persists_dpop_credentials() {
    let stub_url = start_stub();
    let http = reqwest::Client::new();
    let resolver = IdentityResolver::new(http.clone(), ResolverOptions::default());
    let engine = OAuthEngine::new(
        http,
        resolver,
        OAuthConfig {
            authorize_timeout: std::time::Duration::from_secs(10),
            open_browser: false,
            ..Default::default()
        },
    );

    let pds = url::Url::parse(&stub_url).unwrap();
    let creds = engine
        .authorize("alice.test", DID, &pds)
        .await
        .expect("flow should complete");

    assert_eq!(creds.did, DID);
    assert_eq!(creds.handle, "alice.test");
    assert_eq!(creds.access_token, "oauth-access-1");
    assert_eq!(creds.refresh_token, "oauth-refresh-1");
    assert!(creds.dpop_key.is_some());
    assert!(creds.fresh_for(chrono::Duration::minutes(5)));

    // Both flows land in the same vault shape; the first account becomes
    // the default.
    let dir = tempfile::TempDir::new().unwrap();
    let vault = CredentialVault::file_at(dir.path().join("credentials.json"));
    vault.store(&creds).unwrap();
    assert_eq!(vault.get_default().unwrap().as_deref(), Some("alice.test"));
    let stored = vault.get("alice.test").unwrap();
    assert_eq!(stored.did, DID);
    assert!(stored.is_dpop_bound());
}
