//! OAuth2 authorization-code flow with a persisted refresh token.
//!
//! The bot cannot receive the redirect itself, so the user opens
//! [`OAuthClient::authorize_url`], approves, and pastes the redirected URL
//! (or just the code) back into the chat.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::Utc;
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{errors::Error, Result};

/// Request timeout for third-party API calls.
const API_TIMEOUT: Duration = Duration::from_secs(30);

/// Seconds before the recorded expiry at which a token counts as stale.
const EXPIRY_SKEW_SECS: i64 = 60;

#[derive(Clone, Debug)]
pub struct OAuthConfig {
    /// Human name used in replies ("Zoho", "Google").
    pub provider: &'static str,
    /// Command that starts the flow, named in "not connected" errors.
    pub auth_command: &'static str,
    pub auth_url: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    /// Provider-specific authorize parameters (`access_type=offline`, ...).
    pub extra_params: Vec<(String, String)>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix seconds.
    #[serde(default)]
    pub expires_at: Option<i64>,
}

impl TokenSet {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at
            .map(|at| now + EXPIRY_SKEW_SECS >= at)
            .unwrap_or(false)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    error: Option<String>,
    error_description: Option<String>,
}

pub struct OAuthClient {
    http: reqwest::Client,
    config: OAuthConfig,
    token_file: PathBuf,
    tokens: Mutex<Option<TokenSet>>,
}

impl OAuthClient {
    /// Tokens already on disk are picked up immediately.
    pub fn new(http: reqwest::Client, config: OAuthConfig, token_file: PathBuf) -> Self {
        let tokens = match load_tokens(&token_file) {
            Ok(t) => t,
            Err(e) => {
                warn!(provider = config.provider, error = %e, "ignoring unreadable token file");
                None
            }
        };
        Self {
            http,
            config,
            token_file,
            tokens: Mutex::new(tokens),
        }
    }

    pub fn provider(&self) -> &'static str {
        self.config.provider
    }

    pub fn authorize_url(&self) -> Result<String> {
        let mut params = vec![
            ("client_id", self.config.client_id.as_str()),
            ("response_type", "code"),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];
        let scope = self.config.scopes.join(" ");
        if !scope.is_empty() {
            params.push(("scope", scope.as_str()));
        }
        for (k, v) in &self.config.extra_params {
            params.push((k.as_str(), v.as_str()));
        }

        let url = Url::parse_with_params(&self.config.auth_url, &params)
            .map_err(|e| Error::Config(format!("invalid {} auth url: {e}", self.config.provider)))?;
        Ok(url.to_string())
    }

    pub async fn is_authorized(&self) -> bool {
        self.tokens.lock().await.is_some()
    }

    /// Trade an authorization code for tokens and persist them.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenSet> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];
        let tokens = self.request_tokens(&form, None).await?;
        info!(
            provider = self.config.provider,
            has_refresh_token = tokens.refresh_token.is_some(),
            "authorization code exchanged"
        );
        self.store(tokens.clone()).await?;
        Ok(tokens)
    }

    /// Mint a new access token from the stored refresh token.
    pub async fn refresh(&self) -> Result<String> {
        let refresh_token = {
            let guard = self.tokens.lock().await;
            guard
                .as_ref()
                .and_then(|t| t.refresh_token.clone())
                .ok_or_else(|| self.not_connected())?
        };

        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];
        let tokens = self.request_tokens(&form, Some(refresh_token.clone())).await?;
        debug!(provider = self.config.provider, "access token refreshed");
        let access = tokens.access_token.clone();
        self.store(tokens).await?;
        Ok(access)
    }

    /// A usable access token, refreshing first when the stored one is stale.
    pub async fn access_token(&self) -> Result<String> {
        let current = self.tokens.lock().await.clone();
        match current {
            None => Err(self.not_connected()),
            Some(t) if t.is_expired(Utc::now().timestamp()) && t.refresh_token.is_some() => {
                self.refresh().await
            }
            Some(t) => Ok(t.access_token),
        }
    }

    /// Send a request built around the current access token. A 401 gets
    /// one refresh and one resend.
    pub async fn send_authorized(
        &self,
        build: impl Fn(&str) -> RequestBuilder,
    ) -> Result<Response> {
        let token = self.access_token().await?;
        let resp = build(&token).send().await.map_err(|e| self.http_err(e))?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        warn!(provider = self.config.provider, "access token rejected, refreshing");
        let token = self.refresh().await?;
        build(&token).send().await.map_err(|e| self.http_err(e))
    }

    fn http_err(&self, e: reqwest::Error) -> Error {
        Error::External(format!("{} request failed: {e}", self.config.provider))
    }

    async fn request_tokens(
        &self,
        form: &[(&str, &str)],
        previous_refresh: Option<String>,
    ) -> Result<TokenSet> {
        let resp = self
            .http
            .post(&self.config.token_url)
            .form(form)
            .send()
            .await
            .map_err(|e| Error::External(format!("{} token request failed: {e}", self.config.provider)))?;

        let status = resp.status();
        let body: TokenResponse = resp.json().await.map_err(|e| {
            Error::External(format!(
                "{} token endpoint returned {status} with an unreadable body: {e}",
                self.config.provider
            ))
        })?;

        if let Some(err) = body.error {
            let detail = body.error_description.unwrap_or_default();
            return Err(Error::Auth(format!(
                "{} rejected the request: {err} {detail}",
                self.config.provider
            )
            .trim_end()
            .to_string()));
        }
        let Some(access_token) = body.access_token.filter(|_| status.is_success()) else {
            return Err(Error::Auth(format!(
                "{} token endpoint returned {status} without an access token",
                self.config.provider
            )));
        };

        Ok(TokenSet {
            access_token,
            refresh_token: body.refresh_token.or(previous_refresh),
            expires_at: body.expires_in.map(|s| Utc::now().timestamp() + s),
        })
    }

    async fn store(&self, tokens: TokenSet) -> Result<()> {
        save_tokens(&self.token_file, &tokens).await?;
        *self.tokens.lock().await = Some(tokens);
        Ok(())
    }

    fn not_connected(&self) -> Error {
        Error::Auth(format!(
            "Not connected to {}. Use /{} first.",
            self.config.provider, self.config.auth_command
        ))
    }
}

/// HTTP client for token and API calls.
pub fn api_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(API_TIMEOUT)
        .build()
        .map_err(|e| Error::Config(format!("failed to build http client: {e}")))
}

/// Pull the `code` out of a pasted redirect URL, or accept a bare code.
pub fn extract_code(input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if let Ok(url) = Url::parse(input) {
        return url
            .query_pairs()
            .find(|(k, _)| k == "code")
            .map(|(_, v)| v.into_owned())
            .filter(|v| !v.is_empty());
    }
    if input.contains("code=") {
        return input
            .split(['?', '&'])
            .find_map(|kv| kv.strip_prefix("code="))
            .map(str::to_string)
            .filter(|v| !v.is_empty());
    }
    if input.chars().any(char::is_whitespace) {
        return None;
    }
    Some(input.to_string())
}

fn load_tokens(path: &Path) -> Result<Option<TokenSet>> {
    match std::fs::read_to_string(path) {
        Ok(txt) => Ok(Some(serde_json::from_str(&txt)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn save_tokens(path: &Path, tokens: &TokenSet) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let txt = serde_json::to_string_pretty(tokens)?;
    tokio::fs::write(path, txt).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{
        matchers::{body_string_contains, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;

    fn config(server: &MockServer) -> OAuthConfig {
        OAuthConfig {
            provider: "Zoho",
            auth_command: "zoho_auth",
            auth_url: "https://accounts.example.com/oauth/v2/auth".to_string(),
            token_url: format!("{}/oauth/v2/token", server.uri()),
            client_id: "cid".to_string(),
            client_secret: "secret".to_string(),
            redirect_uri: "https://example.com/oauth/callback".to_string(),
            scopes: vec!["ZohoBooks.fullaccess.all".to_string()],
            extra_params: vec![("access_type".to_string(), "offline".to_string())],
        }
    }

    #[tokio::test]
    async fn builds_authorize_url() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let client = OAuthClient::new(
            reqwest::Client::new(),
            config(&server),
            dir.path().join("t.json"),
        );

        let url = Url::parse(&client.authorize_url().unwrap()).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("client_id".to_string(), "cid".to_string())));
        assert!(pairs.contains(&("response_type".to_string(), "code".to_string())));
        assert!(pairs.contains(&("scope".to_string(), "ZohoBooks.fullaccess.all".to_string())));
        assert!(pairs.contains(&("access_type".to_string(), "offline".to_string())));
    }

    #[tokio::test]
    async fn exchanges_code_and_persists_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/v2/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at-1",
                "refresh_token": "rt-1",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("tokens.json");
        let client = OAuthClient::new(reqwest::Client::new(), config(&server), file.clone());
        assert!(!client.is_authorized().await);

        let tokens = client.exchange_code("abc").await.unwrap();
        assert_eq!(tokens.refresh_token.as_deref(), Some("rt-1"));
        assert_eq!(client.access_token().await.unwrap(), "at-1");

        let reloaded = OAuthClient::new(reqwest::Client::new(), config(&server), file);
        assert_eq!(reloaded.access_token().await.unwrap(), "at-1");
    }

    #[tokio::test]
    async fn refreshes_stale_tokens_and_keeps_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=rt-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at-2",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("tokens.json");
        let stale = TokenSet {
            access_token: "at-1".to_string(),
            refresh_token: Some("rt-1".to_string()),
            expires_at: Some(0),
        };
        std::fs::write(&file, serde_json::to_string(&stale).unwrap()).unwrap();

        let client = OAuthClient::new(reqwest::Client::new(), config(&server), file.clone());
        assert_eq!(client.access_token().await.unwrap(), "at-2");

        let saved: TokenSet =
            serde_json::from_str(&std::fs::read_to_string(file).unwrap()).unwrap();
        assert_eq!(saved.refresh_token.as_deref(), Some("rt-1"));
    }

    #[tokio::test]
    async fn provider_errors_surface_as_auth_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "invalid_code"})))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = OAuthClient::new(
            reqwest::Client::new(),
            config(&server),
            dir.path().join("t.json"),
        );
        let err = client.exchange_code("bad").await.unwrap_err();
        assert!(matches!(err, Error::Auth(ref m) if m.contains("invalid_code")));
    }

    #[tokio::test]
    async fn unauthorized_client_points_at_auth_command() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let client = OAuthClient::new(
            reqwest::Client::new(),
            config(&server),
            dir.path().join("t.json"),
        );
        let err = client.access_token().await.unwrap_err();
        assert_eq!(err.user_message(), "Not connected to Zoho. Use /zoho_auth first.");
    }

    #[test]
    fn extracts_codes() {
        assert_eq!(
            extract_code("https://example.com/oauth/callback?code=1000.abc&location=us").as_deref(),
            Some("1000.abc")
        );
        assert_eq!(extract_code("code=xyz&state=1").as_deref(), Some("xyz"));
        assert_eq!(extract_code(" 4/0Aabc ").as_deref(), Some("4/0Aabc"));
        assert_eq!(extract_code("https://example.com/cb?error=denied"), None);
        assert_eq!(extract_code("not a code"), None);
        assert_eq!(extract_code(""), None);
    }
}
