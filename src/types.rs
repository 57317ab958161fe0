use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};
use url::Url;

use crate::server::CallbackPages;
use crate::{OAuthCliError, Result};

/// Default port for the local redirect listener
pub const DEFAULT_REDIRECT_PORT: u16 = 54520;

/// OAuth client ID and secret used for a single token request
#[derive(Debug, Clone)]
pub struct ClientDetails {
    client_id: String,
    client_secret: SecretString,
}

impl ClientDetails {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: SecretString::new(client_secret.into()),
        }
    }

    /// The OAuth client ID
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// The OAuth client secret
    pub fn client_secret(&self) -> &str {
        self.client_secret.expose_secret()
    }
}

/// Random anti-forgery value bound to one authorization attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationState(String);

impl AuthorizationState {
    /// Generate a fresh state value from 32 random bytes
    pub fn generate() -> Self {
        use base64::{Engine as _, engine::general_purpose};
        use rand::RngCore;

        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(general_purpose::URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check a received `state` query parameter against this value
    pub fn matches(&self, received: Option<&str>) -> bool {
        received.is_some_and(|r| r == self.0)
    }
}

#[cfg(test)]
impl From<&str> for AuthorizationState {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Authorization code delivered by the redirect callback
///
/// The `Debug` output only shows a short prefix so codes do not end up in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthorizationCode(String);

impl AuthorizationCode {
    pub(crate) fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthorizationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(4).collect();
        write!(f, "AuthorizationCode({prefix}…)")
    }
}

/// OAuth token returned by a successful flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// The access token used to authenticate API requests
    pub access_token: String,
    /// Token type as reported by the server, e.g. "bearer"
    pub token_type: String,
    /// When the access token expires, if the server said so
    pub expiry: Option<DateTime<Utc>>,
    pub refresh_token: Option<String>,
    /// Granted scope, if it differs from the requested one
    pub scope: Option<String>,
}

impl Token {
    /// Check if the token has expired. Tokens without an expiry never expire.
    pub fn is_expired(&self) -> bool {
        self.expires_in().is_some_and(|d| d.is_zero())
    }

    /// Time left until expiry, `Duration::ZERO` once expired, `None` without an expiry
    pub fn expires_in(&self) -> Option<Duration> {
        let expiry = self.expiry?;
        Some((expiry - Utc::now()).to_std().unwrap_or(Duration::ZERO))
    }
}

/// Token response from the token endpoint
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default, deserialize_with = "deserialize_expires_in")]
    pub expires_in: Option<i64>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
}

impl TokenResponse {
    pub(crate) fn into_token(self) -> Result<Token> {
        if self.access_token.is_empty() {
            return Err(OAuthCliError::MalformedResponse(
                "server response missing access_token".to_string(),
            ));
        }

        let expiry = self
            .expires_in
            .filter(|secs| *secs > 0)
            .and_then(chrono::Duration::try_seconds)
            .and_then(|ttl| Utc::now().checked_add_signed(ttl));

        Ok(Token {
            access_token: self.access_token,
            token_type: self.token_type,
            expiry,
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            scope: self.scope.filter(|s| !s.is_empty()),
        })
    }
}

// Some servers send expires_in as a string.
fn deserialize_expires_in<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => Ok(Some(n)),
        Some(Raw::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Raw::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid expires_in: {s}"))),
    }
}

/// Sink for human-facing diagnostic messages emitted during a token request
#[derive(Clone)]
pub struct Logger(Arc<dyn Fn(&str) + Send + Sync>);

impl Logger {
    pub fn new(f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Forward messages to `tracing` at info level
    pub fn tracing() -> Self {
        Self::new(|msg| tracing::info!(target: "oauth_cli", "{msg}"))
    }

    /// Drop every message
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub fn log(&self, msg: impl AsRef<str>) {
        (self.0)(msg.as_ref())
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::tracing()
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Logger")
    }
}

/// Configuration for a single token request
#[derive(Debug, Clone)]
pub struct TokenRequestConfig {
    /// Authorization endpoint the browser is sent to
    pub authorization_endpoint: Url,
    /// Token endpoint the code is exchanged at
    pub token_endpoint: Url,
    /// Port of the local redirect listener (default: 54520, 0 lets the OS pick)
    pub redirect_port: u16,
    /// Requested scopes, in order
    pub scopes: Vec<String>,
    pub logger: Logger,
    /// HTML shown in the browser once the callback is handled
    pub callback_pages: CallbackPages,
}

impl TokenRequestConfig {
    /// Create a new config builder
    pub fn builder(
        authorization_endpoint: impl Into<String>,
        token_endpoint: impl Into<String>,
    ) -> TokenRequestConfigBuilder {
        TokenRequestConfigBuilder {
            authorization_endpoint: authorization_endpoint.into(),
            token_endpoint: token_endpoint.into(),
            redirect_port: None,
            scopes: Vec::new(),
            logger: None,
            callback_pages: None,
        }
    }
}

/// Builder for TokenRequestConfig
#[derive(Debug, Clone)]
pub struct TokenRequestConfigBuilder {
    authorization_endpoint: String,
    token_endpoint: String,
    redirect_port: Option<u16>,
    scopes: Vec<String>,
    logger: Option<Logger>,
    callback_pages: Option<CallbackPages>,
}

impl TokenRequestConfigBuilder {
    /// Set the port the redirect listener binds on 127.0.0.1
    pub fn redirect_port(mut self, port: u16) -> Self {
        self.redirect_port = Some(port);
        self
    }

    /// Request an additional scope. Duplicates are ignored.
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        let scope = scope.into();
        if !self.scopes.contains(&scope) {
            self.scopes.push(scope);
        }
        self
    }

    /// Request additional scopes, in order
    pub fn scopes<I, S>(self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        scopes.into_iter().fold(self, |builder, s| builder.scope(s))
    }

    /// Set the diagnostic message sink
    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Set the HTML pages shown after the callback
    pub fn callback_pages(mut self, pages: CallbackPages) -> Self {
        self.callback_pages = Some(pages);
        self
    }

    /// Build the TokenRequestConfig
    pub fn build(self) -> Result<TokenRequestConfig> {
        let authorization_endpoint = parse_endpoint(&self.authorization_endpoint)?;
        let token_endpoint = parse_endpoint(&self.token_endpoint)?;

        Ok(TokenRequestConfig {
            authorization_endpoint,
            token_endpoint,
            redirect_port: self.redirect_port.unwrap_or(DEFAULT_REDIRECT_PORT),
            scopes: self.scopes,
            logger: self.logger.unwrap_or_default(),
            callback_pages: self.callback_pages.unwrap_or_default(),
        })
    }
}

fn parse_endpoint(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(OAuthCliError::InvalidConfig(format!(
            "unsupported scheme {other:?} in endpoint {raw}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn state_is_random_and_url_safe() {
        let a = AuthorizationState::generate();
        let b = AuthorizationState::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 43);
        assert!(
            a.as_str()
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn state_matching() {
        let state = AuthorizationState::from("expected");
        assert!(state.matches(Some("expected")));
        assert!(!state.matches(Some("other")));
        assert!(!state.matches(Some("")));
        assert!(!state.matches(None));
    }

    #[test]
    fn code_debug_is_truncated() {
        let code = AuthorizationCode::new("supersecretcode");
        let debug = format!("{code:?}");
        assert!(debug.contains("supe"));
        assert!(!debug.contains("supersecretcode"));
    }

    #[test]
    fn client_secret_is_redacted_in_debug() {
        let details = ClientDetails::new("000000", "999999");
        assert_eq!(details.client_id(), "000000");
        assert_eq!(details.client_secret(), "999999");
        assert!(!format!("{details:?}").contains("999999"));
    }

    #[test]
    fn token_response_minimal() {
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token":"abc123","token_type":"bearer"}"#).unwrap();
        let token = response.into_token().unwrap();
        assert_eq!(
            token,
            Token {
                access_token: "abc123".to_string(),
                token_type: "bearer".to_string(),
                expiry: None,
                refresh_token: None,
                scope: None,
            }
        );
        assert!(!token.is_expired());
        assert!(token.expires_in().is_none());
    }

    #[test]
    fn token_response_expires_in_as_string() {
        let response: TokenResponse = serde_json::from_str(
            r#"{"access_token":"a","token_type":"bearer","expires_in":"3600","refresh_token":"r","scope":"read"}"#,
        )
        .unwrap();
        let token = response.into_token().unwrap();
        let left = token.expires_in().unwrap();
        assert!(left > Duration::from_secs(3500));
        assert_eq!(token.refresh_token.as_deref(), Some("r"));
        assert_eq!(token.scope.as_deref(), Some("read"));
    }

    #[test]
    fn token_response_without_access_token_is_malformed() {
        let response: TokenResponse = serde_json::from_str(r#"{"token_type":"bearer"}"#).unwrap();
        assert!(matches!(
            response.into_token(),
            Err(OAuthCliError::MalformedResponse(_))
        ));
    }

    #[test]
    fn builder_defaults() {
        let config = TokenRequestConfig::builder(
            "http://localhost:8080/authorize",
            "http://localhost:8080/token",
        )
        .build()
        .unwrap();
        assert_eq!(config.redirect_port, DEFAULT_REDIRECT_PORT);
        assert!(config.scopes.is_empty());
        assert_eq!(config.token_endpoint.path(), "/token");
    }

    #[test]
    fn builder_keeps_scope_order_without_duplicates() {
        let config =
            TokenRequestConfig::builder("https://a.example/auth", "https://a.example/token")
                .scopes(["openid", "profile"])
                .scope("openid")
                .scope("email")
                .redirect_port(9000)
                .build()
                .unwrap();
        assert_eq!(config.scopes, vec!["openid", "profile", "email"]);
        assert_eq!(config.redirect_port, 9000);
    }

    #[test]
    fn builder_rejects_bad_endpoints() {
        let err = TokenRequestConfig::builder("not a url", "https://a.example/token")
            .build()
            .unwrap_err();
        assert!(matches!(err, OAuthCliError::UrlParse(_)));

        let err = TokenRequestConfig::builder("ftp://a.example/auth", "https://a.example/token")
            .build()
            .unwrap_err();
        assert!(matches!(err, OAuthCliError::InvalidConfig(_)));
    }

    #[test]
    fn logger_forwards_messages() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let logger = Logger::new(move |msg| sink.lock().unwrap().push(msg.to_string()));
        logger.log("hello");
        logger.log(format!("port {}", 1));
        assert_eq!(*seen.lock().unwrap(), vec!["hello", "port 1"]);
    }
}
