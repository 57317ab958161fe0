//! Token acquisition flow.
//!
//! [`TokenFlow::get_token`] resolves client details, binds the redirect
//! listener, then runs two legs side by side: one waits for the listener to be
//! ready and opens the browser at the authorization URL, the other waits for
//! the callback and exchanges the code. The first leg to fail cancels the
//! other and decides the error. Failing to open the browser is not a failure.

use std::fmt;
use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::browser::{BrowserLauncher, SystemBrowser};
use crate::details::{DetailsProvider, LaunchOptions};
use crate::server::{CallbackListener, Readiness};
use crate::{
    AuthorizationState, ClientDetails, OAuthCliError, Result, Token, TokenExchanger,
    TokenRequestConfig,
};

#[derive(Debug, Clone, Copy)]
enum Stage {
    ResolvingClient,
    ListenerStarting,
    AwaitingCallback,
    Exchanging,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::ResolvingClient => "resolving client",
            Stage::ListenerStarting => "listener starting",
            Stage::AwaitingCallback => "awaiting callback",
            Stage::Exchanging => "exchanging",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leg {
    Browser,
    Exchange,
}

/// Obtains an access token through the authorization code flow
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use oauth_cli::{ArgsDetailsProvider, TokenFlow, TokenRequestConfig};
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = TokenRequestConfig::builder(
///     "http://localhost:8080/authorize",
///     "http://localhost:8080/token",
/// )
/// .scope("read")
/// .build()?;
///
/// let provider = ArgsDetailsProvider::new(Some("000000".into()), Some("999999".into()));
/// let flow = TokenFlow::new(config, Arc::new(provider));
/// let token = flow.get_token(&CancellationToken::new()).await?;
/// println!("{}", token.access_token);
/// # Ok(())
/// # }
/// ```
pub struct TokenFlow {
    config: TokenRequestConfig,
    provider: Arc<dyn DetailsProvider>,
    browser: Arc<dyn BrowserLauncher>,
    exchanger: TokenExchanger,
}

impl TokenFlow {
    pub fn new(config: TokenRequestConfig, provider: Arc<dyn DetailsProvider>) -> Self {
        Self {
            config,
            provider,
            browser: Arc::new(SystemBrowser),
            exchanger: TokenExchanger::new(),
        }
    }

    /// Replace the browser launcher
    pub fn with_browser(mut self, browser: impl BrowserLauncher + 'static) -> Self {
        self.browser = Arc::new(browser);
        self
    }

    /// Replace the token exchanger, e.g. to use a custom HTTP client
    pub fn with_exchanger(mut self, exchanger: TokenExchanger) -> Self {
        self.exchanger = exchanger;
        self
    }

    /// Run the flow until a token is obtained, a step fails or `cancel` fires
    ///
    /// The redirect listener is shut down before this returns, on every path.
    pub async fn get_token(&self, cancel: &CancellationToken) -> Result<Token> {
        tracing::debug!(stage = %Stage::ResolvingClient);
        let resolved = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(OAuthCliError::Cancelled),
            details = self.provider.details(cancel) => details,
        };
        let details = resolved.inspect_err(|e| tracing::debug!(stage = %Stage::Failed, "{e}"))?;

        tracing::debug!(stage = %Stage::ListenerStarting, port = self.config.redirect_port);
        let state = AuthorizationState::generate();
        let mut listener = CallbackListener::bind(
            self.config.redirect_port,
            state.clone(),
            self.config.callback_pages.clone(),
        )
        .await?;

        let outcome = self.run(&mut listener, &details, &state, cancel).await;
        listener.shutdown().await;

        match &outcome {
            Ok(_) => tracing::debug!(stage = %Stage::Done),
            Err(e) => tracing::debug!(stage = %Stage::Failed, "{e}"),
        }
        outcome
    }

    async fn run(
        &self,
        listener: &mut CallbackListener,
        details: &ClientDetails,
        state: &AuthorizationState,
        cancel: &CancellationToken,
    ) -> Result<Token> {
        let flow_cancel = cancel.child_token();
        let first_failure = OnceLock::new();
        let fail = |leg: Leg| {
            let _ = first_failure.set(leg);
            flow_cancel.cancel();
        };

        let mut browser_ready = listener.readiness();
        let exchange_ready = listener.readiness();

        let browser_leg = async {
            let result = tokio::select! {
                _ = flow_cancel.cancelled() => Err(OAuthCliError::Cancelled),
                launched = async {
                    let redirect = browser_ready.wait().await?;
                    self.launch_browser(details, state, &redirect).await;
                    Ok::<_, OAuthCliError>(())
                } => launched,
            };
            if result.is_err() {
                fail(Leg::Browser);
            }
            result
        };

        let exchange_leg = async {
            let result = tokio::select! {
                _ = flow_cancel.cancelled() => Err(OAuthCliError::Cancelled),
                token = self.exchange_callback(listener, exchange_ready, details) => token,
            };
            if result.is_err() {
                fail(Leg::Exchange);
            }
            result
        };

        tracing::debug!(stage = %Stage::AwaitingCallback);
        let (browser_result, token_result) = tokio::join!(browser_leg, exchange_leg);

        match first_failure.get() {
            Some(Leg::Browser) => match browser_result {
                Err(e) => Err(e),
                Ok(()) => token_result,
            },
            _ => token_result,
        }
    }

    // Some launchers block until the browser exits, so keep them off the runtime.
    async fn launch_browser(
        &self,
        details: &ClientDetails,
        state: &AuthorizationState,
        redirect: &Url,
    ) {
        let url = self.authorization_url(details, state, redirect);
        let browser = Arc::clone(&self.browser);
        let target = url.to_string();

        let opened = tokio::task::spawn_blocking(move || browser.open(&target))
            .await
            .unwrap_or_else(|e| Err(OAuthCliError::BrowserLaunch(e.to_string())));

        if let Err(e) = opened {
            self.config.logger.log(e.to_string());
            self.config
                .logger
                .log(format!("Please visit the following URL to authorize: {url}"));
        }
    }

    async fn exchange_callback(
        &self,
        listener: &mut CallbackListener,
        mut readiness: Readiness,
        details: &ClientDetails,
    ) -> Result<Token> {
        let redirect = readiness.wait().await?;
        let code = listener.wait_for_code().await?;

        tracing::debug!(stage = %Stage::Exchanging, ?code);
        self.exchanger
            .exchange(&self.config.token_endpoint, details, &code, &redirect)
            .await
    }

    fn authorization_url(
        &self,
        details: &ClientDetails,
        state: &AuthorizationState,
        redirect: &Url,
    ) -> Url {
        let mut url = self.config.authorization_endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", details.client_id())
                .append_pair("redirect_uri", redirect.as_str());
            if !self.config.scopes.is_empty() {
                query.append_pair("scope", &self.config.scopes.join(" "));
            }
            query.append_pair("state", state.as_str());
        }
        url
    }
}

/// Get a token using the given client details provider
pub async fn get_oauth_token(
    config: TokenRequestConfig,
    provider: Arc<dyn DetailsProvider>,
    cancel: &CancellationToken,
) -> Result<Token> {
    TokenFlow::new(config, provider).get_token(cancel).await
}

/// Get a token, choosing interactive or flag-based client details from `options`
pub async fn default_get_oauth_token(
    config: TokenRequestConfig,
    options: &LaunchOptions,
    cancel: &CancellationToken,
) -> Result<Token> {
    get_oauth_token(config, options.details_provider().into(), cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ArgsDetailsProvider;

    fn flow(auth: &str, scopes: &[&str]) -> TokenFlow {
        let config = TokenRequestConfig::builder(auth, "http://localhost:8080/token")
            .scopes(scopes.iter().copied())
            .build()
            .unwrap();
        TokenFlow::new(config, Arc::new(ArgsDetailsProvider::default()))
    }

    fn query(url: &Url) -> Vec<(String, String)> {
        url.query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    #[test]
    fn authorization_url_carries_flow_parameters() {
        let flow = flow("http://localhost:8080/authorize", &["read", "write"]);
        let url = flow.authorization_url(
            &ClientDetails::new("000000", "999999"),
            &AuthorizationState::from("st"),
            &Url::parse("http://127.0.0.1:54520").unwrap(),
        );

        assert_eq!(url.path(), "/authorize");
        assert_eq!(
            query(&url),
            vec![
                ("response_type".to_string(), "code".to_string()),
                ("client_id".to_string(), "000000".to_string()),
                ("redirect_uri".to_string(), "http://127.0.0.1:54520/".to_string()),
                ("scope".to_string(), "read write".to_string()),
                ("state".to_string(), "st".to_string()),
            ]
        );
        assert!(!url.as_str().contains("999999"));
    }

    #[test]
    fn authorization_url_keeps_existing_query_and_omits_empty_scope() {
        let flow = flow("https://idp.example/authorize?tenant=x", &[]);
        let url = flow.authorization_url(
            &ClientDetails::new("id", "secret"),
            &AuthorizationState::from("st"),
            &Url::parse("http://127.0.0.1:1").unwrap(),
        );

        let pairs = query(&url);
        assert_eq!(pairs[0], ("tenant".to_string(), "x".to_string()));
        assert!(pairs.iter().all(|(k, _)| k != "scope"));
    }

    #[tokio::test]
    async fn missing_credentials_fail_before_binding() {
        let flow = flow("http://localhost:8080/authorize", &[]);
        let err = flow.get_token(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, OAuthCliError::MissingCredential(_)));
    }

    #[tokio::test]
    async fn cancelled_scope_stops_before_resolving() {
        let flow = flow("http://localhost:8080/authorize", &[]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = flow.get_token(&cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
