use std::net::SocketAddr;

use thiserror::Error;

/// Error types for the CLI OAuth token flow
#[derive(Error, Debug)]
pub enum OAuthCliError {
    #[error("could not get client details: {0} is required")]
    MissingCredential(&'static str),

    #[error("could not get client details: input aborted")]
    InputAborted,

    #[error("could not get client details: {0}")]
    Input(#[from] std::io::Error),

    #[error("failed to bind redirect listener to {addr}: {source}")]
    ListenerBind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("redirect listener error: {0}")]
    Listener(String),

    #[error("state mismatch in authorization callback")]
    StateMismatch,

    #[error("authorization denied: {error}{}", .description.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    AuthorizationDenied {
        error: String,
        description: Option<String>,
    },

    #[error("authorization code missing from callback")]
    MissingCode,

    #[error("token endpoint returned {status}: {body}")]
    TokenEndpoint { status: u16, body: String },

    #[error("malformed token response: {0}")]
    MalformedResponse(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("context done while waiting for authorization")]
    Cancelled,

    #[error("could not open the browser: {0}")]
    BrowserLaunch(String),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("endpoint {url} still unavailable after {attempts} attempts")]
    EndpointUnavailable { url: String, attempts: u32 },
}

impl OAuthCliError {
    /// True for errors raised because the caller's cancellation scope fired
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Result type alias for OAuth CLI operations
pub type Result<T> = std::result::Result<T, OAuthCliError>;
