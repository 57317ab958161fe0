//! # oauth-cli
//!
//! Obtain an OAuth 2.0 access token from a command-line program using the
//! authorization code flow and a temporary loopback redirect listener.
//!
//! ## Features
//!
//! - **Loopback Redirect**: Local listener on `127.0.0.1:<port>` (default 54520)
//!   that captures a single callback and validates its `state`
//! - **Browser Integration**: Auto-open browser for authorization (default
//!   `browser` feature); launch failures are logged with the URL instead
//! - **Pluggable Client Details**: Client ID and secret from command-line flags
//!   or an interactive prompt
//! - **Cancellation**: Every wait observes a caller-supplied `CancellationToken`,
//!   and the listener always releases its port
//!
//! ## Quick Start
//!
//! ```no_run
//! use oauth_cli::{LaunchOptions, TokenRequestConfig, default_get_oauth_token};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // --oauth-client-id=... --oauth-client-secret=... or --interactive
//!     let options = LaunchOptions::from_env()?;
//!     let config = TokenRequestConfig::builder(
//!         "http://localhost:8080/authorize",
//!         "http://localhost:8080/token",
//!     )
//!     .build()?;
//!
//!     let token = default_get_oauth_token(config, &options, &CancellationToken::new()).await?;
//!     println!("Got token of type {}", token.token_type);
//!     Ok(())
//! }
//! ```

mod browser;
mod client;
mod details;
mod error;
mod flow;
mod probe;
mod server;
mod types;

// Public API exports
pub use browser::{BrowserLauncher, SystemBrowser, open_browser};
pub use client::TokenExchanger;
pub use details::{ArgsDetailsProvider, DetailsProvider, InteractiveDetailsProvider, LaunchOptions};
pub use error::{OAuthCliError, Result};
pub use flow::{TokenFlow, default_get_oauth_token, get_oauth_token};
pub use probe::{ProbeOptions, wait_for_endpoint};
pub use server::{CallbackEvent, CallbackListener, CallbackPages, Readiness};
pub use types::{
    AuthorizationCode, AuthorizationState, ClientDetails, DEFAULT_REDIRECT_PORT, Logger, Token,
    TokenRequestConfig, TokenRequestConfigBuilder,
};
