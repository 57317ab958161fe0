use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::get,
};
use serde::Deserialize;
use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{AuthorizationCode, AuthorizationState, OAuthCliError, Result};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Outcome of a callback, passed to [`CallbackPages`] to render the browser page
#[derive(Debug, Clone, Copy)]
pub enum CallbackEvent<'a> {
    Success,
    Error {
        error: &'a str,
        description: Option<&'a str>,
    },
    StateMismatch,
    MissingCode,
}

/// Renders the HTML page shown in the browser after the callback
#[derive(Clone)]
pub struct CallbackPages(Arc<dyn Fn(CallbackEvent<'_>) -> String + Send + Sync>);

impl CallbackPages {
    pub fn new(render: impl Fn(CallbackEvent<'_>) -> String + Send + Sync + 'static) -> Self {
        Self(Arc::new(render))
    }

    fn render(&self, event: CallbackEvent<'_>) -> String {
        (self.0)(event)
    }
}

impl Default for CallbackPages {
    fn default() -> Self {
        Self::new(default_page)
    }
}

impl fmt::Debug for CallbackPages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CallbackPages")
    }
}

fn default_page(event: CallbackEvent<'_>) -> String {
    let (title, message) = match event {
        CallbackEvent::Success => (
            "Authorization Successful",
            "You have successfully authorized the application. You can close this window and return to the terminal.".to_string(),
        ),
        CallbackEvent::Error { error, description } => (
            "Authorization Failed",
            format!(
                "Error: {}{}. You can close this window.",
                escape_html(error),
                description
                    .map(|d| format!(" ({})", escape_html(d)))
                    .unwrap_or_default()
            ),
        ),
        CallbackEvent::StateMismatch => (
            "Authorization Failed",
            "Security validation failed. Please try again.".to_string(),
        ),
        CallbackEvent::MissingCode => (
            "Authorization Failed",
            "No authorization code received.".to_string(),
        ),
    };
    format!(
        "<html><head><title>{title}</title></head><body><h1>{title}</h1><p>{message}</p></body></html>"
    )
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

struct ServerState {
    tx: Mutex<Option<oneshot::Sender<Result<AuthorizationCode>>>>,
    expected_state: AuthorizationState,
    pages: CallbackPages,
    shutdown: CancellationToken,
}

/// Resolves to the listener's callback URL once it is bound
#[derive(Debug, Clone)]
pub struct Readiness(watch::Receiver<Option<Url>>);

impl Readiness {
    /// Wait for the callback URL
    pub async fn wait(&mut self) -> Result<Url> {
        self.0
            .wait_for(Option::is_some)
            .await
            .map_err(|_| OAuthCliError::Listener("listener dropped before ready".to_string()))?
            .clone()
            .ok_or_else(|| OAuthCliError::Listener("listener ready without URL".to_string()))
    }
}

/// Local HTTP listener that receives a single authorization callback
///
/// The listener is bound to `127.0.0.1` when [`CallbackListener::bind`]
/// returns. The first request on `/` decides the outcome, after which the
/// server shuts itself down.
pub struct CallbackListener {
    local_addr: SocketAddr,
    ready_tx: watch::Sender<Option<Url>>,
    result: Option<oneshot::Receiver<Result<AuthorizationCode>>>,
    shutdown: CancellationToken,
    server: Option<JoinHandle<()>>,
}

impl CallbackListener {
    /// Bind the listener to `127.0.0.1:<port>` and start serving
    ///
    /// # Errors
    ///
    /// Returns `ListenerBind` if the port is unavailable.
    pub async fn bind(
        port: u16,
        expected_state: AuthorizationState,
        pages: CallbackPages,
    ) -> Result<Self> {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|source| OAuthCliError::ListenerBind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| OAuthCliError::ListenerBind { addr, source })?;

        let (tx, rx) = oneshot::channel();
        let shutdown = CancellationToken::new();

        let state = Arc::new(ServerState {
            tx: Mutex::new(Some(tx)),
            expected_state,
            pages,
            shutdown: shutdown.clone(),
        });

        let app = Router::new()
            .route("/", get(handle_callback))
            .with_state(state);

        let signal = shutdown.clone();
        let server = tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await });
            if let Err(e) = serve.await {
                tracing::warn!("redirect listener stopped with error: {e}");
            }
        });

        let url = Url::parse(&format!("http://{local_addr}"))?;
        tracing::debug!(%url, "redirect listener bound");
        let (ready_tx, _) = watch::channel(Some(url));

        Ok(Self {
            local_addr,
            ready_tx,
            result: Some(rx),
            shutdown,
            server: Some(server),
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Readiness signal carrying the callback URL; can be cloned for several waiters
    pub fn readiness(&self) -> Readiness {
        Readiness(self.ready_tx.subscribe())
    }

    /// Wait for the callback and return the authorization code
    ///
    /// Can only be awaited to completion once; later calls fail with `Listener`.
    pub async fn wait_for_code(&mut self) -> Result<AuthorizationCode> {
        let rx = self
            .result
            .as_mut()
            .ok_or_else(|| OAuthCliError::Listener("callback already consumed".to_string()))?;
        let outcome = rx.await;
        self.result = None;
        outcome.unwrap_or_else(|_| {
            Err(OAuthCliError::Listener(
                "server shut down unexpectedly".to_string(),
            ))
        })
    }

    /// Stop accepting connections and release the port
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(mut server) = self.server.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await.is_err() {
                tracing::warn!("redirect listener did not stop in time, aborting");
                server.abort();
                let _ = server.await;
            }
        }
        tracing::debug!(addr = %self.local_addr, "redirect listener shut down");
    }
}

impl Drop for CallbackListener {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(server) = self.server.take() {
            server.abort();
        }
    }
}

async fn handle_callback(
    Query(params): Query<CallbackQuery>,
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    let Some(tx) = state.tx.lock().await.take() else {
        return (
            StatusCode::BAD_REQUEST,
            Html("<html><body><p>Authorization already completed.</p></body></html>".to_string()),
        );
    };

    let (status, event, outcome) = if !state.expected_state.matches(params.state.as_deref()) {
        (
            StatusCode::BAD_REQUEST,
            CallbackEvent::StateMismatch,
            Err(OAuthCliError::StateMismatch),
        )
    } else if let Some(error) = params.error.as_deref() {
        let description = params.error_description.as_deref();
        (
            StatusCode::BAD_REQUEST,
            CallbackEvent::Error { error, description },
            Err(OAuthCliError::AuthorizationDenied {
                error: error.to_string(),
                description: description.map(str::to_string),
            }),
        )
    } else {
        match params.code.as_deref().filter(|c| !c.is_empty()) {
            Some(code) => (
                StatusCode::OK,
                CallbackEvent::Success,
                Ok(AuthorizationCode::new(code)),
            ),
            None => (
                StatusCode::BAD_REQUEST,
                CallbackEvent::MissingCode,
                Err(OAuthCliError::MissingCode),
            ),
        }
    };

    let page = state.pages.render(event);
    if let Err(e) = &outcome {
        tracing::debug!("authorization callback rejected: {e}");
    }
    let _ = tx.send(outcome);
    state.shutdown.cancel();

    (status, Html(page))
}
