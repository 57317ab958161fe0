use std::time::Duration;

use tokio::time::Instant;
use url::Url;

use crate::{OAuthCliError, Result};

/// Backoff and budget for [`wait_for_endpoint`]
#[derive(Debug, Clone)]
pub struct ProbeOptions {
    /// Delay after the first failed attempt
    pub initial_backoff: Duration,
    /// Upper bound for the delay between attempts
    pub max_backoff: Duration,
    /// Total time allowed before giving up
    pub timeout: Duration,
    /// Timeout for a single request
    pub request_timeout: Duration,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Wait until an HTTP endpoint answers at all
///
/// Any response counts, whatever its status; only connection-level failures
/// are retried, with exponential backoff.
///
/// # Errors
///
/// Returns `EndpointUnavailable` once `options.timeout` has elapsed.
pub async fn wait_for_endpoint(url: &Url, options: &ProbeOptions) -> Result<()> {
    let http = reqwest::Client::builder()
        .timeout(options.request_timeout)
        .build()?;
    probe_with(&http, url, options).await
}

pub(crate) async fn probe_with(
    http: &reqwest::Client,
    url: &Url,
    options: &ProbeOptions,
) -> Result<()> {
    let deadline = Instant::now() + options.timeout;
    let mut backoff = options.initial_backoff;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        // A single attempt must not outlive the overall deadline.
        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, http.get(url.clone()).send()).await {
            Ok(Ok(response)) => {
                tracing::debug!(%url, status = %response.status(), attempts, "endpoint is up");
                return Ok(());
            }
            Ok(Err(e)) => tracing::debug!(%url, attempts, "endpoint not reachable yet: {e}"),
            Err(_) => {
                tracing::debug!(%url, attempts, "endpoint did not answer before the deadline")
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(OAuthCliError::EndpointUnavailable {
                url: url.to_string(),
                attempts,
            });
        }
        tokio::time::sleep(backoff.min(deadline - now)).await;
        backoff = (backoff * 2).min(options.max_backoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> reqwest::Client {
        reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(1))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn any_status_counts_as_up() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/authorize", server.uri())).unwrap();
        probe_with(&client(), &url, &ProbeOptions::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn gives_up_after_timeout() {
        let port = {
            let socket = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            socket.local_addr().unwrap().port()
        };
        let url = Url::parse(&format!("http://127.0.0.1:{port}/authorize")).unwrap();
        let options = ProbeOptions {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(20),
            timeout: Duration::from_millis(100),
            request_timeout: Duration::from_millis(100),
        };

        let err = probe_with(&client(), &url, &options).await.unwrap_err();
        match err {
            OAuthCliError::EndpointUnavailable { attempts, .. } => assert!(attempts >= 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_endpoint_does_not_overrun_deadline() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/authorize", server.uri())).unwrap();
        let options = ProbeOptions {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(20),
            timeout: Duration::from_millis(200),
            request_timeout: Duration::from_secs(5),
        };
        let http = reqwest::Client::builder().no_proxy().build().unwrap();

        let started = Instant::now();
        let err = probe_with(&http, &url, &options).await.unwrap_err();
        assert!(matches!(err, OAuthCliError::EndpointUnavailable { .. }));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
