use url::Url;

use crate::types::TokenResponse;
use crate::{AuthorizationCode, ClientDetails, OAuthCliError, Result, Token};

/// Exchanges authorization codes for tokens at a token endpoint
///
/// A single attempt is made per call; retries are left to the caller.
#[derive(Debug, Clone, Default)]
pub struct TokenExchanger {
    http: reqwest::Client,
}

impl TokenExchanger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured HTTP client (timeouts, proxies, TLS roots)
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Exchange an authorization code for a token
    ///
    /// # Errors
    ///
    /// Returns `TokenEndpoint` on a non-success status and `MalformedResponse`
    /// if the body is not a token response.
    pub async fn exchange(
        &self,
        token_endpoint: &Url,
        details: &ClientDetails,
        code: &AuthorizationCode,
        redirect_url: &Url,
    ) -> Result<Token> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", redirect_url.as_str()),
            ("client_id", details.client_id()),
            ("client_secret", details.client_secret()),
        ];

        let response = self
            .http
            .post(token_endpoint.clone())
            .header("Accept", "application/json")
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        tracing::debug!(%status, endpoint = %token_endpoint, "token endpoint responded");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OAuthCliError::TokenEndpoint {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        let token_response: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| OAuthCliError::MalformedResponse(e.to_string()))?;
        token_response.into_token()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn exchanger() -> TokenExchanger {
        TokenExchanger::with_client(reqwest::Client::builder().no_proxy().build().unwrap())
    }

    fn redirect() -> Url {
        Url::parse("http://127.0.0.1:54520").unwrap()
    }

    #[tokio::test]
    async fn sends_authorization_code_grant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=xyz"))
            .and(body_string_contains("client_id=000000"))
            .and(body_string_contains("client_secret=999999"))
            .and(body_string_contains(
                "redirect_uri=http%3A%2F%2F127.0.0.1%3A54520%2F",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"{"access_token":"abc123","token_type":"bearer","expires_in":3600}"#,
                "application/json",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let endpoint = Url::parse(&format!("{}/token", server.uri())).unwrap();
        let token = exchanger()
            .exchange(
                &endpoint,
                &ClientDetails::new("000000", "999999"),
                &AuthorizationCode::new("xyz"),
                &redirect(),
            )
            .await
            .unwrap();

        assert_eq!(token.access_token, "abc123");
        assert_eq!(token.token_type, "bearer");
        assert!(token.expiry.is_some());
    }

    #[tokio::test]
    async fn error_status_is_reported_with_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#),
            )
            .mount(&server)
            .await;

        let endpoint = Url::parse(&format!("{}/token", server.uri())).unwrap();
        let err = exchanger()
            .exchange(
                &endpoint,
                &ClientDetails::new("000000", "999999"),
                &AuthorizationCode::new("bad"),
                &redirect(),
            )
            .await
            .unwrap_err();

        match err {
            OAuthCliError::TokenEndpoint { status, body } => {
                assert_eq!(status, 400);
                assert!(body.contains("invalid_grant"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_json_body_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let endpoint = Url::parse(&format!("{}/token", server.uri())).unwrap();
        let err = exchanger()
            .exchange(
                &endpoint,
                &ClientDetails::new("000000", "999999"),
                &AuthorizationCode::new("xyz"),
                &redirect(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OAuthCliError::MalformedResponse(_)));
    }
}
