//! Acquiring access tokens from the accounts service.
//!
//! Two grants are supported: the refresh token grant, used when the client has a user's refresh token, and the client
//! credentials grant, used when it only has the application's client ID and secret. Either way the resulting token is
//! cached in the client's [Credentials] and reused until its assumed lifetime runs out.

use std::sync::Arc;

use base64::Engine;
use log::{debug, log, Level};
use reqwest::{
    header::{self, HeaderMap, HeaderValue},
    Method, StatusCode, Url,
};
use serde::Deserialize;

use super::{
    credentials::{AccessToken, Credentials, GrantFlow, ACCESS_TOKEN_TTL},
    transport::{Transport, TransportBody, TransportRequest},
};
use crate::{
    error::{Error, Result},
    model::error::AuthenticationErrorResponse,
};

/// How many times a token request is attempted before giving up.
const MAX_TOKEN_ATTEMPTS: u32 = 5;

#[derive(Debug)]
pub(crate) struct TokenManager {
    credentials: Arc<Credentials>,
    transport: Arc<dyn Transport>,
    token_url: Url,
    debug: bool,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,

    // these fields are in the response but the library doesn't trust or need them. keep them here for logging purposes
    #[allow(dead_code)]
    token_type: Option<String>,
    #[allow(dead_code)]
    expires_in: Option<u64>,
}

impl GrantFlow {
    fn name(self) -> &'static str {
        match self {
            GrantFlow::RefreshToken => "refresh token",
            GrantFlow::ClientCredentials => "client credentials",
        }
    }
}

impl TokenManager {
    pub fn new(credentials: Arc<Credentials>, transport: Arc<dyn Transport>, token_url: Url, debug: bool) -> Self {
        Self {
            credentials,
            transport,
            token_url,
            debug,
        }
    }

    /// Returns a valid access token, acquiring a new one if there is none or the current one has expired.
    ///
    /// Concurrent callers that all find no valid token each request their own; the last one to finish is the one that
    /// stays cached.
    pub async fn get_token(&self) -> Result<String> {
        if let Some(access_token) = self.credentials.valid_access_token() {
            return Ok(access_token);
        }

        let flow = self
            .credentials
            .grant_flow()
            .ok_or_else(|| Error::auth("auth failed: missing information to handle auth"))?;

        let access_token = self.request_token(flow).await?;
        self.credentials
            .set_access_token(AccessToken::new(access_token.clone(), ACCESS_TOKEN_TTL));

        Ok(access_token)
    }

    /// Forgets the cached access token so the next call to [get_token](Self::get_token) acquires a new one.
    pub fn invalidate(&self) {
        self.credentials.clear_access_token();
    }

    async fn request_token(&self, flow: GrantFlow) -> Result<String> {
        let mut attempt = 1;

        loop {
            debug!("Requesting access token with {} flow (attempt {attempt})", flow.name());
            let response = self
                .transport
                .send(self.build_token_request(flow)?)
                .await
                .map_err(|err| Error::Network {
                    url: self.token_url.clone(),
                    message: err.message,
                    source: err.source,
                })?;

            match response.status {
                StatusCode::OK => {
                    let token_response: TokenResponse =
                        serde_json::from_slice(&response.body).map_err(|err| Error::Auth {
                            message: format!(
                                "Failed to get token with {} flow: invalid token response: {err}",
                                flow.name()
                            ),
                            kind: None,
                            body: Some(response.body_text()),
                        })?;

                    debug!(
                        "Got token response for {} flow (type: {:?}, expires in: {:?})",
                        flow.name(),
                        token_response.token_type,
                        token_response.expires_in
                    );

                    return Ok(token_response.access_token);
                }

                // the credentials themselves are wrong, retrying won't help
                StatusCode::BAD_REQUEST => {
                    let body = response.body_text();
                    let error_response = AuthenticationErrorResponse::parse(&body);
                    let description = error_response
                        .as_ref()
                        .and_then(|response| response.error_description.as_deref())
                        .unwrap_or(&body);

                    return Err(Error::Auth {
                        message: format!("Failed to get token with {} flow: bad request: {description}", flow.name()),
                        kind: error_response.map(|response| response.error),
                        body: Some(body),
                    });
                }

                status if attempt >= MAX_TOKEN_ATTEMPTS => {
                    let message = if status.is_server_error() {
                        format!(
                            "Failed to get token with {} flow: server error ({})",
                            flow.name(),
                            status.as_u16()
                        )
                    } else {
                        format!(
                            "Request retry attempts exceeded, failed with status code {}",
                            status.as_u16()
                        )
                    };

                    return Err(Error::Auth {
                        message,
                        kind: None,
                        body: Some(response.body_text()),
                    });
                }

                status => {
                    let level = if self.debug { Level::Warn } else { Level::Debug };
                    log!(
                        level,
                        "Failed to get token with {} flow: got ({}) response. Retrying... ({})",
                        flow.name(),
                        status.as_u16(),
                        attempt + 1
                    );

                    attempt += 1;
                }
            }
        }
    }

    fn build_token_request(&self, flow: GrantFlow) -> Result<TransportRequest> {
        // grant_flow() only returns a flow when the ID and secret are both present
        let client_id = self.credentials.client_id().unwrap_or_default();
        let client_secret = self.credentials.client_secret().unwrap_or_default();

        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&build_authorization_header(client_id, client_secret))
                .map_err(|err| Error::InvalidHeader(format!("authorization: {err}")))?,
        );

        let form = match flow {
            GrantFlow::RefreshToken => vec![
                ("grant_type".to_owned(), "refresh_token".to_owned()),
                (
                    "refresh_token".to_owned(),
                    self.credentials.refresh_token().unwrap_or_default().to_owned(),
                ),
            ],
            GrantFlow::ClientCredentials => vec![("grant_type".to_owned(), "client_credentials".to_owned())],
        };

        Ok(TransportRequest {
            method: Method::POST,
            url: self.token_url.clone(),
            headers,
            body: TransportBody::Form(form),
        })
    }
}

fn build_authorization_header(client_id: &str, client_secret: &str) -> String {
    let auth = format!("{}:{}", client_id, client_secret);
    format!("Basic {}", base64::engine::general_purpose::STANDARD.encode(auth))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{client::test_transport::ScriptedTransport, model::error::AuthenticationErrorKind};

    const TOKEN_URL: &str = "https://accounts.example.com/api/token";

    fn manager(credentials: Credentials, transport: &Arc<ScriptedTransport>) -> TokenManager {
        TokenManager::new(
            Arc::new(credentials),
            Arc::clone(transport) as Arc<dyn Transport>,
            Url::parse(TOKEN_URL).unwrap(),
            false,
        )
    }

    fn client_credentials() -> Credentials {
        Credentials::new(Some("id".to_owned()), Some("secret".to_owned()), None, None)
    }

    #[test]
    fn authorization_header_is_base64() {
        assert_eq!(build_authorization_header("id", "secret"), "Basic aWQ6c2VjcmV0");
    }

    #[tokio::test]
    async fn cached_token_skips_network() {
        let transport = ScriptedTransport::new();
        let credentials = client_credentials();
        credentials.set_access_token(AccessToken::new("cached".to_owned(), ACCESS_TOKEN_TTL));

        let manager = manager(credentials, &transport);

        assert_eq!(manager.get_token().await.unwrap(), "cached");
        assert_eq!(manager.get_token().await.unwrap(), "cached");
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn client_credentials_flow() {
        let transport = ScriptedTransport::new();
        transport.push_token_json(200, r#"{"access_token":"fresh","token_type":"Bearer","expires_in":3600}"#);

        let manager = manager(client_credentials(), &transport);

        assert_eq!(manager.get_token().await.unwrap(), "fresh");

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, Method::POST);
        assert_eq!(requests[0].url.as_str(), TOKEN_URL);
        assert_eq!(requests[0].headers[header::AUTHORIZATION], "Basic aWQ6c2VjcmV0");
        assert_eq!(
            requests[0].body,
            TransportBody::Form(vec![("grant_type".to_owned(), "client_credentials".to_owned())])
        );

        // the new token is cached for an hour
        let cached = manager.credentials.access_token().unwrap();
        assert_eq!(cached.value, "fresh");
        assert!(cached.expires_at > std::time::Instant::now() + Duration::from_secs(3590));
    }

    #[tokio::test]
    async fn refresh_token_flow_is_preferred() {
        let transport = ScriptedTransport::new();
        transport.push_token_json(200, r#"{"access_token":"refreshed"}"#);

        let credentials = Credentials::new(
            Some("id".to_owned()),
            Some("secret".to_owned()),
            Some("refresh".to_owned()),
            None,
        );
        let manager = manager(credentials, &transport);

        assert_eq!(manager.get_token().await.unwrap(), "refreshed");
        assert_eq!(
            transport.requests()[0].body,
            TransportBody::Form(vec![
                ("grant_type".to_owned(), "refresh_token".to_owned()),
                ("refresh_token".to_owned(), "refresh".to_owned())
            ])
        );
    }

    #[tokio::test]
    async fn expired_token_is_replaced_with_one_request() {
        let transport = ScriptedTransport::new();
        transport.push_token_json(200, r#"{"access_token":"new"}"#);

        let credentials = client_credentials();
        credentials.set_access_token(AccessToken::new("old".to_owned(), Duration::ZERO));
        let manager = manager(credentials, &transport);

        assert_eq!(manager.get_token().await.unwrap(), "new");
        assert_eq!(manager.get_token().await.unwrap(), "new");
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn missing_credentials() {
        let transport = ScriptedTransport::new();
        let manager = manager(Credentials::new(None, None, Some("refresh".to_owned()), None), &transport);

        let err = manager.get_token().await.unwrap_err();

        assert!(matches!(err, Error::Auth { .. }));
        assert!(err.to_string().contains("missing information"));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn bad_request_is_not_retried() {
        let transport = ScriptedTransport::new();
        transport.push_token_json(
            400,
            r#"{"error":"invalid_client","error_description":"Invalid client secret"}"#,
        );

        let manager = manager(client_credentials(), &transport);
        let err = manager.get_token().await.unwrap_err();

        match err {
            Error::Auth { message, kind, body } => {
                assert!(message.contains("Invalid client secret"));
                assert_eq!(kind, Some(AuthenticationErrorKind::InvalidClient));
                assert!(body.unwrap().contains("invalid_client"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn server_errors_are_retried_five_times() {
        let transport = ScriptedTransport::new();
        for _ in 0..5 {
            transport.push_token_json(503, "");
        }

        let manager = manager(client_credentials(), &transport);
        let err = manager.get_token().await.unwrap_err();

        assert!(err.to_string().contains("server error (503)"));
        assert_eq!(transport.request_count(), 5);
        assert!(manager.credentials.access_token().is_none());
    }

    #[tokio::test]
    async fn other_statuses_share_the_attempt_budget() {
        let transport = ScriptedTransport::new();
        for _ in 0..5 {
            transport.push_token_json(418, "");
        }

        let manager = manager(client_credentials(), &transport);
        let err = manager.get_token().await.unwrap_err();

        assert!(err
            .to_string()
            .contains("Request retry attempts exceeded, failed with status code 418"));
        assert_eq!(transport.request_count(), 5);
    }

    #[tokio::test]
    async fn recovers_after_server_error() {
        let transport = ScriptedTransport::new();
        transport.push_token_json(500, "");
        transport.push_token_json(502, "");
        transport.push_token_json(200, r#"{"access_token":"eventually"}"#);

        let manager = manager(client_credentials(), &transport);

        assert_eq!(manager.get_token().await.unwrap(), "eventually");
        assert_eq!(transport.request_count(), 3);
    }

    #[tokio::test]
    async fn network_failure_is_not_retried() {
        let transport = ScriptedTransport::new();
        transport.push_token_network_error("connection reset");

        let manager = manager(client_credentials(), &transport);
        let err = manager.get_token().await.unwrap_err();

        assert!(matches!(err, Error::Network { .. }));
        assert_eq!(err.url().map(Url::as_str), Some(TOKEN_URL));
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn malformed_token_response_is_an_auth_error() {
        let transport = ScriptedTransport::new();
        transport.push_token_json(200, "{}");
        transport.push_token_json(200, "<html>maintenance</html>");

        let manager = manager(client_credentials(), &transport);

        for expected_body in ["{}", "<html>maintenance</html>"] {
            match manager.get_token().await.unwrap_err() {
                Error::Auth { message, kind, body } => {
                    assert!(message.contains("invalid token response"));
                    assert_eq!(kind, None);
                    assert_eq!(body.as_deref(), Some(expected_body));
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }

        assert_eq!(transport.request_count(), 2);
        assert!(manager.credentials.access_token().is_none());
    }

    #[tokio::test]
    async fn invalidate_forces_new_token() {
        let transport = ScriptedTransport::new();
        transport.push_token_json(200, r#"{"access_token":"first"}"#);
        transport.push_token_json(200, r#"{"access_token":"second"}"#);

        let manager = manager(client_credentials(), &transport);

        assert_eq!(manager.get_token().await.unwrap(), "first");
        manager.invalidate();
        assert_eq!(manager.get_token().await.unwrap(), "second");
        assert_eq!(transport.request_count(), 2);
    }
}
