use std::time::Duration;

use serde_json::json;
use spotify_http::{
    client::{Backoff, Method, RequestOptions, SpotifyClientBuilder},
    Error,
};
use wiremock::{
    matchers::{body_string_contains, header, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

fn client_builder(server: &MockServer) -> SpotifyClientBuilder {
    SpotifyClientBuilder::new()
        .client_credentials("id", "secret")
        .base_url(format!("{}/v1", server.uri()))
        .token_url(format!("{}/api/token", server.uri()))
        .backoff(Backoff::Static(Duration::from_millis(10)))
}

async fn mount_token(server: &MockServer, access_token: &str, grant_type: &str) {
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .and(header("authorization", "Basic aWQ6c2VjcmV0"))
        .and(body_string_contains(format!("grant_type={grant_type}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": access_token,
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn client_credentials_token_is_used_for_api_requests() {
    let server = MockServer::start().await;
    mount_token(&server, "app-token", "client_credentials").await;

    Mock::given(method("GET"))
        .and(path("/v1/tracks/abc"))
        .and(query_param("market", "FI"))
        .and(header("authorization", "Bearer app-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "abc", "name": "Song" })))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_builder(&server).build().unwrap();

    for _ in 0..2 {
        let track: serde_json::Value = client
            .get("/tracks/abc", RequestOptions::new().query("market", "FI"))
            .await
            .unwrap()
            .json()
            .unwrap();

        assert_eq!(track["name"], "Song");
    }
}

#[tokio::test]
async fn refresh_token_grant_is_used_when_available() {
    let server = MockServer::start().await;
    mount_token(&server, "user-token", "refresh_token").await;

    Mock::given(method("GET"))
        .and(path("/v1/me"))
        .and(header("authorization", "Bearer user-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "someone" })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_builder(&server).refresh_token("refresh").build().unwrap();

    assert!(client.get("/me", RequestOptions::new()).await.is_ok());
}

#[tokio::test]
async fn empty_put_sends_zero_content_length() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/v1/me/player/pause"))
        .and(header("content-length", "0"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_builder(&server).access_token("cached").build().unwrap();

    let response = client
        .request(Method::PUT, "/me/player/pause", RequestOptions::new())
        .await
        .unwrap();

    assert_eq!(response.status(), 204);
    assert!(response.bytes().is_empty());
}

#[tokio::test]
async fn post_sends_json_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/playlists/xyz/tracks"))
        .and(header("content-type", "application/json"))
        .and(body_string_contains("spotify:track:1"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "snapshot_id": "snap" })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_builder(&server).access_token("cached").build().unwrap();

    let response = client
        .post(
            "/playlists/xyz/tracks",
            &json!({ "uris": ["spotify:track:1"] }),
            RequestOptions::new(),
        )
        .await
        .unwrap();

    assert_eq!(response.json::<serde_json::Value>().unwrap()["snapshot_id"], "snap");
}

#[tokio::test]
async fn rate_limit_is_waited_out() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/me"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "someone" })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_builder(&server).access_token("cached").build().unwrap();
    let started = std::time::Instant::now();

    assert!(client.get("/me", RequestOptions::new()).await.is_ok());
    assert!(started.elapsed() >= Duration::from_secs(1));
}

#[tokio::test]
async fn server_errors_exhaust_retries() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/me"))
        .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
        .expect(4)
        .mount(&server)
        .await;

    let client = client_builder(&server)
        .access_token("cached")
        .retry_5xx_amount(3)
        .build()
        .unwrap();

    let err = client.get("/me", RequestOptions::new()).await.unwrap_err();

    assert!(matches!(err, Error::RetriesExceeded { attempts: 3, .. }));
    assert_eq!(err.body(), Some("Service Unavailable"));
}

#[tokio::test]
async fn not_found_carries_the_url() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/tracks/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": { "status": 404, "message": "Non existing id" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_builder(&server).access_token("cached").build().unwrap();
    let err = client.get("/tracks/missing", RequestOptions::new()).await.unwrap_err();

    assert!(matches!(err, Error::NotFound { .. }));
    assert_eq!(
        err.url().map(|url| url.as_str().to_owned()),
        Some(format!("{}/v1/tracks/missing", server.uri()))
    );
}

#[tokio::test]
async fn invalid_client_is_an_auth_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_client",
            "error_description": "Invalid client"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_builder(&server).build().unwrap();
    let err = client.get("/me", RequestOptions::new()).await.unwrap_err();

    assert!(matches!(err, Error::Auth { .. }));
    assert!(err.to_string().contains("Invalid client"));
}

#[tokio::test]
async fn connection_failure_is_a_network_error() {
    // nothing listens on the discard port
    let client = SpotifyClientBuilder::new()
        .access_token("cached")
        .base_url("http://127.0.0.1:9/v1")
        .retry_5xx(false)
        .build()
        .unwrap();

    let err = client.get("/me", RequestOptions::new()).await.unwrap_err();

    assert!(matches!(err, Error::Network { .. }));
}
