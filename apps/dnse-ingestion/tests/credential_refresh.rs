//! Credential Refresh Integration Tests
//!
//! Runs the session's reconnect watch against a mock HTTP auth service.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use dnse_ingestion::application::services::WatchOutcome;
use dnse_ingestion::{
    CredentialStore, HttpAuthClient, RefreshConfig, SessionManager, SubscriptionRegistry,
    UpstreamError, UpstreamPort, establish_credential,
};

struct FlagUpstream(AtomicBool);

impl UpstreamPort for FlagUpstream {
    fn is_connected(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn subscribe(&self, _: &str) -> Result<(), UpstreamError> {
        Ok(())
    }

    fn unsubscribe(&self, _: &[String]) -> Result<(), UpstreamError> {
        Ok(())
    }
}

async fn mount_auth(server: &MockServer, token: &str, investor_id: &str) {
    Mock::given(method("POST"))
        .and(path("/api/auth"))
        .and(body_json(serde_json::json!({"username": "user", "password": "pass"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": token})))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/me"))
        .and(header("authorization", format!("Bearer {token}").as_str()))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"investorId": investor_id})),
        )
        .mount(server)
        .await;
}

async fn session_against(server: &MockServer) -> (Arc<SessionManager>, Arc<FlagUpstream>) {
    let auth = HttpAuthClient::new(server.uri(), Duration::from_secs(2)).unwrap();
    let credential = establish_credential(&auth, "user", "pass").await.unwrap();
    let session = Arc::new(SessionManager::new(
        Arc::new(SubscriptionRegistry::new()),
        Arc::new(CredentialStore::new(credential)),
        Arc::new(auth),
        RefreshConfig {
            timeout: Duration::from_millis(150),
            poll_interval: Duration::from_millis(20),
        },
        CancellationToken::new(),
    ));
    let upstream = Arc::new(FlagUpstream(AtomicBool::new(false)));
    session.attach(Arc::clone(&upstream) as Arc<dyn UpstreamPort>);
    (session, upstream)
}

#[tokio::test]
async fn startup_resolves_identity_from_first_token() {
    let server = MockServer::start().await;
    mount_auth(&server, "first", "0001234").await;

    let (session, _upstream) = session_against(&server).await;

    let credentials = session.credentials();
    assert_eq!(credentials.investor_id(), "0001234");
    assert_eq!(credentials.token(), "first");
    assert_eq!(credentials.generation(), 0);
}

#[tokio::test]
async fn unrecovered_session_gets_fresh_token() {
    let server = MockServer::start().await;
    mount_auth(&server, "first", "0001234").await;
    let (session, _upstream) = session_against(&server).await;

    server.reset().await;
    mount_auth(&server, "second", "0001234").await;

    assert_eq!(session.watch_reconnect().await, WatchOutcome::Refreshed);
    assert_eq!(session.credentials().token(), "second");
    assert_eq!(session.credentials().generation(), 1);
}

#[tokio::test]
async fn token_for_another_investor_is_rejected() {
    let server = MockServer::start().await;
    mount_auth(&server, "first", "0001234").await;
    let (session, _upstream) = session_against(&server).await;

    server.reset().await;
    mount_auth(&server, "foreign", "0009999").await;

    assert_eq!(session.watch_reconnect().await, WatchOutcome::RefreshFailed);
    assert_eq!(session.credentials().token(), "first");
    assert_eq!(session.credentials().investor_id(), "0001234");
    assert_eq!(session.credentials().generation(), 0);
}

#[tokio::test]
async fn auth_outage_keeps_stale_token() {
    let server = MockServer::start().await;
    mount_auth(&server, "first", "0001234").await;
    let (session, _upstream) = session_against(&server).await;

    server.reset().await;
    Mock::given(method("POST"))
        .and(path("/api/auth"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    assert_eq!(session.watch_reconnect().await, WatchOutcome::RefreshFailed);
    assert_eq!(session.credentials().token(), "first");
}

#[tokio::test]
async fn recovery_within_timeout_skips_refresh() {
    let server = MockServer::start().await;
    mount_auth(&server, "first", "0001234").await;
    let (session, upstream) = session_against(&server).await;

    server.reset().await;
    Mock::given(method("POST"))
        .and(path("/api/auth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": "x"})))
        .expect(0)
        .mount(&server)
        .await;

    let watch = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.watch_reconnect().await })
    };
    tokio::time::sleep(Duration::from_millis(40)).await;
    upstream.0.store(true, Ordering::SeqCst);
    session.on_connected();

    assert_eq!(watch.await.unwrap(), WatchOutcome::Recovered);
    assert_eq!(session.credentials().token(), "first");
}
