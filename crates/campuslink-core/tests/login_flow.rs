//! Login handshake against a mock CAS provider.

mod common;

use std::sync::Arc;
use std::time::Duration;

use campuslink_core::{AuthError, LoginStep, Profile, TokenService};
use futures::future::join_all;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::*;

fn li() -> Profile {
    Profile {
        name: "Li".to_string(),
        schoolid: "24182104".to_string(),
    }
}

#[tokio::test]
async fn test_login_success_returns_profile_and_token() {
    let server = MockServer::start().await;
    mount_handshake(&server, login_page(""), 1).await;
    mount_status(&server, status_ok("Li", "24182104")).await;

    let flow = mock_flow(&server);
    let outcome = flow.login("u1", "p1").await.expect("login succeeds");

    assert_eq!(outcome.profile, li());
    assert!(!outcome.reused);
    assert_eq!(
        TokenService::peek_subject_unsafe(&outcome.token.token).as_deref(),
        Some("u1")
    );

    let session = flow
        .store()
        .resolve_token(&outcome.token.token)
        .expect("token resolves to the new session");
    assert_eq!(session.identity(), "u1");
    assert_eq!(session.profile(), &li());
    assert_eq!(flow.store().open_transports(), 1);
}

#[tokio::test]
async fn test_login_rejected_credentials_surface_banner() {
    let server = MockServer::start().await;
    mount_handshake(
        &server,
        login_page(r#"<span class="tip-text">密码错误</span>"#),
        1,
    )
    .await;
    mount_status(&server, status_rejected()).await;

    let flow = mock_flow(&server);
    let err = flow.login("u1", "wrong").await.unwrap_err();

    assert!(matches!(err, AuthError::Credentials(ref msg) if msg == "密码错误"));
    assert!(flow.store().is_empty());
    assert_eq!(flow.store().open_transports(), 0);
}

#[tokio::test]
async fn test_login_without_banner_is_verification_error() {
    let server = MockServer::start().await;
    mount_handshake(&server, login_page(""), 1).await;
    mount_status(&server, ResponseTemplate::new(500)).await;

    let flow = mock_flow(&server);
    let err = flow.login("u1", "p1").await.unwrap_err();

    assert!(matches!(err, AuthError::Verification { ref username } if username == "u1"));
    assert!(flow.store().is_empty());
    assert_eq!(flow.store().open_transports(), 0);
}

#[tokio::test]
async fn test_login_page_without_execution_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LOGIN_PATH))
        .respond_with(html("<html><body>系统维护中</body></html>"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(html(""))
        .expect(0)
        .mount(&server)
        .await;

    let flow = mock_flow(&server);
    let err = flow.login("u1", "p1").await.unwrap_err();

    assert!(matches!(
        err,
        AuthError::Protocol { step: LoginStep::LoginPage, ref username, .. } if username == "u1"
    ));
    assert_eq!(flow.store().open_transports(), 0);
}

#[tokio::test]
async fn test_login_page_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LOGIN_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .mount(&server)
        .await;

    let flow = mock_flow(&server);
    let err = flow.login("u1", "p1").await.unwrap_err();

    match err {
        AuthError::Protocol { step, message, .. } => {
            assert_eq!(step, LoginStep::LoginPage);
            assert!(message.contains("503"));
            assert!(message.contains("upstream unavailable"));
        }
        other => panic!("expected protocol error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_slow_provider_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LOGIN_PATH))
        .respond_with(html(login_page("")).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let flow = mock_flow_with(
        &server,
        session_config(Duration::from_secs(1800), Duration::from_millis(200)),
    );
    let started = std::time::Instant::now();
    let err = flow.login("u1", "p1").await.unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(matches!(err, AuthError::Protocol { step: LoginStep::LoginPage, .. }));
    assert_eq!(flow.store().open_transports(), 0);
}

#[tokio::test]
async fn test_second_login_reuses_verified_session() {
    let server = MockServer::start().await;
    // Exactly one handshake for two logins
    mount_handshake(&server, login_page(""), 1).await;
    Mock::given(method("GET"))
        .and(path(STATUS_PATH))
        .respond_with(status_ok("Li", "24182104"))
        .expect(2)
        .mount(&server)
        .await;

    let flow = mock_flow(&server);
    let first = flow.login("u1", "p1").await.expect("first login");
    let second = flow.login("u1", "p1").await.expect("second login");

    assert!(!first.reused);
    assert!(second.reused);
    assert_eq!(first.profile, second.profile);
    assert_ne!(first.token.token_id, second.token.token_id);
    assert!(flow.store().resolve_token(&first.token.token).is_some());
    assert!(flow.store().resolve_token(&second.token.token).is_some());
    assert_eq!(flow.store().len(), 1);
}

#[tokio::test]
async fn test_stale_session_is_dropped_and_login_retried() {
    let server = MockServer::start().await;
    mount_handshake(&server, login_page(""), 2).await;
    // First verification succeeds; everything after is rejected
    Mock::given(method("GET"))
        .and(path(STATUS_PATH))
        .respond_with(status_ok("Li", "24182104"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_status(&server, status_rejected()).await;

    let flow = mock_flow(&server);
    let first = flow.login("u1", "p1").await.expect("first login");

    let err = flow.login("u1", "p1").await.unwrap_err();
    assert!(matches!(err, AuthError::Verification { .. }));
    assert!(flow.store().is_empty());
    assert!(flow.store().resolve_token(&first.token.token).is_none());
    assert_eq!(flow.store().open_transports(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_logins_leave_one_session() {
    let server = MockServer::start().await;
    mount_handshake(&server, login_page(""), 1).await;
    mount_status(&server, status_ok("Li", "24182104")).await;

    let flow = Arc::new(mock_flow(&server));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let flow = Arc::clone(&flow);
            tokio::spawn(async move { flow.login("u1", "p1").await })
        })
        .collect();

    let outcomes: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.expect("task did not panic").expect("login succeeds"))
        .collect();

    assert_eq!(outcomes.iter().filter(|o| !o.reused).count(), 1);
    assert!(outcomes.iter().all(|o| o.profile == li()));
    assert_eq!(flow.store().len(), 1);
    assert_eq!(flow.store().open_transports(), 1);
    for outcome in &outcomes {
        assert!(flow.store().resolve_token(&outcome.token.token).is_some());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_commits_release_losing_transports() {
    let server = MockServer::start().await;
    let flow = mock_flow(&server);
    let store = Arc::clone(flow.store());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let candidate = store.prepare("u1").expect("prepare");
                tokio::task::yield_now().await;
                store.commit(candidate, li()).id()
            })
        })
        .collect();
    let ids: Vec<u64> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.expect("task did not panic"))
        .collect();

    assert_eq!(store.len(), 1);
    assert_eq!(store.open_transports(), 1);
    let visible = store.get("u1").expect("one session visible");
    assert!(ids.contains(&visible.id()));
}

#[tokio::test]
async fn test_refresh_status_renews_or_invalidates() {
    let server = MockServer::start().await;
    mount_handshake(&server, login_page(""), 1).await;
    Mock::given(method("GET"))
        .and(path(STATUS_PATH))
        .respond_with(status_ok("Li", "24182104"))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    mount_status(&server, status_rejected()).await;

    let flow = mock_flow(&server);
    let outcome = flow.login("u1", "p1").await.expect("login");
    let session = flow.store().resolve_token(&outcome.token.token).expect("session");

    let profile = flow.refresh_status(&session).await.expect("still valid");
    assert_eq!(profile, li());

    let err = flow.refresh_status(&session).await.unwrap_err();
    assert!(matches!(err, AuthError::Verification { .. }));
    assert!(flow.store().resolve_token(&outcome.token.token).is_none());
}

#[tokio::test]
async fn test_refresh_of_replaced_session_keeps_newer_one() {
    let server = MockServer::start().await;
    mount_handshake(&server, login_page(""), 1).await;
    Mock::given(method("GET"))
        .and(path(STATUS_PATH))
        .respond_with(status_ok("Li", "24182104"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_status(&server, status_rejected()).await;

    let flow = mock_flow(&server);
    let outcome = flow.login("u1", "p1").await.expect("login");
    let stale = flow.store().resolve_token(&outcome.token.token).expect("session");

    flow.store().invalidate("u1");
    let candidate = flow.store().prepare("u1").expect("prepare");
    let (fresh, fresh_token) = flow
        .store()
        .commit_with_token(candidate, li())
        .expect("commit");

    let err = flow.refresh_status(&stale).await.unwrap_err();
    assert!(matches!(err, AuthError::Verification { .. }));

    let visible = flow.store().get("u1").expect("newer session still visible");
    assert_eq!(visible.id(), fresh.id());
    let resolved = flow
        .store()
        .resolve_token(&fresh_token.token)
        .expect("newer token still resolves");
    assert_eq!(resolved.id(), fresh.id());
}
