//! Mock CAS provider shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use campuslink_core::{
    HttpTimeouts, LoginFlow, ProviderEndpoints, SessionConfig, SessionStore, TokenConfig,
    TokenService, TunnelCipher,
};
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TEST_SECRET: &str = "0123456789abcdef0123456789abcdef";
pub const LOGIN_PATH: &str = "/authserver/login";
pub const LANDING_PATH: &str = "/portal/login";
pub const STATUS_PATH: &str = "/portal/api/status";
pub const EXECUTION: &str = "exec123";

pub fn login_page(extra: &str) -> String {
    format!(
        r#"<html><body><form id="casLoginForm" method="post">
<input type="text" name="username"/>
<input type="password" name="password"/>
<input type="hidden" name="execution" value="{EXECUTION}"/>
{extra}
</form></body></html>"#
    )
}

pub fn html(body: impl Into<String>) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.into(), "text/html; charset=utf-8")
}

pub fn status_ok(name: &str, schoolid: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "code": 0,
        "data": { "name": name, "schoolid": schoolid }
    }))
}

pub fn status_rejected() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "code": 1 }))
}

pub fn endpoints(server: &MockServer) -> ProviderEndpoints {
    ProviderEndpoints {
        login_url: format!("{}{}", server.uri(), LOGIN_PATH),
        landing_url: format!("{}{}", server.uri(), LANDING_PATH),
        status_url: format!("{}{}", server.uri(), STATUS_PATH),
    }
}

pub fn session_config(ttl: Duration, request_timeout: Duration) -> SessionConfig {
    SessionConfig {
        ttl,
        sweep_interval: Duration::from_secs(60),
        timeouts: HttpTimeouts {
            connect: Duration::from_secs(2),
            request: request_timeout,
        },
    }
}

pub fn mock_flow_with(server: &MockServer, config: SessionConfig) -> LoginFlow {
    let tokens = TokenService::new(&TokenConfig::new(TEST_SECRET));
    let store = Arc::new(SessionStore::new(&config, tokens));
    LoginFlow::new(store, TunnelCipher::disabled(), endpoints(server))
}

pub fn mock_flow(server: &MockServer) -> LoginFlow {
    mock_flow_with(
        server,
        session_config(Duration::from_secs(1800), Duration::from_secs(5)),
    )
}

/// Login page, credential POST and landing page, each expected `times` times
pub async fn mount_handshake(server: &MockServer, page: String, times: u64) {
    Mock::given(method("GET"))
        .and(path(LOGIN_PATH))
        .respond_with(html(page))
        .expect(times)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .and(body_string_contains(format!("execution={EXECUTION}")))
        .respond_with(html("<html>redirecting</html>"))
        .expect(times)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(LANDING_PATH))
        .respond_with(html("<html>welcome</html>"))
        .expect(times)
        .mount(server)
        .await;
}

pub async fn mount_status(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(STATUS_PATH))
        .respond_with(response)
        .mount(server)
        .await;
}
