//! Verification-gate behavior over HTTP: the authenticator wiring, the
//! public-path rule table, gate rejections with their status codes and
//! error bodies, and the greeting endpoint reading the ambient identity.

use std::net::SocketAddr;

use anyhow::Result;
use axum::{middleware, routing::get, Extension, Router};
use gatehouse::config::ServerConfig;
use gatehouse::gate::GatePolicy;
use gatehouse::server::{app, verify_gate, AppState};
use gatehouse::subject::{IdentityRecord, Subject, SubjectEntry};

/// Bind an ephemeral port and serve the router in the background.
async fn serve(router: Router) -> Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, router).await {
            eprintln!("test server error: {}", err);
        }
    });
    Ok(addr)
}

/// Serve the full demo stack (authenticator + gate + routes).
async fn serve_demo(cfg: &ServerConfig) -> Result<SocketAddr> {
    serve(app(AppState::new(cfg))).await
}

/// Serve a bare route behind the gate only, with an optional subject
/// injected the way an authenticator would. No subject layer at all means
/// the gate runs in a deployment where authentication was never wired in.
async fn serve_gated_route(policy: GatePolicy, subject: Option<Subject>) -> Result<SocketAddr> {
    let mut cfg = ServerConfig::default();
    cfg.policy = policy;
    let state = AppState::new(&cfg);
    let mut router = Router::new()
        .route("/gated", get(|| async { "gated ok" }))
        .layer(middleware::from_fn_with_state(state.clone(), verify_gate));
    if let Some(subject) = subject {
        router = router.layer(Extension(subject));
    }
    serve(router.with_state(state)).await
}

fn session_cookie_set(resp: &reqwest::Response, name: &str) -> bool {
    resp.headers()
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.starts_with(&format!("{}=", name)))
}

#[tokio::test]
async fn health_route_is_public() -> Result<()> {
    let addr = serve_demo(&ServerConfig::default()).await?;
    let resp = reqwest::get(format!("http://{}/", addr)).await?;
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(resp.text().await?, "gatehouse ok");
    Ok(())
}

#[tokio::test]
async fn unauthenticated_request_gets_basic_challenge() -> Result<()> {
    let addr = serve_demo(&ServerConfig::default()).await?;
    let resp = reqwest::get(format!("http://{}/hello", addr)).await?;
    assert_eq!(resp.status().as_u16(), 401);
    let www = resp
        .headers()
        .get(reqwest::header::WWW_AUTHENTICATE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    assert!(www.starts_with("Basic"), "expected Basic challenge, got '{}'", www);
    assert!(!session_cookie_set(&resp, "JSESSIONID"), "challenge must not issue a session");
    Ok(())
}

#[tokio::test]
async fn basic_login_reaches_hello_and_sets_session_cookie() -> Result<()> {
    let addr = serve_demo(&ServerConfig::default()).await?;
    let resp = reqwest::Client::new()
        .get(format!("http://{}/hello", addr))
        .basic_auth("user123", Some("pass123"))
        .send()
        .await?;
    assert_eq!(resp.status().as_u16(), 200);
    assert!(session_cookie_set(&resp, "JSESSIONID"), "login must set the session cookie");
    assert_eq!(resp.text().await?, "Greetings, user123");
    Ok(())
}

#[tokio::test]
async fn wrong_password_is_challenged() -> Result<()> {
    let addr = serve_demo(&ServerConfig::default()).await?;
    let resp = reqwest::Client::new()
        .get(format!("http://{}/hello", addr))
        .basic_auth("user123", Some("wrong"))
        .send()
        .await?;
    assert_eq!(resp.status().as_u16(), 401);
    assert!(!session_cookie_set(&resp, "JSESSIONID"));
    Ok(())
}

#[tokio::test]
async fn custom_public_path_bypasses_authentication() -> Result<()> {
    let mut cfg = ServerConfig::default();
    cfg.public_paths = vec!["/".to_string(), "/hello".to_string()];
    let addr = serve_demo(&cfg).await?;

    // No credentials: the stack is skipped entirely, and the handler then
    // has no identity to greet, which it reports as its own failure.
    let resp = reqwest::get(format!("http://{}/hello", addr)).await?;
    assert_eq!(resp.status().as_u16(), 500);
    let body: serde_json::Value = resp.json().await?;
    assert_eq!(body["error"], "no identity in request context");
    Ok(())
}

#[tokio::test]
async fn gate_without_authenticator_is_a_configuration_error() -> Result<()> {
    let addr = serve_gated_route(GatePolicy::RequireApplication, None).await?;
    let resp = reqwest::get(format!("http://{}/gated", addr)).await?;
    assert_eq!(resp.status().as_u16(), 500, "absent subject is the server's fault");
    let body: serde_json::Value = resp.json().await?;
    assert_eq!(body["status"], "error");
    assert_eq!(body["error"]["type"], "configuration");
    Ok(())
}

#[tokio::test]
async fn subject_without_application_identity_is_rejected_with_observed_entries() -> Result<()> {
    let subject = Subject::new(vec![
        SubjectEntry::Container(IdentityRecord::new("user123")),
        SubjectEntry::Foreign { scheme: "saml".into(), name: "cn=box".into() },
    ]);
    let addr = serve_gated_route(GatePolicy::RequireApplication, Some(subject)).await?;
    let resp = reqwest::get(format!("http://{}/gated", addr)).await?;
    assert_eq!(resp.status().as_u16(), 401);
    let body: serde_json::Value = resp.json().await?;
    assert_eq!(body["error"]["type"], "identity_missing");
    let observed = body["error"]["observed"]
        .as_array()
        .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect::<Vec<_>>())
        .unwrap_or_default();
    assert_eq!(observed.len(), 2, "every entry must be reported, got {:?}", observed);
    assert!(observed.contains(&"container(user123)".to_string()));
    assert!(observed.contains(&"foreign(saml:cn=box)".to_string()));
    Ok(())
}

#[tokio::test]
async fn empty_subject_is_identity_missing_not_configuration() -> Result<()> {
    let addr = serve_gated_route(GatePolicy::RequireApplication, Some(Subject::default())).await?;
    let resp = reqwest::get(format!("http://{}/gated", addr)).await?;
    assert_eq!(resp.status().as_u16(), 401);
    let body: serde_json::Value = resp.json().await?;
    assert_eq!(body["error"]["type"], "identity_missing");
    Ok(())
}

#[tokio::test]
async fn wrapped_application_identity_passes_the_gate() -> Result<()> {
    let subject = Subject::new(vec![SubjectEntry::wrapped(SubjectEntry::Application(
        IdentityRecord::new("user123"),
    ))]);
    let addr = serve_gated_route(GatePolicy::RequireApplication, Some(subject)).await?;
    let resp = reqwest::get(format!("http://{}/gated", addr)).await?;
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(resp.text().await?, "gated ok");
    Ok(())
}

#[tokio::test]
async fn doubly_wrapped_identity_is_not_recognized() -> Result<()> {
    let subject = Subject::new(vec![SubjectEntry::wrapped(SubjectEntry::wrapped(
        SubjectEntry::Application(IdentityRecord::new("user123")),
    ))]);
    let addr = serve_gated_route(GatePolicy::RequireApplication, Some(subject)).await?;
    let resp = reqwest::get(format!("http://{}/gated", addr)).await?;
    assert_eq!(resp.status().as_u16(), 401);
    let body: serde_json::Value = resp.json().await?;
    assert_eq!(body["error"]["type"], "identity_missing");
    Ok(())
}

#[tokio::test]
async fn paired_policy_rejects_the_lone_application_identity() -> Result<()> {
    let lone = Subject::new(vec![SubjectEntry::Application(IdentityRecord::new("user123"))]);
    let addr = serve_gated_route(GatePolicy::RequirePaired, Some(lone)).await?;
    let resp = reqwest::get(format!("http://{}/gated", addr)).await?;
    assert_eq!(resp.status().as_u16(), 401);
    let body: serde_json::Value = resp.json().await?;
    assert_eq!(body["error"]["type"], "ambiguous_identity");

    let paired = Subject::for_authenticated_user("user123");
    let addr = serve_gated_route(GatePolicy::RequirePaired, Some(paired)).await?;
    let resp = reqwest::get(format!("http://{}/gated", addr)).await?;
    assert_eq!(resp.status().as_u16(), 200);
    Ok(())
}

#[tokio::test]
async fn demo_stack_passes_the_paired_policy() -> Result<()> {
    // The demo authenticator establishes container + wrapped application,
    // which satisfies the stricter contract as well.
    let mut cfg = ServerConfig::default();
    cfg.policy = GatePolicy::RequirePaired;
    let addr = serve_demo(&cfg).await?;
    let resp = reqwest::Client::new()
        .get(format!("http://{}/hello", addr))
        .basic_auth("user123", Some("pass123"))
        .send()
        .await?;
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(resp.text().await?, "Greetings, user123");
    Ok(())
}
