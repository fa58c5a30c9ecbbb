//! End-to-end bridge tests: fatal startup on an empty catalog and the full
//! session → bind → invoke path through the facade.

use std::sync::Arc;

use capbridge::catalog::CapabilityDiscovery;
use capbridge::{
    Bridge, DiscoveryError, HttpTokenRefresher, SessionManager, TokenGrant, TokenRefresher,
    TokenSet,
};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn session_manager(server: &MockServer) -> Arc<SessionManager> {
    let refresher = HttpTokenRefresher::new(format!("{}/token", server.uri()), "test-client")
        .expect("refresher");
    Arc::new(SessionManager::new(
        Arc::new(refresher) as Arc<dyn TokenRefresher>
    ))
}

async fn bootstrap(server: &MockServer) -> Result<Bridge, DiscoveryError> {
    let discovery = CapabilityDiscovery::new(&server.uri())?;
    Bridge::bootstrap(session_manager(server), discovery, &server.uri()).await
}

#[tokio::test]
async fn bootstrap_fails_outright_on_an_empty_catalog() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/capabilities"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "capabilities": [] })))
        .mount(&server)
        .await;

    assert!(matches!(
        bootstrap(&server).await,
        Err(DiscoveryError::EmptyCatalog)
    ));
}

#[tokio::test]
async fn full_session_bind_invoke_path_through_the_facade() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/capabilities"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "capabilities": [{
            "name": "search_documents",
            "description": "Full-text search over the corpus",
            "input_schema": {
                "type": "object",
                "properties": { "query": { "type": "string" } },
                "required": ["query"]
            },
            "endpoint": "/rpc/search",
            "method": "POST",
            "requires_auth": true
        }] })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rpc/search"))
        .and(header("authorization", "Bearer live-access-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": ["doc-1"]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let bridge = bootstrap(&server).await.expect("one capability discovered");

    let listed = bridge.discover();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "search_documents");

    let session = bridge.create_session();
    let token_set = TokenSet::from_grant(
        "alice",
        TokenGrant {
            access_token: "live-access-token".into(),
            token_type: "Bearer".into(),
            expires_in: Some(3600),
            refresh_token: None,
            scope: Some("search".into()),
        },
    );
    bridge.bind_user(&session, "alice", token_set).await.unwrap();

    let result = bridge
        .invoke(&session, "search_documents", &json!({ "query": "rust" }))
        .await
        .unwrap();
    assert_eq!(result, json!({ "results": ["doc-1"] }));

    // Closing the session keeps the credential; a resumed session invokes
    // without re-authenticating.
    bridge.close_session(&session);
    let resumed = bridge.create_session();
    bridge.resume_user(&resumed, "alice").unwrap();
    assert!(bridge.resolve_credential(&resumed).await.is_ok());
}
