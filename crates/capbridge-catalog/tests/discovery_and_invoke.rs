//! Discovery and invocation integration tests against a mock backend:
//! per-entry drop isolation, empty-catalog fatality, atomic catalog
//! replacement, and the full invoke path including credential forwarding.

use std::sync::Arc;

use capbridge_auth::{HttpTokenRefresher, SessionManager, TokenGrant, TokenRefresher, TokenSet};
use capbridge_catalog::{
    CapabilityCatalog, CapabilityDescriptor, CapabilityDiscovery, CatalogHandle, DiscoveryError,
    HttpMethod, InvocationError, InvocationRouter,
};
use serde_json::{Value, json};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn search_capability(requires_auth: bool) -> Value {
    json!({
        "name": "search_documents",
        "description": "Full-text search over the corpus",
        "input_schema": {
            "type": "object",
            "properties": { "query": { "type": "string" } },
            "required": ["query"],
            "additionalProperties": false
        },
        "endpoint": "/rpc/search",
        "method": "POST",
        "requires_auth": requires_auth
    })
}

async fn mount_capabilities(server: &MockServer, entries: Value) {
    Mock::given(method("GET"))
        .and(path("/capabilities"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "capabilities": entries })),
        )
        .mount(server)
        .await;
}

async fn bootstrap(server: &MockServer) -> Result<CatalogHandle, DiscoveryError> {
    CatalogHandle::bootstrap(CapabilityDiscovery::new(&server.uri())?).await
}

fn session_manager(server: &MockServer) -> Arc<SessionManager> {
    let refresher = HttpTokenRefresher::new(format!("{}/token", server.uri()), "test-client")
        .expect("refresher");
    Arc::new(SessionManager::new(
        Arc::new(refresher) as Arc<dyn TokenRefresher>
    ))
}

fn live_set(user_id: &str) -> TokenSet {
    TokenSet::from_grant(
        user_id,
        TokenGrant {
            access_token: "live-access-token".into(),
            token_type: "Bearer".into(),
            expires_in: Some(3600),
            refresh_token: None,
            scope: Some("search".into()),
        },
    )
}

#[tokio::test]
async fn malformed_entries_are_dropped_without_aborting_discovery() {
    let server = MockServer::start().await;
    mount_capabilities(
        &server,
        json!([
            search_capability(false),
            // No input_schema: dropped, not fatal.
            {
                "name": "broken_capability",
                "description": "missing its schema",
                "endpoint": "/rpc/broken"
            }
        ]),
    )
    .await;

    let handle = bootstrap(&server).await.expect("one usable entry remains");
    let catalog = handle.load();
    assert_eq!(catalog.len(), 1);
    assert!(catalog.get("search_documents").is_some());
    assert!(catalog.get("broken_capability").is_none());
}

#[tokio::test]
async fn discovery_parses_the_wrapped_capabilities_document() {
    let server = MockServer::start().await;
    mount_capabilities(&server, json!([search_capability(true)])).await;

    let handle = bootstrap(&server).await.expect("wrapped document parses");
    let catalog = handle.load();
    assert_eq!(catalog.len(), 1);
    let registered = catalog.get("search_documents").expect("entry registered");
    assert!(registered.descriptor.requires_auth);
    assert_eq!(registered.descriptor.endpoint, "/rpc/search");
}

#[tokio::test]
async fn bare_array_body_is_rejected_as_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/capabilities"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([search_capability(false)])))
        .mount(&server)
        .await;

    assert!(matches!(
        bootstrap(&server).await,
        Err(DiscoveryError::InvalidBody(_))
    ));
}

#[tokio::test]
async fn empty_capability_list_is_fatal_at_bootstrap() {
    let server = MockServer::start().await;
    mount_capabilities(&server, json!([])).await;

    assert!(matches!(
        bootstrap(&server).await,
        Err(DiscoveryError::EmptyCatalog)
    ));
}

#[tokio::test]
async fn all_entries_dropped_is_fatal_at_bootstrap() {
    let server = MockServer::start().await;
    mount_capabilities(
        &server,
        json!([
            { "name": "a" },
            { "description": "nameless" }
        ]),
    )
    .await;

    assert!(matches!(
        bootstrap(&server).await,
        Err(DiscoveryError::NoUsableCapabilities(2))
    ));
}

#[tokio::test]
async fn unreachable_discovery_endpoint_is_fatal_at_bootstrap() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/capabilities"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    assert!(matches!(
        bootstrap(&server).await,
        Err(DiscoveryError::Http(_))
    ));
}

#[tokio::test]
async fn catalog_replacement_is_atomic_under_concurrent_readers() {
    let server = MockServer::start().await;
    mount_capabilities(&server, json!([search_capability(false)])).await;
    let handle = Arc::new(bootstrap(&server).await.unwrap());

    fn generation(size: usize) -> Vec<CapabilityDescriptor> {
        (0..size)
            .map(|i| CapabilityDescriptor {
                name: format!("cap_{size}_{i}"),
                description: format!("member of the size-{size} generation"),
                input_schema: json!({ "type": "object" }),
                endpoint: format!("/rpc/cap_{size}_{i}"),
                method: HttpMethod::Post,
                requires_auth: false,
            })
            .collect()
    }

    handle.replace(CapabilityCatalog::compile(generation(3)).unwrap());

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let handle = Arc::clone(&handle);
            tokio::spawn(async move {
                for _ in 0..200 {
                    let snapshot = handle.load();
                    // A snapshot is a complete generation: its entries all
                    // carry the generation's size in their names.
                    let len = snapshot.len();
                    assert!(len == 3 || len == 5, "torn catalog of {len} entries");
                    for descriptor in snapshot.descriptors() {
                        assert!(descriptor.name.starts_with(&format!("cap_{len}_")));
                    }
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    for _ in 0..50 {
        handle.replace(CapabilityCatalog::compile(generation(5)).unwrap());
        tokio::task::yield_now().await;
        handle.replace(CapabilityCatalog::compile(generation(3)).unwrap());
        tokio::task::yield_now().await;
    }

    for reader in readers {
        reader.await.unwrap();
    }
}

#[tokio::test]
async fn invoke_forwards_validated_arguments_and_returns_backend_json() {
    let server = MockServer::start().await;
    mount_capabilities(&server, json!([search_capability(false)])).await;
    Mock::given(method("POST"))
        .and(path("/rpc/search"))
        .and(body_json(json!({ "query": "rust" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": ["doc-1", "doc-2"]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let handle = Arc::new(bootstrap(&server).await.unwrap());
    let sessions = session_manager(&server);
    let router = InvocationRouter::new(handle, Arc::clone(&sessions), &server.uri()).unwrap();

    let session = sessions.create_session();
    let result = router
        .invoke(&session, "search_documents", &json!({ "query": "rust" }))
        .await
        .unwrap();
    assert_eq!(result, json!({ "results": ["doc-1", "doc-2"] }));
}

#[tokio::test]
async fn authenticated_capability_carries_the_bearer_credential() {
    let server = MockServer::start().await;
    mount_capabilities(&server, json!([search_capability(true)])).await;
    Mock::given(method("POST"))
        .and(path("/rpc/search"))
        .and(header("authorization", "Bearer live-access-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let handle = Arc::new(bootstrap(&server).await.unwrap());
    let sessions = session_manager(&server);
    let router = InvocationRouter::new(handle, Arc::clone(&sessions), &server.uri()).unwrap();

    let session = sessions.create_session();
    sessions
        .bind_user(&session, "alice", live_set("alice"))
        .await
        .unwrap();

    router
        .invoke(&session, "search_documents", &json!({ "query": "rust" }))
        .await
        .expect("authenticated invoke succeeds");
}

#[tokio::test]
async fn unauthenticated_session_is_rejected_before_the_backend_is_contacted() {
    let server = MockServer::start().await;
    mount_capabilities(&server, json!([search_capability(true)])).await;
    Mock::given(method("POST"))
        .and(path("/rpc/search"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let handle = Arc::new(bootstrap(&server).await.unwrap());
    let sessions = session_manager(&server);
    let router = InvocationRouter::new(handle, Arc::clone(&sessions), &server.uri()).unwrap();

    let session = sessions.create_session();
    let result = router
        .invoke(&session, "search_documents", &json!({ "query": "rust" }))
        .await;
    assert!(matches!(
        result,
        Err(InvocationError::AuthenticationRequired(_))
    ));
}

#[tokio::test]
async fn invalid_arguments_never_reach_the_backend() {
    let server = MockServer::start().await;
    mount_capabilities(&server, json!([search_capability(false)])).await;
    Mock::given(method("POST"))
        .and(path("/rpc/search"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let handle = Arc::new(bootstrap(&server).await.unwrap());
    let sessions = session_manager(&server);
    let router = InvocationRouter::new(handle, Arc::clone(&sessions), &server.uri()).unwrap();

    let session = sessions.create_session();
    let result = router
        .invoke(&session, "search_documents", &json!({ "query": 42 }))
        .await;
    match result {
        Err(InvocationError::InvalidArguments {
            capability,
            details,
        }) => {
            assert_eq!(capability, "search_documents");
            assert!(!details.is_empty());
        }
        other => panic!("expected InvalidArguments, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_capability_is_rejected() {
    let server = MockServer::start().await;
    mount_capabilities(&server, json!([search_capability(false)])).await;

    let handle = Arc::new(bootstrap(&server).await.unwrap());
    let sessions = session_manager(&server);
    let router = InvocationRouter::new(handle, Arc::clone(&sessions), &server.uri()).unwrap();

    let session = sessions.create_session();
    let result = router.invoke(&session, "no_such_capability", &json!({})).await;
    assert!(matches!(
        result,
        Err(InvocationError::UnknownCapability(name)) if name == "no_such_capability"
    ));
}

#[tokio::test]
async fn backend_failures_map_to_the_error_taxonomy() {
    let server = MockServer::start().await;
    mount_capabilities(&server, json!([search_capability(false)])).await;
    Mock::given(method("POST"))
        .and(path("/rpc/search"))
        .and(body_json(json!({ "query": "flaky" })))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rpc/search"))
        .and(body_json(json!({ "query": "missing" })))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such corpus"))
        .mount(&server)
        .await;

    let handle = Arc::new(bootstrap(&server).await.unwrap());
    let sessions = session_manager(&server);
    let router = InvocationRouter::new(handle, Arc::clone(&sessions), &server.uri()).unwrap();
    let session = sessions.create_session();

    let result = router
        .invoke(&session, "search_documents", &json!({ "query": "flaky" }))
        .await;
    assert!(matches!(
        result,
        Err(InvocationError::BackendUnavailable(_))
    ));

    let result = router
        .invoke(&session, "search_documents", &json!({ "query": "missing" }))
        .await;
    match result {
        Err(InvocationError::Backend { status, message }) => {
            assert_eq!(status, 404);
            assert!(message.contains("no such corpus"));
        }
        other => panic!("expected Backend error, got {other:?}"),
    }
}

#[tokio::test]
async fn backend_unauthorized_demands_reauthentication() {
    let server = MockServer::start().await;
    mount_capabilities(&server, json!([search_capability(true)])).await;
    Mock::given(method("POST"))
        .and(path("/rpc/search"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let handle = Arc::new(bootstrap(&server).await.unwrap());
    let sessions = session_manager(&server);
    let router = InvocationRouter::new(handle, Arc::clone(&sessions), &server.uri()).unwrap();

    let session = sessions.create_session();
    sessions
        .bind_user(&session, "alice", live_set("alice"))
        .await
        .unwrap();

    let result = router
        .invoke(&session, "search_documents", &json!({ "query": "rust" }))
        .await;
    assert!(matches!(
        result,
        Err(InvocationError::AuthenticationRequired(_))
    ));
}

#[tokio::test]
async fn get_capabilities_forward_arguments_as_query_parameters() {
    let server = MockServer::start().await;
    mount_capabilities(
        &server,
        json!([{
            "name": "get_status",
            "description": "Read-only status probe",
            "input_schema": {
                "type": "object",
                "properties": { "component": { "type": "string" } },
                "required": ["component"]
            },
            "endpoint": "/rpc/status",
            "method": "GET",
            "requires_auth": false
        }]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/rpc/status"))
        .and(wiremock::matchers::query_param("component", "catalog"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "healthy": true })))
        .expect(1)
        .mount(&server)
        .await;

    let handle = Arc::new(bootstrap(&server).await.unwrap());
    let sessions = session_manager(&server);
    let router = InvocationRouter::new(handle, Arc::clone(&sessions), &server.uri()).unwrap();

    let session = sessions.create_session();
    let result = router
        .invoke(&session, "get_status", &json!({ "component": "catalog" }))
        .await
        .unwrap();
    assert_eq!(result, json!({ "healthy": true }));
}
