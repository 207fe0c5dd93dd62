//! Integration tests for the entitlement client using wiremock.
//!
//! These tests exercise the client against a mock entitlement service,
//! covering the query contract, payload decoding, failure isolation and
//! timeout handling.

use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use entitle_client::{fetch_all, ClientConfig, ClientError, EntitlementClient, EntitlementFetcher};
use entitle_core::{OrganizationalUnit, UnitId};

// =============================================================================
// Test Helpers
// =============================================================================

const TWO_APPS: &str = "<LIST><APPLI code='AGENDA'/><APPLI code='NOTES'/></LIST>";

fn create_client(server: &MockServer) -> EntitlementClient {
    let config = ClientConfig::new(format!("{}/products", server.uri()), "ENT")
        .with_request_timeout(2)
        .with_max_concurrent(4);
    EntitlementClient::new(config).unwrap()
}

async fn mount_unit(server: &MockServer, rne: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path("/products"))
        .and(query_param("appli", "ENT"))
        .and(query_param("rne", rne))
        .respond_with(response)
        .mount(server)
        .await;
}

// =============================================================================
// Single Fetch Tests
// =============================================================================

#[tokio::test]
async fn test_fetch_builds_record() {
    let server = MockServer::start().await;
    mount_unit(
        &server,
        "0123456A",
        ResponseTemplate::new(200).set_body_string(TWO_APPS),
    )
    .await;

    let client = create_client(&server);
    let unit = OrganizationalUnit::new("u1", "0123456A");

    let record = client.fetch(&unit).await.unwrap();
    assert_eq!(record.external_code, "0123456A");
    assert_eq!(record.codes().collect::<Vec<_>>(), vec!["AGENDA", "NOTES"]);
}

#[tokio::test]
async fn test_fetch_trims_external_code_in_query() {
    let server = MockServer::start().await;
    mount_unit(
        &server,
        "0123456A",
        ResponseTemplate::new(200).set_body_string("<LIST/>"),
    )
    .await;

    let client = create_client(&server);
    let unit = OrganizationalUnit::new("u1", " 0123456A ");

    let record = client.fetch(&unit).await.unwrap();
    assert!(record.is_empty());
}

#[tokio::test]
async fn test_fetch_server_error() {
    let server = MockServer::start().await;
    mount_unit(
        &server,
        "X",
        ResponseTemplate::new(500).set_body_string("Internal Server Error"),
    )
    .await;

    let client = create_client(&server);
    let err = client
        .fetch(&OrganizationalUnit::new("ux", "X"))
        .await
        .unwrap_err();

    match err {
        ClientError::Http { status, ref body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "Internal Server Error");
        }
        other => panic!("Expected HTTP error, got {other:?}"),
    }
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_fetch_malformed_payload() {
    let server = MockServer::start().await;
    mount_unit(
        &server,
        "0123456A",
        ResponseTemplate::new(200).set_body_string("<html><body>maintenance</body></html>"),
    )
    .await;

    let client = create_client(&server);
    let err = client
        .fetch(&OrganizationalUnit::new("u1", "0123456A"))
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::MalformedPayload { .. }));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_fetch_without_external_code() {
    let server = MockServer::start().await;
    let client = create_client(&server);

    let err = client
        .fetch(&OrganizationalUnit::without_code("u1"))
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::MissingExternalCode { .. }));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_fetch_timeout() {
    let server = MockServer::start().await;
    mount_unit(
        &server,
        "SLOW",
        ResponseTemplate::new(200)
            .set_body_string(TWO_APPS)
            .set_delay(Duration::from_secs(5)),
    )
    .await;

    let config =
        ClientConfig::new(format!("{}/products", server.uri()), "ENT").with_request_timeout(1);
    let client = EntitlementClient::new(config).unwrap();

    let err = client
        .fetch(&OrganizationalUnit::new("u1", "SLOW"))
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Timeout { timeout_secs: 1 }));
}

#[tokio::test]
async fn test_fetch_connection_refused() {
    let config = ClientConfig::new("http://127.0.0.1:1/products", "ENT");
    let client = EntitlementClient::new(config).unwrap();

    let err = client
        .fetch(&OrganizationalUnit::new("u1", "0123456A"))
        .await
        .unwrap_err();

    assert!(err.is_transient());
}

// =============================================================================
// Fan-out Tests
// =============================================================================

#[tokio::test]
async fn test_fetch_all_isolates_failures() {
    let server = MockServer::start().await;
    mount_unit(
        &server,
        "0123456A",
        ResponseTemplate::new(200).set_body_string(TWO_APPS),
    )
    .await;
    mount_unit(
        &server,
        "0654321B",
        ResponseTemplate::new(200).set_body_string("<LIST><APPLI code='TEXTES'/></LIST>"),
    )
    .await;
    mount_unit(&server, "X", ResponseTemplate::new(500)).await;

    let client = create_client(&server);
    let units = vec![
        OrganizationalUnit::new("u1", "0123456A"),
        OrganizationalUnit::new("u2", "0654321B"),
        OrganizationalUnit::new("u3", "X"),
        OrganizationalUnit::without_code("u4"),
    ];

    let outcome = fetch_all(&client, &units).await;

    assert_eq!(outcome.records.len(), 2);
    assert!(outcome.records[&UnitId::from("u1")].has_application("NOTES"));
    assert!(outcome.records[&UnitId::from("u2")].has_application("TEXTES"));
    assert!(!outcome.records.contains_key(&UnitId::from("u3")));

    assert_eq!(
        outcome.active.iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["0123456A", "0654321B"]
    );

    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].external_code, "X");
    assert_eq!(outcome.skipped, vec![UnitId::from("u4")]);

    // One request per queried unit.
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_fetch_all_bounded_concurrency_completes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/products"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<LIST><APPLI code='AGENDA'/></LIST>")
                .set_delay(Duration::from_millis(50)),
        )
        .mount(&server)
        .await;

    let config =
        ClientConfig::new(format!("{}/products", server.uri()), "ENT").with_max_concurrent(2);
    let client = EntitlementClient::new(config).unwrap();

    let units: Vec<_> = (0..10)
        .map(|i| OrganizationalUnit::new(format!("u{i}"), format!("UAI{i}")))
        .collect();

    let outcome = fetch_all(&client, &units).await;

    assert_eq!(outcome.records.len(), 10);
    assert!(outcome.failed.is_empty());
    assert_eq!(client.available_permits(), 2);
}
