use std::collections::HashMap;
use std::sync::Arc;

use ucp_domain::{CredentialKind, CredentialRecord};
use ucp_driver::{AwsPlaneDriver, AzurePlaneDriver, PlaneDriver, PlaneRequest};
use ucp_store::{CredentialStore, InMemoryStore};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn store_with_credential(record: CredentialRecord) -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::default());
    CredentialStore::put(store.as_ref(), &record).await.unwrap();
    store
}

#[tokio::test]
async fn aws_dispatch_signs_and_forwards_to_configured_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/resourceGroups/rg1/providers/AWS.S3/buckets/b1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "bucket-1"})))
        .mount(&server)
        .await;

    let store = store_with_credential(CredentialRecord {
        plane_name: "aws-prod".to_string(),
        cloud: "aws".to_string(),
        kind: CredentialKind::AccessKeyPair,
        data: serde_json::to_vec(&serde_json::json!({
            "access_key_id": "AKIDEXAMPLE",
            "secret_access_key": "secret",
        }))
        .unwrap(),
    })
    .await;

    let mut endpoints = HashMap::new();
    endpoints.insert("aws-prod".to_string(), server.uri());
    let driver = AwsPlaneDriver::new(reqwest::Client::new(), store, endpoints, "us-east-1".to_string());

    let response = driver
        .dispatch(
            "aws-prod",
            PlaneRequest {
                method: reqwest::Method::PUT,
                upstream_path: "/resourceGroups/rg1/providers/AWS.S3/buckets/b1".to_string(),
                headers: HashMap::new(),
                body: Some(serde_json::json!({"region": "us-east-1"})),
            },
        )
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body.unwrap()["id"], "bucket-1");
}

#[tokio::test]
async fn aws_dispatch_without_credentials_fails_fast() {
    let store = Arc::new(InMemoryStore::default());
    let driver = AwsPlaneDriver::new(reqwest::Client::new(), store, HashMap::new(), "us-east-1".to_string());

    let err = driver
        .dispatch(
            "aws-prod",
            PlaneRequest {
                method: reqwest::Method::GET,
                upstream_path: "/whatever".to_string(),
                headers: HashMap::new(),
                body: None,
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ucp_driver::DriverError::MissingCredentials(_)));
}

#[tokio::test]
async fn azure_dispatch_surfaces_structured_arm_error() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/subscriptions/sub1/resourceGroups/rg1/providers/Microsoft.Storage/storageAccounts/a1"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": {"code": "InvalidTemplate", "message": "bad sku"}
        })))
        .mount(&server)
        .await;

    let store = store_with_credential(CredentialRecord {
        plane_name: "azure-prod".to_string(),
        cloud: "azure".to_string(),
        kind: CredentialKind::ServicePrincipal,
        data: serde_json::to_vec(&serde_json::json!({"access_token": "tok"})).unwrap(),
    })
    .await;

    let mut endpoints = HashMap::new();
    endpoints.insert("azure-prod".to_string(), server.uri());
    let driver = AzurePlaneDriver::new(reqwest::Client::new(), store, endpoints);

    let err = driver
        .dispatch(
            "azure-prod",
            PlaneRequest {
                method: reqwest::Method::PUT,
                upstream_path:
                    "/subscriptions/sub1/resourceGroups/rg1/providers/Microsoft.Storage/storageAccounts/a1"
                        .to_string(),
                headers: HashMap::new(),
                body: Some(serde_json::json!({"sku": "bogus"})),
            },
        )
        .await
        .unwrap_err();

    match err {
        ucp_driver::DriverError::UpstreamError { status, body } => {
            assert_eq!(status, 400);
            assert!(body.contains("InvalidTemplate"));
        }
        other => panic!("expected UpstreamError, got {other:?}"),
    }
}
