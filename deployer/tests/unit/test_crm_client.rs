//! CRM client tests against a mock HTTP server

use std::sync::Arc;
use std::time::Duration;

use crmdeploy::authn::Credential;
use crmdeploy::dispatch::{DispatchOptions, Dispatcher};
use crmdeploy::errors::RemoteError;
use crmdeploy::http::HttpClient;
use crmdeploy::models::configuration::ObjectType;
use crmdeploy::remote::{CrmApi, CrmClient};
use httpmock::prelude::*;
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

use crate::common::{fields, property, TOKEN};

fn client(server: &MockServer) -> CrmClient {
    client_with(server, DispatchOptions::default())
}

fn client_with(server: &MockServer, options: DispatchOptions) -> CrmClient {
    let http = HttpClient::new(&server.base_url(), Duration::from_secs(5)).unwrap();
    CrmClient::new(http, Arc::new(Dispatcher::new(options)))
}

fn credential() -> Credential {
    Credential::new(TOKEN).unwrap()
}

#[tokio::test]
async fn test_connectivity_sends_bearer_token() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/account-info/v3/details")
                .header("authorization", format!("Bearer {TOKEN}"));
            then.status(200)
                .json_body(json!({ "portalId": 4242, "timeZone": "Europe/Berlin" }));
        })
        .await;

    let account = assert_ok!(client(&server).check_connectivity(&credential()).await);
    assert_eq!(account.portal_id, 4242);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_unauthorized_is_a_credential_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/account-info/v3/details");
            then.status(401).json_body(json!({
                "status": "error",
                "message": "Authentication credentials not found",
                "category": "INVALID_AUTHENTICATION"
            }));
        })
        .await;

    let err = assert_err!(client(&server).check_connectivity(&credential()).await);
    assert!(matches!(err, RemoteError::CredentialInvalid(_)));
}

#[tokio::test]
async fn test_created_property_uses_returned_name() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/crm/v3/properties/contacts")
                .json_body_partial(r#"{ "name": "plan", "groupName": "billing" }"#);
            then.status(201).json_body(json!({
                "name": "plan",
                "label": "Plan",
                "type": "string",
                "fieldType": "text",
                "groupName": "billing"
            }));
        })
        .await;

    let created = assert_ok!(
        client(&server)
            .create_property(&credential(), &property("plan", Some("billing")))
            .await
    );
    assert_eq!(created.remote_id, "plan");
    assert!(!created.existed);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_conflict_is_adopted_as_existing() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/crm/v3/properties/contacts");
            then.status(409).json_body(json!({
                "status": "error",
                "message": "A property named 'plan' already exists.",
                "category": "OBJECT_ALREADY_EXISTS"
            }));
        })
        .await;

    let created = assert_ok!(
        client(&server)
            .create_property(&credential(), &property("plan", None))
            .await
    );
    assert_eq!(created.remote_id, "plan");
    assert!(created.existed);
}

#[tokio::test]
async fn test_batch_reports_each_item() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/crm/v3/properties/contacts/batch/create");
            then.status(207).json_body(json!({
                "status": "COMPLETE",
                "results": [
                    { "name": "field_0", "label": "field 0", "type": "string", "fieldType": "text" }
                ],
                "errors": [
                    {
                        "status": "error",
                        "category": "OBJECT_ALREADY_EXISTS",
                        "message": "already exists",
                        "context": { "name": ["field_1"] }
                    },
                    {
                        "status": "error",
                        "category": "VALIDATION_ERROR",
                        "message": "invalid option",
                        "context": { "propertyName": ["field_2"] }
                    }
                ]
            }));
        })
        .await;

    let results = assert_ok!(
        client(&server)
            .create_properties_batch(&credential(), ObjectType::Contacts, &fields(3))
            .await
    );

    assert_eq!(results.len(), 3);
    assert!(results[0].result.as_ref().is_ok_and(|c| !c.existed));
    assert!(results[1].result.as_ref().is_ok_and(|c| c.existed));
    assert!(matches!(results[2].result, Err(RemoteError::Validation(_))));
}

#[tokio::test]
async fn test_missing_entities() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(DELETE).path("/crm/v3/properties/contacts/plan");
            then.status(404);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/crm/v3/properties/contacts/plan");
            then.status(404);
        })
        .await;

    let client = client(&server);
    let err = assert_err!(
        client
            .delete_property(&credential(), ObjectType::Contacts, "plan")
            .await
    );
    assert!(err.is_not_found());

    let exists = assert_ok!(
        client
            .property_exists(&credential(), ObjectType::Contacts, "plan")
            .await
    );
    assert!(!exists);
}

#[tokio::test]
async fn test_persistent_rate_limit_gives_up() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/account-info/v3/details");
            then.status(429).header("Retry-After", "1");
        })
        .await;

    let client = client_with(
        &server,
        DispatchOptions {
            max_backoff: Duration::from_secs(2),
            ..Default::default()
        },
    );
    let err = assert_err!(client.check_connectivity(&credential()).await);

    assert!(matches!(err, RemoteError::Unavailable(_)));
    assert_eq!(mock.hits_async().await, 3);
    assert_eq!(client.dispatcher().stats(credential().key()).rate_limited, 2);
}
