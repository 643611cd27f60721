//! Document submission against a mock registration endpoint.

use base64::{engine::general_purpose, Engine as _};
use crpt_client::api::{CrptApi, Description, Document, Product, SubmitError};
use crpt_client::config::ClientConfig;
use crpt_client::error::CrptError;
use crpt_client::gate::GateError;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CREATE_PATH: &str = "/api/v3/lk/documents/create";

fn config_for(server: &MockServer) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.api.base_url = server.uri();
    config.throttle.request_limit = 5;
    config
}

fn sample_document() -> Document {
    Document {
        description: Some(Description {
            participant_inn: Some("7700000000".to_string()),
        }),
        doc_id: Some("doc-42".to_string()),
        products: Some(vec![Product {
            tnved_code: Some("0401".to_string()),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_create_document_posts_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CREATE_PATH))
        .and(query_param("pg", "milk"))
        .and(header("authorization", "Bearer secret-token"))
        .and(header("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(201).set_body_string(r#"{"value":"doc-42"}"#))
        .expect(1)
        .mount(&server)
        .await;

    let api = CrptApi::from_config(&config_for(&server)).unwrap();
    let response = api
        .create_document(&sample_document(), "signed", "secret-token", "milk")
        .await
        .unwrap();

    assert_eq!(response.status, 201);
    assert_eq!(response.body, r#"{"value":"doc-42"}"#);

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["document_format"], "MANUAL");
    assert_eq!(body["type"], "LP_INTRODUCE_GOODS");
    assert_eq!(body["signature"], general_purpose::STANDARD.encode("signed"));

    let product_document = general_purpose::STANDARD
        .decode(body["product_document"].as_str().unwrap())
        .unwrap();
    let sent: Document = serde_json::from_slice(&product_document).unwrap();
    assert_eq!(sent, sample_document());
}

#[tokio::test]
async fn test_error_status_is_protocol_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CREATE_PATH))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .expect(1)
        .mount(&server)
        .await;

    let api = CrptApi::from_config(&config_for(&server)).unwrap();
    let result = api
        .create_document(&sample_document(), "signed", "bad-token", "milk")
        .await;

    match result {
        Err(CrptError::Submit(SubmitError::Protocol { status, body })) => {
            assert_eq!(status, 403);
            assert_eq!(body, "forbidden");
        }
        other => panic!("expected protocol error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unreachable_endpoint_is_transport_error() {
    let server = MockServer::start().await;
    let config = config_for(&server);
    drop(server);

    let api = CrptApi::from_config(&config).unwrap();
    let result = api
        .create_document(&sample_document(), "signed", "token", "milk")
        .await;

    assert!(matches!(
        result,
        Err(CrptError::Submit(SubmitError::Transport(_)))
    ));
}

#[tokio::test]
async fn test_closed_client_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let api = CrptApi::from_config(&config_for(&server)).unwrap();
    api.close().await.unwrap();

    let result = api
        .create_document(&sample_document(), "signed", "token", "milk")
        .await;
    assert!(matches!(result, Err(CrptError::Gate(GateError::GateClosed))));
}
