use super::*;
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, method, path},
};

fn config_for(server: &MockServer, dimension: u32) -> Config {
    let address = server.address();
    let mut config = Config::default();
    config.embedding.host = address.ip().to_string();
    config.embedding.port = address.port();
    config.embedding.model = "test-model".to_string();
    config.index.embedding_dimension = dimension;
    config
}

fn client_for(server: &MockServer, dimension: u32) -> OllamaEmbedder {
    OllamaEmbedder::new(&config_for(server, dimension))
        .expect("should create client")
        .with_retry_attempts(3)
        .with_retry_delay(Duration::from_millis(1))
}

async fn embed(client: OllamaEmbedder, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
    tokio::task::spawn_blocking(move || client.embed_batch(&texts))
        .await
        .expect("blocking task should not panic")
}

#[test]
fn client_configuration() {
    let mut config = Config::default();
    config.embedding.host = "test-host".to_string();
    config.embedding.port = 1234;
    config.embedding.model = "test-model".to_string();
    config.ingestion.embedding_batch_size = 0;

    let client = OllamaEmbedder::new(&config).expect("should create client");
    assert_eq!(client.model(), "test-model");
    assert_eq!(client.dimension(), 1024);
    assert_eq!(client.batch_size, 1);
    assert_eq!(client.base_url.host_str(), Some("test-host"));
    assert_eq!(client.base_url.port(), Some(1234));

    let tuned = client.with_retry_attempts(0);
    assert_eq!(tuned.retry_attempts, 1);
}

#[tokio::test]
async fn embeds_batches_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({"model": "test-model"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embeddings": [[1.0, 0.0], [0.0, 1.0]]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let vectors = embed(
        client_for(&server, 2),
        vec!["first line".to_string(), "second line".to_string()],
    )
    .await
    .expect("embedding should succeed");

    assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
}

#[tokio::test]
async fn splits_input_by_batch_size() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embeddings": [[1.0, 0.0]]
        })))
        .expect(3)
        .mount(&server)
        .await;

    let mut config = config_for(&server, 2);
    config.ingestion.embedding_batch_size = 1;
    let client = OllamaEmbedder::new(&config)
        .expect("should create client")
        .with_retry_delay(Duration::from_millis(1));

    let vectors = embed(client, vec!["a".into(), "b".into(), "c".into()])
        .await
        .expect("embedding should succeed");
    assert_eq!(vectors.len(), 3);
}

#[tokio::test]
async fn rejects_wrong_dimension() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embeddings": [[1.0, 0.0, 0.0]]
        })))
        .mount(&server)
        .await;

    let result = embed(client_for(&server, 2), vec!["text".into()]).await;
    let message = format!("{:#}", result.expect_err("dimension mismatch should fail"));
    assert!(message.contains("3-dimensional"), "{message}");
}

#[tokio::test]
async fn retries_server_errors_then_gives_up() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let result = embed(client_for(&server, 2), vec!["text".into()]).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "model not found"})))
        .expect(1)
        .mount(&server)
        .await;

    let result = embed(client_for(&server, 2), vec!["text".into()]).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn health_check_requires_model() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{"name": "test-model", "size": 1024}, {"name": "other:latest"}]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server, 2);
    let checked = tokio::task::spawn_blocking(move || client.health_check())
        .await
        .expect("blocking task should not panic");
    assert!(checked.is_ok());

    let mut config = config_for(&server, 2);
    config.embedding.model = "missing-model".to_string();
    let missing = OllamaEmbedder::new(&config).expect("should create client");
    let checked = tokio::task::spawn_blocking(move || missing.health_check())
        .await
        .expect("blocking task should not panic");
    assert!(checked.is_err());
}
