use httpmock::prelude::*;
use serde_json::json;

use cursor_docs::config::{EmbeddingConfig, VectorConfig};
use cursor_docs::embedding::{EmbeddingProvider, OllamaProvider};
use cursor_docs::models::Chunk;
use cursor_docs::store::surreal::SurrealVectorStore;
use cursor_docs::store::VectorStore;

// Nothing listens on port 1.
const DEAD_URL: &str = "http://127.0.0.1:1";

fn ollama_config(urls: Vec<String>) -> EmbeddingConfig {
    EmbeddingConfig {
        provider: "ollama".to_string(),
        urls,
        timeout_secs: 5,
        ..EmbeddingConfig::default()
    }
}

fn surreal_config(url: String) -> VectorConfig {
    VectorConfig {
        backend: "surrealdb".to_string(),
        url,
        username: Some("root".to_string()),
        password: Some("root".to_string()),
        ..VectorConfig::default()
    }
}

// ============ Ollama ============

#[tokio::test]
async fn test_ollama_falls_back_to_second_endpoint() {
    let server = MockServer::start_async().await;
    let embed = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/embeddings")
                .json_body(json!({ "model": "nomic-embed-text", "prompt": "hello" }));
            then.status(200).json_body(json!({ "embedding": [0.5, -0.5] }));
        })
        .await;

    let provider =
        OllamaProvider::new(&ollama_config(vec![DEAD_URL.to_string(), server.base_url()]))
            .unwrap();
    let vector = provider.embed("hello").await.unwrap();

    assert_eq!(vector, vec![0.5, -0.5]);
    embed.assert_async().await;
}

#[tokio::test]
async fn test_ollama_truncates_prompt() {
    let server = MockServer::start_async().await;
    let embed = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/embeddings")
                .json_body_partial(r#"{"prompt": "abcde"}"#);
            then.status(200).json_body(json!({ "embedding": [1.0] }));
        })
        .await;

    let mut cfg = ollama_config(vec![server.base_url()]);
    cfg.max_chars = 5;
    let provider = OllamaProvider::new(&cfg).unwrap();
    provider.embed("abcdefghij").await.unwrap();
    embed.assert_async().await;
}

#[tokio::test]
async fn test_ollama_http_error_is_embedding_failed() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/embeddings");
            then.status(404).body(r#"{"error":"model not found"}"#);
        })
        .await;

    let provider = OllamaProvider::new(&ollama_config(vec![server.base_url()])).unwrap();
    let err = provider.embed("hello").await.unwrap_err();
    assert_eq!(err.kind(), "embedding_failed");
    assert!(err.to_string().contains("model not found"));
}

#[tokio::test]
async fn test_ollama_empty_embedding_is_embedding_failed() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/embeddings");
            then.status(200).json_body(json!({ "embedding": [] }));
        })
        .await;

    let provider = OllamaProvider::new(&ollama_config(vec![server.base_url()])).unwrap();
    let err = provider.embed("hello").await.unwrap_err();
    assert_eq!(err.kind(), "embedding_failed");
}

#[tokio::test]
async fn test_ollama_unreachable_is_embedding_unavailable() {
    let provider = OllamaProvider::new(&ollama_config(vec![DEAD_URL.to_string()])).unwrap();

    assert!(!provider.health().await);
    let err = provider.embed("hello").await.unwrap_err();
    assert_eq!(err.kind(), "embedding_unavailable");
    let err = provider.list_models().await.unwrap_err();
    assert_eq!(err.kind(), "embedding_unavailable");
}

#[tokio::test]
async fn test_ollama_health_and_models() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/");
            then.status(200).body("Ollama is running");
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/tags");
            then.status(200).json_body(json!({
                "models": [
                    { "name": "nomic-embed-text:latest", "size": 274302450 },
                    { "name": "llama3:8b" }
                ]
            }));
        })
        .await;

    let provider = OllamaProvider::new(&ollama_config(vec![server.base_url()])).unwrap();
    assert!(provider.health().await);
    assert_eq!(provider.model_name(), "nomic-embed-text");
    assert_eq!(
        provider.list_models().await.unwrap(),
        vec!["nomic-embed-text:latest", "llama3:8b"]
    );
}

#[test]
fn test_ollama_requires_an_endpoint() {
    let err = OllamaProvider::new(&ollama_config(Vec::new())).err().unwrap();
    assert_eq!(err.kind(), "invalid_input");
}

// ============ SurrealDB ============

#[tokio::test]
async fn test_surreal_probe() {
    let server = MockServer::start_async().await;
    let store = SurrealVectorStore::new(&surreal_config(server.base_url())).unwrap();
    assert!(!store.probe().await);

    server
        .mock_async(|when, then| {
            when.method(GET).path("/health");
            then.status(200);
        })
        .await;
    assert!(store.probe().await);
}

#[tokio::test]
async fn test_surreal_upsert_sends_namespace_and_record() {
    let server = MockServer::start_async().await;
    let upsert = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/sql")
                .header("surreal-ns", "cursor_docs")
                .header("surreal-db", "docs")
                .header_exists("authorization")
                .body_contains("UPSERT type::thing(\"chunk_vector\", \"chunk-1\")")
                .body_contains("\"source_id\":\"src-1\"");
            then.status(200)
                .json_body(json!([{ "status": "OK", "time": "1ms", "result": [] }]));
        })
        .await;

    let store = SurrealVectorStore::new(&surreal_config(server.base_url())).unwrap();
    let mut chunk = Chunk::new("src-1", "https://d.dev", "D", "body", 0);
    chunk.id = "chunk-1".to_string();
    store.upsert(&chunk, &[0.1, 0.2], "m").await.unwrap();
    upsert.assert_async().await;
}

#[tokio::test]
async fn test_surreal_search_parses_rows_and_skips_bad_ones() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/sql")
                .body_contains("vector::similarity::cosine")
                .body_contains("WHERE source_id IN [\"src-1\"]")
                .body_contains("LIMIT 5");
            then.status(200).json_body(json!([{
                "status": "OK",
                "result": [
                    { "chunk_id": "a", "source_id": "src-1", "score": 0.9 },
                    { "chunk_id": "b", "source_id": "src-1" },
                    { "chunk_id": "c", "source_id": "src-1", "score": 0.4 }
                ]
            }]));
        })
        .await;

    let store = SurrealVectorStore::new(&surreal_config(server.base_url())).unwrap();
    let sources = vec!["src-1".to_string()];
    let hits = store.search(&[1.0, 0.0], 5, Some(&sources)).await.unwrap();

    let ids: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "c"]);
    assert!((hits[0].raw_score - 0.9).abs() < 1e-9);
}

#[tokio::test]
async fn test_surreal_statement_error_surfaces() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/sql");
            then.status(200).json_body(json!([{
                "status": "ERR",
                "result": "There was a problem with the database"
            }]));
        })
        .await;

    let store = SurrealVectorStore::new(&surreal_config(server.base_url())).unwrap();
    let err = store.delete_source("src-1").await.unwrap_err();
    assert_eq!(err.kind(), "vector_store_error");
}

#[tokio::test]
async fn test_surreal_count() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/sql").body_contains("count()");
            then.status(200)
                .json_body(json!([{ "status": "OK", "result": [{ "n": 42 }] }]));
        })
        .await;

    let store = SurrealVectorStore::new(&surreal_config(server.base_url())).unwrap();
    assert_eq!(store.count().await.unwrap(), 42);
}

#[tokio::test]
async fn test_surreal_empty_source_filter_matches_nothing() {
    // Answered locally; the dead endpoint is never contacted.
    let store = SurrealVectorStore::new(&surreal_config(DEAD_URL.to_string())).unwrap();
    let hits = store.search(&[1.0, 0.0], 5, Some(&[])).await.unwrap();
    assert!(hits.is_empty());
}
