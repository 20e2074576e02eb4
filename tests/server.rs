use serde_json::{json, Value};
use tempfile::TempDir;

use hybrid_rag::config::{parse_config, Config};
use hybrid_rag::pipeline::Pipeline;
use hybrid_rag::server::router;

struct TestServer {
    _tmp: TempDir,
    base: String,
    client: reqwest::Client,
}

impl TestServer {
    async fn start(extra: &str) -> Self {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp, extra);
        let pipeline = Pipeline::open(&config).await.unwrap();
        let app = router(&config, pipeline);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            _tmp: tmp,
            base: format!("http://{}", addr),
            client: reqwest::Client::new(),
        }
    }

    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let resp = self
            .client
            .post(format!("{}{}", self.base, path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let resp = self
            .client
            .get(format!("{}{}", self.base, path))
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn delete(&self, path: &str) -> (u16, Value) {
        let resp = self
            .client
            .delete(format!("{}{}", self.base, path))
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }
}

fn test_config(tmp: &TempDir, extra: &str) -> Config {
    let toml = format!(
        r#"[db]
path = "{}/rag.sqlite"

[chunking]
chunk_size = 40
chunk_overlap = 8

[retrieval]
score_threshold = 0.3
{}
"#,
        tmp.path().display(),
        extra
    );
    parse_config(&toml).unwrap()
}

fn corpus() -> Value {
    json!({
        "documents": [
            { "id": "d1", "text": "Presence preserves memories as interactive holograms of loved ones." },
            { "id": "d2", "text": "The beacon network routes signals between distant relay stations." },
            { "id": "d3", "text": "Gardening notes: tomatoes need sun, basil needs water." }
        ]
    })
}

#[tokio::test]
async fn test_health() {
    let server = TestServer::start("").await;
    let (status, body) = server.get("/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_index_then_search() {
    let server = TestServer::start("").await;

    let (status, body) = server.post("/index", corpus()).await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["indexed"], 3);
    assert_eq!(body["failed"], 0);

    let (_, body) = server.post("/index", corpus()).await;
    assert_eq!(body["indexed"], 0);
    assert_eq!(body["unchanged"], 3);

    let (status, body) = server
        .post("/search", json!({ "query": "What are memories in Presence?" }))
        .await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["chunks"][0]["chunk"]["document_id"], "d1");
    assert_eq!(body["sufficient"], true);
    assert_eq!(body["vector_status"]["status"], "available");

    let (_, stats) = server.get("/stats").await;
    assert_eq!(stats["document_count"], 3);
    assert_eq!(stats["chunk_count"], 3);
    assert_eq!(stats["embedded_count"], 3);
}

#[tokio::test]
async fn test_search_overrides_and_validation() {
    let server = TestServer::start("").await;
    server.post("/index", corpus()).await;

    let (_, body) = server
        .post("/search", json!({ "query": "beacon relay holograms", "top_k": 1 }))
        .await;
    assert_eq!(body["chunks"].as_array().unwrap().len(), 1);

    let (_, body) = server
        .post("/search", json!({ "query": "beacon", "score_threshold": 1.0 }))
        .await;
    assert_eq!(body["chunks"][0]["chunk"]["document_id"], "d2");

    let (status, body) = server
        .post("/search", json!({ "query": "beacon", "top_k": 0 }))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_reserved_syntax_does_not_error() {
    let server = TestServer::start("").await;
    server.post("/index", corpus()).await;

    for q in ["The: (AI) *test*", "NEAR(beacon)", "text:beacon", "AND OR NOT"] {
        let (status, body) = server.post("/search", json!({ "query": q })).await;
        assert_eq!(status, 200, "query {q:?}: {body}");
    }
}

#[tokio::test]
async fn test_context_response() {
    let server = TestServer::start("").await;
    server.post("/index", corpus()).await;

    let (status, body) = server
        .post("/context", json!({ "query": "beacon relay stations" }))
        .await;
    assert_eq!(status, 200, "{body}");
    assert!(body["context"].as_str().unwrap().contains("beacon network"));
    assert_eq!(body["citations"][0]["document_id"], "d2");
    assert_eq!(body["sufficient"], true);
    assert!(body["tokens_used"].as_u64().unwrap() <= 400);
}

#[tokio::test]
async fn test_disabled_embeddings_degrade() {
    let server = TestServer::start("\n[embedding]\nprovider = \"disabled\"\n").await;
    let (_, body) = server.post("/index", corpus()).await;
    assert_eq!(body["indexed"], 3);

    let (status, body) = server.post("/search", json!({ "query": "tomatoes" })).await;
    assert_eq!(status, 200);
    assert_eq!(body["vector_status"]["status"], "unavailable");
    assert_eq!(body["lexical_weight"], 1.0);
    assert_eq!(body["vector_weight"], 0.0);
    assert_eq!(body["chunks"][0]["chunk"]["document_id"], "d3");

    let (_, stats) = server.get("/stats").await;
    assert_eq!(stats["embedded_count"], 0);
}

#[tokio::test]
async fn test_approve_and_delete() {
    let server = TestServer::start("").await;

    let (status, body) = server
        .post("/approve", json!({ "text": "Holograms keep memories vivid.", "tag": "approved_post" }))
        .await;
    assert_eq!(status, 200, "{body}");
    let id = body["document_id"].as_str().unwrap().to_string();
    assert!(id.starts_with("feedback:"));
    assert_eq!(body["outcome"]["status"], "indexed");

    let (_, stats) = server.get("/stats").await;
    assert_eq!(stats["chunks_by_source"]["feedback"], 1);

    let (status, body) = server.post("/approve", json!({ "text": "  " })).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, _) = server.delete(&format!("/documents/{}", id)).await;
    assert_eq!(status, 200);
    let (status, body) = server.delete(&format!("/documents/{}", id)).await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_log_records_every_call() {
    let server = TestServer::start("").await;
    server.post("/index", corpus()).await;

    server.post("/search", json!({ "query": "beacon" })).await;
    server.post("/search", json!({ "query": "" })).await;
    server.post("/context", json!({ "query": "tomatoes" })).await;

    let (status, body) = server.get("/log?limit=10").await;
    assert_eq!(status, 200);
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0]["query"], "tomatoes");
    assert_eq!(entries[1]["query"], "");
    assert_eq!(entries[1]["sufficient"], false);
    assert_eq!(entries[2]["query"], "beacon");
}

#[tokio::test]
async fn test_index_requires_documents_or_source() {
    let server = TestServer::start("").await;
    let (status, body) = server.post("/index", json!({})).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, _) = server.post("/index", json!({ "source": true })).await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn test_approve_reply_indexes_parent() {
    let server = TestServer::start("").await;

    let (status, body) = server
        .post(
            "/approve",
            json!({
                "text": "Glad the lanterns helped.",
                "parent_text": "The paper lanterns lit the whole harbor."
            }),
        )
        .await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["outcome"]["status"], "indexed");

    let (_, body) = server.post("/search", json!({ "query": "harbor lanterns" })).await;
    let text = body["chunks"][0]["chunk"]["text"].as_str().unwrap();
    assert!(text.starts_with("The paper lanterns"));
    assert!(text.contains("Reply: Glad the lanterns helped."));
    assert_eq!(body["chunks"][0]["source_kind"], "feedback");
}

#[tokio::test]
async fn test_backfill_skips_existing_items() {
    let server = TestServer::start("").await;
    let items = json!({
        "items": [
            { "id": "a1", "text": "Approved note about glaciers." },
            { "id": "a2", "text": "Thanks!", "parent_text": "Glaciers carve valleys." }
        ]
    });

    let (status, body) = server.post("/approve/backfill", items.clone()).await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["indexed"], 2);

    let (_, body) = server.post("/approve/backfill", items).await;
    assert_eq!(body["indexed"], 0);
    assert_eq!(body["unchanged"], 2);

    let (_, stats) = server.get("/stats").await;
    assert_eq!(stats["document_count"], 2);
}

#[tokio::test]
async fn test_reindex_rebuilds_every_document() {
    let server = TestServer::start("").await;
    server.post("/index", corpus()).await;

    let (status, body) = server.post("/reindex", json!({})).await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["indexed"], 3);
    assert_eq!(body["failed"], 0);

    let (_, stats) = server.get("/stats").await;
    assert_eq!(stats["document_count"], 3);
    assert_eq!(stats["chunk_count"], 3);

    let (_, body) = server.post("/index", corpus()).await;
    assert_eq!(body["unchanged"], 3);
}

#[tokio::test]
async fn test_context_with_scores() {
    let server = TestServer::start("").await;
    server.post("/index", corpus()).await;

    let (status, body) = server
        .post("/context", json!({ "query": "beacon relay stations", "show_scores": true }))
        .await;
    assert_eq!(status, 200, "{body}");
    let context = body["context"].as_str().unwrap();
    assert!(context.starts_with("[Relevance: "), "{context}");
    assert!(context.contains("beacon network"));
}

