//! HTTP route tests driven through `tower::ServiceExt::oneshot`.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

use common::{minimal_pdf, test_config, HashEmbedder, ScriptedChat, METADATA_REPLY};
use document_portal::config::Config;
use document_portal::server::{router, AppState};

const BOUNDARY: &str = "portal-test-boundary";

enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a str, &'a [u8]),
}

fn multipart(parts: &[Part]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File(name, filename, bytes) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n",
                        name, filename
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn app(tmp: &TempDir, llm: Arc<ScriptedChat>) -> Router {
    app_with(test_config(tmp.path()), llm)
}

fn app_with(cfg: Config, llm: Arc<ScriptedChat>) -> Router {
    router(AppState::new(Arc::new(cfg), llm, Arc::new(HashEmbedder)))
}

async fn post(app: Router, uri: &str, parts: &[Part<'_>]) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart(parts)))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn health_reports_service() {
    let tmp = TempDir::new().unwrap();
    let response = app(&tmp, Arc::new(ScriptedChat::new(&[], "")))
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "document-portal");
}

#[tokio::test]
async fn index_then_query() {
    let tmp = TempDir::new().unwrap();
    let llm = Arc::new(ScriptedChat::new(&["What is axum?"], "A web framework."));

    let (status, body) = post(
        app(&tmp, llm.clone()),
        "/chat/index",
        &[
            Part::File("files", "axum.md", b"Axum is a web framework built on tower."),
            Part::File("files", "skip.xlsx", b"ignored"),
            Part::Text("session_id", "web"),
            Part::Text("k", "2"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["session_id"], "web");
    assert_eq!(body["k"], 2);
    assert_eq!(body["use_session_dirs"], true);

    let (status, body) = post(
        app(&tmp, llm.clone()),
        "/chat/query",
        &[Part::Text("query", "what is it?"), Part::Text("session_id", "web")],
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["answer"], "A web framework.");
    assert_eq!(body["engine"], "conversational-rag");
    assert_eq!(body["session_id"], "web");
    assert_eq!(llm.call_count(), 2);
}

#[tokio::test]
async fn index_generates_session_id() {
    let tmp = TempDir::new().unwrap();
    let (status, body) = post(
        app(&tmp, Arc::new(ScriptedChat::new(&[], ""))),
        "/chat/index",
        &[Part::File("files", "a.txt", b"hello there")],
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body["session_id"].as_str().unwrap().starts_with("session_"));
    assert_eq!(body["k"], 5);
}

#[tokio::test]
async fn index_with_only_unsupported_files_is_bad_request() {
    let tmp = TempDir::new().unwrap();
    let (status, body) = post(
        app(&tmp, Arc::new(ScriptedChat::new(&[], ""))),
        "/chat/index",
        &[Part::File("files", "a.exe", b"MZ")],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("No valid documents loaded"));
}

#[tokio::test]
async fn query_without_session_is_bad_request() {
    let tmp = TempDir::new().unwrap();
    let (status, body) = post(
        app(&tmp, Arc::new(ScriptedChat::new(&[], ""))),
        "/chat/query",
        &[Part::Text("query", "hello?")],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn query_unknown_session_is_not_found() {
    let tmp = TempDir::new().unwrap();
    let (status, body) = post(
        app(&tmp, Arc::new(ScriptedChat::new(&[], ""))),
        "/chat/query",
        &[Part::Text("query", "hello?"), Part::Text("session_id", "ghost")],
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn compare_identical_documents() {
    let tmp = TempDir::new().unwrap();
    let llm = Arc::new(ScriptedChat::new(&[], "[]"));
    let (status, body) = post(
        app(&tmp, llm.clone()),
        "/compare",
        &[
            Part::File("reference", "v1.txt", b"same content"),
            Part::File("actual", "v2.txt", b"same content"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["rows"].as_array().unwrap().len(), 0);
    assert!(body["session_id"].is_string());
    assert_eq!(llm.call_count(), 0);
}

#[tokio::test]
async fn compare_requires_both_files() {
    let tmp = TempDir::new().unwrap();
    let (status, _) = post(
        app(&tmp, Arc::new(ScriptedChat::new(&[], "[]"))),
        "/compare",
        &[Part::File("reference", "v1.txt", b"x")],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn analyze_pdf_returns_metadata() {
    let tmp = TempDir::new().unwrap();
    let pdf = minimal_pdf("quarterly report");
    let (status, body) = post(
        app(&tmp, Arc::new(ScriptedChat::new(&[METADATA_REPLY], ""))),
        "/analyze",
        &[Part::File("file", "report.pdf", &pdf)],
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["Title"], "Test");
    assert_eq!(body["PageCount"], 1);
    assert!(body["Summary"].is_array());
}

#[tokio::test]
async fn analyze_rejects_non_pdf() {
    let tmp = TempDir::new().unwrap();
    let (status, body) = post(
        app(&tmp, Arc::new(ScriptedChat::new(&[], ""))),
        "/analyze",
        &[Part::File("file", "notes.txt", b"plain")],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"].as_str().unwrap().contains("Only PDFs"));
}

#[tokio::test]
async fn query_accepts_question_field() {
    let tmp = TempDir::new().unwrap();
    let llm = Arc::new(ScriptedChat::new(&[], "Cargo."));
    let (status, body) = post(
        app(&tmp, llm.clone()),
        "/chat/index",
        &[
            Part::File("files", "rust.txt", b"Cargo builds crates."),
            Part::Text("session_id", "s1"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (status, body) = post(
        app(&tmp, llm),
        "/chat/query",
        &[Part::Text("question", "cargo?"), Part::Text("session_id", "s1")],
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["answer"], "Cargo.");
}

#[tokio::test]
async fn flat_layout_index_then_query() {
    let tmp = TempDir::new().unwrap();
    let llm = Arc::new(ScriptedChat::new(&[], "Flat answer."));
    let (status, body) = post(
        app(&tmp, llm.clone()),
        "/chat/index",
        &[
            Part::File("files", "notes.txt", b"Flat indexes live in the base directory."),
            Part::Text("use_session_dirs", "false"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["use_session_dirs"], false);
    assert!(tmp.path().join("index").join("index.json").is_file());

    let (status, body) = post(
        app(&tmp, llm),
        "/chat/query",
        &[
            Part::Text("query", "where do indexes live?"),
            Part::Text("use_session_dirs", "false"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["answer"], "Flat answer.");
    assert!(body["session_id"].is_null());
}

#[tokio::test]
async fn index_rejects_bad_chunking() {
    let tmp = TempDir::new().unwrap();
    for (size, overlap) in [("0", "0"), ("100", "100"), ("abc", "10")] {
        let (status, body) = post(
            app(&tmp, Arc::new(ScriptedChat::new(&[], ""))),
            "/chat/index",
            &[
                Part::File("files", "a.txt", b"hello there"),
                Part::Text("chunk_size", size),
                Part::Text("chunk_overlap", overlap),
            ],
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "size={size} overlap={overlap}: {body}");
        assert_eq!(body["error"]["code"], "bad_request");
    }
}

#[tokio::test]
async fn threshold_search_from_config() {
    let tmp = TempDir::new().unwrap();
    let mut cfg = test_config(tmp.path());
    cfg.retriever.search_type = "similarity_score_threshold".to_string();
    cfg.retriever.score_threshold = Some(0.1);
    let llm = Arc::new(ScriptedChat::new(&[], "Cargo builds crates."));

    let (status, body) = post(
        app_with(cfg.clone(), llm.clone()),
        "/chat/index",
        &[
            Part::File("files", "rust.txt", b"Cargo builds crates."),
            Part::Text("session_id", "s1"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (status, body) = post(
        app_with(cfg, llm),
        "/chat/query",
        &[Part::Text("query", "cargo?"), Part::Text("session_id", "s1")],
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["answer"], "Cargo builds crates.");
}

#[tokio::test]
async fn compare_keeps_same_named_versions() {
    let tmp = TempDir::new().unwrap();
    let llm = Arc::new(ScriptedChat::new(&[], r#"[{"Page":"1","Changes":"v1 became v2"}]"#));
    let (status, body) = post(
        app(&tmp, llm.clone()),
        "/compare",
        &[
            Part::File("reference", "contract.txt", b"reference v1"),
            Part::File("actual", "contract.txt", b"actual v2"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["rows"].as_array().unwrap().len(), 1);
    assert_eq!(llm.call_count(), 1);

    let session_dir = tmp
        .path()
        .join("compare")
        .join(body["session_id"].as_str().unwrap());
    assert_eq!(
        std::fs::read(session_dir.join("reference").join("contract.txt")).unwrap(),
        b"reference v1"
    );
    assert_eq!(
        std::fs::read(session_dir.join("actual").join("contract.txt")).unwrap(),
        b"actual v2"
    );
}
