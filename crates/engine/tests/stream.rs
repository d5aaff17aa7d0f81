//! Exercises the engine client against an in-process fake engine.

use assert_matches::assert_matches;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use genserve_core::extractor::extract_source;
use genserve_core::generator::CodeGenerator;
use genserve_engine::{EngineApi, EngineError, EngineGenerator};

const MODEL: &str = "test-model";

/// Serve `app` on an ephemeral local port and return its base URL.
async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn ndjson(fragments: &[&str]) -> String {
    let mut body = String::new();
    for (i, fragment) in fragments.iter().enumerate() {
        let line = serde_json::json!({
            "model": MODEL,
            "response": fragment,
            "done": i + 1 == fragments.len(),
        });
        body.push_str(&line.to_string());
        body.push('\n');
    }
    body
}

fn fake_engine(body: String) -> Router {
    Router::new()
        .route("/", get(|| async { "Ollama is running" }))
        .route(
            "/api/generate",
            post(move |Json(req): Json<serde_json::Value>| {
                let body = body.clone();
                async move {
                    assert_eq!(req["model"], MODEL);
                    assert!(req["prompt"].as_str().is_some_and(|p| !p.is_empty()));
                    body
                }
            }),
        )
}

#[tokio::test]
async fn generate_concatenates_fragments_in_order() {
    let url = serve(fake_engine(ndjson(&[
        "Here is your server:\n",
        "```",
        "javascript\n",
        "console.log(1)\n",
        "```",
        "\nEnjoy.",
    ])))
    .await;

    let api = EngineApi::new(url, MODEL);
    let text = api.generate("make a server").await.unwrap();

    assert_eq!(
        text,
        "Here is your server:\n```javascript\nconsole.log(1)\n```\nEnjoy."
    );
    assert_eq!(extract_source(&text).unwrap(), "console.log(1)");
}

#[tokio::test]
async fn malformed_lines_are_skipped() {
    let mut body = ndjson(&["a"]);
    body.push_str("{not json}\n\n");
    body.push_str(&serde_json::json!({ "response": "b", "done": true }).to_string());

    let url = serve(fake_engine(body)).await;
    let text = EngineApi::new(url, MODEL).generate("p").await.unwrap();
    assert_eq!(text, "ab");
}

#[tokio::test]
async fn engine_reported_error_fails_generation() {
    let body = format!(
        "{}\n{}\n",
        serde_json::json!({ "response": "partial" }),
        serde_json::json!({ "error": "model not found" }),
    );
    let url = serve(fake_engine(body)).await;

    let err = EngineApi::new(url, MODEL).generate("p").await.unwrap_err();
    assert_matches!(err, EngineError::Protocol(msg) if msg.contains("model not found"));
}

#[tokio::test]
async fn non_success_status_is_api_error() {
    let app = Router::new().route(
        "/api/generate",
        post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "overloaded") }),
    );
    let url = serve(app).await;

    let err = EngineApi::new(url, MODEL).generate("p").await.unwrap_err();
    assert_matches!(err, EngineError::ApiError { status: 503, body } if body == "overloaded");
}

#[tokio::test]
async fn generator_maps_errors_to_generation_failed() {
    let app = Router::new().route(
        "/api/generate",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
    );
    let url = serve(app).await;
    let generator = EngineGenerator::new(EngineApi::new(url, MODEL));

    assert_eq!(generator.engine_name(), MODEL);
    assert_matches!(
        generator.generate("p").await,
        Err(genserve_core::error::CoreError::GenerationFailed(msg)) if msg.contains("500")
    );
}

#[tokio::test]
async fn probe_recognises_banner() {
    let url = serve(fake_engine(String::new())).await;
    let generator = EngineGenerator::new(EngineApi::new(format!("{url}/"), MODEL));
    assert!(generator.is_reachable().await);
}

#[tokio::test]
async fn probe_rejects_foreign_service() {
    let app = Router::new().route("/", get(|| async { "nginx welcome page" }));
    let url = serve(app).await;
    assert!(!EngineApi::new(url, MODEL).probe().await.unwrap());
}

#[tokio::test]
async fn unreachable_engine_is_not_reachable() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let generator = EngineGenerator::new(EngineApi::new(format!("http://{addr}"), MODEL));
    assert!(!generator.is_reachable().await);
    assert_matches!(
        generator.generate("p").await,
        Err(genserve_core::error::CoreError::GenerationFailed(_))
    );
}
