//! HTTP surface: multipart uploads, owner header, history and status.

use std::sync::Arc;

use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde_json::Value;

use cropsight_api::ApiState;

use crate::*;

const WORKER: &str = r#"echo "Loading model..."
echo '{"success": true, "disease": "Leaf Spot", "confidence": 88.5}'"#;

struct App {
    base: String,
    http: reqwest::Client,
    _scratch: Scratch,
}

impl App {
    async fn start(tag: &str) -> Self {
        let scratch = Scratch::new(tag);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());

        let mut opts = PipelineOptions::new(dead_url(), scratch.worker(WORKER));
        opts.asset_base_url = format!("{base}/assets");
        let p = pipeline(&scratch, opts);

        let state = ApiState {
            orchestrator: Arc::clone(&p.orchestrator),
            history_limit: 50,
            max_upload_bytes: 1024 * 1024,
            asset_dir: Some(scratch.0.join("assets")),
        };
        let app = cropsight_api::router(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base,
            http: reqwest::Client::new(),
            _scratch: scratch,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn predict(&self, task: &str, owner: Option<&str>, form: Form) -> (StatusCode, Value) {
        let mut req = self.http.post(self.url(&format!("/api/predict/{task}"))).multipart(form);
        if let Some(owner) = owner {
            req = req.header("x-owner-id", owner);
        }
        let resp = req.send().await.unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap())
    }

    async fn get(&self, path: &str, owner: &str) -> (StatusCode, Value) {
        let resp = self.http.get(self.url(path)).header("x-owner-id", owner).send().await.unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap())
    }

    async fn delete(&self, path: &str, owner: &str) -> (StatusCode, Value) {
        let resp = self.http.delete(self.url(path)).header("x-owner-id", owner).send().await.unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap())
    }
}

fn image_form() -> Form {
    Form::new().part(
        "image",
        Part::bytes(JPEG.to_vec()).file_name("leaf.jpg").mime_str("image/jpeg").unwrap(),
    )
}

#[tokio::test]
async fn predict_returns_the_envelope() {
    let app = App::start("api-predict").await;

    let form = image_form().text("requestId", "client-42");
    let (status, body) = app.predict("leaf", Some("alice"), form).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], Value::Bool(true));
    assert_eq!(body["requestId"], "client-42");
    assert_eq!(body["task"], "leaf");
    assert_eq!(body["label"], "Leaf Spot");
    assert_eq!(body["confidence"], 88.5);
    assert_eq!(body["inferenceSource"], "fallback");
    assert!(body["processingTimeMs"].is_u64());
    assert!(body["analysisId"].is_string());
}

#[tokio::test]
async fn request_id_from_query_string() {
    let app = App::start("api-query-id").await;
    let resp = app
        .http
        .post(app.url("/api/predict/leaf?requestId=from-query"))
        .header("x-owner-id", "alice")
        .multipart(image_form())
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["requestId"], "from-query");
}

#[tokio::test]
async fn rejected_requests() {
    let app = App::start("api-reject").await;

    let (status, body) = app.predict("leaf", None, image_form()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], Value::Bool(false));

    let (status, body) = app.predict("leaf", Some("alice"), Form::new().text("requestId", "r1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No image provided. Please upload an image.");

    let (status, _) = app.predict("tomato", Some("alice"), image_form()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let text = Form::new().part(
        "image",
        Part::bytes(b"just some text".to_vec()).file_name("notes.txt").mime_str("text/plain").unwrap(),
    );
    let (status, _) = app.predict("leaf", Some("alice"), text).await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let resp = app
        .http
        .post(app.url("/api/predict/leaf"))
        .header("x-owner-id", "alice")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn history_lists_and_deletes_per_owner() {
    let app = App::start("api-history").await;

    for _ in 0..2 {
        let (status, _) = app.predict("leaf", Some("alice"), image_form()).await;
        assert_eq!(status, StatusCode::OK);
    }
    app.predict("leaf", Some("bob"), image_form()).await;

    let (status, body) = app.get("/api/history/leaf", "alice").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    let history = body["history"].as_array().unwrap();
    assert!(history[0]["createdAt"].as_u64() >= history[1]["createdAt"].as_u64());
    assert_eq!(history[0]["ownerId"], "alice");
    assert_eq!(history[0]["resultSnapshot"]["label"], "Leaf Spot");

    // Uploaded source image is served back from the asset URL.
    let asset_url = history[0]["imageAsset"]["url"].as_str().unwrap();
    let image = app.http.get(asset_url).send().await.unwrap();
    assert_eq!(image.status(), StatusCode::OK);
    assert_eq!(image.bytes().await.unwrap().as_ref(), JPEG);

    let (_, bunga) = app.get("/api/history/bunga", "alice").await;
    assert_eq!(bunga["count"], 0);

    let id = history[0]["id"].as_str().unwrap().to_string();
    let (status, _) = app.delete(&format!("/api/history/leaf/{id}"), "bob").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, body) = app.delete(&format!("/api/history/leaf/{id}"), "alice").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], Value::Bool(true));
    let (status, _) = app.delete(&format!("/api/history/leaf/{id}"), "alice").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = app.get("/api/history/leaf", "alice").await;
    assert_eq!(body["count"], 1);
}

#[tokio::test]
async fn status_and_health() {
    let app = App::start("api-status").await;
    app.predict("leaf", Some("alice"), image_form()).await;

    let (status, body) = app.get("/api/status", "ops").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pipeline"]["requests"], 1);
    assert_eq!(body["pipeline"]["fallbackRuns"], 1);
    assert_eq!(body["pipeline"]["persisted"], 1);
    assert_eq!(body["primaryEnabled"], Value::Bool(true));
    assert_eq!(body["primaryHealthy"], Value::Bool(false));
    assert_eq!(body["stagedFiles"], 0);
    assert_eq!(body["historyEnabled"], Value::Bool(true));

    let (status, body) = app.get("/api/health", "ops").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}
