//! End-to-end pipeline scenarios against a stub resident service and real
//! worker processes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::{json, Value};

use cropsight_core::{InferenceSource, TaskKind};
use cropsight_services::{AnalysisStore, InferenceRequest};

use crate::*;

const HEALTHY_WORKER: &str = r#"echo "Loading model..."
echo "image 1/1 640x640"
echo '{"success": true, "disease": "Healthy", "confidence": 92.5}'"#;

fn request(task: TaskKind, request_id: Option<&str>, image: &[u8]) -> InferenceRequest {
    InferenceRequest {
        task,
        owner_id: "farmer-1".to_string(),
        request_id: request_id.map(str::to_string),
        image: Bytes::copy_from_slice(image),
        mime_type: Some("image/jpeg".to_string()),
    }
}

async fn healthy_primary() -> String {
    spawn_server(Router::new().route(
        "/predict/leaf",
        post(|Json(body): Json<Value>| async move {
            let staged = body["image_path"].as_str().unwrap_or_default().to_string();
            Json(json!({
                "success": true,
                "disease": "Healthy",
                "confidence": 97.0,
                "staged_existed": std::path::Path::new(&staged).exists(),
            }))
        }),
    ))
    .await
}

async fn slow_primary() -> String {
    spawn_server(Router::new().route(
        "/predict/leaf",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Json(json!({"success": true, "disease": "too late"}))
        }),
    ))
    .await
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn primary_answers_and_result_is_saved() {
    let scratch = Scratch::new("primary");
    let worker = scratch.worker("echo 'should not run' >&2\nexit 1");
    let p = pipeline(&scratch, PipelineOptions::new(healthy_primary().await, worker));

    let env = p
        .orchestrator
        .handle(request(TaskKind::Leaf, Some("req-a"), JPEG))
        .await
        .unwrap();

    assert!(env.success);
    assert_eq!(env.request_id, "req-a");
    assert_eq!(env.label.as_deref(), Some("Healthy"));
    assert_eq!(env.confidence, Some(97.0));
    assert_eq!(env.inference_source, Some(InferenceSource::Primary));
    assert_eq!(env.raw["staged_existed"], json!(true), "resident service must see the staged file");

    let analysis_id = env.analysis_id.clone().expect("analysis saved");
    let history = p.records.history("farmer-1", TaskKind::Leaf, 50).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, analysis_id);
    assert_eq!(history[0].result_snapshot.label.as_deref(), Some("Healthy"));

    assert_eq!(p.fallback.runs(), 0);
    assert_eq!(scratch.staged_files(), 0);
}

#[tokio::test]
async fn unreachable_primary_falls_back_to_worker() {
    let scratch = Scratch::new("fallback");
    let worker = scratch.worker(HEALTHY_WORKER);
    let p = pipeline(&scratch, PipelineOptions::new(dead_url(), worker));

    let env = p
        .orchestrator
        .handle(request(TaskKind::Leaf, None, JPEG))
        .await
        .unwrap();

    assert!(env.success);
    assert_eq!(env.label.as_deref(), Some("Healthy"));
    assert_eq!(env.confidence, Some(92.5));
    assert_eq!(env.inference_source, Some(InferenceSource::Fallback));
    assert!(env.request_id.starts_with("leaf_"));
    assert!(env.analysis_id.is_some());

    assert_eq!(p.fallback.runs(), 1);
    assert_eq!(scratch.staged_files(), 0);
}

#[tokio::test]
async fn both_paths_fail() {
    let scratch = Scratch::new("both-fail");
    let worker = scratch.worker("echo 'CUDA error: device-side assert' >&2\nexit 1");
    let p = pipeline(&scratch, PipelineOptions::new(slow_primary().await, worker));

    let started = Instant::now();
    let env = p
        .orchestrator
        .handle(request(TaskKind::Leaf, Some("req-c"), JPEG))
        .await
        .unwrap();

    assert!(!env.success);
    assert_eq!(env.request_id, "req-c");
    assert_eq!(env.error.as_deref(), Some("prediction failed"));
    assert!(!env.error.as_deref().unwrap_or_default().contains("CUDA"));
    assert!(env.analysis_id.is_none());
    assert!(started.elapsed() < D1 + D2);

    assert_eq!(p.fallback.runs(), 1);
    assert!(p.records.is_empty());
    assert_eq!(scratch.staged_files(), 0);
}

#[tokio::test]
async fn hung_worker_is_killed_at_the_deadline() {
    let scratch = Scratch::new("hung");
    let worker = scratch.worker("echo 'Loading model...'\nsleep 30");
    let p = pipeline(&scratch, PipelineOptions::new(dead_url(), worker));

    let started = Instant::now();
    let env = p
        .orchestrator
        .handle(request(TaskKind::Leaf, Some("req-d"), JPEG))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(!env.success);
    assert_eq!(env.error.as_deref(), Some("analysis timed out, please try again"));
    assert!(elapsed >= D2, "returned before the deadline: {elapsed:?}");
    assert!(elapsed < D2 + Duration::from_secs(2), "kill took too long: {elapsed:?}");
    assert_eq!(p.fallback.runs(), 1);
    assert_eq!(scratch.staged_files(), 0);
}

#[tokio::test]
async fn storage_outage_does_not_change_the_answer() {
    let scratch = Scratch::new("storage");
    let worker = scratch.worker(HEALTHY_WORKER);
    let saved = pipeline(&scratch, PipelineOptions::new(dead_url(), worker.clone()));

    let mut opts = PipelineOptions::new(dead_url(), worker);
    opts.assets = Some(Arc::new(FailingAssets));
    let unsaved = pipeline(&scratch, opts);

    let ok = saved
        .orchestrator
        .handle(request(TaskKind::Leaf, Some("req-e1"), JPEG))
        .await
        .unwrap();
    let degraded = unsaved
        .orchestrator
        .handle(request(TaskKind::Leaf, Some("req-e2"), JPEG))
        .await
        .unwrap();

    assert!(ok.analysis_id.is_some());
    assert!(degraded.success);
    assert!(degraded.analysis_id.is_none());
    assert_eq!(degraded.label, ok.label);
    assert_eq!(degraded.confidence, ok.confidence);
    assert_eq!(degraded.detections, ok.detections);
    assert_eq!(degraded.raw, ok.raw);
    assert!(unsaved.records.is_empty());
    assert_eq!(scratch.staged_files(), 0);
}

#[tokio::test]
async fn worker_reporting_no_detection_is_not_saved() {
    let scratch = Scratch::new("no-detection");
    let worker = scratch.worker(r#"echo '{"success": false}'"#);
    let p = pipeline(&scratch, PipelineOptions::new(dead_url(), worker));

    let env = p
        .orchestrator
        .handle(request(TaskKind::Leaf, None, JPEG))
        .await
        .unwrap();

    assert!(!env.success);
    assert_eq!(env.error.as_deref(), Some("no leaf detected"));
    assert!(env.analysis_id.is_none());
    assert!(p.records.is_empty());
    assert_eq!(scratch.staged_files(), 0);
}

#[tokio::test]
async fn bunga_result_carries_detections_and_grade() {
    let scratch = Scratch::new("bunga");
    let worker = scratch.worker(
        r#"echo "Loading dual models..."
echo '{"success": true, "class": "Class A-a", "ripeness_confidence": 91.2, "bunga_detections": [{"class": "Class A-a", "confidence": 0.91, "bbox": [10, 20, 110, 220], "health_class": "a"}], "total_bunga": 1}'"#,
    );
    let p = pipeline(&scratch, PipelineOptions::new(dead_url(), worker));

    let env = p
        .orchestrator
        .handle(request(TaskKind::Bunga, None, JPEG))
        .await
        .unwrap();

    assert!(env.success);
    assert_eq!(env.task, TaskKind::Bunga);
    assert_eq!(env.label.as_deref(), Some("Class A-a"));
    assert_eq!(env.confidence, Some(91.2));
    assert_eq!(env.detections.len(), 1);
    assert_eq!(env.detections[0].bbox, [10.0, 20.0, 110.0, 220.0]);
    assert_eq!(env.detections[0].extra["health_class"], json!("a"));
    assert_eq!(env.raw["market_grade"], json!("Premium"));
    assert_eq!(env.raw["total_bunga"], json!(1));
    assert!(env.request_id.starts_with("bunga_"));
}

// ── Properties ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn staging_is_empty_after_any_mix_of_outcomes() {
    let scratch = Scratch::new("mix");
    // Odd bytes succeed, even bytes fail, a trailing 'h' hangs past the deadline.
    let worker = scratch.worker(
        r#"last=$(tail -c 1 "$1")
case "$last" in
  1|3|5|7|9) echo '{"success": true, "disease": "Healthy", "confidence": 90}' ;;
  h) sleep 30 ;;
  *) echo 'boom' >&2; exit 2 ;;
esac"#,
    );
    let p = pipeline(&scratch, PipelineOptions::new(dead_url(), worker));

    let mut handles = Vec::new();
    for i in 0..10 {
        let orch = Arc::clone(&p.orchestrator);
        let mut image = JPEG.to_vec();
        image.push(if i == 9 { b'h' } else { b'0' + i as u8 });
        handles.push(tokio::spawn(async move {
            orch.handle(request(TaskKind::Leaf, None, &image)).await
        }));
    }

    let mut successes = 0;
    for h in handles {
        let env = h.await.unwrap().unwrap();
        if env.success {
            successes += 1;
        }
    }

    assert_eq!(successes, 4);
    assert_eq!(p.fallback.runs(), 10);
    assert_eq!(p.orchestrator.staging().outstanding(), 0);
    assert_eq!(scratch.staged_files(), 0);
}

#[tokio::test]
async fn concurrent_requests_with_the_same_id_do_not_mix_images() {
    let scratch = Scratch::new("same-id");
    // The "image" is a JSON answer; the worker echoes whatever file it was given.
    let worker = scratch.worker(r#"head -n 1 "$1""#);
    let p = pipeline(&scratch, PipelineOptions::new(dead_url(), worker));

    let mut handles = Vec::new();
    for i in 0..6 {
        let orch = Arc::clone(&p.orchestrator);
        let image = format!("{{\"success\": true, \"disease\": \"image-{i}\", \"confidence\": 50}}\n");
        handles.push(tokio::spawn(async move {
            let env = orch
                .handle(request(TaskKind::Leaf, Some("same-id"), image.as_bytes()))
                .await
                .unwrap();
            (i, env)
        }));
    }

    for h in handles {
        let (i, env) = h.await.unwrap();
        assert!(env.success, "request {i}: {:?}", env.error);
        assert_eq!(env.label, Some(format!("image-{i}")));
    }
    assert_eq!(scratch.staged_files(), 0);
}

#[tokio::test]
async fn full_worker_pool_queues_requests() {
    let scratch = Scratch::new("busy");
    let worker = scratch.worker(
        "sleep 1\necho '{\"success\": true, \"disease\": \"Healthy\", \"confidence\": 80}'",
    );
    let mut opts = PipelineOptions::new(dead_url(), worker);
    opts.slots = 1;
    let p = pipeline(&scratch, opts);

    // Queue timeout is 5s in the harness, so both get served in turn.
    let (a, b) = tokio::join!(
        p.orchestrator.handle(request(TaskKind::Leaf, None, JPEG)),
        p.orchestrator.handle(request(TaskKind::Leaf, None, JPEG)),
    );
    assert!(a.unwrap().success);
    assert!(b.unwrap().success);
    assert_eq!(p.fallback.available_slots(), 1);
    assert_eq!(scratch.staged_files(), 0);
}
