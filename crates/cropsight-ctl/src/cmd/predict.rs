//! Predict command.

use anyhow::{Context, Result};
use reqwest::multipart;
use serde_json::Value;

use super::http::Client;

fn mime_for(path: &str) -> &'static str {
    let lower = path.to_ascii_lowercase();
    if lower.ends_with(".png") {
        "image/png"
    } else if lower.ends_with(".webp") {
        "image/webp"
    } else {
        "image/jpeg"
    }
}

pub async fn cmd_predict(client: &Client, task: &str, path: &str, request_id: Option<&str>) -> Result<()> {
    let data = std::fs::read(path).with_context(|| format!("failed to read image: {}", path))?;
    let filename = std::path::Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("image")
        .to_string();

    let part = multipart::Part::bytes(data)
        .file_name(filename)
        .mime_str(mime_for(path))?;
    let mut form = multipart::Form::new().part("image", part);
    if let Some(id) = request_id {
        form = form.text("requestId", id.to_string());
    }

    let resp: Value = client.post_multipart(&format!("/predict/{}", task), form).await?;

    let field = |key: &str| resp.get(key).cloned().unwrap_or(Value::Null);
    if resp.get("success").and_then(Value::as_bool) == Some(true) {
        println!("✓ {}", field("label").as_str().unwrap_or("(no label)"));
        if let Some(c) = field("confidence").as_f64() {
            println!("  confidence : {:.1}%", c);
        }
        if let Some(grade) = field("market_grade").as_str() {
            println!("  grade      : {}", grade);
        }
    } else {
        println!("✗ {}", field("error").as_str().unwrap_or("prediction failed"));
    }
    println!("  request    : {}", field("requestId").as_str().unwrap_or("-"));
    println!("  source     : {}", field("inferenceSource").as_str().unwrap_or("-"));
    println!("  time       : {} ms", field("processingTimeMs"));
    if let Some(id) = field("analysisId").as_str() {
        println!("  saved as   : {}", id);
    }

    Ok(())
}
