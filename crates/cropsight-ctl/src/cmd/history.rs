//! History commands.

use anyhow::Result;
use serde::Deserialize;
use serde_json::Value;

use super::http::Client;

#[derive(Deserialize)]
struct HistoryResponse {
    count: usize,
    history: Vec<Analysis>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Analysis {
    id: String,
    result_snapshot: Value,
    processing_time_ms: u64,
    created_at: u64,
}

#[derive(Deserialize)]
struct DeleteResponse {
    message: String,
}

pub async fn cmd_history(client: &Client, task: &str) -> Result<()> {
    let resp: HistoryResponse = client.get_json(&format!("/history/{}", task)).await?;

    if resp.history.is_empty() {
        println!("No {} analyses yet.", task);
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  {} history ({})", task, resp.count);
    println!("═══════════════════════════════════════");
    for a in &resp.history {
        let label = a.result_snapshot.get("label").and_then(Value::as_str).unwrap_or("-");
        let confidence = a
            .result_snapshot
            .get("confidence")
            .and_then(Value::as_f64)
            .map(|c| format!("{:.1}%", c))
            .unwrap_or_else(|| "-".to_string());
        println!("  ┌─ {}", a.id);
        println!("  │  label      : {}", label);
        println!("  │  confidence : {}", confidence);
        println!("  │  took       : {} ms", a.processing_time_ms);
        println!("  └─ created    : {} (unix ms)", a.created_at);
    }
    Ok(())
}

pub async fn cmd_delete(client: &Client, task: &str, id: &str) -> Result<()> {
    let resp: DeleteResponse = client.delete_json(&format!("/history/{}/{}", task, id)).await?;
    println!("{}", resp.message);
    Ok(())
}
