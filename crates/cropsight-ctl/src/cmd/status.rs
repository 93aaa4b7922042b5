//! Status command.

use anyhow::Result;
use serde::Deserialize;

use super::http::Client;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    pipeline: Pipeline,
    primary_enabled: bool,
    primary_healthy: bool,
    worker_slots_available: usize,
    staged_files: usize,
    history_enabled: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Pipeline {
    requests: u64,
    primary_hits: u64,
    fallback_runs: u64,
    failures: u64,
    persisted: u64,
}

pub async fn cmd_status(client: &Client) -> Result<()> {
    let resp: StatusResponse = client.get_json("/status").await?;

    let primary = match (resp.primary_enabled, resp.primary_healthy) {
        (false, _) => "disabled",
        (true, true) => "healthy",
        (true, false) => "unreachable",
    };

    println!("═══════════════════════════════════════");
    println!("  Cropsight Daemon Status");
    println!("═══════════════════════════════════════");
    println!("  Resident service : {}", primary);
    println!("  Worker slots free: {}", resp.worker_slots_available);
    println!("  Staged files     : {}", resp.staged_files);
    println!("  History          : {}", if resp.history_enabled { "enabled" } else { "disabled" });
    println!();
    println!("  Requests         : {}", resp.pipeline.requests);
    println!("  Primary answers  : {}", resp.pipeline.primary_hits);
    println!("  Fallback runs    : {}", resp.pipeline.fallback_runs);
    println!("  Failures         : {}", resp.pipeline.failures);
    println!("  Saved analyses   : {}", resp.pipeline.persisted);

    Ok(())
}
