//! cropsight-ctl — command-line interface for the cropsight daemon.

mod cmd;

use anyhow::{Context, Result};

const DEFAULT_PORT: u16 = 9100;
const DEFAULT_OWNER: &str = "local";

fn print_usage() {
    println!("Usage: cropsight-ctl [--port N] [--owner ID] <command>");
    println!();
    println!("Commands:");
    println!("  status                                  Pipeline counters and backend health");
    println!("  predict <leaf|bunga> <image> [--request-id ID]");
    println!("                                          Analyse one image");
    println!("  history <leaf|bunga>                    Past analyses for the owner");
    println!("  delete <leaf|bunga> <analysis-id>       Delete one analysis");
    println!("  help                                    Show this message");
    println!();
    println!("The owner defaults to $CROPSIGHT_OWNER, then \"{DEFAULT_OWNER}\".");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    // Parse global options
    let mut port = DEFAULT_PORT;
    let mut owner = std::env::var("CROPSIGHT_OWNER").unwrap_or_else(|_| DEFAULT_OWNER.to_string());
    let mut request_id: Option<String> = None;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--port" => {
                i += 1;
                port = args
                    .get(i)
                    .context("--port requires a value")?
                    .parse()
                    .context("--port must be a number")?;
            }
            "--owner" => {
                i += 1;
                owner = args.get(i).context("--owner requires a value")?.clone();
            }
            "--request-id" => {
                i += 1;
                request_id = Some(args.get(i).context("--request-id requires a value")?.clone());
            }
            other => remaining.push(other),
        }
        i += 1;
    }

    let client = cmd::http::Client::new(port, &owner);
    match remaining.as_slice() {
        ["status"] | [] => cmd::status::cmd_status(&client).await,
        ["predict", task, image] => cmd::predict::cmd_predict(&client, task, image, request_id.as_deref()).await,
        ["history", task] => cmd::history::cmd_history(&client, task).await,
        ["delete", task, id] => cmd::history::cmd_delete(&client, task, id).await,
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
