//! meshmap-ctl — command-line interface for the meshmap daemon.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

const DEFAULT_ADDR: &str = "127.0.0.1:8084";

// ── Response types ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct NodeStatus {
    records: usize,
    exceptions: usize,
    peers: Vec<PeerStatus>,
}

#[derive(Deserialize)]
struct PeerStatus {
    id: String,
    connected: bool,
    redial_pending: bool,
}

#[derive(Deserialize)]
struct Resp {
    status: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: Vec<Value>,
}

// ── HTTP helpers ──────────────────────────────────────────────────────────────

fn base_url(addr: &str) -> String {
    format!("http://{}", addr)
}

async fn get_json<T: for<'de> Deserialize<'de>>(url: &str) -> Result<T> {
    reqwest::get(url)
        .await
        .with_context(|| format!("failed to connect to meshmapd at {} — is it running?", url))?
        .json::<T>()
        .await
        .context("failed to parse response")
}

async fn delete_json(url: &str, body: String) -> Result<Resp> {
    reqwest::Client::new()
        .delete(url)
        .header("Content-Type", "application/json")
        .body(body)
        .send()
        .await
        .with_context(|| format!("failed to connect to meshmapd at {} — is it running?", url))?
        .json::<Resp>()
        .await
        .context("failed to parse response")
}

// ── Subcommand handlers ───────────────────────────────────────────────────────

async fn cmd_status(addr: &str) -> Result<()> {
    let resp: NodeStatus = get_json(&format!("{}/api/v1/status", base_url(addr))).await?;

    println!("═══════════════════════════════════════");
    println!("  Meshmap Node Status");
    println!("═══════════════════════════════════════");
    println!("  Records    : {}", resp.records);
    println!("  Exceptions : {}", resp.exceptions);
    println!("  Peers      : {}", resp.peers.len());

    if !resp.peers.is_empty() {
        println!();
        for p in &resp.peers {
            let state = match (p.connected, p.redial_pending) {
                (true, false) => "connected",
                (true, true) => "connected (reconnect pending)",
                (false, _) => "unconnected",
            };
            println!("  {} — {}", p.id, state);
        }
    }

    Ok(())
}

async fn cmd_records(addr: &str, query: &str) -> Result<()> {
    let url = if query.is_empty() {
        format!("{}/api/v1/records", base_url(addr))
    } else {
        format!("{}/api/v1/records?{}", base_url(addr), query)
    };
    let resp: Resp = get_json(&url).await?;

    if resp.status != "success" {
        anyhow::bail!("server error: {}", resp.error.unwrap_or_default());
    }
    println!("{}", serde_json::to_string_pretty(&resp.data)?);
    Ok(())
}

async fn cmd_exceptions(addr: &str, query: &str) -> Result<()> {
    let url = if query.is_empty() {
        format!("{}/api/v1/exceptions", base_url(addr))
    } else {
        format!("{}/api/v1/exceptions?{}", base_url(addr), query)
    };
    let resp: Resp = get_json(&url).await?;

    if resp.status != "success" {
        anyhow::bail!("server error: {}", resp.error.unwrap_or_default());
    }
    println!("{}", serde_json::to_string_pretty(&resp.data)?);
    Ok(())
}

async fn cmd_delete(addr: &str, path: &str, ids: &[&str]) -> Result<()> {
    let body = serde_json::to_string(ids)?;
    let resp = delete_json(&format!("{}{}", base_url(addr), path), body).await?;

    if resp.status != "success" {
        anyhow::bail!(
            "delete failed: {}",
            resp.error.unwrap_or_else(|| "unknown error".into())
        );
    }
    println!("Deleted {} id(s) on all peers.", ids.len());
    Ok(())
}

fn print_usage() {
    println!("Usage: meshmap-ctl [--addr <host:port>] <command>");
    println!();
    println!("Commands:");
    println!("  status                      Show node, store, and peer link state");
    println!("  records [query]             List records (query e.g. 'src_name=host-a')");
    println!("  records-del <id>...         Delete records by id on all peers");
    println!("  exceptions [query]          List exceptions across peers");
    println!("  exceptions-del <id>...      Delete exceptions by id on all peers");
    println!();
    println!("Options:");
    println!("  --addr <host:port>   HTTP API address (default: {})", DEFAULT_ADDR);
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    // Parse --addr option
    let mut addr = DEFAULT_ADDR.to_string();
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--addr" {
            i += 1;
            addr = args
                .get(i)
                .context("--addr requires a value")?
                .clone();
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["status"] | [] => cmd_status(&addr).await,
        ["records"] => cmd_records(&addr, "").await,
        ["records", query] => cmd_records(&addr, query).await,
        ["records-del", ids @ ..] if !ids.is_empty() => {
            cmd_delete(&addr, "/api/v1/records", ids).await
        }
        ["exceptions"] => cmd_exceptions(&addr, "").await,
        ["exceptions", query] => cmd_exceptions(&addr, query).await,
        ["exceptions-del", ids @ ..] if !ids.is_empty() => {
            cmd_delete(&addr, "/api/v1/exceptions", ids).await
        }
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
