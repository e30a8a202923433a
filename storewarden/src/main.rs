// storewarden/src/main.rs
//
// Storewarden — storefront visitor risk tracking daemon
//
// Two feed modes:
//   tail    — follow a live JSONL feed of visit payloads written by the
//             collection gateway
//   replay  — replay a captured feed at scaled speed (testing/research)
//
// Usage:
//   storewarden --mode tail --path /var/log/warden/visits.jsonl
//   storewarden --mode replay --path captured.jsonl --speed 10.0

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use storewarden::alerts::AlertManager;
use storewarden::api::QueryServer;
use storewarden::enrich::SignalProvider;
use storewarden::error::IngestError;
use storewarden::events::{Alert, VisitPayload};
use storewarden::ingest::Pipeline;
use storewarden::state::store::StateStore;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "storewarden",
    about   = "Storefront visitor risk tracking and copycat detection",
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    #[arg(long, value_enum, default_value = "tail")]
    mode: Mode,

    #[arg(long, default_value = "/tmp/storewarden_feed.jsonl",
          help = "JSONL visit feed path (tail/replay modes)")]
    path: PathBuf,

    #[arg(long, default_value = "1.0", help = "Replay speed multiplier")]
    speed: f64,

    #[arg(long, default_value = "/tmp/storewarden_output",
          help = "Alert output directory")]
    output: PathBuf,

    #[arg(long, default_value = "127.0.0.1:7461",
          help = "Dashboard query API bind address")]
    api_addr: SocketAddr,

    #[arg(long, default_value = "https://api.signals.example",
          help = "Signal provider base URL")]
    provider_url: String,
}

#[derive(Clone, ValueEnum)]
enum Mode {
    Tail,   // follow a live JSONL feed
    Replay, // replay a static JSONL file at scaled speed
}

// ── Terminal output ───────────────────────────────────────────────────────────

fn print_banner() {
    println!("\x1b[1m  storewarden\x1b[0m");
    println!("  \x1b[90mStorefront visitor risk tracking | copycat detection\x1b[0m\n");
}

fn print_alert(alert: &Alert) {
    use storewarden::events::RiskLevel;
    let level = storewarden::scoring::level_for(alert.risk_score);
    let (color, icon) = match level {
        RiskLevel::Critical => ("\x1b[91;1m", "!!"),
        RiskLevel::High => ("\x1b[93;1m", "! "),
        _ => ("\x1b[96m", "· "),
    };
    let reset = "\x1b[0m";
    let factors = alert
        .risk_factors
        .iter()
        .take(3)
        .map(|f| f.signal.as_str())
        .collect::<Vec<_>>()
        .join(" | ");

    println!("\n{}{} ALERT {}{}", color, icon, level, reset);
    println!("  Store   : {}", alert.store_id);
    println!("  Visitor : {}{}{}", color, alert.visitor_id, reset);
    println!("  Score   : {}{}{}", color, alert.risk_score, reset);
    println!("  Factors : {}", factors);
}

async fn print_stats_loop(store: Arc<StateStore>, start: Instant) {
    loop {
        tokio::time::sleep(tokio::time::Duration::from_secs(30)).await;
        let elapsed = start.elapsed().as_secs_f64();
        let events = store.total_events.load(std::sync::atomic::Ordering::Relaxed);
        println!(
            "\n\x1b[1m── stats  uptime={:.0}s  events={}  eps={:.1}  sessions={}  visitors={}  alerts={} ──\x1b[0m",
            elapsed,
            events,
            events as f64 / elapsed,
            store.n_sessions(),
            store.n_visitors(),
            store.n_alerts(),
        );
    }
}

// ── Event sources ─────────────────────────────────────────────────────────────

async fn tail_jsonl(path: PathBuf, tx: mpsc::Sender<VisitPayload>, seek_end: bool) -> Result<()> {
    let file = tokio::fs::File::open(&path).await?;
    let mut lines = BufReader::new(file).lines();

    if seek_end {
        while lines.next_line().await?.is_some() {} // consume existing
    }

    info!("Tailing {}", path.display());
    loop {
        match lines.next_line().await? {
            Some(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<VisitPayload>(line) {
                    Ok(payload) => {
                        if tx.send(payload).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Parse error: {}", e),
                }
            }
            None => tokio::time::sleep(tokio::time::Duration::from_millis(50)).await,
        }
    }
    Ok(())
}

async fn replay_jsonl(path: PathBuf, tx: mpsc::Sender<VisitPayload>, speed: f64) -> Result<()> {
    let content = tokio::fs::read_to_string(&path).await?;
    let mut payloads: Vec<(f64, VisitPayload)> = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Ok(p) = serde_json::from_str::<VisitPayload>(line) {
            let ts = p.timestamp.map(|t| t.timestamp_millis() as f64).unwrap_or(0.0);
            payloads.push((ts, p));
        }
    }

    if payloads.is_empty() {
        return Ok(());
    }
    payloads.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());

    let base_ts = payloads[0].0;
    let base_wall = Instant::now();

    for (ts, mut payload) in payloads {
        let offset = (ts - base_ts) / speed / 1000.0;
        let target = base_wall + std::time::Duration::from_secs_f64(offset.max(0.0));
        let now = Instant::now();
        if target > now {
            tokio::time::sleep(target - now).await;
        }
        payload.timestamp = None; // stamped at ingestion
        if tx.send(payload).await.is_err() {
            break;
        }
    }
    Ok(())
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("storewarden=info".parse()?),
        )
        .compact()
        .init();

    let cli = Cli::parse();
    let store = Arc::new(StateStore::new());
    let alerts = Arc::new(AlertManager::new(cli.output.clone()));
    let provider = Arc::new(SignalProvider::from_env(&cli.provider_url));
    if matches!(provider.as_ref(), SignalProvider::Disabled) {
        warn!(
            "{} not set; ingesting with client signals only",
            storewarden::enrich::PROVIDER_KEY_ENV
        );
    }
    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(&store),
        provider,
        Arc::clone(&alerts),
    ));
    let start = Instant::now();
    let (tx, mut rx) = mpsc::channel::<VisitPayload>(16384);

    print_banner();

    // Stats printer
    tokio::spawn(print_stats_loop(Arc::clone(&store), start));

    // Dashboard query API
    let server = Arc::new(QueryServer::new(
        Arc::clone(&store),
        Arc::clone(&alerts),
        cli.api_addr,
    ));
    tokio::spawn(async move {
        if let Err(e) = server.serve().await {
            error!("Query API failed: {}", e);
        }
    });

    // Feed source
    match cli.mode {
        Mode::Tail => {
            println!("  Mode: \x1b[96mTAIL\x1b[0m  |  {}", cli.path.display());
            println!("  Output: \x1b[90m{}\x1b[0m", cli.output.display());
            println!("  Query API: \x1b[90m{}\x1b[0m\n", cli.api_addr);
            let path = cli.path.clone();
            tokio::spawn(async move { tail_jsonl(path, tx, true).await.ok(); });
        }
        Mode::Replay => {
            println!(
                "  Mode: \x1b[93mREPLAY\x1b[0m  |  {}  speed={:.1}x",
                cli.path.display(),
                cli.speed
            );
            println!("  Output: \x1b[90m{}\x1b[0m", cli.output.display());
            println!("  Query API: \x1b[90m{}\x1b[0m\n", cli.api_addr);
            let path = cli.path.clone();
            let speed = cli.speed;
            tokio::spawn(async move { replay_jsonl(path, tx, speed).await.ok(); });
        }
    }

    println!("  Press Ctrl+C to stop.\n");

    // Main consumer — one task per event; same-key writes serialize on the
    // store's entry locks.
    while let Some(payload) = rx.recv().await {
        let p = Arc::clone(&pipeline);
        tokio::spawn(async move {
            match p.process(payload).await {
                Ok(Some(alert)) => print_alert(&alert),
                Ok(None) => {}
                Err(IngestError::Validation(field)) => {
                    warn!("Rejected visit: missing {}", field)
                }
                Err(e) => error!("Ingest failed: {}", e),
            }
        });
    }

    Ok(())
}
