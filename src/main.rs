//! Home Telemetry server binary
//!
//! Runs the ingest/query HTTP service, applies schema migrations, pushes
//! local snapshots to a remote server, and offers a couple of local
//! debugging commands.

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use futures_util::StreamExt;
use home_telemetry::{
    metrics::collector::default_node_id, normalize, run_agent, start_web_server, store::schema,
    AppState, Delivery, IngestClient, Labels, MetricsProvider, Snapshot, SqliteStore,
    SystemCollector, WebConfig, DEFAULT_INTERVAL_MS, DEFAULT_REQUEST_TIMEOUT_MS,
    DEFAULT_WEB_PORT,
};
use std::io::Read;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "home_telemetry")]
#[command(about = "Home Telemetry - CPU/GPU metrics ingestion and query service")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = "Collects node snapshots over HTTP, stores them in SQLite and serves per-node time series")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// SQLite database URL
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://telemetry.db", global = true)]
    database_url: String,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Apply schema migrations and exit
    Migrate,

    /// Collect local snapshots and push them to a remote server
    Agent(AgentArgs),

    /// Collect a single local snapshot and print it
    Snapshot(SnapshotArgs),

    /// Print the samples a snapshot document normalizes to
    Normalize(NormalizeArgs),
}

#[derive(Args)]
struct ServeArgs {
    /// Web server bind address
    #[arg(long, env = "HTTP_HOST", default_value = "0.0.0.0", global = true)]
    host: String,

    /// Web server port
    #[arg(short, long, env = "HTTP_PORT", default_value_t = DEFAULT_WEB_PORT, global = true)]
    port: u16,

    /// Bearer token required on ingest (sent on ingest by `agent`); empty disables it
    #[arg(long, env = "AUTH_TOKEN", hide_env_values = true, global = true)]
    auth_token: Option<String>,

    /// Allowed CORS origins: `*` or a comma-separated list
    #[arg(long, env = "CORS_ORIGINS", default_value = "*", global = true)]
    cors_origins: String,

    /// Disable CORS headers
    #[arg(long, global = true)]
    no_cors: bool,

    /// Per-request deadline in milliseconds
    #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT_MS, global = true)]
    request_timeout_ms: u64,

    /// Also collect this host's metrics and ingest them under the given node id
    #[arg(long, global = true)]
    local_node: Option<String>,

    /// Local collection interval in milliseconds
    #[arg(short, long, default_value_t = DEFAULT_INTERVAL_MS, global = true)]
    interval: u64,

    /// Skip the nvidia-smi query
    #[arg(long, global = true)]
    no_gpu: bool,

    /// Tag attached to locally collected snapshots (repeatable)
    #[arg(long = "tag", value_name = "KEY=VALUE", value_parser = parse_tag, global = true)]
    tags: Vec<(String, String)>,
}

#[derive(Args)]
struct AgentArgs {
    /// Base URL of the server to push to
    #[arg(long, env = "SERVER_URL", default_value = "http://localhost:8080")]
    server: String,

    /// Node id to report as; defaults to the host name
    #[arg(long, env = "NODE_ID")]
    node: Option<String>,

    /// Collect and deliver one snapshot, then exit
    #[arg(long)]
    once: bool,

    /// Print snapshots instead of sending them
    #[arg(long)]
    print_only: bool,
}

#[derive(Args)]
struct SnapshotArgs {
    /// Output format: json or pretty
    #[arg(short, long, default_value = "pretty")]
    format: String,

    /// Node id to report as; defaults to the host name
    #[arg(long)]
    node_id: Option<String>,
}

#[derive(Args)]
struct NormalizeArgs {
    /// Snapshot JSON file, or `-` for stdin
    #[arg(default_value = "-")]
    input: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&cli)?;

    match &cli.command {
        Some(Commands::Serve) | None => serve_command(&cli).await?,
        Some(Commands::Migrate) => migrate_command(&cli).await?,
        Some(Commands::Agent(args)) => agent_command(&cli, args).await?,
        Some(Commands::Snapshot(args)) => snapshot_command(&cli, args).await?,
        Some(Commands::Normalize(args)) => normalize_command(args)?,
    }

    Ok(())
}

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialise logging: {e}"))?;

    Ok(())
}

fn parse_tag(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got {raw:?}")),
    }
}

fn local_collector(node_id: String, args: &ServeArgs) -> anyhow::Result<SystemCollector> {
    let tags: Labels = args.tags.iter().cloned().collect();
    Ok(SystemCollector::new(node_id)?
        .with_gpus(!args.no_gpu)
        .with_tags(tags))
}

async fn serve_command(cli: &Cli) -> anyhow::Result<()> {
    let args = &cli.serve;
    info!("Starting Home Telemetry server...");

    let store = SqliteStore::connect(&cli.database_url)
        .await
        .with_context(|| format!("opening {}", cli.database_url))?;
    info!("Store ready at {}", cli.database_url);

    let web_config = WebConfig::new(&args.host, args.port)
        .with_cors(!args.no_cors)
        .with_cors_origins(&args.cors_origins)
        .with_auth_token(args.auth_token.clone())
        .with_request_timeout_ms(args.request_timeout_ms);

    let state = AppState::new(Arc::new(store), web_config.auth_token.clone());

    let local_stream = match &args.local_node {
        Some(node_id) => {
            let node_id = if node_id.is_empty() {
                default_node_id()
            } else {
                node_id.clone()
            };
            let mut collector = local_collector(node_id.clone(), args)?;
            let stream = collector.start_stream(args.interval).await?;
            info!(
                "Local collection for {} every {}ms",
                node_id, args.interval
            );
            Some(stream)
        }
        None => None,
    };

    info!("Web server configuration:");
    info!("  - Bind address: {}", web_config.bind_address());
    info!("  - CORS enabled: {}", web_config.enable_cors);
    info!("  - Ingest auth: {}", web_config.auth_token.is_some());
    info!("  - Request timeout: {}ms", web_config.request_timeout_ms);

    start_web_server(web_config, state, local_stream).await?;

    Ok(())
}

async fn migrate_command(cli: &Cli) -> anyhow::Result<()> {
    let store = SqliteStore::connect(&cli.database_url)
        .await
        .with_context(|| format!("opening {}", cli.database_url))?;
    let version = schema::current_version(store.pool()).await?;
    store.close().await;

    println!("{} is at schema version {}", cli.database_url, version);
    Ok(())
}

async fn agent_command(cli: &Cli, args: &AgentArgs) -> anyhow::Result<()> {
    let node_id = args
        .node
        .clone()
        .filter(|n| !n.is_empty())
        .unwrap_or_else(default_node_id);

    let delivery = if args.print_only {
        Delivery::Print
    } else {
        Delivery::Send(IngestClient::new(&args.server, cli.serve.auth_token.clone())?)
    };

    let mut collector = local_collector(node_id.clone(), &cli.serve)?;
    info!(
        "Agent starting: node={} interval={}ms server={}",
        node_id, cli.serve.interval, args.server
    );

    let stream = collector.start_stream(cli.serve.interval).await?;
    let stream = if args.once { stream.take(1).boxed() } else { stream };

    let delivered = run_agent(stream, &delivery).await;
    info!("Agent delivered {} snapshot(s)", delivered);

    Ok(())
}

async fn snapshot_command(cli: &Cli, args: &SnapshotArgs) -> anyhow::Result<()> {
    let node_id = args.node_id.clone().unwrap_or_else(default_node_id);
    let mut collector = local_collector(node_id, &cli.serve)?;
    let snapshot = collector.collect_snapshot().await?;

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&snapshot)?),
        "pretty" => print_pretty_snapshot(&snapshot),
        other => bail!("Unsupported format: {other}. Use 'json' or 'pretty'"),
    }

    Ok(())
}

fn normalize_command(args: &NormalizeArgs) -> anyhow::Result<()> {
    let mut raw = String::new();
    if args.input == "-" {
        std::io::stdin()
            .read_to_string(&mut raw)
            .context("reading snapshot from stdin")?;
    } else {
        raw = std::fs::read_to_string(&args.input)
            .with_context(|| format!("reading {}", args.input))?;
    }

    let snapshot: Snapshot = serde_json::from_str(&raw).context("parsing snapshot")?;
    if snapshot.node_id.is_empty() {
        warn!("Snapshot has no node_id; the server would reject it");
    }

    let time = snapshot.resolve_timestamp(Utc::now())?;
    let samples = normalize(&snapshot, time);
    println!("{}", serde_json::to_string_pretty(&samples)?);

    Ok(())
}

fn print_pretty_snapshot(snapshot: &Snapshot) {
    println!(
        "Snapshot for {} ({})",
        snapshot.node_id,
        snapshot.timestamp.as_deref().unwrap_or("now")
    );
    println!("==========================================");
    println!();

    if let Some(cpu) = &snapshot.cpu {
        println!("CPU:");
        println!("  Usage: {:.1}%", cpu.usage_pct);
        println!("  Temperature: {:.1}°C", cpu.temp_c);
        println!("  Load: {:.2}", cpu.load_avg);
        if let Some(freq) = cpu.freq_mhz {
            println!("  Frequency: {:.0} MHz", freq);
        }
        if let Some(cores) = cpu.cores {
            println!("  Cores: {}", cores);
        }
        println!();
    }

    if snapshot.gpus.is_empty() {
        println!("GPUs: none detected");
    } else {
        println!("GPUs:");
        for gpu in &snapshot.gpus {
            println!(
                "  {}: {:.1}% @ {:.1}°C, {:.0} MB, {:.1} W",
                gpu.name, gpu.usage_pct, gpu.temp_c, gpu.mem_used_mb, gpu.power_w
            );
        }
    }

    if let Some(tags) = snapshot.tags.as_ref().filter(|t| !t.is_empty()) {
        println!();
        println!("Tags:");
        for (key, value) in tags {
            println!("  {}={}", key, value);
        }
    }
}
