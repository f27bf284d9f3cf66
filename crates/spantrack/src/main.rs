//! Spantrack - span tracing engine
//!
//! Ingests span lifecycle events, stores them, streams them to live
//! observers, and keeps running counts per node on the client side.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use spantrack_client::{RunningCountService, SpantrackClient};
use spantrack_core::config::{ConfigLoader, SpantrackConfig, StorageBackend};
use spantrack_core::{SpanEvent, SpanStatus, UpsertEvent, UpsertState};
use spantrack_web::{AppState, Broadcaster, WebConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "spantrack")]
#[command(version)]
#[command(about = "Span tracing engine with live running counts", long_about = None)]
struct Cli {
    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log format (json, text)
    #[arg(short, long, default_value = "text", global = true)]
    format: String,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "SPANTRACK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ingestion, query, and realtime server
    Serve {
        /// Host to bind
        #[arg(long)]
        host: Option<String>,

        /// Port to bind
        #[arg(long)]
        port: Option<u16>,

        /// Storage backend (sqlite, memory)
        #[arg(long)]
        storage: Option<StorageBackend>,

        /// SQLite database path
        #[arg(long)]
        db_path: Option<PathBuf>,
    },

    /// Follow running counts from a server
    Watch {
        /// Server base URL
        #[arg(long)]
        endpoint: Option<String>,

        /// Seed window in hours
        #[arg(long)]
        lookback_hours: Option<i64>,

        /// Do not re-seed after a reconnect
        #[arg(long)]
        no_reseed: bool,
    },

    /// Submit one lifecycle event
    Emit {
        /// Server base URL
        #[arg(long)]
        endpoint: Option<String>,

        /// Lifecycle state
        #[arg(long, value_enum)]
        state: StateArg,

        /// Trace id (generated if omitted)
        #[arg(long)]
        trace_id: Option<String>,

        /// Span id (generated if omitted)
        #[arg(long)]
        span_id: Option<String>,

        #[arg(long)]
        parent: Option<String>,

        #[arg(long)]
        label: Option<String>,

        /// running, ok, error, cancelled
        #[arg(long)]
        status: Option<SpanStatus>,

        #[arg(long)]
        node_id: Option<String>,

        #[arg(long)]
        thread_id: Option<String>,

        /// Attribute as key=value; JSON values are parsed, anything else is a string
        #[arg(long = "attr")]
        attributes: Vec<String>,

        /// Append a named span event
        #[arg(long = "event")]
        events: Vec<String>,

        #[arg(long)]
        idempotency_key: Option<String>,
    },

    /// Generate synthetic agent and tool spans against a server
    Demo {
        /// Server base URL
        #[arg(long)]
        endpoint: Option<String>,

        /// Number of agent runs to generate (0 = infinite)
        #[arg(long, default_value = "10")]
        count: u64,

        /// Delay between lifecycle steps in milliseconds
        #[arg(long, default_value = "500")]
        interval: u64,

        /// Number of distinct nodes
        #[arg(long, default_value = "3")]
        nodes: usize,
    },

    /// Show server health and span totals
    Status {
        /// Server base URL
        #[arg(long)]
        endpoint: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum StateArg {
    Created,
    Updated,
    Completed,
}

impl From<StateArg> for UpsertState {
    fn from(arg: StateArg) -> Self {
        match arg {
            StateArg::Created => UpsertState::Created,
            StateArg::Updated => UpsertState::Updated,
            StateArg::Completed => UpsertState::Completed,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration file
    let config = load_config(cli.config.clone());

    // Setup logging - CLI verbose flag takes precedence, then config
    let log_level = if cli.verbose > 0 {
        match cli.verbose {
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    } else {
        match config.server.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN,
        }
    };
    init_logging(log_level, &cli.format)?;

    match cli.command {
        Commands::Serve {
            host,
            port,
            storage,
            db_path,
        } => {
            let mut config = config;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(backend) = storage {
                config.storage.backend = backend;
            }
            if let Some(path) = db_path {
                config.storage.path = path.to_string_lossy().to_string();
            }
            serve_command(config).await
        }
        Commands::Watch {
            endpoint,
            lookback_hours,
            no_reseed,
        } => {
            let mut settings = config.projection.clone();
            if let Some(endpoint) = endpoint {
                settings.endpoint = endpoint;
            }
            if let Some(hours) = lookback_hours {
                settings.lookback_hours = hours;
            }
            if no_reseed {
                settings.reseed_on_reconnect = false;
            }
            settings.validate()?;
            watch_command(settings).await
        }
        Commands::Emit {
            endpoint,
            state,
            trace_id,
            span_id,
            parent,
            label,
            status,
            node_id,
            thread_id,
            attributes,
            events,
            idempotency_key,
        } => {
            let mut event = UpsertEvent::new(
                state.into(),
                trace_id.unwrap_or_else(new_id),
                span_id.unwrap_or_else(new_id),
            );
            event.parent_span_id = parent;
            event.label = label;
            event.status = status;
            event.node_id = node_id;
            event.thread_id = thread_id;
            event.idempotency_key = idempotency_key;
            for attr in &attributes {
                let (key, value) = parse_attribute(attr)?;
                event.attributes.insert(key, value);
            }
            event.events = events.into_iter().map(SpanEvent::new).collect();

            let client = client_for(&config, endpoint)?;
            emit_command(&client, &event).await
        }
        Commands::Demo {
            endpoint,
            count,
            interval,
            nodes,
        } => {
            let client = client_for(&config, endpoint)?;
            demo_command(&client, count, Duration::from_millis(interval), nodes.max(1)).await
        }
        Commands::Status { endpoint } => {
            let client = client_for(&config, endpoint)?;
            status_command(&client).await
        }
    }
}

fn init_logging(level: Level, format: &str) -> anyhow::Result<()> {
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if format.eq_ignore_ascii_case("json") {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

/// Load configuration from file/env, with fallback to defaults
fn load_config(cli_path: Option<PathBuf>) -> SpantrackConfig {
    let loader = ConfigLoader::new().with_cli_path(cli_path);
    match loader.load() {
        Ok(config) => config,
        Err(e) => {
            // Logging is not installed yet
            eprintln!("Failed to load configuration: {}, using defaults", e);
            SpantrackConfig::default()
        }
    }
}

fn client_for(
    config: &SpantrackConfig,
    endpoint: Option<String>,
) -> anyhow::Result<SpantrackClient> {
    let endpoint = endpoint.unwrap_or_else(|| config.projection.endpoint.clone());
    SpantrackClient::new(&endpoint, config.projection.connect_timeout())
        .with_context(|| format!("Failed to create client for {}", endpoint))
}

fn new_id() -> String {
    ulid::Ulid::new().to_string().to_lowercase()
}

/// Split `key=value`, parsing the value as JSON when possible
fn parse_attribute(raw: &str) -> anyhow::Result<(String, serde_json::Value)> {
    let (key, value) = raw
        .split_once('=')
        .with_context(|| format!("Attribute must be key=value: {}", raw))?;
    let key = key.trim();
    if key.is_empty() {
        anyhow::bail!("Attribute key is empty: {}", raw);
    }
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

async fn serve_command(config: SpantrackConfig) -> anyhow::Result<()> {
    ConfigLoader::validate(&config)?;

    let store = spantrack_store::open_store(&config.storage)
        .with_context(|| format!("Failed to open {:?} span store", config.storage.backend))?;
    let broadcaster = Broadcaster::new(config.broadcast.buffer_size);
    let state = Arc::new(AppState::new(store, broadcaster));

    info!("Starting Spantrack v{}", spantrack_core::VERSION);
    spantrack_web::start_server(WebConfig::from(&config.server), state).await
}

async fn watch_command(settings: spantrack_core::config::ProjectionSettings) -> anyhow::Result<()> {
    println!();
    println!("  Spantrack v{} - running counts", spantrack_core::VERSION);
    println!("  Server: {}", settings.endpoint);
    println!();

    let service = RunningCountService::new(settings)?;
    service.subscribe(|change, counts| {
        for c in &change.changes {
            println!("  {:<40} {} -> {}", c.key.to_string(), c.previous, c.current);
        }
        println!("  total running: {}", counts.total());
        Ok(())
    });

    let mut status = service.status();
    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow_and_update();
                info!(
                    connected = current.connected,
                    seeds = current.seed_attempts,
                    "Realtime status"
                );
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    println!();
    for (key, count) in service.snapshot() {
        println!("  {:<40} {}", key.to_string(), count);
    }
    service.dispose();
    Ok(())
}

async fn emit_command(client: &SpantrackClient, event: &UpsertEvent) -> anyhow::Result<()> {
    let response = client.upsert(event).await?;
    println!(
        "{}",
        serde_json::json!({
            "success": response.success,
            "traceId": event.trace_id,
            "spanId": response.span_id,
        })
    );
    Ok(())
}

async fn demo_command(
    client: &SpantrackClient,
    count: u64,
    interval: Duration,
    nodes: usize,
) -> anyhow::Result<()> {
    println!();
    println!("  Spantrack v{} - DEMO MODE", spantrack_core::VERSION);
    println!("  Server: {}", client.base_url());
    if count > 0 {
        println!("  Will generate {} agent runs", count);
    } else {
        println!("  Generating agent runs indefinitely");
    }
    println!();

    const TOOLS: [&str; 3] = ["tool:search", "tool:shell", "tool:read_file"];

    let mut run = 0u64;
    while count == 0 || run < count {
        let trace_id = new_id();
        let agent_id = new_id();
        let node_id = format!("node-{}", run as usize % nodes);

        client
            .upsert(
                &UpsertEvent::created(&trace_id, &agent_id)
                    .with_label("agent.run")
                    .with_node_id(&node_id)
                    .with_status(SpanStatus::Running)
                    .with_attribute("kind", serde_json::json!("agent"))
                    .with_idempotency_key(format!("{}-start", agent_id)),
            )
            .await?;
        tokio::time::sleep(interval).await;

        let tool_id = new_id();
        let tool = TOOLS[run as usize % TOOLS.len()];
        client
            .upsert(
                &UpsertEvent::created(&trace_id, &tool_id)
                    .with_label(tool)
                    .with_parent(&agent_id)
                    .with_node_id(&node_id)
                    .with_status(SpanStatus::Running),
            )
            .await?;
        tokio::time::sleep(interval).await;

        let tool_status = if run % 5 == 4 {
            SpanStatus::Error
        } else {
            SpanStatus::Ok
        };
        client
            .upsert(&UpsertEvent::completed(&trace_id, &tool_id).with_status(tool_status))
            .await?;
        client
            .upsert(
                &UpsertEvent::updated(&trace_id, &agent_id)
                    .with_event(SpanEvent::new("tool_result"))
                    .with_attribute("lastTool", serde_json::json!(tool)),
            )
            .await?;
        client
            .upsert(
                &UpsertEvent::completed(&trace_id, &agent_id)
                    .with_status(SpanStatus::Ok)
                    .with_idempotency_key(format!("{}-end", agent_id)),
            )
            .await?;

        info!(
            trace_id = %trace_id,
            node = %node_id,
            tool,
            status = %tool_status,
            "Demo run complete"
        );
        run += 1;
    }

    println!("  Generated {} agent runs", run);
    Ok(())
}

async fn status_command(client: &SpantrackClient) -> anyhow::Result<()> {
    println!();
    println!("Spantrack v{}", spantrack_core::VERSION);
    println!("Server: {}", client.base_url());
    println!();

    match client.health().await {
        Ok(health) => {
            println!("  Live: {}", health["status"].as_str().unwrap_or("unknown"));
            println!("  Server version: {}", health["version"].as_str().unwrap_or("unknown"));
        }
        Err(e) => {
            warn!("Health check failed: {}", e);
            println!("  Live: unreachable ({})", e);
            return Ok(());
        }
    }

    match client.ready().await {
        Ok(ready) => {
            println!("  Store: {}", ready["store"].as_str().unwrap_or("unknown"));
            println!("  Spans stored: {}", ready["spans"]);
            println!("  Realtime observers: {}", ready["observers"]);
        }
        Err(e) => println!("  Ready: no ({})", e),
    }

    let running = client
        .query_spans(&spantrack_core::SpanQuery::running())
        .await
        .map(|spans| spans.len().to_string())
        .unwrap_or_else(|e| format!("unknown ({})", e));
    println!("  Running spans: {}", running);
    println!();
    Ok(())
}
