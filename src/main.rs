use anyhow::Context;
use clap::{Parser, ValueEnum};
use logtide::Pipeline;
use logtide_core::config::{Config, PollerConfig};
use logtide_core::query::MessageQuery;
use logtide_core::{FlushEvent, LogRecord};
use std::io::{BufWriter, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// `timestamp LEVEL [thread] logger - message`
    Raw,
    /// One JSON object per line.
    Jsonl,
}

#[derive(Parser)]
#[command(name = "logtide", about = "logtide: headless concurrent log ingestion")]
struct Cli {
    /// TCP port to listen on (overrides the config file).
    #[arg(long)]
    port: Option<u16>,

    /// Do not start the TCP listener.
    #[arg(long)]
    no_tcp: bool,

    /// URL to poll for records. Repeatable.
    #[arg(long = "poll", value_name = "URL")]
    poll: Vec<String>,

    /// Poll interval for `--poll` URLs, in whole seconds.
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
    interval: u64,

    /// Config file (default: $XDG_CONFIG_HOME/logtide/config.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Raw)]
    format: OutputFormat,

    /// Only print records whose message matches this query.
    #[arg(long)]
    filter: Option<String>,

    /// Serve `GET /diagnostics` on this address.
    #[arg(long)]
    diagnostics_addr: Option<SocketAddr>,

    /// Write logs to this file instead of stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long)]
    debug: bool,
}

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let default = if cli.debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_env("RUST_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    match &cli.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .with_env_filter(filter)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(filter)
                .init();
        }
    }
    Ok(())
}

fn build_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(port) = cli.port {
        config.tcp.port = port;
    }
    if cli.no_tcp {
        config.tcp.enabled = false;
    }
    config.pollers.extend(cli.poll.iter().map(|url| PollerConfig {
        url: url.clone(),
        interval_secs: cli.interval,
    }));
    config.validate()?;
    Ok(config)
}

fn render(record: &LogRecord, format: OutputFormat) -> anyhow::Result<String> {
    Ok(match format {
        OutputFormat::Jsonl => serde_json::to_string(record)?,
        OutputFormat::Raw => {
            let mut line = format!(
                "{} {:<5}",
                record.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                record.level
            );
            if !record.thread.is_empty() {
                line.push_str(&format!(" [{}]", record.thread));
            }
            if !record.logger.is_empty() {
                line.push_str(&format!(" {} -", record.logger));
            }
            line.push(' ');
            line.push_str(&record.message);
            line
        }
    })
}

/// Print flushed records to stdout until the channel closes or stdout goes
/// away.
async fn print_events(
    mut events: mpsc::Receiver<FlushEvent>,
    format: OutputFormat,
    query: Option<MessageQuery>,
) -> anyhow::Result<()> {
    let stdout = std::io::stdout();
    while let Some(event) = events.recv().await {
        let mut out = BufWriter::new(stdout.lock());
        match write_event(&mut out, &event, format, query.as_ref()) {
            Ok(()) => {}
            Err(e) if is_broken_pipe(&e) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn write_event(
    out: &mut impl Write,
    event: &FlushEvent,
    format: OutputFormat,
    query: Option<&MessageQuery>,
) -> anyhow::Result<()> {
    for record in &event.records {
        if query.is_some_and(|q| !q.matches(record.full_text())) {
            continue;
        }
        writeln!(out, "{}", render(record, format)?)?;
    }
    out.flush()?;
    Ok(())
}

fn is_broken_pipe(err: &anyhow::Error) -> bool {
    err.downcast_ref::<std::io::Error>()
        .is_some_and(|e| e.kind() == std::io::ErrorKind::BrokenPipe)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;
    let config = build_config(&cli)?;

    let (tx, rx) = mpsc::channel(64);
    let pipeline = Pipeline::start(&config, Some(tx)).await?;

    if let Some(addr) = cli.diagnostics_addr {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding diagnostics endpoint on {addr}"))?;
        let router = pipeline.probe().router();
        tracing::info!(%addr, "serving diagnostics");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!(error = %e, "diagnostics server stopped");
            }
        });
    }

    let query = cli.filter.as_deref().and_then(MessageQuery::parse);
    let mut printer = tokio::spawn(print_events(rx, cli.format, query));

    let finished = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("listening for ctrl-c")?;
            tracing::info!("interrupted; shutting down");
            None
        }
        joined = &mut printer => Some(joined),
    };

    pipeline.shutdown().await;
    let joined = match finished {
        Some(joined) => joined,
        None => printer.await,
    };
    joined.context("output task panicked")?
}
