use anyhow::Result;
use clap::{Parser, Subcommand};
use havend::{build_context, config::HavenConfig, messaging, rest};
use tracing::info;

#[derive(Parser)]
#[command(
    name = "havend",
    about = "Haven Host — support-session daemon",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// REST API port
    #[arg(long, env = "HAVEND_PORT")]
    port: Option<u16>,

    /// Data directory for config and the SQLite database
    #[arg(long, env = "HAVEND_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "HAVEND_LOG")]
    log: Option<String>,

    /// Bind address for both listeners (default: 127.0.0.1; use 0.0.0.0 for LAN access)
    #[arg(long, env = "HAVEND_BIND")]
    bind_address: Option<String>,

    /// Write logs to this file path (rotated daily). Optional.
    #[arg(long, env = "HAVEND_LOG_FILE")]
    log_file: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the daemon in the foreground (default when no subcommand given).
    ///
    /// Examples:
    ///   havend serve
    ///   havend
    Serve,
    /// Show daemon status (running, version, uptime).
    ///
    /// Probes the health endpoint of a running daemon and prints a summary.
    /// Exits 0 if healthy, 1 if stopped or unresponsive.
    ///
    /// Examples:
    ///   havend status
    ///   havend status --json
    Status {
        /// Output as JSON for scripting
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // ── Logging setup ────────────────────────────────────────────────────────
    // Init once — must happen before any tracing calls.
    let log_level = args.log.as_deref().unwrap_or("info").to_owned();
    let log_format =
        std::env::var("HAVEND_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());
    let _file_guard = setup_logging(&log_level, args.log_file.as_deref(), &log_format);

    match args.command {
        Some(Command::Status { json }) => {
            let config = HavenConfig::new(
                args.port,
                args.data_dir,
                Some("error".to_string()),
                args.bind_address,
            );
            std::process::exit(run_status(&config, json).await);
        }
        None | Some(Command::Serve) => {
            run_server(args.port, args.data_dir, args.log, args.bind_address).await?;
        }
    }

    Ok(())
}

async fn run_server(
    port: Option<u16>,
    data_dir: Option<std::path::PathBuf>,
    log: Option<String>,
    bind_address: Option<String>,
) -> Result<()> {
    let config = HavenConfig::new(port, data_dir, log, bind_address);
    info!(
        data_dir = %config.data_dir.display(),
        port = config.port,
        realtime_port = config.realtime_port,
        "starting havend {}",
        env!("CARGO_PKG_VERSION")
    );

    let ctx = build_context(config).await?;

    let rest_ctx = ctx.clone();
    let rest_task = tokio::spawn(async move {
        if let Err(e) = rest::start_rest_server(rest_ctx).await {
            tracing::error!(err = %e, "REST server stopped");
        }
    });

    let realtime_ctx = ctx.clone();
    let realtime_task = tokio::spawn(async move {
        if let Err(e) = messaging::ws::run(realtime_ctx).await {
            tracing::error!(err = %e, "realtime listener stopped");
        }
    });

    make_shutdown_future().await;
    info!("shutdown signal received — stopping listeners");
    rest_task.abort();
    realtime_task.abort();
    Ok(())
}

/// Returns a future that resolves when a shutdown signal is received.
///
/// On Unix we listen for SIGTERM *and* Ctrl-C.
/// On other platforms we listen for Ctrl-C only.
async fn make_shutdown_future() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}

/// Initialize the tracing subscriber.
/// If `log_file` is set, logs go to both stdout and a daily-rolling file.
/// Returns a `WorkerGuard` that must stay alive for the process lifetime.
///
/// `log_format` may be `"pretty"` (default, human-readable compact format) or
/// `"json"` (structured JSON for log aggregators).
///
/// If the log directory cannot be created, falls back to stdout-only logging
/// with a warning — never panics.
fn setup_logging(
    log_level: &str,
    log_file: Option<&std::path::Path>,
    log_format: &str,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let use_json = log_format == "json";

    if let Some(path) = log_file {
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let filename = path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("havend.log"));

        // Ensure the directory exists before tracing-appender tries to open it.
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!(
                "warn: could not create log directory '{}': {e} — falling back to stdout",
                dir.display()
            );
            if use_json {
                tracing_subscriber::fmt().json().with_env_filter(log_level).init();
            } else {
                tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
            }
            return None;
        }

        let appender = tracing_appender::rolling::daily(dir, filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        if use_json {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().json())
                .with(fmt::layer().json().with_writer(non_blocking))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().compact())
                .with(fmt::layer().with_writer(non_blocking))
                .init();
        }

        Some(guard)
    } else if use_json {
        tracing_subscriber::fmt().json().with_env_filter(log_level).init();
        None
    } else {
        tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
        None
    }
}

// ── havend status ─────────────────────────────────────────────────────────────

/// Returns exit code: 0 = healthy, 1 = stopped/unresponsive.
async fn run_status(config: &HavenConfig, json: bool) -> i32 {
    let url = format!(
        "http://{}:{}/api/v1/health",
        config.bind_address, config.port
    );
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(3))
        .build();
    let Ok(client) = client else {
        eprintln!("havend: could not build HTTP client");
        return 1;
    };

    match client.get(&url).send().await {
        Ok(resp) if resp.status().is_success() => {
            let body: serde_json::Value = resp.json().await.unwrap_or_default();
            if json {
                println!("{}", serde_json::to_string(&body).unwrap_or_default());
            } else {
                let version = body["version"].as_str().unwrap_or("?");
                let uptime = format_uptime(body["uptime"].as_u64().unwrap_or(0));
                println!("havend {version} — Running (uptime {uptime})");
            }
            0
        }
        _ => {
            if json {
                println!(r#"{{"status":"not_running"}}"#);
            } else {
                println!("havend: not running");
            }
            1
        }
    }
}

/// Format uptime seconds as "2h 14m" or "45m 3s".
fn format_uptime(secs: u64) -> String {
    let h = secs / 3600;
    let m = (secs % 3600) / 60;
    let s = secs % 60;
    if h > 0 {
        format!("{h}h {m}m")
    } else if m > 0 {
        format!("{m}m {s}s")
    } else {
        format!("{s}s")
    }
}
