use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use tracing_log::LogTracer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use campus_sync::network::{run_http_admin, DrainOutcome, SyncEvent};
use campus_sync::service::log_events;
use campus_sync::storage::{DocumentOp, DocumentOpKind, HttpMethod, HttpRequestSpec};
use campus_sync::{Config, OfflineSync};

struct RotatingFile {
    path: String,
    max_size: u64,
    max_files: u32,
    file: File,
    current_size: u64,
}

fn init_logging() {
    if let Err(e) = LogTracer::init() {
        eprintln!("log bridge not installed: {e}");
    }

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339());

    // CAMPUS_SYNC_LOG_FILE mirrors every record into a size-rotated plain
    // text file next to the structured stderr output.
    let file_layer = std::env::var("CAMPUS_SYNC_LOG_FILE").ok().and_then(|path| {
        let max_size_mb = std::env::var("CAMPUS_SYNC_LOG_MAX_SIZE_MB")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(10);
        let max_files = std::env::var("CAMPUS_SYNC_LOG_MAX_FILES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(3);

        match RotatingFile::new(path.clone(), max_size_mb * 1024 * 1024, max_files) {
            Ok(rot) => Some(file_layer(rot)),
            Err(e) => {
                eprintln!("cannot open log file {path}: {e}");
                None
            }
        }
    });

    if let Err(e) = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(file_layer)
        .try_init()
    {
        eprintln!("logging not initialised: {e}");
    }
}

fn file_layer<S>(rot: RotatingFile) -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_writer(Mutex::new(rot))
}

impl RotatingFile {
    fn new(path: String, max_size: u64, max_files: u32) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let current_size = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            path,
            max_size,
            max_files,
            file,
            current_size,
        })
    }

    // path.N-1 -> path.N, ..., path -> path.1
    fn rotate(&mut self) -> io::Result<()> {
        for i in (1..self.max_files).rev() {
            let src = format!("{}.{}", self.path, i);
            let dst = format!("{}.{}", self.path, i + 1);
            let _ = std::fs::rename(&src, &dst);
        }

        let _ = std::fs::rename(&self.path, format!("{}.1", self.path));

        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.current_size = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.current_size + buf.len() as u64 > self.max_size {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.current_size += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[derive(Parser)]
#[command(name = "campus-sync")]
#[command(about = "Offline write queue and replay daemon for the school management client")]
struct Cli {
    /// JSON config file; CAMPUS_SYNC_* environment variables override it
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Queue an HTTP request for replay
    EnqueueHttp {
        /// GET, POST, PUT, PATCH or DELETE
        #[arg(short, long)]
        method: HttpMethod,
        /// Absolute URL or a path relative to the API base
        #[arg(short, long)]
        url: String,
        #[arg(short, long)]
        body: Option<String>,
        /// Extra header as name=value; may be repeated
        #[arg(long = "header")]
        headers: Vec<String>,
    },

    /// Queue a document create, update or delete
    EnqueueDoc {
        #[arg(short, long)]
        op: DocumentOpKind,
        #[arg(short, long)]
        collection: String,
        #[arg(short, long)]
        doc_id: Option<String>,
        /// Document fields as a JSON object
        #[arg(long)]
        data: Option<String>,
    },

    /// List pending mutations, oldest first
    List,

    /// Drop a pending mutation without replaying it
    Discard { id: String },

    /// Probe the backend and print queue and connectivity status
    Status,

    /// Probe once and drain both queues if the backend is reachable
    Sync,

    /// Monitor connectivity and drain automatically until interrupted
    Run {
        /// Serve /health and /metrics on this address, e.g. 127.0.0.1:9400
        #[arg(long)]
        admin: Option<String>,
    },
}

fn load_config(path: Option<&str>) -> anyhow::Result<Config> {
    let mut config = match path {
        Some(p) => Config::load(p).with_context(|| format!("loading config from {p}"))?,
        None => Config::default(),
    };
    config.apply_env()?;
    Ok(config)
}

fn parse_headers(raw: &[String]) -> anyhow::Result<std::collections::BTreeMap<String, String>> {
    raw.iter()
        .map(|h| match h.split_once('=') {
            Some((name, value)) if !name.trim().is_empty() => {
                Ok((name.trim().to_string(), value.trim().to_string()))
            }
            _ => bail!("invalid header '{h}', expected name=value"),
        })
        .collect()
}

fn print_outcome(label: &str, outcome: &DrainOutcome) {
    match outcome {
        DrainOutcome::Skipped => println!("{label}: drain already running"),
        DrainOutcome::Offline => println!("{label}: offline, nothing replayed"),
        DrainOutcome::Completed(report) => {
            print!(
                "{label}: applied={} discarded={} remaining={}",
                report.applied, report.discarded, report.remaining
            );
            if let Some(err) = &report.last_error {
                print!(" last_error={err}");
            }
            println!();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let sync = Arc::new(OfflineSync::open(&config).context("opening offline queues")?);

    match cli.command {
        Command::EnqueueHttp {
            method,
            url,
            body,
            headers,
        } => {
            let id = sync.queue_request(HttpRequestSpec {
                method,
                url,
                headers: parse_headers(&headers)?,
                body,
            })?;
            println!("{id}");
        }
        Command::EnqueueDoc {
            op,
            collection,
            doc_id,
            data,
        } => {
            let data = data
                .map(|raw| serde_json::from_str::<serde_json::Value>(&raw))
                .transpose()
                .context("--data must be valid JSON")?;
            let id = sync.queue_document_op(DocumentOp {
                op,
                collection,
                doc_id,
                data,
            })?;
            println!("{id}");
        }
        Command::List => {
            for mutation in sync.pending()? {
                println!(
                    "{}\t{}\t{}\tattempts={}",
                    mutation.id,
                    mutation.kind(),
                    mutation.payload.resource(),
                    mutation.attempts
                );
            }
        }
        Command::Discard { id } => {
            if !sync.discard(&id)? {
                bail!("no pending mutation with id {id}");
            }
            println!("discarded {id}");
        }
        Command::Status => {
            sync.check_online().await;
            let snapshot = sync.status().await;
            println!("{}", if snapshot.connectivity.online { "online" } else { "offline" });
            println!("pending generic: {}", snapshot.pending_generic);
            println!("pending document: {}", snapshot.pending_document);
            if let Some(message) = sync.banner().message() {
                println!("{message}");
            }
        }
        Command::Sync => {
            if !sync.check_online().await {
                warn!("Backend unreachable; {} mutations stay queued", sync.queue_length());
            }
            let mut events = sync.subscribe();
            let (generic, document) = sync.sync_now().await;
            while let Ok(event) = events.try_recv() {
                if let SyncEvent::LostWrite { id, resource, reason, .. } = event {
                    println!("lost write {id} on {resource}: {reason}");
                }
            }
            print_outcome("generic", &generic);
            print_outcome("document", &document);
        }
        Command::Run { admin } => {
            if let Some(addr) = admin {
                let listener = std::net::TcpListener::bind(&addr)
                    .with_context(|| format!("binding admin listener on {addr}"))?;
                info!("Admin HTTP listening on {addr}");
                let admin_sync = Arc::clone(&sync);
                tokio::spawn(async move {
                    if let Err(e) = run_http_admin(listener, admin_sync).await {
                        error!("HTTP admin server error: {e}");
                    }
                });
            }

            tokio::spawn(log_events(sync.subscribe()));

            info!(
                "Watching {} with {} pending mutations",
                config.health_url(),
                sync.queue_length()
            );
            tokio::select! {
                _ = Arc::clone(&sync).run() => {}
                _ = tokio::signal::ctrl_c() => info!("Shutting down"),
            }
        }
    }

    Ok(())
}
