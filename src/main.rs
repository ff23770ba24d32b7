//! lamco-capture-sync - synchronized capture and encode demo
//!
//! Entry point for the binary. Probes the encoders, starts the capture
//! pipeline against the synthetic display and feeds every session's packets
//! to a consumer thread until the run time elapses.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{unbounded, Sender};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lamco_capture_sync::capture::{CapturePipeline, SyntheticBackend};
use lamco_capture_sync::config::Config;
use lamco_capture_sync::encoder::{BuiltinCodecs, CodecBackend, EncoderRegistry, Packet};
use lamco_capture_sync::sync::{Event, Queue};
use lamco_capture_sync::utils::format_user_error;

/// Command-line arguments for lamco-capture-sync
#[derive(Parser, Debug)]
#[command(name = "lamco-capture-sync")]
#[command(version, about = "Synchronized multi-session capture and encode", long_about = None)]
pub struct Args {
    /// Configuration file path (built-in defaults when omitted)
    #[arg(short, long, env = "LAMCO_CAPTURE_CONFIG")]
    pub config: Option<String>,

    /// Preferred encoder (nvenc, amf, openh264, software)
    #[arg(short, long, env = "LAMCO_CAPTURE_ENCODER")]
    pub encoder: Option<String>,

    /// Display to capture
    #[arg(short, long, env = "LAMCO_CAPTURE_OUTPUT")]
    pub output_name: Option<String>,

    /// Number of concurrent sessions
    #[arg(short, long, default_value = "2")]
    pub sessions: u32,

    /// How long to capture before shutting the sessions down
    #[arg(short, long, default_value = "5")]
    pub duration_secs: u64,

    /// Verbose logging (can be specified multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log format (json|pretty|compact), overrides the config file
    #[arg(long)]
    pub log_format: Option<String>,

    /// Write logs to file (in addition to stdout)
    #[arg(long)]
    pub log_file: Option<String>,
}

/// What one consumer saw on its packet queue
#[derive(Debug, Default)]
struct SessionSummary {
    session: u32,
    packets: u64,
    keyframes: u64,
    bytes: u64,
    patched_bytes: u64,
    last_pts: i64,
    out_of_order: u64,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let loaded = args.config.as_deref().map(|path| {
        Config::load(path).context(format!("Failed to load configuration from {}", path))
    });
    let mut config = match loaded {
        Some(Ok(config)) => config,
        Some(Err(e)) => {
            eprintln!("{}", format_user_error(&e));
            return Err(e);
        }
        None => Config::default_config(),
    };
    if let Some(format) = &args.log_format {
        config.logging.format = format.clone();
    }
    if let Some(file) = &args.log_file {
        config.logging.file = Some(file.into());
    }

    // Keep the guard alive so buffered file output is flushed on exit
    let _guard = init_logging(&args, &config)?;

    info!("════════════════════════════════════════════════════════");
    info!("  lamco-capture-sync v{}", env!("CARGO_PKG_VERSION"));
    info!("  Built: {} {}", env!("BUILD_DATE"), env!("BUILD_TIME"));
    info!("  Commit: {}", env!("GIT_HASH"));
    info!("  Profile: {}", if cfg!(debug_assertions) { "debug" } else { "release" });
    info!("════════════════════════════════════════════════════════");

    let config = config.with_overrides(args.encoder.clone(), args.output_name.clone());
    if let Err(e) = config.validate().context("Invalid configuration") {
        eprintln!("{}", format_user_error(&e));
        return Err(e);
    }
    debug!("Config: {:?}", config);

    if let Err(e) = run(&args, &config) {
        eprintln!("{}", format_user_error(&e));
        return Err(e);
    }

    info!("lamco-capture-sync shut down");
    Ok(())
}

fn run(args: &Args, config: &Config) -> Result<()> {
    let codecs: Arc<dyn CodecBackend> = Arc::new(BuiltinCodecs::default());
    let registry = EncoderRegistry::probe(
        codecs.as_ref(),
        EncoderRegistry::candidates(),
        &config.encoder.tuning(),
    );
    let descriptor = registry
        .select(&config.encoder.encoder)
        .context("No usable encoder found")?;

    let mut displays = SyntheticBackend::new(config.session.width, config.session.height);
    if !config.capture.output_name.is_empty() {
        displays = displays.with_names([config.capture.output_name.clone()]);
    }

    let pipeline = Arc::new(CapturePipeline::new(
        Arc::new(displays),
        codecs,
        descriptor,
        config.capture_settings(),
    ));

    let (summary_tx, summary_rx) = unbounded();
    let mut shutdowns = Vec::new();
    let mut owners = Vec::new();
    let mut consumers = Vec::new();

    for session in 0..args.sessions {
        let shutdown = Arc::new(Event::new());
        let packets = Arc::new(Queue::new());

        consumers.push(spawn_consumer(session, Arc::clone(&packets), summary_tx.clone())?);

        let owner = {
            let pipeline = Arc::clone(&pipeline);
            let shutdown = Arc::clone(&shutdown);
            let packets = Arc::clone(&packets);
            let session_config = config.session;
            thread::Builder::new()
                .name(format!("session-owner-{}", session))
                .spawn(move || {
                    let result = pipeline.capture(
                        shutdown,
                        Arc::clone(&packets),
                        session_config,
                        Arc::new(session),
                    );
                    // The capture thread is done with this queue
                    packets.stop();
                    result
                })
                .context("Failed to spawn session owner")?
        };

        shutdowns.push(shutdown);
        owners.push(owner);
    }
    drop(summary_tx);

    info!(
        "Capturing with {} session(s) for {}s",
        args.sessions, args.duration_secs
    );
    thread::sleep(Duration::from_secs(args.duration_secs));

    for shutdown in &shutdowns {
        shutdown.raise();
    }
    for (session, owner) in owners.into_iter().enumerate() {
        match owner.join() {
            Ok(Ok(())) => debug!("Session {} released", session),
            Ok(Err(e)) => warn!("Session {} ended with error: {}", session, e),
            Err(_) => warn!("Session {} owner panicked", session),
        }
    }
    for consumer in consumers {
        if consumer.join().is_err() {
            warn!("Consumer thread panicked");
        }
    }
    pipeline.shutdown();

    let mut summaries: Vec<SessionSummary> = summary_rx.iter().collect();
    summaries.sort_by_key(|s| s.session);
    for s in &summaries {
        let line = format!(
            "Session {}: {} packets ({} keyframes), {} bytes encoded, {} bytes after rewrite, last pts {}",
            s.session, s.packets, s.keyframes, s.bytes, s.patched_bytes, s.last_pts
        );
        info!("{}", line);
        println!("{}", line);
        if s.out_of_order > 0 {
            warn!("Session {}: {} packets out of order", s.session, s.out_of_order);
        }
    }

    Ok(())
}

/// Drain one session's packet queue until it is stopped
fn spawn_consumer(
    session: u32,
    packets: Arc<Queue<Packet>>,
    summaries: Sender<SessionSummary>,
) -> Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("consumer-{}", session))
        .spawn(move || {
            let started = Instant::now();
            let mut summary = SessionSummary {
                session,
                ..Default::default()
            };

            while let Some(packet) = packets.pop() {
                if packet.channel_as::<u32>() != Some(&session) {
                    warn!("Session {} received a packet tagged for another channel", session);
                }
                if packet.pts <= summary.last_pts {
                    summary.out_of_order += 1;
                }
                summary.last_pts = packet.pts;
                summary.packets += 1;
                summary.bytes += packet.len() as u64;
                summary.patched_bytes += packet.apply_replacements().len() as u64;
                if packet.keyframe {
                    summary.keyframes += 1;
                }
            }

            debug!(
                "Consumer {} finished after {:.1}s",
                session,
                started.elapsed().as_secs_f32()
            );
            // Receiver only goes away if main already returned
            summaries.send(summary).ok();
        })
        .context("Failed to spawn consumer")
}

fn init_logging(args: &Args, config: &Config) -> Result<Option<WorkerGuard>> {
    let log_level = match args.verbose {
        0 => config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "lamco_capture_sync={level},lamco_capture_sync::capture::synthetic=info,warn",
            level = log_level
        ))
    });

    let format = config.logging.format.as_str();

    // If log file is specified, write to both stdout and file
    if let Some(path) = &config.logging.file {
        let directory = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| std::path::Path::new("."));
        let file_name = path
            .file_name()
            .context("Log file path has no file name")?;
        let appender = tracing_appender::rolling::never(directory, file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);

        match format {
            "json" => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stdout))
                    .with(
                        tracing_subscriber::fmt::layer()
                            .json()
                            .with_writer(writer)
                            .with_ansi(false),
                    )
                    .init();
            }
            "compact" => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stdout))
                    .with(
                        tracing_subscriber::fmt::layer()
                            .compact()
                            .with_writer(writer)
                            .with_ansi(false),
                    )
                    .init();
            }
            _ => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stdout))
                    .with(
                        tracing_subscriber::fmt::layer()
                            .with_writer(writer)
                            .with_ansi(false),
                    )
                    .init();
            }
        }
        info!("Logging to file: {}", path.display());
        return Ok(Some(guard));
    }

    // Stdout only
    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        "compact" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().compact())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(None)
}
