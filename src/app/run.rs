use crate::cli::app_config::{Cli, Command};
use crate::cli::settings::{ClientSettings, ServerSettings, TraceSettings};
use crate::client::orchestrator::{Experiment, Orchestrator, RunReport};
use crate::http::transport::HyperTransport;
use crate::metrics::MetricsRecorder;
use crate::payload;
use crate::server::dispatcher::PayloadServer;
use crate::server::selector::PayloadSet;
use crate::timing::TRACE_TARGET;
use crate::tls::config::{client_config, server_config};
use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;

pub enum RunOutcome {
    Client(RunReport),
    Server,
}

pub async fn main_with_error() -> Result<RunOutcome, anyhow::Error> {
    let cli: Cli = Cli::parse();

    run(cli).await
}

async fn run(cli: Cli) -> Result<RunOutcome, anyhow::Error> {
    match cli.command {
        Command::Client(args) => {
            let settings = ClientSettings::try_from(args)?;
            let _guard = init_logging(cli.verbosity, &settings.trace, "client")?;
            let report = run_client(&settings).await?;
            Ok(RunOutcome::Client(report))
        }
        Command::Server(args) => {
            let settings = ServerSettings::try_from(args)?;
            let _guard = init_logging(cli.verbosity, &settings.trace, "server")?;
            let shutdown = CancellationToken::new();
            let on_signal = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Shutting down");
                }
                on_signal.cancel();
            });
            run_server(&settings, shutdown).await?;
            Ok(RunOutcome::Server)
        }
    }
}

/// Installs the console subscriber, plus the event trace file layer when
/// enabled. The returned guard flushes the trace file on drop.
fn init_logging(
    verbosity: u8,
    trace: &TraceSettings,
    perspective: &str,
) -> Result<Option<WorkerGuard>, anyhow::Error> {
    let log_level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy()
        .add_directive("hyper_util=off".parse()?)
        .add_directive("rustls=off".parse()?)
        .add_directive(format!("{}=off", TRACE_TARGET).parse()?);
    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_span_events(FmtSpan::NONE)
        .with_filter(filter);

    let (trace_layer, guard) = if trace.enabled {
        std::fs::create_dir_all(&trace.dir)
            .with_context(|| format!("Failed to create {}", trace.dir.display()))?;
        let file_name = format!("{}_{}.qlog", perspective, std::process::id());
        let appender = tracing_appender::rolling::never(&trace.dir, &file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(writer)
            .with_filter(Targets::new().with_target(TRACE_TARGET, Level::TRACE));
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    let _ = tracing_subscriber::registry()
        .with(console)
        .with(trace_layer)
        .try_init();
    if trace.enabled {
        info!(
            "Event trace enabled, writing {}/{}_{}.qlog",
            trace.dir.display(),
            perspective,
            std::process::id()
        );
    }
    Ok(guard)
}

pub async fn run_client(settings: &ClientSettings) -> Result<RunReport, anyhow::Error> {
    let body = payload::generate(settings.body_size)?;
    let recorder = Arc::new(MetricsRecorder::open(&settings.metrics_path).await?);
    let transport = if settings.base_uri.scheme_str() == Some("https") {
        let tls = client_config(
            settings.skip_certificate_validate,
            settings.certificate_path.as_deref(),
        )?;
        HyperTransport::new(Some(Arc::new(tls)))
    } else {
        HyperTransport::plaintext()
    };

    let experiment = Experiment {
        target: settings.target()?,
        body,
        concurrency: settings.concurrency,
        deadline: settings.deadline,
    };
    let report = Orchestrator::new(Arc::new(transport), recorder.clone())
        .run(&experiment)
        .await?;
    info!("Metrics appended to {}", recorder.path().display());
    Ok(report)
}

pub async fn run_server(
    settings: &ServerSettings,
    shutdown: CancellationToken,
) -> Result<(), anyhow::Error> {
    let tls = match &settings.tls {
        Some((cert, key)) => Some(Arc::new(server_config(cert, key)?)),
        None => {
            warn!("No certificate given, serving plaintext HTTP");
            None
        }
    };
    info!("Creating payloads...");
    let payloads = Arc::new(PayloadSet::generate(settings.base_size)?);
    PayloadServer::bind(&settings.addr, payloads, tls)
        .await?
        .serve(shutdown)
        .await
}
