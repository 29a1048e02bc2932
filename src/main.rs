use std::error::Error;

use tokio::io::BufReader;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, trace};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

mod agent;
mod cli;
mod config;
mod connectivity;
mod event;
mod indicator;
mod link;
mod policy;
mod reader;
mod types;
mod util;

use crate::agent::ScanAgent;
use crate::config::{Config, LedConfig};
use crate::connectivity::TcpProbe;
use crate::indicator::{IndicatorSink, LogIndicator, SysfsLeds};
use crate::link::HttpLink;
use crate::reader::{LineReader, TagReader};

fn initialize_tracing() {
    // Initialize tracing subscriber for human-readable logs
    tracing_subscriber::registry()
        .with(
            // Use some log defaults. These can be overriden using
            // RUST_LOG
            EnvFilter::try_from_default_env().unwrap_or(
                EnvFilter::default()
                    .add_directive("debug".parse().unwrap())
                    .add_directive("hyper=error".parse().unwrap())
                    .add_directive("hyper_util=error".parse().unwrap())
                    .add_directive("reqwest=info".parse().unwrap()),
            ),
        )
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_span_events(FmtSpan::CLOSE)
                .event_format(fmt::format().compact().with_target(false).without_time()),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    initialize_tracing();

    let cli = cli::parse();
    let config = Config::load(cli).await?;

    let shutdown = CancellationToken::new();
    listen_for_signals(shutdown.clone())?;

    start_scanner(config, shutdown).await?;

    Ok(())
}

/// Cancel `shutdown` on the first SIGINT or SIGTERM
fn listen_for_signals(shutdown: CancellationToken) -> std::io::Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = terminate.recv() => info!("received SIGTERM"),
            _ = interrupt.recv() => info!("received SIGINT"),
        }
        shutdown.cancel();
    });

    Ok(())
}

fn indicator(leds: Option<LedConfig>) -> Box<dyn IndicatorSink + Send> {
    let Some(leds) = leds else {
        return Box::new(LogIndicator::default());
    };

    let mut sink = SysfsLeds::new(leds.root);
    if let Some(led) = leds.error {
        sink = sink.with_error(led);
    }
    if let Some(led) = leds.success {
        sink = sink.with_success(led);
    }
    if let Some(led) = leds.blocked {
        sink = sink.with_blocked(led);
    }
    Box::new(sink)
}

#[instrument(name = "scanlink", skip_all, err)]
async fn start_scanner(config: Config, shutdown: CancellationToken) -> Result<(), Box<dyn Error>> {
    trace!(
        agent = ?config.agent,
        endpoint = %config.link.endpoint,
        probe = ?config.probe,
        leds = ?config.leds,
        reader = ?config.reader_device,
        "using config:"
    );

    // Scanners in keyboard-wedge or serial mode write one tag per line
    let reader: Box<dyn TagReader + Send> = match &config.reader_device {
        Some(path) => Box::new(LineReader::open(path).await?),
        None => Box::new(LineReader::new(BufReader::new(tokio::io::stdin()))),
    };
    let connectivity = TcpProbe::new(config.probe.address, config.probe.timeout);
    let link = HttpLink::new(config.link);

    let agent = ScanAgent::new(
        config.agent,
        config.policy,
        reader,
        connectivity,
        link,
        indicator(config.leds),
    );

    agent.run(shutdown).await?;

    Ok(())
}
