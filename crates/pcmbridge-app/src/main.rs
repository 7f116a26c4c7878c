//! # pcmbridge
//!
//! Audio bridge driven over a JSON-lines method channel.
//! Requests arrive on stdin; replies and events leave on stdout.

mod bridge;
mod protocol;

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use bridge::Bridge;
use crossbeam_channel::{unbounded, Sender};
use pcmbridge_audio::{output, CpalBackend, DeviceBackend, VirtualBackend};
use pcmbridge_core::{BridgeConfig, OutputKind};
use protocol::{Outbound, Request};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_LOG_FILTER: &str = "pcmbridge=info,pcmbridge_audio=info";

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--list-devices") {
        return list_devices();
    }

    let explicit = args.first().map(PathBuf::from);
    let source = BridgeConfig::locate(explicit.as_deref());
    let config = BridgeConfig::load(source.as_deref())?;

    // stdout carries the protocol, so logs go to stderr
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter(&config))
        .init();

    info!("Starting pcmbridge v{}", env!("CARGO_PKG_VERSION"));
    match &source {
        Some(path) => info!("Loaded config from {}", path.display()),
        None => info!("No config file found, using defaults"),
    }

    let devices: Arc<dyn DeviceBackend> = match config.output {
        OutputKind::Cpal => Arc::new(CpalBackend::new()),
        OutputKind::Virtual => Arc::new(VirtualBackend::new()),
    };
    info!("Using {} output", devices.name());

    let (out_tx, out_rx) = unbounded::<Outbound>();
    let writer = std::thread::Builder::new()
        .name("stdout-writer".to_string())
        .spawn(move || -> std::io::Result<()> {
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            for message in out_rx {
                writeln!(out, "{}", message.to_line())?;
                out.flush()?;
            }
            Ok(())
        })?;

    let mut bridge = Bridge::new(&config, devices, out_tx.clone())?;
    serve(&bridge, &out_tx)?;

    bridge.shutdown();
    drop(bridge);
    drop(out_tx);

    writer
        .join()
        .map_err(|_| anyhow!("stdout writer panicked"))??;
    info!("pcmbridge exiting");
    Ok(())
}

/// Answer stdin requests until EOF.
fn serve(bridge: &Bridge, out: &Sender<Outbound>) -> Result<()> {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let reply = match Request::parse(line) {
            Ok(request) => {
                debug!("-> {}", request.method);
                bridge.handle(&request)
            }
            Err(e) => {
                warn!("Dropping malformed request: {}", e.message);
                Some(Outbound::failure(None, e))
            }
        };

        if let Some(reply) = reply {
            if out.send(reply).is_err() {
                return Err(anyhow!("stdout writer stopped"));
            }
        }
    }
    debug!("stdin closed");
    Ok(())
}

/// `RUST_LOG`, then the config's filter, then the default.
fn env_filter(config: &BridgeConfig) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    config
        .log_filter
        .as_deref()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

fn list_devices() -> Result<()> {
    let default = output::default_device_name();
    for name in output::list_output_devices()? {
        let marker = if default.as_deref() == Some(name.as_str()) { "*" } else { " " };
        println!("{marker} {name}");
    }
    Ok(())
}
