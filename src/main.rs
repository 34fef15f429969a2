/*!
 * Sensorlink CLI
 *
 * `send` streams simulated sensor readings to a collector; `collect` runs a
 * minimal collector that prints what it receives.
 */

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use sensorlink::{
    error::{EXIT_FATAL, EXIT_SUCCESS},
    logging, Collector, CollectorOptions, Framing, LatestReadings, RelayConfig, SimulatedSensors,
    StreamError, StreamOrchestrator,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "sensorlink")]
#[command(version, about = "Relay device sensor readings to a remote collector", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    /// Write JSON logs to this file instead of stdout
    #[arg(long = "log-file", value_name = "FILE", global = true)]
    log_file: Option<PathBuf>,

    /// Frame delimiting (overrides the config file)
    #[arg(long = "framing", value_enum, global = true)]
    framing: Option<FramingArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream one session of simulated readings to a collector
    Send {
        /// Collector host name or IP address
        address: String,

        /// Collector TCP port
        port: u16,

        /// Relay an imagery frame after the ranging frame
        #[arg(long)]
        imagery: bool,

        /// Simulated position as LAT,LON
        #[arg(long, value_name = "LAT,LON", default_value = "52.52,13.405", value_parser = parse_origin)]
        origin: (f64, f64),
    },

    /// Accept one sender and print every chunk or frame it delivers
    Collect {
        /// Address to listen on
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,

        /// Port to listen on
        #[arg(short = 'p', long, default_value_t = 9000)]
        port: u16,

        /// Reply with this text after the first chunk
        #[arg(long, value_name = "TEXT")]
        ack: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FramingArg {
    Raw,
    LengthPrefixed,
}

impl From<FramingArg> for Framing {
    fn from(arg: FramingArg) -> Self {
        match arg {
            FramingArg::Raw => Framing::Raw,
            FramingArg::LengthPrefixed => Framing::LengthPrefixed,
        }
    }
}

fn parse_origin(value: &str) -> Result<(f64, f64), String> {
    let (lat, lon) = value
        .split_once(',')
        .ok_or_else(|| format!("expected LAT,LON, got '{}'", value))?;
    let lat: f64 = lat.trim().parse().map_err(|e| format!("bad latitude: {}", e))?;
    let lon: f64 = lon.trim().parse().map_err(|e| format!("bad longitude: {}", e))?;
    Ok((lat, lon))
}

fn main() {
    let code = match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            e.downcast_ref::<StreamError>()
                .map(StreamError::exit_code)
                .unwrap_or(EXIT_FATAL)
        }
    };
    std::process::exit(code);
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match cli.config {
        Some(ref path) => RelayConfig::from_file(path).map_err(|e| {
            anyhow::anyhow!("Failed to load config file {}: {}", path.display(), e)
        })?,
        None => RelayConfig::default(),
    };
    config.verbose |= cli.verbose;
    if cli.log_file.is_some() {
        config.log_file = cli.log_file.clone();
    }
    if let Some(framing) = cli.framing {
        config.framing = framing.into();
    }

    if let Err(e) = logging::init_logging(&config) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;

    match cli.command {
        Commands::Send {
            address,
            port,
            imagery,
            origin,
        } => {
            config.relay_imagery |= imagery;
            runtime.block_on(send(config, &address, port, origin))
        }
        Commands::Collect { bind, port, ack } => runtime.block_on(collect(config, &bind, port, ack)),
    }
}

async fn send(config: RelayConfig, address: &str, port: u16, origin: (f64, f64)) -> anyhow::Result<()> {
    let sensors = SimulatedSensors::spawn(&config, origin);
    let board = Arc::new(LatestReadings::new());
    let orchestrator = StreamOrchestrator::new(sensors.producer_set(), board.clone(), config);

    let result = tokio::select! {
        result = orchestrator.start_and_wait(address, port) => result,
        _ = tokio::signal::ctrl_c() => {
            orchestrator.stop().await;
            Err(StreamError::Cancelled)
        }
    };

    for reading in board.snapshot() {
        println!("  {:<9} {:>7} bytes", reading.kind().as_str(), reading.len());
    }

    result?;
    println!("All frames relayed to {}:{}", address, port);
    Ok(())
}

async fn collect(config: RelayConfig, bind: &str, port: u16, ack: Option<String>) -> anyhow::Result<()> {
    let options = CollectorOptions {
        framing: config.framing,
        ack,
    };
    let collector = Collector::bind((bind, port), options)
        .await
        .with_context(|| format!("Failed to listen on {}:{}", bind, port))?;
    println!("Listening on {}", collector.local_addr()?);

    let collected = collector
        .collect_one_with(|index, frame| {
            let preview = String::from_utf8_lossy(&frame[..frame.len().min(48)]);
            println!("#{:<3} {:>7} bytes  {:?}", index, frame.len(), preview);
        })
        .await
        .context("Receive from sender failed")?;

    println!(
        "{} closed after {} chunk(s), {} bytes",
        collected.peer,
        collected.frames.len(),
        collected.total_bytes()
    );
    Ok(())
}
