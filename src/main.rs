//! CLI entry point for acq-stream
//!
//! Runs the streaming modes and command sinks against a simulated acquisition
//! server with a real-time sample clock.
//!
//! # Usage
//!
//! ```bash
//! acq-stream stream --count 5
//! acq-stream fetch --period 250 --count 4
//! acq-stream gate --gate 1 --trigger -1
//! acq-stream digital-out --lines Dev6/port0/line2 --value 1
//! acq-stream mux --part NP1100 --muxed-with 25
//! acq-stream config --json
//! ```

use acq_core::{ChannelSet, Connector, StreamKind, TriggerLevel};
use acq_driver_mock::{SampleClock, SimStreamConfig, SimulatedServer, TimingConfig, Waveform};
use acq_stream::command::{DigitalOutput, GateTrigger};
use acq_stream::config::{AcqConfig, DEFAULT_CONFIG_PATH};
use acq_stream::multicast::{SharedStream, Subscription};
use acq_stream::mux::{filter_by_mux, probe_part_number};
use acq_stream::scheduler::{DemandFetcher, IntervalTrigger, PollScheduler, TimerResolution};
use acq_stream::tracing_config;
use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "acq-stream")]
#[command(about = "Stream sample buffers from an acquisition server", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Continuous, gap-free streaming
    Stream {
        /// Buffers to receive before stopping
        #[arg(long, default_value_t = 5)]
        count: usize,

        /// Concurrent subscribers sharing the connection
        #[arg(long, default_value_t = 1)]
        subscribers: usize,

        /// Override the buffer length in milliseconds
        #[arg(long)]
        buffer_ms: Option<u64>,

        /// Override the downsample factor
        #[arg(long)]
        downsample: Option<u32>,

        /// Deliver volts
        #[arg(long)]
        volts: bool,
    },

    /// Fetch the newest window on a fixed period
    Fetch {
        /// Milliseconds between fetches
        #[arg(long, default_value_t = 500)]
        period: u64,

        /// Buffers to receive before stopping
        #[arg(long, default_value_t = 5)]
        count: usize,
    },

    /// Set the recording gate and trigger (-1 no change, 0 low, 1 high)
    Gate {
        /// Gate level
        #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
        gate: i32,

        /// Trigger level
        #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
        trigger: i32,
    },

    /// Write a value to digital output lines
    DigitalOut {
        /// Line selector, passed to the server as is
        #[arg(long)]
        lines: String,

        /// Value to write
        #[arg(long)]
        value: i32,
    },

    /// Restrict the configured channels to one mux group
    Mux {
        /// Probe part number; read from the server's geometry map if omitted
        #[arg(long)]
        part: Option<String>,

        /// Channel whose mux group to keep
        #[arg(long)]
        muxed_with: u32,
    },

    /// Print the effective configuration after file and environment merging
    Config {
        /// Print JSON instead of TOML
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AcqConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if config.stream.channels.is_empty() {
        config.stream.channels = vec![0, 1, 2, 3];
    }
    config.validate()?;
    tracing_config::init_from_config(&config)?;

    let server = simulated_server(&config);
    info!(
        app = %config.application.name,
        endpoint = %config.server,
        stream = %config.stream.stream_id(),
        "simulated acquisition server ready"
    );

    match cli.command {
        Commands::Stream {
            count,
            subscribers,
            buffer_ms,
            downsample,
            volts,
        } => {
            if let Some(ms) = buffer_ms {
                config.acquisition.buffer_length_ms = ms;
            }
            if let Some(ds) = downsample {
                config.acquisition.downsample = ds;
            }
            config.acquisition.convert_to_volts |= volts;
            run_stream(&config, server, count, subscribers.max(1)).await
        }
        Commands::Fetch { period, count } => run_fetch(&config, server, period, count).await,
        Commands::Gate { gate, trigger } => {
            let mut sink = GateTrigger::open(
                &server,
                &config.server,
                level_from_code(gate)?,
                level_from_code(trigger)?,
            )?;
            sink.fire()?;
            drop(sink);
            print_commands(&server);
            Ok(())
        }
        Commands::DigitalOut { lines, value } => {
            let mut sink = DigitalOutput::open(&server, &config.server, lines)?;
            sink.write(value)?;
            drop(sink);
            print_commands(&server);
            Ok(())
        }
        Commands::Mux { part, muxed_with } => run_mux(&config, &server, part, muxed_with),
        Commands::Config { json } => {
            let rendered = if json {
                serde_json::to_string_pretty(&config)?
            } else {
                toml::to_string_pretty(&config)?
            };
            println!("{}", rendered);
            Ok(())
        }
    }
}

fn simulated_server(config: &AcqConfig) -> SimulatedServer {
    let (rate, n_channels) = match config.stream.kind {
        StreamKind::Probe => (30_000.0, 384),
        StreamKind::Daq => (25_000.0, 16),
        StreamKind::OneBox => (30_000.0, 12),
    };
    let max_channel = config.stream.channels.iter().copied().max().unwrap_or(0) + 1;
    let stream = SimStreamConfig::new(rate, n_channels.max(max_channel)).with_waveform(
        Waveform::Sine {
            amplitude: 8_000,
            period: 300,
            noise: 40,
        },
    );
    SimulatedServer::builder()
        .stream(config.stream.stream_id(), stream)
        .probe(config.stream.substream, "NP1100")
        .clock(SampleClock::Realtime)
        .timing(TimingConfig::realistic())
        .build()
}

async fn run_stream(
    config: &AcqConfig,
    server: SimulatedServer,
    count: usize,
    subscribers: usize,
) -> Result<()> {
    let scheduler = PollScheduler::new(
        Arc::new(server.clone()),
        config.stream_spec()?,
        config.poll_options(),
    )?;
    let stream = scheduler.into_shared(config.acquisition.subscriber_capacity);

    let mut subs: Vec<Subscription> = (0..subscribers).map(|_| stream.subscribe()).collect();
    for received in 0..count {
        for (i, sub) in subs.iter_mut().enumerate() {
            receive_one(sub, i, received).await?;
        }
    }
    drop(subs);
    wait_for_release(&stream, &server).await;
    Ok(())
}

async fn run_fetch(
    config: &AcqConfig,
    server: SimulatedServer,
    period: u64,
    count: usize,
) -> Result<()> {
    if period == 0 {
        bail!("--period must be positive");
    }
    let trigger = IntervalTrigger::new(
        Duration::from_millis(period),
        TimerResolution::from_high_resolution(config.acquisition.high_resolution_timer),
    );
    let fetcher = DemandFetcher::new(
        Arc::new(server.clone()),
        config.stream_spec()?,
        Arc::new(trigger),
        config.demand_options(),
    )?;
    let stream = fetcher.into_shared(config.acquisition.subscriber_capacity);

    let mut sub = stream.subscribe();
    for received in 0..count {
        receive_one(&mut sub, 0, received).await?;
    }
    drop(sub);
    wait_for_release(&stream, &server).await;
    Ok(())
}

async fn receive_one(sub: &mut Subscription, subscriber: usize, index: usize) -> Result<()> {
    let buffer = sub
        .recv()
        .await
        .ok_or_else(|| anyhow!("stream ended early"))??;
    let first = buffer.value(0, 0).unwrap_or(f64::NAN);
    println!(
        "[sub {}] #{:<3} samples {:>8}..{:<8} {} ch x {} cols  first={:.4}{}",
        subscriber,
        index,
        buffer.sample_range().start,
        buffer.sample_range().end,
        buffer.n_channels(),
        buffer.n_samples(),
        first,
        if buffer.is_volts() { " V" } else { "" }
    );
    Ok(())
}

async fn wait_for_release(stream: &SharedStream, server: &SimulatedServer) {
    for _ in 0..100 {
        if server.stats().active_connections == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let stats = server.stats();
    println!(
        "session active: {}, connects: {}, disconnects: {}",
        stream.is_active(),
        stats.connects,
        stats.disconnects
    );
}

fn run_mux(
    config: &AcqConfig,
    server: &SimulatedServer,
    part: Option<String>,
    muxed_with: u32,
) -> Result<()> {
    let part = match part {
        Some(part) => part,
        None => {
            let mut conn = server.connect(&config.server)?;
            probe_part_number(conn.as_mut(), config.stream.substream)?
        }
    };
    let channels: ChannelSet = config.stream.channel_set()?;
    let filtered = filter_by_mux(&channels, &part, muxed_with)?;
    println!("{} channels muxed with {}: {:?}", part, muxed_with, filtered.as_slice());
    Ok(())
}

fn level_from_code(code: i32) -> Result<TriggerLevel> {
    match code {
        -1 => Ok(TriggerLevel::NoChange),
        0 => Ok(TriggerLevel::SetLow),
        1 => Ok(TriggerLevel::SetHigh),
        other => bail!("invalid level {} (expected -1, 0 or 1)", other),
    }
}

fn print_commands(server: &SimulatedServer) {
    for command in server.commands() {
        println!("sent {:?}", command);
    }
}
