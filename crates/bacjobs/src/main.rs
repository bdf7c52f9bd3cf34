//! bacjobs CLI
//!
//! Runs one BACnet job against a simulated network and prints its outputs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use bacjobs::bacnet::BacnetClient;
use bacjobs::bacnet::sim::{SimFixture, SimulatedNetwork, demo_site};
use bacjobs::job::{DISCOVER_DEVICE_JOB, DISCOVER_POINT_JOB, READ_POINT_JOB, WRITE_POINT_JOB};
use bacjobs::{
    BacjobsConfig, BacnetJob, DiscoverDeviceJob, DiscoverMode, DiscoverPointJob, JobErrorKind, ReadPointJob,
    WritePointJob,
};
use job_runtime::{CoalescedJobQueue, EventSink, JobEvent, shared};

/// BACnet integration jobs
#[derive(Parser, Debug)]
#[command(name = "bacjobs")]
#[command(about = "Discover, read and write BACnet points", long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Simulated network fixture (JSON); a built-in demo site when omitted
    #[arg(short, long, global = true)]
    network: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Broadcast Who-Is and list the devices that answer
    DiscoverDevice {
        /// Restrict Who-Is to one network number
        #[arg(long)]
        net: Option<u16>,

        /// Lowest device instance to answer
        #[arg(long, requires = "high")]
        low: Option<u32>,

        /// Highest device instance to answer
        #[arg(long, requires = "low")]
        high: Option<u32>,
    },

    /// List the points of each device
    DiscoverPoint {
        /// Device list (JSON)
        #[arg(long)]
        devices: PathBuf,

        /// Include every object, not just analog, binary and multi-state
        #[arg(long)]
        full: bool,
    },

    /// Read the present value of each point
    ReadPoint {
        /// Device list (JSON)
        #[arg(long)]
        devices: PathBuf,

        /// Point list (JSON)
        #[arg(long)]
        points: PathBuf,
    },

    /// Write values to points
    WritePoint {
        /// Device list (JSON)
        #[arg(long)]
        devices: PathBuf,

        /// Point list (JSON)
        #[arg(long)]
        points: PathBuf,

        /// Map of `deviceName.pointName` to value (JSON)
        #[arg(long)]
        values: PathBuf,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let config = BacjobsConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Command::Config = args.command {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let network = Arc::new(load_network(args.network.as_deref())?);
    let client: Arc<dyn BacnetClient> = network.clone();

    let (job, source, rx) = build_job(args.command, client, &config)?;
    run(job, source, rx, &config).await?;

    let stats = network.stats();
    info!(
        who_is = stats.who_is,
        read_property = stats.read_property,
        read_property_multiple = stats.read_property_multiple,
        write_property = stats.write_property,
        peak_in_flight = stats.peak_in_flight,
        "Network statistics"
    );
    Ok(())
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bacjobs=info,job_runtime=info"));
    let (json_layer, text_layer) = if json {
        (Some(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();
}

fn load_network(path: Option<&Path>) -> Result<SimulatedNetwork> {
    let Some(path) = path else {
        info!("Using built-in demo site");
        return Ok(SimulatedNetwork::new(demo_site()));
    };
    let raw = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let fixture: SimFixture =
        serde_json::from_str(&raw).with_context(|| format!("Invalid network fixture {}", path.display()))?;
    info!(devices = fixture.devices.len(), fixture = %path.display(), "Loaded network fixture");
    Ok(SimulatedNetwork::from_fixture(fixture))
}

/// Job inputs are passed through as raw JSON; shape checks are the job's
fn read_json(path: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid JSON in {}", path.display()))
}

fn build_job(
    command: Command,
    client: Arc<dyn BacnetClient>,
    config: &BacjobsConfig,
) -> Result<(BacnetJob, &'static str, mpsc::UnboundedReceiver<JobEvent>)> {
    let job = match command {
        Command::DiscoverDevice { net, low, high } => {
            let (sink, rx) = EventSink::channel(DISCOVER_DEVICE_JOB);
            let mut job = DiscoverDeviceJob::from_config(client, sink, config);
            if net.is_some() || low.is_some() {
                job.set_range(
                    net.or(config.discover_device.network),
                    low.or(config.discover_device.low_limit),
                    high.or(config.discover_device.high_limit),
                );
            }
            (BacnetJob::from(job), DISCOVER_DEVICE_JOB, rx)
        }
        Command::DiscoverPoint { devices, full } => {
            let (sink, rx) = EventSink::channel(DISCOVER_POINT_JOB);
            let mut job = DiscoverPointJob::from_config(client, sink, read_json(&devices)?, config);
            if full {
                job.set_mode(DiscoverMode::Full);
            }
            (BacnetJob::from(job), DISCOVER_POINT_JOB, rx)
        }
        Command::ReadPoint { devices, points } => {
            let (sink, rx) = EventSink::channel(READ_POINT_JOB);
            let job = ReadPointJob::from_config(client, sink, read_json(&devices)?, read_json(&points)?, config);
            (BacnetJob::from(job), READ_POINT_JOB, rx)
        }
        Command::WritePoint {
            devices,
            points,
            values,
        } => {
            let (sink, rx) = EventSink::channel(WRITE_POINT_JOB);
            let job = WritePointJob::from_config(
                client,
                sink,
                read_json(&devices)?,
                read_json(&points)?,
                read_json(&values)?,
                config,
            );
            (BacnetJob::from(job), WRITE_POINT_JOB, rx)
        }
        Command::Config => anyhow::bail!("config does not run a job"),
    };
    Ok(job)
}

/// Start the job, submit it to a queue and relay its events until it finishes
async fn run(
    job: BacnetJob,
    source: &str,
    mut rx: mpsc::UnboundedReceiver<JobEvent>,
    config: &BacjobsConfig,
) -> Result<()> {
    let job = shared(job);
    job.lock().await.on_start().await.context("Failed to start job")?;

    let queue = Arc::new(CoalescedJobQueue::new(config.queue.clone()));
    let handle = queue.spawn();
    queue.add_job(source, Arc::clone(&job));

    let mut errors = 0usize;
    while let Some(event) = rx.recv().await {
        match event {
            JobEvent::Progress(progress) => {
                info!(job = %source, progress, "Progress");
                if progress == 100 {
                    break;
                }
            }
            JobEvent::Output(data) => println!("{}", serde_json::to_string_pretty(&data)?),
            JobEvent::Error(error) => {
                errors += 1;
                let category = JobErrorKind::from_message(&error.kind).map(JobErrorKind::category);
                warn!(job = %error.source, kind = %error.kind, ?category, detail = %error.detail, "Job error");
            }
        }
    }

    queue.stop();
    handle.await.context("Job queue task panicked")??;
    job.lock().await.on_stop().await.context("Failed to stop job")?;
    info!(job = %source, errors, "Job finished");
    Ok(())
}
