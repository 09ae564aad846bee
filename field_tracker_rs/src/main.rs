use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use field_tracker_rs::permission::HostPermissions;
use field_tracker_rs::platform::{HostState, SystemClock};
use field_tracker_rs::reporter::HttpReporter;
use field_tracker_rs::sampler::{GatedSampler, LatestFixProvider};
use field_tracker_rs::store::FileStore;
use field_tracker_rs::{
    Collaborators, CycleOutcome, DurableQueue, Fix, LocationSample, SyncOrchestrator,
    TrackerConfig,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "field_tracker")]
#[command(about = "Inspect, fill and flush the pending location queue", long_about = None)]
struct Args {
    /// Storage directory (holds pending_locations.json)
    #[arg(long, default_value = "field_tracker_data")]
    data_dir: PathBuf,

    /// JSON config file; defaults are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show queue length and the capture-time range
    Status,

    /// Deliver everything queued to the backend
    Flush {
        /// Bearer token for the backend
        #[arg(long, env = "FIELD_TRACKER_TOKEN", hide_env_values = true)]
        token: String,
    },

    /// Queue a sample by hand (e.g. replaying a field log)
    Enqueue {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        /// Horizontal accuracy in meters
        #[arg(long)]
        accuracy: Option<f64>,
        /// Battery level, percent
        #[arg(long, default_value_t = 0)]
        battery: u8,
        #[arg(long, default_value_t = false)]
        real_time: bool,
    },

    /// Drop every queued sample
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => TrackerConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => TrackerConfig::default(),
    };

    let store = Arc::new(
        FileStore::open(&args.data_dir)
            .await
            .with_context(|| format!("opening storage {}", args.data_dir.display()))?,
    );
    let storage_dir = store.dir().to_path_buf();
    let queue = Arc::new(DurableQueue::new(store, config.queue.max_pending));

    match args.command {
        Command::Status => {
            let pending = queue.drain(None).await?;
            println!(
                "[{}] {} pending sample(s) in {}",
                ts_now(),
                pending.len(),
                storage_dir.display()
            );
            if let (Some(first), Some(last)) = (pending.first(), pending.last()) {
                println!("  Oldest: {}", first.recorded_at().to_rfc3339());
                println!("  Newest: {}", last.recorded_at().to_rfc3339());
                let real_time = pending.iter().filter(|s| s.is_real_time).count();
                println!("  Real-time: {}", real_time);
            }
        }
        Command::Flush { token } => {
            let host = HostState::new();
            host.set_token(Some(token));
            host.set_connected(true);

            // No position source here; the flush path never samples
            let sampler = GatedSampler::new(
                Arc::new(HostPermissions::new()),
                Arc::new(LatestFixProvider::new(config.max_fix_age())),
                config.position_timeout(),
            );
            let reporter = HttpReporter::from_config(&config)?;

            let orchestrator = SyncOrchestrator::new(
                &config,
                queue.clone(),
                Collaborators {
                    sampler: Arc::new(sampler),
                    reporter: Arc::new(reporter),
                    tokens: Arc::new(host.clone()),
                    connectivity: Arc::new(host.clone()),
                    battery: Arc::new(host),
                    clock: Arc::new(SystemClock),
                },
            );

            let outcome = orchestrator.sync_queue().await;
            println!("[{}] Flush: {}", ts_now(), outcome);
            match outcome {
                CycleOutcome::Deferred { .. } | CycleOutcome::Dropped { .. } => {
                    bail!("flush incomplete, {} left queued", queue.len().await?)
                }
                _ => {}
            }
        }
        Command::Enqueue {
            lat,
            lon,
            accuracy,
            battery,
            real_time,
        } => {
            if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
                bail!("coordinates out of range: {}, {}", lat, lon);
            }
            let sample = LocationSample::new(Fix::new(lat, lon, accuracy), battery, real_time, Utc::now());
            let report = queue.enqueue(sample).await?;
            println!("[{}] Queued ({} pending)", ts_now(), report.pending);
            if report.evicted > 0 {
                println!("  Evicted {} oldest sample(s) at the cap", report.evicted);
            }
        }
        Command::Clear => {
            let count = queue.len().await?;
            queue.clear().await?;
            println!("[{}] Cleared {} sample(s)", ts_now(), count);
        }
    }

    Ok(())
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
