use anyhow::Result;
use clap::Parser;
use meeting_attendant::{events, Config, EventSink, LocalStorage, SlotPool};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "meeting-attendant", version, about = "Meeting attendance session orchestrator")]
struct Args {
    /// Configuration file (extension optional)
    #[arg(long, default_value = "config/meeting-attendant")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;

    info!("Meeting Attendant v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);
    info!(
        "Sessions: max {} concurrent, queue {}",
        cfg.sessions.max_concurrent,
        if cfg.sessions.max_queued == 0 {
            "unbounded".to_string()
        } else {
            cfg.sessions.max_queued.to_string()
        }
    );
    info!(
        "Cadence: audio {}s, tracking {}s, watch {}s ({} empty checks over {}s)",
        cfg.timing.audio_interval_secs,
        cfg.timing.tracking_interval_secs,
        cfg.timing.watch_interval_secs,
        cfg.timing.empty_confirmations,
        cfg.timing.empty_window_secs
    );

    let pool = SlotPool::new(&cfg.pool);
    let stats = pool.stats();
    info!(
        "Slot pool: {} registered, ceiling {}, primary '{}'",
        stats.total, cfg.pool.max_slots, cfg.pool.primary_slot
    );

    let storage = LocalStorage::open(&cfg.storage.data_dir).await?;
    info!("Data directory: {:?}", storage.root());

    let sink = events::connect(&cfg.nats).await?;
    match &cfg.nats.url {
        Some(url) => info!("Publishing session events to {} ({}.*)", url, cfg.nats.subject_prefix),
        None => info!("No NATS url configured, session events go to the log"),
    }

    info!("Configuration OK; browser, attendance and audio collaborators are provided by the embedding service");
    sink.flush().await?;

    Ok(())
}
