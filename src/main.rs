use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

use slotguard::calendar::{CalendarProvider, GoogleCalendar, MemoryCalendar};
use slotguard::clock::SystemClock;
use slotguard::command::Dispatcher;
use slotguard::config::Config;
use slotguard::dedup::DedupGate;
use slotguard::orchestrator::Orchestrator;
use slotguard::reaper;
use slotguard::store::Store;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Responses go to stdout; keep logs on stderr.
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let config = Config::from_env();
    slotguard::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let store = Arc::new(Store::open(config.wal_path())?);

    let calendar: Arc<dyn CalendarProvider> = match config.calendar_token.as_deref() {
        Some(token) => Arc::new(GoogleCalendar::new(
            config.calendar_api_base.as_str(),
            token,
            config.time_zone,
            config.calendar_timeout,
        )?),
        None => {
            tracing::warn!("SLOTGUARD_CALENDAR_TOKEN not set, using in-memory calendar");
            Arc::new(MemoryCalendar::new())
        }
    };

    let clock = Arc::new(SystemClock);
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        calendar,
        clock.clone(),
        config.hold_ttl_ms(),
    ));
    let gate = Arc::new(DedupGate::new(config.dedup_capacity));
    let dispatcher = Dispatcher::new(orchestrator.clone(), gate);

    tokio::spawn(reaper::run_sweeper(orchestrator, config.sweep_interval));
    tokio::spawn(reaper::run_compactor(store.clone(), clock, config.compact_threshold));

    info!("slotguard ready, reading commands from stdin");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  hold_ttl: {}s", config.hold_ttl.as_secs());
    info!("  time_zone: {}", config.time_zone);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!("cannot register SIGTERM handler: {e}");
                    ctrl_c.await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("stdin closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let response = dispatcher.handle_line(&line).await;
                stdout.write_all(response.to_string().as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    info!(
        resources = store.resource_count(),
        bookings = store.booking_count(),
        "slotguard stopped"
    );
    Ok(())
}
