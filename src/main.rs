//! CLI entry point for garden-station.
//!
//! Wires the pieces together: load settings, start the ingestion loop on its
//! own thread, serve the web surface on the main thread. The two threads
//! share the ingestion state behind one mutex and the latest-reading cache
//! behind an `RwLock`.

use anyhow::Result;
use clap::Parser;
use garden_station::chart::ChartRefresher;
use garden_station::config::Settings;
use garden_station::ingest::{self, IngestionState};
use garden_station::link::LinkManager;
use garden_station::server;
use garden_station::store::{LatestHandle, SampleStore};
use log::info;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Parser)]
#[command(name = "garden-station")]
#[command(about = "Garden monitoring station: serial ingestion, CSV log, web dashboard", long_about = None)]
struct Cli {
    /// Path to a TOML settings file (defaults to ./garden-station.toml if
    /// present, otherwise built-in defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the serial port device path
    #[arg(long)]
    port: Option<String>,

    /// Override the HTTP bind address (e.g. 0.0.0.0:8000)
    #[arg(long)]
    bind: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::new(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        settings.serial.port = port;
    }
    if let Some(bind) = cli.bind {
        settings.http.bind = bind;
    }

    env_logger::Builder::new()
        .parse_filters(&settings.log_level)
        .init();
    info!(
        "garden-station starting (serial {}, log {}, charts {})",
        settings.serial.port,
        settings.store.log_path.display(),
        settings.charts.output_dir.display()
    );

    let latest: LatestHandle = Arc::default();
    let refresher = Arc::new(ChartRefresher::new(
        settings.store.log_path.clone(),
        &settings.charts,
    ));
    let state = Arc::new(Mutex::new(IngestionState {
        link: LinkManager::new(&settings.serial),
        store: SampleStore::new(latest.clone(), &settings.store),
    }));

    {
        let state = state.clone();
        let refresher = refresher.clone();
        std::thread::Builder::new()
            .name("ingest".into())
            .spawn(move || ingest::run(state, refresher))?;
    }

    server::serve(&settings.http, latest, refresher)?;
    Ok(())
}
