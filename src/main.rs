//! mosaicbooth - live photo mosaic server for event photobooths
//!
//! Participants capture photos on the kiosk page; each photo is assigned a
//! free grid cell, blended with the matching crop of the event's reference
//! image and persisted as a tile. The display page shows a live mosaic frame
//! rendered server-side and streamed as MJPEG.

mod allocate;
mod capture;
mod compose;
mod config;
mod error;
mod grid;
mod render;
mod server;
mod store;
mod sync;

use anyhow::{Context, Result};
use clap::Parser;
use image::{Rgb, RgbImage};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::compose::{decode_rgb, encode_jpeg};
use crate::config::Config;
use crate::error::MosaicError;
use crate::grid::Grid;
use crate::server::AppState;
use crate::store::{FsStore, ProjectSetup, TileStore};

/// mosaicbooth - live photo mosaic server for event photobooths
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Web server port (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!("mosaicbooth v{}", env!("CARGO_PKG_VERSION"));

    // Load or create configuration
    let mut config = Config::load_or_create(&args.config)?;
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let project = config.project.id.clone();
    let host = config.server.host.clone();
    let port = config.server.port;

    let store: Arc<dyn TileStore> = Arc::new(FsStore::new(&config.storage.data_dir));

    // Bootstrap the project on first run
    let setup = match store.get_setup(&project) {
        Ok(setup) => setup,
        Err(MosaicError::ProjectNotFound(_)) => {
            bootstrap_project(store.as_ref(), &project, &config)?
        }
        Err(e) => return Err(e.into()),
    };

    let grid = Grid::new(setup.rows, setup.cols)?;
    let tiles = store.list_tiles(&project)?.len();
    info!(
        "Project {:?}: {}x{} grid, {}/{} tiles",
        project,
        grid.rows(),
        grid.cols(),
        tiles,
        grid.cell_count()
    );

    let reference_bytes = store
        .reference_image(&project)
        .context("Failed to read the project reference image")?;
    let reference = decode_rgb(&reference_bytes)
        .context("Failed to decode the project reference image")?;
    info!(
        "Reference image: {}x{}",
        reference.width(),
        reference.height()
    );

    let config = Arc::new(parking_lot::RwLock::new(config));
    let state = Arc::new(AppState::new(config, store, grid, reference));
    let cancel = Arc::new(AtomicBool::new(false));

    // Start the display loop
    let display_state = state.clone();
    let display_cancel = cancel.clone();
    let display_handle =
        tokio::task::spawn_blocking(move || sync::run_display_loop(display_state, display_cancel));

    // Start the web server
    let addr = format!("{}:{}", host, port);
    info!("Display page at http://{}/  kiosk at http://{}/booth", addr, addr);

    let server_state = state.clone();
    let server_handle = tokio::spawn(async move { server::run_server(&addr, server_state).await });

    tokio::select! {
        result = display_handle => {
            match result {
                Ok(Ok(())) => info!("Display loop exited normally"),
                Ok(Err(e)) => tracing::error!("Display loop error: {}", e),
                Err(e) => tracing::error!("Display loop task panicked: {}", e),
            }
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => tracing::error!("Server error: {}", e),
                Err(e) => tracing::error!("Server task panicked: {}", e),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
        }
    }

    cancel.store(true, Ordering::SeqCst);
    Ok(())
}

/// Create the project setup and seed its reference image: the configured
/// file if one is given, otherwise a generated placeholder so the booth is
/// usable straight away.
fn bootstrap_project(
    store: &dyn TileStore,
    project: &str,
    config: &Config,
) -> Result<ProjectSetup> {
    let setup = ProjectSetup {
        rows: config.project.rows,
        cols: config.project.cols,
        reference: "reference.jpg".to_string(),
    };
    store.put_setup(project, &setup)?;

    let reference = match &config.storage.seed_reference {
        Some(path) => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("Failed to read seed reference {:?}", path))?;
            // Re-encode through the decoder so a bad seed fails here, not
            // mid-event.
            encode_jpeg(&decode_rgb(&bytes)?, 90)?
        }
        None => {
            warn!("No seed reference configured; generating a placeholder gradient");
            encode_jpeg(&placeholder_reference(1200, 750), 90)?
        }
    };
    store.put_reference_image(project, &reference)?;

    info!(
        "Created project {:?} with a {}x{} grid",
        project, setup.rows, setup.cols
    );
    Ok(setup)
}

/// Diagonal two-tone gradient used when no reference image is configured.
fn placeholder_reference(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let t = (x + y) as f32 / (width + height) as f32;
        Rgb([
            (30.0 + 160.0 * t) as u8,
            (60.0 + 80.0 * t) as u8,
            (120.0 + 100.0 * (1.0 - t)) as u8,
        ])
    })
}
