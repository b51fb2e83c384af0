//! Web server for the display page, kiosk page and tile API

use anyhow::Result;
use arc_swap::ArcSwap;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use image::RgbImage;
use parking_lot::{Mutex, RwLock};
use rust_embed::RustEmbed;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::capture::process_capture;
use crate::compose::decode_rgb;
use crate::config::Config;
use crate::error::MosaicError;
use crate::grid::{Cell, Grid};
use crate::store::{TileRecord, TileStore};

/// Embedded static files for the web UI
#[derive(RustEmbed)]
#[folder = "static/"]
struct StaticAssets;

/// Shared application state
pub struct AppState {
    /// Configuration (project id, render and capture parameters)
    pub config: Arc<RwLock<Config>>,
    /// Tile persistence, injected at startup
    store: Arc<dyn TileStore>,
    /// Grid of the active project, fixed for the lifetime of the process
    grid: Grid,
    /// Decoded reference image shared by the compositor and the renderer
    reference: ArcSwap<RgbImage>,
    /// Latest rendered mosaic frame (JPEG), published by the display loop
    mosaic_frame: RwLock<Vec<u8>>,
    frames_published: AtomicU64,
    /// Serializes allocation + persistence so two concurrent captures can
    /// never pick the same free cell from stale snapshots
    capture_lock: Mutex<()>,
}

impl AppState {
    pub fn new(
        config: Arc<RwLock<Config>>,
        store: Arc<dyn TileStore>,
        grid: Grid,
        reference: RgbImage,
    ) -> Self {
        Self {
            config,
            store,
            grid,
            reference: ArcSwap::from_pointee(reference),
            mosaic_frame: RwLock::new(Vec::new()),
            frames_published: AtomicU64::new(0),
            capture_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> Arc<dyn TileStore> {
        self.store.clone()
    }

    pub fn grid(&self) -> Grid {
        self.grid
    }

    pub fn project_id(&self) -> String {
        self.config.read().project.id.clone()
    }

    pub fn reference(&self) -> Arc<RgbImage> {
        self.reference.load_full()
    }

    fn set_reference(&self, image: RgbImage) {
        self.reference.store(Arc::new(image));
    }

    /// Publish a rendered frame (called from the display loop)
    pub fn publish_frame(&self, jpeg: Vec<u8>) {
        *self.mosaic_frame.write() = jpeg;
        self.frames_published.fetch_add(1, Ordering::SeqCst);
    }

    /// Latest rendered mosaic frame; empty before the first render
    pub fn latest_frame(&self) -> Vec<u8> {
        self.mosaic_frame.read().clone()
    }

    pub fn frames_published(&self) -> u64 {
        self.frames_published.load(Ordering::SeqCst)
    }
}

/// Map an engine error to the HTTP status the UI acts on.
fn error_status(e: &MosaicError) -> StatusCode {
    match e {
        MosaicError::AllocationExhausted { .. } => StatusCode::CONFLICT,
        MosaicError::ReferenceLocked(_) => StatusCode::CONFLICT,
        MosaicError::ImageDecode(_) => StatusCode::UNPROCESSABLE_ENTITY,
        MosaicError::TileNotFound(_) | MosaicError::ProjectNotFound(_) => StatusCode::NOT_FOUND,
        MosaicError::InvalidGrid { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(e: MosaicError) -> Response {
    (error_status(&e), e.to_string()).into_response()
}

/// Run the web server
pub async fn run_server(addr: &str, state: Arc<AppState>) -> Result<()> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        // Static files and UI
        .route("/", get(display_handler))
        .route("/booth", get(booth_handler))
        .route("/static/*path", get(static_handler))
        // Project and tile API
        .route("/api/projects/:project/setup", get(get_setup))
        .route("/api/projects/:project/tiles", get(list_tiles))
        .route("/api/projects/:project/tiles", delete(reset_tiles))
        .route("/api/projects/:project/tiles/:id", delete(delete_tile))
        .route("/api/projects/:project/tiles/:id/image", get(get_tile_image))
        .route("/api/projects/:project/capture", post(capture))
        .route("/api/projects/:project/reference", get(get_reference))
        .route("/api/projects/:project/reference", put(put_reference))
        // Live mosaic frames
        .route("/api/mosaic", get(get_mosaic_frame))
        .route("/api/mosaic/stream", get(mosaic_stream))
        // System info
        .route("/api/info", get(get_info))
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Web server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Serve the mosaic display page
async fn display_handler() -> impl IntoResponse {
    match StaticAssets::get("index.html") {
        Some(content) => Html(content.data.to_vec()).into_response(),
        None => (StatusCode::NOT_FOUND, "Display page not found").into_response(),
    }
}

/// Serve the kiosk capture page
async fn booth_handler() -> impl IntoResponse {
    match StaticAssets::get("booth.html") {
        Some(content) => Html(content.data.to_vec()).into_response(),
        None => (StatusCode::NOT_FOUND, "Booth page not found").into_response(),
    }
}

/// Serve static files
async fn static_handler(Path(path): Path<String>) -> impl IntoResponse {
    let path = path.trim_start_matches('/');

    match StaticAssets::get(path) {
        Some(content) => {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            (
                [(axum::http::header::CONTENT_TYPE, mime.as_ref())],
                content.data.to_vec(),
            )
                .into_response()
        }
        None => (StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}

#[derive(Serialize)]
struct SetupResponse {
    rows: u32,
    cols: u32,
    reference_url: String,
    tile_count: usize,
    cell_count: u32,
    complete: bool,
}

/// Grid dimensions and fill state of a project
async fn get_setup(
    State(state): State<Arc<AppState>>,
    Path(project): Path<String>,
) -> Response {
    let setup = match state.store.get_setup(&project) {
        Ok(setup) => setup,
        Err(e) => return error_response(e),
    };
    let tile_count = match state.store.list_tiles(&project) {
        Ok(tiles) => tiles.len(),
        Err(e) => return error_response(e),
    };
    let cell_count = setup.rows * setup.cols;

    Json(SetupResponse {
        rows: setup.rows,
        cols: setup.cols,
        reference_url: format!("/api/projects/{}/reference", project),
        tile_count,
        cell_count,
        complete: tile_count >= cell_count as usize,
    })
    .into_response()
}

/// All tiles of a project
async fn list_tiles(
    State(state): State<Arc<AppState>>,
    Path(project): Path<String>,
) -> Response {
    match state.store.list_tiles(&project) {
        Ok(tiles) => Json(tiles).into_response(),
        Err(e) => error_response(e),
    }
}

/// Moderation delete of a single tile
async fn delete_tile(
    State(state): State<Arc<AppState>>,
    Path((project, id)): Path<(String, u64)>,
) -> Response {
    match state.store.delete_tile(&project, id) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(e),
    }
}

/// Bulk reset of a project's tiles
async fn reset_tiles(
    State(state): State<Arc<AppState>>,
    Path(project): Path<String>,
) -> Response {
    match state.store.clear_tiles(&project) {
        Ok(()) => {
            tracing::info!("All tiles of project {:?} cleared", project);
            StatusCode::OK.into_response()
        }
        Err(e) => error_response(e),
    }
}

/// Stored tile image (JPEG)
async fn get_tile_image(
    State(state): State<Arc<AppState>>,
    Path((project, id)): Path<(String, u64)>,
) -> Response {
    match state.store.tile_image(&project, id) {
        Ok(bytes) => (
            [(axum::http::header::CONTENT_TYPE, "image/jpeg")],
            bytes,
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// Capture request from the kiosk page. The photo is a base64 JPEG, with or
/// without a `data:image/jpeg;base64,` prefix (canvas.toDataURL emits one).
#[derive(Deserialize)]
struct CaptureRequest {
    photo: String,
}

#[derive(Serialize)]
struct CaptureResponse {
    tile: TileRecord,
    label: String,
    tile_count: usize,
    cell_count: u32,
}

async fn capture(
    State(state): State<Arc<AppState>>,
    Path(project): Path<String>,
    Json(req): Json<CaptureRequest>,
) -> Response {
    let encoded = req.photo.rsplit(',').next().unwrap_or("").trim();
    let photo = match BASE64.decode(encoded) {
        Ok(bytes) => bytes,
        Err(e) => {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("photo is not valid base64: {}", e),
            )
                .into_response()
        }
    };

    // Compositing is CPU-bound; keep it off the async workers.
    let worker_state = state.clone();
    let worker_project = project.clone();
    let result = tokio::task::spawn_blocking(move || {
        let _guard = worker_state.capture_lock.lock();
        let tile_size = worker_state.config.read().mosaic.tile_size;
        if worker_project == worker_state.project_id() {
            let reference = worker_state.reference();
            process_capture(
                worker_state.store.as_ref(),
                &worker_project,
                worker_state.grid(),
                &reference,
                tile_size,
                &photo,
                &mut rand::thread_rng(),
            )
        } else {
            // Non-active project: its grid and reference are not cached.
            let store = worker_state.store();
            let setup = store.get_setup(&worker_project)?;
            let grid = Grid::new(setup.rows, setup.cols)?;
            let reference = decode_rgb(&store.reference_image(&worker_project)?)?;
            process_capture(
                store.as_ref(),
                &worker_project,
                grid,
                &reference,
                tile_size,
                &photo,
                &mut rand::thread_rng(),
            )
        }
    })
    .await;

    let record = match result {
        Ok(Ok(record)) => record,
        Ok(Err(e)) => return error_response(e),
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("capture task failed: {}", e),
            )
                .into_response()
        }
    };

    let cell_count = state
        .store
        .get_setup(&project)
        .map(|s| s.rows * s.cols)
        .unwrap_or_else(|_| state.grid().cell_count());
    let tile_count = state
        .store
        .list_tiles(&project)
        .map(|t| t.len())
        .unwrap_or(0);
    let label = Cell::new(record.row, record.col).label();

    Json(CaptureResponse {
        tile: record,
        label,
        tile_count,
        cell_count,
    })
    .into_response()
}

/// Reference image bytes
async fn get_reference(
    State(state): State<Arc<AppState>>,
    Path(project): Path<String>,
) -> Response {
    match state.store.reference_image(&project) {
        Ok(bytes) => {
            let mime = mime_guess::from_path("reference.jpg").first_or_octet_stream();
            ([(axum::http::header::CONTENT_TYPE, mime.as_ref())], bytes).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// Replace the reference image. Refused once any tile exists: the stored
/// tiles were composited against the old crops and would no longer line up.
async fn put_reference(
    State(state): State<Arc<AppState>>,
    Path(project): Path<String>,
    body: Bytes,
) -> Response {
    let tiles = match state.store.list_tiles(&project) {
        Ok(tiles) => tiles,
        Err(e) => return error_response(e),
    };
    if !tiles.is_empty() {
        return error_response(MosaicError::ReferenceLocked(tiles.len()));
    }

    let decoded = match decode_rgb(&body) {
        Ok(img) => img,
        Err(e) => return error_response(e),
    };

    if let Err(e) = state.store.put_reference_image(&project, &body) {
        return error_response(e);
    }
    if project == state.project_id() {
        state.set_reference(decoded);
    }
    tracing::info!("Reference image of project {:?} replaced", project);
    StatusCode::OK.into_response()
}

/// Latest rendered mosaic frame (JPEG)
async fn get_mosaic_frame(State(state): State<Arc<AppState>>) -> Response {
    let frame = state.latest_frame();
    if frame.is_empty() {
        return (StatusCode::SERVICE_UNAVAILABLE, "No frame rendered yet").into_response();
    }

    ([(axum::http::header::CONTENT_TYPE, "image/jpeg")], frame).into_response()
}

/// MJPEG stream of the live mosaic
async fn mosaic_stream(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    use axum::body::Body;
    use tokio_stream::StreamExt;

    let stream = tokio_stream::wrappers::IntervalStream::new(tokio::time::interval(
        std::time::Duration::from_millis(100),
    ))
    .map(move |_| {
        let frame = state.latest_frame();
        if frame.is_empty() {
            return Ok::<_, std::convert::Infallible>(
                "--frame\r\nContent-Type: image/jpeg\r\n\r\n"
                    .to_string()
                    .into_bytes(),
            );
        }

        let mut response = Vec::new();
        response.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: ");
        response.extend_from_slice(frame.len().to_string().as_bytes());
        response.extend_from_slice(b"\r\n\r\n");
        response.extend_from_slice(&frame);
        response.extend_from_slice(b"\r\n");

        Ok(response)
    });

    let body = Body::from_stream(stream);

    (
        [(
            axum::http::header::CONTENT_TYPE,
            "multipart/x-mixed-replace; boundary=frame",
        )],
        body,
    )
}

/// System information response
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    project: String,
    rows: u32,
    cols: u32,
    tile_count: usize,
    cell_count: u32,
    frames_published: u64,
}

/// Get system information
async fn get_info(State(state): State<Arc<AppState>>) -> Json<InfoResponse> {
    let project = state.project_id();
    let grid = state.grid();
    let tile_count = state
        .store
        .list_tiles(&project)
        .map(|t| t.len())
        .unwrap_or(0);

    Json(InfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        project,
        rows: grid.rows(),
        cols: grid.cols(),
        tile_count,
        cell_count: grid.cell_count(),
        frames_published: state.frames_published(),
    })
}
