mod archive;
mod config;
mod download;
mod filters;
mod finalize;
mod gallery;
mod http;
mod media;
mod metrics;
mod models;
mod namegen;
mod resolver;
mod wms;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use config::AppConfig;
use download::{BatchDownloadSpec, DownloadError, ensure_prefix_url, run_batch_download};
use filters::{FilterError, ImageFilters};
use finalize::{FinalizeError, finalize_selections};
use gallery::GalleryContext;
use media::{BatchSummary, MediaClient, MediaError, UploadEvent, UploadFile};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{
    AuthRequest, AuthResponse, DownloadImagesRequest, DownloadImagesResponse, ErrorBody,
    GalleryFinalizeRequest, GalleryFinalizeResponse, GalleryGenerateRequest,
    GalleryGenerateResponse, GenerateItemsRequest, GenerateItemsResponse, UpdateWmRequest,
    UploadFileInput, UploadMediaRequest,
};
use namegen::{NamegenClient, NamegenError};
use resolver::{ErrorKind, ResolveError, VariantResolver, clean_site, clean_sites};
use serde::Serialize;
use serde_json::json;
use std::{convert::Infallible, net::SocketAddr, sync::Arc};
use tokio::sync::mpsc;
use tokio_stream::{StreamExt, wrappers::ReceiverStream};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};
use wms::auth::WmsAuthError;
use wms::import::{ImportReport, WmsImportError};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "itemgen.api", "server crashed: {err}");
    }
}

async fn run() -> eyre::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = Arc::new(AppConfig::from_env());
    let openapi: serde_json::Value =
        serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
            .unwrap_or(json!({"openapi":"3.0.3"}));
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("prom recorder");

    let state = AppState {
        resolver: Arc::new(VariantResolver::new(config.search.clone())),
        namegen: Arc::new(NamegenClient::new(config.namegen.clone())),
        media: Arc::new(MediaClient::new(config.media.clone())),
        wms_client: http::build_client(config.wms.timeout),
        fetch_client: http::build_client(config.search.fetch_timeout),
        openapi: Arc::new(openapi),
        prometheus_handle,
        config,
    };

    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .nest(
            "/api",
            Router::new()
                .route("/auth", post(auth))
                .route("/generate_items", post(generate_items))
                .route("/gallery_generate", post(gallery_generate))
                .route("/gallery_finalize", post(gallery_finalize))
                .route("/download_images", post(download_images))
                .route("/update_wm", post(update_wm))
                .route("/upload_media", post(upload_media))
                .route("/upload_media_stream", post(upload_media_stream)),
        )
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit_from_env()));

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "itemgen.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    config: Arc<AppConfig>,
    resolver: Arc<VariantResolver>,
    namegen: Arc<NamegenClient>,
    media: Arc<MediaClient>,
    wms_client: reqwest::Client,
    fetch_client: reqwest::Client,
    openapi: Arc<serde_json::Value>,
    prometheus_handle: PrometheusHandle,
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "itemgen-api-rs",
    }))
}

async fn openapi_json(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json((*state.openapi).clone())
}

async fn swagger_ui() -> axum::http::Response<String> {
    let html = r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>Itemgen API Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#;
    axum::http::Response::builder()
        .header("Content-Type", "text/html; charset=utf-8")
        .body(html.to_string())
        .unwrap()
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(32 * 1024 * 1024)
}

async fn metrics_endpoint(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> axum::http::Response<String> {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return axum::http::Response::builder()
                .status(StatusCode::UNAUTHORIZED)
                .body("unauthorized".into())
                .unwrap();
        }
    }
    let body = state.prometheus_handle.render();
    axum::http::Response::builder()
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(body)
        .unwrap()
}

/// Fetch a WMS bearer token for an organization.
///
/// - Method: `POST`
/// - Path: `/api/auth`
/// - Body: `{org}`
async fn auth(
    State(state): State<AppState>,
    Json(payload): Json<AuthRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    crate::metrics::inc_requests("/api/auth");
    let token = wms::auth::fetch_token(&state.wms_client, &state.config.wms, &payload.org).await?;
    Ok(Json(AuthResponse {
        success: true,
        token,
    }))
}

/// Generate an alphabetized product-name list for a company.
///
/// - Method: `POST`
/// - Path: `/api/generate_items`
async fn generate_items(
    State(state): State<AppState>,
    Json(payload): Json<GenerateItemsRequest>,
) -> Result<Json<GenerateItemsResponse>, AppError> {
    crate::metrics::inc_requests("/api/generate_items");
    let website = clean_site(&payload.website);
    let count = payload
        .count
        .unwrap_or(state.config.defaults.generate_count)
        .max(1);
    let generated = state
        .namegen
        .generate(&payload.company, &website, count, payload.extra_prompt.trim())
        .await?;
    let count = generated.products.len();
    Ok(Json(GenerateItemsResponse {
        success: true,
        products: generated.products,
        output_text: generated.output_text,
        count,
    }))
}

/// Assemble the image gallery for a batch of items. `posItems` presence
/// switches to POS mode; otherwise legacy mode requires `products`.
///
/// - Method: `POST`
/// - Path: `/api/gallery_generate`
async fn gallery_generate(
    State(state): State<AppState>,
    Json(payload): Json<GalleryGenerateRequest>,
) -> Result<Json<GalleryGenerateResponse>, AppError> {
    crate::metrics::inc_requests("/api/gallery_generate");
    let started = std::time::Instant::now();

    let filters = ImageFilters::parse(
        payload.image_filters.as_deref().unwrap_or("").trim(),
    )?;
    let sites_str = payload
        .sites
        .unwrap_or_else(|| state.config.defaults.sites.clone());
    let ctx = GalleryContext {
        sites: clean_sites(&sites_str),
        images_per_item: payload
            .images_per_item
            .unwrap_or(state.config.defaults.images_per_item)
            .max(1),
        filters,
        start_index: payload.start_index.unwrap_or(1).max(1),
    };

    let (items, missing_items) = if !payload.pos_items.is_empty() {
        gallery::generate_pos(&state.resolver, &payload.pos_items, &ctx).await
    } else {
        if payload.products.is_empty() {
            return Err(AppError::Input("No product names were provided.".into()));
        }
        gallery::generate_legacy(
            &state.resolver,
            &payload.products,
            &payload.item_numbers,
            &ctx,
        )
        .await
    };

    crate::metrics::batch_elapsed("gallery_generate", started.elapsed().as_millis());
    Ok(Json(GalleryGenerateResponse {
        success: true,
        items,
        missing_items,
    }))
}

/// Re-fetch the chosen images and return them as one base64 archive.
///
/// - Method: `POST`
/// - Path: `/api/gallery_finalize`
async fn gallery_finalize(
    State(state): State<AppState>,
    Json(payload): Json<GalleryFinalizeRequest>,
) -> Result<Json<GalleryFinalizeResponse>, AppError> {
    crate::metrics::inc_requests("/api/gallery_finalize");
    let started = std::time::Instant::now();
    let outcome = finalize_selections(&state.fetch_client, &payload.selections).await?;
    crate::metrics::batch_elapsed("gallery_finalize", started.elapsed().as_millis());
    Ok(Json(GalleryFinalizeResponse {
        success: true,
        zip_content: outcome.zip_content,
        zip_filename: outcome.zip_filename,
        image_count: outcome.image_count,
    }))
}

/// Search, download, and package images for a product list, with a CSV
/// manifest describing every requested slot.
///
/// - Method: `POST`
/// - Path: `/api/download_images`
async fn download_images(
    State(state): State<AppState>,
    Json(payload): Json<DownloadImagesRequest>,
) -> Result<Json<DownloadImagesResponse>, AppError> {
    crate::metrics::inc_requests("/api/download_images");
    let started = std::time::Instant::now();

    let filters = ImageFilters::parse(
        payload.image_filters.as_deref().unwrap_or("").trim(),
    )?;
    let sites_str = payload
        .sites
        .unwrap_or_else(|| state.config.defaults.sites.clone());
    let prefix = payload
        .prefix
        .unwrap_or_else(|| state.config.defaults.prefix.clone());
    let spec = BatchDownloadSpec {
        products: payload.products,
        item_numbers: payload.item_numbers,
        sites: clean_sites(&sites_str),
        images_per_item: payload
            .images_per_item
            .unwrap_or(state.config.defaults.images_per_item)
            .max(1),
        prefix: ensure_prefix_url(prefix.trim()),
        filters,
    };

    let outcome = run_batch_download(&state.resolver, &state.fetch_client, &spec).await?;
    crate::metrics::batch_elapsed("download_images", started.elapsed().as_millis());
    Ok(Json(DownloadImagesResponse {
        success: true,
        csv_content: outcome.csv_content,
        csv_filename: outcome.csv_filename,
        zip_content: outcome.zip_content,
        zip_filename: outcome.zip_filename,
        row_count: outcome.row_count,
        image_count: outcome.image_count,
    }))
}

/// Push manifest rows into the WMS bulk-import endpoint.
///
/// - Method: `POST`
/// - Path: `/api/update_wm`
async fn update_wm(
    State(state): State<AppState>,
    Json(payload): Json<UpdateWmRequest>,
) -> Result<Json<ImportReport>, AppError> {
    crate::metrics::inc_requests("/api/update_wm");
    let report = wms::import::bulk_import(
        &state.wms_client,
        &state.config.wms,
        &payload.org,
        &payload.token,
        &payload.csv_data,
    )
    .await?;
    Ok(Json(report))
}

#[derive(Debug, Serialize)]
struct UploadMediaResponse {
    success: bool,
    #[serde(flatten)]
    summary: BatchSummary,
}

/// Upload a batch of images to the media host and return one summary.
///
/// - Method: `POST`
/// - Path: `/api/upload_media`
async fn upload_media(
    State(state): State<AppState>,
    Json(payload): Json<UploadMediaRequest>,
) -> Result<Json<UploadMediaResponse>, AppError> {
    crate::metrics::inc_requests("/api/upload_media");
    let files = decode_upload_files(&payload.files).map_err(AppError::Input)?;
    let folder = payload
        .folder
        .unwrap_or_else(|| state.config.defaults.folder.clone());

    // Batch mode consumes the same event stream and discards it.
    let (events, receiver) = mpsc::channel(1);
    drop(receiver);
    let summary = state
        .media
        .run_batch(files, &folder, &payload.preset, events)
        .await?;
    Ok(Json(UploadMediaResponse {
        success: true,
        summary,
    }))
}

/// Same batch as `/api/upload_media`, streamed as server-sent events with one
/// event per file.
///
/// - Method: `POST`
/// - Path: `/api/upload_media_stream`
async fn upload_media_stream(
    State(state): State<AppState>,
    Json(payload): Json<UploadMediaRequest>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    crate::metrics::inc_requests("/api/upload_media_stream");
    let (out_tx, out_rx) = mpsc::channel::<serde_json::Value>(32);
    let (event_tx, mut event_rx) = mpsc::channel::<UploadEvent>(32);

    let forward = out_tx.clone();
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if let Ok(value) = serde_json::to_value(&event) {
                if forward.send(value).await.is_err() {
                    break;
                }
            }
        }
    });

    tokio::spawn(async move {
        let files = match decode_upload_files(&payload.files) {
            Ok(files) => files,
            Err(message) => {
                let _ = out_tx.send(json!({"type": "error", "message": message})).await;
                return;
            }
        };
        let folder = payload
            .folder
            .unwrap_or_else(|| state.config.defaults.folder.clone());
        if let Err(err) = state
            .media
            .run_batch(files, &folder, &payload.preset, event_tx)
            .await
        {
            let _ = out_tx
                .send(json!({"type": "error", "message": err.to_string()}))
                .await;
        }
    });

    let stream =
        ReceiverStream::new(out_rx).map(|value| Ok(Event::default().data(value.to_string())));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn decode_upload_files(inputs: &[UploadFileInput]) -> Result<Vec<UploadFile>, String> {
    inputs
        .iter()
        .map(|input| {
            let content = input.content.trim();
            // Data-URI payloads carry their own prefix.
            let encoded = match content.find("base64,") {
                Some(idx) => &content[idx + 7..],
                None => content,
            };
            let bytes = BASE64
                .decode(encoded)
                .map_err(|_| format!("Invalid base64 content for {}", input.filename))?;
            Ok(UploadFile {
                filename: input.filename.clone(),
                content: bytes,
            })
        })
        .collect()
}

#[derive(Debug)]
enum AppError {
    Input(String),
    Reauth(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Input(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorBody::new(message))).into_response()
            }
            AppError::Reauth(message) => {
                (StatusCode::UNAUTHORIZED, Json(ErrorBody::reauth(message))).into_response()
            }
            AppError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody::new(message)),
            )
                .into_response(),
        }
    }
}

impl From<FilterError> for AppError {
    fn from(err: FilterError) -> Self {
        AppError::Input(err.to_string())
    }
}

impl From<ResolveError> for AppError {
    fn from(err: ResolveError) -> Self {
        match err.kind() {
            ErrorKind::Input => AppError::Input(err.to_string()),
            _ => AppError::Internal(err.to_string()),
        }
    }
}

impl From<FinalizeError> for AppError {
    fn from(err: FinalizeError) -> Self {
        if err.is_input() {
            AppError::Input(err.to_string())
        } else {
            AppError::Internal(err.to_string())
        }
    }
}

impl From<DownloadError> for AppError {
    fn from(err: DownloadError) -> Self {
        if err.is_input() {
            AppError::Input(err.to_string())
        } else {
            AppError::Internal(err.to_string())
        }
    }
}

impl From<WmsAuthError> for AppError {
    fn from(err: WmsAuthError) -> Self {
        if err.is_input() {
            AppError::Input(err.to_string())
        } else {
            AppError::Internal(err.to_string())
        }
    }
}

impl From<WmsImportError> for AppError {
    fn from(err: WmsImportError) -> Self {
        match err {
            WmsImportError::TokenExpired => AppError::Reauth(err.to_string()),
            err if err.is_input() => AppError::Input(err.to_string()),
            err => AppError::Internal(err.to_string()),
        }
    }
}

impl From<NamegenError> for AppError {
    fn from(err: NamegenError) -> Self {
        if err.is_input() {
            AppError::Input(err.to_string())
        } else {
            AppError::Internal(err.to_string())
        }
    }
}

impl From<MediaError> for AppError {
    fn from(err: MediaError) -> Self {
        if err.is_input() {
            AppError::Input(err.to_string())
        } else {
            AppError::Internal(err.to_string())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
