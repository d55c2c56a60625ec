use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, DefaultBodyLimit, Multipart, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sohbet_shared::{Attachment, ChatMessage, Payload};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServerConfig;
use crate::connection::{self, PumpConfig};
use crate::error::ServerError;
use crate::hub::{Hub, HubHandle};
use crate::numerology::NumerologyProxy;
use crate::persistence::Persistence;
use crate::upload::{resolve_content_type, UploadStore};

/// Room for multipart boundaries and the text fields around an upload.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

/// Largest request body accepted on any route, sized so that an upload at
/// the configured cap still reaches the handler and gets a 413 past it.
fn request_body_limit(max_upload_size: usize) -> usize {
    max_upload_size.saturating_add(MULTIPART_OVERHEAD)
}

#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub persistence: Persistence,
    pub uploads: Arc<UploadStore>,
    pub numerology: Arc<NumerologyProxy>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Open history, start the hub and prepare the upload directory.
    pub async fn from_config(config: ServerConfig) -> Result<Self, ServerError> {
        let persistence = Persistence::from_config(&config);
        let hub = Hub::spawn(persistence.clone());
        let uploads =
            Arc::new(UploadStore::new(config.upload_dir.clone(), config.max_upload_size).await?);
        let numerology = Arc::new(NumerologyProxy::new(
            config.numerology_url.clone(),
            config.numerology_api_key.clone(),
        ));

        Ok(Self {
            hub,
            persistence,
            uploads,
            numerology,
            config: Arc::new(config),
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let static_dir = state.config.static_dir.clone();
    let upload_dir = state.uploads.root().to_path_buf();
    let body_limit = request_body_limit(state.uploads.max_size());

    Router::new()
        .route_service("/", ServeFile::new(static_dir.join("index.html")))
        .nest_service("/static", ServeDir::new(static_dir))
        .nest_service("/uploads", ServeDir::new(upload_dir))
        .route("/ws", get(ws_upgrade))
        .route("/health", get(health_check))
        .route("/upload", post(upload_file))
        .route("/clear-history", post(clear_history))
        .route("/api/numerology", post(numerology))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    online: usize,
    persistence: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    success: bool,
    message: &'static str,
    file_url: String,
    file_name: String,
    file_size: usize,
}

#[derive(Deserialize)]
struct ClearHistoryRequest {
    #[serde(default)]
    channel: String,
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let hub = state.hub.clone();
    let persistence = state.persistence.clone();
    let pump = PumpConfig::from(state.config.as_ref());

    ws.max_message_size(pump.max_frame_bytes)
        .on_upgrade(move |socket| connection::serve(socket, hub, persistence, pump))
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        online: state.hub.online(),
        persistence: state.persistence.is_enabled(),
    })
}

struct IncomingFile {
    name: String,
    content_type: Option<String>,
    data: Bytes,
}

/// Store a shared file and announce it in the channel as a file or image
/// message.
async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ServerError> {
    let mut file = None;
    let mut username = String::new();
    let mut channel = String::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("Multipart error: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("").to_string();
                let content_type = field.content_type().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ServerError::BadRequest(format!("Failed to read file: {}", e)))?;
                file = Some(IncomingFile {
                    name: file_name,
                    content_type,
                    data,
                });
            }
            "username" | "channel" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ServerError::BadRequest(format!("Failed to read field: {}", e)))?;
                if name == "username" {
                    username = value;
                } else {
                    channel = value;
                }
            }
            _ => {}
        }
    }

    let Some(file) = file else {
        return Err(ServerError::BadRequest(
            "Missing 'file' field in multipart form".to_string(),
        ));
    };
    if username.is_empty() || channel.is_empty() {
        return Err(ServerError::BadRequest(
            "Missing username or channel".to_string(),
        ));
    }
    if file.data.len() > state.uploads.max_size() {
        return Err(ServerError::PayloadTooLarge {
            size: file.data.len(),
            max: state.uploads.max_size(),
        });
    }

    let content_type = resolve_content_type(file.content_type.as_deref(), &file.name)?;
    let now = Utc::now();
    let stored = state.uploads.save(&file.name, &file.data, now).await?;

    let attachment = Attachment {
        url: stored.url.clone(),
        name: file.name.clone(),
        size: stored.size as i64,
    };
    let payload = if content_type.starts_with("image/") {
        Payload::Image(attachment)
    } else {
        Payload::File(attachment)
    };
    let message = ChatMessage::new(
        &username,
        format!("Shared a file: {}", file.name),
        &channel,
        payload,
    )
    .at(now);
    let frame = message
        .encode()
        .map_err(|e| ServerError::Internal(e.to_string()))?;
    state.hub.broadcast(frame).await;

    info!(
        username = %username,
        channel = %channel,
        file = %file.name,
        size = stored.size,
        path = %stored.path.display(),
        %content_type,
        "File shared"
    );

    Ok(Json(UploadResponse {
        success: true,
        message: "File uploaded successfully",
        file_url: stored.url,
        file_name: file.name,
        file_size: stored.size,
    }))
}

async fn clear_history(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<StatusCode, ServerError> {
    let request: ClearHistoryRequest =
        serde_json::from_slice(&body).map_err(|e| ServerError::BadRequest(e.to_string()))?;
    if request.channel.is_empty() {
        return Err(ServerError::BadRequest("channel is required".to_string()));
    }

    state.persistence.clear(&request.channel).await;
    Ok(StatusCode::OK)
}

async fn numerology(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ServerError> {
    let (status, body) = state.numerology.forward(body).await?;
    Ok((status, [(header::CONTENT_TYPE, "application/json")], body).into_response())
}

pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_listener(listener, state).await
}

pub async fn serve_listener(
    listener: tokio::net::TcpListener,
    state: AppState,
) -> anyhow::Result<()> {
    let app = build_router(state);
    axum::serve(listener, app).await?;
    Ok(())
}
