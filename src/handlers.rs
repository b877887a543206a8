use axum::{
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{Json, Response},
};
use std::sync::Arc;

use crate::analysis::{self, AnalysisReport, AnalysisTask};
use crate::chat::request_history;
use crate::desktop::{DesktopCommand, DesktopSnapshot};
use crate::error::{DesktopError, PeerError, RelayError, TransferError};
use crate::models::{
    AnalyzeRequest, BatchDeleteRequest, BatchDeleteResponse, BatchDeleteResult, ChatRequest,
    ChatResponse, CodeRequest, CodeResponse, DeleteResponse, ErrorResponse, FileInfo,
    FileListResponse, OfferRequest, PeerActionResponse, PeerListResponse, SendRequest,
    SendResponse, StatsResponse, SuggestQuery, SuggestResponse, TaskInfo, TaskListResponse,
};
use crate::signaling::SessionDescriptor;
use crate::state::AppState;
use crate::utils::{format_file_size, sanitize_filename};

pub type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}

fn peer_error(e: PeerError) -> ApiError {
    let status = match &e {
        PeerError::ConnectionNotFound(_) => StatusCode::NOT_FOUND,
        PeerError::DuplicatePeer(_)
        | PeerError::InvalidTransition { .. }
        | PeerError::InvalidSignal(_)
        | PeerError::SignalNotFound { .. } => StatusCode::BAD_REQUEST,
        PeerError::ChannelClosed | PeerError::FrameTooLarge(_) | PeerError::Io(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    api_error(status, e.to_string())
}

fn transfer_error(e: TransferError) -> ApiError {
    match e {
        TransferError::Channel(e) => peer_error(e),
        TransferError::FileNotFound(_) => api_error(StatusCode::NOT_FOUND, e.to_string()),
        TransferError::NoData(_) | TransferError::ZeroChunkSize => {
            api_error(StatusCode::BAD_REQUEST, e.to_string())
        }
        _ => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

// health check endpoint
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "neural-desk",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

// relay a conversation to the assistant
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let history = request_history(&payload.messages);
    tracing::debug!("Chat request with {} messages", history.len());

    match state.assistant.complete(&history).await {
        Ok(response) => Ok(Json(ChatResponse { response })),
        Err(RelayError::EmptyConversation) => {
            tracing::warn!("Chat request without a user message");
            Err(api_error(StatusCode::BAD_REQUEST, RelayError::EmptyConversation.to_string()))
        }
        Err(e) => {
            tracing::error!("Assistant relay failed: {}", e);
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to generate response",
            ))
        }
    }
}

// run a browser side panel task
pub async fn analyze(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AnalyzeRequest>,
) -> Result<Json<AnalysisReport>, ApiError> {
    if payload.url.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "No url provided"));
    }
    let url = analysis::normalize_url(&payload.url);
    tracing::debug!("Analysis {} for {}", payload.task, url);

    let report = analysis::analyze(
        state.assistant.as_ref(),
        payload.task,
        &url,
        payload.page_text.as_deref(),
    )
    .await;
    Ok(Json(report))
}

// tasks the side panel offers
pub async fn list_analysis_tasks() -> Json<TaskListResponse> {
    let tasks = AnalysisTask::ALL
        .iter()
        .map(|&task| TaskInfo {
            id: task,
            title: task.title(),
            description: task.description(),
            uses_assistant: task.uses_assistant(),
        })
        .collect();
    Json(TaskListResponse { tasks })
}

// address bar completions
pub async fn suggest(Query(query): Query<SuggestQuery>) -> Json<SuggestResponse> {
    let suggestions = analysis::search_suggestions(query.q.trim());
    Json(SuggestResponse {
        query: query.q,
        suggestions,
    })
}

// store a file selected in the file-share panel
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<FileInfo>, ApiError> {
    tracing::debug!("Processing file upload request");

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        tracing::error!("Failed to read multipart field: {}", e);
        api_error(
            StatusCode::BAD_REQUEST,
            format!("Failed to read multipart field: {}", e),
        )
    })? {
        let Some(filename) = field.file_name().map(sanitize_filename) else {
            // plain form fields are skipped
            continue;
        };
        if filename.is_empty() {
            tracing::warn!("Upload request with unusable filename");
            return Err(api_error(StatusCode::BAD_REQUEST, "Invalid filename"));
        }
        let mime_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();

        let data = field.bytes().await.map_err(|e| {
            tracing::error!("Failed to read file data for {}: {}", filename, e);
            api_error(
                StatusCode::BAD_REQUEST,
                format!("Failed to read file data: {}", e),
            )
        })?;

        let file = state.files.add_local(&filename, &mime_type, data);
        tracing::info!("✅ Uploaded file: {} ({})", file.name, format_file_size(file.size));
        return Ok(Json(FileInfo::from_shared(&file, chrono::Utc::now())));
    }

    tracing::warn!("Upload request contained no file field");
    Err(api_error(StatusCode::BAD_REQUEST, "No file provided"))
}

// list shared files, dropping expired ones first
pub async fn list_files(State(state): State<Arc<AppState>>) -> Json<FileListResponse> {
    let now = chrono::Utc::now();
    let purged = state.files.purge_expired(now);
    if purged > 0 {
        tracing::info!("⌛ Purged {} expired files", purged);
    }

    let files: Vec<FileInfo> = state
        .files
        .list()
        .iter()
        .map(|f| FileInfo::from_shared(f, now))
        .collect();
    let total = files.len();
    tracing::debug!("Found {} files total", total);
    Json(FileListResponse { files, total })
}

// download the bytes of a shared file
pub async fn download_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    tracing::debug!("Download request for {}", id);
    let file = state
        .files
        .get(&id)
        .filter(|f| !f.is_expired(chrono::Utc::now()))
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("File not found: {}", id)))?;
    let data = file
        .data
        .ok_or_else(|| transfer_error(TransferError::NoData(id.clone())))?;

    Response::builder()
        .header(header::CONTENT_TYPE, file.mime_type)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", sanitize_filename(&file.name)),
        )
        .body(Body::from(data))
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

// delete a specific file
pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    tracing::debug!("Request to delete file: {}", id);
    let file = state.files.remove(&id).ok_or_else(|| {
        tracing::warn!("File not found for deletion: {}", id);
        api_error(StatusCode::NOT_FOUND, format!("File not found: {}", id))
    })?;

    tracing::info!("🗑️  Deleted file: {}", file.name);
    Ok(Json(DeleteResponse { success: true, id }))
}

// batch delete multiple files
pub async fn batch_delete_files(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<BatchDeleteRequest>,
) -> Json<BatchDeleteResponse> {
    let results: Vec<BatchDeleteResult> = payload
        .ids
        .into_iter()
        .map(|id| match state.files.remove(&id) {
            Some(_) => BatchDeleteResult {
                id,
                success: true,
                error: None,
            },
            None => BatchDeleteResult {
                error: Some(format!("File not found: {}", id)),
                id,
                success: false,
            },
        })
        .collect();

    let total = results.len();
    let successful = results.iter().filter(|r| r.success).count();
    tracing::info!("📦 Batch delete completed: {}/{} successful", successful, total);

    Json(BatchDeleteResponse {
        total,
        successful,
        failed: total - successful,
        results,
    })
}

// get server statistics
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let stats = state.files.stats();
    tracing::debug!("Stats: {} files, {} bytes total", stats.total_files, stats.total_size);

    Json(StatsResponse {
        total_files: stats.total_files,
        total_size: stats.total_size,
        total_size_display: format_file_size(stats.total_size),
        connected_peers: state.node.connected_count(),
        peer_id: state.node.local_id().to_string(),
    })
}

// list known peers
pub async fn list_peers(State(state): State<Arc<AppState>>) -> Json<PeerListResponse> {
    Json(PeerListResponse {
        local_id: state.node.local_id().to_string(),
        peers: state.node.peers(),
        last_error: state.node.last_error(),
    })
}

// start a connection and hand back the offer code
pub async fn create_offer(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<OfferRequest>,
) -> Result<Json<CodeResponse>, ApiError> {
    tracing::debug!("Creating offer for {}", payload.peer_id);
    let offer = state
        .node
        .initiate(&payload.peer_id)
        .await
        .map_err(peer_error)?;

    Ok(Json(CodeResponse {
        peer_id: payload.peer_id.trim().to_string(),
        code: offer.to_code(),
    }))
}

// accept a pasted offer code and hand back the answer code
pub async fn accept_offer(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CodeRequest>,
) -> Result<Json<CodeResponse>, ApiError> {
    let remote = SessionDescriptor::from_code(&payload.code)
        .map_err(peer_error)?
        .peer_id;
    tracing::debug!("Accepting offer from {}", remote);

    let answer = state.node.accept(&payload.code).await.map_err(peer_error)?;
    Ok(Json(CodeResponse {
        peer_id: remote,
        code: answer.to_code(),
    }))
}

// apply the answer code for a pending offer
pub async fn apply_answer(
    State(state): State<Arc<AppState>>,
    Path(peer_id): Path<String>,
    Json(payload): Json<CodeRequest>,
) -> Result<Json<PeerActionResponse>, ApiError> {
    tracing::debug!("Applying answer for {}", peer_id);
    state
        .node
        .finish(&peer_id, &payload.code)
        .await
        .map_err(peer_error)?;
    Ok(Json(PeerActionResponse {
        success: true,
        peer_id,
    }))
}

// send a stored file to a connected peer
pub async fn send_to_peer(
    State(state): State<Arc<AppState>>,
    Path(peer_id): Path<String>,
    Json(payload): Json<SendRequest>,
) -> Result<Json<SendResponse>, ApiError> {
    tracing::debug!("Sending {} to {}", payload.file_id, peer_id);
    let chunks = state
        .node
        .send_file(&peer_id, &payload.file_id)
        .await
        .map_err(transfer_error)?;

    Ok(Json(SendResponse {
        success: true,
        file_id: payload.file_id,
        chunks,
    }))
}

// disconnect a peer
pub async fn disconnect_peer(
    State(state): State<Arc<AppState>>,
    Path(peer_id): Path<String>,
) -> Result<Json<PeerActionResponse>, ApiError> {
    state
        .node
        .disconnect(&peer_id)
        .await
        .map_err(peer_error)?;
    Ok(Json(PeerActionResponse {
        success: true,
        peer_id,
    }))
}

// current window layout
pub async fn get_desktop(State(state): State<Arc<AppState>>) -> Json<DesktopSnapshot> {
    Json(state.desktop.lock().await.snapshot())
}

// open, close, focus or move a window
pub async fn apply_desktop(
    State(state): State<Arc<AppState>>,
    Json(command): Json<DesktopCommand>,
) -> Result<Json<DesktopSnapshot>, ApiError> {
    let mut desktop = state.desktop.lock().await;
    desktop.apply(command).map_err(|e| match e {
        DesktopError::NotOpen(_) => api_error(StatusCode::NOT_FOUND, e.to_string()),
    })?;
    Ok(Json(desktop.snapshot()))
}
