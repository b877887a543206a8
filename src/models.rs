use serde::{Deserialize, Serialize};

use crate::analysis::AnalysisTask;
use crate::files::{SharedFile, TransferStatus};
use crate::peer::PeerSummary;
use crate::relay::ChatMessage;
use crate::utils::format_file_size;

// a shared file as the file-share panel shows it
#[derive(Serialize, Debug)]
pub struct FileInfo {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub size_display: String,
    pub mime_type: String,
    pub url: String,
    pub expires_at: String,
    pub remaining: String,
    pub status: TransferStatus,
    pub progress: u8,
}

impl FileInfo {
    pub fn from_shared(file: &SharedFile, now: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            id: file.id.clone(),
            name: file.name.clone(),
            size: file.size,
            size_display: format_file_size(file.size),
            mime_type: file.mime_type.clone(),
            url: file.url.clone(),
            expires_at: file.expires_at.to_rfc3339(),
            remaining: file.remaining_time(now),
            status: file.status,
            progress: file.progress,
        }
    }
}

// response for file listing endpoint
#[derive(Serialize, Debug)]
pub struct FileListResponse {
    pub files: Vec<FileInfo>,
    pub total: usize,
}

// response for file deletion endpoint
#[derive(Serialize, Debug)]
pub struct DeleteResponse {
    pub success: bool,
    pub id: String,
}

// response for server statistics endpoint
#[derive(Serialize, Debug)]
pub struct StatsResponse {
    pub total_files: usize,
    pub total_size: u64,
    pub total_size_display: String,
    pub connected_peers: usize,
    pub peer_id: String,
}

// generic error response
#[derive(Serialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
}

// chat relay request, same shape the front end posts
#[derive(Deserialize, Debug)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
}

#[derive(Serialize, Debug)]
pub struct ChatResponse {
    pub response: String,
}

// side panel analysis request
#[derive(Deserialize, Debug)]
pub struct AnalyzeRequest {
    pub task: AnalysisTask,
    pub url: String,
    #[serde(default)]
    pub page_text: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct TaskInfo {
    pub id: AnalysisTask,
    pub title: &'static str,
    pub description: &'static str,
    pub uses_assistant: bool,
}

#[derive(Serialize, Debug)]
pub struct TaskListResponse {
    pub tasks: Vec<TaskInfo>,
}

#[derive(Deserialize, Debug)]
pub struct SuggestQuery {
    #[serde(default)]
    pub q: String,
}

#[derive(Serialize, Debug)]
pub struct SuggestResponse {
    pub query: String,
    pub suggestions: Vec<String>,
}

#[derive(Serialize, Debug)]
pub struct PeerListResponse {
    pub local_id: String,
    pub peers: Vec<PeerSummary>,
    pub last_error: Option<String>,
}

// start a connection to `peer_id`
#[derive(Deserialize, Debug)]
pub struct OfferRequest {
    pub peer_id: String,
}

// a pasted connection code
#[derive(Deserialize, Debug)]
pub struct CodeRequest {
    pub code: String,
}

// connection code to hand to the other side
#[derive(Serialize, Debug)]
pub struct CodeResponse {
    pub peer_id: String,
    pub code: String,
}

#[derive(Deserialize, Debug)]
pub struct SendRequest {
    pub file_id: String,
}

#[derive(Serialize, Debug)]
pub struct SendResponse {
    pub success: bool,
    pub file_id: String,
    pub chunks: usize,
}

#[derive(Serialize, Debug)]
pub struct PeerActionResponse {
    pub success: bool,
    pub peer_id: String,
}

// request for batch delete operation
#[derive(Deserialize, Debug)]
pub struct BatchDeleteRequest {
    pub ids: Vec<String>,
}

// result of a single file deletion in batch operation
#[derive(Serialize, Debug)]
pub struct BatchDeleteResult {
    pub id: String,
    pub success: bool,
    pub error: Option<String>,
}

// response for batch delete operation
#[derive(Serialize, Debug)]
pub struct BatchDeleteResponse {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<BatchDeleteResult>,
}
