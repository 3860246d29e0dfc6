use axum::{
    extract::{Extension, Multipart},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use ulid::Ulid;

use crate::{
    auth::CurrentUser,
    inference::UploadBatch,
    notify::Job,
    server::AppState,
};

pub(crate) const AUDIO_FIELD: &str = "audioFiles";
pub(crate) const DATA_FIELD: &str = "dataFiles";
pub(crate) const CHAT_FIELD: &str = "chatFiles";

/// Upload failures answer with `{"error": ..}` rather than the usual message body.
#[derive(Debug, Error)]
pub(crate) enum UploadError {
    #[error("No files uploaded")]
    NoFiles,

    #[error("Malformed upload: {0}")]
    Multipart(#[from] axum::extract::multipart::MultipartError),

    #[error("An error occurred while storing your files")]
    Storage(#[from] std::io::Error),
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = match &self {
            UploadError::NoFiles | UploadError::Multipart(_) => StatusCode::BAD_REQUEST,
            UploadError::Storage(e) => {
                tracing::error!("Could not store upload: {:?}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Reduce a client-supplied file name to a safe base name.
pub(crate) fn sanitize_file_name(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

/// A name not yet used in this upload, numbering repeats.
fn unique_name(name: String, taken: &mut HashSet<String>) -> String {
    if taken.insert(name.clone()) {
        return name;
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), format!(".{}", ext)),
        _ => (name.clone(), String::new()),
    };
    let mut n = 1;
    loop {
        let candidate = format!("{}_{}{}", stem, n, ext);
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

async fn store_files(dir: &Path, mut multipart: Multipart) -> Result<UploadBatch, UploadError> {
    let mut batch = UploadBatch::default();
    let mut taken = HashSet::new();
    let mut created = false;

    while let Some(field) = multipart.next_field().await? {
        let category = match field.name() {
            Some(AUDIO_FIELD) => &mut batch.audio,
            Some(DATA_FIELD) => &mut batch.data,
            Some(CHAT_FIELD) => &mut batch.chat,
            other => {
                tracing::debug!(field = ?other, "Ignoring unknown upload field");
                continue;
            }
        };
        let Some(file_name) = field.file_name().filter(|n| !n.is_empty()) else {
            continue;
        };
        let file_name = unique_name(sanitize_file_name(file_name), &mut taken);
        let bytes = field.bytes().await?;

        if !created {
            tokio::fs::create_dir_all(dir).await?;
            created = true;
        }
        let path: PathBuf = dir.join(&file_name);
        tokio::fs::write(&path, &bytes).await?;
        tracing::debug!(file = %path.display(), size = bytes.len(), "Stored uploaded file");
        category.push(path);
    }
    Ok(batch)
}

/// Delete a stored upload batch. A batch that was never written is fine.
async fn remove_batch_dir(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => tracing::debug!(dir = %dir.display(), "Removed upload batch"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(dir = %dir.display(), "Could not remove upload batch: {}", e),
    }
}

/// Handler for `POST /upload`
pub(crate) async fn upload(
    CurrentUser(user): CurrentUser,
    state: Extension<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Response, UploadError> {
    let dir = state.config.upload_dir.join(Ulid::new().to_string());
    let batch = match store_files(&dir, multipart).await {
        Ok(batch) => batch,
        Err(e) => {
            remove_batch_dir(&dir).await;
            return Err(e);
        }
    };
    if batch.is_empty() {
        return Err(UploadError::NoFiles);
    }
    tracing::info!(
        user = %user.id,
        audio = batch.audio.len(),
        data = batch.data.len(),
        chat = batch.chat.len(),
        "Processing upload"
    );

    let result = state.pipeline.run(batch, &user.email).await;
    remove_batch_dir(&dir).await;
    state.dispatcher.submit(Job::ResultReport {
        result: Box::new(result.clone()),
        requested_by: user.email.clone(),
    });

    Ok(Json(json!({ "result": result })).into_response())
}
