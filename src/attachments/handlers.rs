use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tracing::{error, instrument};

use super::AttachmentKind;
use crate::{state::AppState, storage::WriteError};

pub fn upload_routes() -> Router<AppState> {
    Router::new().route("/uploads/:kind/:file", get(get_upload))
}

/// GET /uploads/{kind}/{file}: bytes of a committed attachment.
#[instrument(skip(state))]
pub async fn get_upload(
    State(state): State<AppState>,
    Path((kind, file)): Path<(String, String)>,
) -> Response {
    let Some(kind) = AttachmentKind::parse(&kind) else {
        return (StatusCode::NOT_FOUND, "Not found").into_response();
    };
    let key = format!("{}/{}", kind, file);

    match state.storage.get_object(&key).await {
        Ok(body) => ([(header::CONTENT_TYPE, mime_from_ext(&file))], body).into_response(),
        Err(WriteError::NotFound(_)) | Err(WriteError::InvalidKey(_)) => {
            (StatusCode::NOT_FOUND, "Not found").into_response()
        }
        Err(e) => {
            error!(error = %e, %key, "read attachment failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
        }
    }
}

fn mime_from_ext(file: &str) -> &'static str {
    let ext = file.rsplit_once('.').map(|(_, e)| e).unwrap_or_default();
    match ext {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_mime_from_ext() {
        assert_eq!(super::mime_from_ext("profile_a.jpg"), "image/jpeg");
        assert_eq!(super::mime_from_ext("profile_a.png"), "image/png");
        assert_eq!(super::mime_from_ext("id_a.bin"), "application/octet-stream");
        assert_eq!(super::mime_from_ext("noext"), "application/octet-stream");
    }
}
