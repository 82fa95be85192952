use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
        DefaultBodyLimit, Multipart, State,
    },
    http::StatusCode,
    routing::post,
    Json, Router,
};
use tracing::{error, info, instrument, warn};

use crate::{
    attachments::{services::Upload, AttachmentKind},
    auth::{
        dto::{ApiResponse, LoginRequest},
        services::{self, AuthOutcome, RegisterError, Registration},
    },
    state::AppState,
};

type ApiResult = Result<Json<ApiResponse>, (StatusCode, Json<ApiResponse>)>;

pub fn auth_routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route(
            "/register",
            post(register).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/login", post(login))
}

fn fail(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ApiResponse>) {
    (status, Json(ApiResponse::fail(message)))
}

/// POST /register (multipart: username, password, profilePhoto?, idPhoto?)
#[instrument(skip(state, multipart))]
pub async fn register(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult {
    let multipart = multipart.map_err(|e| {
        warn!(error = %e, "register without multipart body");
        fail(StatusCode::BAD_REQUEST, "Invalid form data")
    })?;
    let registration = read_registration(multipart).await.map_err(|e| {
        warn!(error = %e, "invalid multipart body");
        fail(e.status(), "Invalid form data")
    })?;

    match services::register(&state.store, state.storage.as_ref(), registration).await {
        Ok(user) => {
            info!(user_id = user.id, username = %user.username, "user registered");
            Ok(Json(ApiResponse {
                profile_photo: user.profile_photo_ref,
                id_photo: user.id_photo_ref,
                ..ApiResponse::ok("User registered successfully")
            }))
        }
        Err(e) => Err(register_failure(e)),
    }
}

async fn read_registration(mut mp: Multipart) -> Result<Registration, MultipartError> {
    let mut reg = Registration::default();
    while let Some(field) = mp.next_field().await? {
        let name = field.name().map(|s| s.to_string());
        match name.as_deref() {
            Some("username") => reg.username = field.text().await?,
            Some("password") => reg.password = field.text().await?,
            Some(other) => {
                let Some(kind) = AttachmentKind::from_form_field(other) else {
                    continue;
                };
                let file_name = field.file_name().map(|s| s.to_string());
                let body = field.bytes().await?;
                let upload = Some(Upload { file_name, body });
                match kind {
                    AttachmentKind::Profile => reg.profile_photo = upload,
                    AttachmentKind::Id => reg.id_photo = upload,
                }
            }
            None => {}
        }
    }
    Ok(reg)
}

fn register_failure(e: RegisterError) -> (StatusCode, Json<ApiResponse>) {
    match e {
        RegisterError::Validation(msg) => {
            warn!(reason = msg, "registration rejected");
            fail(StatusCode::BAD_REQUEST, msg)
        }
        RegisterError::Conflict => {
            warn!("username already registered");
            fail(StatusCode::CONFLICT, "Username already exists")
        }
        RegisterError::Hash(ref source) => {
            error!(error = %source, "hash_password failed");
            fail(StatusCode::INTERNAL_SERVER_ERROR, "Failed to hash password")
        }
        RegisterError::Attachment { slot, ref source } => {
            error!(error = %source, %slot, "attachment write failed");
            let message = match slot {
                AttachmentKind::Profile => "Failed to save profile photo",
                AttachmentKind::Id => "Failed to save ID photo",
            };
            fail(StatusCode::INTERNAL_SERVER_ERROR, message)
        }
        RegisterError::Store(ref source) => {
            error!(error = %source, "create user failed");
            fail(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create user")
        }
    }
}

/// POST /login (JSON: username, password)
#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult {
    let Json(payload) = payload.map_err(|e| {
        warn!(error = %e, "invalid login body");
        fail(StatusCode::BAD_REQUEST, "Invalid request")
    })?;

    match services::authenticate(&state.store, &payload.username, payload.password).await {
        Ok(AuthOutcome::Success) => {
            info!(username = %payload.username, "user logged in");
            Ok(Json(ApiResponse::ok("Login successful")))
        }
        Ok(AuthOutcome::UserNotFound) => {
            warn!("login unknown username");
            Err(fail(StatusCode::UNAUTHORIZED, "User not found"))
        }
        Ok(AuthOutcome::InvalidCredentials) => {
            warn!(username = %payload.username, "login invalid password");
            Err(fail(StatusCode::UNAUTHORIZED, "Invalid credentials"))
        }
        Err(e) => {
            error!(error = %e, "authenticate failed");
            Err(fail(StatusCode::INTERNAL_SERVER_ERROR, "Database error"))
        }
    }
}
