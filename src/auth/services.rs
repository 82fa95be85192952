use tracing::{debug, instrument, warn};

use crate::{
    attachments::{
        services::{self as attachments, StagedAttachment, Upload},
        AttachmentKind,
    },
    auth::{
        password::{self, PasswordError},
        repo::{validate_credentials, CredentialStore, StoreError},
        repo_types::{NewUser, UserId},
    },
    storage::{StorageClient, WriteError},
};

/// Registration form after multipart decoding.
#[derive(Debug, Default)]
pub struct Registration {
    pub username: String,
    pub password: String,
    pub profile_photo: Option<Upload>,
    pub id_photo: Option<Upload>,
}

/// What a successful registration hands back. Carries no credential material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredUser {
    pub id: UserId,
    pub username: String,
    pub profile_photo_ref: Option<String>,
    pub id_photo_ref: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    #[error("{0}")]
    Validation(&'static str),
    #[error("failed to hash password")]
    Hash(#[source] PasswordError),
    #[error("failed to save {slot} photo")]
    Attachment {
        slot: AttachmentKind,
        #[source]
        source: WriteError,
    },
    #[error("username already exists")]
    Conflict,
    #[error("failed to create user")]
    Store(#[source] StoreError),
}

impl From<StoreError> for RegisterError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Validation(msg) => RegisterError::Validation(msg),
            StoreError::Conflict => RegisterError::Conflict,
            StoreError::Hash(e) => RegisterError::Hash(e),
            e @ StoreError::Database(_) => RegisterError::Store(e),
        }
    }
}

/// Validate, hash, stage attachments, insert, publish attachments, commit.
///
/// Attachments are renamed into place while the insert is still uncommitted; any
/// failure up to the commit rolls the row back and discards what was staged.
#[instrument(skip_all, fields(username = %reg.username))]
pub async fn register(
    store: &CredentialStore,
    storage: &dyn StorageClient,
    reg: Registration,
) -> Result<RegisteredUser, RegisterError> {
    validate_credentials(&reg.username, &reg.password)?;

    let password_hash = password::hash_password_blocking(reg.password)
        .await
        .map_err(RegisterError::Hash)?;

    let uploads = [
        (AttachmentKind::Profile, reg.profile_photo),
        (AttachmentKind::Id, reg.id_photo),
    ];
    let mut staged: Vec<StagedAttachment> = Vec::with_capacity(uploads.len());
    for (kind, upload) in uploads {
        let Some(upload) = upload.filter(|u| !u.is_absent()) else {
            continue;
        };
        debug!(slot = %kind, bytes = upload.body.len(), "staging attachment");
        match attachments::stage(storage, kind, &reg.username, upload).await {
            Ok(a) => staged.push(a),
            Err(source) => {
                attachments::discard_all(storage, staged).await;
                return Err(RegisterError::Attachment { slot: kind, source });
            }
        }
    }

    let profile_photo_ref = public_ref_for(&staged, AttachmentKind::Profile);
    let id_photo_ref = public_ref_for(&staged, AttachmentKind::Id);

    let pending = match store
        .begin_create(&NewUser {
            username: &reg.username,
            password_hash: &password_hash,
            profile_photo_ref: profile_photo_ref.as_deref(),
            id_photo_ref: id_photo_ref.as_deref(),
        })
        .await
    {
        Ok(p) => p,
        Err(e) => {
            attachments::discard_all(storage, staged).await;
            return Err(e.into());
        }
    };

    let mut failed = None;
    for a in &staged {
        if let Err(source) = attachments::commit(storage, a).await {
            failed = Some((a.kind, source));
            break;
        }
    }
    if let Some((slot, source)) = failed {
        if let Err(e) = pending.rollback().await {
            warn!(error = %e, "rollback after attachment failure");
        }
        attachments::discard_all(storage, staged).await;
        return Err(RegisterError::Attachment { slot, source });
    }

    let id = match pending.commit().await {
        Ok(id) => id,
        Err(e) => {
            // attachments are already published; they stay as orphans
            warn!(error = %e, attachments = staged.len(), "commit failed after publishing attachments");
            return Err(e.into());
        }
    };

    Ok(RegisteredUser {
        id,
        username: reg.username,
        profile_photo_ref,
        id_photo_ref,
    })
}

fn public_ref_for(staged: &[StagedAttachment], kind: AttachmentKind) -> Option<String> {
    staged
        .iter()
        .find(|a| a.kind == kind)
        .map(StagedAttachment::public_ref)
}

/// Tri-state login result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Success,
    UserNotFound,
    InvalidCredentials,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Hash(#[from] PasswordError),
}

/// Look the user up and check the password. Unknown usernames still pay for one
/// Argon2 verification.
#[instrument(skip(store, password))]
pub async fn authenticate(
    store: &CredentialStore,
    username: &str,
    password: String,
) -> Result<AuthOutcome, AuthError> {
    let Some(user) = store.find_by_username(username).await? else {
        password::verify_against_dummy(password).await;
        return Ok(AuthOutcome::UserNotFound);
    };

    if password::verify_password_blocking(password, user.password_hash).await? {
        Ok(AuthOutcome::Success)
    } else {
        Ok(AuthOutcome::InvalidCredentials)
    }
}
