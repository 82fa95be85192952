use std::fmt::Write as _;
use std::path::Path;

use bytes::Bytes;
use lazy_static::lazy_static;
use regex::Regex;

use super::AttachmentKind;
use crate::storage::{StagedObject, StorageClient, WriteError};

/// Prefix of the public reference stored on the user record.
pub const PUBLIC_PREFIX: &str = "uploads";
const FALLBACK_EXT: &str = "bin";

/// A file part received from the client.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: Option<String>,
    pub body: Bytes,
}

impl Upload {
    /// Browsers send an empty, unnamed part when no file was picked.
    pub fn is_absent(&self) -> bool {
        self.body.is_empty() && self.file_name.as_deref().map_or(true, str::is_empty)
    }
}

/// An upload written to staging, waiting for its user record to commit.
#[derive(Debug)]
pub struct StagedAttachment {
    pub kind: AttachmentKind,
    pub key: String,
    object: StagedObject,
}

impl StagedAttachment {
    pub fn public_ref(&self) -> String {
        public_ref(&self.key)
    }
}

pub fn public_ref(key: &str) -> String {
    format!("{}/{}", PUBLIC_PREFIX, key)
}

/// `{kind}/{kind}_{owner}.{ext}`. Only the extension of the client file name is used.
pub fn object_key(kind: AttachmentKind, owner: &str, original_filename: Option<&str>) -> String {
    format!(
        "{kind}/{kind}_{}.{}",
        escape_owner(owner),
        extension_of(original_filename)
    )
}

fn extension_of(file_name: Option<&str>) -> String {
    lazy_static! {
        static ref EXT_RE: Regex = Regex::new(r"^[a-z0-9]{1,8}$").unwrap();
    }
    file_name
        .and_then(|n| Path::new(n).extension())
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .filter(|e| EXT_RE.is_match(e))
        .unwrap_or_else(|| FALLBACK_EXT.to_string())
}

// Injective, and never yields a path separator.
fn escape_owner(owner: &str) -> String {
    let mut out = String::with_capacity(owner.len());
    for b in owner.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-') {
            out.push(b as char);
        } else {
            let _ = write!(out, "%{:02X}", b);
        }
    }
    out
}

pub async fn stage(
    storage: &dyn StorageClient,
    kind: AttachmentKind,
    owner: &str,
    upload: Upload,
) -> Result<StagedAttachment, WriteError> {
    let key = object_key(kind, owner, upload.file_name.as_deref());
    let object = storage.stage_object(upload.body).await?;
    Ok(StagedAttachment { kind, key, object })
}

/// Publish a staged attachment under its final key and return the public reference.
pub async fn commit(
    storage: &dyn StorageClient,
    attachment: &StagedAttachment,
) -> Result<String, WriteError> {
    storage
        .commit_object(&attachment.object, &attachment.key)
        .await?;
    Ok(attachment.public_ref())
}

pub async fn discard_all(storage: &dyn StorageClient, attachments: Vec<StagedAttachment>) {
    for a in attachments {
        storage.discard_object(a.object).await;
    }
}

/// Write one attachment straight to its final location.
pub async fn save(
    storage: &dyn StorageClient,
    kind: AttachmentKind,
    raw_bytes: Bytes,
    original_filename: Option<&str>,
    owner: &str,
) -> Result<String, WriteError> {
    let upload = Upload {
        file_name: original_filename.map(str::to_owned),
        body: raw_bytes,
    };
    let staged = stage(storage, kind, owner, upload).await?;
    match commit(storage, &staged).await {
        Ok(reference) => Ok(reference),
        Err(e) => {
            discard_all(storage, vec![staged]).await;
            Err(e)
        }
    }
}

#[cfg(test)]
mod attachment_tests {
    use super::*;
    use crate::storage::LocalStorage;

    #[test]
    fn test_object_key() {
        assert_eq!(
            object_key(AttachmentKind::Profile, "carol", Some("me.JPG")),
            "profile/profile_carol.jpg"
        );
        assert_eq!(
            object_key(AttachmentKind::Id, "carol", Some("scan.tar.gz")),
            "id/id_carol.gz"
        );
        assert_eq!(object_key(AttachmentKind::Id, "carol", None), "id/id_carol.bin");
        assert_eq!(
            object_key(AttachmentKind::Id, "carol", Some("noext")),
            "id/id_carol.bin"
        );
        assert_eq!(
            object_key(AttachmentKind::Id, "carol", Some("x.<script>")),
            "id/id_carol.bin"
        );
    }

    #[test]
    fn test_hostile_names_stay_in_one_component() {
        assert_eq!(
            object_key(AttachmentKind::Profile, "alice", Some("../../etc/passwd")),
            "profile/profile_alice.bin"
        );
        assert_eq!(
            object_key(AttachmentKind::Profile, "alice", Some("../../evil.png")),
            "profile/profile_alice.png"
        );
        assert_eq!(
            object_key(AttachmentKind::Profile, "../../root", None),
            "profile/profile_..%2F..%2Froot.bin"
        );
        assert_ne!(escape_owner("a/b"), escape_owner("a%2Fb"));
    }

    #[test]
    fn test_absent_upload() {
        let empty = Upload {
            file_name: Some(String::new()),
            body: Bytes::new(),
        };
        assert!(empty.is_absent());
        let named = Upload {
            file_name: Some("empty.png".into()),
            body: Bytes::new(),
        };
        assert!(!named.is_absent());
    }

    #[tokio::test]
    async fn test_save_traversal_name_stays_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("uploads");
        let storage = LocalStorage::new(&root).await.unwrap();

        let reference = save(
            &storage,
            AttachmentKind::Profile,
            Bytes::from_static(b"not really passwd"),
            Some("../../etc/passwd"),
            "mallory",
        )
        .await
        .unwrap();

        assert_eq!(reference, "uploads/profile/profile_mallory.bin");
        let written = root.join("profile/profile_mallory.bin");
        assert!(written.canonicalize().unwrap().starts_with(root.canonicalize().unwrap()));
        assert_eq!(std::fs::read(written).unwrap(), b"not really passwd");
    }

    #[tokio::test]
    async fn test_save_twice_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        for body in ["v1", "v2"] {
            save(
                &storage,
                AttachmentKind::Id,
                Bytes::from(body),
                Some("id.png"),
                "dave",
            )
            .await
            .unwrap();
        }
        let got = storage.get_object("id/id_dave.png").await.unwrap();
        assert_eq!(&got[..], b"v2");
    }
}
