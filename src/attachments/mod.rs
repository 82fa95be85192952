use std::fmt;

pub mod handlers;
pub mod services;

/// Upload slot an attachment is stored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Profile,
    Id,
}

impl AttachmentKind {
    pub const ALL: [AttachmentKind; 2] = [AttachmentKind::Profile, AttachmentKind::Id];

    /// Subtree and file-name prefix.
    pub fn as_str(self) -> &'static str {
        match self {
            AttachmentKind::Profile => "profile",
            AttachmentKind::Id => "id",
        }
    }

    /// Multipart field carrying this slot on `POST /register`.
    pub fn form_field(self) -> &'static str {
        match self {
            AttachmentKind::Profile => "profilePhoto",
            AttachmentKind::Id => "idPhoto",
        }
    }

    pub fn from_form_field(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.form_field() == name)
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for AttachmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
