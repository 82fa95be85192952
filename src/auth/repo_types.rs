use sqlx::FromRow;
use time::OffsetDateTime;

pub type UserId = i64;

/// User record in the database.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: UserId,
    pub username: String,          // unique, case-sensitive
    pub password_hash: String,     // Argon2 PHC string, never serialized
    pub profile_photo_ref: Option<String>,
    pub id_photo_ref: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Row about to be inserted; the password is already hashed.
#[derive(Debug)]
pub struct NewUser<'a> {
    pub username: &'a str,
    pub password_hash: &'a str,
    pub profile_photo_ref: Option<&'a str>,
    pub id_photo_ref: Option<&'a str>,
}
