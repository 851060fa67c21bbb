use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // argon2 PHC string, never exposed in JSON
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>, // most recent login's token, never exposed
    pub avatar_url: String,
    pub cover_image_url: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Fields needed to insert a new user row.
#[derive(Debug)]
pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub full_name: &'a str,
    pub password_hash: &'a str,
    pub avatar_url: &'a str,
    pub cover_image_url: Option<&'a str>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_never_serialize() {
        let user = User {
            id: Uuid::new_v4(),
            username: "ab".into(),
            email: "a@b.com".into(),
            full_name: "A B".into(),
            password_hash: "$argon2id$v=19$secret".into(),
            refresh_token: Some("refresh.jwt.token".into()),
            avatar_url: "https://media.example.com/avatars/x.png".into(),
            cover_image_url: None,
            created_at: OffsetDateTime::UNIX_EPOCH,
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("password_hash"));
        assert!(!json.contains("argon2id"));
        assert!(!json.contains("refresh_token"));
        assert!(!json.contains("refresh.jwt.token"));
        assert!(json.contains("\"username\":\"ab\""));
    }
}
