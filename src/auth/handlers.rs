use axum::{
    extract::{DefaultBodyLimit, FromRef, Multipart, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        cookies::{auth_cookies, clear_auth_cookies, cookie_value, REFRESH_COOKIE},
        dto::{AuthPayload, LoginRequest, PublicUser, RefreshRequest, RegisterForm, TokenPayload},
        extractors::AuthUser,
        jwt::JwtKeys,
        password::{hash_password, verify_password},
        repo_types::{NewUser, User},
    },
    envelope::ApiResponse,
    error::ApiError,
    state::AppState,
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users/register", post(register))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024)) // 20MB for image uploads
        .route("/users/login", post(login))
        .route("/users/logout", post(logout))
        .route("/users/refresh-token", post(refresh_token))
        .route("/users/current-user", get(current_user))
}

fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Trim a field, rejecting it when empty.
fn required(name: &str, value: &str) -> Result<String, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::Validation(format!("{name} is required")));
    }
    Ok(trimmed.to_string())
}

/// The password must be non-empty after trimming but is hashed exactly as
/// supplied, so whatever the user registered with verifies at login.
fn validate_password(raw: &str) -> Result<&str, ApiError> {
    if raw.trim().is_empty() {
        return Err(ApiError::Validation("password is required".into()));
    }
    Ok(raw)
}

fn ext_from_mime(ct: &str) -> &'static str {
    match ct {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/heic" => "heic",
        _ => "bin",
    }
}

struct UploadedImage {
    body: Bytes,
    content_type: String,
}

/// Sign an access+refresh pair and persist the refresh token on the user
/// row. The most recent login wins.
async fn issue_session_tokens(
    state: &AppState,
    user_id: Uuid,
) -> Result<(String, String), ApiError> {
    let keys = JwtKeys::from_ref(state);
    let (access, refresh) = keys.sign_pair(user_id).map_err(|e| {
        error!(error = %e, user_id = %user_id, "jwt signing failed");
        ApiError::Dependency("token generation failed".into())
    })?;
    User::set_refresh_token(&state.db, user_id, Some(&refresh)).await?;
    Ok((access, refresh))
}

fn session_cookie_headers(
    keys: &JwtKeys,
    access: &str,
    refresh: &str,
) -> Result<HeaderMap, ApiError> {
    auth_cookies(access, refresh, keys.access_ttl, keys.refresh_ttl).map_err(|e| {
        error!(error = %e, "auth cookie header build failed");
        ApiError::Dependency("failed to set session cookies".into())
    })
}

#[instrument(skip(state, multipart))]
pub async fn register(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<ApiResponse<PublicUser>, ApiError> {
    let mut form = RegisterForm::default();
    let mut avatar: Option<UploadedImage> = None;
    let mut cover: Option<UploadedImage> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("malformed multipart request: {e}")))?
    {
        let Some(name) = field.name().map(|s| s.to_string()) else {
            continue;
        };
        match name.as_str() {
            "fullName" => {
                form.full_name = field
                    .text()
                    .await
                    .map_err(|_| ApiError::Validation("fullName must be text".into()))?;
            }
            "username" => {
                form.username = field
                    .text()
                    .await
                    .map_err(|_| ApiError::Validation("username must be text".into()))?;
            }
            "email" => {
                form.email = field
                    .text()
                    .await
                    .map_err(|_| ApiError::Validation("email must be text".into()))?;
            }
            "password" => {
                form.password = field
                    .text()
                    .await
                    .map_err(|_| ApiError::Validation("password must be text".into()))?;
            }
            "avatar" | "coverImage" => {
                let content_type = field
                    .content_type()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "application/octet-stream".into());
                let body = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::Validation(format!("failed to read {name}: {e}")))?;
                let image = UploadedImage { body, content_type };
                if name == "avatar" {
                    avatar = Some(image);
                } else {
                    cover = Some(image);
                }
            }
            _ => {}
        }
    }

    let full_name = required("fullName", &form.full_name)?;
    let username = required("username", &form.username)?.to_lowercase();
    let email = required("email", &form.email)?.to_lowercase();
    let password = validate_password(&form.password)?;

    if !is_valid_email(&email) {
        warn!(%email, "invalid email");
        return Err(ApiError::Validation("invalid email".into()));
    }

    if User::find_by_username_or_email(&state.db, &username, &email)
        .await?
        .is_some()
    {
        warn!(%username, %email, "duplicate registration");
        return Err(ApiError::Conflict(
            "user with this username or email already exists".into(),
        ));
    }

    let Some(avatar) = avatar else {
        return Err(ApiError::Validation("avatar file is required".into()));
    };

    // Uploads happen before the insert so a failed upload never leaves a
    // partially created user behind.
    let avatar_key = format!(
        "avatars/{}.{}",
        Uuid::new_v4(),
        ext_from_mime(&avatar.content_type)
    );
    let avatar_url = state
        .media
        .upload(&avatar_key, avatar.body, &avatar.content_type)
        .await
        .map_err(|e| {
            error!(error = %e, "avatar upload failed");
            ApiError::Dependency("avatar upload failed".into())
        })?;

    let cover_image_url = match cover {
        Some(cover) => {
            let key = format!("covers/{}.{}", Uuid::new_v4(), ext_from_mime(&cover.content_type));
            let url = state
                .media
                .upload(&key, cover.body, &cover.content_type)
                .await
                .map_err(|e| {
                    error!(error = %e, "cover image upload failed");
                    ApiError::Dependency("cover image upload failed".into())
                })?;
            Some(url)
        }
        None => None,
    };

    let password_hash = hash_password(password).map_err(|e| {
        error!(error = %e, "password hashing failed");
        ApiError::Dependency("password hashing failed".into())
    })?;

    let created = User::create(
        &state.db,
        NewUser {
            username: &username,
            email: &email,
            full_name: &full_name,
            password_hash: &password_hash,
            avatar_url: &avatar_url,
            cover_image_url: cover_image_url.as_deref(),
        },
    )
    .await?;

    // Re-fetch as a sanity check that the row really landed.
    let user = User::find_by_id(&state.db, created.id)
        .await?
        .ok_or_else(|| ApiError::Dependency("user creation failed".into()))?;

    info!(user_id = %user.id, username = %user.username, "user registered");
    Ok(ApiResponse::created(
        PublicUser::from(user),
        "user registered successfully",
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<(HeaderMap, ApiResponse<AuthPayload>), ApiError> {
    let username = payload
        .username
        .as_deref()
        .map(|u| u.trim().to_lowercase())
        .filter(|u| !u.is_empty());
    let email = payload
        .email
        .as_deref()
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty());

    let Some(identity) = username.or(email) else {
        return Err(ApiError::Validation("username or email is required".into()));
    };

    let user = User::find_by_username_or_email(&state.db, &identity, &identity)
        .await?
        .ok_or_else(|| {
            warn!(%identity, "login against unknown user");
            ApiError::NotFound("user does not exist".into())
        })?;

    if !verify_password(&payload.password, &user.password_hash) {
        warn!(user_id = %user.id, "login with invalid password");
        return Err(ApiError::Auth("invalid credentials".into()));
    }

    let (access_token, refresh_token) = issue_session_tokens(&state, user.id).await?;

    let keys = JwtKeys::from_ref(&state);
    let headers = session_cookie_headers(&keys, &access_token, &refresh_token)?;

    info!(user_id = %user.id, username = %user.username, "user logged in");
    Ok((
        headers,
        ApiResponse::ok(
            AuthPayload {
                user: PublicUser::from(user),
                access_token,
                refresh_token,
            },
            "user logged in successfully",
        ),
    ))
}

/// Clearing an already-cleared token is fine: logout is idempotent.
#[instrument(skip(state))]
pub async fn logout(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<(HeaderMap, ApiResponse<()>), ApiError> {
    User::set_refresh_token(&state.db, user_id, None).await?;

    info!(user_id = %user_id, "user logged out");
    Ok((
        clear_auth_cookies(),
        ApiResponse::ok((), "user logged out successfully"),
    ))
}

#[instrument(skip(state, headers, payload))]
pub async fn refresh_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Option<Json<RefreshRequest>>,
) -> Result<(HeaderMap, ApiResponse<TokenPayload>), ApiError> {
    let incoming = cookie_value(&headers, REFRESH_COOKIE)
        .or_else(|| payload.and_then(|Json(p)| p.refresh_token))
        .ok_or_else(|| ApiError::Auth("refresh token is required".into()))?;

    let keys = JwtKeys::from_ref(&state);
    let claims = keys
        .verify_refresh(&incoming)
        .map_err(|_| ApiError::Auth("invalid refresh token".into()))?;

    let user = User::find_by_id(&state.db, claims.sub)
        .await?
        .ok_or_else(|| ApiError::Auth("invalid refresh token".into()))?;

    // The token must still be the one persisted at the last login;
    // anything older was rotated out.
    if user.refresh_token.as_deref() != Some(incoming.as_str()) {
        warn!(user_id = %user.id, "refresh token is expired or already used");
        return Err(ApiError::Auth("refresh token is expired or used".into()));
    }

    let (access_token, refresh_token) = issue_session_tokens(&state, user.id).await?;
    let cookie_headers = session_cookie_headers(&keys, &access_token, &refresh_token)?;

    info!(user_id = %user.id, "access token refreshed");
    Ok((
        cookie_headers,
        ApiResponse::ok(
            TokenPayload {
                access_token,
                refresh_token,
            },
            "access token refreshed",
        ),
    ))
}

#[instrument(skip(state))]
pub async fn current_user(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<ApiResponse<PublicUser>, ApiError> {
    let user = User::find_by_id(&state.db, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("user not found".into()))?;

    Ok(ApiResponse::ok(
        PublicUser::from(user),
        "current user fetched successfully",
    ))
}
