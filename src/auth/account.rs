use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::auth::{jwt, password};
use crate::db::models::User;
use crate::error::{db_lock_error, ApiError};
use crate::presence::Role;
use crate::state::AppState;

// --- Request/Response types for JSON API ---

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub username: String,
    pub role: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: String,
    pub created_at: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            role: user.role,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValidateResponse {
    pub username: Option<String>,
    pub role: String,
}

const INVALID_CREDENTIALS: &str = "Invalid username or password";

/// Empty strings from form fields count as "not provided".
fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn validate_registration(req: &RegisterRequest) -> Result<(), ApiError> {
    let username_len = req.username.trim().chars().count();
    if !(3..=50).contains(&username_len) {
        return Err(ApiError::BadRequest(
            "Username must be between 3 and 50 characters".to_string(),
        ));
    }
    if req.password.chars().count() < 6 {
        return Err(ApiError::BadRequest(
            "Password must be at least 6 characters".to_string(),
        ));
    }
    if let Some(email) = req.email.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
        if email.chars().count() > 100 || !email.contains('@') {
            return Err(ApiError::BadRequest("Invalid email address".to_string()));
        }
    }
    for name in [&req.first_name, &req.last_name].into_iter().flatten() {
        if name.chars().count() > 100 {
            return Err(ApiError::BadRequest(
                "Names must be at most 100 characters".to_string(),
            ));
        }
    }
    Ok(())
}

// --- Handlers ---

/// POST /api/auth/register
/// Create a Customer account. Username and email must be unique.
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    validate_registration(&req)?;

    let username = req.username.trim().to_string();
    let email = non_empty(req.email);
    let first_name = non_empty(req.first_name);
    let last_name = non_empty(req.last_name);

    // PBKDF2 is deliberately slow; keep it off the async workers
    let plain = req.password;
    let password_hash = tokio::task::spawn_blocking(move || password::hash_password(&plain))
        .await?
        .map_err(ApiError::Internal)?;

    let db = state.db.clone();
    let user = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(db_lock_error)?;

        let taken: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE username = ?1)",
            [&username],
            |row| row.get(0),
        )?;
        if taken {
            return Err(ApiError::Conflict("Username already exists".to_string()));
        }

        if let Some(ref email) = email {
            let taken: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1)",
                [email],
                |row| row.get(0),
            )?;
            if taken {
                return Err(ApiError::Conflict("Email already exists".to_string()));
            }
        }

        conn.execute(
            "INSERT INTO users (username, password_hash, role, email, first_name, last_name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                username,
                password_hash,
                Role::CUSTOMER,
                email,
                first_name,
                last_name,
                Utc::now().to_rfc3339()
            ],
        )?;

        let id = conn.last_insert_rowid();
        let user = conn.query_row(
            &format!("SELECT {} FROM users WHERE id = ?1", User::COLUMNS),
            [id],
            User::from_row,
        )?;
        Ok::<_, ApiError>(user)
    })
    .await??;

    tracing::info!(user_id = user.id, username = %user.username, "User registered");

    Ok((StatusCode::CREATED, Json(UserResponse::from(user))))
}

/// POST /api/auth/login
/// Verify credentials and issue an access token.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let db = state.db.clone();
    let username = req.username.trim().to_string();

    let user = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(db_lock_error)?;
        let user = conn
            .query_row(
                &format!("SELECT {} FROM users WHERE username = ?1", User::COLUMNS),
                [&username],
                User::from_row,
            )
            .optional()?;
        Ok::<_, ApiError>(user)
    })
    .await??;

    let Some(user) = user else {
        tracing::debug!(username = %req.username, "Login for unknown user");
        return Err(ApiError::Unauthorized(INVALID_CREDENTIALS.to_string()));
    };

    let plain = req.password;
    let stored = user.password_hash.clone();
    let valid = tokio::task::spawn_blocking(move || password::verify_password(&plain, &stored)).await?;
    if !valid {
        tracing::debug!(username = %user.username, "Login with wrong password");
        return Err(ApiError::Unauthorized(INVALID_CREDENTIALS.to_string()));
    }

    let token = jwt::issue_access_token(&state.tokens, &user)?;

    tracing::info!(user_id = user.id, username = %user.username, "User logged in");

    Ok(Json(LoginResponse {
        token,
        username: user.username,
        role: user.role,
    }))
}

/// GET /api/auth/validate
/// Echo the identity of a still-valid token.
pub async fn validate(claims: Claims) -> Json<ValidateResponse> {
    let role = claims.role().as_str().to_string();
    Json(ValidateResponse {
        username: claims.username,
        role,
    })
}
