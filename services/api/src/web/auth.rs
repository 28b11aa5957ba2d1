//! services/api/src/web/auth.rs
//!
//! Authentication endpoints for user registration and login. Both issue a
//! signed bearer token on success; there is no server-side session row.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use goal_coach_core::ports::PortError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;

use crate::web::{state::AppState, token};

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, ToSchema)]
pub struct UserPayload {
    pub id: i64,
    pub email: String,
    pub name: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserPayload,
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /auth/register - Create a new user account
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User created successfully", body = AuthResponse),
        (status = 409, description = "Email already registered"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    // 1. Hash the password
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| {
            error!("Failed to hash password: {:?}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to hash password".to_string(),
            )
        })?
        .to_string();

    // 2. Create user in database
    let user = state
        .store
        .create_user_with_email(&req.email, req.name.as_deref(), &password_hash)
        .await
        .map_err(|e| match e {
            PortError::Conflict(_) => (
                StatusCode::CONFLICT,
                "Email is already registered".to_string(),
            ),
            other => {
                error!("Failed to create user: {:?}", other);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to create user".to_string(),
                )
            }
        })?;

    // 3. Issue a signed token for the new identity
    let token = token::issue(
        user.id,
        &user.email,
        &state.config.token_secret,
        state.config.token_ttl,
    )
    .map_err(|e| {
        error!("Failed to issue token: {:?}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to issue token".to_string(),
        )
    })?;

    let response = AuthResponse {
        token,
        user: UserPayload {
            id: user.id,
            email: user.email,
            name: user.name,
        },
    };

    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /auth/login - Login with existing account
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    // 1. Get user by email
    let user_creds = state
        .store
        .get_user_by_email(&req.email)
        .await
        .map_err(|e| {
            error!("Failed to get user: {:?}", e);
            (
                StatusCode::UNAUTHORIZED,
                "Invalid email or password".to_string(),
            )
        })?;

    // 2. Verify password
    let parsed_hash = PasswordHash::new(&user_creds.hashed_password).map_err(|e| {
        error!("Failed to parse password hash: {:?}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Authentication error".to_string(),
        )
    })?;

    let valid = Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .is_ok();

    if !valid {
        return Err((
            StatusCode::UNAUTHORIZED,
            "Invalid email or password".to_string(),
        ));
    }

    // 3. Issue a signed token
    let token = token::issue(
        user_creds.id,
        &user_creds.email,
        &state.config.token_secret,
        state.config.token_ttl,
    )
    .map_err(|e| {
        error!("Failed to issue token: {:?}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to issue token".to_string(),
        )
    })?;

    let response = AuthResponse {
        token,
        user: UserPayload {
            id: user_creds.id,
            email: user_creds.email,
            name: user_creds.name,
        },
    };

    Ok((StatusCode::OK, Json(response)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::testing::{test_state, GeneratorScript, MockGenerator, MockStore};

    fn state() -> Arc<AppState> {
        let store = Arc::new(MockStore::new());
        Arc::new(test_state(
            store,
            Arc::new(MockGenerator::new(GeneratorScript::Chunks(vec![]))),
        ))
    }

    #[tokio::test]
    async fn register_then_login_round_trip() {
        let state = state();

        let registered = register_handler(
            State(state.clone()),
            Json(RegisterRequest {
                email: "kim@example.com".to_string(),
                password: "hunter2hunter2".to_string(),
                name: Some("Kim".to_string()),
            }),
        )
        .await;
        assert!(registered.is_ok());

        let logged_in = login_handler(
            State(state),
            Json(LoginRequest {
                email: "kim@example.com".to_string(),
                password: "hunter2hunter2".to_string(),
            }),
        )
        .await;
        assert!(logged_in.is_ok());
    }

    #[tokio::test]
    async fn duplicate_registration_is_a_conflict() {
        let state = state();
        let request = || {
            Json(RegisterRequest {
                email: "kim@example.com".to_string(),
                password: "hunter2hunter2".to_string(),
                name: None,
            })
        };

        assert!(register_handler(State(state.clone()), request()).await.is_ok());
        let second = register_handler(State(state), request()).await;
        assert_eq!(second.err().unwrap().0, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn wrong_password_is_unauthorized() {
        let state = state();
        register_handler(
            State(state.clone()),
            Json(RegisterRequest {
                email: "kim@example.com".to_string(),
                password: "correct-password".to_string(),
                name: None,
            }),
        )
        .await
        .ok();

        let attempt = login_handler(
            State(state),
            Json(LoginRequest {
                email: "kim@example.com".to_string(),
                password: "wrong-password".to_string(),
            }),
        )
        .await;
        assert_eq!(attempt.err().unwrap().0, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_email_is_unauthorized() {
        let state = state();
        let attempt = login_handler(
            State(state),
            Json(LoginRequest {
                email: "ghost@example.com".to_string(),
                password: "whatever".to_string(),
            }),
        )
        .await;
        assert_eq!(attempt.err().unwrap().0, StatusCode::UNAUTHORIZED);
    }
}
