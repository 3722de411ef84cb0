use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::api::user::{NewUser, Role, User, UserExists};
use crate::error::{ApiError, ApiResult, ErrorEnvelope};
use crate::extractors::AuthenticatedUser;
use crate::inference::invoker::InterpreterCheck;
use crate::{bail_api, AppState};

#[derive(Serialize, Debug)]
pub(crate) struct PredictionResponse {
    success: bool,
    prediction: Value,
}

#[derive(Deserialize, Debug)]
pub(crate) struct SignupRequest {
    name: String,
    email: String,
    password: String,
}

#[derive(Deserialize, Debug)]
pub(crate) struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Serialize, Debug)]
pub(crate) struct SessionResponse {
    token: String,
    user: User,
}

#[derive(Serialize, Debug)]
pub(crate) struct HealthResponse {
    success: bool,
    message: &'static str,
    timestamp: String,
    database: &'static str,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SystemCheckResponse {
    #[serde(flatten)]
    check: InterpreterCheck,
    server_version: &'static str,
}

/// Unwraps a JSON body, answering malformed ones with the error envelope.
fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    match body {
        Ok(Json(value)) => Ok(value),
        Err(rejection) => Err(ApiError {
            status: rejection.status(),
            message: ErrorEnvelope::with_detail("Invalid request body", rejection.body_text()),
        }),
    }
}

async fn predict(state: &AppState, body: Value) -> ApiResult<Json<PredictionResponse>> {
    let prediction = state.bridge.predict(body).await?;
    Ok(Json(PredictionResponse {
        success: true,
        prediction,
    }))
}

#[axum_macros::debug_handler]
pub(crate) async fn handle_public_predict(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<PredictionResponse>> {
    predict(&state, json_body(body)?).await
}

#[axum_macros::debug_handler]
pub(crate) async fn handle_predict(
    AuthenticatedUser(claims): AuthenticatedUser,
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<PredictionResponse>> {
    info!(user = %claims.id, "Prediction requested");
    predict(&state, json_body(body)?).await
}

#[axum_macros::debug_handler]
pub(crate) async fn handle_signup(
    State(state): State<AppState>,
    body: Result<Json<SignupRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SessionResponse>)> {
    let req = json_body(body)?;
    if req.name.trim().is_empty() || req.email.trim().is_empty() || req.password.is_empty() {
        bail_api!(
            StatusCode::BAD_REQUEST,
            "Name, email and password are required"
        );
    }
    if state.users.with_email(&req.email).await?.is_some() {
        bail_api!(StatusCode::BAD_REQUEST, "User already exists");
    }

    let auth = state.auth.clone();
    let password = req.password;
    let hash = tokio::task::spawn_blocking(move || auth.hash_password(&password)).await??;
    let created = state
        .users
        .create(NewUser {
            name: req.name,
            email: req.email,
            password: hash,
            role: Role::Viewer,
        })
        .await;
    // A concurrent signup may have claimed the email after the lookup above.
    let user = match created {
        Ok(user) => user,
        Err(err) if err.is::<UserExists>() => {
            bail_api!(StatusCode::BAD_REQUEST, "User already exists")
        }
        Err(err) => return Err(err.into()),
    };
    let token = state.sessions.issue(&user)?;
    info!(user = %user.id, "Signed up {}", user.email);

    Ok((StatusCode::CREATED, Json(SessionResponse { token, user })))
}

#[axum_macros::debug_handler]
pub(crate) async fn handle_login(
    State(state): State<AppState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<Json<SessionResponse>> {
    let req = json_body(body)?;
    let Some(user) = state.users.with_email(&req.email).await? else {
        bail_api!(StatusCode::UNAUTHORIZED, "Invalid credentials");
    };

    let auth = state.auth.clone();
    let hash = user.password.clone();
    let valid =
        tokio::task::spawn_blocking(move || auth.verify_password(&req.password, &hash)).await??;
    if !valid {
        warn!(user = %user.id, "Rejected login");
        bail_api!(StatusCode::UNAUTHORIZED, "Invalid credentials");
    }

    let token = state.sessions.issue(&user)?;
    Ok(Json(SessionResponse { token, user }))
}

#[axum_macros::debug_handler]
pub(crate) async fn handle_profile(
    AuthenticatedUser(claims): AuthenticatedUser,
    State(state): State<AppState>,
) -> ApiResult<Json<User>> {
    match state.users.with_id(&claims.id).await? {
        Some(user) => Ok(Json(user)),
        None => bail_api!(StatusCode::NOT_FOUND, "User not found"),
    }
}

#[axum_macros::debug_handler]
pub(crate) async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match state.users.ping().await {
        Ok(()) => "connected",
        Err(err) => {
            warn!("Database ping failed: {}", err);
            "unavailable"
        }
    };
    Json(HealthResponse {
        success: true,
        message: "Server is running",
        timestamp: chrono::Utc::now().to_rfc3339(),
        database,
    })
}

#[axum_macros::debug_handler]
pub(crate) async fn handle_system_check(
    State(state): State<AppState>,
) -> Json<SystemCheckResponse> {
    let check = match state.interpreter.check_interpreter().await {
        Ok(check) => check,
        Err(err) => InterpreterCheck {
            success: false,
            interpreter_output: String::new(),
            interpreter_error: err.to_string(),
        },
    };
    Json(SystemCheckResponse {
        check,
        server_version: env!("CARGO_PKG_VERSION"),
    })
}

pub(crate) async fn handle_not_found() -> ApiError {
    ApiError {
        status: StatusCode::NOT_FOUND,
        message: ErrorEnvelope::from("Route not found"),
    }
}
