use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::cookie::{Cookie, SameSite};
use axum_extra::extract::CookieJar;
use serde_json::{json, Value};

use crate::api::rest::extract::{AuthUser, ACCESS_COOKIE, REFRESH_COOKIE};
use crate::auth::TokenPair;
use crate::engine::accounts;
use crate::error::AppError;
use crate::models::user::{Credentials, Registration, Role, User};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/register/customer", post(register_customer))
        .route("/auth/register/agent", post(register_agent))
        .route("/auth/register/admin", post(register_admin))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
}

async fn register_customer(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Registration>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    register(&state, Role::Customer, payload).await
}

async fn register_agent(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Registration>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    register(&state, Role::Agent, payload).await
}

async fn register_admin(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Registration>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    register(&state, Role::Admin, payload).await
}

async fn register(
    state: &AppState,
    role: Role,
    payload: Registration,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let user = accounts::register(state, role, payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": format!("{} registered successfully", capitalized(role)),
            "user": user,
        })),
    ))
}

async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(payload): Json<Credentials>,
) -> Result<(CookieJar, Json<Value>), AppError> {
    let (user, tokens) = accounts::login(&state, payload).await?;
    let body = session_body(&state, "Login successful", &user, &tokens);
    Ok((with_session(&state, jar, tokens), Json(body)))
}

async fn refresh(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<Value>), (CookieJar, AppError)> {
    let Some(token) = jar.get(REFRESH_COOKIE).map(|c| c.value().to_string()) else {
        return Err((
            jar,
            AppError::Authentication("Refresh token not found".to_string()),
        ));
    };

    match accounts::refresh(&state, &token).await {
        Ok((user, tokens)) => {
            let body = session_body(&state, "Token refreshed", &user, &tokens);
            Ok((with_session(&state, jar, tokens), Json(body)))
        }
        Err(err) => Err((clear_session(jar), err)),
    }
}

async fn logout(jar: CookieJar) -> (CookieJar, Json<Value>) {
    (
        clear_session(jar),
        Json(json!({ "message": "Logged out successfully" })),
    )
}

async fn me(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<Value>, AppError> {
    let user = accounts::current_user(&state, &auth).await?;
    Ok(Json(json!({ "user": user })))
}

fn session_body(state: &AppState, message: &str, user: &User, tokens: &TokenPair) -> Value {
    let mut body = json!({ "message": message, "user": user });
    if state.config.exposes_tokens() {
        body["accessToken"] = json!(tokens.access_token);
        body["refreshToken"] = json!(tokens.refresh_token);
    }
    body
}

fn with_session(state: &AppState, jar: CookieJar, tokens: TokenPair) -> CookieJar {
    let secure = state.config.auth.secure_cookies;
    jar.add(session_cookie(ACCESS_COOKIE, tokens.access_token, secure))
        .add(session_cookie(REFRESH_COOKIE, tokens.refresh_token, secure))
}

fn clear_session(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build(ACCESS_COOKIE).path("/"))
        .remove(Cookie::build(REFRESH_COOKIE).path("/"))
}

fn session_cookie(name: &'static str, value: String, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .build()
}

fn capitalized(role: Role) -> &'static str {
    match role {
        Role::Admin => "Admin",
        Role::Agent => "Agent",
        Role::Customer => "Customer",
    }
}
