use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::Redirect,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::{instrument, warn};

use crate::{
    audit::{self, Window},
    auth::{
        dto::{
            BeginLoginQuery, CallbackQuery, HistoryQuery, LoginResponse, LogoutRequest, PublicUser,
            RefreshRequest,
        },
        jwt::AuthUser,
        service::{self, ClientMeta, TokenPair},
    },
    error::{AuthError, AuthResult},
    state::AppState,
    tokens,
    users::User,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/google", get(begin_google))
        .route("/auth/google/callback", get(google_callback))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/auth/logout_all", post(logout_all))
        .route("/auth/me", get(me))
        .route("/auth/sessions", get(sessions))
        .route("/auth/history", get(history))
}

/// First request header wins; `x-forwarded-for` may carry a whole chain.
fn client_meta(headers: &HeaderMap) -> ClientMeta {
    let ip = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty());
    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .map(str::to_owned);
    ClientMeta { ip, user_agent }
}

#[instrument(skip(state))]
async fn begin_google(
    State(state): State<AppState>,
    Query(query): Query<BeginLoginQuery>,
) -> AuthResult<Redirect> {
    let url = service::begin_login(&state, query.state.as_deref())?;
    Ok(Redirect::temporary(&url))
}

#[instrument(skip(state, query, headers))]
async fn google_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> AuthResult<Json<LoginResponse>> {
    if let Some(error) = query.error {
        warn!(provider_error = %error, "callback carried a provider error");
        return Err(AuthError::Provider(error));
    }
    let code = query
        .code
        .ok_or_else(|| AuthError::Provider("callback missing code".into()))?;
    let client_state = service::open_login_state(&state, query.state.as_deref())?;

    let meta = client_meta(&headers);
    let outcome = service::complete_login(&state, &code, &meta).await?;

    Ok(Json(LoginResponse {
        user: outcome.user.into(),
        is_new_user: outcome.is_new_user,
        state: client_state,
        tokens: outcome.tokens,
    }))
}

#[instrument(skip(state, headers, payload))]
async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<RefreshRequest>,
) -> AuthResult<Json<TokenPair>> {
    let meta = client_meta(&headers);
    let pair = service::refresh(&state, &payload.refresh_token, &meta).await?;
    Ok(Json(pair))
}

#[instrument(skip(state, payload))]
async fn logout(
    State(state): State<AppState>,
    Json(payload): Json<LogoutRequest>,
) -> AuthResult<Json<Value>> {
    service::revoke(&state, &payload.refresh_token).await?;
    Ok(Json(json!({ "ok": true })))
}

#[instrument(skip(state, headers))]
async fn logout_all(
    State(state): State<AppState>,
    headers: HeaderMap,
    AuthUser(user_id): AuthUser,
) -> AuthResult<Json<Value>> {
    let meta = client_meta(&headers);
    let revoked = service::revoke_all(&state, user_id, &meta).await?;
    Ok(Json(json!({ "ok": true, "revoked": revoked })))
}

#[instrument(skip(state))]
async fn me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> AuthResult<Json<PublicUser>> {
    let user = User::find_by_id(&state.db, user_id)
        .await?
        .ok_or(AuthError::UserNotFound)?;
    Ok(Json(user.into()))
}

/// Live refresh-token sessions for the caller. Digests are not serialized,
/// so only metadata leaves the server.
#[instrument(skip(state))]
async fn sessions(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> AuthResult<Json<Value>> {
    let active = tokens::repo::active_count(&state.db, user_id).await?;
    let sessions = tokens::repo::active_refresh_tokens(&state.db, user_id).await?;
    Ok(Json(json!({
        "active": active,
        "sessions": sessions,
    })))
}

#[instrument(skip(state))]
async fn history(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<HistoryQuery>,
) -> AuthResult<Json<Value>> {
    let page = query.page.unwrap_or(1);
    let limit = query.limit.unwrap_or(20);
    let logs = audit::repo::by_user(&state.db, user_id, page, limit).await?;
    let stats = audit::report::user_stats(
        &audit::repo::logs_for_user(&state.db, user_id).await?,
    );
    let last_login = audit::repo::last_successful_login(&state.db, user_id).await?;
    let failed_last_day =
        audit::repo::failed_count_for_user(&state.db, user_id, Window::hours(24)).await?;
    Ok(Json(json!({
        "logins": logs,
        "stats": stats,
        "last_successful_login": last_login,
        "failed_last_24h": failed_last_day,
    })))
}
