use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Query, State},
    http::{request, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, RequestPartsExt as _, Router,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use derive_more::From;
use headers::Header;
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use crate::{
    api, db,
    ledger::{ApplyDeltaError, GetTicketError, Ledger},
};

pub type SharedAppState = Arc<AppState>;

pub struct AppState {
    pub ledger: Ledger,

    /// Shared secret verifier clients must present. Auth is disabled when
    /// unset.
    pub api_key: Option<String>,
}

pub fn router(state: SharedAppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/summary", get(get_summary))
        .route("/checkin", post(checkin))
        .route("/search", get(search))
        .route("/history", get(get_history))
        .route("/totals", get(get_totals))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<api::Health> {
    Json(api::Health { ok: true })
}

#[derive(Deserialize)]
struct TicketQuery {
    ticket_id: api::ticket::Id,
}

async fn get_summary(
    State(state): State<SharedAppState>,
    _: Authorized,
    Query(TicketQuery { ticket_id }): Query<TicketQuery>,
) -> Result<Json<api::Summary>, GetTicketError> {
    let summary = state.ledger.get_ticket(&ticket_id).await?;
    Ok(Json(summary.into()))
}

impl IntoResponse for GetTicketError {
    fn into_response(self) -> Response {
        match &self {
            Self::TicketNotFound => {
                (StatusCode::NOT_FOUND, self.to_string()).into_response()
            }
            Self::DbError(e) => {
                tracing::error!("ticket lookup failed: {e}");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

async fn checkin(
    State(state): State<SharedAppState>,
    _: Authorized,
    Json(api::checkin::Request {
        ticket_id,
        delta,
        verifier_id,
        notes,
    }): Json<api::checkin::Request>,
) -> Result<Json<api::checkin::Response>, ApplyDeltaError> {
    let checkin = state
        .ledger
        .apply_delta(
            &ticket_id,
            delta,
            verifier_id.as_deref(),
            notes.as_deref(),
        )
        .await?;
    Ok(Json(checkin.into()))
}

impl IntoResponse for ApplyDeltaError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::NoChangeRequested | Self::OutOfBounds(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::TicketNotFound => StatusCode::NOT_FOUND,
            Self::DbError(e) => {
                tracing::error!("check-in failed: {e}");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };
        (status, self.to_string()).into_response()
    }
}

#[derive(Deserialize)]
struct SearchQuery {
    q: String,
}

async fn search(
    State(state): State<SharedAppState>,
    _: Authorized,
    Query(SearchQuery { q }): Query<SearchQuery>,
) -> Result<Json<Vec<api::Summary>>, StoreError> {
    let found = state.ledger.search(&q).await?;
    Ok(Json(found.into_iter().map(Into::into).collect()))
}

async fn get_history(
    State(state): State<SharedAppState>,
    _: Authorized,
    Query(TicketQuery { ticket_id }): Query<TicketQuery>,
) -> Result<Json<Vec<api::checkin::Batch>>, GetTicketError> {
    let batches = state.ledger.history(&ticket_id).await?;
    Ok(Json(batches.into_iter().map(Into::into).collect()))
}

async fn get_totals(
    State(state): State<SharedAppState>,
    _: Authorized,
) -> Result<Json<api::ticket::Totals>, StoreError> {
    let totals = state.ledger.totals().await?;
    Ok(Json(totals.into()))
}

#[derive(Debug, From)]
pub struct StoreError(db::Error);

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        tracing::error!("store query failed: {}", self.0);
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    }
}

/// Proof that the request carried the configured API key.
pub struct Authorized;

#[derive(Debug)]
pub enum AuthError {
    InvalidApiKey,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match self {
            Self::InvalidApiKey => StatusCode::UNAUTHORIZED,
        }
        .into_response()
    }
}

#[async_trait]
impl FromRequestParts<SharedAppState> for Authorized {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut request::Parts,
        state: &SharedAppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.api_key.as_deref() else {
            return Ok(Self);
        };

        // `X-API-Key` wins over `Authorization` when both are sent.
        let key = match parts.extract::<TypedHeader<XApiKey>>().await {
            Ok(TypedHeader(XApiKey(key))) => Some(key),
            Err(_) => parts
                .extract::<TypedHeader<Authorization<Bearer>>>()
                .await
                .ok()
                .map(|TypedHeader(Authorization(bearer))| {
                    bearer.token().trim().to_owned()
                }),
        };

        match key {
            Some(key) if key == expected => Ok(Self),
            _ => Err(AuthError::InvalidApiKey),
        }
    }
}

static X_API_KEY: HeaderName = HeaderName::from_static("x-api-key");

/// `X-API-Key` header.
pub struct XApiKey(pub String);

impl Header for XApiKey {
    fn name() -> &'static HeaderName {
        &X_API_KEY
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let key = values
            .next()
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(headers::Error::invalid)?;
        Ok(Self(key.to_owned()))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        if let Ok(value) = HeaderValue::from_str(&self.0) {
            values.extend(std::iter::once(value));
        }
    }
}
