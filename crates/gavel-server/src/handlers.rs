use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::{
    auth::Claims,
    store::{ContactFields, Fields, OfferFields, StoreError, CONTACT_MESSAGES, ITEM_OFFERS},
    AppState,
};

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

// ── Public submissions ───────────────────────────────────────────────────────

// Absent JSON fields deserialize as empty strings so the validation step can
// name everything that's missing in one 400, rather than axum rejecting the
// body outright.
#[derive(Debug, Deserialize)]
pub struct SubmitContactRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub message: String,
    pub idempotency_key: Option<String>,
}

pub async fn submit_contact(
    State(state): State<AppState>,
    Json(body): Json<SubmitContactRequest>,
) -> Response {
    let fields = ContactFields {
        name: body.name,
        email: body.email,
        message: body.message,
    };
    let missing = fields.missing();
    if !missing.is_empty() {
        return validation_failed(&missing);
    }

    let idem = body.idempotency_key;
    match state
        .store
        .run(move |s| s.append(&CONTACT_MESSAGES, fields, idem))
        .await
    {
        Ok(record) => {
            metrics::counter!("gavel_submissions_total", "collection" => CONTACT_MESSAGES.name())
                .increment(1);
            info!(id = %record.id, "contact message received");
            (StatusCode::CREATED, Json(record)).into_response()
        }
        Err(e) => storage_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitOfferRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub item_title: String,
    #[serde(default)]
    pub item_description: String,
    pub idempotency_key: Option<String>,
}

pub async fn submit_offer(
    State(state): State<AppState>,
    Json(body): Json<SubmitOfferRequest>,
) -> Response {
    let fields = OfferFields {
        name: body.name,
        email: body.email,
        item_title: body.item_title,
        item_description: body.item_description,
    };
    let missing = fields.missing();
    if !missing.is_empty() {
        return validation_failed(&missing);
    }

    let idem = body.idempotency_key;
    match state
        .store
        .run(move |s| s.append(&ITEM_OFFERS, fields, idem))
        .await
    {
        Ok(record) => {
            metrics::counter!("gavel_submissions_total", "collection" => ITEM_OFFERS.name())
                .increment(1);
            info!(id = %record.id, item = %record.fields.item_title, "sale offer received");
            (StatusCode::CREATED, Json(record)).into_response()
        }
        Err(e) => storage_error(e),
    }
}

// ── Admin review ─────────────────────────────────────────────────────────────

pub async fn list_contacts(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Response {
    match state.store.run(|s| s.read_all(&CONTACT_MESSAGES)).await {
        Ok(records) => {
            info!(admin = %claims.sub, count = records.len(), "listed contact inbox");
            Json(json!({"messages": records})).into_response()
        }
        Err(e) => storage_error(e),
    }
}

pub async fn list_offers(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Response {
    match state.store.run(|s| s.read_all(&ITEM_OFFERS)).await {
        Ok(records) => {
            info!(admin = %claims.sub, count = records.len(), "listed sale offers");
            Json(json!({"offers": records})).into_response()
        }
        Err(e) => storage_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    pub response: String,
}

pub async fn respond_contact(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    Json(body): Json<RespondRequest>,
) -> Response {
    let record_id = id.clone();
    match state
        .store
        .run(move |s| s.update_by_id(&CONTACT_MESSAGES, &record_id, &body.response))
        .await
    {
        Ok(Some(record)) => {
            metrics::counter!("gavel_responses_total", "collection" => CONTACT_MESSAGES.name())
                .increment(1);
            info!(admin = %claims.sub, id = %record.id, "responded to contact message");
            Json(record).into_response()
        }
        Ok(None) => record_not_found(&id),
        Err(e) => storage_error(e),
    }
}

pub async fn respond_offer(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    Json(body): Json<RespondRequest>,
) -> Response {
    let record_id = id.clone();
    match state
        .store
        .run(move |s| s.update_by_id(&ITEM_OFFERS, &record_id, &body.response))
        .await
    {
        Ok(Some(record)) => {
            metrics::counter!("gavel_responses_total", "collection" => ITEM_OFFERS.name())
                .increment(1);
            info!(admin = %claims.sub, id = %record.id, "responded to sale offer");
            Json(record).into_response()
        }
        Ok(None) => record_not_found(&id),
        Err(e) => storage_error(e),
    }
}

// ── Login ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

pub async fn login(State(state): State<AppState>, Json(body): Json<LoginRequest>) -> Response {
    if !state.auth.admin_issuance_enabled {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"error": "admin sign-in is disabled"})),
        )
            .into_response();
    }

    if !state.auth.check_admin_login(&body.email, &body.password) {
        metrics::counter!("gavel_auth_rejections_total", "kind" => "bad_login").increment(1);
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid credentials"})),
        )
            .into_response();
    }

    match state.auth.issue_admin_token(&body.email) {
        Ok(token) => {
            info!(admin = %body.email, "issued admin token");
            Json(json!({"token": token})).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "token signing failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "internal server error"})),
            )
                .into_response()
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn validation_failed(missing: &[&str]) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": format!("missing required fields: {}", missing.join(", "))})),
    )
        .into_response()
}

fn record_not_found(id: &str) -> Response {
    info!(id = %id, "response target not found");
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": "record not found"})),
    )
        .into_response()
}

fn storage_error(e: StoreError) -> Response {
    tracing::error!(error = %e, "storage error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "internal server error"})),
    )
        .into_response()
}
