#![forbid(unsafe_code)]

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Query, State},
    http::{
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
        HeaderMap, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use tracing::error;

use crate::{
    AdapterError, AdapterRuntime, AddSampleRequest, Caller, ReferenceQuery, UpdateSettingsRequest,
    UploadReferenceRequest,
};

pub const OWNER_HEADER: &str = "x-circuit-seq-owner";
pub const ADMIN_HEADER: &str = "x-circuit-seq-admin";

type SharedRuntime = Arc<AdapterRuntime>;

/// Request bodies are capped at [`AdapterRuntime::request_body_limit`] so the
/// configured upload ceiling is reachable once encoded.
pub fn router(runtime: SharedRuntime) -> Router {
    let body_limit = runtime.request_body_limit();
    Router::new()
        .route("/healthz", get(healthz))
        .route("/remaining", get(remaining))
        .route("/samples", get(samples))
        .route("/addsample", post(add_sample))
        .route(
            "/reference_sequence",
            get(download_reference).post(upload_reference),
        )
        .route("/admin/settings", get(settings).post(update_settings))
        .route("/admin/allsamples", get(all_samples))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(runtime)
}

/// Identity asserted by the upstream auth layer.
pub fn caller_from_headers(headers: &HeaderMap) -> Result<Caller, AdapterError> {
    let owner = headers
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(AdapterError::MissingIdentity)?;
    let is_admin = headers
        .get(ADMIN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);
    Ok(Caller {
        owner: owner.to_string(),
        is_admin,
    })
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AdapterError> {
    payload.map(|Json(body)| body).map_err(AdapterError::from)
}

/// `attachment` disposition with a filename that is always a valid quoted string.
pub fn attachment_disposition(file_name: &str) -> String {
    let safe: String = file_name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();
    format!("attachment; filename=\"{safe}\"")
}

// Storage work is synchronous and may fsync; keep it off the async workers.
async fn blocking<T, F>(runtime: SharedRuntime, work: F) -> Result<T, AdapterError>
where
    T: Send + 'static,
    F: FnOnce(&AdapterRuntime) -> Result<T, AdapterError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || work(runtime.as_ref()))
        .await
        .map_err(|err| {
            error!(error = %err, "blocking task failed");
            AdapterError::Internal(format!("blocking task failed: {err}"))
        })?
}

async fn healthz(State(runtime): State<SharedRuntime>) -> Response {
    match blocking(runtime, |rt| rt.health()).await {
        Ok(health) => (StatusCode::OK, Json(health)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn remaining(State(runtime): State<SharedRuntime>) -> Response {
    let now = Utc::now();
    match blocking(runtime, move |rt| rt.remaining(now)).await {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn samples(State(runtime): State<SharedRuntime>, headers: HeaderMap) -> Response {
    let result = match caller_from_headers(&headers) {
        Ok(caller) => {
            let now = Utc::now();
            blocking(runtime, move |rt| rt.samples(&caller, now)).await
        }
        Err(err) => Err(err),
    };
    match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn all_samples(State(runtime): State<SharedRuntime>, headers: HeaderMap) -> Response {
    let result = match caller_from_headers(&headers) {
        Ok(caller) => {
            let now = Utc::now();
            blocking(runtime, move |rt| rt.all_samples(&caller, now)).await
        }
        Err(err) => Err(err),
    };
    match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn add_sample(
    State(runtime): State<SharedRuntime>,
    headers: HeaderMap,
    payload: Result<Json<AddSampleRequest>, JsonRejection>,
) -> Response {
    let result = match (caller_from_headers(&headers), json_body(payload)) {
        (Ok(caller), Ok(request)) => {
            let now = Utc::now();
            blocking(runtime, move |rt| rt.add_sample(&caller, request, now)).await
        }
        (Err(err), _) | (_, Err(err)) => Err(err),
    };
    match result {
        Ok(body) => (StatusCode::CREATED, Json(body)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn upload_reference(
    State(runtime): State<SharedRuntime>,
    headers: HeaderMap,
    payload: Result<Json<UploadReferenceRequest>, JsonRejection>,
) -> Response {
    let result = match (caller_from_headers(&headers), json_body(payload)) {
        (Ok(caller), Ok(request)) => {
            blocking(runtime, move |rt| rt.upload_reference(&caller, request)).await
        }
        (Err(err), _) | (_, Err(err)) => Err(err),
    };
    match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn download_reference(
    State(runtime): State<SharedRuntime>,
    headers: HeaderMap,
    Query(query): Query<ReferenceQuery>,
) -> Response {
    let result = match caller_from_headers(&headers) {
        Ok(caller) => {
            blocking(runtime, move |rt| {
                rt.download_reference(&caller, &query.primary_key)
            })
            .await
        }
        Err(err) => Err(err),
    };
    match result {
        Ok(download) => (
            StatusCode::OK,
            [
                (CONTENT_TYPE, "text/x-fasta".to_string()),
                (CONTENT_DISPOSITION, attachment_disposition(&download.file_name)),
            ],
            download.bytes,
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

async fn settings(State(runtime): State<SharedRuntime>, headers: HeaderMap) -> Response {
    let result = match caller_from_headers(&headers) {
        Ok(caller) => blocking(runtime, move |rt| rt.settings(&caller)).await,
        Err(err) => Err(err),
    };
    match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn update_settings(
    State(runtime): State<SharedRuntime>,
    headers: HeaderMap,
    payload: Result<Json<UpdateSettingsRequest>, JsonRejection>,
) -> Response {
    let result = match (caller_from_headers(&headers), json_body(payload)) {
        (Ok(caller), Ok(request)) => {
            let now = Utc::now();
            blocking(runtime, move |rt| rt.update_settings(&caller, request, now)).await
        }
        (Err(err), _) | (_, Err(err)) => Err(err),
    };
    match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(err) => err.into_response(),
    }
}
