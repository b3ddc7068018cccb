//! The operator-facing HTTP surface (section 6, section 10.4): Prepare,
//! Authorize, and Submit over HTTP-signature-authenticated requests, plus an
//! unauthenticated health check.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::{Path, Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use custodia_api::sig_auth::{self, RequestSigningMaterial, SignatureHeader};
use custodia_api_core::error::{EngineApiError, EngineErrorKind};
use custodia_api_core::models::{
    AuthorizeRequest, AuthorizeResponse, CustodianKind, PrepareRequest, PrepareResponse,
    SubmitRequest, SubmitResponse,
};
use custodia_engine::authorizer::Keystore;
use custodia_engine::drivers::DynDriver;
use custodia_engine::payment::PaymentDetails;
use custodia_engine::state::PaymentStatus;
use custodia_engine::{drive, DriveContext};
use serde::Serialize;
use uuid::Uuid;

use crate::authorization_collector::AuthorizationCollector;
use crate::driver_registry::DriverRegistry;

/// Largest signed request body the server will buffer for digest
/// verification.
const MAX_BODY_BYTES: usize = 1024 * 1024;

pub struct EngineState {
    pub keystore: Keystore,
    pub registry: DriverRegistry,
    pub authz_collector: AuthorizationCollector,
    pub namespace: Uuid,
    pub poll_interval: Duration,
}

pub fn router(state: Arc<EngineState>) -> Router {
    let signed = Router::new()
        .route("/payments", post(prepare))
        .route("/payments/{document_id}/authorizations", post(authorize))
        .route("/payments/{document_id}/submit", post(submit))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            verify_signature_mw,
        ));

    let router = Router::new()
        .route("/health", get(health))
        .merge(signed)
        .with_state(state);

    custodia_api::server::with_standard_layers(router)
}

fn driver_for(
    state: &EngineState,
    custodian: CustodianKind,
) -> Result<&DynDriver, EngineApiError> {
    state.registry.driver(custodian).ok_or_else(|| {
        EngineApiError::new(
            EngineErrorKind::Server,
            format!("no driver configured for custodian {}", custodian.as_str()),
        )
    })
}

async fn prepare(
    State(state): State<Arc<EngineState>>,
    Json(req): Json<PrepareRequest>,
) -> Result<Json<PrepareResponse>, EngineApiError> {
    let details = PaymentDetails {
        to: req.to,
        from: req.from,
        currency: req.currency,
        amount: req.amount,
        custodian: req.custodian,
        payout_id: req.payout_id,
    };
    let idempotency_key = details.idempotency_key(state.namespace);
    let document_id = state.registry.ledger().insert(details).await?;
    Ok(Json(PrepareResponse {
        document_id,
        idempotency_key,
    }))
}

async fn authorize(
    State(state): State<Arc<EngineState>>,
    Path(document_id): Path<Uuid>,
    Json(req): Json<AuthorizeRequest>,
) -> Result<Json<AuthorizeResponse>, EngineApiError> {
    // Only a key id the keystore recognizes may add an authorization.
    state.keystore.lookup_verifier(&req.key_id)?;

    let (loaded, _history) = state.registry.ledger().get_by_document_id(document_id).await?;
    let driver = driver_for(&state, loaded.details.custodian)?;

    state.authz_collector.record(document_id, &req.key_id);

    let mut probe = loaded;
    probe.authorizations = state.authz_collector.collected(document_id);
    let quorum_met = driver.authorizations().has_quorum(&probe);

    Ok(Json(AuthorizeResponse {
        document_id,
        authorization_count: probe.authorization_count(),
        quorum_met,
    }))
}

async fn submit(
    State(state): State<Arc<EngineState>>,
    Path(document_id): Path<Uuid>,
    Json(_req): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, EngineApiError> {
    let (mut loaded, _history) = state.registry.ledger().get_by_document_id(document_id).await?;
    let driver = driver_for(&state, loaded.details.custodian)?;

    if loaded.status == PaymentStatus::Prepared {
        loaded.authorizations = state.authz_collector.collected(document_id);
        driver.authorizations().require_quorum(&loaded)?;
    }

    let ctx = DriveContext::with_default_deadline(state.poll_interval);
    let result = drive(&ctx, driver.as_ref(), &mut loaded).await?;

    if result.status != PaymentStatus::Prepared {
        state.authz_collector.clear(document_id);
    }

    Ok(Json(SubmitResponse {
        document_id,
        status: result.status.to_string(),
    }))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: String,
}

async fn health() -> Result<Json<HealthResponse>, EngineApiError> {
    let version = semver::Version::parse(env!("CARGO_PKG_VERSION"))
        .map_err(|e| EngineApiError::new(EngineErrorKind::Server, e))?;
    Ok(Json(HealthResponse {
        status: "ok",
        version: version.to_string(),
    }))
}

/// Verifies the `Signature` header on every signed route (section 10.4):
/// parses it, checks the `date` window, independently recomputes the body's
/// SHA-256 against the claimed `Digest` header (a stale-but-still-valid
/// signature over an old digest value must not let a substituted body
/// through), then verifies the ed25519 signature itself against the
/// keystore.
async fn verify_signature_mw(
    State(state): State<Arc<EngineState>>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, EngineApiError> {
    let (parts, body) = req.into_parts();

    let method = parts.method.as_str().to_owned();
    let path = parts.uri.path().to_owned();

    let header = |name: &str| -> Result<String, EngineApiError> {
        parts
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .ok_or_else(|| {
                EngineApiError::new(
                    EngineErrorKind::SignatureInvalid,
                    format!("missing {name} header"),
                )
            })
    };

    let signature_raw = header("signature")?;
    let host = header("host")?;
    let date_raw = header("date")?;
    let digest_raw = header("digest")?;
    let content_length = header("content-length")?;
    let content_type = header("content-type")?;

    let sig_header = SignatureHeader::parse(&signature_raw)?;
    let expected = sig_auth::REQUIRED_SIGNED_HEADERS;
    if !sig_header
        .headers
        .iter()
        .map(String::as_str)
        .eq(expected.iter().copied())
    {
        return Err(EngineApiError::new(
            EngineErrorKind::SignatureInvalid,
            "signed header set does not match the required set",
        ));
    }

    let date = chrono::DateTime::parse_from_rfc2822(&date_raw)
        .map_err(|e| {
            EngineApiError::new(
                EngineErrorKind::SignatureInvalid,
                format!("malformed date header: {e}"),
            )
        })?
        .with_timezone(&chrono::Utc);
    sig_auth::verify_date_window(&date, chrono::Utc::now())?;

    let body_bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| EngineApiError::new(EngineErrorKind::Decode, e))?;

    let computed_digest = {
        use base64::Engine as _;
        let hash = ring::digest::digest(&ring::digest::SHA256, &body_bytes);
        format!(
            "SHA-256={}",
            base64::engine::general_purpose::STANDARD.encode(hash.as_ref())
        )
    };
    if computed_digest != digest_raw {
        return Err(EngineApiError::new(
            EngineErrorKind::SignatureInvalid,
            "digest header does not match the request body",
        ));
    }

    let material = RequestSigningMaterial {
        method: &method,
        path: &path,
        host: &host,
        date: &date_raw,
        digest: &digest_raw,
        content_length: &content_length,
        content_type: &content_type,
    };
    sig_auth::verify_signature(&sig_header, &material, &state.keystore)?;

    let request = Request::from_parts(parts, Body::from(body_bytes));
    Ok(next.run(request).await.into_response())
}
