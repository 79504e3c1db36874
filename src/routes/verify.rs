use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::models::verification::{ResponseMeta, VerificationKey, VerifyRequest, VerifyResponse};
use crate::services::orchestrator::VerifyError;

/// POST /verify — synchronously verify one cédula against the SACS.
///
/// Status mapping: 400 for invalid input, 503 for a full queue
/// (backpressure, distinct from any scrape failure), 200 otherwise.
/// Timeouts and scrape errors complete the request with `success:false`
/// so the caller can tell "try again" from "no record".
pub async fn submit_verification(
    State(state): State<AppState>,
    Json(request): Json<VerifyRequest>,
) -> (StatusCode, Json<VerifyResponse>) {
    let request_start = Instant::now();

    if let Err(report) = request.validate() {
        return failure(
            StatusCode::BAD_REQUEST,
            "Formato de cédula inválido (solo números, 6-10 dígitos)".to_string(),
            Some(report.to_string()),
            &state,
            request_start,
        );
    }

    let key = match VerificationKey::new(request.document_type, &request.cedula) {
        Ok(key) => key,
        Err(err) => {
            return failure(
                StatusCode::BAD_REQUEST,
                "Formato de cédula inválido (solo números, 6-10 dígitos)".to_string(),
                Some(err.to_string()),
                &state,
                request_start,
            )
        }
    };

    match state.orchestrator.verify(&key).await {
        Ok(outcome) => {
            let result = outcome.result;
            let response = VerifyResponse {
                success: true,
                found: result.found,
                verified: result.verified,
                message: result.message.clone(),
                rejection_reason: result.rejection_reason,
                data: Some(result),
                error: None,
                meta: ResponseMeta {
                    cached: outcome.cached,
                    ms: outcome.took_ms,
                    queue: outcome.queue,
                },
            };
            (StatusCode::OK, Json(response))
        }
        Err(VerifyError::QueueFull) => failure(
            StatusCode::SERVICE_UNAVAILABLE,
            "Servicio ocupado (cola llena). Intenta nuevamente en unos segundos.".to_string(),
            Some("QUEUE_FULL".to_string()),
            &state,
            request_start,
        ),
        Err(err @ VerifyError::Timeout(_)) => failure(
            StatusCode::OK,
            "Timeout consultando SACS. Intenta nuevamente en unos segundos.".to_string(),
            Some(err.to_string()),
            &state,
            request_start,
        ),
        Err(VerifyError::Scrape(err)) => failure(
            StatusCode::OK,
            "Error al consultar el SACS. Por favor intenta nuevamente.".to_string(),
            Some(err.to_string()),
            &state,
            request_start,
        ),
    }
}

fn failure(
    status: StatusCode,
    message: String,
    error: Option<String>,
    state: &AppState,
    request_start: Instant,
) -> (StatusCode, Json<VerifyResponse>) {
    (
        status,
        Json(VerifyResponse {
            success: false,
            found: false,
            verified: false,
            data: None,
            message,
            rejection_reason: None,
            error,
            meta: ResponseMeta {
                cached: false,
                ms: request_start.elapsed().as_millis() as u64,
                queue: state.orchestrator.queue_snapshot(),
            },
        }),
    )
}
