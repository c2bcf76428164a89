use gateway_core::error::{GatewayError, UpstreamErrorKind};
use serde_json::Value;
use tracing::{error, warn};
use uuid::Uuid;

use crate::state::AppState;

/// Posts a Kiro-native request body to the upstream gateway's native
/// `converse` endpoint and returns the parsed JSON response, mapping
/// transport/HTTP failures onto [`GatewayError::Upstream`] per the §7 error
/// taxonomy. Every call regenerates its own `X-Request-ID`/`X-Trace-ID`/
/// `X-Client-ID` rather than reusing the inbound request's identifiers,
/// since sharing them lets the upstream correlate otherwise-independent
/// calls as a single abusive client (§6).
pub async fn call_kiro(state: &AppState, body: &Value, trace_id: &str) -> Result<Value, GatewayError> {
    if state.settings.kiro_api_key.is_empty() {
        return Err(GatewayError::MissingAuth);
    }

    let url = format!("{}/kiro/v1/converse", state.settings.kiro_proxy_base.trim_end_matches('/'));

    let response = state
        .http_client
        .post(&url)
        .bearer_auth(&state.settings.kiro_api_key)
        .header("X-Request-ID", Uuid::new_v4().to_string())
        .header("X-Trace-ID", trace_id)
        .header("X-Client-ID", Uuid::new_v4().to_string())
        .json(body)
        .send()
        .await
        .map_err(|err| classify_transport_error(&err))?;

    let status = response.status();
    if status.is_success() {
        response.json::<Value>().await.map_err(|err| {
            error!(trace_id, error = %err, "failed to decode upstream response body");
            GatewayError::Upstream { kind: UpstreamErrorKind::ServerError, message: err.to_string() }
        })
    } else {
        let text = response.text().await.unwrap_or_default();
        warn!(trace_id, status = status.as_u16(), body = %text, "upstream returned an error status");
        Err(classify_http_status(status.as_u16(), text))
    }
}

fn classify_transport_error(err: &reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Upstream { kind: UpstreamErrorKind::Timeout, message: err.to_string() }
    } else {
        GatewayError::Upstream { kind: UpstreamErrorKind::ServerError, message: err.to_string() }
    }
}

fn classify_http_status(status: u16, body: String) -> GatewayError {
    let kind = match status {
        429 => UpstreamErrorKind::RateLimit,
        400 | 422 => UpstreamErrorKind::MalformedRequest,
        401 | 403 => UpstreamErrorKind::BadRequest,
        408 | 504 => UpstreamErrorKind::Timeout,
        500..=599 => UpstreamErrorKind::ServerError,
        _ => UpstreamErrorKind::BadRequest,
    };
    GatewayError::Upstream { kind, message: body }
}
