//! Error types and their mapping to the wire-format error bodies both
//! supported APIs expect.

use serde::Serialize;
use thiserror::Error;

/// Errors surfaced to callers of the gateway. Parsing/repair failures inside
/// the tool-call or JSON pipelines are *not* represented here: a failed
/// inline-tool parse becomes a `{_raw, _parse_error}` payload embedded in the
/// response, not a propagated error.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("missing or blank upstream key")]
    MissingAuth,

    #[error("rate limited")]
    RateLimited,

    #[error("upstream error: {kind:?}: {message}")]
    Upstream { kind: UpstreamErrorKind, message: String },

    #[error("internal error: {0}")]
    Internal(String),
}

/// Classification of upstream failures, used to decide whether a
/// continuation attempt may reuse its retry slot (§4.7, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamErrorKind {
    MalformedRequest,
    TokenExhausted,
    RateLimit,
    Timeout,
    BadRequest,
    ServerError,
}

impl UpstreamErrorKind {
    /// Retryable kinds are eligible for continuation-slot reuse; non-retryable
    /// kinds terminate the continuation loop immediately (§4.7).
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            UpstreamErrorKind::RateLimit | UpstreamErrorKind::ServerError | UpstreamErrorKind::Timeout
        )
    }
}

impl GatewayError {
    /// HTTP status this error should be rendered with.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::InvalidRequest(_) => 400,
            GatewayError::MissingAuth => 401,
            GatewayError::RateLimited => 429,
            GatewayError::Upstream { kind, .. } => match kind {
                UpstreamErrorKind::RateLimit => 429,
                UpstreamErrorKind::Timeout => 504,
                _ => 502,
            },
            GatewayError::Internal(_) => 500,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            GatewayError::InvalidRequest(_) => "invalid_request_error",
            GatewayError::MissingAuth => "authentication_error",
            GatewayError::RateLimited => "rate_limit_error",
            GatewayError::Upstream { .. } => "api_error",
            GatewayError::Internal(_) => "internal_error",
        }
    }

    /// Client-facing message. Internal errors never leak details (§7).
    fn public_message(&self) -> String {
        match self {
            GatewayError::Internal(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        }
    }

    /// Anthropic error shape: `{type: "error", error: {type, message}}`.
    pub fn to_anthropic_body(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "error",
            "error": {
                "type": self.error_type(),
                "message": self.public_message(),
            }
        })
    }

    /// OpenAI error shape: `{error: {message, type, code}}`.
    pub fn to_openai_body(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "message": self.public_message(),
                "type": self.error_type(),
                "code": self.status_code(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_errors_never_leak_detail() {
        let err = GatewayError::Internal("db password is hunter2".to_string());
        let body = err.to_anthropic_body();
        assert_eq!(body["error"]["message"], "An internal error occurred");
    }

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(GatewayError::MissingAuth.status_code(), 401);
        assert_eq!(GatewayError::RateLimited.status_code(), 429);
        assert_eq!(
            GatewayError::Upstream {
                kind: UpstreamErrorKind::Timeout,
                message: "x".into()
            }
            .status_code(),
            504
        );
    }

    #[test]
    fn retryable_kinds() {
        assert!(UpstreamErrorKind::RateLimit.is_retryable());
        assert!(UpstreamErrorKind::ServerError.is_retryable());
        assert!(!UpstreamErrorKind::MalformedRequest.is_retryable());
        assert!(!UpstreamErrorKind::BadRequest.is_retryable());
    }
}
