//! Typed wire protocol for the Auth, Manager and Compute services.
//!
//! Every route has a request and response struct. Payloads are JSON; a
//! request is decoded and validated once, by [`decode`], before any handler
//! logic runs.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use stargazer_env::{Endpoint, NodeId, ResponseEnvelope};

use crate::body::{Body, BodyUpdate, RunSetup, SimulationConfig};
use crate::coordinator::{RunEvent, RunState};
use crate::error::{Result, StargazerError};
use crate::partition::IndexRange;
use crate::token_store::TokenType;
use crate::trust::{authorize, Authenticator};

// ============================================================================
// ROUTES
// ============================================================================

pub mod routes {
    pub const TOKEN_CREATE: &str = "/api/token/create";
    pub const TOKEN_REVOKE: &str = "/api/token/revoke";
    pub const TOKEN_AUTHENTICATE: &str = "/api/token/authenticate";

    pub const MANAGER_REGISTER: &str = "/api/manager/register";
    pub const MANAGER_UNREGISTER: &str = "/api/manager/unregister";
    pub const MANAGER_CONFIGURE: &str = "/api/manager/configure";
    pub const MANAGER_SIMULATE: &str = "/api/manager/simulate";
    pub const MANAGER_CANCEL: &str = "/api/manager/cancel";
    pub const MANAGER_STATUS: &str = "/api/manager/status";

    pub const COMPUTE_CONFIGURE: &str = "/api/compute/configure";
    pub const COMPUTE_ASSIGN: &str = "/api/compute/assign";
    pub const COMPUTE_STEP: &str = "/api/compute/step";

    pub const COMMON_VERSION: &str = "/api/common/version";
    pub const COMMON_TYPE: &str = "/api/common/type";
}

/// Per-request validation beyond what the types already enforce.
pub trait Validate {
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// AUTH
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTokenRequest {
    #[serde(rename = "type")]
    pub token_type: TokenType,
    #[serde(alias = "expiration_date")]
    pub expiration: DateTime<Utc>,
}

impl Validate for CreateTokenRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTokenResponse {
    pub token: String,
}

/// Body of revoke and authenticate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRequest {
    pub token: String,
}

impl Validate for TokenRequest {
    fn validate(&self) -> Result<()> {
        if self.token.is_empty() {
            return Err(StargazerError::validation("token must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticateResponse {
    pub valid: bool,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<TokenType>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    pub const OK: SuccessResponse = SuccessResponse { success: true };
}

// ============================================================================
// MANAGER
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub compute_endpoint: Endpoint,
}

impl Validate for RegisterRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigureRequest {
    pub constants: SimulationConfig,
    pub bodies: Vec<Body>,
}

impl ConfigureRequest {
    /// Validates constants and bodies together.
    pub fn into_setup(self) -> Result<RunSetup> {
        RunSetup::new(self.constants, self.bodies)
    }
}

impl Validate for ConfigureRequest {}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SimulateRequest {
    /// Simulated seconds
    pub duration: f64,
}

impl Validate for SimulateRequest {
    fn validate(&self) -> Result<()> {
        if !(self.duration.is_finite() && self.duration > 0.0) {
            return Err(StargazerError::validation("duration must be a positive number"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulateResponse {
    pub success: bool,
    pub status: RunState,
    pub steps_completed: u64,
    pub steps_scheduled: u64,
    pub bodies: Vec<Body>,
    #[serde(default)]
    pub degraded_events: Vec<RunEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub id: NodeId,
    pub endpoint: Endpoint,
    pub healthy: bool,
    pub synced_version: Option<u64>,
    pub range: Option<IndexRange>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub state: RunState,
    pub version: Option<u64>,
    pub body_count: usize,
    pub steps_completed: u64,
    pub steps_scheduled: u64,
    pub pending_changes: usize,
    pub nodes: Vec<NodeStatus>,
}

// ============================================================================
// COMPUTE
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeConfigureRequest {
    pub version: u64,
    pub constants: SimulationConfig,
    pub bodies: Vec<Body>,
}

impl Validate for ComputeConfigureRequest {
    fn validate(&self) -> Result<()> {
        RunSetup::new(self.constants, self.bodies.clone()).map(|_| ())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AssignRequest {
    pub version: u64,
    pub range: IndexRange,
}

impl Validate for AssignRequest {
    fn validate(&self) -> Result<()> {
        if self.range.start > self.range.end {
            return Err(StargazerError::validation("range start exceeds end"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRequest {
    pub version: u64,
    pub bodies: Vec<Body>,
}

impl Validate for StepRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResponse {
    pub range: IndexRange,
    pub updated: Vec<BodyUpdate>,
}

// ============================================================================
// COMMON
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeResponse {
    #[serde(rename = "type")]
    pub service_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Identity reported on the common routes.
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    pub version: String,
    pub kind: &'static str,
}

impl ServiceInfo {
    pub fn new(version: impl Into<String>, kind: &'static str) -> Self {
        Self {
            version: version.into(),
            kind,
        }
    }

    /// Answers `/api/common/*` for any valid bearer. Returns `None` for
    /// other routes.
    pub async fn answer(
        &self,
        authenticator: &dyn Authenticator,
        bearer: Option<&str>,
        route: &str,
    ) -> Option<ResponseEnvelope> {
        if route != routes::COMMON_VERSION && route != routes::COMMON_TYPE {
            return None;
        }
        if let Err(e) = authorize(authenticator, bearer, &TokenType::ALL).await {
            return Some(error_reply(&e));
        }
        Some(if route == routes::COMMON_VERSION {
            reply(200, &VersionResponse {
                version: self.version.clone(),
            })
        } else {
            reply(200, &TypeResponse {
                service_type: self.kind.to_string(),
            })
        })
    }
}

// ============================================================================
// CODEC
// ============================================================================

/// Serializes a message body.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| StargazerError::Internal(format!("encode: {}", e)))
}

/// Decodes and validates a request body. Any failure is a 400.
pub fn decode<T: DeserializeOwned + Validate>(payload: &[u8]) -> Result<T> {
    let value: T = serde_json::from_slice(payload)
        .map_err(|e| StargazerError::validation(format!("malformed request: {}", e)))?;
    value.validate()?;
    Ok(value)
}

/// Decodes a service's reply. A non-2xx status is `Rejected`; an
/// undecodable 2xx body is a protocol violation.
pub fn decode_response<T: DeserializeOwned>(response: &ResponseEnvelope) -> Result<T> {
    if !response.is_success() {
        return Err(StargazerError::Rejected {
            status: response.status,
        });
    }
    serde_json::from_slice(&response.payload)
        .map_err(|e| StargazerError::protocol(format!("undecodable reply: {}", e)))
}

/// Builds a reply envelope.
pub fn reply<T: Serialize>(status: u16, value: &T) -> ResponseEnvelope {
    match encode(value) {
        Ok(payload) => ResponseEnvelope::new(status, payload),
        Err(e) => error_reply(&e),
    }
}

/// Builds the reply for a failed request, exposing only the public message.
pub fn error_reply(err: &StargazerError) -> ResponseEnvelope {
    let body = ErrorResponse {
        error: err.public_message(),
    };
    let payload = serde_json::to_vec(&body).unwrap_or_default();
    ResponseEnvelope::new(err.status_code(), payload)
}

/// Collapses a handler result into a reply.
pub fn respond<T: Serialize>(status: u16, result: Result<T>) -> ResponseEnvelope {
    match result {
        Ok(value) => reply(status, &value),
        Err(e) => error_reply(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_token_accepts_both_field_names() {
        let a: CreateTokenRequest =
            decode(br#"{"type":"user","expiration":"2030-01-01T00:00:00Z"}"#).unwrap();
        let b: CreateTokenRequest =
            decode(br#"{"type":"user","expiration_date":"2030-01-01T00:00:00Z"}"#).unwrap();
        assert_eq!(a.expiration, b.expiration);
        assert_eq!(a.token_type, TokenType::User);
    }

    #[test]
    fn test_unknown_token_type_is_bad_request() {
        let err = decode::<CreateTokenRequest>(br#"{"type":"root","expiration":"2030-01-01T00:00:00Z"}"#)
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_register_rejects_bad_endpoint() {
        let err = decode::<RegisterRequest>(br#"{"compute_endpoint":"not a uri"}"#).unwrap_err();
        assert_eq!(err.status_code(), 400);

        let ok: RegisterRequest = decode(br#"{"compute_endpoint":"http://compute-1:8000"}"#).unwrap();
        assert_eq!(ok.compute_endpoint.as_str(), "http://compute-1:8000");
    }

    #[test]
    fn test_simulate_duration_must_be_positive() {
        assert!(decode::<SimulateRequest>(br#"{"duration":0}"#).is_err());
        assert!(decode::<SimulateRequest>(br#"{"duration":-1.5}"#).is_err());
        assert!(decode::<SimulateRequest>(br#"{"duration":"10"}"#).is_err());
        assert!(decode::<SimulateRequest>(br#"{"duration":2.5}"#).is_ok());
    }

    #[test]
    fn test_authenticate_response_omits_type_when_invalid() {
        let body = AuthenticateResponse {
            valid: false,
            token_type: None,
        };
        assert_eq!(serde_json::to_string(&body).unwrap(), r#"{"valid":false}"#);
    }

    #[test]
    fn test_error_reply_is_opaque() {
        let resp = error_reply(&StargazerError::Internal("disk on fire".into()));
        assert_eq!(resp.status, 500);
        let body: ErrorResponse = serde_json::from_slice(&resp.payload).unwrap();
        assert_eq!(body.error, "internal error");
    }

    #[test]
    fn test_decode_response_classifies_failures() {
        let rejected = ResponseEnvelope::new(409, Vec::new());
        let err = decode_response::<SuccessResponse>(&rejected).unwrap_err();
        assert!(matches!(err, StargazerError::Rejected { status: 409 }));

        let garbage = ResponseEnvelope::new(200, b"{\"succ".to_vec());
        let err = decode_response::<SuccessResponse>(&garbage).unwrap_err();
        assert!(matches!(err, StargazerError::Protocol(_)));
    }
}
