//! Typed clients for calls between services.
//!
//! - [`ComputeClient`]: Manager -> Compute (configure, assign, step)
//! - [`ManagerClient`]: Compute/operator -> Manager
//! - [`AuthClient`]: operator -> Auth
//! - [`RemoteAuthenticator`]: any service -> Auth, as an [`Authenticator`]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use stargazer_env::{Endpoint, NodeTransport, RequestEnvelope, StargazerContext};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::body::{Body, SimulationConfig};
use crate::error::{Result, StargazerError};
use crate::partition::IndexRange;
use crate::protocol::{
    self, routes, AssignRequest, AuthenticateResponse, ConfigureRequest, CreateTokenRequest,
    CreateTokenResponse, RegisterRequest, SimulateRequest, SimulateResponse, StatusResponse,
    StepResponse, SuccessResponse, TokenRequest, TypeResponse, VersionResponse,
};
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::token_store::TokenType;
use crate::trust::{Authenticator, Validation};

/// Sends one request and decodes the reply.
async fn call_json<Net, Req, Resp>(
    transport: &Net,
    endpoint: &Endpoint,
    route: &str,
    bearer: &str,
    body: &Req,
) -> Result<Resp>
where
    Net: NodeTransport + ?Sized,
    Req: Serialize,
    Resp: DeserializeOwned,
{
    call_raw(transport, endpoint, route, bearer, protocol::encode(body)?).await
}

async fn call_raw<Net, Resp>(
    transport: &Net,
    endpoint: &Endpoint,
    route: &str,
    bearer: &str,
    payload: Vec<u8>,
) -> Result<Resp>
where
    Net: NodeTransport + ?Sized,
    Resp: DeserializeOwned,
{
    let request = RequestEnvelope::new(route, Some(format!("Bearer {}", bearer)), payload);
    let response = transport.call(endpoint, request).await?;
    protocol::decode_response(&response)
}

// ============================================================================
// COMPUTE CLIENT
// ============================================================================

/// Manager-side handle for driving Compute nodes.
///
/// Payloads that go to every node (configure, step) are taken pre-encoded so
/// the coordinator serializes the body list once per broadcast.
pub struct ComputeClient<Net: NodeTransport + ?Sized> {
    transport: Arc<Net>,
    token: String,
}

impl<Net: NodeTransport + ?Sized> ComputeClient<Net> {
    /// `token` must be a Manager-type token.
    pub fn new(transport: Arc<Net>, token: impl Into<String>) -> Self {
        Self {
            transport,
            token: token.into(),
        }
    }

    /// Pushes an encoded `ComputeConfigureRequest`.
    pub async fn configure(&self, endpoint: &Endpoint, payload: Vec<u8>) -> Result<()> {
        let _: SuccessResponse =
            call_raw(&*self.transport, endpoint, routes::COMPUTE_CONFIGURE, &self.token, payload).await?;
        Ok(())
    }

    pub async fn assign(&self, endpoint: &Endpoint, version: u64, range: IndexRange) -> Result<()> {
        let body = AssignRequest { version, range };
        let _: SuccessResponse =
            call_json(&*self.transport, endpoint, routes::COMPUTE_ASSIGN, &self.token, &body).await?;
        Ok(())
    }

    /// Sends an encoded `StepRequest`.
    pub async fn step(&self, endpoint: &Endpoint, payload: Vec<u8>) -> Result<StepResponse> {
        call_raw(&*self.transport, endpoint, routes::COMPUTE_STEP, &self.token, payload).await
    }
}

// ============================================================================
// MANAGER CLIENT
// ============================================================================

/// Handle on the Manager, acting with one bearer token.
///
/// A Compute node uses it with its Compute token (register/unregister), an
/// operator with a User token (configure/simulate/cancel/status).
pub struct ManagerClient<Ctx: StargazerContext, Net: NodeTransport + ?Sized> {
    context: Arc<Ctx>,
    transport: Arc<Net>,
    manager: Endpoint,
    token: String,
}

impl<Ctx: StargazerContext, Net: NodeTransport + ?Sized> ManagerClient<Ctx, Net> {
    pub fn new(context: Arc<Ctx>, transport: Arc<Net>, manager: Endpoint, token: impl Into<String>) -> Self {
        Self {
            context,
            transport,
            manager,
            token: token.into(),
        }
    }

    async fn call<Req: Serialize, Resp: DeserializeOwned>(&self, route: &str, body: &Req) -> Result<Resp> {
        call_json(&*self.transport, &self.manager, route, &self.token, body).await
    }

    /// Registers `own_endpoint`, retrying transient failures.
    pub async fn register(&self, own_endpoint: &Endpoint, retry: &RetryConfig) -> Result<()> {
        let body = RegisterRequest {
            compute_endpoint: own_endpoint.clone(),
        };
        retry_with_backoff(&*self.context, retry, || async {
            let _: SuccessResponse = self.call(routes::MANAGER_REGISTER, &body).await?;
            Ok(())
        })
        .await?;

        info!(endpoint = %own_endpoint, manager = %self.manager, "Registered with manager");
        Ok(())
    }

    pub async fn unregister(&self) -> Result<()> {
        let _: SuccessResponse = self.call(routes::MANAGER_UNREGISTER, &serde_json::json!({})).await?;
        Ok(())
    }

    pub async fn configure(&self, constants: SimulationConfig, bodies: Vec<Body>) -> Result<()> {
        let body = ConfigureRequest { constants, bodies };
        let _: SuccessResponse = self.call(routes::MANAGER_CONFIGURE, &body).await?;
        Ok(())
    }

    /// Runs a simulation.
    ///
    /// A Failed run comes back as 503 with a report attached, so the reply
    /// body is decoded for that status too.
    pub async fn simulate(&self, duration: f64) -> Result<SimulateResponse> {
        let payload = protocol::encode(&SimulateRequest { duration })?;
        let request = RequestEnvelope::new(
            routes::MANAGER_SIMULATE,
            Some(format!("Bearer {}", self.token)),
            payload,
        );
        let response = self.transport.call(&self.manager, request).await?;

        if response.status == 503 {
            if let Ok(report) = serde_json::from_slice::<SimulateResponse>(&response.payload) {
                return Ok(report);
            }
        }
        protocol::decode_response(&response)
    }

    pub async fn cancel(&self) -> Result<()> {
        let _: SuccessResponse = self.call(routes::MANAGER_CANCEL, &serde_json::json!({})).await?;
        Ok(())
    }

    pub async fn status(&self) -> Result<StatusResponse> {
        self.call(routes::MANAGER_STATUS, &serde_json::json!({})).await
    }
}

// ============================================================================
// AUTH CLIENT
// ============================================================================

/// Operator handle on the Auth service.
pub struct AuthClient<Net: NodeTransport + ?Sized> {
    transport: Arc<Net>,
    auth: Endpoint,
    token: String,
}

impl<Net: NodeTransport + ?Sized> AuthClient<Net> {
    /// `token` is the caller's bearer (User for create/revoke).
    pub fn new(transport: Arc<Net>, auth: Endpoint, token: impl Into<String>) -> Self {
        Self {
            transport,
            auth,
            token: token.into(),
        }
    }

    pub async fn create(&self, token_type: TokenType, expiration: DateTime<Utc>) -> Result<String> {
        let body = CreateTokenRequest {
            token_type,
            expiration,
        };
        let resp: CreateTokenResponse =
            call_json(&*self.transport, &self.auth, routes::TOKEN_CREATE, &self.token, &body).await?;
        Ok(resp.token)
    }

    pub async fn revoke(&self, secret: &str) -> Result<()> {
        let body = TokenRequest {
            token: secret.to_string(),
        };
        let _: SuccessResponse =
            call_json(&*self.transport, &self.auth, routes::TOKEN_REVOKE, &self.token, &body).await?;
        Ok(())
    }

    pub async fn authenticate(&self, secret: &str) -> Result<AuthenticateResponse> {
        let body = TokenRequest {
            token: secret.to_string(),
        };
        call_json(&*self.transport, &self.auth, routes::TOKEN_AUTHENTICATE, &self.token, &body).await
    }
}

/// Asks any service for its version and type.
pub async fn describe<Net: NodeTransport + ?Sized>(
    transport: &Net,
    endpoint: &Endpoint,
    token: &str,
) -> Result<(String, String)> {
    let empty = serde_json::json!({});
    let version: VersionResponse = call_json(transport, endpoint, routes::COMMON_VERSION, token, &empty).await?;
    let kind: TypeResponse = call_json(transport, endpoint, routes::COMMON_TYPE, token, &empty).await?;
    Ok((version.version, kind.service_type))
}

// ============================================================================
// REMOTE AUTHENTICATOR
// ============================================================================

/// Validates secrets by asking the Auth service.
///
/// Fails closed: if Auth cannot be reached (after retries) or answers
/// garbage, the secret is reported invalid.
pub struct RemoteAuthenticator<Ctx: StargazerContext, Net: NodeTransport + ?Sized> {
    context: Arc<Ctx>,
    transport: Arc<Net>,
    auth: Endpoint,
    service_token: String,
    retry: RetryConfig,
    call_timeout: Duration,
}

impl<Ctx: StargazerContext, Net: NodeTransport + ?Sized> RemoteAuthenticator<Ctx, Net> {
    /// `service_token` is this service's own token, presented to Auth.
    pub fn new(
        context: Arc<Ctx>,
        transport: Arc<Net>,
        auth: Endpoint,
        service_token: impl Into<String>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            context,
            transport,
            auth,
            service_token: service_token.into(),
            retry,
            call_timeout: crate::config::DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    async fn ask(&self, secret: &str) -> Result<AuthenticateResponse> {
        let body = TokenRequest {
            token: secret.to_string(),
        };
        let call = call_json(
            &*self.transport,
            &self.auth,
            routes::TOKEN_AUTHENTICATE,
            &self.service_token,
            &body,
        );
        tokio::time::timeout(self.call_timeout, call)
            .await
            .map_err(|_| StargazerError::Timeout {
                timeout_ms: self.call_timeout.as_millis() as u64,
            })?
    }
}

#[async_trait]
impl<Ctx: StargazerContext, Net: NodeTransport + ?Sized> Authenticator for RemoteAuthenticator<Ctx, Net> {
    async fn validate(&self, secret: &str) -> Validation {
        match retry_with_backoff(&*self.context, &self.retry, || self.ask(secret)).await {
            Ok(AuthenticateResponse {
                valid: true,
                token_type: Some(token_type),
            }) => Validation::valid(token_type),
            Ok(_) => {
                debug!("Auth service rejected credential");
                Validation::invalid()
            }
            Err(e) => {
                warn!(auth = %self.auth, error = %e, "Auth service unavailable, failing closed");
                Validation::invalid()
            }
        }
    }
}
