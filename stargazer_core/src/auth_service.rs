//! The Auth service: token administration and validation over the wire.

use async_trait::async_trait;
use stargazer_env::{RequestEnvelope, ResponseEnvelope, StargazerContext};
use std::sync::Arc;

use crate::error::{Result, StargazerError};
use crate::protocol::{
    self, routes, AuthenticateResponse, CreateTokenRequest, CreateTokenResponse, ServiceInfo,
    SuccessResponse, TokenRequest,
};
use crate::router::ServiceHandler;
use crate::token_store::TokenType;
use crate::trust::{authorize, TokenAuthority};

const USER_ONLY: &[TokenType] = &[TokenType::User];

pub struct AuthService<Ctx: StargazerContext> {
    authority: Arc<TokenAuthority<Ctx>>,
    info: ServiceInfo,
}

impl<Ctx: StargazerContext> AuthService<Ctx> {
    pub fn new(authority: Arc<TokenAuthority<Ctx>>, service_version: impl Into<String>) -> Self {
        Self {
            authority,
            info: ServiceInfo::new(service_version, "auth"),
        }
    }

    pub fn authority(&self) -> &Arc<TokenAuthority<Ctx>> {
        &self.authority
    }

    async fn create(&self, bearer: Option<&str>, payload: &[u8]) -> Result<CreateTokenResponse> {
        authorize(&*self.authority, bearer, USER_ONLY).await?;
        let request: CreateTokenRequest = protocol::decode(payload)?;
        let token = self.authority.create(request.token_type, request.expiration)?;
        Ok(CreateTokenResponse { token })
    }

    async fn revoke(&self, bearer: Option<&str>, payload: &[u8]) -> Result<SuccessResponse> {
        authorize(&*self.authority, bearer, USER_ONLY).await?;
        let request: TokenRequest = protocol::decode(payload)?;
        self.authority.revoke(&request.token)?;
        Ok(SuccessResponse::OK)
    }

    async fn authenticate(&self, bearer: Option<&str>, payload: &[u8]) -> Result<AuthenticateResponse> {
        authorize(&*self.authority, bearer, &TokenType::ALL).await?;
        let request: TokenRequest = protocol::decode(payload)?;
        let validation = self.authority.check(&request.token);
        Ok(AuthenticateResponse {
            valid: validation.valid,
            token_type: validation.token_type,
        })
    }
}

#[async_trait]
impl<Ctx: StargazerContext> ServiceHandler for AuthService<Ctx> {
    async fn handle(&self, request: RequestEnvelope) -> ResponseEnvelope {
        let bearer = request.bearer.as_deref();
        if let Some(resp) = self.info.answer(&*self.authority, bearer, &request.route).await {
            return resp;
        }

        let payload = &request.payload;
        match request.route.as_str() {
            routes::TOKEN_CREATE => protocol::respond(201, self.create(bearer, payload).await),
            routes::TOKEN_REVOKE => protocol::respond(200, self.revoke(bearer, payload).await),
            routes::TOKEN_AUTHENTICATE => {
                protocol::respond(200, self.authenticate(bearer, payload).await)
            }
            _ => protocol::error_reply(&StargazerError::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token_store::MemoryTokenStore;
    use chrono::{Duration, Utc};
    use stargazer_env::TokioContext;

    fn service() -> (AuthService<TokioContext>, String) {
        let authority = Arc::new(TokenAuthority::new(
            TokioContext::shared(),
            Arc::new(MemoryTokenStore::new()),
        ));
        let admin = authority.bootstrap(TokenType::User, Duration::hours(1)).unwrap();
        (AuthService::new(authority, "1.0.0"), admin)
    }

    fn request(route: &str, bearer: &str, body: serde_json::Value) -> RequestEnvelope {
        RequestEnvelope::new(route, Some(format!("Bearer {}", bearer)), body.to_string().into_bytes())
    }

    #[tokio::test]
    async fn test_create_authenticate_revoke() {
        let (svc, admin) = service();
        let expiration = (Utc::now() + Duration::hours(1)).to_rfc3339();

        let resp = svc
            .handle(request(
                routes::TOKEN_CREATE,
                &admin,
                serde_json::json!({"type": "compute", "expiration": expiration}),
            ))
            .await;
        assert_eq!(resp.status, 201);
        let created: CreateTokenResponse = serde_json::from_slice(&resp.payload).unwrap();

        let resp = svc
            .handle(request(routes::TOKEN_AUTHENTICATE, &created.token, serde_json::json!({"token": created.token})))
            .await;
        let auth: AuthenticateResponse = serde_json::from_slice(&resp.payload).unwrap();
        assert!(auth.valid);
        assert_eq!(auth.token_type, Some(TokenType::Compute));

        let resp = svc
            .handle(request(routes::TOKEN_REVOKE, &admin, serde_json::json!({"token": created.token})))
            .await;
        assert_eq!(resp.status, 200);

        let resp = svc
            .handle(request(routes::TOKEN_AUTHENTICATE, &admin, serde_json::json!({"token": created.token})))
            .await;
        let auth: AuthenticateResponse = serde_json::from_slice(&resp.payload).unwrap();
        assert!(!auth.valid);
        assert_eq!(auth.token_type, None);
    }

    #[tokio::test]
    async fn test_create_requires_user() {
        let (svc, admin) = service();
        let compute = svc.authority().bootstrap(TokenType::Compute, Duration::hours(1)).unwrap();
        let expiration = (Utc::now() + Duration::hours(1)).to_rfc3339();
        let body = serde_json::json!({"type": "user", "expiration": expiration});

        let resp = svc.handle(request(routes::TOKEN_CREATE, &compute, body.clone())).await;
        assert_eq!(resp.status, 401);

        let resp = svc.handle(request(routes::TOKEN_CREATE, &admin, body)).await;
        assert_eq!(resp.status, 201);
    }

    #[tokio::test]
    async fn test_past_expiration_is_bad_request() {
        let (svc, admin) = service();
        let expiration = (Utc::now() - Duration::minutes(1)).to_rfc3339();
        let resp = svc
            .handle(request(
                routes::TOKEN_CREATE,
                &admin,
                serde_json::json!({"type": "user", "expiration": expiration}),
            ))
            .await;
        assert_eq!(resp.status, 400);
    }

    #[tokio::test]
    async fn test_revoke_unknown_is_not_found() {
        let (svc, admin) = service();
        let resp = svc
            .handle(request(routes::TOKEN_REVOKE, &admin, serde_json::json!({"token": "a".repeat(48)})))
            .await;
        assert_eq!(resp.status, 404);
    }

    #[tokio::test]
    async fn test_unauthenticated_is_uniform() {
        let (svc, _) = service();
        let resp = svc
            .handle(RequestEnvelope::new(routes::TOKEN_AUTHENTICATE, None, b"{}".to_vec()))
            .await;
        assert_eq!(resp.status, 401);

        let resp = svc
            .handle(request(routes::COMMON_VERSION, "nonsense", serde_json::json!({})))
            .await;
        assert_eq!(resp.status, 401);
    }
}
