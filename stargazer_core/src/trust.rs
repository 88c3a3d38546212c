//! The "TRUST" layer - bearer-token capability checks.
//!
//! Every privileged operation in every service passes through [`authorize`]:
//! the presented secret is validated by an [`Authenticator`] and the returned
//! type must be a member of the operation's allowed set.
//!
//! - **Local**: [`TokenAuthority`] checks against a [`TokenStore`]
//! - **Remote**: `RemoteAuthenticator` asks the Auth service over the wire
//!
//! Not-found, revoked, expired and malformed tokens are indistinguishable
//! from the outside: all of them validate as `valid=false`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use stargazer_env::{NodeId, StargazerContext};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{Result, StargazerError};
use crate::token_store::{StoreError, TokenDigest, TokenRecord, TokenStore, TokenType};

/// Bytes of entropy in a secret.
pub const SECRET_BYTES: usize = 24;

/// Length of a hex-encoded secret.
pub const SECRET_LEN: usize = SECRET_BYTES * 2;

/// Outcome of validating a presented secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validation {
    pub valid: bool,
    pub token_type: Option<TokenType>,
}

impl Validation {
    /// A passing validation carrying the token's type.
    pub fn valid(token_type: TokenType) -> Self {
        Self {
            valid: true,
            token_type: Some(token_type),
        }
    }

    /// The single failing outcome. Carries no detail on purpose.
    pub fn invalid() -> Self {
        Self {
            valid: false,
            token_type: None,
        }
    }
}

/// Anything that can answer "is this secret valid, and of which type".
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn validate(&self, secret: &str) -> Validation;
}

/// The authenticated caller of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub token_type: TokenType,

    /// Identity derived from the token digest (used as the Compute node id)
    pub identity: NodeId,
}

/// Strips an optional `Bearer ` prefix from an Authorization value.
fn bearer_secret(header: &str) -> &str {
    header.strip_prefix("Bearer ").unwrap_or(header).trim()
}

/// Checks a bearer credential against an allowed-type set.
///
/// Any failure (absent header, invalid token, disallowed type) yields the same
/// `Unauthorized`.
pub async fn authorize(
    authenticator: &dyn Authenticator,
    bearer: Option<&str>,
    allowed: &[TokenType],
) -> Result<Principal> {
    let secret = bearer.map(bearer_secret).ok_or(StargazerError::Unauthorized)?;
    let validation = authenticator.validate(secret).await;

    match validation.token_type {
        Some(token_type) if validation.valid && allowed.contains(&token_type) => Ok(Principal {
            token_type,
            identity: NodeId::from_digest(TokenDigest::of(secret).as_bytes()),
        }),
        _ => {
            debug!("Rejected credential for allowed set {:?}", allowed);
            Err(StargazerError::Unauthorized)
        }
    }
}

// ============================================================================
// TOKEN AUTHORITY
// ============================================================================

/// Issues, revokes and validates tokens against a store.
///
/// Time and entropy come from the context, so a simulation can expire
/// tokens by advancing its virtual clock and replay secrets from a seed.
pub struct TokenAuthority<Ctx: StargazerContext> {
    context: Arc<Ctx>,
    store: Arc<dyn TokenStore>,
}

impl<Ctx: StargazerContext> TokenAuthority<Ctx> {
    /// Creates an authority over the given store.
    pub fn new(context: Arc<Ctx>, store: Arc<dyn TokenStore>) -> Self {
        Self { context, store }
    }

    /// Current wall-clock time from the context.
    pub fn now(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.context.system_time())
    }

    fn generate_secret(&self) -> String {
        let mut bytes = [0u8; SECRET_BYTES];
        self.context.fill_random(&mut bytes);
        hex::encode(bytes)
    }

    /// Mints a token and returns its plaintext secret (the only time it is
    /// ever visible).
    pub fn create(&self, token_type: TokenType, expires: DateTime<Utc>) -> Result<String> {
        let created = self.now();
        if expires <= created {
            return Err(StargazerError::validation("expiration must be in the future"));
        }

        // Duplicate digests get a fresh draw, at most three.
        for _ in 0..3 {
            let secret = self.generate_secret();
            let record = TokenRecord {
                digest: TokenDigest::of(&secret),
                token_type,
                created,
                expires,
                revoked: false,
            };
            match self.store.insert(record) {
                Ok(()) => {
                    info!(token_type = %token_type, expires = %expires, "Issued token");
                    return Ok(secret);
                }
                Err(StoreError::Duplicate) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(StargazerError::Internal("could not mint a unique token".into()))
    }

    /// Revokes a token. Revoking twice is the same as revoking once; an
    /// unknown secret is `NotFound`.
    pub fn revoke(&self, secret: &str) -> Result<()> {
        let digest = TokenDigest::of(secret);
        if self.store.mark_revoked(&digest)? {
            info!("Revoked token");
            Ok(())
        } else {
            Err(StargazerError::NotFound)
        }
    }

    /// Validates a secret locally.
    pub fn check(&self, secret: &str) -> Validation {
        if secret.len() != SECRET_LEN {
            return Validation::invalid();
        }

        match self.store.get(&TokenDigest::of(secret)) {
            Ok(Some(record)) if record.is_live(self.now()) => Validation::valid(record.token_type),
            Ok(_) => Validation::invalid(),
            Err(e) => {
                warn!("Token store lookup failed: {}", e);
                Validation::invalid()
            }
        }
    }

    /// Mints a token without a bearer check, for operator bootstrap.
    pub fn bootstrap(&self, token_type: TokenType, lifetime: chrono::Duration) -> Result<String> {
        let expires = self.now() + lifetime;
        self.create(token_type, expires)
    }
}

#[async_trait]
impl<Ctx: StargazerContext> Authenticator for TokenAuthority<Ctx> {
    async fn validate(&self, secret: &str) -> Validation {
        self.check(secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token_store::MemoryTokenStore;
    use stargazer_env::TokioContext;

    fn authority() -> TokenAuthority<TokioContext> {
        TokenAuthority::new(TokioContext::shared(), Arc::new(MemoryTokenStore::new()))
    }

    #[test]
    fn test_create_then_validate() {
        let auth = authority();
        let secret = auth.bootstrap(TokenType::User, chrono::Duration::hours(1)).unwrap();

        assert_eq!(secret.len(), SECRET_LEN);
        assert_eq!(auth.check(&secret), Validation::valid(TokenType::User));
    }

    #[test]
    fn test_expiration_must_be_future() {
        let auth = authority();
        let past = auth.now() - chrono::Duration::seconds(1);
        let err = auth.create(TokenType::User, past).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_revoke_is_idempotent() {
        let auth = authority();
        let secret = auth.bootstrap(TokenType::Compute, chrono::Duration::hours(1)).unwrap();

        auth.revoke(&secret).unwrap();
        auth.revoke(&secret).unwrap();
        assert_eq!(auth.check(&secret), Validation::invalid());
    }

    #[test]
    fn test_revoke_unknown_is_not_found() {
        let auth = authority();
        let err = auth.revoke(&"0".repeat(SECRET_LEN)).unwrap_err();
        assert!(matches!(err, StargazerError::NotFound));
    }

    #[test]
    fn test_unknown_and_malformed_are_uniformly_invalid() {
        let auth = authority();
        assert_eq!(auth.check(&"f".repeat(SECRET_LEN)), Validation::invalid());
        assert_eq!(auth.check("short"), Validation::invalid());
        assert_eq!(auth.check(""), Validation::invalid());
    }

    #[tokio::test]
    async fn test_authorize_enforces_allowed_set() {
        let auth = authority();
        let compute = auth.bootstrap(TokenType::Compute, chrono::Duration::hours(1)).unwrap();

        let principal = authorize(&auth, Some(compute.as_str()), &[TokenType::Compute]).await.unwrap();
        assert_eq!(principal.token_type, TokenType::Compute);

        let err = authorize(&auth, Some(compute.as_str()), &[TokenType::User]).await.unwrap_err();
        assert!(matches!(err, StargazerError::Unauthorized));

        let err = authorize(&auth, None, &TokenType::ALL).await.unwrap_err();
        assert!(matches!(err, StargazerError::Unauthorized));
    }

    #[tokio::test]
    async fn test_authorize_accepts_bearer_prefix_and_derives_identity() {
        let auth = authority();
        let secret = auth.bootstrap(TokenType::Compute, chrono::Duration::hours(1)).unwrap();
        let header = format!("Bearer {}", secret);

        let a = authorize(&auth, Some(header.as_str()), &[TokenType::Compute]).await.unwrap();
        let b = authorize(&auth, Some(secret.as_str()), &[TokenType::Compute]).await.unwrap();
        assert_eq!(a.identity, b.identity);
        assert_eq!(a.identity, NodeId::from_digest(TokenDigest::of(&secret).as_bytes()));
    }
}
