//! In-process transport.
//!
//! Services implement [`ServiceHandler`] and are mounted on a [`LocalRouter`]
//! under their endpoint. The router then stands in for HTTP: a call to an
//! endpoint is dispatched straight to the mounted handler.

use async_trait::async_trait;
use parking_lot::RwLock;
use stargazer_env::{EnvError, Endpoint, NodeTransport, RequestEnvelope, ResponseEnvelope};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// A service that answers requests by route.
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    async fn handle(&self, request: RequestEnvelope) -> ResponseEnvelope;
}

/// Endpoint -> handler table.
#[derive(Default)]
pub struct LocalRouter {
    services: RwLock<HashMap<Endpoint, Arc<dyn ServiceHandler>>>,
}

impl LocalRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Mounts a handler, replacing whatever was there.
    pub fn mount(&self, endpoint: Endpoint, handler: Arc<dyn ServiceHandler>) {
        self.services.write().insert(endpoint, handler);
    }

    /// Removes a handler. Returns true if one was mounted.
    pub fn unmount(&self, endpoint: &Endpoint) -> bool {
        self.services.write().remove(endpoint).is_some()
    }

    /// Looks up the handler for an endpoint.
    pub fn resolve(&self, endpoint: &Endpoint) -> Option<Arc<dyn ServiceHandler>> {
        self.services.read().get(endpoint).cloned()
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }
}

#[async_trait]
impl NodeTransport for LocalRouter {
    async fn call(
        &self,
        endpoint: &Endpoint,
        request: RequestEnvelope,
    ) -> Result<ResponseEnvelope, EnvError> {
        // Lock is released before awaiting the handler
        let handler = self.resolve(endpoint).ok_or_else(|| EnvError::unreachable(endpoint))?;
        trace!(endpoint = %endpoint, route = %request.route, bytes = request.size(), "Dispatching");
        Ok(handler.handle(request).await)
    }
}
