//! Common types for the Stargazer environment abstraction.

use crate::error::EnvError;
use serde::{Deserialize, Serialize};
use std::net::Ipv6Addr;
use uuid::Uuid;

/// Unique identifier for a Compute node.
///
/// A node has no identity beyond the bearer token it registered with, so the
/// id is derived from that token's digest rather than generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Creates a new random NodeId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a NodeId from a UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Derives the NodeId of the holder of a token from its 32-byte digest.
    pub fn from_digest(digest: &[u8; 32]) -> Self {
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Self(Uuid::from_bytes(bytes))
    }

    /// Creates a deterministic NodeId from a seed (for simulation).
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&seed.to_le_bytes());
        bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show first 8 chars for readability
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// A reachable service address, e.g. `http://compute-3:8000`.
///
/// Only `http` and `https` URIs with a non-empty host are accepted; IPv6
/// hosts must be bracketed (`http://[::1]:8000`). A trailing slash is dropped so the same address always compares equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint(String);

impl Endpoint {
    /// Parses and normalises an endpoint URI.
    pub fn parse(raw: &str) -> Result<Self, EnvError> {
        let trimmed = raw.trim().trim_end_matches('/');
        let rest = trimmed
            .strip_prefix("http://")
            .or_else(|| trimmed.strip_prefix("https://"))
            .ok_or_else(|| EnvError::InvalidEndpoint(raw.to_string()))?;

        let authority = rest.split('/').next().unwrap_or_default();
        let (host_ok, port) = match authority.strip_prefix('[') {
            // IPv6 literal: [addr] or [addr]:port
            Some(bracketed) => {
                let (addr, after) = bracketed
                    .split_once(']')
                    .ok_or_else(|| EnvError::InvalidEndpoint(raw.to_string()))?;
                let port = match after {
                    "" => None,
                    _ => Some(
                        after
                            .strip_prefix(':')
                            .ok_or_else(|| EnvError::InvalidEndpoint(raw.to_string()))?,
                    ),
                };
                (addr.parse::<Ipv6Addr>().is_ok(), port)
            }
            None => {
                let (host, port) = match authority.rsplit_once(':') {
                    Some((host, port)) => (host, Some(port)),
                    None => (authority, None),
                };
                let ok = !host.is_empty()
                    && host
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'));
                (ok, port)
            }
        };
        let port_ok = port.map_or(true, |p| p.parse::<u16>().map_or(false, |p| p > 0));

        if !host_ok || !port_ok || trimmed.chars().any(char::is_whitespace) {
            return Err(EnvError::InvalidEndpoint(raw.to_string()));
        }

        Ok(Self(trimmed.to_string()))
    }

    /// Returns the endpoint as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Endpoint {
    type Error = EnvError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Endpoint::parse(&value)
    }
}

impl From<Endpoint> for String {
    fn from(value: Endpoint) -> Self {
        value.0
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Envelope for a request sent to a service endpoint.
///
/// This is a transport-layer wrapper - the payload is opaque JSON bytes that
/// the receiving service decodes against its typed request schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Route on the target service, e.g. `/api/compute/step`
    pub route: String,

    /// Bearer credential (the `Authorization` header)
    pub bearer: Option<String>,

    /// The raw request body
    pub payload: Vec<u8>,
}

impl RequestEnvelope {
    /// Creates a new envelope for `route` carrying `payload`.
    pub fn new(route: impl Into<String>, bearer: Option<String>, payload: Vec<u8>) -> Self {
        Self {
            route: route.into(),
            bearer,
            payload,
        }
    }

    /// Returns the payload size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

/// Envelope for a service's reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// HTTP-style status code
    pub status: u16,

    /// The raw response body
    pub payload: Vec<u8>,
}

impl ResponseEnvelope {
    /// Creates a new response envelope.
    pub fn new(status: u16, payload: Vec<u8>) -> Self {
        Self { status, payload }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}
