//! Network types and the host fetch capability
//!
//! The worker never talks to the network directly; the host supplies a
//! [`Fetcher`]. Requests carry a [`CacheMode`] so the install phase can
//! force revalidation past any intermediate HTTP cache.
//!
//! [`Response::encode`]/[`Response::decode`] define the blob framing
//! used when a response is persisted into a store: a little-endian
//! length-prefixed JSON header (status + headers) followed by the raw
//! body bytes.

use crate::error::{WorkerError, WorkerResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Request method. Only GET is ever intercepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Other(String),
}

/// HTTP cache interaction mode for a fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// Normal HTTP caching
    Default,
    /// Bypass the HTTP cache and revalidate with the origin
    Reload,
}

/// An outgoing request
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub mode: CacheMode,
}

impl Request {
    /// A plain GET request
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            mode: CacheMode::Default,
        }
    }

    /// A GET request that bypasses the HTTP cache (install-phase mode)
    pub fn get_reload(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            mode: CacheMode::Reload,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct ResponseHead {
    status: u16,
    headers: Vec<(String, String)>,
}

/// A fetched response: status, headers, body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    /// A bare 200 response with the given body
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// A bodyless response with the given status
    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Whether the status reports success (2xx)
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Serialize into the store blob framing
    pub fn encode(&self) -> WorkerResult<Vec<u8>> {
        let head = serde_json::to_vec(&ResponseHead {
            status: self.status,
            headers: self.headers.clone(),
        })?;
        let mut framed = Vec::with_capacity(4 + head.len() + self.body.len());
        framed.extend_from_slice(&(head.len() as u32).to_le_bytes());
        framed.extend_from_slice(&head);
        framed.extend_from_slice(&self.body);
        Ok(framed)
    }

    /// Deserialize from the store blob framing.
    ///
    /// `key` only contextualizes the error on corrupt input.
    pub fn decode(key: &str, bytes: &[u8]) -> WorkerResult<Self> {
        if bytes.len() < 4 {
            return Err(WorkerError::entry_decode(key, "truncated header length"));
        }
        let head_len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        if bytes.len() < 4 + head_len {
            return Err(WorkerError::entry_decode(key, "truncated header"));
        }
        let head: ResponseHead = serde_json::from_slice(&bytes[4..4 + head_len])
            .map_err(|e| WorkerError::entry_decode(key, e.to_string()))?;
        Ok(Self {
            status: head.status,
            headers: head.headers,
            body: bytes[4 + head_len..].to_vec(),
        })
    }
}

/// The host network capability
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform a network fetch.
    ///
    /// `Err` means the fetch itself failed (offline, DNS, reset); an HTTP
    /// error status is a successful fetch with a non-2xx [`Response`].
    async fn fetch(&self, request: &Request) -> WorkerResult<Response>;
}
