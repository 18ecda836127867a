//! Types carried through the RPC pipeline.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use accounts_core::{AppError, Code, Reply, RequestContext};
use http::{Extensions, HeaderMap};
use serde::Serialize;
use tokio::sync::watch;

use crate::config::AppConfig;

/// Boxed future returned by every pipeline service.
pub type CallFuture<T> = Pin<Box<dyn Future<Output = Result<T, Status>> + Send>>;

/// What a handler produces: a data branch or a domain error.
pub type HandlerResult = Result<ResponseData, AppError>;

// ---------------------------------------------------------------------------
// Call
// ---------------------------------------------------------------------------

/// One inbound RPC.
///
/// `metadata` is the raw wire metadata. `extensions` is the per-call scope the
/// layers write into (method tag, request context).
#[derive(Debug)]
pub struct Call {
    pub method: String,
    pub metadata: HeaderMap,
    pub extensions: Extensions,
    pub body: Vec<u8>,
}

impl Call {
    #[must_use]
    pub fn new(method: impl Into<String>, metadata: HeaderMap, body: Vec<u8>) -> Self {
        Self {
            method: method.into(),
            metadata,
            extensions: Extensions::new(),
            body,
        }
    }

    /// The request context attached by the context layer, if any.
    #[must_use]
    pub fn context(&self) -> Option<Arc<RequestContext>> {
        self.extensions.get::<Arc<RequestContext>>().cloned()
    }

    #[must_use]
    pub fn called_method(&self) -> Option<&str> {
        self.extensions
            .get::<CalledMethod>()
            .map(|m| m.0.as_str())
    }
}

/// Method name as tagged by the first layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalledMethod(pub String);

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Data branch of a handler result.
pub enum ResponseData {
    Unary(serde_json::Value),
    ConfigStream(ConfigSubscription),
}

impl ResponseData {
    /// Serializes a unary payload.
    ///
    /// # Errors
    ///
    /// Fails only if `T` cannot be represented as JSON.
    pub fn unary<T: Serialize>(data: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(data).map(Self::Unary)
    }
}

impl fmt::Debug for ResponseData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unary(v) => f.debug_tuple("Unary").field(v).finish(),
            Self::ConfigStream(_) => f.write_str("ConfigStream"),
        }
    }
}

/// Open config-change subscription handed to the transport.
pub struct ConfigSubscription {
    pub ctx: Arc<RequestContext>,
    pub changes: watch::Receiver<Arc<AppConfig>>,
}

/// What leaves the pipeline after sanitization.
#[derive(Debug)]
pub enum RpcReply {
    Unary(Reply<serde_json::Value>),
    Stream(ConfigSubscription),
}

impl fmt::Debug for ConfigSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigSubscription")
            .field("request_id", &self.ctx.request_id())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Transport-level failure. Reserved for infrastructure problems; domain
/// failures travel in the error branch of the reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{code:?}: {message}")]
pub struct Status {
    pub code: Code,
    pub message: String,
}

impl Status {
    #[must_use]
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(Code::Unauthenticated, message)
    }

    #[must_use]
    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(Code::Unimplemented, message)
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }

    #[must_use]
    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(Code::ResourceExhausted, message)
    }

    #[must_use]
    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(Code::DeadlineExceeded, message)
    }
}
