//! Error types for optrack.
//!
//! Operation failures never travel through this type: they are reported by
//! poisoning the operation's completion event. `Error` covers the remaining
//! cases, which are API misuse, transport problems and configuration mistakes.
//!
//! # Error Categories
//!
//! - **Cancellation**: a request was refused because the target was cancelled
//! - **Lifecycle**: invalid operation state transitions
//! - **Transport**: message routing, delivery and decoding failures
//! - **Config**: invalid configuration values or files
//! - **Internal**: bugs and broken invariants

use core::fmt;
use std::sync::Arc;

use crate::types::{Event, NodeId};

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Cancellation ===
    /// The operation was cancelled.
    Cancelled,

    // === Lifecycle ===
    /// Invalid state transition (e.g. adding work after `mark_finished`).
    InvalidStateTransition,
    /// The operation has already been torn down.
    OperationDestroyed,

    // === Transport ===
    /// No route to the destination node.
    RoutingFailed,
    /// The destination node is not reachable.
    NodeUnavailable,
    /// A received message could not be decoded.
    ProtocolError,

    // === Config ===
    /// Invalid configuration.
    InvalidConfig,

    // === Internal ===
    /// Profiling payload could not be serialized.
    Serialization,
    /// Internal error (bug).
    Internal,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Cancelled => ErrorCategory::Cancellation,
            Self::InvalidStateTransition | Self::OperationDestroyed => ErrorCategory::Lifecycle,
            Self::RoutingFailed | Self::NodeUnavailable | Self::ProtocolError => {
                ErrorCategory::Transport
            }
            Self::InvalidConfig => ErrorCategory::Config,
            Self::Serialization | Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Returns the recoverability classification for this error kind.
    #[must_use]
    pub const fn recoverability(&self) -> Recoverability {
        match self {
            Self::NodeUnavailable => Recoverability::Transient,
            Self::Cancelled
            | Self::InvalidStateTransition
            | Self::OperationDestroyed
            | Self::ProtocolError
            | Self::InvalidConfig
            | Self::Serialization
            | Self::Internal => Recoverability::Permanent,
            Self::RoutingFailed => Recoverability::Unknown,
        }
    }

    /// Returns true if this error is typically retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.recoverability(), Recoverability::Transient)
    }
}

/// Classification of error recoverability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recoverability {
    /// Temporary failure that may succeed on retry.
    Transient,
    /// Permanent failure that will not succeed on retry.
    Permanent,
    /// Depends on context.
    Unknown,
}

/// High-level error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Cancellation-related failures.
    Cancellation,
    /// Operation lifecycle misuse.
    Lifecycle,
    /// Transport-layer failures.
    Transport,
    /// Configuration failures.
    Config,
    /// Internal errors.
    Internal,
}

/// The main error type for optrack.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns the recoverability classification.
    #[must_use]
    pub const fn recoverability(&self) -> Recoverability {
        self.kind.recoverability()
    }

    /// Returns true if this error represents cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Returns true if this is a transport-related error.
    #[must_use]
    pub const fn is_transport_error(&self) -> bool {
        matches!(self.kind.category(), ErrorCategory::Transport)
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Creates an invalid state transition error.
    #[must_use]
    pub fn invalid_transition(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidStateTransition).with_message(detail)
    }

    /// Creates a routing failed error.
    #[must_use]
    pub fn routing_failed(destination: NodeId) -> Self {
        Self::new(ErrorKind::RoutingFailed)
            .with_message(format!("no route to destination: {destination}"))
    }

    /// Creates a node unavailable error.
    #[must_use]
    pub fn node_unavailable(node: NodeId) -> Self {
        Self::new(ErrorKind::NodeUnavailable).with_message(format!("node unavailable: {node}"))
    }

    /// Creates an error for work refused because the operation was cancelled
    /// before it started.
    #[must_use]
    pub fn cancelled(finish_event: Event) -> Self {
        Self::new(ErrorKind::Cancelled)
            .with_message(format!("operation for {finish_event} was cancelled"))
    }

    /// Creates an error for an operation that has already been torn down.
    #[must_use]
    pub fn destroyed(finish_event: Event) -> Self {
        Self::new(ErrorKind::OperationDestroyed)
            .with_message(format!("operation for {finish_event} already destroyed"))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::new(ErrorKind::Serialization)
            .with_message("failed to serialize profiling payload")
            .with_source(e)
    }
}

/// A specialized Result type for optrack operations.
pub type Result<T> = core::result::Result<T, Error>;
