//! Error types for kermond
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SI-11: Error Handling - Structured error types with contextual information
//! - AU-3: Content of Audit Records - Errors include sufficient detail for audit

use crate::types::CacheKind;
use thiserror::Error;

/// Errors that can occur in kermond
#[derive(Debug, Error)]
pub enum KermondError {
    /// Configuration store connection or command failed
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Netlink socket error (create, bind, send, receive, parse)
    #[error("Netlink error: {0}")]
    Netlink(String),

    /// The kernel rejected a request
    #[error("Kernel rejected {op}: {source}")]
    Kernel {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Cache multiplexer used before `start`
    #[error("Cache multiplexer not started")]
    NotStarted,

    /// Kernel-side cache could not be populated
    #[error("Failed to allocate {kind} cache: {reason}")]
    CacheAllocation { kind: CacheKind, reason: String },

    /// The kernel dropped notifications; caches must be re-dumped
    #[error("Kernel notification overrun")]
    Overrun,

    /// Configuration watch ended without a shutdown request
    #[error("Configuration watch closed")]
    WatchClosed,

    /// Poll wait interrupted by a signal
    #[error("Poll interrupted")]
    Interrupted,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl KermondError {
    /// Errno reported by the kernel, if this is a kernel rejection
    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::Kernel { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

/// Result type alias for kermond operations
pub type Result<T> = std::result::Result<T, KermondError>;
