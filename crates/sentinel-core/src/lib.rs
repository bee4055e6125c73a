//! Shared primitives used across the Sentinel workspace: id generation,
//! timestamps, and the gateway-wide error taxonomy.

#![deny(unsafe_code)]

/// Version of the sentinel-core library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod ids {
    //! Monotonic and random identifier helpers.

    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};
    use uuid::Uuid;

    static NEXT_ID: AtomicU64 = AtomicU64::new(1);

    /// Generate a new monotonic, process-local identifier (starts at 1).
    pub fn next_monotonic_id() -> u64 {
        NEXT_ID.fetch_add(1, Ordering::Relaxed)
    }

    /// Milliseconds since the UNIX epoch.
    pub fn now_ms() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as u64
    }

    /// A fresh, server-assigned request id.
    pub fn new_request_id() -> String {
        format!("req-{}", Uuid::new_v4())
    }

    /// A fresh approval id.
    pub fn new_approval_id() -> String {
        format!("appr-{}", Uuid::new_v4())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn monotonic_increments() {
            let a = next_monotonic_id();
            let b = next_monotonic_id();
            assert!(b > a);
        }

        #[test]
        fn request_id_has_prefix() {
            let id = new_request_id();
            assert!(id.starts_with("req-"));
        }
    }
}

pub mod error {
    //! The gateway-wide error taxonomy realizing the abstract error kinds
    //! (`Unauthenticated`, `RateLimited`, `PolicyStoreUnavailable`, ...).

    use thiserror::Error;

    /// Errors that can terminate a request's evaluation before a decision
    /// is reached, or that must be reported to the caller verbatim.
    #[derive(Debug, Error)]
    pub enum GatewayError {
        /// Missing or invalid bearer key.
        #[error("unauthenticated")]
        Unauthenticated,
        /// The caller's per-agent rate budget is exhausted.
        #[error("rate limited, retry after {retry_after_secs}s")]
        RateLimited {
            /// Seconds until the current window resets.
            retry_after_secs: u64,
        },
        /// No rule snapshot is available to evaluate against.
        #[error("policy store unavailable")]
        PolicyStoreUnavailable,
        /// A named resource does not exist.
        #[error("not found: {0}")]
        NotFound(String),
        /// The request body failed validation.
        #[error("bad request: {0}")]
        BadRequest(String),
        /// A terminal-state approval received a conflicting callback.
        #[error("approval already resolved")]
        CallbackConflict,
        /// Catch-all for unexpected internal failures. Never displays the
        /// wrapped source's details to a caller.
        #[error("internal error (request {request_id})")]
        Internal {
            /// The request id to quote back to the caller for support.
            request_id: String,
        },
    }

    impl GatewayError {
        /// HTTP status an out-of-scope transport layer should use for this
        /// error, per the distilled spec's §7 policy table.
        #[must_use]
        pub fn status_code(&self) -> u16 {
            match self {
                Self::Unauthenticated => 401,
                Self::RateLimited { .. } => 429,
                Self::NotFound(_) => 404,
                Self::BadRequest(_) => 400,
                Self::CallbackConflict => 409,
                Self::PolicyStoreUnavailable | Self::Internal { .. } => 500,
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn status_codes_match_policy_table() {
            assert_eq!(GatewayError::Unauthenticated.status_code(), 401);
            assert_eq!(GatewayError::RateLimited { retry_after_secs: 1 }.status_code(), 429);
            assert_eq!(GatewayError::NotFound("x".into()).status_code(), 404);
            assert_eq!(GatewayError::CallbackConflict.status_code(), 409);
        }
    }
}

pub mod degradation {
    //! Degradation events: a component fell back to reduced functionality
    //! rather than failing the request outright.

    use serde::{Deserialize, Serialize};

    /// One instance of a component operating in a degraded mode.
    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
    pub struct DegradationEvent {
        /// The component that degraded, e.g. `"policy_store"`.
        pub component: String,
        /// Human-readable reason.
        pub reason: String,
        /// When the degradation was observed.
        pub ts_ms: u64,
    }

    impl DegradationEvent {
        /// Construct a degradation event stamped with the current time.
        pub fn new(component: impl Into<String>, reason: impl Into<String>) -> Self {
            Self { component: component.into(), reason: reason.into(), ts_ms: super::ids::now_ms() }
        }
    }
}
