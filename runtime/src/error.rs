// Copyright 2026 Grasp Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the acquisition engine.
//!
//! Every failure a caller can observe is one of these variants. Policy and
//! cache problems never surface here as hard errors: the gate degrades to a
//! permissive default and the cache degrades to a miss.

use serde::{Deserialize, Serialize};

/// All failures an acquisition can end in.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AcquireError {
    /// The origin's policy document disallows this path.
    #[error("disallowed by origin policy: {url}")]
    PolicyDenied { url: String },

    /// The operation exceeded its deadline.
    #[error("timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Connection-level failure (DNS, TCP, TLS, protocol).
    #[error("network failure: {message}")]
    NetworkFailure { message: String },

    /// The render environment failed to start or crashed.
    #[error("render environment failure: {message}")]
    RenderEnvironmentFailure { message: String },

    /// A scripted interaction failed. `partial` holds whatever content was
    /// captured before the failing command.
    #[error("interaction {index} ({command}) failed: {message}")]
    InteractionFailure {
        index: usize,
        command: String,
        message: String,
        partial: Option<Box<crate::types::Acquired>>,
    },

    /// A stored cache record could not be decoded.
    #[error("cache entry corrupted: {message}")]
    CacheCorruption { message: String },

    /// The batch was cancelled before this request was dispatched.
    #[error("cancelled before dispatch")]
    Cancelled,

    /// The request itself is malformed.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
}

impl AcquireError {
    /// Whether a fetch-tier failure of this kind should escalate to the
    /// render tier. Only connection-level failures qualify: some of them are
    /// specific to the lightweight client path.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AcquireError::NetworkFailure { .. })
    }

    /// Short machine-readable label, used in events and CLI output.
    pub fn label(&self) -> &'static str {
        match self {
            AcquireError::PolicyDenied { .. } => "policy_denied",
            AcquireError::Timeout { .. } => "timeout",
            AcquireError::NetworkFailure { .. } => "network_failure",
            AcquireError::RenderEnvironmentFailure { .. } => "render_environment_failure",
            AcquireError::InteractionFailure { .. } => "interaction_failure",
            AcquireError::CacheCorruption { .. } => "cache_corruption",
            AcquireError::Cancelled => "cancelled",
            AcquireError::InvalidRequest { .. } => "invalid_request",
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        AcquireError::InvalidRequest {
            message: message.into(),
        }
    }

    /// Classify a reqwest error into the taxonomy.
    pub fn from_reqwest(err: &reqwest::Error, timeout_ms: u64) -> Self {
        if err.is_timeout() {
            AcquireError::Timeout { timeout_ms }
        } else {
            AcquireError::NetworkFailure {
                message: err.to_string(),
            }
        }
    }
}
