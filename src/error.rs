//! Error types for mix-fetch
//!
//! This module provides the error taxonomy with:
//! - Detailed error variants for different failure modes
//! - Error classification (contract violation vs retryable)
//! - Error codes for programmatic handling
//! - A serializable summary for the host

use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use wasm_bindgen::JsValue;

use crate::request::RequestId;

pub type Result<T> = std::result::Result<T, MixFetchError>;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // Dial errors (1xx)
    DialFailed = 100,
    RequestTimeout = 101,
    TransportFailed = 102,

    // Protocol errors (2xx)
    HandshakeFailed = 200,
    MalformedResponse = 201,
    Io = 202,

    // Fetch policy errors (3xx)
    ModeViolation = 300,
    RedirectLimit = 301,
    RedirectLoop = 302,
    RedirectEncountered = 303,
    CorsFailed = 304,

    // Request errors (4xx)
    InvalidRequest = 400,
    InvalidUrl = 401,

    // Contract violations (5xx)
    ContractViolation = 500,

    // Internal errors (9xx)
    InternalError = 900,
}

/// Main error type for mix-fetch
#[derive(Error, Debug, Clone)]
pub enum MixFetchError {
    // ===== Dial Errors =====
    #[error("failed to start mixnet request to {address}: {reason}")]
    DialFailed { address: String, reason: String },

    #[error("request timeout")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    // ===== Protocol Errors =====
    #[error("TLS handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("malformed HTTP response: {0}")]
    MalformedResponse(String),

    #[error("I/O error ({kind}): {message}")]
    Io { kind: io::ErrorKind, message: String },

    // ===== Fetch Policy Errors =====
    #[error("MixFetch API cannot load {target}. Request mode is \"same-origin\" but the URL's origin is not same as the request origin {origin}.")]
    ModeViolation { target: String, origin: String },

    #[error("Maximum ({0}) redirects followed")]
    RedirectLimit(usize),

    #[error("stuck in redirection loop")]
    RedirectLoop,

    #[error("encountered redirect")]
    RedirectEncountered,

    #[error("\"{0}\" header not present on remote")]
    CorsMissingHeader(&'static str),

    #[error("\"{origin}\" does not match the origin \"{header_value}\" on \"{header}\" remote header")]
    CorsOriginMismatch {
        origin: String,
        header_value: String,
        header: &'static str,
    },

    #[error("failed cors check")]
    CorsCredentials,

    // ===== Request Errors =====
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    // ===== Contract Violations =====
    #[error("attempted to overwrite active connection {0}")]
    DuplicateRequest(RequestId),

    #[error("attempted to {operation} connection {request_id} that doesn't exist")]
    UnknownRequest {
        request_id: RequestId,
        operation: &'static str,
    },

    #[error("impossible request mode: {0}")]
    ImpossibleMode(String),

    // ===== Internal Errors =====
    #[error("internal error: {0}")]
    Internal(String),
}

impl MixFetchError {
    /// Get the error code for programmatic handling
    pub fn code(&self) -> ErrorCode {
        match self {
            MixFetchError::DialFailed { .. } => ErrorCode::DialFailed,
            MixFetchError::Timeout => ErrorCode::RequestTimeout,
            MixFetchError::Transport(_) => ErrorCode::TransportFailed,

            MixFetchError::HandshakeFailed(_) => ErrorCode::HandshakeFailed,
            MixFetchError::MalformedResponse(_) => ErrorCode::MalformedResponse,
            MixFetchError::Io { .. } => ErrorCode::Io,

            MixFetchError::ModeViolation { .. } => ErrorCode::ModeViolation,
            MixFetchError::RedirectLimit(_) => ErrorCode::RedirectLimit,
            MixFetchError::RedirectLoop => ErrorCode::RedirectLoop,
            MixFetchError::RedirectEncountered => ErrorCode::RedirectEncountered,
            MixFetchError::CorsMissingHeader(_)
            | MixFetchError::CorsOriginMismatch { .. }
            | MixFetchError::CorsCredentials => ErrorCode::CorsFailed,

            MixFetchError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            MixFetchError::InvalidUrl(_) => ErrorCode::InvalidUrl,

            MixFetchError::DuplicateRequest(_)
            | MixFetchError::UnknownRequest { .. }
            | MixFetchError::ImpossibleMode(_) => ErrorCode::ContractViolation,

            MixFetchError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Whether this error is a broken invariant rather than a request failure.
    ///
    /// The core never aborts on these; the hosting application is expected to
    /// tear the client down, since its bookkeeping can no longer be trusted.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            MixFetchError::DuplicateRequest(_)
                | MixFetchError::UnknownRequest { .. }
                | MixFetchError::ImpossibleMode(_)
        )
    }

    /// Whether the same request could reasonably succeed if issued again.
    ///
    /// Nothing in this crate retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MixFetchError::DialFailed { .. }
                | MixFetchError::Timeout
                | MixFetchError::Transport(_)
                | MixFetchError::HandshakeFailed(_)
                | MixFetchError::Io { .. }
        )
    }

    /// Whether this error comes from the Fetch policy checks (mode, redirect, CORS).
    pub fn is_policy_failure(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::ModeViolation
                | ErrorCode::RedirectLimit
                | ErrorCode::RedirectLoop
                | ErrorCode::RedirectEncountered
                | ErrorCode::CorsFailed
        )
    }
}

/// Unwrap typed failures that had to travel through `io::Error`
/// (virtual connection reads, TLS records) back into `MixFetchError`.
impl From<io::Error> for MixFetchError {
    fn from(err: io::Error) -> Self {
        let kind = err.kind();
        match err.into_inner() {
            Some(inner) => match inner.downcast::<MixFetchError>() {
                Ok(typed) => *typed,
                Err(other) => MixFetchError::Io {
                    kind,
                    message: other.to_string(),
                },
            },
            None => MixFetchError::Io {
                kind,
                message: kind.to_string(),
            },
        }
    }
}

impl From<url::ParseError> for MixFetchError {
    fn from(err: url::ParseError) -> Self {
        MixFetchError::InvalidUrl(err.to_string())
    }
}

impl From<httparse::Error> for MixFetchError {
    fn from(err: httparse::Error) -> Self {
        MixFetchError::MalformedResponse(err.to_string())
    }
}

impl From<MixFetchError> for JsValue {
    fn from(err: MixFetchError) -> Self {
        JsValue::from_str(&err.to_string())
    }
}

/// Error information for JavaScript consumption
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: u32,
    pub message: String,
    pub is_contract_violation: bool,
    pub is_retryable: bool,
}

impl From<&MixFetchError> for ErrorInfo {
    fn from(err: &MixFetchError) -> Self {
        ErrorInfo {
            code: err.code() as u32,
            message: err.to_string(),
            is_contract_violation: err.is_contract_violation(),
            is_retryable: err.is_retryable(),
        }
    }
}
