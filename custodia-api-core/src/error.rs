//! Serializable API error types and error kinds returned by the settlement
//! engine's operator-facing surface.

#![deny(non_snake_case)]

use std::fmt;

use http::status::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
#[cfg(feature = "axum")]
use tracing::{error, warn};

#[cfg(feature = "axum")]
use crate::axum_helpers;

pub const CLIENT_400_BAD_REQUEST: StatusCode = StatusCode::BAD_REQUEST;
pub const CLIENT_401_UNAUTHORIZED: StatusCode = StatusCode::UNAUTHORIZED;
pub const CLIENT_404_NOT_FOUND: StatusCode = StatusCode::NOT_FOUND;
pub const CLIENT_409_CONFLICT: StatusCode = StatusCode::CONFLICT;
pub const CLIENT_422_UNPROCESSABLE: StatusCode =
    StatusCode::UNPROCESSABLE_ENTITY;
pub const SERVER_500_INTERNAL_SERVER_ERROR: StatusCode =
    StatusCode::INTERNAL_SERVER_ERROR;
pub const SERVER_502_BAD_GATEWAY: StatusCode = StatusCode::BAD_GATEWAY;
pub const SERVER_503_SERVICE_UNAVAILABLE: StatusCode =
    StatusCode::SERVICE_UNAVAILABLE;
pub const SERVER_504_GATEWAY_TIMEOUT: StatusCode = StatusCode::GATEWAY_TIMEOUT;

/// `ErrorCode` is the common serialized representation for all error kinds.
pub type ErrorCode = u16;

/// The only error struct actually sent across the wire; everything else is
/// converted to / from it.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub msg: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

pub trait ToHttpStatus {
    fn to_http_status(&self) -> StatusCode;
}

/// Methods required of error kinds generated by [`api_error_kind!`].
pub trait ApiErrorKind:
    Copy
    + Clone
    + Default
    + Eq
    + PartialEq
    + fmt::Debug
    + fmt::Display
    + ToHttpStatus
    + From<ErrorCode>
    + Sized
    + 'static
{
    const KINDS: &'static [Self];
    fn is_unknown(&self) -> bool;
    fn to_name(self) -> &'static str;
    fn to_msg(self) -> &'static str;
    fn to_code(self) -> ErrorCode;
    fn from_code(code: ErrorCode) -> Self;
}

/// This macro takes the name of an API error and its error kind type and
/// generates the boilerplate impls needed to move it across the wire.
#[macro_export]
macro_rules! api_error {
    ($api_error:ident, $api_error_kind:ident) => {
        #[derive(Clone, Debug, Default, Eq, PartialEq, Error)]
        pub struct $api_error<D = serde_json::Value> {
            pub kind: $api_error_kind,
            pub msg: String,
            pub data: D,
        }

        impl $api_error {
            #[cfg(feature = "axum")]
            fn log_and_status(&self) -> StatusCode {
                let status = self.to_http_status();
                if status.is_server_error() {
                    tracing::error!("{self}");
                } else if status.is_client_error() {
                    tracing::warn!("{self}");
                } else {
                    tracing::error!(
                        "Unexpected status code {status} for error: {self}"
                    );
                }
                status
            }
        }

        impl fmt::Display for $api_error {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let kind_msg = self.kind.to_msg();
                let msg = &self.msg;
                write!(f, "{kind_msg}: {msg}")
            }
        }

        impl From<ErrorResponse> for $api_error {
            fn from(err_resp: ErrorResponse) -> Self {
                let ErrorResponse { code, msg, data } = err_resp;
                let kind = $api_error_kind::from_code(code);
                Self { kind, msg, data }
            }
        }

        impl From<$api_error> for ErrorResponse {
            fn from(api_error: $api_error) -> Self {
                let $api_error { kind, msg, data } = api_error;
                let code = kind.to_code();
                Self { code, msg, data }
            }
        }

        impl ToHttpStatus for $api_error {
            fn to_http_status(&self) -> StatusCode {
                self.kind.to_http_status()
            }
        }

        #[cfg(feature = "axum")]
        impl axum::response::IntoResponse for $api_error {
            fn into_response(self) -> http::Response<axum::body::Body> {
                let status = self.log_and_status();
                let error_response = ErrorResponse::from(self);
                axum_helpers::build_json_response(status, &error_response)
            }
        }
    };
}

/// This macro takes an error kind enum declaration and generates the
/// [`ApiErrorKind`] impl (and its dependent traits).
///
/// All error kind types _must_ have an `Unknown(ErrorCode)` variant, and it
/// _must_ be first. This handles unrecognized errors seen from a peer on an
/// older or newer version and preserves the raw code for debugging.
#[macro_export]
macro_rules! api_error_kind {
    {
        $(#[$enum_meta:meta])*
        pub enum $error_kind_name:ident {
            $( #[doc = $unknown_msg:literal] )*
            Unknown(ErrorCode),

            $(
                $( #[doc = $item_msg:literal] )*
                $item_name:ident = $item_code:literal
            ),*

            $(,)?
        }
    } => {
        $(#[$enum_meta])*
        pub enum $error_kind_name {
            $( #[doc = $unknown_msg] )*
            Unknown(ErrorCode),

            $(
                $( #[doc = $item_msg] )*
                $item_name
            ),*
        }

        impl ApiErrorKind for $error_kind_name {
            const KINDS: &'static [Self] = &[
                $( Self::$item_name, )*
            ];

            #[inline]
            fn is_unknown(&self) -> bool {
                matches!(self, Self::Unknown(_))
            }

            fn to_name(self) -> &'static str {
                match self {
                    $( Self::$item_name => stringify!($item_name), )*
                    Self::Unknown(_) => "Unknown",
                }
            }

            fn to_msg(self) -> &'static str {
                let kind_msg = match self {
                    $( Self::$item_name => concat!($( $item_msg, )*), )*
                    Self::Unknown(_) => concat!($( $unknown_msg, )*),
                };
                kind_msg.trim_start()
            }

            fn to_code(self) -> ErrorCode {
                match self {
                    $( Self::$item_name => $item_code, )*
                    Self::Unknown(code) => code,
                }
            }

            fn from_code(code: ErrorCode) -> Self {
                #[deny(unreachable_patterns)]
                match code {
                    0 => Self::Unknown(0),
                    $( $item_code => Self::$item_name, )*
                    _ => Self::Unknown(code),
                }
            }
        }

        impl Default for $error_kind_name {
            fn default() -> Self {
                Self::Unknown(0)
            }
        }

        impl fmt::Display for $error_kind_name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", (*self).to_msg())
            }
        }

        impl From<ErrorCode> for $error_kind_name {
            #[inline]
            fn from(code: ErrorCode) -> Self {
                Self::from_code(code)
            }
        }

        impl From<$error_kind_name> for ErrorCode {
            #[inline]
            fn from(val: $error_kind_name) -> ErrorCode {
                val.to_code()
            }
        }
    }
}

api_error!(EngineApiError, EngineErrorKind);

api_error_kind! {
    /// Every error the settlement engine can surface across its
    /// operator-facing API and worker loop.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
    pub enum EngineErrorKind {
        /// Unknown error
        Unknown(ErrorCode),

        // --- Common --- //

        /// Error connecting to a remote service
        Connect = 1,
        /// Request timed out
        Timeout = 2,
        /// Error decoding a request or response body
        Decode = 3,
        /// General internal server error
        Server = 4,

        // --- Authorization (spec section 4.3/4.4) --- //

        /// Authorizer key not recognized for this environment
        InvalidAuthorizer = 100,
        /// Quorum not yet reached for this payment
        InsufficientAuthorizations = 101,
        /// ed25519 signature failed to verify
        SignatureInvalid = 102,

        // --- State machine (spec section 4.1) --- //

        /// Requested status transition is not in the allowed graph
        InvalidTransition = 110,
        /// No payment found for the given id
        RecordNotFound = 111,
        /// Idempotency key derived from the request doesn't match the stored
        /// payment
        IdempotencyMismatch = 112,

        // --- Ledger (spec section 4.2) --- //

        /// Merkle proof failed to re-derive the ledger digest
        MerkleInvalid = 120,
        /// The ledger backend returned an error unrelated to the above
        LedgerBackendError = 121,

        // --- Custodian dispatch (spec section 4.5/4.6) --- //

        /// Custodian call failed but may succeed on retry
        CustodianTransient = 130,
        /// Custodian call failed and will not succeed on retry
        CustodianTerminal = 131,
        /// The drive loop's deadline elapsed before reaching a terminal status
        DeadlineExceeded = 132,
    }
}

impl ToHttpStatus for EngineErrorKind {
    fn to_http_status(&self) -> StatusCode {
        use EngineErrorKind::*;
        match self {
            Unknown(_) => SERVER_500_INTERNAL_SERVER_ERROR,

            Connect => SERVER_503_SERVICE_UNAVAILABLE,
            Timeout => SERVER_504_GATEWAY_TIMEOUT,
            Decode => SERVER_502_BAD_GATEWAY,
            Server => SERVER_500_INTERNAL_SERVER_ERROR,

            InvalidAuthorizer => CLIENT_401_UNAUTHORIZED,
            InsufficientAuthorizations => CLIENT_409_CONFLICT,
            SignatureInvalid => CLIENT_401_UNAUTHORIZED,

            InvalidTransition => CLIENT_422_UNPROCESSABLE,
            RecordNotFound => CLIENT_404_NOT_FOUND,
            IdempotencyMismatch => CLIENT_409_CONFLICT,

            MerkleInvalid => SERVER_500_INTERNAL_SERVER_ERROR,
            LedgerBackendError => SERVER_502_BAD_GATEWAY,

            CustodianTransient => SERVER_503_SERVICE_UNAVAILABLE,
            CustodianTerminal => CLIENT_422_UNPROCESSABLE,
            DeadlineExceeded => SERVER_504_GATEWAY_TIMEOUT,
        }
    }
}

impl EngineApiError {
    pub fn new(kind: EngineErrorKind, msg: impl fmt::Display) -> Self {
        Self {
            kind,
            msg: format!("{msg:#}"),
            data: serde_json::Value::Null,
        }
    }

    pub fn invalid_transition(msg: impl fmt::Display) -> Self {
        Self::new(EngineErrorKind::InvalidTransition, msg)
    }

    pub fn record_not_found(msg: impl fmt::Display) -> Self {
        Self::new(EngineErrorKind::RecordNotFound, msg)
    }

    pub fn merkle_invalid(msg: impl fmt::Display) -> Self {
        Self::new(EngineErrorKind::MerkleInvalid, msg)
    }
}

impl From<serde_json::Error> for EngineApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(EngineErrorKind::Decode, err)
    }
}

#[cfg(feature = "axum")]
impl From<EngineApiError> for http::Response<axum::body::Body> {
    fn from(err: EngineApiError) -> Self {
        use axum::response::IntoResponse;
        err.into_response()
    }
}
