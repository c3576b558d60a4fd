//! Shared client library for API types and HTTP clients.
//!
//! This library provides type definitions and an HTTP client implementation
//! for the Gatehouse API. Types are always available, while HTTP client code
//! is gated behind the `client` feature.
//!
//! ## Use of `#[non_exhaustive]`
//!
//! We use `#[non_exhaustive]` on structs and enums to prevent users manually
//! constructing the types while still allowing their fields to be `pub` for
//! reading. The intention here is that users must generally construct the types
//! either by:
//! - Using constructors on the types
//! - Using builder methods
//! - Using deserialization
//!
//! We do this because some types in this module may contain invariants that
//! need to be upheld, and it's easier to ensure that all types follow these
//! guidelines in the module than do it piecemeal.

use bon::Builder;
use derive_more::Display;
use serde::{Deserialize, Serialize};

pub mod gatehouse;

/// The latest Gatehouse client version.
#[cfg(feature = "client")]
pub type Gatehouse = gatehouse::v2::Client;

/// The structured error payload returned by every non-2xx API response.
#[derive(Clone, Debug, PartialEq, Eq, Display, Serialize, Deserialize, Builder)]
#[display("{message}")]
#[non_exhaustive]
pub struct ErrorResponse {
    /// A human readable description of what went wrong.
    #[builder(into)]
    pub message: String,

    /// Optional diagnostic detail, usually the text of an underlying error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub detail: Option<String>,
}

impl ErrorResponse {
    /// Create an error payload with only a message.
    pub fn message(message: impl Into<String>) -> Self {
        Self::builder().message(message).build()
    }

    /// Create an error payload with a message and diagnostic detail.
    pub fn detailed(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::builder().message(message).detail(detail).build()
    }
}
