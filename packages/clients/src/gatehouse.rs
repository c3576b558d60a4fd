//! Gatehouse API client types and HTTP client.

pub mod v2;
