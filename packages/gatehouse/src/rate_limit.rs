//! Rate limiting for endpoints that take a bearer secret in the path.
//!
//! Uses tower-governor keyed on the client IP address.

use std::sync::Arc;

use tower_governor::{
    GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor,
};

/// Create a rate limiter layer for invitation token endpoints.
///
/// Accepting or declining an invitation requires guessing a token, so these
/// endpoints are limited to slow down enumeration.
///
/// **Configuration:**
/// - 10 requests per minute per IP address
/// - Uses SmartIpKeyExtractor which checks x-forwarded-for, x-real-ip, and
///   forwarded headers before falling back to peer IP
pub fn invitation() -> GovernorLayer<
    SmartIpKeyExtractor,
    governor::middleware::NoOpMiddleware<governor::clock::QuantaInstant>,
    axum::body::Body,
> {
    let config = GovernorConfigBuilder::default()
        .per_second(6) // ~10 per minute: replenish 1 every 6 seconds
        .burst_size(10)
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .expect("valid governor config");

    GovernorLayer::new(Arc::new(config))
}
