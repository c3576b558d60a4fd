//! API endpoint handlers for the service.
//!
//! ## Dependency injection
//!
//! We use [`aerosol`][^1] to manage dependencies and inject them into handlers.
//! Reference [`State`] for the list of dependencies; note that when providing
//! dependencies that are in this required list you need to provide them in
//! reverse order of the list.
//!
//! Items that are in the list can be extracted in handlers using the
//! [`Dep`](aerosol::axum::Dep) extractor.
//!
//! [^1]: https://docs.rs/aerosol
//!
//! ## Response types
//!
//! Most handlers return a response type that implements [`IntoResponse`](axum::response::IntoResponse)[^2].
//! This is a trait that allows handlers to return a response without having to
//! manually implement the response type.
//!
//! We do it this way instead of just returning a more generic response type
//! because it supports better documentation and makes it easier to realize if
//! you're writing backwards-incompatible changes to the API.
//!
//! Every non-2xx response carries a JSON [`ErrorResponse`] body.
//!
//! [^2]: https://docs.rs/axum/latest/axum/response/trait.IntoResponse.html

use std::time::Duration;

use aerosol::Aero;
use axum::{
    Json, Router,
    extract::{FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use clients::ErrorResponse;
use serde::de::DeserializeOwned;
use tower::ServiceBuilder;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

pub mod health;
pub mod v2;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_BODY_SIZE: usize = 1024 * 1024;

pub type State = Aero![
    crate::db::Postgres,
    crate::notify::Notifier,
    crate::crypto::SecretCipher,
    crate::github::GitHubApps,
];

pub fn router(state: State) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT));

    Router::new()
        .route("/health", get(health::handle))
        .nest("/api/v2", v2::router())
        .layer(middleware)
        .with_state(state)
}

/// Render an error with only a message.
pub fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(ErrorResponse::message(message))).into_response()
}

/// Render an error with a message and diagnostic detail.
pub fn error_detail(status: StatusCode, message: &str, detail: impl Into<String>) -> Response {
    (status, Json(ErrorResponse::detailed(message, detail))).into_response()
}

/// A JSON request body.
///
/// Unlike [`axum::Json`], a body that fails to parse is rejected with
/// `400 Bad Request` and an [`ErrorResponse`] payload.
#[derive(Debug)]
pub struct Body<T>(pub T);

impl<T, S> FromRequest<S> for Body<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(error_detail(
                StatusCode::BAD_REQUEST,
                "Invalid request body.",
                rejection.body_text(),
            )),
        }
    }
}

#[cfg(test)]
pub const TEST_ACCESS_URL: &str = "https://gate.example.com";

#[cfg(test)]
pub const TEST_ENCRYPTION_KEY: &str =
    "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

/// Build an in-process server over `pool` with email captured on the returned
/// receiver and GitHub pointed at an address nothing listens on.
#[cfg(test)]
pub async fn test_server(
    pool: sqlx::PgPool,
) -> color_eyre::Result<(
    axum_test::TestServer,
    flume::Receiver<crate::email::InvitationEmail>,
)> {
    let unreachable = url::Url::parse("http://127.0.0.1:9")?;
    test_server_with_github(pool, unreachable).await
}

/// Like [`test_server`], with GitHub's web and API URLs set to `github`.
#[cfg(test)]
pub async fn test_server_with_github(
    pool: sqlx::PgPool,
    github: url::Url,
) -> color_eyre::Result<(
    axum_test::TestServer,
    flume::Receiver<crate::email::InvitationEmail>,
)> {
    use color_eyre::eyre::eyre;
    use url::Url;

    let access_url = Url::parse(TEST_ACCESS_URL)?;
    let (notifier, emails) = crate::notify::Notifier::channel(access_url.clone());
    let github = crate::github::GitHubApps::new(github.clone(), github, Some(access_url))?;
    let cipher = crate::crypto::SecretCipher::from_hex(TEST_ENCRYPTION_KEY)?;

    let state = Aero::new()
        .with(github)
        .with(cipher)
        .with(notifier)
        .with(crate::db::Postgres { pool });
    let server = axum_test::TestServer::new(router(state))
        .map_err(|err| eyre!("create test server: {err}"))?;
    Ok((server, emails))
}
