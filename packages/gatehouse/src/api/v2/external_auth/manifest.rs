//! GitHub App creation through the manifest flow.
//!
//! 1. A site admin initiates: we store a short-lived state and hand back a
//!    GitHub URL carrying the app manifest.
//! 2. GitHub redirects the browser to the callback with a code; we bounce it
//!    to the `redirect_uri` recorded with the state.
//! 3. The frontend completes: we consume the state, convert the code into
//!    app credentials, and store them as a `github` provider.

use aerosol::axum::Dep;
use axum::{
    Json, Router,
    extract::Query,
    http::{StatusCode, header::LOCATION},
    response::IntoResponse,
    routing::post,
};
use clients::gatehouse::v2::external_auth::{
    ExternalAuthProviderConfig, GitHubAppManifestCallbackRequest, GitHubAppManifestRequest,
    GitHubAppManifestResponse,
};
use color_eyre::Result;
use serde::Deserialize;
use time::{Duration, OffsetDateTime};
use tracing::{error, info, warn};
use url::Url;

use crate::{
    api::{
        Body, State, error, error_detail,
        v2::external_auth::{non_empty, provider_body, seal_optional},
    },
    auth::SessionContext,
    crypto::{SecretCipher, generate_manifest_state},
    db::{InsertProviderResult, NewExternalAuthProvider, Postgres},
    github::{AppCredentials, Conversion, GitHubApps},
};

/// How long an initiated manifest flow stays completable.
pub const STATE_TTL: Duration = Duration::minutes(10);

const GITHUB_ICON: &str = "/icon/github.svg";

pub fn router() -> Router<State> {
    Router::new()
        .route("/manifest", post(initiate))
        .route("/callback", post(complete).get(callback))
}

fn github_provider(
    cipher: &SecretCipher,
    github: &GitHubApps,
    app: AppCredentials,
) -> Result<NewExternalAuthProvider> {
    Ok(NewExternalAuthProvider {
        id: format!("github-{}", app.slug),
        provider_type: String::from("github"),
        client_id: app.client_id,
        client_secret: cipher.seal(app.client_secret.as_bytes())?,
        display_name: non_empty(app.name),
        display_icon: Some(String::from(GITHUB_ICON)),
        auth_url: None,
        token_url: None,
        validate_url: None,
        scopes: Vec::new(),
        no_refresh: true,
        device_flow: false,
        regex: None,
        app_install_url: Some(format!(
            "{}/installations/new",
            app.html_url.trim_end_matches('/')
        )),
        app_installations_url: Some(github.installations_url()),
        github_app_id: Some(app.id),
        github_app_webhook_secret: seal_optional(
            cipher,
            app.webhook_secret.as_deref().unwrap_or_default(),
        )?,
        github_app_private_key: seal_optional(cipher, &app.pem)?,
    })
}

/// Start creating a GitHub App from a manifest.
#[tracing::instrument(skip(db, github, session))]
pub async fn initiate(
    Dep(db): Dep<Postgres>,
    Dep(github): Dep<GitHubApps>,
    session: SessionContext,
    Body(request): Body<GitHubAppManifestRequest>,
) -> InitiateResponse {
    if !session.site_admin {
        warn!(user_id = %session.user_id, "manifest.initiate.not_site_admin");
        return InitiateResponse::Forbidden;
    }
    let Some(access_url) = github.access_url() else {
        warn!("manifest.initiate.no_access_url");
        return InitiateResponse::Unavailable;
    };
    if request.redirect_uri.is_empty() {
        return InitiateResponse::MissingRedirect;
    }
    if let Err(err) = Url::parse(&request.redirect_uri) {
        return InitiateResponse::InvalidRedirect(err.to_string());
    }

    let state = generate_manifest_state();
    let expires_at = OffsetDateTime::now_utc() + STATE_TTL;
    if let Err(err) = db
        .store_manifest_state(&state, &request.redirect_uri, expires_at)
        .await
    {
        error!(?err, "manifest.initiate.store_error");
        return InitiateResponse::StoreError(err.to_string());
    }

    let manifest = github.manifest(access_url, &state);
    match github.creation_url(request.owner.as_deref(), &manifest) {
        Ok(url) => {
            info!(owner = ?request.owner, "manifest.initiate.success");
            InitiateResponse::Success(
                GitHubAppManifestResponse::builder()
                    .url(url.to_string())
                    .state(state)
                    .build(),
            )
        }
        Err(err) => {
            error!(?err, "manifest.initiate.encode_error");
            InitiateResponse::EncodeError(err.to_string())
        }
    }
}

#[derive(Debug)]
pub enum InitiateResponse {
    Success(GitHubAppManifestResponse),
    MissingRedirect,
    InvalidRedirect(String),
    Unavailable,
    Forbidden,
    StoreError(String),
    EncodeError(String),
}

impl IntoResponse for InitiateResponse {
    fn into_response(self) -> axum::response::Response {
        match self {
            InitiateResponse::Success(body) => (StatusCode::OK, Json(body)).into_response(),
            InitiateResponse::MissingRedirect => {
                error(StatusCode::BAD_REQUEST, "Redirect URI is required.")
            }
            InitiateResponse::InvalidRedirect(detail) => error_detail(
                StatusCode::BAD_REQUEST,
                "Redirect URI must be an absolute URL.",
                detail,
            ),
            InitiateResponse::Unavailable => error(
                StatusCode::SERVICE_UNAVAILABLE,
                "An access URL must be configured to create a GitHub App.",
            ),
            InitiateResponse::Forbidden => error(
                StatusCode::FORBIDDEN,
                "Only site admins can manage external auth providers.",
            ),
            InitiateResponse::StoreError(detail) => error_detail(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to store manifest state.",
                detail,
            ),
            InitiateResponse::EncodeError(detail) => error_detail(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to encode manifest.",
                detail,
            ),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub state: String,
}

/// Receive GitHub's browser redirect and forward it to the frontend.
///
/// The state is only checked here; it is consumed on completion.
#[tracing::instrument(skip(db, params))]
pub async fn callback(
    Dep(db): Dep<Postgres>,
    Query(params): Query<CallbackParams>,
) -> CallbackResponse {
    if params.code.is_empty() || params.state.is_empty() {
        return CallbackResponse::MissingParams;
    }

    let state = match db.get_manifest_state(&params.state).await {
        Ok(Some(state)) => state,
        Ok(None) => {
            warn!("manifest.callback.invalid_state");
            return CallbackResponse::InvalidState;
        }
        Err(err) => {
            error!(?err, "manifest.callback.state_error");
            return CallbackResponse::Error(err.to_string());
        }
    };

    let mut location = match Url::parse(&state.redirect_uri) {
        Ok(url) => url,
        Err(err) => {
            error!(?err, "manifest.callback.stored_redirect_invalid");
            return CallbackResponse::Error(err.to_string());
        }
    };
    location
        .query_pairs_mut()
        .append_pair("code", &params.code)
        .append_pair("state", &params.state);

    info!("manifest.callback.redirect");
    CallbackResponse::Redirect(location)
}

#[derive(Debug)]
pub enum CallbackResponse {
    Redirect(Url),
    MissingParams,
    InvalidState,
    Error(String),
}

impl IntoResponse for CallbackResponse {
    fn into_response(self) -> axum::response::Response {
        match self {
            CallbackResponse::Redirect(url) => {
                (StatusCode::TEMPORARY_REDIRECT, [(LOCATION, url.to_string())]).into_response()
            }
            CallbackResponse::MissingParams => {
                error(StatusCode::BAD_REQUEST, "Code and state are required.")
            }
            CallbackResponse::InvalidState => {
                error(StatusCode::BAD_REQUEST, "Invalid or expired state token.")
            }
            CallbackResponse::Error(detail) => error_detail(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to validate state.",
                detail,
            ),
        }
    }
}

/// Finish creating a GitHub App and store it as an external auth provider.
#[tracing::instrument(skip(db, cipher, github, session, request))]
pub async fn complete(
    Dep(db): Dep<Postgres>,
    Dep(cipher): Dep<SecretCipher>,
    Dep(github): Dep<GitHubApps>,
    session: SessionContext,
    Body(request): Body<GitHubAppManifestCallbackRequest>,
) -> CompleteResponse {
    if !session.site_admin {
        warn!(user_id = %session.user_id, "manifest.complete.not_site_admin");
        return CompleteResponse::Forbidden;
    }
    if request.code.is_empty() || request.state.is_empty() {
        return CompleteResponse::MissingParams;
    }

    match db.consume_manifest_state(&request.state).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            warn!("manifest.complete.invalid_state");
            return CompleteResponse::InvalidState;
        }
        Err(err) => {
            error!(?err, "manifest.complete.state_error");
            return CompleteResponse::StateError(err.to_string());
        }
    }

    let app = match github.convert(&request.code).await {
        Ok(Conversion::Created(app)) => app,
        Ok(Conversion::Rejected { status, body }) => {
            warn!(%status, "manifest.complete.rejected");
            return CompleteResponse::Rejected(body);
        }
        Ok(Conversion::Undecodable(detail)) => {
            error!(%detail, "manifest.complete.undecodable");
            return CompleteResponse::Undecodable(detail);
        }
        Err(err) => {
            error!(?err, "manifest.complete.exchange_error");
            return CompleteResponse::ExchangeError(err.to_string());
        }
    };

    let provider = match github_provider(&cipher, &github, app) {
        Ok(provider) => provider,
        Err(err) => {
            error!(?err, "manifest.complete.seal_error");
            return CompleteResponse::StoreError(err.to_string());
        }
    };

    match db.insert_external_auth_provider(provider).await {
        Ok(InsertProviderResult::Created(provider)) => {
            info!(
                id = %provider.id,
                github_app_id = ?provider.github_app_id,
                "manifest.complete.success"
            );
            info!(id = %provider.id, "manifest.complete.restart_required");
            CompleteResponse::Created(provider_body(provider))
        }
        Ok(InsertProviderResult::Duplicate) => {
            warn!("manifest.complete.duplicate");
            CompleteResponse::Duplicate
        }
        Err(err) => {
            error!(?err, "manifest.complete.store_error");
            CompleteResponse::StoreError(err.to_string())
        }
    }
}

#[derive(Debug)]
pub enum CompleteResponse {
    Created(ExternalAuthProviderConfig),
    MissingParams,
    InvalidState,
    Rejected(String),
    Undecodable(String),
    ExchangeError(String),
    StateError(String),
    StoreError(String),
    Duplicate,
    Forbidden,
}

impl IntoResponse for CompleteResponse {
    fn into_response(self) -> axum::response::Response {
        match self {
            CompleteResponse::Created(body) => (StatusCode::CREATED, Json(body)).into_response(),
            CompleteResponse::MissingParams => {
                error(StatusCode::BAD_REQUEST, "Code and state are required.")
            }
            CompleteResponse::InvalidState => {
                error(StatusCode::BAD_REQUEST, "Invalid or expired state token.")
            }
            CompleteResponse::Rejected(body) => error_detail(
                StatusCode::BAD_REQUEST,
                "GitHub rejected the code exchange.",
                body,
            ),
            CompleteResponse::Undecodable(detail) => error_detail(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to decode GitHub response.",
                detail,
            ),
            CompleteResponse::ExchangeError(detail) => error_detail(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to exchange code with GitHub.",
                detail,
            ),
            CompleteResponse::StateError(detail) => error_detail(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to validate state.",
                detail,
            ),
            CompleteResponse::StoreError(detail) => error_detail(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to store external auth provider.",
                detail,
            ),
            CompleteResponse::Duplicate => error(
                StatusCode::CONFLICT,
                "An external auth provider with this ID already exists.",
            ),
            CompleteResponse::Forbidden => error(
                StatusCode::FORBIDDEN,
                "Only site admins can manage external auth providers.",
            ),
        }
    }
}
