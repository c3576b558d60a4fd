//! Deployment-wide external auth provider management.
//!
//! Providers are stored in the database with their secrets sealed by
//! [`SecretCipher`]. Every endpoint here requires a site admin.

use aerosol::axum::Dep;
use axum::{
    Json, Router,
    extract::Path,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use clients::gatehouse::v2::external_auth::{
    CreateExternalAuthProviderRequest, ExternalAuthProviderConfig,
    UpdateExternalAuthProviderRequest,
};
use color_eyre::Result;
use tap::Pipe;
use tracing::{error, info, warn};

use crate::{
    api::{Body, State, error, error_detail},
    auth::SessionContext,
    crypto::{SealedSecret, SecretCipher},
    db::{
        ExternalAuthProvider, ExternalAuthProviderUpdate, InsertProviderResult,
        NewExternalAuthProvider, Postgres,
    },
};

pub mod manifest;

pub fn router() -> Router<State> {
    Router::new()
        .route("/", get(list_providers).post(create_provider))
        .route(
            "/{id}",
            get(get_provider)
                .patch(update_provider)
                .delete(delete_provider),
        )
        .nest("/github", manifest::router())
}

const NOT_SITE_ADMIN: &str = "Only site admins can manage external auth providers.";
const DUPLICATE_PROVIDER: &str = "An external auth provider with this ID already exists.";

/// Convert a stored provider into its public view. Secrets are never included.
pub fn provider_body(provider: ExternalAuthProvider) -> ExternalAuthProviderConfig {
    ExternalAuthProviderConfig::builder()
        .id(provider.id)
        .provider_type(provider.provider_type)
        .client_id(provider.client_id)
        .display_name(provider.display_name.unwrap_or_default())
        .display_icon(provider.display_icon.unwrap_or_default())
        .auth_url(provider.auth_url.unwrap_or_default())
        .token_url(provider.token_url.unwrap_or_default())
        .validate_url(provider.validate_url.unwrap_or_default())
        .scopes(provider.scopes)
        .no_refresh(provider.no_refresh)
        .device_flow(provider.device_flow)
        .regex(provider.regex.unwrap_or_default())
        .created_at(provider.created_at)
        .updated_at(provider.updated_at)
        .app_install_url(provider.app_install_url.unwrap_or_default())
        .app_installations_url(provider.app_installations_url.unwrap_or_default())
        .maybe_github_app_id(provider.github_app_id)
        .build()
}

/// Empty strings are stored as `NULL`.
pub(crate) fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

/// Seal an optional secret, treating the empty string as absent.
pub(crate) fn seal_optional(cipher: &SecretCipher, secret: &str) -> Result<Option<SealedSecret>> {
    if secret.is_empty() {
        return Ok(None);
    }
    cipher.seal(secret.as_bytes()).map(Some)
}

fn new_provider(
    cipher: &SecretCipher,
    request: CreateExternalAuthProviderRequest,
) -> Result<NewExternalAuthProvider> {
    Ok(NewExternalAuthProvider {
        client_secret: cipher.seal(request.client_secret.as_bytes())?,
        github_app_webhook_secret: seal_optional(cipher, &request.github_app_webhook_secret)?,
        github_app_private_key: seal_optional(cipher, &request.github_app_private_key)?,
        id: request.id,
        provider_type: request.provider_type,
        client_id: request.client_id,
        display_name: non_empty(request.display_name),
        display_icon: non_empty(request.display_icon),
        auth_url: non_empty(request.auth_url),
        token_url: non_empty(request.token_url),
        validate_url: non_empty(request.validate_url),
        scopes: request.scopes,
        no_refresh: request.no_refresh,
        device_flow: request.device_flow,
        regex: non_empty(request.regex),
        app_install_url: non_empty(request.app_install_url),
        app_installations_url: non_empty(request.app_installations_url),
        github_app_id: request.github_app_id,
    })
}

/// IDs of stored providers with a secret the active key cannot open.
///
/// Such providers are still listed, but were sealed under a different key
/// (or none) and cannot be used until their secrets are re-entered.
#[tracing::instrument(name = "external_auth::unreadable_providers", skip(db, cipher))]
pub async fn unreadable_providers(db: &Postgres, cipher: &SecretCipher) -> Result<Vec<String>> {
    let providers = db.list_external_auth_providers().await?;
    let unreadable = providers
        .into_iter()
        .filter(|provider| {
            std::iter::once(&provider.client_secret)
                .chain(&provider.github_app_webhook_secret)
                .chain(&provider.github_app_private_key)
                .any(|sealed| match cipher.open(sealed) {
                    Ok(_) => false,
                    Err(err) => {
                        warn!(?err, id = %provider.id, "external_auth.secret.unreadable");
                        true
                    }
                })
        })
        .map(|provider| provider.id)
        .collect();
    Ok(unreadable)
}

/// List all external auth providers.
#[tracing::instrument(skip(db, session))]
pub async fn list_providers(
    Dep(db): Dep<Postgres>,
    session: SessionContext,
) -> ListProvidersResponse {
    if !session.site_admin {
        warn!(user_id = %session.user_id, "external_auth.list.not_site_admin");
        return ListProvidersResponse::Forbidden;
    }

    match db.list_external_auth_providers().await {
        Ok(providers) => {
            info!(count = providers.len(), "external_auth.list.success");
            providers
                .into_iter()
                .map(provider_body)
                .collect::<Vec<_>>()
                .pipe(ListProvidersResponse::Success)
        }
        Err(err) => {
            error!(?err, "external_auth.list.error");
            ListProvidersResponse::Error(err.to_string())
        }
    }
}

#[derive(Debug)]
pub enum ListProvidersResponse {
    Success(Vec<ExternalAuthProviderConfig>),
    Forbidden,
    Error(String),
}

impl IntoResponse for ListProvidersResponse {
    fn into_response(self) -> axum::response::Response {
        match self {
            ListProvidersResponse::Success(list) => (StatusCode::OK, Json(list)).into_response(),
            ListProvidersResponse::Forbidden => error(StatusCode::FORBIDDEN, NOT_SITE_ADMIN),
            ListProvidersResponse::Error(detail) => error_detail(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to get external auth providers.",
                detail,
            ),
        }
    }
}

/// Get a single external auth provider.
#[tracing::instrument(skip(db, session))]
pub async fn get_provider(
    Dep(db): Dep<Postgres>,
    session: SessionContext,
    Path(id): Path<String>,
) -> GetProviderResponse {
    if !session.site_admin {
        warn!(user_id = %session.user_id, "external_auth.get.not_site_admin");
        return GetProviderResponse::Forbidden;
    }

    match db.get_external_auth_provider(&id).await {
        Ok(Some(provider)) => GetProviderResponse::Success(provider_body(provider)),
        Ok(None) => {
            warn!(%id, "external_auth.get.not_found");
            GetProviderResponse::NotFound
        }
        Err(err) => {
            error!(?err, "external_auth.get.error");
            GetProviderResponse::Error(err.to_string())
        }
    }
}

#[derive(Debug)]
pub enum GetProviderResponse {
    Success(ExternalAuthProviderConfig),
    NotFound,
    Forbidden,
    Error(String),
}

impl IntoResponse for GetProviderResponse {
    fn into_response(self) -> axum::response::Response {
        match self {
            GetProviderResponse::Success(body) => (StatusCode::OK, Json(body)).into_response(),
            GetProviderResponse::NotFound => {
                error(StatusCode::NOT_FOUND, "External auth provider not found.")
            }
            GetProviderResponse::Forbidden => error(StatusCode::FORBIDDEN, NOT_SITE_ADMIN),
            GetProviderResponse::Error(detail) => error_detail(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to get external auth provider.",
                detail,
            ),
        }
    }
}

/// Create an external auth provider.
#[tracing::instrument(skip(db, cipher, session, request), fields(id = %request.id))]
pub async fn create_provider(
    Dep(db): Dep<Postgres>,
    Dep(cipher): Dep<SecretCipher>,
    session: SessionContext,
    Body(request): Body<CreateExternalAuthProviderRequest>,
) -> CreateProviderResponse {
    if !session.site_admin {
        warn!(user_id = %session.user_id, "external_auth.create.not_site_admin");
        return CreateProviderResponse::Forbidden;
    }
    if request.id.is_empty() {
        return CreateProviderResponse::MissingId;
    }
    if request.client_id.is_empty() {
        return CreateProviderResponse::MissingClientId;
    }

    let provider = match new_provider(&cipher, request) {
        Ok(provider) => provider,
        Err(err) => {
            error!(?err, "external_auth.create.seal_error");
            return CreateProviderResponse::Error(err.to_string());
        }
    };

    match db.insert_external_auth_provider(provider).await {
        Ok(InsertProviderResult::Created(provider)) => {
            info!(
                id = %provider.id,
                provider_type = %provider.provider_type,
                encrypted = provider.client_secret.key_id.is_some(),
                "external_auth.create.success"
            );
            CreateProviderResponse::Created(provider_body(provider))
        }
        Ok(InsertProviderResult::Duplicate) => {
            warn!("external_auth.create.duplicate");
            CreateProviderResponse::Duplicate
        }
        Err(err) => {
            error!(?err, "external_auth.create.error");
            CreateProviderResponse::Error(err.to_string())
        }
    }
}

#[derive(Debug)]
pub enum CreateProviderResponse {
    Created(ExternalAuthProviderConfig),
    MissingId,
    MissingClientId,
    Duplicate,
    Forbidden,
    Error(String),
}

impl IntoResponse for CreateProviderResponse {
    fn into_response(self) -> axum::response::Response {
        match self {
            CreateProviderResponse::Created(body) => {
                (StatusCode::CREATED, Json(body)).into_response()
            }
            CreateProviderResponse::MissingId => {
                error(StatusCode::BAD_REQUEST, "Provider ID is required.")
            }
            CreateProviderResponse::MissingClientId => {
                error(StatusCode::BAD_REQUEST, "Client ID is required.")
            }
            CreateProviderResponse::Duplicate => error(StatusCode::CONFLICT, DUPLICATE_PROVIDER),
            CreateProviderResponse::Forbidden => error(StatusCode::FORBIDDEN, NOT_SITE_ADMIN),
            CreateProviderResponse::Error(detail) => error_detail(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to create external auth provider.",
                detail,
            ),
        }
    }
}

/// Partially update an external auth provider.
#[tracing::instrument(skip(db, session, request))]
pub async fn update_provider(
    Dep(db): Dep<Postgres>,
    session: SessionContext,
    Path(id): Path<String>,
    Body(request): Body<UpdateExternalAuthProviderRequest>,
) -> UpdateProviderResponse {
    if !session.site_admin {
        warn!(user_id = %session.user_id, "external_auth.update.not_site_admin");
        return UpdateProviderResponse::Forbidden;
    }

    let update = ExternalAuthProviderUpdate {
        display_name: request.display_name,
        display_icon: request.display_icon,
        scopes: request.scopes,
        no_refresh: request.no_refresh,
        device_flow: request.device_flow,
        regex: request.regex,
    };
    match db.update_external_auth_provider(&id, update).await {
        Ok(Some(provider)) => {
            info!(%id, "external_auth.update.success");
            UpdateProviderResponse::Success(provider_body(provider))
        }
        Ok(None) => {
            warn!(%id, "external_auth.update.not_found");
            UpdateProviderResponse::NotFound
        }
        Err(err) => {
            error!(?err, "external_auth.update.error");
            UpdateProviderResponse::Error(err.to_string())
        }
    }
}

#[derive(Debug)]
pub enum UpdateProviderResponse {
    Success(ExternalAuthProviderConfig),
    NotFound,
    Forbidden,
    Error(String),
}

impl IntoResponse for UpdateProviderResponse {
    fn into_response(self) -> axum::response::Response {
        match self {
            UpdateProviderResponse::Success(body) => (StatusCode::OK, Json(body)).into_response(),
            UpdateProviderResponse::NotFound => {
                error(StatusCode::NOT_FOUND, "External auth provider not found.")
            }
            UpdateProviderResponse::Forbidden => error(StatusCode::FORBIDDEN, NOT_SITE_ADMIN),
            UpdateProviderResponse::Error(detail) => error_detail(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to update external auth provider.",
                detail,
            ),
        }
    }
}

/// Delete an external auth provider.
#[tracing::instrument(skip(db, session))]
pub async fn delete_provider(
    Dep(db): Dep<Postgres>,
    session: SessionContext,
    Path(id): Path<String>,
) -> DeleteProviderResponse {
    if !session.site_admin {
        warn!(user_id = %session.user_id, "external_auth.delete.not_site_admin");
        return DeleteProviderResponse::Forbidden;
    }

    match db.delete_external_auth_provider(&id).await {
        Ok(true) => {
            info!(%id, "external_auth.delete.success");
            DeleteProviderResponse::Success
        }
        Ok(false) => {
            warn!(%id, "external_auth.delete.not_found");
            DeleteProviderResponse::NotFound
        }
        Err(err) => {
            error!(?err, "external_auth.delete.error");
            DeleteProviderResponse::Error(err.to_string())
        }
    }
}

#[derive(Debug)]
pub enum DeleteProviderResponse {
    Success,
    NotFound,
    Forbidden,
    Error(String),
}

impl IntoResponse for DeleteProviderResponse {
    fn into_response(self) -> axum::response::Response {
        match self {
            DeleteProviderResponse::Success => StatusCode::NO_CONTENT.into_response(),
            DeleteProviderResponse::NotFound => {
                error(StatusCode::NOT_FOUND, "External auth provider not found.")
            }
            DeleteProviderResponse::Forbidden => error(StatusCode::FORBIDDEN, NOT_SITE_ADMIN),
            DeleteProviderResponse::Error(detail) => error_detail(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to delete external auth provider.",
                detail,
            ),
        }
    }
}
