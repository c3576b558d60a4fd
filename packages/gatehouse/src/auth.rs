//! Request authentication.
//!
//! Callers authenticate with `Authorization: Bearer <session token>`. The
//! [`SessionContext`] extractor validates the token against the database and
//! rejects the request with `401 Unauthorized` if it is missing, malformed,
//! expired, or revoked.

use aerosol::axum::Dep;
use axum::{
    Json,
    extract::FromRequestParts,
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
};
use clients::{
    ErrorResponse,
    gatehouse::v2::{AccessLevel, UserId, WorkspaceId},
};
use derive_more::Debug;
use tracing::{error, warn};

use crate::{
    api::{State, error, error_detail},
    db::{Postgres, WorkspaceAccess},
};

/// A plaintext session token provided by the client.
///
/// Only the SHA256 hash of the token is stored; see [`crate::crypto::TokenHash`].
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
#[debug("SessionToken(..)")]
pub struct SessionToken(String);

impl SessionToken {
    /// Create a new session token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// View the plaintext token.
    pub fn expose(&self) -> &str {
        &self.0
    }

    fn from_header(parts: &Parts) -> Option<Self> {
        let header = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
        let token = match header.strip_prefix("Bearer") {
            Some(token) => token.trim(),
            None => header.trim(),
        };
        if token.is_empty() {
            None
        } else {
            Some(Self::new(token))
        }
    }
}

/// The authenticated caller of a request.
#[derive(Clone, Debug)]
pub struct SessionContext {
    pub user_id: UserId,
    pub username: String,
    pub email: String,
    pub name: Option<String>,
    pub site_admin: bool,
}

impl SessionContext {
    /// The name shown to other users, e.g. in invitation emails.
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ if !self.username.is_empty() => &self.username,
            _ => "A team member",
        }
    }

    /// Require at least `required` access to a workspace.
    #[tracing::instrument(name = "SessionContext::require_workspace", skip(self, db))]
    pub async fn require_workspace(
        &self,
        db: &Postgres,
        workspace_id: WorkspaceId,
        required: AccessLevel,
    ) -> Result<(), WorkspaceDenied> {
        match db.workspace_access(workspace_id, self.user_id).await {
            Ok(access) if access.allows(required) => Ok(()),
            Ok(WorkspaceAccess::UnknownWorkspace) => {
                warn!(%workspace_id, "workspace.access.unknown_workspace");
                Err(WorkspaceDenied::UnknownWorkspace)
            }
            Ok(access) => {
                warn!(
                    user_id = %self.user_id,
                    %workspace_id,
                    ?access,
                    %required,
                    "workspace.access.denied"
                );
                Err(WorkspaceDenied::Insufficient)
            }
            Err(err) => {
                error!(?err, "workspace.access.error");
                Err(WorkspaceDenied::Error(err.to_string()))
            }
        }
    }
}

/// A failed workspace access check.
#[derive(Debug)]
pub enum WorkspaceDenied {
    UnknownWorkspace,
    Insufficient,
    Error(String),
}

impl WorkspaceDenied {
    /// Render the refusal. `forbidden` is the message shown when the caller
    /// lacks the required access level.
    pub fn render(self, forbidden: &str) -> Response {
        match self {
            WorkspaceDenied::UnknownWorkspace => {
                error(StatusCode::NOT_FOUND, "Workspace not found.")
            }
            WorkspaceDenied::Insufficient => error(StatusCode::FORBIDDEN, forbidden),
            WorkspaceDenied::Error(detail) => error_detail(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to check workspace access.",
                detail,
            ),
        }
    }
}

impl FromRequestParts<State> for SessionContext {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &State) -> Result<Self, Self::Rejection> {
        let Some(token) = SessionToken::from_header(parts) else {
            return Err(unauthorized());
        };

        let Dep(db) = Dep::<Postgres>::from_request_parts(parts, state)
            .await
            .map_err(IntoResponse::into_response)?;

        match db.validate_session(&token).await {
            Ok(Some(session)) => Ok(session),
            Ok(None) => {
                warn!("auth.session.invalid");
                Err(unauthorized())
            }
            Err(err) => {
                error!(?err, "auth.session.error");
                Err((
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse::detailed(
                        "Failed to validate session.",
                        err.to_string(),
                    )),
                )
                    .into_response())
            }
        }
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse::message(
            "You must be signed in to perform this action.",
        )),
    )
        .into_response()
}
