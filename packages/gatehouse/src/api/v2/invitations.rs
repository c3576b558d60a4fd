//! Workspace invitation endpoints.
//!
//! Workspace admins create, list, and cancel invitations; invitees look an
//! invitation up by its token and accept or decline it.

use aerosol::axum::Dep;
use axum::{
    Json, Router,
    extract::Path,
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
};
use clients::gatehouse::v2::{
    AccessLevel, InvitationId, InvitationStatus, WorkspaceId,
    collaborators::WorkspaceCollaborator,
    invitations::{CreateWorkspaceInvitationRequest, WorkspaceInvitation},
};
use lazy_regex::regex_is_match;
use tap::Pipe;
use time::{Duration, OffsetDateTime};
use tracing::{error, info, warn};

use crate::{
    api::{Body, State, error, error_detail, v2::collaborators::collaborator_body},
    auth::{SessionContext, WorkspaceDenied},
    crypto::generate_invitation_token,
    db::{
        AcceptInvitationResult, CancelInvitationResult, DeclineInvitationResult, Invitation,
        NewInvitation, Postgres,
    },
    notify::{InvitationCreated, Notifier},
    rate_limit,
};

/// How long an invitation stays acceptable.
pub const INVITATION_TTL: Duration = Duration::days(7);

pub fn workspace_router() -> Router<State> {
    Router::new()
        .route("/{workspace}/invitations", post(create_invitation))
        .route("/{workspace}/invitations", get(list_invitations))
        .route(
            "/{workspace}/invitations/{invitation}",
            delete(cancel_invitation),
        )
}

pub fn router() -> Router<State> {
    let respond = Router::new()
        .route("/{token}/accept", post(accept_invitation))
        .route("/{token}/decline", post(decline_invitation))
        .layer(rate_limit::invitation());

    Router::new()
        .route("/{token}", get(get_invitation))
        .merge(respond)
}

/// Whether `email` looks like `local@domain.tld`.
pub fn is_valid_email(email: &str) -> bool {
    regex_is_match!(r"^[^\s@]+@[^\s@]+\.[^\s@]+$", email)
}

/// Convert a stored invitation into its API form. The token is only included
/// when `reveal_token` is set.
pub fn invitation_body(invitation: Invitation, reveal_token: bool) -> WorkspaceInvitation {
    let token = if reveal_token {
        invitation.token
    } else {
        String::new()
    };
    WorkspaceInvitation::builder()
        .id(invitation.id)
        .workspace_id(invitation.workspace_id)
        .inviter_id(invitation.inviter_id)
        .email(invitation.email)
        .access_level(invitation.access_level)
        .token(token)
        .status(invitation.status)
        .expires_at(invitation.expires_at)
        .created_at(invitation.created_at)
        .maybe_responded_at(invitation.responded_at)
        .inviter_username(invitation.inviter_username)
        .workspace_name(invitation.workspace_name)
        .build()
}

/// Invite an email address to collaborate on a workspace.
///
/// Requires admin access to the workspace. The response is the only place the
/// invitation token is ever returned.
#[tracing::instrument(skip(db, notifier, session))]
pub async fn create_invitation(
    Dep(db): Dep<Postgres>,
    Dep(notifier): Dep<Notifier>,
    session: SessionContext,
    Path(workspace_id): Path<i64>,
    Body(request): Body<CreateWorkspaceInvitationRequest>,
) -> CreateInvitationResponse {
    let workspace_id = WorkspaceId::from_i64(workspace_id);

    if let Err(denied) = session
        .require_workspace(&db, workspace_id, AccessLevel::Admin)
        .await
    {
        return CreateInvitationResponse::Denied(denied);
    }

    let email = request.email.trim();
    if !is_valid_email(email) {
        return CreateInvitationResponse::InvalidEmail;
    }

    let token = generate_invitation_token();
    let invitation = db
        .create_invitation(NewInvitation {
            workspace_id,
            inviter_id: session.user_id,
            email,
            access_level: request.access_level,
            token: &token,
            expires_at: OffsetDateTime::now_utc() + INVITATION_TTL,
        })
        .await;
    let invitation = match invitation {
        Ok(invitation) => invitation,
        Err(err) => {
            error!(?err, "invitations.create.error");
            return CreateInvitationResponse::Error(err.to_string());
        }
    };

    notifier.invitation_created(InvitationCreated {
        email: &invitation.email,
        token: &invitation.token,
        inviter_name: session.display_name(),
        workspace_name: &invitation.workspace_name,
        access_level: invitation.access_level,
        expires_at: invitation.expires_at,
    });

    info!(
        workspace_id = %workspace_id,
        invitation_id = %invitation.id,
        "invitations.create.success"
    );
    CreateInvitationResponse::Created(invitation_body(invitation, true))
}

#[derive(Debug)]
pub enum CreateInvitationResponse {
    Created(WorkspaceInvitation),
    InvalidEmail,
    Denied(WorkspaceDenied),
    Error(String),
}

impl IntoResponse for CreateInvitationResponse {
    fn into_response(self) -> axum::response::Response {
        match self {
            CreateInvitationResponse::Created(body) => {
                (StatusCode::CREATED, Json(body)).into_response()
            }
            CreateInvitationResponse::InvalidEmail => {
                error(StatusCode::BAD_REQUEST, "Invalid email address.")
            }
            CreateInvitationResponse::Denied(denied) => {
                denied.render("Only workspace admins can invite collaborators.")
            }
            CreateInvitationResponse::Error(detail) => error_detail(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to create invitation.",
                detail,
            ),
        }
    }
}

/// List every invitation for a workspace, newest first. Tokens are redacted.
#[tracing::instrument(skip(db, session))]
pub async fn list_invitations(
    Dep(db): Dep<Postgres>,
    session: SessionContext,
    Path(workspace_id): Path<i64>,
) -> ListInvitationsResponse {
    let workspace_id = WorkspaceId::from_i64(workspace_id);

    if let Err(denied) = session
        .require_workspace(&db, workspace_id, AccessLevel::Admin)
        .await
    {
        return ListInvitationsResponse::Denied(denied);
    }

    match db.list_invitations(workspace_id).await {
        Ok(invitations) => {
            info!(
                workspace_id = %workspace_id,
                count = invitations.len(),
                "invitations.list.success"
            );
            invitations
                .into_iter()
                .map(|invitation| invitation_body(invitation, false))
                .collect::<Vec<_>>()
                .pipe(ListInvitationsResponse::Success)
        }
        Err(err) => {
            error!(?err, "invitations.list.error");
            ListInvitationsResponse::Error(err.to_string())
        }
    }
}

#[derive(Debug)]
pub enum ListInvitationsResponse {
    Success(Vec<WorkspaceInvitation>),
    Denied(WorkspaceDenied),
    Error(String),
}

impl IntoResponse for ListInvitationsResponse {
    fn into_response(self) -> axum::response::Response {
        match self {
            ListInvitationsResponse::Success(list) => (StatusCode::OK, Json(list)).into_response(),
            ListInvitationsResponse::Denied(denied) => {
                denied.render("Only workspace admins can view invitations.")
            }
            ListInvitationsResponse::Error(detail) => error_detail(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to list invitations.",
                detail,
            ),
        }
    }
}

/// Cancel a pending invitation.
///
/// Canceling an invitation that is already canceled succeeds without change;
/// an invitation resolved any other way cannot be canceled.
#[tracing::instrument(skip(db, session))]
pub async fn cancel_invitation(
    Dep(db): Dep<Postgres>,
    session: SessionContext,
    Path((workspace_id, invitation_id)): Path<(i64, i64)>,
) -> CancelInvitationResponse {
    let workspace_id = WorkspaceId::from_i64(workspace_id);
    let invitation_id = InvitationId::from_i64(invitation_id);

    if let Err(denied) = session
        .require_workspace(&db, workspace_id, AccessLevel::Admin)
        .await
    {
        return CancelInvitationResponse::Denied(denied);
    }

    match db.cancel_invitation(workspace_id, invitation_id).await {
        Ok(CancelInvitationResult::Canceled) => {
            info!(
                workspace_id = %workspace_id,
                invitation_id = %invitation_id,
                "invitations.cancel.success"
            );
            CancelInvitationResponse::Success
        }
        Ok(CancelInvitationResult::AlreadyCanceled) => {
            info!(invitation_id = %invitation_id, "invitations.cancel.already_canceled");
            CancelInvitationResponse::Success
        }
        Ok(CancelInvitationResult::NotPending(status)) => {
            warn!(invitation_id = %invitation_id, %status, "invitations.cancel.not_pending");
            CancelInvitationResponse::NotPending(status)
        }
        Ok(CancelInvitationResult::NotFound) => {
            warn!(invitation_id = %invitation_id, "invitations.cancel.not_found");
            CancelInvitationResponse::NotFound
        }
        Err(err) => {
            error!(?err, "invitations.cancel.error");
            CancelInvitationResponse::Error(err.to_string())
        }
    }
}

#[derive(Debug)]
pub enum CancelInvitationResponse {
    Success,
    NotPending(InvitationStatus),
    NotFound,
    Denied(WorkspaceDenied),
    Error(String),
}

impl IntoResponse for CancelInvitationResponse {
    fn into_response(self) -> axum::response::Response {
        match self {
            CancelInvitationResponse::Success => StatusCode::NO_CONTENT.into_response(),
            CancelInvitationResponse::NotPending(status) => error(
                StatusCode::CONFLICT,
                &format!("Invitation is already {status}."),
            ),
            CancelInvitationResponse::NotFound => {
                error(StatusCode::NOT_FOUND, "Invitation not found.")
            }
            CancelInvitationResponse::Denied(denied) => {
                denied.render("Only workspace admins can cancel invitations.")
            }
            CancelInvitationResponse::Error(detail) => error_detail(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to cancel invitation.",
                detail,
            ),
        }
    }
}

/// Look up an invitation by its token (no authentication required).
///
/// This backs the page an invitee lands on from the email link, so it
/// includes the workspace name and the inviter's username.
#[tracing::instrument(skip(db, token))]
pub async fn get_invitation(
    Dep(db): Dep<Postgres>,
    Path(token): Path<String>,
) -> GetInvitationResponse {
    match db.get_invitation_by_token(&token).await {
        Ok(Some(invitation)) => {
            info!(invitation_id = %invitation.id, "invitations.get.success");
            GetInvitationResponse::Success(invitation_body(invitation, false))
        }
        Ok(None) => {
            warn!("invitations.get.not_found");
            GetInvitationResponse::NotFound
        }
        Err(err) => {
            error!(?err, "invitations.get.error");
            GetInvitationResponse::Error(err.to_string())
        }
    }
}

#[derive(Debug)]
pub enum GetInvitationResponse {
    Success(WorkspaceInvitation),
    NotFound,
    Error(String),
}

impl IntoResponse for GetInvitationResponse {
    fn into_response(self) -> axum::response::Response {
        match self {
            GetInvitationResponse::Success(body) => (StatusCode::OK, Json(body)).into_response(),
            GetInvitationResponse::NotFound => {
                error(StatusCode::NOT_FOUND, "Invitation not found.")
            }
            GetInvitationResponse::Error(detail) => error_detail(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to get invitation.",
                detail,
            ),
        }
    }
}

/// Accept an invitation and become a collaborator on its workspace.
///
/// The caller's email must match the email the invitation was sent to.
#[tracing::instrument(skip(db, session, token))]
pub async fn accept_invitation(
    Dep(db): Dep<Postgres>,
    session: SessionContext,
    Path(token): Path<String>,
) -> AcceptInvitationResponse {
    match db.accept_invitation(&token, &session).await {
        Ok(AcceptInvitationResult::Accepted(collaborator)) => {
            info!(
                user_id = %session.user_id,
                workspace_id = %collaborator.workspace_id,
                access_level = %collaborator.access_level,
                "invitations.accept.success"
            );
            AcceptInvitationResponse::Success(collaborator_body(collaborator))
        }
        Ok(AcceptInvitationResult::NotFound) => {
            warn!(user_id = %session.user_id, "invitations.accept.not_found");
            AcceptInvitationResponse::NotFound
        }
        Ok(AcceptInvitationResult::NotPending(status)) => {
            warn!(user_id = %session.user_id, %status, "invitations.accept.not_pending");
            AcceptInvitationResponse::NotPending(status)
        }
        Ok(AcceptInvitationResult::Expired) => {
            warn!(user_id = %session.user_id, "invitations.accept.expired");
            AcceptInvitationResponse::Expired
        }
        Ok(AcceptInvitationResult::EmailMismatch) => {
            warn!(user_id = %session.user_id, "invitations.accept.email_mismatch");
            AcceptInvitationResponse::EmailMismatch
        }
        Ok(AcceptInvitationResult::AlreadyCollaborator) => {
            warn!(user_id = %session.user_id, "invitations.accept.already_collaborator");
            AcceptInvitationResponse::AlreadyCollaborator
        }
        Err(err) => {
            error!(?err, "invitations.accept.error");
            AcceptInvitationResponse::Error(err.to_string())
        }
    }
}

#[derive(Debug)]
pub enum AcceptInvitationResponse {
    Success(WorkspaceCollaborator),
    NotFound,
    NotPending(InvitationStatus),
    Expired,
    EmailMismatch,
    AlreadyCollaborator,
    Error(String),
}

impl IntoResponse for AcceptInvitationResponse {
    fn into_response(self) -> axum::response::Response {
        match self {
            AcceptInvitationResponse::Success(body) => (StatusCode::OK, Json(body)).into_response(),
            AcceptInvitationResponse::NotFound => {
                error(StatusCode::NOT_FOUND, "Invitation not found.")
            }
            AcceptInvitationResponse::NotPending(status) => {
                error(StatusCode::CONFLICT, &format!("Invitation is {status}."))
            }
            AcceptInvitationResponse::Expired => {
                error(StatusCode::BAD_REQUEST, "Invitation has expired.")
            }
            AcceptInvitationResponse::EmailMismatch => error(
                StatusCode::FORBIDDEN,
                "This invitation was sent to a different email address.",
            ),
            AcceptInvitationResponse::AlreadyCollaborator => error(
                StatusCode::CONFLICT,
                "You are already a collaborator on this workspace.",
            ),
            AcceptInvitationResponse::Error(detail) => error_detail(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to accept invitation.",
                detail,
            ),
        }
    }
}

/// Decline a pending invitation.
#[tracing::instrument(skip(db, session, token))]
pub async fn decline_invitation(
    Dep(db): Dep<Postgres>,
    session: SessionContext,
    Path(token): Path<String>,
) -> DeclineInvitationResponse {
    match db.decline_invitation(&token).await {
        Ok(DeclineInvitationResult::Declined) => {
            info!(user_id = %session.user_id, "invitations.decline.success");
            DeclineInvitationResponse::Success
        }
        Ok(DeclineInvitationResult::NotPending(status)) => {
            warn!(user_id = %session.user_id, %status, "invitations.decline.not_pending");
            DeclineInvitationResponse::NotPending(status)
        }
        Ok(DeclineInvitationResult::NotFound) => {
            warn!(user_id = %session.user_id, "invitations.decline.not_found");
            DeclineInvitationResponse::NotFound
        }
        Err(err) => {
            error!(?err, "invitations.decline.error");
            DeclineInvitationResponse::Error(err.to_string())
        }
    }
}

#[derive(Debug)]
pub enum DeclineInvitationResponse {
    Success,
    NotPending(InvitationStatus),
    NotFound,
    Error(String),
}

impl IntoResponse for DeclineInvitationResponse {
    fn into_response(self) -> axum::response::Response {
        match self {
            DeclineInvitationResponse::Success => StatusCode::NO_CONTENT.into_response(),
            DeclineInvitationResponse::NotPending(status) => error(
                StatusCode::CONFLICT,
                &format!("Invitation is already {status}."),
            ),
            DeclineInvitationResponse::NotFound => {
                error(StatusCode::NOT_FOUND, "Invitation not found.")
            }
            DeclineInvitationResponse::Error(detail) => error_detail(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to decline invitation.",
                detail,
            ),
        }
    }
}
