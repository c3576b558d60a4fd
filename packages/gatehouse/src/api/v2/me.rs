//! Self-service views for the signed-in user.

use aerosol::axum::Dep;
use axum::{Json, Router, http::StatusCode, response::IntoResponse, routing::get};
use clients::gatehouse::v2::{
    collaborators::WorkspaceCollaborator, invitations::WorkspaceInvitation,
};
use tap::Pipe;
use tracing::{error, info};

use crate::{
    api::{
        State, error_detail,
        v2::{collaborators::collaborator_body, invitations::invitation_body},
    },
    auth::SessionContext,
    db::Postgres,
};

pub fn router() -> Router<State> {
    Router::new()
        .route("/workspace-collaborations", get(my_collaborations))
        .route("/workspace-invitations", get(my_invitations))
}

/// List the workspaces the caller collaborates on.
#[tracing::instrument(skip(db, session))]
pub async fn my_collaborations(
    Dep(db): Dep<Postgres>,
    session: SessionContext,
) -> MyCollaborationsResponse {
    match db.list_collaborations_for_user(session.user_id).await {
        Ok(collaborations) => {
            info!(
                user_id = %session.user_id,
                count = collaborations.len(),
                "me.collaborations.success"
            );
            collaborations
                .into_iter()
                .map(collaborator_body)
                .collect::<Vec<_>>()
                .pipe(MyCollaborationsResponse::Success)
        }
        Err(err) => {
            error!(?err, "me.collaborations.error");
            MyCollaborationsResponse::Error(err.to_string())
        }
    }
}

#[derive(Debug)]
pub enum MyCollaborationsResponse {
    Success(Vec<WorkspaceCollaborator>),
    Error(String),
}

impl IntoResponse for MyCollaborationsResponse {
    fn into_response(self) -> axum::response::Response {
        match self {
            MyCollaborationsResponse::Success(list) => (StatusCode::OK, Json(list)).into_response(),
            MyCollaborationsResponse::Error(detail) => error_detail(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to get collaborations.",
                detail,
            ),
        }
    }
}

/// List the pending, unexpired invitations addressed to the caller's email.
/// Tokens are redacted.
#[tracing::instrument(skip(db, session))]
pub async fn my_invitations(
    Dep(db): Dep<Postgres>,
    session: SessionContext,
) -> MyInvitationsResponse {
    match db.list_pending_invitations_for_email(&session.email).await {
        Ok(invitations) => {
            info!(
                user_id = %session.user_id,
                count = invitations.len(),
                "me.invitations.success"
            );
            invitations
                .into_iter()
                .map(|invitation| invitation_body(invitation, false))
                .collect::<Vec<_>>()
                .pipe(MyInvitationsResponse::Success)
        }
        Err(err) => {
            error!(?err, "me.invitations.error");
            MyInvitationsResponse::Error(err.to_string())
        }
    }
}

#[derive(Debug)]
pub enum MyInvitationsResponse {
    Success(Vec<WorkspaceInvitation>),
    Error(String),
}

impl IntoResponse for MyInvitationsResponse {
    fn into_response(self) -> axum::response::Response {
        match self {
            MyInvitationsResponse::Success(list) => (StatusCode::OK, Json(list)).into_response(),
            MyInvitationsResponse::Error(detail) => error_detail(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to get invitations.",
                detail,
            ),
        }
    }
}
