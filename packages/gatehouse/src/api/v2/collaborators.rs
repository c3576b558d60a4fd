//! Workspace collaborator endpoints.

use aerosol::axum::Dep;
use axum::{
    Json, Router,
    extract::Path,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch},
};
use clients::gatehouse::v2::{
    AccessLevel, CollaboratorId, WorkspaceId,
    collaborators::{UpdateWorkspaceCollaboratorRequest, WorkspaceCollaborator},
};
use tap::Pipe;
use tracing::{error, info, warn};

use crate::{
    api::{Body, State, error, error_detail},
    auth::{SessionContext, WorkspaceDenied},
    db::{Collaborator, Postgres},
};

pub fn router() -> Router<State> {
    Router::new()
        .route("/{workspace}/collaborators", get(list_collaborators))
        .route(
            "/{workspace}/collaborators/{collaborator}",
            patch(update_collaborator).delete(remove_collaborator),
        )
}

/// Convert a stored collaborator into its API form.
pub fn collaborator_body(collaborator: Collaborator) -> WorkspaceCollaborator {
    WorkspaceCollaborator::builder()
        .id(collaborator.id)
        .workspace_id(collaborator.workspace_id)
        .user_id(collaborator.user_id)
        .access_level(collaborator.access_level)
        .maybe_invited_by(collaborator.invited_by)
        .created_at(collaborator.created_at)
        .username(collaborator.username)
        .email(collaborator.email)
        .avatar_url(collaborator.avatar_url.unwrap_or_default())
        .workspace_name(collaborator.workspace_name)
        .build()
}

/// List the collaborators on a workspace.
///
/// Any level of access to the workspace is enough to see who else has it.
#[tracing::instrument(skip(db, session))]
pub async fn list_collaborators(
    Dep(db): Dep<Postgres>,
    session: SessionContext,
    Path(workspace_id): Path<i64>,
) -> ListCollaboratorsResponse {
    let workspace_id = WorkspaceId::from_i64(workspace_id);

    if let Err(denied) = session
        .require_workspace(&db, workspace_id, AccessLevel::Readonly)
        .await
    {
        return ListCollaboratorsResponse::Denied(denied);
    }

    match db.list_collaborators(workspace_id).await {
        Ok(collaborators) => {
            info!(
                workspace_id = %workspace_id,
                count = collaborators.len(),
                "collaborators.list.success"
            );
            collaborators
                .into_iter()
                .map(collaborator_body)
                .collect::<Vec<_>>()
                .pipe(ListCollaboratorsResponse::Success)
        }
        Err(err) => {
            error!(?err, "collaborators.list.error");
            ListCollaboratorsResponse::Error(err.to_string())
        }
    }
}

#[derive(Debug)]
pub enum ListCollaboratorsResponse {
    Success(Vec<WorkspaceCollaborator>),
    Denied(WorkspaceDenied),
    Error(String),
}

impl IntoResponse for ListCollaboratorsResponse {
    fn into_response(self) -> axum::response::Response {
        match self {
            ListCollaboratorsResponse::Success(list) => {
                (StatusCode::OK, Json(list)).into_response()
            }
            ListCollaboratorsResponse::Denied(denied) => {
                denied.render("You do not have access to this workspace.")
            }
            ListCollaboratorsResponse::Error(detail) => error_detail(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to list collaborators.",
                detail,
            ),
        }
    }
}

/// Change a collaborator's access level.
#[tracing::instrument(skip(db, session))]
pub async fn update_collaborator(
    Dep(db): Dep<Postgres>,
    session: SessionContext,
    Path((workspace_id, collaborator_id)): Path<(i64, i64)>,
    Body(request): Body<UpdateWorkspaceCollaboratorRequest>,
) -> UpdateCollaboratorResponse {
    let workspace_id = WorkspaceId::from_i64(workspace_id);
    let collaborator_id = CollaboratorId::from_i64(collaborator_id);

    if let Err(denied) = session
        .require_workspace(&db, workspace_id, AccessLevel::Admin)
        .await
    {
        return UpdateCollaboratorResponse::Denied(denied);
    }

    match db
        .update_collaborator(workspace_id, collaborator_id, request.access_level)
        .await
    {
        Ok(Some(collaborator)) => {
            info!(
                collaborator_id = %collaborator_id,
                access_level = %collaborator.access_level,
                "collaborators.update.success"
            );
            UpdateCollaboratorResponse::Success(collaborator_body(collaborator))
        }
        Ok(None) => {
            warn!(collaborator_id = %collaborator_id, "collaborators.update.not_found");
            UpdateCollaboratorResponse::NotFound
        }
        Err(err) => {
            error!(?err, "collaborators.update.error");
            UpdateCollaboratorResponse::Error(err.to_string())
        }
    }
}

#[derive(Debug)]
pub enum UpdateCollaboratorResponse {
    Success(WorkspaceCollaborator),
    NotFound,
    Denied(WorkspaceDenied),
    Error(String),
}

impl IntoResponse for UpdateCollaboratorResponse {
    fn into_response(self) -> axum::response::Response {
        match self {
            UpdateCollaboratorResponse::Success(body) => {
                (StatusCode::OK, Json(body)).into_response()
            }
            UpdateCollaboratorResponse::NotFound => {
                error(StatusCode::NOT_FOUND, "Collaborator not found.")
            }
            UpdateCollaboratorResponse::Denied(denied) => {
                denied.render("Only workspace admins can change collaborator access.")
            }
            UpdateCollaboratorResponse::Error(detail) => error_detail(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to update collaborator.",
                detail,
            ),
        }
    }
}

/// Remove a collaborator from a workspace.
#[tracing::instrument(skip(db, session))]
pub async fn remove_collaborator(
    Dep(db): Dep<Postgres>,
    session: SessionContext,
    Path((workspace_id, collaborator_id)): Path<(i64, i64)>,
) -> RemoveCollaboratorResponse {
    let workspace_id = WorkspaceId::from_i64(workspace_id);
    let collaborator_id = CollaboratorId::from_i64(collaborator_id);

    if let Err(denied) = session
        .require_workspace(&db, workspace_id, AccessLevel::Admin)
        .await
    {
        return RemoveCollaboratorResponse::Denied(denied);
    }

    match db.remove_collaborator(workspace_id, collaborator_id).await {
        Ok(true) => {
            info!(collaborator_id = %collaborator_id, "collaborators.remove.success");
            RemoveCollaboratorResponse::Success
        }
        Ok(false) => {
            warn!(collaborator_id = %collaborator_id, "collaborators.remove.not_found");
            RemoveCollaboratorResponse::NotFound
        }
        Err(err) => {
            error!(?err, "collaborators.remove.error");
            RemoveCollaboratorResponse::Error(err.to_string())
        }
    }
}

#[derive(Debug)]
pub enum RemoveCollaboratorResponse {
    Success,
    NotFound,
    Denied(WorkspaceDenied),
    Error(String),
}

impl IntoResponse for RemoveCollaboratorResponse {
    fn into_response(self) -> axum::response::Response {
        match self {
            RemoveCollaboratorResponse::Success => StatusCode::NO_CONTENT.into_response(),
            RemoveCollaboratorResponse::NotFound => {
                error(StatusCode::NOT_FOUND, "Collaborator not found.")
            }
            RemoveCollaboratorResponse::Denied(denied) => {
                denied.render("Only workspace admins can remove collaborators.")
            }
            RemoveCollaboratorResponse::Error(detail) => error_detail(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to remove collaborator.",
                detail,
            ),
        }
    }
}
