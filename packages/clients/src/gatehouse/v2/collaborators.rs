//! Workspace collaborator API types.

use bon::Builder;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::{AccessLevel, CollaboratorId, UserId, WorkspaceId};

/// A confirmed grant of workspace access to a user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[non_exhaustive]
pub struct WorkspaceCollaborator {
    pub id: CollaboratorId,
    pub workspace_id: WorkspaceId,
    pub user_id: UserId,
    pub access_level: AccessLevel,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invited_by: Option<UserId>,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[builder(default, into)]
    pub username: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[builder(default, into)]
    pub email: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[builder(default, into)]
    pub avatar_url: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[builder(default, into)]
    pub workspace_name: String,
}

/// Request body for changing a collaborator's access level.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[non_exhaustive]
pub struct UpdateWorkspaceCollaboratorRequest {
    pub access_level: AccessLevel,
}
