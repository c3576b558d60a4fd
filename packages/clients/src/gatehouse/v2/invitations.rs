//! Workspace invitation API types.

use bon::Builder;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::{AccessLevel, InvitationId, InvitationStatus, UserId, WorkspaceId};

/// An invitation for a specific email address to collaborate on a workspace.
///
/// The `token` is only populated in the response to the request that created
/// the invitation; every other response leaves it empty and it is omitted
/// from the serialized form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[non_exhaustive]
pub struct WorkspaceInvitation {
    pub id: InvitationId,
    pub workspace_id: WorkspaceId,
    pub inviter_id: UserId,

    #[builder(into)]
    pub email: String,

    pub access_level: AccessLevel,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[builder(default, into)]
    pub token: String,

    pub status: InvitationStatus,

    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub responded_at: Option<OffsetDateTime>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[builder(default, into)]
    pub inviter_username: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[builder(default, into)]
    pub workspace_name: String,
}

/// Request body for creating a workspace invitation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[non_exhaustive]
pub struct CreateWorkspaceInvitationRequest {
    #[builder(into)]
    pub email: String,
    pub access_level: AccessLevel,
}
