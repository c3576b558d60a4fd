//! Gatehouse v2 API types and client.

use derive_more::{Debug, Display, From, Into};
use serde::{Deserialize, Serialize};
use strum::{EnumString, IntoStaticStr};

pub mod collaborators;
pub mod external_auth;
pub mod invitations;

#[cfg(feature = "client")]
mod client;

#[cfg(feature = "client")]
pub use client::{Client, ResponseError};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Copy,
            Clone,
            Eq,
            PartialEq,
            Ord,
            PartialOrd,
            Hash,
            Debug,
            Display,
            Default,
            Deserialize,
            Serialize,
            From,
            Into,
        )]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            pub fn as_i64(&self) -> i64 {
                self.0
            }

            pub const fn from_i64(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

id_type!(
    /// An ID uniquely identifying a user account.
    UserId
);

id_type!(
    /// An ID uniquely identifying a workspace.
    WorkspaceId
);

id_type!(
    /// An ID uniquely identifying a workspace invitation.
    InvitationId
);

id_type!(
    /// An ID uniquely identifying a workspace collaborator grant.
    CollaboratorId
);

/// The level of access a collaborator has on a workspace.
///
/// Variants are declared in order of increasing privilege, so the derived
/// `Ord` can be used for "at least" checks.
#[derive(
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Debug,
    Display,
    Deserialize,
    Serialize,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AccessLevel {
    #[display("readonly")]
    Readonly,
    #[display("use")]
    Use,
    #[display("admin")]
    Admin,
}

impl AccessLevel {
    /// The name used for this access level in the database.
    pub fn as_db_name(&self) -> &'static str {
        self.into()
    }

    /// Parse an access level from its database name.
    pub fn from_db_name(name: &str) -> Option<Self> {
        name.parse().ok()
    }

    /// Whether this level grants at least the privileges of `other`.
    pub fn at_least(&self, other: AccessLevel) -> bool {
        *self >= other
    }
}

/// The lifecycle status of a workspace invitation.
///
/// `Pending` is the only non-terminal status.
#[derive(
    Copy,
    Clone,
    Eq,
    PartialEq,
    Hash,
    Debug,
    Display,
    Deserialize,
    Serialize,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum InvitationStatus {
    #[display("pending")]
    Pending,
    #[display("accepted")]
    Accepted,
    #[display("declined")]
    Declined,
    #[display("expired")]
    Expired,
    #[display("canceled")]
    Canceled,
}

impl InvitationStatus {
    /// The name used for this status in the database.
    pub fn as_db_name(&self) -> &'static str {
        self.into()
    }

    /// Parse a status from its database name.
    pub fn from_db_name(name: &str) -> Option<Self> {
        name.parse().ok()
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, InvitationStatus::Pending)
    }
}
