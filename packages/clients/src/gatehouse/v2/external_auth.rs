//! External auth provider and GitHub App manifest API types.

use bon::Builder;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// The public view of a database-stored external auth provider.
///
/// Secrets (client secret, webhook secret, private key) are never part of
/// this type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[non_exhaustive]
pub struct ExternalAuthProviderConfig {
    #[builder(into)]
    pub id: String,

    #[serde(rename = "type")]
    #[builder(into)]
    pub provider_type: String,

    #[builder(into)]
    pub client_id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[builder(default, into)]
    pub display_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[builder(default, into)]
    pub display_icon: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[builder(default, into)]
    pub auth_url: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[builder(default, into)]
    pub token_url: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[builder(default, into)]
    pub validate_url: String,

    #[serde(default)]
    #[builder(default)]
    pub scopes: Vec<String>,

    #[builder(default)]
    pub no_refresh: bool,

    #[builder(default)]
    pub device_flow: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[builder(default, into)]
    pub regex: String,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[builder(default, into)]
    pub app_install_url: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[builder(default, into)]
    pub app_installations_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_app_id: Option<i64>,
}

/// Request body for creating an external auth provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[non_exhaustive]
pub struct CreateExternalAuthProviderRequest {
    #[builder(into)]
    pub id: String,

    #[serde(rename = "type")]
    #[builder(into)]
    pub provider_type: String,

    #[builder(into)]
    pub client_id: String,

    #[serde(default)]
    #[builder(default, into)]
    pub client_secret: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[builder(default, into)]
    pub display_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[builder(default, into)]
    pub display_icon: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[builder(default, into)]
    pub auth_url: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[builder(default, into)]
    pub token_url: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[builder(default, into)]
    pub validate_url: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[builder(default)]
    pub scopes: Vec<String>,

    #[serde(default)]
    #[builder(default)]
    pub no_refresh: bool,

    #[serde(default)]
    #[builder(default)]
    pub device_flow: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[builder(default, into)]
    pub regex: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[builder(default, into)]
    pub app_install_url: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[builder(default, into)]
    pub app_installations_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_app_id: Option<i64>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[builder(default, into)]
    pub github_app_webhook_secret: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[builder(default, into)]
    pub github_app_private_key: String,
}

/// Request body for a partial update of an external auth provider.
///
/// Fields left as `None` keep their stored value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[non_exhaustive]
pub struct UpdateExternalAuthProviderRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub display_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub display_icon: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_refresh: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_flow: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub regex: Option<String>,
}

/// Request body for starting the GitHub App manifest flow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[non_exhaustive]
pub struct GitHubAppManifestRequest {
    /// The GitHub organization to create the app under. When absent the app
    /// is created on the approving user's personal account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub owner: Option<String>,

    /// Where the browser is sent once GitHub redirects back with a code.
    #[serde(default)]
    #[builder(into)]
    pub redirect_uri: String,
}

/// Response to starting the GitHub App manifest flow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[non_exhaustive]
pub struct GitHubAppManifestResponse {
    /// The GitHub URL the user should be sent to, carrying the manifest.
    #[builder(into)]
    pub url: String,

    /// The state correlating this initiation with its callback.
    #[builder(into)]
    pub state: String,
}

/// Request body for completing the GitHub App manifest flow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[non_exhaustive]
pub struct GitHubAppManifestCallbackRequest {
    #[serde(default)]
    #[builder(into)]
    pub code: String,

    #[serde(default)]
    #[builder(into)]
    pub state: String,
}
