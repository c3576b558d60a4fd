use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use derive_more::{Debug, Display, Error};
use reqwest::{RequestBuilder, Response, StatusCode, redirect};
use serde::de::DeserializeOwned;
use tracing::instrument;
use url::Url;

use super::{
    CollaboratorId, InvitationId, WorkspaceId,
    collaborators::{UpdateWorkspaceCollaboratorRequest, WorkspaceCollaborator},
    external_auth::{
        CreateExternalAuthProviderRequest, ExternalAuthProviderConfig,
        GitHubAppManifestCallbackRequest, GitHubAppManifestRequest, GitHubAppManifestResponse,
        UpdateExternalAuthProviderRequest,
    },
    invitations::{CreateWorkspaceInvitationRequest, WorkspaceInvitation},
};
use crate::ErrorResponse;

/// A non-success response from the API, carrying the structured error body.
///
/// Returned inside the `color_eyre::Report` of a failed call; use
/// `Report::downcast_ref::<ResponseError>()` to inspect it.
#[derive(Clone, Debug, PartialEq, Eq, Display, Error)]
#[display("unexpected status {status}: {body}")]
pub struct ResponseError {
    pub status: u16,
    pub body: ErrorResponse,
}

/// Client for the Gatehouse v2 API.
#[derive(Clone, Debug)]
pub struct Client {
    base: Url,
    http: reqwest::Client,
    #[debug(skip)]
    token: Option<String>,
}

impl Client {
    /// Create a new unauthenticated client with the given base URL.
    ///
    /// Redirects are not followed, so the manifest callback relay can be
    /// observed directly.
    pub fn new(base: impl Into<Url>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .redirect(redirect::Policy::none())
            .build()
            .context("build http client")?;
        Ok(Self {
            base: base.into(),
            http,
            token: None,
        })
    }

    /// Return a copy of this client that authenticates with the session token.
    pub fn with_token(&self, token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..self.clone()
        }
    }

    fn url<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| eyre!("base url cannot be a base: {}", self.base))?
            .pop_if_empty()
            .extend(["api", "v2"])
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Create an invitation on a workspace; the response carries the token.
    #[instrument(skip(self))]
    pub async fn create_invitation(
        &self,
        workspace: WorkspaceId,
        request: &CreateWorkspaceInvitationRequest,
    ) -> Result<WorkspaceInvitation> {
        let id = workspace.to_string();
        let url = self.url(["workspaces", &id, "invitations"])?;
        let response = self
            .request(reqwest::Method::POST, url)
            .json(request)
            .send()
            .await
            .context("send POST request")?;
        expect_json(response, StatusCode::CREATED).await
    }

    /// List the invitations on a workspace, newest first.
    #[instrument(skip(self))]
    pub async fn list_invitations(&self, workspace: WorkspaceId) -> Result<Vec<WorkspaceInvitation>> {
        let id = workspace.to_string();
        let url = self.url(["workspaces", &id, "invitations"])?;
        let response = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .context("send GET request")?;
        expect_json(response, StatusCode::OK).await
    }

    /// Cancel a pending invitation.
    #[instrument(skip(self))]
    pub async fn cancel_invitation(
        &self,
        workspace: WorkspaceId,
        invitation: InvitationId,
    ) -> Result<()> {
        let workspace = workspace.to_string();
        let invitation = invitation.to_string();
        let url = self.url(["workspaces", &workspace, "invitations", &invitation])?;
        let response = self
            .request(reqwest::Method::DELETE, url)
            .send()
            .await
            .context("send DELETE request")?;
        expect_empty(response, StatusCode::NO_CONTENT).await
    }

    /// Look up an invitation by its token.
    #[instrument(skip_all)]
    pub async fn invitation_by_token(&self, token: &str) -> Result<WorkspaceInvitation> {
        let url = self.url(["invitations", token])?;
        let response = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .context("send GET request")?;
        expect_json(response, StatusCode::OK).await
    }

    /// Accept an invitation as the authenticated user.
    #[instrument(skip_all)]
    pub async fn accept_invitation(&self, token: &str) -> Result<WorkspaceCollaborator> {
        let url = self.url(["invitations", token, "accept"])?;
        let response = self
            .request(reqwest::Method::POST, url)
            .send()
            .await
            .context("send POST request")?;
        expect_json(response, StatusCode::OK).await
    }

    /// Decline an invitation as the authenticated user.
    #[instrument(skip_all)]
    pub async fn decline_invitation(&self, token: &str) -> Result<()> {
        let url = self.url(["invitations", token, "decline"])?;
        let response = self
            .request(reqwest::Method::POST, url)
            .send()
            .await
            .context("send POST request")?;
        expect_empty(response, StatusCode::NO_CONTENT).await
    }

    /// List the collaborators on a workspace.
    #[instrument(skip(self))]
    pub async fn list_collaborators(
        &self,
        workspace: WorkspaceId,
    ) -> Result<Vec<WorkspaceCollaborator>> {
        let id = workspace.to_string();
        let url = self.url(["workspaces", &id, "collaborators"])?;
        let response = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .context("send GET request")?;
        expect_json(response, StatusCode::OK).await
    }

    /// Change a collaborator's access level.
    #[instrument(skip(self))]
    pub async fn update_collaborator(
        &self,
        workspace: WorkspaceId,
        collaborator: CollaboratorId,
        request: &UpdateWorkspaceCollaboratorRequest,
    ) -> Result<WorkspaceCollaborator> {
        let workspace = workspace.to_string();
        let collaborator = collaborator.to_string();
        let url = self.url(["workspaces", &workspace, "collaborators", &collaborator])?;
        let response = self
            .request(reqwest::Method::PATCH, url)
            .json(request)
            .send()
            .await
            .context("send PATCH request")?;
        expect_json(response, StatusCode::OK).await
    }

    /// Remove a collaborator from a workspace.
    #[instrument(skip(self))]
    pub async fn remove_collaborator(
        &self,
        workspace: WorkspaceId,
        collaborator: CollaboratorId,
    ) -> Result<()> {
        let workspace = workspace.to_string();
        let collaborator = collaborator.to_string();
        let url = self.url(["workspaces", &workspace, "collaborators", &collaborator])?;
        let response = self
            .request(reqwest::Method::DELETE, url)
            .send()
            .await
            .context("send DELETE request")?;
        expect_empty(response, StatusCode::NO_CONTENT).await
    }

    /// List the workspaces the authenticated user collaborates on.
    #[instrument(skip(self))]
    pub async fn my_collaborations(&self) -> Result<Vec<WorkspaceCollaborator>> {
        let url = self.url(["users", "me", "workspace-collaborations"])?;
        let response = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .context("send GET request")?;
        expect_json(response, StatusCode::OK).await
    }

    /// List the pending invitations addressed to the authenticated user.
    #[instrument(skip(self))]
    pub async fn my_invitations(&self) -> Result<Vec<WorkspaceInvitation>> {
        let url = self.url(["users", "me", "workspace-invitations"])?;
        let response = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .context("send GET request")?;
        expect_json(response, StatusCode::OK).await
    }

    /// List the database-stored external auth providers.
    #[instrument(skip(self))]
    pub async fn list_providers(&self) -> Result<Vec<ExternalAuthProviderConfig>> {
        let url = self.url(["deployment", "external-auth-providers"])?;
        let response = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .context("send GET request")?;
        expect_json(response, StatusCode::OK).await
    }

    /// Get a single external auth provider.
    #[instrument(skip(self))]
    pub async fn get_provider(&self, id: &str) -> Result<ExternalAuthProviderConfig> {
        let url = self.url(["deployment", "external-auth-providers", id])?;
        let response = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .context("send GET request")?;
        expect_json(response, StatusCode::OK).await
    }

    /// Create an external auth provider.
    #[instrument(skip_all, fields(id = %request.id))]
    pub async fn create_provider(
        &self,
        request: &CreateExternalAuthProviderRequest,
    ) -> Result<ExternalAuthProviderConfig> {
        let url = self.url(["deployment", "external-auth-providers"])?;
        let response = self
            .request(reqwest::Method::POST, url)
            .json(request)
            .send()
            .await
            .context("send POST request")?;
        expect_json(response, StatusCode::CREATED).await
    }

    /// Partially update an external auth provider.
    #[instrument(skip(self))]
    pub async fn update_provider(
        &self,
        id: &str,
        request: &UpdateExternalAuthProviderRequest,
    ) -> Result<ExternalAuthProviderConfig> {
        let url = self.url(["deployment", "external-auth-providers", id])?;
        let response = self
            .request(reqwest::Method::PATCH, url)
            .json(request)
            .send()
            .await
            .context("send PATCH request")?;
        expect_json(response, StatusCode::OK).await
    }

    /// Delete an external auth provider.
    #[instrument(skip(self))]
    pub async fn delete_provider(&self, id: &str) -> Result<()> {
        let url = self.url(["deployment", "external-auth-providers", id])?;
        let response = self
            .request(reqwest::Method::DELETE, url)
            .send()
            .await
            .context("send DELETE request")?;
        expect_empty(response, StatusCode::NO_CONTENT).await
    }

    /// Start the GitHub App manifest flow.
    #[instrument(skip(self))]
    pub async fn initiate_github_manifest(
        &self,
        request: &GitHubAppManifestRequest,
    ) -> Result<GitHubAppManifestResponse> {
        let url = self.url(["deployment", "external-auth-providers", "github", "manifest"])?;
        let response = self
            .request(reqwest::Method::POST, url)
            .json(request)
            .send()
            .await
            .context("send POST request")?;
        expect_json(response, StatusCode::OK).await
    }

    /// Follow the browser leg of the manifest flow, returning the location the
    /// browser would be redirected to.
    #[instrument(skip_all)]
    pub async fn github_manifest_redirect(&self, code: &str, state: &str) -> Result<Url> {
        let mut url = self.url(["deployment", "external-auth-providers", "github", "callback"])?;
        url.query_pairs_mut()
            .append_pair("code", code)
            .append_pair("state", state);
        let response = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .context("send GET request")?;

        match response.status() {
            StatusCode::TEMPORARY_REDIRECT => {
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .ok_or_else(|| eyre!("redirect response missing location header"))?
                    .to_str()
                    .context("decode location header")?;
                Url::parse(location).context("parse location header")
            }
            _ => Err(response_error(response).await),
        }
    }

    /// Complete the GitHub App manifest flow, storing the new provider.
    #[instrument(skip_all)]
    pub async fn complete_github_manifest(
        &self,
        request: &GitHubAppManifestCallbackRequest,
    ) -> Result<ExternalAuthProviderConfig> {
        let url = self.url(["deployment", "external-auth-providers", "github", "callback"])?;
        let response = self
            .request(reqwest::Method::POST, url)
            .json(request)
            .send()
            .await
            .context("send POST request")?;
        expect_json(response, StatusCode::CREATED).await
    }
}

async fn expect_json<T: DeserializeOwned>(response: Response, expected: StatusCode) -> Result<T> {
    if response.status() == expected {
        response.json::<T>().await.context("parse JSON response")
    } else {
        Err(response_error(response).await)
    }
}

async fn expect_empty(response: Response, expected: StatusCode) -> Result<()> {
    if response.status() == expected {
        Ok(())
    } else {
        Err(response_error(response).await)
    }
}

async fn response_error(response: Response) -> color_eyre::Report {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    let body = serde_json::from_str::<ErrorResponse>(&text)
        .unwrap_or_else(|_| ErrorResponse::message(text));
    color_eyre::Report::new(ResponseError { status, body })
}
