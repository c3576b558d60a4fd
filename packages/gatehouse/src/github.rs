//! GitHub App registration through the manifest flow.
//!
//! See <https://docs.github.com/en/apps/sharing-github-apps/registering-a-github-app-from-a-manifest>.

use std::time::Duration;

use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use derive_more::Debug;
use reqwest::{StatusCode, header::ACCEPT};
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

/// The public GitHub web URL.
pub const GITHUB_URL: &str = "https://github.com";

/// The public GitHub REST API URL.
pub const GITHUB_API_URL: &str = "https://api.github.com";

/// Bound on the outbound code exchange.
const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(15);

/// The manifest GitHub uses to pre-fill the "register a new app" form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub url: String,
    pub hook_attributes: HookAttributes,
    pub redirect_url: String,
    pub callback_urls: Vec<String>,
    pub setup_url: String,
    pub public: bool,
    pub default_permissions: DefaultPermissions,
    pub default_events: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookAttributes {
    pub url: String,
    pub active: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultPermissions {
    pub contents: String,
    pub metadata: String,
}

/// Credentials GitHub returns once the manifest code is converted.
#[derive(Clone, Debug, Deserialize)]
pub struct AppCredentials {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub client_id: String,
    #[debug(skip)]
    pub client_secret: String,
    #[serde(default)]
    #[debug(skip)]
    pub webhook_secret: Option<String>,
    #[debug(skip)]
    pub pem: String,
    pub html_url: String,
}

/// Outcome of converting a manifest code.
#[derive(Debug)]
pub enum Conversion {
    Created(AppCredentials),
    /// GitHub answered with something other than `201 Created`.
    Rejected { status: StatusCode, body: String },
    /// GitHub answered `201 Created` but the body was not the expected shape.
    Undecodable(String),
}

/// Talks to GitHub on behalf of the manifest flow.
#[derive(Clone, Debug)]
#[debug("GitHubApps(web = {web_url}, api = {api_url})")]
pub struct GitHubApps {
    http: reqwest::Client,
    web_url: Url,
    api_url: Url,
    access_url: Option<Url>,
}

impl GitHubApps {
    /// Create a client for the GitHub instance at `web_url`/`api_url`.
    ///
    /// `access_url` is this deployment's public URL; the manifest flow is
    /// unavailable without it.
    pub fn new(web_url: Url, api_url: Url, access_url: Option<Url>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(EXCHANGE_TIMEOUT)
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            web_url,
            api_url,
            access_url,
        })
    }

    /// This deployment's public URL, if configured.
    pub fn access_url(&self) -> Option<&Url> {
        self.access_url.as_ref()
    }

    /// The endpoint that lists the caller's app installations.
    pub fn installations_url(&self) -> String {
        format!("{}/user/installations", trim_slash(&self.api_url))
    }

    /// Build the manifest for a new app whose GitHub redirect carries `state`.
    pub fn manifest(&self, access_url: &Url, state: &str) -> Manifest {
        let access = trim_slash(access_url);
        let host = access_url.host_str().unwrap_or_default();
        let mut redirect_url = format!(
            "{access}/api/v2/deployment/external-auth-providers/github/callback"
        );
        redirect_url.push_str("?state=");
        redirect_url.extend(url::form_urlencoded::byte_serialize(state.as_bytes()));

        Manifest {
            name: format!("Gatehouse - {host}"),
            url: access.to_string(),
            hook_attributes: HookAttributes {
                url: format!("{access}/api/v2/deployment/external-auth-providers/github/webhook"),
                active: false,
            },
            redirect_url,
            callback_urls: vec![format!("{access}/external-auth/github/callback")],
            setup_url: format!("{access}/external-auth/github/callback"),
            public: false,
            default_permissions: DefaultPermissions {
                contents: String::from("read"),
                metadata: String::from("read"),
            },
            default_events: Vec::new(),
        }
    }

    /// The GitHub page that registers an app from `manifest`, under the
    /// organization `owner` or the approving user's account.
    pub fn creation_url(&self, owner: Option<&str>, manifest: &Manifest) -> Result<Url> {
        let mut url = self.web_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| eyre!("GitHub URL cannot be a base: {}", self.web_url))?;
            segments.pop_if_empty();
            if let Some(owner) = owner.filter(|owner| !owner.is_empty()) {
                segments.extend(["organizations", owner]);
            }
            segments.extend(["settings", "apps", "new"]);
        }

        let manifest = serde_json::to_string(manifest).context("encode manifest")?;
        url.query_pairs_mut().append_pair("manifest", &manifest);
        Ok(url)
    }

    /// Exchange a manifest code for the new app's credentials.
    ///
    /// Errors are transport failures; GitHub's own refusals are reported as
    /// [`Conversion::Rejected`].
    #[tracing::instrument(name = "GitHubApps::convert", skip(self, code))]
    pub async fn convert(&self, code: &str) -> Result<Conversion> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|()| eyre!("GitHub API URL cannot be a base: {}", self.api_url))?
            .pop_if_empty()
            .extend(["app-manifests", code, "conversions"]);

        let response = self
            .http
            .post(url)
            .header(ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .context("send conversion request")?;

        let status = response.status();
        if status != StatusCode::CREATED {
            let body = match response.text().await {
                Ok(body) => body,
                Err(err) => {
                    warn!(?err, %status, "github.convert.read_body_error");
                    String::new()
                }
            };
            return Ok(Conversion::Rejected { status, body });
        }

        match response.json::<AppCredentials>().await {
            Ok(credentials) => Ok(Conversion::Created(credentials)),
            Err(err) => Ok(Conversion::Undecodable(err.to_string())),
        }
    }
}

fn trim_slash(url: &Url) -> &str {
    url.as_str().trim_end_matches('/')
}
