//! Invitation emails, delivered through the Resend HTTP API.
//!
//! Delivery is optional: [`EmailConfig::delivery`] only yields settings when
//! an API key, a sender address, and the public access URL are all present.

use std::time::Duration;

use askama::Template;
use clients::gatehouse::v2::AccessLevel;
use color_eyre::{
    Result,
    eyre::{Context, bail, eyre},
};
use derive_more::Debug;
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, macros::format_description};
use tracing::warn;
use url::Url;

/// Sender name used when none is configured.
pub const DEFAULT_FROM_NAME: &str = "Gatehouse";

/// The Resend API base URL.
pub const RESEND_API_URL: &str = "https://api.resend.com";

const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Email settings as provided by the operator. Every field is optional.
#[derive(Clone, Debug, Default)]
pub struct EmailConfig {
    #[debug(skip)]
    pub api_key: Option<String>,
    pub from_email: Option<String>,
    pub from_name: Option<String>,
    pub access_url: Option<Url>,
}

/// Validated delivery settings.
#[derive(Clone, Debug)]
pub struct Delivery {
    #[debug(skip)]
    pub api_key: String,
    pub from: String,
    pub access_url: Url,
}

impl EmailConfig {
    /// Resolve the settings needed to deliver email, or `None` if delivery is
    /// disabled.
    pub fn delivery(&self) -> Option<Delivery> {
        let api_key = self.api_key.as_deref().filter(|key| !key.is_empty())?;
        let Some(from_email) = self.from_email.as_deref().filter(|from| !from.is_empty()) else {
            warn!("email.config.missing_from_email");
            return None;
        };
        let Some(access_url) = self.access_url.clone() else {
            warn!("email.config.missing_access_url");
            return None;
        };
        let from_name = self
            .from_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_FROM_NAME);

        Some(Delivery {
            api_key: api_key.to_string(),
            from: format!("{from_name} <{from_email}>"),
            access_url,
        })
    }
}

/// The link an invitee follows to accept an invitation.
pub fn accept_url(access_url: &Url, token: &str) -> Result<Url> {
    let mut url = access_url.clone();
    url.path_segments_mut()
        .map_err(|()| eyre!("access URL cannot be a base: {access_url}"))?
        .pop_if_empty()
        .extend(["invitation", token]);
    Ok(url)
}

/// Format a date as e.g. `January 2, 2006`.
pub fn format_expiry(at: OffsetDateTime) -> Result<String> {
    at.format(format_description!(
        "[month repr:long] [day padding:none], [year]"
    ))
    .context("format expiry date")
}

/// An invitation email waiting to be rendered and sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvitationEmail {
    pub to: String,
    pub inviter_name: String,
    pub workspace_name: String,
    pub access_level: AccessLevel,
    #[debug(skip)]
    pub accept_url: Url,
    pub expires_at: OffsetDateTime,
}

/// A rendered email ready to hand to the delivery provider.
#[derive(Clone, Debug)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
    pub text: String,
}

#[derive(Template)]
#[template(path = "invitation.html")]
struct InvitationHtml<'a> {
    inviter_name: &'a str,
    workspace_name: &'a str,
    access_level: &'a str,
    accept_url: &'a str,
    expires_on: &'a str,
}

#[derive(Template)]
#[template(path = "invitation.txt")]
struct InvitationText<'a> {
    inviter_name: &'a str,
    workspace_name: &'a str,
    access_level: &'a str,
    accept_url: &'a str,
    expires_on: &'a str,
}

impl InvitationEmail {
    /// Render the subject and the HTML and plain-text bodies.
    pub fn render(&self) -> Result<RenderedEmail> {
        let expires_on = format_expiry(self.expires_at)?;
        let html = InvitationHtml {
            inviter_name: &self.inviter_name,
            workspace_name: &self.workspace_name,
            access_level: self.access_level.as_db_name(),
            accept_url: self.accept_url.as_str(),
            expires_on: &expires_on,
        }
        .render()
        .context("render html body")?;
        let text = InvitationText {
            inviter_name: &self.inviter_name,
            workspace_name: &self.workspace_name,
            access_level: self.access_level.as_db_name(),
            accept_url: self.accept_url.as_str(),
            expires_on: &expires_on,
        }
        .render()
        .context("render text body")?;

        Ok(RenderedEmail {
            subject: format!(
                "{} invited you to collaborate on {}",
                self.inviter_name, self.workspace_name
            ),
            html,
            text,
        })
    }
}

#[derive(Debug, Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResendErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    name: String,
}

/// Client for the Resend `POST /emails` endpoint.
#[derive(Clone, Debug)]
pub struct Resend {
    http: reqwest::Client,
    endpoint: Url,
    #[debug(skip)]
    api_key: String,
    from: String,
}

impl Resend {
    /// Create a client sending as `from` through the API at `api_url`.
    pub fn new(api_url: &Url, api_key: impl Into<String>, from: impl Into<String>) -> Result<Self> {
        let mut endpoint = api_url.clone();
        endpoint
            .path_segments_mut()
            .map_err(|()| eyre!("Resend URL cannot be a base: {api_url}"))?
            .pop_if_empty()
            .push("emails");
        let http = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .context("build http client")?;

        Ok(Self {
            http,
            endpoint,
            api_key: api_key.into(),
            from: from.into(),
        })
    }

    /// Send a rendered email to a single recipient.
    #[tracing::instrument(name = "Resend::send", skip(self, email))]
    pub async fn send(&self, to: &str, email: &RenderedEmail) -> Result<()> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&SendEmailRequest {
                from: &self.from,
                to: [to],
                subject: &email.subject,
                html: &email.html,
                text: &email.text,
            })
            .send()
            .await
            .context("send email request")?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            match response.json::<ResendErrorBody>().await {
                Ok(body) => bail!("resend API error: {} - {}", body.name, body.message),
                Err(_) => bail!("resend API error (status {})", status.as_u16()),
            }
        }
        Ok(())
    }
}
