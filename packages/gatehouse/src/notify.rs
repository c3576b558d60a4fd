//! Fire-and-forget delivery of invitation emails.
//!
//! Handlers hand an [`InvitationEmail`] to the [`Notifier`] and move on; a
//! background worker renders and sends each message. Delivery failures are
//! logged and never reach the request that triggered them.

use clients::gatehouse::v2::AccessLevel;
use color_eyre::Result;
use derive_more::Debug;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::email::{self, EmailConfig, InvitationEmail, Resend};

/// Queues invitation emails for delivery.
#[derive(Clone, Debug)]
pub enum Notifier {
    /// Email delivery is not configured; messages are dropped.
    Disabled,

    /// Messages are sent to a worker (or, in tests, to a receiver the test
    /// holds).
    #[debug("Notifier::Queue({access_url})")]
    Queue {
        tx: flume::Sender<InvitationEmail>,
        access_url: Url,
    },
}

/// The facts about a freshly created invitation needed to notify the invitee.
#[derive(Clone, Debug)]
pub struct InvitationCreated<'a> {
    pub email: &'a str,
    #[debug(skip)]
    pub token: &'a str,
    pub inviter_name: &'a str,
    pub workspace_name: &'a str,
    pub access_level: AccessLevel,
    pub expires_at: OffsetDateTime,
}

impl Notifier {
    /// Build a notifier from operator configuration, spawning the delivery
    /// worker if email is enabled.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(config: &EmailConfig, resend_url: &Url) -> Result<Self> {
        let Some(delivery) = config.delivery() else {
            info!("notify.disabled");
            return Ok(Self::Disabled);
        };

        let resend = Resend::new(resend_url, delivery.api_key, delivery.from)?;
        let (tx, rx) = flume::unbounded::<InvitationEmail>();
        tokio::spawn(deliver(rx, resend));

        info!(access_url = %delivery.access_url, "notify.enabled");
        Ok(Self::Queue {
            tx,
            access_url: delivery.access_url,
        })
    }

    /// Build a notifier whose messages are read by the caller instead of
    /// being delivered.
    pub fn channel(access_url: Url) -> (Self, flume::Receiver<InvitationEmail>) {
        let (tx, rx) = flume::unbounded();
        (Self::Queue { tx, access_url }, rx)
    }

    /// Queue the invitation email for a newly created invitation.
    ///
    /// Never fails: problems are logged and the message is dropped.
    #[tracing::instrument(name = "Notifier::invitation_created", skip(self))]
    pub fn invitation_created(&self, invitation: InvitationCreated<'_>) {
        let (tx, access_url) = match self {
            Notifier::Disabled => {
                debug!("notify.invitation.disabled");
                return;
            }
            Notifier::Queue { tx, access_url } => (tx, access_url),
        };

        let accept_url = match email::accept_url(access_url, invitation.token) {
            Ok(url) => url,
            Err(err) => {
                error!(?err, "notify.invitation.accept_url");
                return;
            }
        };

        let message = InvitationEmail {
            to: invitation.email.to_string(),
            inviter_name: invitation.inviter_name.to_string(),
            workspace_name: invitation.workspace_name.to_string(),
            access_level: invitation.access_level,
            accept_url,
            expires_at: invitation.expires_at,
        };
        if tx.send(message).is_err() {
            warn!("notify.invitation.worker_gone");
        }
    }
}

async fn deliver(rx: flume::Receiver<InvitationEmail>, resend: Resend) {
    while let Ok(message) = rx.recv_async().await {
        let rendered = match message.render() {
            Ok(rendered) => rendered,
            Err(err) => {
                error!(?err, to = %message.to, "notify.render.error");
                continue;
            }
        };
        match resend.send(&message.to, &rendered).await {
            Ok(()) => info!(to = %message.to, "notify.send.success"),
            Err(err) => error!(?err, to = %message.to, "notify.send.error"),
        }
    }
    debug!("notify.worker.stopped");
}
