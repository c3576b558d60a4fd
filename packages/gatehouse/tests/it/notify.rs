use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::post,
};
use clients::gatehouse::v2::AccessLevel;
use color_eyre::{Result, eyre::Context};
use gatehouse::{
    email::{EmailConfig, RenderedEmail, Resend},
    notify::{InvitationCreated, Notifier},
};
use pretty_assertions::assert_eq as pretty_assert_eq;
use serde_json::{Value, json};
use time::macros::datetime;
use url::Url;

use crate::helpers::{ACCESS_URL, serve};

const API_KEY: &str = "re_test_key";

/// Mail to this address is refused with a server error.
const FAILING_RECIPIENT: &str = "broken@example.com";

/// A request the stand-in for Resend received.
#[derive(Debug)]
struct Captured {
    authorization: Option<String>,
    body: Value,
}

/// Resend's `POST /emails` endpoint, forwarding every request it sees to `tx`.
fn mock_resend(tx: flume::Sender<Captured>) -> Router {
    async fn emails(
        State(tx): State<flume::Sender<Captured>>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Response {
        let refused = body["to"] == json!([FAILING_RECIPIENT]);
        let authorization = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(String::from);
        let _ = tx.send(Captured { authorization, body });

        if refused {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "name": "application_error", "message": "Something went wrong" })),
            )
                .into_response()
        } else {
            Json(json!({ "id": "49a3999c-0ce1-4ea6-ab68-afcd6dc2e794" })).into_response()
        }
    }

    Router::new().route("/emails", post(emails)).with_state(tx)
}

async fn next(rx: &flume::Receiver<Captured>) -> Result<Captured> {
    tokio::time::timeout(Duration::from_secs(10), rx.recv_async())
        .await
        .context("wait for email request")?
        .context("mock resend stopped")
}

fn invitation(email: &str) -> InvitationCreated<'_> {
    InvitationCreated {
        email,
        token: "tok123",
        inviter_name: "Alice Adams",
        workspace_name: "alice-dev",
        access_level: AccessLevel::Use,
        expires_at: datetime!(2026-01-08 12:00 UTC),
    }
}

#[tokio::test]
async fn worker_delivers_through_resend() -> Result<()> {
    let (tx, rx) = flume::unbounded();
    let resend_url = serve(mock_resend(tx)).await?;

    let config = EmailConfig {
        api_key: Some(String::from(API_KEY)),
        from_email: Some(String::from("noreply@example.com")),
        from_name: Some(String::from("Acme")),
        access_url: Some(Url::parse(ACCESS_URL)?),
    };
    let notifier = Notifier::spawn(&config, &resend_url)?;

    notifier.invitation_created(invitation(FAILING_RECIPIENT));
    notifier.invitation_created(invitation("carol@example.com"));

    let refused = next(&rx).await?;
    pretty_assert_eq!(refused.body["to"], json!([FAILING_RECIPIENT]));

    // The refusal is logged and the worker moves on to the next message.
    let delivered = next(&rx).await?;
    pretty_assert_eq!(
        delivered.authorization.as_deref(),
        Some("Bearer re_test_key")
    );
    pretty_assert_eq!(delivered.body["from"], json!("Acme <noreply@example.com>"));
    pretty_assert_eq!(delivered.body["to"], json!(["carol@example.com"]));
    pretty_assert_eq!(
        delivered.body["subject"],
        json!("Alice Adams invited you to collaborate on alice-dev")
    );
    let html = delivered.body["html"].as_str().unwrap_or_default();
    assert!(html.contains("Accept Invitation"), "html: {html}");
    let text = delivered.body["text"].as_str().unwrap_or_default();
    assert!(
        text.contains("https://gate.example.com/invitation/tok123"),
        "text: {text}"
    );
    assert!(text.contains("Your access level: use"), "text: {text}");
    assert!(text.contains("January 8, 2026"), "text: {text}");

    Ok(())
}

#[tokio::test]
async fn send_reports_resend_errors() -> Result<()> {
    let (tx, rx) = flume::unbounded();
    let resend_url = serve(mock_resend(tx)).await?;
    let resend = Resend::new(&resend_url, API_KEY, "Gatehouse <noreply@example.com>")?;
    let email = RenderedEmail {
        subject: String::from("Hello"),
        html: String::from("<p>Hello</p>"),
        text: String::from("Hello"),
    };

    resend.send("carol@example.com", &email).await?;
    let sent = next(&rx).await?;
    pretty_assert_eq!(
        sent.body,
        json!({
            "from": "Gatehouse <noreply@example.com>",
            "to": ["carol@example.com"],
            "subject": "Hello",
            "html": "<p>Hello</p>",
            "text": "Hello",
        })
    );

    let err = resend
        .send(FAILING_RECIPIENT, &email)
        .await
        .expect_err("refused by resend");
    pretty_assert_eq!(
        err.to_string(),
        "resend API error: application_error - Something went wrong"
    );

    Ok(())
}

#[tokio::test]
async fn send_fails_when_resend_unreachable() -> Result<()> {
    // Nothing listens on the discard port.
    let resend = Resend::new(
        &Url::parse("http://127.0.0.1:9")?,
        API_KEY,
        "Gatehouse <noreply@example.com>",
    )?;
    let email = RenderedEmail {
        subject: String::from("Hello"),
        html: String::new(),
        text: String::new(),
    };
    assert!(resend.send("carol@example.com", &email).await.is_err());
    Ok(())
}
