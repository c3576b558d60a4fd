use clients::gatehouse::v2::{
    AccessLevel, InvitationStatus, WorkspaceId, invitations::CreateWorkspaceInvitationRequest,
};
use color_eyre::Result;
use pretty_assertions::assert_eq as pretty_assert_eq;

use crate::helpers::{ACCESS_URL, TestFixture, message_of, status_of};

const ALICE_DEV: WorkspaceId = WorkspaceId::from_i64(1);

fn invite(email: &str, access_level: AccessLevel) -> CreateWorkspaceInvitationRequest {
    CreateWorkspaceInvitationRequest::builder()
        .email(email)
        .access_level(access_level)
        .build()
}

#[sqlx::test(
    migrator = "gatehouse::db::Postgres::MIGRATOR",
    fixtures("../../../../schema/fixtures/auth.sql")
)]
async fn invite_accept_round_trip(pool: sqlx::PgPool) -> Result<()> {
    let fixture = TestFixture::spawn(pool).await?;
    let alice = fixture.client("alice")?;
    let carol = fixture.client("carol")?;

    let created = alice
        .create_invitation(ALICE_DEV, &invite("carol@example.com", AccessLevel::Use))
        .await?;
    pretty_assert_eq!(created.status, InvitationStatus::Pending);
    pretty_assert_eq!(created.token.len(), 43);

    let email = fixture.emails.recv_async().await?;
    pretty_assert_eq!(
        email.accept_url.as_str(),
        format!("{ACCESS_URL}/invitation/{}", created.token)
    );

    let pending = carol.my_invitations().await?;
    pretty_assert_eq!(pending.len(), 1);
    pretty_assert_eq!(pending[0].id, created.id);
    pretty_assert_eq!(pending[0].token, "");

    let lookup = fixture.anonymous()?.invitation_by_token(&created.token).await?;
    pretty_assert_eq!(lookup.workspace_name, "alice-dev");
    pretty_assert_eq!(lookup.inviter_username, "alice");
    pretty_assert_eq!(lookup.access_level, AccessLevel::Use);

    let collaborator = carol.accept_invitation(&created.token).await?;
    pretty_assert_eq!(collaborator.workspace_id, ALICE_DEV);
    pretty_assert_eq!(collaborator.access_level, AccessLevel::Use);
    pretty_assert_eq!(collaborator.invited_by, Some(created.inviter_id));

    let accepted = carol.invitation_by_token(&created.token).await?;
    pretty_assert_eq!(accepted.status, InvitationStatus::Accepted);
    assert!(carol.my_invitations().await?.is_empty());

    let collaborations = carol.my_collaborations().await?;
    pretty_assert_eq!(collaborations.len(), 1);
    pretty_assert_eq!(collaborations[0].workspace_name, "alice-dev");

    let listed = alice.list_invitations(ALICE_DEV).await?;
    pretty_assert_eq!(listed.len(), 1);
    pretty_assert_eq!(listed[0].status, InvitationStatus::Accepted);
    pretty_assert_eq!(listed[0].token, "");

    Ok(())
}

#[sqlx::test(
    migrator = "gatehouse::db::Postgres::MIGRATOR",
    fixtures("../../../../schema/fixtures/auth.sql")
)]
async fn wrong_account_cannot_accept(pool: sqlx::PgPool) -> Result<()> {
    let fixture = TestFixture::spawn(pool).await?;
    let created = fixture
        .client("alice")?
        .create_invitation(ALICE_DEV, &invite("carol@example.com", AccessLevel::Admin))
        .await?;

    let err = fixture
        .client("dave")?
        .accept_invitation(&created.token)
        .await
        .expect_err("dave is not the invitee");
    pretty_assert_eq!(status_of(&err), Some(403));
    pretty_assert_eq!(
        message_of(&err),
        Some("This invitation was sent to a different email address.")
    );

    let lookup = fixture.anonymous()?.invitation_by_token(&created.token).await?;
    pretty_assert_eq!(lookup.status, InvitationStatus::Pending);

    Ok(())
}

#[sqlx::test(
    migrator = "gatehouse::db::Postgres::MIGRATOR",
    fixtures("../../../../schema/fixtures/auth.sql")
)]
async fn declined_invitation_cannot_be_accepted(pool: sqlx::PgPool) -> Result<()> {
    let fixture = TestFixture::spawn(pool).await?;
    let carol = fixture.client("carol")?;
    let created = fixture
        .client("alice")?
        .create_invitation(ALICE_DEV, &invite("carol@example.com", AccessLevel::Use))
        .await?;

    carol.decline_invitation(&created.token).await?;
    let err = carol
        .accept_invitation(&created.token)
        .await
        .expect_err("invitation is declined");
    pretty_assert_eq!(status_of(&err), Some(409));
    pretty_assert_eq!(message_of(&err), Some("Invitation is declined."));
    assert!(carol.my_collaborations().await?.is_empty());

    Ok(())
}

#[sqlx::test(
    migrator = "gatehouse::db::Postgres::MIGRATOR",
    fixtures("../../../../schema/fixtures/auth.sql")
)]
async fn canceled_invitation_cannot_be_accepted(pool: sqlx::PgPool) -> Result<()> {
    let fixture = TestFixture::spawn(pool).await?;
    let alice = fixture.client("alice")?;
    let carol = fixture.client("carol")?;
    let created = alice
        .create_invitation(ALICE_DEV, &invite("carol@example.com", AccessLevel::Use))
        .await?;

    alice.cancel_invitation(ALICE_DEV, created.id).await?;
    let err = carol
        .accept_invitation(&created.token)
        .await
        .expect_err("invitation is canceled");
    pretty_assert_eq!(status_of(&err), Some(409));
    pretty_assert_eq!(message_of(&err), Some("Invitation is canceled."));

    let err = carol
        .decline_invitation(&created.token)
        .await
        .expect_err("invitation is canceled");
    pretty_assert_eq!(status_of(&err), Some(409));

    Ok(())
}

#[sqlx::test(
    migrator = "gatehouse::db::Postgres::MIGRATOR",
    fixtures("../../../../schema/fixtures/auth.sql")
)]
async fn token_endpoints_are_rate_limited(pool: sqlx::PgPool) -> Result<()> {
    let fixture = TestFixture::spawn(pool).await?;
    let carol = fixture.client("carol")?;

    let mut statuses = Vec::new();
    for _ in 0..12 {
        let err = carol
            .decline_invitation("not-a-real-token")
            .await
            .expect_err("unknown token");
        statuses.push(status_of(&err));
    }

    pretty_assert_eq!(&statuses[..10], &[Some(404); 10]);
    pretty_assert_eq!(statuses[11], Some(429));

    // Lookups are not rate limited.
    for _ in 0..12 {
        let err = fixture
            .anonymous()?
            .invitation_by_token("not-a-real-token")
            .await
            .expect_err("unknown token");
        pretty_assert_eq!(status_of(&err), Some(404));
    }

    Ok(())
}
