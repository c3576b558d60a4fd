use clients::gatehouse::v2::{AccessLevel, InvitationStatus, UserId, WorkspaceId};
use color_eyre::{Result, eyre::OptionExt};
use gatehouse::{
    auth::{SessionContext, SessionToken},
    db::{
        AcceptInvitationResult, CancelInvitationResult, DeclineInvitationResult, NewInvitation,
        Postgres,
    },
    sweep,
};
use pretty_assertions::assert_eq as pretty_assert_eq;
use time::{Duration, OffsetDateTime};

const ALICE_DEV: WorkspaceId = WorkspaceId::from_i64(1);

async fn invite_carol(db: &Postgres, token: &str, expires_in: Duration) -> Result<()> {
    db.create_invitation(NewInvitation {
        workspace_id: ALICE_DEV,
        inviter_id: UserId::from_i64(1),
        email: "carol@example.com",
        access_level: AccessLevel::Use,
        token,
        expires_at: OffsetDateTime::now_utc() + expires_in,
    })
    .await?;
    Ok(())
}

async fn carol(db: &Postgres) -> Result<SessionContext> {
    db.validate_session(&SessionToken::new("session-carol"))
        .await?
        .ok_or_eyre("carol has a session")
}

#[sqlx::test(
    migrator = "gatehouse::db::Postgres::MIGRATOR",
    fixtures("../../../schema/fixtures/auth.sql")
)]
async fn concurrent_accepts_of_one_invitation(pool: sqlx::PgPool) -> Result<()> {
    let db = Postgres { pool };
    invite_carol(&db, "tok-shared", Duration::days(7)).await?;
    let session = carol(&db).await?;

    let (first, second) = tokio::join!(
        db.accept_invitation("tok-shared", &session),
        db.accept_invitation("tok-shared", &session),
    );
    let results = [first?, second?];

    let accepted = results
        .iter()
        .filter(|result| matches!(result, AcceptInvitationResult::Accepted(_)))
        .count();
    let rejected = results
        .iter()
        .filter(|result| {
            matches!(
                result,
                AcceptInvitationResult::NotPending(InvitationStatus::Accepted)
            )
        })
        .count();
    pretty_assert_eq!((accepted, rejected), (1, 1));
    pretty_assert_eq!(db.list_collaborators(ALICE_DEV).await?.len(), 1);

    Ok(())
}

#[sqlx::test(
    migrator = "gatehouse::db::Postgres::MIGRATOR",
    fixtures("../../../schema/fixtures/auth.sql")
)]
async fn concurrent_accepts_of_two_invitations(pool: sqlx::PgPool) -> Result<()> {
    let db = Postgres { pool };
    invite_carol(&db, "tok-one", Duration::days(7)).await?;
    invite_carol(&db, "tok-two", Duration::days(7)).await?;
    let session = carol(&db).await?;

    let (first, second) = tokio::join!(
        db.accept_invitation("tok-one", &session),
        db.accept_invitation("tok-two", &session),
    );
    let results = [first?, second?];

    let accepted = results
        .iter()
        .filter(|result| matches!(result, AcceptInvitationResult::Accepted(_)))
        .count();
    let duplicate = results
        .iter()
        .filter(|result| matches!(result, AcceptInvitationResult::AlreadyCollaborator))
        .count();
    pretty_assert_eq!((accepted, duplicate), (1, 1));
    pretty_assert_eq!(db.list_collaborators(ALICE_DEV).await?.len(), 1);

    // The losing invitation stays pending.
    let statuses = db
        .list_invitations(ALICE_DEV)
        .await?
        .into_iter()
        .map(|invitation| invitation.status)
        .collect::<Vec<_>>();
    assert!(statuses.contains(&InvitationStatus::Accepted));
    assert!(statuses.contains(&InvitationStatus::Pending));

    Ok(())
}

#[sqlx::test(
    migrator = "gatehouse::db::Postgres::MIGRATOR",
    fixtures("../../../schema/fixtures/auth.sql")
)]
async fn sweep_expires_stale_invitations(pool: sqlx::PgPool) -> Result<()> {
    let db = Postgres { pool };
    invite_carol(&db, "tok-stale", -Duration::hours(1)).await?;
    invite_carol(&db, "tok-live", Duration::days(7)).await?;

    let report = sweep::once(&db).await?;
    pretty_assert_eq!(report.expired_invitations, 1);

    let stale = db
        .get_invitation_by_token("tok-stale")
        .await?
        .ok_or_eyre("stale invitation exists")?;
    pretty_assert_eq!(stale.status, InvitationStatus::Expired);
    assert!(stale.responded_at.is_some());

    let live = db
        .get_invitation_by_token("tok-live")
        .await?
        .ok_or_eyre("live invitation exists")?;
    pretty_assert_eq!(live.status, InvitationStatus::Pending);

    let session = carol(&db).await?;
    let result = db.accept_invitation("tok-stale", &session).await?;
    assert!(
        matches!(
            result,
            AcceptInvitationResult::NotPending(InvitationStatus::Expired)
        ),
        "result: {result:?}"
    );

    pretty_assert_eq!(sweep::once(&db).await?.expired_invitations, 0);

    Ok(())
}

#[sqlx::test(
    migrator = "gatehouse::db::Postgres::MIGRATOR",
    fixtures("../../../schema/fixtures/auth.sql")
)]
async fn resolved_invitations_stay_resolved(pool: sqlx::PgPool) -> Result<()> {
    let db = Postgres { pool };
    invite_carol(&db, "tok-declined", Duration::days(7)).await?;
    invite_carol(&db, "tok-canceled", Duration::days(7)).await?;
    let declined = db
        .get_invitation_by_token("tok-declined")
        .await?
        .ok_or_eyre("invitation exists")?;
    let canceled = db
        .get_invitation_by_token("tok-canceled")
        .await?
        .ok_or_eyre("invitation exists")?;

    pretty_assert_eq!(
        db.decline_invitation("tok-declined").await?,
        DeclineInvitationResult::Declined
    );
    pretty_assert_eq!(
        db.decline_invitation("tok-declined").await?,
        DeclineInvitationResult::NotPending(InvitationStatus::Declined)
    );
    pretty_assert_eq!(
        db.cancel_invitation(ALICE_DEV, declined.id).await?,
        CancelInvitationResult::NotPending(InvitationStatus::Declined)
    );

    pretty_assert_eq!(
        db.cancel_invitation(ALICE_DEV, canceled.id).await?,
        CancelInvitationResult::Canceled
    );
    pretty_assert_eq!(
        db.cancel_invitation(ALICE_DEV, canceled.id).await?,
        CancelInvitationResult::AlreadyCanceled
    );
    pretty_assert_eq!(
        db.decline_invitation("tok-canceled").await?,
        DeclineInvitationResult::NotPending(InvitationStatus::Canceled)
    );

    pretty_assert_eq!(
        db.decline_invitation("tok-missing").await?,
        DeclineInvitationResult::NotFound
    );
    pretty_assert_eq!(
        db.cancel_invitation(WorkspaceId::from_i64(2), canceled.id).await?,
        CancelInvitationResult::NotFound
    );

    Ok(())
}
