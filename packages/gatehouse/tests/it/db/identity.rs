use clients::gatehouse::v2::{AccessLevel, UserId, WorkspaceId};
use color_eyre::{Result, eyre::OptionExt};
use gatehouse::{
    auth::SessionToken,
    crypto::generate_session_token,
    db::{Postgres, WorkspaceAccess},
    sweep,
};
use pretty_assertions::assert_eq as pretty_assert_eq;
use time::{Duration, OffsetDateTime};

#[sqlx::test(
    migrator = "gatehouse::db::Postgres::MIGRATOR",
    fixtures("../../../schema/fixtures/auth.sql")
)]
async fn account_and_workspace_records(pool: sqlx::PgPool) -> Result<()> {
    let db = Postgres { pool };

    let erin = db
        .create_account("erin", "erin@example.com", Some("Erin Evans"), false)
        .await?;
    let account = db.get_account(erin).await?.ok_or_eyre("erin exists")?;
    pretty_assert_eq!(account.id, erin);
    pretty_assert_eq!(account.username, "erin");
    pretty_assert_eq!(account.email, "erin@example.com");
    pretty_assert_eq!(account.name.as_deref(), Some("Erin Evans"));
    pretty_assert_eq!(account.avatar_url, None);
    assert!(!account.site_admin);

    let workspace_id = db.create_workspace(erin, "erin-dev").await?;
    let workspace = db
        .get_workspace(workspace_id)
        .await?
        .ok_or_eyre("workspace exists")?;
    pretty_assert_eq!(workspace.owner_id, erin);
    pretty_assert_eq!(workspace.name, "erin-dev");
    pretty_assert_eq!(
        db.workspace_access(workspace_id, erin).await?,
        WorkspaceAccess::Granted(AccessLevel::Admin)
    );
    pretty_assert_eq!(
        db.workspace_access(workspace_id, UserId::from_i64(2)).await?,
        WorkspaceAccess::Denied
    );

    pretty_assert_eq!(db.get_account(UserId::from_i64(999)).await?.map(|a| a.id), None);
    pretty_assert_eq!(
        db.get_workspace(WorkspaceId::from_i64(999)).await?.map(|w| w.id),
        None
    );

    Ok(())
}

#[sqlx::test(
    migrator = "gatehouse::db::Postgres::MIGRATOR",
    fixtures("../../../schema/fixtures/auth.sql")
)]
async fn duplicate_username_is_rejected(pool: sqlx::PgPool) -> Result<()> {
    let db = Postgres { pool };
    let result = db
        .create_account("alice", "other@example.com", None, false)
        .await;
    assert!(result.is_err(), "result: {result:?}");
    Ok(())
}

#[sqlx::test(
    migrator = "gatehouse::db::Postgres::MIGRATOR",
    fixtures("../../../schema/fixtures/auth.sql")
)]
async fn session_lifecycle(pool: sqlx::PgPool) -> Result<()> {
    let db = Postgres { pool };
    let carol = UserId::from_i64(3);

    let token = generate_session_token();
    db.create_session(carol, &token, OffsetDateTime::now_utc() + Duration::hours(1))
        .await?;
    let session = db
        .validate_session(&token)
        .await?
        .ok_or_eyre("fresh session is valid")?;
    pretty_assert_eq!(session.user_id, carol);
    pretty_assert_eq!(session.email, "carol@example.com");

    assert!(db.revoke_session(&token).await?);
    assert!(!db.revoke_session(&token).await?);
    pretty_assert_eq!(db.validate_session(&token).await?.map(|s| s.user_id), None);

    let stale = generate_session_token();
    db.create_session(carol, &stale, OffsetDateTime::now_utc() - Duration::minutes(1))
        .await?;
    pretty_assert_eq!(db.validate_session(&stale).await?.map(|s| s.user_id), None);

    // Both the revoked and the expired session go; the fixture sessions stay.
    pretty_assert_eq!(sweep::once(&db).await?.sessions, 2);
    let alice = SessionToken::new("session-alice");
    assert!(db.validate_session(&alice).await?.is_some());

    Ok(())
}
