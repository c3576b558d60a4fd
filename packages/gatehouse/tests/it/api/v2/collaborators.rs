use clients::gatehouse::v2::{
    AccessLevel, UserId, WorkspaceId, collaborators::UpdateWorkspaceCollaboratorRequest,
};
use color_eyre::Result;
use pretty_assertions::assert_eq as pretty_assert_eq;

use crate::helpers::{TestFixture, status_of};

const BOB_DEV: WorkspaceId = WorkspaceId::from_i64(2);

#[sqlx::test(
    migrator = "gatehouse::db::Postgres::MIGRATOR",
    fixtures("../../../../schema/fixtures/auth.sql")
)]
async fn manage_collaborators(pool: sqlx::PgPool) -> Result<()> {
    let fixture = TestFixture::spawn(pool).await?;
    let carol = fixture
        .db
        .add_collaborator(BOB_DEV, UserId::from_i64(3), AccessLevel::Readonly, None)
        .await?
        .expect("carol is new");
    let bob = fixture.client("bob")?;

    let listed = fixture.client("carol")?.list_collaborators(BOB_DEV).await?;
    pretty_assert_eq!(listed.len(), 1);
    pretty_assert_eq!(listed[0].username, "carol");
    pretty_assert_eq!(listed[0].access_level, AccessLevel::Readonly);

    let promote = UpdateWorkspaceCollaboratorRequest::builder()
        .access_level(AccessLevel::Admin)
        .build();
    let updated = bob.update_collaborator(BOB_DEV, carol.id, &promote).await?;
    pretty_assert_eq!(updated.access_level, AccessLevel::Admin);

    // As an admin carol may now change access herself.
    let demote = UpdateWorkspaceCollaboratorRequest::builder()
        .access_level(AccessLevel::Use)
        .build();
    let updated = fixture
        .client("carol")?
        .update_collaborator(BOB_DEV, carol.id, &demote)
        .await?;
    pretty_assert_eq!(updated.access_level, AccessLevel::Use);

    bob.remove_collaborator(BOB_DEV, carol.id).await?;
    let err = bob
        .remove_collaborator(BOB_DEV, carol.id)
        .await
        .expect_err("already removed");
    pretty_assert_eq!(status_of(&err), Some(404));

    let err = fixture
        .client("carol")?
        .list_collaborators(BOB_DEV)
        .await
        .expect_err("carol lost access");
    pretty_assert_eq!(status_of(&err), Some(403));

    Ok(())
}

#[sqlx::test(
    migrator = "gatehouse::db::Postgres::MIGRATOR",
    fixtures("../../../../schema/fixtures/auth.sql")
)]
async fn use_level_cannot_manage(pool: sqlx::PgPool) -> Result<()> {
    let fixture = TestFixture::spawn(pool).await?;
    let dave = fixture
        .db
        .add_collaborator(BOB_DEV, UserId::from_i64(4), AccessLevel::Use, None)
        .await?
        .expect("dave is new");

    let request = UpdateWorkspaceCollaboratorRequest::builder()
        .access_level(AccessLevel::Admin)
        .build();
    let err = fixture
        .client("dave")?
        .update_collaborator(BOB_DEV, dave.id, &request)
        .await
        .expect_err("use level cannot self-promote");
    pretty_assert_eq!(status_of(&err), Some(403));

    let err = fixture
        .client("dave")?
        .list_invitations(BOB_DEV)
        .await
        .expect_err("use level cannot see invitations");
    pretty_assert_eq!(status_of(&err), Some(403));

    Ok(())
}
