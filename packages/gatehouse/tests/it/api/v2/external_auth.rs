use clients::gatehouse::v2::external_auth::{
    CreateExternalAuthProviderRequest, GitHubAppManifestCallbackRequest, GitHubAppManifestRequest,
    UpdateExternalAuthProviderRequest,
};
use color_eyre::{Result, eyre::OptionExt};
use gatehouse::crypto::SecretCipher;
use pretty_assertions::assert_eq as pretty_assert_eq;
use url::Url;

use crate::helpers::{ENCRYPTION_KEY, TestFixture, message_of, status_of};

#[sqlx::test(
    migrator = "gatehouse::db::Postgres::MIGRATOR",
    fixtures("../../../../schema/fixtures/auth.sql")
)]
async fn provider_lifecycle(pool: sqlx::PgPool) -> Result<()> {
    let fixture = TestFixture::spawn(pool).await?;
    let alice = fixture.client("alice")?;

    let request = CreateExternalAuthProviderRequest::builder()
        .id("gitlab")
        .provider_type("gitlab")
        .client_id("gl-client")
        .client_secret("gl-secret")
        .display_name("GitLab")
        .scopes(vec![String::from("read_user")])
        .build();
    let created = alice.create_provider(&request).await?;
    pretty_assert_eq!(created.id, "gitlab");
    pretty_assert_eq!(created.scopes, vec![String::from("read_user")]);

    let update = UpdateExternalAuthProviderRequest::builder()
        .display_name("GitLab (self-hosted)")
        .device_flow(true)
        .build();
    let updated = alice.update_provider("gitlab", &update).await?;
    pretty_assert_eq!(updated.display_name, "GitLab (self-hosted)");
    assert!(updated.device_flow);
    pretty_assert_eq!(updated.client_id, "gl-client");

    let listed = alice.list_providers().await?;
    pretty_assert_eq!(listed.len(), 1);
    pretty_assert_eq!(alice.get_provider("gitlab").await?, updated);

    let stored = fixture
        .db
        .get_external_auth_provider("gitlab")
        .await?
        .ok_or_eyre("provider is stored")?;
    let cipher = SecretCipher::from_hex(ENCRYPTION_KEY)?;
    pretty_assert_eq!(cipher.open(&stored.client_secret)?, b"gl-secret".to_vec());

    alice.delete_provider("gitlab").await?;
    let err = alice
        .get_provider("gitlab")
        .await
        .expect_err("provider is deleted");
    pretty_assert_eq!(status_of(&err), Some(404));

    Ok(())
}

#[sqlx::test(
    migrator = "gatehouse::db::Postgres::MIGRATOR",
    fixtures("../../../../schema/fixtures/auth.sql")
)]
async fn providers_need_site_admin(pool: sqlx::PgPool) -> Result<()> {
    let fixture = TestFixture::spawn(pool).await?;

    let err = fixture
        .client("bob")?
        .list_providers()
        .await
        .expect_err("bob is not a site admin");
    pretty_assert_eq!(status_of(&err), Some(403));

    let err = fixture
        .anonymous()?
        .list_providers()
        .await
        .expect_err("no session");
    pretty_assert_eq!(status_of(&err), Some(401));

    Ok(())
}

#[sqlx::test(
    migrator = "gatehouse::db::Postgres::MIGRATOR",
    fixtures("../../../../schema/fixtures/auth.sql")
)]
async fn github_manifest_flow(pool: sqlx::PgPool) -> Result<()> {
    let fixture = TestFixture::spawn(pool).await?;
    let alice = fixture.client("alice")?;

    let initiated = alice
        .initiate_github_manifest(
            &GitHubAppManifestRequest::builder()
                .owner("acme")
                .redirect_uri("https://app.example.com/setup")
                .build(),
        )
        .await?;
    let creation = Url::parse(&initiated.url)?;
    pretty_assert_eq!(
        creation.path(),
        "/organizations/acme/settings/apps/new"
    );
    assert!(creation.as_str().starts_with(fixture.github_url.as_str()));

    // GitHub sends the browser back with a code; we bounce it to the frontend.
    let location = fixture
        .anonymous()?
        .github_manifest_redirect("app-gatehouse-acme", &initiated.state)
        .await?;
    pretty_assert_eq!(location.host_str(), Some("app.example.com"));
    pretty_assert_eq!(location.path(), "/setup");
    let pairs = location.query_pairs().into_owned().collect::<Vec<_>>();
    pretty_assert_eq!(
        pairs,
        vec![
            (String::from("code"), String::from("app-gatehouse-acme")),
            (String::from("state"), initiated.state.clone()),
        ]
    );

    let complete = GitHubAppManifestCallbackRequest::builder()
        .code("app-gatehouse-acme")
        .state(initiated.state.clone())
        .build();
    let provider = alice.complete_github_manifest(&complete).await?;
    pretty_assert_eq!(provider.id, "github-gatehouse-acme");
    pretty_assert_eq!(provider.provider_type, "github");
    pretty_assert_eq!(provider.client_id, "Iv1.gatehouse-acme");
    pretty_assert_eq!(provider.github_app_id, Some(7001));
    pretty_assert_eq!(
        provider.app_install_url,
        "https://github.com/apps/gatehouse-acme/installations/new"
    );
    assert!(provider.no_refresh);

    let stored = fixture
        .db
        .get_external_auth_provider("github-gatehouse-acme")
        .await?
        .ok_or_eyre("provider is stored")?;
    let cipher = SecretCipher::from_hex(ENCRYPTION_KEY)?;
    pretty_assert_eq!(cipher.open(&stored.client_secret)?, b"client-secret".to_vec());

    // The state is single use.
    let err = alice
        .complete_github_manifest(&complete)
        .await
        .expect_err("state already consumed");
    pretty_assert_eq!(status_of(&err), Some(400));
    pretty_assert_eq!(message_of(&err), Some("Invalid or expired state token."));

    Ok(())
}

#[sqlx::test(
    migrator = "gatehouse::db::Postgres::MIGRATOR",
    fixtures("../../../../schema/fixtures/auth.sql")
)]
async fn github_refusal_is_reported(pool: sqlx::PgPool) -> Result<()> {
    let fixture = TestFixture::spawn(pool).await?;
    let alice = fixture.client("alice")?;

    let initiated = alice
        .initiate_github_manifest(
            &GitHubAppManifestRequest::builder()
                .redirect_uri("https://app.example.com/setup")
                .build(),
        )
        .await?;
    let err = alice
        .complete_github_manifest(
            &GitHubAppManifestCallbackRequest::builder()
                .code("stale-code")
                .state(initiated.state)
                .build(),
        )
        .await
        .expect_err("github refuses the code");
    pretty_assert_eq!(status_of(&err), Some(400));
    pretty_assert_eq!(message_of(&err), Some("GitHub rejected the code exchange."));
    assert!(alice.list_providers().await?.is_empty());

    Ok(())
}

#[sqlx::test(
    migrator = "gatehouse::db::Postgres::MIGRATOR",
    fixtures("../../../../schema/fixtures/auth.sql")
)]
async fn callback_rejects_unknown_state(pool: sqlx::PgPool) -> Result<()> {
    let fixture = TestFixture::spawn(pool).await?;

    let err = fixture
        .anonymous()?
        .github_manifest_redirect("app-anything", "never-issued")
        .await
        .expect_err("state was never issued");
    pretty_assert_eq!(status_of(&err), Some(400));

    Ok(())
}
