//! Database interface.
//!
//! # Serialization/Deserialization
//!
//! Types in this module do not implement `Serialize` or `Deserialize` because
//! they are internal implementation details for Gatehouse. The API handlers
//! convert them into the public types in [`clients::gatehouse::v2`].
//!
//! # Queries
//!
//! Queries are checked at runtime rather than with the `sqlx::query!` family
//! of macros so that building the crate never needs a live database. Rows are
//! decoded into private `*Row` types and then validated into the public record
//! types (e.g. parsing access levels and statuses).

use std::collections::{HashMap, HashSet};

use clients::gatehouse::v2::{
    AccessLevel, CollaboratorId, InvitationId, InvitationStatus, UserId, WorkspaceId,
};
use color_eyre::{
    Result,
    eyre::{Context, bail, eyre},
};
use derive_more::Debug;
use sqlx::{PgConnection, PgPool, migrate::Migrate, migrate::Migrator};
use time::OffsetDateTime;

use crate::{
    auth::{SessionContext, SessionToken},
    crypto::{SealedSecret, TokenHash},
};

/// A connected Postgres database instance.
#[derive(Clone, Debug)]
#[debug("Postgres(pool_size = {})", self.pool.size())]
pub struct Postgres {
    pub pool: PgPool,
}

impl Postgres {
    /// The migrator for the database.
    pub const MIGRATOR: Migrator = sqlx::migrate!("./schema/migrations");

    /// Connect to the Postgres database.
    #[tracing::instrument(name = "Postgres::connect", skip(url))]
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPool::connect(url).await.context("connect to database")?;
        Ok(Self { pool })
    }

    /// Ping the database to ensure the connection is alive.
    #[tracing::instrument(name = "Postgres::ping")]
    pub async fn ping(&self) -> Result<()> {
        let pong = sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("ping database")?;
        if pong != 1 {
            bail!("database ping failed; unexpected response: {pong}");
        }
        Ok(())
    }

    /// Apply all pending migrations.
    #[tracing::instrument(name = "Postgres::migrate")]
    pub async fn migrate(&self) -> Result<()> {
        Self::MIGRATOR
            .run(&self.pool)
            .await
            .context("apply migrations")
    }

    /// Validate that all migrations have been applied to the database.
    ///
    /// This checks that:
    /// 1. All migrations in the codebase have been applied
    /// 2. Applied migrations have matching checksums (no modified migrations)
    /// 3. No migrations exist in the database that are missing from the
    ///    codebase (unless `ignore_missing` is set in the MIGRATOR)
    ///
    /// This is intended for use at server startup to ensure the database schema
    /// is up-to-date before serving traffic. It does NOT apply migrations;
    /// use the separate `migrate` command for that.
    #[tracing::instrument(name = "Postgres::validate_migrations")]
    pub async fn validate_migrations(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.context("acquire connection")?;

        conn.ensure_migrations_table()
            .await
            .context("ensure migrations table")?;

        // A dirty migration is one that failed partway through application.
        if let Some(version) = conn.dirty_version().await.context("check dirty version")? {
            bail!(
                "Database has a dirty migration (version {version}). \
                 A previous migration failed partway through. \
                 Manually resolve the issue and re-run 'gatehouse migrate'."
            );
        }

        let applied = conn
            .list_applied_migrations()
            .await
            .context("list applied migrations")?;
        let applied_checksums = applied
            .iter()
            .map(|m| (m.version, m.checksum.clone()))
            .collect::<HashMap<_, _>>();
        let applied_versions = applied.iter().map(|m| m.version).collect::<HashSet<_>>();

        let expected = Self::MIGRATOR
            .iter()
            .filter(|m| m.migration_type.is_up_migration())
            .collect::<Vec<_>>();
        let expected_versions = expected.iter().map(|m| m.version).collect::<HashSet<_>>();

        let mut pending = expected
            .iter()
            .filter(|m| !applied_versions.contains(&m.version))
            .map(|m| m.version)
            .collect::<Vec<_>>();
        pending.sort();
        if !pending.is_empty() {
            bail!(
                "Database has pending migrations: [{}]. Run 'gatehouse migrate' first.",
                join_versions(&pending)
            );
        }

        let mut mismatched = expected
            .iter()
            .filter(|m| {
                applied_checksums
                    .get(&m.version)
                    .is_some_and(|checksum| *checksum != m.checksum)
            })
            .map(|m| m.version)
            .collect::<Vec<_>>();
        mismatched.sort();
        if !mismatched.is_empty() {
            bail!(
                "Database has migrations with checksum mismatches: [{}]. \
                 Migrations were modified after being applied.",
                join_versions(&mismatched)
            );
        }

        if !Self::MIGRATOR.ignore_missing {
            let mut missing = applied_versions
                .difference(&expected_versions)
                .copied()
                .collect::<Vec<_>>();
            missing.sort();
            if !missing.is_empty() {
                bail!(
                    "Database has applied migrations missing from codebase: [{}]. \
                     This may indicate you're running an older version of the code.",
                    join_versions(&missing)
                );
            }
        }

        Ok(())
    }
}

fn join_versions(versions: &[i64]) -> String {
    versions
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl AsRef<PgPool> for Postgres {
    fn as_ref(&self) -> &PgPool {
        &self.pool
    }
}

fn parse_access_level(name: &str) -> Result<AccessLevel> {
    AccessLevel::from_db_name(name).ok_or_else(|| eyre!("unknown access level: {name}"))
}

fn parse_status(name: &str) -> Result<InvitationStatus> {
    InvitationStatus::from_db_name(name).ok_or_else(|| eyre!("unknown invitation status: {name}"))
}

// =============================================================================
// Account Operations
// =============================================================================

/// An account record from the database.
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Account {
    #[sqlx(try_from = "i64")]
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub site_admin: bool,
    pub created_at: OffsetDateTime,
}

impl Postgres {
    /// Create a new account.
    #[tracing::instrument(name = "Postgres::create_account")]
    pub async fn create_account(
        &self,
        username: &str,
        email: &str,
        name: Option<&str>,
        site_admin: bool,
    ) -> Result<UserId> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO account (username, email, name, site_admin)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(username)
        .bind(email)
        .bind(name)
        .bind(site_admin)
        .fetch_one(&self.pool)
        .await
        .context("insert account")?;

        Ok(UserId::from_i64(id))
    }

    /// Get an account by ID.
    #[tracing::instrument(name = "Postgres::get_account")]
    pub async fn get_account(&self, user_id: UserId) -> Result<Option<Account>> {
        sqlx::query_as::<_, Account>(
            r#"
            SELECT id, username, email, name, avatar_url, site_admin, created_at
            FROM account
            WHERE id = $1
            "#,
        )
        .bind(user_id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .context("fetch account")
    }
}

// =============================================================================
// Workspace Operations
// =============================================================================

/// A workspace record from the database.
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Workspace {
    #[sqlx(try_from = "i64")]
    pub id: WorkspaceId,
    #[sqlx(try_from = "i64")]
    pub owner_id: UserId,
    pub name: String,
    pub created_at: OffsetDateTime,
}

/// The access an account has to a workspace.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkspaceAccess {
    /// The workspace does not exist.
    UnknownWorkspace,
    /// The account is neither the owner nor a collaborator.
    Denied,
    /// The account has the given effective access level. Owners are `Admin`.
    Granted(AccessLevel),
}

impl WorkspaceAccess {
    /// Whether this access grants at least the given level.
    pub fn allows(&self, required: AccessLevel) -> bool {
        matches!(self, WorkspaceAccess::Granted(level) if level.at_least(required))
    }
}

#[derive(sqlx::FromRow)]
struct WorkspaceAccessRow {
    owner_id: i64,
    access_level: Option<String>,
}

impl Postgres {
    /// Create a new workspace owned by the given account.
    #[tracing::instrument(name = "Postgres::create_workspace")]
    pub async fn create_workspace(&self, owner: UserId, name: &str) -> Result<WorkspaceId> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO workspace (owner_id, name)
            VALUES ($1, $2)
            RETURNING id
            "#,
        )
        .bind(owner.as_i64())
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .context("insert workspace")?;

        Ok(WorkspaceId::from_i64(id))
    }

    /// Get a workspace by ID.
    #[tracing::instrument(name = "Postgres::get_workspace")]
    pub async fn get_workspace(&self, workspace_id: WorkspaceId) -> Result<Option<Workspace>> {
        sqlx::query_as::<_, Workspace>(
            r#"
            SELECT id, owner_id, name, created_at
            FROM workspace
            WHERE id = $1
            "#,
        )
        .bind(workspace_id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .context("fetch workspace")
    }

    /// Resolve the effective access an account has to a workspace.
    #[tracing::instrument(name = "Postgres::workspace_access")]
    pub async fn workspace_access(
        &self,
        workspace_id: WorkspaceId,
        user_id: UserId,
    ) -> Result<WorkspaceAccess> {
        let row = sqlx::query_as::<_, WorkspaceAccessRow>(
            r#"
            SELECT w.owner_id, c.access_level
            FROM workspace w
            LEFT JOIN workspace_collaborator c
              ON c.workspace_id = w.id AND c.user_id = $2
            WHERE w.id = $1
            "#,
        )
        .bind(workspace_id.as_i64())
        .bind(user_id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .context("fetch workspace access")?;

        let Some(row) = row else {
            return Ok(WorkspaceAccess::UnknownWorkspace);
        };
        if row.owner_id == user_id.as_i64() {
            return Ok(WorkspaceAccess::Granted(AccessLevel::Admin));
        }
        match row.access_level {
            Some(level) => parse_access_level(&level).map(WorkspaceAccess::Granted),
            None => Ok(WorkspaceAccess::Denied),
        }
    }
}

// =============================================================================
// Session Operations
// =============================================================================

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: i64,
    username: String,
    email: String,
    name: Option<String>,
    site_admin: bool,
}

impl Postgres {
    /// Create a new session for an account.
    ///
    /// The session token should be generated using
    /// `crypto::generate_session_token()`. The token is hashed before
    /// storage.
    #[tracing::instrument(name = "Postgres::create_session", skip(token))]
    pub async fn create_session(
        &self,
        user_id: UserId,
        token: &SessionToken,
        expires_at: OffsetDateTime,
    ) -> Result<()> {
        let hash = TokenHash::new(token.expose());
        sqlx::query(
            r#"
            INSERT INTO user_session (account_id, token_hash, expires_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(user_id.as_i64())
        .bind(hash.as_bytes())
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .context("create session")?;

        Ok(())
    }

    /// Validate a session token and return the authenticated caller.
    ///
    /// Returns `None` if the token is unknown, expired, or revoked.
    #[tracing::instrument(name = "Postgres::validate_session", skip(token))]
    pub async fn validate_session(&self, token: &SessionToken) -> Result<Option<SessionContext>> {
        let hash = TokenHash::new(token.expose());
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT a.id, a.username, a.email, a.name, a.site_admin
            FROM user_session s
            JOIN account a ON s.account_id = a.id
            WHERE s.token_hash = $1
              AND s.expires_at > NOW()
              AND s.revoked_at IS NULL
            "#,
        )
        .bind(hash.as_bytes())
        .fetch_optional(&self.pool)
        .await
        .context("validate session")?;

        Ok(row.map(|r| SessionContext {
            user_id: UserId::from_i64(r.id),
            username: r.username,
            email: r.email,
            name: r.name,
            site_admin: r.site_admin,
        }))
    }

    /// Revoke a session.
    #[tracing::instrument(name = "Postgres::revoke_session", skip(token))]
    pub async fn revoke_session(&self, token: &SessionToken) -> Result<bool> {
        let hash = TokenHash::new(token.expose());
        let result = sqlx::query(
            r#"
            UPDATE user_session
            SET revoked_at = NOW()
            WHERE token_hash = $1 AND revoked_at IS NULL
            "#,
        )
        .bind(hash.as_bytes())
        .execute(&self.pool)
        .await
        .context("revoke session")?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete sessions that expired or were revoked.
    ///
    /// Returns the number of sessions deleted.
    #[tracing::instrument(name = "Postgres::cleanup_sessions")]
    pub async fn cleanup_sessions(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM user_session
            WHERE expires_at < NOW() OR revoked_at IS NOT NULL
            "#,
        )
        .execute(&self.pool)
        .await
        .context("cleanup sessions")?;

        Ok(result.rows_affected())
    }
}

// =============================================================================
// Invitation Operations
// =============================================================================

/// A workspace invitation record, with the inviter's username and the
/// workspace's name joined in.
#[derive(Clone, Debug)]
pub struct Invitation {
    pub id: InvitationId,
    pub workspace_id: WorkspaceId,
    pub inviter_id: UserId,
    pub email: String,
    pub access_level: AccessLevel,
    #[debug(skip)]
    pub token: String,
    pub status: InvitationStatus,
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
    pub responded_at: Option<OffsetDateTime>,
    pub inviter_username: String,
    pub workspace_name: String,
}

#[derive(sqlx::FromRow)]
struct InvitationRow {
    id: i64,
    workspace_id: i64,
    inviter_id: i64,
    email: String,
    access_level: String,
    token: String,
    status: String,
    expires_at: OffsetDateTime,
    created_at: OffsetDateTime,
    responded_at: Option<OffsetDateTime>,
    inviter_username: String,
    workspace_name: String,
}

impl TryFrom<InvitationRow> for Invitation {
    type Error = color_eyre::Report;

    fn try_from(row: InvitationRow) -> Result<Self> {
        Ok(Self {
            id: InvitationId::from_i64(row.id),
            workspace_id: WorkspaceId::from_i64(row.workspace_id),
            inviter_id: UserId::from_i64(row.inviter_id),
            email: row.email,
            access_level: parse_access_level(&row.access_level)?,
            token: row.token,
            status: parse_status(&row.status)?,
            expires_at: row.expires_at,
            created_at: row.created_at,
            responded_at: row.responded_at,
            inviter_username: row.inviter_username,
            workspace_name: row.workspace_name,
        })
    }
}

/// The fields needed to create an invitation.
#[derive(Clone, Debug)]
pub struct NewInvitation<'a> {
    pub workspace_id: WorkspaceId,
    pub inviter_id: UserId,
    pub email: &'a str,
    pub access_level: AccessLevel,
    #[debug(skip)]
    pub token: &'a str,
    pub expires_at: OffsetDateTime,
}

/// Result of accepting an invitation.
#[derive(Clone, Debug)]
pub enum AcceptInvitationResult {
    /// The caller is now a collaborator on the workspace.
    Accepted(Collaborator),
    /// No invitation has the token.
    NotFound,
    /// The invitation is no longer pending.
    NotPending(InvitationStatus),
    /// The invitation is pending but past its expiry.
    Expired,
    /// The caller's email does not match the invitation.
    EmailMismatch,
    /// The caller already collaborates on the workspace.
    AlreadyCollaborator,
}

/// Result of declining an invitation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeclineInvitationResult {
    Declined,
    NotFound,
    NotPending(InvitationStatus),
}

/// Result of canceling an invitation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelInvitationResult {
    Canceled,
    /// The invitation was already canceled; canceling again is a no-op.
    AlreadyCanceled,
    /// The invitation was resolved some other way and cannot be canceled.
    NotPending(InvitationStatus),
    NotFound,
}

impl Postgres {
    /// Create a pending invitation.
    #[tracing::instrument(name = "Postgres::create_invitation")]
    pub async fn create_invitation(&self, invitation: NewInvitation<'_>) -> Result<Invitation> {
        let row = sqlx::query_as::<_, InvitationRow>(
            r#"
            WITH inserted AS (
              INSERT INTO workspace_invitation
                (workspace_id, inviter_id, email, access_level, token, expires_at)
              VALUES ($1, $2, $3, $4, $5, $6)
              RETURNING *
            )
            SELECT i.id, i.workspace_id, i.inviter_id, i.email, i.access_level, i.token,
                   i.status, i.expires_at, i.created_at, i.responded_at,
                   a.username AS inviter_username, w.name AS workspace_name
            FROM inserted i
            JOIN account a ON i.inviter_id = a.id
            JOIN workspace w ON i.workspace_id = w.id
            "#,
        )
        .bind(invitation.workspace_id.as_i64())
        .bind(invitation.inviter_id.as_i64())
        .bind(invitation.email)
        .bind(invitation.access_level.as_db_name())
        .bind(invitation.token)
        .bind(invitation.expires_at)
        .fetch_one(&self.pool)
        .await
        .context("insert invitation")?;

        Invitation::try_from(row)
    }

    /// Get an invitation by its token.
    #[tracing::instrument(name = "Postgres::get_invitation_by_token", skip(token))]
    pub async fn get_invitation_by_token(&self, token: &str) -> Result<Option<Invitation>> {
        let row = sqlx::query_as::<_, InvitationRow>(
            r#"
            SELECT i.id, i.workspace_id, i.inviter_id, i.email, i.access_level, i.token,
                   i.status, i.expires_at, i.created_at, i.responded_at,
                   a.username AS inviter_username, w.name AS workspace_name
            FROM workspace_invitation i
            JOIN account a ON i.inviter_id = a.id
            JOIN workspace w ON i.workspace_id = w.id
            WHERE i.token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .context("fetch invitation by token")?;

        row.map(Invitation::try_from).transpose()
    }

    /// List all invitations for a workspace, newest first.
    #[tracing::instrument(name = "Postgres::list_invitations")]
    pub async fn list_invitations(&self, workspace_id: WorkspaceId) -> Result<Vec<Invitation>> {
        let rows = sqlx::query_as::<_, InvitationRow>(
            r#"
            SELECT i.id, i.workspace_id, i.inviter_id, i.email, i.access_level, i.token,
                   i.status, i.expires_at, i.created_at, i.responded_at,
                   a.username AS inviter_username, w.name AS workspace_name
            FROM workspace_invitation i
            JOIN account a ON i.inviter_id = a.id
            JOIN workspace w ON i.workspace_id = w.id
            WHERE i.workspace_id = $1
            ORDER BY i.created_at DESC, i.id DESC
            "#,
        )
        .bind(workspace_id.as_i64())
        .fetch_all(&self.pool)
        .await
        .context("list invitations")?;

        rows.into_iter().map(Invitation::try_from).collect()
    }

    /// List the pending, unexpired invitations addressed to an email.
    #[tracing::instrument(name = "Postgres::list_pending_invitations_for_email")]
    pub async fn list_pending_invitations_for_email(&self, email: &str) -> Result<Vec<Invitation>> {
        let rows = sqlx::query_as::<_, InvitationRow>(
            r#"
            SELECT i.id, i.workspace_id, i.inviter_id, i.email, i.access_level, i.token,
                   i.status, i.expires_at, i.created_at, i.responded_at,
                   a.username AS inviter_username, w.name AS workspace_name
            FROM workspace_invitation i
            JOIN account a ON i.inviter_id = a.id
            JOIN workspace w ON i.workspace_id = w.id
            WHERE i.email = $1
              AND i.status = 'pending'
              AND i.expires_at > NOW()
            ORDER BY i.created_at DESC, i.id DESC
            "#,
        )
        .bind(email)
        .fetch_all(&self.pool)
        .await
        .context("list pending invitations for email")?;

        rows.into_iter().map(Invitation::try_from).collect()
    }

    /// Accept an invitation on behalf of the caller.
    ///
    /// The invitation row is locked for the duration of the transaction, so
    /// concurrent accept/decline/cancel calls on the same invitation are
    /// serialized. The collaborator insert relies on the
    /// `(workspace_id, user_id)` unique constraint, so concurrent accepts of
    /// different invitations to the same workspace create at most one row.
    #[tracing::instrument(name = "Postgres::accept_invitation", skip(token))]
    pub async fn accept_invitation(
        &self,
        token: &str,
        caller: &SessionContext,
    ) -> Result<AcceptInvitationResult> {
        let mut tx = self.pool.begin().await.context("begin transaction")?;

        let invitation = sqlx::query_as::<_, InvitationRow>(
            r#"
            SELECT i.id, i.workspace_id, i.inviter_id, i.email, i.access_level, i.token,
                   i.status, i.expires_at, i.created_at, i.responded_at,
                   a.username AS inviter_username, w.name AS workspace_name
            FROM workspace_invitation i
            JOIN account a ON i.inviter_id = a.id
            JOIN workspace w ON i.workspace_id = w.id
            WHERE i.token = $1
            FOR UPDATE OF i
            "#,
        )
        .bind(token)
        .fetch_optional(tx.as_mut())
        .await
        .context("fetch invitation for update")?;

        let Some(invitation) = invitation.map(Invitation::try_from).transpose()? else {
            return Ok(AcceptInvitationResult::NotFound);
        };
        if invitation.status != InvitationStatus::Pending {
            return Ok(AcceptInvitationResult::NotPending(invitation.status));
        }
        if invitation.expires_at <= OffsetDateTime::now_utc() {
            return Ok(AcceptInvitationResult::Expired);
        }
        if invitation.email != caller.email {
            return Ok(AcceptInvitationResult::EmailMismatch);
        }

        let inserted = insert_collaborator(
            tx.as_mut(),
            invitation.workspace_id,
            caller.user_id,
            invitation.access_level,
            Some(invitation.inviter_id),
        )
        .await?;
        let Some(collaborator_id) = inserted else {
            // Dropping the transaction rolls back; the invitation stays pending.
            return Ok(AcceptInvitationResult::AlreadyCollaborator);
        };

        sqlx::query(
            r#"
            UPDATE workspace_invitation
            SET status = 'accepted', responded_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(invitation.id.as_i64())
        .execute(tx.as_mut())
        .await
        .context("mark invitation accepted")?;

        let collaborator = fetch_collaborator(tx.as_mut(), collaborator_id)
            .await?
            .ok_or_else(|| eyre!("collaborator {collaborator_id} missing after insert"))?;

        tx.commit().await.context("commit transaction")?;
        Ok(AcceptInvitationResult::Accepted(collaborator))
    }

    /// Decline a pending invitation.
    #[tracing::instrument(name = "Postgres::decline_invitation", skip(token))]
    pub async fn decline_invitation(&self, token: &str) -> Result<DeclineInvitationResult> {
        let declined = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE workspace_invitation
            SET status = 'declined', responded_at = NOW()
            WHERE token = $1 AND status = 'pending'
            RETURNING id
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .context("decline invitation")?;
        if declined.is_some() {
            return Ok(DeclineInvitationResult::Declined);
        }

        let status = sqlx::query_scalar::<_, String>(
            r#"
            SELECT status FROM workspace_invitation WHERE token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .context("fetch invitation status")?;

        match status.as_deref().map(parse_status).transpose()? {
            Some(status) if status.is_terminal() => Ok(DeclineInvitationResult::NotPending(status)),
            Some(status) => bail!("invitation still {status} after conditional decline"),
            None => Ok(DeclineInvitationResult::NotFound),
        }
    }

    /// Cancel a pending invitation belonging to a workspace.
    #[tracing::instrument(name = "Postgres::cancel_invitation")]
    pub async fn cancel_invitation(
        &self,
        workspace_id: WorkspaceId,
        invitation_id: InvitationId,
    ) -> Result<CancelInvitationResult> {
        let canceled = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE workspace_invitation
            SET status = 'canceled', responded_at = NOW()
            WHERE id = $1 AND workspace_id = $2 AND status = 'pending'
            RETURNING id
            "#,
        )
        .bind(invitation_id.as_i64())
        .bind(workspace_id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .context("cancel invitation")?;
        if canceled.is_some() {
            return Ok(CancelInvitationResult::Canceled);
        }

        let status = sqlx::query_scalar::<_, String>(
            r#"
            SELECT status FROM workspace_invitation WHERE id = $1 AND workspace_id = $2
            "#,
        )
        .bind(invitation_id.as_i64())
        .bind(workspace_id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .context("fetch invitation status")?;

        match status.as_deref().map(parse_status).transpose()? {
            Some(InvitationStatus::Canceled) => Ok(CancelInvitationResult::AlreadyCanceled),
            Some(status) if status.is_terminal() => Ok(CancelInvitationResult::NotPending(status)),
            Some(status) => bail!("invitation {invitation_id} still {status} after conditional cancel"),
            None => Ok(CancelInvitationResult::NotFound),
        }
    }

    /// Transition every pending invitation past its expiry to `expired`.
    ///
    /// Returns the number of invitations expired.
    #[tracing::instrument(name = "Postgres::expire_invitations")]
    pub async fn expire_invitations(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE workspace_invitation
            SET status = 'expired', responded_at = NOW()
            WHERE status = 'pending' AND expires_at <= NOW()
            "#,
        )
        .execute(&self.pool)
        .await
        .context("expire invitations")?;

        Ok(result.rows_affected())
    }
}

// =============================================================================
// Collaborator Operations
// =============================================================================

/// A workspace collaborator record, with the user's identity and the
/// workspace's name joined in.
#[derive(Clone, Debug)]
pub struct Collaborator {
    pub id: CollaboratorId,
    pub workspace_id: WorkspaceId,
    pub user_id: UserId,
    pub access_level: AccessLevel,
    pub invited_by: Option<UserId>,
    pub created_at: OffsetDateTime,
    pub username: String,
    pub email: String,
    pub avatar_url: Option<String>,
    pub workspace_name: String,
}

#[derive(sqlx::FromRow)]
struct CollaboratorRow {
    id: i64,
    workspace_id: i64,
    user_id: i64,
    access_level: String,
    invited_by: Option<i64>,
    created_at: OffsetDateTime,
    username: String,
    email: String,
    avatar_url: Option<String>,
    workspace_name: String,
}

impl TryFrom<CollaboratorRow> for Collaborator {
    type Error = color_eyre::Report;

    fn try_from(row: CollaboratorRow) -> Result<Self> {
        Ok(Self {
            id: CollaboratorId::from_i64(row.id),
            workspace_id: WorkspaceId::from_i64(row.workspace_id),
            user_id: UserId::from_i64(row.user_id),
            access_level: parse_access_level(&row.access_level)?,
            invited_by: row.invited_by.map(UserId::from_i64),
            created_at: row.created_at,
            username: row.username,
            email: row.email,
            avatar_url: row.avatar_url,
            workspace_name: row.workspace_name,
        })
    }
}

/// Insert a collaborator, returning `None` if the user already collaborates
/// on the workspace.
async fn insert_collaborator(
    conn: &mut PgConnection,
    workspace_id: WorkspaceId,
    user_id: UserId,
    access_level: AccessLevel,
    invited_by: Option<UserId>,
) -> Result<Option<CollaboratorId>> {
    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO workspace_collaborator (workspace_id, user_id, access_level, invited_by)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (workspace_id, user_id) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(workspace_id.as_i64())
    .bind(user_id.as_i64())
    .bind(access_level.as_db_name())
    .bind(invited_by.map(|id| id.as_i64()))
    .fetch_optional(conn)
    .await
    .context("insert collaborator")?;

    Ok(id.map(CollaboratorId::from_i64))
}

async fn fetch_collaborator(
    conn: &mut PgConnection,
    collaborator_id: CollaboratorId,
) -> Result<Option<Collaborator>> {
    let row = sqlx::query_as::<_, CollaboratorRow>(
        r#"
        SELECT c.id, c.workspace_id, c.user_id, c.access_level, c.invited_by, c.created_at,
               a.username, a.email, a.avatar_url, w.name AS workspace_name
        FROM workspace_collaborator c
        JOIN account a ON c.user_id = a.id
        JOIN workspace w ON c.workspace_id = w.id
        WHERE c.id = $1
        "#,
    )
    .bind(collaborator_id.as_i64())
    .fetch_optional(conn)
    .await
    .context("fetch collaborator")?;

    row.map(Collaborator::try_from).transpose()
}

impl Postgres {
    /// Add a user to a workspace directly.
    ///
    /// Returns `None` if the user already collaborates on the workspace.
    #[tracing::instrument(name = "Postgres::add_collaborator")]
    pub async fn add_collaborator(
        &self,
        workspace_id: WorkspaceId,
        user_id: UserId,
        access_level: AccessLevel,
        invited_by: Option<UserId>,
    ) -> Result<Option<Collaborator>> {
        let mut conn = self.pool.acquire().await.context("acquire connection")?;
        let Some(id) =
            insert_collaborator(&mut conn, workspace_id, user_id, access_level, invited_by).await?
        else {
            return Ok(None);
        };
        fetch_collaborator(&mut conn, id).await
    }

    /// List the collaborators on a workspace, oldest first.
    #[tracing::instrument(name = "Postgres::list_collaborators")]
    pub async fn list_collaborators(&self, workspace_id: WorkspaceId) -> Result<Vec<Collaborator>> {
        let rows = sqlx::query_as::<_, CollaboratorRow>(
            r#"
            SELECT c.id, c.workspace_id, c.user_id, c.access_level, c.invited_by, c.created_at,
                   a.username, a.email, a.avatar_url, w.name AS workspace_name
            FROM workspace_collaborator c
            JOIN account a ON c.user_id = a.id
            JOIN workspace w ON c.workspace_id = w.id
            WHERE c.workspace_id = $1
            ORDER BY c.created_at, c.id
            "#,
        )
        .bind(workspace_id.as_i64())
        .fetch_all(&self.pool)
        .await
        .context("list collaborators")?;

        rows.into_iter().map(Collaborator::try_from).collect()
    }

    /// List the workspaces a user collaborates on.
    #[tracing::instrument(name = "Postgres::list_collaborations_for_user")]
    pub async fn list_collaborations_for_user(&self, user_id: UserId) -> Result<Vec<Collaborator>> {
        let rows = sqlx::query_as::<_, CollaboratorRow>(
            r#"
            SELECT c.id, c.workspace_id, c.user_id, c.access_level, c.invited_by, c.created_at,
                   a.username, a.email, a.avatar_url, w.name AS workspace_name
            FROM workspace_collaborator c
            JOIN account a ON c.user_id = a.id
            JOIN workspace w ON c.workspace_id = w.id
            WHERE c.user_id = $1
            ORDER BY c.created_at, c.id
            "#,
        )
        .bind(user_id.as_i64())
        .fetch_all(&self.pool)
        .await
        .context("list collaborations for user")?;

        rows.into_iter().map(Collaborator::try_from).collect()
    }

    /// Change a collaborator's access level.
    ///
    /// Returns `None` if no collaborator with the ID exists on the workspace.
    #[tracing::instrument(name = "Postgres::update_collaborator")]
    pub async fn update_collaborator(
        &self,
        workspace_id: WorkspaceId,
        collaborator_id: CollaboratorId,
        access_level: AccessLevel,
    ) -> Result<Option<Collaborator>> {
        let mut conn = self.pool.acquire().await.context("acquire connection")?;
        let updated = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE workspace_collaborator
            SET access_level = $3
            WHERE id = $1 AND workspace_id = $2
            RETURNING id
            "#,
        )
        .bind(collaborator_id.as_i64())
        .bind(workspace_id.as_i64())
        .bind(access_level.as_db_name())
        .fetch_optional(conn.as_mut())
        .await
        .context("update collaborator")?;

        match updated {
            Some(id) => fetch_collaborator(&mut conn, CollaboratorId::from_i64(id)).await,
            None => Ok(None),
        }
    }

    /// Remove a collaborator from a workspace.
    ///
    /// Returns `false` if no collaborator with the ID exists on the workspace.
    #[tracing::instrument(name = "Postgres::remove_collaborator")]
    pub async fn remove_collaborator(
        &self,
        workspace_id: WorkspaceId,
        collaborator_id: CollaboratorId,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM workspace_collaborator
            WHERE id = $1 AND workspace_id = $2
            "#,
        )
        .bind(collaborator_id.as_i64())
        .bind(workspace_id.as_i64())
        .execute(&self.pool)
        .await
        .context("remove collaborator")?;

        Ok(result.rows_affected() > 0)
    }
}

// =============================================================================
// External Auth Provider Operations
// =============================================================================

/// An external auth provider record from the database.
///
/// Secrets are kept in their sealed form; see [`crate::crypto::SecretCipher`].
#[derive(Clone, Debug)]
pub struct ExternalAuthProvider {
    pub id: String,
    pub provider_type: String,
    pub client_id: String,
    pub client_secret: SealedSecret,
    pub display_name: Option<String>,
    pub display_icon: Option<String>,
    pub auth_url: Option<String>,
    pub token_url: Option<String>,
    pub validate_url: Option<String>,
    pub scopes: Vec<String>,
    pub no_refresh: bool,
    pub device_flow: bool,
    pub regex: Option<String>,
    pub app_install_url: Option<String>,
    pub app_installations_url: Option<String>,
    pub github_app_id: Option<i64>,
    pub github_app_webhook_secret: Option<SealedSecret>,
    pub github_app_private_key: Option<SealedSecret>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(sqlx::FromRow)]
struct ExternalAuthProviderRow {
    id: String,
    provider_type: String,
    client_id: String,
    client_secret_encrypted: Vec<u8>,
    client_secret_key_id: Option<String>,
    display_name: Option<String>,
    display_icon: Option<String>,
    auth_url: Option<String>,
    token_url: Option<String>,
    validate_url: Option<String>,
    scopes: Vec<String>,
    no_refresh: bool,
    device_flow: bool,
    regex: Option<String>,
    app_install_url: Option<String>,
    app_installations_url: Option<String>,
    github_app_id: Option<i64>,
    github_app_webhook_secret_encrypted: Option<Vec<u8>>,
    github_app_webhook_secret_key_id: Option<String>,
    github_app_private_key_encrypted: Option<Vec<u8>>,
    github_app_private_key_key_id: Option<String>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<ExternalAuthProviderRow> for ExternalAuthProvider {
    fn from(row: ExternalAuthProviderRow) -> Self {
        Self {
            id: row.id,
            provider_type: row.provider_type,
            client_id: row.client_id,
            client_secret: SealedSecret {
                bytes: row.client_secret_encrypted,
                key_id: row.client_secret_key_id,
            },
            display_name: row.display_name,
            display_icon: row.display_icon,
            auth_url: row.auth_url,
            token_url: row.token_url,
            validate_url: row.validate_url,
            scopes: row.scopes,
            no_refresh: row.no_refresh,
            device_flow: row.device_flow,
            regex: row.regex,
            app_install_url: row.app_install_url,
            app_installations_url: row.app_installations_url,
            github_app_id: row.github_app_id,
            github_app_webhook_secret: row.github_app_webhook_secret_encrypted.map(|bytes| {
                SealedSecret {
                    bytes,
                    key_id: row.github_app_webhook_secret_key_id,
                }
            }),
            github_app_private_key: row.github_app_private_key_encrypted.map(|bytes| {
                SealedSecret {
                    bytes,
                    key_id: row.github_app_private_key_key_id,
                }
            }),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// The fields needed to create an external auth provider.
///
/// Empty strings are stored as `NULL`.
#[derive(Clone, Debug)]
pub struct NewExternalAuthProvider {
    pub id: String,
    pub provider_type: String,
    pub client_id: String,
    pub client_secret: SealedSecret,
    pub display_name: Option<String>,
    pub display_icon: Option<String>,
    pub auth_url: Option<String>,
    pub token_url: Option<String>,
    pub validate_url: Option<String>,
    pub scopes: Vec<String>,
    pub no_refresh: bool,
    pub device_flow: bool,
    pub regex: Option<String>,
    pub app_install_url: Option<String>,
    pub app_installations_url: Option<String>,
    pub github_app_id: Option<i64>,
    pub github_app_webhook_secret: Option<SealedSecret>,
    pub github_app_private_key: Option<SealedSecret>,
}

/// A partial update to an external auth provider; `None` keeps the stored
/// value.
#[derive(Clone, Debug, Default)]
pub struct ExternalAuthProviderUpdate {
    pub display_name: Option<String>,
    pub display_icon: Option<String>,
    pub scopes: Option<Vec<String>>,
    pub no_refresh: Option<bool>,
    pub device_flow: Option<bool>,
    pub regex: Option<String>,
}

/// Result of inserting an external auth provider.
#[derive(Clone, Debug)]
pub enum InsertProviderResult {
    Created(ExternalAuthProvider),
    /// A provider with the same ID already exists.
    Duplicate,
}

impl Postgres {
    /// List all external auth providers, ordered by ID.
    #[tracing::instrument(name = "Postgres::list_external_auth_providers")]
    pub async fn list_external_auth_providers(&self) -> Result<Vec<ExternalAuthProvider>> {
        let rows = sqlx::query_as::<_, ExternalAuthProviderRow>(
            r#"
            SELECT * FROM external_auth_provider ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("list external auth providers")?;

        Ok(rows.into_iter().map(ExternalAuthProvider::from).collect())
    }

    /// Get an external auth provider by ID.
    #[tracing::instrument(name = "Postgres::get_external_auth_provider")]
    pub async fn get_external_auth_provider(&self, id: &str) -> Result<Option<ExternalAuthProvider>> {
        let row = sqlx::query_as::<_, ExternalAuthProviderRow>(
            r#"
            SELECT * FROM external_auth_provider WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("fetch external auth provider")?;

        Ok(row.map(ExternalAuthProvider::from))
    }

    /// Insert an external auth provider.
    #[tracing::instrument(name = "Postgres::insert_external_auth_provider", skip(provider), fields(id = %provider.id))]
    pub async fn insert_external_auth_provider(
        &self,
        provider: NewExternalAuthProvider,
    ) -> Result<InsertProviderResult> {
        let (webhook_secret, webhook_key_id) = split_sealed(provider.github_app_webhook_secret);
        let (private_key, private_key_key_id) = split_sealed(provider.github_app_private_key);

        let row = sqlx::query_as::<_, ExternalAuthProviderRow>(
            r#"
            INSERT INTO external_auth_provider (
              id, provider_type, client_id, client_secret_encrypted, client_secret_key_id,
              display_name, display_icon, auth_url, token_url, validate_url, scopes,
              no_refresh, device_flow, regex, app_install_url, app_installations_url,
              github_app_id, github_app_webhook_secret_encrypted,
              github_app_webhook_secret_key_id, github_app_private_key_encrypted,
              github_app_private_key_key_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21)
            ON CONFLICT (id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(provider.id)
        .bind(provider.provider_type)
        .bind(provider.client_id)
        .bind(provider.client_secret.bytes)
        .bind(provider.client_secret.key_id)
        .bind(provider.display_name)
        .bind(provider.display_icon)
        .bind(provider.auth_url)
        .bind(provider.token_url)
        .bind(provider.validate_url)
        .bind(provider.scopes)
        .bind(provider.no_refresh)
        .bind(provider.device_flow)
        .bind(provider.regex)
        .bind(provider.app_install_url)
        .bind(provider.app_installations_url)
        .bind(provider.github_app_id)
        .bind(webhook_secret)
        .bind(webhook_key_id)
        .bind(private_key)
        .bind(private_key_key_id)
        .fetch_optional(&self.pool)
        .await
        .context("insert external auth provider")?;

        Ok(match row {
            Some(row) => InsertProviderResult::Created(row.into()),
            None => InsertProviderResult::Duplicate,
        })
    }

    /// Apply a partial update to an external auth provider.
    ///
    /// Returns `None` if no provider with the ID exists.
    #[tracing::instrument(name = "Postgres::update_external_auth_provider")]
    pub async fn update_external_auth_provider(
        &self,
        id: &str,
        update: ExternalAuthProviderUpdate,
    ) -> Result<Option<ExternalAuthProvider>> {
        let row = sqlx::query_as::<_, ExternalAuthProviderRow>(
            r#"
            UPDATE external_auth_provider
            SET display_name = COALESCE($2, display_name),
                display_icon = COALESCE($3, display_icon),
                scopes = COALESCE($4, scopes),
                no_refresh = COALESCE($5, no_refresh),
                device_flow = COALESCE($6, device_flow),
                regex = COALESCE($7, regex),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(update.display_name)
        .bind(update.display_icon)
        .bind(update.scopes)
        .bind(update.no_refresh)
        .bind(update.device_flow)
        .bind(update.regex)
        .fetch_optional(&self.pool)
        .await
        .context("update external auth provider")?;

        Ok(row.map(ExternalAuthProvider::from))
    }

    /// Delete an external auth provider.
    ///
    /// Returns `false` if no provider with the ID exists.
    #[tracing::instrument(name = "Postgres::delete_external_auth_provider")]
    pub async fn delete_external_auth_provider(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM external_auth_provider WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .context("delete external auth provider")?;

        Ok(result.rows_affected() > 0)
    }
}

fn split_sealed(secret: Option<SealedSecret>) -> (Option<Vec<u8>>, Option<String>) {
    match secret {
        Some(SealedSecret { bytes, key_id }) => (Some(bytes), key_id),
        None => (None, None),
    }
}

// =============================================================================
// Manifest State Operations
// =============================================================================

/// A GitHub App manifest state record from the database.
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct ManifestState {
    pub state: String,
    pub redirect_uri: String,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

impl Postgres {
    /// Store a manifest state for the GitHub App creation flow.
    #[tracing::instrument(name = "Postgres::store_manifest_state", skip(state))]
    pub async fn store_manifest_state(
        &self,
        state: &str,
        redirect_uri: &str,
        expires_at: OffsetDateTime,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO external_auth_manifest_state (state, redirect_uri, expires_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(state)
        .bind(redirect_uri)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .context("store manifest state")?;

        Ok(())
    }

    /// Look up an unexpired manifest state without consuming it.
    #[tracing::instrument(name = "Postgres::get_manifest_state", skip(state))]
    pub async fn get_manifest_state(&self, state: &str) -> Result<Option<ManifestState>> {
        sqlx::query_as::<_, ManifestState>(
            r#"
            SELECT state, redirect_uri, created_at, expires_at
            FROM external_auth_manifest_state
            WHERE state = $1 AND expires_at > NOW()
            "#,
        )
        .bind(state)
        .fetch_optional(&self.pool)
        .await
        .context("fetch manifest state")
    }

    /// Consume a manifest state (fetch and delete atomically).
    ///
    /// Returns `None` if the state doesn't exist or has expired.
    #[tracing::instrument(name = "Postgres::consume_manifest_state", skip(state))]
    pub async fn consume_manifest_state(&self, state: &str) -> Result<Option<ManifestState>> {
        sqlx::query_as::<_, ManifestState>(
            r#"
            DELETE FROM external_auth_manifest_state
            WHERE state = $1 AND expires_at > NOW()
            RETURNING state, redirect_uri, created_at, expires_at
            "#,
        )
        .bind(state)
        .fetch_optional(&self.pool)
        .await
        .context("consume manifest state")
    }

    /// Delete expired manifest states.
    ///
    /// Returns the number of records deleted.
    #[tracing::instrument(name = "Postgres::cleanup_expired_manifest_states")]
    pub async fn cleanup_expired_manifest_states(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM external_auth_manifest_state
            WHERE expires_at <= NOW()
            "#,
        )
        .execute(&self.pool)
        .await
        .context("cleanup expired manifest states")?;

        Ok(result.rows_affected())
    }
}
