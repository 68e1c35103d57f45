use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Acquire, PgPool};
use uuid::Uuid;

use crate::models::creator::{Creator, NewCreator};
use crate::models::invite::Invite;
use crate::models::user::{NewUser, User};

use super::{
    IssueOutcome, LineageWrite, NewInvites, RedeemOutcome, ResetScope, Result, StoreError,
    MAX_CODE_DRAWS,
};

const USER_COLUMNS: &str = "id, email, password_hash, role, created_at, updated_at";

const CREATOR_COLUMNS: &str = "id, display_name, bio, niche, location, avatar_url, collab_status,
     inviter_id, invites_remaining, invite_reset_at, created_at";

const INVITE_COLUMNS: &str = "id, code, inviter_id, used_by, used_at, expires_at, created_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect and bring the schema up to date.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
        sqlx::migrate!().run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // --- Users ---

    pub async fn create_user(&self, user: &NewUser) -> Result<User> {
        sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (id, email, password_hash, role)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (email) DO NOTHING
             RETURNING {USER_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::Duplicate)
    }

    pub async fn find_user(&self, id: Uuid) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    pub async fn count_users(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // --- Creators ---

    pub async fn create_creator(&self, creator: &NewCreator) -> Result<Creator> {
        // inviter_id is derived from the invites table so a profile created
        // after its owner redeemed a code still carries the lineage.
        sqlx::query_as::<_, Creator>(&format!(
            "INSERT INTO creators (id, display_name, bio, niche, location, avatar_url,
                                   collab_status, inviter_id, invites_remaining,
                                   invite_reset_at, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7,
                     (SELECT inviter_id FROM invites
                      WHERE used_by = $1
                      ORDER BY used_at LIMIT 1),
                     $8, $9, $10)
             ON CONFLICT (id) DO NOTHING
             RETURNING {CREATOR_COLUMNS}"
        ))
        .bind(creator.id)
        .bind(&creator.display_name)
        .bind(&creator.bio)
        .bind(&creator.niche)
        .bind(&creator.location)
        .bind(&creator.avatar_url)
        .bind(&creator.collab_status)
        .bind(creator.invites_remaining)
        .bind(creator.invite_reset_at)
        .bind(creator.created_at)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::Duplicate)
    }

    pub async fn get_creator(&self, id: Uuid) -> Result<Option<Creator>> {
        let creator = sqlx::query_as::<_, Creator>(&format!(
            "SELECT {CREATOR_COLUMNS} FROM creators WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(creator)
    }

    pub async fn get_creators(&self, ids: &[Uuid]) -> Result<Vec<Creator>> {
        let creators = sqlx::query_as::<_, Creator>(&format!(
            "SELECT {CREATOR_COLUMNS} FROM creators WHERE id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(creators)
    }

    pub async fn reset_invite_allowance(
        &self,
        scope: ResetScope,
        allowance: i32,
        next_reset_at: DateTime<Utc>,
    ) -> Result<u64> {
        let query = match scope {
            ResetScope::Creator(id) => sqlx::query(
                "UPDATE creators SET invites_remaining = $1, invite_reset_at = $2
                 WHERE id = $3",
            )
            .bind(allowance)
            .bind(next_reset_at)
            .bind(id),
            ResetScope::Due(now) => sqlx::query(
                "UPDATE creators SET invites_remaining = $1, invite_reset_at = $2
                 WHERE invite_reset_at IS NULL OR invite_reset_at <= $3",
            )
            .bind(allowance)
            .bind(next_reset_at)
            .bind(now),
        };
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    // --- Invites ---

    pub async fn issue_invites<F>(&self, batch: NewInvites, mut next_code: F) -> Result<IssueOutcome>
    where
        F: FnMut() -> String + Send,
    {
        let count = i32::try_from(batch.count).unwrap_or(i32::MAX);
        let mut tx = self.pool.begin().await?;

        // Conditional decrement first: it both checks the balance and locks
        // the creator row for the rest of the batch.
        let remaining: Option<i32> = sqlx::query_scalar(
            "UPDATE creators SET invites_remaining = invites_remaining - $2
             WHERE id = $1 AND invites_remaining >= $2
             RETURNING invites_remaining",
        )
        .bind(batch.inviter_id)
        .bind(count)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(invites_remaining) = remaining else {
            let current: Option<i32> =
                sqlx::query_scalar("SELECT invites_remaining FROM creators WHERE id = $1")
                    .bind(batch.inviter_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            return Ok(match current {
                None => IssueOutcome::CreatorNotFound,
                Some(invites_remaining) => IssueOutcome::Insufficient { invites_remaining },
            });
        };

        let mut invites = Vec::with_capacity(batch.count as usize);
        for _ in 0..batch.count {
            let mut draws = 0;
            let invite = loop {
                if draws == MAX_CODE_DRAWS {
                    return Err(StoreError::CodeSpaceExhausted { attempts: draws });
                }
                draws += 1;

                let code = next_code();
                let inserted = sqlx::query_as::<_, Invite>(&format!(
                    "INSERT INTO invites (id, code, inviter_id, expires_at, created_at)
                     VALUES ($1, $2, $3, $4, $5)
                     ON CONFLICT (code) DO NOTHING
                     RETURNING {INVITE_COLUMNS}"
                ))
                .bind(Uuid::new_v4())
                .bind(&code)
                .bind(batch.inviter_id)
                .bind(batch.expires_at)
                .bind(batch.created_at)
                .fetch_optional(&mut *tx)
                .await?;

                match inserted {
                    Some(invite) => break invite,
                    None => tracing::debug!(%code, "invite code collision, redrawing"),
                }
            };
            invites.push(invite);
        }

        tx.commit().await?;

        Ok(IssueOutcome::Issued {
            invites,
            invites_remaining,
        })
    }

    pub async fn find_invite_by_code(&self, code: &str) -> Result<Option<Invite>> {
        let invite = sqlx::query_as::<_, Invite>(&format!(
            "SELECT {INVITE_COLUMNS} FROM invites WHERE code = $1"
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(invite)
    }

    pub async fn redeem_invite(
        &self,
        code: &str,
        redeemer: Uuid,
        now: DateTime<Utc>,
    ) -> Result<RedeemOutcome> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query_as::<_, Invite>(&format!(
            "UPDATE invites SET used_by = $2, used_at = $3
             WHERE code = $1 AND used_by IS NULL AND expires_at > $3
             RETURNING {INVITE_COLUMNS}"
        ))
        .bind(code)
        .bind(redeemer)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(invite) = claimed else {
            let existing = sqlx::query_as::<_, Invite>(&format!(
                "SELECT {INVITE_COLUMNS} FROM invites WHERE code = $1"
            ))
            .bind(code)
            .fetch_optional(&mut *tx)
            .await?;
            return Ok(RedeemOutcome::unclaimed(existing.as_ref()));
        };

        // The lineage link runs in a savepoint: if it fails the redemption
        // still commits.
        let linked = async {
            let mut savepoint = tx.begin().await?;
            let result = sqlx::query(
                "UPDATE creators SET inviter_id = $2
                 WHERE id = $1 AND inviter_id IS NULL",
            )
            .bind(redeemer)
            .bind(invite.inviter_id)
            .execute(&mut *savepoint)
            .await?;
            savepoint.commit().await?;
            Ok::<_, sqlx::Error>(result.rows_affected() > 0)
        }
        .await;

        let lineage = match linked {
            Ok(true) => LineageWrite::Linked,
            Ok(false) => LineageWrite::Unchanged,
            Err(e) => LineageWrite::Failed(e.to_string()),
        };

        tx.commit().await?;

        Ok(RedeemOutcome::Redeemed { invite, lineage })
    }

    pub async fn find_redeemed_by(&self, user_id: Uuid) -> Result<Option<Invite>> {
        let invite = sqlx::query_as::<_, Invite>(&format!(
            "SELECT {INVITE_COLUMNS} FROM invites
             WHERE used_by = $1
             ORDER BY used_at
             LIMIT 1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(invite)
    }

    pub async fn list_invites_by_inviter(&self, inviter_id: Uuid) -> Result<Vec<Invite>> {
        let invites = sqlx::query_as::<_, Invite>(&format!(
            "SELECT {INVITE_COLUMNS} FROM invites
             WHERE inviter_id = $1
             ORDER BY created_at DESC, code"
        ))
        .bind(inviter_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(invites)
    }

    // --- Waitlist ---

    pub async fn join_waitlist(
        &self,
        email: &str,
        failed_code: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO waitlist (id, email, failed_code, created_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (email) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(failed_code)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
