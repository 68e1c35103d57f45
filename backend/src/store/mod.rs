//! Persistence for users, creator profiles, invite codes and the waitlist.
//!
//! [`Store`] dispatches to Postgres in production and to an in-process store
//! for `memory://` URLs and tests. Both backends provide the same guarantees
//! for the ledger writes: balance check-and-decrement, code insertion and
//! redemption are each atomic with respect to concurrent requests.

pub mod memory;
pub mod postgres;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::creator::{Creator, NewCreator};
use crate::models::invite::Invite;
use crate::models::user::{NewUser, User};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Draws allowed per code before a batch is abandoned.
pub const MAX_CODE_DRAWS: u32 = 64;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("record already exists")]
    Duplicate,

    #[error("no unused invite code found after {attempts} draws")]
    CodeSpaceExhausted { attempts: u32 },

    #[error("unsupported database url: {0}")]
    UnsupportedUrl(String),
}

/// A batch of invite codes to issue for one creator.
#[derive(Debug, Clone, Copy)]
pub struct NewInvites {
    pub inviter_id: Uuid,
    pub count: u32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub enum IssueOutcome {
    Issued {
        invites: Vec<Invite>,
        invites_remaining: i32,
    },
    CreatorNotFound,
    Insufficient {
        invites_remaining: i32,
    },
}

/// What happened to the redeemer's cached `inviter_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineageWrite {
    Linked,
    /// Already linked, or the redeemer has no profile yet.
    Unchanged,
    Failed(String),
}

#[derive(Debug)]
pub enum RedeemOutcome {
    Redeemed { invite: Invite, lineage: LineageWrite },
    NotFound,
    AlreadyUsed,
    Expired,
}

impl RedeemOutcome {
    /// Classify a code the compare-and-set did not claim.
    fn unclaimed(existing: Option<&Invite>) -> Self {
        match existing {
            None => Self::NotFound,
            Some(invite) if invite.used_by.is_some() => Self::AlreadyUsed,
            Some(_) => Self::Expired,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ResetScope {
    /// Reset one creator regardless of their reset date.
    Creator(Uuid),
    /// Reset every creator whose reset date has passed (or was never set).
    Due(DateTime<Utc>),
}

#[derive(Clone)]
pub enum Store {
    Postgres(PgStore),
    Memory(MemoryStore),
}

impl Store {
    /// Open the store named by `url`: `memory://` or a Postgres URL.
    pub async fn connect(url: &str) -> Result<Self> {
        if url.starts_with("memory://") {
            tracing::warn!("using in-memory store; data is lost on exit");
            return Ok(Self::Memory(MemoryStore::new()));
        }
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            return Ok(Self::Postgres(PgStore::connect(url).await?));
        }
        Err(StoreError::UnsupportedUrl(url.to_string()))
    }

    pub fn memory() -> Self {
        Self::Memory(MemoryStore::new())
    }

    pub async fn ping(&self) -> Result<()> {
        match self {
            Self::Postgres(s) => s.ping().await,
            Self::Memory(_) => Ok(()),
        }
    }

    // --- Users ---

    /// Fails with [`StoreError::Duplicate`] when the email is taken.
    pub async fn create_user(&self, user: &NewUser) -> Result<User> {
        match self {
            Self::Postgres(s) => s.create_user(user).await,
            Self::Memory(s) => s.create_user(user).await,
        }
    }

    pub async fn find_user(&self, id: Uuid) -> Result<Option<User>> {
        match self {
            Self::Postgres(s) => s.find_user(id).await,
            Self::Memory(s) => s.find_user(id).await,
        }
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        match self {
            Self::Postgres(s) => s.find_user_by_email(email).await,
            Self::Memory(s) => s.find_user_by_email(email).await,
        }
    }

    pub async fn count_users(&self) -> Result<i64> {
        match self {
            Self::Postgres(s) => s.count_users().await,
            Self::Memory(s) => s.count_users().await,
        }
    }

    // --- Creators ---

    /// Fails with [`StoreError::Duplicate`] when the profile exists.
    pub async fn create_creator(&self, creator: &NewCreator) -> Result<Creator> {
        match self {
            Self::Postgres(s) => s.create_creator(creator).await,
            Self::Memory(s) => s.create_creator(creator).await,
        }
    }

    pub async fn get_creator(&self, id: Uuid) -> Result<Option<Creator>> {
        match self {
            Self::Postgres(s) => s.get_creator(id).await,
            Self::Memory(s) => s.get_creator(id).await,
        }
    }

    pub async fn get_creators(&self, ids: &[Uuid]) -> Result<Vec<Creator>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        match self {
            Self::Postgres(s) => s.get_creators(ids).await,
            Self::Memory(s) => s.get_creators(ids).await,
        }
    }

    /// Restore `invites_remaining` to `allowance`. Returns the number of
    /// creators touched.
    pub async fn reset_invite_allowance(
        &self,
        scope: ResetScope,
        allowance: i32,
        next_reset_at: DateTime<Utc>,
    ) -> Result<u64> {
        match self {
            Self::Postgres(s) => s.reset_invite_allowance(scope, allowance, next_reset_at).await,
            Self::Memory(s) => s.reset_invite_allowance(scope, allowance, next_reset_at).await,
        }
    }

    // --- Invites ---

    /// Atomically take `count` from the creator's balance and insert that many
    /// codes, drawing each from `next_code` until an unused one comes up.
    pub async fn issue_invites<F>(&self, batch: NewInvites, next_code: F) -> Result<IssueOutcome>
    where
        F: FnMut() -> String + Send,
    {
        match self {
            Self::Postgres(s) => s.issue_invites(batch, next_code).await,
            Self::Memory(s) => s.issue_invites(batch, next_code).await,
        }
    }

    pub async fn find_invite_by_code(&self, code: &str) -> Result<Option<Invite>> {
        match self {
            Self::Postgres(s) => s.find_invite_by_code(code).await,
            Self::Memory(s) => s.find_invite_by_code(code).await,
        }
    }

    /// Claim `code` for `redeemer` if it is unused and unexpired at `now`, then
    /// link the redeemer's profile to the inviter if it has no inviter yet.
    pub async fn redeem_invite(
        &self,
        code: &str,
        redeemer: Uuid,
        now: DateTime<Utc>,
    ) -> Result<RedeemOutcome> {
        match self {
            Self::Postgres(s) => s.redeem_invite(code, redeemer, now).await,
            Self::Memory(s) => s.redeem_invite(code, redeemer, now).await,
        }
    }

    /// The earliest invite `user_id` redeemed.
    pub async fn find_redeemed_by(&self, user_id: Uuid) -> Result<Option<Invite>> {
        match self {
            Self::Postgres(s) => s.find_redeemed_by(user_id).await,
            Self::Memory(s) => s.find_redeemed_by(user_id).await,
        }
    }

    /// All invites issued by `inviter_id`, newest first.
    pub async fn list_invites_by_inviter(&self, inviter_id: Uuid) -> Result<Vec<Invite>> {
        match self {
            Self::Postgres(s) => s.list_invites_by_inviter(inviter_id).await,
            Self::Memory(s) => s.list_invites_by_inviter(inviter_id).await,
        }
    }

    // --- Waitlist ---

    /// Returns `false` when the email was already on the list.
    pub async fn join_waitlist(
        &self,
        email: &str,
        failed_code: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        match self {
            Self::Postgres(s) => s.join_waitlist(email, failed_code, now).await,
            Self::Memory(s) => s.join_waitlist(email, failed_code, now).await,
        }
    }
}
