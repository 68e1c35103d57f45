use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::creator::{Creator, NewCreator};
use crate::models::invite::Invite;
use crate::models::user::{NewUser, User};
use crate::models::waitlist::WaitlistEntry;

use super::{
    IssueOutcome, LineageWrite, NewInvites, RedeemOutcome, ResetScope, Result, StoreError,
    MAX_CODE_DRAWS,
};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    creators: HashMap<Uuid, Creator>,
    /// Insertion order; invites are never removed.
    invites: Vec<Invite>,
    /// code -> index into `invites`.
    codes: HashMap<String, usize>,
    waitlist: HashMap<String, WaitlistEntry>,
}

impl Tables {
    fn first_redemption_by(&self, user_id: Uuid) -> Option<&Invite> {
        self.invites
            .iter()
            .filter(|i| i.used_by == Some(user_id))
            .min_by_key(|i| i.used_at)
    }
}

/// In-process store. Every operation holds the table lock for its whole
/// duration, which gives the same atomicity as the Postgres transactions.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Users ---

    pub async fn create_user(&self, user: &NewUser) -> Result<User> {
        let mut t = self.tables.lock().await;
        if t.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Duplicate);
        }
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: user.email.clone(),
            password_hash: user.password_hash.clone(),
            role: user.role,
            created_at: now,
            updated_at: now,
        };
        t.users.insert(user.id, user.clone());
        Ok(user)
    }

    pub async fn find_user(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.tables.lock().await.users.get(&id).cloned())
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let t = self.tables.lock().await;
        Ok(t.users.values().find(|u| u.email == email).cloned())
    }

    pub async fn count_users(&self) -> Result<i64> {
        Ok(self.tables.lock().await.users.len() as i64)
    }

    // --- Creators ---

    pub async fn create_creator(&self, creator: &NewCreator) -> Result<Creator> {
        let mut t = self.tables.lock().await;
        if t.creators.contains_key(&creator.id) {
            return Err(StoreError::Duplicate);
        }
        let inviter_id = t.first_redemption_by(creator.id).map(|i| i.inviter_id);
        let row = Creator {
            id: creator.id,
            display_name: creator.display_name.clone(),
            bio: creator.bio.clone(),
            niche: creator.niche.clone(),
            location: creator.location.clone(),
            avatar_url: creator.avatar_url.clone(),
            collab_status: creator.collab_status.clone(),
            inviter_id,
            invites_remaining: creator.invites_remaining,
            invite_reset_at: Some(creator.invite_reset_at),
            created_at: creator.created_at,
        };
        t.creators.insert(row.id, row.clone());
        Ok(row)
    }

    pub async fn get_creator(&self, id: Uuid) -> Result<Option<Creator>> {
        Ok(self.tables.lock().await.creators.get(&id).cloned())
    }

    pub async fn get_creators(&self, ids: &[Uuid]) -> Result<Vec<Creator>> {
        let t = self.tables.lock().await;
        Ok(ids.iter().filter_map(|id| t.creators.get(id).cloned()).collect())
    }

    pub async fn reset_invite_allowance(
        &self,
        scope: ResetScope,
        allowance: i32,
        next_reset_at: DateTime<Utc>,
    ) -> Result<u64> {
        let mut t = self.tables.lock().await;
        let mut touched = 0;
        for creator in t.creators.values_mut() {
            let due = match scope {
                ResetScope::Creator(id) => creator.id == id,
                ResetScope::Due(now) => creator.invite_reset_at.is_none_or(|at| at <= now),
            };
            if due {
                creator.invites_remaining = allowance;
                creator.invite_reset_at = Some(next_reset_at);
                touched += 1;
            }
        }
        Ok(touched)
    }

    // --- Invites ---

    pub async fn issue_invites<F>(&self, batch: NewInvites, mut next_code: F) -> Result<IssueOutcome>
    where
        F: FnMut() -> String + Send,
    {
        let mut t = self.tables.lock().await;
        let count = i32::try_from(batch.count).unwrap_or(i32::MAX);

        let Some(creator) = t.creators.get(&batch.inviter_id) else {
            return Ok(IssueOutcome::CreatorNotFound);
        };
        if creator.invites_remaining < count {
            return Ok(IssueOutcome::Insufficient {
                invites_remaining: creator.invites_remaining,
            });
        }

        // Draw the whole batch before writing anything so an exhausted code
        // space leaves no partial batch behind.
        let mut codes: Vec<String> = Vec::with_capacity(batch.count as usize);
        for _ in 0..batch.count {
            let mut draws = 0;
            let code = loop {
                if draws == MAX_CODE_DRAWS {
                    return Err(StoreError::CodeSpaceExhausted { attempts: draws });
                }
                draws += 1;
                let code = next_code();
                if !t.codes.contains_key(&code) && !codes.contains(&code) {
                    break code;
                }
                tracing::debug!(%code, "invite code collision, redrawing");
            };
            codes.push(code);
        }

        let mut invites = Vec::with_capacity(codes.len());
        for code in codes {
            let invite = Invite {
                id: Uuid::new_v4(),
                code: code.clone(),
                inviter_id: batch.inviter_id,
                used_by: None,
                used_at: None,
                expires_at: batch.expires_at,
                created_at: batch.created_at,
            };
            let idx = t.invites.len();
            t.invites.push(invite.clone());
            t.codes.insert(code, idx);
            invites.push(invite);
        }

        let creator = t
            .creators
            .get_mut(&batch.inviter_id)
            .ok_or(StoreError::Database(sqlx::Error::RowNotFound))?;
        creator.invites_remaining -= count;
        let invites_remaining = creator.invites_remaining;

        Ok(IssueOutcome::Issued {
            invites,
            invites_remaining,
        })
    }

    pub async fn find_invite_by_code(&self, code: &str) -> Result<Option<Invite>> {
        let t = self.tables.lock().await;
        Ok(t.codes.get(code).map(|&idx| t.invites[idx].clone()))
    }

    pub async fn redeem_invite(
        &self,
        code: &str,
        redeemer: Uuid,
        now: DateTime<Utc>,
    ) -> Result<RedeemOutcome> {
        let mut t = self.tables.lock().await;

        let Some(&idx) = t.codes.get(code) else {
            return Ok(RedeemOutcome::NotFound);
        };
        let invite = &mut t.invites[idx];
        if invite.used_by.is_some() || invite.expires_at <= now {
            return Ok(RedeemOutcome::unclaimed(Some(&*invite)));
        }
        invite.used_by = Some(redeemer);
        invite.used_at = Some(now);
        let invite = invite.clone();

        let lineage = match t.creators.get_mut(&redeemer) {
            Some(creator) if creator.inviter_id.is_none() => {
                creator.inviter_id = Some(invite.inviter_id);
                LineageWrite::Linked
            }
            _ => LineageWrite::Unchanged,
        };

        Ok(RedeemOutcome::Redeemed { invite, lineage })
    }

    pub async fn find_redeemed_by(&self, user_id: Uuid) -> Result<Option<Invite>> {
        let t = self.tables.lock().await;
        Ok(t.first_redemption_by(user_id).cloned())
    }

    pub async fn list_invites_by_inviter(&self, inviter_id: Uuid) -> Result<Vec<Invite>> {
        let t = self.tables.lock().await;
        let mut invites: Vec<Invite> = t
            .invites
            .iter()
            .filter(|i| i.inviter_id == inviter_id)
            .cloned()
            .collect();
        invites.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.code.cmp(&b.code))
        });
        Ok(invites)
    }

    // --- Waitlist ---

    pub async fn join_waitlist(
        &self,
        email: &str,
        failed_code: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut t = self.tables.lock().await;
        if t.waitlist.contains_key(email) {
            return Ok(false);
        }
        t.waitlist.insert(
            email.to_string(),
            WaitlistEntry {
                id: Uuid::new_v4(),
                email: email.to_string(),
                failed_code: failed_code.map(str::to_string),
                created_at: now,
            },
        );
        Ok(true)
    }
}
