//! Invite ledger: issuing, checking and redeeming invite codes, and
//! reconstructing who invited whom.
//!
//! The `invites` table is the source of truth for lineage. A creator's
//! `inviter_id` is a cache of it, written in the same transaction as the
//! redemption and back-filled when a profile is created later.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::creator::{Creator, CreatorSummary};
use crate::models::invite::{
    InvalidReason, Invite, InviteCheck, InviteListItem, InviteStatus, Invitee, Lineage,
};
use crate::store::{IssueOutcome, LineageWrite, NewInvites, RedeemOutcome, Store, StoreError};

pub const CODE_LEN: usize = 6;
const CODE_MIN: u32 = 100_000;
const CODE_MAX: u32 = 999_999;

pub const INVITE_TTL_DAYS: i64 = 30;
/// How often a creator's invite allowance is restored.
pub const ALLOWANCE_PERIOD_DAYS: i64 = 30;
pub const MAX_BATCH: u32 = 10;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Invalid count, must be between 1 and 10")]
    InvalidCount,
    #[error("Invite code is required")]
    MissingCode,
    #[error("Invalid code format, must be 6 digits")]
    InvalidFormat,
    #[error("Creator profile not found")]
    ProfileNotFound,
    #[error("Creator not found")]
    CreatorNotFound,
    #[error("Insufficient invites remaining")]
    InsufficientInvites { remaining: i32 },
    #[error("Invalid invite code")]
    CodeNotFound,
    #[error("Invite code already used")]
    AlreadyUsed,
    #[error("Invite code expired")]
    Expired,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<LedgerError> for AppError {
    fn from(e: LedgerError) -> Self {
        let message = e.to_string();
        match e {
            LedgerError::InvalidCount => AppError::bad_request("INVALID_COUNT", message),
            LedgerError::MissingCode => AppError::bad_request("MISSING_CODE", message),
            LedgerError::InvalidFormat => AppError::bad_request("INVALID_FORMAT", message),
            LedgerError::ProfileNotFound => AppError::not_found("PROFILE_NOT_FOUND", message),
            LedgerError::CreatorNotFound => AppError::not_found("CREATOR_NOT_FOUND", message),
            LedgerError::CodeNotFound => AppError::not_found("CODE_NOT_FOUND", message),
            LedgerError::InsufficientInvites { remaining } => {
                AppError::InsufficientInvites { remaining }
            }
            LedgerError::AlreadyUsed => AppError::conflict("ALREADY_USED", message),
            LedgerError::Expired => AppError::conflict("EXPIRED", message),
            LedgerError::Store(e) => AppError::Store(e),
        }
    }
}

/// Uniform draw from `100000..=999999`, so codes never start with zero.
pub fn random_code() -> String {
    rand::thread_rng().gen_range(CODE_MIN..=CODE_MAX).to_string()
}

pub fn is_well_formed(code: &str) -> bool {
    code.len() == CODE_LEN && code.bytes().all(|b| b.is_ascii_digit())
}

/// Accepts any JSON number that is a whole number in `1..=MAX_BATCH`.
pub fn parse_count(value: Option<&serde_json::Value>) -> Result<u32, LedgerError> {
    let Some(value) = value else {
        return Ok(1);
    };
    value
        .as_u64()
        .or_else(|| {
            value
                .as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= 0.0)
                .map(|f| f as u64)
        })
        .and_then(|n| u32::try_from(n).ok())
        .filter(|n| (1..=MAX_BATCH).contains(n))
        .ok_or(LedgerError::InvalidCount)
}

#[derive(Debug)]
pub struct IssuedBatch {
    pub invites: Vec<Invite>,
    pub invites_remaining: i32,
}

/// Issue `count` fresh codes for `creator_id`, charging them against the
/// creator's allowance. Either the whole batch is issued or nothing is.
pub async fn generate<F>(
    store: &Store,
    creator_id: Uuid,
    count: u32,
    now: DateTime<Utc>,
    next_code: F,
) -> Result<IssuedBatch, LedgerError>
where
    F: FnMut() -> String + Send,
{
    if !(1..=MAX_BATCH).contains(&count) {
        return Err(LedgerError::InvalidCount);
    }

    let batch = NewInvites {
        inviter_id: creator_id,
        count,
        created_at: now,
        expires_at: now + Duration::days(INVITE_TTL_DAYS),
    };

    match store.issue_invites(batch, next_code).await? {
        IssueOutcome::Issued {
            invites,
            invites_remaining,
        } => {
            tracing::info!(
                creator_id = %creator_id,
                count,
                invites_remaining,
                "Invite codes issued"
            );
            Ok(IssuedBatch {
                invites,
                invites_remaining,
            })
        }
        IssueOutcome::CreatorNotFound => Err(LedgerError::ProfileNotFound),
        IssueOutcome::Insufficient { invites_remaining } => Err(LedgerError::InsufficientInvites {
            remaining: invites_remaining,
        }),
    }
}

/// Read-only check. Unknown, used and expired codes are reported, not raised.
pub async fn validate(
    store: &Store,
    code: &str,
    now: DateTime<Utc>,
) -> Result<InviteCheck, LedgerError> {
    if !is_well_formed(code) {
        return Err(LedgerError::InvalidFormat);
    }

    let Some(invite) = store.find_invite_by_code(code).await? else {
        return Ok(InviteCheck::Invalid(InvalidReason::CodeNotFound));
    };

    Ok(match invite.status(now) {
        InviteStatus::Used => InviteCheck::Invalid(InvalidReason::AlreadyUsed),
        InviteStatus::Expired => InviteCheck::Invalid(InvalidReason::Expired),
        InviteStatus::Active => InviteCheck::Valid {
            invite_id: invite.id,
            inviter_id: invite.inviter_id,
        },
    })
}

/// Consume `code` for `redeemer`. Exactly one of any number of concurrent
/// redemptions of the same code succeeds.
pub async fn redeem(
    store: &Store,
    code: &str,
    redeemer: Uuid,
    now: DateTime<Utc>,
) -> Result<Invite, LedgerError> {
    if code.is_empty() {
        return Err(LedgerError::MissingCode);
    }
    if !is_well_formed(code) {
        return Err(LedgerError::InvalidFormat);
    }

    match store.redeem_invite(code, redeemer, now).await? {
        RedeemOutcome::Redeemed { invite, lineage } => {
            match lineage {
                LineageWrite::Linked => tracing::info!(
                    invite_id = %invite.id,
                    inviter_id = %invite.inviter_id,
                    redeemer = %redeemer,
                    "Invite redeemed, lineage recorded"
                ),
                LineageWrite::Unchanged => tracing::info!(
                    invite_id = %invite.id,
                    inviter_id = %invite.inviter_id,
                    redeemer = %redeemer,
                    "Invite redeemed"
                ),
                LineageWrite::Failed(error) => tracing::warn!(
                    invite_id = %invite.id,
                    redeemer = %redeemer,
                    %error,
                    "Invite redeemed but lineage link could not be written"
                ),
            }
            Ok(invite)
        }
        RedeemOutcome::NotFound => Err(LedgerError::CodeNotFound),
        RedeemOutcome::AlreadyUsed => Err(LedgerError::AlreadyUsed),
        RedeemOutcome::Expired => Err(LedgerError::Expired),
    }
}

async fn profiles_by_id(
    store: &Store,
    ids: &[Uuid],
) -> Result<HashMap<Uuid, Creator>, LedgerError> {
    let creators = store.get_creators(ids).await?;
    Ok(creators.into_iter().map(|c| (c.id, c)).collect())
}

/// One level of lineage around `creator_id`: who invited them and whom they
/// invited. Only completed redemptions count as edges.
pub async fn lineage(store: &Store, creator_id: Uuid) -> Result<Lineage, LedgerError> {
    if store.get_creator(creator_id).await?.is_none() {
        return Err(LedgerError::CreatorNotFound);
    }

    let inviter = match store.find_redeemed_by(creator_id).await? {
        Some(invite) => store
            .get_creator(invite.inviter_id)
            .await?
            .as_ref()
            .map(CreatorSummary::of),
        None => None,
    };

    let mut redeemed: Vec<Invite> = store
        .list_invites_by_inviter(creator_id)
        .await?
        .into_iter()
        .filter(|i| i.used_by.is_some())
        .collect();
    redeemed.sort_by_key(|i| i.used_at);

    let ids: Vec<Uuid> = redeemed.iter().filter_map(|i| i.used_by).collect();
    let profiles = profiles_by_id(store, &ids).await?;

    let invitees = redeemed
        .into_iter()
        .filter_map(|invite| {
            let id = invite.used_by?;
            let profile = profiles.get(&id);
            Some(Invitee {
                id,
                display_name: profile.map(|c| c.display_name.clone()),
                avatar_url: profile.and_then(|c| c.avatar_url.clone()),
                invite_code: invite.code,
                used_at: invite.used_at,
            })
        })
        .collect();

    Ok(Lineage { inviter, invitees })
}

/// Every code `creator_id` has issued, newest first, with redeemer details.
pub async fn list_issued(
    store: &Store,
    creator_id: Uuid,
) -> Result<Vec<InviteListItem>, LedgerError> {
    if store.get_creator(creator_id).await?.is_none() {
        return Err(LedgerError::ProfileNotFound);
    }

    let invites = store.list_invites_by_inviter(creator_id).await?;
    let ids: Vec<Uuid> = invites.iter().filter_map(|i| i.used_by).collect();
    let profiles = profiles_by_id(store, &ids).await?;

    Ok(invites
        .into_iter()
        .map(|invite| InviteListItem {
            used: invite.used_by.is_some(),
            // A redeemer without a profile has nothing to show yet.
            used_by: invite
                .used_by
                .and_then(|id| profiles.get(&id))
                .map(CreatorSummary::of),
            id: invite.id,
            code: invite.code,
            expires_at: invite.expires_at,
            created_at: invite.created_at,
            used_at: invite.used_at,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::models::creator::NewCreator;
    use crate::models::user::{NewUser, UserRole};

    async fn seed_user(store: &Store, email: &str) -> Uuid {
        store
            .create_user(&NewUser {
                email: email.to_string(),
                password_hash: "unused".into(),
                role: UserRole::Member,
            })
            .await
            .unwrap()
            .id
    }

    async fn seed_creator(store: &Store, email: &str, name: &str) -> Uuid {
        let id = seed_user(store, email).await;
        let now = Utc::now();
        store
            .create_creator(&NewCreator {
                id,
                display_name: name.to_string(),
                bio: None,
                niche: "Music".into(),
                location: None,
                avatar_url: Some(format!("https://cdn.example.com/{name}.png")),
                collab_status: "open".into(),
                invites_remaining: 3,
                invite_reset_at: now + Duration::days(30),
                created_at: now,
            })
            .await
            .unwrap();
        id
    }

    fn fixed(code: &'static str) -> impl FnMut() -> String + Send {
        move || code.to_string()
    }

    #[test]
    fn random_codes_are_six_digits_without_leading_zero() {
        for _ in 0..1000 {
            let code = random_code();
            assert!(is_well_formed(&code), "{code}");
            assert_ne!(code.as_bytes()[0], b'0');
        }
    }

    #[test]
    fn format_check() {
        assert!(is_well_formed("482913"));
        assert!(is_well_formed("012345"));
        assert!(!is_well_formed("48291"));
        assert!(!is_well_formed("4829134"));
        assert!(!is_well_formed("48291a"));
        assert!(!is_well_formed("４８２９１３"));
    }

    #[test]
    fn count_parsing() {
        assert_eq!(parse_count(None).unwrap(), 1);
        assert_eq!(parse_count(Some(&json!(10))).unwrap(), 10);
        assert_eq!(parse_count(Some(&json!(2.0))).unwrap(), 2);
        for bad in [json!(0), json!(11), json!(-1), json!(1.5), json!("3"), json!(null)] {
            assert!(matches!(parse_count(Some(&bad)), Err(LedgerError::InvalidCount)), "{bad}");
        }
    }

    #[tokio::test]
    async fn full_lifecycle() {
        let store = Store::memory();
        let a = seed_creator(&store, "a@example.com", "alex").await;
        let b = seed_creator(&store, "b@example.com", "blair").await;
        let now = Utc::now();

        let batch = generate(&store, a, 1, now, fixed("482913")).await.unwrap();
        assert_eq!(batch.invites_remaining, 2);
        assert_eq!(batch.invites[0].code, "482913");
        assert_eq!(batch.invites[0].expires_at, now + Duration::days(30));

        let check = validate(&store, "482913", now).await.unwrap();
        assert_eq!(
            check,
            InviteCheck::Valid {
                invite_id: batch.invites[0].id,
                inviter_id: a
            }
        );

        redeem(&store, "482913", b, now).await.unwrap();

        let check = validate(&store, "482913", now).await.unwrap();
        assert_eq!(check, InviteCheck::Invalid(InvalidReason::AlreadyUsed));

        let of_a = lineage(&store, a).await.unwrap();
        assert!(of_a.inviter.is_none());
        assert_eq!(of_a.invitees.len(), 1);
        assert_eq!(of_a.invitees[0].id, b);
        assert_eq!(of_a.invitees[0].display_name.as_deref(), Some("blair"));
        assert_eq!(of_a.invitees[0].invite_code, "482913");

        let of_b = lineage(&store, b).await.unwrap();
        assert_eq!(of_b.inviter.unwrap().id, a);
        assert!(of_b.invitees.is_empty());

        let cached = store.get_creator(b).await.unwrap().unwrap();
        assert_eq!(cached.inviter_id, Some(a));
    }

    #[tokio::test]
    async fn oversized_batch_is_rejected_without_side_effects() {
        let store = Store::memory();
        let a = seed_creator(&store, "a@example.com", "alex").await;

        let err = generate(&store, a, 11, Utc::now(), random_code).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidCount));

        let creator = store.get_creator(a).await.unwrap().unwrap();
        assert_eq!(creator.invites_remaining, 3);
        assert!(store.list_invites_by_inviter(a).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn insufficient_balance_reports_remaining_and_writes_nothing() {
        let store = Store::memory();
        let a = seed_creator(&store, "a@example.com", "alex").await;

        generate(&store, a, 2, Utc::now(), random_code).await.unwrap();
        let err = generate(&store, a, 2, Utc::now(), random_code).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientInvites { remaining: 1 }));

        assert_eq!(store.list_invites_by_inviter(a).await.unwrap().len(), 2);
        assert_eq!(store.get_creator(a).await.unwrap().unwrap().invites_remaining, 1);
    }

    #[tokio::test]
    async fn generating_without_profile_fails() {
        let store = Store::memory();
        let user = seed_user(&store, "nobody@example.com").await;

        let err = generate(&store, user, 1, Utc::now(), random_code).await.unwrap_err();
        assert!(matches!(err, LedgerError::ProfileNotFound));
    }

    #[tokio::test]
    async fn colliding_draws_are_redrawn() {
        let store = Store::memory();
        let a = seed_creator(&store, "a@example.com", "alex").await;
        let b = seed_creator(&store, "b@example.com", "blair").await;
        generate(&store, a, 1, Utc::now(), fixed("555555")).await.unwrap();

        let mut script = ["555555", "555555", "666666"].into_iter();
        let batch = generate(&store, b, 1, Utc::now(), move || {
            script.next().unwrap().to_string()
        })
        .await
        .unwrap();

        assert_eq!(batch.invites[0].code, "666666");
    }

    #[tokio::test]
    async fn expired_codes_validate_as_expired_and_cannot_be_redeemed() {
        let store = Store::memory();
        let a = seed_creator(&store, "a@example.com", "alex").await;
        let b = seed_creator(&store, "b@example.com", "blair").await;
        let issued_at = Utc::now() - Duration::days(31);

        generate(&store, a, 1, issued_at, fixed("123456")).await.unwrap();

        let now = Utc::now();
        let check = validate(&store, "123456", now).await.unwrap();
        assert_eq!(check, InviteCheck::Invalid(InvalidReason::Expired));

        let err = redeem(&store, "123456", b, now).await.unwrap_err();
        assert!(matches!(err, LedgerError::Expired));

        // Expired and unused: not a lineage edge.
        assert!(lineage(&store, a).await.unwrap().invitees.is_empty());
    }

    #[tokio::test]
    async fn expiry_boundary_is_exclusive() {
        let store = Store::memory();
        let a = seed_creator(&store, "a@example.com", "alex").await;
        let issued_at = Utc::now();
        generate(&store, a, 1, issued_at, fixed("700000")).await.unwrap();

        let at_expiry = issued_at + Duration::days(INVITE_TTL_DAYS);
        let check = validate(&store, "700000", at_expiry).await.unwrap();
        assert_eq!(check, InviteCheck::Invalid(InvalidReason::Expired));
    }

    #[tokio::test]
    async fn unknown_and_malformed_codes() {
        let store = Store::memory();
        let now = Utc::now();

        let check = validate(&store, "999999", now).await.unwrap();
        assert_eq!(check, InviteCheck::Invalid(InvalidReason::CodeNotFound));

        let err = validate(&store, "12ab56", now).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidFormat));

        let user = seed_user(&store, "u@example.com").await;
        let err = redeem(&store, "999999", user, now).await.unwrap_err();
        assert!(matches!(err, LedgerError::CodeNotFound));
        let err = redeem(&store, "", user, now).await.unwrap_err();
        assert!(matches!(err, LedgerError::MissingCode));
        let err = redeem(&store, "12ab56", user, now).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidFormat));
    }

    #[tokio::test]
    async fn padded_codes_are_malformed_for_both_check_and_redeem() {
        let store = Store::memory();
        let a = seed_creator(&store, "a@example.com", "alex").await;
        let b = seed_user(&store, "b@example.com").await;
        let now = Utc::now();
        generate(&store, a, 1, now, fixed("482913")).await.unwrap();

        let err = validate(&store, " 482913", now).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidFormat));
        let err = redeem(&store, " 482913", b, now).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidFormat));

        let check = validate(&store, "482913", now).await.unwrap();
        assert!(matches!(check, InviteCheck::Valid { .. }));
    }

    #[tokio::test]
    async fn first_inviter_wins() {
        let store = Store::memory();
        let a = seed_creator(&store, "a@example.com", "alex").await;
        let c = seed_creator(&store, "c@example.com", "casey").await;
        let b = seed_creator(&store, "b@example.com", "blair").await;
        let now = Utc::now();

        generate(&store, a, 1, now, fixed("111111")).await.unwrap();
        generate(&store, c, 1, now, fixed("222222")).await.unwrap();

        redeem(&store, "111111", b, now).await.unwrap();
        redeem(&store, "222222", b, now + Duration::minutes(1)).await.unwrap();

        let cached = store.get_creator(b).await.unwrap().unwrap();
        assert_eq!(cached.inviter_id, Some(a));
        assert_eq!(lineage(&store, b).await.unwrap().inviter.unwrap().id, a);
    }

    #[tokio::test]
    async fn redeemer_without_profile_gets_lineage_on_profile_creation() {
        let store = Store::memory();
        let a = seed_creator(&store, "a@example.com", "alex").await;
        let newcomer = seed_user(&store, "new@example.com").await;
        let now = Utc::now();

        generate(&store, a, 1, now, fixed("313131")).await.unwrap();
        redeem(&store, "313131", newcomer, now).await.unwrap();

        let listed = list_issued(&store, a).await.unwrap();
        assert!(listed[0].used);
        assert_eq!(listed[0].used_by, None);

        let created = store
            .create_creator(&NewCreator {
                id: newcomer,
                display_name: "newcomer".into(),
                bio: None,
                niche: "Art".into(),
                location: None,
                avatar_url: None,
                collab_status: "open".into(),
                invites_remaining: 3,
                invite_reset_at: now + Duration::days(30),
                created_at: now,
            })
            .await
            .unwrap();
        assert_eq!(created.inviter_id, Some(a));

        let listed = list_issued(&store, a).await.unwrap();
        let used_by = listed[0].used_by.as_ref().unwrap();
        assert_eq!(used_by.id, newcomer);
        assert_eq!(used_by.display_name, "newcomer");
    }

    #[tokio::test]
    async fn concurrent_redemptions_have_one_winner() {
        let store = Store::memory();
        let a = seed_creator(&store, "a@example.com", "alex").await;
        generate(&store, a, 1, Utc::now(), fixed("424242")).await.unwrap();

        let mut redeemers = Vec::new();
        for i in 0..8 {
            redeemers.push(seed_user(&store, &format!("r{i}@example.com")).await);
        }

        let wins = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for redeemer in redeemers {
            let store = store.clone();
            let wins = wins.clone();
            handles.push(tokio::spawn(async move {
                match redeem(&store, "424242", redeemer, Utc::now()).await {
                    Ok(_) => {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(LedgerError::AlreadyUsed) => {}
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(wins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_generation_never_overdraws() {
        let store = Store::memory();
        let a = seed_creator(&store, "a@example.com", "alex").await;

        let mut handles = Vec::new();
        for _ in 0..5 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                generate(&store, a, 1, Utc::now(), random_code).await.is_ok()
            }));
        }
        let mut issued = 0;
        for handle in handles {
            if handle.await.unwrap() {
                issued += 1;
            }
        }

        assert_eq!(issued, 3);
        assert_eq!(store.get_creator(a).await.unwrap().unwrap().invites_remaining, 0);
        assert_eq!(store.list_invites_by_inviter(a).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn lineage_of_unknown_creator() {
        let store = Store::memory();
        let err = lineage(&store, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, LedgerError::CreatorNotFound));
    }

    #[tokio::test]
    async fn invitees_exclude_unused_codes_and_are_ordered_by_redemption() {
        let store = Store::memory();
        let a = seed_creator(&store, "a@example.com", "alex").await;
        let b = seed_creator(&store, "b@example.com", "blair").await;
        let c = seed_creator(&store, "c@example.com", "casey").await;
        let now = Utc::now();

        let mut script = ["100001", "100002", "100003"].into_iter();
        generate(&store, a, 3, now, move || script.next().unwrap().to_string())
            .await
            .unwrap();

        redeem(&store, "100003", c, now + Duration::minutes(1)).await.unwrap();
        redeem(&store, "100001", b, now + Duration::minutes(2)).await.unwrap();

        let ids: Vec<Uuid> = lineage(&store, a)
            .await
            .unwrap()
            .invitees
            .iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, [c, b]);
    }
}
