use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use super::creator::CreatorSummary;

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Invite {
    pub id: Uuid,
    pub code: String,
    pub inviter_id: Uuid,
    pub used_by: Option<Uuid>,
    pub used_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InviteStatus {
    Active,
    Used,
    Expired,
}

impl Invite {
    /// Used takes precedence over expired; expiry is never stored.
    pub fn status(&self, now: DateTime<Utc>) -> InviteStatus {
        if self.used_by.is_some() {
            InviteStatus::Used
        } else if self.expires_at <= now {
            InviteStatus::Expired
        } else {
            InviteStatus::Active
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedInvite {
    pub id: Uuid,
    pub code: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl From<Invite> for IssuedInvite {
    fn from(i: Invite) -> Self {
        Self {
            id: i.id,
            code: i.code,
            expires_at: i.expires_at,
            created_at: i.created_at,
        }
    }
}

/// Keeps an explicit `null` as `Some(Value::Null)` instead of folding it into
/// an absent field.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize)]
pub struct GenerateInvitesRequest {
    /// Kept loose so a non-integer count is reported as an invalid count
    /// rather than a body rejection. `None` only when the field is absent.
    #[serde(default, deserialize_with = "present")]
    pub count: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateInvitesResponse {
    pub invites: Vec<IssuedInvite>,
    pub invites_remaining: i32,
}

#[derive(Debug, Deserialize)]
pub struct ValidateInviteRequest {
    /// Loose: anything but a string is reported as a missing code.
    pub code: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    CodeNotFound,
    AlreadyUsed,
    Expired,
}

/// Result of a read-only code check. Invalid codes are an answer, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InviteCheck {
    Valid { invite_id: Uuid, inviter_id: Uuid },
    Invalid(InvalidReason),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateInviteResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<InvalidReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invite_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inviter_id: Option<Uuid>,
}

impl From<InviteCheck> for ValidateInviteResponse {
    fn from(check: InviteCheck) -> Self {
        match check {
            InviteCheck::Valid {
                invite_id,
                inviter_id,
            } => Self {
                valid: true,
                reason: None,
                invite_id: Some(invite_id),
                inviter_id: Some(inviter_id),
            },
            InviteCheck::Invalid(reason) => Self {
                valid: false,
                reason: Some(reason),
                invite_id: None,
                inviter_id: None,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemInviteRequest {
    pub code: Option<Value>,
    /// Redeem on behalf of another user. Admins only.
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct RedeemInviteResponse {
    pub success: bool,
    pub message: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Invitee {
    pub id: Uuid,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub invite_code: String,
    pub used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Lineage {
    pub inviter: Option<CreatorSummary>,
    pub invitees: Vec<Invitee>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteListItem {
    pub id: Uuid,
    pub code: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub used: bool,
    pub used_by: Option<CreatorSummary>,
    pub used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct InviteListResponse {
    pub invites: Vec<InviteListItem>,
}
