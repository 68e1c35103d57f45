use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub const NICHES: &[&str] = &[
    "Music",
    "Art",
    "Film/Video",
    "Photography",
    "Writing/Literature",
    "Design",
    "Fashion & Style",
    "Dance",
    "Comedy & Skits",
    "Technology & Gadgets",
    "Lifestyle & Wellness",
    "Gaming & Esports",
    "Fitness & Sports",
    "Food & Cooking",
    "Beauty & Makeup",
    "Education & Learning",
    "Entrepreneurship & Finance",
    "Family & Parenting",
    "DIY & Home Improvement",
    "Travel & Adventure",
    "Science & Explainers",
    "Sustainability & Eco Living",
    "Pets & Animals",
    "Business & Marketing",
    "Personal Development & Motivation",
];

pub const COLLAB_STATUSES: &[&str] = &["open", "busy", "not_looking"];

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Creator {
    pub id: Uuid,
    pub display_name: String,
    pub bio: Option<String>,
    pub niche: String,
    pub location: Option<String>,
    pub avatar_url: Option<String>,
    pub collab_status: String,
    /// Cached copy of the lineage recorded in `invites`; first redemption wins.
    pub inviter_id: Option<Uuid>,
    pub invites_remaining: i32,
    pub invite_reset_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Profile row to insert. `inviter_id` is not part of it: the store back-fills
/// it from any invite the owner already redeemed.
#[derive(Debug, Clone)]
pub struct NewCreator {
    pub id: Uuid,
    pub display_name: String,
    pub bio: Option<String>,
    pub niche: String,
    pub location: Option<String>,
    pub avatar_url: Option<String>,
    pub collab_status: String,
    pub invites_remaining: i32,
    pub invite_reset_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// The public face of a creator as it appears in lineage and invite listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatorSummary {
    pub id: Uuid,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

impl CreatorSummary {
    pub fn of(creator: &Creator) -> Self {
        Self {
            id: creator.id,
            display_name: creator.display_name.clone(),
            avatar_url: creator.avatar_url.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProfileRequest {
    pub display_name: Option<String>,
    pub niche: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub avatar_url: Option<String>,
    pub collab_status: Option<String>,
    // Identity comes from the session only; these are read to be rejected.
    #[serde(alias = "user_id")]
    pub user_id: Option<serde_json::Value>,
    pub id: Option<serde_json::Value>,
}

pub fn normalize_location(location: &str) -> String {
    let trimmed = location.trim();
    match trimmed.to_lowercase().as_str() {
        "usa" | "us" | "united states" => "United States".to_string(),
        "uk" | "united kingdom" => "United Kingdom".to_string(),
        "uae" | "united arab emirates" => "United Arab Emirates".to_string(),
        _ => trimmed.to_string(),
    }
}

/// Unknown or missing statuses fall back to `open`.
pub fn normalize_collab_status(status: Option<&str>) -> String {
    status
        .map(|s| s.trim().to_lowercase())
        .filter(|s| COLLAB_STATUSES.contains(&s.as_str()))
        .unwrap_or_else(|| "open".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_aliases_are_normalized() {
        assert_eq!(normalize_location(" USA "), "United States");
        assert_eq!(normalize_location("uk"), "United Kingdom");
        assert_eq!(normalize_location("UAE"), "United Arab Emirates");
        assert_eq!(normalize_location(" Helsinki "), "Helsinki");
    }

    #[test]
    fn collab_status_defaults_to_open() {
        assert_eq!(normalize_collab_status(None), "open");
        assert_eq!(normalize_collab_status(Some("BUSY")), "busy");
        assert_eq!(normalize_collab_status(Some("sleeping")), "open");
    }
}
