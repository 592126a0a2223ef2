use uuid::Uuid;

use crate::{Error, STUB_UUID};

pub const MIN_RATING: i64 = 1;
pub const MAX_RATING: i64 = 5;

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct ForumId(pub Uuid);

impl ForumId {
    pub fn stub() -> ForumId {
        ForumId(STUB_UUID)
    }
}

/// Stored shape of a forum document. The aggregate fields are absent until
/// the first rating comes in, hence the defaults.
#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Forum {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub total_score: i64,
    #[serde(default)]
    pub total_users: i64,
    #[serde(default)]
    pub forum_rating: Option<f64>,
}

/// Stored shape of an access grant document. `rating` stays absent until the
/// user rates the forum once; after that it always holds their latest rating.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct AccessGrant {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<i64>,
}

/// One entry of the forum list, as the mobile client displays it.
#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ForumSummary {
    pub id: ForumId,
    pub name: String,
    pub rating: Option<f64>,
    #[serde(rename = "imageURL")]
    pub image_url: String,
}

#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessibleForums {
    pub accessible_forums: Vec<ForumSummary>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRating {
    pub forum_id: ForumId,
    pub rating: i64,
}

impl NewRating {
    pub fn validate(&self) -> Result<(), Error> {
        if !(MIN_RATING..=MAX_RATING).contains(&self.rating) {
            return Err(Error::InvalidRating(self.rating));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingUpdated {
    pub message: String,
    pub forum_rating: f64,
}
