use std::str::FromStr;

use anyhow::{anyhow, Context};
use serde_json::json;
use uuid::Uuid;

use crate::{ForumId, MAX_RATING, MIN_RATING};

#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Unknown error: {0}")]
    Unknown(String),

    #[error("Access denied")]
    AccessDenied,

    #[error("Forum not found: {0:?}")]
    ForumNotFound(ForumId),

    #[error("Invalid rating {0}")]
    InvalidRating(i64),
}

impl Error {
    pub fn status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Error::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::AccessDenied => StatusCode::FORBIDDEN,
            Error::ForumNotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidRating(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        serde_json::to_vec(&match self {
            Error::Unknown(msg) => json!({
                "message": msg,
                "type": "unknown",
            }),
            Error::AccessDenied => json!({
                "message": "user does not have access to this forum",
                "type": "access-denied",
            }),
            Error::ForumNotFound(f) => json!({
                "message": "forum not found",
                "type": "forum-not-found",
                "forum": f.0,
            }),
            Error::InvalidRating(r) => json!({
                "message": format!(
                    "rating must be an integer between {MIN_RATING} and {MAX_RATING}"
                ),
                "type": "invalid-rating",
                "rating": r,
            }),
        })
        .expect("serializing error contents")
    }

    pub fn parse(body: &[u8]) -> anyhow::Result<Error> {
        let data: serde_json::Value =
            serde_json::from_slice(body).context("parsing error contents")?;
        Ok(
            match data
                .get("type")
                .and_then(|t| t.as_str())
                .ok_or_else(|| anyhow!("error type is not a string"))?
            {
                "unknown" => Error::Unknown(String::from(
                    data.get("message")
                        .and_then(|msg| msg.as_str())
                        .unwrap_or(""),
                )),
                "access-denied" => Error::AccessDenied,
                "forum-not-found" => Error::ForumNotFound(ForumId(
                    data.get("forum")
                        .and_then(|f| f.as_str())
                        .and_then(|f| Uuid::from_str(f).ok())
                        .ok_or_else(|| anyhow!("error is a forum-not-found without a forum id"))?,
                )),
                "invalid-rating" => Error::InvalidRating(
                    data.get("rating")
                        .and_then(|r| r.as_i64())
                        .ok_or_else(|| anyhow!("error is an invalid-rating without the rating"))?,
                ),
                _ => return Err(anyhow!("error contents has unknown type")),
            },
        )
    }
}
