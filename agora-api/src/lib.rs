pub mod auth;
pub mod comment;
pub mod error;
pub mod forum;
pub mod user;

pub use auth::{AuthToken, Session};
pub use comment::{Comment, CommentAdded, CommentId, CommentInfo, Comments, GetComments, NewComment};
pub use error::Error;
pub use forum::{
    AccessGrant, AccessibleForums, Forum, ForumId, ForumSummary, NewRating, RatingUpdated,
    MAX_RATING, MIN_RATING,
};
pub use user::{User, UserId};

pub use uuid::{uuid, Uuid};

pub type Time = chrono::DateTime<chrono::Utc>;

pub const STUB_UUID: Uuid = uuid!("ffffffff-ffff-ffff-ffff-ffffffffffff");
