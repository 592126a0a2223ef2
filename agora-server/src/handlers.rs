use axum::{extract::State, Json};

use agora_api::{
    AccessibleForums, CommentAdded, Comments, GetComments, NewComment, NewRating, RatingUpdated,
};

use crate::{db, extractors::*, Error};

pub async fn accessible_forums(
    Auth(user): Auth,
    State(store): State<DynStore>,
) -> Result<Json<AccessibleForums>, Error> {
    tracing::debug!(?user, "listing accessible forums");
    let accessible_forums = db::accessible_forums(&*store, user).await?;
    Ok(Json(AccessibleForums { accessible_forums }))
}

pub async fn get_comments(
    Auth(user): Auth,
    State(store): State<DynStore>,
    Json(req): Json<GetComments>,
) -> Result<Json<Comments>, Error> {
    tracing::debug!(?user, forum = ?req.forum_id, "listing comments");
    let comments = db::comments(&*store, req.forum_id).await?;
    Ok(Json(Comments { comments }))
}

pub async fn add_comment(
    Auth(user): Auth,
    State(store): State<DynStore>,
    Json(req): Json<NewComment>,
) -> Result<Json<CommentAdded>, Error> {
    tracing::debug!(?user, forum = ?req.forum_id, "adding comment");
    Ok(Json(
        db::add_comment(&*store, req.forum_id, user, req.content).await?,
    ))
}

pub async fn rate_forum(
    Auth(user): Auth,
    State(store): State<DynStore>,
    Json(req): Json<NewRating>,
) -> Result<Json<RatingUpdated>, Error> {
    req.validate()?;
    tracing::debug!(?user, forum = ?req.forum_id, rating = req.rating, "rating forum");
    Ok(Json(db::rate(&*store, req.forum_id, user, req.rating).await?))
}
