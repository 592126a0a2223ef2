use anyhow::{anyhow, bail, Context};
use chrono::Utc;
use futures::future::try_join_all;

use agora_api::{
    AccessGrant, AuthToken, Comment, CommentAdded, CommentId, CommentInfo, Forum, ForumId,
    ForumSummary, RatingUpdated, Session, User, UserId,
};
use agora_store::{from_document, to_document, CollectionPath, DocPath, Store};

use crate::Error;

fn users() -> CollectionPath {
    CollectionPath::root("users")
}

fn forums() -> CollectionPath {
    CollectionPath::root("forums")
}

fn sessions() -> CollectionPath {
    CollectionPath::root("sessions")
}

pub fn user_doc(user: UserId) -> DocPath {
    users().doc(user.0)
}

pub fn forum_doc(forum: ForumId) -> DocPath {
    forums().doc(forum.0)
}

pub fn session_doc(token: AuthToken) -> DocPath {
    sessions().doc(token.0)
}

pub fn grants_of(user: UserId) -> CollectionPath {
    user_doc(user).collection("grants")
}

pub fn grant_doc(user: UserId, forum: ForumId) -> DocPath {
    grants_of(user).doc(forum.0)
}

pub fn comments_of(forum: ForumId) -> CollectionPath {
    forum_doc(forum).collection("comments")
}

pub async fn recover_session(store: &dyn Store, token: AuthToken) -> Result<UserId, Error> {
    let doc = store
        .get(&session_doc(token))
        .await
        .context("recovering session")?
        .ok_or_else(Error::access_denied)?;
    let session: Session = from_document(doc).context("parsing session document")?;
    Ok(session.user)
}

pub async fn accessible_forums(
    store: &dyn Store,
    user: UserId,
) -> Result<Vec<ForumSummary>, Error> {
    let grants = store
        .query(&grants_of(user), None)
        .await
        .with_context(|| format!("listing access grants of {user:?}"))?;

    let forums = try_join_all(grants.iter().map(|(forum, _)| {
        let forum = ForumId(*forum);
        async move { store.get(&forum_doc(forum)).await.map(|doc| (forum, doc)) }
    }))
    .await
    .context("fetching accessible forums")?;

    let mut out = Vec::with_capacity(forums.len());
    for (id, doc) in forums {
        let doc = match doc {
            // A grant may outlive its forum; stale grants are dropped.
            None => continue,
            Some(doc) => doc,
        };
        let forum: Forum = from_document(doc).with_context(|| format!("parsing forum {id:?}"))?;
        out.push(ForumSummary {
            id,
            name: forum.name,
            rating: forum.forum_rating,
            image_url: forum.url,
        });
    }
    Ok(out)
}

pub async fn comments(store: &dyn Store, forum: ForumId) -> Result<Vec<CommentInfo>, Error> {
    if store
        .get(&forum_doc(forum))
        .await
        .with_context(|| format!("fetching {forum:?}"))?
        .is_none()
    {
        return Err(Error::forum_not_found(forum));
    }

    let docs = store
        .query(&comments_of(forum), Some("timestamp"))
        .await
        .with_context(|| format!("listing comments of {forum:?}"))?;

    // One author lookup per comment, repeated authors included. Each lookup
    // is independent and idempotent, so no cache.
    let mut out = Vec::with_capacity(docs.len());
    for (id, doc) in docs {
        let comment: Comment =
            from_document(doc).with_context(|| format!("parsing comment {id}"))?;
        let author = store
            .get(&user_doc(comment.author))
            .await
            .with_context(|| format!("fetching author of comment {id}"))?
            .ok_or_else(|| anyhow!("comment {id} references missing user {:?}", comment.author))?;
        let author: User = from_document(author).context("parsing user document")?;
        out.push(CommentInfo {
            id: CommentId(id),
            content: comment.content,
            timestamp: comment.timestamp,
            user: author.name,
        });
    }
    Ok(out)
}

pub async fn add_comment(
    store: &dyn Store,
    forum: ForumId,
    author: UserId,
    content: String,
) -> Result<CommentAdded, Error> {
    if store
        .get(&forum_doc(forum))
        .await
        .with_context(|| format!("fetching {forum:?}"))?
        .is_none()
    {
        return Err(Error::forum_not_found(forum));
    }

    let comment = Comment {
        content,
        author,
        timestamp: Utc::now(),
    };
    let id = store
        .add(&comments_of(forum), to_document(&comment)?)
        .await
        .with_context(|| format!("appending comment to {forum:?}"))?;
    tracing::debug!(?forum, ?author, comment = %id, "comment added");

    Ok(CommentAdded {
        message: String::from("comment added"),
        comment: comment.content,
        user_id: author,
    })
}

/// Record `rating` as `user`'s one rating of `forum` and fold it into the
/// forum's rolling average.
///
/// Both writes are atomic read-modify-writes. The grant swap yields the
/// rating it replaced, the aggregate swap folds the delta; deltas commute,
/// so concurrent raters cannot lose each other's update, and raters of the
/// same user serialize on the grant document.
pub async fn rate(
    store: &dyn Store,
    forum: ForumId,
    user: UserId,
    rating: i64,
) -> Result<RatingUpdated, Error> {
    // Preconditions, in order, before any write: the forum must exist, and
    // the caller must hold a grant for it.
    if store
        .get(&forum_doc(forum))
        .await
        .with_context(|| format!("fetching {forum:?}"))?
        .is_none()
    {
        return Err(Error::forum_not_found(forum));
    }
    if store
        .get(&grant_doc(user, forum))
        .await
        .context("fetching access grant")?
        .is_none()
    {
        return Err(Error::access_denied());
    }

    let grant = store
        .transact(&grant_doc(user, forum), &|cur| {
            let mut doc = cur.cloned().unwrap_or_default();
            doc.insert(String::from("rating"), rating.into());
            Ok(doc)
        })
        .await
        .context("recording rating on access grant")?;
    // 0 is the never-rated sentinel: it bumps totalUsers below and never
    // appears as a stored rating (the valid range starts at 1).
    let previous = match &grant.before {
        None => 0,
        Some(doc) => from_document::<AccessGrant>(doc.clone())
            .context("parsing access grant")?
            .rating
            .unwrap_or(0),
    };

    let folded = store
        .transact(&forum_doc(forum), &|cur| {
            let cur = match cur {
                None => bail!("forum {forum:?} disappeared mid-rating"),
                Some(cur) => cur,
            };
            let data: Forum = from_document(cur.clone()).context("parsing forum document")?;
            let total_score = data.total_score - previous + rating;
            let total_users = data.total_users + if previous == 0 { 1 } else { 0 };
            if total_users <= 0 {
                bail!("forum {forum:?} has {total_users} raters on record, refusing to divide");
            }
            let forum_rating = total_score as f64 / total_users as f64;
            // only the aggregate fields move, everything else stays as is
            let mut doc = cur.clone();
            doc.insert(String::from("totalScore"), total_score.into());
            doc.insert(String::from("totalUsers"), total_users.into());
            doc.insert(String::from("forumRating"), forum_rating.into());
            Ok(doc)
        })
        .await
        .context("folding rating into forum aggregate");
    let folded = match folded {
        Ok(folded) => folded,
        Err(err) => {
            // The grant was already written: put it back so a transient
            // aggregate failure does not half-commit the rating. Best
            // effort, the aggregate error wins either way.
            let restored = store
                .transact(&grant_doc(user, forum), &|_| {
                    Ok(grant.before.clone().unwrap_or_default())
                })
                .await;
            if let Err(restore_err) = restored {
                tracing::error!(
                    ?restore_err,
                    ?user,
                    ?forum,
                    "failed restoring grant after aggregate failure"
                );
            }
            return Err(err.into());
        }
    };

    let after: Forum = from_document(folded.after).context("parsing folded forum")?;
    let forum_rating = after
        .forum_rating
        .ok_or_else(|| anyhow!("forum aggregate written without a rating"))?;
    tracing::debug!(?forum, ?user, rating, forum_rating, "rating recorded");

    Ok(RatingUpdated {
        message: String::from("rating recorded"),
        forum_rating,
    })
}
