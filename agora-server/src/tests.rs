#![cfg(test)]

use std::sync::Arc;

use axum::body::Body;
use axum::http;
use axum::Router;
use chrono::{Duration, Utc};
use tower::{Service, ServiceExt};

use agora_api::{
    AccessGrant, AccessibleForums, AuthToken, Comment, CommentAdded, Comments, Error as ApiError,
    Forum, ForumId, ForumSummary, GetComments, NewComment, NewRating, RatingUpdated, Session,
    User, UserId, Uuid,
};
use agora_mock_store::MemStore;
use agora_store::{from_document, to_document, Store};

use crate::extractors::AppState;
use crate::{app, db};

fn test_state() -> (Arc<MemStore>, Router) {
    let store = Arc::new(MemStore::new());
    let router = app(AppState {
        store: store.clone(),
    });
    (store, router)
}

async fn seed_user(store: &MemStore, name: &str) -> UserId {
    let user = UserId(Uuid::new_v4());
    let doc = to_document(&User {
        name: String::from(name),
    })
    .unwrap();
    store.set(&db::user_doc(user), doc, false).await.unwrap();
    user
}

async fn seed_session(store: &MemStore, user: UserId) -> AuthToken {
    let token = AuthToken(Uuid::new_v4());
    let doc = to_document(&Session { user }).unwrap();
    store.set(&db::session_doc(token), doc, false).await.unwrap();
    token
}

/// A forum nobody rated yet: no aggregate fields at all, like the ones the
/// provisioning side creates.
async fn seed_forum(store: &MemStore, name: &str) -> ForumId {
    let forum = ForumId(Uuid::new_v4());
    let doc = to_document(&serde_json::json!({
        "name": name,
        "url": format!("https://img.example.org/{name}.png"),
    }))
    .unwrap();
    store.set(&db::forum_doc(forum), doc, false).await.unwrap();
    forum
}

async fn seed_forum_with_stats(store: &MemStore, score: i64, users: i64) -> ForumId {
    let forum = ForumId(Uuid::new_v4());
    let doc = to_document(&Forum {
        name: String::from("climbing"),
        url: String::from("https://img.example.org/climbing.png"),
        total_score: score,
        total_users: users,
        forum_rating: Some(score as f64 / users as f64),
    })
    .unwrap();
    store.set(&db::forum_doc(forum), doc, false).await.unwrap();
    forum
}

async fn seed_grant(store: &MemStore, user: UserId, forum: ForumId, rating: Option<i64>) {
    let doc = to_document(&AccessGrant { rating }).unwrap();
    store
        .set(&db::grant_doc(user, forum), doc, false)
        .await
        .unwrap();
}

async fn forum_stats(store: &MemStore, forum: ForumId) -> Forum {
    let doc = store
        .get(&db::forum_doc(forum))
        .await
        .unwrap()
        .expect("forum document");
    from_document(doc).expect("parsing forum document")
}

async fn grant_rating(store: &MemStore, user: UserId, forum: ForumId) -> Option<i64> {
    let doc = store
        .get(&db::grant_doc(user, forum))
        .await
        .unwrap()
        .expect("grant document");
    from_document::<AccessGrant>(doc)
        .expect("parsing grant document")
        .rating
}

async fn call<Req, Resp>(
    app: &mut Router,
    method: &str,
    uri: &str,
    token: Option<AuthToken>,
    body: Option<&Req>,
) -> Result<Resp, ApiError>
where
    Req: serde::Serialize,
    Resp: for<'de> serde::Deserialize<'de>,
{
    let mut req = http::Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        req = req.header(http::header::AUTHORIZATION, format!("Bearer {}", token.0));
    }
    let req = match body {
        Some(body) => req
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                serde_json::to_vec(body).expect("serializing request body"),
            )),
        None => req.body(Body::empty()),
    }
    .expect("building request");

    app.ready().await.expect("waiting for app to be ready");
    let resp = app.call(req).await.expect("running request");
    let status = resp.status();
    let body = hyper::body::to_bytes(resp.into_body())
        .await
        .expect("recovering resp bytes");
    if status == http::StatusCode::OK {
        return Ok(serde_json::from_slice(&body)
            .unwrap_or_else(|err| panic!("parsing response body: {err}, body is {body:?}")));
    }
    let err = ApiError::parse(&body)
        .unwrap_or_else(|err| panic!("parsing error response body {err}, body is {body:?}"));
    assert_eq!(status, err.status_code());
    Err(err)
}

/// Raw-body variant for payloads the typed ones cannot express.
async fn call_raw(
    app: &mut Router,
    uri: &str,
    token: AuthToken,
    body: serde_json::Value,
) -> http::StatusCode {
    let req = http::Request::builder()
        .method("POST")
        .uri(uri)
        .header(http::header::AUTHORIZATION, format!("Bearer {}", token.0))
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("building request");
    app.ready().await.expect("waiting for app to be ready");
    app.call(req).await.expect("running request").status()
}

#[tokio::test]
async fn listing_drops_grants_to_deleted_forums() {
    let (store, mut app) = test_state();
    let user = seed_user(&store, "alice").await;
    let token = seed_session(&store, user).await;
    let forum = seed_forum(&store, "climbing").await;
    seed_grant(&store, user, forum, None).await;
    // a grant whose forum is gone
    seed_grant(&store, user, ForumId(Uuid::new_v4()), None).await;

    let resp: AccessibleForums = call(&mut app, "GET", "/forums", Some(token), None::<&()>)
        .await
        .expect("listing forums");
    assert_eq!(
        resp.accessible_forums,
        vec![ForumSummary {
            id: forum,
            name: String::from("climbing"),
            rating: None,
            image_url: String::from("https://img.example.org/climbing.png"),
        }]
    );
}

#[tokio::test]
async fn requests_without_a_session_are_denied() {
    let (_store, mut app) = test_state();

    let err = call::<(), AccessibleForums>(&mut app, "GET", "/forums", None, None)
        .await
        .unwrap_err();
    assert_eq!(err, ApiError::AccessDenied);

    // a token nobody provisioned
    let err = call::<(), AccessibleForums>(
        &mut app,
        "GET",
        "/forums",
        Some(AuthToken(Uuid::new_v4())),
        None,
    )
    .await
    .unwrap_err();
    assert_eq!(err, ApiError::AccessDenied);
}

#[tokio::test]
async fn preauth_rejects_malformed_headers() {
    use axum::extract::FromRequestParts;

    use crate::extractors::PreAuth;

    for header in ["Basic abc", "Bearer", "Bearer not-a-uuid", "Bearer a b"] {
        let req = http::Request::builder()
            .method("GET")
            .uri("/")
            .header(http::header::AUTHORIZATION, header)
            .body(())
            .expect("building request");
        let (mut parts, ()) = req.into_parts();
        let res = PreAuth::from_request_parts(&mut parts, &()).await;
        assert!(
            matches!(res, Err(crate::Error::Api(ApiError::AccessDenied))),
            "header {header:?} got through"
        );
    }

    let token = Uuid::new_v4();
    let req = http::Request::builder()
        .method("GET")
        .uri("/")
        .header(http::header::AUTHORIZATION, format!("bearer {token}"))
        .body(())
        .expect("building request");
    let (mut parts, ()) = req.into_parts();
    let res = PreAuth::from_request_parts(&mut parts, &())
        .await
        .expect("parsing bearer token");
    assert_eq!(res.0, AuthToken(token));
}

#[tokio::test]
async fn comments_come_back_in_timestamp_order_with_authors() {
    let (store, mut app) = test_state();
    let alice = seed_user(&store, "alice").await;
    let bob = seed_user(&store, "bob").await;
    let token = seed_session(&store, alice).await;
    let forum = seed_forum(&store, "climbing").await;

    let base = Utc::now();
    for (author, content, minutes_ago) in
        [(bob, "last", 1), (alice, "first", 3), (bob, "middle", 2)]
    {
        let doc = to_document(&Comment {
            content: String::from(content),
            author,
            timestamp: base - Duration::minutes(minutes_ago),
        })
        .unwrap();
        store.add(&db::comments_of(forum), doc).await.unwrap();
    }

    let resp: Comments = call(
        &mut app,
        "POST",
        "/forums/getComment",
        Some(token),
        Some(&GetComments { forum_id: forum }),
    )
    .await
    .expect("listing comments");

    let contents: Vec<_> = resp.comments.iter().map(|c| c.content.as_str()).collect();
    assert_eq!(contents, ["first", "middle", "last"]);
    // repeated author, looked up each time
    let authors: Vec<_> = resp.comments.iter().map(|c| c.user.as_str()).collect();
    assert_eq!(authors, ["alice", "bob", "bob"]);
    assert!(resp
        .comments
        .windows(2)
        .all(|w| w[0].timestamp <= w[1].timestamp));
}

#[tokio::test]
async fn comment_listing_on_an_unknown_forum_is_not_found() {
    let (store, mut app) = test_state();
    let user = seed_user(&store, "alice").await;
    let token = seed_session(&store, user).await;
    let missing = ForumId(Uuid::new_v4());

    let err = call::<GetComments, Comments>(
        &mut app,
        "POST",
        "/forums/getComment",
        Some(token),
        Some(&GetComments { forum_id: missing }),
    )
    .await
    .unwrap_err();
    assert_eq!(err, ApiError::ForumNotFound(missing));
}

#[tokio::test]
async fn added_comments_show_up_in_the_listing() {
    let (store, mut app) = test_state();
    let alice = seed_user(&store, "alice").await;
    let token = seed_session(&store, alice).await;
    let forum = seed_forum(&store, "climbing").await;

    let new_comment = NewComment {
        forum_id: forum,
        content: String::from("first post"),
    };
    let resp: CommentAdded = call(
        &mut app,
        "POST",
        "/forums/addComment",
        Some(token),
        Some(&new_comment),
    )
    .await
    .expect("adding comment");
    assert_eq!(resp.comment, "first post");
    assert_eq!(resp.user_id, alice);

    // not idempotent: a retry appends a second copy
    let _: CommentAdded = call(
        &mut app,
        "POST",
        "/forums/addComment",
        Some(token),
        Some(&new_comment),
    )
    .await
    .expect("re-adding comment");

    let resp: Comments = call(
        &mut app,
        "POST",
        "/forums/getComment",
        Some(token),
        Some(&GetComments { forum_id: forum }),
    )
    .await
    .expect("listing comments");
    assert_eq!(resp.comments.len(), 2);
    assert!(resp
        .comments
        .iter()
        .all(|c| c.content == "first post" && c.user == "alice"));
}

#[tokio::test]
async fn empty_comments_are_accepted() {
    let (store, mut app) = test_state();
    let alice = seed_user(&store, "alice").await;
    let token = seed_session(&store, alice).await;
    let forum = seed_forum(&store, "climbing").await;

    let resp: CommentAdded = call(
        &mut app,
        "POST",
        "/forums/addComment",
        Some(token),
        Some(&NewComment {
            forum_id: forum,
            content: String::new(),
        }),
    )
    .await
    .expect("adding empty comment");
    assert_eq!(resp.comment, "");
}

#[tokio::test]
async fn commenting_on_an_unknown_forum_is_not_found() {
    let (store, mut app) = test_state();
    let alice = seed_user(&store, "alice").await;
    let token = seed_session(&store, alice).await;
    let missing = ForumId(Uuid::new_v4());

    let err = call::<NewComment, CommentAdded>(
        &mut app,
        "POST",
        "/forums/addComment",
        Some(token),
        Some(&NewComment {
            forum_id: missing,
            content: String::from("hello?"),
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(err, ApiError::ForumNotFound(missing));
}

#[tokio::test]
async fn out_of_range_ratings_are_rejected_without_writes() {
    let (store, mut app) = test_state();
    let alice = seed_user(&store, "alice").await;
    let token = seed_session(&store, alice).await;
    let forum = seed_forum(&store, "climbing").await;
    seed_grant(&store, alice, forum, None).await;

    let before = store.test_dump();
    for rating in [0, 6, -3] {
        let err = call::<NewRating, RatingUpdated>(
            &mut app,
            "POST",
            "/forums/rate",
            Some(token),
            Some(&NewRating {
                forum_id: forum,
                rating,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err, ApiError::InvalidRating(rating));
    }

    // non-integer ratings die at the JSON boundary
    let status = call_raw(
        &mut app,
        "/forums/rate",
        token,
        serde_json::json!({ "forumId": forum, "rating": 3.5 }),
    )
    .await;
    assert!(status.is_client_error(), "got {status}");

    assert_eq!(store.test_dump(), before);
}

#[tokio::test]
async fn rating_needs_an_access_grant() {
    let (store, mut app) = test_state();
    let alice = seed_user(&store, "alice").await;
    let token = seed_session(&store, alice).await;
    let forum = seed_forum(&store, "climbing").await;

    let before = store.test_dump();
    let err = call::<NewRating, RatingUpdated>(
        &mut app,
        "POST",
        "/forums/rate",
        Some(token),
        Some(&NewRating {
            forum_id: forum,
            rating: 4,
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(err, ApiError::AccessDenied);
    assert_eq!(store.test_dump(), before);
}

#[tokio::test]
async fn rating_an_unknown_forum_is_not_found() {
    let (store, mut app) = test_state();
    let alice = seed_user(&store, "alice").await;
    let token = seed_session(&store, alice).await;
    let missing = ForumId(Uuid::new_v4());

    let before = store.test_dump();
    let err = call::<NewRating, RatingUpdated>(
        &mut app,
        "POST",
        "/forums/rate",
        Some(token),
        Some(&NewRating {
            forum_id: missing,
            rating: 4,
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(err, ApiError::ForumNotFound(missing));
    assert_eq!(store.test_dump(), before);
}

#[tokio::test]
async fn rerating_replaces_the_previous_rating() {
    let (store, mut app) = test_state();
    let alice = seed_user(&store, "alice").await;
    let token = seed_session(&store, alice).await;
    let forum = seed_forum(&store, "climbing").await;
    seed_grant(&store, alice, forum, None).await;

    let resp: RatingUpdated = call(
        &mut app,
        "POST",
        "/forums/rate",
        Some(token),
        Some(&NewRating {
            forum_id: forum,
            rating: 3,
        }),
    )
    .await
    .expect("first rating");
    assert_eq!(resp.forum_rating, 3.0);
    let stats = forum_stats(&store, forum).await;
    assert_eq!(
        (stats.total_score, stats.total_users, stats.forum_rating),
        (3, 1, Some(3.0))
    );
    assert_eq!(grant_rating(&store, alice, forum).await, Some(3));

    // same user again: totalUsers stays put, the score moves by the delta
    let resp: RatingUpdated = call(
        &mut app,
        "POST",
        "/forums/rate",
        Some(token),
        Some(&NewRating {
            forum_id: forum,
            rating: 5,
        }),
    )
    .await
    .expect("second rating");
    assert_eq!(resp.forum_rating, 5.0);
    let stats = forum_stats(&store, forum).await;
    assert_eq!(
        (stats.total_score, stats.total_users, stats.forum_rating),
        (5, 1, Some(5.0))
    );
    assert_eq!(grant_rating(&store, alice, forum).await, Some(5));

    // the forum's identity fields survived the folds
    assert_eq!(stats.name, "climbing");
    assert_eq!(stats.url, "https://img.example.org/climbing.png");
}

#[tokio::test]
async fn rating_change_updates_the_aggregate_by_the_delta() {
    let (store, mut app) = test_state();
    let alice = seed_user(&store, "alice").await;
    let token = seed_session(&store, alice).await;
    let forum = seed_forum_with_stats(&store, 8, 2).await;
    seed_grant(&store, alice, forum, Some(3)).await;

    let resp: RatingUpdated = call(
        &mut app,
        "POST",
        "/forums/rate",
        Some(token),
        Some(&NewRating {
            forum_id: forum,
            rating: 5,
        }),
    )
    .await
    .expect("changing rating");
    assert_eq!(resp.forum_rating, 5.0);
    let stats = forum_stats(&store, forum).await;
    assert_eq!(
        (stats.total_score, stats.total_users, stats.forum_rating),
        (10, 2, Some(5.0))
    );
}

#[tokio::test]
async fn forum_rating_always_equals_score_over_users() {
    let (store, _app) = test_state();
    let forum = seed_forum(&store, "climbing").await;
    let mut users = Vec::new();
    for name in ["alice", "bob", "carol"] {
        let user = seed_user(&store, name).await;
        seed_grant(&store, user, forum, None).await;
        users.push(user);
    }

    for (rater, rating) in [(0, 1), (1, 5), (0, 4), (2, 3), (1, 2)] {
        db::rate(store.as_ref(), forum, users[rater], rating)
            .await
            .expect("rating");
        let stats = forum_stats(&store, forum).await;
        assert!(stats.total_users > 0);
        assert_eq!(
            stats.forum_rating,
            Some(stats.total_score as f64 / stats.total_users as f64)
        );
    }

    let stats = forum_stats(&store, forum).await;
    assert_eq!(
        (stats.total_score, stats.total_users, stats.forum_rating),
        (4 + 2 + 3, 3, Some(3.0))
    );
}

#[tokio::test]
async fn concurrent_first_ratings_lose_nothing() {
    let (store, _app) = test_state();
    let alice = seed_user(&store, "alice").await;
    let bob = seed_user(&store, "bob").await;
    let forum = seed_forum(&store, "climbing").await;
    seed_grant(&store, alice, forum, None).await;
    seed_grant(&store, bob, forum, None).await;

    let (ra, rb) = tokio::join!(
        db::rate(store.as_ref(), forum, alice, 3),
        db::rate(store.as_ref(), forum, bob, 5),
    );
    ra.expect("rating as alice");
    rb.expect("rating as bob");

    let stats = forum_stats(&store, forum).await;
    assert_eq!(
        (stats.total_score, stats.total_users, stats.forum_rating),
        (8, 2, Some(4.0))
    );
}
