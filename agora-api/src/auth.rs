use uuid::Uuid;

use crate::{UserId, STUB_UUID};

/// Opaque bearer token mapping to a session document. Sessions are
/// provisioned out of band, the server only ever resolves them.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct AuthToken(pub Uuid);

impl AuthToken {
    pub fn stub() -> AuthToken {
        AuthToken(STUB_UUID)
    }
}

/// Stored shape of a session document: which user a token authenticates.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Session {
    pub user: UserId,
}
