use std::sync::Arc;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{self, request},
};

use agora_api::{AuthToken, UserId, Uuid};
use agora_store::Store;

use crate::{db, Error};

pub type DynStore = Arc<dyn Store>;

#[derive(Clone, axum::extract::FromRef)]
pub struct AppState {
    pub store: DynStore,
}

pub struct PreAuth(pub AuthToken);

#[async_trait]
impl<S: Sync> FromRequestParts<S> for PreAuth {
    type Rejection = Error;

    async fn from_request_parts(req: &mut request::Parts, _state: &S) -> Result<PreAuth, Error> {
        match req.headers.get(http::header::AUTHORIZATION) {
            None => Err(Error::access_denied()),
            Some(auth) => {
                let auth = auth.to_str().map_err(|_| Error::access_denied())?;
                let mut auth = auth.split(' ');
                if !auth
                    .next()
                    .ok_or(Error::access_denied())?
                    .eq_ignore_ascii_case("bearer")
                {
                    return Err(Error::access_denied());
                }
                let token = auth.next().ok_or(Error::access_denied())?;
                if auth.next().is_some() {
                    return Err(Error::access_denied());
                }
                let token = Uuid::try_from(token).map_err(|_| Error::access_denied())?;
                Ok(PreAuth(AuthToken(token)))
            }
        }
    }
}

pub struct Auth(pub UserId);

#[async_trait]
impl FromRequestParts<AppState> for Auth {
    type Rejection = Error;

    async fn from_request_parts(req: &mut request::Parts, state: &AppState) -> Result<Auth, Error> {
        let token = PreAuth::from_request_parts(req, state).await?.0;
        Ok(Auth(db::recover_session(&*state.store, token).await?))
    }
}
