use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::routing::{get, post};
use axum::Router;
use structopt::StructOpt;

use agora_store::PgStore;

mod db;
mod error;
mod extractors;
mod handlers;
mod tests;

pub use error::Error;

use extractors::AppState;

#[derive(Debug, StructOpt)]
#[structopt(name = "agora-server", about = "API server for the agora mobile client")]
struct Opt {
    /// Address to listen on
    #[structopt(long, default_value = "127.0.0.1:3000")]
    bind: SocketAddr,
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/forums", get(handlers::accessible_forums))
        .route("/forums/getComment", post(handlers::get_comments))
        .route("/forums/addComment", post(handlers::add_comment))
        .route("/forums/rate", post(handlers::rate_forum))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = Opt::from_args();
    tracing_subscriber::fmt::init();

    let db_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let store = PgStore::connect(&db_url)
        .await
        .with_context(|| format!("connecting to {db_url:?}"))?;
    let state = AppState {
        store: Arc::new(store),
    };

    tracing::info!("listening on {}", opt.bind);
    axum::Server::bind(&opt.bind)
        .serve(app(state).into_make_service())
        .await
        .context("serving agora api")
}
