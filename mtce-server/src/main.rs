//! `mtce-server`: the HTTP surface (spec §4.H / §6) over the MTCE engine.

mod auth;
mod error_response;
mod handlers;
mod ip;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use structopt::StructOpt;

use crate::state::AppState;

#[derive(StructOpt, Debug)]
#[structopt(rename_all = "kebab-case")]
pub struct MainOpts {
    /// Log filter (like RUST_LOG; trace, debug, info, ...). Falls back to
    /// RUST_LOG, then "info", same precedence as the teacher's mp4server.
    #[structopt(long)]
    pub log: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let opts = MainOpts::from_args();

    let mut builder = env_logger::Builder::new();
    if let Some(ref filter) = opts.log {
        builder.parse_filters(filter);
    } else if let Ok(filter) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filter);
    } else if let Ok(filter) = std::env::var("MTCE_LOG") {
        builder.parse_filters(&filter);
    } else {
        builder.parse_filters("info");
    }
    builder.init();

    let config = mtce_core::Config::from_env()?;
    let bind_addr: SocketAddr = config.bind_addr.parse()?;
    log::info!("starting mtce-server on {bind_addr}");

    let state = Arc::new(AppState::build(config)?);
    let app = routes::build(state);

    axum::Server::bind(&bind_addr)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await?;

    Ok(())
}
