//! Telegram front end for the catalogue assistant: loads configuration,
//! builds the shared state, and runs the long-polling loop, spawning one
//! task per incoming update.

mod config;
mod handlers;
mod state;
mod telegram;

use crate::{config::get_config, state::build_state};
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::FmtSubscriber;

const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = get_config(None)?;
    let poll_timeout = config.poll_timeout_secs;
    let state = build_state(config).await?;
    info!("bot started, entering polling loop");

    let mut offset: i64 = 0;
    loop {
        let updates = match state.telegram.get_updates(offset, poll_timeout).await {
            Ok(updates) => updates,
            Err(e) => {
                error!("getUpdates failed: {e:#}");
                tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                continue;
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            tokio::spawn(handlers::handle_update(state.clone(), update));
        }
    }
}
