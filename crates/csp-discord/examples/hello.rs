//! Add a 👋 reaction to every message containing "hello".
//!
//! Usage:
//! ```sh
//! DISCORD_TOKEN=<token-or-token-file-path> cargo run --example hello
//! ```

use csp_discord::{DiscordAdapterManager, DiscordConfig, DiscordMessage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let token = std::env::var("DISCORD_TOKEN")?;
    let config = DiscordConfig::new(token)?;

    let manager = DiscordAdapterManager::new(config);
    manager.connect().await?;

    let mut messages = manager.subscribe().await?;
    while let Some(batch) = messages.recv().await {
        for msg in batch {
            let Some(text) = &msg.msg else { continue };
            if !text.to_lowercase().contains("hello") {
                continue;
            }

            let reaction = DiscordMessage {
                channel: msg.channel_id.clone(),
                thread: msg.thread.clone(),
                reaction: Some("👋".to_string()),
                ..Default::default()
            };
            if let Err(e) = manager.publish(&reaction).await {
                tracing::warn!("could not publish reaction: {e}");
            }
        }
    }

    manager.shutdown().await;
    Ok(())
}
