//! csp-discord: Discord adapter for streaming dataflow graphs
//!
//! Binds the Discord gateway (via serenity) into a host streaming runtime:
//! inbound events surface as batches of [`DiscordMessage`] records through
//! [`DiscordAdapterManager::subscribe`], and outbound records become
//! Discord API calls through [`DiscordAdapterManager::publish`]. Token
//! lifecycle, reconnects, and rate limiting stay with the wrapped client.

pub mod api;
pub mod config;
pub mod error;
mod handler;
pub mod manager;
pub mod message;
pub mod presence;

pub use api::{ApiCall, ChatApi, MockChatApi, SerenityApi};
pub use config::DiscordConfig;
pub use error::{DiscordError, Result};
pub use manager::{DiscordAdapterManager, SubscribeOptions, Subscription};
pub use message::{
    ChannelKind, DiscordMessage, OutboundAction, mention_channel, mention_everyone, mention_here,
    mention_role, mention_user,
};
pub use presence::{Activity, ActivityKind, DiscordPresence, PresenceStatus};
