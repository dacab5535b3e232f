//! Wrapped-client API seam
//!
//! [`ChatApi`] is the narrow boundary between the adapter and serenity's
//! HTTP/gateway surface: exactly the calls publish, backfill, and presence
//! need. [`MockChatApi`] records calls in order so graphs can be exercised
//! without a live token.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serenity::all::{ChannelId, EmojiId, GetMessages, MessageId, ReactionType, ShardManager};
use serenity::http::Http;

use crate::error::Result;
use crate::handler::{Shared, history_record};
use crate::message::DiscordMessage;
use crate::presence::DiscordPresence;

/// The Discord calls the adapter performs.
///
/// Errors are the wrapped client's own, surfaced unchanged; implementations
/// must not retry.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Send a text message; returns the created message's id.
    async fn send_message(&self, channel: ChannelId, text: &str) -> Result<MessageId>;

    /// Add a reaction to an existing message.
    async fn add_reaction(&self, channel: ChannelId, message: MessageId, emoji: &str)
    -> Result<()>;

    /// Id of the newest message in a channel, if any.
    async fn latest_message_id(&self, channel: ChannelId) -> Result<Option<MessageId>>;

    /// Up to `limit` recent messages from a channel, oldest first.
    async fn recent_messages(&self, channel: ChannelId, limit: u8)
    -> Result<Vec<DiscordMessage>>;

    /// Apply a presence update to every running shard.
    async fn set_presence(&self, presence: &DiscordPresence) -> Result<()>;
}

/// Production [`ChatApi`] over serenity's HTTP client and shard manager.
pub struct SerenityApi {
    http: Arc<Http>,
    shard_manager: Arc<ShardManager>,
    shared: Arc<Shared>,
}

impl SerenityApi {
    pub(crate) fn new(
        http: Arc<Http>,
        shard_manager: Arc<ShardManager>,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            http,
            shard_manager,
            shared,
        }
    }
}

#[async_trait]
impl ChatApi for SerenityApi {
    async fn send_message(&self, channel: ChannelId, text: &str) -> Result<MessageId> {
        let message = channel.say(&self.http, text).await?;
        Ok(message.id)
    }

    async fn add_reaction(
        &self,
        channel: ChannelId,
        message: MessageId,
        emoji: &str,
    ) -> Result<()> {
        let reaction = parse_emoji(emoji);
        self.http.create_reaction(channel, message, &reaction).await?;
        Ok(())
    }

    async fn latest_message_id(&self, channel: ChannelId) -> Result<Option<MessageId>> {
        let messages = channel
            .messages(&self.http, GetMessages::new().limit(1))
            .await?;
        Ok(messages.first().map(|m| m.id))
    }

    async fn recent_messages(
        &self,
        channel: ChannelId,
        limit: u8,
    ) -> Result<Vec<DiscordMessage>> {
        // The API returns newest first; the stream wants arrival order.
        let mut messages = channel
            .messages(&self.http, GetMessages::new().limit(limit))
            .await?;
        messages.reverse();
        Ok(messages
            .iter()
            .map(|m| history_record(m, channel, &self.shared))
            .collect())
    }

    async fn set_presence(&self, presence: &DiscordPresence) -> Result<()> {
        let status = presence.status.to_serenity();
        let activity = presence.activity.as_ref().map(|a| a.to_serenity());

        let runners = self.shard_manager.runners.lock().await;
        for runner in runners.values() {
            runner.runner_tx.set_presence(activity.clone(), status);
        }
        Ok(())
    }
}

/// Parse an emoji identifier into a serenity reaction.
///
/// Custom emoji use the `name:id` or `name:id:animated` form; anything else
/// is treated as a Unicode emoji.
fn parse_emoji(emoji: &str) -> ReactionType {
    let parts: Vec<&str> = emoji.splitn(3, ':').collect();
    match parts.as_slice() {
        [name, id_str, animated_flag] => {
            if let Ok(id) = id_str.parse::<u64>() {
                let animated = *animated_flag == "1" || *animated_flag == "animated";
                return ReactionType::Custom {
                    animated,
                    id: EmojiId::new(id),
                    name: Some((*name).to_string()),
                };
            }
        }
        [name, id_str] => {
            if let Ok(id) = id_str.parse::<u64>() {
                return ReactionType::Custom {
                    animated: false,
                    id: EmojiId::new(id),
                    name: Some((*name).to_string()),
                };
            }
        }
        _ => {}
    }
    ReactionType::Unicode(emoji.to_string())
}

/// One call recorded by [`MockChatApi`].
#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    Send {
        channel: ChannelId,
        text: String,
    },
    React {
        channel: ChannelId,
        message: MessageId,
        emoji: String,
    },
    Presence(DiscordPresence),
}

/// In-memory [`ChatApi`] that records every call in order.
///
/// Useful for testing graph logic without a live bot token: script channel
/// state with [`MockChatApi::set_latest`] and [`MockChatApi::set_history`],
/// then assert on [`MockChatApi::calls`].
pub struct MockChatApi {
    calls: Mutex<Vec<ApiCall>>,
    latest: Mutex<HashMap<ChannelId, MessageId>>,
    history: Mutex<HashMap<ChannelId, Vec<DiscordMessage>>>,
    next_id: AtomicU64,
}

impl MockChatApi {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            latest: Mutex::new(HashMap::new()),
            history: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1000),
        }
    }

    /// Everything called so far, in call order.
    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Script the newest message id for a channel.
    pub fn set_latest(&self, channel: ChannelId, message: MessageId) {
        self.latest.lock().unwrap().insert(channel, message);
    }

    /// Script the history returned for a channel, oldest first.
    pub fn set_history(&self, channel: ChannelId, records: Vec<DiscordMessage>) {
        self.history.lock().unwrap().insert(channel, records);
    }
}

impl Default for MockChatApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatApi for MockChatApi {
    async fn send_message(&self, channel: ChannelId, text: &str) -> Result<MessageId> {
        self.calls.lock().unwrap().push(ApiCall::Send {
            channel,
            text: text.to_string(),
        });
        let id = MessageId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.latest.lock().unwrap().insert(channel, id);
        Ok(id)
    }

    async fn add_reaction(
        &self,
        channel: ChannelId,
        message: MessageId,
        emoji: &str,
    ) -> Result<()> {
        self.calls.lock().unwrap().push(ApiCall::React {
            channel,
            message,
            emoji: emoji.to_string(),
        });
        Ok(())
    }

    async fn latest_message_id(&self, channel: ChannelId) -> Result<Option<MessageId>> {
        Ok(self.latest.lock().unwrap().get(&channel).copied())
    }

    async fn recent_messages(
        &self,
        channel: ChannelId,
        limit: u8,
    ) -> Result<Vec<DiscordMessage>> {
        let history = self.history.lock().unwrap();
        let records = history.get(&channel).cloned().unwrap_or_default();
        Ok(records.into_iter().take(limit as usize).collect())
    }

    async fn set_presence(&self, presence: &DiscordPresence) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(ApiCall::Presence(presence.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_unicode_emoji() {
        assert_eq!(
            parse_emoji("👋"),
            ReactionType::Unicode("👋".to_string())
        );
    }

    #[test]
    fn test_parse_custom_emoji() {
        assert_eq!(
            parse_emoji("party:99"),
            ReactionType::Custom {
                animated: false,
                id: EmojiId::new(99),
                name: Some("party".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_animated_custom_emoji() {
        assert_eq!(
            parse_emoji("blob:7:animated"),
            ReactionType::Custom {
                animated: true,
                id: EmojiId::new(7),
                name: Some("blob".to_string()),
            }
        );
    }

    #[test]
    fn test_malformed_custom_emoji_falls_back_to_unicode() {
        assert_eq!(
            parse_emoji("party:notanumber"),
            ReactionType::Unicode("party:notanumber".to_string())
        );
    }

    #[tokio::test]
    async fn test_mock_records_calls_in_order() {
        let api = MockChatApi::new();
        let channel = ChannelId::new(1);

        let id = api.send_message(channel, "hi").await.unwrap();
        api.add_reaction(channel, id, "👋").await.unwrap();

        let calls = api.calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(calls[0], ApiCall::Send { .. }));
        assert!(matches!(calls[1], ApiCall::React { .. }));
    }
}
