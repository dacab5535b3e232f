//! Gateway event handling
//!
//! Serenity delivers gateway events through callbacks, which does not mesh
//! with a pull-based subscribe stream. This module translates each callback
//! into a [`DiscordMessage`] record and pushes it onto the queue of every
//! live subscription, decoupling serenity's dispatch from the host
//! runtime's consumption cadence.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use serenity::all::{
    ChannelId, ChannelType, Context, EventHandler, Guild, GuildChannel, GuildId, Message,
    MessageId, Reaction, ReactionType, Ready, UserId,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::message::{ChannelKind, DiscordMessage};

/// Connection lifecycle: disconnected → connected → disconnected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ConnectionState {
    Disconnected,
    Connected,
    Failed(String),
}

/// Bot identity captured at ready.
pub(crate) struct BotUser {
    pub(crate) id: UserId,
    pub(crate) name: String,
}

/// One registered subscription: a queue plus its admission filter.
pub(crate) struct SubscriptionSink {
    pub(crate) tx: mpsc::UnboundedSender<DiscordMessage>,
    pub(crate) skip_own: bool,
    /// Admitted channel ids (as strings), or `None` for all channels
    pub(crate) channels: Option<HashSet<String>>,
}

/// State shared between the manager and the gateway event handler.
pub(crate) struct Shared {
    pub(crate) subscriptions: DashMap<u64, SubscriptionSink>,
    /// Lowercased channel name -> id, captured at ready
    pub(crate) directory: DashMap<String, ChannelId>,
    /// Channel id -> display name
    pub(crate) channel_names: DashMap<ChannelId, String>,
    /// Most recent message seen (or sent) per channel/thread
    pub(crate) last_seen: DashMap<ChannelId, MessageId>,
    pub(crate) bot_user: OnceLock<BotUser>,
    pub(crate) state_tx: watch::Sender<ConnectionState>,
    next_subscription: AtomicU64,
}

impl Shared {
    pub(crate) fn new(state_tx: watch::Sender<ConnectionState>) -> Self {
        Self {
            subscriptions: DashMap::new(),
            directory: DashMap::new(),
            channel_names: DashMap::new(),
            last_seen: DashMap::new(),
            bot_user: OnceLock::new(),
            state_tx,
            next_subscription: AtomicU64::new(0),
        }
    }

    pub(crate) fn next_subscription_id(&self) -> u64 {
        self.next_subscription.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn index_channel(&self, channel: &GuildChannel) {
        if !matches!(channel.kind, ChannelType::Text | ChannelType::News) {
            return;
        }
        self.directory
            .insert(channel.name.to_lowercase(), channel.id);
        self.channel_names.insert(channel.id, channel.name.clone());
    }

    /// Display name for a channel, falling back to its id.
    pub(crate) fn display_name(&self, channel: ChannelId) -> String {
        self.channel_names
            .get(&channel)
            .map(|name| name.clone())
            .unwrap_or_else(|| channel.to_string())
    }

    /// Push one record to every subscription whose filter admits it.
    ///
    /// Arrival order is preserved; nothing is reordered or deduplicated.
    /// Subscriptions whose receiver has been dropped are pruned.
    pub(crate) fn dispatch(&self, record: DiscordMessage) {
        let bot_id = self.bot_user.get().map(|bot| bot.id.to_string());
        let mut dead = Vec::new();

        for entry in self.subscriptions.iter() {
            if !admits(&record, entry.value(), bot_id.as_deref()) {
                continue;
            }
            if entry.value().tx.send(record.clone()).is_err() {
                dead.push(*entry.key());
            }
        }

        for id in dead {
            debug!(subscription = id, "removing closed subscription");
            self.subscriptions.remove(&id);
        }
    }
}

/// Whether a sink's filter admits a record.
pub(crate) fn admits(
    record: &DiscordMessage,
    sink: &SubscriptionSink,
    bot_id: Option<&str>,
) -> bool {
    if sink.skip_own && bot_id.is_some_and(|bot| record.user_id == bot) {
        return false;
    }

    if let Some(channels) = &sink.channels {
        let in_channel = channels.contains(&record.channel_id);
        let in_thread = record
            .thread
            .as_ref()
            .is_some_and(|thread| channels.contains(thread));
        if !in_channel && !in_thread {
            return false;
        }
    }

    true
}

/// Emoji identifier for a reaction: Unicode verbatim, `name:id` for custom.
pub(crate) fn emoji_string(emoji: &ReactionType) -> String {
    match emoji {
        ReactionType::Unicode(s) => s.clone(),
        ReactionType::Custom { name, id, .. } => {
            format!("{}:{}", name.clone().unwrap_or_default(), id.get())
        }
        other => other.to_string(),
    }
}

/// Build a record from a message fetched out of channel history.
pub(crate) fn history_record(
    msg: &Message,
    channel: ChannelId,
    shared: &Shared,
) -> DiscordMessage {
    let kind = if msg.guild_id.is_some() || shared.channel_names.contains_key(&channel) {
        ChannelKind::Public
    } else {
        ChannelKind::Dm
    };

    DiscordMessage {
        user: msg.author.name.clone(),
        user_id: msg.author.id.to_string(),
        tags: msg.mentions.iter().map(|u| u.name.clone()).collect(),
        channel: shared.display_name(channel),
        channel_id: channel.to_string(),
        channel_kind: kind,
        msg: Some(msg.content.clone()),
        reaction: None,
        thread: None,
    }
}

/// The serenity event handler feeding the subscribe stream.
pub(crate) struct Handler {
    shared: Arc<Shared>,
}

impl Handler {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Resolve a message's channel to (parent channel, thread).
    ///
    /// A message posted inside a thread reports the thread as its channel;
    /// the record instead names the parent channel and carries the thread
    /// id separately.
    fn classify(
        &self,
        ctx: &Context,
        guild_id: Option<GuildId>,
        channel_id: ChannelId,
    ) -> (ChannelId, Option<ChannelId>) {
        if let Some(guild_id) = guild_id {
            if let Some(guild) = ctx.cache.guild(guild_id) {
                if let Some(thread) = guild.threads.iter().find(|t| t.id == channel_id) {
                    let parent = thread.parent_id.unwrap_or(channel_id);
                    return (parent, Some(channel_id));
                }
            }
        }
        (channel_id, None)
    }

    fn message_record(&self, ctx: &Context, msg: &Message) -> DiscordMessage {
        let (parent, thread) = self.classify(ctx, msg.guild_id, msg.channel_id);
        let kind = if msg.guild_id.is_none() {
            ChannelKind::Dm
        } else {
            ChannelKind::Public
        };

        DiscordMessage {
            user: msg.author.name.clone(),
            user_id: msg.author.id.to_string(),
            tags: msg.mentions.iter().map(|u| u.name.clone()).collect(),
            channel: self.shared.display_name(parent),
            channel_id: parent.to_string(),
            channel_kind: kind,
            msg: Some(msg.content.clone()),
            reaction: None,
            thread: thread.map(|t| t.to_string()),
        }
    }

    fn reaction_record(&self, ctx: &Context, reaction: &Reaction) -> Option<DiscordMessage> {
        // user_id is absent only on events predating the reaction intents;
        // such an event carries nothing to attribute, so skip it.
        let user_id = reaction.user_id?;
        let user = reaction
            .member
            .as_ref()
            .map(|m| m.user.name.clone())
            .unwrap_or_else(|| user_id.to_string());
        let (parent, thread) = self.classify(ctx, reaction.guild_id, reaction.channel_id);
        let kind = if reaction.guild_id.is_none() {
            ChannelKind::Dm
        } else {
            ChannelKind::Public
        };

        Some(DiscordMessage {
            user,
            user_id: user_id.to_string(),
            tags: Vec::new(),
            channel: self.shared.display_name(parent),
            channel_id: parent.to_string(),
            channel_kind: kind,
            msg: None,
            reaction: Some(emoji_string(&reaction.emoji)),
            thread: thread.map(|t| t.to_string()),
        })
    }
}

#[serenity::async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        let _ = self.shared.bot_user.set(BotUser {
            id: ready.user.id,
            name: ready.user.name.clone(),
        });

        // Capture the channel directory so names resolve from the moment
        // connect() returns.
        for guild in &ready.guilds {
            match ctx.http.get_channels(guild.id).await {
                Ok(channels) => {
                    for channel in &channels {
                        self.shared.index_channel(channel);
                    }
                }
                Err(e) => warn!(guild = %guild.id, "could not list guild channels: {e}"),
            }
        }

        info!(
            user = %ready.user.name,
            guilds = ready.guilds.len(),
            "connected to Discord gateway"
        );
        let _ = self.shared.state_tx.send(ConnectionState::Connected);
    }

    async fn guild_create(&self, _ctx: Context, guild: Guild, _is_new: Option<bool>) {
        for channel in guild.channels.values() {
            self.shared.index_channel(channel);
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        let record = self.message_record(&ctx, &msg);
        debug!(channel = %record.channel, user = %record.user, "inbound message");
        self.shared.last_seen.insert(msg.channel_id, msg.id);
        self.shared.dispatch(record);
    }

    async fn reaction_add(&self, ctx: Context, reaction: Reaction) {
        match self.reaction_record(&ctx, &reaction) {
            Some(record) => {
                debug!(channel = %record.channel, "inbound reaction");
                self.shared.dispatch(record);
            }
            None => warn!(channel = %reaction.channel_id, "skipping unattributable reaction"),
        }
    }
}
