//! Adapter manager
//!
//! [`DiscordAdapterManager`] owns one live gateway connection and exposes
//! the two streaming operations: [`subscribe`](DiscordAdapterManager::subscribe),
//! producing batches of inbound records, and
//! [`publish`](DiscordAdapterManager::publish), turning outbound records
//! into Discord API calls. Connection state is scoped to the manager
//! instance; multiple managers in one process are independent.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::{Arc, OnceLock, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use serenity::Client;
use serenity::all::{ChannelId, ShardManager};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::api::{ChatApi, SerenityApi};
use crate::config::DiscordConfig;
use crate::error::{DiscordError, Result};
use crate::handler::{ConnectionState, Handler, Shared, SubscriptionSink};
use crate::message::{DiscordMessage, OutboundAction};
use crate::presence::DiscordPresence;

/// Options for [`DiscordAdapterManager::subscribe_with`].
#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    /// Restrict the stream to these channels, given by name or id.
    /// `None` subscribes to every channel the bot is a member of, plus
    /// direct messages.
    pub channels: Option<HashSet<String>>,
    /// Drop records authored by the bot itself
    pub skip_own: bool,
    /// When false (and a channel filter is set), deliver recent channel
    /// history as the first batches before live events
    pub skip_history: bool,
    /// Per-channel cap on backfilled history
    pub history_limit: u8,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            channels: None,
            skip_own: true,
            skip_history: true,
            history_limit: 50,
        }
    }
}

/// Manager for one Discord connection.
pub struct DiscordAdapterManager {
    config: DiscordConfig,
    shared: Arc<Shared>,
    state_rx: watch::Receiver<ConnectionState>,
    api: OnceLock<Arc<dyn ChatApi>>,
    shard_manager: Mutex<Option<Arc<ShardManager>>>,
    gateway: Mutex<Option<JoinHandle<()>>>,
}

impl DiscordAdapterManager {
    /// Create a manager. No connection is made until [`connect`] runs.
    ///
    /// [`connect`]: DiscordAdapterManager::connect
    pub fn new(config: DiscordConfig) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            shared: Arc::new(Shared::new(state_tx)),
            state_rx,
            api: OnceLock::new(),
            shard_manager: Mutex::new(None),
            gateway: Mutex::new(None),
        }
    }

    /// Create a manager wired to a custom [`ChatApi`] implementation.
    ///
    /// The manager behaves as connected and every outbound call goes to
    /// `api`; no gateway connection is made. Intended for exercising graph
    /// logic against [`MockChatApi`](crate::api::MockChatApi).
    pub fn with_api(config: DiscordConfig, api: Arc<dyn ChatApi>) -> Self {
        let manager = Self::new(config);
        let _ = manager.api.set(api);
        let _ = manager.shared.state_tx.send(ConnectionState::Connected);
        manager
    }

    /// Authenticate to the Discord gateway and wait until the connection
    /// is ready.
    ///
    /// Idempotent once connected. Reconnect and session resume within a
    /// live connection are the wrapped client's responsibility.
    pub async fn connect(&self) -> Result<()> {
        if matches!(*self.state_rx.borrow(), ConnectionState::Connected) {
            return Ok(());
        }

        let intents = self.config.gateway_intents()?;
        let handler = Handler::new(self.shared.clone());
        let mut client = Client::builder(self.config.token(), intents)
            .event_handler(handler)
            .await?;

        let api = SerenityApi::new(
            client.http.clone(),
            client.shard_manager.clone(),
            self.shared.clone(),
        );
        let _ = self.api.set(Arc::new(api));
        *self.shard_manager.lock().await = Some(client.shard_manager.clone());

        let shared = self.shared.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = client.start().await {
                error!("Discord gateway exited: {e}");
                let _ = shared.state_tx.send(ConnectionState::Failed(e.to_string()));
            }
        });
        *self.gateway.lock().await = Some(handle);

        let mut state_rx = self.state_rx.clone();
        loop {
            let state = state_rx.borrow_and_update().clone();
            match state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Failed(e) => return Err(DiscordError::Gateway(e)),
                ConnectionState::Disconnected => {}
            }
            state_rx
                .changed()
                .await
                .map_err(|_| DiscordError::NotConnected)?;
        }
    }

    /// Release the connection: shut down all shards, stop the gateway
    /// task, and close every subscription stream.
    pub async fn shutdown(&self) {
        if let Some(shard_manager) = self.shard_manager.lock().await.take() {
            shard_manager.shutdown_all().await;
        }
        if let Some(handle) = self.gateway.lock().await.take() {
            let _ = handle.await;
        }
        let _ = self.shared.state_tx.send(ConnectionState::Disconnected);
        self.shared.subscriptions.clear();
        info!("Discord adapter shut down");
    }

    /// Subscribe to every channel the bot is a member of, plus direct
    /// messages.
    pub async fn subscribe(&self) -> Result<Subscription> {
        self.subscribe_with(SubscribeOptions::default()).await
    }

    /// Subscribe with filtering and backfill options.
    ///
    /// Channel names are resolved through the directory captured at
    /// connection time; an unresolvable name is an error rather than a
    /// silently empty filter.
    pub async fn subscribe_with(&self, options: SubscribeOptions) -> Result<Subscription> {
        self.ensure_connected()?;

        let channel_ids = match &options.channels {
            Some(wanted) => {
                let mut ids = Vec::with_capacity(wanted.len());
                for entry in wanted {
                    ids.push(self.resolve_channel(entry)?);
                }
                Some(ids)
            }
            None => None,
        };

        let (tx, rx) = mpsc::unbounded_channel();

        if !options.skip_history {
            match &channel_ids {
                Some(ids) => {
                    let api = self.api()?;
                    for &channel in ids {
                        for record in api.recent_messages(channel, options.history_limit).await? {
                            let _ = tx.send(record);
                        }
                    }
                }
                None => warn!("skip_history=false requires a channel filter; skipping backfill"),
            }
        }

        let id = self.shared.next_subscription_id();
        self.shared.subscriptions.insert(
            id,
            SubscriptionSink {
                tx,
                skip_own: options.skip_own,
                channels: channel_ids
                    .map(|ids| ids.iter().map(|c| c.to_string()).collect()),
            },
        );

        Ok(Subscription {
            id,
            rx,
            shared: Arc::downgrade(&self.shared),
        })
    }

    /// Perform the Discord call(s) an outbound record asks for.
    ///
    /// `msg` alone sends a text message; `reaction` alone adds a reaction
    /// to the most relevant recent message in the target channel/thread;
    /// both send first and then react to the just-sent message, in that
    /// order. Errors from the wrapped client surface as-is, with no retry
    /// and no internal queueing.
    pub async fn publish(&self, record: &DiscordMessage) -> Result<()> {
        self.ensure_connected()?;
        let api = self.api()?;
        let action = OutboundAction::from_record(record)?;

        let channel = self.resolve_channel(&record.channel)?;
        let target = match &record.thread {
            Some(thread) => parse_id(thread)
                .map(ChannelId::new)
                .ok_or_else(|| DiscordError::InvalidTarget(thread.clone()))?,
            None => channel,
        };

        match action {
            OutboundAction::Send { text } => {
                let sent = api.send_message(target, &text).await?;
                self.shared.last_seen.insert(target, sent);
            }
            OutboundAction::React { emoji } => {
                let tracked = self.shared.last_seen.get(&target).map(|entry| *entry.value());
                let message = match tracked {
                    Some(message) => message,
                    None => api
                        .latest_message_id(target)
                        .await?
                        .ok_or_else(|| DiscordError::NoRecentMessage(target.to_string()))?,
                };
                api.add_reaction(target, message, &emoji).await?;
            }
            OutboundAction::SendAndReact { text, emoji } => {
                let sent = api.send_message(target, &text).await?;
                self.shared.last_seen.insert(target, sent);
                api.add_reaction(target, sent, &emoji).await?;
            }
        }

        Ok(())
    }

    /// Apply a presence update to every running shard.
    pub async fn publish_presence(&self, presence: &DiscordPresence) -> Result<()> {
        self.ensure_connected()?;
        self.api()?.set_presence(presence).await
    }

    fn ensure_connected(&self) -> Result<()> {
        match &*self.state_rx.borrow() {
            ConnectionState::Connected => Ok(()),
            _ => Err(DiscordError::NotConnected),
        }
    }

    fn api(&self) -> Result<&Arc<dyn ChatApi>> {
        self.api.get().ok_or(DiscordError::NotConnected)
    }

    /// Resolve a channel given by numeric id or by name.
    fn resolve_channel(&self, channel: &str) -> Result<ChannelId> {
        if channel.is_empty() {
            return Err(DiscordError::InvalidTarget("empty channel".to_string()));
        }
        if channel.chars().all(|c| c.is_ascii_digit()) {
            return parse_id(channel)
                .map(ChannelId::new)
                .ok_or_else(|| DiscordError::InvalidTarget(channel.to_string()));
        }

        let name = channel.trim_start_matches('#').to_lowercase();
        self.shared
            .directory
            .get(&name)
            .map(|entry| *entry.value())
            .ok_or_else(|| DiscordError::UnknownChannel(channel.to_string()))
    }
}

fn parse_id(s: &str) -> Option<u64> {
    s.parse::<u64>().ok().filter(|&id| id != 0)
}

/// A live subscription: a continuous sequence of record batches.
///
/// Each batch holds everything that arrived since the previous poll, in
/// arrival order. The sequence ends only when the manager shuts down.
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<DiscordMessage>,
    shared: Weak<Shared>,
}

impl Subscription {
    /// Await the next batch. Returns `None` after shutdown.
    pub async fn recv(&mut self) -> Option<Vec<DiscordMessage>> {
        let first = self.rx.recv().await?;
        let mut batch = vec![first];
        while let Ok(record) = self.rx.try_recv() {
            batch.push(record);
        }
        Some(batch)
    }

    /// Flatten batches into a stream of individual records.
    pub fn unrolled(self) -> impl Stream<Item = DiscordMessage> {
        use futures::StreamExt;
        self.flat_map(futures::stream::iter)
    }
}

impl Stream for Subscription {
    type Item = Vec<DiscordMessage>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let mut batch = Vec::new();
        loop {
            match this.rx.poll_recv(cx) {
                Poll::Ready(Some(record)) => batch.push(record),
                Poll::Ready(None) if batch.is_empty() => return Poll::Ready(None),
                Poll::Ready(None) => return Poll::Ready(Some(batch)),
                Poll::Pending if batch.is_empty() => return Poll::Pending,
                Poll::Pending => return Poll::Ready(Some(batch)),
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.subscriptions.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiCall, MockChatApi};
    use crate::presence::PresenceStatus;
    use serenity::all::MessageId;

    fn manager_with_mock() -> (DiscordAdapterManager, Arc<MockChatApi>) {
        let api = Arc::new(MockChatApi::new());
        let config = DiscordConfig::new("test-token").unwrap();
        let manager = DiscordAdapterManager::with_api(config, api.clone());
        (manager, api)
    }

    fn outbound(channel: &str) -> DiscordMessage {
        DiscordMessage {
            channel: channel.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_publish_msg_only_sends_exactly_once() {
        let (manager, api) = manager_with_mock();
        let mut record = outbound("100");
        record.msg = Some("hello".to_string());

        manager.publish(&record).await.unwrap();

        let calls = api.calls();
        assert_eq!(
            calls,
            vec![ApiCall::Send {
                channel: ChannelId::new(100),
                text: "hello".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_publish_reaction_only_targets_tracked_message() {
        let (manager, api) = manager_with_mock();
        manager
            .shared
            .last_seen
            .insert(ChannelId::new(100), MessageId::new(555));

        let mut record = outbound("100");
        record.reaction = Some("👋".to_string());

        manager.publish(&record).await.unwrap();

        let calls = api.calls();
        assert_eq!(
            calls,
            vec![ApiCall::React {
                channel: ChannelId::new(100),
                message: MessageId::new(555),
                emoji: "👋".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_publish_reaction_falls_back_to_latest_fetch() {
        let (manager, api) = manager_with_mock();
        api.set_latest(ChannelId::new(100), MessageId::new(777));

        let mut record = outbound("100");
        record.reaction = Some("🎉".to_string());

        manager.publish(&record).await.unwrap();

        assert_eq!(
            api.calls(),
            vec![ApiCall::React {
                channel: ChannelId::new(100),
                message: MessageId::new(777),
                emoji: "🎉".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_publish_reaction_with_no_message_errors() {
        let (manager, _api) = manager_with_mock();
        let mut record = outbound("100");
        record.reaction = Some("🎉".to_string());

        let result = manager.publish(&record).await;
        assert!(matches!(result, Err(DiscordError::NoRecentMessage(_))));
    }

    #[tokio::test]
    async fn test_publish_both_sends_then_reacts_to_sent_message() {
        let (manager, api) = manager_with_mock();
        let mut record = outbound("100");
        record.msg = Some("hello".to_string());
        record.reaction = Some("👋".to_string());

        manager.publish(&record).await.unwrap();

        let calls = api.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[0],
            ApiCall::Send {
                channel: ChannelId::new(100),
                text: "hello".to_string(),
            }
        );
        let ApiCall::React { message, .. } = &calls[1] else {
            panic!("second call should be a reaction");
        };
        assert_eq!(*message, MessageId::new(1000));
    }

    #[tokio::test]
    async fn test_publish_empty_record_errors() {
        let (manager, api) = manager_with_mock();

        let result = manager.publish(&outbound("100")).await;
        assert!(matches!(result, Err(DiscordError::EmptyRecord)));
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_publish_resolves_channel_names() {
        let (manager, api) = manager_with_mock();
        manager
            .shared
            .directory
            .insert("general".to_string(), ChannelId::new(42));

        let mut record = outbound("#General");
        record.msg = Some("hi".to_string());

        manager.publish(&record).await.unwrap();

        assert_eq!(
            api.calls(),
            vec![ApiCall::Send {
                channel: ChannelId::new(42),
                text: "hi".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_publish_unknown_channel_name_errors() {
        let (manager, _api) = manager_with_mock();
        let mut record = outbound("nonexistent");
        record.msg = Some("hi".to_string());

        let result = manager.publish(&record).await;
        assert!(matches!(result, Err(DiscordError::UnknownChannel(_))));
    }

    #[tokio::test]
    async fn test_publish_targets_thread_over_channel() {
        let (manager, api) = manager_with_mock();
        let mut record = outbound("100");
        record.thread = Some("200".to_string());
        record.msg = Some("hi".to_string());

        manager.publish(&record).await.unwrap();

        assert_eq!(
            api.calls(),
            vec![ApiCall::Send {
                channel: ChannelId::new(200),
                text: "hi".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_subscribe_requires_connection() {
        let config = DiscordConfig::new("test-token").unwrap();
        let manager = DiscordAdapterManager::new(config);

        let result = manager.subscribe().await;
        assert!(matches!(result, Err(DiscordError::NotConnected)));
    }

    #[tokio::test]
    async fn test_subscription_batches_preserve_arrival_order() {
        let (manager, _api) = manager_with_mock();
        let mut subscription = manager.subscribe().await.unwrap();

        for text in ["e1", "e2", "e3"] {
            manager.shared.dispatch(DiscordMessage {
                user_id: "7".to_string(),
                channel_id: "100".to_string(),
                msg: Some(text.to_string()),
                ..Default::default()
            });
        }

        let batch = subscription.recv().await.unwrap();
        let texts: Vec<_> = batch.iter().filter_map(|r| r.msg.as_deref()).collect();
        assert_eq!(texts, vec!["e1", "e2", "e3"]);
    }

    #[tokio::test]
    async fn test_subscription_stream_yields_batches() {
        use futures::StreamExt;

        let (manager, _api) = manager_with_mock();
        let mut subscription = manager.subscribe().await.unwrap();

        manager.shared.dispatch(DiscordMessage {
            user_id: "7".to_string(),
            channel_id: "100".to_string(),
            msg: Some("hi".to_string()),
            ..Default::default()
        });

        let batch = subscription.next().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].msg.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn test_subscribe_with_backfill_delivers_history_first() {
        let (manager, api) = manager_with_mock();
        let history: Vec<DiscordMessage> = ["old1", "old2"]
            .iter()
            .map(|text| DiscordMessage {
                user_id: "7".to_string(),
                channel_id: "100".to_string(),
                msg: Some(text.to_string()),
                ..Default::default()
            })
            .collect();
        api.set_history(ChannelId::new(100), history);

        let options = SubscribeOptions {
            channels: Some(["100".to_string()].into_iter().collect()),
            skip_history: false,
            ..Default::default()
        };
        let mut subscription = manager.subscribe_with(options).await.unwrap();

        let batch = subscription.recv().await.unwrap();
        let texts: Vec<_> = batch.iter().filter_map(|r| r.msg.as_deref()).collect();
        assert_eq!(texts, vec!["old1", "old2"]);
    }

    #[tokio::test]
    async fn test_subscribe_with_unknown_channel_name_errors() {
        let (manager, _api) = manager_with_mock();
        let options = SubscribeOptions {
            channels: Some(["no-such-channel".to_string()].into_iter().collect()),
            ..Default::default()
        };

        let result = manager.subscribe_with(options).await;
        assert!(matches!(result, Err(DiscordError::UnknownChannel(_))));
    }

    #[tokio::test]
    async fn test_publish_presence_goes_through_api() {
        let (manager, api) = manager_with_mock();
        let presence = DiscordPresence::status(PresenceStatus::Idle);

        manager.publish_presence(&presence).await.unwrap();

        assert_eq!(api.calls(), vec![ApiCall::Presence(presence)]);
    }

    #[tokio::test]
    async fn test_shutdown_closes_subscriptions() {
        let (manager, _api) = manager_with_mock();
        let mut subscription = manager.subscribe().await.unwrap();

        manager.shutdown().await;

        assert!(subscription.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropping_subscription_unregisters_it() {
        let (manager, _api) = manager_with_mock();
        let subscription = manager.subscribe().await.unwrap();
        assert_eq!(manager.shared.subscriptions.len(), 1);

        drop(subscription);
        assert!(manager.shared.subscriptions.is_empty());
    }
}
