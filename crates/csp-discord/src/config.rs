//! Adapter configuration
//!
//! The bot token may be given either as a literal string or as a path to a
//! file containing it; resolution happens once, at construction.

use std::path::Path;

use serenity::all::GatewayIntents;

use crate::error::{DiscordError, Result};

/// Configuration for the Discord adapter.
///
/// Immutable once constructed. The token is resolved eagerly so that a
/// missing or unreadable token file fails the run before any connection
/// attempt is made.
#[derive(Clone)]
pub struct DiscordConfig {
    token: String,
    intents: Vec<String>,
}

impl DiscordConfig {
    /// Create a configuration from a token string.
    ///
    /// If `token` names an existing filesystem path, the resolved token is
    /// that file's trimmed contents; otherwise the string is used as the
    /// token itself.
    pub fn new(token: impl AsRef<str>) -> Result<Self> {
        Ok(Self {
            token: resolve_token(token.as_ref())?,
            intents: Vec::new(),
        })
    }

    /// Replace the default gateway intents with a named set.
    ///
    /// Recognized names: `guilds`, `guild_members`, `guild_messages`,
    /// `guild_message_reactions`, `direct_messages`,
    /// `direct_message_reactions`, `message_content`.
    pub fn with_intents<I, S>(mut self, intents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.intents = intents.into_iter().map(Into::into).collect();
        self
    }

    /// The resolved bot token.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Map the configured intent names to serenity gateway intents.
    ///
    /// An empty configuration yields the default set covering guild and
    /// direct messages, reactions, and message content.
    pub fn gateway_intents(&self) -> Result<GatewayIntents> {
        if self.intents.is_empty() {
            return Ok(default_intents());
        }

        let mut intents = GatewayIntents::empty();
        for name in &self.intents {
            intents |= parse_intent(name)?;
        }
        Ok(intents)
    }
}

impl std::fmt::Debug for DiscordConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordConfig")
            .field("token", &"<redacted>")
            .field("intents", &self.intents)
            .finish()
    }
}

fn resolve_token(token: &str) -> Result<String> {
    let path = Path::new(token);
    if path.exists() {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            DiscordError::Config(format!(
                "could not read token file `{}`: {}",
                path.display(),
                e
            ))
        })?;
        Ok(contents.trim().to_string())
    } else {
        Ok(token.to_string())
    }
}

fn default_intents() -> GatewayIntents {
    GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::GUILD_MESSAGE_REACTIONS
        | GatewayIntents::DIRECT_MESSAGES
        | GatewayIntents::DIRECT_MESSAGE_REACTIONS
        | GatewayIntents::MESSAGE_CONTENT
}

fn parse_intent(name: &str) -> Result<GatewayIntents> {
    match name {
        "guilds" => Ok(GatewayIntents::GUILDS),
        "guild_members" => Ok(GatewayIntents::GUILD_MEMBERS),
        "guild_messages" => Ok(GatewayIntents::GUILD_MESSAGES),
        "guild_message_reactions" => Ok(GatewayIntents::GUILD_MESSAGE_REACTIONS),
        "direct_messages" => Ok(GatewayIntents::DIRECT_MESSAGES),
        "direct_message_reactions" => Ok(GatewayIntents::DIRECT_MESSAGE_REACTIONS),
        "message_content" => Ok(GatewayIntents::MESSAGE_CONTENT),
        other => Err(DiscordError::Config(format!("unknown intent: {other}"))),
    }
}
