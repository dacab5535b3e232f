//! Bot presence types

use serde::{Deserialize, Serialize};
use serenity::gateway::ActivityData;
use serenity::model::user::OnlineStatus;

/// Bot online status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    #[default]
    Online,
    Idle,
    DoNotDisturb,
    Invisible,
}

impl PresenceStatus {
    pub(crate) fn to_serenity(self) -> OnlineStatus {
        match self {
            Self::Online => OnlineStatus::Online,
            Self::Idle => OnlineStatus::Idle,
            Self::DoNotDisturb => OnlineStatus::DoNotDisturb,
            Self::Invisible => OnlineStatus::Invisible,
        }
    }
}

/// What the bot is shown doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Playing,
    Listening,
    Watching,
    Competing,
}

/// An activity line, e.g. "Playing chess".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub kind: ActivityKind,
    pub name: String,
}

impl Activity {
    pub(crate) fn to_serenity(&self) -> ActivityData {
        match self.kind {
            ActivityKind::Playing => ActivityData::playing(self.name.clone()),
            ActivityKind::Listening => ActivityData::listening(self.name.clone()),
            ActivityKind::Watching => ActivityData::watching(self.name.clone()),
            ActivityKind::Competing => ActivityData::competing(self.name.clone()),
        }
    }
}

/// A presence update: status plus an optional activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscordPresence {
    pub status: PresenceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<Activity>,
}

impl DiscordPresence {
    /// A presence with the given status and no activity.
    pub fn status(status: PresenceStatus) -> Self {
        Self {
            status,
            activity: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_maps_to_serenity() {
        assert_eq!(
            PresenceStatus::DoNotDisturb.to_serenity(),
            OnlineStatus::DoNotDisturb
        );
        assert_eq!(PresenceStatus::Online.to_serenity(), OnlineStatus::Online);
    }

    #[test]
    fn test_activity_maps_to_serenity() {
        let activity = Activity {
            kind: ActivityKind::Watching,
            name: "the stream".to_string(),
        };
        let data = activity.to_serenity();
        assert_eq!(data.name, "the stream");
    }
}
