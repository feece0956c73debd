//! Presence model sent with identify and presence-update frames.

use serde::{Deserialize, Serialize};

/// Online status shown to other users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Online,
    Idle,
    /// Do not disturb
    Dnd,
    /// Shown as offline to everyone else
    Invisible,
    Offline,
}

impl UserStatus {
    /// Check if this status should be visible to others
    #[must_use]
    pub fn is_visible(&self) -> bool {
        !matches!(self, Self::Invisible | Self::Offline)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Idle => "idle",
            Self::Dnd => "dnd",
            Self::Invisible => "invisible",
            Self::Offline => "offline",
        }
    }
}

impl std::fmt::Display for UserStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UserStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "online" => Ok(Self::Online),
            "idle" => Ok(Self::Idle),
            "dnd" => Ok(Self::Dnd),
            "invisible" => Ok(Self::Invisible),
            "offline" => Ok(Self::Offline),
            _ => Err(format!("Invalid status: {s}")),
        }
    }
}

/// Activity kind, serialized as its integer code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum ActivityType {
    Playing,
    Streaming,
    Listening,
    Watching,
    Custom,
    Competing,
    Unknown(u8),
}

impl From<u8> for ActivityType {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Playing,
            1 => Self::Streaming,
            2 => Self::Listening,
            3 => Self::Watching,
            4 => Self::Custom,
            5 => Self::Competing,
            other => Self::Unknown(other),
        }
    }
}

impl From<ActivityType> for u8 {
    fn from(value: ActivityType) -> Self {
        match value {
            ActivityType::Playing => 0,
            ActivityType::Streaming => 1,
            ActivityType::Listening => 2,
            ActivityType::Watching => 3,
            ActivityType::Custom => 4,
            ActivityType::Competing => 5,
            ActivityType::Unknown(other) => other,
        }
    }
}

/// A single activity shown under the user's name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ActivityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl Activity {
    #[must_use]
    pub fn new(kind: ActivityType, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            url: None,
            state: None,
        }
    }

    #[must_use]
    pub fn playing(name: impl Into<String>) -> Self {
        Self::new(ActivityType::Playing, name)
    }

    #[must_use]
    pub fn streaming(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::new(ActivityType::Streaming, name)
        }
    }

    #[must_use]
    pub fn custom(state: impl Into<String>) -> Self {
        Self {
            state: Some(state.into()),
            ..Self::new(ActivityType::Custom, "Custom Status")
        }
    }
}

/// Presence payload (`d` of a presence update, `presence` of identify)
///
/// Missing fields are filled with `since: null`, no activities, `online`
/// and `afk: false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PresenceData {
    /// Unix time in milliseconds when the client went idle
    #[serde(default)]
    pub since: Option<i64>,
    #[serde(default)]
    pub activities: Vec<Activity>,
    #[serde(default)]
    pub status: UserStatus,
    #[serde(default)]
    pub afk: bool,
}

impl PresenceData {
    #[must_use]
    pub fn new(status: UserStatus) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_activity(mut self, activity: Activity) -> Self {
        self.activities.push(activity);
        self
    }

    #[must_use]
    pub fn with_since(mut self, since: i64) -> Self {
        self.since = Some(since);
        self
    }

    #[must_use]
    pub fn with_afk(mut self, afk: bool) -> Self {
        self.afk = afk;
        self
    }
}
