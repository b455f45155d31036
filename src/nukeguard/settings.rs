use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::db::{self, KvStore};

use super::event::{EventCategory, PunishmentKind};

/// Storage key for the settings document.
pub const SETTINGS_KEY: &str = "settings";

/// Runtime-mutable moderation settings, persisted as one document per
/// deployment. `#[serde(default)]` lets an older stored document load after
/// new fields are added.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct GuardSettings {
    pub anti_channel_create: bool,
    pub anti_channel_delete: bool,
    pub anti_role_create: bool,
    pub anti_role_delete: bool,
    pub anti_ban: bool,
    pub anti_kick: bool,
    pub anti_mass_message_delete: bool,
    pub anti_mass_messages: bool,
    pub anti_invite_links: bool,
    pub punishment: PunishmentKind,
    /// Timeout punishment duration, seconds.
    pub timeout_secs: u64,
    /// Shared threshold for every mass window.
    pub mass_message_threshold: u32,
    /// Shared timeframe for every mass window, seconds.
    pub mass_message_timeframe: u64,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            anti_channel_create: true,
            anti_channel_delete: true,
            anti_role_create: true,
            anti_role_delete: true,
            anti_ban: true,
            anti_kick: true,
            anti_mass_message_delete: true,
            anti_mass_messages: true,
            anti_invite_links: true,
            punishment: PunishmentKind::Ban,
            timeout_secs: 600,
            mass_message_threshold: 5,
            mass_message_timeframe: 10,
        }
    }
}

impl GuardSettings {
    /// Names accepted by `configure`, in display order. `channels` and
    /// `roles` are grouped aliases setting both flags of the pair.
    pub const SETTING_NAMES: &'static [&'static str] = &[
        "anti_channel_create",
        "anti_channel_delete",
        "anti_role_create",
        "anti_role_delete",
        "anti_ban",
        "anti_kick",
        "anti_mass_message_delete",
        "anti_mass_messages",
        "anti_invite_links",
        "punishment",
        "timeout_secs",
        "mass_message_threshold",
        "mass_message_timeframe",
        "channels",
        "roles",
    ];

    /// Whether detection for a category is switched on at all.
    pub fn category_enabled(&self, category: EventCategory) -> bool {
        match category {
            EventCategory::ChannelCreate => self.anti_channel_create,
            EventCategory::ChannelDelete => self.anti_channel_delete,
            EventCategory::RoleCreate => self.anti_role_create,
            EventCategory::RoleDelete => self.anti_role_delete,
            EventCategory::MemberBan => self.anti_ban,
            EventCategory::MemberKick => self.anti_kick,
            EventCategory::MessageDelete => self.anti_mass_message_delete,
            EventCategory::MessageSend => self.anti_mass_messages,
        }
    }
}

/// Rejected `configure` calls. The store is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown setting `{0}`")]
    UnknownSetting(String),
    #[error("invalid value `{value}` for `{name}`: expected {expected}")]
    InvalidValue {
        name: String,
        value: String,
        expected: &'static str,
    },
}

/// Shared settings store with write-through persistence. Reads take a cheap
/// snapshot; `configure` validates fully before any field changes.
#[derive(Debug)]
pub struct SettingsStore {
    inner: RwLock<GuardSettings>,
    kv: Arc<dyn KvStore>,
}

impl SettingsStore {
    pub fn new(initial: GuardSettings, kv: Arc<dyn KvStore>) -> Self {
        Self {
            inner: RwLock::new(initial),
            kv,
        }
    }

    /// Load the persisted document, falling back to defaults.
    pub async fn load(kv: Arc<dyn KvStore>) -> Self {
        let initial = db::load_or(kv.as_ref(), SETTINGS_KEY, GuardSettings::default()).await;
        Self::new(initial, kv)
    }

    pub async fn snapshot(&self) -> GuardSettings {
        self.inner.read().await.clone()
    }

    /// Apply one named setting. Unknown names and malformed values come back
    /// as [ConfigError] with no side effect; successful mutations persist
    /// best-effort.
    pub async fn configure(&self, name: &str, value: &str) -> Result<(), ConfigError> {
        let mut guard = self.inner.write().await;
        let mut next = guard.clone();
        apply(&mut next, name, value)?;
        *guard = next.clone();
        drop(guard);

        if let Err(e) = self.kv.save(SETTINGS_KEY, &doc(&next)).await {
            tracing::warn!(error = ?e, "settings persist failed");
        }
        Ok(())
    }
}

fn doc(settings: &GuardSettings) -> serde_json::Value {
    serde_json::to_value(settings).unwrap_or(serde_json::Value::Null)
}

fn apply(s: &mut GuardSettings, name: &str, value: &str) -> Result<(), ConfigError> {
    match name {
        "anti_channel_create" => s.anti_channel_create = parse_flag(name, value)?,
        "anti_channel_delete" => s.anti_channel_delete = parse_flag(name, value)?,
        "anti_role_create" => s.anti_role_create = parse_flag(name, value)?,
        "anti_role_delete" => s.anti_role_delete = parse_flag(name, value)?,
        "anti_ban" => s.anti_ban = parse_flag(name, value)?,
        "anti_kick" => s.anti_kick = parse_flag(name, value)?,
        "anti_mass_message_delete" => s.anti_mass_message_delete = parse_flag(name, value)?,
        "anti_mass_messages" => s.anti_mass_messages = parse_flag(name, value)?,
        "anti_invite_links" => s.anti_invite_links = parse_flag(name, value)?,
        "channels" => {
            let v = parse_flag(name, value)?;
            s.anti_channel_create = v;
            s.anti_channel_delete = v;
        }
        "roles" => {
            let v = parse_flag(name, value)?;
            s.anti_role_create = v;
            s.anti_role_delete = v;
        }
        "punishment" => {
            s.punishment = PunishmentKind::parse(value).ok_or_else(|| ConfigError::InvalidValue {
                name: name.into(),
                value: value.into(),
                expected: "one of `kick`, `ban`, `timeout`",
            })?;
        }
        "timeout_secs" => s.timeout_secs = parse_count(name, value)?,
        "mass_message_timeframe" => s.mass_message_timeframe = parse_count(name, value)?,
        "mass_message_threshold" => {
            let n = parse_count(name, value)?;
            s.mass_message_threshold =
                u32::try_from(n).map_err(|_| ConfigError::InvalidValue {
                    name: name.into(),
                    value: value.into(),
                    expected: "a positive whole number",
                })?;
        }
        _ => return Err(ConfigError::UnknownSetting(name.into())),
    }
    Ok(())
}

fn parse_flag(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "true" => Ok(true),
        "off" | "false" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name: name.into(),
            value: value.into(),
            expected: "`on` or `off`",
        }),
    }
}

/// Upper bound for the integer settings (one year in seconds). Keeps every
/// duration derived from them inside the range the time arithmetic accepts.
pub const MAX_COUNT: u64 = 31_536_000;

fn parse_count(name: &str, value: &str) -> Result<u64, ConfigError> {
    match value.parse::<u64>() {
        Ok(n) if n > 0 && n <= MAX_COUNT => Ok(n),
        _ => Err(ConfigError::InvalidValue {
            name: name.into(),
            value: value.into(),
            expected: "a positive whole number no greater than 31536000",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryKv;

    fn store() -> SettingsStore {
        SettingsStore::new(GuardSettings::default(), Arc::new(MemoryKv::default()))
    }

    #[tokio::test]
    async fn flags_accept_on_off_and_bool_words() {
        let s = store();
        s.configure("anti_ban", "off").await.unwrap();
        assert!(!s.snapshot().await.anti_ban);
        s.configure("anti_ban", "TRUE").await.unwrap();
        assert!(s.snapshot().await.anti_ban);
    }

    #[tokio::test]
    async fn unknown_setting_leaves_store_untouched() {
        let s = store();
        let before = serde_json::to_string(&s.snapshot().await).unwrap();
        let err = s.configure("no_such_setting", "on").await.unwrap_err();
        assert_eq!(err, ConfigError::UnknownSetting("no_such_setting".into()));
        let after = serde_json::to_string(&s.snapshot().await).unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn invalid_value_leaves_store_untouched() {
        let s = store();
        let before = serde_json::to_string(&s.snapshot().await).unwrap();
        assert!(s.configure("timeout_secs", "-3").await.is_err());
        assert!(s.configure("timeout_secs", "0").await.is_err());
        assert!(s.configure("punishment", "mute").await.is_err());
        assert!(s.configure("anti_kick", "maybe").await.is_err());
        let after = serde_json::to_string(&s.snapshot().await).unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn oversized_counts_are_rejected() {
        let s = store();
        let before = serde_json::to_string(&s.snapshot().await).unwrap();
        assert!(s.configure("timeout_secs", "5000000000000000000").await.is_err());
        assert!(s.configure("mass_message_timeframe", "9999999999999999999").await.is_err());
        assert!(s.configure("mass_message_threshold", &(MAX_COUNT + 1).to_string()).await.is_err());
        let after = serde_json::to_string(&s.snapshot().await).unwrap();
        assert_eq!(before, after);

        // The bound itself is still accepted.
        s.configure("timeout_secs", &MAX_COUNT.to_string()).await.unwrap();
        assert_eq!(s.snapshot().await.timeout_secs, MAX_COUNT);
    }

    #[tokio::test]
    async fn grouped_aliases_set_both_flags() {
        let s = store();
        s.configure("channels", "off").await.unwrap();
        let snap = s.snapshot().await;
        assert!(!snap.anti_channel_create);
        assert!(!snap.anti_channel_delete);
        s.configure("roles", "off").await.unwrap();
        let snap = s.snapshot().await;
        assert!(!snap.anti_role_create);
        assert!(!snap.anti_role_delete);
    }

    #[tokio::test]
    async fn punishment_and_counts_parse() {
        let s = store();
        s.configure("punishment", "timeout").await.unwrap();
        s.configure("timeout_secs", "120").await.unwrap();
        s.configure("mass_message_threshold", "3").await.unwrap();
        s.configure("mass_message_timeframe", "30").await.unwrap();
        let snap = s.snapshot().await;
        assert_eq!(snap.punishment, PunishmentKind::Timeout);
        assert_eq!(snap.timeout_secs, 120);
        assert_eq!(snap.mass_message_threshold, 3);
        assert_eq!(snap.mass_message_timeframe, 30);
    }

    #[tokio::test]
    async fn mutations_write_through() {
        let kv = Arc::new(MemoryKv::default());
        let s = SettingsStore::new(GuardSettings::default(), kv.clone());
        s.configure("anti_invite_links", "off").await.unwrap();
        let stored = kv.load(SETTINGS_KEY).await.unwrap().unwrap();
        let loaded: GuardSettings = serde_json::from_value(stored).unwrap();
        assert!(!loaded.anti_invite_links);
    }

    #[tokio::test]
    async fn load_falls_back_to_defaults() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::default());
        let s = SettingsStore::load(kv).await;
        assert_eq!(s.snapshot().await, GuardSettings::default());
    }
}
